/// Maximum number of characters in a snippet before truncation.
pub const DEFAULT_SNIPPET_MAX_CHARS: usize = 160;

/// Split text into lowercase alphanumeric word tokens.
pub fn tokenize(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_lowercase)
}

/// Collapse whitespace and cut `text` to at most `max_chars` characters,
/// appending "..." when something was dropped.
pub fn snippet(text: &str, max_chars: usize) -> String {
    let collapsed = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.chars().count() <= max_chars {
        return collapsed;
    }

    let mut cut: String = collapsed.chars().take(max_chars).collect();
    cut.push_str("...");
    cut
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokenize_lowercases_and_splits() {
        let tokens: Vec<String> =
            tokenize("Deep-Learning for CRISPR, 2024!").collect();
        assert_eq!(tokens, vec!["deep", "learning", "for", "crispr", "2024"]);
    }

    #[test]
    fn tokenize_empty() {
        assert_eq!(tokenize("  ,;  ").count(), 0);
    }

    #[test]
    fn snippet_short_text_unchanged() {
        assert_eq!(snippet("a  short\n text", 40), "a short text");
    }

    #[test]
    fn snippet_truncates_on_char_boundary() {
        let s = snippet("ñandú ñandú ñandú", 7);
        assert_eq!(s, "ñandú ñ...");
    }
}
