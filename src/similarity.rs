use std::cmp::Ordering;

use rayon::prelude::*;

/// A candidate with its similarity to the query.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Ranked {
    /// Position in the candidate slice.
    pub index: usize,
    pub score: f32,
}

/// Scale `vector` to unit length in place. Zero vectors are left alone.
pub fn normalize(vector: &mut [f32]) {
    let norm = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        vector.iter_mut().for_each(|x| *x /= norm);
    }
}

/// Cosine similarity; 0.0 when either side is a zero vector.
pub fn cosine(a: &[f32], b: &[f32]) -> f32 {
    debug_assert_eq!(a.len(), b.len());
    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt())
}

/// Score every candidate against `query` and return them best first.
///
/// Equal scores keep candidate order, so callers that pass candidates in a
/// stable order (by id) get a stable ranking.
pub fn rank(query: &[f32], candidates: &[&[f32]]) -> Vec<Ranked> {
    let mut ranked: Vec<Ranked> = candidates
        .par_iter()
        .enumerate()
        .map(|(index, vector)| Ranked {
            index,
            score: cosine(query, vector),
        })
        .collect();

    sort_ranked(&mut ranked);
    ranked
}

/// Order best first, breaking score ties by candidate position.
pub fn sort_ranked(ranked: &mut [Ranked]) {
    ranked.sort_by(|a, b| {
        by_score_desc(a.score, b.score).then(a.index.cmp(&b.index))
    });
}

fn by_score_desc(a: f32, b: f32) -> Ordering {
    b.partial_cmp(&a).unwrap_or(Ordering::Equal)
}

/// Maximal marginal relevance selection.
///
/// Starting from the `ranked` pool (best first), repeatedly picks the
/// candidate maximising `lambda * sim(query, d) - (1 - lambda) * max
/// sim(d, already picked)` until `k` are picked. The output is in pick
/// order and its scores are the plain query similarities.
pub fn mmr(
    ranked: &[Ranked],
    candidates: &[&[f32]],
    k: usize,
    lambda: f32,
) -> Vec<Ranked> {
    let mut picked: Vec<Ranked> = Vec::with_capacity(k.min(ranked.len()));
    let mut remaining: Vec<Ranked> = ranked.to_vec();

    while picked.len() < k && !remaining.is_empty() {
        let mut best_pos = 0;
        let mut best_value = f32::NEG_INFINITY;
        for (pos, candidate) in remaining.iter().enumerate() {
            let redundancy = picked
                .iter()
                .map(|p| {
                    cosine(candidates[candidate.index], candidates[p.index])
                })
                .fold(f32::NEG_INFINITY, f32::max);
            let redundancy = if picked.is_empty() { 0.0 } else { redundancy };
            let value = lambda * candidate.score - (1.0 - lambda) * redundancy;
            // strict '>' keeps the earlier (better ranked) candidate on ties
            if value > best_value {
                best_value = value;
                best_pos = pos;
            }
        }
        picked.push(remaining.remove(best_pos));
    }

    picked
}
