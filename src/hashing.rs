use crate::{
    embedding::EmbeddingProvider,
    error::{Error, Result},
    similarity::normalize,
    text_util::tokenize,
};

pub const DEFAULT_DIMENSION: usize = 256;

/// Feature-hashing embedder: each lowercase word token adds ±1 to one
/// bucket, and the result is L2-normalised.
///
/// Tokens are hashed with BLAKE3, so output depends only on the text and
/// the dimension: identical texts produce identical vectors on every
/// platform and toolchain, and stored vectors stay comparable. Useful
/// offline and in tests; it has no notion of meaning beyond shared words.
#[derive(Debug, Clone)]
pub struct HashingEmbedder {
    dimension: usize,
    tag: String,
}

impl HashingEmbedder {
    pub fn new(dimension: usize) -> Result<Self> {
        if dimension == 0 {
            return Err(Error::Config(
                "hashing embedder dimension must be positive".into(),
            ));
        }
        Ok(Self {
            dimension,
            tag: format!("hashing:{dimension}"),
        })
    }

    fn embed_one(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dimension];
        for token in tokenize(text) {
            let hash = token_hash(&token);
            let bucket = (hash % self.dimension as u64) as usize;
            let sign = if hash >> 63 == 0 { 1.0 } else { -1.0 };
            vector[bucket] += sign;
        }
        normalize(&mut vector);
        vector
    }
}

/// First eight bytes of the token's BLAKE3 digest, little endian.
fn token_hash(token: &str) -> u64 {
    let digest = blake3::hash(token.as_bytes());
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&digest.as_bytes()[..8]);
    u64::from_le_bytes(bytes)
}

impl EmbeddingProvider for HashingEmbedder {
    fn model_tag(&self) -> &str {
        &self.tag
    }

    fn dimension(&self) -> Option<usize> {
        Some(self.dimension)
    }

    fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| self.embed_one(t)).collect())
    }
}
