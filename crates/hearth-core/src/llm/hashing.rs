use async_trait::async_trait;

use super::Embedder;
use crate::error::CollaboratorError;

/// Deterministic feature-hashing embedder.
///
/// Each lowercase alphanumeric token is hashed (FNV-1a) into one of
/// `dimensions` buckets with a hash-derived sign, then the vector is
/// L2-normalised. Texts sharing words therefore score above zero under cosine
/// similarity. Useful offline and in tests; not a semantic model.
#[derive(Debug, Clone)]
pub struct HashingEmbedder {
    dimensions: usize,
}

const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

fn fnv1a(token: &str) -> u64 {
    token.bytes().fold(FNV_OFFSET, |hash, byte| {
        (hash ^ u64::from(byte)).wrapping_mul(FNV_PRIME)
    })
}

impl HashingEmbedder {
    pub fn new(dimensions: usize) -> Self {
        Self {
            dimensions: dimensions.max(1),
        }
    }

    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    /// Synchronous core of [`Embedder::embed`].
    pub fn vectorize(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dimensions];
        let lowered = text.to_lowercase();
        for token in lowered
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
        {
            let hash = fnv1a(token);
            let bucket = (hash % self.dimensions as u64) as usize;
            let sign = if hash >> 63 == 0 { 1.0 } else { -1.0 };
            vector[bucket] += sign;
        }

        let norm = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for x in &mut vector {
                *x /= norm;
            }
        }
        vector
    }
}

#[async_trait]
impl Embedder for HashingEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, CollaboratorError> {
        Ok(self.vectorize(text))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::cosine_similarity;

    #[test]
    fn same_text_same_vector() {
        let e = HashingEmbedder::new(64);
        assert_eq!(e.vectorize("Take out the trash"), e.vectorize("take out the TRASH"));
    }

    #[test]
    fn vectors_are_unit_length() {
        let e = HashingEmbedder::new(32);
        let v = e.vectorize("homework before screen time");
        let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
        assert_eq!(v.len(), 32);
    }

    #[test]
    fn shared_words_score_higher() {
        let e = HashingEmbedder::new(256);
        let q = e.vectorize("screen time limit");
        let near = e.vectorize("the screen time limit is two hours");
        let far = e.vectorize("feed the cat");
        assert!(cosine_similarity(&q, &near) > cosine_similarity(&q, &far));
    }

    #[test]
    fn empty_text_is_zero_vector() {
        let e = HashingEmbedder::new(8);
        assert!(e.vectorize("  ").iter().all(|x| *x == 0.0));
    }
}
