use async_trait::async_trait;
use rayon::prelude::*;

use crate::error::CollaboratorError;
use crate::nlp::Embedder;

/// Scale `vector` to unit length in place. Returns `false` (and leaves the
/// vector untouched) when it has no length to scale.
pub fn normalize(vector: &mut [f32]) -> bool {
    let norm = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm == 0.0 || !norm.is_finite() {
        return false;
    }
    vector.iter_mut().for_each(|x| *x /= norm);
    true
}

pub fn is_unit(vector: &[f32]) -> bool {
    let norm = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
    (norm - 1.0).abs() < 1e-3
}

/// Deterministic feature-hashing embedder over character trigrams.
///
/// Needs no model and always returns unit vectors, so it doubles as the
/// fallback when the real embedder fails.
#[derive(Debug, Clone)]
pub struct HashingEmbedder {
    dim: usize,
}

impl HashingEmbedder {
    pub fn new(dim: usize) -> Self {
        Self { dim: dim.max(1) }
    }

    pub fn embed_one(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dim];
        let padded: Vec<char> = format!("  {}  ", text.to_lowercase()).chars().collect();

        for window in padded.windows(3) {
            let hash = fnv1a(window);
            let index = (hash % self.dim as u64) as usize;
            let sign = if (hash >> 63) == 0 { 1.0 } else { -1.0 };
            vector[index] += sign;
        }

        if !normalize(&mut vector) {
            vector[0] = 1.0;
        }
        vector
    }

    pub fn embed_all(&self, texts: &[String]) -> Vec<Vec<f32>> {
        texts.par_iter().map(|t| self.embed_one(t)).collect()
    }
}

fn fnv1a(chars: &[char]) -> u64 {
    const OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
    const PRIME: u64 = 0x0000_0100_0000_01b3;

    let mut hash = OFFSET;
    for c in chars {
        let mut buf = [0u8; 4];
        for byte in c.encode_utf8(&mut buf).bytes() {
            hash ^= byte as u64;
            hash = hash.wrapping_mul(PRIME);
        }
    }
    hash
}

#[async_trait]
impl Embedder for HashingEmbedder {
    fn dimension(&self) -> usize {
        self.dim
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, CollaboratorError> {
        let embedder = self.clone();
        let texts = texts.to_vec();
        tokio::task::spawn_blocking(move || embedder.embed_all(&texts))
            .await
            .map_err(|e| CollaboratorError::InvalidOutput(format!("embedding task failed: {}", e)))
    }
}
