//! Deterministic feature-hashing embedder
//!
//! Needs no network or model weights. Each lowercase alphanumeric token
//! (minus a short stopword list) is hashed with FNV-1a into one of
//! `dimension` buckets with a hash-derived sign, and the result is
//! L2-normalized. Texts sharing rare words end up close under cosine.

use async_trait::async_trait;

use crate::embedding::{validate_input, Embedder};
use crate::errors::{RagError, Result};
use crate::types::EmbeddingVector;

const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

const STOPWORDS: &[&str] = &[
    "a", "an", "and", "are", "as", "at", "be", "by", "do", "does", "for", "from", "how", "in",
    "is", "it", "its", "of", "on", "or", "that", "the", "this", "to", "what", "which", "with",
];

pub struct HashingEmbedder {
    dimension: usize,
    max_input_chars: usize,
}

impl HashingEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension: dimension.max(1),
            max_input_chars: 30_000,
        }
    }

    pub fn with_max_input_chars(mut self, max_input_chars: usize) -> Self {
        self.max_input_chars = max_input_chars;
        self
    }

    /// Synchronous core, shared with tests
    pub fn embed_text(&self, text: &str) -> Result<EmbeddingVector> {
        validate_input(text, self.max_input_chars)?;

        let mut values = vec![0.0f32; self.dimension];
        let mut tokens = 0usize;

        for token in tokenize(text) {
            let hash = fnv1a(token.as_bytes());
            let bucket = (hash % self.dimension as u64) as usize;
            let sign = if (hash >> 63) == 0 { 1.0 } else { -1.0 };
            values[bucket] += sign;
            tokens += 1;
        }

        // Text made only of stopwords still gets a usable vector
        if tokens == 0 {
            for token in text.split_whitespace() {
                let hash = fnv1a(token.to_lowercase().as_bytes());
                values[(hash % self.dimension as u64) as usize] += 1.0;
            }
        }

        let norm = values.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm == 0.0 {
            return Err(RagError::EmbeddingFailure(
                "input produced no features".to_string(),
            ));
        }
        for v in values.iter_mut() {
            *v /= norm;
        }

        Ok(EmbeddingVector::new(values))
    }
}

#[async_trait]
impl Embedder for HashingEmbedder {
    async fn embed(&self, text: &str) -> Result<EmbeddingVector> {
        self.embed_text(text)
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn model(&self) -> &str {
        "hashing"
    }
}

fn tokenize(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| t.to_lowercase())
        .filter(|t| !STOPWORDS.contains(&t.as_str()))
}

fn fnv1a(bytes: &[u8]) -> u64 {
    bytes.iter().fold(FNV_OFFSET, |hash, b| {
        (hash ^ u64::from(*b)).wrapping_mul(FNV_PRIME)
    })
}
