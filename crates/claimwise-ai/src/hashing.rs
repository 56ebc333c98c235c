//! Deterministic feature-hashing embedder.
//!
//! Needs no model files or network: each word token is hashed (FNV-1a) into
//! one of `dim` buckets, bucket counts are log-scaled and the vector is
//! L2-normalized. Similarity is therefore lexical overlap, which is enough for
//! policy wording where claims and clauses share vocabulary ("collision",
//! "deductible", "comprehensive").

use crate::embed::{Embed, normalize};

const STOP_WORDS: &[&str] = &[
    "a", "an", "and", "are", "as", "at", "be", "by", "for", "from", "has", "in", "is", "it",
    "its", "of", "on", "or", "that", "the", "this", "to", "was", "were", "will", "with",
];

pub struct HashingEmbedder {
    dim: usize,
    name: String,
}

impl HashingEmbedder {
    pub const DEFAULT_DIM: usize = 512;

    pub fn new(dim: usize) -> Self {
        let dim = dim.max(1);
        Self {
            dim,
            name: format!("feature-hashing-{dim}"),
        }
    }

    fn embed_one(&self, text: &str) -> Vec<f32> {
        let mut counts = vec![0.0f32; self.dim];
        for token in tokens(text) {
            let bucket = (fnv1a(token.as_bytes()) % self.dim as u64) as usize;
            counts[bucket] += 1.0;
        }
        for c in counts.iter_mut().filter(|c| **c > 0.0) {
            *c = 1.0 + c.ln();
        }
        normalize(&mut counts);
        counts
    }
}

impl Default for HashingEmbedder {
    fn default() -> Self {
        Self::new(Self::DEFAULT_DIM)
    }
}

impl Embed for HashingEmbedder {
    fn model_name(&self) -> &str {
        &self.name
    }

    fn dim(&self) -> usize {
        self.dim
    }

    fn embed_batch(&self, texts: &[&str]) -> anyhow::Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| self.embed_one(t)).collect())
    }
}

/// Lower-cased alphanumeric word tokens, stop words removed, trailing plural `s` stripped.
fn tokens(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(str::to_lowercase)
        .filter(|w| !STOP_WORDS.contains(&w.as_str()))
        .map(|w| {
            if w.len() > 4 && w.ends_with('s') && !w.ends_with("ss") {
                w[..w.len() - 1].to_string()
            } else {
                w
            }
        })
}

fn fnv1a(bytes: &[u8]) -> u64 {
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for &b in bytes {
        hash ^= b as u64;
        hash = hash.wrapping_mul(0x0100_0000_01b3);
    }
    hash
}
