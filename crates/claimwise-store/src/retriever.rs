use async_trait::async_trait;
use claimwise_core::{Metadata, ScoredNode};

use crate::StoreError;

/// Exact-match metadata predicate: nodes whose `key` equals `value`.
/// Nodes that lack the key never match.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetadataFilter {
    pub key: String,
    pub value: String,
}

impl MetadataFilter {
    pub fn exact(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }

    pub fn matches(&self, metadata: &Metadata) -> bool {
        metadata.get(&self.key).is_some_and(|v| *v == self.value)
    }
}

/// Similarity search over an indexed corpus.
///
/// Results are ordered by descending score and hold at most `top_k` nodes.
#[async_trait]
pub trait Retriever: Send + Sync {
    fn name(&self) -> &str;

    async fn retrieve(&self, query: &str, top_k: usize) -> Result<Vec<ScoredNode>, StoreError>;

    /// Like [`Retriever::retrieve`], restricted to nodes matching `filter`.
    async fn retrieve_filtered(
        &self,
        filter: &MetadataFilter,
        query: &str,
        top_k: usize,
    ) -> Result<Vec<ScoredNode>, StoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filter_requires_exact_value() {
        let filter = MetadataFilter::exact("policy_number", "ABC123");
        let mut m = Metadata::new();
        assert!(!filter.matches(&m));
        m.insert("policy_number".into(), "ABC1234".into());
        assert!(!filter.matches(&m));
        m.insert("policy_number".into(), "abc123".into());
        assert!(!filter.matches(&m));
        m.insert("policy_number".into(), "ABC123".into());
        assert!(filter.matches(&m));
    }
}
