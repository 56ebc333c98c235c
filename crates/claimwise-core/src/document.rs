//! Policy documents and the retrievable nodes they are split into.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// String metadata attached to documents and inherited by their nodes.
pub type Metadata = BTreeMap<String, String>;

/// Well-known metadata keys.
pub mod meta {
    pub const FILE_NAME: &str = "file_name";
    pub const FILE_PATH: &str = "file_path";
    /// Set on declarations documents only.
    pub const POLICY_NUMBER: &str = "policy_number";
}

/// A loaded document. Never mutated after load.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicyDocument {
    /// Stable identifier derived from the file name.
    pub id: String,
    pub content: String,
    pub metadata: Metadata,
}

impl PolicyDocument {
    pub fn file_name(&self) -> Option<&str> {
        self.metadata.get(meta::FILE_NAME).map(String::as_str)
    }

    pub fn policy_number(&self) -> Option<&str> {
        self.metadata.get(meta::POLICY_NUMBER).map(String::as_str)
    }
}

/// A chunk of a document, the unit of indexing and retrieval.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextNode {
    /// `<doc_id>#<chunk_index>`, stable across rebuilds of the same corpus.
    pub id: String,
    pub doc_id: String,
    pub text: String,
    pub metadata: Metadata,
}

impl TextNode {
    pub fn node_id(doc_id: &str, chunk_index: usize) -> String {
        format!("{doc_id}#{chunk_index}")
    }

    pub fn policy_number(&self) -> Option<&str> {
        self.metadata.get(meta::POLICY_NUMBER).map(String::as_str)
    }
}

/// A retrieval hit with its similarity score (higher is closer).
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredNode {
    pub node: TextNode,
    pub score: f32,
}
