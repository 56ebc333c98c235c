//! Storage layer: document corpus loading, chunking, and persistent retrieval indexes.

mod chunk;
mod error;
mod index;
mod loader;
mod retriever;

pub use chunk::{ChunkConfig, split_document};
pub use error::StoreError;
pub use index::FlatIndex;
pub use loader::{
    LoadOptions, MetadataExtractor, PolicyNumberExtractor, holder_from_declarations,
    load_declarations, load_documents, load_policy_corpus,
};
pub use retriever::{MetadataFilter, Retriever};

#[cfg(feature = "lancedb")]
mod lance;
#[cfg(feature = "lancedb")]
pub use lance::LanceIndex;
