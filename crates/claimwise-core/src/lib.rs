//! Core types for claim adjudication: claim records, policy documents, model outputs and decisions.

pub mod claim;
pub mod decision;
pub mod document;
pub mod schema;

pub use claim::{ClaimError, ClaimRecord, parse_claim};
pub use decision::{ClaimDecision, PolicyQueries, PolicyRecommendation, is_covered};
pub use document::{Metadata, PolicyDocument, ScoredNode, TextNode, meta};
