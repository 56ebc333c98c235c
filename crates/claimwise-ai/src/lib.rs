//! AI layer: text embeddings for retrieval, hosted LLM access, and schema-checked structured prediction.

mod embed;
mod hashing;
pub mod llm;
pub mod prompts;
mod structured;

#[cfg(feature = "onnx")]
mod embedder;
#[cfg(feature = "onnx")]
pub use embedder::OnnxEmbedder;

pub use embed::{Embed, cosine_sim, normalize};
pub use hashing::HashingEmbedder;
pub use llm::{ChatCompletionsClient, LanguageModel, LlmError, ScriptedModel};
pub use structured::{
    EngineConfig, EngineError, PromptTemplate, RecommendationEngine, StructuredOutput,
    extract_json, parse_structured,
};
