//! Claim adjudication pipeline.
//!
//! A claim moves through a fixed sequence of stages, each one transition of
//! an explicit state machine. The state value carries everything later
//! stages need, so a run holds no shared mutable state.

mod error;
mod passages;
mod pipeline;

pub use error::PipelineError;
pub use passages::PassageSet;
pub use pipeline::{
    ClaimOutcome, ClaimPipeline, DECLARATIONS_INDEX, POLICY_INDEX, PipelineConfig, Progress,
    RunContext, Stage, State,
};
