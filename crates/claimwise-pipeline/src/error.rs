use claimwise_ai::EngineError;
use claimwise_core::ClaimError;
use claimwise_store::StoreError;
use thiserror::Error;

use crate::Stage;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Claim(#[from] ClaimError),

    #[error("recommendation engine: {0}")]
    Engine(#[from] EngineError),

    #[error("retrieval: {0}")]
    Store(#[from] StoreError),

    #[error("run cancelled before stage `{0}`")]
    Cancelled(Stage),
}
