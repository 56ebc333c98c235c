use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use claimwise_ai::RecommendationEngine;
use claimwise_core::{
    ClaimDecision, ClaimRecord, PolicyQueries, PolicyRecommendation, meta, parse_claim,
};
use claimwise_store::{MetadataFilter, Retriever};
use futures::stream::{self, StreamExt};
use serde::Serialize;
use tokio::sync::mpsc::UnboundedSender;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{PassageSet, PipelineError};

/// Persisted index name for the general policy corpus.
pub const POLICY_INDEX: &str = "auto_insurance_policies_0";
/// Persisted index name for the per-holder declarations pages.
pub const DECLARATIONS_INDEX: &str = "auto_insurance_declarations_0";

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Policy nodes retrieved per generated query.
    pub policy_top_k: usize,
    /// Declarations nodes retrieved for the claim's policy number; only the
    /// best hit is used.
    pub declarations_top_k: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            policy_top_k: 3,
            declarations_top_k: 1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    LoadClaim,
    GeneratePolicyQueries,
    RetrievePolicyText,
    GenerateRecommendation,
    FinalizeDecision,
    OutputResult,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Stage::LoadClaim => "load claim",
            Stage::GeneratePolicyQueries => "generate policy queries",
            Stage::RetrievePolicyText => "retrieve policy text",
            Stage::GenerateRecommendation => "generate recommendation",
            Stage::FinalizeDecision => "finalize decision",
            Stage::OutputResult => "output result",
        };
        f.write_str(label)
    }
}

/// Values produced early in a run and read by later stages.
#[derive(Debug, Clone)]
pub struct RunContext {
    pub claim: ClaimRecord,
    /// Set once by the retrieval stage.
    pub policy_text: Option<String>,
}

impl RunContext {
    fn new(claim: ClaimRecord) -> Self {
        Self {
            claim,
            policy_text: None,
        }
    }

    pub fn policy_text(&self) -> &str {
        self.policy_text.as_deref().unwrap_or_default()
    }
}

/// The result of one adjudication run.
#[derive(Debug, Clone, Serialize)]
pub struct ClaimOutcome {
    pub decision: ClaimDecision,
    pub recommendation: PolicyRecommendation,
    pub policy_text: String,
}

/// Pipeline state: the stage about to run plus its inputs.
#[derive(Debug)]
pub enum State {
    LoadClaim {
        path: PathBuf,
    },
    GeneratePolicyQueries {
        ctx: RunContext,
    },
    RetrievePolicyText {
        ctx: RunContext,
        queries: PolicyQueries,
    },
    GenerateRecommendation {
        ctx: RunContext,
    },
    FinalizeDecision {
        ctx: RunContext,
        recommendation: PolicyRecommendation,
    },
    OutputResult(ClaimOutcome),
}

impl State {
    pub fn start(path: impl Into<PathBuf>) -> Self {
        State::LoadClaim { path: path.into() }
    }

    pub fn stage(&self) -> Stage {
        match self {
            State::LoadClaim { .. } => Stage::LoadClaim,
            State::GeneratePolicyQueries { .. } => Stage::GeneratePolicyQueries,
            State::RetrievePolicyText { .. } => Stage::RetrievePolicyText,
            State::GenerateRecommendation { .. } => Stage::GenerateRecommendation,
            State::FinalizeDecision { .. } => Stage::FinalizeDecision,
            State::OutputResult(_) => Stage::OutputResult,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, State::OutputResult(_))
    }
}

/// Human-readable run events, sent on the optional progress channel.
#[derive(Debug, Clone, PartialEq)]
pub enum Progress {
    StageStarted(Stage),
    Message(String),
    StageFinished(Stage),
}

impl fmt::Display for Progress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Progress::StageStarted(stage) => write!(f, ">> {stage}"),
            Progress::Message(msg) => write!(f, "   {msg}"),
            Progress::StageFinished(stage) => write!(f, "<< {stage} done"),
        }
    }
}

/// Adjudicates claims against a policy index and a declarations index.
///
/// Cheap to clone; the indexes and model client are shared.
#[derive(Clone)]
pub struct ClaimPipeline {
    engine: RecommendationEngine,
    policy: Arc<dyn Retriever>,
    declarations: Arc<dyn Retriever>,
    config: PipelineConfig,
    progress: Option<UnboundedSender<Progress>>,
}

impl ClaimPipeline {
    pub fn new(
        engine: RecommendationEngine,
        policy: Arc<dyn Retriever>,
        declarations: Arc<dyn Retriever>,
        config: PipelineConfig,
    ) -> Self {
        Self {
            engine,
            policy,
            declarations,
            config,
            progress: None,
        }
    }

    pub fn with_progress(mut self, tx: UnboundedSender<Progress>) -> Self {
        self.progress = Some(tx);
        self
    }

    fn emit(&self, event: Progress) {
        if let Some(tx) = &self.progress {
            // A dropped receiver only means nobody is watching.
            let _ = tx.send(event);
        }
    }

    /// Run one transition. The terminal state is returned unchanged.
    pub async fn advance(&self, state: State) -> Result<State, PipelineError> {
        if state.is_terminal() {
            return Ok(state);
        }
        let stage = state.stage();
        info!(stage = %stage, "stage started");
        self.emit(Progress::StageStarted(stage));

        let next = match state {
            State::LoadClaim { path } => {
                let claim = parse_claim(&path)?;
                self.emit(Progress::Message(format!(
                    "claim {} on policy {} ({})",
                    claim.claim_number, claim.policy_number, claim.claimant_name
                )));
                State::GeneratePolicyQueries {
                    ctx: RunContext::new(claim),
                }
            }
            State::GeneratePolicyQueries { ctx } => {
                let queries = self.engine.generate_queries(&ctx.claim).await?;
                State::RetrievePolicyText { ctx, queries }
            }
            State::RetrievePolicyText { mut ctx, queries } => {
                let policy_text = self.retrieve_policy_text(&ctx.claim, &queries).await?;
                ctx.policy_text = Some(policy_text);
                State::GenerateRecommendation { ctx }
            }
            State::GenerateRecommendation { ctx } => {
                let recommendation = self.engine.recommend(&ctx.claim, ctx.policy_text()).await?;
                self.emit(Progress::Message(format!(
                    "recommendation: {}",
                    recommendation.recommendation_summary
                )));
                State::FinalizeDecision {
                    ctx,
                    recommendation,
                }
            }
            State::FinalizeDecision {
                ctx,
                recommendation,
            } => {
                let decision = ClaimDecision::from_recommendation(&ctx.claim, &recommendation);
                info!(
                    claim = %decision.claim_number,
                    covered = decision.covered,
                    deductible = decision.deductible,
                    payout = decision.recommended_payout,
                    "decision"
                );
                State::OutputResult(ClaimOutcome {
                    decision,
                    recommendation,
                    policy_text: ctx.policy_text.unwrap_or_default(),
                })
            }
            State::OutputResult(outcome) => State::OutputResult(outcome),
        };

        self.emit(Progress::StageFinished(stage));
        Ok(next)
    }

    /// Adjudicate the claim file at `path`.
    pub async fn run(&self, path: &Path) -> Result<ClaimOutcome, PipelineError> {
        self.run_with_cancel(path, &CancellationToken::new()).await
    }

    /// Like [`ClaimPipeline::run`], checking `cancel` before every transition.
    /// A model call already in flight is not interrupted.
    pub async fn run_with_cancel(
        &self,
        path: &Path,
        cancel: &CancellationToken,
    ) -> Result<ClaimOutcome, PipelineError> {
        let mut state = State::start(path);
        loop {
            if let State::OutputResult(outcome) = state {
                return Ok(outcome);
            }
            if cancel.is_cancelled() {
                warn!(path = %path.display(), stage = %state.stage(), "run cancelled");
                return Err(PipelineError::Cancelled(state.stage()));
            }
            state = self.advance(state).await?;
        }
    }

    /// Adjudicate several claims, at most `concurrency` at a time. Results
    /// come back in input order; one claim failing does not stop the others.
    pub async fn run_batch(
        &self,
        paths: &[PathBuf],
        concurrency: usize,
        cancel: &CancellationToken,
    ) -> Vec<(PathBuf, Result<ClaimOutcome, PipelineError>)> {
        info!(claims = paths.len(), concurrency, "starting batch");
        stream::iter(paths.iter().cloned())
            .map(|path| async move {
                let result = self.run_with_cancel(&path, cancel).await;
                if let Err(e) = &result {
                    warn!(path = %path.display(), error = %e, "claim failed");
                }
                (path, result)
            })
            .buffered(concurrency.max(1))
            .collect()
            .await
    }

    async fn retrieve_policy_text(
        &self,
        claim: &ClaimRecord,
        queries: &PolicyQueries,
    ) -> Result<String, PipelineError> {
        let mut passages = PassageSet::default();
        for query in &queries.queries {
            self.emit(Progress::Message(format!("query: {query}")));
            let hits = self
                .policy
                .retrieve(query, self.config.policy_top_k)
                .await?;
            debug!(query = %query, hits = hits.len(), "policy hits");
            passages.extend(hits.into_iter().map(|hit| hit.node));
        }

        let filter = MetadataFilter::exact(meta::POLICY_NUMBER, claim.policy_number.as_str());
        let declarations = self
            .declarations
            .retrieve_filtered(
                &filter,
                &format!("declarations page for {}", claim.policy_number),
                self.config.declarations_top_k,
            )
            .await?;
        match declarations.into_iter().next() {
            Some(hit) => {
                debug!(node = %hit.node.id, "declarations page found");
                passages.insert(hit.node);
            }
            None => {
                warn!(policy = %claim.policy_number, "no declarations page for policy");
                self.emit(Progress::Message(format!(
                    "no declarations page for policy {}",
                    claim.policy_number
                )));
            }
        }

        info!(claim = %claim.claim_number, passages = passages.len(), "retrieved policy text");
        Ok(passages.joined())
    }
}
