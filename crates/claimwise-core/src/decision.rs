//! Model outputs and the final claim decision.

use serde::{Deserialize, Serialize};

use crate::ClaimRecord;

/// Retrieval queries generated from a claim, in the order the model produced them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicyQueries {
    pub queries: Vec<String>,
}

/// Coverage recommendation produced by the language model for one claim.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicyRecommendation {
    /// Policy section the recommendation relies on, e.g. "Part D - Collision".
    #[serde(default)]
    pub policy_section: Option<String>,
    pub recommendation_summary: String,
    #[serde(default)]
    pub deductible: Option<f64>,
    #[serde(default)]
    pub settlement_amount: Option<f64>,
}

/// Terminal artifact of an adjudication run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClaimDecision {
    pub claim_number: String,
    pub covered: bool,
    pub deductible: f64,
    pub recommended_payout: f64,
    pub notes: String,
}

/// A loss counts as covered when the summary says "covered" (any case) or
/// the model proposes a positive settlement.
///
/// Substring match: a summary reading "not covered" is also counted.
pub fn is_covered(rec: &PolicyRecommendation) -> bool {
    rec.recommendation_summary
        .to_lowercase()
        .contains("covered")
        || rec.settlement_amount.is_some_and(|amount| amount > 0.0)
}

impl ClaimDecision {
    /// Reduce a recommendation to a decision. Absent amounts become zero.
    pub fn from_recommendation(claim: &ClaimRecord, rec: &PolicyRecommendation) -> Self {
        Self {
            claim_number: claim.claim_number.clone(),
            covered: is_covered(rec),
            deductible: rec.deductible.unwrap_or(0.0),
            recommended_payout: rec.settlement_amount.unwrap_or(0.0),
            notes: rec.recommendation_summary.clone(),
        }
    }
}
