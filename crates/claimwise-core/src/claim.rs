//! Claim records and the claim file parser.
//!
//! A claim file is a single JSON object. Required fields are checked by serde
//! (missing or mistyped fields are rejected) and then by [`ClaimRecord::validate`]
//! for the constraints serde cannot express.

use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum ClaimError {
    #[error("cannot read claim file {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid claim {path:?}: {reason}")]
    Validation { path: PathBuf, reason: String },
}

/// A policyholder's claim, parsed from one claim file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClaimRecord {
    pub claim_number: String,
    pub policy_number: String,
    pub claimant_name: String,
    pub incident_description: String,
    /// ISO 8601 date (`YYYY-MM-DD`).
    pub incident_date: NaiveDate,
    pub requested_amount: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vehicle_details: Option<String>,
}

impl ClaimRecord {
    /// Parse and validate a claim from JSON text.
    ///
    /// The error string describes the first problem found.
    pub fn from_json(json: &str) -> Result<Self, String> {
        let record: ClaimRecord = serde_json::from_str(json).map_err(|e| e.to_string())?;
        record.validate()?;
        Ok(record)
    }

    /// Serialize to compact JSON, the form handed to the language model.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Check the constraints the JSON shape alone does not enforce.
    pub fn validate(&self) -> Result<(), String> {
        for (field, value) in [
            ("claim_number", &self.claim_number),
            ("policy_number", &self.policy_number),
            ("claimant_name", &self.claimant_name),
        ] {
            if value.trim().is_empty() {
                return Err(format!("field `{field}` must not be blank"));
            }
        }
        if !self.requested_amount.is_finite() || self.requested_amount < 0.0 {
            return Err(format!(
                "field `requested_amount` must be a non-negative number, got {}",
                self.requested_amount
            ));
        }
        Ok(())
    }
}

/// Read and validate a claim file. Never returns a partial record.
pub fn parse_claim(path: &Path) -> Result<ClaimRecord, ClaimError> {
    debug!(path = %path.display(), "parsing claim");
    let text = std::fs::read_to_string(path).map_err(|source| ClaimError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    ClaimRecord::from_json(&text).map_err(|reason| ClaimError::Validation {
        path: path.to_path_buf(),
        reason,
    })
}
