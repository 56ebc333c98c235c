//! Structured prediction: prompt in, schema-checked value out.
//!
//! A [`PromptTemplate`] is rendered with named inputs, the target type's JSON
//! shape is appended, and the model's reply is parsed and validated as that
//! type. Replies that do not fit can be re-prompted a bounded number of times.

use std::sync::Arc;

use claimwise_core::{ClaimRecord, PolicyQueries, PolicyRecommendation};
use serde::de::DeserializeOwned;
use thiserror::Error;
use tracing::{info, warn};

use crate::llm::{LanguageModel, LlmError};
use crate::prompts;

/// Characters of a rejected response kept in the error.
const RAW_EXCERPT_CHARS: usize = 200;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("prompt variable `{variable}` has no input")]
    Template { variable: String },
    #[error("encoding prompt input: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("language model: {0}")]
    Llm(#[from] LlmError),
    #[error("response does not match {schema}: {reason} (raw: {raw})")]
    Schema {
        schema: &'static str,
        reason: String,
        raw: String,
    },
}

/// A value the model can be asked to produce.
pub trait StructuredOutput: DeserializeOwned + Send {
    /// Short name used in logs and errors.
    const SCHEMA_NAME: &'static str;
    /// JSON shape shown to the model.
    const SHAPE: &'static str;

    /// Constraints beyond what deserialization checks.
    fn validate(&self) -> Result<(), String> {
        Ok(())
    }
}

impl StructuredOutput for PolicyQueries {
    const SCHEMA_NAME: &'static str = "PolicyQueries";
    const SHAPE: &'static str = r#"{"queries": ["<search query>", "..."]}"#;

    fn validate(&self) -> Result<(), String> {
        if self.queries.is_empty() {
            return Err("`queries` must contain at least one query".into());
        }
        if self.queries.iter().any(|q| q.trim().is_empty()) {
            return Err("`queries` must not contain blank entries".into());
        }
        Ok(())
    }
}

impl StructuredOutput for PolicyRecommendation {
    const SCHEMA_NAME: &'static str = "PolicyRecommendation";
    const SHAPE: &'static str = r#"{
  "policy_section": "<section title>" or null,
  "recommendation_summary": "<one or two sentences>",
  "deductible": <number> or null,
  "settlement_amount": <number> or null
}"#;

    fn validate(&self) -> Result<(), String> {
        if self.recommendation_summary.trim().is_empty() {
            return Err("`recommendation_summary` must not be blank".into());
        }
        for (field, value) in [
            ("deductible", self.deductible),
            ("settlement_amount", self.settlement_amount),
        ] {
            if let Some(v) = value
                && (!v.is_finite() || v < 0.0)
            {
                return Err(format!("`{field}` must be a non-negative number, got {v}"));
            }
        }
        Ok(())
    }
}

/// Text with `{name}` placeholders. `{{` and `}}` are literal braces.
#[derive(Debug, Clone)]
pub struct PromptTemplate {
    text: String,
}

impl PromptTemplate {
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into() }
    }

    /// Placeholder names in order of first appearance.
    pub fn variables(&self) -> Vec<&str> {
        let mut names = Vec::new();
        let mut rest = self.text.as_str();
        while let Some(pos) = rest.find(['{', '}']) {
            let tail = &rest[pos..];
            if tail.starts_with("{{") || tail.starts_with("}}") {
                rest = &tail[2..];
            } else if let Some(name) = placeholder(tail) {
                if !names.contains(&name) {
                    names.push(name);
                }
                rest = &tail[name.len() + 2..];
            } else {
                rest = &tail[1..];
            }
        }
        names
    }

    /// Substitute every placeholder; a placeholder without an input is an error.
    pub fn render(&self, inputs: &[(&str, &str)]) -> Result<String, EngineError> {
        let mut out = String::with_capacity(self.text.len());
        let mut rest = self.text.as_str();
        while let Some(pos) = rest.find(['{', '}']) {
            out.push_str(&rest[..pos]);
            let tail = &rest[pos..];
            if tail.starts_with("{{") {
                out.push('{');
                rest = &tail[2..];
            } else if tail.starts_with("}}") {
                out.push('}');
                rest = &tail[2..];
            } else if let Some(name) = placeholder(tail) {
                let value = inputs
                    .iter()
                    .find(|(key, _)| *key == name)
                    .map(|(_, value)| *value)
                    .ok_or_else(|| EngineError::Template {
                        variable: name.to_string(),
                    })?;
                out.push_str(value);
                rest = &tail[name.len() + 2..];
            } else {
                out.push_str(&tail[..1]);
                rest = &tail[1..];
            }
        }
        out.push_str(rest);
        Ok(out)
    }
}

/// `{identifier}` at the start of `s`, returning the identifier.
fn placeholder(s: &str) -> Option<&str> {
    let inner = s.strip_prefix('{')?;
    let end = inner.find('}')?;
    let name = &inner[..end];
    let mut chars = name.chars();
    let first = chars.next()?;
    ((first.is_ascii_alphabetic() || first == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_'))
    .then_some(name)
}

/// Slice from the first `{` to the last `}`, which strips code fences and chatter.
pub fn extract_json(raw: &str) -> Option<&str> {
    let start = raw.find('{')?;
    let end = raw.rfind('}')?;
    (end > start).then(|| &raw[start..=end])
}

/// Parse and validate a model response as `T`.
pub fn parse_structured<T: StructuredOutput>(raw: &str) -> Result<T, String> {
    let json = extract_json(raw).ok_or_else(|| "no JSON object in response".to_string())?;
    let value: T = serde_json::from_str(json).map_err(|e| e.to_string())?;
    value.validate()?;
    Ok(value)
}

fn schema_instruction<T: StructuredOutput>() -> String {
    format!(
        "Respond ONLY with a JSON object of this shape. No markdown fences, no explanation:\n{}",
        T::SHAPE
    )
}

#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Extra attempts after a response fails schema validation. Zero disables re-prompting.
    pub schema_retries: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self { schema_retries: 1 }
    }
}

/// Wraps a [`LanguageModel`] behind the structured-prediction contract.
#[derive(Clone)]
pub struct RecommendationEngine {
    model: Arc<dyn LanguageModel>,
    config: EngineConfig,
}

impl RecommendationEngine {
    pub fn new(model: Arc<dyn LanguageModel>, config: EngineConfig) -> Self {
        Self { model, config }
    }

    pub fn model_name(&self) -> &str {
        self.model.model_name()
    }

    /// Render `template` with `inputs`, ask the model, and return its reply as a validated `T`.
    pub async fn structured_predict<T: StructuredOutput>(
        &self,
        template: &PromptTemplate,
        inputs: &[(&str, &str)],
    ) -> Result<T, EngineError> {
        let prompt = format!(
            "{}\n\n{}",
            template.render(inputs)?,
            schema_instruction::<T>()
        );

        let mut attempt = 0;
        let mut current = prompt.clone();
        loop {
            let raw = self.model.complete(&current).await?;
            match parse_structured::<T>(&raw) {
                Ok(value) => return Ok(value),
                Err(reason) if attempt < self.config.schema_retries => {
                    attempt += 1;
                    warn!(
                        schema = T::SCHEMA_NAME,
                        attempt,
                        %reason,
                        "response rejected, re-prompting"
                    );
                    current = format!(
                        "{prompt}\n\nYour previous response was rejected: {reason}\n\
                         Reply again with only the JSON object."
                    );
                }
                Err(reason) => {
                    return Err(EngineError::Schema {
                        schema: T::SCHEMA_NAME,
                        reason,
                        raw: raw.chars().take(RAW_EXCERPT_CHARS).collect(),
                    });
                }
            }
        }
    }

    /// Query generation: claim → retrieval queries.
    pub async fn generate_queries(
        &self,
        claim: &ClaimRecord,
    ) -> Result<PolicyQueries, EngineError> {
        let claim_info = claim.to_json()?;
        let queries: PolicyQueries = self
            .structured_predict(&prompts::policy_queries(), &[("claim_info", claim_info.as_str())])
            .await?;
        info!(
            claim = %claim.claim_number,
            count = queries.queries.len(),
            "generated policy queries"
        );
        Ok(queries)
    }

    /// Recommendation generation: claim + retrieved policy text → recommendation.
    pub async fn recommend(
        &self,
        claim: &ClaimRecord,
        policy_text: &str,
    ) -> Result<PolicyRecommendation, EngineError> {
        let claim_info = claim.to_json()?;
        self.structured_predict(
            &prompts::policy_recommendation(),
            &[("claim_info", claim_info.as_str()), ("policy_text", policy_text)],
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ScriptedModel;
    use chrono::NaiveDate;

    fn claim() -> ClaimRecord {
        ClaimRecord {
            claim_number: "CLAIM-0001".into(),
            policy_number: "CAIP400".into(),
            claimant_name: "John Smith".into(),
            incident_description: "rear-end collision".into(),
            incident_date: NaiveDate::from_ymd_opt(2024, 4, 10).unwrap(),
            requested_amount: 1500.0,
            vehicle_details: None,
        }
    }

    fn engine(model: &Arc<ScriptedModel>, schema_retries: u32) -> RecommendationEngine {
        RecommendationEngine::new(model.clone(), EngineConfig { schema_retries })
    }

    #[test]
    fn render_substitutes_named_inputs() {
        let t = PromptTemplate::new("Claim {claim}: see {policy} and {claim} again");
        let out = t.render(&[("claim", "C-1"), ("policy", "P-9")]).unwrap();
        assert_eq!(out, "Claim C-1: see P-9 and C-1 again");
    }

    #[test]
    fn render_missing_input_errors() {
        let t = PromptTemplate::new("Claim {claim_info} / {policy_text}");
        let err = t.render(&[("claim_info", "{}")]).unwrap_err();
        assert!(matches!(err, EngineError::Template { ref variable } if variable == "policy_text"));
    }

    #[test]
    fn render_keeps_literal_braces() {
        let t = PromptTemplate::new(r#"{{"a": 1}} then {x} and { not a var }"#);
        assert_eq!(
            t.render(&[("x", "X")]).unwrap(),
            r#"{"a": 1} then X and { not a var }"#
        );
    }

    #[test]
    fn render_does_not_expand_inserted_values() {
        let t = PromptTemplate::new("{a}");
        assert_eq!(t.render(&[("a", "{b}")]).unwrap(), "{b}");
    }

    #[test]
    fn variables_in_first_appearance_order() {
        let t = PromptTemplate::new("{b} {a} {b} {{c}}");
        assert_eq!(t.variables(), vec!["b", "a"]);
    }

    #[test]
    fn extract_json_strips_fences() {
        let raw = "```json\n{\"queries\": [\"collision coverage\"]}\n```";
        assert_eq!(
            extract_json(raw),
            Some("{\"queries\": [\"collision coverage\"]}")
        );
        assert_eq!(extract_json("no json here"), None);
    }

    #[test]
    fn parse_rejects_empty_queries() {
        let err = parse_structured::<PolicyQueries>(r#"{"queries": []}"#).unwrap_err();
        assert!(err.contains("at least one"));
    }

    #[test]
    fn parse_rejects_negative_settlement() {
        let err = parse_structured::<PolicyRecommendation>(
            r#"{"recommendation_summary": "Covered", "settlement_amount": -5}"#,
        )
        .unwrap_err();
        assert!(err.contains("settlement_amount"));
    }

    #[tokio::test]
    async fn generate_queries_sends_claim_json() {
        let model = Arc::new(ScriptedModel::new([
            r#"Here you go: {"queries": ["collision coverage", "collision deductible"]}"#,
        ]));
        let queries = engine(&model, 0).generate_queries(&claim()).await.unwrap();
        assert_eq!(queries.queries, vec!["collision coverage", "collision deductible"]);

        let prompts = model.prompts();
        assert_eq!(prompts.len(), 1);
        assert!(prompts[0].contains(r#""policy_number":"CAIP400""#));
        assert!(prompts[0].contains(PolicyQueries::SHAPE));
    }

    #[tokio::test]
    async fn recommend_includes_policy_text() {
        let model = Arc::new(ScriptedModel::new([
            r#"{"policy_section": "Part D", "recommendation_summary": "Covered under collision.", "deductible": 250, "settlement_amount": 1250}"#,
        ]));
        let rec = engine(&model, 0)
            .recommend(&claim(), "Collision deductible: $250")
            .await
            .unwrap();
        assert_eq!(rec.deductible, Some(250.0));
        assert_eq!(rec.settlement_amount, Some(1250.0));
        assert!(model.prompts()[0].contains("Collision deductible: $250"));
    }

    #[tokio::test]
    async fn schema_failure_without_retry_is_fatal() {
        let model = Arc::new(ScriptedModel::new([
            "I think it is covered.",
            r#"{"queries": ["unused"]}"#,
        ]));
        let err = engine(&model, 0)
            .generate_queries(&claim())
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Schema { schema: "PolicyQueries", .. }));
        assert_eq!(model.prompts().len(), 1);
    }

    #[tokio::test]
    async fn schema_failure_reprompts_within_budget() {
        let model = Arc::new(ScriptedModel::new([
            r#"{"queries": "collision"}"#,
            r#"{"queries": ["collision coverage"]}"#,
        ]));
        let queries = engine(&model, 1).generate_queries(&claim()).await.unwrap();
        assert_eq!(queries.queries, vec!["collision coverage"]);

        let prompts = model.prompts();
        assert_eq!(prompts.len(), 2);
        assert!(prompts[1].contains("previous response was rejected"));
    }

    #[tokio::test]
    async fn transport_errors_are_not_retried() {
        let model = Arc::new(ScriptedModel::new(Vec::<String>::new()));
        let err = engine(&model, 3).generate_queries(&claim()).await.unwrap_err();
        assert!(matches!(err, EngineError::Llm(LlmError::ScriptExhausted)));
        assert_eq!(model.prompts().len(), 1);
    }
}
