//! Language model access.
//!
//! [`LanguageModel`] is the narrow capability the pipeline depends on: one
//! prompt in, one completion out. [`ChatCompletionsClient`] speaks the
//! OpenAI-compatible chat completions API (Together AI by default);
//! [`ScriptedModel`] replays canned responses.

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

#[derive(Error, Debug)]
pub enum LlmError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("server returned {status}: {body}")]
    Server { status: u16, body: String },
    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("model returned an empty completion")]
    EmptyResponse,
    #[error("no API key configured for {0}")]
    MissingApiKey(String),
    #[error("scripted model has no responses left")]
    ScriptExhausted,
}

/// A text-in, text-out language model.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    async fn complete(&self, prompt: &str) -> Result<String, LlmError>;

    fn model_name(&self) -> &str;
}

/// Client for an OpenAI-compatible `/chat/completions` endpoint.
pub struct ChatCompletionsClient {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: [ChatMessage<'a>; 1],
    temperature: f32,
    max_tokens: u32,
    response_format: ResponseFormat,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    kind: &'static str,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Deserialize)]
struct Usage {
    total_tokens: u64,
}

impl ChatCompletionsClient {
    pub const TOGETHER_BASE_URL: &'static str = "https://api.together.xyz/v1";

    /// Create a client for `base_url` (e.g. `https://api.together.xyz/v1`, no trailing slash needed).
    pub fn new(base_url: &str, api_key: &str, model: &str) -> Result<Self, LlmError> {
        if api_key.trim().is_empty() {
            return Err(LlmError::MissingApiKey(base_url.to_string()));
        }
        Ok(Self {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            model: model.to_string(),
            temperature: 0.0,
            max_tokens: 1024,
        })
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    fn request<'a>(&'a self, prompt: &'a str) -> ChatRequest<'a> {
        ChatRequest {
            model: &self.model,
            messages: [ChatMessage {
                role: "user",
                content: prompt,
            }],
            temperature: self.temperature,
            max_tokens: self.max_tokens,
            response_format: ResponseFormat {
                kind: "json_object",
            },
        }
    }
}

#[async_trait]
impl LanguageModel for ChatCompletionsClient {
    async fn complete(&self, prompt: &str) -> Result<String, LlmError> {
        let url = format!("{}/chat/completions", self.base_url);

        debug!(url = %url, model = %self.model, chars = prompt.len(), "sending completion request");
        let resp = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&self.request(prompt))
            .send()
            .await?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(LlmError::Server {
                status: status.as_u16(),
                body,
            });
        }

        let body: ChatResponse = resp.json().await?;
        if let Some(usage) = &body.usage {
            info!(model = %self.model, tokens = usage.total_tokens, "completion received");
        }
        first_content(body)
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

fn first_content(body: ChatResponse) -> Result<String, LlmError> {
    body.choices
        .into_iter()
        .next()
        .and_then(|c| c.message.content)
        .filter(|text| !text.trim().is_empty())
        .ok_or(LlmError::EmptyResponse)
}

/// Deterministic stand-in that returns queued responses in order and
/// records every prompt it was given.
pub struct ScriptedModel {
    responses: Mutex<VecDeque<String>>,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedModel {
    pub fn new<I, S>(responses: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            responses: Mutex::new(responses.into_iter().map(Into::into).collect()),
            prompts: Mutex::new(Vec::new()),
        }
    }

    /// Prompts received so far, oldest first.
    pub fn prompts(&self) -> Vec<String> {
        self.prompts
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

#[async_trait]
impl LanguageModel for ScriptedModel {
    async fn complete(&self, prompt: &str) -> Result<String, LlmError> {
        self.prompts
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(prompt.to_string());
        self.responses
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .pop_front()
            .ok_or(LlmError::ScriptExhausted)
    }

    fn model_name(&self) -> &str {
        "scripted"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client() -> ChatCompletionsClient {
        ChatCompletionsClient::new(
            "https://api.together.xyz/v1/",
            "test-key",
            "meta-llama/Llama-3.3-70B-Instruct-Turbo-Free",
        )
        .unwrap()
    }

    #[test]
    fn client_trims_trailing_slash() {
        assert_eq!(client().base_url, "https://api.together.xyz/v1");
    }

    #[test]
    fn blank_api_key_rejected() {
        let err = ChatCompletionsClient::new(ChatCompletionsClient::TOGETHER_BASE_URL, " ", "m")
            .err()
            .unwrap();
        assert!(matches!(err, LlmError::MissingApiKey(_)));
    }

    #[test]
    fn request_body_shape() {
        let c = client().with_max_tokens(256);
        let json = serde_json::to_value(c.request("hello")).unwrap();
        assert_eq!(json["model"], "meta-llama/Llama-3.3-70B-Instruct-Turbo-Free");
        assert_eq!(json["messages"][0]["role"], "user");
        assert_eq!(json["messages"][0]["content"], "hello");
        assert_eq!(json["max_tokens"], 256);
        assert_eq!(json["temperature"], 0.0);
        assert_eq!(json["response_format"]["type"], "json_object");
    }

    #[test]
    fn temperature_carried_into_request() {
        let c = client().with_temperature(0.5);
        let json = serde_json::to_value(c.request("hello")).unwrap();
        assert_eq!(json["temperature"], 0.5);
    }

    #[test]
    fn response_first_choice_content() {
        let body: ChatResponse = serde_json::from_str(
            r#"{
                "choices": [{"message": {"role": "assistant", "content": "{\"queries\": []}"}}],
                "usage": {"prompt_tokens": 10, "completion_tokens": 5, "total_tokens": 15}
            }"#,
        )
        .unwrap();
        assert_eq!(first_content(body).unwrap(), r#"{"queries": []}"#);
    }

    #[test]
    fn response_without_content_is_empty() {
        let body: ChatResponse =
            serde_json::from_str(r#"{"choices": [{"message": {"content": null}}]}"#).unwrap();
        assert!(matches!(first_content(body), Err(LlmError::EmptyResponse)));

        let body: ChatResponse = serde_json::from_str(r#"{"choices": []}"#).unwrap();
        assert!(matches!(first_content(body), Err(LlmError::EmptyResponse)));
    }

    #[tokio::test]
    async fn scripted_model_replays_in_order() {
        let model = ScriptedModel::new(["first", "second"]);
        assert_eq!(model.complete("p1").await.unwrap(), "first");
        assert_eq!(model.complete("p2").await.unwrap(), "second");
        assert!(matches!(
            model.complete("p3").await,
            Err(LlmError::ScriptExhausted)
        ));
        assert_eq!(model.prompts(), vec!["p1", "p2", "p3"]);
    }
}
