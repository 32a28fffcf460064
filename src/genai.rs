//! Client for the hosted generative-language `generateContent` API, plus a
//! small session type that keeps a bounded history of exchanges.

use crate::config::{timeout, GenAiConfig};
use crate::error::{HubError, Result};
use crate::record::now_timestamp;
use crate::types::{BoundedLog, Conversation};
use log::{debug, info};
use serde::{Deserialize, Serialize};

pub const MAX_OUTPUT_TOKENS: u32 = 8192;

#[derive(Debug, Clone, PartialEq)]
pub struct GenerationSettings {
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
}

impl GenerationSettings {
    pub fn new(model: String, temperature: f32, max_tokens: u32) -> Result<Self> {
        if model.trim().is_empty() {
            return Err(HubError::validation("model name must not be empty"));
        }
        if !(0.0..=1.0).contains(&temperature) {
            return Err(HubError::validation(format!(
                "temperature must be between 0.0 and 1.0, got {}",
                temperature
            )));
        }
        if !(1..=MAX_OUTPUT_TOKENS).contains(&max_tokens) {
            return Err(HubError::validation(format!(
                "max tokens must be between 1 and {}, got {}",
                MAX_OUTPUT_TOKENS, max_tokens
            )));
        }
        Ok(Self {
            model,
            temperature,
            max_tokens,
        })
    }

    pub fn from_config(config: &GenAiConfig) -> Result<Self> {
        Self::new(config.model.clone(), config.temperature, config.max_tokens)
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest<'a> {
    contents: Vec<RequestContent<'a>>,
    generation_config: GenerationConfig,
}

#[derive(Debug, Serialize)]
struct RequestContent<'a> {
    parts: Vec<RequestPart<'a>>,
}

#[derive(Debug, Serialize)]
struct RequestPart<'a> {
    text: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    temperature: f32,
    max_output_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Debug, Deserialize)]
struct ResponsePart {
    text: Option<String>,
}

fn build_request<'a>(prompt: &'a str, settings: &GenerationSettings) -> GenerateRequest<'a> {
    GenerateRequest {
        contents: vec![RequestContent {
            parts: vec![RequestPart { text: prompt }],
        }],
        generation_config: GenerationConfig {
            temperature: settings.temperature,
            max_output_tokens: settings.max_tokens,
        },
    }
}

/// Text of the first candidate, or None when the model produced nothing.
fn extract_text(response: GenerateResponse) -> Option<String> {
    let text: String = response
        .candidates
        .into_iter()
        .next()?
        .content?
        .parts
        .into_iter()
        .filter_map(|p| p.text)
        .collect();
    (!text.trim().is_empty()).then_some(text)
}

#[derive(Debug, Clone)]
pub struct GenAiClient {
    http: reqwest::Client,
    endpoint: String,
    api_key: String,
}

impl GenAiClient {
    pub fn new(config: &GenAiConfig) -> Result<Self> {
        if config.api_key.is_empty() {
            return Err(HubError::ConfigError(format!(
                "API key not set (genai.api_key or {})",
                crate::config::API_KEY_ENV
            )));
        }
        let mut builder = reqwest::Client::builder();
        if let Some(t) = timeout(config.timeout_secs) {
            builder = builder.timeout(t);
        }
        Ok(Self {
            http: builder.build()?,
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
        })
    }

    fn url(&self, model: &str) -> String {
        format!("{}/models/{}:generateContent", self.endpoint, model)
    }

    pub async fn generate(&self, prompt: &str, settings: &GenerationSettings) -> Result<String> {
        if prompt.trim().is_empty() {
            return Err(HubError::validation("Please enter a prompt"));
        }

        let url = self.url(&settings.model);
        debug!("Sending {} prompt characters to {}", prompt.len(), url);

        let response = self
            .http
            .post(&url)
            .header("x-goog-api-key", &self.api_key)
            .json(&build_request(prompt, settings))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(HubError::Status {
                method: "POST".to_string(),
                url,
                status: status.as_u16(),
                body: response.text().await.unwrap_or_default(),
            });
        }

        // Take the first candidate's text
        let body: GenerateResponse = response.json().await?;
        extract_text(body).ok_or_else(|| HubError::GenerationError("No response generated".to_string()))
    }
}

/// A client plus settings and a bounded record of past exchanges.
pub struct ChatSession {
    client: GenAiClient,
    settings: GenerationSettings,
    history: BoundedLog<Conversation>,
}

impl ChatSession {
    pub fn new(client: GenAiClient, settings: GenerationSettings, history_size: usize) -> Self {
        Self {
            client,
            settings,
            history: BoundedLog::new(history_size),
        }
    }

    /// Continues a history saved by an earlier run.
    pub fn with_history(mut self, history: BoundedLog<Conversation>) -> Self {
        self.history = history;
        self
    }

    pub fn settings(&self) -> &GenerationSettings {
        &self.settings
    }

    pub fn history(&self) -> &BoundedLog<Conversation> {
        &self.history
    }

    /// Sends one prompt; only answered prompts are recorded.
    pub async fn ask(&mut self, label: &str, prompt: &str) -> Result<&Conversation> {
        let answer = self.client.generate(prompt, &self.settings).await?;
        info!("Model {} answered a {} prompt", self.settings.model, label);

        self.history.push(Conversation {
            timestamp: now_timestamp(),
            model: self.settings.model.clone(),
            label: label.to_string(),
            prompt: prompt.to_string(),
            response: answer,
            temperature: self.settings.temperature,
            max_tokens: self.settings.max_tokens,
        });
        self.history
            .latest()
            .ok_or_else(|| HubError::Internal("conversation history is empty after push".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn settings() -> GenerationSettings {
        GenerationSettings::new("gemini-pro".into(), 0.7, 1000).unwrap()
    }

    #[test]
    fn request_body_shape() {
        let body = serde_json::to_value(build_request("hello", &settings())).unwrap();
        assert_eq!(
            body,
            json!({
                "contents": [{"parts": [{"text": "hello"}]}],
                "generationConfig": {"temperature": 0.7f32, "maxOutputTokens": 1000}
            })
        );
    }

    #[test]
    fn joins_parts_of_first_candidate() {
        let resp: GenerateResponse = serde_json::from_value(json!({
            "candidates": [
                {"content": {"parts": [{"text": "Temp is "}, {"text": "stable."}], "role": "model"}},
                {"content": {"parts": [{"text": "ignored"}]}}
            ]
        }))
        .unwrap();
        assert_eq!(extract_text(resp).as_deref(), Some("Temp is stable."));
    }

    #[test]
    fn empty_answers_yield_none() {
        for body in [json!({}), json!({"candidates": [{"finishReason": "SAFETY"}]}), json!({"candidates": [{"content": {"parts": [{"text": "  "}]}}]})] {
            let resp: GenerateResponse = serde_json::from_value(body).unwrap();
            assert!(extract_text(resp).is_none());
        }
    }

    #[test]
    fn settings_are_range_checked() {
        assert!(GenerationSettings::new("m".into(), -0.1, 10).is_err());
        assert!(GenerationSettings::new("m".into(), 0.5, 0).is_err());
        assert!(GenerationSettings::new("m".into(), 0.5, MAX_OUTPUT_TOKENS + 1).is_err());
        assert!(GenerationSettings::new(" ".into(), 0.5, 10).is_err());
        assert!(GenerationSettings::new("m".into(), 1.0, MAX_OUTPUT_TOKENS).is_ok());
    }

    #[test]
    fn client_needs_api_key() {
        let err = GenAiClient::new(&GenAiConfig::default()).unwrap_err();
        assert!(matches!(err, HubError::ConfigError(_)));
    }

    #[test]
    fn url_includes_model() {
        let config = GenAiConfig {
            endpoint: "http://localhost:9/v1beta/".into(),
            api_key: "k".into(),
            ..GenAiConfig::default()
        };
        let client = GenAiClient::new(&config).unwrap();
        assert_eq!(client.url("gemini-pro"), "http://localhost:9/v1beta/models/gemini-pro:generateContent");
    }
}
