//! HTTP client for the vision scoring service

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use gameqa_common::{config::ScoringConfig, Error, Result};
use reqwest::StatusCode;
use serde_json::{json, Value};
use tracing::debug;

use crate::evaluator::{ScoringError, ScoringRequest, ScoringService};

/// Posts scoring requests as JSON and returns the response text
pub struct HttpScoringService {
    client: reqwest::Client,
    endpoint: String,
    model: String,
    api_key: Option<String>,
}

impl HttpScoringService {
    /// Build from configuration; the API key is read from the configured
    /// environment variable when present
    pub fn from_config(config: &ScoringConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .build()
            .map_err(|e| Error::Internal(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self {
            client,
            endpoint: config.endpoint.clone(),
            model: config.model.clone(),
            api_key: std::env::var(&config.api_key_env).ok().filter(|k| !k.is_empty()),
        })
    }

    /// Whether an API key was found
    pub fn has_credentials(&self) -> bool {
        self.api_key.is_some()
    }

    fn body(&self, request: &ScoringRequest) -> Value {
        let images: Vec<Value> = request
            .images
            .iter()
            .map(|image| {
                json!({
                    "context": image.context,
                    "media_type": "image/png",
                    "data": STANDARD.encode(&image.data),
                })
            })
            .collect();
        json!({
            "model": self.model,
            "url": request.url,
            "game_type": request.game_type,
            "prompt": request.prompt,
            "logs": request.log_summary,
            "images": images,
        })
    }
}

#[async_trait]
impl ScoringService for HttpScoringService {
    async fn score(&self, request: &ScoringRequest) -> std::result::Result<String, ScoringError> {
        let mut call = self.client.post(&self.endpoint).json(&self.body(request));
        if let Some(key) = &self.api_key {
            call = call.bearer_auth(key);
        }

        let response = call.send().await.map_err(classify_transport)?;
        let status = response.status();
        let text = response.text().await.map_err(classify_transport)?;
        debug!(status = status.as_u16(), bytes = text.len(), "Scoring service responded");

        if let Some(err) = classify_status(status, &text) {
            return Err(err);
        }
        Ok(extract_content(&text))
    }
}

fn classify_transport(e: reqwest::Error) -> ScoringError {
    if e.is_decode() {
        ScoringError::Schema(e.to_string())
    } else {
        ScoringError::Transient(e.to_string())
    }
}

/// Map an HTTP status to a scoring error; `None` for success
fn classify_status(status: StatusCode, body: &str) -> Option<ScoringError> {
    if status.is_success() {
        return None;
    }
    let detail = format!("HTTP {}: {}", status.as_u16(), body.chars().take(200).collect::<String>());
    if status == StatusCode::REQUEST_TIMEOUT
        || status == StatusCode::TOO_MANY_REQUESTS
        || status.is_server_error()
    {
        Some(ScoringError::Transient(detail))
    } else {
        Some(ScoringError::Rejected(detail))
    }
}

/// Pull the model output out of common response envelopes, falling back to
/// the raw body
fn extract_content(body: &str) -> String {
    let Ok(value) = serde_json::from_str::<Value>(body) else {
        return body.to_string();
    };
    for key in ["content", "output", "text", "result"] {
        match value.get(key) {
            Some(Value::String(s)) => return s.clone(),
            Some(v @ Value::Object(_)) => return v.to_string(),
            _ => {}
        }
    }
    body.to_string()
}
