//! Google Generative Language API backend.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use super::{BackendError, TextBackend};
use crate::config::InsightConfig;

const API_KEY_HEADER: &str = "x-goog-api-key";

/// Calls `models/{model}:generateContent`, passing the key per request in a
/// header.
#[derive(Debug, Clone)]
pub struct GeminiBackend {
    client: Client,
    base_url: String,
    model: String,
}

#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    contents: Vec<RequestContent<'a>>,
}

#[derive(Debug, Serialize)]
struct RequestContent<'a> {
    parts: Vec<RequestPart<'a>>,
}

#[derive(Debug, Serialize)]
struct RequestPart<'a> {
    text: &'a str,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<ResponseContent>,
}

#[derive(Debug, Deserialize)]
struct ResponseContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Debug, Deserialize)]
struct ResponsePart {
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorResponse {
    error: ErrorDetails,
}

#[derive(Debug, Deserialize)]
struct ErrorDetails {
    #[serde(default)]
    message: String,
    #[serde(default)]
    status: String,
}

impl GeminiBackend {
    pub fn new(config: &InsightConfig) -> Result<Self, reqwest::Error> {
        let client = Client::builder().timeout(config.timeout).build()?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
        })
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/v1beta/models/{}:generateContent",
            self.base_url, self.model
        )
    }
}

#[async_trait]
impl TextBackend for GeminiBackend {
    async fn generate(&self, api_key: &str, prompt: &str) -> Result<String, BackendError> {
        let body = GenerateRequest {
            contents: vec![RequestContent {
                parts: vec![RequestPart { text: prompt }],
            }],
        };

        let response = self
            .client
            .post(self.endpoint())
            .header(API_KEY_HEADER, api_key)
            .json(&body)
            .send()
            .await
            .map_err(transport_error)?;

        let status = response.status();
        let raw = response
            .text()
            .await
            .map_err(|e| BackendError::new(Some(status.as_u16()), e.without_url().to_string()))?;

        if !status.is_success() {
            return Err(BackendError::new(
                Some(status.as_u16()),
                error_message(&raw, status.as_u16()),
            ));
        }

        extract_text(&raw).map_err(|message| BackendError::new(Some(status.as_u16()), message))
    }
}

/// Errors raised before a response arrives. The URL is dropped so nothing
/// request-specific reaches logs or quota detection.
fn transport_error(err: reqwest::Error) -> BackendError {
    let status = err.status().map(|s| s.as_u16());
    BackendError::new(status, err.without_url().to_string())
}

fn error_message(raw: &str, status: u16) -> String {
    match serde_json::from_str::<ErrorResponse>(raw) {
        Ok(parsed) if !parsed.error.status.is_empty() => {
            format!("{}: {}", parsed.error.status, parsed.error.message)
        }
        Ok(parsed) => parsed.error.message,
        Err(_) => format!("HTTP {}", status),
    }
}

/// Joins the text parts of the first candidate.
fn extract_text(raw: &str) -> Result<String, String> {
    let parsed: GenerateResponse =
        serde_json::from_str(raw).map_err(|e| format!("Unexpected response body: {}", e))?;

    let text: String = parsed
        .candidates
        .into_iter()
        .next()
        .and_then(|c| c.content)
        .map(|c| c.parts.into_iter().filter_map(|p| p.text).collect())
        .unwrap_or_default();

    if text.trim().is_empty() {
        return Err("Response contained no text".to_string());
    }
    Ok(text)
}
