//! Gemini API client backing the reasoning engine
//!
//! Uses a long-lived reqwest::Client for connection pooling.

use crate::error::OrchestrationError;
use crate::router::{EnginePrompt, ReasoningEngine};
use crate::Result;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, error};

const DEFAULT_BASE_URL: &str =
    "https://generativelanguage.googleapis.com/v1beta/models/gemini-2.0-flash:generateContent";

/// Reusable Gemini client (connection-pooled)
pub struct GeminiClient {
    client: Client,
    api_key: String,
    base_url: String,
}

impl GeminiClient {
    pub fn new(api_key: String, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .pool_idle_timeout(Duration::from_secs(90))
            .pool_max_idle_per_host(8)
            .timeout(timeout)
            .build()?;

        Ok(Self {
            client,
            api_key,
            base_url: DEFAULT_BASE_URL.to_string(),
        })
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// One generateContent round trip; returns the first candidate's text
    pub async fn generate(&self, system: &str, text: &str) -> Result<String> {
        if self.api_key.is_empty() {
            return Err(OrchestrationError::ReasoningEngineUnavailable(
                "GEMINI_API_KEY not configured".to_string(),
            ));
        }

        let url = format!("{}?key={}", self.base_url, self.api_key);
        let request = GeminiRequest::new(system, text);

        debug!(chars = text.len(), "Calling Gemini API");

        let response = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                error!("Gemini API request failed: {}", e);
                OrchestrationError::ReasoningEngineUnavailable(format!("Gemini API error: {}", e))
            })?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            error!(%status, "Gemini API error response: {}", error_text);
            return Err(OrchestrationError::ReasoningEngineUnavailable(format!(
                "Gemini API returned {}: {}",
                status, error_text
            )));
        }

        let gemini_response: GeminiResponse = response.json().await.map_err(|e| {
            error!("Failed to parse Gemini response: {}", e);
            OrchestrationError::ReasoningEngineUnavailable(format!("Gemini parse error: {}", e))
        })?;

        gemini_response.first_text()
    }
}

/// [`ReasoningEngine`] over the Gemini REST API
pub struct GeminiEngine {
    client: GeminiClient,
}

impl GeminiEngine {
    pub fn new(api_key: String, timeout: Duration) -> Result<Self> {
        Ok(Self {
            client: GeminiClient::new(api_key, timeout)?,
        })
    }

    pub fn from_client(client: GeminiClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ReasoningEngine for GeminiEngine {
    async fn complete(&self, prompt: &EnginePrompt) -> Result<String> {
        self.client.generate(&prompt.system, &prompt.render()).await
    }
}

#[derive(Debug, Serialize)]
struct GeminiRequest {
    contents: Vec<Content>,
    generation_config: GenerationConfig,
    system_instruction: SystemInstruction,
}

impl GeminiRequest {
    fn new(system: &str, text: &str) -> Self {
        Self {
            contents: vec![Content {
                parts: vec![Part {
                    text: text.to_string(),
                }],
            }],
            // Low temperature: tool proposals must be parseable JSON
            generation_config: GenerationConfig {
                temperature: 0.1,
                top_p: 0.9,
                top_k: 40,
                max_output_tokens: 512,
            },
            system_instruction: SystemInstruction {
                parts: vec![Part {
                    text: system.to_string(),
                }],
            },
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct Content {
    parts: Vec<Part>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Part {
    text: String,
}

#[derive(Debug, Serialize)]
struct GenerationConfig {
    temperature: f32,
    top_p: f32,
    top_k: i32,
    max_output_tokens: i32,
}

#[derive(Debug, Serialize)]
struct SystemInstruction {
    parts: Vec<Part>,
}

#[derive(Debug, Deserialize)]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Content,
}

impl GeminiResponse {
    fn first_text(&self) -> Result<String> {
        self.candidates
            .first()
            .and_then(|c| c.content.parts.first())
            .map(|p| p.text.clone())
            .ok_or_else(|| {
                OrchestrationError::ReasoningEngineUnavailable(
                    "Empty response from Gemini".to_string(),
                )
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_serialization() {
        let json = serde_json::to_string(&GeminiRequest::new(
            "You are BizNavi",
            "What were total sales?",
        ))
        .unwrap();

        assert!(json.contains("What were total sales?"));
        assert!(json.contains("\"system_instruction\""));
        assert!(json.contains("\"max_output_tokens\":512"));
    }

    #[test]
    fn test_response_text_extraction() {
        let response: GeminiResponse = serde_json::from_str(
            r#"{"candidates": [{"content": {"parts": [{"text": "{\"tool\": \"rag\"}"}]}, "finishReason": "STOP"}]}"#,
        )
        .unwrap();
        assert_eq!(response.first_text().unwrap(), "{\"tool\": \"rag\"}");

        let empty: GeminiResponse = serde_json::from_str("{}").unwrap();
        assert!(matches!(
            empty.first_text(),
            Err(OrchestrationError::ReasoningEngineUnavailable(_))
        ));
    }

    #[tokio::test]
    async fn test_missing_key_is_unavailable() {
        let client = GeminiClient::new(String::new(), Duration::from_secs(1)).unwrap();
        let err = client.generate("system", "hello").await.unwrap_err();
        assert!(err.is_fatal());
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_is_unavailable() {
        let engine = GeminiEngine::from_client(
            GeminiClient::new("test-key".into(), Duration::from_millis(500))
                .unwrap()
                .with_base_url("http://127.0.0.1:9/generate"),
        );
        let prompt = EnginePrompt::new(vec![], &[], "hello");

        let err = engine.complete(&prompt).await.unwrap_err();
        assert!(matches!(err, OrchestrationError::ReasoningEngineUnavailable(_)));
    }
}
