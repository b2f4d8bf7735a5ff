use reqwest::Client;
use std::time::{Duration, Instant};
use tracing::{debug, info};

use super::types::{ChatRequest, ChatResponse, ModelProfile, VisionReply};
use crate::config::{RequestConfig, VisionConfig};
use crate::error::{VisionError, VisionResult};
use crate::images::ImagePayload;

/// Client for the vision model's chat-completions endpoint.
///
/// One attempt per item, bounded by the configured timeout. Model calls are
/// never retried here; a retried call has nondeterministic cost, so retry
/// must stay an explicit caller decision (and the orchestrator never makes
/// one).
#[derive(Clone)]
pub struct VisionClient {
    client: Client,
    base_url: String,
    api_key: String,
    model: String,
    timeout_ms: u64,
}

impl VisionClient {
    /// Create a new vision client
    pub fn new(config: &VisionConfig, request_config: &RequestConfig) -> VisionResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_millis(request_config.model_timeout_ms))
            .build()
            .map_err(VisionError::Http)?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            model: config.model.clone(),
            timeout_ms: request_config.model_timeout_ms,
        })
    }

    /// Send the single batched analysis call: prompt text plus every image.
    pub async fn analyze(&self, prompt: &str, payloads: &[ImagePayload]) -> VisionResult<VisionReply> {
        let url = format!("{}/v1/chat/completions", self.base_url);
        let request = ChatRequest::analysis(&self.model, prompt, payloads);

        debug!(
            model = %self.model,
            images = payloads.len(),
            prompt_chars = prompt.len(),
            "Calling vision model"
        );

        let start = Instant::now();

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    VisionError::Timeout {
                        timeout_ms: self.timeout_ms,
                    }
                } else {
                    VisionError::Http(e)
                }
            })?;

        let status = response.status();

        if !status.is_success() {
            let error_body = response.text().await.unwrap_or_default();
            return Err(VisionError::Api {
                status: status.as_u16(),
                message: error_body,
            });
        }

        let chat: ChatResponse = response.json().await.map_err(VisionError::Http)?;
        let time_ms = start.elapsed().as_millis() as u64;

        let raw_text = chat
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .filter(|s| !s.trim().is_empty())
            .ok_or_else(|| VisionError::EmptyReply {
                model: self.model.clone(),
            })?;

        let model = chat.model.unwrap_or_else(|| self.model.clone());
        let usage = chat.usage.unwrap_or_default();
        let cost_usd = ModelProfile::for_model(&self.model).cost_usd(&usage);

        info!(
            model = %model,
            latency_ms = time_ms,
            prompt_tokens = usage.prompt_tokens.unwrap_or(0),
            completion_tokens = usage.completion_tokens.unwrap_or(0),
            cost_usd,
            "Vision model call succeeded"
        );

        Ok(VisionReply {
            raw_text,
            model,
            usage,
            cost_usd,
            time_ms,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_creation() {
        let config = VisionConfig {
            api_key: "test_key".to_string(),
            base_url: "https://api.openai.com".to_string(),
            model: "gpt-4o".to_string(),
        };

        let client = VisionClient::new(&config, &RequestConfig::default());
        assert!(client.is_ok());
    }
}
