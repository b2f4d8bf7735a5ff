use serde::{Deserialize, Serialize};

use crate::images::ImagePayload;

/// Chat-completions request carrying the prompt plus N inline images
#[derive(Debug, Clone, Serialize)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_completion_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reasoning_effort: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_format: Option<ResponseFormat>,
}

/// A single chat message with multimodal content parts
#[derive(Debug, Clone, Serialize)]
pub struct ChatMessage {
    pub role: MessageRole,
    pub content: Vec<ContentPart>,
}

/// Message role
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    System,
    User,
    Assistant,
}

/// One part of a multimodal message: prompt text or an inline image
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    Text { text: String },
    ImageUrl { image_url: ImageUrl },
}

/// Inline base64 image reference
#[derive(Debug, Clone, Serialize)]
pub struct ImageUrl {
    pub url: String,
    pub detail: String,
}

/// Response-format hint; JSON-object mode where the provider supports it
#[derive(Debug, Clone, Serialize)]
pub struct ResponseFormat {
    #[serde(rename = "type")]
    pub format_type: String,
}

/// Chat-completions response
#[derive(Debug, Clone, Deserialize)]
pub struct ChatResponse {
    pub choices: Vec<Choice>,
    pub model: Option<String>,
    pub usage: Option<Usage>,
}

/// One completion choice
#[derive(Debug, Clone, Deserialize)]
pub struct Choice {
    pub message: AssistantMessage,
}

/// The assistant reply body
#[derive(Debug, Clone, Deserialize)]
pub struct AssistantMessage {
    pub content: Option<String>,
}

/// Token usage information
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Usage {
    pub prompt_tokens: Option<u32>,
    pub completion_tokens: Option<u32>,
    pub total_tokens: Option<u32>,
}

/// The invoker's output: raw reply text plus accounting
#[derive(Debug, Clone)]
pub struct VisionReply {
    pub raw_text: String,
    pub model: String,
    pub usage: Usage,
    pub cost_usd: f64,
    pub time_ms: u64,
}

/// Model-specific invocation profile: token ceiling, reasoning-effort knob,
/// JSON-mode support, and per-million-token USD pricing.
#[derive(Debug, Clone)]
pub struct ModelProfile {
    pub max_completion_tokens: u32,
    pub reasoning_effort: Option<&'static str>,
    pub json_response_format: bool,
    pub input_price_per_mtok: f64,
    pub output_price_per_mtok: f64,
}

impl ModelProfile {
    /// Look up the profile for a model name.
    ///
    /// Unknown models fall back to the gpt-4o profile so cost accounting
    /// stays deterministic for any configured name.
    pub fn for_model(model: &str) -> Self {
        match model {
            m if m.starts_with("gpt-5") || m.starts_with("o3") || m.starts_with("o4") => Self {
                max_completion_tokens: 16_384,
                reasoning_effort: Some("medium"),
                json_response_format: true,
                input_price_per_mtok: 2.00,
                output_price_per_mtok: 8.00,
            },
            m if m.starts_with("gpt-4o-mini") => Self {
                max_completion_tokens: 8_192,
                reasoning_effort: None,
                json_response_format: true,
                input_price_per_mtok: 0.15,
                output_price_per_mtok: 0.60,
            },
            _ => Self {
                max_completion_tokens: 8_192,
                reasoning_effort: None,
                json_response_format: true,
                input_price_per_mtok: 2.50,
                output_price_per_mtok: 10.00,
            },
        }
    }

    /// Deterministic USD cost for a usage report under this profile.
    pub fn cost_usd(&self, usage: &Usage) -> f64 {
        let prompt = usage.prompt_tokens.unwrap_or(0) as f64;
        let completion = usage.completion_tokens.unwrap_or(0) as f64;
        (prompt * self.input_price_per_mtok + completion * self.output_price_per_mtok) / 1_000_000.0
    }
}

impl ChatRequest {
    /// Assemble the single batched analysis request: one user message whose
    /// content is the prompt text followed by every image payload in order.
    pub fn analysis(model: &str, prompt: &str, payloads: &[ImagePayload]) -> Self {
        let profile = ModelProfile::for_model(model);

        let mut content = Vec::with_capacity(payloads.len() + 1);
        content.push(ContentPart::Text {
            text: prompt.to_string(),
        });
        for payload in payloads {
            content.push(ContentPart::ImageUrl {
                image_url: ImageUrl {
                    url: format!("data:image/jpeg;base64,{}", payload.encoded),
                    detail: "high".to_string(),
                },
            });
        }

        Self {
            model: model.to_string(),
            messages: vec![ChatMessage {
                role: MessageRole::User,
                content,
            }],
            max_completion_tokens: Some(profile.max_completion_tokens),
            reasoning_effort: profile.reasoning_effort.map(str::to_string),
            response_format: profile.json_response_format.then(|| ResponseFormat {
                format_type: "json_object".to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payload(id: i64) -> ImagePayload {
        ImagePayload {
            image_id: id,
            filename: format!("img{id}.jpg"),
            encoded: "AAAA".to_string(),
            order: id as u32,
        }
    }

    #[test]
    fn test_analysis_request_part_count() {
        let request = ChatRequest::analysis("gpt-4o", "analyze", &[payload(1), payload(2)]);
        assert_eq!(request.messages.len(), 1);
        assert_eq!(request.messages[0].content.len(), 3);
        assert!(matches!(
            request.messages[0].content[0],
            ContentPart::Text { .. }
        ));
    }

    #[test]
    fn test_cost_is_deterministic() {
        let profile = ModelProfile::for_model("gpt-4o");
        let usage = Usage {
            prompt_tokens: Some(10_000),
            completion_tokens: Some(2_000),
            total_tokens: Some(12_000),
        };
        let a = profile.cost_usd(&usage);
        let b = profile.cost_usd(&usage);
        assert_eq!(a, b);
        assert!((a - (10_000.0 * 2.50 + 2_000.0 * 10.00) / 1_000_000.0).abs() < 1e-12);
    }

    #[test]
    fn test_unknown_model_uses_default_pricing() {
        let unknown = ModelProfile::for_model("some-future-model");
        let default = ModelProfile::for_model("gpt-4o");
        assert_eq!(unknown.input_price_per_mtok, default.input_price_per_mtok);
    }

    #[test]
    fn test_reasoning_model_profile() {
        let profile = ModelProfile::for_model("gpt-5-mini");
        assert_eq!(profile.reasoning_effort, Some("medium"));
        assert_eq!(profile.max_completion_tokens, 16_384);
    }
}
