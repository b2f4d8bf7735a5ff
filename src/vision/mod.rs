//! Vision model client and wire types.
//!
//! One batched chat-completions call per item: prompt text followed by every
//! image payload. Token budget, reasoning effort, JSON response mode, and
//! pricing come from a per-model profile.

mod client;
mod types;

pub use client::VisionClient;
pub use types::{
    ChatMessage, ChatRequest, ChatResponse, ContentPart, ImageUrl, MessageRole, ModelProfile,
    ResponseFormat, Usage, VisionReply,
};
