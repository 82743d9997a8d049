//! The LLM collaborator contract. The core treats both the primary and
//! local/fallback clients as a single async method; everything above this
//! trait — extraction, consolidation, compaction, rerank — speaks only this
//! language: `chat_completion(messages, options) -> outcome | None`, where
//! `None` means "failed, propagate as an empty result."

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self { role: ChatRole::System, content: content.into() }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self { role: ChatRole::User, content: content.into() }
    }
}

/// Which pipeline stage is issuing this call. Drives per-operation timeout
/// and retry budgets independent of the caller's own bookkeeping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LlmOperation {
    Extraction,
    Consolidation,
    ProfileCompaction,
    IdentityCompaction,
    Rerank,
    Summarization,
}

#[derive(Debug, Clone)]
pub struct ChatOptions {
    pub temperature: f32,
    pub max_tokens: u32,
    pub timeout_ms: u64,
    pub operation: LlmOperation,
}

impl ChatOptions {
    pub fn new(operation: LlmOperation, timeout_ms: u64) -> Self {
        Self { temperature: 0.2, max_tokens: 2048, timeout_ms, operation }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
}

#[derive(Debug, Clone)]
pub struct ChatOutcome {
    pub content: String,
    pub usage: Option<Usage>,
}

/// The single seam the core depends on. `None` means "failed, propagate as
/// empty result" — never an error the caller must unwrap; transient
/// failures, cooldown trips, and timeouts all collapse to this.
#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn chat_completion(&self, messages: &[ChatMessage], options: &ChatOptions) -> Option<ChatOutcome>;
}

/// An [`LlmClient`] that never responds. Useful as a default when no
/// provider is configured, and in tests that exercise failure-path
/// semantics (empty extraction result, rerank falls open, etc.).
pub struct NullLlmClient;

#[async_trait]
impl LlmClient for NullLlmClient {
    async fn chat_completion(&self, _messages: &[ChatMessage], _options: &ChatOptions) -> Option<ChatOutcome> {
        None
    }
}
