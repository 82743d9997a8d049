//! Fallback-chain [`LlmClient`] implementation: tries each
//! `"<provider>/<model>"` entry of [`engram_config::LlmConfig::fallback_chain`]
//! in order, skipping any provider presently in cooldown, retrying transient
//! (5xx/timeout) failures up to `max_retries`, and tripping a cooldown after
//! `cooldown_trip_after` consecutive non-transient (4xx) failures.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde_json::json;

use engram_config::parse_provider_model;
use engram_memory::llm_client::{ChatMessage, ChatOptions, ChatOutcome, ChatRole, LlmClient, Usage};

/// Whether a provider attempt failed in a way that should simply move on to
/// the next chain entry (4xx, unrecognized provider) or one worth retrying
/// in place (5xx, network/timeout).
enum Attempt {
    Success(ChatOutcome),
    Transient,
    Rejected,
}

struct ProviderState {
    consecutive_failures: u32,
    cooldown_until: Option<Instant>,
}

impl Default for ProviderState {
    fn default() -> Self {
        Self { consecutive_failures: 0, cooldown_until: None }
    }
}

/// Dispatches [`LlmClient::chat_completion`] across a configured fallback
/// chain. One instance is shared (behind an `Arc`) across the whole
/// process — cooldown state is per provider/model pair, not per call.
pub struct FallbackLlmClient {
    client: reqwest::Client,
    chain: Vec<(String, String)>,
    max_retries: u32,
    cooldown_trip_after: u32,
    cooldown: Duration,
    state: Mutex<HashMap<String, ProviderState>>,
}

impl FallbackLlmClient {
    /// Build a client from a raw `"<provider>/<model>"` chain plus the
    /// retry/cooldown policy. Entries that fail to parse are dropped
    /// with a warning rather than rejecting the whole chain — `validate()`
    /// in the config crate is the place that should have caught this.
    pub fn new(
        fallback_chain: &[String],
        max_retries: u32,
        cooldown_trip_after: u32,
        cooldown_seconds: u64,
    ) -> Self {
        let chain = fallback_chain
            .iter()
            .filter_map(|pair| match parse_provider_model(pair) {
                Ok((provider, model)) => Some((provider.to_string(), model.to_string())),
                Err(err) => {
                    tracing::warn!(error = %err, pair, "dropping unparsable fallback-chain entry");
                    None
                }
            })
            .collect();

        Self {
            client: reqwest::Client::new(),
            chain,
            max_retries,
            cooldown_trip_after,
            cooldown: Duration::from_secs(cooldown_seconds),
            state: Mutex::new(HashMap::new()),
        }
    }

    fn chain_key(provider: &str, model: &str) -> String {
        format!("{provider}/{model}")
    }

    fn in_cooldown(&self, key: &str) -> bool {
        let state = self.state.lock().unwrap();
        state.get(key).and_then(|s| s.cooldown_until).is_some_and(|until| Instant::now() < until)
    }

    fn record_success(&self, key: &str) {
        let mut state = self.state.lock().unwrap();
        state.entry(key.to_string()).or_default().consecutive_failures = 0;
        if let Some(entry) = state.get_mut(key) {
            entry.cooldown_until = None;
        }
    }

    fn record_rejection(&self, key: &str) {
        let mut state = self.state.lock().unwrap();
        let entry = state.entry(key.to_string()).or_default();
        entry.consecutive_failures += 1;
        if entry.consecutive_failures >= self.cooldown_trip_after {
            entry.cooldown_until = Some(Instant::now() + self.cooldown);
            tracing::warn!(provider_model = key, "fallback-chain entry tripped cooldown");
        }
    }

    async fn call_with_retries(&self, provider: &str, model: &str, messages: &[ChatMessage], options: &ChatOptions) -> Option<ChatOutcome> {
        for attempt in 0..=self.max_retries {
            let outcome = match provider {
                "ollama" => call_ollama(&self.client, model, messages, options).await,
                "openrouter" => call_openrouter(&self.client, model, messages, options).await,
                other => {
                    tracing::warn!(provider = other, "unrecognized provider in fallback chain");
                    Attempt::Rejected
                }
            };
            match outcome {
                Attempt::Success(out) => return Some(out),
                Attempt::Rejected => return None,
                Attempt::Transient if attempt < self.max_retries => continue,
                Attempt::Transient => return None,
            }
        }
        None
    }
}

#[async_trait]
impl LlmClient for FallbackLlmClient {
    async fn chat_completion(&self, messages: &[ChatMessage], options: &ChatOptions) -> Option<ChatOutcome> {
        for (provider, model) in &self.chain {
            let key = Self::chain_key(provider, model);
            if self.in_cooldown(&key) {
                tracing::debug!(provider_model = %key, "skipping fallback-chain entry in cooldown");
                continue;
            }

            let timeout = Duration::from_millis(options.timeout_ms);
            let result = tokio::time::timeout(timeout, self.call_with_retries(provider, model, messages, options)).await;

            match result {
                Ok(Some(outcome)) => {
                    self.record_success(&key);
                    return Some(outcome);
                }
                Ok(None) => {
                    self.record_rejection(&key);
                }
                Err(_) => {
                    tracing::warn!(provider_model = %key, timeout_ms = options.timeout_ms, "llm call timed out");
                    self.record_rejection(&key);
                }
            }
        }
        None
    }
}

fn chat_role_str(role: ChatRole) -> &'static str {
    match role {
        ChatRole::System => "system",
        ChatRole::User => "user",
        ChatRole::Assistant => "assistant",
    }
}

fn messages_to_json(messages: &[ChatMessage]) -> Vec<serde_json::Value> {
    messages.iter().map(|m| json!({ "role": chat_role_str(m.role), "content": m.content })).collect()
}

async fn call_ollama(client: &reqwest::Client, model: &str, messages: &[ChatMessage], options: &ChatOptions) -> Attempt {
    let base_url = std::env::var("OLLAMA_BASE_URL").unwrap_or_else(|_| "http://localhost:11434".to_string());
    let endpoint = format!("{}/api/chat", base_url.trim_end_matches('/'));
    let payload = json!({
        "model": model,
        "messages": messages_to_json(messages),
        "stream": false,
        "options": { "temperature": options.temperature },
    });

    let response = match client.post(&endpoint).json(&payload).send().await {
        Ok(response) => response,
        Err(err) => {
            tracing::warn!(error = %err, endpoint, "ollama request failed");
            return Attempt::Transient;
        }
    };

    let status = response.status();
    let body: serde_json::Value = match response.json().await {
        Ok(body) => body,
        Err(err) => {
            tracing::warn!(error = %err, "ollama response body was not valid json");
            return Attempt::Transient;
        }
    };

    if status.is_server_error() {
        tracing::warn!(status = %status, "ollama server error");
        return Attempt::Transient;
    }
    if !status.is_success() {
        tracing::warn!(status = %status, body = %body, "ollama rejected request");
        return Attempt::Rejected;
    }

    let Some(content) = body.get("message").and_then(|m| m.get("content")).and_then(|v| v.as_str()) else {
        tracing::warn!(body = %body, "ollama response missing message.content");
        return Attempt::Rejected;
    };

    let usage = body.get("prompt_eval_count").and_then(|v| v.as_u64()).map(|prompt_tokens| Usage {
        prompt_tokens: prompt_tokens as u32,
        completion_tokens: body.get("eval_count").and_then(|v| v.as_u64()).unwrap_or(0) as u32,
    });

    Attempt::Success(ChatOutcome { content: content.to_string(), usage })
}

async fn call_openrouter(client: &reqwest::Client, model: &str, messages: &[ChatMessage], options: &ChatOptions) -> Attempt {
    let Some(api_key) = std::env::var("OPENROUTER_API_KEY").ok().filter(|k| !k.trim().is_empty()) else {
        tracing::warn!("OPENROUTER_API_KEY not set, skipping openrouter");
        return Attempt::Rejected;
    };

    let payload = json!({
        "model": model,
        "messages": messages_to_json(messages),
        "temperature": options.temperature,
        "max_tokens": options.max_tokens,
    });

    let response = client
        .post("https://openrouter.ai/api/v1/chat/completions")
        .bearer_auth(&api_key)
        .header("HTTP-Referer", "https://engram.local")
        .header("X-Title", "Engram")
        .json(&payload)
        .send()
        .await;

    let response = match response {
        Ok(response) => response,
        Err(err) => {
            tracing::warn!(error = %err, "openrouter request failed");
            return Attempt::Transient;
        }
    };

    let status = response.status();
    let body: serde_json::Value = match response.json().await {
        Ok(body) => body,
        Err(err) => {
            tracing::warn!(error = %err, "openrouter response body was not valid json");
            return Attempt::Transient;
        }
    };

    if status.is_server_error() {
        tracing::warn!(status = %status, "openrouter server error");
        return Attempt::Transient;
    }
    if !status.is_success() {
        tracing::warn!(status = %status, body = %body, "openrouter rejected request");
        return Attempt::Rejected;
    }

    let Some(content) = body
        .get("choices")
        .and_then(|c| c.get(0))
        .and_then(|c| c.get("message"))
        .and_then(|m| m.get("content"))
        .and_then(|v| v.as_str())
    else {
        tracing::warn!(body = %body, "openrouter response missing choices[0].message.content");
        return Attempt::Rejected;
    };

    let usage = body.get("usage").map(|u| Usage {
        prompt_tokens: u.get("prompt_tokens").and_then(|v| v.as_u64()).unwrap_or(0) as u32,
        completion_tokens: u.get("completion_tokens").and_then(|v| v.as_u64()).unwrap_or(0) as u32,
    });

    Attempt::Success(ChatOutcome { content: content.to_string(), usage })
}

#[cfg(test)]
mod tests {
    use super::*;
    use engram_memory::llm_client::LlmOperation;

    #[test]
    fn unparsable_chain_entries_are_dropped() {
        let client = FallbackLlmClient::new(&["not-a-pair".to_string(), "ollama/llama3.1:8b".to_string()], 2, 5, 60);
        assert_eq!(client.chain, vec![("ollama".to_string(), "llama3.1:8b".to_string())]);
    }

    #[tokio::test]
    async fn unrecognized_provider_in_chain_returns_none() {
        let client = FallbackLlmClient::new(&["carrier-pigeon/v1".to_string()], 1, 5, 60);
        let options = ChatOptions::new(LlmOperation::Extraction, 1000);
        let outcome = client.chat_completion(&[ChatMessage::user("hi")], &options).await;
        assert!(outcome.is_none());
    }

    #[test]
    fn cooldown_trips_after_threshold_rejections() {
        let client = FallbackLlmClient::new(&["openrouter/x".to_string()], 1, 2, 60);
        let key = FallbackLlmClient::chain_key("openrouter", "x");
        assert!(!client.in_cooldown(&key));
        client.record_rejection(&key);
        assert!(!client.in_cooldown(&key));
        client.record_rejection(&key);
        assert!(client.in_cooldown(&key));
    }

    #[test]
    fn success_resets_failure_count_and_cooldown() {
        let client = FallbackLlmClient::new(&["openrouter/x".to_string()], 1, 1, 60);
        let key = FallbackLlmClient::chain_key("openrouter", "x");
        client.record_rejection(&key);
        assert!(client.in_cooldown(&key));
        client.record_success(&key);
        assert!(!client.in_cooldown(&key));
    }
}
