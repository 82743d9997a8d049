//! Typed configuration for the Engram memory subsystem.
//!
//! Every tunable is an explicit field on [`EngramConfig`] or one of its
//! nested groups. `EngramConfig::load_from`/`save_to` round-trip through
//! TOML. Invalid weights or paths are rejected by [`EngramConfig::validate`]
//! at startup, so they never surface as runtime failures.

use std::fs;
use std::path::Path;

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};

/// `triggerMode`: which rule decides when the buffer extracts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerMode {
    Smart,
    EveryN,
    TimeBased,
}

impl Default for TriggerMode {
    fn default() -> Self {
        Self::Smart
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BufferConfig {
    pub trigger_mode: TriggerMode,
    pub buffer_max_turns: usize,
    pub buffer_max_minutes: i64,
    /// User-supplied regex panel, merged with the built-in high-signal set.
    pub high_signal_patterns: Vec<String>,
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            trigger_mode: TriggerMode::Smart,
            buffer_max_turns: 20,
            buffer_max_minutes: 30,
            high_signal_patterns: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub memory_dir: String,
    pub workspace_dir: String,
    pub namespaces_enabled: bool,
    pub default_namespace: String,
    pub shared_namespace: String,
    pub default_recall_namespaces: Vec<String>,
    /// Byte budget before a bootstrap document (IDENTITY, profile) rotates
    /// its body into `.engram-archive/` on the next write.
    pub bootstrap_doc_byte_budget: usize,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            memory_dir: "./.engram".to_string(),
            workspace_dir: ".".to_string(),
            namespaces_enabled: false,
            default_namespace: "default".to_string(),
            shared_namespace: "shared".to_string(),
            default_recall_namespaces: vec!["default".to_string()],
            bootstrap_doc_byte_budget: 16_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringConfig {
    pub recency_weight: f32,
    pub boost_access_count: f32,
    pub negative_examples_penalty_per_hit: f32,
    pub negative_examples_penalty_cap: f32,
    pub intent_routing_boost: f32,
    /// τ in `s_recency = exp(-age_days / tau)`.
    pub recency_tau_days: f32,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            recency_weight: 0.2,
            boost_access_count: 0.1,
            negative_examples_penalty_per_hit: 0.05,
            negative_examples_penalty_cap: 0.5,
            intent_routing_boost: 0.15,
            recency_tau_days: 14.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RerankConfig {
    pub rerank_enabled: bool,
    pub rerank_max_candidates: usize,
    pub rerank_timeout_ms: u64,
    pub rerank_cache_ttl_ms: u64,
}

impl Default for RerankConfig {
    fn default() -> Self {
        Self {
            rerank_enabled: false,
            rerank_max_candidates: 20,
            rerank_timeout_ms: 4_000,
            rerank_cache_ttl_ms: 60_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExpansionConfig {
    pub query_expansion_max_queries: usize,
    pub query_expansion_min_token_len: usize,
    /// Minimum fraction of a namespace fan-out fetch that must be
    /// non-artifact-sourced before the planner stops topping up.
    pub non_artifact_share_target: f32,
    /// Upper bound on `max_results` a single namespace/expansion fetch will
    /// grow to while topping up toward `non_artifact_share_target`.
    pub artifact_topup_max_fetch: usize,
}

impl Default for ExpansionConfig {
    fn default() -> Self {
        Self {
            query_expansion_max_queries: 4,
            query_expansion_min_token_len: 3,
            non_artifact_share_target: 0.6,
            artifact_topup_max_fetch: 100,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExpirationConfig {
    pub commitment_decay_days: i64,
    pub speculative_ttl_days: i64,
}

impl Default for ExpirationConfig {
    fn default() -> Self {
        Self {
            commitment_decay_days: 90,
            speculative_ttl_days: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BoxConfig {
    pub box_topic_shift_threshold: f32,
    pub box_time_gap_ms: i64,
    pub box_max_memories: usize,
    pub trace_weaver_overlap_threshold: f32,
    pub trace_weaving_enabled: bool,
}

impl Default for BoxConfig {
    fn default() -> Self {
        Self {
            box_topic_shift_threshold: 0.35,
            box_time_gap_ms: 30 * 60 * 1000,
            box_max_memories: 12,
            trace_weaver_overlap_threshold: 0.4,
            trace_weaving_enabled: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractionConfig {
    pub extraction_dedupe_window_ms: i64,
    pub extraction_max_facts_per_run: usize,
    pub extraction_max_entities_per_run: usize,
    pub extraction_max_questions_per_run: usize,
    pub extraction_max_profile_updates_per_run: usize,
    pub extraction_timeout_ms: u64,
    pub consolidation_timeout_ms: u64,
    pub consolidation_window_size: usize,
    pub compaction_timeout_ms: u64,
    pub profile_byte_budget: usize,
    pub identity_byte_budget: usize,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            extraction_dedupe_window_ms: 5 * 60 * 1000,
            extraction_max_facts_per_run: 20,
            extraction_max_entities_per_run: 10,
            extraction_max_questions_per_run: 5,
            extraction_max_profile_updates_per_run: 5,
            extraction_timeout_ms: 30_000,
            consolidation_timeout_ms: 30_000,
            consolidation_window_size: 50,
            compaction_timeout_ms: 20_000,
            profile_byte_budget: 8_000,
            identity_byte_budget: 8_000,
        }
    }
}

/// `"<provider>/<model>"` fallback chain plus per-operation timeout/retry
/// policy for the primary and local/fallback LLM collaborators.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    /// First entry is the primary; the rest are tried in order on failure.
    pub fallback_chain: Vec<String>,
    pub summarization_timeout_ms: u64,
    /// Bound on retries for transient (5xx/timeout) failures.
    pub max_retries: u32,
    /// Consecutive 4xx responses before a collaborator trips its cooldown.
    pub cooldown_trip_after: u32,
    pub cooldown_seconds: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            fallback_chain: vec!["ollama/llama3.1:8b".to_string()],
            summarization_timeout_ms: 20_000,
            max_retries: 2,
            cooldown_trip_after: 5,
            cooldown_seconds: 60,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct EngramConfig {
    pub buffer: BufferConfig,
    pub storage: StorageConfig,
    pub scoring: ScoringConfig,
    pub rerank: RerankConfig,
    pub expansion: ExpansionConfig,
    pub expiration: ExpirationConfig,
    pub boxes: BoxConfig,
    pub extraction: ExtractionConfig,
    pub llm: LlmConfig,
}

impl EngramConfig {
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let mut config = Self::default();
        if let Ok(raw) = fs::read_to_string(path) {
            config = toml::from_str(&raw)?;
        }
        config.validate()?;
        Ok(config)
    }

    pub fn save_to(&self, path: impl AsRef<Path>) -> Result<()> {
        if let Some(parent) = path.as_ref().parent() {
            fs::create_dir_all(parent)?;
        }
        let rendered = toml::to_string_pretty(self)?;
        fs::write(path, rendered)?;
        Ok(())
    }

    /// Reject configuration that cannot produce sane behavior. Called from
    /// `load_from`; construction via `Default` always passes.
    pub fn validate(&self) -> Result<()> {
        if self.storage.memory_dir.trim().is_empty() {
            bail!("storage.memory_dir must not be empty");
        }
        if self.storage.default_namespace.trim().is_empty() {
            bail!("storage.default_namespace must not be empty");
        }
        if !(0.0..=1.0).contains(&self.boxes.box_topic_shift_threshold) {
            bail!("boxes.box_topic_shift_threshold must be in [0, 1]");
        }
        if !(0.0..=1.0).contains(&self.boxes.trace_weaver_overlap_threshold) {
            bail!("boxes.trace_weaver_overlap_threshold must be in [0, 1]");
        }
        if !(0.0..=1.0).contains(&self.expansion.non_artifact_share_target) {
            bail!("expansion.non_artifact_share_target must be in [0, 1]");
        }
        if self.buffer.buffer_max_turns == 0 {
            bail!("buffer.buffer_max_turns must be at least 1");
        }
        if self.llm.fallback_chain.is_empty() {
            bail!("llm.fallback_chain must name at least one provider/model pair");
        }
        for pair in &self.llm.fallback_chain {
            parse_provider_model(pair)?;
        }
        Ok(())
    }
}

/// Parse a `"<provider>/<model>"` fallback-chain entry.
pub fn parse_provider_model(pair: &str) -> Result<(&str, &str)> {
    match pair.split_once('/') {
        Some((provider, model)) if !provider.is_empty() && !model.is_empty() => {
            Ok((provider, model))
        }
        _ => bail!("invalid provider/model pair: {pair:?} (expected \"<provider>/<model>\")"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn default_config_validates() {
        assert!(EngramConfig::default().validate().is_ok());
    }

    #[test]
    fn empty_memory_dir_rejected() {
        let mut config = EngramConfig::default();
        config.storage.memory_dir = String::new();
        assert!(config.validate().is_err());
    }

    #[test]
    fn out_of_range_threshold_rejected() {
        let mut config = EngramConfig::default();
        config.boxes.box_topic_shift_threshold = 1.5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn malformed_fallback_chain_entry_rejected() {
        let mut config = EngramConfig::default();
        config.llm.fallback_chain = vec!["not-a-pair".to_string()];
        assert!(config.validate().is_err());
    }

    #[test]
    fn parse_provider_model_splits_on_first_slash() {
        let (provider, model) = parse_provider_model("openrouter/openai/gpt-4o-mini").unwrap();
        assert_eq!(provider, "openrouter");
        assert_eq!(model, "openai/gpt-4o-mini");
    }

    #[test]
    fn round_trips_through_toml() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("engram.toml");
        let mut config = EngramConfig::default();
        config.scoring.recency_weight = 0.42;
        config.save_to(&path).unwrap();

        let loaded = EngramConfig::load_from(&path).unwrap();
        assert_eq!(loaded.scoring.recency_weight, 0.42);
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let loaded = EngramConfig::load_from("/nonexistent/path/engram.toml").unwrap();
        assert_eq!(loaded.buffer.buffer_max_turns, 20);
    }
}
