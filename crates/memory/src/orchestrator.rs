//! The top-level coordinator: wires the buffer, the extraction/consolidation
//! pipeline, the content store, the box builder/trace weaver, and the
//! retrieval planner behind two entry points — [`Orchestrator::process_turn`]
//! and [`Orchestrator::recall`] — neither of which ever propagates an error
//! to the caller. The buffer/store lock is released across every LLM and
//! Index suspension point, and extraction runs are coalesced to
//! at-most-one-in-flight per memory root.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use anyhow::Result;
use chrono::Utc;
use tokio::sync::{Mutex, Notify};
use uuid::Uuid;

use engram_config::EngramConfig;

use crate::boxes::{self, BoxConfig, BoxEvent, BoxOutcome, OpenBox, TraceIndex};
use crate::buffer::{BufferState, TriggerDecision, TriggerParams};
use crate::extraction::{
    self, DedupeGuard, ExtractionCaps, ExtractionCoordinator, ExtractionResult,
};
use crate::identity;
use crate::index::{Index, RerankCache, SyncDebouncer};
use crate::llm_client::{ChatMessage, ChatOptions, LlmClient, LlmOperation};
use crate::namespace::NamespacePolicy;
use crate::profile;
use crate::retrieval::{self, NegativeExampleCounter, RecallImpression, ScoringWeights, VerbatimArtifact};
use crate::schema::{Entity, MemoryItem, Question};
use crate::signal;
use crate::store::ContentStore;
use crate::turn::Turn;

/// Everything `recall` hands back to a caller. Empty on any internal
/// failure or a short-circuited (trivial) query — never an error.
#[derive(Debug, Clone, Default)]
pub struct RecallOutcome {
    pub items: Vec<MemoryItem>,
    pub verbatim: Vec<VerbatimArtifact>,
}

/// Snapshot of store contents for the `stats` CLI surface.
#[derive(Debug, Clone, Default)]
pub struct MemoryStats {
    pub total_active: usize,
    pub total_superseded: usize,
    pub total_archived: usize,
    pub by_category: HashMap<String, usize>,
    pub extraction_count: u64,
    pub open_box_topics: Vec<String>,
    pub open_box_memory_count: usize,
}

struct Inner {
    store: ContentStore,
    buffer: BufferState,
    coordinator: ExtractionCoordinator,
    dedupe_guard: DedupeGuard,
    open_box: Option<OpenBox>,
    trace_index: TraceIndex,
    access_counts: HashMap<Uuid, u32>,
    negative_counters: HashMap<Uuid, NegativeExampleCounter>,
    impressions: Vec<RecallImpression>,
    rerank_cache: RerankCache,
    sync_debouncer: SyncDebouncer,
    user_high_signal: Vec<regex::Regex>,
}

const OPEN_BOX_STATE: &str = "open-box.json";
const TRACE_INDEX_STATE: &str = "traces.json";
const BUFFER_STATE: &str = "buffer.json";
const IMPRESSIONS_LOG: &str = "recall_impressions.jsonl";
const LAST_RECALL_STATE: &str = "last_recall.json";
const NEGATIVE_EXAMPLES_STATE: &str = "negative_examples.json";
const MAX_IMPRESSIONS: usize = 50;
const MAX_VERBATIM_ARTIFACTS: usize = 5;
const VERBATIM_ARTIFACT_SCAN_CAP: usize = 50;

/// Shared, cheaply-clonable handle to a memory root. Every method suspends
/// only at FS/LLM/Index calls; the buffer/store lock is never held
/// across an `.await` on the LLM or Index collaborators.
#[derive(Clone)]
pub struct Orchestrator {
    inner: Arc<Mutex<Inner>>,
    llm: Arc<dyn LlmClient>,
    index: Arc<dyn Index>,
    extraction_idle: Arc<Notify>,
    config: EngramConfig,
}

impl Orchestrator {
    pub fn open(
        root: impl AsRef<Path>,
        config: EngramConfig,
        llm: Arc<dyn LlmClient>,
        index: Arc<dyn Index>,
    ) -> Result<Self> {
        let mut store = ContentStore::open(root.as_ref())?;
        let buffer = store.read_state_json::<BufferState>(BUFFER_STATE)?.unwrap_or_default();
        let open_box = store.read_state_json::<OpenBox>(OPEN_BOX_STATE)?;
        let trace_index = store.read_state_json::<TraceIndex>(TRACE_INDEX_STATE)?.unwrap_or_default();
        let negative_counters = store
            .read_state_json::<HashMap<Uuid, NegativeExampleCounter>>(NEGATIVE_EXAMPLES_STATE)?
            .unwrap_or_default();
        let user_high_signal = signal::compile_user_patterns(&config.buffer.high_signal_patterns);
        let rerank_cache = RerankCache::new(256, config.rerank.rerank_cache_ttl_ms as i64);
        let sync_debouncer = SyncDebouncer::new(std::time::Duration::from_secs(5));

        Ok(Self {
            inner: Arc::new(Mutex::new(Inner {
                store,
                buffer,
                coordinator: ExtractionCoordinator::default(),
                dedupe_guard: DedupeGuard::default(),
                open_box,
                trace_index,
                access_counts: HashMap::new(),
                negative_counters,
                impressions: Vec::new(),
                rerank_cache,
                sync_debouncer,
                user_high_signal,
            })),
            llm,
            index,
            extraction_idle: Arc::new(Notify::new()),
            config,
        })
    }

    fn trigger_params(&self) -> TriggerParams {
        let mode = match self.config.buffer.trigger_mode {
            engram_config::TriggerMode::Smart => crate::buffer::TriggerMode::Smart,
            engram_config::TriggerMode::EveryN => crate::buffer::TriggerMode::EveryN,
            engram_config::TriggerMode::TimeBased => crate::buffer::TriggerMode::TimeBased,
        };
        TriggerParams {
            mode,
            buffer_max_turns: self.config.buffer.buffer_max_turns,
            buffer_max_minutes: self.config.buffer.buffer_max_minutes,
        }
    }

    /// Enqueue a turn and, if it triggers, run extraction. Never fails —
    /// any internal error is logged and swallowed.
    pub async fn process_turn(&self, turn: Turn) {
        let decision = {
            let mut inner = self.inner.lock().await;
            let decision = inner.buffer.add_turn(turn, &self.trigger_params(), &inner.user_high_signal.clone());
            if let Err(err) = inner.store.write_state_json(BUFFER_STATE, &inner.buffer) {
                tracing::warn!(error = %err, "failed to persist buffer state");
            }
            decision
        };

        match decision {
            TriggerDecision::KeepBuffering => {}
            TriggerDecision::ExtractNow | TriggerDecision::ExtractBatch => {
                self.trigger_extraction().await;
            }
        }
    }

    /// Force an extraction run regardless of the buffer's own trigger
    /// decision (the `extract` CLI command).
    pub async fn force_extract(&self) {
        self.trigger_extraction().await;
    }

    async fn trigger_extraction(&self) {
        let should_run = {
            let mut inner = self.inner.lock().await;
            inner.coordinator.request()
        };
        if !should_run {
            return;
        }

        loop {
            self.run_extraction_once().await;
            let rerun = {
                let mut inner = self.inner.lock().await;
                inner.coordinator.mark_complete()
            };
            if !rerun {
                break;
            }
        }
        self.extraction_idle.notify_waiters();
    }

    /// Block until no extraction is running and none is coalesced pending.
    pub async fn wait_for_extraction_idle(&self) {
        loop {
            {
                let inner = self.inner.lock().await;
                if inner.coordinator.is_idle() {
                    return;
                }
            }
            self.extraction_idle.notified().await;
        }
    }

    async fn run_extraction_once(&self) {
        let now = Utc::now();
        let (turns, known_entities, fingerprint) = {
            let inner = self.inner.lock().await;
            let turns: Vec<Turn> = inner.buffer.substantive_turns().into_iter().cloned().collect();
            let fingerprint = extraction::window_fingerprint(&turns);
            let known_entities = inner
                .store
                .all_entities()
                .unwrap_or_default()
                .into_iter()
                .map(|e| e.name)
                .collect::<Vec<_>>();
            (turns, known_entities, fingerprint)
        };

        if window_is_trivial(&turns) {
            tracing::debug!("extraction skipped: trivial window");
            return;
        }

        let skip = {
            let inner = self.inner.lock().await;
            inner
                .dedupe_guard
                .should_skip(&fingerprint, now, self.config.extraction.extraction_dedupe_window_ms)
        };
        if skip {
            tracing::debug!("extraction skipped: unchanged window within dedupe guard");
            return;
        }

        let extraction_prompt = build_extraction_prompt(&turns, &known_entities);
        let options = ChatOptions::new(LlmOperation::Extraction, self.config.extraction.extraction_timeout_ms);
        let outcome = self.llm.chat_completion(&[ChatMessage::system(EXTRACTION_SYSTEM_PROMPT), extraction_prompt], &options).await;

        let Some(outcome) = outcome else {
            tracing::warn!("extraction LLM call failed or timed out — buffer retained for next attempt");
            return;
        };
        let Some(result) = extraction::parse_extraction_result(&outcome.content) else {
            tracing::warn!("extraction reply failed schema validation — buffer retained for next attempt");
            return;
        };

        let caps = ExtractionCaps {
            max_facts: self.config.extraction.extraction_max_facts_per_run,
            max_entities: self.config.extraction.extraction_max_entities_per_run,
            max_questions: self.config.extraction.extraction_max_questions_per_run,
            max_profile_updates: self.config.extraction.extraction_max_profile_updates_per_run,
        };
        let result = extraction::apply_caps(result, &caps);

        let consolidation = if result.facts.is_empty() {
            extraction::default_add_all(&result.facts)
        } else {
            let existing_snapshot = {
                let inner = self.inner.lock().await;
                inner.store.all().cloned().collect::<Vec<_>>()
            };
            let consolidation_prompt = build_consolidation_prompt(&result, &existing_snapshot);
            let options = ChatOptions::new(LlmOperation::Consolidation, self.config.extraction.consolidation_timeout_ms);
            match self.llm.chat_completion(&[ChatMessage::system(CONSOLIDATION_SYSTEM_PROMPT), consolidation_prompt], &options).await {
                Some(outcome) => extraction::parse_consolidation_result(&outcome.content)
                    .unwrap_or_else(|| extraction::default_add_all(&result.facts)),
                None => extraction::default_add_all(&result.facts),
            }
        };

        if let Err(err) = self.apply_extraction_result(&result, &consolidation, fingerprint, now).await {
            tracing::warn!(error = %err, "failed to apply extraction result");
        }
    }

    async fn apply_extraction_result(
        &self,
        result: &ExtractionResult,
        consolidation: &extraction::ConsolidationResult,
        fingerprint: String,
        now: chrono::DateTime<Utc>,
    ) -> Result<()> {
        let mut inner = self.inner.lock().await;

        let expiration_policy = extraction::ExpirationPolicy {
            speculative_ttl_days: self.config.expiration.speculative_ttl_days,
            commitment_decay_days: self.config.expiration.commitment_decay_days,
        };
        let touched = extraction::apply_consolidation(&mut inner.store, &result.facts, consolidation, now, expiration_policy)?;
        extraction::apply_entities(&mut inner.store, &result.entities)?;
        extraction::apply_questions(&mut inner.store, &result.questions, now)?;

        if !result.profile_updates.is_empty() {
            profile::append_updates(&mut inner.store, self.config.extraction.profile_byte_budget, &result.profile_updates)?;
        }
        if let Some(reflection) = &result.identity_reflection {
            identity::append_reflection(&mut inner.store, self.config.extraction.identity_byte_budget, reflection)?;
        }

        if !touched.is_empty() {
            let touched_items: Vec<MemoryItem> = touched.iter().filter_map(|id| inner.store.get(*id).cloned()).collect();
            let topics = derive_topics(&touched_items);
            let event = BoxEvent { topics, memory_ids: touched, timestamp: now };
            let box_config = BoxConfig {
                topic_shift_threshold: self.config.boxes.box_topic_shift_threshold as f64,
                time_gap: chrono::Duration::milliseconds(self.config.boxes.box_time_gap_ms),
                max_memories: self.config.boxes.box_max_memories,
            };
            match boxes::apply_event(inner.open_box.take(), event, &box_config) {
                BoxOutcome::Accumulated(open) => inner.open_box = Some(open),
                BoxOutcome::Sealed { mut sealed, next } => {
                    if self.config.boxes.trace_weaving_enabled {
                        let trace_id = inner.trace_index.assign_trace(&sealed, self.config.boxes.trace_weaver_overlap_threshold as f64);
                        sealed.trace_id = Some(trace_id);
                        let trace_index = inner.trace_index.clone();
                        inner.store.write_state_json(TRACE_INDEX_STATE, &trace_index)?;
                    }
                    inner.store.write_box(&sealed)?;
                    inner.open_box = Some(next);
                }
            }
            if let Some(open_box) = &inner.open_box {
                inner.store.write_state_json(OPEN_BOX_STATE, open_box)?;
            }
            inner.sync_debouncer.mark_dirty();
        }

        inner.dedupe_guard.record(fingerprint, now);
        inner.buffer.clear_after_extraction();
        inner.store.write_state_json(BUFFER_STATE, &inner.buffer)?;

        match inner.store.sweep_expired(now) {
            Ok(expired) if !expired.is_empty() => tracing::info!(count = expired.len(), "archived expired speculative/commitment items"),
            Ok(_) => {}
            Err(err) => tracing::warn!(error = %err, "expiration sweep failed"),
        }

        let profile_due = profile::needs_compaction(&mut inner.store, self.config.extraction.profile_byte_budget)?;
        let identity_due = identity::needs_compaction(&mut inner.store, self.config.extraction.identity_byte_budget)?;

        let dirty = inner.sync_debouncer.should_sync(std::time::Instant::now());
        let items_for_index: Option<Vec<MemoryItem>> = if dirty {
            inner.sync_debouncer.mark_synced(std::time::Instant::now());
            Some(inner.store.all().cloned().collect())
        } else {
            None
        };
        drop(inner);

        if profile_due {
            self.compact_profile().await;
        }
        if identity_due {
            self.compact_identity().await;
        }

        if let Some(items) = items_for_index {
            self.index.update(&items).await;
        }

        Ok(())
    }

    /// Ask the LLM to compact the Profile document under its byte budget.
    /// Any collaborator failure or malformed reply leaves the document
    /// untouched — compaction is retried on the next extraction run that
    /// finds it still over budget.
    async fn compact_profile(&self) {
        let body = {
            let mut inner = self.inner.lock().await;
            match profile::read_profile(&mut inner.store) {
                Ok(body) => body,
                Err(err) => {
                    tracing::warn!(error = %err, "failed to read profile document for compaction");
                    return;
                }
            }
        };
        let prompt = build_compaction_prompt(&body, self.config.extraction.profile_byte_budget);
        let options = ChatOptions::new(LlmOperation::ProfileCompaction, self.config.extraction.compaction_timeout_ms);
        let Some(outcome) = self.llm.chat_completion(&[ChatMessage::system(PROFILE_COMPACTION_SYSTEM_PROMPT), prompt], &options).await else {
            tracing::warn!("profile compaction LLM call failed or timed out — document left over budget");
            return;
        };
        let Some(result) = extraction::parse_compaction_result(&outcome.content) else {
            tracing::warn!("profile compaction reply failed schema validation — document left over budget");
            return;
        };

        let mut inner = self.inner.lock().await;
        match profile::apply_compaction(&mut inner.store, result.body) {
            Ok(removed) => tracing::info!(removed, summary = %result.summary, "compacted profile document"),
            Err(err) => tracing::warn!(error = %err, "failed to write compacted profile document"),
        }
    }

    /// Analogous to [`Self::compact_profile`] for the IDENTITY document.
    async fn compact_identity(&self) {
        let body = {
            let mut inner = self.inner.lock().await;
            match identity::read_identity(&mut inner.store) {
                Ok(body) => body,
                Err(err) => {
                    tracing::warn!(error = %err, "failed to read identity document for compaction");
                    return;
                }
            }
        };
        let prompt = build_compaction_prompt(&body, self.config.extraction.identity_byte_budget);
        let options = ChatOptions::new(LlmOperation::IdentityCompaction, self.config.extraction.compaction_timeout_ms);
        let Some(outcome) = self.llm.chat_completion(&[ChatMessage::system(IDENTITY_COMPACTION_SYSTEM_PROMPT), prompt], &options).await else {
            tracing::warn!("identity compaction LLM call failed or timed out — document left over budget");
            return;
        };
        let Some(result) = extraction::parse_compaction_result(&outcome.content) else {
            tracing::warn!("identity compaction reply failed schema validation — document left over budget");
            return;
        };

        let mut inner = self.inner.lock().await;
        match identity::apply_compaction(&mut inner.store, result.body) {
            Ok(removed) => tracing::info!(removed, summary = %result.summary, "compacted identity document"),
            Err(err) => tracing::warn!(error = %err, "failed to write compacted identity document"),
        }
    }

    /// Retrieve memories relevant to `query`. Never fails — any internal
    /// error or collaborator failure degrades to an empty result.
    pub async fn recall(&self, query: &str, session_key: Option<&str>, limit: usize) -> RecallOutcome {
        if retrieval::is_no_recall(query) {
            return RecallOutcome::default();
        }

        let expansions = retrieval::expand_query(
            query,
            self.config.expansion.query_expansion_max_queries,
            self.config.expansion.query_expansion_min_token_len,
        );

        let namespaces = if self.config.storage.namespaces_enabled {
            self.config.storage.default_recall_namespaces.clone()
        } else {
            vec![self.config.storage.default_namespace.clone()]
        };
        let policy = NamespacePolicy::new(self.config.storage.default_namespace.clone(), self.config.storage.shared_namespace.clone());
        let principal = session_key.unwrap_or("");
        let readable_namespaces = policy.filter_readable(principal, &namespaces);

        let intent = retrieval::parse_intent(query, self.config.expansion.query_expansion_min_token_len);

        let (candidates, access_counts, negative_counts, weights) = {
            let inner = self.inner.lock().await;
            let candidates: Vec<MemoryItem> = inner.store.all().cloned().collect();
            let negative_counts: HashMap<Uuid, u32> = inner.negative_counters.iter().map(|(id, c)| (*id, c.hits)).collect();
            let weights = ScoringWeights {
                recency_weight: self.config.scoring.recency_weight,
                boost_access_count: self.config.scoring.boost_access_count,
                negative_penalty_per_hit: self.config.scoring.negative_examples_penalty_per_hit,
                negative_penalty_cap: self.config.scoring.negative_examples_penalty_cap,
                intent_routing_boost: self.config.scoring.intent_routing_boost,
                recency_tau_days: self.config.scoring.recency_tau_days as f64,
            };
            (candidates, inner.access_counts.clone(), negative_counts, weights)
        };

        // Namespace fan-out: per (expansion, namespace) pair, fetch top K from
        // the Index. If the fetch comes back dominated by artifact-sourced
        // hits, re-query with a larger K — doubling up to the configured
        // upper cap — until the non-artifact share meets the target or the
        // cap is reached.
        let mut semantic_scores: HashMap<Uuid, f32> = HashMap::new();
        for expanded in &expansions {
            for namespace in &readable_namespaces {
                let mut k = self.config.rerank.rerank_max_candidates;
                let mut hits = self.index.search(expanded, Some(*namespace), k).await;
                while retrieval::non_artifact_share(&hits, &candidates) < self.config.expansion.non_artifact_share_target
                    && k < self.config.expansion.artifact_topup_max_fetch
                {
                    let next_k = (k * 2).min(self.config.expansion.artifact_topup_max_fetch);
                    if next_k <= k {
                        break;
                    }
                    k = next_k;
                    hits = self.index.search(expanded, Some(*namespace), k).await;
                }
                for hit in hits {
                    let entry = semantic_scores.entry(hit.docid).or_insert(0.0);
                    if hit.score > *entry {
                        *entry = hit.score;
                    }
                }
            }
        }

        let now = Utc::now();
        let scored = retrieval::score_candidates(&candidates, &intent, &semantic_scores, &access_counts, &negative_counts, now, &weights);
        let top: Vec<&MemoryItem> = scored.iter().take(self.config.rerank.rerank_max_candidates.max(limit)).map(|c| c.item).collect();

        let ordered_ids: Vec<Uuid> = if self.config.rerank.rerank_enabled && !top.is_empty() {
            self.rerank(query, &top).await
        } else {
            top.iter().map(|i| i.id).collect()
        };

        let by_id: HashMap<Uuid, &MemoryItem> = top.iter().map(|i| (i.id, *i)).collect();
        let ranked: Vec<MemoryItem> = ordered_ids.iter().filter_map(|id| by_id.get(id).map(|i| (*i).clone())).collect();
        let items: Vec<MemoryItem> = ranked.iter().take(limit).cloned().collect();
        let verbatim = retrieval::collect_verbatim_artifacts(&ranked, MAX_VERBATIM_ARTIFACTS, VERBATIM_ARTIFACT_SCAN_CAP);

        let memory_ids: Vec<Uuid> = items.iter().map(|i| i.id).collect();
        {
            let mut inner = self.inner.lock().await;
            for id in &memory_ids {
                *inner.access_counts.entry(*id).or_insert(0) += 1;
            }
            let impression = retrieval::build_impression(session_key, query, memory_ids, now);
            retrieval::push_bounded(&mut inner.impressions, impression.clone(), MAX_IMPRESSIONS);
            if let Err(err) = inner.store.append_state_jsonl(IMPRESSIONS_LOG, &impression) {
                tracing::warn!(error = %err, "failed to append recall impression");
            }
            if let Err(err) = inner.store.write_state_json(LAST_RECALL_STATE, &impression) {
                tracing::warn!(error = %err, "failed to persist last recall impression");
            }
        }

        RecallOutcome { items, verbatim }
    }

    async fn rerank(&self, query: &str, candidates: &[&MemoryItem]) -> Vec<Uuid> {
        let candidate_ids: Vec<String> = candidates.iter().map(|i| i.id.to_string()).collect();
        let ids: Vec<Uuid> = candidates.iter().map(|i| i.id).collect();
        let cache_key = RerankCache::cache_key(query, &ids);
        let now_millis = Utc::now().timestamp_millis();

        {
            let mut inner = self.inner.lock().await;
            if let Some(order) = inner.rerank_cache.get(&cache_key, now_millis) {
                return order;
            }
        }

        let prompt = build_rerank_prompt(query, candidates);
        let options = ChatOptions::new(LlmOperation::Rerank, self.config.rerank.rerank_timeout_ms);
        let raw = self
            .llm
            .chat_completion(&[ChatMessage::system(RERANK_SYSTEM_PROMPT), prompt], &options)
            .await
            .map(|o| o.content)
            .unwrap_or_default();
        let ordered_str_ids = retrieval::parse_rerank_response(&raw, &candidate_ids);
        let order: Vec<Uuid> = ordered_str_ids.iter().filter_map(|s| Uuid::parse_str(s).ok()).collect();

        {
            let mut inner = self.inner.lock().await;
            inner.rerank_cache.put(cache_key, order.clone(), now_millis);
        }
        order
    }

    /// Record "not useful" feedback on a previously recalled memory.
    /// Persisted to `state/negative_examples.json` immediately so a
    /// restart doesn't lose the penalty.
    pub async fn record_negative_feedback(&self, id: Uuid, note: Option<String>) {
        let mut inner = self.inner.lock().await;
        retrieval::record_negative_feedback(&mut inner.negative_counters, id, note);
        if let Err(err) = inner.store.write_state_json(NEGATIVE_EXAMPLES_STATE, &inner.negative_counters) {
            tracing::warn!(error = %err, "failed to persist negative-example counters");
        }
    }

    pub async fn stats(&self) -> MemoryStats {
        let inner = self.inner.lock().await;
        let mut by_category = HashMap::new();
        let mut total_active = 0;
        let mut total_superseded = 0;
        let mut total_archived = 0;
        for item in inner.store.all() {
            match item.status {
                crate::schema::Status::Active => total_active += 1,
                crate::schema::Status::Superseded => total_superseded += 1,
                crate::schema::Status::Archived => total_archived += 1,
                crate::schema::Status::Missing => {}
            }
            *by_category.entry(item.category.slug().to_string()).or_insert(0) += 1;
        }
        let (open_box_topics, open_box_memory_count) = inner
            .open_box
            .as_ref()
            .map(|b| (b.topics.clone(), b.memory_ids.len()))
            .unwrap_or_default();
        MemoryStats {
            total_active,
            total_superseded,
            total_archived,
            by_category,
            extraction_count: inner.buffer.extraction_count,
            open_box_topics,
            open_box_memory_count,
        }
    }

    pub async fn entities(&self) -> Result<Vec<Entity>> {
        let inner = self.inner.lock().await;
        inner.store.all_entities()
    }

    pub async fn questions(&self, only_unresolved: bool) -> Result<Vec<Question>> {
        let inner = self.inner.lock().await;
        inner.store.all_questions(only_unresolved)
    }

    pub async fn identity_document(&self) -> Result<String> {
        let mut inner = self.inner.lock().await;
        identity::read_identity(&mut inner.store)
    }

    pub async fn profile_document(&self) -> Result<String> {
        let mut inner = self.inner.lock().await;
        profile::read_profile(&mut inner.store)
    }
}

/// A window is too sparse to be worth an extraction call when its
/// substantive content, stopword-filtered, yields no token of at least 3
/// characters — a single "ok" or "thanks" never clears this bar.
fn window_is_trivial(turns: &[Turn]) -> bool {
    let combined = turns.iter().map(|t| t.content.as_str()).collect::<Vec<_>>().join(" ");
    retrieval::tokenize(&combined, 3).is_empty()
}

/// Derive a box event's topics from the items an extraction run touched.
/// Keyword-frequency extraction over touched items' content, stopword-
/// filtered, weighing each item's own tags more heavily than body text.
fn derive_topics(items: &[MemoryItem]) -> Vec<String> {
    const STOPWORDS: &[&str] = &[
        "about", "after", "because", "before", "could", "there", "their", "these", "those",
        "would", "should", "where", "which", "while", "using", "please", "today", "prefer",
        "prefers",
    ];
    let stop: std::collections::BTreeSet<&str> = STOPWORDS.iter().copied().collect();

    let mut counts: HashMap<String, usize> = HashMap::new();
    for item in items {
        for tag in &item.tags {
            *counts.entry(tag.to_lowercase()).or_default() += 2;
        }
        for word in item
            .content
            .split(|ch: char| !ch.is_alphanumeric())
            .filter(|w| w.len() >= 4)
            .map(|w| w.to_lowercase())
            .filter(|w| !stop.contains(w.as_str()))
        {
            *counts.entry(word).or_default() += 1;
        }
    }

    let mut topics: Vec<(String, usize)> = counts.into_iter().collect();
    topics.sort_by(|(lw, lc), (rw, rc)| rc.cmp(lc).then_with(|| lw.cmp(rw)));
    topics.into_iter().take(6).map(|(word, _)| sanitize_topic_slug(&word)).collect()
}

fn sanitize_topic_slug(raw: &str) -> String {
    let mut slug: String = raw.chars().map(|ch| if ch.is_ascii_alphanumeric() { ch } else { '-' }).collect();
    while slug.contains("--") {
        slug = slug.replace("--", "-");
    }
    slug.trim_matches('-').to_string()
}

const EXTRACTION_SYSTEM_PROMPT: &str = "You extract durable facts, preferences, entities, and open \
questions from a conversation window. Reply with a single JSON object matching the schema you were \
given, inside a ```json fenced block. If nothing durable is present, reply with an empty object.";

const CONSOLIDATION_SYSTEM_PROMPT: &str = "You decide how newly extracted facts relate to a user's \
existing memories: add, merge, update, invalidate, or skip. Reply with a single JSON object matching \
the schema you were given, inside a ```json fenced block.";

const RERANK_SYSTEM_PROMPT: &str = "You score how relevant each candidate memory is to the query on a \
0-100 scale. Reply with a single JSON object: {\"scores\": [{\"id\": \"...\", \"score\": 0}]}.";

const PROFILE_COMPACTION_SYSTEM_PROMPT: &str = "You compact a user profile document down to fit a byte \
budget, merging redundant or superseded observations while preserving every distinct fact. Reply with a \
single JSON object matching the schema you were given, inside a ```json fenced block.";

const IDENTITY_COMPACTION_SYSTEM_PROMPT: &str = "You compact an agent's self-reflection log down to fit \
a byte budget, merging repeated or superseded reflections while preserving every distinct lesson. Reply \
with a single JSON object matching the schema you were given, inside a ```json fenced block.";

fn build_compaction_prompt(body: &str, byte_budget: usize) -> ChatMessage {
    ChatMessage::user(format!(
        "Byte budget: {byte_budget}\n\nCurrent document:\n{body}\n\n\
         Reply with {{\"body\": \"...\", \"removedCount\": 0, \"summary\": \"...\"}} where `body` is the \
         compacted document, `removedCount` is how many entries were folded away, and `summary` is one \
         line describing what changed."
    ))
}

fn build_extraction_prompt(turns: &[Turn], known_entities: &[String]) -> ChatMessage {
    let mut body = String::from("Conversation window:\n");
    for turn in turns {
        let role = match turn.role {
            crate::turn::Role::User => "user",
            crate::turn::Role::Assistant => "assistant",
        };
        body.push_str(&format!("{role}: {}\n", turn.content));
    }
    if !known_entities.is_empty() {
        body.push_str(&format!("\nKnown entities: {}\n", known_entities.join(", ")));
    }
    ChatMessage::user(body)
}

fn build_consolidation_prompt(result: &ExtractionResult, existing: &[MemoryItem]) -> ChatMessage {
    let mut body = String::from("Newly extracted facts (by index):\n");
    for (i, fact) in result.facts.iter().enumerate() {
        body.push_str(&format!("{i}: [{}] {}\n", fact.category.slug(), fact.content));
    }
    body.push_str("\nExisting memories:\n");
    for item in existing.iter().take(50) {
        body.push_str(&format!("{} [{}] {}\n", item.id, item.category.slug(), crate::schema::truncate_str(&item.content, 200)));
    }
    ChatMessage::user(body)
}

fn build_rerank_prompt(query: &str, candidates: &[&MemoryItem]) -> ChatMessage {
    let mut body = format!("Query: {query}\n\nCandidates:\n");
    for item in candidates {
        body.push_str(&format!("{}: {}\n", item.id, retrieval::clamp_snippet(&item.content)));
    }
    ChatMessage::user(body)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::NullIndex;
    use crate::llm_client::{ChatOutcome, NullLlmClient};
    use tempfile::tempdir;

    fn orchestrator(dir: &std::path::Path) -> Orchestrator {
        Orchestrator::open(dir, EngramConfig::default(), Arc::new(NullLlmClient), Arc::new(NullIndex)).unwrap()
    }

    #[tokio::test]
    async fn trivial_window_produces_no_files_and_no_extraction() {
        let dir = tempdir().unwrap();
        let orch = orchestrator(dir.path());
        orch.process_turn(Turn::user("ok")).await;
        orch.force_extract().await;
        orch.wait_for_extraction_idle().await;

        let stats = orch.stats().await;
        assert_eq!(stats.total_active, 0);
        assert_eq!(stats.extraction_count, 0);
    }

    #[tokio::test]
    async fn recall_short_circuits_on_trivial_query_without_index_call() {
        let dir = tempdir().unwrap();
        let orch = orchestrator(dir.path());
        let outcome = orch.recall("ok", None, 10).await;
        assert!(outcome.items.is_empty());
        assert!(outcome.verbatim.is_empty());
    }

    #[tokio::test]
    async fn extraction_with_no_llm_leaves_buffer_intact() {
        let dir = tempdir().unwrap();
        let orch = orchestrator(dir.path());
        orch.process_turn(Turn::user("Actually, I prefer spaces over tabs for this project")).await;
        orch.wait_for_extraction_idle().await;
        let stats = orch.stats().await;
        assert_eq!(stats.total_active, 0);
    }

    struct StaticLlm(String);

    #[async_trait::async_trait]
    impl LlmClient for StaticLlm {
        async fn chat_completion(&self, _messages: &[ChatMessage], _options: &ChatOptions) -> Option<ChatOutcome> {
            Some(ChatOutcome { content: self.0.clone(), usage: None })
        }
    }

    #[tokio::test]
    async fn extraction_writes_items_on_successful_llm_round_trip() {
        let dir = tempdir().unwrap();
        let extraction_reply = r#"{"facts":[{"category":"preference","content":"Prefers tabs over spaces","confidence":0.9}]}"#;
        let orch = Orchestrator::open(
            dir.path(),
            EngramConfig::default(),
            Arc::new(StaticLlm(extraction_reply.to_string())),
            Arc::new(NullIndex),
        )
        .unwrap();

        orch.process_turn(Turn::user("Actually, I prefer tabs over spaces for this project")).await;
        orch.wait_for_extraction_idle().await;

        let stats = orch.stats().await;
        assert_eq!(stats.total_active, 1);
        assert_eq!(stats.extraction_count, 1);
    }

    /// Replies per-operation so a single run can exercise extraction,
    /// consolidation, and compaction without one reply being misparsed as
    /// another's schema.
    struct ScriptedLlm {
        extraction: String,
        compaction: String,
    }

    #[async_trait::async_trait]
    impl LlmClient for ScriptedLlm {
        async fn chat_completion(&self, _messages: &[ChatMessage], options: &ChatOptions) -> Option<ChatOutcome> {
            let content = match options.operation {
                LlmOperation::Extraction => self.extraction.clone(),
                LlmOperation::ProfileCompaction | LlmOperation::IdentityCompaction => self.compaction.clone(),
                _ => r#"{"decisions":[]}"#.to_string(),
            };
            Some(ChatOutcome { content, usage: None })
        }
    }

    #[tokio::test]
    async fn profile_compaction_runs_when_over_budget_and_shrinks_document() {
        let dir = tempdir().unwrap();
        let extraction_reply = r#"{"facts":[],"profileUpdates":["Prefers dark mode in every editor they touch, without exception, across every machine they own"]}"#;
        let compacted_body = "# Profile\n\n- prefers dark mode\n";
        let compaction_reply = format!(r#"{{"body":"{compacted_body}","removedCount":1,"summary":"condensed"}}"#).replace('\n', "\\n");
        let mut config = EngramConfig::default();
        config.extraction.profile_byte_budget = 10;

        let orch = Orchestrator::open(
            dir.path(),
            config,
            Arc::new(ScriptedLlm { extraction: extraction_reply.to_string(), compaction: compaction_reply }),
            Arc::new(NullIndex),
        )
        .unwrap();

        orch.process_turn(Turn::user("From now on please always use dark mode everywhere")).await;
        orch.wait_for_extraction_idle().await;

        let body = orch.profile_document().await.unwrap();
        assert_eq!(body, compacted_body);
    }
}
