//! Extraction/consolidation pipeline: turns a buffered window into a
//! validated [`ExtractionResult`], consolidates it against existing items,
//! and applies the result to the store. Coalesced to at-most-one-in-flight
//! per memory root.
//!
//! LLM replies are parsed from a fenced ```json block if present, falling
//! back to treating the whole reply as bare JSON.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::schema::{Category, Entity, EntityType, MemoryItem, Question, Status};
use crate::store::ContentStore;
use crate::turn::Turn;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FactDraft {
    pub category: Category,
    pub content: String,
    pub confidence: f32,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default, rename = "entityRef")]
    pub entity_ref: Option<String>,
    /// Set by the extraction LLM when `content` is a direct quote rather
    /// than a paraphrase. Drives `source: "artifact"` on the stored item
    /// (see [`crate::retrieval::collect_verbatim_artifacts`]).
    #[serde(default)]
    pub verbatim: bool,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EntityDraft {
    pub name: String,
    #[serde(rename = "type")]
    pub entity_type: EntityType,
    #[serde(default)]
    pub facts: Vec<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct QuestionDraft {
    pub question: String,
    pub context: String,
    pub priority: f32,
}

/// The extraction LLM's schema-validated output.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ExtractionResult {
    #[serde(default)]
    pub facts: Vec<FactDraft>,
    #[serde(default, rename = "profileUpdates")]
    pub profile_updates: Vec<String>,
    #[serde(default)]
    pub entities: Vec<EntityDraft>,
    #[serde(default)]
    pub questions: Vec<QuestionDraft>,
    #[serde(default, rename = "identityReflection")]
    pub identity_reflection: Option<String>,
}

impl ExtractionResult {
    pub fn is_empty(&self) -> bool {
        self.facts.is_empty()
            && self.profile_updates.is_empty()
            && self.entities.is_empty()
            && self.questions.is_empty()
            && self.identity_reflection.is_none()
    }
}

/// Validate every field the schema requires; reject the whole result on any
/// violation — an invalid response is dropped, yielding an empty result.
fn validate(result: &ExtractionResult) -> bool {
    result.facts.iter().all(|f| (0.0..=1.0).contains(&f.confidence) && !f.content.trim().is_empty())
        && result.questions.iter().all(|q| (0.0..=1.0).contains(&q.priority) && !q.question.trim().is_empty())
}

/// Parse an LLM reply into an [`ExtractionResult`]. Tries a fenced ```json
/// block first, then falls back to treating the whole reply as JSON.
/// Returns `None` on any parse or schema-validation failure.
pub fn parse_extraction_result(raw: &str) -> Option<ExtractionResult> {
    let candidate = extract_json_block(raw)?;
    let result: ExtractionResult = serde_json::from_str(&candidate).ok()?;
    if validate(&result) {
        Some(result)
    } else {
        None
    }
}

/// Consolidation decision for one extracted fact, applied against the most
/// recent existing items.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConsolidationAction {
    Add,
    Merge,
    Update,
    Invalidate,
    Skip,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ConsolidationDecision {
    #[serde(rename = "factIndex")]
    pub fact_index: usize,
    pub action: ConsolidationAction,
    #[serde(default, rename = "existingId")]
    pub existing_id: Option<Uuid>,
    #[serde(default, rename = "mergedContent")]
    pub merged_content: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ConsolidationResult {
    pub decisions: Vec<ConsolidationDecision>,
}

pub fn parse_consolidation_result(raw: &str) -> Option<ConsolidationResult> {
    let candidate = extract_json_block(raw)?;
    serde_json::from_str(&candidate).ok()
}

/// A profile/identity compaction LLM reply: the replacement body plus a
/// removed-entry count and a one-line summary of what was folded away.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CompactionResult {
    pub body: String,
    #[serde(default, rename = "removedCount")]
    pub removed_count: usize,
    #[serde(default)]
    pub summary: String,
}

pub fn parse_compaction_result(raw: &str) -> Option<CompactionResult> {
    let candidate = extract_json_block(raw)?;
    let result: CompactionResult = serde_json::from_str(&candidate).ok()?;
    if result.body.trim().is_empty() {
        None
    } else {
        Some(result)
    }
}

/// Try a fenced ```json (or bare ```) block first; fall back to treating the
/// whole trimmed reply as a JSON document.
fn extract_json_block(raw: &str) -> Option<String> {
    if let Some(start) = raw.find("```json").or_else(|| raw.find("```")) {
        let after_fence = &raw[start..];
        let body_start = after_fence.find('\n').map(|i| i + 1).unwrap_or(0);
        let body = &after_fence[body_start..];
        if let Some(end) = body.find("```") {
            let candidate = body[..end].trim();
            if !candidate.is_empty() {
                return Some(candidate.to_string());
            }
        }
    }
    let trimmed = raw.trim();
    if trimmed.starts_with('{') || trimmed.starts_with('[') {
        Some(trimmed.to_string())
    } else {
        None
    }
}

/// Per-run caps on facts, entities, questions, and profile updates;
/// excess truncated after sorting by priority/confidence, highest first.
pub struct ExtractionCaps {
    pub max_facts: usize,
    pub max_entities: usize,
    pub max_questions: usize,
    pub max_profile_updates: usize,
}

pub fn apply_caps(mut result: ExtractionResult, caps: &ExtractionCaps) -> ExtractionResult {
    result.facts.sort_by(|a, b| b.confidence.partial_cmp(&a.confidence).unwrap_or(std::cmp::Ordering::Equal));
    result.facts.truncate(caps.max_facts);
    result.entities.truncate(caps.max_entities);
    result.questions.sort_by(|a, b| b.priority.partial_cmp(&a.priority).unwrap_or(std::cmp::Ordering::Equal));
    result.questions.truncate(caps.max_questions);
    result.profile_updates.truncate(caps.max_profile_updates);
    result
}

/// SHA-256 of the concatenated substantive turn content, used as the
/// dedup-guard fingerprint.
pub fn window_fingerprint(turns: &[Turn]) -> String {
    let mut hasher = Sha256::new();
    for turn in turns.iter().filter(|t| t.is_substantive()) {
        hasher.update(turn.content.trim().as_bytes());
        hasher.update(b"\n");
    }
    format!("{:x}", hasher.finalize())
}

/// Tracks the most recent extracted-window fingerprint and when it ran, to
/// skip redundant extraction on an unchanged window within the configured
/// dedup window.
#[derive(Debug, Clone, Default)]
pub struct DedupeGuard {
    last_fingerprint: Option<String>,
    last_run_at: Option<DateTime<Utc>>,
}

impl DedupeGuard {
    pub fn should_skip(&self, fingerprint: &str, now: DateTime<Utc>, window_ms: i64) -> bool {
        match (&self.last_fingerprint, self.last_run_at) {
            (Some(last), Some(at)) if last == fingerprint => {
                (now - at).num_milliseconds() < window_ms
            }
            _ => false,
        }
    }

    pub fn record(&mut self, fingerprint: String, now: DateTime<Utc>) {
        self.last_fingerprint = Some(fingerprint);
        self.last_run_at = Some(now);
    }
}

/// At-most-one-in-flight coordinator. Pure state; the async
/// suspend/notify wiring (a `tokio::sync::Notify` the orchestrator wakes on
/// completion) lives in the manager, which is the only caller that needs a
/// runtime.
#[derive(Debug, Clone, Default)]
pub struct ExtractionCoordinator {
    running: bool,
    rerun_pending: bool,
}

impl ExtractionCoordinator {
    /// A caller wants to extract now. Returns `true` if the caller should
    /// start immediately (and must call [`Self::mark_complete`] when done);
    /// `false` means another run is already in flight and this request has
    /// been coalesced into the pending flag.
    pub fn request(&mut self) -> bool {
        if self.running {
            self.rerun_pending = true;
            false
        } else {
            self.running = true;
            true
        }
    }

    /// The in-flight run finished. Returns `true` if a coalesced rerun
    /// should start immediately (the caller stays `running` and loops);
    /// `false` means the coordinator is now fully idle.
    pub fn mark_complete(&mut self) -> bool {
        if self.rerun_pending {
            self.rerun_pending = false;
            true
        } else {
            self.running = false;
            false
        }
    }

    pub fn is_idle(&self) -> bool {
        !self.running && !self.rerun_pending
    }
}

/// TTL knobs consulted by [`fact_to_item`] when deriving a default expiry.
/// Mirrors `engram_config::ExpirationConfig`, kept as a plain struct here so
/// this module stays independent of the config crate.
#[derive(Debug, Clone, Copy)]
pub struct ExpirationPolicy {
    pub speculative_ttl_days: i64,
    pub commitment_decay_days: i64,
}

impl Default for ExpirationPolicy {
    fn default() -> Self {
        Self { speculative_ttl_days: 30, commitment_decay_days: 90 }
    }
}

/// Build a [`MemoryItem`] from a validated fact draft.
pub fn fact_to_item(fact: &FactDraft, now: DateTime<Utc>, expiration: ExpirationPolicy) -> MemoryItem {
    let memory_kind = crate::classifier::classify(&fact.content, &fact.tags, fact.category);
    MemoryItem {
        id: Uuid::new_v4(),
        category: fact.category,
        created: now,
        updated: now,
        source: if fact.verbatim { "artifact".to_string() } else { "extraction".to_string() },
        confidence: fact.confidence,
        tags: fact.tags.clone(),
        entity_ref: fact.entity_ref.clone(),
        status: Status::Active,
        supersedes: None,
        lineage: Vec::new(),
        expires_at: MemoryItem::default_expiry_for(
            fact.confidence,
            fact.category,
            now,
            expiration.speculative_ttl_days,
            expiration.commitment_decay_days,
        ),
        memory_kind,
        embedding: None,
        extra: Default::default(),
        content: fact.content.clone(),
    }
}

/// Apply a [`ConsolidationResult`] to the store: write ADDs before
/// INVALIDATEs so no reader observes both "new" and "still-active old"
/// missing at once. Returns the ids of every
/// item added, merged, or updated, in decision order — the box builder and
/// index bridge key off this set rather than re-deriving it from the store.
pub fn apply_consolidation(
    store: &mut ContentStore,
    facts: &[FactDraft],
    result: &ConsolidationResult,
    now: DateTime<Utc>,
    expiration: ExpirationPolicy,
) -> anyhow::Result<Vec<Uuid>> {
    let mut deferred_invalidations = Vec::new();
    let mut touched = Vec::new();

    for decision in &result.decisions {
        let Some(fact) = facts.get(decision.fact_index) else { continue };
        match decision.action {
            ConsolidationAction::Add => {
                let item = fact_to_item(fact, now, expiration);
                touched.push(item.id);
                store.write_item(item)?;
            }
            ConsolidationAction::Merge => {
                let Some(existing_id) = decision.existing_id else { continue };
                let mut merged = fact_to_item(fact, now, expiration);
                if let Some(content) = &decision.merged_content {
                    merged.content = content.clone();
                }
                let mut lineage = vec![existing_id];
                if let Some(existing) = store.get(existing_id) {
                    lineage.extend(existing.lineage.iter().copied());
                }
                merged.supersedes = Some(existing_id);
                merged.lineage = lineage;

                if let crate::integrity::IntegrityDecision::Reject(reason) =
                    crate::integrity::evaluate_consolidation_write(store, merged.id, merged.supersedes, &merged.lineage)
                {
                    tracing::warn!(existing_id = %existing_id, reason, "rejecting MERGE decision, keeping existing item");
                    continue;
                }

                touched.push(merged.id);
                store.merge(merged, &[existing_id])?;
            }
            ConsolidationAction::Update => {
                let Some(existing_id) = decision.existing_id else { continue };
                if let Some(mut existing) = store.get(existing_id).cloned() {
                    if let crate::integrity::IntegrityDecision::Reject(reason) =
                        crate::integrity::check_lineage_resolves(store, &existing.lineage)
                    {
                        tracing::warn!(existing_id = %existing_id, reason, "rejecting UPDATE decision, keeping existing item");
                        continue;
                    }
                    existing.content = decision.merged_content.clone().unwrap_or(fact.content.clone());
                    existing.updated = now;
                    touched.push(existing.id);
                    store.write_item(existing)?;
                }
            }
            ConsolidationAction::Invalidate => {
                if let Some(existing_id) = decision.existing_id {
                    deferred_invalidations.push(existing_id);
                }
            }
            ConsolidationAction::Skip => {}
        }
    }

    for id in deferred_invalidations {
        store.set_status(id, Status::Archived)?;
    }

    Ok(touched)
}

/// Fall-open consolidation result used when the consolidation LLM call fails
/// or returns an unparseable reply: every fact is added as a new item rather
/// than the run being discarded — a collaborator failure degrades to the
/// cheapest safe behavior, not a dropped extraction).
pub fn default_add_all(facts: &[FactDraft]) -> ConsolidationResult {
    ConsolidationResult {
        decisions: (0..facts.len())
            .map(|fact_index| ConsolidationDecision {
                fact_index,
                action: ConsolidationAction::Add,
                existing_id: None,
                merged_content: None,
            })
            .collect(),
    }
}

/// Write `entities` drafts into the store, merging facts into any existing
/// entity file rather than overwriting it.
pub fn apply_entities(store: &mut ContentStore, drafts: &[EntityDraft]) -> anyhow::Result<()> {
    for draft in drafts {
        let normalized = Entity::normalize_name(&draft.name);
        let mut entity = store.read_entity(&normalized)?.unwrap_or(Entity {
            name: normalized.clone(),
            entity_type: draft.entity_type,
            facts: Vec::new(),
        });
        for fact in &draft.facts {
            if !entity.facts.iter().any(|f| f == fact) {
                entity.facts.push(fact.clone());
            }
        }
        store.write_entity(&entity)?;
    }
    Ok(())
}

/// Write `questions` drafts into the store as new, unresolved questions.
pub fn apply_questions(store: &mut ContentStore, drafts: &[QuestionDraft], now: DateTime<Utc>) -> anyhow::Result<()> {
    for draft in drafts {
        let question = Question {
            id: Uuid::new_v4(),
            question: draft.question.clone(),
            context: draft.context.clone(),
            priority: draft.priority,
            created: now,
            resolved: false,
            resolved_at: None,
        };
        store.write_question(&question)?;
    }
    Ok(())
}
