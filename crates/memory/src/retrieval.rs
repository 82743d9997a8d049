//! Retrieval planner: query expansion, namespace fan-out, hybrid scoring,
//! optional LLM rerank, verbatim artifacts, impression persistence.
//!
//! Candidates are scored reference-first to avoid cloning losers, combining
//! a semantic score from the Index with recency decay, access-count boost,
//! importance weighting, intent overlap, and a negative-feedback penalty.

use std::collections::{BTreeSet, HashMap};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::index::IndexHit;
use crate::schema::{Category, MemoryItem, Status};

const STOP_WORDS: &[&str] = &[
    "the", "and", "for", "was", "has", "are", "not", "this", "that", "with", "from", "have",
    "you", "can", "its", "will", "but", "they", "all", "been", "also", "into", "more", "than",
    "when", "who", "what", "how", "out", "our", "new", "now",
];

pub fn tokenize(text: &str, min_token_len: usize) -> BTreeSet<String> {
    text.split(|ch: char| !ch.is_alphanumeric())
        .filter(|t| t.len() >= min_token_len)
        .map(|t| t.to_lowercase())
        .filter(|t| !STOP_WORDS.contains(&t.as_str()))
        .collect()
}

/// Step 1: short-circuit on an empty/trivial query.
pub fn is_no_recall(query: &str) -> bool {
    query.trim().is_empty() || tokenize(query, 1).is_empty()
}

/// Step 2: up to `max_queries` strings, first entry always the original.
/// Remaining entries are growing prefix-combinations of the most salient
/// (longest, then alphabetically first) tokens.
pub fn expand_query(query: &str, max_queries: usize, min_token_len: usize) -> Vec<String> {
    let mut expansions = vec![query.to_string()];
    if max_queries <= 1 {
        return expansions;
    }
    let mut tokens: Vec<String> = tokenize(query, min_token_len).into_iter().collect();
    tokens.sort_by(|a, b| b.len().cmp(&a.len()).then(a.cmp(b)));

    for window in 1..tokens.len() {
        if expansions.len() >= max_queries {
            break;
        }
        let combo = tokens[..=window].join(" ");
        if !expansions.contains(&combo) {
            expansions.push(combo);
        }
    }
    expansions.truncate(max_queries);
    expansions
}

/// `s_recency = exp(-age_days / tau)`.
pub fn recency_score(now: DateTime<Utc>, created: DateTime<Utc>, tau_days: f64) -> f64 {
    let age_days = (now - created).num_seconds().max(0) as f64 / 86_400.0;
    (-age_days / tau_days.max(0.001)).exp()
}

/// `s_negative = min(cap, hits * per_hit)`.
pub fn negative_penalty(hits: u32, per_hit: f32, cap: f32) -> f32 {
    (hits as f32 * per_hit).min(cap)
}

/// Parsed intent behind a query: goal, action, and entity token sets, per
/// the replaceable-collaborator contract `parseIntent(query) -> {goalTokens,
/// actionTokens, entityTokens}`. This is a conservative keyword-based
/// default; a real deployment might swap in an LLM or NER-backed parser
/// without touching [`intent_boost`] or its callers.
#[derive(Debug, Clone, Default)]
pub struct Intent {
    pub goal_tokens: BTreeSet<String>,
    pub action_tokens: BTreeSet<String>,
    pub entity_tokens: BTreeSet<String>,
}

impl Intent {
    pub fn all_tokens(&self) -> BTreeSet<String> {
        self.goal_tokens.iter().chain(&self.action_tokens).chain(&self.entity_tokens).cloned().collect()
    }
}

const GOAL_WORDS: &[&str] = &["want", "need", "goal", "plan", "hope", "trying", "prefer", "wish"];
const ACTION_WORDS: &[&str] =
    &["deploy", "fix", "build", "write", "review", "merge", "ship", "debug", "refactor", "test", "migrate"];

/// Tokenize `query`, then bucket goal/action tokens against fixed word
/// lists and entity tokens against capitalized words in the original
/// (pre-lowercase) query text.
pub fn parse_intent(query: &str, min_token_len: usize) -> Intent {
    let tokens = tokenize(query, min_token_len);
    let goal_tokens = tokens.iter().filter(|t| GOAL_WORDS.contains(&t.as_str())).cloned().collect();
    let action_tokens = tokens.iter().filter(|t| ACTION_WORDS.contains(&t.as_str())).cloned().collect();
    let entity_tokens = query
        .split(|ch: char| !ch.is_alphanumeric())
        .filter(|t| t.len() >= min_token_len && t.chars().next().is_some_and(|c| c.is_uppercase()))
        .map(|t| t.to_lowercase())
        .collect();
    Intent { goal_tokens, action_tokens, entity_tokens }
}

/// Added when the parsed intent's tokens overlap the item's tags or
/// category slug.
pub fn intent_boost(intent: &Intent, item: &MemoryItem, boost: f32) -> f32 {
    let intent_tokens = intent.all_tokens();
    let category_slug = item.category.slug();
    let matches = intent_tokens.contains(category_slug)
        || item.tags.iter().any(|tag| intent_tokens.contains(&tag.to_lowercase()));
    if matches { boost } else { 0.0 }
}

pub struct ScoringWeights {
    pub recency_weight: f32,
    pub boost_access_count: f32,
    pub negative_penalty_per_hit: f32,
    pub negative_penalty_cap: f32,
    pub intent_routing_boost: f32,
    pub recency_tau_days: f64,
}

/// One scored candidate, reference-first to avoid cloning losers.
pub struct ScoredCandidate<'a> {
    pub item: &'a MemoryItem,
    pub score: f32,
}

/// Score every active candidate and return them sorted best-first.
/// `semantic_score` and `access_count` come from the Index/Store
/// respectively, `negative_hits` from the feedback counter.
pub fn score_candidates<'a>(
    candidates: &'a [MemoryItem],
    intent: &Intent,
    semantic_scores: &HashMap<Uuid, f32>,
    access_counts: &HashMap<Uuid, u32>,
    negative_hits: &HashMap<Uuid, u32>,
    now: DateTime<Utc>,
    weights: &ScoringWeights,
) -> Vec<ScoredCandidate<'a>> {
    let mut scored: Vec<ScoredCandidate<'a>> = candidates
        .iter()
        .filter(|item| item.status == Status::Active)
        .map(|item| {
            let semantic = semantic_scores.get(&item.id).copied().unwrap_or(0.0);
            let recency = recency_score(now, item.created, weights.recency_tau_days) as f32;
            let access = access_counts.get(&item.id).copied().unwrap_or(0);
            let importance = crate::scorer::classify_importance(&item.content, item.category, &item.tags, item.confidence);
            let importance_score = crate::scorer::importance_weight(importance);
            let intent_score = intent_boost(intent, item, weights.intent_routing_boost);
            let negative = negative_penalty(
                negative_hits.get(&item.id).copied().unwrap_or(0),
                weights.negative_penalty_per_hit,
                weights.negative_penalty_cap,
            );

            let score = semantic
                + weights.recency_weight * recency
                + weights.boost_access_count * (1.0 + access as f32).ln()
                + importance_score
                + intent_score
                - negative;

            ScoredCandidate { item, score }
        })
        .collect();

    scored.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
    scored
}

#[derive(Debug, Deserialize)]
struct RerankScoreEntry {
    id: String,
    score: f64,
}

#[derive(Debug, Deserialize)]
struct RerankResponse {
    scores: Vec<RerankScoreEntry>,
}

/// Apply the rerank LLM's JSON response to a candidate order.
/// Unknown ids are ignored; scored candidates sort by score desc with a
/// stable tie-break on original index; unscored candidates keep their
/// original relative order, appended after the scored ones. Any parse
/// failure falls open to the original `candidate_ids` order.
pub fn parse_rerank_response(raw: &str, candidate_ids: &[String]) -> Vec<String> {
    let Ok(parsed) = serde_json::from_str::<RerankResponse>(raw) else {
        return candidate_ids.to_vec();
    };

    let mut score_map: HashMap<&str, f64> = HashMap::new();
    for entry in &parsed.scores {
        score_map.insert(entry.id.as_str(), entry.score);
    }

    let mut scored: Vec<(usize, &String, f64)> = Vec::new();
    let mut unscored: Vec<(usize, &String)> = Vec::new();
    for (i, id) in candidate_ids.iter().enumerate() {
        match score_map.get(id.as_str()) {
            Some(score) => scored.push((i, id, *score)),
            None => unscored.push((i, id)),
        }
    }

    scored.sort_by(|a, b| b.2.partial_cmp(&a.2).unwrap_or(std::cmp::Ordering::Equal).then(a.0.cmp(&b.0)));
    unscored.sort_by_key(|(i, _)| *i);

    scored.into_iter().map(|(_, id, _)| id.clone()).chain(unscored.into_iter().map(|(_, id)| id.clone())).collect()
}

/// Stable rerank cache key: `lowercase(trim(query)) + "|" + ids.join(",")`.
pub fn rerank_cache_key(query: &str, ids: &[Uuid]) -> String {
    let joined = ids.iter().map(|id| id.to_string()).collect::<Vec<_>>().join(",");
    format!("{}|{}", query.trim().to_lowercase(), joined)
}

/// Snippet clamped to 400 chars for the rerank payload.
pub fn clamp_snippet(content: &str) -> &str {
    crate::schema::truncate_str(content, 400)
}

/// A verbatim artifact quote surfaced when source items remain active.
#[derive(Debug, Clone)]
pub struct VerbatimArtifact {
    pub source_item_id: Uuid,
    pub quote: String,
}

/// Collect up to `max_artifacts` artifact-sourced (`source == "artifact"`)
/// quotes whose source item is active, scanning up to `max_scan` entries of
/// `ranked` (a larger, already-ranked pool than the final recalled set) so a
/// first page dominated by stale sources doesn't starve the result — this is
/// the "fetch extra pages" behaviour, expressed as scanning further into an
/// already-fetched ranking rather than issuing more Index calls.
pub fn collect_verbatim_artifacts(ranked: &[MemoryItem], max_artifacts: usize, max_scan: usize) -> Vec<VerbatimArtifact> {
    ranked
        .iter()
        .take(max_scan)
        .filter(|item| item.status == Status::Active && item.source == "artifact")
        .take(max_artifacts)
        .map(|item| VerbatimArtifact { source_item_id: item.id, quote: item.content.clone() })
        .collect()
}

/// Share of `hits` whose backing item is not artifact-sourced. Hits with no
/// resolvable item in `candidates` count as non-artifact — an unknown
/// source should never itself trigger a top-up.
pub fn non_artifact_share(hits: &[IndexHit], candidates: &[MemoryItem]) -> f32 {
    if hits.is_empty() {
        return 1.0;
    }
    let non_artifact = hits
        .iter()
        .filter(|hit| {
            candidates
                .iter()
                .find(|item| item.id == hit.docid)
                .map(|item| item.source != "artifact")
                .unwrap_or(true)
        })
        .count();
    non_artifact as f32 / hits.len() as f32
}

/// One recorded impression. Raw query text is never stored — only its
/// SHA-256 and length.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecallImpression {
    pub session_key: Option<String>,
    pub recorded_at: DateTime<Utc>,
    pub query_hash: String,
    pub query_len: usize,
    pub memory_ids: Vec<Uuid>,
}

pub fn build_impression(session_key: Option<&str>, query: &str, memory_ids: Vec<Uuid>, now: DateTime<Utc>) -> RecallImpression {
    let mut hasher = Sha256::new();
    hasher.update(query.as_bytes());
    RecallImpression {
        session_key: session_key.map(str::to_string),
        recorded_at: now,
        query_hash: format!("{:x}", hasher.finalize()),
        query_len: query.len(),
        memory_ids,
    }
}

/// Bounded in-memory rolling window of the most recent impressions,
/// mirrored to `last_recall.json`.
pub fn push_bounded(impressions: &mut Vec<RecallImpression>, impression: RecallImpression, cap: usize) {
    impressions.push(impression);
    if impressions.len() > cap {
        let overflow = impressions.len() - cap;
        impressions.drain(0..overflow);
    }
}

/// Feedback counter for "not useful" marks, bounded notes list per id.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NegativeExampleCounter {
    pub hits: u32,
    pub notes: Vec<String>,
}

pub fn record_negative_feedback(counters: &mut HashMap<Uuid, NegativeExampleCounter>, id: Uuid, note: Option<String>) {
    let counter = counters.entry(id).or_default();
    counter.hits += 1;
    if let Some(note) = note {
        counter.notes.push(note);
        let cap = 20;
        if counter.notes.len() > cap {
            let overflow = counter.notes.len() - cap;
            counter.notes.drain(0..overflow);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::MemoryKind;

    fn sample_item(category: Category, tags: Vec<&str>, created: DateTime<Utc>) -> MemoryItem {
        MemoryItem {
            id: Uuid::new_v4(),
            category,
            created,
            updated: created,
            source: "extraction".to_string(),
            confidence: 0.9,
            tags: tags.into_iter().map(String::from).collect(),
            entity_ref: None,
            status: Status::Active,
            supersedes: None,
            lineage: Vec::new(),
            expires_at: None,
            memory_kind: MemoryKind::Note,
            embedding: None,
            extra: Default::default(),
            content: "Prefers dark mode in every editor".to_string(),
        }
    }

    #[test]
    fn empty_query_short_circuits() {
        assert!(is_no_recall("   "));
        assert!(!is_no_recall("editor preference"));
    }

    #[test]
    fn expand_query_always_keeps_original_first() {
        let expansions = expand_query("rust async runtime performance", 3, 3);
        assert_eq!(expansions[0], "rust async runtime performance");
        assert!(expansions.len() <= 3);
    }

    #[test]
    fn recency_score_decays_with_age() {
        let now = Utc::now();
        let fresh = recency_score(now, now, 14.0);
        let old = recency_score(now, now - chrono::Duration::days(30), 14.0);
        assert!(fresh > old);
    }

    #[test]
    fn negative_penalty_caps_at_configured_value() {
        assert_eq!(negative_penalty(100, 0.05, 0.5), 0.5);
        assert!((negative_penalty(2, 0.05, 0.5) - 0.1).abs() < 1e-6);
    }

    #[test]
    fn intent_boost_applies_on_tag_overlap() {
        let item = sample_item(Category::Preference, vec!["editor"], Utc::now());
        let intent = Intent { entity_tokens: ["editor".to_string()].into_iter().collect(), ..Default::default() };
        assert_eq!(intent_boost(&intent, &item, 0.15), 0.15);
        let unrelated = Intent { entity_tokens: ["cooking".to_string()].into_iter().collect(), ..Default::default() };
        assert_eq!(intent_boost(&unrelated, &item, 0.15), 0.0);
    }

    #[test]
    fn parse_intent_buckets_goal_action_entity_tokens() {
        let intent = parse_intent("I want to deploy the Payment service", 2);
        assert!(intent.goal_tokens.contains("want"));
        assert!(intent.action_tokens.contains("deploy"));
        assert!(intent.entity_tokens.contains("payment"));
    }

    #[test]
    fn rerank_parse_matches_worked_example() {
        let raw = r#"{"scores":[{"id":"a","score":90},{"id":"missing","score":100},{"id":"b","score":10}]}"#;
        let candidates = vec!["a".to_string(), "b".to_string(), "c".to_string()];
        let order = parse_rerank_response(raw, &candidates);
        assert_eq!(order, vec!["a".to_string(), "b".to_string(), "c".to_string()]);
    }

    #[test]
    fn rerank_parse_failure_falls_open() {
        let candidates = vec!["a".to_string(), "b".to_string()];
        let order = parse_rerank_response("not json", &candidates);
        assert_eq!(order, candidates);
    }

    #[test]
    fn scoring_prefers_recent_high_importance_active_items() {
        let now = Utc::now();
        let recent = sample_item(Category::Correction, vec![], now);
        let stale = sample_item(Category::Fact, vec![], now - chrono::Duration::days(90));
        let candidates = vec![recent, stale];
        let weights = ScoringWeights {
            recency_weight: 0.2,
            boost_access_count: 0.1,
            negative_penalty_per_hit: 0.05,
            negative_penalty_cap: 0.5,
            intent_routing_boost: 0.15,
            recency_tau_days: 14.0,
        };
        let scored = score_candidates(&candidates, &Intent::default(), &HashMap::new(), &HashMap::new(), &HashMap::new(), now, &weights);
        assert_eq!(scored[0].item.category, Category::Correction);
    }

    #[test]
    fn bounded_impressions_drop_oldest() {
        let mut impressions = Vec::new();
        for i in 0..5 {
            push_bounded(&mut impressions, build_impression(None, &format!("q{i}"), vec![], Utc::now()), 3);
        }
        assert_eq!(impressions.len(), 3);
        assert_eq!(impressions[0].query_hash, build_impression(None, "q2", vec![], Utc::now()).query_hash);
    }

    #[test]
    fn negative_feedback_notes_are_bounded_to_twenty() {
        let mut counters = HashMap::new();
        let id = Uuid::new_v4();
        for i in 0..25 {
            record_negative_feedback(&mut counters, id, Some(format!("note {i}")));
        }
        let counter = &counters[&id];
        assert_eq!(counter.hits, 25);
        assert_eq!(counter.notes.len(), 20);
        assert_eq!(counter.notes[0], "note 5");
    }

    #[test]
    fn collect_verbatim_artifacts_filters_by_source_not_category() {
        let mut artifact = sample_item(Category::Fact, vec![], Utc::now());
        artifact.source = "artifact".to_string();
        let mut extracted_fact = sample_item(Category::Fact, vec![], Utc::now());
        extracted_fact.source = "extraction".to_string();

        let found = collect_verbatim_artifacts(&[artifact.clone(), extracted_fact], 5, 10);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].source_item_id, artifact.id);
    }

    #[test]
    fn collect_verbatim_artifacts_skips_inactive_and_respects_scan_cap() {
        let mut stale = sample_item(Category::Fact, vec![], Utc::now());
        stale.source = "artifact".to_string();
        stale.status = Status::Archived;
        let mut active = sample_item(Category::Fact, vec![], Utc::now());
        active.source = "artifact".to_string();

        let ranked = vec![stale, active.clone()];
        assert!(collect_verbatim_artifacts(&ranked, 5, 1).is_empty(), "scan cap of 1 must not reach the second entry");
        let found = collect_verbatim_artifacts(&ranked, 5, 10);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].source_item_id, active.id);
    }

    #[test]
    fn non_artifact_share_counts_artifact_sourced_hits() {
        let mut artifact = sample_item(Category::Fact, vec![], Utc::now());
        artifact.source = "artifact".to_string();
        let fact = sample_item(Category::Fact, vec![], Utc::now());
        let candidates = vec![artifact.clone(), fact.clone()];

        let hits = vec![
            IndexHit { docid: artifact.id, path: String::new(), snippet: String::new(), score: 1.0 },
            IndexHit { docid: fact.id, path: String::new(), snippet: String::new(), score: 1.0 },
        ];
        assert_eq!(non_artifact_share(&hits, &candidates), 0.5);
    }

    #[test]
    fn non_artifact_share_treats_unresolvable_hits_as_non_artifact() {
        let hits = vec![IndexHit { docid: Uuid::new_v4(), path: String::new(), snippet: String::new(), score: 1.0 }];
        assert_eq!(non_artifact_share(&hits, &[]), 1.0);
    }
}
