//! Memory boxes and trace weaving: sliding topic windows over extraction
//! events, sealed on topic shift / time gap / overflow, and stitched across
//! sessions via Jaccard-matched trace identifiers.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

/// Why an open box was sealed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SealReason {
    TopicShift,
    TimeGap,
    MaxMemories,
    Forced,
    Flush,
}

impl SealReason {
    pub fn slug(&self) -> &'static str {
        match self {
            Self::TopicShift => "topic_shift",
            Self::TimeGap => "time_gap",
            Self::MaxMemories => "max_memories",
            Self::Forced => "forced",
            Self::Flush => "flush",
        }
    }
}

/// A sealed box, persisted at `boxes/<YYYY-MM-DD>/<id>.md`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SealedBox {
    pub id: Uuid,
    pub created_at: DateTime<Utc>,
    pub sealed_at: DateTime<Utc>,
    pub seal_reason: SealReason,
    pub topics: Vec<String>,
    pub memory_ids: Vec<Uuid>,
    pub trace_id: Option<String>,
}

/// In-memory accumulator, persisted to `state/open-box.json`. At most one
/// per memory root — owned exclusively by the box builder.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenBox {
    pub id: Uuid,
    pub created_at: DateTime<Utc>,
    pub last_activity_at: DateTime<Utc>,
    pub topics: Vec<String>,
    pub memory_ids: Vec<Uuid>,
}

impl OpenBox {
    fn new(now: DateTime<Utc>, topics: Vec<String>, memory_ids: Vec<Uuid>) -> Self {
        Self { id: Uuid::new_v4(), created_at: now, last_activity_at: now, topics, memory_ids }
    }

    fn topic_set(&self) -> HashSet<String> {
        self.topics.iter().map(|t| t.to_lowercase()).collect()
    }
}

/// One extraction event the box builder observes: the topics and item ids it
/// produced, at a point in time.
pub struct BoxEvent {
    pub topics: Vec<String>,
    pub memory_ids: Vec<Uuid>,
    pub timestamp: DateTime<Utc>,
}

/// Jaccard similarity over lowercased topic sets. `J(∅, ·) = 0`.
pub fn jaccard(a: &HashSet<String>, b: &HashSet<String>) -> f64 {
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    let intersection = a.intersection(b).count();
    let union = a.union(b).count();
    if union == 0 {
        0.0
    } else {
        intersection as f64 / union as f64
    }
}

fn lower_set(topics: &[String]) -> HashSet<String> {
    topics.iter().map(|t| t.to_lowercase()).collect()
}

pub struct BoxConfig {
    pub topic_shift_threshold: f64,
    pub time_gap: chrono::Duration,
    pub max_memories: usize,
}

/// Outcome of feeding one event to the box builder.
pub enum BoxOutcome {
    /// No seal occurred; the open box absorbed the event.
    Accumulated(OpenBox),
    /// The previously-open box was sealed; `next` is the freshly opened
    /// replacement (which may itself already include the triggering event's
    /// ids, per the `max_memories` overflow rule).
    Sealed { sealed: SealedBox, next: OpenBox },
}

/// Apply the seal-decision state machine to one extraction event.
/// `current` is `None` when no box is open yet.
pub fn apply_event(current: Option<OpenBox>, event: BoxEvent, config: &BoxConfig) -> BoxOutcome {
    let Some(mut open) = current else {
        let mut fresh = OpenBox::new(event.timestamp, event.topics, event.memory_ids);
        if fresh.memory_ids.len() > config.max_memories {
            let sealed = seal(&fresh, event.timestamp, SealReason::MaxMemories);
            fresh = OpenBox::new(event.timestamp, Vec::new(), Vec::new());
            return BoxOutcome::Sealed { sealed, next: fresh };
        }
        return BoxOutcome::Accumulated(fresh);
    };

    if event.timestamp - open.last_activity_at >= config.time_gap {
        let sealed = seal(&open, event.timestamp, SealReason::TimeGap);
        let next = OpenBox::new(event.timestamp, event.topics, event.memory_ids);
        return BoxOutcome::Sealed { sealed, next };
    }

    let new_topics = lower_set(&event.topics);
    if !new_topics.is_empty() && 1.0 - jaccard(&open.topic_set(), &new_topics) > config.topic_shift_threshold {
        let sealed = seal(&open, event.timestamp, SealReason::TopicShift);
        let next = OpenBox::new(event.timestamp, event.topics, event.memory_ids);
        return BoxOutcome::Sealed { sealed, next };
    }

    let mut combined_ids: HashSet<Uuid> = open.memory_ids.iter().copied().collect();
    combined_ids.extend(event.memory_ids.iter().copied());
    if combined_ids.len() > config.max_memories {
        let sealed = seal_with_extra(&open, &event, event.timestamp, SealReason::MaxMemories);
        let next = OpenBox::new(event.timestamp, Vec::new(), Vec::new());
        return BoxOutcome::Sealed { sealed, next };
    }

    open.topics = merge_topics(&open.topics, &event.topics);
    for id in event.memory_ids {
        if !open.memory_ids.contains(&id) {
            open.memory_ids.push(id);
        }
    }
    open.last_activity_at = event.timestamp;
    BoxOutcome::Accumulated(open)
}

fn merge_topics(existing: &[String], incoming: &[String]) -> Vec<String> {
    let mut seen: HashSet<String> = existing.iter().map(|t| t.to_lowercase()).collect();
    let mut merged = existing.to_vec();
    for topic in incoming {
        let lower = topic.to_lowercase();
        if seen.insert(lower) {
            merged.push(topic.clone());
        }
    }
    merged
}

fn seal(open: &OpenBox, sealed_at: DateTime<Utc>, reason: SealReason) -> SealedBox {
    SealedBox {
        id: open.id,
        created_at: open.created_at,
        sealed_at,
        seal_reason: reason,
        topics: open.topics.clone(),
        memory_ids: open.memory_ids.clone(),
        trace_id: None,
    }
}

/// Seal including the triggering event's own ids/topics merged in, for the
/// "overflow on union" branch of the max_memories rule.
fn seal_with_extra(open: &OpenBox, event: &BoxEvent, sealed_at: DateTime<Utc>, reason: SealReason) -> SealedBox {
    let mut memory_ids = open.memory_ids.clone();
    for id in &event.memory_ids {
        if !memory_ids.contains(id) {
            memory_ids.push(*id);
        }
    }
    SealedBox {
        id: open.id,
        created_at: open.created_at,
        sealed_at,
        seal_reason: reason,
        topics: merge_topics(&open.topics, &event.topics),
        memory_ids,
        trace_id: None,
    }
}

/// `traces: trace-id -> [box-id]`, `boxToTrace: box-id -> trace-id`,
/// `traceTopics: trace-id -> canonical topic set`. Persisted to
/// `state/traces.json`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TraceIndex {
    pub traces: HashMap<String, Vec<Uuid>>,
    pub box_to_trace: HashMap<Uuid, String>,
    pub trace_topics: HashMap<String, Vec<String>>,
}

impl TraceIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Assign (reusing or minting) a trace id for a newly sealed box, given
    /// the overlap threshold for reuse.
    pub fn assign_trace(&mut self, sealed_box: &SealedBox, overlap_threshold: f64) -> String {
        let new_topics = lower_set(&sealed_box.topics);

        let mut best: Option<(String, f64)> = None;
        for (trace_id, topics) in &self.trace_topics {
            let existing_set: HashSet<String> = topics.iter().map(|t| t.to_lowercase()).collect();
            let overlap = jaccard(&existing_set, &new_topics);
            if best.as_ref().map(|(_, score)| overlap > *score).unwrap_or(true) {
                best = Some((trace_id.clone(), overlap));
            }
        }

        let trace_id = match best {
            Some((id, score)) if score >= overlap_threshold => id,
            _ => mint_trace_id(&sealed_box.topics),
        };

        self.traces.entry(trace_id.clone()).or_default().push(sealed_box.id);
        self.box_to_trace.insert(sealed_box.id, trace_id.clone());
        let merged = merge_topics(self.trace_topics.get(&trace_id).cloned().unwrap_or_default().as_slice(), &sealed_box.topics);
        self.trace_topics.insert(trace_id.clone(), merged);
        trace_id
    }
}

fn mint_trace_id(topics: &[String]) -> String {
    let mut sorted: Vec<String> = topics.iter().map(|t| t.to_lowercase()).collect();
    sorted.sort();
    let mut hasher = Sha256::new();
    hasher.update(sorted.join(",").as_bytes());
    let digest = format!("{:x}", hasher.finalize());
    format!("trace-{}", &digest[..8])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ts(offset_minutes: i64) -> DateTime<Utc> {
        Utc::now() + chrono::Duration::minutes(offset_minutes)
    }

    fn config() -> BoxConfig {
        BoxConfig {
            topic_shift_threshold: 0.35,
            time_gap: chrono::Duration::minutes(30),
            max_memories: 12,
        }
    }

    #[test]
    fn jaccard_of_empty_sets_is_zero() {
        let empty = HashSet::new();
        let other: HashSet<String> = ["a".to_string()].into_iter().collect();
        assert_eq!(jaccard(&empty, &other), 0.0);
    }

    #[test]
    fn jaccard_identical_sets_is_one() {
        let a: HashSet<String> = ["x".to_string(), "y".to_string()].into_iter().collect();
        assert_eq!(jaccard(&a, &a.clone()), 1.0);
    }

    #[test]
    fn first_event_opens_a_box() {
        let event = BoxEvent {
            topics: vec!["rust".to_string()],
            memory_ids: vec![Uuid::new_v4()],
            timestamp: ts(0),
        };
        match apply_event(None, event, &config()) {
            BoxOutcome::Accumulated(open) => assert_eq!(open.topics, vec!["rust".to_string()]),
            BoxOutcome::Sealed { .. } => panic!("expected accumulation"),
        }
    }

    #[test]
    fn time_gap_seals_and_opens_fresh() {
        let open = OpenBox::new(ts(0), vec!["rust".to_string()], vec![Uuid::new_v4()]);
        let event = BoxEvent {
            topics: vec!["rust".to_string()],
            memory_ids: vec![Uuid::new_v4()],
            timestamp: ts(45),
        };
        match apply_event(Some(open), event, &config()) {
            BoxOutcome::Sealed { sealed, next } => {
                assert_eq!(sealed.seal_reason, SealReason::TimeGap);
                assert_eq!(next.topics, vec!["rust".to_string()]);
            }
            BoxOutcome::Accumulated(_) => panic!("expected a seal"),
        }
    }

    #[test]
    fn topic_shift_seals_on_low_overlap() {
        let open = OpenBox::new(ts(0), vec!["rust".to_string(), "cargo".to_string()], vec![Uuid::new_v4()]);
        let event = BoxEvent {
            topics: vec!["cooking".to_string(), "recipes".to_string()],
            memory_ids: vec![Uuid::new_v4()],
            timestamp: ts(5),
        };
        match apply_event(Some(open), event, &config()) {
            BoxOutcome::Sealed { sealed, .. } => assert_eq!(sealed.seal_reason, SealReason::TopicShift),
            BoxOutcome::Accumulated(_) => panic!("expected a seal"),
        }
    }

    #[test]
    fn max_memories_seals_on_overflow() {
        let ids: Vec<Uuid> = (0..12).map(|_| Uuid::new_v4()).collect();
        let open = OpenBox::new(ts(0), vec!["rust".to_string()], ids);
        let event = BoxEvent {
            topics: vec!["rust".to_string()],
            memory_ids: vec![Uuid::new_v4()],
            timestamp: ts(1),
        };
        match apply_event(Some(open), event, &config()) {
            BoxOutcome::Sealed { sealed, .. } => {
                assert_eq!(sealed.seal_reason, SealReason::MaxMemories);
                assert_eq!(sealed.memory_ids.len(), 13);
            }
            BoxOutcome::Accumulated(_) => panic!("expected a seal"),
        }
    }

    #[test]
    fn matching_topics_accumulate_without_sealing() {
        let open = OpenBox::new(ts(0), vec!["rust".to_string()], vec![Uuid::new_v4()]);
        let event = BoxEvent {
            topics: vec!["rust".to_string()],
            memory_ids: vec![Uuid::new_v4()],
            timestamp: ts(5),
        };
        match apply_event(Some(open), event, &config()) {
            BoxOutcome::Accumulated(open) => assert_eq!(open.memory_ids.len(), 2),
            BoxOutcome::Sealed { .. } => panic!("expected accumulation"),
        }
    }

    #[test]
    fn trace_reuses_on_high_overlap_else_mints() {
        let mut index = TraceIndex::new();
        let first = SealedBox {
            id: Uuid::new_v4(),
            created_at: ts(0),
            sealed_at: ts(1),
            seal_reason: SealReason::TimeGap,
            topics: vec!["rust".to_string(), "async".to_string()],
            memory_ids: vec![],
            trace_id: None,
        };
        let trace_a = index.assign_trace(&first, 0.4);

        let similar = SealedBox {
            id: Uuid::new_v4(),
            created_at: ts(10),
            sealed_at: ts(11),
            seal_reason: SealReason::TimeGap,
            topics: vec!["rust".to_string(), "async".to_string()],
            memory_ids: vec![],
            trace_id: None,
        };
        let trace_b = index.assign_trace(&similar, 0.4);
        assert_eq!(trace_a, trace_b);

        let unrelated = SealedBox {
            id: Uuid::new_v4(),
            created_at: ts(20),
            sealed_at: ts(21),
            seal_reason: SealReason::TimeGap,
            topics: vec!["cooking".to_string()],
            memory_ids: vec![],
            trace_id: None,
        };
        let trace_c = index.assign_trace(&unrelated, 0.4);
        assert_ne!(trace_a, trace_c);
    }
}
