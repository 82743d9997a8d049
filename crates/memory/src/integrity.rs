//! Integrity checks applied before a consolidation decision is written to
//! the store: no supersede cycles, and every lineage id must resolve to a
//! stored item.

use std::collections::HashSet;

use uuid::Uuid;

use crate::store::ContentStore;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IntegrityDecision {
    Accept,
    Reject(String),
}

/// Verify that `new_id -> supersedes` would not introduce a cycle in the
/// supersede DAG, by walking the existing supersede chain starting at
/// `supersedes` and checking `new_id` never reappears.
pub fn check_supersede_acyclic(
    store: &ContentStore,
    new_id: Uuid,
    supersedes: Option<Uuid>,
) -> IntegrityDecision {
    let Some(mut cursor) = supersedes else {
        return IntegrityDecision::Accept;
    };
    let mut seen = HashSet::new();
    loop {
        if cursor == new_id {
            return IntegrityDecision::Reject(
                "supersede chain would cycle back to the new item".to_string(),
            );
        }
        if !seen.insert(cursor) {
            return IntegrityDecision::Reject(
                "existing supersede chain already contains a cycle".to_string(),
            );
        }
        match store.get(cursor).and_then(|item| item.supersedes) {
            Some(next) => cursor = next,
            None => return IntegrityDecision::Accept,
        }
    }
}

/// Verify every id in `lineage` resolves to an existing (active, superseded,
/// or archived) item in the store.
pub fn check_lineage_resolves(store: &ContentStore, lineage: &[Uuid]) -> IntegrityDecision {
    for id in lineage {
        if store.get(*id).is_none() {
            return IntegrityDecision::Reject(format!("lineage id {id} does not resolve to a stored item"));
        }
    }
    IntegrityDecision::Accept
}

/// Combined check applied before a MERGE/UPDATE consolidation decision is
/// written: reject the decision and keep the existing item on any failure.
pub fn evaluate_consolidation_write(
    store: &ContentStore,
    new_id: Uuid,
    supersedes: Option<Uuid>,
    lineage: &[Uuid],
) -> IntegrityDecision {
    if let reject @ IntegrityDecision::Reject(_) = check_supersede_acyclic(store, new_id, supersedes) {
        return reject;
    }
    check_lineage_resolves(store, lineage)
}
