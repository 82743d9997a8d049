//! The Profile document: a single markdown document of durable behavioral
//! observations about the user, grown by append and periodically compacted
//! by the LLM under a size budget.

use crate::store::ContentStore;

pub const PROFILE_DOC_NAME: &str = "profile";

pub fn seed_profile() -> String {
    "# Profile\n\n_No durable observations yet._\n".to_string()
}

/// Read the current profile body, seeding it on first read.
pub fn read_profile(store: &mut ContentStore) -> anyhow::Result<String> {
    match store.read_document(PROFILE_DOC_NAME)? {
        Some(body) => Ok(body),
        None => {
            let seed = seed_profile();
            store.write_document(PROFILE_DOC_NAME, &seed)?;
            Ok(seed)
        }
    }
}

/// Append the extraction pipeline's `profileUpdates` strings, one bullet
/// each, deduplicating updates already present verbatim.
pub fn append_updates(
    store: &mut ContentStore,
    byte_budget: usize,
    updates: &[String],
) -> anyhow::Result<()> {
    if updates.is_empty() {
        return Ok(());
    }
    let mut body = read_profile(store)?;
    if body.contains("_No durable observations yet._") {
        body = body.replace("_No durable observations yet._\n", "");
    }
    for update in updates {
        let update = update.trim();
        if update.is_empty() || body.contains(update) {
            continue;
        }
        body.push_str(&format!("- {update}\n"));
    }
    let rotated = store.rotate_if_over_budget(PROFILE_DOC_NAME, &body, byte_budget)?;
    store.write_document(PROFILE_DOC_NAME, &rotated)
}

pub fn needs_compaction(store: &mut ContentStore, byte_budget: usize) -> anyhow::Result<bool> {
    Ok(read_profile(store)?.len() > byte_budget)
}

/// Replace the document body with an LLM-compacted version. Returns the
/// number of characters removed.
pub fn apply_compaction(store: &mut ContentStore, compacted_body: String) -> anyhow::Result<usize> {
    let before = read_profile(store)?.len();
    store.write_document(PROFILE_DOC_NAME, &compacted_body)?;
    Ok(before.saturating_sub(compacted_body.len()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn read_profile_seeds_on_first_read() {
        let dir = tempdir().unwrap();
        let mut store = ContentStore::open(dir.path()).unwrap();
        let body = read_profile(&mut store).unwrap();
        assert!(body.contains("No durable observations"));
    }

    #[test]
    fn append_updates_replaces_empty_placeholder() {
        let dir = tempdir().unwrap();
        let mut store = ContentStore::open(dir.path()).unwrap();
        append_updates(&mut store, 8_000, &["Prefers dark mode".to_string()]).unwrap();
        let body = read_profile(&mut store).unwrap();
        assert!(!body.contains("No durable observations"));
        assert!(body.contains("Prefers dark mode"));
    }

    #[test]
    fn append_updates_deduplicates_verbatim() {
        let dir = tempdir().unwrap();
        let mut store = ContentStore::open(dir.path()).unwrap();
        append_updates(&mut store, 8_000, &["Prefers dark mode".to_string()]).unwrap();
        append_updates(&mut store, 8_000, &["Prefers dark mode".to_string()]).unwrap();
        let body = read_profile(&mut store).unwrap();
        assert_eq!(body.matches("Prefers dark mode").count(), 1);
    }

    #[test]
    fn needs_compaction_past_budget() {
        let dir = tempdir().unwrap();
        let mut store = ContentStore::open(dir.path()).unwrap();
        let many: Vec<String> = (0..300).map(|i| format!("observation number {i}")).collect();
        append_updates(&mut store, 1_000_000, &many).unwrap();
        assert!(needs_compaction(&mut store, 200).unwrap());
    }
}
