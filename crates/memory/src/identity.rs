//! The IDENTITY document: a single markdown file of agent self-reflections,
//! grown by append and periodically compacted by the LLM under a size
//! budget.

use chrono::Utc;

use crate::store::ContentStore;

pub const IDENTITY_DOC_NAME: &str = "IDENTITY";

/// Default body seeded into a fresh memory root before any reflections have
/// been appended.
pub fn seed_identity() -> String {
    "# Identity\n\n\
     I am a long-term memory subsystem for a conversational agent. I observe \
     dialogue, extract durable facts and preferences, and surface them back \
     when relevant. I favor precision over speculation: an uncertain memory \
     is tagged as such rather than stated flatly. I prefer to ask a follow-up \
     question over inventing a detail.\n"
        .to_string()
}

/// Read the current IDENTITY body, seeding it on first read.
pub fn read_identity(store: &mut ContentStore) -> anyhow::Result<String> {
    match store.read_document(IDENTITY_DOC_NAME)? {
        Some(body) => Ok(body),
        None => {
            let seed = seed_identity();
            store.write_document(IDENTITY_DOC_NAME, &seed)?;
            Ok(seed)
        }
    }
}

/// Append one self-reflection line from a completed extraction run.
pub fn append_reflection(
    store: &mut ContentStore,
    byte_budget: usize,
    reflection: &str,
) -> anyhow::Result<()> {
    let reflection = reflection.trim();
    if reflection.is_empty() {
        return Ok(());
    }
    let mut body = read_identity(store)?;
    body.push_str(&format!(
        "\n- _{}_: {}\n",
        Utc::now().format("%Y-%m-%d"),
        reflection
    ));
    let rotated = store.rotate_if_over_budget(IDENTITY_DOC_NAME, &body, byte_budget)?;
    store.write_document(IDENTITY_DOC_NAME, &rotated)
}

/// Whether the document has grown past its byte budget and should be
/// compacted by the LLM on the next extraction idle point.
pub fn needs_compaction(store: &mut ContentStore, byte_budget: usize) -> anyhow::Result<bool> {
    Ok(read_identity(store)?.len() > byte_budget)
}

/// Replace the document body with an LLM-compacted version. Returns the
/// number of characters removed.
pub fn apply_compaction(
    store: &mut ContentStore,
    compacted_body: String,
) -> anyhow::Result<usize> {
    let before = read_identity(store)?.len();
    store.write_document(IDENTITY_DOC_NAME, &compacted_body)?;
    Ok(before.saturating_sub(compacted_body.len()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn read_identity_seeds_on_first_read() {
        let dir = tempdir().unwrap();
        let mut store = ContentStore::open(dir.path()).unwrap();
        let body = read_identity(&mut store).unwrap();
        assert!(body.contains("# Identity"));
    }

    #[test]
    fn append_reflection_grows_the_document() {
        let dir = tempdir().unwrap();
        let mut store = ContentStore::open(dir.path()).unwrap();
        let before = read_identity(&mut store).unwrap();
        append_reflection(&mut store, 16_000, "Learned the user prefers terse replies").unwrap();
        let after = read_identity(&mut store).unwrap();
        assert!(after.len() > before.len());
        assert!(after.contains("terse replies"));
    }

    #[test]
    fn empty_reflection_is_a_no_op() {
        let dir = tempdir().unwrap();
        let mut store = ContentStore::open(dir.path()).unwrap();
        let before = read_identity(&mut store).unwrap();
        append_reflection(&mut store, 16_000, "   ").unwrap();
        let after = read_identity(&mut store).unwrap();
        assert_eq!(before, after);
    }

    #[test]
    fn needs_compaction_past_budget() {
        let dir = tempdir().unwrap();
        let mut store = ContentStore::open(dir.path()).unwrap();
        for i in 0..200 {
            append_reflection(&mut store, 1_000_000, &format!("reflection number {i}")).unwrap();
        }
        assert!(needs_compaction(&mut store, 200).unwrap());
    }

    #[test]
    fn apply_compaction_shrinks_document() {
        let dir = tempdir().unwrap();
        let mut store = ContentStore::open(dir.path()).unwrap();
        for i in 0..50 {
            append_reflection(&mut store, 1_000_000, &format!("reflection number {i}")).unwrap();
        }
        let removed = apply_compaction(&mut store, "# Identity\n\ncompacted summary\n".to_string()).unwrap();
        assert!(removed > 0);
    }
}
