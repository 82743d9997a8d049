//! The Index Bridge: a debounced sync of on-disk items into the external
//! hybrid-search *Index* collaborator, an embedding-based fallback store
//! for when that collaborator is unavailable, and the rerank cache.
//!
//! The real hybrid-search service this talks to lives outside this crate;
//! what's here is the `search`/`update`/`embed` contract, a redb-backed
//! local fallback with an LRU rerank cache, and a debounce policy so a
//! write burst doesn't fire one sync per item.

use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use async_trait::async_trait;
use lru::LruCache;
use redb::{Database, ReadableTable, ReadableTableMetadata, TableDefinition};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::schema::MemoryItem;

/// One hit returned by the external Index's `search`.
#[derive(Debug, Clone)]
pub struct IndexHit {
    pub docid: Uuid,
    pub path: String,
    pub snippet: String,
    pub score: f32,
}

/// The external Index collaborator contract: `search` plus best-effort
/// `update`/`embed` the core debounces. Implementations talking to a real
/// hybrid-search service live outside this crate; [`NullIndex`] and
/// [`EmbeddingFallbackIndex`] are the only members here.
#[async_trait]
pub trait Index: Send + Sync {
    async fn search(&self, query: &str, collection: Option<&str>, max_results: usize) -> Vec<IndexHit>;
    async fn update(&self, items: &[MemoryItem]);
    async fn embed(&self, collection: &str);
}

/// An Index that is always unavailable. Retrieval treats its empty results
/// the same as a transient-collaborator failure — fall through to whatever
/// local fallback is configured.
pub struct NullIndex;

#[async_trait]
impl Index for NullIndex {
    async fn search(&self, _query: &str, _collection: Option<&str>, _max_results: usize) -> Vec<IndexHit> {
        Vec::new()
    }

    async fn update(&self, _items: &[MemoryItem]) {}

    async fn embed(&self, _collection: &str) {}
}

const VECTORS_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("vectors");

/// Local embedding store used as a fallback when the external Index is
/// unavailable. Cosine-similarity search over bincode-serialized `Vec<f32>`
/// vectors keyed by item id, backed by a single redb table.
pub struct EmbeddingFallbackIndex {
    db: Database,
    path: PathBuf,
}

impl EmbeddingFallbackIndex {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let db = Database::create(&path)
            .with_context(|| format!("opening embedding fallback index at {}", path.display()))?;
        {
            let tx = db.begin_write()?;
            tx.open_table(VECTORS_TABLE)?;
            tx.commit()?;
        }
        Ok(Self { db, path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn upsert(&self, id: Uuid, embedding: &[f32]) -> Result<()> {
        let bytes = bincode::serialize(embedding)?;
        let tx = self.db.begin_write()?;
        {
            let mut tbl = tx.open_table(VECTORS_TABLE)?;
            tbl.insert(id.to_string().as_str(), bytes.as_slice())?;
        }
        tx.commit()?;
        Ok(())
    }

    pub fn len(&self) -> Result<usize> {
        let tx = self.db.begin_read()?;
        let tbl = tx.open_table(VECTORS_TABLE)?;
        Ok(tbl.len()? as usize)
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Cosine-similarity search over every stored vector. `O(n)`; adequate
    /// as a fallback path, not a substitute for the real Index at scale.
    pub fn search_by_vector(&self, query: &[f32], max_results: usize) -> Result<Vec<(Uuid, f32)>> {
        let tx = self.db.begin_read()?;
        let tbl = tx.open_table(VECTORS_TABLE)?;
        let mut scored = Vec::new();
        for row in tbl.iter()? {
            let (key, value) = row?;
            let Ok(id) = Uuid::parse_str(key.value()) else { continue };
            let Ok(vector) = bincode::deserialize::<Vec<f32>>(value.value()) else { continue };
            let score = cosine_similarity(query, &vector);
            scored.push((id, score));
        }
        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(max_results);
        Ok(scored)
    }
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot / (norm_a * norm_b)
    }
}

/// Debounce policy for syncing on-disk items into the external Index. The
/// core marks the bridge dirty on every write; `should_sync` gates how often
/// the (potentially expensive) `update`/`embed` calls actually fire.
pub struct SyncDebouncer {
    min_interval: Duration,
    dirty: bool,
    last_synced: Option<Instant>,
}

impl SyncDebouncer {
    pub fn new(min_interval: Duration) -> Self {
        Self { min_interval, dirty: false, last_synced: None }
    }

    pub fn mark_dirty(&mut self) {
        self.dirty = true;
    }

    /// Whether a sync should run now. Always true on first call after a
    /// dirty mark; otherwise gated by `min_interval` since the last sync.
    pub fn should_sync(&self, now: Instant) -> bool {
        if !self.dirty {
            return false;
        }
        match self.last_synced {
            None => true,
            Some(last) => now.duration_since(last) >= self.min_interval,
        }
    }

    pub fn mark_synced(&mut self, now: Instant) {
        self.dirty = false;
        self.last_synced = Some(now);
    }
}

/// Rerank cache entry: a stable ordering of ids keyed by
/// `lowercase(trim(query)) + "|" + ids.join(",")`, with its own write
/// timestamp so staleness can be judged against a configured TTL.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct RerankCacheEntry {
    order: Vec<Uuid>,
    written_at_millis: i64,
}

/// TTL-bounded cache of rerank orderings, backed by an in-memory LRU.
/// `now_millis` is passed in by the caller rather than read from the clock,
/// keeping this testable and matching the rest of the crate's abstention
/// from wall-clock reads inside pure components.
pub struct RerankCache {
    cache: LruCache<String, RerankCacheEntry>,
    ttl_ms: i64,
}

impl RerankCache {
    pub fn new(capacity: usize, ttl_ms: i64) -> Self {
        Self {
            cache: LruCache::new(NonZeroUsize::new(capacity.max(1)).unwrap()),
            ttl_ms,
        }
    }

    pub fn cache_key(query: &str, ids: &[Uuid]) -> String {
        let joined = ids.iter().map(|id| id.to_string()).collect::<Vec<_>>().join(",");
        format!("{}|{}", query.trim().to_lowercase(), joined)
    }

    pub fn get(&mut self, key: &str, now_millis: i64) -> Option<Vec<Uuid>> {
        let entry = self.cache.get(key)?;
        if now_millis - entry.written_at_millis > self.ttl_ms {
            return None;
        }
        Some(entry.order.clone())
    }

    pub fn put(&mut self, key: String, order: Vec<Uuid>, now_millis: i64) {
        self.cache.put(key, RerankCacheEntry { order, written_at_millis: now_millis });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn null_index_always_returns_empty() {
        let index = NullIndex;
        assert!(index.search("anything", None, 10).await.is_empty());
    }

    #[test]
    fn embedding_fallback_ranks_by_cosine_similarity() {
        let dir = tempdir().unwrap();
        let index = EmbeddingFallbackIndex::open(dir.path().join("fallback.redb")).unwrap();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        index.upsert(a, &[1.0, 0.0, 0.0]).unwrap();
        index.upsert(b, &[0.0, 1.0, 0.0]).unwrap();

        let results = index.search_by_vector(&[0.9, 0.1, 0.0], 2).unwrap();
        assert_eq!(results[0].0, a);
    }

    #[test]
    fn embedding_fallback_reports_len() {
        let dir = tempdir().unwrap();
        let index = EmbeddingFallbackIndex::open(dir.path().join("fallback.redb")).unwrap();
        assert!(index.is_empty().unwrap());
        index.upsert(Uuid::new_v4(), &[0.5, 0.5]).unwrap();
        assert_eq!(index.len().unwrap(), 1);
    }

    #[test]
    fn cosine_similarity_handles_mismatched_lengths() {
        assert_eq!(cosine_similarity(&[1.0, 0.0], &[1.0]), 0.0);
    }

    #[test]
    fn sync_debouncer_gates_on_min_interval() {
        let mut deb = SyncDebouncer::new(Duration::from_secs(60));
        let t0 = Instant::now();
        assert!(!deb.should_sync(t0));
        deb.mark_dirty();
        assert!(deb.should_sync(t0));
        deb.mark_synced(t0);
        assert!(!deb.should_sync(t0));
        deb.mark_dirty();
        assert!(!deb.should_sync(t0 + Duration::from_secs(1)));
        assert!(deb.should_sync(t0 + Duration::from_secs(61)));
    }

    #[test]
    fn rerank_cache_expires_past_ttl() {
        let mut cache = RerankCache::new(8, 1000);
        let ids = vec![Uuid::new_v4(), Uuid::new_v4()];
        let key = RerankCache::cache_key("  What Editor  ", &ids);
        assert_eq!(key, format!("what editor|{},{}", ids[0], ids[1]));

        cache.put(key.clone(), ids.clone(), 1_000);
        assert_eq!(cache.get(&key, 1_500), Some(ids.clone()));
        assert_eq!(cache.get(&key, 2_500), None);
    }
}
