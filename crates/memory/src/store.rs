//! Content-addressed, file-backed store for [`MemoryItem`]s, entities,
//! profile/identity documents, and process state.
//!
//! Markdown+frontmatter files on disk, atomic tmp-then-rename writes with
//! fsync-on-append, and in-memory `HashMap` indices for O(1) lookup. The
//! Store exclusively owns every on-disk item file; every other component
//! holds only values derived from it.

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Serialize};
use uuid::Uuid;

use crate::schema::{Category, MemoryItem, Status};

/// A store serializes writes per file and bumps `status_version` on any
/// status-relevant mutation so consumers can cache status maps keyed by
/// `(storage, version)`.
pub struct ContentStore {
    root: PathBuf,
    items: HashMap<Uuid, MemoryItem>,
    status_version: u64,
}

impl ContentStore {
    /// Open (or create) a store rooted at `root`, replaying every item file
    /// found under the category directories into the in-memory index.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        let mut store = Self {
            root,
            items: HashMap::new(),
            status_version: 0,
        };
        store.reload()?;
        Ok(store)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn status_version(&self) -> u64 {
        self.status_version
    }

    /// Re-scan every category directory, skipping corrupt files (logged,
    /// never fatal — matches `event_log.rs`'s handling of corrupt JSONL
    /// lines).
    pub fn reload(&mut self) -> Result<()> {
        self.items.clear();
        for category in ALL_CATEGORIES {
            let dir = self.root.join(category.dir_name());
            if !dir.exists() {
                continue;
            }
            for day_entry in fs::read_dir(&dir)? {
                let day_entry = day_entry?;
                if !day_entry.path().is_dir() {
                    continue;
                }
                for file_entry in fs::read_dir(day_entry.path())? {
                    let file_entry = file_entry?;
                    let path = file_entry.path();
                    if path.extension().and_then(|e| e.to_str()) != Some("md") {
                        continue;
                    }
                    match fs::read_to_string(&path) {
                        Ok(raw) => match parse_item_file(&raw) {
                            Some(item) => {
                                self.items.insert(item.id, item);
                            }
                            None => {
                                tracing::warn!(path = %path.display(), "corrupt item frontmatter — skipping");
                            }
                        },
                        Err(err) => {
                            tracing::warn!(path = %path.display(), error = %err, "failed to read item file — skipping");
                        }
                    }
                }
            }
        }
        Ok(())
    }

    pub fn all(&self) -> impl Iterator<Item = &MemoryItem> {
        self.items.values()
    }

    pub fn get(&self, id: Uuid) -> Option<&MemoryItem> {
        self.items.get(&id)
    }

    pub fn by_category(&self, category: Category) -> Vec<&MemoryItem> {
        self.items.values().filter(|i| i.category == category).collect()
    }

    /// Path for an item's file: `<root>/<category>s/<YYYY-MM-DD>/<id>.md`.
    fn item_path(&self, category: Category, created: DateTime<Utc>, id: Uuid) -> PathBuf {
        self.root
            .join(category.dir_name())
            .join(created.format("%Y-%m-%d").to_string())
            .join(format!("{id}.md"))
    }

    /// Write `item` to disk (creating parent directories as needed) and
    /// update the in-memory index. This is the only path that creates or
    /// overwrites an item file; `id` is written once, then in-place
    /// overwritten on every subsequent call for the same id.
    pub fn write_item(&mut self, item: MemoryItem) -> Result<()> {
        let path = self.item_path(item.category, item.created, item.id);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let rendered = render_item_file(&item);
        atomic_write(&path, rendered.as_bytes())?;
        self.status_version += 1;
        self.items.insert(item.id, item);
        Ok(())
    }

    /// Mark `id`'s status, bumping updated + status_version. No-op if the
    /// id is unknown.
    pub fn set_status(&mut self, id: Uuid, status: Status) -> Result<()> {
        let Some(mut item) = self.items.get(&id).cloned() else {
            return Ok(());
        };
        item.status = status;
        item.updated = Utc::now();
        self.write_item(item)
    }

    /// Apply a MERGE: write `new_item` (with `supersedes` and `lineage`
    /// already populated by the caller) and mark every predecessor
    /// superseded. The caller must ensure the new item's lineage is a
    /// superset of both predecessors' lineages union their ids.
    pub fn merge(&mut self, new_item: MemoryItem, predecessor_ids: &[Uuid]) -> Result<()> {
        self.write_item(new_item)?;
        for id in predecessor_ids {
            self.set_status(*id, Status::Superseded)?;
        }
        Ok(())
    }

    /// Sweep items whose `expiresAt < now` into `archived` status. Archival,
    /// never deletion.
    pub fn sweep_expired(&mut self, now: DateTime<Utc>) -> Result<Vec<Uuid>> {
        let expired: Vec<Uuid> = self
            .items
            .values()
            .filter(|i| i.status == Status::Active && i.is_expired(now))
            .map(|i| i.id)
            .collect();
        for id in &expired {
            self.set_status(*id, Status::Archived)?;
        }
        Ok(expired)
    }

    /// Rotate a bootstrap document's body (IDENTITY, profile) into
    /// `.engram-archive/<name>-<ts>.md` when it exceeds `byte_budget`,
    /// replacing it with a lean body that retains the tail and references
    /// the archive. Returns the (possibly rotated) body to persist as the
    /// live document.
    pub fn rotate_if_over_budget(&self, name: &str, body: &str, byte_budget: usize) -> Result<String> {
        if body.len() <= byte_budget {
            return Ok(body.to_string());
        }
        let archive_dir = self.root.join(".engram-archive");
        fs::create_dir_all(&archive_dir)?;
        let ts = Utc::now().format("%Y%m%dT%H%M%S").to_string();
        let archive_path = archive_dir.join(format!("{name}-{ts}.md"));
        atomic_write(&archive_path, body.as_bytes())?;

        // Keep the tail of the body (most recent content) plus a reference.
        let tail_chars = byte_budget.saturating_sub(200).max(200);
        let tail = crate::schema::truncate_str(body, tail_chars.min(body.chars().count()));
        let tail_start = body.len().saturating_sub(tail.len());
        let kept = &body[tail_start.min(body.len())..];
        Ok(format!(
            "_Earlier content archived to `{}`._\n\n{}",
            archive_path.display(),
            kept
        ))
    }

    /// Read a top-level bootstrap document (`profile.md`, `IDENTITY.md`).
    /// Returns `None` if it has never been written.
    pub fn read_document(&self, name: &str) -> Result<Option<String>> {
        let path = self.document_path(name);
        if !path.exists() {
            return Ok(None);
        }
        Ok(Some(fs::read_to_string(&path)?))
    }

    /// Write a top-level bootstrap document atomically.
    pub fn write_document(&self, name: &str, body: &str) -> Result<()> {
        let path = self.document_path(name);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        atomic_write(&path, body.as_bytes())
    }

    fn document_path(&self, name: &str) -> PathBuf {
        self.root.join(format!("{name}.md"))
    }

    /// Read an entity file by normalized name.
    pub fn read_entity(&self, normalized_name: &str) -> Result<Option<crate::schema::Entity>> {
        let path = self.entity_path(normalized_name);
        if !path.exists() {
            return Ok(None);
        }
        let raw = fs::read_to_string(&path)?;
        Ok(parse_entity_file(&raw))
    }

    /// Write (or upsert) an entity file at `entities/<normalized-name>.md`.
    pub fn write_entity(&mut self, entity: &crate::schema::Entity) -> Result<()> {
        let path = self.entity_path(&entity.name);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        atomic_write(&path, render_entity_file(entity).as_bytes())?;
        self.status_version += 1;
        Ok(())
    }

    /// List every entity file currently on disk.
    pub fn all_entities(&self) -> Result<Vec<crate::schema::Entity>> {
        let dir = self.root.join("entities");
        if !dir.exists() {
            return Ok(Vec::new());
        }
        let mut entities = Vec::new();
        for entry in fs::read_dir(&dir)? {
            let entry = entry?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("md") {
                continue;
            }
            if let Ok(raw) = fs::read_to_string(&path) {
                if let Some(entity) = parse_entity_file(&raw) {
                    entities.push(entity);
                }
            }
        }
        Ok(entities)
    }

    fn entity_path(&self, normalized_name: &str) -> PathBuf {
        self.root.join("entities").join(format!("{normalized_name}.md"))
    }

    /// Write a question file at `questions/<id>.md`.
    pub fn write_question(&mut self, question: &crate::schema::Question) -> Result<()> {
        let path = self.question_path(question.id);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        atomic_write(&path, render_question_file(question).as_bytes())?;
        self.status_version += 1;
        Ok(())
    }

    /// List every question on disk, optionally restricted to unresolved ones.
    pub fn all_questions(&self, only_unresolved: bool) -> Result<Vec<crate::schema::Question>> {
        let dir = self.root.join("questions");
        if !dir.exists() {
            return Ok(Vec::new());
        }
        let mut questions = Vec::new();
        for entry in fs::read_dir(&dir)? {
            let entry = entry?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("md") {
                continue;
            }
            if let Ok(raw) = fs::read_to_string(&path) {
                if let Some(question) = parse_question_file(&raw) {
                    if !only_unresolved || !question.resolved {
                        questions.push(question);
                    }
                }
            }
        }
        Ok(questions)
    }

    fn question_path(&self, id: Uuid) -> PathBuf {
        self.root.join("questions").join(format!("{id}.md"))
    }

    /// Write a sealed box file at `boxes/<YYYY-MM-DD>/<id>.md`.
    pub fn write_box(&self, sealed: &crate::boxes::SealedBox) -> Result<()> {
        let path = self
            .root
            .join("boxes")
            .join(sealed.sealed_at.format("%Y-%m-%d").to_string())
            .join(format!("{}.md", sealed.id));
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        atomic_write(&path, render_box_file(sealed).as_bytes())
    }

    /// Write a JSON state file atomically (tmp + fsync + rename), matching
    /// `event_log.rs::overwrite`'s crash-safety guarantee.
    pub fn write_state_json<T: Serialize>(&self, name: &str, value: &T) -> Result<()> {
        let path = self.state_dir_path(name);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let rendered = serde_json::to_vec_pretty(value)?;
        atomic_write(&path, &rendered)
    }

    pub fn read_state_json<T: DeserializeOwned>(&self, name: &str) -> Result<Option<T>> {
        let path = self.state_dir_path(name);
        if !path.exists() {
            return Ok(None);
        }
        let raw = fs::read_to_string(&path)?;
        match serde_json::from_str(&raw) {
            Ok(value) => Ok(Some(value)),
            Err(err) => {
                tracing::warn!(path = %path.display(), error = %err, "corrupt state file — treating as absent");
                Ok(None)
            }
        }
    }

    /// Append one JSON line to a `state/*.jsonl` file (e.g.
    /// `recall_impressions.jsonl`), fsync'd per line.
    pub fn append_state_jsonl<T: Serialize>(&self, name: &str, value: &T) -> Result<()> {
        use std::io::Write;
        let path = self.state_dir_path(name);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut file = fs::OpenOptions::new().create(true).append(true).open(&path)?;
        let line = serde_json::to_string(value)?;
        writeln!(file, "{line}")?;
        file.sync_all()?;
        Ok(())
    }

    fn state_dir_path(&self, name: &str) -> PathBuf {
        self.root.join("state").join(name)
    }

    /// Resolve a namespace's root directory. The default namespace uses the
    /// legacy root unless a `namespaces/<default>` directory already
    /// exists, to avoid silently moving existing data.
    pub fn namespace_root(&self, namespace: &str, default_namespace: &str) -> PathBuf {
        if namespace == default_namespace {
            let candidate = self.root.join("namespaces").join(namespace);
            if candidate.exists() {
                return candidate;
            }
            return self.root.clone();
        }
        self.root.join("namespaces").join(namespace)
    }

    /// Transcript path for a session key of the form
    /// `agent:<name>:<type>[:channel:<id>|:<id>]`. Unknown patterns bucket
    /// as `other/default`.
    pub fn transcript_path(&self, session_key: Option<&str>, day: DateTime<Utc>) -> PathBuf {
        let (channel_type, channel_id) = parse_session_key(session_key);
        self.root
            .join("transcripts")
            .join(channel_type)
            .join(channel_id)
            .join(format!("{}.jsonl", day.format("%Y-%m-%d")))
    }
}

const ALL_CATEGORIES: [Category; 10] = [
    Category::Fact,
    Category::Preference,
    Category::Correction,
    Category::Entity,
    Category::Decision,
    Category::Relationship,
    Category::Principle,
    Category::Commitment,
    Category::Moment,
    Category::Skill,
];

fn parse_session_key(session_key: Option<&str>) -> (String, String) {
    let Some(key) = session_key else {
        return ("other".to_string(), "default".to_string());
    };
    let parts: Vec<&str> = key.split(':').collect();
    // agent:<name>:<type>:channel:<id>
    if parts.len() >= 5 && parts[0] == "agent" && parts[3] == "channel" {
        return (parts[2].to_string(), parts[4].to_string());
    }
    // agent:<name>:<type>:<id>
    if parts.len() == 4 && parts[0] == "agent" {
        return (parts[2].to_string(), parts[3].to_string());
    }
    ("other".to_string(), "default".to_string())
}

/// Crash-safe single-file overwrite: write to a `.tmp` sibling, fsync,
/// rename over the original. A crash before the rename leaves the original
/// untouched; a crash after leaves a consistent new file.
fn atomic_write(path: &Path, contents: &[u8]) -> Result<()> {
    let tmp_path = {
        let filename = path
            .file_name()
            .map(|f| f.to_string_lossy().to_string())
            .unwrap_or_else(|| "file".to_string());
        path.with_file_name(format!("{filename}.tmp"))
    };

    let write_result: Result<()> = (|| {
        fs::write(&tmp_path, contents)?;
        let file = fs::File::open(&tmp_path)?;
        file.sync_all()?;
        Ok(())
    })();

    if let Err(err) = write_result {
        let _ = fs::remove_file(&tmp_path);
        return Err(err);
    }

    if let Err(err) = fs::rename(&tmp_path, path) {
        let _ = fs::remove_file(&tmp_path);
        return Err(err.into());
    }
    Ok(())
}

/// Render a [`MemoryItem`] as a markdown file with a YAML-ish frontmatter
/// block. Arrays serialize as `[ "a", "b" ]`. Unknown keys encountered on
/// read are preserved via `extra` and re-emitted here verbatim (see
/// [`parse_item_file`]), so a rewrite never drops a frontmatter key this
/// schema doesn't know about.
fn render_item_file(item: &MemoryItem) -> String {
    let tags = render_string_array(&item.tags);
    let lineage = render_string_array(&item.lineage.iter().map(|id| id.to_string()).collect::<Vec<_>>());
    let mut fm = String::new();
    fm.push_str("---\n");
    fm.push_str(&format!("id: {}\n", item.id));
    fm.push_str(&format!("category: {}\n", item.category.slug()));
    fm.push_str(&format!("created: {}\n", item.created.to_rfc3339()));
    fm.push_str(&format!("updated: {}\n", item.updated.to_rfc3339()));
    fm.push_str(&format!("source: {}\n", item.source));
    fm.push_str(&format!("confidence: {:.2}\n", item.confidence));
    fm.push_str(&format!("tags: {tags}\n"));
    if let Some(entity_ref) = &item.entity_ref {
        fm.push_str(&format!("entityRef: {entity_ref}\n"));
    }
    fm.push_str(&format!("status: {}\n", item.status.slug()));
    if let Some(supersedes) = item.supersedes {
        fm.push_str(&format!("supersedes: {supersedes}\n"));
    }
    fm.push_str(&format!("lineage: {lineage}\n"));
    if let Some(expires_at) = item.expires_at {
        fm.push_str(&format!("expiresAt: {}\n", expires_at.to_rfc3339()));
    }
    fm.push_str(&format!("memoryKind: {}\n", item.memory_kind.slug()));
    for (key, value) in &item.extra {
        fm.push_str(&format!("{key}: {value}\n"));
    }
    fm.push_str("---\n\n");
    fm.push_str(&item.content);
    fm.push('\n');
    fm
}

fn render_string_array(values: &[String]) -> String {
    if values.is_empty() {
        return "[ ]".to_string();
    }
    let quoted: Vec<String> = values.iter().map(|v| format!("\"{v}\"")).collect();
    format!("[ {} ]", quoted.join(", "))
}

/// Parse an item file written by [`render_item_file`]. Tolerant of missing
/// fields (callers get sensible defaults via a best-effort reconstruction);
/// rejects files with malformed frontmatter fences, returning `None` so the
/// caller skips the file rather than crashing the scan.
fn parse_item_file(raw: &str) -> Option<MemoryItem> {
    let rest = raw.strip_prefix("---\n")?;
    let end = rest.find("\n---")?;
    let frontmatter = &rest[..end];
    let body = rest[end..].trim_start_matches("\n---").trim_start_matches('\n');

    let mut id = None;
    let mut category = None;
    let mut created = None;
    let mut updated = None;
    let mut source = String::new();
    let mut confidence = 0.5f32;
    let mut tags = Vec::new();
    let mut entity_ref = None;
    let mut status = Status::Active;
    let mut supersedes = None;
    let mut lineage = Vec::new();
    let mut expires_at = None;
    let mut memory_kind = crate::schema::MemoryKind::Note;
    let mut extra = BTreeMap::new();

    for line in frontmatter.lines() {
        let Some((key, value)) = line.split_once(':') else { continue };
        let key = key.trim();
        let value = value.trim();
        match key {
            "id" => id = Uuid::parse_str(value).ok(),
            "category" => category = Category::from_label(value),
            "created" => created = DateTime::parse_from_rfc3339(value).ok().map(|d| d.with_timezone(&Utc)),
            "updated" => updated = DateTime::parse_from_rfc3339(value).ok().map(|d| d.with_timezone(&Utc)),
            "source" => source = value.to_string(),
            "confidence" => confidence = value.parse().unwrap_or(0.5),
            "tags" => tags = parse_string_array(value),
            "entityRef" => entity_ref = Some(value.to_string()),
            "status" => status = Status::from_label(value).unwrap_or(Status::Active),
            "supersedes" => supersedes = Uuid::parse_str(value).ok(),
            "lineage" => lineage = parse_string_array(value).iter().filter_map(|s| Uuid::parse_str(s).ok()).collect(),
            "expiresAt" => expires_at = DateTime::parse_from_rfc3339(value).ok().map(|d| d.with_timezone(&Utc)),
            "memoryKind" => {
                memory_kind = match value {
                    "episode" => crate::schema::MemoryKind::Episode,
                    _ => crate::schema::MemoryKind::Note,
                }
            }
            other => {
                extra.insert(other.to_string(), value.to_string());
            }
        }
    }

    Some(MemoryItem {
        id: id?,
        category: category?,
        created: created?,
        updated: updated.unwrap_or(created?),
        source,
        confidence,
        tags,
        entity_ref,
        status,
        supersedes,
        lineage,
        expires_at,
        memory_kind,
        embedding: None,
        extra,
        content: body.trim().to_string(),
    })
}

fn parse_string_array(value: &str) -> Vec<String> {
    let trimmed = value.trim().trim_start_matches('[').trim_end_matches(']').trim();
    if trimmed.is_empty() {
        return Vec::new();
    }
    trimmed
        .split(',')
        .map(|s| s.trim().trim_matches('"').to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

/// Render an [`crate::schema::Entity`] as a frontmatter+body markdown file,
/// mirroring [`render_item_file`]'s shape.
fn render_entity_file(entity: &crate::schema::Entity) -> String {
    let mut fm = String::new();
    fm.push_str("---\n");
    fm.push_str(&format!("name: {}\n", entity.name));
    fm.push_str(&format!("entityType: {}\n", entity.entity_type.slug()));
    fm.push_str("---\n\n");
    for fact in &entity.facts {
        fm.push_str(&format!("- {fact}\n"));
    }
    fm
}

fn parse_entity_file(raw: &str) -> Option<crate::schema::Entity> {
    let rest = raw.strip_prefix("---\n")?;
    let end = rest.find("\n---")?;
    let frontmatter = &rest[..end];
    let body = rest[end..].trim_start_matches("\n---").trim_start_matches('\n');

    let mut name = String::new();
    let mut entity_type = crate::schema::EntityType::Other;
    for line in frontmatter.lines() {
        let Some((key, value)) = line.split_once(':') else { continue };
        match key.trim() {
            "name" => name = value.trim().to_string(),
            "entityType" => entity_type = crate::schema::EntityType::from_label(value.trim()),
            _ => {}
        }
    }
    if name.is_empty() {
        return None;
    }
    let facts = body
        .lines()
        .filter_map(|l| l.trim().strip_prefix("- "))
        .map(|s| s.to_string())
        .collect();
    Some(crate::schema::Entity { name, entity_type, facts })
}

/// Render a [`crate::schema::Question`] as a frontmatter+body markdown file.
fn render_question_file(question: &crate::schema::Question) -> String {
    let mut fm = String::new();
    fm.push_str("---\n");
    fm.push_str(&format!("id: {}\n", question.id));
    fm.push_str(&format!("priority: {:.2}\n", question.priority));
    fm.push_str(&format!("created: {}\n", question.created.to_rfc3339()));
    fm.push_str(&format!("resolved: {}\n", question.resolved));
    if let Some(resolved_at) = question.resolved_at {
        fm.push_str(&format!("resolvedAt: {}\n", resolved_at.to_rfc3339()));
    }
    fm.push_str(&format!("context: {}\n", question.context));
    fm.push_str("---\n\n");
    fm.push_str(&question.question);
    fm.push('\n');
    fm
}

fn parse_question_file(raw: &str) -> Option<crate::schema::Question> {
    let rest = raw.strip_prefix("---\n")?;
    let end = rest.find("\n---")?;
    let frontmatter = &rest[..end];
    let body = rest[end..].trim_start_matches("\n---").trim_start_matches('\n');

    let mut id = None;
    let mut priority = 0.5f32;
    let mut created = None;
    let mut resolved = false;
    let mut resolved_at = None;
    let mut context = String::new();

    for line in frontmatter.lines() {
        let Some((key, value)) = line.split_once(':') else { continue };
        let key = key.trim();
        let value = value.trim();
        match key {
            "id" => id = Uuid::parse_str(value).ok(),
            "priority" => priority = value.parse().unwrap_or(0.5),
            "created" => created = DateTime::parse_from_rfc3339(value).ok().map(|d| d.with_timezone(&Utc)),
            "resolved" => resolved = value.parse().unwrap_or(false),
            "resolvedAt" => resolved_at = DateTime::parse_from_rfc3339(value).ok().map(|d| d.with_timezone(&Utc)),
            "context" => context = value.to_string(),
            _ => {}
        }
    }

    Some(crate::schema::Question {
        id: id?,
        question: body.trim().to_string(),
        context,
        priority,
        created: created?,
        resolved,
        resolved_at,
    })
}

/// Render a sealed box as a frontmatter+HTML-comment-summary markdown file
/// (`memoryKind: box`, bracketed quoted lists for `topics`/`memoryIds`).
fn render_box_file(sealed: &crate::boxes::SealedBox) -> String {
    let topics = render_string_array(&sealed.topics);
    let memory_ids = render_string_array(&sealed.memory_ids.iter().map(|id| id.to_string()).collect::<Vec<_>>());
    let mut fm = String::new();
    fm.push_str("---\n");
    fm.push_str(&format!("id: {}\n", sealed.id));
    fm.push_str("memoryKind: box\n");
    fm.push_str(&format!("createdAt: {}\n", sealed.created_at.to_rfc3339()));
    fm.push_str(&format!("sealedAt: {}\n", sealed.sealed_at.to_rfc3339()));
    fm.push_str(&format!("sealReason: {}\n", sealed.seal_reason.slug()));
    fm.push_str(&format!("topics: {topics}\n"));
    fm.push_str(&format!("memoryIds: {memory_ids}\n"));
    if let Some(trace_id) = &sealed.trace_id {
        fm.push_str(&format!("traceId: {trace_id}\n"));
    }
    fm.push_str("---\n\n");
    fm.push_str(&format!(
        "<!-- box sealed via {:?} with {} topic(s), {} memor{} -->\n",
        sealed.seal_reason,
        sealed.topics.len(),
        sealed.memory_ids.len(),
        if sealed.memory_ids.len() == 1 { "y" } else { "ies" }
    ));
    fm
}
