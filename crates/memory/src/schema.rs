//! Core data types shared across the memory subsystem.

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// What kind of durable record a [`MemoryItem`] is.
///
/// Category drives on-disk routing ([`crate::store`] shards by
/// `<category>s/<YYYY-MM-DD>/<id>.md`), consolidation behaviour, and
/// retrieval's intent-routing boost.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Fact,
    Preference,
    Correction,
    Entity,
    Decision,
    Relationship,
    Principle,
    Commitment,
    Moment,
    Skill,
}

impl Category {
    /// Lowercase identifier used in frontmatter and on-disk directory names.
    pub fn slug(&self) -> &'static str {
        match self {
            Self::Fact => "fact",
            Self::Preference => "preference",
            Self::Correction => "correction",
            Self::Entity => "entity",
            Self::Decision => "decision",
            Self::Relationship => "relationship",
            Self::Principle => "principle",
            Self::Commitment => "commitment",
            Self::Moment => "moment",
            Self::Skill => "skill",
        }
    }

    /// Directory name this category shards into: `<slug>s`.
    pub fn dir_name(&self) -> String {
        format!("{}s", self.slug())
    }

    pub fn from_label(label: &str) -> Option<Self> {
        match label.trim().to_lowercase().as_str() {
            "fact" => Some(Self::Fact),
            "preference" => Some(Self::Preference),
            "correction" => Some(Self::Correction),
            "entity" => Some(Self::Entity),
            "decision" => Some(Self::Decision),
            "relationship" => Some(Self::Relationship),
            "principle" => Some(Self::Principle),
            "commitment" => Some(Self::Commitment),
            "moment" => Some(Self::Moment),
            "skill" => Some(Self::Skill),
            _ => None,
        }
    }

    /// Categories classified as stable beliefs rather than time-bound events,
    /// per the episode/note classifier's category-override tier.
    pub fn is_note_category(&self) -> bool {
        matches!(
            self,
            Self::Preference
                | Self::Decision
                | Self::Principle
                | Self::Commitment
                | Self::Relationship
                | Self::Skill
                | Self::Correction
                | Self::Entity
        )
    }
}

/// Qualitative bucket derived from [`MemoryItem::confidence`]. Pure function
/// of the score — never stored, always recomputed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfidenceTier {
    Explicit,
    Implied,
    Inferred,
    Speculative,
}

impl ConfidenceTier {
    pub fn from_confidence(confidence: f32) -> Self {
        if confidence >= 0.95 {
            Self::Explicit
        } else if confidence >= 0.70 {
            Self::Implied
        } else if confidence >= 0.40 {
            Self::Inferred
        } else {
            Self::Speculative
        }
    }
}

/// Whether a memory is a time-bound event or a stable belief. See
/// [`crate::classifier::classify`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemoryKind {
    Episode,
    Note,
}

impl MemoryKind {
    pub fn slug(&self) -> &'static str {
        match self {
            Self::Episode => "episode",
            Self::Note => "note",
        }
    }
}

/// Lifecycle state of a [`MemoryItem`]. Only the consolidation pipeline and
/// the expiration sweep may change this; see [`crate::store`]'s ownership
/// note.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Active,
    Superseded,
    Archived,
    Missing,
}

impl Status {
    pub fn slug(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Superseded => "superseded",
            Self::Archived => "archived",
            Self::Missing => "missing",
        }
    }

    pub fn from_label(label: &str) -> Option<Self> {
        match label.trim().to_lowercase().as_str() {
            "active" => Some(Self::Active),
            "superseded" => Some(Self::Superseded),
            "archived" => Some(Self::Archived),
            "missing" => Some(Self::Missing),
            _ => None,
        }
    }
}

/// A single durable record: a memory item with YAML-ish frontmatter plus a
/// markdown prose body. See [`crate::store`] for the on-disk path layout and
/// frontmatter serialization.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryItem {
    pub id: Uuid,
    pub category: Category,
    pub created: DateTime<Utc>,
    pub updated: DateTime<Utc>,
    /// Origin tag, e.g. `"extraction"`, `"artifact"`, `"import"`.
    pub source: String,
    /// Confidence in `[0.0, 1.0]`. `confidence_tier()` derives the bucket.
    pub confidence: f32,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub entity_ref: Option<String>,
    pub status: Status,
    #[serde(default)]
    pub supersedes: Option<Uuid>,
    #[serde(default)]
    pub lineage: Vec<Uuid>,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
    pub memory_kind: MemoryKind,
    /// Optional embedding vector, populated when an embedding backend is
    /// configured. Never persisted in the compact secondary index.
    #[serde(default)]
    pub embedding: Option<Vec<f32>>,
    /// Frontmatter keys this schema doesn't recognize, keyed by the raw
    /// frontmatter key name. Captured on read so a rewrite (UPDATE, MERGE,
    /// compaction) never silently drops data a newer writer put there.
    #[serde(default)]
    pub extra: BTreeMap<String, String>,
    pub content: String,
}

impl MemoryItem {
    pub fn confidence_tier(&self) -> ConfidenceTier {
        ConfidenceTier::from_confidence(self.confidence)
    }

    /// Speculative items (confidence < 0.40) default to a `speculative_ttl_days`
    /// expiry; commitment-category items otherwise decay after
    /// `commitment_decay_days`. Speculative confidence takes precedence —
    /// a low-confidence commitment still expires on the speculative clock.
    /// Either knob can be overridden by the caller at write time.
    pub fn default_expiry_for(
        confidence: f32,
        category: Category,
        created: DateTime<Utc>,
        speculative_ttl_days: i64,
        commitment_decay_days: i64,
    ) -> Option<DateTime<Utc>> {
        if ConfidenceTier::from_confidence(confidence) == ConfidenceTier::Speculative {
            Some(created + Duration::days(speculative_ttl_days))
        } else if category == Category::Commitment {
            Some(created + Duration::days(commitment_decay_days))
        } else {
            None
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.map(|ts| ts < now).unwrap_or(false)
    }
}

/// Qualitative importance bucket for a [`MemoryItem`], derived by
/// [`crate::scorer`] from category/keyword boosts rather than stored as a
/// standalone field — retrieval's `s_importance` term reads it fresh.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Importance {
    Trivial,
    Low,
    Normal,
    High,
    Critical,
}

/// What kind of thing an [`Entity`] names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityType {
    Person,
    Project,
    Tool,
    Company,
    Place,
    Other,
}

impl EntityType {
    pub fn slug(&self) -> &'static str {
        match self {
            Self::Person => "person",
            Self::Project => "project",
            Self::Tool => "tool",
            Self::Company => "company",
            Self::Place => "place",
            Self::Other => "other",
        }
    }

    pub fn from_label(label: &str) -> Self {
        match label.trim().to_lowercase().as_str() {
            "person" => Self::Person,
            "project" => Self::Project,
            "tool" => Self::Tool,
            "company" => Self::Company,
            "place" => Self::Place,
            _ => Self::Other,
        }
    }
}

/// A separate index over named entities referenced by [`MemoryItem::entity_ref`].
/// One markdown file per entity, keyed by normalized name.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Entity {
    pub name: String,
    pub entity_type: EntityType,
    pub facts: Vec<String>,
}

impl Entity {
    /// Lowercase, hyphen-joined normalization used both as the in-memory key
    /// and the on-disk filename stem.
    pub fn normalize_name(raw: &str) -> String {
        let mut out = String::new();
        let mut last_was_sep = true;
        for ch in raw.trim().chars() {
            if ch.is_alphanumeric() {
                out.push(ch.to_ascii_lowercase());
                last_was_sep = false;
            } else if !last_was_sep {
                out.push('-');
                last_was_sep = true;
            }
        }
        out.trim_end_matches('-').to_string()
    }
}

/// A durable open question surfaced by extraction — something the pipeline
/// noticed it doesn't yet know, worth asking about later.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Question {
    pub id: Uuid,
    pub question: String,
    pub context: String,
    /// In `[0, 1]`; higher surfaces first when listing open questions.
    pub priority: f32,
    pub created: DateTime<Utc>,
    pub resolved: bool,
    #[serde(default)]
    pub resolved_at: Option<DateTime<Utc>>,
}

/// Truncate `s` to at most `max_chars` Unicode scalar values, returning a
/// borrowed slice. Safe on multi-byte boundaries.
pub fn truncate_str(s: &str, max_chars: usize) -> &str {
    match s.char_indices().nth(max_chars) {
        Some((i, _)) => &s[..i],
        None => s,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn category_slug_round_trips_through_from_label() {
        for category in [
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
        ] {
            let slug = category.slug();
            assert_eq!(Category::from_label(slug), Some(category));
        }
    }

    #[test]
    fn confidence_tier_boundaries() {
        assert_eq!(ConfidenceTier::from_confidence(0.95), ConfidenceTier::Explicit);
        assert_eq!(ConfidenceTier::from_confidence(0.94), ConfidenceTier::Implied);
        assert_eq!(ConfidenceTier::from_confidence(0.70), ConfidenceTier::Implied);
        assert_eq!(ConfidenceTier::from_confidence(0.69), ConfidenceTier::Inferred);
        assert_eq!(ConfidenceTier::from_confidence(0.40), ConfidenceTier::Inferred);
        assert_eq!(ConfidenceTier::from_confidence(0.39), ConfidenceTier::Speculative);
    }

    #[test]
    fn speculative_items_get_thirty_day_expiry() {
        let created = Utc::now();
        let expiry = MemoryItem::default_expiry_for(0.2, Category::Fact, created, 30, 90).unwrap();
        assert_eq!(expiry, created + Duration::days(30));
        assert!(MemoryItem::default_expiry_for(0.8, Category::Fact, created, 30, 90).is_none());
    }

    #[test]
    fn commitments_decay_independent_of_speculative_confidence() {
        let created = Utc::now();
        let expiry = MemoryItem::default_expiry_for(0.8, Category::Commitment, created, 30, 90).unwrap();
        assert_eq!(expiry, created + Duration::days(90));
        // Speculative confidence still takes precedence over category decay.
        let speculative_commitment = MemoryItem::default_expiry_for(0.2, Category::Commitment, created, 30, 90).unwrap();
        assert_eq!(speculative_commitment, created + Duration::days(30));
    }

    #[test]
    fn truncate_str_respects_unicode_boundaries() {
        let s = "héllo wörld";
        let t = truncate_str(s, 3);
        assert_eq!(t, "hél");
    }

    #[test]
    fn entity_name_normalizes_to_lowercase_hyphen_joined() {
        assert_eq!(Entity::normalize_name("Ada Lovelace"), "ada-lovelace");
        assert_eq!(Entity::normalize_name("  Acme, Inc.  "), "acme-inc");
        assert_eq!(Entity::normalize_name("Rust!!"), "rust");
    }
}
