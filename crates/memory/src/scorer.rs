//! Importance classification for a candidate [`MemoryItem`]: a pure function
//! from category, tags, and confidence to a five-level [`Importance`]
//! bucket, driven by category weighting and keyword/tag boosts rather than
//! a single core/not-core cutoff.

use crate::schema::{Category, Importance};

const CRITICAL_KEYWORDS: &[&str] = &[
    "password", "security", "deadline", "allergy", "allergic", "medical",
    "emergency", "legal", "contract", "never again", "critical",
];

const HIGH_KEYWORDS: &[&str] = &[
    "always", "never", "must", "important", "commit", "promise", "decided",
];

/// Category weight contributed toward importance, independent of keywords.
/// Corrections and commitments default higher — they encode an explicit
/// course-correction or an obligation, not a passive observation.
fn category_boost(category: Category) -> i32 {
    match category {
        Category::Correction | Category::Commitment => 2,
        Category::Decision | Category::Principle | Category::Relationship => 1,
        Category::Preference | Category::Skill | Category::Entity => 0,
        Category::Fact | Category::Moment => -1,
    }
}

fn keyword_boost(content: &str, tags: &[String]) -> i32 {
    let lower = content.to_lowercase();
    let mut boost = 0;
    if CRITICAL_KEYWORDS.iter().any(|k| lower.contains(k)) {
        boost += 3;
    }
    if HIGH_KEYWORDS.iter().any(|k| lower.contains(k)) {
        boost += 1;
    }
    if tags.iter().any(|t| t.eq_ignore_ascii_case("important")) {
        boost += 2;
    }
    boost
}

/// Classify a candidate memory's importance from its content, category,
/// tags, and confidence. Pure in its inputs.
pub fn classify_importance(
    content: &str,
    category: Category,
    tags: &[String],
    confidence: f32,
) -> Importance {
    if content.trim().is_empty() {
        return Importance::Trivial;
    }

    let mut score = category_boost(category) + keyword_boost(content, tags);
    if confidence >= 0.95 {
        score += 1;
    } else if confidence < 0.40 {
        score -= 1;
    }

    match score {
        s if s >= 4 => Importance::Critical,
        s if s >= 2 => Importance::High,
        s if s >= 0 => Importance::Normal,
        s if s >= -1 => Importance::Low,
        _ => Importance::Trivial,
    }
}

/// Numeric weight used by the retrieval planner's `s_importance` scoring
/// term. Monotone in [`Importance`]'s ordering.
pub fn importance_weight(importance: Importance) -> f32 {
    match importance {
        Importance::Trivial => 0.0,
        Importance::Low => 0.1,
        Importance::Normal => 0.25,
        Importance::High => 0.45,
        Importance::Critical => 0.65,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_content_is_trivial() {
        assert_eq!(
            classify_importance("", Category::Fact, &[], 0.9),
            Importance::Trivial
        );
    }

    #[test]
    fn security_keyword_is_critical() {
        assert_eq!(
            classify_importance(
                "Never share the database password with anyone",
                Category::Correction,
                &[],
                0.95
            ),
            Importance::Critical
        );
    }

    #[test]
    fn plain_fact_is_normal_or_lower() {
        let importance = classify_importance("The sky is blue", Category::Fact, &[], 0.8);
        assert!(importance <= Importance::Normal);
    }

    #[test]
    fn important_tag_boosts_importance() {
        let plain = classify_importance("Met the new designer", Category::Moment, &[], 0.8);
        let tagged = classify_importance(
            "Met the new designer",
            Category::Moment,
            &["important".to_string()],
            0.8,
        );
        assert!(tagged > plain);
    }

    #[test]
    fn importance_weight_is_monotone() {
        let weights = [
            importance_weight(Importance::Trivial),
            importance_weight(Importance::Low),
            importance_weight(Importance::Normal),
            importance_weight(Importance::High),
            importance_weight(Importance::Critical),
        ];
        for pair in weights.windows(2) {
            assert!(pair[0] < pair[1]);
        }
    }
}
