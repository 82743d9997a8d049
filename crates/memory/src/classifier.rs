//! Pure episode/note classification for a candidate memory, evaluated in
//! priority order: temporal markers, then category override, then tag
//! level, then verb markers, then note signal words, then default.

use crate::schema::{Category, MemoryKind};

const TEMPORAL_MARKERS: &[&str] = &[
    "yesterday", "today", "this morning", "this afternoon", "this evening",
    "last monday", "last tuesday", "last wednesday", "last thursday",
    "last friday", "last saturday", "last sunday", "on monday", "on tuesday",
    "on wednesday", "on thursday", "on friday", "on saturday", "on sunday",
    "recently",
];

const EPISODE_VERB_MARKERS: &[&str] = &[
    "deployed", "pushed", "fixed", "merged", "reported", "mentioned", "said",
    "happened", "failed", "completed", "shipped",
];

const NOTE_SIGNAL_WORDS: &[&str] = &[
    "prefer", "always", "never", "must", "should", "goal", "policy",
    "require", "constraint", "standard", "convention",
];

const NOTE_TAGS: &[&str] = &[
    "preference", "constraint", "goal", "habit", "policy", "standard",
    "belief", "decision", "principle", "commitment", "relationship", "skill",
    "correction", "entity",
];

const EPISODE_TAGS: &[&str] = &[
    "event", "action", "observation", "issue", "bug", "incident", "moment",
];

/// Classify a candidate memory as an episode (time-bound event) or a note
/// (stable belief/preference/constraint).
///
/// Evaluated in priority order; the first rule that fires wins:
/// 1. Unambiguous temporal markers in `content`.
/// 2. Category override (note-categories vs episode-categories).
/// 3. Tag level (note-tags beat episode-tags, deterministic regardless of
///    LLM tag-order variance).
/// 4. Verb markers — evaluated *after* category so "user mentioned they
///    always prefer X" is not misclassified as an episode.
/// 5. Note signal words.
/// 6. Default: episode.
pub fn classify(content: &str, tags: &[String], category: Category) -> MemoryKind {
    let lower = content.to_lowercase();

    if TEMPORAL_MARKERS.iter().any(|m| lower.contains(m)) {
        return MemoryKind::Episode;
    }

    if category.is_note_category() {
        return MemoryKind::Note;
    }
    if matches!(category, Category::Moment) {
        return MemoryKind::Episode;
    }

    let lower_tags: Vec<String> = tags.iter().map(|t| t.to_lowercase()).collect();
    let has_note_tag = lower_tags.iter().any(|t| NOTE_TAGS.contains(&t.as_str()));
    let has_episode_tag = lower_tags.iter().any(|t| EPISODE_TAGS.contains(&t.as_str()));
    if has_note_tag {
        return MemoryKind::Note;
    }
    if has_episode_tag {
        return MemoryKind::Episode;
    }

    if EPISODE_VERB_MARKERS.iter().any(|v| lower.contains(v)) {
        return MemoryKind::Episode;
    }

    if NOTE_SIGNAL_WORDS.iter().any(|w| lower.contains(w)) {
        return MemoryKind::Note;
    }

    MemoryKind::Episode
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn temporal_marker_wins_over_everything() {
        let kind = classify(
            "Yesterday I decided to always use tabs",
            &[],
            Category::Preference,
        );
        assert_eq!(kind, MemoryKind::Episode);
    }

    #[test]
    fn note_category_without_temporal_marker_is_note() {
        let kind = classify("Prefers tabs over spaces", &[], Category::Preference);
        assert_eq!(kind, MemoryKind::Note);
    }

    #[test]
    fn moment_category_is_episode() {
        let kind = classify("Celebrated shipping v1", &[], Category::Moment);
        assert_eq!(kind, MemoryKind::Episode);
    }

    #[test]
    fn note_tag_beats_episode_tag() {
        let kind = classify(
            "Something happened",
            &["preference".to_string(), "event".to_string()],
            Category::Fact,
        );
        assert_eq!(kind, MemoryKind::Note);
    }

    #[test]
    fn verb_marker_after_category_classifies_episode() {
        let kind = classify("Fixed the login bug", &[], Category::Fact);
        assert_eq!(kind, MemoryKind::Episode);
    }

    #[test]
    fn verb_marker_does_not_override_note_category() {
        // "mentioned" is a verb marker but the category is already Preference.
        let kind = classify(
            "User mentioned they always prefer dark mode",
            &[],
            Category::Preference,
        );
        assert_eq!(kind, MemoryKind::Note);
    }

    #[test]
    fn note_signal_word_without_category_or_tag_is_note() {
        let kind = classify("We should always review before merging", &[], Category::Fact);
        assert_eq!(kind, MemoryKind::Note);
    }

    #[test]
    fn default_is_episode() {
        let kind = classify("The weather was nice", &[], Category::Fact);
        assert_eq!(kind, MemoryKind::Episode);
    }
}
