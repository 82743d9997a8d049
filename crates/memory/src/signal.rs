//! Regex panels that classify turn content by how strongly it signals a
//! durable memory worth extracting. Generalized from a single keyword-list
//! heuristic to regex panels with an explicit three-level scale.

use regex::Regex;
use std::sync::OnceLock;

/// Signal strength assigned to a single turn by [`scan_turn`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum SignalLevel {
    None,
    Low,
    Medium,
    High,
}

fn high_signal_patterns() -> &'static [Regex] {
    static PATTERNS: OnceLock<Vec<Regex>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        [
            r"(?i)\bactually,?\s+i\s+(prefer|want|meant|need)\b",
            r"(?i)\bno,?\s+(that'?s|it'?s)\s+not\s+(right|correct)\b",
            r"(?i)\bfrom now on\b",
            r"(?i)\bi\s+am\s+(a|an)\b.{0,40}\b(engineer|developer|designer|manager|founder|student)\b",
            r"(?i)\bmy name is\b",
            r"(?i)\bi\s+(decided|have decided|'ve decided)\s+to\b",
            r"(?i)\bwe\s+(decided|have decided|'ve decided)\s+to\b",
            r"(?i)\bi\s+(will|promise to|commit to)\b",
            r"(?i)\bplease\s+(always|never)\b",
            r"(?i)\b(correction|to correct|i misspoke)\b",
        ]
        .iter()
        .map(|p| Regex::new(p).expect("built-in high-signal pattern must compile"))
        .collect()
    })
}

fn medium_signal_patterns() -> &'static [Regex] {
    static PATTERNS: OnceLock<Vec<Regex>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        [
            r"(?i)\bi\s+(think|believe|guess|suppose)\b",
            r"(?i)\b(usually|typically|generally|often|most of the time)\b",
            r"(?i)\bi\s+(kind of|sort of|tend to)\b",
            r"(?i)\bmaybe\s+i\b",
            r"(?i)\bi\s+(like|enjoy|dislike)\b",
        ]
        .iter()
        .map(|p| Regex::new(p).expect("built-in medium-signal pattern must compile"))
        .collect()
    })
}

/// Classify `content` against the built-in high/medium panels plus an
/// optional user-supplied high-signal panel (`highSignalPatterns` in
/// config). Level is `high` if any high pattern (built-in or user-supplied)
/// matches; `medium` if ≥2 medium matches; `low` if exactly 1 medium match;
/// else `none`.
pub fn scan_turn(content: &str, user_high_signal: &[Regex]) -> SignalLevel {
    if high_signal_patterns().iter().any(|re| re.is_match(content))
        || user_high_signal.iter().any(|re| re.is_match(content))
    {
        return SignalLevel::High;
    }

    let medium_hits = medium_signal_patterns()
        .iter()
        .filter(|re| re.is_match(content))
        .count();

    match medium_hits {
        0 => SignalLevel::None,
        1 => SignalLevel::Low,
        _ => SignalLevel::Medium,
    }
}

/// Compile a user-supplied regex panel, silently dropping patterns that fail
/// to compile (logged by the caller) rather than rejecting the whole panel.
pub fn compile_user_patterns(raw: &[String]) -> Vec<Regex> {
    raw.iter()
        .filter_map(|pattern| match Regex::new(pattern) {
            Ok(re) => Some(re),
            Err(err) => {
                tracing::warn!(pattern = %pattern, error = %err, "invalid user-supplied high-signal pattern, skipping");
                None
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn correction_phrase_is_high_signal() {
        assert_eq!(
            scan_turn("Actually, I prefer spaces over tabs", &[]),
            SignalLevel::High
        );
    }

    #[test]
    fn from_now_on_is_high_signal() {
        assert_eq!(scan_turn("From now on, call me Sam", &[]), SignalLevel::High);
    }

    #[test]
    fn single_hedge_is_low_signal() {
        assert_eq!(scan_turn("I think it works fine", &[]), SignalLevel::Low);
    }

    #[test]
    fn two_hedges_is_medium_signal() {
        assert_eq!(
            scan_turn("I think this usually happens, I guess", &[]),
            SignalLevel::Medium
        );
    }

    #[test]
    fn plain_text_is_no_signal() {
        assert_eq!(scan_turn("ok", &[]), SignalLevel::None);
    }

    #[test]
    fn user_supplied_pattern_escalates_to_high() {
        let user = compile_user_patterns(&["(?i)\\bproject nightingale\\b".to_string()]);
        assert_eq!(
            scan_turn("we're calling it Project Nightingale", &user),
            SignalLevel::High
        );
    }

    #[test]
    fn invalid_user_pattern_is_skipped_not_fatal() {
        let user = compile_user_patterns(&["(unterminated".to_string()]);
        assert!(user.is_empty());
    }
}
