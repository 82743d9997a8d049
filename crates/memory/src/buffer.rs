//! In-memory window of recent turns, with a pure trigger-decision function.
//! Persistence (lazy-load on first call, persist-after-mutation) is layered
//! on top by [`crate::store::ContentStore`]; this module never touches disk.

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::signal::{scan_turn, SignalLevel};
use crate::turn::Turn;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerMode {
    Smart,
    EveryN,
    TimeBased,
}

impl Default for TriggerMode {
    fn default() -> Self {
        Self::Smart
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerDecision {
    ExtractNow,
    ExtractBatch,
    KeepBuffering,
}

/// Parameters controlling when the buffer triggers extraction. Owned by
/// `EngramConfig` in the `engram-config` crate; passed in by reference so
/// this module stays decoupled from the config crate.
#[derive(Debug, Clone)]
pub struct TriggerParams {
    pub mode: TriggerMode,
    pub buffer_max_turns: usize,
    pub buffer_max_minutes: i64,
}

impl Default for TriggerParams {
    fn default() -> Self {
        Self {
            mode: TriggerMode::Smart,
            buffer_max_turns: 20,
            buffer_max_minutes: 30,
        }
    }
}

/// Ordered sequence of turns, plus extraction bookkeeping. One per memory
/// root (or per namespace, when namespaces are enabled).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BufferState {
    pub turns: Vec<Turn>,
    pub last_extraction_at: Option<DateTime<Utc>>,
    pub extraction_count: u64,
}

impl BufferState {
    /// Enqueue `turn` and decide whether to trigger extraction.
    ///
    /// Pure in its inputs `(turn, self, params, user_high_signal)` — the
    /// same arguments always produce the same decision for a given buffer
    /// content; the only impurity is the mutation of `self.turns`, mirrored
    /// exactly by the returned decision.
    pub fn add_turn(
        &mut self,
        turn: Turn,
        params: &TriggerParams,
        user_high_signal: &[Regex],
    ) -> TriggerDecision {
        let level = scan_turn(&turn.content, user_high_signal);
        self.turns.push(turn);

        match params.mode {
            TriggerMode::Smart => {
                if level == SignalLevel::High {
                    return TriggerDecision::ExtractNow;
                }
                if self.turns.len() >= params.buffer_max_turns {
                    return TriggerDecision::ExtractBatch;
                }
                if self.minutes_since_last_extraction() >= params.buffer_max_minutes {
                    return TriggerDecision::ExtractBatch;
                }
                TriggerDecision::KeepBuffering
            }
            TriggerMode::EveryN => {
                if self.turns.len() >= params.buffer_max_turns {
                    TriggerDecision::ExtractBatch
                } else {
                    TriggerDecision::KeepBuffering
                }
            }
            TriggerMode::TimeBased => {
                if self.minutes_since_last_extraction() >= params.buffer_max_minutes {
                    TriggerDecision::ExtractBatch
                } else {
                    TriggerDecision::KeepBuffering
                }
            }
        }
    }

    fn minutes_since_last_extraction(&self) -> i64 {
        match self.last_extraction_at {
            Some(ts) => (Utc::now() - ts).num_minutes(),
            // Never extracted: treat as "infinitely stale" so a fresh buffer
            // with no prior extraction can still trigger on elapsed time
            // once it has any turns, instead of never triggering.
            None => i64::MAX,
        }
    }

    /// The substantive (non-whitespace) subset of buffered turns, as
    /// consumed by the extraction pipeline.
    pub fn substantive_turns(&self) -> Vec<&Turn> {
        self.turns.iter().filter(|t| t.is_substantive()).collect()
    }

    /// Empty the turn list, stamp `lastExtractionAt = now`, and bump
    /// `extractionCount`.
    pub fn clear_after_extraction(&mut self) {
        self.turns.clear();
        self.last_extraction_at = Some(Utc::now());
        self.extraction_count += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(mode: TriggerMode) -> TriggerParams {
        TriggerParams {
            mode,
            buffer_max_turns: 3,
            buffer_max_minutes: 30,
        }
    }

    #[test]
    fn high_signal_triggers_extract_now_in_smart_mode() {
        let mut buf = BufferState::default();
        let decision = buf.add_turn(
            Turn::user("Actually, I prefer spaces over tabs"),
            &params(TriggerMode::Smart),
            &[],
        );
        assert_eq!(decision, TriggerDecision::ExtractNow);
    }

    #[test]
    fn buffer_at_exactly_max_turns_triggers_extract_batch() {
        let mut buf = BufferState::default();
        let p = params(TriggerMode::Smart);
        assert_eq!(
            buf.add_turn(Turn::user("hi"), &p, &[]),
            TriggerDecision::KeepBuffering
        );
        assert_eq!(
            buf.add_turn(Turn::user("how are you"), &p, &[]),
            TriggerDecision::KeepBuffering
        );
        assert_eq!(
            buf.add_turn(Turn::user("fine thanks"), &p, &[]),
            TriggerDecision::ExtractBatch
        );
    }

    #[test]
    fn stale_last_extraction_triggers_extract_batch() {
        let mut buf = BufferState {
            last_extraction_at: Some(Utc::now() - chrono::Duration::minutes(31)),
            ..Default::default()
        };
        let decision = buf.add_turn(Turn::user("ok"), &params(TriggerMode::Smart), &[]);
        assert_eq!(decision, TriggerDecision::ExtractBatch);
    }

    #[test]
    fn every_n_mode_ignores_signal_level() {
        let mut buf = BufferState::default();
        let p = params(TriggerMode::EveryN);
        let decision = buf.add_turn(Turn::user("Actually, I prefer spaces"), &p, &[]);
        assert_eq!(decision, TriggerDecision::KeepBuffering);
    }

    #[test]
    fn clear_after_extraction_resets_turns_and_bumps_count() {
        let mut buf = BufferState::default();
        buf.add_turn(Turn::user("hi"), &params(TriggerMode::Smart), &[]);
        buf.clear_after_extraction();
        assert!(buf.turns.is_empty());
        assert_eq!(buf.extraction_count, 1);
        assert!(buf.last_extraction_at.is_some());
    }

    #[test]
    fn substantive_turns_filters_whitespace_only() {
        let mut buf = BufferState::default();
        buf.turns.push(Turn::user("   "));
        buf.turns.push(Turn::user("real content"));
        assert_eq!(buf.substantive_turns().len(), 1);
    }
}
