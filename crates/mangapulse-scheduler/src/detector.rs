//! Change detection — classify a fetched chapter label against the ledger.

use mangapulse_core::types::ComparatorMode;

use crate::ledger::LedgerEntry;

/// How a fetched label relates to the last observed state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Classification {
    /// No ledger entry existed. Recorded, but never notified — this
    /// prevents a notification burst when a title is newly tracked.
    FirstSeen,
    /// The label differs from the last observed one. Identity only: a
    /// label that went backwards is still a change.
    Changed { previous: String },
    /// Same label as last time.
    Unchanged,
}

/// Stateless classifier with a pluggable label comparator.
#[derive(Debug, Clone, Copy)]
pub struct ChangeDetector {
    mode: ComparatorMode,
}

impl ChangeDetector {
    pub fn new(mode: ComparatorMode) -> Self {
        Self { mode }
    }

    pub fn classify(&self, previous: Option<&LedgerEntry>, fetched: &str) -> Classification {
        match previous {
            None => Classification::FirstSeen,
            Some(entry) if self.labels_equal(&entry.chapter, fetched) => {
                Classification::Unchanged
            }
            Some(entry) => Classification::Changed {
                previous: entry.chapter.clone(),
            },
        }
    }

    fn labels_equal(&self, a: &str, b: &str) -> bool {
        match self.mode {
            ComparatorMode::Structural => a == b,
            ComparatorMode::Numeric => {
                match (a.trim().parse::<f64>(), b.trim().parse::<f64>()) {
                    (Ok(x), Ok(y)) => x == y,
                    _ => a == b,
                }
            }
        }
    }
}

impl Default for ChangeDetector {
    fn default() -> Self {
        Self::new(ComparatorMode::Structural)
    }
}
