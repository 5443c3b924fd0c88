//! Rotation scheduling — bound the per-cycle fetch cost.
//!
//! Instead of checking every tracked title on every cycle, each cycle
//! checks one slot: index `position` of every user's watchlist. Network
//! cost per cycle is therefore bounded by the number of distinct titles at
//! one index, and a full sweep takes `max_len` cycles.

use std::collections::HashSet;

use mangapulse_core::types::WatchAccount;

/// What the scheduler decided to do this cycle.
#[derive(Debug, Clone, PartialEq)]
pub enum RotationPlan {
    /// Titles occupying the current slot, deduplicated in discovery order,
    /// plus the longest watchlist length (the wrap bound).
    Batch { titles: Vec<String>, max_len: usize },
    /// Every watchlist is shorter than `position + 1`: reset to slot 0 and
    /// fetch nothing this cycle. No forward search for a non-empty slot.
    SkipTick,
}

/// Rotation position state. Volatile — restarts begin again at slot 0.
#[derive(Debug, Default)]
pub struct RotationScheduler {
    position: usize,
}

impl RotationScheduler {
    pub fn new() -> Self {
        Self { position: 0 }
    }

    /// Current slot index.
    pub fn position(&self) -> usize {
        self.position
    }

    /// Compute this cycle's batch from the current accounts snapshot.
    /// Does not mutate position — the caller advances or resets depending
    /// on how the cycle went.
    pub fn plan(&self, accounts: &[WatchAccount]) -> RotationPlan {
        let max_len = accounts
            .iter()
            .map(|a| a.watchlist.len())
            .max()
            .unwrap_or(0);

        let mut titles = Vec::new();
        let mut seen = HashSet::new();
        for account in accounts {
            if let Some(title) = account.watchlist.get(self.position) {
                if seen.insert(title.clone()) {
                    titles.push(title.clone());
                }
            }
        }

        if titles.is_empty() {
            RotationPlan::SkipTick
        } else {
            RotationPlan::Batch { titles, max_len }
        }
    }

    /// Advance to the next slot after a processed batch, wrapping at the
    /// longest watchlist length.
    pub fn advance(&mut self, max_len: usize) {
        self.position += 1;
        if self.position >= max_len {
            self.position = 0;
        }
    }

    /// Reset to slot 0 (skip tick, or process restart).
    pub fn reset(&mut self) {
        self.position = 0;
    }
}
