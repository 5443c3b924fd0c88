//! Ledger — last observed chapter state per title, persisted as a single
//! JSON snapshot. Human-readable, written only on mutation, tolerant of a
//! missing or corrupt file on load.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use mangapulse_core::error::{MangaPulseError, Result};
use mangapulse_core::types::ChapterInfo;
use serde::{Deserialize, Serialize};

/// Last observed state for one title. Entries are never deleted, even if
/// no user still tracks the title.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerEntry {
    /// Chapter label as last fetched, verbatim.
    pub chapter: String,
    pub url: Option<String>,
    pub image: Option<String>,
    /// Refreshed on every successful fetch, changed or not.
    pub last_checked: DateTime<Utc>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct LedgerSnapshot {
    #[serde(default)]
    entries: HashMap<String, LedgerEntry>,
    #[serde(default)]
    last_cycle: Option<DateTime<Utc>>,
}

/// Title → last observed chapter state, backed by a JSON file.
pub struct Ledger {
    path: PathBuf,
    entries: HashMap<String, LedgerEntry>,
    last_cycle: Option<DateTime<Utc>>,
}

impl Ledger {
    /// Open (or initialize) a ledger at the given file path.
    pub fn open(path: &Path) -> Self {
        let snapshot = Self::load_snapshot(path);
        Self {
            path: path.to_path_buf(),
            entries: snapshot.entries,
            last_cycle: snapshot.last_cycle,
        }
    }

    fn load_snapshot(path: &Path) -> LedgerSnapshot {
        if !path.exists() {
            return LedgerSnapshot::default();
        }
        match std::fs::read_to_string(path) {
            Ok(json) => serde_json::from_str(&json).unwrap_or_else(|e| {
                tracing::warn!("⚠️ Failed to parse ledger {}: {e}", path.display());
                LedgerSnapshot::default()
            }),
            Err(e) => {
                tracing::warn!("⚠️ Failed to read ledger {}: {e}", path.display());
                LedgerSnapshot::default()
            }
        }
    }

    /// Last observed state for a title.
    pub fn get(&self, title: &str) -> Option<&LedgerEntry> {
        self.entries.get(title)
    }

    /// Overwrite the entry for a title with the newest fetch result and
    /// refresh its check timestamp. Called for every successful fetch,
    /// regardless of how it was classified.
    pub fn upsert(&mut self, title: &str, info: &ChapterInfo) -> Result<()> {
        self.entries.insert(
            title.to_string(),
            LedgerEntry {
                chapter: info.chapter.clone(),
                url: info.url.clone(),
                image: info.image.clone(),
                last_checked: Utc::now(),
            },
        );
        self.save()
    }

    /// Record the completion time of a cycle.
    pub fn mark_cycle(&mut self, at: DateTime<Utc>) -> Result<()> {
        self.last_cycle = Some(at);
        self.save()
    }

    /// When the last cycle completed, if any cycle ever ran.
    pub fn last_cycle(&self) -> Option<DateTime<Utc>> {
        self.last_cycle
    }

    /// Number of titles ever observed.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn save(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| MangaPulseError::Persistence(format!("create dir: {e}")))?;
        }
        let snapshot = LedgerSnapshot {
            entries: self.entries.clone(),
            last_cycle: self.last_cycle,
        };
        let json = serde_json::to_string_pretty(&snapshot)
            .map_err(|e| MangaPulseError::Persistence(format!("serialize ledger: {e}")))?;
        std::fs::write(&self.path, &json)
            .map_err(|e| MangaPulseError::Persistence(format!("write ledger: {e}")))?;
        tracing::debug!(
            "💾 Saved {} ledger entries to {}",
            self.entries.len(),
            self.path.display()
        );
        Ok(())
    }
}
