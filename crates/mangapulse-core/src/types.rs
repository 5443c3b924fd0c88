//! Data model shared between the engine and its collaborators.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One subscribed device: a push token plus an ordered watchlist.
///
/// The watchlist order is semantically meaningful — index N of every
/// account forms rotation slot N, so reordering a watchlist changes when
/// its titles get checked, not just how they display.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatchAccount {
    /// Stable device identifier.
    pub device_id: String,
    /// Push token for this device.
    pub token: String,
    /// Ordered list of tracked title names (case-sensitive, as entered).
    pub watchlist: Vec<String>,
    /// When this account was first registered.
    pub created_at: DateTime<Utc>,
}

/// Latest-chapter data for a title, as reported by a chapter source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChapterInfo {
    /// Chapter label as published (kept verbatim — "12" and "12.0" differ).
    pub chapter: String,
    /// Link to the chapter, when the source provides one.
    pub url: Option<String>,
    /// Cover image URL, when the source provides one.
    pub image: Option<String>,
}

/// Result of a single chapter lookup.
///
/// Every fetch-side problem (unreachable source, timeout, parse miss)
/// collapses into `NotFound` — the engine does not distinguish them.
#[derive(Debug, Clone, PartialEq)]
pub enum FetchOutcome {
    Found(ChapterInfo),
    NotFound,
}

/// Outcome of one bulk push send.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct BulkReport {
    pub success_count: u32,
    pub failure_count: u32,
    pub total: u32,
}

impl BulkReport {
    /// Merge another report into this one (used when a send is chunked).
    pub fn absorb(&mut self, other: BulkReport) {
        self.success_count += other.success_count;
        self.failure_count += other.failure_count;
        self.total += other.total;
    }
}

/// How chapter labels are compared when classifying a fetch result.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ComparatorMode {
    /// Plain string equality — "12" and "12.0" are different chapters.
    #[default]
    Structural,
    /// Parse both labels as numbers when possible; fall back to string
    /// equality when either side does not parse. Identity only — there is
    /// no ordering check in either mode.
    Numeric,
}

/// Key/value payload attached to a push notification.
pub type NotifyData = BTreeMap<String, String>;
