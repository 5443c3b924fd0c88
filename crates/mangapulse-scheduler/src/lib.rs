//! # MangaPulse Scheduler
//!
//! The check-and-notify engine: decides which titles to look up each cycle,
//! classifies fetch results against the ledger, and fans out one bulk push
//! per changed title.
//!
//! ## Architecture
//! ```text
//! WatchService (tokio interval + manual run-now, one cycle mutex)
//!   └── WatchEngine.run_cycle()
//!         ├── RotationScheduler: slot N of every watchlist → this cycle's batch
//!         ├── ChapterFetcher.latest_chapter() per batch title (sequential, rate-limited)
//!         ├── ChangeDetector: FIRST_SEEN / CHANGED / UNCHANGED vs. Ledger
//!         ├── Ledger.upsert(): always reflects the newest successful fetch
//!         └── dispatch_changes(): subscriber tokens → one bulk send per title
//! ```
//!
//! Rotation bounds the per-cycle fetch cost by the longest watchlist instead
//! of the total subscription count: a title shared by K users at the same
//! slot is fetched once, and over `max_len` non-skip cycles every slot of
//! every watchlist is visited exactly once.

pub mod detector;
pub mod dispatch;
pub mod engine;
pub mod ledger;
pub mod rotation;

pub use detector::{ChangeDetector, Classification};
pub use dispatch::{dispatch_changes, DispatchSummary, PendingChange};
pub use engine::{CycleReport, WatchEngine, WatchService, WatchStatus};
pub use ledger::{Ledger, LedgerEntry};
pub use rotation::{RotationPlan, RotationScheduler};
