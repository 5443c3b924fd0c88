//! # MangaPulse Core
//!
//! Shared foundation for the MangaPulse watcher: error type, configuration,
//! data model, and the collaborator traits the engine is built against.
//!
//! The engine crate (`mangapulse-scheduler`) only ever talks to the outside
//! world through the traits defined here — chapter sources, the watchlist
//! registry, and the push transport are all swappable.

pub mod config;
pub mod error;
pub mod traits;
pub mod types;

pub use config::MangaPulseConfig;
pub use error::{MangaPulseError, Result};
pub use traits::{ChapterFetcher, Notifier, WatchlistRegistry};
pub use types::{BulkReport, ChapterInfo, ComparatorMode, FetchOutcome, WatchAccount};
