//! Collaborator traits — the seams between the engine and the outside world.

use async_trait::async_trait;

use crate::error::Result;
use crate::types::{BulkReport, FetchOutcome, NotifyData, WatchAccount};

/// Resolves a title name to its latest known chapter.
///
/// Implementations should swallow their own failures and return
/// `Ok(FetchOutcome::NotFound)`; an `Err` is treated the same way by the
/// engine (the title is skipped for this cycle and retried on its next
/// rotation slot).
#[async_trait]
pub trait ChapterFetcher: Send + Sync {
    async fn latest_chapter(&self, title: &str) -> Result<FetchOutcome>;
}

/// Exposes the user → watchlist mapping and a push token per user.
#[async_trait]
pub trait WatchlistRegistry: Send + Sync {
    /// All registered accounts, in a stable order.
    async fn accounts(&self) -> Result<Vec<WatchAccount>>;
}

/// Push transport: delivers one notification to many device tokens at once.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Send a single notification to every token in `tokens`.
    ///
    /// Best-effort: partial failure is reported through the counts in
    /// [`BulkReport`], not as an `Err`.
    async fn send_bulk(
        &self,
        tokens: &[String],
        title: &str,
        body: &str,
        data: &NotifyData,
    ) -> Result<BulkReport>;
}
