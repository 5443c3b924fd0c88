//! Notification fan-out — one bulk push per changed title.
//!
//! The ledger has already advanced past the old chapter by the time a send
//! happens, so a failed or partial send is terminal for that change: it is
//! logged and never retried (best-effort delivery, accepted gap).

use mangapulse_core::traits::Notifier;
use mangapulse_core::types::{NotifyData, WatchAccount};

/// A detected change, alive only within the cycle that produced it.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingChange {
    pub title: String,
    pub new_chapter: String,
    pub old_chapter: String,
    pub url: Option<String>,
    pub image: Option<String>,
}

/// Per-cycle fan-out totals.
#[derive(Debug, Clone, Copy, Default)]
pub struct DispatchSummary {
    /// Bulk sends attempted (one per changed title with subscribers).
    pub attempted: usize,
    /// Changed titles with no remaining subscribers.
    pub without_subscribers: usize,
    /// Device-level delivery counts across all sends.
    pub delivered: u32,
    pub failed: u32,
}

/// Deliver every pending change to its subscribers.
///
/// Subscriber tokens are resolved per title from the full account list, one
/// bulk send per title regardless of subscriber count. A send failure for
/// one title never prevents the next title's send. Dispatch order between
/// titles is unspecified.
pub async fn dispatch_changes(
    changes: &[PendingChange],
    accounts: &[WatchAccount],
    notifier: &dyn Notifier,
) -> DispatchSummary {
    let mut summary = DispatchSummary::default();

    for change in changes {
        let tokens = subscriber_tokens(&change.title, accounts);
        if tokens.is_empty() {
            tracing::info!("ℹ️ No subscribers left for '{}'", change.title);
            summary.without_subscribers += 1;
            continue;
        }

        let title = format!("📖 {}", change.title);
        let body = format!("New chapter available! Chapter {}", change.new_chapter);
        let data = change_payload(change);

        summary.attempted += 1;
        match notifier.send_bulk(&tokens, &title, &body, &data).await {
            Ok(report) => {
                summary.delivered += report.success_count;
                summary.failed += report.failure_count;
                tracing::info!(
                    "✅ Notification sent: '{}' → {}/{} devices",
                    change.title,
                    report.success_count,
                    report.total
                );
            }
            Err(e) => {
                // Terminal: the ledger already holds the new chapter.
                summary.failed += tokens.len() as u32;
                tracing::warn!("⚠️ Notification failed for '{}': {e}", change.title);
            }
        }
    }

    summary
}

/// Tokens of every account whose watchlist contains the title, deduplicated.
fn subscriber_tokens(title: &str, accounts: &[WatchAccount]) -> Vec<String> {
    let mut tokens = Vec::new();
    for account in accounts {
        if account.watchlist.iter().any(|t| t == title)
            && !tokens.contains(&account.token)
        {
            tokens.push(account.token.clone());
        }
    }
    tokens
}

/// Data payload carried alongside the notification.
fn change_payload(change: &PendingChange) -> NotifyData {
    let mut data = NotifyData::new();
    data.insert("type".into(), "chapter_update".into());
    data.insert("manga_name".into(), change.title.clone());
    data.insert("chapter".into(), change.new_chapter.clone());
    data.insert("url".into(), change.url.clone().unwrap_or_default());
    data.insert("image".into(), change.image.clone().unwrap_or_default());
    data
}
