//! Watch engine — runs one check-and-notify cycle, and the service wrapper
//! that drives it from a tokio interval plus a manual run-now entry point.
//!
//! Both trigger sources go through one `tokio::sync::Mutex` held for the
//! entire cycle body, so a manual run can never interleave with the timer
//! over the rotation position or the ledger.

use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, Notify};
use tokio::task::JoinHandle;

use mangapulse_core::traits::{ChapterFetcher, Notifier, WatchlistRegistry};
use mangapulse_core::types::{ComparatorMode, FetchOutcome};

use crate::detector::{ChangeDetector, Classification};
use crate::dispatch::{dispatch_changes, DispatchSummary, PendingChange};
use crate::ledger::Ledger;
use crate::rotation::{RotationPlan, RotationScheduler};

/// Summary of one cycle.
#[derive(Debug, Clone, Copy, Default)]
pub struct CycleReport {
    /// True when this cycle fetched nothing (no accounts, or skip tick).
    pub skipped: bool,
    /// Rotation slot this cycle processed.
    pub slot: usize,
    pub batch_size: usize,
    pub first_seen: usize,
    pub changed: usize,
    pub unchanged: usize,
    pub not_found: usize,
    pub dispatch: DispatchSummary,
}

/// Owns the rotation position, the ledger handle, and the collaborator
/// handles. One instance per process; no module-level state.
pub struct WatchEngine {
    rotation: RotationScheduler,
    detector: ChangeDetector,
    ledger: Ledger,
    fetcher: Arc<dyn ChapterFetcher>,
    registry: Arc<dyn WatchlistRegistry>,
    notifier: Arc<dyn Notifier>,
    fetch_delay: Duration,
}

impl WatchEngine {
    pub fn new(
        ledger: Ledger,
        fetcher: Arc<dyn ChapterFetcher>,
        registry: Arc<dyn WatchlistRegistry>,
        notifier: Arc<dyn Notifier>,
        comparator: ComparatorMode,
        fetch_delay: Duration,
    ) -> Self {
        Self {
            rotation: RotationScheduler::new(),
            detector: ChangeDetector::new(comparator),
            ledger,
            fetcher,
            registry,
            notifier,
            fetch_delay,
        }
    }

    /// Execute one full cycle: plan the batch, fetch and classify each
    /// title, update the ledger, fan out notifications, advance rotation.
    ///
    /// No failure in here is fatal: a failing title is logged and skipped,
    /// a failing ledger write is logged and the cycle keeps going.
    pub async fn run_cycle(&mut self) -> CycleReport {
        let mut report = CycleReport {
            slot: self.rotation.position(),
            ..Default::default()
        };

        let accounts = match self.registry.accounts().await {
            Ok(accounts) => accounts,
            Err(e) => {
                tracing::warn!("⚠️ Could not load accounts, skipping cycle: {e}");
                report.skipped = true;
                return report;
            }
        };

        if accounts.is_empty() {
            tracing::debug!("No registered accounts — nothing to check");
            report.skipped = true;
            self.finish_cycle();
            return report;
        }

        match self.rotation.plan(&accounts) {
            RotationPlan::SkipTick => {
                tracing::debug!(
                    "Slot {} is past every watchlist — resetting rotation",
                    self.rotation.position()
                );
                self.rotation.reset();
                report.skipped = true;
            }
            RotationPlan::Batch { titles, max_len } => {
                report.batch_size = titles.len();
                tracing::info!(
                    "🔍 Checking slot {} — {} title(s)",
                    self.rotation.position(),
                    titles.len()
                );

                let mut changes: Vec<PendingChange> = Vec::new();
                for (i, title) in titles.iter().enumerate() {
                    if i > 0 && !self.fetch_delay.is_zero() {
                        // Rate limit toward the upstream source.
                        tokio::time::sleep(self.fetch_delay).await;
                    }
                    self.check_title(title, &mut changes, &mut report).await;
                }

                if !changes.is_empty() {
                    tracing::info!("📢 {} new chapter(s) found", changes.len());
                    report.dispatch =
                        dispatch_changes(&changes, &accounts, self.notifier.as_ref()).await;
                }

                self.rotation.advance(max_len);
            }
        }

        self.finish_cycle();
        report
    }

    /// Fetch and classify one title, updating the ledger and collecting a
    /// pending change when the chapter label moved.
    async fn check_title(
        &mut self,
        title: &str,
        changes: &mut Vec<PendingChange>,
        report: &mut CycleReport,
    ) {
        let outcome = match self.fetcher.latest_chapter(title).await {
            Ok(outcome) => outcome,
            // Fetch-side errors are not distinguished from a miss.
            Err(e) => {
                tracing::debug!("Fetch error for '{title}': {e}");
                FetchOutcome::NotFound
            }
        };

        let info = match outcome {
            FetchOutcome::Found(info) => info,
            FetchOutcome::NotFound => {
                // Ledger untouched; retried on the next rotation pass.
                tracing::info!("❌ Not found: {title}");
                report.not_found += 1;
                return;
            }
        };

        let classification = self.detector.classify(self.ledger.get(title), &info.chapter);

        // The ledger always reflects the newest successful fetch, whatever
        // the classification. A failed write is logged, never fatal — worst
        // case the same change is detected again next pass.
        if let Err(e) = self.ledger.upsert(title, &info) {
            tracing::warn!("⚠️ Ledger write failed for '{title}': {e}");
        }

        match classification {
            Classification::FirstSeen => {
                tracing::info!("📝 First record: {title} — Chapter {}", info.chapter);
                report.first_seen += 1;
            }
            Classification::Changed { previous } => {
                tracing::info!(
                    "✅ NEW CHAPTER: {title} — {previous} → {}",
                    info.chapter
                );
                report.changed += 1;
                changes.push(PendingChange {
                    title: title.to_string(),
                    new_chapter: info.chapter,
                    old_chapter: previous,
                    url: info.url,
                    image: info.image,
                });
            }
            Classification::Unchanged => {
                tracing::debug!("No change: {title} — Chapter {}", info.chapter);
                report.unchanged += 1;
            }
        }
    }

    fn finish_cycle(&mut self) {
        if let Err(e) = self.ledger.mark_cycle(Utc::now()) {
            tracing::warn!("⚠️ Failed to record cycle timestamp: {e}");
        }
    }

    /// Number of titles the ledger has ever observed.
    pub fn tracked_titles(&self) -> usize {
        self.ledger.len()
    }

    /// Completion time of the most recent cycle.
    pub fn last_cycle(&self) -> Option<DateTime<Utc>> {
        self.ledger.last_cycle()
    }

    #[cfg(test)]
    pub(crate) fn ledger(&self) -> &Ledger {
        &self.ledger
    }
}

/// Reported by [`WatchService::status`].
#[derive(Debug, Clone, Copy)]
pub struct WatchStatus {
    pub is_running: bool,
    pub next_scheduled_at: Option<DateTime<Utc>>,
    pub last_cycle_at: Option<DateTime<Utc>>,
    pub tracked_titles: usize,
}

struct RunningTask {
    handle: JoinHandle<()>,
    shutdown: Arc<Notify>,
}

/// Engine-derived status fields, mirrored outside the cycle mutex so a
/// status query never waits for an in-flight cycle.
#[derive(Debug, Clone, Copy, Default)]
struct EngineSnapshot {
    last_cycle_at: Option<DateTime<Utc>>,
    tracked_titles: usize,
}

impl EngineSnapshot {
    fn of(engine: &WatchEngine) -> Self {
        Self {
            last_cycle_at: engine.last_cycle(),
            tracked_titles: engine.tracked_titles(),
        }
    }
}

/// Service wrapper: periodic trigger, manual trigger, lifecycle, status.
pub struct WatchService {
    engine: Arc<Mutex<WatchEngine>>,
    interval: Duration,
    task: StdMutex<Option<RunningTask>>,
    next_run: Arc<StdMutex<Option<DateTime<Utc>>>>,
    snapshot: Arc<StdMutex<EngineSnapshot>>,
}

impl WatchService {
    pub fn new(engine: WatchEngine, interval: Duration) -> Self {
        let snapshot = EngineSnapshot::of(&engine);
        Self {
            engine: Arc::new(Mutex::new(engine)),
            interval,
            task: StdMutex::new(None),
            next_run: Arc::new(StdMutex::new(None)),
            snapshot: Arc::new(StdMutex::new(snapshot)),
        }
    }

    /// Begin periodic firing. The first cycle runs one full interval after
    /// start, not immediately.
    pub fn start(&self) {
        let mut task = self.task.lock().unwrap();
        if task.as_ref().is_some_and(|t| !t.handle.is_finished()) {
            tracing::warn!("⚠️ Watch service already running");
            return;
        }

        let engine = Arc::clone(&self.engine);
        let next_run = Arc::clone(&self.next_run);
        let snapshot = Arc::clone(&self.snapshot);
        let shutdown = Arc::new(Notify::new());
        let shutdown_rx = Arc::clone(&shutdown);
        let interval = self.interval;

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // A cycle can outlast the interval; reschedule a full interval
            // after the late tick instead of firing the backlog at once.
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // The first tick of a tokio interval completes immediately.
            ticker.tick().await;
            loop {
                *next_run.lock().unwrap() = Some(next_fire_time(interval));
                tokio::select! {
                    _ = ticker.tick() => {
                        let mut engine = engine.lock().await;
                        let report = engine.run_cycle().await;
                        *snapshot.lock().unwrap() = EngineSnapshot::of(&engine);
                        log_report(&report);
                    }
                    // Observed between cycles only — an in-flight cycle is
                    // never cancelled.
                    _ = shutdown_rx.notified() => break,
                }
            }
            *next_run.lock().unwrap() = None;
        });

        *task = Some(RunningTask { handle, shutdown });
        tracing::info!("⏰ Watch service started (every {}s)", interval.as_secs());
    }

    /// Cancel periodic firing. A cycle already underway finishes first.
    pub fn stop(&self) {
        let mut task = self.task.lock().unwrap();
        match task.take() {
            Some(running) => {
                running.shutdown.notify_one();
                *self.next_run.lock().unwrap() = None;
                tracing::info!("✓ Watch service stopped");
            }
            None => tracing::warn!("⚠️ Watch service is not running"),
        }
    }

    /// Force one cycle right now, on the caller's task. Shares the engine
    /// mutex with the periodic trigger, so the two can never overlap.
    pub async fn run_now(&self) -> CycleReport {
        tracing::info!("🚀 Manual check triggered");
        let mut engine = self.engine.lock().await;
        let report = engine.run_cycle().await;
        *self.snapshot.lock().unwrap() = EngineSnapshot::of(&engine);
        log_report(&report);
        report
    }

    pub fn is_running(&self) -> bool {
        self.task
            .lock()
            .unwrap()
            .as_ref()
            .is_some_and(|t| !t.handle.is_finished())
    }

    /// Current state, from mirrored fields. Never waits on the cycle
    /// mutex, so it answers immediately even mid-cycle.
    pub fn status(&self) -> WatchStatus {
        let snapshot = *self.snapshot.lock().unwrap();
        WatchStatus {
            is_running: self.is_running(),
            next_scheduled_at: *self.next_run.lock().unwrap(),
            last_cycle_at: snapshot.last_cycle_at,
            tracked_titles: snapshot.tracked_titles,
        }
    }
}

fn next_fire_time(interval: Duration) -> DateTime<Utc> {
    Utc::now() + chrono::Duration::from_std(interval).unwrap_or_else(|_| chrono::Duration::zero())
}

fn log_report(report: &CycleReport) {
    if report.skipped {
        tracing::info!("🔄 Cycle complete (slot {}): skip tick", report.slot);
    } else {
        tracing::info!(
            "🔄 Cycle complete (slot {}): {} checked, {} new, {} first, {} unchanged, {} missing, {} sent",
            report.slot,
            report.batch_size,
            report.changed,
            report.first_seen,
            report.unchanged,
            report.not_found,
            report.dispatch.attempted
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use mangapulse_core::error::{MangaPulseError, Result};
    use mangapulse_core::types::{BulkReport, ChapterInfo, NotifyData, WatchAccount};
    use std::collections::{HashMap, VecDeque};
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex as SyncMutex;

    fn account(device_id: &str, token: &str, watchlist: &[&str]) -> WatchAccount {
        WatchAccount {
            device_id: device_id.to_string(),
            token: token.to_string(),
            watchlist: watchlist.iter().map(|s| s.to_string()).collect(),
            created_at: Utc::now(),
        }
    }

    fn found(chapter: &str) -> FetchOutcome {
        FetchOutcome::Found(ChapterInfo {
            chapter: chapter.to_string(),
            url: Some(format!("https://example.com/{chapter}")),
            image: None,
        })
    }

    /// Replays a per-title queue of outcomes and records every call.
    struct ScriptedFetcher {
        script: SyncMutex<HashMap<String, VecDeque<FetchOutcome>>>,
        calls: SyncMutex<Vec<String>>,
        fail: bool,
    }

    impl ScriptedFetcher {
        fn new() -> Self {
            Self {
                script: SyncMutex::new(HashMap::new()),
                calls: SyncMutex::new(Vec::new()),
                fail: false,
            }
        }

        fn failing() -> Self {
            Self {
                fail: true,
                ..Self::new()
            }
        }

        fn push(&self, title: &str, outcome: FetchOutcome) {
            self.script
                .lock()
                .unwrap()
                .entry(title.to_string())
                .or_default()
                .push_back(outcome);
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl ChapterFetcher for ScriptedFetcher {
        async fn latest_chapter(&self, title: &str) -> Result<FetchOutcome> {
            self.calls.lock().unwrap().push(title.to_string());
            if self.fail {
                return Err(MangaPulseError::Fetch("source unreachable".into()));
            }
            Ok(self
                .script
                .lock()
                .unwrap()
                .get_mut(title)
                .and_then(|q| q.pop_front())
                .unwrap_or(FetchOutcome::NotFound))
        }
    }

    /// Answers every title after a fixed delay, and flags whether two
    /// fetches were ever in flight at once.
    struct SlowFetcher {
        delay: Duration,
        active: AtomicBool,
        overlapped: AtomicBool,
        calls: SyncMutex<Vec<String>>,
    }

    impl SlowFetcher {
        fn new(delay: Duration) -> Self {
            Self {
                delay,
                active: AtomicBool::new(false),
                overlapped: AtomicBool::new(false),
                calls: SyncMutex::new(Vec::new()),
            }
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl ChapterFetcher for SlowFetcher {
        async fn latest_chapter(&self, title: &str) -> Result<FetchOutcome> {
            if self.active.swap(true, Ordering::SeqCst) {
                self.overlapped.store(true, Ordering::SeqCst);
            }
            self.calls.lock().unwrap().push(title.to_string());
            tokio::time::sleep(self.delay).await;
            self.active.store(false, Ordering::SeqCst);
            Ok(found("1"))
        }
    }

    struct StaticRegistry {
        accounts: SyncMutex<Vec<WatchAccount>>,
    }

    impl StaticRegistry {
        fn new(accounts: Vec<WatchAccount>) -> Self {
            Self {
                accounts: SyncMutex::new(accounts),
            }
        }

        fn replace(&self, accounts: Vec<WatchAccount>) {
            *self.accounts.lock().unwrap() = accounts;
        }
    }

    #[async_trait]
    impl WatchlistRegistry for StaticRegistry {
        async fn accounts(&self) -> Result<Vec<WatchAccount>> {
            Ok(self.accounts.lock().unwrap().clone())
        }
    }

    struct RecordingNotifier {
        sends: SyncMutex<Vec<(Vec<String>, NotifyData)>>,
    }

    impl RecordingNotifier {
        fn new() -> Self {
            Self {
                sends: SyncMutex::new(Vec::new()),
            }
        }

        fn sends(&self) -> Vec<(Vec<String>, NotifyData)> {
            self.sends.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Notifier for RecordingNotifier {
        async fn send_bulk(
            &self,
            tokens: &[String],
            _title: &str,
            _body: &str,
            data: &NotifyData,
        ) -> Result<BulkReport> {
            self.sends
                .lock()
                .unwrap()
                .push((tokens.to_vec(), data.clone()));
            Ok(BulkReport {
                success_count: tokens.len() as u32,
                failure_count: 0,
                total: tokens.len() as u32,
            })
        }
    }

    struct Fixture {
        dir: PathBuf,
        fetcher: Arc<ScriptedFetcher>,
        registry: Arc<StaticRegistry>,
        notifier: Arc<RecordingNotifier>,
        engine: WatchEngine,
    }

    impl Fixture {
        fn new(name: &str, fetcher: ScriptedFetcher, accounts: Vec<WatchAccount>) -> Self {
            let dir = std::env::temp_dir().join(name);
            std::fs::remove_dir_all(&dir).ok();
            let ledger = Ledger::open(&dir.join("ledger.json"));
            let fetcher = Arc::new(fetcher);
            let registry = Arc::new(StaticRegistry::new(accounts));
            let notifier = Arc::new(RecordingNotifier::new());
            let engine = WatchEngine::new(
                ledger,
                Arc::clone(&fetcher) as Arc<dyn ChapterFetcher>,
                Arc::clone(&registry) as Arc<dyn WatchlistRegistry>,
                Arc::clone(&notifier) as Arc<dyn Notifier>,
                ComparatorMode::Structural,
                Duration::ZERO,
            );
            Self {
                dir,
                fetcher,
                registry,
                notifier,
                engine,
            }
        }

        fn cleanup(dir: &PathBuf) {
            std::fs::remove_dir_all(dir).ok();
        }
    }

    #[tokio::test]
    async fn test_first_seen_records_without_notifying() {
        let fetcher = ScriptedFetcher::new();
        fetcher.push("One Piece", found("1171"));
        let mut fx = Fixture::new(
            "mangapulse-test-engine-first-seen",
            fetcher,
            vec![account("u1", "tok-1", &["One Piece"])],
        );

        let report = fx.engine.run_cycle().await;

        assert_eq!(report.first_seen, 1);
        assert_eq!(report.changed, 0);
        assert!(fx.notifier.sends().is_empty());
        assert_eq!(fx.engine.ledger().get("One Piece").unwrap().chapter, "1171");
        Fixture::cleanup(&fx.dir);
    }

    #[tokio::test]
    async fn test_scenario_first_seen_then_change_notifies_once() {
        // Cycle 1: first observation, recorded silently. Cycle 2 (position
        // wrapped): label moved 1171 → 1172, exactly one bulk send.
        let fetcher = ScriptedFetcher::new();
        fetcher.push("One Piece", found("1171"));
        fetcher.push("One Piece", found("1172"));
        let mut fx = Fixture::new(
            "mangapulse-test-engine-scenario",
            fetcher,
            vec![account("u1", "tok-1", &["One Piece"])],
        );

        let r1 = fx.engine.run_cycle().await;
        assert_eq!(r1.first_seen, 1);
        assert!(fx.notifier.sends().is_empty());

        let r2 = fx.engine.run_cycle().await;
        assert_eq!(r2.changed, 1);
        let sends = fx.notifier.sends();
        assert_eq!(sends.len(), 1);
        assert_eq!(sends[0].0, vec!["tok-1"]);
        assert_eq!(sends[0].1.get("manga_name").unwrap(), "One Piece");
        assert_eq!(sends[0].1.get("chapter").unwrap(), "1172");
        assert_eq!(fx.engine.ledger().get("One Piece").unwrap().chapter, "1172");
        Fixture::cleanup(&fx.dir);
    }

    #[tokio::test]
    async fn test_unchanged_refreshes_last_checked_without_notifying() {
        let fetcher = ScriptedFetcher::new();
        fetcher.push("Lookism", found("590"));
        fetcher.push("Lookism", found("590"));
        let mut fx = Fixture::new(
            "mangapulse-test-engine-unchanged",
            fetcher,
            vec![account("u1", "tok-1", &["Lookism"])],
        );

        fx.engine.run_cycle().await;
        let first = fx.engine.ledger().get("Lookism").unwrap().last_checked;

        let report = fx.engine.run_cycle().await;
        assert_eq!(report.unchanged, 1);
        assert!(fx.notifier.sends().is_empty());
        let second = fx.engine.ledger().get("Lookism").unwrap().last_checked;
        assert!(second >= first);
        Fixture::cleanup(&fx.dir);
    }

    #[tokio::test]
    async fn test_rotation_fairness_across_cycles() {
        let fetcher = ScriptedFetcher::new();
        for (title, chapter) in [("A", "1"), ("B", "2"), ("C", "3")] {
            fetcher.push(title, found(chapter));
        }
        let mut fx = Fixture::new(
            "mangapulse-test-engine-fairness",
            fetcher,
            vec![account("u1", "tok-1", &["A", "B"]), account("u2", "tok-2", &["C"])],
        );

        let r1 = fx.engine.run_cycle().await;
        assert_eq!(r1.slot, 0);
        assert_eq!(fx.fetcher.calls(), vec!["A", "C"]);

        let r2 = fx.engine.run_cycle().await;
        assert_eq!(r2.slot, 1);
        assert_eq!(fx.fetcher.calls(), vec!["A", "C", "B"]);

        // max_len = 2, so the third cycle is back at slot 0.
        let r3 = fx.engine.run_cycle().await;
        assert_eq!(r3.slot, 0);
        Fixture::cleanup(&fx.dir);
    }

    #[tokio::test]
    async fn test_shared_title_fetched_once_and_fans_out_to_all() {
        let fetcher = ScriptedFetcher::new();
        fetcher.push("X", found("41"));
        fetcher.push("X", found("42"));
        let mut fx = Fixture::new(
            "mangapulse-test-engine-shared",
            fetcher,
            vec![account("u1", "tok-1", &["X"]), account("u2", "tok-2", &["X"])],
        );

        fx.engine.run_cycle().await;
        // One fetch despite two subscribers.
        assert_eq!(fx.fetcher.calls(), vec!["X"]);

        fx.engine.run_cycle().await;
        assert_eq!(fx.fetcher.calls(), vec!["X", "X"]);
        let sends = fx.notifier.sends();
        assert_eq!(sends.len(), 1);
        assert_eq!(sends[0].0, vec!["tok-1", "tok-2"]);
        Fixture::cleanup(&fx.dir);
    }

    #[tokio::test]
    async fn test_not_found_leaves_ledger_untouched() {
        let fetcher = ScriptedFetcher::new();
        fetcher.push("Gone", found("5"));
        // Second cycle: no scripted outcome → NotFound.
        let mut fx = Fixture::new(
            "mangapulse-test-engine-notfound",
            fetcher,
            vec![account("u1", "tok-1", &["Gone"])],
        );

        fx.engine.run_cycle().await;
        let before = fx.engine.ledger().get("Gone").unwrap().clone();

        let report = fx.engine.run_cycle().await;
        assert_eq!(report.not_found, 1);
        let after = fx.engine.ledger().get("Gone").unwrap();
        assert_eq!(after.chapter, "5");
        assert_eq!(after.last_checked, before.last_checked);
        assert!(fx.notifier.sends().is_empty());
        Fixture::cleanup(&fx.dir);
    }

    #[tokio::test]
    async fn test_fetcher_error_is_treated_as_not_found() {
        let mut fx = Fixture::new(
            "mangapulse-test-engine-fetcher-error",
            ScriptedFetcher::failing(),
            vec![account("u1", "tok-1", &["A"])],
        );

        let report = fx.engine.run_cycle().await;
        assert_eq!(report.not_found, 1);
        assert!(fx.engine.ledger().is_empty());
        Fixture::cleanup(&fx.dir);
    }

    #[tokio::test]
    async fn test_no_accounts_is_a_noop_cycle() {
        let mut fx = Fixture::new(
            "mangapulse-test-engine-noaccounts",
            ScriptedFetcher::new(),
            vec![],
        );

        let report = fx.engine.run_cycle().await;
        assert!(report.skipped);
        assert!(fx.fetcher.calls().is_empty());
        // The cycle still counts as having run.
        assert!(fx.engine.last_cycle().is_some());
        Fixture::cleanup(&fx.dir);
    }

    #[tokio::test]
    async fn test_skip_tick_when_watchlists_shrink() {
        let fetcher = ScriptedFetcher::new();
        for (title, chapter) in [("A", "1"), ("A", "1")] {
            fetcher.push(title, found(chapter));
        }
        fetcher.push("B", found("2"));
        let mut fx = Fixture::new(
            "mangapulse-test-engine-shrink",
            fetcher,
            vec![account("u1", "tok-1", &["A", "B"])],
        );

        fx.engine.run_cycle().await; // slot 0: A
        fx.registry.replace(vec![account("u1", "tok-1", &["A"])]);

        // Slot 1 now points past the only watchlist: skip, no fetch.
        let report = fx.engine.run_cycle().await;
        assert!(report.skipped);
        assert_eq!(fx.fetcher.calls(), vec!["A"]);

        // Rotation was reset, so the next cycle checks slot 0 again.
        let report = fx.engine.run_cycle().await;
        assert_eq!(report.slot, 0);
        assert_eq!(report.batch_size, 1);
        assert_eq!(fx.fetcher.calls(), vec!["A", "A"]);
        Fixture::cleanup(&fx.dir);
    }

    #[tokio::test]
    async fn test_service_run_now_and_status() {
        let fetcher = ScriptedFetcher::new();
        fetcher.push("A", found("7"));
        let fx = Fixture::new(
            "mangapulse-test-service-runnow",
            fetcher,
            vec![account("u1", "tok-1", &["A"])],
        );
        let service = WatchService::new(fx.engine, Duration::from_secs(3600));

        let status = service.status();
        assert!(!status.is_running);
        assert!(status.last_cycle_at.is_none());
        assert_eq!(status.tracked_titles, 0);

        let report = service.run_now().await;
        assert_eq!(report.first_seen, 1);

        let status = service.status();
        assert!(status.last_cycle_at.is_some());
        assert_eq!(status.tracked_titles, 1);

        Fixture::cleanup(&fx.dir);
    }

    #[tokio::test]
    async fn test_service_start_stop() {
        let fx = Fixture::new(
            "mangapulse-test-service-lifecycle",
            ScriptedFetcher::new(),
            vec![],
        );
        let service = WatchService::new(fx.engine, Duration::from_secs(3600));

        assert!(!service.is_running());
        service.start();
        assert!(service.is_running());
        // Second start is a no-op, not a second timer.
        service.start();
        assert!(service.is_running());

        service.stop();
        assert!(!service.is_running());
        let status = service.status();
        assert!(status.next_scheduled_at.is_none());

        Fixture::cleanup(&fx.dir);
    }

    #[tokio::test]
    async fn test_concurrent_manual_triggers_never_overlap() {
        let dir = std::env::temp_dir().join("mangapulse-test-service-serialized");
        std::fs::remove_dir_all(&dir).ok();
        let fetcher = Arc::new(SlowFetcher::new(Duration::from_millis(50)));
        let registry = Arc::new(StaticRegistry::new(vec![account(
            "u1",
            "tok-1",
            &["A", "B"],
        )]));
        let engine = WatchEngine::new(
            Ledger::open(&dir.join("ledger.json")),
            Arc::clone(&fetcher) as Arc<dyn ChapterFetcher>,
            registry as Arc<dyn WatchlistRegistry>,
            Arc::new(RecordingNotifier::new()) as Arc<dyn Notifier>,
            ComparatorMode::Structural,
            Duration::ZERO,
        );
        let service = WatchService::new(engine, Duration::from_secs(3600));

        // Two triggers racing for the same engine: each must get a whole
        // cycle to itself, with the rotation advancing once per cycle.
        let (r1, r2) = tokio::join!(service.run_now(), service.run_now());

        assert!(!fetcher.overlapped.load(Ordering::SeqCst));
        let mut slots = [r1.slot, r2.slot];
        slots.sort();
        assert_eq!(slots, [0, 1]);
        assert_eq!(fetcher.calls(), vec!["A", "B"]);
        Fixture::cleanup(&dir);
    }

    #[tokio::test]
    async fn test_ledger_write_failure_still_detects_and_notifies() {
        let dir = std::env::temp_dir().join("mangapulse-test-engine-ledger-unwritable");
        std::fs::remove_dir_all(&dir).ok();
        std::fs::create_dir_all(&dir).unwrap();
        // A regular file where the ledger's parent directory should be
        // makes every snapshot write fail.
        std::fs::write(dir.join("blocker"), b"").unwrap();
        let ledger = Ledger::open(&dir.join("blocker").join("ledger.json"));

        let fetcher = Arc::new(ScriptedFetcher::new());
        fetcher.push("A", found("1"));
        fetcher.push("A", found("2"));
        let registry = Arc::new(StaticRegistry::new(vec![account("u1", "tok-1", &["A"])]));
        let notifier = Arc::new(RecordingNotifier::new());
        let mut engine = WatchEngine::new(
            ledger,
            Arc::clone(&fetcher) as Arc<dyn ChapterFetcher>,
            registry as Arc<dyn WatchlistRegistry>,
            Arc::clone(&notifier) as Arc<dyn Notifier>,
            ComparatorMode::Structural,
            Duration::ZERO,
        );

        let r1 = engine.run_cycle().await;
        assert_eq!(r1.first_seen, 1);

        // The in-memory entry advanced despite the failed write, so the
        // second cycle still classifies 1 → 2 as a change and dispatches.
        let r2 = engine.run_cycle().await;
        assert_eq!(r2.changed, 1);
        let sends = notifier.sends();
        assert_eq!(sends.len(), 1);
        assert_eq!(sends[0].1.get("chapter").unwrap(), "2");
        assert_eq!(fetcher.calls(), vec!["A", "A"]);
        Fixture::cleanup(&dir);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_cycle_delays_next_tick_by_a_full_interval() {
        let dir = std::env::temp_dir().join("mangapulse-test-service-slowcycle");
        std::fs::remove_dir_all(&dir).ok();
        // Interval 1s, but each cycle takes 5s.
        let fetcher = Arc::new(SlowFetcher::new(Duration::from_secs(5)));
        let registry = Arc::new(StaticRegistry::new(vec![account("u1", "tok-1", &["A"])]));
        let engine = WatchEngine::new(
            Ledger::open(&dir.join("ledger.json")),
            Arc::clone(&fetcher) as Arc<dyn ChapterFetcher>,
            registry as Arc<dyn WatchlistRegistry>,
            Arc::new(RecordingNotifier::new()) as Arc<dyn Notifier>,
            ComparatorMode::Structural,
            Duration::ZERO,
        );
        let service = WatchService::new(engine, Duration::from_secs(1));

        service.start();

        // Cycle 1 fires at t=1s and runs until t=6s. The ticks missed in
        // the meantime must not fire back-to-back: the next cycle waits
        // until t=7s.
        tokio::time::sleep(Duration::from_millis(6500)).await;
        assert_eq!(fetcher.calls().len(), 1);

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(fetcher.calls().len(), 2);

        service.stop();
        Fixture::cleanup(&dir);
    }

    #[tokio::test]
    async fn test_status_answers_during_an_in_flight_cycle() {
        let dir = std::env::temp_dir().join("mangapulse-test-service-status-midcycle");
        std::fs::remove_dir_all(&dir).ok();
        let fetcher = Arc::new(SlowFetcher::new(Duration::from_millis(200)));
        let registry = Arc::new(StaticRegistry::new(vec![account("u1", "tok-1", &["A"])]));
        let engine = WatchEngine::new(
            Ledger::open(&dir.join("ledger.json")),
            Arc::clone(&fetcher) as Arc<dyn ChapterFetcher>,
            registry as Arc<dyn WatchlistRegistry>,
            Arc::new(RecordingNotifier::new()) as Arc<dyn Notifier>,
            ComparatorMode::Structural,
            Duration::ZERO,
        );
        let service = Arc::new(WatchService::new(engine, Duration::from_secs(3600)));

        let bg = {
            let service = Arc::clone(&service);
            tokio::spawn(async move { service.run_now().await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;

        // The cycle holds the engine mutex right now; status must not wait
        // for it.
        let status = service.status();
        assert!(status.last_cycle_at.is_none());
        assert_eq!(status.tracked_titles, 0);

        let report = bg.await.unwrap();
        assert_eq!(report.first_seen, 1);
        let status = service.status();
        assert!(status.last_cycle_at.is_some());
        assert_eq!(status.tracked_titles, 1);
        Fixture::cleanup(&dir);
    }
}
