//! # MangaPulse — rotation-scheduled manga update watcher
//!
//! Tracks serialized titles for many subscribed devices and pushes a
//! notification the moment a new chapter is detected, checking one
//! rotation slot per cycle instead of every title every time.
//!
//! Usage:
//!   mangapulse run                 # Start the periodic watcher
//!   mangapulse run --diagnostic    # Fast diagnostic interval
//!   mangapulse check               # Run one cycle now and exit
//!   mangapulse status              # Show ledger/registry state

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use mangapulse_channels::{FcmPush, FileRegistry, MangaDexFetcher};
use mangapulse_core::MangaPulseConfig;
use mangapulse_scheduler::{Ledger, WatchEngine, WatchService};

#[derive(Parser)]
#[command(
    name = "mangapulse",
    version,
    about = "📖 MangaPulse — rotation-scheduled manga update watcher"
)]
struct Cli {
    /// Config file path (default: ~/.mangapulse/config.toml)
    #[arg(short, long)]
    config: Option<String>,

    /// Use the fast diagnostic check interval
    #[arg(long)]
    diagnostic: bool,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Start the periodic watcher (Ctrl-C to stop)
    Run,
    /// Run a single check cycle now and exit
    Check,
    /// Show watcher state without running a cycle
    Status,
}

fn expand_path(p: &str) -> String {
    shellexpand::tilde(p).to_string()
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        "mangapulse=debug,mangapulse_scheduler=debug,mangapulse_channels=debug"
    } else {
        "mangapulse=info,mangapulse_scheduler=info,mangapulse_channels=info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_target(false)
        .init();

    let mut config = match &cli.config {
        Some(path) => MangaPulseConfig::load_from(Path::new(&expand_path(path)))?,
        None => MangaPulseConfig::load()?,
    };
    if cli.diagnostic {
        config.scheduler.diagnostic = true;
    }

    let ledger_path = expand_path(&config.storage.ledger_path);
    let registry_path = expand_path(&config.storage.registry_path);

    let ledger = Ledger::open(Path::new(&ledger_path));
    let registry = Arc::new(FileRegistry::open(Path::new(&registry_path)));
    let fetcher = Arc::new(MangaDexFetcher::new(config.fetcher.clone()));
    let push = Arc::new(FcmPush::new(config.push.clone()));

    if !push.is_configured() {
        tracing::warn!("⚠️ FCM is not configured — detected changes will not be delivered");
    }

    let engine = WatchEngine::new(
        ledger,
        fetcher,
        registry,
        push,
        config.scheduler.comparator,
        Duration::from_millis(config.scheduler.fetch_delay_ms),
    );
    let interval = Duration::from_secs(config.check_interval_secs());
    let service = WatchService::new(engine, interval);

    match cli.command {
        Command::Run => {
            service.start();
            let status = service.status();
            println!("📖 MangaPulse v{}", env!("CARGO_PKG_VERSION"));
            println!("   ⏰ Check interval:  {}s", interval.as_secs());
            println!("   📚 Tracked titles:  {}", status.tracked_titles);
            println!("   🗄️  Ledger:          {ledger_path}");
            println!("   👥 Registry:        {registry_path}");
            println!();

            tokio::signal::ctrl_c().await?;
            service.stop();
        }
        Command::Check => {
            let report = service.run_now().await;
            if report.skipped {
                println!("Skip tick — nothing to check this cycle");
            } else {
                println!(
                    "Checked {} title(s) at slot {}: {} new, {} first seen, {} unchanged, {} not found",
                    report.batch_size,
                    report.slot,
                    report.changed,
                    report.first_seen,
                    report.unchanged,
                    report.not_found
                );
            }
        }
        Command::Status => {
            let status = service.status();
            println!("Running:        {}", status.is_running);
            println!("Tracked titles: {}", status.tracked_titles);
            match status.last_cycle_at {
                Some(at) => println!("Last cycle:     {at}"),
                None => println!("Last cycle:     never"),
            }
        }
    }

    Ok(())
}
