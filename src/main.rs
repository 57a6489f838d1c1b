//! E-Paper Refresh Controller
//!
//! Runs the wake cycle of a battery-powered e-paper panel:
//! - Waits for fresh content before refreshing
//! - Keeps refreshing while on external power
//! - Otherwise refreshes once, lets the panel settle and suspends
//! - Keeps the last decision in retained storage across sleeps

mod config;
mod cycle;
mod decision;
mod host;
mod retained;

use clap::Parser;
use config::{Config, DEFAULT_CONFIG_PATH};
use cycle::{CycleTiming, TokioDelay, WakeCycle};
use decision::{decide, Action, ContextSnapshot};
use host::{CommandRefresher, CommandSleep, HostSignals, LogOnly};
use retained::{FileRetainedStore, MemoryRetainedStore, INITIAL_DECISION};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Command line arguments
#[derive(Parser, Debug)]
#[command(name = "epaper-refresh")]
#[command(about = "Wake-cycle refresh controller for battery-powered e-paper panels")]
#[command(version)]
struct Args {
    /// Configuration file path
    #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
    config: String,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Run a single wake cycle and exit
    #[arg(long)]
    once: bool,

    /// Sample real signals but skip refresh, sleep and retained writes
    #[arg(long)]
    dry_run: bool,

    /// Print the retained decision and exit
    #[arg(long)]
    status: bool,

    /// Evaluate the decision for the given signals and exit
    #[arg(long, requires_all = ["data_ready", "power"])]
    decide: bool,

    /// Data-ready flag for --decide
    #[arg(long)]
    data_ready: Option<bool>,

    /// Power-present flag for --decide
    #[arg(long)]
    power: Option<bool>,

    /// Write the default configuration to --config and exit
    #[arg(long)]
    init_config: bool,
}

/// Using current_thread runtime: the wake cycle is a single cooperative loop
#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    if args.init_config {
        Config::default().save(&args.config)?;
        println!("Wrote default configuration to {}", args.config);
        return Ok(());
    }

    // Load configuration
    let config_result = Config::load(&args.config);
    let verbose = args.verbose || config_result.as_ref().is_ok_and(|config| config.verbose);

    init_logging(verbose);

    let config = config_result.unwrap_or_else(|e| {
        tracing::warn!("Failed to load config from {}: {}", args.config, e);
        tracing::info!("Using default configuration");
        Config::default()
    });

    // Handle one-shot commands
    if args.decide {
        let snapshot = ContextSnapshot::new(
            args.data_ready.unwrap_or(false),
            args.power.unwrap_or(false),
            0,
        );
        let action = decide(snapshot);
        println!("{} (code {})", action, action.code());
        return Ok(());
    }

    if args.status {
        print_status(&config);
        return Ok(());
    }

    tracing::info!("Starting e-paper refresh controller");

    let timing = CycleTiming::from(&config.timing);
    let signals = HostSignals::from_config(&config);

    if args.dry_run {
        let mut cycle = WakeCycle::new(
            signals,
            LogOnly,
            TokioDelay,
            LogOnly,
            MemoryRetainedStore::new(),
            timing,
        );

        let report = tokio::select! {
            report = cycle.run_cycle() => Some(report),
            _ = wait_for_shutdown() => None,
        };

        if let Some(report) = report {
            tracing::info!(
                "Dry run finished after {} passes ({} decisions recorded): {:?}",
                report.passes,
                cycle.store().writes(),
                report.end
            );
        }
        return Ok(());
    }

    let mut cycle = WakeCycle::new(
        signals,
        CommandRefresher::new(config.refresh_command.clone()),
        TokioDelay,
        CommandSleep::new(config.sleep_command.clone()),
        FileRetainedStore::new(&config.retained_path),
        timing,
    );

    let once = args.once;
    let run = async {
        // Sleep entry returns on wake; each wake starts a new cycle at Entry
        loop {
            let report = cycle.run_cycle().await;
            tracing::info!(
                "Cycle ended after {} passes with {} ({:?}, slept: {})",
                report.passes,
                report.last_action,
                report.end,
                report.slept
            );
            if once {
                break;
            }
        }
    };

    tokio::select! {
        _ = run => {},
        _ = wait_for_shutdown() => tracing::info!("Shutdown signal received"),
    }

    tracing::info!("Shutdown complete");
    Ok(())
}

/// Print the retained decision code
fn print_status(config: &Config) {
    let store = FileRetainedStore::new(&config.retained_path);
    println!("{}", status_line(&store));
}

/// Describe the retained record; a corrupt file reads as the initial code,
/// the same way the wake cycle treats it
fn status_line(store: &FileRetainedStore) -> String {
    match store.read_record() {
        Ok(Some(record)) => {
            let name = Action::from_code(record.decision)
                .map(|action| action.to_string())
                .unwrap_or_else(|| "unknown".to_string());
            format!(
                "Last decision: {} (code {}), written at {} (unix)",
                name, record.decision, record.written_at
            )
        }
        Ok(None) => format!(
            "No decision recorded at {} (code {})",
            store.path().display(),
            INITIAL_DECISION
        ),
        Err(e) => format!(
            "Retained record at {} unreadable ({}), next cycle reads code {}",
            store.path().display(),
            e,
            INITIAL_DECISION
        ),
    }
}

/// Initialize tracing/logging
///
/// Default level is "warn" to keep wake cycles quiet on flash storage.
/// Use --verbose flag for "debug" level during development/troubleshooting.
fn init_logging(verbose: bool) {
    let level = if verbose { "debug" } else { "warn" };

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| format!("epaper_refresh_controller={}", level).into());

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();
}

/// Wait for shutdown signals (SIGTERM, SIGINT)
async fn wait_for_shutdown() {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = signal(SignalKind::terminate()).expect("Failed to setup SIGTERM handler");
    let mut sigint = signal(SignalKind::interrupt()).expect("Failed to setup SIGINT handler");

    tokio::select! {
        _ = sigterm.recv() => {
            tracing::info!("Received SIGTERM");
        }
        _ = sigint.recv() => {
            tracing::info!("Received SIGINT");
        }
    }
}
