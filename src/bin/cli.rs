//! musen-tracker CLI
//!
//! Local and scheduled execution entry point.

use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};
use musen_tracker::{
    error::{AppError, Result},
    models::{Category, Config},
    pipeline::{self, Collaborators, RunOutcome},
    services::{
        DryRunPublisher, PngTableRenderer, Publisher, RegistryClient, TableRenderer, XPublisher,
        oauth::CREDENTIAL_ENVS,
    },
    storage::{LocalStorage, SnapshotId, SnapshotStore},
};

/// musen-tracker - base-station counts from the MIC licence registry
#[derive(Parser, Debug)]
#[command(
    name = "musen-tracker",
    version,
    about = "Tracks a carrier's base stations per municipality and announces growth"
)]
struct Cli {
    /// Path to the configuration file
    #[arg(short, long, default_value = "data/config.toml", global = true)]
    config: PathBuf,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Fetch the registry once, persist the snapshot and announce growth
    Run {
        /// Log the post instead of sending it
        #[arg(long)]
        dry_run: bool,
    },

    /// Run on a fixed interval until interrupted
    Watch {
        /// Minutes between runs
        #[arg(long, default_value_t = 60)]
        interval_mins: u64,

        /// Log posts instead of sending them
        #[arg(long)]
        dry_run: bool,
    },

    /// Fetch and show the change against the baseline without writing
    Diff,

    /// Validate configuration
    Validate,

    /// Show baseline and last run info
    Info,
}

/// Initialize logging based on verbosity flag.
fn init_logging(verbose: bool) {
    let level = if verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format_timestamp_secs()
        .init();
}

/// Build the publisher for this invocation.
fn build_publisher(config: &Config, dry_run: bool) -> Result<Option<Box<dyn Publisher>>> {
    if !config.publish.enabled {
        return Ok(None);
    }
    if dry_run {
        return Ok(Some(Box::new(DryRunPublisher)));
    }
    Ok(Some(Box::new(XPublisher::from_env(&config.publish)?)))
}

async fn run_once(
    config: &Config,
    client: &RegistryClient,
    storage: &LocalStorage,
    renderer: Option<&dyn TableRenderer>,
    publisher: Option<&dyn Publisher>,
) -> Result<RunOutcome> {
    let deps = Collaborators {
        source: client,
        store: storage,
        renderer,
        publisher,
    };
    let outcome = pipeline::run_pipeline(config, &deps).await?;

    match &outcome {
        RunOutcome::Published {
            token,
            decision,
            receipt,
        } => {
            log::info!(
                "Update {token}: macro {:+}, published{}",
                decision.macro_total,
                receipt
                    .as_ref()
                    .map(|r| format!(" as {}", r.id))
                    .unwrap_or_default()
            );
        }
        RunOutcome::NoUpdate { token, decision } => {
            log::info!("Update {token}: macro {:+}, not announced", decision.macro_total);
        }
        RunOutcome::AlreadyPublished { token } => {
            log::info!("Update {token}: already handled");
        }
    }
    Ok(outcome)
}

/// Main entry point for the CLI application.
#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    log::info!("musen-tracker starting...");

    // Runs that write snapshots or post never fall back to defaults.
    let config = match cli.command {
        Command::Run { .. } | Command::Watch { .. } => Config::load(&cli.config)?,
        _ => Config::load_or_default(&cli.config),
    };
    let storage = LocalStorage::new(&config.storage.dir);
    let png_renderer = config
        .render
        .enabled
        .then(|| PngTableRenderer::new(&config.render.dir));
    let renderer = png_renderer.as_ref().map(|r| r as &dyn TableRenderer);

    match cli.command {
        Command::Run { dry_run } => {
            config.validate()?;
            let client = RegistryClient::new(config.registry.clone())?;
            let publisher = build_publisher(&config, dry_run)?;
            run_once(&config, &client, &storage, renderer, publisher.as_deref()).await?;
        }

        Command::Watch {
            interval_mins,
            dry_run,
        } => {
            config.validate()?;
            if interval_mins == 0 {
                return Err(AppError::validation("--interval-mins must be > 0"));
            }
            let client = RegistryClient::new(config.registry.clone())?;
            let publisher = build_publisher(&config, dry_run)?;

            let mut ticker = tokio::time::interval(Duration::from_secs(interval_mins * 60));
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                if let Err(e) =
                    run_once(&config, &client, &storage, renderer, publisher.as_deref()).await
                {
                    log::error!("Run failed: {e}");
                }
            }
        }

        Command::Diff => {
            config.validate()?;
            let client = RegistryClient::new(config.registry.clone())?;
            let (snapshot, decision) = pipeline::preview(&config, &client, &storage).await?;

            log::info!(
                "Update {} with {} municipalities",
                snapshot.updated,
                snapshot.len()
            );
            for category in Category::ALL {
                log::info!(
                    "{category}: {} ({:+})",
                    snapshot.total(category),
                    decision.delta.total(category)
                );
            }
            log::info!(
                "Would {}announce:\n{}",
                if decision.worthy { "" } else { "not " },
                decision.summary
            );
        }

        Command::Validate => {
            log::info!("Validating configuration...");

            if let Err(e) = config.validate() {
                log::error!("Config validation failed: {}", e);
                return Err(e);
            }
            log::info!("✓ Config OK");
            log::info!("    Prefecture: {}", config.registry.prefecture);
            log::info!("    Licensee: {}", config.registry.licensee);
            log::info!("    Storage: {}", config.storage.dir);
            if config.publish.enabled {
                for name in CREDENTIAL_ENVS {
                    if std::env::var(name).is_err() {
                        log::warn!("Publishing is enabled but {name} is not set");
                    }
                }
            }
        }

        Command::Info => {
            log::info!("Storage directory: {}", storage.root().display());

            match storage.load(&SnapshotId::Latest).await? {
                Some(baseline) => {
                    log::info!("Baseline: {}", baseline.updated);
                    log::info!("    Municipalities: {}", baseline.len());
                    for category in Category::ALL {
                        log::info!("    {category}: {}", baseline.total(category));
                    }
                }
                None => log::info!("No baseline yet."),
            }

            if let Some(report) = storage.load_report().await? {
                log::info!(
                    "Last run: {} ({}), finished {}",
                    report.outcome,
                    report
                        .token
                        .map(|t| t.to_string())
                        .unwrap_or_else(|| "-".to_string()),
                    report.finished_at
                );
            }
        }
    }

    log::info!("Done!");

    Ok(())
}
