use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use tokio::{signal, sync::broadcast};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use storeshift::app::App;
use storeshift::config::{Config, LogFormat};
use storeshift::migration::{read_phase_file, write_phase_file, ShadowQueue, SqliteShadowQueue};
use storeshift::verify::VerifyOptions;
use storeshift_core::migration::{MigrationPhase, PhaseError};
use storeshift_core::model::EntityType;

const PHASE_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// storeshift - Move a MongoDB shop database into a DynamoDB single table
#[derive(Parser, Debug)]
#[command(name = "storeshift")]
#[command(version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Inspect or advance the migration phase
    Phase {
        #[command(subcommand)]
        action: PhaseAction,
    },

    /// Manage the DynamoDB table
    Table {
        #[command(subcommand)]
        action: TableAction,
    },

    #[command(flatten)]
    Connected(ConnectedCommand),
}

/// Commands that need both stores and the shadow queue.
#[derive(Subcommand, Debug)]
enum ConnectedCommand {
    /// Show the current phase and shadow queue state
    Status,

    /// Copy existing document-store records into the key-value store
    Copy {
        /// Entity types to copy (default: all)
        #[arg(long = "entity", short)]
        entities: Vec<EntityType>,
    },

    /// Apply queued shadow writes
    Backfill {
        /// Stop after one batch instead of draining until only failures remain
        #[arg(long)]
        once: bool,
    },

    /// Compare both stores and report drift
    Verify {
        /// Entity types to verify (default: all)
        #[arg(long = "entity", short)]
        entities: Vec<EntityType>,

        /// Fraction of keys to compare
        #[arg(long, default_value_t = 1.0)]
        sample_rate: f64,
    },

    /// Run the replicator, phase file watcher and scheduled verifier
    Worker,
}

#[derive(Subcommand, Debug)]
enum PhaseAction {
    /// Print the effective phase
    Show,

    /// Move the phase file one step forward
    Advance {
        /// Expected target phase; rejected unless it is the next one
        #[arg(long)]
        to: Option<MigrationPhase>,
    },
}

#[derive(Subcommand, Debug)]
enum TableAction {
    /// Create the table and its type index
    Create {
        /// Wait until the table is active
        #[arg(long)]
        wait: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = Config::from_env();

    init_tracing(config.log_format);

    match cli.command {
        Command::Phase { action } => run_phase(&config, action).await,
        Command::Table { action } => run_table(config, action).await,
        Command::Connected(command) => {
            let app = App::connect(config).await?;
            run(&app, command).await
        }
    }
}

fn init_tracing(format: LogFormat) {
    let json = format == LogFormat::Json;
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "storeshift=info".into()),
        )
        .with((!json).then(tracing_subscriber::fmt::layer))
        .with(json.then(|| tracing_subscriber::fmt::layer().json()))
        .init();
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn entities_or_all(entities: Vec<EntityType>) -> Vec<EntityType> {
    if entities.is_empty() {
        EntityType::ALL.to_vec()
    } else {
        entities
    }
}

async fn run_phase(config: &Config, action: PhaseAction) -> Result<()> {
    let file_phase = match &config.phase_file {
        Some(path) => read_phase_file(path).await?,
        None => None,
    };

    match action {
        PhaseAction::Show => {
            println!("{}", file_phase.unwrap_or(config.phase));
            Ok(())
        }
        PhaseAction::Advance { to } => {
            let Some(path) = &config.phase_file else {
                bail!("MIGRATION_PHASE_FILE must be set to advance the phase");
            };
            let current = file_phase.unwrap_or(config.phase);
            let target = match to {
                Some(target) => target,
                None => current.next().ok_or(PhaseError::Final(current))?,
            };
            let queue = SqliteShadowQueue::open(&config.shadow_queue_path)
                .await
                .with_context(|| {
                    format!(
                        "Failed to open shadow queue at {}",
                        config.shadow_queue_path.display()
                    )
                })?;
            let next = write_phase_file(path, config.phase, target, &queue).await?;

            tracing::info!(from = %current, to = %next, file = %path.display(), "Phase advanced");
            println!("{next}");
            Ok(())
        }
    }
}

async fn run_table(config: Config, action: TableAction) -> Result<()> {
    let TableAction::Create { wait } = action;
    let table = storeshift::storage::keyvalue::DynamoDbTable::connect(
        config.aws_endpoint_url.as_deref(),
        &config.aws_region,
        config.dynamodb_table.clone(),
    )
    .await;

    let created = table
        .create_table()
        .await
        .with_context(|| format!("Failed to create table {}", table.table_name()))?;
    if created {
        tracing::info!(table = %table.table_name(), "Table created");
    } else {
        tracing::info!(table = %table.table_name(), "Table already exists");
    }

    if wait {
        table
            .wait_until_active(30, Duration::from_secs(2))
            .await
            .context("Table did not become active")?;
    }
    Ok(())
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct Status {
    phase: MigrationPhase,
    queued: u64,
    failing: usize,
    unqueued: usize,
}

async fn run(app: &App, command: ConnectedCommand) -> Result<()> {
    match command {
        ConnectedCommand::Status => {
            let status = Status {
                phase: app.controller.current(),
                queued: app.queue.len().await?,
                failing: app.queue.failures().await?.len(),
                unqueued: app.router.unqueued_keys().await.len(),
            };
            print_json(&status)
        }
        ConnectedCommand::Copy { entities } => {
            let copier = app.copier();
            let mut reports = Vec::new();
            for entity in entities_or_all(entities) {
                reports.push(copier.copy(entity).await?);
            }
            print_json(&reports)
        }
        ConnectedCommand::Backfill { once } => {
            let replicator = app.replicator();
            let mut reports = Vec::new();
            loop {
                let report = replicator.drain_once().await?;
                reports.push(report);
                if once || report.acknowledged() == 0 {
                    break;
                }
            }
            print_json(&reports)
        }
        ConnectedCommand::Verify {
            entities,
            sample_rate,
        } => {
            let options = VerifyOptions {
                entities: entities_or_all(entities),
                sample_rate,
            };
            let report = app.verifier().run(&options).await?;
            print_json(&report)?;
            if !report.is_consistent() {
                bail!("Stores are not consistent");
            }
            Ok(())
        }
        ConnectedCommand::Worker => run_worker(app).await,
    }
}

async fn run_worker(app: &App) -> Result<()> {
    let (shutdown_tx, _) = broadcast::channel(1);
    let replicator = Arc::new(app.replicator());

    let mut tasks = tokio::task::JoinSet::new();
    {
        let replicator = Arc::clone(&replicator);
        let shutdown = shutdown_tx.subscribe();
        tasks.spawn(async move { replicator.run(shutdown).await });
    }
    if let Some(interval) = app.config.verify_interval() {
        let verifier = app.verifier();
        let options = VerifyOptions {
            sample_rate: app.config.verify_sample_rate,
            ..VerifyOptions::default()
        };
        let shutdown = shutdown_tx.subscribe();
        tasks.spawn(async move { verifier.run_every(interval, options, shutdown).await });
    }

    tokio::select! {
        _ = app.controller.watch_file(PHASE_POLL_INTERVAL, shutdown_tx.subscribe()) => {}
        _ = shutdown_signal() => {}
    }

    let _ = shutdown_tx.send(());
    while tasks.join_next().await.is_some() {}
    app.router.wait_for_sampled_reads().await;

    tracing::info!("Worker stopped");
    Ok(())
}

/// Wait for shutdown signals (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            tracing::error!(error = %err, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(err) => {
                tracing::error!(error = %err, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, shutting down...");
        }
        _ = terminate => {
            tracing::info!("Received SIGTERM, shutting down...");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_connected_commands_parse_at_top_level() {
        let cli = Cli::try_parse_from(["storeshift", "backfill", "--once"]).unwrap();
        assert!(matches!(
            cli.command,
            Command::Connected(ConnectedCommand::Backfill { once: true })
        ));

        let cli = Cli::try_parse_from(["storeshift", "status"]).unwrap();
        assert!(matches!(
            cli.command,
            Command::Connected(ConnectedCommand::Status)
        ));
    }

    #[test]
    fn test_phase_and_table_commands_stay_offline() {
        let cli =
            Cli::try_parse_from(["storeshift", "phase", "advance", "--to", "DUAL_WRITE"]).unwrap();
        assert!(matches!(
            cli.command,
            Command::Phase {
                action: PhaseAction::Advance {
                    to: Some(MigrationPhase::DualWrite)
                }
            }
        ));

        let cli = Cli::try_parse_from(["storeshift", "table", "create", "--wait"]).unwrap();
        assert!(matches!(
            cli.command,
            Command::Table {
                action: TableAction::Create { wait: true }
            }
        ));
    }
}
