use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use chrono::Utc;
use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use civicops_common::{load_engine_config, Config, EngineConfig};
use civicops_engine::{Dispatcher, PgRunLease};
use civicops_events::EventStore;
use civicops_store::PgStore;

#[derive(Parser)]
#[command(name = "civicops", about = "Complaint clustering and recurring task dispatch")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Apply database migrations
    Migrate,
    /// Print ranked candidate tasks for pending complaints
    Suggest {
        #[arg(long)]
        limit: Option<usize>,
    },
    /// Assign the suggested task made of exactly these complaints
    Assign {
        #[arg(long, value_delimiter = ',', required = true)]
        complaints: Vec<Uuid>,
        #[arg(long)]
        worker: String,
    },
    /// Run the recurring engine once
    RunRecurring,
    /// Drain the outbox and run the recurring engine on an interval
    Poll,
    /// List recurring suggestions awaiting promotion
    Suggestions,
    /// List recurring tasks
    Recurring,
    /// Promote a recurring suggestion to an active recurring task
    Promote {
        #[arg(long)]
        suggestion: Uuid,
        #[arg(long)]
        frequency: u32,
        #[arg(long)]
        worker: Option<String>,
    },
    /// Mark a task and its complaints completed
    Complete {
        #[arg(long)]
        task: Uuid,
    },
    /// Cancel a task and return its complaints to pending
    Cancel {
        #[arg(long)]
        task: Uuid,
    },
    /// Print dashboard counts
    Stats,
}

type PgDispatcher = Dispatcher<PgStore, EventStore>;

fn init_tracing() -> Result<()> {
    let filter = EnvFilter::from_default_env().add_directive("civicops=info".parse()?);
    let json = std::env::var("LOG_FORMAT").is_ok_and(|v| v.eq_ignore_ascii_case("json"));
    if json {
        tracing_subscriber::fmt().with_env_filter(filter).json().init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
    Ok(())
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing()?;
    let cli = Cli::parse();

    // Load config
    let config = Config::from_env()?;
    config.log_redacted();

    let engine_config = match &config.engine_config_path {
        Some(path) => {
            info!(path = %path.display(), "Loading engine config");
            load_engine_config(path)?
        }
        None => EngineConfig::default(),
    };

    // Connect to Postgres
    let store = PgStore::connect(&config.database_url, config.database_max_connections).await?;

    if let Command::Migrate = cli.command {
        store.migrate().await?;
        return Ok(());
    }

    let events = EventStore::new(store.pool().clone());
    let lease = PgRunLease::new(store.clone(), engine_config.recurring.lease_ttl_minutes);
    let dispatcher =
        Dispatcher::new(store, events, engine_config).with_lease(Arc::new(lease));

    match cli.command {
        Command::Migrate => {}
        Command::Suggest { limit } => {
            let mut candidates = dispatcher.suggested_tasks(Utc::now()).await?;
            if let Some(limit) = limit {
                candidates.truncate(limit);
            }
            print_json(&candidates)?;
        }
        Command::Assign { complaints, worker } => {
            let task = dispatcher
                .assign_suggested(&complaints, &worker, Utc::now())
                .await?;
            print_json(&task)?;
        }
        Command::RunRecurring => {
            dispatcher.drain_outbox().await?;
            let outcome = dispatcher.run_recurring_engine(Utc::now()).await;
            print_json(&outcome)?;
        }
        Command::Poll => poll(&dispatcher, config.recurring_poll_secs).await,
        Command::Suggestions => print_json(&dispatcher.recurring_suggestions().await?)?,
        Command::Recurring => print_json(&dispatcher.recurring_tasks().await?)?,
        Command::Promote {
            suggestion,
            frequency,
            worker,
        } => {
            let recurring = dispatcher
                .promote_suggestion(suggestion, frequency, worker.as_deref(), Utc::now())
                .await?;
            print_json(&recurring)?;
        }
        Command::Complete { task } => {
            dispatcher.complete_task(task).await?;
            print_json(&serde_json::json!({ "task_id": task, "status": "completed" }))?;
        }
        Command::Cancel { task } => {
            dispatcher.cancel_task(task).await?;
            print_json(&serde_json::json!({ "task_id": task, "status": "cancelled" }))?;
        }
        Command::Stats => {
            let stats = dispatcher.dashboard_stats().await?;
            info!("Dashboard: {stats}");
            print_json(&stats)?;
        }
    }

    Ok(())
}

/// Drain the outbox and run the recurring engine every `interval_secs`
/// until Ctrl-C.
async fn poll(dispatcher: &PgDispatcher, interval_secs: u64) {
    info!(interval_secs, "Polling recurring engine");
    let mut ticker = tokio::time::interval(Duration::from_secs(interval_secs.max(1)));

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if let Err(e) = dispatcher.drain_outbox().await {
                    warn!(error = %e, "Outbox drain failed");
                }
                dispatcher.run_recurring_engine(Utc::now()).await;
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Shutting down poll loop");
                break;
            }
        }
    }
}
