//! Bordereau - ingestion queue trigger and admin tool

use anyhow::{Context, Result};
use bordereau_common::logging::{init_logging, LogConfig, LogLevel};
use bordereau_common::types::FileKind;
use bordereau_ingest::config::{Config, UnitConfig};
use bordereau_ingest::queue::PgQueueStore;
use bordereau_ingest::service::IngestService;
use bordereau_ingest::storage::Storage;
use bordereau_ingest::tasks::PgTaskScheduler;
use bordereau_ingest::units::procedure::PgProcedureUnit;
use bordereau_ingest::units::UnitRegistry;
use clap::{Parser, Subcommand};
use serde::Serialize;
use sqlx::postgres::PgPoolOptions;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use uuid::Uuid;

#[derive(Parser, Debug)]
#[command(name = "bordereau")]
#[command(author, version, about = "Bordereau file ingestion queue")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Queue every new file found in the stage location
    Discover,

    /// Claim and process a batch of pending files
    Dispatch,

    /// Return entries stuck in PROCESSING to PENDING
    ResetStuck,

    /// Show the most recent queue entries
    Queue {
        #[arg(short, long)]
        tenant: Option<String>,
    },

    /// Entry counts per tenant and status
    Status {
        #[arg(short, long)]
        tenant: Option<String>,
    },

    /// Requeue a FAILED or SUCCESS entry
    Reprocess { id: Uuid },

    /// Delete a staged file and settle its queue entry
    Delete { path: String },

    /// Delete several staged files, collecting per-file failures
    BulkDelete {
        #[arg(required = true)]
        paths: Vec<String>,
    },

    /// Upload a local file into a tenant's stage folder
    Upload {
        file: PathBuf,

        #[arg(short, long)]
        tenant: String,
    },

    /// Inspect and manage scheduler tasks
    Tasks {
        #[command(subcommand)]
        action: TaskAction,
    },

    /// Ask the scheduler to run discovery, falling back to running it here
    TriggerDiscovery,

    /// Ask the scheduler to process files, falling back to running it here
    TriggerProcessing,
}

#[derive(Subcommand, Debug)]
enum TaskAction {
    /// List tasks in the configured namespace
    List,

    /// Resume a task
    Resume { name: String },

    /// Suspend a task
    Suspend { name: String },

    /// Change a root task's schedule, e.g. "30 MINUTE" or "USING CRON 0 6 * * * UTC"
    Schedule { name: String, schedule: String },
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn build_units(config: &UnitConfig, pool: &sqlx::PgPool) -> Result<UnitRegistry> {
    let mut units = UnitRegistry::new();

    if let Some(ref function) = config.csv_unit {
        let unit = PgProcedureUnit::new(pool.clone(), function.as_str())?;
        units = units.register(FileKind::Csv, Arc::new(unit));
    }
    if let Some(ref function) = config.excel_unit {
        let unit = PgProcedureUnit::new(pool.clone(), function.as_str())?;
        units = units.register(FileKind::Excel, Arc::new(unit));
    }

    Ok(units)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = if cli.verbose {
        LogLevel::Debug
    } else {
        LogLevel::Info
    };

    // Environment variables take precedence over flags
    let log_config = LogConfig::builder()
        .level(log_level)
        .log_file_prefix("bordereau")
        .filter_directives("sqlx=warn,aws_smithy_runtime=info")
        .build()
        .merge_env()?;

    init_logging(&log_config)?;

    let config = Config::load().context("Failed to load configuration")?;

    let pool = PgPoolOptions::new()
        .max_connections(config.database.max_connections)
        .min_connections(config.database.min_connections)
        .acquire_timeout(Duration::from_secs(config.database.connect_timeout_secs))
        .idle_timeout(Duration::from_secs(config.database.idle_timeout_secs))
        .connect(&config.database.url)
        .await
        .context("Failed to connect to database")?;

    info!("Database connection pool established");

    sqlx::migrate!("../../migrations")
        .run(&pool)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to run migrations: {}", e))?;

    info!("Database migrations completed");

    let units = build_units(&config.units, &pool)?;
    if units.is_empty() {
        warn!("No processing units configured; dispatch will fail every entry");
    }
    let service = IngestService::new(
        Arc::new(PgQueueStore::new(pool.clone())),
        Arc::new(Storage::new(config.storage.clone())),
        Arc::new(PgTaskScheduler::new(pool.clone())),
        units,
        config.pipeline.clone(),
        config.scheduler.clone(),
    );

    match cli.command {
        Command::Discover => print_json(&service.discover().await?)?,
        Command::Dispatch => print_json(&service.dispatch().await?)?,
        Command::ResetStuck => print_json(&service.reset_stuck().await?)?,
        Command::Queue { tenant } => print_json(&service.get_queue(tenant.as_deref()).await?)?,
        Command::Status { tenant } => print_json(&service.status_summary(tenant.as_deref()).await?)?,
        Command::Reprocess { id } => print_json(&service.reprocess(id).await?)?,
        Command::Delete { path } => print_json(&service.delete(&path).await?)?,
        Command::BulkDelete { paths } => print_json(&service.bulk_delete(&paths).await)?,
        Command::Upload { file, tenant } => print_json(&service.upload(&file, &tenant).await?)?,
        Command::Tasks { action } => match action {
            TaskAction::List => print_json(&service.list_tasks().await?)?,
            TaskAction::Resume { name } => {
                service.resume_task(&name).await?;
                info!(task = %name, "Task resumed");
            },
            TaskAction::Suspend { name } => {
                service.suspend_task(&name).await?;
                info!(task = %name, "Task suspended");
            },
            TaskAction::Schedule { name, schedule } => {
                print_json(&service.update_task_schedule(&name, &schedule).await?)?
            },
        },
        Command::TriggerDiscovery => print_json(&service.trigger_discovery().await?)?,
        Command::TriggerProcessing => print_json(&service.trigger_processing().await?)?,
    }

    pool.close().await;
    Ok(())
}
