//! # checkmate CLI
//!
//! Incremental ingestion of top players' chess games into a warehouse.
//!
//! ## Usage
//!
//! ```bash
//! checkmate --config ./config/checkmate.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `checkmate init` | Create the warehouse dataset and tables |
//! | `checkmate ingest` | Fetch missing monthly archives into the object store |
//! | `checkmate load` | Transform one month of archives into the warehouse |
//! | `checkmate plan` | Print the archives an ingest run would fetch |
//!
//! Run settings come from the base64 scheduler message (`--message` or the
//! `MESSAGE` environment variable) when present, otherwise from the `[run]`
//! table of the config file.

use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use chrono::Utc;
use clap::{Parser, Subcommand, ValueEnum};
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use checkmate::config::{self, Config};
use checkmate::context::Context;
use checkmate::ingest;
use checkmate::load;
use checkmate::migrate;
use checkmate::monitor::RunMonitor;
use checkmate::settings::{self, RunSettings};
use checkmate::warehouse::sqlite::SqliteWarehouse;
use checkmate::warehouse::Warehouse;

/// checkmate: incremental chess game ingestion.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/checkmate.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "checkmate",
    about = "Incremental ingestion of chess games into object storage and a warehouse",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/checkmate.toml")]
    config: PathBuf,

    /// Base64-encoded JSON run settings from the scheduler.
    #[arg(long, global = true, env = "MESSAGE", hide_env_values = true)]
    message: Option<String>,

    /// Log output format. Logs go to stderr.
    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Pretty)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum LogFormat {
    Pretty,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the warehouse dataset and tables.
    ///
    /// Idempotent; existing tables are left as they are.
    Init,

    /// Fetch missing monthly archives into the object store.
    Ingest,

    /// Transform the target month's archives and load them into the warehouse.
    ///
    /// Only PROD runs commit. TEST and DEV runs report what would be loaded.
    Load,

    /// Print the archives an ingest run would fetch, without fetching them.
    Plan,
}

fn init_logging(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);
    match format {
        LogFormat::Pretty => registry
            .with(fmt::layer().with_writer(std::io::stderr))
            .init(),
        LogFormat::Json => registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init(),
    }
}

fn resolve_settings(cli: &Cli, cfg: &Config) -> Result<RunSettings> {
    match cli.message.as_deref().filter(|m| !m.trim().is_empty()) {
        Some(message) => {
            info!("using run settings from scheduler message");
            settings::decode_message(message)
        }
        None => {
            info!("using run settings from config file");
            Ok(cfg.run.clone())
        }
    }
}

/// Open the warehouse and, when the monitor is enabled, record the run start.
async fn open_monitored(
    cfg: &Config,
    settings: &RunSettings,
    pipeline: &str,
) -> Result<(Arc<dyn Warehouse>, Option<RunMonitor>)> {
    let warehouse: Arc<dyn Warehouse> = Arc::new(SqliteWarehouse::open(&cfg.warehouse.path).await?);
    if !cfg.monitor.enabled {
        return Ok((warehouse, None));
    }
    let location = settings
        .location
        .as_deref()
        .unwrap_or(&cfg.warehouse.location);
    let monitor = RunMonitor::start(
        warehouse.clone(),
        &cfg.monitor.dataset,
        location,
        pipeline,
        settings.app_env,
    )
    .await?;
    Ok((warehouse, Some(monitor)))
}

/// Await `work`, under the run monitor if there is one.
async fn watched<T, F>(monitor: Option<&RunMonitor>, work: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match monitor {
        Some(monitor) => monitor.watch(work).await,
        None => work.await,
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.log_format);

    let cfg = config::load_config(&cli.config)?;
    let run_settings = resolve_settings(&cli, &cfg)?;

    match cli.command {
        Commands::Init => {
            let warehouse = SqliteWarehouse::open(&cfg.warehouse.path).await?;
            let dataset = run_settings
                .dataset_name
                .as_deref()
                .unwrap_or(&cfg.warehouse.dataset);
            let location = run_settings
                .location
                .as_deref()
                .unwrap_or(&cfg.warehouse.location);
            let tables = migrate::ensure_schema(&warehouse, dataset, location).await?;
            warehouse.close().await;
            println!("Warehouse initialized.");
            println!("  {}", tables.games);
            println!("  {}", tables.interactions);
            println!("ok");
        }
        Commands::Ingest => {
            let (warehouse, monitor) = open_monitored(&cfg, &run_settings, "ingest").await?;
            let report = watched(monitor.as_ref(), async {
                let ctx = Context::with_warehouse(&cfg, &run_settings, warehouse)?;
                ingest::run_ingest(&ctx, &run_settings).await
            })
            .await?;
            println!("Ingest ({})", run_settings.app_env.as_str());
            println!("  snapshot: {}", report.snapshot_path);
            println!("  players: {}", report.players);
            println!("  planned: {}", report.planned);
            println!("  already present: {}", report.already_present);
            println!("  written: {}", report.written);
            println!("  skipped: {}", report.skipped);
            println!("  raced: {}", report.raced);
            println!("ok");
        }
        Commands::Load => {
            let (warehouse, monitor) = open_monitored(&cfg, &run_settings, "load").await?;
            let report = watched(monitor.as_ref(), async {
                let ctx = Context::with_warehouse(&cfg, &run_settings, warehouse)?;
                load::run_load(&ctx, &run_settings).await
            })
            .await?;
            println!("Load {} ({})", report.period, run_settings.app_env.as_str());
            println!("  artifacts listed: {}", report.artifacts_listed);
            println!("  processed: {}", report.processed);
            println!("  records transformed: {}", report.records_transformed);
            println!("  already in warehouse: {}", report.filtered_away);
            println!("  duplicates removed: {}", report.duplicates_removed);
            println!("  new records: {}", report.new_records);
            println!("  empty artifacts: {}", report.empty_artifacts);
            match report.commit {
                Some(commit) => {
                    println!("  games appended: {}", commit.games_appended);
                    println!("  interactions appended: {}", commit.interactions_appended);
                    println!("  artifacts deleted: {}", commit.artifacts_deleted);
                }
                None => println!("  dry run: nothing committed"),
            }
            println!("ok");
        }
        Commands::Plan => {
            let ctx = Context::from_config(&cfg, &run_settings).await?;
            let plan = ingest::plan(&ctx, &run_settings, Utc::now()).await?;
            for unit in &plan.remaining {
                println!("{}", unit.artifact_path());
            }
            println!(
                "{} remaining of {} planned ({} players, {} months, {} already present)",
                plan.remaining.len(),
                plan.planned,
                plan.players,
                plan.periods.len(),
                plan.already_present
            );
            println!("ok");
        }
    }

    Ok(())
}
