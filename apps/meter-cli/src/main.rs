//! # Hailmeter Command-Line Harness
//!
//! Drives the meter stack end to end without the driver app.
//!
//! ## Commands
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │  hailmeter replay <trace.json> --pricing <pricing.toml>                │
//! │     trace ──► ReplayLocationProvider ──► TripController                 │
//! │                                              │                          │
//! │                                   start_trip ▼ run ▼ end_trip           │
//! │                                              │                          │
//! │                                   TripOutcome JSON on stdout            │
//! │                                                                         │
//! │  hailmeter drain     one outbox drain with $HAILMETER_TOKEN            │
//! │  hailmeter status    pending outbox count + persisted trip             │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Startup Sequence
//! 1. Initialize tracing (logging)
//! 2. Load `hailmeter.toml` and `HAILMETER_*` overrides
//! 3. Open the database & run migrations
//! 4. Build the backend client (offline stand-in when no URL is set)
//! 5. Run the command

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use hailmeter_core::{
    FlatRateOption, LocationSample, MeterStatus, Money, PricingConfig, TripContext,
};
use hailmeter_db::{ActiveTrip, Database, DbConfig, DbError};
use hailmeter_sync::{
    CompletionApi, CredentialSource, HailmeterConfig, HttpCompletionApi, LocationProvider,
    OfflineApi, ReplayLocationProvider, StaticCredentials, SubmissionPipeline, SyncError,
    TripController, TripOutcome,
};

/// Environment variable holding the driver's bearer token.
const TOKEN_ENV: &str = "HAILMETER_TOKEN";

const DEFAULT_LOG_FILTER: &str = "info,hailmeter=debug,sqlx=warn";

// =============================================================================
// Arguments
// =============================================================================

/// Hailmeter - taxi trip meter harness
#[derive(Parser)]
#[command(name = "hailmeter")]
#[command(version)]
#[command(about = "Replay GPS traces through the meter and manage the offline outbox", long_about = None)]
struct Cli {
    /// Config file (defaults to the platform config dir)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Replay a recorded trace as one complete trip
    Replay {
        /// JSON array of location samples
        trace: PathBuf,

        /// Pricing TOML file
        #[arg(long)]
        pricing: PathBuf,

        #[arg(long, default_value_t = 1)]
        passengers: u32,

        /// Charge a flat rate (in cents) instead of the meter
        #[arg(long)]
        flat_rate_cents: Option<i64>,

        /// Complete this dispatched booking; omit for a street hail
        #[arg(long)]
        booking_id: Option<String>,

        /// Delay between samples in milliseconds
        #[arg(long, default_value_t = 0)]
        pace_ms: u64,

        /// Throw away a trip left on the meter by an earlier run
        #[arg(long)]
        discard_active: bool,
    },

    /// Drain the outbox once
    Drain,

    /// Show pending outbox entries and any persisted trip
    Status,
}

// =============================================================================
// Errors
// =============================================================================

#[derive(Debug, Error)]
enum CliError {
    #[error(transparent)]
    Sync(#[from] SyncError),

    #[error(transparent)]
    Database(#[from] DbError),

    #[error("Could not read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Invalid trace {path}: {source}")]
    Trace {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("Invalid pricing {path}: {source}")]
    Pricing {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("Trace {0} contains no samples")]
    EmptyTrace(PathBuf),

    #[error("A trip is already on the meter ({status:?}); pass --discard-active to drop it")]
    TripInProgress { status: MeterStatus },

    #[error("No database path could be determined")]
    NoDatabasePath,

    #[error("Failed to create {path}: {source}")]
    CreateDir {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to encode output: {0}")]
    Output(#[from] serde_json::Error),
}

type CliResult<T> = Result<T, CliError>;

// =============================================================================
// Entry Point
// =============================================================================

#[tokio::main]
async fn main() -> ExitCode {
    init_tracing();
    let cli = Cli::parse();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> CliResult<()> {
    let config = HailmeterConfig::load(cli.config)?;
    let db = open_database(&config).await?;

    let result = match cli.command {
        Commands::Replay {
            trace,
            pricing,
            passengers,
            flat_rate_cents,
            booking_id,
            pace_ms,
            discard_active,
        } => {
            let context = trip_context(booking_id, passengers, flat_rate_cents);
            let options = ReplayOptions {
                trace,
                pricing,
                context,
                pacing: Duration::from_millis(pace_ms),
                discard_active,
            };
            cmd_replay(&config, db.clone(), options).await
        }
        Commands::Drain => cmd_drain(&config, db.clone()).await,
        Commands::Status => cmd_status(db.clone()).await,
    };

    db.close().await;
    result
}

/// Initializes the tracing subscriber for structured logging.
///
/// Logs go to stderr so command output on stdout stays machine-readable.
///
/// ## Log Levels
/// - `RUST_LOG=debug` - Show debug messages
/// - `RUST_LOG=hailmeter_sync=trace` - Trace the sync crate only
/// - Default: `info,hailmeter=debug,sqlx=warn`
fn init_tracing() {
    let filter = log_filter(std::env::var(EnvFilter::DEFAULT_ENV).ok());

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// `RUST_LOG` directives when they parse, the default filter otherwise.
fn log_filter(directives: Option<String>) -> EnvFilter {
    directives
        .and_then(|d| EnvFilter::try_new(d).ok())
        .unwrap_or_else(|| EnvFilter::new(DEFAULT_LOG_FILTER))
}

// =============================================================================
// Wiring
// =============================================================================

async fn open_database(config: &HailmeterConfig) -> CliResult<Database> {
    let path = config.database_path().ok_or(CliError::NoDatabasePath)?;

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|source| CliError::CreateDir {
            path: parent.to_path_buf(),
            source,
        })?;
    }

    info!(path = %path.display(), "Opening database");
    Ok(Database::new(DbConfig::new(path)).await?)
}

fn completion_api(config: &HailmeterConfig) -> CliResult<Arc<dyn CompletionApi>> {
    if config.backend_url().is_some() {
        Ok(Arc::new(HttpCompletionApi::from_settings(&config.backend)?))
    } else {
        warn!("No backend URL configured; finished trips stay in the outbox");
        Ok(Arc::new(OfflineApi))
    }
}

fn pipeline(config: &HailmeterConfig, db: Database) -> CliResult<Arc<SubmissionPipeline>> {
    let api = completion_api(config)?;
    Ok(Arc::new(SubmissionPipeline::new(db, api, config.outbox.clone())))
}

fn trip_context(booking_id: Option<String>, passengers: u32, flat_rate_cents: Option<i64>) -> TripContext {
    let mut context = match booking_id {
        Some(id) => TripContext::for_booking(id),
        None => TripContext::flagdown(),
    };
    context.passenger_count = passengers.max(1);
    context.flat_rate = flat_rate_cents.map(|cents| FlatRateOption {
        id: "cli-flat".to_string(),
        label: "Flat rate".to_string(),
        amount: Money::from_cents(cents),
    });
    context
}

fn read_file(path: &Path) -> CliResult<String> {
    std::fs::read_to_string(path).map_err(|source| CliError::Read {
        path: path.to_path_buf(),
        source,
    })
}

fn load_trace(path: &Path) -> CliResult<Vec<LocationSample>> {
    let samples: Vec<LocationSample> =
        serde_json::from_str(&read_file(path)?).map_err(|source| CliError::Trace {
            path: path.to_path_buf(),
            source,
        })?;
    if samples.is_empty() {
        return Err(CliError::EmptyTrace(path.to_path_buf()));
    }
    Ok(samples)
}

fn load_pricing(path: &Path) -> CliResult<PricingConfig> {
    toml::from_str(&read_file(path)?).map_err(|source| CliError::Pricing {
        path: path.to_path_buf(),
        source,
    })
}

fn print_json<T: Serialize>(value: &T) -> CliResult<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

// =============================================================================
// Commands
// =============================================================================

struct ReplayOptions {
    trace: PathBuf,
    pricing: PathBuf,
    context: TripContext,
    pacing: Duration,
    discard_active: bool,
}

async fn cmd_replay(config: &HailmeterConfig, db: Database, options: ReplayOptions) -> CliResult<()> {
    let samples = load_trace(&options.trace)?;
    let pricing = load_pricing(&options.pricing)?;
    info!(samples = samples.len(), "Trace loaded");

    let location = Arc::new(ReplayLocationProvider::new(samples).with_pacing(options.pacing));
    let credentials: Arc<dyn CredentialSource> = Arc::new(StaticCredentials::from_env(TOKEN_ENV));
    let controller = TripController::new(
        db.clone(),
        pipeline(config, db)?,
        location.clone(),
        credentials,
        config.meter.clone(),
    )
    .with_driver_id(config.driver_id().map(str::to_string));

    match controller.hydrate().await? {
        MeterStatus::Idle => {}
        MeterStatus::Completed => {
            // Died while settling last time; finish that trip first
            let outcome = controller.end_trip().await?;
            info!(trip_id = %outcome.summary.trip_id, "Settled trip left by an earlier run");
            print_json(&outcome)?;
        }
        status if options.discard_active => {
            warn!(status = ?status, "Discarding trip left on the meter");
            controller.reset().await?;
        }
        status => return Err(CliError::TripInProgress { status }),
    }

    let trip_id = controller.start_trip(pricing, options.context).await?;
    debug!(trip_id = %trip_id, "Replaying trace");

    controller.run(location.subscribe()).await?;

    let outcome: TripOutcome = controller.end_trip().await?;
    controller.take_summary(&trip_id).await;
    print_json(&outcome)
}

async fn cmd_drain(config: &HailmeterConfig, db: Database) -> CliResult<()> {
    let pipeline = pipeline(config, db)?;
    let credentials = StaticCredentials::from_env(TOKEN_ENV);

    match pipeline.drain_with(&credentials).await? {
        Some(report) => print_json(&report),
        None => {
            warn!("{TOKEN_ENV} is not set; nothing was sent");
            Ok(())
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct StatusReport {
    pending_outbox: i64,
    active_trip: Option<ActiveTrip>,
}

async fn cmd_status(db: Database) -> CliResult<()> {
    let report = StatusReport {
        pending_outbox: db.outbox().count_pending().await?,
        active_trip: db.active_trip().load().await?,
    };
    print_json(&report)
}
