use chrono::{DateTime, Utc};
use clap::{Args, Parser, Subcommand};
use escrowbook::application::engine::{BookingEngine, EnginePorts};
use escrowbook::application::sweeper::ExpirationSweeper;
use escrowbook::application::webhook::{WebhookProcessor, WebhookVerifier};
use escrowbook::config::{EngineConfig, GatewayConfig};
use escrowbook::domain::ports::{BookingRepositoryBox, ClockBox, WebhookLedgerBox};
use escrowbook::domain::profile::PlatformSettings;
use escrowbook::error::BookingError;
use escrowbook::infrastructure::clock::{ManualClock, SystemClock};
use escrowbook::infrastructure::http_gateway::HttpPaymentGateway;
use escrowbook::infrastructure::in_memory::{
    InMemoryBookingRepository, InMemoryProfileStore, InMemorySettingsStore, InMemoryWebhookLedger,
};
use escrowbook::infrastructure::notifier::LogNotifier;
#[cfg(feature = "storage-rocksdb")]
use escrowbook::infrastructure::rocksdb::RocksDBStore;
use escrowbook::interfaces::csv::booking_reader::BookingReader;
use escrowbook::interfaces::csv::booking_writer::BookingWriter;
use escrowbook::logging::init_logging;
use miette::{IntoDiagnostic, Result};
use rust_decimal::Decimal;
use std::fs::File;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Booking snapshot CSV loaded into the repository before the command runs
    #[arg(long)]
    bookings: Option<PathBuf>,

    /// Path to persistent database (optional). If provided, uses RocksDB.
    #[arg(long, env = "ESCROW_DB_PATH")]
    db_path: Option<PathBuf>,

    #[arg(long, env = "ESCROW_LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Emit logs as JSON lines
    #[arg(long, env = "ESCROW_LOG_JSON")]
    log_json: bool,

    #[command(flatten)]
    gateway: GatewayArgs,

    #[command(flatten)]
    engine: EngineArgs,

    #[command(subcommand)]
    command: Command,
}

#[derive(Args)]
struct GatewayArgs {
    #[arg(long, env = "ESCROW_GATEWAY_URL", default_value = "https://api.paystack.co")]
    gateway_url: String,

    /// Bearer secret key for the payment gateway
    #[arg(long, env = "ESCROW_GATEWAY_SECRET", hide_env_values = true)]
    gateway_secret: Option<String>,

    #[arg(long, env = "ESCROW_GATEWAY_TIMEOUT_SECS", default_value_t = 10)]
    gateway_timeout_secs: u64,
}

#[derive(Args)]
struct EngineArgs {
    /// Hours a booking may stay pending before the sweep expires it
    #[arg(long, env = "ESCROW_EXPIRATION_HOURS", default_value_t = 24)]
    expiration_hours: i64,

    #[arg(long, env = "ESCROW_MAX_WRITE_ATTEMPTS", default_value_t = 3)]
    max_write_attempts: u32,

    #[arg(long, env = "ESCROW_SWEEP_CONCURRENCY", default_value_t = 8)]
    sweep_concurrency: usize,

    #[arg(long, env = "ESCROW_COMMISSION_PERCENTAGE", default_value = "15")]
    commission_percentage: Decimal,
}

#[derive(Subcommand)]
enum Command {
    /// Expire bookings left pending past their window and retry stuck refunds
    Sweep {
        /// Evaluate the window at this instant (RFC 3339) instead of the current time
        #[arg(long)]
        now: Option<DateTime<Utc>>,
    },
    /// Apply one signed gateway callback
    Webhook {
        /// File holding the raw request body
        #[arg(long)]
        payload: PathBuf,

        /// Hex signature from the X-Signature header
        #[arg(long)]
        signature: String,

        /// Signing secret; defaults to the gateway secret key
        #[arg(long, env = "ESCROW_WEBHOOK_SECRET", hide_env_values = true)]
        webhook_secret: Option<String>,
    },
    /// Print the stored bookings
    Show,
}

struct Storage {
    bookings: BookingRepositoryBox,
    ledger: WebhookLedgerBox,
}

#[cfg(feature = "storage-rocksdb")]
fn open_storage(db_path: Option<PathBuf>) -> Result<Storage> {
    if let Some(db_path) = db_path {
        let store = RocksDBStore::open(db_path)?;
        return Ok(Storage {
            bookings: Box::new(store.clone()),
            ledger: Box::new(store),
        });
    }
    Ok(in_memory_storage())
}

#[cfg(not(feature = "storage-rocksdb"))]
fn open_storage(db_path: Option<PathBuf>) -> Result<Storage> {
    if db_path.is_some() {
        warn!(
            "Persistent storage requested via --db-path, but 'storage-rocksdb' feature is not enabled. Falling back to in-memory storage."
        );
    }
    Ok(in_memory_storage())
}

fn in_memory_storage() -> Storage {
    Storage {
        bookings: Box::new(InMemoryBookingRepository::new()),
        ledger: Box::new(InMemoryWebhookLedger::new()),
    }
}

async fn load_snapshot(path: PathBuf, bookings: &BookingRepositoryBox) -> Result<()> {
    let file = File::open(path).into_diagnostic()?;
    let mut loaded = 0usize;
    for booking in BookingReader::new(file).bookings() {
        match booking {
            Ok(booking) => {
                bookings.insert(booking).await?;
                loaded += 1;
            }
            Err(e) => warn!(error = %e, "skipping unreadable booking row"),
        }
    }
    info!(loaded, "booking snapshot loaded");
    Ok(())
}

fn build_engine(cli: &Cli, bookings: BookingRepositoryBox, clock: ClockBox) -> Result<BookingEngine> {
    let timeout = Duration::from_secs(cli.gateway.gateway_timeout_secs);
    let gateway_config = GatewayConfig::new(
        &cli.gateway.gateway_url,
        cli.gateway.gateway_secret.as_deref().unwrap_or_default(),
        timeout,
    )?;
    let config = EngineConfig::new(
        chrono::Duration::hours(cli.engine.expiration_hours),
        timeout,
        cli.engine.max_write_attempts,
        cli.engine.sweep_concurrency,
    )?;

    let ports = EnginePorts {
        bookings,
        profiles: Box::new(InMemoryProfileStore::new()),
        settings: Box::new(InMemorySettingsStore::new(PlatformSettings {
            commission_percentage: cli.engine.commission_percentage,
        })),
        gateway: Box::new(HttpPaymentGateway::new(&gateway_config)?),
        notifier: Box::new(LogNotifier),
        clock,
    };
    Ok(BookingEngine::new(ports, config))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(&cli.log_level, cli.log_json);

    let storage = open_storage(cli.db_path.clone())?;
    if let Some(path) = cli.bookings.clone() {
        load_snapshot(path, &storage.bookings).await?;
    }

    let bookings = match &cli.command {
        Command::Sweep { now } => {
            let clock: ClockBox = match now {
                Some(now) => Box::new(ManualClock::new(*now)),
                None => Box::new(SystemClock),
            };
            let engine = Arc::new(build_engine(&cli, storage.bookings, clock)?);
            let report = ExpirationSweeper::new(engine.clone())
                .sweep(engine.now())
                .await?;
            info!(?report, "sweep complete");
            engine.repository().all().await?
        }
        Command::Webhook {
            payload,
            signature,
            webhook_secret,
        } => {
            let secret = webhook_secret
                .clone()
                .or_else(|| cli.gateway.gateway_secret.clone())
                .ok_or_else(|| {
                    BookingError::ValidationError("No webhook signing secret configured".to_string())
                })?;
            let body = std::fs::read(payload).into_diagnostic()?;

            let engine = Arc::new(build_engine(&cli, storage.bookings, Box::new(SystemClock))?);
            let processor = WebhookProcessor::new(
                engine.clone(),
                storage.ledger,
                WebhookVerifier::new(secret),
            );
            let outcome = processor.process(&body, signature).await?;
            info!(?outcome, "webhook handled");
            engine.repository().all().await?
        }
        Command::Show => storage.bookings.all().await?,
    };

    let stdout = io::stdout();
    let mut writer = BookingWriter::new(stdout.lock());
    writer.write_bookings(bookings)?;

    Ok(())
}
