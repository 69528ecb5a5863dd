use chrono::Utc;
use clap::Parser;
use miette::{IntoDiagnostic, Result};
use std::fs::File;
use std::io::{self, BufReader};
use std::path::PathBuf;
use std::sync::Arc;
use tutorpay::application::engine::{Engine, Stores};
use tutorpay::config::EngineConfig;
use tutorpay::infrastructure::clock::ManualClock;
use tutorpay::infrastructure::events::TracingEventPublisher;
use tutorpay::infrastructure::in_memory::InMemoryTeacherDirectory;
use tutorpay::interfaces::csv::wallet_writer::WalletReportWriter;
use tutorpay::interfaces::jsonl::command_reader::CommandReader;
use tutorpay::interfaces::replay::ReplayDriver;
use tutorpay::logging;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Input script, one JSON command per line
    input: PathBuf,

    /// Path to persistent database (optional). If provided, uses RocksDB.
    #[arg(long)]
    db_path: Option<PathBuf>,
}

fn open_stores(db_path: Option<PathBuf>) -> Result<Stores> {
    match db_path {
        #[cfg(feature = "storage-rocksdb")]
        Some(path) => {
            let store =
                tutorpay::infrastructure::rocksdb::RocksDBStore::open(&path).into_diagnostic()?;
            tracing::info!(path = %path.display(), "using RocksDB storage");
            Ok(Stores::rocksdb(store))
        }
        #[cfg(not(feature = "storage-rocksdb"))]
        Some(path) => {
            tracing::warn!(
                path = %path.display(),
                "Persistent storage requested via --db-path, but 'storage-rocksdb' feature is not enabled. Falling back to In-Memory storage."
            );
            Ok(Stores::in_memory())
        }
        None => Ok(Stores::in_memory()),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    logging::init();
    let cli = Cli::parse();
    let config = EngineConfig::from_env().into_diagnostic()?;

    let stores = open_stores(cli.db_path)?;
    let teachers = InMemoryTeacherDirectory::new();
    let clock = ManualClock::new(Utc::now());
    let engine = Engine::new(
        &config,
        stores,
        Arc::new(teachers.clone()),
        Arc::new(TracingEventPublisher),
        Arc::new(clock.clone()),
    );
    let mut driver = ReplayDriver::new(engine, teachers, clock);

    let file = File::open(&cli.input).into_diagnostic()?;
    let reader = CommandReader::new(BufReader::new(file));
    for command in reader.commands() {
        match command {
            Ok(command) => {
                if let Err(e) = driver.run(command).await {
                    tracing::error!(error = %e, "command failed");
                }
            }
            Err(e) => tracing::error!(error = %e, "unreadable command"),
        }
    }

    for check in driver.engine().ledger().verify_all().await.into_diagnostic()? {
        if !check.is_consistent() {
            tracing::error!(
                wallet_id = %check.wallet_id,
                cached = %check.cached,
                computed = %check.computed,
                "cached balance disagrees with ledger history"
            );
        }
    }

    let rows = driver.report().await.into_diagnostic()?;
    let stdout = io::stdout();
    let mut writer = WalletReportWriter::new(stdout.lock());
    writer.write_rows(rows).into_diagnostic()?;

    Ok(())
}
