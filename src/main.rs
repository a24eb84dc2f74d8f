use clap::Parser;
use miette::{IntoDiagnostic, Result};
use paybroker::application::broker::PaymentBroker;
use paybroker::application::engine::ReconciliationEngine;
use paybroker::config::BrokerConfig;
use paybroker::domain::ports::{RefundStoreRef, TransactionStoreRef};
use paybroker::infrastructure::audit::TracingAuditSink;
use paybroker::infrastructure::in_memory::{InMemoryRefundStore, InMemoryTransactionStore};
#[cfg(feature = "storage-rocksdb")]
use paybroker::infrastructure::rocksdb::RocksDBStore;
use paybroker::interfaces::batch::{BatchRunner, CommandReader};
use paybroker::interfaces::csv::ledger_writer::LedgerWriter;
use std::fs::File;
use std::io::{self, BufReader};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// JSON-lines file of payment commands
    input: PathBuf,

    /// Path to persistent database (optional). If provided, uses RocksDB.
    #[arg(long)]
    db_path: Option<PathBuf>,
}

fn in_memory() -> (TransactionStoreRef, RefundStoreRef) {
    (
        Arc::new(InMemoryTransactionStore::new()),
        Arc::new(InMemoryRefundStore::new()),
    )
}

#[cfg(feature = "storage-rocksdb")]
fn stores(db_path: Option<PathBuf>) -> Result<(TransactionStoreRef, RefundStoreRef)> {
    match db_path {
        Some(db_path) => {
            let store = RocksDBStore::open(db_path).into_diagnostic()?;
            Ok((Arc::new(store.clone()), Arc::new(store)))
        }
        None => Ok(in_memory()),
    }
}

#[cfg(not(feature = "storage-rocksdb"))]
fn stores(db_path: Option<PathBuf>) -> Result<(TransactionStoreRef, RefundStoreRef)> {
    if db_path.is_some() {
        eprintln!(
            "WARNING: Persistent storage requested via --db-path, but 'storage-rocksdb' feature is not enabled. Falling back to In-Memory storage."
        );
    }
    Ok(in_memory())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();
    let config = BrokerConfig::from_env().into_diagnostic()?;

    let (transactions, refunds) = stores(cli.db_path)?;
    let engine = Arc::new(ReconciliationEngine::new(
        transactions,
        refunds,
        Arc::new(TracingAuditSink),
    ));
    let broker = Arc::new(PaymentBroker::from_config(&config, engine).into_diagnostic()?);

    let file = File::open(cli.input).into_diagnostic()?;
    let mut runner = BatchRunner::new(broker.clone());
    for (line, command) in CommandReader::new(BufReader::new(file)).commands() {
        let outcome = match command {
            Ok(command) => runner.execute(command).await,
            Err(e) => Err(e),
        };
        if let Err(e) = outcome {
            eprintln!("Error processing command on line {line}: {e}");
        }
    }

    let ledger = broker.engine().all_transactions().await.into_diagnostic()?;
    let stdout = io::stdout();
    LedgerWriter::new(stdout.lock())
        .write_ledger(&ledger)
        .into_diagnostic()?;

    Ok(())
}
