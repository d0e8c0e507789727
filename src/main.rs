use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;

use intake::engine::UpsertEngine;
use intake::loader::BatchLoader;
use intake::schedule::{self, Schedule};
use intake::server;
use intake::sink::{LogLevel, LogSink};
use intake::store::SegmentStore;

#[derive(Parser, Clone, Debug)]
#[clap(author, version, about, long_about = None)]
struct Args {
    /// Batch source: a JSON array of entries.
    #[clap(long, default_value = "MOCK_DATA.json")]
    data_file: PathBuf,

    /// Segment file backing the entry store.
    #[clap(long, default_value = "entries.dat")]
    store_path: PathBuf,

    /// Root directory for the per-level log files.
    #[clap(long, default_value = "logs")]
    log_dir: PathBuf,

    #[clap(long, default_value = "127.0.0.1:3000")]
    addr: String,

    /// Upper bound on concurrent record reconciles.
    #[clap(long, default_value = "10")]
    chunk_size: usize,

    /// Cron-style trigger cadence (minute hour dom month dow).
    #[clap(long, default_value = schedule::DEFAULT_EXPRESSION)]
    schedule: String,

    /// Per-record reconcile deadline in seconds.
    #[clap(long, default_value = "30")]
    reconcile_timeout_secs: u64,

    /// Run one batch load immediately at startup.
    #[clap(long)]
    run_now: bool,
}

#[tokio::main]
async fn main() {
    if std::env::var("RUST_LOG").is_err() {
        std::env::set_var("RUST_LOG", "info,intake=info");
    }
    tracing_subscriber::fmt()
        .with_target(false)
        .with_level(true)
        .init();

    let args = Args::parse();

    // The sink is the one component allowed to be fatal at startup; every
    // later failure flows through it instead of crashing the process.
    let sink = Arc::new(LogSink::open(&args.log_dir).expect("Failed to initialize log sink"));

    let schedule = match Schedule::parse(&args.schedule) {
        Ok(schedule) => schedule,
        Err(e) => {
            sink.append(
                LogLevel::Error,
                format!("Invalid schedule expression '{}': {}", args.schedule, e),
            );
            std::process::exit(1);
        }
    };

    // Persistent store that cannot be opened means every future run would
    // fail; treat it as fatal at boot rather than limping along.
    let store = match SegmentStore::open(&args.store_path) {
        Ok(store) => Arc::new(store),
        Err(e) => {
            sink.append(
                LogLevel::Error,
                format!(
                    "Failed to open entry store at {}: {}",
                    args.store_path.display(),
                    e
                ),
            );
            std::process::exit(1);
        }
    };
    sink.append(
        LogLevel::Info,
        format!(
            "Entry store ready at {} ({} entries)",
            args.store_path.display(),
            store.entry_count()
        ),
    );

    let engine = UpsertEngine::new(store, sink.clone())
        .with_reconcile_timeout(Duration::from_secs(args.reconcile_timeout_secs));
    let loader = Arc::new(
        BatchLoader::new(args.data_file.clone(), engine, sink.clone())
            .with_chunk_size(args.chunk_size),
    );

    if args.run_now {
        let first_run = loader.clone();
        tokio::spawn(async move { first_run.load_and_reconcile().await });
    }

    let _scheduler = schedule::run_scheduler(schedule, loader, sink.clone());
    sink.append(
        LogLevel::Info,
        format!("Scheduler armed with '{}'", args.schedule),
    );

    let addr: std::net::SocketAddr = args.addr.parse().expect("Invalid bind address");
    let routes = server::routes(sink.clone());
    tokio::spawn(warp::serve(routes).run(addr));
    sink.append(LogLevel::Info, format!("Server is running on {}", addr));

    tokio::signal::ctrl_c()
        .await
        .expect("Failed to listen for shutdown signal");
    sink.append(LogLevel::Info, "Shutting down");
}
