//! Example binary: wires `Config` -> store/dispatcher/cursor policy ->
//! `Engine` -> the axum transport adapter, and starts listening.

use std::{path::PathBuf, sync::Arc, time::Duration};

use clap::Parser;
use flowlog::{
    config::Config,
    cursor::CursorPolicy,
    dispatcher::Dispatcher,
    engine::Engine,
    store::{file::FileStreamStore, memory::MemoryStreamStore, StreamStore},
    transport::axum_adapter,
};
use tracing::info;

#[derive(Parser, Debug)]
#[clap(author, version, about = "Durable append-only stream server", long_about = None)]
struct Opts {
    /// Host to bind to
    #[arg(long, default_value = "127.0.0.1")]
    host: String,

    /// Port to listen on
    #[arg(long, short = 'p', default_value_t = 4437)]
    port: u16,

    /// Directory for file-backed storage; omit for an in-memory store
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Soft cap on concurrent long-poll/SSE waiters
    #[arg(long, default_value_t = 10_000)]
    max_waiters: usize,

    /// Open file descriptor LRU size for the file-backed store
    #[arg(long, default_value_t = 1024)]
    fd_lru_capacity: usize,

    /// Default long-poll timeout in seconds, used when a request omits `timeout`
    #[arg(long, default_value_t = 30)]
    long_poll_timeout_secs: u64,

    /// Cursor TTL in seconds
    #[arg(long, default_value_t = 600)]
    cursor_ttl_secs: u64,

    /// Disable gzip/deflate response compression
    #[arg(long)]
    no_compression: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let opts = Opts::parse();

    let config = Config {
        host: opts.host.clone(),
        port: opts.port,
        max_waiters: opts.max_waiters,
        file_store_fd_lru_capacity: opts.fd_lru_capacity,
        long_poll_timeout_default: Duration::from_secs(opts.long_poll_timeout_secs),
        cursor_ttl: Duration::from_secs(opts.cursor_ttl_secs),
        enable_compression: !opts.no_compression,
        data_dir: opts.data_dir.clone(),
        ..Config::default()
    };

    let dispatcher = Arc::new(Dispatcher::new(config.max_waiters));

    let store: Arc<dyn StreamStore> = match &config.data_dir {
        Some(dir) => {
            info!(dir = %dir.display(), "starting file-backed store");
            Arc::new(FileStreamStore::open(dir.clone(), config.file_store_fd_lru_capacity, dispatcher.clone())?)
        }
        None => {
            info!("starting in-memory store");
            Arc::new(MemoryStreamStore::new(dispatcher.clone()))
        }
    };

    let cursor_policy = match config.cursor_secret {
        Some(secret) => CursorPolicy::with_secret(secret, config.cursor_ttl),
        None => CursorPolicy::generate(config.cursor_ttl),
    };

    let engine = Arc::new(Engine::new(store, dispatcher, cursor_policy, config.clone()));
    let router = axum_adapter::router(engine, config.enable_compression);

    let addr = format!("{}:{}", config.host, config.port);
    info!(%addr, "listening");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, router).await?;

    Ok(())
}
