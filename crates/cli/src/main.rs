use std::{path::PathBuf, process, sync::Arc};

use clap::{Parser, ValueEnum};
use tracing_subscriber::EnvFilter;
use url::Url;

use durable_stream::{
    MemoryStreamStore, ObjectStreamStore, PostgresStreamStore, RedisStreamStore,
    SqliteStreamStore, StreamStore, server::start_server, types::ServerOptions,
};

#[derive(Parser, Debug)]
#[clap(author, version, about = "Durable Streams - append-only stream server with live tailing", long_about = None)]
struct Opts {
    /// Host to bind to
    #[arg(long, default_value = "127.0.0.1")]
    host: String,

    /// Port to listen on (0 for auto-assign)
    #[arg(long, short = 'p', default_value_t = 4437)]
    port: u16,

    /// Storage substrate backing the streams
    #[arg(long, short = 'b', value_enum, default_value_t = Backend::Memory)]
    backend: Backend,

    /// Database file for the sqlite backend
    #[arg(long, default_value = "streams.db")]
    db_path: PathBuf,

    /// Connection string for the postgres backend
    #[arg(long, env = "DATABASE_URL")]
    database_url: Option<String>,

    /// Connection string for the redis backend
    #[arg(long, env = "REDIS_URL")]
    redis_url: Option<String>,

    /// Object-store URL for the object backend (e.g. s3://bucket, memory:///)
    #[arg(long, env = "OBJECT_URL")]
    object_url: Option<Url>,

    /// Long-poll and SSE wait-cycle timeout in milliseconds
    #[arg(long, default_value_t = 30_000)]
    long_poll_timeout_ms: u64,

    /// Cursor interval in seconds
    #[arg(long, default_value_t = 20)]
    cursor_interval_seconds: u64,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum Backend {
    /// In-process memory (data is lost on exit)
    Memory,
    /// Embedded SQLite database
    Sqlite,
    /// Relational database over a connection pool
    Postgres,
    /// Redis-style key-value service
    Redis,
    /// Object store (S3 and friends)
    Object,
}

#[tokio::main]
async fn main() {
    let opts: Opts = match Opts::try_parse() {
        Ok(opts) => opts,
        Err(e) => {
            let _ = e.print();
            process::exit(e.exit_code());
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    if let Err(e) = run(opts).await {
        eprintln!("Error: {e}");
        process::exit(1);
    }
}

async fn run(opts: Opts) -> Result<(), String> {
    let store = build_store(&opts).await?;
    let options = ServerOptions {
        port: opts.port,
        host: opts.host.clone(),
        long_poll_timeout_ms: opts.long_poll_timeout_ms,
        cursor_interval_seconds: opts.cursor_interval_seconds,
        ..Default::default()
    };
    start_server(options, store)
        .await
        .map_err(|e| format!("server failed: {e}"))
}

async fn build_store(opts: &Opts) -> Result<Arc<dyn StreamStore>, String> {
    Ok(match opts.backend {
        Backend::Memory => Arc::new(MemoryStreamStore::new()),
        Backend::Sqlite => Arc::new(
            SqliteStreamStore::open(&opts.db_path)
                .map_err(|e| format!("failed to open {}: {e}", opts.db_path.display()))?,
        ),
        Backend::Postgres => {
            let url = opts
                .database_url
                .as_deref()
                .ok_or("--database-url is required for the postgres backend")?;
            Arc::new(
                PostgresStreamStore::connect(url)
                    .await
                    .map_err(|e| format!("failed to connect to postgres: {e}"))?,
            )
        }
        Backend::Redis => {
            let url = opts
                .redis_url
                .as_deref()
                .ok_or("--redis-url is required for the redis backend")?;
            Arc::new(
                RedisStreamStore::connect(url)
                    .await
                    .map_err(|e| format!("failed to connect to redis: {e}"))?,
            )
        }
        Backend::Object => {
            let url = opts
                .object_url
                .as_ref()
                .ok_or("--object-url is required for the object backend")?;
            let (client, _) = object_store::parse_url(url)
                .map_err(|e| format!("unsupported object-store url: {e}"))?;
            Arc::new(ObjectStreamStore::new(Arc::from(client)))
        }
    })
}
