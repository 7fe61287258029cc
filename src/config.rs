use anyhow::{Context, Result};
use clap::Parser;
use std::{env, str::FromStr, time::Duration};

const MIB: u64 = 1024 * 1024;

/// Centralized application configuration.
/// Combines environment variables and CLI arguments.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub database_url: String,
    /// Largest upload accepted by `POST /files`; unlimited when unset.
    pub max_upload_size: Option<u64>,
    /// Largest single chunk body accepted by `PATCH /files/{id}`.
    pub max_chunk_size: u64,
    /// Byte range copied per replication part. The S3 backend buffers one
    /// part per in-flight copy, so peak memory is about
    /// `chunk_size * part_workers * task_workers`.
    pub chunk_size: u64,
    pub part_workers: usize,
    pub task_workers: usize,
    pub task_queue_capacity: usize,
    /// Idle time after which an upload expires; no expiry when unset.
    pub upload_ttl: Option<Duration>,
    pub sweep_interval: Duration,
}

/// Command-line + environment configuration.
#[derive(Parser, Debug, Default)]
#[command(author, version, about = "Resumable upload and replication gateway")]
pub struct Args {
    /// Host to bind to (overrides GATEWAY_HOST)
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind to (overrides GATEWAY_PORT)
    #[arg(long)]
    pub port: Option<u16>,

    /// Database URL (overrides GATEWAY_DATABASE_URL)
    #[arg(long)]
    pub database_url: Option<String>,

    /// Maximum upload size in bytes (overrides GATEWAY_MAX_UPLOAD_SIZE)
    #[arg(long)]
    pub max_upload_size: Option<u64>,

    /// Maximum chunk body size in bytes (overrides GATEWAY_MAX_CHUNK_SIZE)
    #[arg(long)]
    pub max_chunk_size: Option<u64>,

    /// Replication range size in bytes (overrides GATEWAY_CHUNK_SIZE)
    #[arg(long)]
    pub chunk_size: Option<u64>,

    /// Parallel part copies per replication (overrides GATEWAY_PART_WORKERS)
    #[arg(long)]
    pub part_workers: Option<usize>,

    /// Replication task workers (overrides GATEWAY_TASK_WORKERS)
    #[arg(long)]
    pub task_workers: Option<usize>,

    /// Replication task queue capacity (overrides GATEWAY_TASK_QUEUE_CAPACITY)
    #[arg(long)]
    pub task_queue_capacity: Option<usize>,

    /// Expire uploads idle for this many seconds (overrides GATEWAY_UPLOAD_TTL_SECS)
    #[arg(long)]
    pub upload_ttl_secs: Option<u64>,

    /// Seconds between expiry sweeps (overrides GATEWAY_SWEEP_INTERVAL_SECS)
    #[arg(long)]
    pub sweep_interval_secs: Option<u64>,

    /// Run migrations and exit
    #[arg(long)]
    pub migrate: bool,
}

/// Read `name` from the environment, parsing it as `T`.
fn env_parse<T>(name: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(name) {
        Ok(value) => value
            .parse::<T>()
            .map(Some)
            .with_context(|| format!("parsing {} value `{}`", name, value)),
        Err(env::VarError::NotPresent) => Ok(None),
        Err(err) => Err(err).with_context(|| format!("reading {}", name)),
    }
}

impl AppConfig {
    /// Parse environment variables + CLI args into AppConfig and migrate flag.
    pub fn from_env_and_args() -> Result<(Self, bool)> {
        let args = Args::parse();
        let migrate = args.migrate;
        Ok((Self::merge(args)?, migrate))
    }

    /// CLI values win over environment values, which win over defaults.
    pub fn merge(args: Args) -> Result<Self> {
        let env_host = env::var("GATEWAY_HOST").unwrap_or_else(|_| "0.0.0.0".into());
        let env_db =
            env::var("GATEWAY_DATABASE_URL").unwrap_or_else(|_| "sqlite://./data/gateway.db".into());

        let upload_ttl_secs = match args.upload_ttl_secs {
            Some(secs) => Some(secs),
            None => env_parse("GATEWAY_UPLOAD_TTL_SECS")?,
        };
        let sweep_interval_secs = match args.sweep_interval_secs {
            Some(secs) => secs,
            None => env_parse("GATEWAY_SWEEP_INTERVAL_SECS")?.unwrap_or(60),
        };

        Ok(Self {
            host: args.host.unwrap_or(env_host),
            port: match args.port {
                Some(port) => port,
                None => env_parse("GATEWAY_PORT")?.unwrap_or(3000),
            },
            database_url: args.database_url.unwrap_or(env_db),
            max_upload_size: match args.max_upload_size {
                Some(size) => Some(size),
                None => env_parse("GATEWAY_MAX_UPLOAD_SIZE")?,
            },
            max_chunk_size: match args.max_chunk_size {
                Some(size) => size,
                None => env_parse("GATEWAY_MAX_CHUNK_SIZE")?.unwrap_or(128 * MIB),
            },
            chunk_size: match args.chunk_size {
                Some(size) => size,
                None => env_parse("GATEWAY_CHUNK_SIZE")?.unwrap_or(100 * MIB),
            },
            part_workers: match args.part_workers {
                Some(n) => n,
                None => env_parse("GATEWAY_PART_WORKERS")?.unwrap_or(5),
            },
            task_workers: match args.task_workers {
                Some(n) => n,
                None => env_parse("GATEWAY_TASK_WORKERS")?.unwrap_or(4),
            },
            task_queue_capacity: match args.task_queue_capacity {
                Some(n) => n,
                None => env_parse("GATEWAY_TASK_QUEUE_CAPACITY")?.unwrap_or(64),
            },
            upload_ttl: upload_ttl_secs.map(Duration::from_secs),
            sweep_interval: Duration::from_secs(sweep_interval_secs.max(1)),
        })
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
