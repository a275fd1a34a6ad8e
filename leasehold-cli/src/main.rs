mod client;
mod handlers;
mod server;

use std::process::ExitCode;
use std::time::Duration;

use clap::{Parser, Subcommand, ValueEnum};
use serde::Serialize;
use tokio::sync::{oneshot, watch};
use tracing_subscriber::EnvFilter;

use leasehold_core::burglar::DEFAULT_RECONCILE_INTERVAL;
use leasehold_core::client::LockClient;
use leasehold_core::runner::{LockRunner, DEFAULT_RETRY_INTERVAL, DEFAULT_SESSION_TTL};
use leasehold_core::types::{Resource, TypeFilter, LOCK_TYPE, PRESENCE_TYPE};

use crate::client::HttpLockClient;
use crate::server::{ServeConfig, Storage, API_KEY_ENV};

#[derive(Parser)]
#[command(
    name = "leasehold",
    about = "Leasehold: TTL-based distributed locks and presence",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum LeaseKind {
    Lock,
    Presence,
}

impl LeaseKind {
    fn type_name(self) -> &'static str {
        match self {
            LeaseKind::Lock => LOCK_TYPE,
            LeaseKind::Presence => PRESENCE_TYPE,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Start the lease server
    Serve {
        /// Port to listen on
        #[arg(short, long, default_value = "3100")]
        port: u16,

        /// Host to bind to
        #[arg(long, default_value = "0.0.0.0")]
        host: String,

        /// Storage backend: "memory" or "sqlite:<path>"
        #[arg(long, default_value = "memory", env = "LEASEHOLD_STORAGE")]
        storage: String,

        /// Milliseconds between reconciliation sweeps
        #[arg(
            long,
            default_value_t = DEFAULT_RECONCILE_INTERVAL.as_millis() as u64,
            value_parser = clap::value_parser!(u64).range(1..)
        )]
        reconcile_interval_ms: u64,

        /// Bearer token required on every route except /health
        #[arg(long, env = API_KEY_ENV, hide_env_values = true)]
        api_key: Option<String>,
    },

    /// Hold a lock or presence until interrupted
    Hold {
        #[command(flatten)]
        remote: Remote,

        #[arg(long)]
        key: String,

        #[arg(long)]
        owner: String,

        #[arg(long, default_value = "")]
        value: String,

        #[arg(long = "type", value_enum, default_value = "lock")]
        kind: LeaseKind,

        /// Lease TTL in seconds
        #[arg(long, default_value_t = DEFAULT_SESSION_TTL.as_secs() as i64)]
        ttl: i64,

        /// Milliseconds between acquire attempts
        #[arg(
            long,
            default_value_t = DEFAULT_RETRY_INTERVAL.as_millis() as u64,
            value_parser = clap::value_parser!(u64).range(1..)
        )]
        retry_interval_ms: u64,
    },

    /// Print the current holder of a key
    Fetch {
        #[command(flatten)]
        remote: Remote,

        #[arg(long)]
        key: String,
    },

    /// List held leases, optionally of one type
    List {
        #[command(flatten)]
        remote: Remote,

        #[arg(long = "type", value_enum)]
        kind: Option<LeaseKind>,
    },

    /// Print version information
    Version,
}

#[derive(clap::Args)]
struct Remote {
    /// Lease server base URL
    #[arg(long, default_value = "http://127.0.0.1:3100", env = "LEASEHOLD_SERVER")]
    server: String,

    #[arg(long, env = API_KEY_ENV, hide_env_values = true)]
    api_key: Option<String>,
}

impl Remote {
    fn connect(self) -> Result<HttpLockClient, String> {
        HttpLockClient::new(&self.server, self.api_key).map_err(|e| e.to_string())
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Serve {
            port,
            host,
            storage,
            reconcile_interval_ms,
            api_key,
        } => serve(host, port, &storage, reconcile_interval_ms, api_key).await,
        Commands::Hold {
            remote,
            key,
            owner,
            value,
            kind,
            ttl,
            retry_interval_ms,
        } => {
            let resource = Resource::new(key, owner, value, kind.type_name());
            let retry = Duration::from_millis(retry_interval_ms);
            hold(remote, resource, ttl, retry, matches!(kind, LeaseKind::Lock)).await
        }
        Commands::Fetch { remote, key } => match remote.connect() {
            Ok(client) => print_result(client.fetch(&key).await),
            Err(e) => Err(e),
        },
        Commands::List { remote, kind } => {
            let filter = kind.map_or_else(TypeFilter::any, |k| TypeFilter::of(k.type_name()));
            match remote.connect() {
                Ok(client) => print_result(client.fetch_all(&filter).await),
                Err(e) => Err(e),
            }
        }
        Commands::Version => {
            println!("leasehold {}", env!("CARGO_PKG_VERSION"));
            println!("TTL-based distributed locks and presence");
            Ok(())
        }
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "leasehold failed");
            ExitCode::FAILURE
        }
    }
}

async fn serve(
    host: String,
    port: u16,
    storage: &str,
    reconcile_interval_ms: u64,
    api_key: Option<String>,
) -> Result<(), String> {
    let storage: Storage = storage.parse().map_err(|e: server::ServeError| e.to_string())?;
    let config = ServeConfig {
        host,
        port,
        storage,
        reconcile_interval: Duration::from_millis(reconcile_interval_ms),
        api_key,
    };
    server::run(config).await.map_err(|e| e.to_string())
}

async fn hold(
    remote: Remote,
    resource: Resource,
    ttl: i64,
    retry: Duration,
    exit_on_lost_lock: bool,
) -> Result<(), String> {
    let client = remote.connect()?;
    let runner = LockRunner::new(client, resource, ttl, retry, exit_on_lost_lock);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let (ready_tx, ready_rx) = oneshot::channel();

    tokio::spawn(async move {
        if ready_rx.await.is_ok() {
            tracing::info!("holding lease, press ctrl-c to release");
        }
    });
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            let _ = shutdown_tx.send(true);
        }
    });

    runner.run(shutdown_rx, ready_tx).await.map_err(|e| e.to_string())
}

fn print_result<T: Serialize>(result: leasehold_core::LockResult<T>) -> Result<(), String> {
    let value = result.map_err(|e| e.to_string())?;
    let json = serde_json::to_string_pretty(&value).map_err(|e| e.to_string())?;
    println!("{json}");
    Ok(())
}
