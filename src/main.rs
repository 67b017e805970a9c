use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use tollgate::config::{LoggingConfig, TollgateConfig};
use tollgate::ratelimit::{AdmissionPolicy, BucketSnapshot, RateLimitClient, RateLimitResult};
use tollgate::store::{self, BucketStore};

/// Manage and consume distributed token buckets.
#[derive(Debug, Parser)]
#[command(name = "tollgate", version, about)]
struct Cli {
    /// YAML configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Create or replace a client's bucket
    Init {
        client_id: String,
        /// Permits available right away
        #[arg(long)]
        initial: u64,
        /// Bucket capacity
        #[arg(long)]
        max: u64,
        /// Milliseconds needed to add one permit
        #[arg(long)]
        interval_ms: u64,
        /// Label stored with the bucket (defaults to the client id)
        #[arg(long)]
        app: Option<String>,
    },
    /// Change a bucket's capacity and refill interval
    Modify {
        client_id: String,
        #[arg(long)]
        max: u64,
        #[arg(long)]
        interval_ms: u64,
    },
    /// Remove a client's bucket
    Delete { client_id: String },
    /// Take permits from a client's bucket
    Acquire {
        client_id: String,
        #[arg(long, default_value_t = 1)]
        permits: u64,
    },
    /// Take one permit and report whether the request would be admitted
    Admit { client_id: String },
    /// Print a client's bucket as JSON
    Inspect { client_id: String },
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();

    let config = TollgateConfig::load(cli.config.as_deref())?;
    init_tracing(&config.logging);

    if let Some(path) = &cli.config {
        info!(path = %path.display(), "Loaded configuration file");
    }
    info!(
        version = env!("CARGO_PKG_VERSION"),
        backend = ?config.store.backend,
        "Starting tollgate"
    );

    let store = store::open(&config.store).await?;
    let client = RateLimitClient::from_config(Arc::clone(&store), &config.store);
    let policy = AdmissionPolicy::from(&config.policy);

    let status = tokio::select! {
        status = run(&client, &policy, cli.command) => status,
        _ = shutdown_signal() => {
            warn!("Interrupted before the command completed");
            ExitCode::FAILURE
        }
    };

    store.close().await?;
    Ok(status)
}

async fn run(
    client: &RateLimitClient<dyn BucketStore>,
    policy: &AdmissionPolicy,
    command: Command,
) -> ExitCode {
    let result = match command {
        Command::Init {
            client_id,
            initial,
            max,
            interval_ms,
            app,
        } => {
            let app = app.unwrap_or_else(|| client_id.clone());
            client
                .init_with_app(&client_id, initial, max, Duration::from_millis(interval_ms), &app)
                .await
        }
        Command::Modify {
            client_id,
            max,
            interval_ms,
        } => {
            client
                .modify(&client_id, max, Duration::from_millis(interval_ms))
                .await
        }
        Command::Delete { client_id } => client.delete(&client_id).await,
        Command::Acquire { client_id, permits } => {
            client.acquire_permits(&client_id, permits).await
        }
        Command::Admit { client_id } => {
            let verdict = client.admit(&client_id, policy).await;
            println!("{:?}", verdict);
            return if verdict.is_allowed() {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            };
        }
        Command::Inspect { client_id } => return inspect(client, &client_id).await,
    };

    println!("{}", result);
    if result == RateLimitResult::Success {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}

async fn inspect(client: &RateLimitClient<dyn BucketStore>, client_id: &str) -> ExitCode {
    let Some(snapshot) = client.inspect(client_id).await else {
        println!("{}", RateLimitResult::NotFound);
        return ExitCode::FAILURE;
    };

    match render_snapshot(&snapshot) {
        Ok(json) => {
            println!("{}", json);
            ExitCode::SUCCESS
        }
        Err(e) => {
            warn!(error = %e, "Failed to render bucket");
            ExitCode::FAILURE
        }
    }
}

/// Pretty JSON for a bucket, with the last refill as an RFC 3339 time.
fn render_snapshot(snapshot: &BucketSnapshot) -> serde_json::Result<String> {
    let mut output = serde_json::to_value(snapshot)?;
    if let (Some(fields), Some(at)) = (output.as_object_mut(), snapshot.last_refill_at()) {
        fields.insert("last_refill_at".to_string(), at.to_rfc3339().into());
    }
    serde_json::to_string_pretty(&output)
}

/// Install the global subscriber. `RUST_LOG` takes precedence over the
/// configured level.
fn init_tracing(logging: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(logging.level.to_lowercase()));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);

    if logging.json {
        builder.json().init();
    } else {
        builder.with_thread_ids(true).init();
    }
}

/// Wait for a shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down");
        }
        _ = terminate => {
            info!("Received SIGTERM, shutting down");
        }
    }
}
