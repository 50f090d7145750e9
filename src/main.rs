//! Chat relay server.
//!
//! Serves the chat page and relays messages to the upstream completion
//! service, streaming replies as Server-Sent Events.
//!
//! # Usage
//!
//! ```bash
//! # Token from the environment (or a .env file)
//! GITHUB_TOKEN=ghp_... chat-relay
//!
//! # With config file
//! chat-relay config/relay.toml
//!
//! # Mock backend for local testing
//! RELAY_PROVIDER=mock chat-relay
//! ```

use std::path::PathBuf;

use clap::Parser;
use tokio::net::TcpListener;
use tokio::signal::unix::{signal, Signal, SignalKind};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use chat_relay::{
    backend::create_backend,
    config::{Config, LoggingConfig},
    metrics::{init_metrics, start_metrics_server},
    server::{self, create_router, AppState},
    shutdown::ShutdownCoordinator,
    streaming::{ChatRelay, RelaySettings},
};

/// HTTP relay that streams chat completions as Server-Sent Events.
#[derive(Parser, Debug)]
#[command(name = "chat-relay")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file (TOML).
    #[arg(value_name = "CONFIG")]
    config: Option<PathBuf>,

    /// Override listen address.
    #[arg(short, long)]
    listen: Option<String>,

    /// Override backend provider (openai, mock).
    #[arg(short, long)]
    provider: Option<String>,

    /// Enable debug logging.
    #[arg(short, long)]
    debug: bool,
}

#[tokio::main(flavor = "multi_thread")]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // A missing .env file is fine.
    let _ = dotenv::dotenv();

    let mut config = Config::load(args.config.as_ref())?;

    // Apply CLI overrides
    if let Some(listen) = args.listen {
        config.server.listen_addr = listen;
    }
    if let Some(provider) = args.provider {
        config.upstream.provider = provider;
    }
    if args.debug {
        config.logging.level = "debug".to_string();
    }

    init_logging(&config.logging)?;

    tracing::info!(
        listen_addr = %config.server.listen_addr,
        provider = %config.upstream.provider,
        model = %config.upstream.model,
        "Starting chat relay"
    );

    init_metrics();
    if config.metrics.enabled {
        let addr = config.metrics.listen_addr.parse()?;
        start_metrics_server(addr)?;
    }

    let backend = create_backend(&config.upstream)?;
    tracing::info!(backend = backend.name(), "Backend initialized");

    let relay = ChatRelay::new(
        backend,
        RelaySettings::from_config(&config.relay, &config.upstream),
    );

    let shutdown = ShutdownCoordinator::new();
    let app = create_router(
        AppState::new(relay, shutdown.clone()),
        &config.server.static_dir,
    );

    let listener = TcpListener::bind(&config.server.listen_addr).await?;
    tracing::info!(
        "Server running at http://{}",
        listener.local_addr()?
    );

    let signals = Signals::register()?;
    let shutdown_clone = shutdown.clone();
    tokio::spawn(async move {
        handle_signals(signals, shutdown_clone).await;
    });

    let mut server_task = tokio::spawn(server::serve(listener, app, shutdown.clone()));

    tokio::select! {
        result = &mut server_task => {
            // Server stopped without a shutdown signal.
            result??;
            return Ok(());
        }
        _ = shutdown.signalled() => {}
    }

    tracing::info!(
        active = shutdown.active_streams(),
        timeout_secs = config.server.shutdown_timeout_secs,
        "Waiting for streams to drain"
    );

    let drain = async {
        shutdown.wait_for_drain().await;
        (&mut server_task).await
    };

    let drained = tokio::time::timeout(config.server.shutdown_timeout(), drain).await;
    match drained {
        Ok(result) => {
            result??;
            tracing::info!("All streams drained");
        }
        Err(_) => {
            tracing::warn!(
                active = shutdown.active_streams(),
                "Shutdown timeout reached, forcing exit"
            );
            server_task.abort();
        }
    }

    tracing::info!("Chat relay stopped");
    Ok(())
}

/// Initialize logging with tracing.
fn init_logging(config: &LoggingConfig) -> anyhow::Result<()> {
    let filter =
        EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(&config.level))?;

    match config.format.as_str() {
        "json" => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().json())
                .init();
        }
        _ => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer())
                .init();
        }
    }

    Ok(())
}

/// Signal streams the relay reacts to.
struct Signals {
    interrupt: Signal,
    terminate: Signal,
    hangup: Signal,
}

impl Signals {
    fn register() -> std::io::Result<Self> {
        Ok(Self {
            interrupt: signal(SignalKind::interrupt())?,
            terminate: signal(SignalKind::terminate())?,
            hangup: signal(SignalKind::hangup())?,
        })
    }
}

/// Handle Unix signals.
async fn handle_signals(signals: Signals, shutdown: ShutdownCoordinator) {
    let Signals {
        interrupt: mut sigint,
        terminate: mut sigterm,
        hangup: mut sighup,
    } = signals;

    loop {
        tokio::select! {
            _ = sigint.recv() => {
                tracing::info!("Received SIGINT, initiating shutdown");
                shutdown.shutdown();
                break;
            }
            _ = sigterm.recv() => {
                tracing::info!("Received SIGTERM, initiating shutdown");
                shutdown.shutdown();
                break;
            }
            _ = sighup.recv() => {
                tracing::info!(
                    active_streams = shutdown.active_streams(),
                    "Received SIGHUP, status report"
                );
            }
        }
    }
}
