//! pvekeepd — the pvekeep daemon.
//!
//! Single binary that assembles all pvekeep subsystems:
//! - Proxmox VE client
//! - Shutdown registry + VM controller
//! - Auto-shutdown sweep loop
//! - REST API
//!
//! # Usage
//!
//! ```text
//! pvekeepd serve --config /etc/pvekeep/pvekeep.toml
//! PVE_HOST=192.168.20.239 PVE_TOKEN_VALUE=... pvekeepd serve --node pve1
//! pvekeepd print-config --config /etc/pvekeep/pvekeep.toml
//! ```

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Args, Parser, Subcommand, ValueEnum};
use tokio::sync::watch;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use pvekeep_api::{ApiState, DisplayOptions, build_router};
use pvekeep_core::KeeperConfig;
use pvekeep_gateway::{ActionGateway, ProxmoxClient, ProxmoxSettings};
use pvekeep_scheduler::{ShutdownRegistry, ShutdownScheduler, VmController};

const DEFAULT_LOG_FILTER: &str = "info,pvekeepd=debug,pvekeep_scheduler=debug";

#[derive(Parser)]
#[command(name = "pvekeepd", about = "Proxmox VE auto-shutdown daemon")]
struct Cli {
    /// Log output format.
    #[arg(long, value_enum, default_value = "text", global = true)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Clone, Copy, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
enum Command {
    /// Run the auto-shutdown scheduler and REST API.
    Serve(ServeArgs),

    /// Print the effective configuration (token redacted) and exit.
    PrintConfig(ServeArgs),
}

#[derive(Args, Default)]
struct ServeArgs {
    /// TOML config file. Without one, defaults plus environment are used.
    #[arg(long)]
    config: Option<PathBuf>,

    /// API listen address, e.g. 0.0.0.0:8920.
    #[arg(long)]
    listen: Option<String>,

    /// Sweep interval, e.g. 60s or 2m.
    #[arg(long)]
    sweep_interval: Option<String>,

    /// Proxmox node to manage (defaults to the first listed node).
    #[arg(long)]
    node: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_format);

    match cli.command {
        Command::Serve(args) => run_serve(args).await,
        Command::PrintConfig(args) => {
            let mut config = load_config(&args)?;
            if !config.proxmox.token_value.is_empty() {
                config.proxmox.token_value = "********".to_string();
            }
            print!("{}", config.to_toml_string()?);
            Ok(())
        }
    }
}

fn init_tracing(format: LogFormat) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    match format {
        LogFormat::Text => tracing_subscriber::fmt().with_env_filter(filter).init(),
        LogFormat::Json => tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init(),
    }
}

/// File (if any), then environment, then CLI flags.
fn load_config(args: &ServeArgs) -> anyhow::Result<KeeperConfig> {
    let mut config = match &args.config {
        Some(path) => KeeperConfig::from_file(path)
            .with_context(|| format!("failed to load config from {}", path.display()))?,
        None => KeeperConfig::default(),
    };
    config.apply_env();
    apply_cli_overrides(&mut config, args);
    Ok(config)
}

fn apply_cli_overrides(config: &mut KeeperConfig, args: &ServeArgs) {
    if let Some(listen) = &args.listen {
        config.api.listen = listen.clone();
    }
    if let Some(interval) = &args.sweep_interval {
        config.scheduler.sweep_interval = interval.clone();
    }
    if let Some(node) = &args.node {
        config.scheduler.node = Some(node.clone());
    }
}

async fn run_serve(args: ServeArgs) -> anyhow::Result<()> {
    let config = load_config(&args)?;
    config.validate()?;

    let addr: SocketAddr = config
        .api
        .listen
        .parse()
        .with_context(|| format!("invalid api.listen address {:?}", config.api.listen))?;
    let display = DisplayOptions::new(config.display_offset()?);

    info!(host = %config.proxmox.host, node = %config.node_selector(), "pvekeep daemon starting");

    // ── Initialize subsystems ──────────────────────────────────

    let client = ProxmoxClient::new(ProxmoxSettings::from_config(&config))?;
    let gateway: Arc<dyn ActionGateway> = Arc::new(client);

    let registry = ShutdownRegistry::new();
    let selector = config.node_selector();
    let controller = VmController::new(Arc::clone(&gateway), registry.clone(), selector.clone());
    let scheduler = ShutdownScheduler::new(gateway, registry, selector, config.sweep_interval());

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;

    // ── Shutdown signal ────────────────────────────────────────

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // ── Start background tasks ─────────────────────────────────

    let scheduler_handle = tokio::spawn(async move {
        scheduler.run(shutdown_rx).await;
    });

    // ── Start API server ───────────────────────────────────────

    let router = build_router(ApiState {
        controller,
        display,
    });

    info!(%addr, "API server starting");

    axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            let _ = shutdown_tx.send(true);
        })
        .await?;

    let _ = scheduler_handle.await;

    info!("pvekeep daemon stopped");
    Ok(())
}

/// Resolves on Ctrl-C, or SIGTERM on unix.
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => info!("shutdown signal received (Ctrl-C)"),
                    _ = sigterm.recv() => info!("shutdown signal received (SIGTERM)"),
                }
            }
            Err(e) => {
                warn!(error = %e, "failed to install SIGTERM handler, Ctrl-C only");
                let _ = tokio::signal::ctrl_c().await;
                info!("shutdown signal received (Ctrl-C)");
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
        info!("shutdown signal received (Ctrl-C)");
    }
}
