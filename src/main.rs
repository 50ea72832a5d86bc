//! herakles-vm-collector
//!
//! Per-host VM CPU utilization collector with tracing logging.
//! This is the main entry point that starts the collection loop and the
//! optional HTTP server, and handles subcommands.

mod cli;
mod commands;
mod handlers;
mod metrics;
mod startup_checks;
mod state;

use anyhow::Context;
use axum::{routing::get, Router};
use clap::Parser;
use prometheus::Registry;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::{net::TcpListener, signal};
use tracing::{debug, error, info, warn, Level};

use cli::{resolve_config, show_config, Args, Commands};
use commands::{command_check, command_config, command_test};
use handlers::{health_handler, metrics_handler};
use herakles_vm_collector::config::{
    validate_effective_config, Config, DEFAULT_BIND_ADDR, DEFAULT_PORT,
};
use herakles_vm_collector::{scheduler, Collector, CollectorStats};
use metrics::CollectorMetrics;
use state::AppState;

/// Initializes tracing logging subsystem with the configured log level.
fn setup_logging(config: &Config) {
    let level = config.log_level.as_deref().unwrap_or("info");
    let log_level = match level.to_ascii_lowercase().as_str() {
        "off" | "error" => Level::ERROR,
        "warn" => Level::WARN,
        "debug" => Level::DEBUG,
        "trace" => Level::TRACE,
        _ => Level::INFO,
    };

    let subscriber = tracing_subscriber::fmt()
        .with_max_level(log_level)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(true)
        .with_line_number(true)
        .finish();

    tracing::subscriber::set_global_default(subscriber).expect("Failed to set tracing subscriber");

    info!("Logging initialized with level: {}", level);
}

/// Resolves and validates configuration.
/// Exits the process with error code 1 if validation fails.
fn load_validated_config(args: &Args) -> anyhow::Result<Config> {
    let config = resolve_config(args)?;
    if let Err(e) = validate_effective_config(&config) {
        eprintln!("❌ Configuration invalid: {}", e);
        std::process::exit(1);
    }
    Ok(config)
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received SIGINT (Ctrl+C), shutting down gracefully...");
        }
        _ = terminate => {
            info!("Received SIGTERM, shutting down gracefully...");
        }
    }
}

/// Main application entry point.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Early config resolution for show/check modes
    if args.show_config || args.check_config {
        let config = resolve_config(&args)?;

        if args.check_config {
            if let Err(e) = validate_effective_config(&config) {
                eprintln!("❌ Configuration invalid: {}", e);
                std::process::exit(1);
            }
            println!("✅ Configuration is valid");
            return Ok(());
        }

        return show_config(&config, args.config_format);
    }

    if let Some(command) = &args.command {
        if let Commands::Config {
            output,
            format,
            commented,
        } = command
        {
            return command_config(output.clone(), *format, *commented);
        }

        let config = load_validated_config(&args)?;
        setup_logging(&config);

        return match command {
            Commands::Check => command_check(&config),
            Commands::Test {
                iterations,
                interval,
                verbose,
            } => command_test(*iterations, *interval, *verbose, &config).await,
            Commands::Config { .. } => unreachable!("Config handled above"),
        };
    }

    let config = load_validated_config(&args)?;
    setup_logging(&config);

    info!(
        "Starting herakles-vm-collector {}",
        env!("CARGO_PKG_VERSION")
    );

    if let Err(e) = startup_checks::validate_requirements(&config) {
        error!("❌ Startup validation failed: {}", e);
        error!("   The collector will start but cycles may fail!");
    }

    // Hypervisor and store failures here are fatal
    let (collector, poll_state) =
        Collector::from_config(&config).context("failed to initialize the collector")?;

    let registry = Registry::new();
    let metrics = CollectorMetrics::new(&registry)?;
    metrics.set_host(collector.host());
    debug!("Prometheus registry initialized");

    let stats = Arc::new(CollectorStats::new());
    let state = Arc::new(AppState {
        registry,
        stats: stats.clone(),
        host: collector.host().clone(),
    });

    let interval = config.interval();
    let collection = scheduler::start(collector, poll_state, interval, None, move |outcome| {
        match outcome {
            Ok(report) => {
                stats.record_cycle(report);
                metrics.record_cycle(report);
            }
            Err(_) => {
                stats.record_failure();
                metrics.record_failure();
            }
        }
    });

    let http_enabled = config.enable_http.unwrap_or(true);
    let server = async {
        if !http_enabled {
            info!("HTTP server disabled");
            std::future::pending::<()>().await;
            return Ok(());
        }

        let bind_ip_str = config.bind.as_deref().unwrap_or(DEFAULT_BIND_ADDR);
        let port = config.port.unwrap_or(DEFAULT_PORT);
        let addr: SocketAddr = format!("{}:{}", bind_ip_str, port).parse()?;

        let app = Router::new()
            .route("/metrics", get(metrics_handler))
            .route("/health", get(health_handler))
            .with_state(state.clone());

        let listener = TcpListener::bind(addr).await?;
        info!(
            "herakles-vm-collector listening on http://{}:{}",
            bind_ip_str, port
        );
        axum::serve(listener, app).await?;
        anyhow::Ok(())
    };

    tokio::select! {
        result = collection => {
            match result {
                Ok(cycles) => warn!("Collection loop ended after {} cycles", cycles),
                Err(e) => {
                    error!("Collection loop aborted: {}", e);
                    return Err(e.into());
                }
            }
        }
        result = server => {
            if let Err(e) = result {
                error!("Server error: {}", e);
                return Err(e);
            }
        }
        _ = shutdown_signal() => {
            info!("Shutdown signal received, exiting...");
        }
    }

    info!("herakles-vm-collector stopped gracefully");
    Ok(())
}
