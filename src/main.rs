//! Manufacturing pipeline simulation
//!
//! Five stations (Intake, Assembler, QualityInspection, Packaging, Shipping)
//! connected by bounded buffers, each running as an independent async
//! worker, coordinated by a `PipelineController` and observed through a
//! `MetricsAggregator` and a broadcast event stream.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tokio::signal;
use tokio::sync::broadcast;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use mfg_pipeline::config::Config;
use mfg_pipeline::events::{AggregatorEvent, ControllerEvent, PipelineEvent};
use mfg_pipeline::PipelineController;

#[derive(Parser, Debug)]
#[command(name = "mfg-pipeline")]
#[command(author = "Manufacturing Pipeline Simulation")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Concurrent multi-station manufacturing pipeline simulation")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info", global = true)]
    log_level: String,

    /// Output logs as JSON
    #[arg(long, default_value = "false", global = true)]
    json_logs: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the pipeline until interrupted (Ctrl+C / SIGTERM)
    Run {
        /// Seconds between printed status summaries
        #[arg(long, default_value = "5")]
        summary_interval_secs: u64,
    },

    /// Run the pipeline for a fixed duration, then stop and print a summary
    Demo {
        /// How long to run before stopping
        #[arg(long, default_value = "30")]
        seconds: u64,
    },

    /// Start the pipeline briefly, print the resulting station/buffer
    /// snapshot, then stop. Useful for checking a configuration is sane
    /// without running a full demo.
    Status,
}

fn setup_logging(log_level: &str, json_output: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    if json_output {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true).with_thread_ids(true))
            .init();
    }
}

async fn shutdown_signal(shutdown_tx: broadcast::Sender<()>) {
    let ctrl_c = async {
        signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received Ctrl+C, initiating graceful shutdown"),
        _ = terminate => info!("received SIGTERM, initiating graceful shutdown"),
    }

    let _ = shutdown_tx.send(());
}

/// Logs the pipeline's own broadcast events at the appropriate tracing
/// level. Runs for the life of the controller; exits when the broadcast
/// channel closes (controller dropped).
fn spawn_event_logger(controller: Arc<PipelineController>) -> tokio::task::JoinHandle<()> {
    let mut rx = controller.subscribe();
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(PipelineEvent::Controller(ControllerEvent::WorkerUnresponsive { name })) => {
                    warn!(worker = %name, "worker did not respond to its health check");
                }
                Ok(PipelineEvent::Controller(ControllerEvent::ErrorOccurred { message })) => {
                    error!(%message, "pipeline error");
                }
                Ok(PipelineEvent::Aggregator(AggregatorEvent::AlertTriggered { kind, message, value })) => {
                    warn!(code = kind.code(), value, "{message}");
                }
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "event logger fell behind the broadcast channel");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    })
}

async fn print_status(controller: &PipelineController) {
    println!("\n--- pipeline status ---");
    println!("running: {}  paused: {}", controller.is_running(), controller.is_paused());
    for name in ["Intake", "Assembler", "QualityInspection", "Packaging", "Shipping"] {
        if let Some(station) = controller.station(name) {
            println!(
                "  {name:<18} state={:?} processed={} rejected={}",
                station.state(),
                station.processed(),
                station.rejected()
            );
        }
    }
    println!("  active workers: {}", controller.registry().count_active());
}

async fn print_summary(controller: &PipelineController) {
    let derived = controller.aggregator().derived_stats().await;
    println!("\n--- pipeline summary ---");
    println!("finished: {}", controller.finished_count());
    println!("active workers: {}", controller.registry().count_active());
    for (key, value) in &derived.moving_avg_60 {
        println!("  {key}: {value:.2} (1m avg)");
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    setup_logging(&cli.log_level, cli.json_logs);

    let config = Config::load().unwrap_or_default();
    config.validate()?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        buffer_capacity = config.buffer_capacity,
        "starting manufacturing pipeline simulation"
    );

    let controller = PipelineController::new(config);
    let logger_handle = spawn_event_logger(controller.clone());

    match cli.command {
        Commands::Run { summary_interval_secs } => {
            controller.start();

            let (shutdown_tx, _) = broadcast::channel::<()>(1);
            let mut shutdown_rx = shutdown_tx.subscribe();
            let shutdown_handle = tokio::spawn(shutdown_signal(shutdown_tx));

            let mut ticker = tokio::time::interval(Duration::from_secs(summary_interval_secs));
            loop {
                tokio::select! {
                    _ = ticker.tick() => print_summary(&controller).await,
                    _ = shutdown_rx.recv() => break,
                }
            }

            let _ = shutdown_handle.await;
            controller.stop().await;
            controller.shutdown_logger().await;
            print_summary(&controller).await;
        }

        Commands::Demo { seconds } => {
            info!(seconds, "running demo for a fixed duration");
            controller.start();
            tokio::time::sleep(Duration::from_secs(seconds)).await;
            controller.stop().await;
            controller.shutdown_logger().await;
            print_summary(&controller).await;
        }

        Commands::Status => {
            controller.start();
            tokio::time::sleep(Duration::from_millis(500)).await;
            print_status(&controller).await;
            controller.stop().await;
            controller.shutdown_logger().await;
        }
    }

    logger_handle.abort();
    info!("manufacturing pipeline simulation stopped");
    Ok(())
}
