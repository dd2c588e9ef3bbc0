//! ---
//! cosim_section: "01-core-functionality"
//! cosim_subsection: "binary"
//! cosim_type: "source"
//! cosim_scope: "code"
//! cosim_description: "Binary entrypoint for the co-simulation daemon."
//! cosim_version: "v0.0.0-prealpha"
//! cosim_owner: "tbd"
//! ---
use std::path::PathBuf;
use std::time::Instant;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use ot_cosim_common::config::{AppConfig, IoConfig};
use ot_cosim_common::logging::init_tracing;
use ot_cosim_federate::LocalFederation;
use ot_cosim_io::{IoModule, IoModuleHandle};
use ot_cosim_metrics::{new_registry, spawn_http_server, DaemonMetrics, SharedRegistry};
use ot_cosim_msg::{Broker, BrokerMetrics, Envelope, Pusher, Subscriber, TOPIC_RUNTIME};
use ot_cosim_rt::shutdown_signal;
use tracing::{info, warn};

#[derive(Debug, Parser)]
#[command(
    author,
    version = concat!("ot-cosimd ", env!("CARGO_PKG_VERSION")),
    about = "OT co-simulation daemon",
    long_about = None
)]
struct Cli {
    #[arg(long, value_name = "FILE", help = "Path to configuration file")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    #[command(about = "Run the broker and every configured I/O module")]
    Run,
    #[command(about = "Log every status and update seen on a bus topic")]
    Monitor {
        #[arg(long, default_value = TOPIC_RUNTIME)]
        topic: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut candidates = Vec::new();
    if let Some(path) = &cli.config {
        candidates.push(path.clone());
    }
    candidates.push(PathBuf::from("configs/ot-cosim.toml"));

    let load_started = Instant::now();
    let loaded = AppConfig::load_with_source(&candidates)?;
    let load_duration = load_started.elapsed();
    let config = loaded.config;

    let registry = new_registry();
    let daemon_metrics = DaemonMetrics::new(registry.clone())?;
    daemon_metrics.observe_config_load(load_duration.as_secs_f64());
    daemon_metrics.inc_start();

    init_tracing("ot-cosimd", &config.logging)?;
    info!(
        config_path = %loaded.source.display(),
        io_modules = config.io.len(),
        "configuration loaded"
    );

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => run_daemon(config, registry, daemon_metrics).await,
        Commands::Monitor { topic } => monitor(&config, topic).await,
    }
}

async fn run_daemon(
    config: AppConfig,
    registry: SharedRegistry,
    daemon_metrics: DaemonMetrics,
) -> Result<()> {
    let metrics_server = if config.metrics.enabled {
        Some(spawn_http_server(registry.clone(), config.metrics.listen)?)
    } else {
        info!("metrics exporter disabled by configuration");
        None
    };

    let broker = if config.broker.enabled {
        let metrics = BrokerMetrics::register(&registry).context("failed to register broker metrics")?;
        let broker = Broker::bind(
            &config.message_bus.pull_endpoint,
            &config.message_bus.pub_endpoint,
            metrics,
        )
        .await
        .context("failed to start message bus broker")?;
        info!(pull = %broker.pull_addr(), publish = %broker.pub_addr(), "message bus broker listening");
        Some(broker)
    } else {
        None
    };

    let federation = LocalFederation::with_pacing(config.federation.pacing);
    let mut handles = Vec::with_capacity(config.io.len());
    for io in &config.io {
        match start_module(&config, io, &federation).await {
            Ok(handle) => handles.push(handle),
            Err(err) => {
                shutdown_modules(handles).await;
                if let Some(broker) = broker {
                    broker.stop().await;
                }
                if let Some(server) = metrics_server {
                    server.shutdown().await?;
                }
                return Err(err);
            }
        }
    }
    daemon_metrics.set_io_modules(handles.len());

    info!("daemon running; waiting for termination signal");
    shutdown_signal().await;
    info!("termination signal received; shutting down");

    shutdown_modules(handles).await;
    daemon_metrics.set_io_modules(0);

    if let Some(broker) = broker {
        broker.stop().await;
    }
    if let Some(server) = metrics_server {
        server.shutdown().await?;
    }
    Ok(())
}

async fn start_module(
    config: &AppConfig,
    io: &IoConfig,
    federation: &LocalFederation,
) -> Result<IoModuleHandle> {
    let module = IoModule::from_config(io)
        .with_context(|| format!("failed to configure io module '{}'", io.name))?;
    let pub_endpoint = io
        .pub_endpoint
        .as_deref()
        .unwrap_or(&config.message_bus.pub_endpoint);
    let pull_endpoint = io
        .pull_endpoint
        .as_deref()
        .unwrap_or(&config.message_bus.pull_endpoint);
    let subscriber = Subscriber::connect(pub_endpoint)?;
    let pusher = Pusher::connect(pull_endpoint)?;
    let coordinator = federation.join(module.federate_config().name.clone());
    match module
        .start(coordinator, subscriber, pusher.clone(), config.metrics.report_interval)
        .await
    {
        Ok(handle) => Ok(handle),
        Err(err) => {
            pusher.shutdown().await;
            Err(err).with_context(|| format!("failed to start io module '{}'", io.name))
        }
    }
}

/// Stop subscribers first so no new updates arrive, then reporters, then the
/// federates themselves.
async fn shutdown_modules(mut handles: Vec<IoModuleHandle>) {
    for handle in &mut handles {
        handle.stop_subscriber().await;
    }
    for handle in &mut handles {
        handle.stop_reporter().await;
    }
    for handle in &mut handles {
        match handle.stop_scheduler().await {
            Some(Ok(summary)) => info!(
                module = %handle.name(),
                ticks = summary.ticks,
                stopped = summary.stopped,
                "federate finished"
            ),
            Some(Err(err)) => warn!(module = %handle.name(), error = %err, "federate failed"),
            None => {}
        }
    }
    for handle in handles {
        handle.shutdown().await;
    }
}

/// Log each measurement of a `Status` envelope. Returns the number of points.
fn log_status(envelope: &Envelope) -> usize {
    let Some(status) = envelope.as_status() else {
        return 0;
    };
    for point in &status.measurements {
        info!(sender = %envelope.sender(), tag = %point.tag, value = point.value, ts = point.timestamp, "status");
    }
    status.measurements.len()
}

/// Log each point of an `Update` envelope. Returns the number of points.
fn log_update(envelope: &Envelope) -> usize {
    let Some(update) = envelope.as_update() else {
        return 0;
    };
    for point in &update.updates {
        info!(
            sender = %envelope.sender(),
            recipient = %update.recipient,
            tag = %point.tag,
            value = point.value,
            "update"
        );
    }
    update.updates.len()
}

fn add_monitor_handlers(subscriber: &mut Subscriber) {
    subscriber.add_status_handler(|envelope| {
        log_status(envelope);
    });
    subscriber.add_update_handler(|envelope| {
        log_update(envelope);
    });
}

async fn monitor(config: &AppConfig, topic: String) -> Result<()> {
    let mut subscriber = Subscriber::connect(&config.message_bus.pub_endpoint)?;
    add_monitor_handlers(&mut subscriber);

    info!(endpoint = %config.message_bus.pub_endpoint, %topic, "monitoring bus topic");
    let task = subscriber.start(topic);
    shutdown_signal().await;
    if let Err(err) = task.stop().await {
        warn!(error = %err, "monitor task failed");
    }
    Ok(())
}
