use std::sync::Arc;

use clap::Parser;
use sbems::{
    config::{MonitorConfig, read_config_file},
    sensors::simulated_from_config,
    sinks::{JsonLinesSink, LogSink},
    system::MonitoringSystem,
};
use tracing::{debug, error, info, level_filters::LevelFilter, trace};
use tracing_subscriber::{filter, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Clone, Parser)]
struct Args {
    /// Config file
    #[arg(short)]
    file: Option<String>,

    /// Stop after this many ticks
    #[arg(long)]
    ticks: Option<u64>,

    /// Append every event as JSON lines to this file
    #[arg(long)]
    export: Option<String>,

    /// Only export alerts and warnings
    #[arg(long)]
    alerts_only: bool,

    /// Log at trace level
    #[arg(short, long)]
    verbose: bool,
}

fn init(verbose: bool) {
    let level = if verbose {
        LevelFilter::TRACE
    } else {
        LevelFilter::DEBUG
    };

    let filter =
        filter::Targets::new().with_targets(vec![("sbems", level), ("sbems_monitor", level)]);
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .compact()
                .with_ansi(false),
        )
        .with(filter)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init(args.verbose);
    trace!("started with args: {args:?}");

    let config = match &args.file {
        Some(file) => read_config_file(file)?,
        None => {
            debug!("no config file given, using defaults");
            MonitorConfig::default()
        }
    };

    if config.zones.is_empty() {
        anyhow::bail!("no zones configured, nothing to monitor");
    }

    let sensors = simulated_from_config(&config)?;
    let mut system = MonitoringSystem::new(config);

    for sensor in sensors {
        system.register_sensor(sensor)?;
    }

    system.register_sink(Arc::new(LogSink))?;
    if let Some(path) = &args.export {
        let mut sink = JsonLinesSink::create(path).await?;
        if args.alerts_only {
            sink = sink.without_readings();
        }
        system.register_sink(Arc::new(sink))?;
    }

    let handle = system.start()?;
    info!(
        sensors = system.sensor_count(),
        zones = system.zones().len(),
        "monitoring, press ctrl-c to stop"
    );

    match args.ticks {
        Some(ticks) => {
            let mut poll = tokio::time::interval(system.config().interval() / 2);
            loop {
                tokio::select! {
                    _ = poll.tick() => {
                        let status = handle.status().await?;
                        trace!("{} ticks, {} alerts", status.ticks, status.total_alerts);
                        if status.ticks >= ticks {
                            break;
                        }
                    }
                    _ = tokio::signal::ctrl_c() => break,
                }
            }
        }
        None => {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!("failed to listen for ctrl-c: {e}");
            }
        }
    }

    let summary = handle.anomaly_summary().await?;
    system.stop().await?;

    info!(
        total = summary.total,
        unacknowledged = summary.unacknowledged,
        critical = ?summary.critical_entities,
        "alerts raised"
    );

    Ok(())
}
