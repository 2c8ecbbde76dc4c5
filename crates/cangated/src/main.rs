//! cangated - CAN bus gateway daemon
//!
//! # Usage
//!
//! ```bash
//! ./cangated -i can0,vcan0 -l 0.0.0.0
//! ```
//!
//! Without CAN hardware:
//! ```bash
//! ./cangated --mock -i vcan0 -v
//! ```
//!
//! Clients connect with plain TCP:
//! ```text
//! $ nc 127.0.0.1 28600
//! <hi><open vcan0>< vcan0 S 123 2 AA BB >
//! ```

use std::net::IpAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use cangate_can::SysfsCounters;
use cangated::{
    BeaconService, BusRegistry, ConnectionManager, DaemonConfig, EndpointKind, GatewayContext,
    StatisticsService,
};
use clap::Parser;
use tokio::task::JoinSet;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "cangated", version)]
#[command(about = "Expose CAN interfaces to TCP clients over an ASCII protocol")]
struct Args {
    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Buses clients may open, comma separated (e.g. can0,vcan0)
    #[arg(short, long, value_name = "LIST")]
    interfaces: Option<String>,

    /// TCP port to listen on [default: 28600]
    #[arg(short, long)]
    port: Option<u16>,

    /// Address to listen on [default: 127.0.0.1]
    #[arg(short, long, value_name = "ADDR")]
    listen: Option<IpAddr>,

    /// Daemon mode: JSON log lines without colours
    #[arg(short, long)]
    daemon: bool,

    /// Configuration file path (TOML format)
    /// Command-line options override its values
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Use the in-process mock scheduler instead of the kernel BCM
    #[arg(long)]
    mock: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing(args.verbose, args.daemon);

    let mut config = match &args.config {
        Some(path) => {
            info!("Loading config from: {}", path.display());
            DaemonConfig::load(path).context("Failed to load config")?
        }
        None => DaemonConfig::default(),
    };
    apply_overrides(&mut config, &args);
    config.validate()?;

    let registry = BusRegistry::new(&config.server.interfaces);
    if registry.is_empty() {
        warn!("No interfaces configured, every open request will be refused");
    }

    let (statistics, stats_handle) =
        StatisticsService::new(SysfsCounters::new(), config.statistics.interval());
    let ctx = GatewayContext::from_config(&config, registry.clone(), stats_handle)?;
    let manager = ConnectionManager::bind(Arc::new(ctx), config.server.socket_addr())?;
    let local_addr = manager.local_addr()?;

    info!(
        addr = %local_addr,
        interfaces = %registry,
        endpoint = ?config.endpoint.kind,
        "cangated started"
    );

    let mut background = JoinSet::new();
    background.spawn(statistics.run());
    if config.beacon.enabled {
        let beacon = BeaconService::new(&config.beacon, local_addr, &registry);
        background.spawn(async move {
            if let Err(e) = beacon.run().await {
                error!(error = %e, "Beacon stopped");
            }
        });
    }

    let result = tokio::select! {
        result = manager.run() => result,
        _ = shutdown_signal() => {
            info!("Shutdown requested");
            Ok(())
        }
    };

    // Jobs and filters die with their sockets; nothing to drain
    background.abort_all();
    result?;

    info!("cangated stopped");
    Ok(())
}

fn init_tracing(verbose: bool, daemon: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| default_filter(verbose).into());

    if daemon {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json().with_ansi(false))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }
}

fn default_filter(verbose: bool) -> &'static str {
    if verbose {
        "cangated=debug,cangate_can=debug,cangate_proto=debug"
    } else {
        "cangated=info,cangate_can=info,cangate_proto=info"
    }
}

fn apply_overrides(config: &mut DaemonConfig, args: &Args) {
    if let Some(list) = &args.interfaces {
        config.server.interfaces = BusRegistry::parse_list(list)
            .iter()
            .map(str::to_string)
            .collect();
    }
    if let Some(port) = args.port {
        config.server.port = port;
    }
    if let Some(listen) = args.listen {
        config.server.listen = listen;
    }
    if args.mock {
        config.endpoint.kind = EndpointKind::Mock;
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_filter_covers_every_crate() {
        for verbose in [false, true] {
            let filter = default_filter(verbose);
            for target in ["cangated=", "cangate_can=", "cangate_proto="] {
                assert!(filter.contains(target), "{target} missing from {filter}");
            }
            assert!(filter.parse::<tracing_subscriber::EnvFilter>().is_ok());
        }
    }
}
