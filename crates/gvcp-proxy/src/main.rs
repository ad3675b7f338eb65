use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use tl_gige::engine::{self, SharedState, PROXY_POLL_TIMEOUT};
use tl_gige::socket_set::SocketSet;
use tl_gige::{backend, nic};

/// Standalone GVCP proxy: simulates a GigE Vision device's control endpoint.
#[derive(Parser, Debug)]
#[command(name = "gvcp-proxy", version, about = "Simulate a GigE Vision camera's GVCP control endpoint")]
struct Cli {
    /// Network interface to bind, as a dotted IP or an OS interface name.
    #[arg(short, long, default_value = "127.0.0.1")]
    interface: String,
    /// Serial number baked into the discovery descriptor.
    #[arg(short, long, default_value = "GVCP01")]
    serial: String,
    /// Path to a GenICam XML blob (accepted for CLI symmetry; not parsed).
    #[arg(short, long)]
    genicam: Option<String>,
    /// Register backend: "fake" or "memory" (both are the same in-process camera).
    #[arg(short, long, default_value = "fake")]
    backend: String,
    /// Log filter selector, e.g. "debug" or "tl_gige=trace". Falls back to RUST_LOG.
    #[arg(short, long)]
    debug: Option<String>,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let filter = cli
        .debug
        .clone()
        .or_else(|| std::env::var("RUST_LOG").ok())
        .unwrap_or_else(|| "info".to_string());
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .with_target(false)
        .init();

    let rt = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
        Ok(rt) => rt,
        Err(err) => {
            error!(?err, "failed to build async runtime");
            return ExitCode::FAILURE;
        }
    };

    match rt.block_on(run(cli)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!(?err, "gvcp-proxy failed to start");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let iface = nic::resolve(Some(&cli.interface))?;
    info!(interface = %iface.name, ip = %iface.ip, "resolved interface");

    let mut device_backend = backend::new(&cli.backend, &cli.serial, cli.genicam.as_deref())
        .map_err(|err| anyhow::anyhow!("{err}"))?;
    device_backend.set_inet_address(iface.ip);

    let sockets = SocketSet::bind(&iface)?;
    info!(addr = ?sockets.primary_local_addr()?, "GVCP socket bound");
    let state = Mutex::new(SharedState::new(device_backend));
    let cancel = Arc::new(AtomicBool::new(false));

    let signal_cancel = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("received SIGINT, shutting down");
            signal_cancel.store(true, Ordering::Relaxed);
        }
    });

    engine::run(&sockets, &state, &cancel, PROXY_POLL_TIMEOUT).await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_defaults() {
        let cli = Cli::parse_from(["gvcp-proxy"]);
        assert_eq!(cli.interface, "127.0.0.1");
        assert_eq!(cli.serial, "GVCP01");
        assert_eq!(cli.backend, "fake");
        assert!(cli.genicam.is_none());
        assert!(cli.debug.is_none());
    }

    #[test]
    fn parse_overrides() {
        let cli = Cli::parse_from([
            "gvcp-proxy",
            "-i",
            "eth0",
            "-s",
            "SN123",
            "-b",
            "memory",
            "-d",
            "trace",
        ]);
        assert_eq!(cli.interface, "eth0");
        assert_eq!(cli.serial, "SN123");
        assert_eq!(cli.backend, "memory");
        assert_eq!(cli.debug, Some("trace".to_string()));
    }
}
