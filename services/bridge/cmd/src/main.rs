//! ESB bridge binary.
//!
//! Opens the nRF52 radio peripheral on a serial port and exposes it over the
//! TCP bridge protocol (and gRPC when built with the `grpc` feature). The
//! `transfer` and `listen` subcommands are small clients for a running bridge.

#[macro_use]
mod logging;
mod config;

use anyhow::{bail, Context, Result};
use bytes::Bytes;
use clap::{Parser, Subcommand};
use config::BridgeConfig;
use esb_device::EsbDevice;
use esb_server::{BridgeClient, BridgeServer};
use esb_wire::{Address, ListenFilter, RadioMessage};
use logging::BridgeLogFormatter;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Network bridge for an nRF52 ESB radio peripheral
#[derive(Parser, Debug)]
#[command(name = "esb-bridge", version, about = "Network bridge for an nRF52 ESB radio peripheral")]
struct Args {
    /// Configuration file
    #[arg(long, default_value = "esb-bridge.yaml")]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Serial device of the peripheral, e.g. /dev/ttyACM0
    #[arg(long)]
    device: Option<String>,

    /// Serial baud rate
    #[arg(long)]
    baud: Option<u32>,

    /// Answer timeout, e.g. 500ms
    #[arg(long)]
    timeout: Option<humantime::Duration>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the bridge until SIGINT/SIGTERM
    Serve {
        /// TCP bridge listen address, e.g. 127.0.0.1:9815
        #[arg(long)]
        listen: Option<SocketAddr>,

        /// gRPC listen address, e.g. 127.0.0.1:10000
        #[arg(long)]
        grpc_listen: Option<SocketAddr>,

        /// Do not start the gRPC service
        #[arg(long)]
        no_grpc: bool,
    },

    /// Print the peripheral firmware version
    Version,

    /// Transfer one radio message through a running bridge
    Transfer {
        /// Bridge address (defaults to the configured listen address)
        #[arg(long)]
        bridge: Option<SocketAddr>,

        /// Target pipeline address, e.g. 6f:6f:6f:6f:01
        #[arg(long)]
        address: Address,

        /// Radio command, decimal or 0x prefixed
        #[arg(long, value_parser = parse_byte)]
        command: u8,

        /// Payload as hex, e.g. 0a0b0c
        #[arg(value_parser = parse_hex)]
        payload: Option<Bytes>,
    },

    /// Print radio messages pushed through a running bridge
    Listen {
        /// Bridge address (defaults to the configured listen address)
        #[arg(long)]
        bridge: Option<SocketAddr>,

        /// Source address filter (defaults to any source)
        #[arg(long, default_value = "00:00:00:00:00")]
        address: Address,

        /// Command filter (defaults to any command)
        #[arg(long, value_parser = parse_byte, default_value = "0xff")]
        command: u8,
    },
}

fn parse_byte(s: &str) -> Result<u8, String> {
    let parsed = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u8::from_str_radix(hex, 16),
        None => s.parse(),
    };
    parsed.map_err(|e| format!("invalid byte {:?}: {}", s, e))
}

fn parse_hex(s: &str) -> Result<Bytes, String> {
    let s = s.trim();
    if s.len() % 2 != 0 {
        return Err(format!("odd number of hex digits in {:?}", s));
    }
    (0..s.len())
        .step_by(2)
        .map(|i| {
            s.get(i..i + 2)
                .and_then(|pair| u8::from_str_radix(pair, 16).ok())
                .ok_or_else(|| format!("invalid hex {:?}", s))
        })
        .collect::<Result<Vec<u8>, String>>()
        .map(Bytes::from)
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

#[tokio::main(flavor = "multi_thread")]
async fn main() -> Result<()> {
    let args = Args::parse();

    let env_filter = EnvFilter::new("info")
        .add_directive(format!("esb_bridge={}", args.log_level).parse()?)
        .add_directive(format!("esb_device={}", args.log_level).parse()?)
        .add_directive(format!("esb_server={}", args.log_level).parse()?)
        .add_directive(format!("esb_routing={}", args.log_level).parse()?)
        .add_directive(format!("esb_wire={}", args.log_level).parse()?);

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .event_format(BridgeLogFormatter::new("esb-bridge"))
        .init();

    let mut config = BridgeConfig::load_from_file(&args.config)?;
    if let Some(device) = args.device.clone() {
        config.device = device;
    }
    if let Some(baud) = args.baud {
        config.baud_rate = baud;
    }
    if let Some(timeout) = args.timeout {
        config.reply_timeout_ms = std::time::Duration::from(timeout).as_millis() as u64;
    }

    match args.command {
        Commands::Serve {
            listen,
            grpc_listen,
            no_grpc,
        } => {
            if let Some(listen) = listen {
                config.listen = listen;
            }
            if let Some(grpc_listen) = grpc_listen {
                config.grpc_listen = grpc_listen;
            }
            if no_grpc {
                config.grpc_enabled = false;
            }
            serve(config).await
        }
        Commands::Version => version(config).await,
        Commands::Transfer {
            bridge,
            address,
            command,
            payload,
        } => {
            let payload = payload.unwrap_or_default();
            transfer(bridge.unwrap_or(config.listen), address, command, payload).await
        }
        Commands::Listen {
            bridge,
            address,
            command,
        } => listen(bridge.unwrap_or(config.listen), ListenFilter::new(address, command)).await,
    }
}

fn open_device(config: &BridgeConfig) -> Result<EsbDevice> {
    EsbDevice::open(&config.device, &config.device_config())
        .with_context(|| format!("Failed to open serial device {}", config.device))
}

async fn serve(config: BridgeConfig) -> Result<()> {
    info!("Starting esb-bridge v{}", env!("CARGO_PKG_VERSION"));

    let device = Arc::new(open_device(&config)?);
    match device.firmware_version().await {
        Ok(version) => component_info!("serial", "Peripheral firmware version {}", version),
        Err(e) => component_warn!("serial", "Failed to read firmware version: {}", e),
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let server = BridgeServer::new(config.server_config(), device.clone());
    let mut bridge_task = tokio::spawn(server.run(shutdown_signal(shutdown_rx.clone())));

    #[cfg(feature = "grpc")]
    let grpc_task = if config.grpc_enabled {
        let device = device.clone();
        let rx = shutdown_rx.clone();
        let addr = config.grpc_listen;
        let buffer = config.listener_buffer;
        Some(tokio::spawn(async move {
            esb_server::grpc::serve_grpc(addr, device, buffer, shutdown_signal(rx)).await
        }))
    } else {
        None
    };
    #[cfg(not(feature = "grpc"))]
    if config.grpc_enabled {
        component_debug!("grpc", "Built without gRPC support, not serving {}", config.grpc_listen);
    }

    let early_exit = tokio::select! {
        result = wait_for_signal() => {
            result?;
            None
        }
        result = &mut bridge_task => Some(result),
    };

    let _ = shutdown_tx.send(true);
    let bridge_result = match early_exit {
        Some(result) => result,
        None => bridge_task.await,
    };

    #[cfg(feature = "grpc")]
    if let Some(task) = grpc_task {
        match task.await {
            Ok(Err(e)) => component_error!("grpc", "gRPC server failed: {}", e),
            Err(e) => component_error!("grpc", "gRPC server task failed: {}", e),
            Ok(Ok(())) => {}
        }
    }

    device.close().await;
    info!("esb-bridge stopped");

    bridge_result
        .context("Bridge server task failed")?
        .context("Bridge server failed")
}

async fn shutdown_signal(mut rx: watch::Receiver<bool>) {
    let _ = rx.wait_for(|stop| *stop).await;
}

#[cfg(unix)]
async fn wait_for_signal() -> Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = signal(SignalKind::terminate()).context("Failed to install SIGTERM handler")?;
    let mut sigint = signal(SignalKind::interrupt()).context("Failed to install SIGINT handler")?;

    tokio::select! {
        _ = sigterm.recv() => info!("Received SIGTERM signal, shutting down"),
        _ = sigint.recv() => info!("Received SIGINT signal, shutting down"),
    }
    Ok(())
}

#[cfg(not(unix))]
async fn wait_for_signal() -> Result<()> {
    tokio::signal::ctrl_c()
        .await
        .context("Failed to install Ctrl-C handler")?;
    info!("Received Ctrl-C, shutting down");
    Ok(())
}

async fn version(config: BridgeConfig) -> Result<()> {
    let device = open_device(&config)?;
    let result = device.firmware_version().await;
    device.close().await;

    let version = result.context("Failed to read firmware version")?;
    println!("{}", version);
    Ok(())
}

async fn transfer(bridge: SocketAddr, address: Address, command: u8, payload: Bytes) -> Result<()> {
    let msg = RadioMessage::new(address, command, payload)?;
    let client = BridgeClient::connect(bridge)
        .await
        .with_context(|| format!("Failed to connect to bridge at {}", bridge))?;

    let result = client.transfer(&msg).await;
    client.disconnect().await;

    let reply = result.context("Transfer failed")?;
    println!(
        "{} cmd=0x{:02x} err=0x{:02x} payload={}",
        reply.address,
        reply.command,
        reply.error,
        hex(&reply.payload)
    );
    Ok(())
}

async fn listen(bridge: SocketAddr, filter: ListenFilter) -> Result<()> {
    let client = BridgeClient::connect(bridge)
        .await
        .with_context(|| format!("Failed to connect to bridge at {}", bridge))?;

    let (tx, mut rx) = mpsc::channel(64);
    client
        .add_listener(filter, tx)
        .await
        .context("Failed to register listener")?;
    component_info!("client", "Listening on {} for {}", bridge, filter);

    loop {
        tokio::select! {
            msg = rx.recv() => match msg {
                Some(msg) => println!(
                    "{} cmd=0x{:02x} payload={}",
                    msg.address,
                    msg.command,
                    hex(&msg.payload)
                ),
                None => {
                    client.disconnect().await;
                    bail!("Bridge connection closed");
                }
            },
            result = wait_for_signal() => {
                result?;
                break;
            }
        }
    }

    client.disconnect().await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use esb_wire::WILDCARD_COMMAND;

    #[test]
    fn test_parse_byte() {
        assert_eq!(parse_byte("16"), Ok(16));
        assert_eq!(parse_byte("0x10"), Ok(0x10));
        assert_eq!(parse_byte("0XFF"), Ok(WILDCARD_COMMAND));
        assert!(parse_byte("256").is_err());
        assert!(parse_byte("0xzz").is_err());
    }

    #[test]
    fn test_parse_hex() {
        assert_eq!(parse_hex("").unwrap(), Bytes::new());
        assert_eq!(parse_hex("0a0B10").unwrap().as_ref(), &[0x0a, 0x0b, 0x10]);
        assert!(parse_hex("abc").is_err());
        assert!(parse_hex("zz").is_err());
    }

    #[test]
    fn test_args_parse() {
        let args = Args::try_parse_from([
            "esb-bridge",
            "--device",
            "/dev/ttyACM1",
            "--timeout",
            "750ms",
            "transfer",
            "--address",
            "6f:6f:6f:6f:01",
            "--command",
            "0x10",
            "aabb",
        ])
        .unwrap();

        assert_eq!(args.device.as_deref(), Some("/dev/ttyACM1"));
        assert_eq!(
            args.timeout.map(std::time::Duration::from),
            Some(std::time::Duration::from_millis(750))
        );
        match args.command {
            Commands::Transfer {
                address,
                command,
                payload,
                bridge,
            } => {
                assert_eq!(address, Address::new([0x6f, 0x6f, 0x6f, 0x6f, 0x01]));
                assert_eq!(command, 0x10);
                assert_eq!(payload.unwrap_or_default().as_ref(), &[0xaa, 0xbb]);
                assert!(bridge.is_none());
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_listen_defaults() {
        let args = Args::try_parse_from(["esb-bridge", "listen"]).unwrap();
        match args.command {
            Commands::Listen {
                address, command, ..
            } => {
                assert_eq!(ListenFilter::new(address, command), ListenFilter::any());
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }
}
