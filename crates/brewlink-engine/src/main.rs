//! `brewlink`: host-side tool for the brewer serial link.
//!
//! Opens the link to the machine through a TCP serial bridge, logs every
//! link event, and optionally sends one command at startup.  Runs until
//! Ctrl+C, or for `--run-for` seconds.
//!
//! # Usage
//!
//! ```text
//! brewlink [OPTIONS]
//!
//! Options:
//!   --config <PATH>        Config file [default: platform config dir]
//!   --port <HOST:PORT>     Serial bridge endpoint (overrides the config)
//!   --baud <RATE>          Baud rate (overrides the config)
//!   --address <ADDR>       Local address, decimal or 0x-hex
//!   --command <CMD>        Send this command once the link is up
//!   --parameter <N>        Parameter of --command [default: 0]
//!   --destination <ADDR>   Destination of --command [default: 0x41]
//!   --request              Send --command as a Request and wait for the answer
//!   --payload <HEX>        Payload of --command as hex, e.g. 01ff
//!   --receive-only         Listen without writing anything
//!   --run-for <SECS>       Exit after this many seconds
//! ```
//!
//! The log level comes from `RUST_LOG` when set, otherwise from the
//! `[logging]` table of the config file.

use std::path::PathBuf;
use std::str::FromStr;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::{Duration, Instant};

use anyhow::Context;
use clap::Parser;
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use brewlink_core::protocol::packet::DEFAULT_MACHINE_ADDRESS;
use brewlink_core::Message;
use brewlink_engine::application::{ChannelEventSink, LinkEvent, SerialLink};
use brewlink_engine::infrastructure::storage::config::{load_config, AppConfig};
use brewlink_engine::infrastructure::transport::tcp::TcpBridgeTransport;

// ── CLI argument definitions ──────────────────────────────────────────────────

/// Host tool for the brewer serial link.
#[derive(Debug, Parser)]
#[command(
    name = "brewlink",
    about = "Talks to a brewer controller over its serial link protocol",
    version
)]
struct Cli {
    /// Config file to load instead of the platform default.
    #[arg(long, env = "BREWLINK_CONFIG")]
    config: Option<PathBuf>,

    /// Serial bridge endpoint, `host:port`.
    #[arg(long, env = "BREWLINK_PORT")]
    port: Option<String>,

    #[arg(long)]
    baud: Option<u32>,

    /// Local address used as the source of every packet.
    #[arg(long, value_parser = parse_address)]
    address: Option<u8>,

    /// Command byte to send once the link is up.
    #[arg(long, value_parser = parse_address)]
    command: Option<u8>,

    #[arg(long, default_value_t = 0)]
    parameter: u16,

    #[arg(long, value_parser = parse_address, default_value_t = DEFAULT_MACHINE_ADDRESS)]
    destination: u8,

    /// Send the command as a Request.
    #[arg(long)]
    request: bool,

    /// Command payload as a hex string.
    #[arg(long)]
    payload: Option<HexPayload>,

    #[arg(long)]
    receive_only: bool,

    /// Stop after this many seconds instead of waiting for Ctrl+C.
    #[arg(long)]
    run_for: Option<u64>,
}

impl Cli {
    /// Applies the command-line overrides on top of the loaded config.
    fn apply_to(&self, config: &mut AppConfig) {
        if let Some(port) = &self.port {
            config.serial.port_name = port.clone();
        }
        if let Some(baud) = self.baud {
            config.serial.baud_rate = baud;
        }
        if let Some(address) = self.address {
            config.link.local_address = address;
        }
        if self.receive_only {
            config.link.receive_only = true;
        }
    }
}

/// Parses `0x41`-style hex or plain decimal.
fn parse_address(value: &str) -> Result<u8, String> {
    let parsed = match value
        .strip_prefix("0x")
        .or_else(|| value.strip_prefix("0X"))
    {
        Some(hex) => u8::from_str_radix(hex, 16),
        None => value.parse(),
    };
    parsed.map_err(|e| format!("'{value}' is not a byte value: {e}"))
}

/// Payload bytes given on the command line as hex digits.
#[derive(Debug, Clone, PartialEq, Eq)]
struct HexPayload(Vec<u8>);

impl FromStr for HexPayload {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        parse_hex_payload(value).map(HexPayload)
    }
}

fn parse_hex_payload(value: &str) -> Result<Vec<u8>, String> {
    let digits: Vec<char> = value.chars().filter(|c| !c.is_whitespace()).collect();
    if digits.len() % 2 != 0 {
        return Err(format!("'{value}' has an odd number of hex digits"));
    }
    digits
        .chunks(2)
        .map(|pair| {
            let byte: String = pair.iter().collect();
            u8::from_str_radix(&byte, 16).map_err(|e| format!("'{byte}' is not hex: {e}"))
        })
        .collect()
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02X}")).collect::<Vec<_>>().join(" ")
}

/// Logs every link event until the link is dropped.
async fn log_events(mut events: UnboundedReceiver<LinkEvent>) {
    while let Some(event) = events.recv().await {
        match event {
            LinkEvent::PacketSent(p) => {
                info!(sequence = p.sequence, kind = ?p.kind, "packet delivered");
            }
            LinkEvent::PacketReceived(p) => {
                let message = p.message.unwrap_or_default();
                info!(
                    sequence = p.sequence,
                    source = p.source,
                    command = message.command,
                    parameter = message.parameter,
                    "packet received: [{}]",
                    hex(&p.payload)
                );
            }
            LinkEvent::AckTimeout(p) => {
                warn!(sequence = p.sequence, "packet dropped, never acknowledged");
            }
            LinkEvent::NackFail(p) => {
                warn!(sequence = p.sequence, "packet dropped, rejected by the machine");
            }
            LinkEvent::ResponseTimeout(p) => {
                warn!(sequence = p.sequence, "request went unanswered");
            }
            LinkEvent::AckNackObserved { timed_out, packet } => match packet {
                Some(p) => debug!(sequence = p.sequence, kind = ?p.kind, "acknowledgement"),
                None => debug!(timed_out, "acknowledgement wait expired"),
            },
            LinkEvent::RawBytesSent(bytes) => debug!("tx {}", hex(&bytes)),
        }
    }
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = load_config(cli.config.as_deref()).context("loading configuration")?;
    cli.apply_to(&mut config);

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .or_else(|_| EnvFilter::try_new(&config.logging.log_level))
                .unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let port = config.port_settings();
    info!("brewlink starting on {} at {} baud", port.name, port.baud_rate);

    let (sink, events) = ChannelEventSink::new();
    let link = Arc::new(SerialLink::new(
        port.clone(),
        config.link_config(),
        Arc::new(TcpBridgeTransport::new()),
        Arc::new(sink),
    ));
    link.start()
        .with_context(|| format!("opening serial bridge {}", port.name))?;

    tokio::spawn(log_events(events));

    if let Some(command) = cli.command {
        let message = Message::new(command, cli.parameter);
        let payload = cli.payload.clone().map(|p| p.0).unwrap_or_default();
        let sequence = if cli.request {
            link.enqueue_request(cli.destination, message, payload)
        } else {
            link.enqueue_data(cli.destination, message, payload)
        }
        .context("queueing command")?;
        info!(sequence, command, "command queued");
    }

    // ── Graceful shutdown flag ─────────────────────────────────────────────────
    let running = Arc::new(AtomicBool::new(true));
    let running_clone = Arc::clone(&running);
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("received Ctrl+C, shutting down");
                running_clone.store(false, Ordering::Relaxed);
            }
            Err(e) => error!("failed to listen for Ctrl+C signal: {e}"),
        }
    });

    let deadline = cli
        .run_for
        .map(|secs| Instant::now() + Duration::from_secs(secs));
    while running.load(Ordering::Relaxed) && deadline.map_or(true, |d| Instant::now() < d) {
        tokio::time::sleep(Duration::from_millis(100)).await;
    }

    // Shutdown blocks for up to 200 ms while the worker finishes.
    let shutdown_link = Arc::clone(&link);
    tokio::task::spawn_blocking(move || shutdown_link.shutdown())
        .await
        .context("joining shutdown task")?;

    info!("brewlink stopped");
    Ok(())
}

// ── Tests ─────────────────────────────────────────────────────────────────────
