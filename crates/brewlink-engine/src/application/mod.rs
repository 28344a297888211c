//! Application layer: the half-duplex link engine.
//!
//! # Sub-modules
//!
//! - **`config`** – link timing, addressing, and frame limits.
//! - **`events`** – the [`PacketEventSink`] the engine reports to, plus a
//!   no-op sink and a channel-backed sink.
//! - **`queues`** – the four FIFO queues shared by the receive path and the
//!   worker.
//! - **`state_machine`** – the transmission engine, the single worker that owns
//!   send timing, acknowledgement handling, retries, and response pairing.
//! - **`link`** – [`SerialLink`], the handle applications hold: enqueueing,
//!   start/stop, port changes, and reconfiguration.
//!
//! Nothing in this layer touches a socket or a serial device directly; all
//! I/O goes through the `Transport` seam in `infrastructure`.

pub mod config;
pub mod events;
pub mod link;
pub mod queues;
pub mod state_machine;

pub use config::{LinkConfig, PortSettings};
pub use events::{ChannelEventSink, LinkEvent, NoopEventSink, PacketEventSink};
pub use link::SerialLink;
pub use state_machine::SendState;

use thiserror::Error;

use brewlink_core::ProtocolError;

use crate::infrastructure::transport::TransportError;

/// Errors surfaced to the application by [`SerialLink`].
///
/// Timeouts and retry exhaustion are not errors: they are reported through
/// the [`PacketEventSink`] and the link carries on.
#[derive(Debug, Error)]
pub enum LinkError {
    /// The transport could not be opened, even after retrying.
    #[error("transport initialisation failed: {0}")]
    TransportInit(#[from] TransportError),

    /// The packet handed to an enqueue call cannot be encoded.
    #[error("cannot enqueue packet: {0}")]
    Protocol(#[from] ProtocolError),

    /// The operation requires an idle link.
    #[error("link is busy; retry once it is idle")]
    Busy,

    /// The worker thread owns the engine, so it cannot be driven by hand.
    #[error("transmission worker is already running")]
    WorkerRunning,

    /// The OS refused to spawn the worker thread.
    #[error("failed to spawn transmission worker: {0}")]
    WorkerSpawn(#[source] std::io::Error),
}
