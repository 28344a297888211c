//! Transport seam between the link engine and the physical line.
//!
//! The engine never reads from the transport.  Instead, the transport calls
//! [`ReceiveHandler::on_bytes`] whenever a chunk arrives, in whatever sizes
//! the underlying driver delivers.  Writes are whole frames.
//!
//! # Implementations
//!
//! - [`tcp::TcpBridgeTransport`] – a serial line exposed through a raw TCP
//!   serial bridge (ser2net style).
//! - [`mock::MockTransport`] – in-memory, records writes and injects inbound
//!   bytes for tests.

use std::sync::Arc;

use thiserror::Error;

pub mod mock;
pub mod tcp;

/// Error type for transport operations.
#[derive(Debug, Error)]
pub enum TransportError {
    /// No device or endpoint matches the configured port name.
    #[error("no device found for port '{0}'")]
    NoDevice(String),

    /// The device exists but could not be opened.
    #[error("failed to open port '{port}': {source}")]
    OpenFailed {
        port: String,
        #[source]
        source: std::io::Error,
    },

    /// A write was attempted while the port is closed.
    #[error("port is not open")]
    NotOpen,

    #[error("transport I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Callback the transport invokes with newly arrived bytes.
pub trait ReceiveHandler: Send + Sync {
    fn on_bytes(&self, bytes: &[u8]);
}

/// Byte pipe to the machine.
///
/// Implementations must be usable from the worker thread and the
/// application thread at once, so every method takes `&self`.
#[cfg_attr(test, mockall::automock)]
pub trait Transport: Send + Sync {
    /// Opens the port and starts delivering inbound bytes to `receiver`.
    fn open(
        &self,
        port_name: &str,
        baud_rate: u32,
        receiver: Arc<dyn ReceiveHandler>,
    ) -> Result<(), TransportError>;

    /// Closes the port.  Closing a closed port does nothing.
    fn close(&self);

    fn is_open(&self) -> bool;

    /// Writes one complete frame.
    fn write(&self, bytes: &[u8]) -> Result<(), TransportError>;
}
