//! Packet lifecycle notifications.
//!
//! The engine reports everything that happens to a packet through a
//! [`PacketEventSink`].  Every method has an empty default body, so a sink
//! only implements what it cares about and an unset handler is a no-op.
//!
//! Handlers run on the worker thread.  They must return quickly; a sink that
//! needs to do real work should hand the event off, the way
//! [`ChannelEventSink`] does.

use tokio::sync::mpsc;

use brewlink_core::Packet;

/// Receiver of link events.
pub trait PacketEventSink: Send + Sync {
    /// A Data/Request packet was acknowledged by the peer, or a response was
    /// sent for an open request.
    fn packet_sent(&self, _packet: &Packet) {}

    /// A packet addressed to this node was accepted.
    fn packet_received(&self, _packet: &Packet) {}

    /// No acknowledgement arrived after the last retransmission.
    fn ack_timeout(&self, _packet: &Packet) {}

    /// The peer kept answering with NACK until retries ran out.
    fn nack_fail(&self, _packet: &Packet) {}

    /// A Request was acknowledged but its answer never came.
    fn response_timeout(&self, _packet: &Packet) {}

    /// An ACK/NACK was decoded (`timed_out == false`, `packet` set), or the
    /// acknowledgement window closed without one (`timed_out == true`).
    fn ack_nack_observed(&self, _timed_out: bool, _packet: Option<&Packet>) {}

    /// Bytes exactly as they were written to the transport.
    fn raw_bytes_sent(&self, _bytes: &[u8]) {}
}

/// Discards every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopEventSink;

impl PacketEventSink for NoopEventSink {}

/// Owned form of a sink callback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEvent {
    PacketSent(Packet),
    PacketReceived(Packet),
    AckTimeout(Packet),
    NackFail(Packet),
    ResponseTimeout(Packet),
    AckNackObserved {
        timed_out: bool,
        packet: Option<Packet>,
    },
    RawBytesSent(Vec<u8>),
}

/// Forwards every event into an unbounded tokio channel.
///
/// Sending never blocks the worker.  Events are dropped silently once the
/// receiver is gone.
#[derive(Debug, Clone)]
pub struct ChannelEventSink {
    tx: mpsc::UnboundedSender<LinkEvent>,
}

impl ChannelEventSink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<LinkEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    fn emit(&self, event: LinkEvent) {
        // A closed receiver means nobody is listening any more.
        let _ = self.tx.send(event);
    }
}

impl PacketEventSink for ChannelEventSink {
    fn packet_sent(&self, packet: &Packet) {
        self.emit(LinkEvent::PacketSent(packet.clone()));
    }

    fn packet_received(&self, packet: &Packet) {
        self.emit(LinkEvent::PacketReceived(packet.clone()));
    }

    fn ack_timeout(&self, packet: &Packet) {
        self.emit(LinkEvent::AckTimeout(packet.clone()));
    }

    fn nack_fail(&self, packet: &Packet) {
        self.emit(LinkEvent::NackFail(packet.clone()));
    }

    fn response_timeout(&self, packet: &Packet) {
        self.emit(LinkEvent::ResponseTimeout(packet.clone()));
    }

    fn ack_nack_observed(&self, timed_out: bool, packet: Option<&Packet>) {
        self.emit(LinkEvent::AckNackObserved {
            timed_out,
            packet: packet.cloned(),
        });
    }

    fn raw_bytes_sent(&self, bytes: &[u8]) {
        self.emit(LinkEvent::RawBytesSent(bytes.to_vec()));
    }
}
