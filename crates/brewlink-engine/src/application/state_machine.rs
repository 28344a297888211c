//! Transmission state machine.
//!
//! One [`TransmissionEngine`] owns every piece of mutable protocol state:
//! the send state, retry counters, the open-request flags, and the
//! duplicate-suppression slot.  It is driven by a polling loop, either on
//! the dedicated worker thread or by hand through `SerialLink::poll_once`.
//! Each iteration runs, in order:
//!
//! 1. decode every raw frame the receive path queued, sorting Data/Request
//!    packets from ACK/NACKs;
//! 2. handle one inbound Data/Request packet (acknowledge it, or match it to
//!    the Request in flight);
//! 3. advance the send state;
//! 4. close or switch the port if a pause is pending and the link is idle.
//!
//! ```text
//!            outgoing non-empty
//!   Idle ───────────────────────▶ Sending ──────────── ack/nack frame ──▶ Idle
//!    ▲                              │  ▲
//!    │                   Data/Req   │  │ NACK or ack timeout (retry)
//!    │                              ▼  │
//!    ├─── ACK (Data) ─────────── WaitingForAck
//!    │                              │ ACK (Request)
//!    │                              ▼
//!    └── response / timeout ── WaitingForResponse
//! ```
//!
//! The head of the outgoing queue is the packet in flight.  Only this engine
//! pops it, so at most one packet is ever outstanding.

use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, error, info, warn};

use brewlink_core::{encode_frame, Packet, PacketKind};

use crate::application::config::LinkConfig;
use crate::application::link::LinkShared;

/// Where the engine stands with the packet at the head of the outgoing queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(u8)]
pub enum SendState {
    #[default]
    Idle = 0,
    Sending = 1,
    WaitingForAck = 2,
    WaitingForResponse = 3,
}

impl SendState {
    pub(crate) fn from_u8(value: u8) -> Self {
        match value {
            1 => SendState::Sending,
            2 => SendState::WaitingForAck,
            3 => SendState::WaitingForResponse,
            _ => SendState::Idle,
        }
    }
}

/// The single serialized worker of a link.
pub(crate) struct TransmissionEngine {
    shared: Arc<LinkShared>,
    state: SendState,
    /// Time of the most recent transmission of the head packet.
    sent_at: Instant,
    ack_timeouts: u32,
    nacks: u32,
    /// An inbound Request was acknowledged and its answer has not been sent.
    request_open: bool,
    /// The answer to the Request in flight has arrived.
    response_received: bool,
    /// Sequence number of the last inbound packet that was acknowledged.
    last_acked: Option<u8>,
}

impl TransmissionEngine {
    pub(crate) fn new(shared: Arc<LinkShared>) -> Self {
        let sent_at = shared.clock.now();
        Self {
            shared,
            state: SendState::Idle,
            sent_at,
            ack_timeouts: 0,
            nacks: 0,
            request_open: false,
            response_received: false,
            last_acked: None,
        }
    }

    /// Polls until the link's stop flag is raised.
    pub(crate) fn run(&mut self) {
        debug!("transmission loop entered");
        while !self.shared.stop_requested() {
            self.run_once();
            std::thread::sleep(self.shared.config().poll_interval);
        }
        debug!("transmission loop left");
    }

    /// One worker iteration.
    pub(crate) fn run_once(&mut self) {
        let config = self.shared.config();
        self.process_raw_frames();
        self.handle_incoming_data(&config);
        self.tick(&config);
        self.shared.publish_state(self.state);
        self.shared.apply_port_change();
    }

    // ── Receive side ──────────────────────────────────────────────────────────

    fn process_raw_frames(&mut self) {
        while let Some(frame) = self.shared.queues.incoming_raw.pop() {
            let packet = match frame.decode() {
                Ok(packet) => packet,
                Err(e) => {
                    debug!(len = frame.len(), "dropping undecodable frame: {e}");
                    continue;
                }
            };

            match packet.kind {
                PacketKind::Data | PacketKind::Request => {
                    self.shared.queues.incoming_data.push(packet);
                }
                PacketKind::PositiveAck | PacketKind::NegativeAck => {
                    self.shared.sink.ack_nack_observed(false, Some(&packet));
                    self.shared.queues.incoming_ack.push(packet);
                }
                PacketKind::Reserved => {
                    debug!(sequence = packet.sequence, "dropping packet of reserved kind");
                }
            }
        }
    }

    fn handle_incoming_data(&mut self, config: &LinkConfig) {
        let Some(packet) = self.shared.queues.incoming_data.pop() else {
            return;
        };

        if packet.destination != config.local_address {
            debug!(
                destination = packet.destination,
                "discarding packet addressed to another node"
            );
            return;
        }

        if self.is_response(&packet) {
            self.accept_response(packet);
            return;
        }

        let now = self.shared.clock.now();
        if now.saturating_duration_since(self.shared.last_incoming()) > config.ack_timeout {
            debug!(
                sequence = packet.sequence,
                "acknowledgement window closed, leaving retransmission to the peer"
            );
            return;
        }

        let ack = Packet::acknowledgement(
            !packet.fail,
            config.local_address,
            packet.source,
            packet.sequence,
        );
        self.send_control(&ack, config);

        if packet.fail {
            debug!(sequence = packet.sequence, "corrupted packet answered with NACK");
            return;
        }

        if packet.kind == PacketKind::Request {
            self.request_open = true;
        }

        if self.last_acked == Some(packet.sequence) {
            debug!(sequence = packet.sequence, "duplicate retransmission suppressed");
        } else {
            self.shared.sink.packet_received(&packet);
        }
        self.last_acked = Some(packet.sequence);
    }

    /// `true` if `packet` answers the Request currently in flight.
    fn is_response(&self, packet: &Packet) -> bool {
        self.state != SendState::Idle
            && self
                .shared
                .queues
                .outgoing
                .peek_with(|head| {
                    head.kind == PacketKind::Request && head.sequence == packet.sequence
                })
                .unwrap_or(false)
    }

    fn accept_response(&mut self, packet: Packet) {
        if packet.fail {
            // Responses are never acknowledged, so a corrupted one is simply
            // lost and the response timeout takes over.
            debug!(sequence = packet.sequence, "dropping corrupted response");
            return;
        }
        if packet.is_reset_status() {
            info!("machine reported a reset, restarting sequence numbers");
            self.reset_sequence();
        }
        self.response_received = true;
        self.shared.sink.packet_received(&packet);
    }

    fn reset_sequence(&mut self) {
        self.shared.sequence.reset();
        self.last_acked = None;
    }

    // ── Send side ─────────────────────────────────────────────────────────────

    fn tick(&mut self, config: &LinkConfig) {
        let now = self.shared.clock.now();
        self.expire_open_request(config, now);

        match self.state {
            SendState::Idle => {
                if !self.shared.queues.outgoing.is_empty() {
                    self.state = SendState::Sending;
                    self.send_head(config, now);
                }
            }
            SendState::Sending => self.send_head(config, now),
            SendState::WaitingForAck => self.await_ack(config, now),
            SendState::WaitingForResponse => self.await_response(config, now),
        }
    }

    /// Forgets an inbound Request whose answer window closed with nothing queued.
    fn expire_open_request(&mut self, config: &LinkConfig, now: Instant) {
        if self.request_open
            && self.shared.queues.outgoing.is_empty()
            && now.saturating_duration_since(self.shared.last_incoming()) > config.response_timeout
        {
            debug!("inbound request went unanswered");
            self.request_open = false;
        }
    }

    fn send_head(&mut self, config: &LinkConfig, now: Instant) {
        if self.response_received {
            self.complete_early_response();
            return;
        }

        let Some(head) = self.shared.queues.outgoing.peek() else {
            self.state = SendState::Idle;
            return;
        };

        if self.shared.is_paused() {
            self.state = SendState::Idle;
            return;
        }

        if self.request_open
            && now.saturating_duration_since(self.shared.last_incoming()) > config.response_timeout
        {
            warn!(
                sequence = head.sequence,
                "response window elapsed, dropping unsent response"
            );
            self.shared.queues.outgoing.pop();
            self.request_open = false;
            self.state = SendState::Idle;
            return;
        }

        if head.is_reset_status() {
            info!("sending reset status, restarting sequence numbers");
            self.reset_sequence();
        }

        let frame = match encode_frame(&head) {
            Ok(frame) => frame,
            Err(e) => {
                error!(sequence = head.sequence, "dropping packet that cannot be encoded: {e}");
                self.shared.queues.outgoing.pop();
                self.state = SendState::Idle;
                return;
            }
        };
        self.shared.transmit(&frame, config);

        if !head.kind.carries_message() {
            self.shared.queues.outgoing.pop();
            self.state = SendState::Idle;
            return;
        }

        self.sent_at = now;
        if self.request_open {
            // Answers to the peer's Request are not acknowledged.
            self.request_open = false;
            self.shared.queues.outgoing.pop();
            self.shared.sink.packet_sent(&head);
            self.state = SendState::Idle;
        } else {
            self.state = SendState::WaitingForAck;
        }
    }

    fn await_ack(&mut self, config: &LinkConfig, now: Instant) {
        if self.response_received {
            self.complete_early_response();
            return;
        }

        let Some(head) = self.shared.queues.outgoing.peek() else {
            self.state = SendState::Idle;
            return;
        };

        while let Some(ack) = self.shared.queues.incoming_ack.pop() {
            if ack.sequence != head.sequence {
                debug!(
                    expected = head.sequence,
                    received = ack.sequence,
                    "discarding stale acknowledgement"
                );
                continue;
            }
            match ack.kind {
                PacketKind::PositiveAck => self.on_positive_ack(&head),
                PacketKind::NegativeAck => self.on_negative_ack(&head, config),
                _ => {}
            }
            return;
        }

        if now.saturating_duration_since(self.sent_at) > config.ack_timeout {
            self.shared.sink.ack_nack_observed(true, None);
            self.ack_timeouts += 1;
            if self.ack_timeouts > config.max_retransmissions {
                warn!(
                    sequence = head.sequence,
                    retransmissions = config.max_retransmissions,
                    "no acknowledgement, giving up"
                );
                self.ack_timeouts = 0;
                self.nacks = 0;
                self.shared.queues.outgoing.pop();
                self.shared.sink.ack_timeout(&head);
                self.state = SendState::Idle;
            } else {
                debug!(
                    sequence = head.sequence,
                    attempt = self.ack_timeouts,
                    "acknowledgement timed out, retransmitting"
                );
                self.state = SendState::Sending;
            }
        }
    }

    fn on_positive_ack(&mut self, head: &Packet) {
        self.ack_timeouts = 0;
        self.nacks = 0;
        self.shared.sink.packet_sent(head);
        if head.kind == PacketKind::Request {
            self.state = SendState::WaitingForResponse;
        } else {
            self.shared.queues.outgoing.pop();
            self.state = SendState::Idle;
        }
    }

    fn on_negative_ack(&mut self, head: &Packet, config: &LinkConfig) {
        self.ack_timeouts = 0;
        self.nacks += 1;
        if self.nacks > config.max_retransmissions {
            warn!(sequence = head.sequence, "peer rejected every retransmission");
            self.nacks = 0;
            self.shared.queues.outgoing.pop();
            self.shared.sink.nack_fail(head);
            self.state = SendState::Idle;
        } else {
            debug!(sequence = head.sequence, attempt = self.nacks, "NACK received, retransmitting");
            self.state = SendState::Sending;
        }
    }

    fn await_response(&mut self, config: &LinkConfig, now: Instant) {
        if self.response_received {
            self.response_received = false;
            self.shared.queues.outgoing.pop();
            self.state = SendState::Idle;
        } else if now.saturating_duration_since(self.sent_at) > config.response_timeout {
            if let Some(head) = self.shared.queues.outgoing.pop() {
                warn!(sequence = head.sequence, "request was acknowledged but never answered");
                self.shared.sink.response_timeout(&head);
            }
            self.state = SendState::Idle;
        }
    }

    /// The answer to the Request in flight arrived before its ACK, which
    /// proves the Request got through.
    fn complete_early_response(&mut self) {
        self.response_received = false;
        self.ack_timeouts = 0;
        self.nacks = 0;
        if let Some(head) = self.shared.queues.outgoing.pop() {
            debug!(sequence = head.sequence, "response arrived ahead of its acknowledgement");
            self.shared.sink.packet_sent(&head);
        }
        self.state = SendState::Idle;
    }

    fn send_control(&self, packet: &Packet, config: &LinkConfig) {
        match encode_frame(packet) {
            Ok(frame) => self.shared.transmit(&frame, config),
            Err(e) => error!(sequence = packet.sequence, "cannot encode acknowledgement: {e}"),
        }
    }
}
