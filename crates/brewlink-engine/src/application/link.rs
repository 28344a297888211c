//! [`SerialLink`]: the handle an application holds for one serial line.
//!
//! The link owns the queues, the frame reassembler, the sequence counter, and
//! the transmission engine.  State touched by more than one thread lives in
//! `LinkShared` behind an `Arc`:
//!
//! - the transport's receive callback appends to the reassembler and the raw
//!   frame queue;
//! - application threads enqueue packets and change settings;
//! - the worker (or a caller of [`SerialLink::poll_once`]) drives the engine.
//!
//! Configuration changes are stored immediately and picked up by the worker
//! on its next iteration.

use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tracing::{debug, error, info, warn};

use brewlink_core::{FrameReassembler, Message, Packet, SequenceCounter};

use crate::application::config::{LinkConfig, PortSettings};
use crate::application::events::PacketEventSink;
use crate::application::queues::{lock, QueueSet};
use crate::application::state_machine::{SendState, TransmissionEngine};
use crate::application::LinkError;
use crate::infrastructure::clock::{Clock, SystemClock};
use crate::infrastructure::transport::{ReceiveHandler, Transport, TransportError};

/// Attempts made to open the transport before giving up.
const OPEN_ATTEMPTS: u32 = 10;

/// How long `shutdown` waits for the worker before detaching it.
const SHUTDOWN_JOIN_TIMEOUT: Duration = Duration::from_millis(200);

/// State shared between the link handle, the worker, and the receive path.
pub(crate) struct LinkShared {
    pub(crate) queues: QueueSet,
    pub(crate) sequence: SequenceCounter,
    pub(crate) transport: Arc<dyn Transport>,
    pub(crate) sink: Arc<dyn PacketEventSink>,
    pub(crate) clock: Arc<dyn Clock>,
    reassembler: Mutex<FrameReassembler>,
    /// When the most recent complete frame arrived.
    last_incoming: Mutex<Instant>,
    config: RwLock<LinkConfig>,
    port: Mutex<PortSettings>,
    pending_port: Mutex<Option<PortSettings>>,
    /// Set when the worker could not reopen the port after a port change.
    reopen_failed: AtomicBool,
    last_sent: Mutex<Option<Packet>>,
    send_idle: AtomicBool,
    receive_idle: AtomicBool,
    paused: AtomicBool,
    stop: AtomicBool,
    state: AtomicU8,
}

impl LinkShared {
    fn new(
        port: PortSettings,
        config: LinkConfig,
        transport: Arc<dyn Transport>,
        sink: Arc<dyn PacketEventSink>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let now = clock.now();
        Self {
            queues: QueueSet::new(),
            sequence: SequenceCounter::new(),
            transport,
            sink,
            clock,
            reassembler: Mutex::new(FrameReassembler::new(config.max_frame_size)),
            last_incoming: Mutex::new(now),
            config: RwLock::new(config),
            port: Mutex::new(port),
            pending_port: Mutex::new(None),
            reopen_failed: AtomicBool::new(false),
            last_sent: Mutex::new(None),
            send_idle: AtomicBool::new(true),
            receive_idle: AtomicBool::new(true),
            paused: AtomicBool::new(true),
            stop: AtomicBool::new(false),
            state: AtomicU8::new(SendState::Idle as u8),
        }
    }

    /// Snapshot of the current configuration.
    pub(crate) fn config(&self) -> LinkConfig {
        self.config
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn update_config(&self, f: impl FnOnce(&mut LinkConfig)) {
        let mut config = self.config.write().unwrap_or_else(PoisonError::into_inner);
        f(&mut config);
    }

    pub(crate) fn last_incoming(&self) -> Instant {
        *lock(&self.last_incoming)
    }

    pub(crate) fn is_paused(&self) -> bool {
        self.paused.load(Ordering::Acquire)
    }

    pub(crate) fn stop_requested(&self) -> bool {
        self.stop.load(Ordering::Acquire)
    }

    pub(crate) fn publish_state(&self, state: SendState) {
        self.state.store(state as u8, Ordering::Release);
    }

    fn send_state(&self) -> SendState {
        SendState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// No partial frame buffered, nothing being written or read, and no
    /// packet in flight.
    fn is_idle(&self) -> bool {
        lock(&self.reassembler).is_empty()
            && self.send_idle.load(Ordering::Acquire)
            && self.receive_idle.load(Ordering::Acquire)
            && self.send_state() == SendState::Idle
    }

    /// Feeds `bytes` to the reassembler and queues every completed frame.
    fn ingest(&self, reassembler: &mut FrameReassembler, bytes: &[u8]) {
        let frames = reassembler.push(bytes);
        if frames.is_empty() {
            return;
        }
        *lock(&self.last_incoming) = self.clock.now();
        for frame in frames {
            self.queues.incoming_raw.push(frame);
        }
    }

    /// Writes one frame unless the link is receive-only.
    ///
    /// `raw_bytes_sent` fires even when the port is closed, so observers see
    /// what the engine tried to send.
    pub(crate) fn transmit(&self, frame: &[u8], config: &LinkConfig) {
        if config.receive_only {
            return;
        }
        self.send_idle.store(false, Ordering::Release);
        if self.transport.is_open() {
            if let Err(e) = self.transport.write(frame) {
                warn!("write to {} failed: {e}", lock(&self.port).name);
            }
        } else {
            debug!(len = frame.len(), "port closed, frame not written");
        }
        self.sink.raw_bytes_sent(frame);
        self.send_idle.store(true, Ordering::Release);
    }

    fn open_transport(self: &Arc<Self>, settings: &PortSettings) -> Result<(), TransportError> {
        let receiver: Arc<dyn ReceiveHandler> = Arc::clone(self) as Arc<dyn ReceiveHandler>;
        let mut last_error = None;
        for attempt in 1..=OPEN_ATTEMPTS {
            match self
                .transport
                .open(&settings.name, settings.baud_rate, Arc::clone(&receiver))
            {
                Ok(()) => {
                    info!(port = %settings.name, baud = settings.baud_rate, "port opened");
                    self.reopen_failed.store(false, Ordering::Release);
                    return Ok(());
                }
                Err(e) => {
                    warn!(port = %settings.name, attempt, "open failed: {e}");
                    last_error = Some(e);
                }
            }
        }
        Err(last_error.unwrap_or_else(|| TransportError::NoDevice(settings.name.clone())))
    }

    /// Closes the port of a paused, idle link and applies a pending port
    /// change.  Runs at the end of every worker iteration.
    pub(crate) fn apply_port_change(self: &Arc<Self>) {
        if !self.is_paused() || !self.is_idle() {
            return;
        }
        if self.transport.is_open() {
            self.transport.close();
            info!(port = %lock(&self.port).name, "port closed while paused");
        }

        let Some(settings) = lock(&self.pending_port).take() else {
            return;
        };
        info!(port = %settings.name, baud = settings.baud_rate, "switching port");
        *lock(&self.port) = settings.clone();
        // Frames from the old port are not answered on the new one.
        lock(&self.reassembler).reset();
        self.queues.clear_incoming();
        match self.open_transport(&settings) {
            Ok(()) => self.paused.store(false, Ordering::Release),
            Err(e) => {
                // The link stays paused on the new settings until `open` or
                // `start` succeeds.
                self.reopen_failed.store(true, Ordering::Release);
                error!("could not reopen on {}: {e}", settings.name);
            }
        }
    }
}

impl ReceiveHandler for LinkShared {
    fn on_bytes(&self, bytes: &[u8]) {
        self.receive_idle.store(false, Ordering::Release);
        let mut reassembler = lock(&self.reassembler);
        self.ingest(&mut reassembler, bytes);
        self.receive_idle.store(true, Ordering::Release);
    }
}

/// One half-duplex link to a machine.
///
/// # Examples
///
/// ```rust,no_run
/// use std::sync::Arc;
/// use brewlink_core::Message;
/// use brewlink_engine::application::{LinkConfig, NoopEventSink, PortSettings, SerialLink};
/// use brewlink_engine::infrastructure::transport::tcp::TcpBridgeTransport;
///
/// let link = SerialLink::new(
///     PortSettings::new("127.0.0.1:4001", 115_200),
///     LinkConfig::default(),
///     Arc::new(TcpBridgeTransport::new()),
///     Arc::new(NoopEventSink),
/// );
/// link.start()?;
/// let sequence = link.enqueue_data(0x41, Message::new(0x10, 2), Vec::new())?;
/// # let _ = sequence;
/// link.shutdown();
/// # Ok::<(), brewlink_engine::application::LinkError>(())
/// ```
pub struct SerialLink {
    shared: Arc<LinkShared>,
    /// The engine while no worker thread owns it.
    engine: Mutex<Option<TransmissionEngine>>,
    worker: Mutex<Option<JoinHandle<TransmissionEngine>>>,
}

impl SerialLink {
    pub fn new(
        port: PortSettings,
        config: LinkConfig,
        transport: Arc<dyn Transport>,
        sink: Arc<dyn PacketEventSink>,
    ) -> Self {
        Self::with_clock(port, config, transport, sink, Arc::new(SystemClock))
    }

    /// Like [`new`](Self::new), reading time from `clock`.
    pub fn with_clock(
        port: PortSettings,
        config: LinkConfig,
        transport: Arc<dyn Transport>,
        sink: Arc<dyn PacketEventSink>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let shared = Arc::new(LinkShared::new(port, config, transport, sink, clock));
        let engine = TransmissionEngine::new(Arc::clone(&shared));
        Self {
            shared,
            engine: Mutex::new(Some(engine)),
            worker: Mutex::new(None),
        }
    }

    // ── Lifecycle ─────────────────────────────────────────────────────────────

    /// Opens the port (retrying up to ten times) and starts the worker.
    ///
    /// # Errors
    ///
    /// [`LinkError::TransportInit`] if every open attempt failed;
    /// [`LinkError::WorkerSpawn`] if the worker thread could not be created.
    pub fn start(&self) -> Result<(), LinkError> {
        self.open()?;
        self.start_worker()
    }

    /// Opens the port without starting the worker, for callers that drive
    /// the link with [`poll_once`](Self::poll_once).
    ///
    /// # Errors
    ///
    /// [`LinkError::TransportInit`] if every open attempt failed.
    pub fn open(&self) -> Result<(), LinkError> {
        if !self.shared.transport.is_open() {
            let settings = self.port_settings();
            self.shared.open_transport(&settings)?;
        }
        self.shared.paused.store(false, Ordering::Release);
        Ok(())
    }

    /// Spawns the worker thread.  Does nothing if it is already running.
    ///
    /// # Errors
    ///
    /// [`LinkError::WorkerSpawn`] if the OS refused to create the thread.
    pub fn start_worker(&self) -> Result<(), LinkError> {
        let mut worker = lock(&self.worker);
        if worker.is_some() {
            return Ok(());
        }
        let Some(mut engine) = lock(&self.engine).take() else {
            return Ok(());
        };

        self.shared.stop.store(false, Ordering::Release);
        self.shared.paused.store(false, Ordering::Release);
        debug!(
            priority = self.shared.config().worker_priority,
            "worker priority is advisory, thread runs at the OS default"
        );

        let spawned = thread::Builder::new()
            .name("brewlink-worker".to_string())
            .spawn(move || {
                engine.run();
                engine
            });
        match spawned {
            Ok(handle) => {
                *worker = Some(handle);
                info!("transmission worker started");
                Ok(())
            }
            Err(e) => {
                *lock(&self.engine) = Some(TransmissionEngine::new(Arc::clone(&self.shared)));
                Err(LinkError::WorkerSpawn(e))
            }
        }
    }

    /// Stops the worker and closes the port.
    ///
    /// Waits at most 200 ms for the worker; a worker that does not stop in
    /// time is detached and exits on its own at the end of its iteration.
    pub fn shutdown(&self) {
        self.shared.stop.store(true, Ordering::Release);

        if let Some(handle) = lock(&self.worker).take() {
            let deadline = Instant::now() + SHUTDOWN_JOIN_TIMEOUT;
            while !handle.is_finished() && Instant::now() < deadline {
                thread::sleep(Duration::from_millis(1));
            }
            if handle.is_finished() {
                let engine = handle.join().unwrap_or_else(|_| {
                    error!("transmission worker panicked");
                    TransmissionEngine::new(Arc::clone(&self.shared))
                });
                *lock(&self.engine) = Some(engine);
                info!("transmission worker stopped");
            } else {
                warn!("transmission worker did not stop in time, detaching it");
            }
        }

        self.shared.transport.close();
    }

    /// Runs one worker iteration on the calling thread.
    ///
    /// # Errors
    ///
    /// [`LinkError::WorkerRunning`] while the worker thread owns the engine.
    pub fn poll_once(&self) -> Result<(), LinkError> {
        match lock(&self.engine).as_mut() {
            Some(engine) => {
                engine.run_once();
                Ok(())
            }
            None => Err(LinkError::WorkerRunning),
        }
    }

    /// Suspends sending.  The port is closed once the link is idle.
    pub fn pause(&self) {
        self.shared.paused.store(true, Ordering::Release);
        if self.shared.is_idle() && self.shared.transport.is_open() {
            self.shared.transport.close();
            info!("port closed");
        }
    }

    /// Switches to another port or baud rate.
    ///
    /// A closed port takes the new settings at once and is opened by the
    /// next [`start`](Self::start).  An open port is paused, and the worker
    /// reopens it with the new settings once the link is idle.
    pub fn change_port(&self, name: impl Into<String>, baud_rate: u32) {
        let settings = PortSettings::new(name, baud_rate);
        if !self.shared.transport.is_open() {
            *lock(&self.shared.port) = settings;
            return;
        }
        self.shared.paused.store(true, Ordering::Release);
        *lock(&self.shared.pending_port) = Some(settings);
    }

    // ── Enqueueing ────────────────────────────────────────────────────────────

    /// Queues a Data packet and returns the sequence number it was given.
    ///
    /// # Errors
    ///
    /// [`LinkError::Protocol`] if the payload does not fit the length field.
    pub fn enqueue_data(
        &self,
        destination: u8,
        message: Message,
        payload: Vec<u8>,
    ) -> Result<u8, LinkError> {
        let packet = Packet::data(self.local_address(), destination, 0, message, payload)?;
        self.enqueue_numbered(packet, None)
    }

    /// Queues a Request packet; the machine answers with a Data packet
    /// carrying the returned sequence number.
    ///
    /// # Errors
    ///
    /// [`LinkError::Protocol`] if the payload does not fit the length field.
    pub fn enqueue_request(
        &self,
        destination: u8,
        message: Message,
        payload: Vec<u8>,
    ) -> Result<u8, LinkError> {
        let packet = Packet::request(self.local_address(), destination, 0, message, payload)?;
        self.enqueue_numbered(packet, None)
    }

    /// Queues the answer to an inbound Request, reusing its sequence number.
    ///
    /// # Errors
    ///
    /// [`LinkError::Protocol`] if the payload does not fit the length field.
    pub fn enqueue_response(
        &self,
        destination: u8,
        message: Message,
        payload: Vec<u8>,
        sequence: u8,
    ) -> Result<u8, LinkError> {
        let packet = Packet::data(self.local_address(), destination, 0, message, payload)?;
        self.enqueue_numbered(packet, Some(sequence))
    }

    /// Queues a Data packet with no payload and an explicit sequence number.
    ///
    /// # Errors
    ///
    /// Never fails in practice; the signature matches the other enqueue calls.
    pub fn enqueue_command(
        &self,
        destination: u8,
        command: u8,
        sequence: u8,
    ) -> Result<u8, LinkError> {
        let packet = Packet::data(
            self.local_address(),
            destination,
            0,
            Message::new(command, 0),
            Vec::new(),
        )?;
        self.enqueue_numbered(packet, Some(sequence))
    }

    /// Queues a caller-built packet, keeping its sequence number.
    ///
    /// The source address is overwritten with the local address and the CRC
    /// is recomputed.
    ///
    /// # Errors
    ///
    /// [`LinkError::Protocol`] if the packet cannot be encoded.
    pub fn enqueue_packet(&self, mut packet: Packet) -> Result<u8, LinkError> {
        packet.source = self.local_address();
        packet.fail = false;
        let sequence = packet.sequence;
        self.enqueue_numbered(packet, Some(sequence))
    }

    fn enqueue_numbered(&self, mut packet: Packet, sequence: Option<u8>) -> Result<u8, LinkError> {
        packet.sequence = sequence.unwrap_or_else(|| self.shared.sequence.next());
        packet.seal()?;
        debug!(
            sequence = packet.sequence,
            kind = ?packet.kind,
            destination = packet.destination,
            "packet queued"
        );
        let assigned = packet.sequence;
        *lock(&self.shared.last_sent) = Some(packet.clone());
        self.shared.queues.outgoing.push(packet);
        Ok(assigned)
    }

    /// Feeds bytes to the receive path as if they had arrived on the line.
    ///
    /// Returns `false`, buffering nothing, if the reassembler would reach
    /// its frame size limit.
    pub fn add_raw_data(&self, bytes: &[u8]) -> bool {
        let mut reassembler = lock(&self.shared.reassembler);
        if reassembler.buffered_len() + bytes.len() >= reassembler.max_frame_size() {
            debug!(len = bytes.len(), "raw data refused, frame buffer full");
            return false;
        }
        self.shared.ingest(&mut reassembler, bytes);
        true
    }

    // ── Configuration ─────────────────────────────────────────────────────────

    pub fn config(&self) -> LinkConfig {
        self.shared.config()
    }

    pub fn local_address(&self) -> u8 {
        self.shared.config().local_address
    }

    pub fn set_local_address(&self, address: u8) {
        self.shared.update_config(|c| c.local_address = address);
    }

    pub fn set_ack_timeout(&self, timeout: Duration) {
        self.shared.update_config(|c| c.ack_timeout = timeout);
    }

    pub fn set_response_timeout(&self, timeout: Duration) {
        self.shared.update_config(|c| c.response_timeout = timeout);
    }

    pub fn set_max_retransmissions(&self, retries: u32) {
        self.shared.update_config(|c| c.max_retransmissions = retries);
    }

    pub fn set_poll_interval(&self, interval: Duration) {
        self.shared.update_config(|c| c.poll_interval = interval);
    }

    /// Records the worker priority.  Threads keep the OS default priority.
    pub fn set_worker_priority(&self, priority: u8) {
        self.shared.update_config(|c| c.worker_priority = priority);
    }

    /// In receive-only mode nothing is written, acknowledgements included.
    pub fn set_receive_only(&self, receive_only: bool) {
        self.shared.update_config(|c| c.receive_only = receive_only);
    }

    /// Changes the largest frame the reassembler accepts.
    ///
    /// # Errors
    ///
    /// [`LinkError::Busy`] unless the link is idle.
    pub fn set_max_frame_size(&self, max_frame_size: usize) -> Result<(), LinkError> {
        if !self.shared.is_idle() {
            return Err(LinkError::Busy);
        }
        self.shared.update_config(|c| c.max_frame_size = max_frame_size);
        lock(&self.shared.reassembler).set_max_frame_size(max_frame_size);
        Ok(())
    }

    // ── Queries ───────────────────────────────────────────────────────────────

    /// `true` when no partial frame is buffered, no transfer is under way,
    /// and no packet is in flight.
    pub fn is_idle(&self) -> bool {
        self.shared.is_idle()
    }

    /// `true` while a port change waits for the link to go idle.
    pub fn is_port_changing(&self) -> bool {
        lock(&self.shared.pending_port).is_some()
    }

    /// `true` when the last port change could not reopen the port.  The link
    /// then stays closed and paused until [`open`](Self::open) or
    /// [`start`](Self::start) succeeds.
    pub fn port_change_failed(&self) -> bool {
        self.shared.reopen_failed.load(Ordering::Acquire)
    }

    pub fn is_paused(&self) -> bool {
        self.shared.is_paused()
    }

    pub fn is_open(&self) -> bool {
        self.shared.transport.is_open()
    }

    pub fn port_settings(&self) -> PortSettings {
        lock(&self.shared.port).clone()
    }

    /// Send state as of the end of the last worker iteration.
    pub fn send_state(&self) -> SendState {
        self.shared.send_state()
    }

    /// The packet most recently handed to an enqueue call.
    pub fn last_sent_packet(&self) -> Option<Packet> {
        lock(&self.shared.last_sent).clone()
    }

    /// The sequence number handed out most recently by the counter.
    pub fn last_sequence_number(&self) -> u8 {
        self.shared.sequence.last()
    }

    /// Packets waiting to be sent, including the one in flight.
    pub fn outgoing_len(&self) -> usize {
        self.shared.queues.outgoing.len()
    }

    /// Complete frames received but not yet processed by the worker.
    pub fn pending_frames(&self) -> usize {
        self.shared.queues.incoming_raw.len()
    }

    /// Frames dropped by the reassembler for exceeding the size limit.
    pub fn dropped_frames(&self) -> u64 {
        lock(&self.shared.reassembler).dropped_frames()
    }
}

impl Drop for SerialLink {
    /// Stops the worker and closes the port.  Closing also releases the
    /// transport's hold on the receive path.
    fn drop(&mut self) {
        self.shutdown();
    }
}
