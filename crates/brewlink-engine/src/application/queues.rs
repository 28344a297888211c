//! FIFO queues between the receive path, the application, and the worker.
//!
//! Each queue holds its own lock, and every lock is held only for the single
//! push/peek/pop call, never across transport I/O or an event callback.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};

use brewlink_core::{Packet, RawFrame};

/// Locks `mutex`, recovering the guard if a previous holder panicked.
///
/// Every critical section in this crate leaves its data consistent, so a
/// poisoned lock is still safe to use.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Thread-safe unbounded FIFO.
#[derive(Debug)]
pub struct LinkQueue<T> {
    items: Mutex<VecDeque<T>>,
}

impl<T> LinkQueue<T> {
    pub fn new() -> Self {
        Self {
            items: Mutex::new(VecDeque::new()),
        }
    }

    pub fn push(&self, item: T) {
        lock(&self.items).push_back(item);
    }

    pub fn pop(&self) -> Option<T> {
        lock(&self.items).pop_front()
    }

    pub fn len(&self) -> usize {
        lock(&self.items).len()
    }

    pub fn is_empty(&self) -> bool {
        lock(&self.items).is_empty()
    }

    pub fn clear(&self) {
        lock(&self.items).clear();
    }

    /// Evaluates `f` against the head without removing it.
    pub fn peek_with<R>(&self, f: impl FnOnce(&T) -> R) -> Option<R> {
        lock(&self.items).front().map(f)
    }
}

impl<T: Clone> LinkQueue<T> {
    /// Returns a copy of the head without removing it.
    pub fn peek(&self) -> Option<T> {
        lock(&self.items).front().cloned()
    }
}

impl<T> Default for LinkQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// The four queues of one link.
#[derive(Debug, Default)]
pub struct QueueSet {
    /// Packets waiting to be sent.  The head is the one in flight.
    pub outgoing: LinkQueue<Packet>,
    /// Decoded Data/Request packets, corrupted ones included.
    pub incoming_data: LinkQueue<Packet>,
    /// Decoded PositiveAck/NegativeAck packets.
    pub incoming_ack: LinkQueue<Packet>,
    /// Complete frames from the reassembler, not yet decoded.
    pub incoming_raw: LinkQueue<RawFrame>,
}

impl QueueSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drops everything received but not yet handled.  Outgoing packets are
    /// kept.
    pub fn clear_incoming(&self) {
        self.incoming_data.clear();
        self.incoming_ack.clear();
        self.incoming_raw.clear();
    }
}
