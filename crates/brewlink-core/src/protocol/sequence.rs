//! Thread-safe 8-bit sequence counter.
//!
//! Every Data and Request packet carries a sequence number.  The peer echoes
//! it in its acknowledgement, and a response to a Request reuses the
//! Request's number, which is how the engine pairs them up.
//!
//! The counter is a single byte on the wire, so it wraps from 255 back to 0.
//! Retransmissions reuse the number they were first sent with; only a fresh
//! enqueue draws a new one.
//!
//! The value lives in an `AtomicU8` because application threads enqueue
//! packets while the worker may reset the counter after the machine restarts.

use std::sync::atomic::{AtomicU8, Ordering};

/// Hands out wrapping sequence numbers, starting at 0.
///
/// # Examples
///
/// ```rust
/// use brewlink_core::SequenceCounter;
///
/// let counter = SequenceCounter::new();
/// assert_eq!(counter.next(), 0);
/// assert_eq!(counter.next(), 1);
/// assert_eq!(counter.last(), 1);
/// ```
#[derive(Debug, Default)]
pub struct SequenceCounter {
    inner: AtomicU8,
}

impl SequenceCounter {
    pub fn new() -> Self {
        Self {
            inner: AtomicU8::new(0),
        }
    }

    /// Returns the next sequence number and advances the counter.
    ///
    /// `fetch_add` wraps on overflow, so 255 is followed by 0.
    pub fn next(&self) -> u8 {
        self.inner.fetch_add(1, Ordering::Relaxed)
    }

    /// The number the next call to [`next`](Self::next) will return.
    pub fn current(&self) -> u8 {
        self.inner.load(Ordering::Relaxed)
    }

    /// The number handed out most recently; 255 when the counter is at 0.
    pub fn last(&self) -> u8 {
        self.current().wrapping_sub(1)
    }

    /// Restarts numbering at 0 after the peer reported a reset.
    pub fn reset(&self) {
        self.inner.store(0, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_sequence_counter_starts_at_zero() {
        // Arrange
        let counter = SequenceCounter::new();

        // Act
        let first = counter.next();

        // Assert
        assert_eq!(first, 0);
        assert_eq!(counter.current(), 1);
    }

    #[test]
    fn test_sequence_counter_wraps_after_256() {
        // Arrange
        let counter = SequenceCounter::new();
        let first = counter.next();

        // Act
        for _ in 0..255 {
            counter.next();
        }
        let wrapped = counter.next();

        // Assert
        assert_eq!(wrapped, first, "the 257th number must equal the 1st");
    }

    #[test]
    fn test_last_before_any_packet_is_255() {
        assert_eq!(SequenceCounter::new().last(), 255);
    }

    #[test]
    fn test_reset_restarts_at_zero() {
        let counter = SequenceCounter::new();
        for _ in 0..17 {
            counter.next();
        }

        counter.reset();

        assert_eq!(counter.next(), 0);
    }

    #[test]
    fn test_sequence_counter_is_thread_safe() {
        // Arrange: 4 threads x 64 calls covers the whole 8-bit range once.
        let counter = Arc::new(SequenceCounter::new());

        // Act
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let counter = Arc::clone(&counter);
                thread::spawn(move || (0..64).map(|_| counter.next()).collect::<Vec<u8>>())
            })
            .collect();
        let seen: HashSet<u8> = handles
            .into_iter()
            .flat_map(|h| h.join().expect("thread panicked"))
            .collect();

        // Assert
        assert_eq!(seen.len(), 256, "no number may be handed out twice");
        assert_eq!(counter.current(), 0);
    }
}
