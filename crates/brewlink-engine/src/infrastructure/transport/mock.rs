//! In-memory transport for tests.
//!
//! Records every frame the engine writes and lets a test play the machine's
//! side by injecting inbound bytes, as if they had arrived on the line.

use std::sync::{Arc, Mutex};

use crate::application::queues::lock;

use super::{ReceiveHandler, Transport, TransportError};

#[derive(Default)]
struct MockState {
    open: bool,
    receiver: Option<Arc<dyn ReceiveHandler>>,
    writes: Vec<Vec<u8>>,
    opens: Vec<(String, u32)>,
    failing_opens: u32,
}

/// A mock implementation of [`Transport`].
#[derive(Default)]
pub struct MockTransport {
    state: Mutex<MockState>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delivers `bytes` to the receiver registered by the last `open`.
    ///
    /// Bytes injected while no receiver is registered are lost, like noise on
    /// an unattended line.
    pub fn inject(&self, bytes: &[u8]) {
        let receiver = lock(&self.state).receiver.clone();
        if let Some(receiver) = receiver {
            receiver.on_bytes(bytes);
        }
    }

    /// Every successful write so far, oldest first.
    pub fn writes(&self) -> Vec<Vec<u8>> {
        lock(&self.state).writes.clone()
    }

    /// Returns and forgets the recorded writes.
    pub fn take_writes(&self) -> Vec<Vec<u8>> {
        std::mem::take(&mut lock(&self.state).writes)
    }

    /// Makes the next `count` calls to `open` fail.
    pub fn fail_next_opens(&self, count: u32) {
        lock(&self.state).failing_opens = count;
    }

    /// Port name and baud rate of every successful open, oldest first.
    pub fn opens(&self) -> Vec<(String, u32)> {
        lock(&self.state).opens.clone()
    }
}

impl Transport for MockTransport {
    fn open(
        &self,
        port_name: &str,
        baud_rate: u32,
        receiver: Arc<dyn ReceiveHandler>,
    ) -> Result<(), TransportError> {
        let mut state = lock(&self.state);
        if state.failing_opens > 0 {
            state.failing_opens -= 1;
            return Err(TransportError::OpenFailed {
                port: port_name.to_string(),
                source: std::io::Error::new(std::io::ErrorKind::PermissionDenied, "port busy"),
            });
        }
        state.open = true;
        state.receiver = Some(receiver);
        state.opens.push((port_name.to_string(), baud_rate));
        Ok(())
    }

    fn close(&self) {
        let mut state = lock(&self.state);
        state.open = false;
        state.receiver = None;
    }

    fn is_open(&self) -> bool {
        lock(&self.state).open
    }

    fn write(&self, bytes: &[u8]) -> Result<(), TransportError> {
        let mut state = lock(&self.state);
        if !state.open {
            return Err(TransportError::NotOpen);
        }
        state.writes.push(bytes.to_vec());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Collect(Mutex<Vec<u8>>);

    impl ReceiveHandler for Collect {
        fn on_bytes(&self, bytes: &[u8]) {
            lock(&self.0).extend_from_slice(bytes);
        }
    }

    #[test]
    fn test_mock_transport_delivers_injected_bytes() {
        // Arrange
        let transport = MockTransport::new();
        let receiver = Arc::new(Collect(Mutex::new(Vec::new())));
        transport.open("mock", 9600, receiver.clone()).unwrap();

        // Act
        transport.inject(&[0x01, 0x02]);
        transport.inject(&[0x03]);

        // Assert
        assert_eq!(*lock(&receiver.0), vec![0x01, 0x02, 0x03]);
        assert_eq!(transport.opens(), vec![("mock".to_string(), 9600)]);
    }

    #[test]
    fn test_mock_transport_records_writes_only_while_open() {
        let transport = MockTransport::new();
        assert!(matches!(transport.write(&[0x01]), Err(TransportError::NotOpen)));

        transport
            .open("mock", 9600, Arc::new(Collect(Mutex::new(Vec::new()))))
            .unwrap();
        transport.write(&[0x01, 0x04]).unwrap();

        assert_eq!(transport.take_writes(), vec![vec![0x01, 0x04]]);
        assert!(transport.writes().is_empty());
    }

    #[test]
    fn test_mock_transport_close_drops_receiver() {
        let transport = MockTransport::new();
        let receiver = Arc::new(Collect(Mutex::new(Vec::new())));
        transport.open("mock", 9600, receiver.clone()).unwrap();

        transport.close();
        transport.inject(&[0x55]);

        assert!(!transport.is_open());
        assert!(lock(&receiver.0).is_empty());
    }

    #[test]
    fn test_mock_transport_scripted_open_failures() {
        let transport = MockTransport::new();
        transport.fail_next_opens(2);
        let receiver: Arc<dyn ReceiveHandler> = Arc::new(Collect(Mutex::new(Vec::new())));

        assert!(transport.open("mock", 1, Arc::clone(&receiver)).is_err());
        assert!(transport.open("mock", 1, Arc::clone(&receiver)).is_err());
        assert!(transport.open("mock", 1, receiver).is_ok());
    }
}
