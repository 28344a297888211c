//! Serial line reached through a TCP serial bridge.
//!
//! Serial-to-network bridges (ser2net in raw mode, most RS-232 device
//! servers) expose the line as a plain TCP stream: every byte written to the
//! socket goes out on the wire and every byte received comes back.  The port
//! name is the bridge endpoint, `host:port`.  Line settings such as the baud
//! rate are configured on the bridge, so the requested rate is only logged.
//!
//! A dedicated reader thread blocks on the socket with a short read timeout
//! and hands every chunk to the link's receive path.

use std::io::{ErrorKind, Read, Write};
use std::net::{Shutdown, TcpStream, ToSocketAddrs};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use tracing::{debug, error, info, warn};

use crate::application::queues::lock;

use super::{ReceiveHandler, Transport, TransportError};

/// How long one socket read blocks before the reader rechecks its flag.
const READ_TIMEOUT: Duration = Duration::from_millis(100);

/// Longest a single frame write may block on a bridge that stopped reading.
const WRITE_TIMEOUT: Duration = Duration::from_millis(500);

/// Limit for establishing the bridge connection.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(2);

const READ_BUFFER_LEN: usize = 512;

struct Connection {
    stream: Arc<TcpStream>,
    running: Arc<AtomicBool>,
    reader: Option<JoinHandle<()>>,
}

/// [`Transport`] over a raw TCP serial bridge.
#[derive(Default)]
pub struct TcpBridgeTransport {
    connection: Mutex<Option<Connection>>,
}

impl TcpBridgeTransport {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Transport for TcpBridgeTransport {
    fn open(
        &self,
        port_name: &str,
        baud_rate: u32,
        receiver: Arc<dyn ReceiveHandler>,
    ) -> Result<(), TransportError> {
        let mut connection = lock(&self.connection);
        if connection
            .as_ref()
            .is_some_and(|c| c.running.load(Ordering::Relaxed))
        {
            return Ok(());
        }

        let open_failed = |source| TransportError::OpenFailed {
            port: port_name.to_string(),
            source,
        };

        let addr = port_name
            .to_socket_addrs()
            .map_err(open_failed)?
            .next()
            .ok_or_else(|| TransportError::NoDevice(port_name.to_string()))?;
        let stream = TcpStream::connect_timeout(&addr, CONNECT_TIMEOUT).map_err(open_failed)?;
        stream.set_nodelay(true).map_err(open_failed)?;
        stream
            .set_read_timeout(Some(READ_TIMEOUT))
            .map_err(open_failed)?;
        stream
            .set_write_timeout(Some(WRITE_TIMEOUT))
            .map_err(open_failed)?;
        let reader_stream = stream.try_clone().map_err(open_failed)?;

        let running = Arc::new(AtomicBool::new(true));
        let reader_running = Arc::clone(&running);
        let reader = std::thread::Builder::new()
            .name("brewlink-rx".to_string())
            .spawn(move || reader_loop(reader_stream, receiver, reader_running))
            .map_err(open_failed)?;

        info!("serial bridge {addr} connected (baud {baud_rate} is set on the bridge)");
        *connection = Some(Connection {
            stream: Arc::new(stream),
            running,
            reader: Some(reader),
        });
        Ok(())
    }

    fn close(&self) {
        let Some(mut connection) = lock(&self.connection).take() else {
            return;
        };
        connection.running.store(false, Ordering::Relaxed);
        // Wakes the reader out of a blocking read and a writer out of a
        // blocking write.
        let _ = connection.stream.shutdown(Shutdown::Both);
        if let Some(reader) = connection.reader.take() {
            if reader.join().is_err() {
                warn!("serial bridge reader thread panicked");
            }
        }
        info!("serial bridge closed");
    }

    fn is_open(&self) -> bool {
        lock(&self.connection)
            .as_ref()
            .is_some_and(|c| c.running.load(Ordering::Relaxed))
    }

    fn write(&self, bytes: &[u8]) -> Result<(), TransportError> {
        // The lock only guards the handle; the write itself runs unlocked so
        // `is_open` and `close` never wait on a stalled bridge.
        let stream = lock(&self.connection)
            .as_ref()
            .filter(|c| c.running.load(Ordering::Relaxed))
            .map(|c| Arc::clone(&c.stream))
            .ok_or(TransportError::NotOpen)?;
        (&*stream).write_all(bytes)?;
        Ok(())
    }
}

/// Receive loop executed on the reader thread.
fn reader_loop(mut stream: TcpStream, receiver: Arc<dyn ReceiveHandler>, running: Arc<AtomicBool>) {
    let mut buf = [0u8; READ_BUFFER_LEN];

    while running.load(Ordering::Relaxed) {
        match stream.read(&mut buf) {
            Ok(0) => {
                info!("serial bridge closed the connection");
                break;
            }
            Ok(len) => {
                debug!(len, "bytes from serial bridge");
                receiver.on_bytes(&buf[..len]);
            }
            Err(e) if is_timeout_error(&e) => continue,
            Err(e) => {
                if running.load(Ordering::Relaxed) {
                    error!("serial bridge read error: {e}");
                }
                break;
            }
        }
    }

    running.store(false, Ordering::Relaxed);
}

/// Returns `true` for OS timeout / would-block errors that should be retried.
fn is_timeout_error(e: &std::io::Error) -> bool {
    matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;
    use std::sync::mpsc;

    struct Forward(Mutex<mpsc::Sender<Vec<u8>>>);

    impl ReceiveHandler for Forward {
        fn on_bytes(&self, bytes: &[u8]) {
            let _ = lock(&self.0).send(bytes.to_vec());
        }
    }

    fn receiver() -> (Arc<dyn ReceiveHandler>, mpsc::Receiver<Vec<u8>>) {
        let (tx, rx) = mpsc::channel();
        (Arc::new(Forward(Mutex::new(tx))), rx)
    }

    #[test]
    fn test_is_timeout_error_recognises_timeouts() {
        assert!(is_timeout_error(&std::io::Error::new(ErrorKind::TimedOut, "t")));
        assert!(is_timeout_error(&std::io::Error::new(ErrorKind::WouldBlock, "w")));
        assert!(!is_timeout_error(&std::io::Error::new(ErrorKind::ConnectionReset, "r")));
    }

    #[test]
    fn test_write_before_open_fails() {
        let transport = TcpBridgeTransport::new();
        assert!(matches!(transport.write(&[0x01]), Err(TransportError::NotOpen)));
        assert!(!transport.is_open());
    }

    #[test]
    fn test_open_unresolvable_port_fails() {
        let transport = TcpBridgeTransport::new();
        let (handler, _rx) = receiver();
        assert!(transport.open("not a socket address", 9600, handler).is_err());
    }

    #[test]
    fn test_bridge_round_trip() {
        // Arrange
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
        let addr = listener.local_addr().expect("local addr").to_string();
        let transport = TcpBridgeTransport::new();
        let (handler, rx) = receiver();

        // Act
        transport.open(&addr, 115_200, handler).expect("open");
        let (mut peer, _) = listener.accept().expect("accept");
        peer.write_all(&[0x01, 0x00, 0x04]).expect("peer write");
        transport.write(&[0x01, 0x6A, 0x04]).expect("write");
        let mut echoed = [0u8; 3];
        peer.read_exact(&mut echoed).expect("peer read");

        // Assert
        let inbound = rx.recv_timeout(Duration::from_secs(2)).expect("inbound bytes");
        assert_eq!(inbound, vec![0x01, 0x00, 0x04]);
        assert_eq!(echoed, [0x01, 0x6A, 0x04]);
        assert!(transport.is_open());

        transport.close();
        assert!(!transport.is_open());
    }

    #[test]
    fn test_stalled_bridge_does_not_block_other_calls() {
        // Arrange: the peer accepts but never reads, so a large write stalls.
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
        let addr = listener.local_addr().expect("local addr").to_string();
        let transport = Arc::new(TcpBridgeTransport::new());
        let (handler, _rx) = receiver();
        transport.open(&addr, 115_200, handler).expect("open");
        let (_peer, _) = listener.accept().expect("accept");

        let writer = {
            let transport = Arc::clone(&transport);
            std::thread::spawn(move || transport.write(&vec![0x55; 64 << 20]))
        };
        std::thread::sleep(Duration::from_millis(100));

        // Act
        let started = std::time::Instant::now();
        let open_while_writing = transport.is_open();
        transport.close();
        let elapsed = started.elapsed();

        // Assert
        assert!(open_while_writing);
        assert!(elapsed < Duration::from_secs(1), "close took {elapsed:?}");
        assert!(writer.join().expect("writer thread").is_err());
        assert!(!transport.is_open());
    }
}
