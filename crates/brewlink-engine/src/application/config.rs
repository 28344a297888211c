//! Link configuration.
//!
//! | Field                 | Default  | Description                                      |
//! |-----------------------|----------|--------------------------------------------------|
//! | `local_address`       | `0x42`   | Source address of outgoing packets               |
//! | `ack_timeout`         | 200 ms   | Wait for ACK/NACK; also the window to answer one |
//! | `response_timeout`    | 200 ms   | Wait for the answer to a Request                 |
//! | `max_retransmissions` | 3        | Retries after the first send                     |
//! | `poll_interval`       | 1 ms     | Worker sleep between iterations                  |
//! | `max_frame_size`      | 256      | Largest raw frame accepted, delimiters included  |
//! | `worker_priority`     | 10       | Advisory only; logged at start                   |
//! | `receive_only`        | `false`  | Never write to the transport                     |
//!
//! The persisted form lives in `infrastructure::storage::config`.

use std::time::Duration;

use brewlink_core::protocol::packet::DEFAULT_HOST_ADDRESS;

pub const DEFAULT_ACK_TIMEOUT: Duration = Duration::from_millis(200);
pub const DEFAULT_RESPONSE_TIMEOUT: Duration = Duration::from_millis(200);
pub const DEFAULT_MAX_RETRANSMISSIONS: u32 = 3;
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(1);
pub const DEFAULT_MAX_FRAME_SIZE: usize = 256;
pub const DEFAULT_WORKER_PRIORITY: u8 = 10;
pub const DEFAULT_BAUD_RATE: u32 = 115_200;

/// Runtime settings of one link instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkConfig {
    pub local_address: u8,
    pub ack_timeout: Duration,
    pub response_timeout: Duration,
    pub max_retransmissions: u32,
    pub poll_interval: Duration,
    pub max_frame_size: usize,
    pub worker_priority: u8,
    pub receive_only: bool,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            local_address: DEFAULT_HOST_ADDRESS,
            ack_timeout: DEFAULT_ACK_TIMEOUT,
            response_timeout: DEFAULT_RESPONSE_TIMEOUT,
            max_retransmissions: DEFAULT_MAX_RETRANSMISSIONS,
            poll_interval: DEFAULT_POLL_INTERVAL,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            worker_priority: DEFAULT_WORKER_PRIORITY,
            receive_only: false,
        }
    }
}

/// Port name and baud rate handed to the transport on open.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortSettings {
    pub name: String,
    pub baud_rate: u32,
}

impl PortSettings {
    pub fn new(name: impl Into<String>, baud_rate: u32) -> Self {
        Self {
            name: name.into(),
            baud_rate,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_link_config_defaults() {
        // Arrange / Act
        let config = LinkConfig::default();

        // Assert
        assert_eq!(config.local_address, 0x42);
        assert_eq!(config.ack_timeout, Duration::from_millis(200));
        assert_eq!(config.response_timeout, Duration::from_millis(200));
        assert_eq!(config.max_retransmissions, 3);
        assert_eq!(config.poll_interval, Duration::from_millis(1));
        assert_eq!(config.max_frame_size, 256);
        assert_eq!(config.worker_priority, 10);
        assert!(!config.receive_only);
    }

    #[test]
    fn test_port_settings_new() {
        let port = PortSettings::new("10.0.0.7:4001", 9600);
        assert_eq!(port.name, "10.0.0.7:4001");
        assert_eq!(port.baud_rate, 9600);
    }
}
