//! Infrastructure layer for the link engine.
//!
//! Contains the OS-facing seams the engine is built against:
//!
//! - **`transport`** – the byte pipe to the machine: the [`transport::Transport`]
//!   trait, an in-memory mock, and a TCP serial-bridge implementation.
//! - **`clock`** – the time source used for every timeout comparison.
//! - **`storage`** – TOML configuration file persistence.

pub mod clock;
pub mod storage;
pub mod transport;
