//! Storage infrastructure: configuration file persistence.
//!
//! The `config` sub-module reads and writes the TOML file that holds the
//! serial port, link timing, and log level, and falls back to defaults when
//! the file does not exist yet.

pub mod config;
