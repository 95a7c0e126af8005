//! # netvault CLI
//!
//! Support code for the `netvault` binary.
//!
//! ## Modules
//!
//! - [`config`]: Configuration loading and defaults
//! - [`keys`]: Installation key provider selection
//! - [`logging`]: Subscriber setup with optional file output

pub mod config;
pub mod keys;
pub mod logging;

pub use config::{Config, ConfigError, KeyBackend};
