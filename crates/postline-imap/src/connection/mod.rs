//! IMAP connection management.
//!
//! This module provides:
//! - Configuration (host, port, security mode, credentials, timers)
//! - The transport trait and the TLS/plaintext stream
//! - The connection task that owns the socket

pub(crate) mod driver;
mod config;
mod stream;

pub use config::{
    AutoTls, Config, ConfigBuilder, Credentials, DEFAULT_AUTH_TIMEOUT, DEFAULT_CONN_TIMEOUT,
    Security,
};
pub use stream::{ImapStream, Transport, connect, create_tls_connector};
