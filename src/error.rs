//! Unified error handling for rook.
//!
//! Transport-level failures never escape the session: they are logged by the
//! supervisor and drive the state machine toward a fresh connection cycle.
//! Only the registration API surfaces errors synchronously to the caller.

use thiserror::Error;

/// Errors surfaced by the command registration API.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("invalid pattern for command `{name}`: {source}")]
    BadPattern {
        name: String,
        #[source]
        source: regex::Error,
    },
}

/// Line framing errors.
#[derive(Debug, Error)]
pub enum LineError {
    #[error("line exceeds {limit} bytes (got {actual})")]
    TooLong { actual: usize, limit: usize },

    #[error("line is not valid utf-8 at byte {byte_pos}")]
    InvalidUtf8 { byte_pos: usize },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Connection-cycle failures.
///
/// These circulate between the event loop and the supervisor; public send
/// and registration methods never raise them.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("connect to {addr} failed: {source}")]
    Connect {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("connect to {addr} timed out")]
    ConnectTimeout { addr: String },

    #[error("tls handshake with {host} failed: {source}")]
    Tls {
        host: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid tls server name: {host}")]
    ServerName { host: String },

    #[error("identification not confirmed within {secs}s")]
    AuthTimeout { secs: u64 },

    #[error("no data from server within {secs}s")]
    IdleTimeout { secs: u64 },

    #[error(transparent)]
    Line(#[from] LineError),
}
