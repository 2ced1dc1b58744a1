//! Span constructors for session observability.

/// Standardized spans wrapping the session's long-running activities.
pub mod spans {
    use tracing::{Span, info_span};

    /// Span covering a session's whole supervised lifetime.
    pub fn session(nick: &str, server: &str) -> Span {
        info_span!("session", nick = %nick, server = %server)
    }

    /// Span covering a single connection cycle.
    pub fn connection(server: &str, attempt: u32) -> Span {
        info_span!("connection", server = %server, attempt)
    }
}
