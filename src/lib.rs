//! rook is an asynchronous IRC client session engine.
//!
//! One [`Session`] maintains a persistent, optionally TLS-encrypted
//! connection to a server, authenticates against the nickname service,
//! tracks channel membership from server events, and dispatches chat lines
//! to registered command callbacks through ordered regex pattern tables.
//!
//! ```no_run
//! use std::sync::Arc;
//! use rook::{Session, SessionConfig};
//!
//! # #[tokio::main]
//! # async fn main() {
//! let mut config = SessionConfig::new("irc.libera.chat", "rookbot");
//! config.channels = vec!["#rook".to_string()];
//!
//! let session = Session::new(config);
//! let handle = session.handle();
//! let replies = handle.clone();
//! handle
//!     .add_command("ping", &[r"^!ping$"], Arc::new(move |ctx| {
//!         replies.send_message(&ctx.target, "pong");
//!     }))
//!     .unwrap();
//!
//! session.run().await;
//! # }
//! ```

pub mod codec;
pub mod config;
pub mod error;
pub mod events;
pub mod pattern;
pub mod roster;
pub mod session;
pub mod telemetry;
pub mod transport;

pub use config::{ConfigError, RetryConfig, SessionConfig, TimeoutsConfig};
pub use error::{LineError, RegistryError, SessionError};
pub use pattern::{CommandCallback, CommandContext, CommandDef, MatchGroups};
pub use roster::{AuthLevel, Channel, Roster};
pub use session::{Session, SessionHandle, SessionState};
