//! The session engine and its public handle.
//!
//! A [`Session`] owns one supervised connection to a server. Everything a
//! deployment interacts with at runtime (outbound commands, the command
//! registry, roster snapshots) goes through a cheap, cloneable
//! [`SessionHandle`].

mod dispatch;
mod event_loop;
mod lifecycle;
mod state;

pub use state::SessionState;

use std::sync::Arc;
use std::time::Duration;

use tracing::{Instrument, info, warn};

use crate::config::SessionConfig;
use crate::error::RegistryError;
use crate::pattern::{CommandCallback, CommandDef, CommandTable};
use crate::roster::Channel;
use crate::telemetry::spans;

/// A supervised client session: one server, one live connection at a time.
pub struct Session {
    shared: Arc<state::Shared>,
}

impl Session {
    pub fn new(config: SessionConfig) -> Self {
        Self {
            shared: state::Shared::new(config),
        }
    }

    /// A cloneable handle for use from commands and other tasks.
    pub fn handle(&self) -> SessionHandle {
        SessionHandle {
            shared: Arc::clone(&self.shared),
        }
    }

    /// Drive the session until shutdown: connect, authenticate, join,
    /// dispatch, reconnect on failure. Run this on its own task.
    pub async fn run(&self) {
        let span = {
            let nick = self.shared.nick.read().clone();
            spans::session(&nick, &self.shared.config.server)
        };
        lifecycle::supervise(Arc::clone(&self.shared))
            .instrument(span)
            .await;
    }

    /// Graceful shutdown: stop the supervisor, send a best-effort QUIT,
    /// and give outstanding command callbacks a moment to drain.
    pub async fn shutdown(&self, message: &str) {
        info!("shutdown requested");
        *self.shared.quit_message.write() = Some(message.to_string());
        self.shared.request_stop();

        let slots = Arc::clone(&self.shared.callback_slots);
        let total = self.shared.config.callback_workers as u32;
        match tokio::time::timeout(Duration::from_secs(5), slots.acquire_many_owned(total)).await
        {
            Ok(_) => {}
            Err(_) => warn!("command callbacks still running after grace period"),
        }
    }
}

/// Cheap handle onto a running [`Session`].
#[derive(Clone)]
pub struct SessionHandle {
    shared: Arc<state::Shared>,
}

impl SessionHandle {
    // ------------------------------------------------------------------
    // Command registry
    // ------------------------------------------------------------------

    /// Replace the whole command table. Every pattern compiles before the
    /// new table becomes visible to dispatch.
    pub fn load_commands(&self, defs: Vec<CommandDef>) -> Result<(), RegistryError> {
        let mut table = CommandTable::new();
        for def in defs {
            table.insert(def)?;
        }
        *self.shared.commands.write() = Arc::new(table);
        Ok(())
    }

    /// Insert or overwrite one named command.
    pub fn add_command(
        &self,
        name: &str,
        patterns: &[&str],
        callback: CommandCallback,
    ) -> Result<(), RegistryError> {
        let mut guard = self.shared.commands.write();
        let mut next = (**guard).clone();
        next.insert(CommandDef::new(name, patterns, callback))?;
        *guard = Arc::new(next);
        Ok(())
    }

    /// Remove a named command. Returns `false` when it was not present.
    pub fn remove_command(&self, name: &str) -> bool {
        let mut guard = self.shared.commands.write();
        let mut next = (**guard).clone();
        let removed = next.remove(name);
        if removed {
            *guard = Arc::new(next);
        }
        removed
    }

    // ------------------------------------------------------------------
    // Outbound commands: thin formatters over the send primitive
    // ------------------------------------------------------------------

    /// Queue a raw protocol line. The terminator is appended by the codec.
    pub fn send_raw(&self, line: &str) {
        self.shared.send_raw(line);
    }

    pub fn send_message(&self, target: &str, text: &str) {
        self.send_raw(&format!("PRIVMSG {target} :{text}"));
    }

    pub fn send_notice(&self, target: &str, text: &str) {
        self.send_raw(&format!("NOTICE {target} :{text}"));
    }

    pub fn join(&self, channel: &str) {
        self.send_raw(&format!("JOIN {channel}"));
    }

    pub fn part(&self, channel: &str) {
        self.send_raw(&format!("PART {channel}"));
    }

    pub fn set_topic(&self, channel: &str, topic: &str) {
        self.send_raw(&format!("TOPIC {channel} :{topic}"));
    }

    pub fn kick(&self, channel: &str, nick: &str, reason: &str) {
        self.send_raw(&format!("KICK {channel} {nick} :{reason}"));
    }

    /// Ask the nickname service for a nick's auth level; the answer comes
    /// back asynchronously and lands in the roster.
    pub fn check_auth(&self, nick: &str) {
        self.send_raw(&format!("NICKSERV ACC {nick}"));
    }

    /// Set an away message, or clear it with `None`.
    pub fn set_away(&self, message: Option<&str>) {
        match message {
            Some(message) => self.send_raw(&format!("AWAY :{message}")),
            None => self.send_raw("AWAY"),
        }
    }

    pub fn set_mode(&self, target: &str, flags: &str) {
        self.send_raw(&format!("MODE {target} +{flags}"));
    }

    pub fn unset_mode(&self, target: &str, flags: &str) {
        self.send_raw(&format!("MODE {target} -{flags}"));
    }

    /// Change nick. Protocol patterns that embed the nick are recompiled
    /// before the server sees the change.
    pub fn set_nick(&self, nick: &str) {
        *self.shared.nick.write() = nick.to_string();
        self.shared.recompile_rules();
        self.send_raw(&format!("NICK {nick}"));
    }

    /// Send a QUIT. The server closing the link afterwards drives the
    /// normal disconnect path; use [`Session::shutdown`] to also stop the
    /// supervisor.
    pub fn quit(&self, message: &str) {
        self.send_raw(&format!("QUIT :{message}"));
    }

    // ------------------------------------------------------------------
    // Introspection
    // ------------------------------------------------------------------

    pub fn state(&self) -> SessionState {
        self.shared.state()
    }

    pub fn is_authenticated(&self) -> bool {
        self.shared.authed()
    }

    pub fn nick(&self) -> String {
        self.shared.nick.read().clone()
    }

    /// Snapshot of one channel's state.
    pub fn channel(&self, name: &str) -> Option<Channel> {
        self.shared.roster.read().channel(name).cloned()
    }

    pub fn channel_names(&self) -> Vec<String> {
        self.shared.roster.read().channel_names()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_api_build_then_publish() {
        let session = Session::new(SessionConfig::new("irc.test", "rookbot"));
        let handle = session.handle();

        handle
            .add_command("a", &[r"^!a"], Arc::new(|_| {}))
            .unwrap();
        assert!(handle
            .add_command("broken", &[r"("], Arc::new(|_| {}))
            .is_err());
        // The failed insert left the published table untouched
        assert_eq!(session.shared.commands.read().len(), 1);

        assert!(handle.remove_command("a"));
        assert!(!handle.remove_command("a"));
    }

    #[test]
    fn test_set_nick_recompiles_rules() {
        let session = Session::new(SessionConfig::new("irc.test", "rookbot"));
        let handle = session.handle();

        handle.set_nick("crow");
        assert_eq!(handle.nick(), "crow");
        let rules = session.shared.rules.read().clone();
        assert!(rules.match_line(":irc.test 001 crow :Welcome").is_some());
        assert!(rules.match_line(":irc.test 001 rookbot :Welcome").is_none());
    }
}
