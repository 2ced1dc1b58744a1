//! Shared session state.
//!
//! One [`Shared`] instance backs a session and all of its handles. The
//! event-loop task is the only writer of roster state; everything else
//! reads snapshots or goes through the outbound queue.

use std::sync::Arc;

use parking_lot::RwLock;
use regex::Regex;
use tokio::sync::{Semaphore, mpsc, watch};
use tracing::{debug, info, warn};

use crate::config::SessionConfig;
use crate::events::RuleSet;
use crate::pattern::CommandTable;
use crate::roster::Roster;

/// Connection lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Connecting,
    Connected,
    Authenticating,
    Authenticated,
    Joining,
    Active,
    Disconnecting,
}

/// Structural shape of a chat line: sender nick, sender host, target,
/// payload. Tried only after the protocol table misses.
fn chat_pattern() -> Regex {
    Regex::new(r"^:([^!\s]+)!(\S+) (?:PRIVMSG|NOTICE) (\S+) :(.*)$").expect("built-in pattern")
}

pub(crate) struct Shared {
    pub config: SessionConfig,
    pub nick: RwLock<String>,
    pub roster: RwLock<Roster>,
    pub rules: RwLock<Arc<RuleSet>>,
    pub commands: RwLock<Arc<CommandTable>>,
    pub chat_re: Regex,
    /// Host string captured from the welcome numeric; gates pong replies.
    pub server_host: RwLock<Option<String>>,
    /// Message for the best-effort QUIT sent on shutdown.
    pub quit_message: RwLock<Option<String>>,
    pub callback_slots: Arc<Semaphore>,
    state: RwLock<SessionState>,
    authed_tx: watch::Sender<bool>,
    run_tx: watch::Sender<bool>,
    outbound: RwLock<Option<mpsc::Sender<String>>>,
}

impl Shared {
    pub fn new(config: SessionConfig) -> Arc<Self> {
        let (authed_tx, _) = watch::channel(false);
        let (run_tx, _) = watch::channel(true);
        let rules = RuleSet::compile(&config.nick, &config.service);
        let nick = config.nick.clone();
        let callback_slots = Arc::new(Semaphore::new(config.callback_workers));

        Arc::new(Self {
            config,
            nick: RwLock::new(nick),
            roster: RwLock::new(Roster::default()),
            rules: RwLock::new(Arc::new(rules)),
            commands: RwLock::new(Arc::new(CommandTable::new())),
            chat_re: chat_pattern(),
            server_host: RwLock::new(None),
            quit_message: RwLock::new(None),
            callback_slots,
            state: RwLock::new(SessionState::Disconnected),
            authed_tx,
            run_tx,
            outbound: RwLock::new(None),
        })
    }

    pub fn state(&self) -> SessionState {
        *self.state.read()
    }

    pub fn set_state(&self, next: SessionState) {
        let mut state = self.state.write();
        if *state != next {
            info!(from = ?*state, to = ?next, "state transition");
            *state = next;
        }
    }

    pub fn should_run(&self) -> bool {
        *self.run_tx.borrow()
    }

    pub fn request_stop(&self) {
        self.run_tx.send_replace(false);
    }

    pub fn run_rx(&self) -> watch::Receiver<bool> {
        self.run_tx.subscribe()
    }

    pub fn authed(&self) -> bool {
        *self.authed_tx.borrow()
    }

    pub fn set_authed(&self, value: bool) {
        self.authed_tx.send_replace(value);
    }

    /// Recompile the nick-embedding protocol patterns for the current nick.
    pub fn recompile_rules(&self) {
        let nick = self.nick.read().clone();
        *self.rules.write() = Arc::new(RuleSet::compile(&nick, &self.config.service));
    }

    /// Install the outbound queue for a fresh connection.
    pub fn install_outbound(&self, tx: mpsc::Sender<String>) {
        *self.outbound.write() = Some(tx);
    }

    /// The send primitive. Queues one protocol line for the live
    /// connection's writer; failures are logged, never raised; callers
    /// observe them through subsequent state.
    pub fn send_raw(&self, line: &str) {
        let outbound = self.outbound.read();
        match outbound.as_ref() {
            Some(tx) => {
                if let Err(e) = tx.try_send(line.to_string()) {
                    warn!(line = %line, error = %e, "outbound queue rejected line");
                }
            }
            None => {
                debug!(line = %line, "not connected, line dropped");
            }
        }
    }

    /// Tear down per-connection state. Stale membership never survives a
    /// reconnect.
    pub fn clear_connection(&self) {
        *self.outbound.write() = None;
        self.roster.write().clear();
        *self.server_host.write() = None;
        self.set_authed(false);
    }
}
