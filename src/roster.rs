//! In-memory channel and membership state.
//!
//! The roster is rebuilt from server events on every connection cycle and
//! cleared on disconnect; nothing here survives a reconnect. Mutation goes
//! through the protocol-event handlers only, which run in arrival order, so
//! every operation is idempotent with respect to already-applied effects.

use std::collections::{HashMap, HashSet};

/// Trust tier reported by the nickname service for a member.
pub type AuthLevel = u8;

/// One channel's membership state.
///
/// Invariant: every nick in `ops` or `voices` is also a key in `members`.
#[derive(Debug, Clone, Default)]
pub struct Channel {
    topic: Option<String>,
    members: HashMap<String, Option<AuthLevel>>,
    ops: HashSet<String>,
    voices: HashSet<String>,
}

impl Channel {
    pub fn topic(&self) -> Option<&str> {
        self.topic.as_deref()
    }

    pub fn members(&self) -> impl Iterator<Item = &str> {
        self.members.keys().map(String::as_str)
    }

    pub fn member_count(&self) -> usize {
        self.members.len()
    }

    pub fn is_member(&self, nick: &str) -> bool {
        self.members.contains_key(nick)
    }

    pub fn is_op(&self, nick: &str) -> bool {
        self.ops.contains(nick)
    }

    pub fn is_voiced(&self, nick: &str) -> bool {
        self.voices.contains(nick)
    }

    /// The member's service-reported level, if one has been received.
    pub fn auth_level(&self, nick: &str) -> Option<AuthLevel> {
        self.members.get(nick).copied().flatten()
    }

    pub(crate) fn set_topic(&mut self, topic: &str) {
        self.topic = Some(topic.to_string());
    }

    /// Insert a member with an unset level. No-op when already present.
    pub(crate) fn add_member(&mut self, nick: &str) {
        self.members.entry(nick.to_string()).or_insert(None);
    }

    pub(crate) fn remove_member(&mut self, nick: &str) {
        self.members.remove(nick);
        self.ops.remove(nick);
        self.voices.remove(nick);
    }

    fn grant(&mut self, nick: &str, flag: char) {
        self.add_member(nick);
        match flag {
            'o' => {
                self.ops.insert(nick.to_string());
            }
            'v' => {
                self.voices.insert(nick.to_string());
            }
            _ => {}
        }
    }

    fn revoke(&mut self, nick: &str, flag: char) {
        match flag {
            'o' => {
                self.ops.remove(nick);
            }
            'v' => {
                self.voices.remove(nick);
            }
            _ => {}
        }
    }
}

/// All channels the session currently knows about.
#[derive(Debug, Default)]
pub struct Roster {
    channels: HashMap<String, Channel>,
}

impl Roster {
    pub fn channel(&self, name: &str) -> Option<&Channel> {
        self.channels.get(name)
    }

    pub fn channel_names(&self) -> Vec<String> {
        self.channels.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    /// A channel exists from the first event that references it.
    pub(crate) fn ensure_channel(&mut self, name: &str) -> &mut Channel {
        self.channels.entry(name.to_string()).or_default()
    }

    pub(crate) fn remove_channel(&mut self, name: &str) {
        self.channels.remove(name);
    }

    /// Drop a nick from every channel (quit).
    pub(crate) fn remove_everywhere(&mut self, nick: &str) {
        for channel in self.channels.values_mut() {
            channel.remove_member(nick);
        }
    }

    /// Overwrite the nick's level wherever it is a member.
    pub(crate) fn set_auth_level(&mut self, nick: &str, level: AuthLevel) {
        for channel in self.channels.values_mut() {
            if let Some(slot) = channel.members.get_mut(nick) {
                *slot = Some(level);
            }
        }
    }

    /// Apply a names-list token string: `@` marks operator, `+` marks
    /// voice, a bare token is a plain member.
    pub(crate) fn apply_names(&mut self, channel: &str, names: &str) {
        let channel = self.ensure_channel(channel);
        for token in names.split(' ').filter(|t| !t.is_empty()) {
            if let Some(nick) = token.strip_prefix('@') {
                channel.grant(nick, 'o');
            } else if let Some(nick) = token.strip_prefix('+') {
                channel.grant(nick, 'v');
            } else {
                channel.add_member(token);
            }
        }
    }

    /// Apply a mode change for one nick. `o`/`O` toggles operator,
    /// `v`/`V` toggles voice; unknown letters are ignored.
    pub(crate) fn apply_mode(&mut self, channel: &str, flags: &str, nick: &str, set: bool) {
        let channel = self.ensure_channel(channel);
        for flag in flags.chars().map(|f| f.to_ascii_lowercase()) {
            if set {
                channel.grant(nick, flag);
            } else {
                channel.revoke(nick, flag);
            }
        }
    }

    pub(crate) fn clear(&mut self) {
        self.channels.clear();
    }
}
