//! Protocol event tags and the fixed server rule set.
//!
//! Each rule pairs an [`EventKind`] with the patterns that recognize it;
//! the dispatcher matches lines against the set in order and switches on
//! the tag. Several patterns embed the session's current nick, so the set
//! is recompiled whenever the nick changes.

use regex::Regex;

use crate::pattern::MatchGroups;

/// The fixed set of server events the session interprets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    /// `PING :token` keepalive.
    Ping,
    /// Welcome numeric 001 addressed to us; group 1 is the server host.
    Welcome,
    /// Service notice confirming identification.
    Identified,
    /// Service ACC notice; groups: nick, level.
    AccLevel,
    /// Topic numeric 332; groups: channel, topic.
    TopicReply,
    /// Names numeric 353; groups: channel, space-separated tokens.
    NamesReply,
    /// Live TOPIC change; groups: channel, topic.
    TopicChange,
    /// User joined; groups: nick, channel.
    Join,
    /// User parted; groups: nick, channel.
    Part,
    /// User kicked; groups: channel, victim.
    Kick,
    /// User quit; group 1 is the nick.
    Quit,
    /// Channel mode grant; groups: channel, flags, nick.
    ModeSet,
    /// Channel mode revocation; groups: channel, flags, nick.
    ModeUnset,
    /// Server-initiated link closure.
    ServerError,
}

struct Rule {
    kind: EventKind,
    patterns: Vec<Regex>,
}

/// Ordered protocol rule set. First matching rule wins.
pub struct RuleSet {
    rules: Vec<Rule>,
}

impl RuleSet {
    /// Compile the rule set for the given nick and service account.
    ///
    /// Compilation is separate from session construction so a nick change
    /// can rebuild the nick-embedding patterns in one pass.
    pub fn compile(nick: &str, service: &str) -> Self {
        let nick = regex::escape(nick);
        let service = regex::escape(service);

        let rules = vec![
            rule(EventKind::Ping, &[r"^PING :(.*)$".to_string()]),
            rule(
                EventKind::Welcome,
                &[format!(r"^:(\S+) 001 {nick}\b")],
            ),
            rule(
                EventKind::Identified,
                &[format!(
                    r"^:{service}!\S+ NOTICE {nick} :You are now identified"
                )],
            ),
            rule(
                EventKind::AccLevel,
                &[format!(r"^:{service}!\S+ NOTICE {nick} :(\S+) ACC (\d)")],
            ),
            rule(
                EventKind::TopicReply,
                &[format!(r"^:\S+ 332 {nick} (\S+) :(.*)$")],
            ),
            rule(
                EventKind::NamesReply,
                &[format!(r"^:\S+ 353 {nick} [=*@] (\S+) :(.*)$")],
            ),
            rule(
                EventKind::TopicChange,
                &[r"^:\S+ TOPIC (\S+) :(.*)$".to_string()],
            ),
            rule(
                EventKind::Join,
                &[r"^:([^!\s]+)!\S+ JOIN :?(\S+)$".to_string()],
            ),
            rule(
                EventKind::Part,
                &[r"^:([^!\s]+)!\S+ PART (\S+)".to_string()],
            ),
            rule(EventKind::Kick, &[r"^:\S+ KICK (\S+) (\S+)".to_string()]),
            rule(EventKind::Quit, &[r"^:([^!\s]+)!\S+ QUIT".to_string()]),
            rule(
                EventKind::ModeSet,
                &[r"^:\S+ MODE (\S+) \+([A-Za-z]+) (\S+)$".to_string()],
            ),
            rule(
                EventKind::ModeUnset,
                &[r"^:\S+ MODE (\S+) -([A-Za-z]+) (\S+)$".to_string()],
            ),
            rule(
                EventKind::ServerError,
                &[r"^ERROR :Closing Link".to_string()],
            ),
        ];

        Self { rules }
    }

    /// Match a line against the set, in order.
    pub fn match_line(&self, line: &str) -> Option<(EventKind, MatchGroups)> {
        for rule in &self.rules {
            for pattern in &rule.patterns {
                if let Some(caps) = pattern.captures(line) {
                    return Some((rule.kind, MatchGroups::from_captures(&caps)));
                }
            }
        }
        None
    }
}

fn rule(kind: EventKind, patterns: &[String]) -> Rule {
    // Invariant: the built-in patterns always compile; the nick and service
    // fragments are regex-escaped.
    Rule {
        kind,
        patterns: patterns
            .iter()
            .map(|p| Regex::new(p).expect("built-in pattern"))
            .collect(),
    }
}
