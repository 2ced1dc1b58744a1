//! Ordered pattern tables and owned match results.
//!
//! Tables are matched in registration order and the first matching entry
//! wins; at most one handler fires per line. Captures are copied out of the
//! haystack (`MatchGroups`) so a match can cross a task boundary.

use regex::{Captures, Regex};
use std::sync::Arc;

use crate::error::RegistryError;

/// Owned capture groups from a pattern match.
///
/// Group 0 is the matched text; numbered groups follow the pattern's
/// capturing groups. Groups that did not participate yield `None`.
#[derive(Debug, Clone)]
pub struct MatchGroups {
    groups: Vec<Option<String>>,
}

impl MatchGroups {
    pub(crate) fn from_captures(caps: &Captures<'_>) -> Self {
        Self {
            groups: caps
                .iter()
                .map(|m| m.map(|m| m.as_str().to_string()))
                .collect(),
        }
    }

    pub fn get(&self, idx: usize) -> Option<&str> {
        self.groups.get(idx).and_then(|g| g.as_deref())
    }

    /// The whole matched text (group 0).
    pub fn whole(&self) -> &str {
        self.get(0).unwrap_or("")
    }

    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }
}

/// Everything a command callback learns about its invocation.
#[derive(Debug, Clone)]
pub struct CommandContext {
    /// Where a reply belongs: the channel, or the sender's nick when the
    /// message was addressed directly to us.
    pub target: String,
    /// Sender's nick.
    pub nick: String,
    /// Sender's user@host string.
    pub host: String,
    /// Captures from the command pattern, matched against the payload.
    pub groups: MatchGroups,
}

/// User command callback. Runs on the bounded blocking pool, so it may
/// block; it must not assume any ordering relative to other callbacks.
pub type CommandCallback = Arc<dyn Fn(CommandContext) + Send + Sync>;

/// An uncompiled command definition, as handed to the registration API.
#[derive(Clone)]
pub struct CommandDef {
    pub name: String,
    pub patterns: Vec<String>,
    pub callback: CommandCallback,
}

impl CommandDef {
    pub fn new(
        name: impl Into<String>,
        patterns: &[&str],
        callback: CommandCallback,
    ) -> Self {
        Self {
            name: name.into(),
            patterns: patterns.iter().map(|p| p.to_string()).collect(),
            callback,
        }
    }
}

/// A compiled command table entry.
#[derive(Clone)]
pub struct CommandEntry {
    name: String,
    patterns: Vec<Regex>,
    callback: CommandCallback,
}

impl CommandEntry {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn callback(&self) -> CommandCallback {
        Arc::clone(&self.callback)
    }
}

/// Ordered set of user commands.
///
/// Never mutated in place once published: the registration API builds a new
/// table and swaps the snapshot, so in-flight dispatch keeps a consistent
/// view.
#[derive(Clone, Default)]
pub struct CommandTable {
    entries: Vec<CommandEntry>,
}

impl CommandTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or overwrite the entry named by `def`. Overwriting keeps the
    /// original table position; new names append. Patterns compile before
    /// anything is mutated.
    pub(crate) fn insert(&mut self, def: CommandDef) -> Result<(), RegistryError> {
        let patterns = compile_patterns(&def.name, &def.patterns)?;
        let entry = CommandEntry {
            name: def.name,
            patterns,
            callback: def.callback,
        };
        match self.entries.iter_mut().find(|e| e.name == entry.name) {
            Some(existing) => *existing = entry,
            None => self.entries.push(entry),
        }
        Ok(())
    }

    pub(crate) fn remove(&mut self, name: &str) -> bool {
        let before = self.entries.len();
        self.entries.retain(|e| e.name != name);
        before != self.entries.len()
    }

    /// First entry whose pattern matches the payload, in table order.
    pub(crate) fn match_payload(&self, payload: &str) -> Option<(&CommandEntry, MatchGroups)> {
        for entry in &self.entries {
            for pattern in &entry.patterns {
                if let Some(caps) = pattern.captures(payload) {
                    return Some((entry, MatchGroups::from_captures(&caps)));
                }
            }
        }
        None
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn compile_patterns(name: &str, patterns: &[String]) -> Result<Vec<Regex>, RegistryError> {
    patterns
        .iter()
        .map(|p| {
            Regex::new(p).map_err(|source| RegistryError::BadPattern {
                name: name.to_string(),
                source,
            })
        })
        .collect()
}
