//! Line dispatch: protocol rules first, then user commands.
//!
//! Protocol events are applied inline on the event-loop task, so state
//! mutation happens in strict arrival order. User command callbacks run on
//! a semaphore-bounded blocking pool and may overlap each other and later
//! lines.

use std::sync::Arc;

use tracing::{debug, error, trace, warn};

use crate::events::EventKind;
use crate::pattern::{CommandContext, MatchGroups};

use super::state::Shared;

/// What the event loop should do after a line has been handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Dispatch {
    Continue,
    Disconnect,
}

pub(crate) fn dispatch_line(shared: &Arc<Shared>, line: &str) -> Dispatch {
    trace!(line = %line, "recv");

    let rules = shared.rules.read().clone();
    if let Some((kind, groups)) = rules.match_line(line) {
        debug!(line = %line, event = ?kind, "protocol event");
        return apply_event(shared, kind, &groups);
    }

    if let Some(caps) = shared.chat_re.captures(line) {
        let groups = MatchGroups::from_captures(&caps);
        run_command(shared, &groups);
    }

    // A line matching nothing is not an error.
    Dispatch::Continue
}

fn apply_event(shared: &Arc<Shared>, kind: EventKind, groups: &MatchGroups) -> Dispatch {
    match kind {
        EventKind::Ping => {
            // Pongs carry the host captured from the welcome numeric;
            // pings arriving before it are ignored, not queued.
            let host = shared.server_host.read().clone();
            match host {
                Some(host) => shared.send_raw(&format!("PONG :{host}")),
                None => debug!("ping before welcome, ignored"),
            }
        }
        EventKind::Welcome => {
            if let Some(host) = groups.get(1) {
                *shared.server_host.write() = Some(host.to_string());
            }
        }
        EventKind::Identified => {
            shared.set_authed(true);
        }
        EventKind::AccLevel => {
            if let (Some(nick), Some(level)) = (groups.get(1), groups.get(2)) {
                if let Ok(level) = level.parse() {
                    shared.roster.write().set_auth_level(nick, level);
                }
            }
        }
        EventKind::TopicReply | EventKind::TopicChange => {
            if let (Some(channel), Some(topic)) = (groups.get(1), groups.get(2)) {
                shared.roster.write().ensure_channel(channel).set_topic(topic);
            }
        }
        EventKind::NamesReply => {
            if let (Some(channel), Some(names)) = (groups.get(1), groups.get(2)) {
                shared.roster.write().apply_names(channel, names);
            }
        }
        EventKind::Join => {
            if let (Some(nick), Some(channel)) = (groups.get(1), groups.get(2)) {
                let mut roster = shared.roster.write();
                let chan = roster.ensure_channel(channel);
                if nick != *shared.nick.read() {
                    chan.add_member(nick);
                }
            }
        }
        EventKind::Part => {
            if let (Some(nick), Some(channel)) = (groups.get(1), groups.get(2)) {
                departure(shared, channel, nick);
            }
        }
        EventKind::Kick => {
            if let (Some(channel), Some(victim)) = (groups.get(1), groups.get(2)) {
                departure(shared, channel, victim);
            }
        }
        EventKind::Quit => {
            if let Some(nick) = groups.get(1) {
                if nick == *shared.nick.read() {
                    return Dispatch::Disconnect;
                }
                shared.roster.write().remove_everywhere(nick);
            }
        }
        EventKind::ModeSet | EventKind::ModeUnset => {
            if let (Some(channel), Some(flags), Some(nick)) =
                (groups.get(1), groups.get(2), groups.get(3))
            {
                let set = kind == EventKind::ModeSet;
                shared.roster.write().apply_mode(channel, flags, nick, set);
            }
        }
        EventKind::ServerError => {
            warn!(error = %groups.whole(), "server closed the link");
            return Dispatch::Disconnect;
        }
    }
    Dispatch::Continue
}

/// Part and kick share the same roster effect.
fn departure(shared: &Arc<Shared>, channel: &str, nick: &str) {
    let mut roster = shared.roster.write();
    if nick == *shared.nick.read() {
        roster.remove_channel(channel);
    } else {
        roster.ensure_channel(channel).remove_member(nick);
    }
}

/// Try the chat payload against the command table and run the first hit.
fn run_command(shared: &Arc<Shared>, chat: &MatchGroups) {
    let (Some(sender), Some(host), Some(target), Some(payload)) =
        (chat.get(1), chat.get(2), chat.get(3), chat.get(4))
    else {
        return;
    };

    let table = shared.commands.read().clone();
    let Some((entry, groups)) = table.match_payload(payload) else {
        return;
    };

    // A message addressed directly to us is answered to its sender.
    let me = shared.nick.read().clone();
    let target = if target == me { sender } else { target };
    debug!(command = entry.name(), target = %target, nick = %sender, "command matched");

    let ctx = CommandContext {
        target: target.to_string(),
        nick: sender.to_string(),
        host: host.to_string(),
        groups,
    };
    let callback = entry.callback();
    let slots = Arc::clone(&shared.callback_slots);

    tokio::spawn(async move {
        let Ok(_permit) = slots.acquire_owned().await else {
            return;
        };
        // Blocking pool plus task boundary: a slow handler does not stall
        // framing, and a panicking one does not take the loop down.
        let outcome = tokio::task::spawn_blocking(move || callback(ctx)).await;
        if let Err(e) = outcome {
            error!(error = %e, "command handler failed");
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SessionConfig;
    use crate::pattern::CommandDef;
    use tokio::sync::mpsc;

    fn shared() -> Arc<Shared> {
        let mut config = SessionConfig::new("irc.test", "rookbot");
        config.channels = vec!["#lab".to_string()];
        Shared::new(config)
    }

    fn connect_queue(shared: &Arc<Shared>) -> mpsc::Receiver<String> {
        let (tx, rx) = mpsc::channel(16);
        shared.install_outbound(tx);
        rx
    }

    #[tokio::test]
    async fn test_ping_before_welcome_is_ignored() {
        let shared = shared();
        let mut queue = connect_queue(&shared);

        dispatch_line(&shared, "PING :irc.test");
        assert!(queue.try_recv().is_err());

        dispatch_line(&shared, ":irc.test 001 rookbot :Welcome");
        dispatch_line(&shared, "PING :irc.test");
        assert_eq!(queue.try_recv().unwrap(), "PONG :irc.test");
    }

    #[tokio::test]
    async fn test_identified_notice_sets_auth_flag() {
        let shared = shared();
        assert!(!shared.authed());

        dispatch_line(
            &shared,
            ":NickServ!NickServ@services. NOTICE rookbot :You are now identified for rookbot.",
        );
        assert!(shared.authed());
    }

    #[tokio::test]
    async fn test_other_notices_do_not_authenticate() {
        let shared = shared();
        dispatch_line(&shared, ":mallory!m@evil NOTICE rookbot :You are now identified");
        assert!(!shared.authed());
    }

    #[tokio::test]
    async fn test_join_part_quit_roster_flow() {
        let shared = shared();

        dispatch_line(&shared, ":alice!a@host JOIN :#lab");
        dispatch_line(&shared, ":bob!b@host JOIN :#lab");
        assert!(shared.roster.read().channel("#lab").unwrap().is_member("alice"));

        dispatch_line(&shared, ":alice!a@host PART #lab :bye");
        assert!(!shared.roster.read().channel("#lab").unwrap().is_member("alice"));

        dispatch_line(&shared, ":bob!b@host QUIT :gone");
        assert!(!shared.roster.read().channel("#lab").unwrap().is_member("bob"));
    }

    #[tokio::test]
    async fn test_own_join_is_not_a_membership_entry() {
        let shared = shared();
        dispatch_line(&shared, ":rookbot!r@host JOIN :#lab");

        let roster = shared.roster.read();
        let chan = roster.channel("#lab").unwrap();
        assert!(!chan.is_member("rookbot"));
        assert_eq!(chan.member_count(), 0);
    }

    #[tokio::test]
    async fn test_self_part_drops_channel() {
        let shared = shared();
        dispatch_line(&shared, ":alice!a@host JOIN :#lab");
        dispatch_line(&shared, ":rookbot!r@host PART #lab :out");

        assert!(shared.roster.read().channel("#lab").is_none());
    }

    #[tokio::test]
    async fn test_self_kick_drops_channel() {
        let shared = shared();
        dispatch_line(&shared, ":alice!a@host JOIN :#lab");
        dispatch_line(&shared, ":alice!a@host KICK #lab rookbot :begone");

        assert!(shared.roster.read().channel("#lab").is_none());
    }

    #[tokio::test]
    async fn test_self_quit_requests_disconnect_and_roster_clears_on_teardown() {
        let shared = shared();
        dispatch_line(&shared, ":alice!a@host JOIN :#lab");

        let verdict = dispatch_line(&shared, ":rookbot!r@host QUIT :shutting down");
        assert_eq!(verdict, Dispatch::Disconnect);

        // The lifecycle clears per-connection state on the way out.
        shared.clear_connection();
        assert!(shared.roster.read().is_empty());
    }

    #[tokio::test]
    async fn test_server_error_requests_disconnect() {
        let shared = shared();
        let verdict = dispatch_line(&shared, "ERROR :Closing Link: rookbot (Ping timeout)");
        assert_eq!(verdict, Dispatch::Disconnect);
    }

    #[tokio::test]
    async fn test_acc_update_only_trusted_from_service() {
        let shared = shared();
        dispatch_line(&shared, ":alice!a@host JOIN :#lab");

        dispatch_line(&shared, ":mallory!m@evil NOTICE rookbot :alice ACC 3");
        assert_eq!(
            shared.roster.read().channel("#lab").unwrap().auth_level("alice"),
            None
        );

        dispatch_line(&shared, ":NickServ!NickServ@services. NOTICE rookbot :alice ACC 3");
        assert_eq!(
            shared.roster.read().channel("#lab").unwrap().auth_level("alice"),
            Some(3)
        );
    }

    #[tokio::test]
    async fn test_channel_message_resolves_to_channel() {
        let shared = shared();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut table = crate::pattern::CommandTable::new();
        table
            .insert(CommandDef::new(
                "probe",
                &[r"^!probe$"],
                Arc::new(move |ctx| {
                    let _ = tx.send((ctx.target, ctx.nick, ctx.host));
                }),
            ))
            .unwrap();
        *shared.commands.write() = Arc::new(table);

        dispatch_line(&shared, ":alice!a@host PRIVMSG #lab :!probe");
        let (target, nick, host) = rx.recv().await.unwrap();
        assert_eq!(target, "#lab");
        assert_eq!(nick, "alice");
        assert_eq!(host, "a@host");
    }

    #[tokio::test]
    async fn test_private_message_resolves_to_sender() {
        let shared = shared();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut table = crate::pattern::CommandTable::new();
        table
            .insert(CommandDef::new(
                "probe",
                &[r"^!probe$"],
                Arc::new(move |ctx| {
                    let _ = tx.send(ctx.target);
                }),
            ))
            .unwrap();
        *shared.commands.write() = Arc::new(table);

        dispatch_line(&shared, ":alice!a@host PRIVMSG rookbot :!probe");
        assert_eq!(rx.recv().await.unwrap(), "alice");
    }

    #[tokio::test]
    async fn test_at_most_one_command_fires_per_line() {
        let shared = shared();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut table = crate::pattern::CommandTable::new();
        for name in ["first", "second"] {
            let tx = tx.clone();
            let name_owned = name.to_string();
            table
                .insert(CommandDef::new(
                    name,
                    &[r"^!hit"],
                    Arc::new(move |_| {
                        let _ = tx.send(name_owned.clone());
                    }),
                ))
                .unwrap();
        }
        *shared.commands.write() = Arc::new(table);

        dispatch_line(&shared, ":alice!a@host PRIVMSG #lab :!hit");
        assert_eq!(rx.recv().await.unwrap(), "first");
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_panicking_handler_does_not_poison_dispatch() {
        let shared = shared();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut table = crate::pattern::CommandTable::new();
        table
            .insert(CommandDef::new(
                "boom",
                &[r"^!boom$"],
                Arc::new(|_| panic!("handler fault")),
            ))
            .unwrap();
        table
            .insert(CommandDef::new(
                "ok",
                &[r"^!ok$"],
                Arc::new(move |_| {
                    let _ = tx.send(());
                }),
            ))
            .unwrap();
        *shared.commands.write() = Arc::new(table);

        dispatch_line(&shared, ":alice!a@host PRIVMSG #lab :!boom");
        dispatch_line(&shared, ":alice!a@host PRIVMSG #lab :!ok");
        rx.recv().await.unwrap();
    }
}
