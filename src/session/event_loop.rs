//! Per-connection event loop.
//!
//! One `select!` loop owns the transport: it frames incoming lines,
//! flushes the outbound queue, and watches the auth deadline, the read
//! idle deadline, and the stop flag. Registration and channel joining are
//! driven from here so the read path never stops turning while the
//! authentication step waits.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::{Instant, sleep_until};
use tracing::{debug, info, warn};

use crate::error::SessionError;
use crate::transport::Transport;

use super::dispatch::{Dispatch, dispatch_line};
use super::state::{SessionState, Shared};

const DEFAULT_QUIT: &str = "going offline";

/// Orderly ways a connection ends. Failures travel as `SessionError`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum LoopExit {
    /// Local stop flag observed.
    Stopped,
    /// Server closed the stream.
    Closed,
    /// A dispatched event (self-quit, server error) asked to disconnect.
    RemoteQuit,
}

#[derive(Clone, Copy)]
enum Phase {
    AwaitingAuth { deadline: Instant },
    Active,
}

pub(crate) async fn run_connection(
    shared: &Arc<Shared>,
    mut transport: Transport,
    mut outbound_rx: mpsc::Receiver<String>,
) -> Result<LoopExit, SessionError> {
    let mut run_rx = shared.run_rx();
    let read_timeout = shared.config.timeouts.read();

    // Identity registration, then service identification if configured.
    shared.set_state(SessionState::Authenticating);
    let nick = shared.nick.read().clone();
    let realname = &shared.config.realname;
    shared.send_raw(&format!("USER {nick} {nick} {nick} :{realname}"));
    shared.send_raw(&format!("NICK {nick}"));

    let mut phase = match &shared.config.password {
        Some(password) => {
            shared.send_raw(&format!("NICKSERV IDENTIFY {password}"));
            Phase::AwaitingAuth {
                deadline: Instant::now() + shared.config.timeouts.auth(),
            }
        }
        None => {
            // No credential: the authentication step completes trivially.
            shared.set_state(SessionState::Authenticated);
            join_channels(shared);
            Phase::Active
        }
    };

    let mut idle_deadline = Instant::now() + read_timeout;

    loop {
        if !shared.should_run() {
            drain_and_quit(shared, &mut transport, &mut outbound_rx).await;
            return Ok(LoopExit::Stopped);
        }

        let auth_deadline = match phase {
            Phase::AwaitingAuth { deadline } => Some(deadline),
            Phase::Active => None,
        };

        tokio::select! {
            maybe_line = transport.next_line() => {
                match maybe_line {
                    Some(Ok(line)) => {
                        idle_deadline = Instant::now() + read_timeout;
                        if dispatch_line(shared, &line) == Dispatch::Disconnect {
                            info!("disconnect requested by dispatched event");
                            return Ok(LoopExit::RemoteQuit);
                        }
                        if matches!(phase, Phase::AwaitingAuth { .. }) && shared.authed() {
                            shared.set_state(SessionState::Authenticated);
                            join_channels(shared);
                            phase = Phase::Active;
                        }
                    }
                    Some(Err(e)) => {
                        warn!(error = %e, "read failed");
                        return Err(e.into());
                    }
                    None => {
                        info!("server closed the connection");
                        return Ok(LoopExit::Closed);
                    }
                }
            }

            maybe_out = outbound_rx.recv() => {
                if let Some(line) = maybe_out {
                    debug!(line = %line, "send");
                    if let Err(e) = transport.send_line(line).await {
                        warn!(error = %e, "write failed");
                        return Err(e.into());
                    }
                }
            }

            _ = sleep_until(auth_deadline.unwrap_or_else(far_future)),
                    if auth_deadline.is_some() => {
                return Err(SessionError::AuthTimeout {
                    secs: shared.config.timeouts.auth,
                });
            }

            _ = sleep_until(idle_deadline) => {
                return Err(SessionError::IdleTimeout {
                    secs: shared.config.timeouts.read,
                });
            }

            _ = run_rx.changed() => {
                if !*run_rx.borrow() {
                    info!("stop requested");
                    drain_and_quit(shared, &mut transport, &mut outbound_rx).await;
                    return Ok(LoopExit::Stopped);
                }
            }
        }
    }
}

fn join_channels(shared: &Arc<Shared>) {
    shared.set_state(SessionState::Joining);
    for channel in &shared.config.channels {
        shared.send_raw(&format!("JOIN {channel}"));
    }
    shared.set_state(SessionState::Active);
}

/// Flush whatever is already queued, then say goodbye. Best-effort only;
/// the transport may already be gone.
async fn drain_and_quit(
    shared: &Arc<Shared>,
    transport: &mut Transport,
    outbound_rx: &mut mpsc::Receiver<String>,
) {
    while let Ok(line) = outbound_rx.try_recv() {
        if transport.send_line(line).await.is_err() {
            return;
        }
    }
    let message = shared
        .quit_message
        .read()
        .clone()
        .unwrap_or_else(|| DEFAULT_QUIT.to_string());
    let _ = transport.send_line(format!("QUIT :{message}")).await;
}

fn far_future() -> Instant {
    Instant::now() + Duration::from_secs(86_400)
}
