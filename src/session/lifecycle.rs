//! Connection supervision.
//!
//! The supervisor owns the transport for the whole connect/retry cycle:
//! connect with a bounded timeout, hand the stream to the event loop, tear
//! down per-connection state afterwards, and wait out the backoff before
//! the next attempt, indefinitely, until the stop flag is set.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{Instrument, info, warn};

use crate::telemetry::spans;
use crate::transport::Transport;

use super::event_loop::{LoopExit, run_connection};
use super::state::{SessionState, Shared};

const OUTBOUND_QUEUE: usize = 512;

pub(crate) async fn supervise(shared: Arc<Shared>) {
    let mut attempt: u32 = 0;

    while shared.should_run() {
        let cycle = connection_cycle(&shared, attempt)
            .instrument(spans::connection(&shared.config.server, attempt));
        match cycle.await {
            CycleOutcome::Stopped => break,
            CycleOutcome::Ended => attempt = 0,
            CycleOutcome::Failed => attempt += 1,
        }

        if shared.should_run() {
            wait_backoff(&shared, attempt).await;
        }
    }

    shared.set_state(SessionState::Disconnected);
    info!("session supervisor finished");
}

enum CycleOutcome {
    /// Stop flag observed; no further cycles.
    Stopped,
    /// The connection was established and later ended; backoff restarts.
    Ended,
    /// The attempt failed outright; backoff grows.
    Failed,
}

async fn connection_cycle(shared: &Arc<Shared>, attempt: u32) -> CycleOutcome {
    let config = &shared.config;
    shared.set_state(SessionState::Connecting);
    info!(
        server = %config.server,
        port = config.port,
        tls = config.tls,
        "connecting"
    );

    let transport = match Transport::connect(
        &config.server,
        config.port,
        config.tls,
        config.timeouts.connect(),
    )
    .await
    {
        Ok(transport) => transport,
        Err(e) => {
            warn!(error = %e, attempt, "connection attempt failed");
            shared.set_state(SessionState::Disconnected);
            return CycleOutcome::Failed;
        }
    };

    shared.set_state(SessionState::Connected);
    let (tx, rx) = mpsc::channel(OUTBOUND_QUEUE);
    shared.install_outbound(tx);

    let result = run_connection(shared, transport, rx).await;

    shared.set_state(SessionState::Disconnecting);
    shared.clear_connection();
    shared.set_state(SessionState::Disconnected);

    match result {
        Ok(LoopExit::Stopped) => CycleOutcome::Stopped,
        Ok(LoopExit::Closed) => {
            info!("connection ended by server");
            CycleOutcome::Ended
        }
        Ok(LoopExit::RemoteQuit) => {
            info!("connection ended after quit");
            CycleOutcome::Ended
        }
        Err(e) => {
            warn!(error = %e, "connection failed");
            CycleOutcome::Failed
        }
    }
}

/// Sleep out the retry delay, waking early if the stop flag flips.
async fn wait_backoff(shared: &Arc<Shared>, attempt: u32) {
    let delay = shared.config.retry.delay(attempt.saturating_sub(1));
    info!(seconds = delay.as_secs(), "waiting before reconnect");

    let mut run_rx = shared.run_rx();
    tokio::select! {
        _ = tokio::time::sleep(delay) => {}
        _ = run_rx.changed() => {}
    }
}
