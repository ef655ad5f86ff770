//! Async driver for a [`DeviceSession`].
//!
//! One task owns ordering: inbound inputs, the fast health sweep and the
//! slow maintenance timer are multiplexed with `select!`, each handled to
//! completion under the session lock before the next is polled.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tokio::time::{Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::command::SessionInput;
use crate::error::SessionError;
use crate::session::DeviceSession;

/// Inputs that may be queued before senders wait.
pub const INPUT_QUEUE_CAPACITY: usize = 1024;

/// Handle to a running session task.
pub struct SessionDriver {
    session: Arc<Mutex<DeviceSession>>,
    tx: mpsc::Sender<SessionInput>,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl SessionDriver {
    /// Spawn the driver task on the current tokio runtime. The session
    /// comes from [`DeviceSession::new`], so its timer periods are non-zero.
    pub fn spawn(session: DeviceSession) -> Self {
        let sweep = session.config().sweep_interval();
        let cleanup = session.config().cleanup_interval();
        let session = Arc::new(Mutex::new(session));
        let (tx, rx) = mpsc::channel(INPUT_QUEUE_CAPACITY);
        let cancel = CancellationToken::new();

        let task = tokio::spawn(run(
            Arc::clone(&session),
            rx,
            sweep,
            cleanup,
            cancel.clone(),
        ));
        tracing::info!(
            sweep_ms = sweep.as_millis() as u64,
            cleanup_ms = cleanup.as_millis() as u64,
            "session driver started"
        );

        Self {
            session,
            tx,
            cancel,
            task,
        }
    }

    /// A sender for the transport layer and operator surface.
    pub fn sender(&self) -> mpsc::Sender<SessionInput> {
        self.tx.clone()
    }

    /// Queue one input.
    pub async fn send(&self, input: impl Into<SessionInput>) -> Result<(), SessionError> {
        self.tx
            .send(input.into())
            .await
            .map_err(|_| SessionError::DriverStopped)
    }

    /// Shared session for on-demand queries.
    pub fn session(&self) -> Arc<Mutex<DeviceSession>> {
        Arc::clone(&self.session)
    }

    /// Close this handle's sender and wait until the task has applied every
    /// queued input, then hand back the session.
    ///
    /// Other senders from [`sender`](Self::sender) must be dropped first,
    /// or this waits for them.
    pub async fn finish(self) -> Arc<Mutex<DeviceSession>> {
        let Self {
            session,
            tx,
            cancel: _,
            task,
        } = self;
        drop(tx);
        if let Err(e) = task.await {
            tracing::warn!(error = %e, "session driver task failed");
        }
        tracing::info!("session driver finished");
        session
    }

    /// Stop the task and wait for it to finish. Inputs still queued are
    /// discarded.
    pub async fn shutdown(self) {
        self.cancel.cancel();
        if let Err(e) = self.task.await {
            tracing::warn!(error = %e, "session driver task failed");
        }
        tracing::info!("session driver stopped");
    }
}

fn ticker(period: Duration) -> Interval {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker
}

/// Host time for the session. Follows tokio's clock so a paused test
/// runtime controls it.
fn now() -> std::time::Instant {
    tokio::time::Instant::now().into_std()
}

async fn run(
    session: Arc<Mutex<DeviceSession>>,
    mut rx: mpsc::Receiver<SessionInput>,
    sweep: Duration,
    cleanup: Duration,
    cancel: CancellationToken,
) {
    let mut sweep_ticker = ticker(sweep);
    let mut cleanup_ticker = ticker(cleanup);
    // Skip the immediate first ticks.
    sweep_ticker.tick().await;
    cleanup_ticker.tick().await;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            input = rx.recv() => {
                let Some(input) = input else { break };
                let device = input.device_id().map(str::to_owned);
                let mut guard = session.lock().await;
                if let Err(e) = guard.handle_input_at(input, now()) {
                    tracing::warn!(device = device.as_deref(), error = %e, "input rejected");
                }
            }
            _ = sweep_ticker.tick() => {
                session.lock().await.health_tick_at(now());
            }
            _ = cleanup_ticker.tick() => {
                let report = session.lock().await.maintenance_tick_at(now());
                if !report.removed.is_empty() || report.expired > 0 || report.evicted > 0 {
                    tracing::info!(
                        removed = report.removed.len(),
                        expired = report.expired,
                        evicted = report.evicted,
                        "maintenance pass"
                    );
                }
            }
        }
    }
}
