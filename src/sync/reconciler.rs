use super::engine::SyncEngine;
use crate::core::{Result, SyncError};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{Level, event};

/// Background reconciler: runs a tick on every interval and on every
/// connectivity notification. At most one notification is queued; extra ones are
/// dropped, and the engine itself skips a tick that overlaps a running one.
pub struct ReconcilerHandle {
    trigger_tx: mpsc::Sender<()>,
    stop_tx: Option<oneshot::Sender<()>>,
    join_handle: Option<JoinHandle<()>>,
}

impl ReconcilerHandle {
    /// Requests an immediate tick, e.g. when the host regains connectivity.
    ///
    /// Returns `false` when a request is already pending.
    pub fn notify_online(&self) -> bool {
        self.trigger_tx.try_send(()).is_ok()
    }

    /// Signals the worker to stop and waits for the current tick to finish.
    pub async fn stop(mut self) -> Result<()> {
        if let Some(stop_tx) = self.stop_tx.take() {
            let _ = stop_tx.send(());
        }
        if let Some(join_handle) = self.join_handle.take() {
            join_handle
                .await
                .map_err(|err| SyncError::LockError(format!("reconciler join: {}", err)))?;
        }
        Ok(())
    }
}

impl Drop for ReconcilerHandle {
    fn drop(&mut self) {
        if let Some(stop_tx) = self.stop_tx.take() {
            let _ = stop_tx.send(());
        }
        if let Some(join_handle) = self.join_handle.take() {
            join_handle.abort();
        }
    }
}

/// Spawns the reconciler on the current tokio runtime. The first tick runs
/// immediately.
pub fn spawn_reconciler(engine: Arc<SyncEngine>) -> ReconcilerHandle {
    let period = engine.config().tick_interval.max(Duration::from_millis(10));
    let (stop_tx, mut stop_rx) = oneshot::channel::<()>();
    let (trigger_tx, mut trigger_rx) = mpsc::channel::<()>(1);

    let join_handle = tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        event!(Level::INFO, period_ms = period.as_millis() as u64, "reconciler started");

        loop {
            let trigger = tokio::select! {
                _ = &mut stop_rx => break,
                _ = interval.tick() => "interval",
                Some(()) = trigger_rx.recv() => "online",
            };
            let outcome = engine.tick().await;
            if outcome.is_skipped() {
                event!(Level::DEBUG, trigger, "tick skipped");
            }
        }
        event!(Level::INFO, "reconciler stopped");
    });

    ReconcilerHandle {
        trigger_tx,
        stop_tx: Some(stop_tx),
        join_handle: Some(join_handle),
    }
}
