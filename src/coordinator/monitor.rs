//! Background liveness and maintenance task
//!
//! Runs [`ControlPlane::run_maintenance`] every `sweep_interval` until told to
//! stop through a watch channel. Dropping the monitor aborts the task.

use crate::coordinator::control::ControlPlane;
use crate::coordinator::transport::ShardTransport;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;

pub struct LivenessMonitor {
    shutdown_tx: watch::Sender<bool>,
    handle: Option<JoinHandle<()>>,
}

impl LivenessMonitor {
    pub fn start<T: ShardTransport>(plane: Arc<ControlPlane<T>>) -> Self {
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let period = plane.config().sweep_interval();

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // The first tick fires immediately
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = shutdown_rx.changed() => break,
                    _ = ticker.tick() => {
                        let report = plane.run_maintenance().await;
                        if !report.transitions.is_empty() || report.files_expired > 0 {
                            tracing::debug!(
                                "Maintenance: {} transitions, {} evictions handled, {} files expired",
                                report.transitions.len(),
                                report.redistributions.len(),
                                report.files_expired
                            );
                        }
                    }
                }
            }
            tracing::info!("Liveness monitor stopped");
        });

        tracing::info!("Liveness monitor started (every {:?})", period);
        Self {
            shutdown_tx,
            handle: Some(handle),
        }
    }

    /// Stop the task and wait for the pass in progress to finish.
    pub async fn shutdown(mut self) {
        let _ = self.shutdown_tx.send(true);
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
    }
}

impl Drop for LivenessMonitor {
    fn drop(&mut self) {
        let _ = self.shutdown_tx.send(true);
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}
