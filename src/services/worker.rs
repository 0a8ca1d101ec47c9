use crate::services::admission::AdmissionGate;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::time::{Duration, sleep};

/// Periodically evicts per-key gate state nobody is using.
pub struct GateSweeper {
    gate: Arc<dyn AdmissionGate>,
    interval: Duration,
    shutdown: watch::Receiver<bool>,
}

impl GateSweeper {
    pub fn new(
        gate: Arc<dyn AdmissionGate>,
        interval: Duration,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            gate,
            interval,
            shutdown,
        }
    }

    pub async fn run(mut self) {
        tracing::info!("🚀 Gate sweeper started");

        loop {
            tokio::select! {
                _ = self.shutdown.changed() => {
                    tracing::info!("🛑 Gate sweeper shutting down");
                    break;
                }
                _ = sleep(self.interval) => {
                    let evicted = self.gate.sweep();
                    if evicted > 0 {
                        tracing::debug!("🧹 Evicted {} idle admission keys", evicted);
                    }
                }
            }
        }
    }
}
