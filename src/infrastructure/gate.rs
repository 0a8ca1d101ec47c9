use crate::config::{AdmissionBackend, UploadConfig};
use crate::services::admission::{AdmissionGate, MemoryGate, PostgresGate};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// How long an acquisition waits for a broker connection before failing.
const BROKER_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

pub async fn setup_gate(config: &UploadConfig) -> anyhow::Result<Arc<dyn AdmissionGate>> {
    let gate: Arc<dyn AdmissionGate> = match &config.admission_backend {
        AdmissionBackend::Memory => {
            info!("🚦 Using in-memory admission gate (single process only)");
            Arc::new(MemoryGate::new())
        }
        AdmissionBackend::Postgres { url } => {
            info!("🚦 Using postgres admission gate");
            Arc::new(PostgresGate::connect_lazy(
                url,
                config.admission_pool_size,
                BROKER_CONNECT_TIMEOUT,
            )?)
        }
    };

    // Warm up broker connection
    if gate.health_check().await {
        info!("🚦 Admission gate ready");
    } else {
        tracing::warn!(
            "⚠️  Admission broker unreachable! Uploads will be refused until it comes back."
        );
    }

    Ok(gate)
}
