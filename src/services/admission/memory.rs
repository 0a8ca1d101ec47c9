use super::{AdmissionGate, AdmissionTicket, GateError, HeldSlot};
use crate::models::AdmissionKey;
use crate::utils::keyed_mutex::KeyedMutex;
use tokio::sync::OwnedMutexGuard;

/// Gate for single-process deployments and tests.
#[derive(Debug, Clone, Default)]
pub struct MemoryGate {
    locks: KeyedMutex,
}

impl MemoryGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether an upload for `key` is currently admitted.
    pub fn is_held(&self, key: &AdmissionKey) -> bool {
        self.locks.is_locked(key.as_str())
    }
}

struct MemorySlot {
    _guard: OwnedMutexGuard<()>,
}

#[async_trait::async_trait]
impl HeldSlot for MemorySlot {
    async fn release(self: Box<Self>) -> Result<(), GateError> {
        drop(self);
        Ok(())
    }
}

#[async_trait::async_trait]
impl AdmissionGate for MemoryGate {
    async fn acquire(&self, key: &AdmissionKey) -> Result<AdmissionTicket, GateError> {
        let guard = self.locks.lock(key.as_str()).await;
        Ok(AdmissionTicket::new(
            key.clone(),
            Box::new(MemorySlot { _guard: guard }),
        ))
    }

    async fn health_check(&self) -> bool {
        true
    }

    fn sweep(&self) -> usize {
        self.locks.sweep()
    }
}
