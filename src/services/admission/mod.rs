//! Per-key admission gate.
//!
//! At most one upload per [`AdmissionKey`] is past admission at any time;
//! later requests for the same key queue in arrival order. Distinct keys are
//! independent.

mod memory;
mod postgres;

pub use memory::MemoryGate;
pub use postgres::PostgresGate;

use crate::models::AdmissionKey;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum GateError {
    #[error("admission broker unreachable: {0}")]
    Unavailable(String),

    #[error("gave up waiting for admission after {0:?}")]
    WaitTimedOut(Duration),

    #[error("failed to release admission slot: {0}")]
    Release(String),
}

/// Backend-specific hold on a key. Dropping it without calling
/// [`HeldSlot::release`] must still free the key.
#[async_trait::async_trait]
pub trait HeldSlot: Send + Sync {
    async fn release(self: Box<Self>) -> Result<(), GateError>;
}

/// Trait for admission gate implementations
#[async_trait::async_trait]
pub trait AdmissionGate: Send + Sync {
    /// Waits until no other request holds `key`, then holds it.
    async fn acquire(&self, key: &AdmissionKey) -> Result<AdmissionTicket, GateError>;

    /// Check if the backing broker is reachable
    async fn health_check(&self) -> bool;

    /// Evict idle per-key state. Returns the number of entries dropped.
    fn sweep(&self) -> usize {
        0
    }
}

/// Handle on an admitted request's slot.
///
/// `release` may be called any number of times; only the first call frees the
/// slot. A ticket dropped while still held frees its slot as well.
pub struct AdmissionTicket {
    key: AdmissionKey,
    slot: Option<Box<dyn HeldSlot>>,
}

impl AdmissionTicket {
    pub fn new(key: AdmissionKey, slot: Box<dyn HeldSlot>) -> Self {
        Self {
            key,
            slot: Some(slot),
        }
    }

    pub fn key(&self) -> &AdmissionKey {
        &self.key
    }

    pub fn is_held(&self) -> bool {
        self.slot.is_some()
    }

    /// Frees the slot. Returns `true` only for the call that released it.
    pub async fn release(&mut self) -> bool {
        let Some(slot) = self.slot.take() else {
            return false;
        };

        if let Err(e) = slot.release().await {
            // The slot's drop path has already freed the key at this point.
            tracing::warn!("Admission release for {} was not clean: {}", self.key, e);
        }
        tracing::debug!("Admission released for {}", self.key);
        true
    }
}

impl std::fmt::Debug for AdmissionTicket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdmissionTicket")
            .field("key", &self.key)
            .field("held", &self.is_held())
            .finish()
    }
}
