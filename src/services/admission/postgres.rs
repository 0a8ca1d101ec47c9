use super::{AdmissionGate, AdmissionTicket, GateError, HeldSlot};
use crate::models::AdmissionKey;
use crate::utils::keyed_mutex::KeyedMutex;
use sqlx::pool::PoolConnection;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::Postgres;
use std::time::Duration;
use tokio::sync::OwnedMutexGuard;

const LOCK_SQL: &str = "SELECT pg_advisory_lock(hashtextextended($1, 0))";
const UNLOCK_SQL: &str = "SELECT pg_advisory_unlock(hashtextextended($1, 0))";

/// Gate shared by every replica that points at the same database.
///
/// Same-key requests first queue on an in-process [`KeyedMutex`], so a
/// replica has at most one session per key inside Postgres. That session
/// pins a pooled connection holding a session-level advisory lock; Postgres
/// grants waiters on the same lock in the order they asked, which gives FIFO
/// per key across processes. A busy key therefore costs one connection per
/// replica, not one per queued request.
#[derive(Debug, Clone)]
pub struct PostgresGate {
    pool: PgPool,
    namespace: String,
    local: KeyedMutex,
}

impl PostgresGate {
    /// Builds the pool lazily so the server can start while the database is
    /// down; acquisitions then fail after `connect_timeout` instead of hanging.
    pub fn connect_lazy(
        url: &str,
        max_connections: u32,
        connect_timeout: Duration,
    ) -> Result<Self, GateError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(connect_timeout)
            .connect_lazy(url)
            .map_err(|e| GateError::Unavailable(e.to_string()))?;

        Ok(Self::with_pool(pool))
    }

    pub fn with_pool(pool: PgPool) -> Self {
        Self {
            pool,
            namespace: "upload".to_string(),
            local: KeyedMutex::new(),
        }
    }

    /// Separates this gate's locks from other users of the same database.
    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    fn lock_name(&self, key: &AdmissionKey) -> String {
        format!("{}:{}", self.namespace, key)
    }
}

/// A pooled session holding (or waiting for) an advisory lock.
///
/// If it is dropped with the connection still inside, whether the lock was
/// granted is unknown, so the session is detached from the pool and closed;
/// the server frees session locks when the connection goes away.
/// The key's in-process queue position is given up with the slot.
struct PgSlot {
    conn: Option<PoolConnection<Postgres>>,
    lock_name: String,
    _local: OwnedMutexGuard<()>,
}

impl Drop for PgSlot {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            tracing::warn!(
                "Closing admission session for {} without a clean unlock",
                self.lock_name
            );
            drop(conn.detach());
        }
    }
}

#[async_trait::async_trait]
impl HeldSlot for PgSlot {
    async fn release(self: Box<Self>) -> Result<(), GateError> {
        let mut slot = self;
        let Some(conn) = slot.conn.as_deref_mut() else {
            return Ok(());
        };

        let unlocked: bool = sqlx::query_scalar(UNLOCK_SQL)
            .bind(&slot.lock_name)
            .fetch_one(conn)
            .await
            .map_err(|e| GateError::Release(e.to_string()))?;

        if !unlocked {
            return Err(GateError::Release(format!(
                "lock {} was not held by this session",
                slot.lock_name
            )));
        }

        // Clean unlock: the connection can go back to the pool.
        slot.conn.take();
        Ok(())
    }
}

#[async_trait::async_trait]
impl AdmissionGate for PostgresGate {
    async fn acquire(&self, key: &AdmissionKey) -> Result<AdmissionTicket, GateError> {
        let local = self.local.lock(key.as_str()).await;
        let conn = self
            .pool
            .acquire()
            .await
            .map_err(|e| GateError::Unavailable(e.to_string()))?;

        let mut slot = PgSlot {
            conn: Some(conn),
            lock_name: self.lock_name(key),
            _local: local,
        };

        if let Some(conn) = slot.conn.as_deref_mut() {
            sqlx::query(LOCK_SQL)
                .bind(&slot.lock_name)
                .execute(conn)
                .await
                .map_err(|e| GateError::Unavailable(e.to_string()))?;
        }

        Ok(AdmissionTicket::new(key.clone(), Box::new(slot)))
    }

    async fn health_check(&self) -> bool {
        sqlx::query("SELECT 1").execute(&self.pool).await.is_ok()
    }

    fn sweep(&self) -> usize {
        self.local.sweep()
    }
}
