use crate::models::UploadState;
use crate::services::admission::AdmissionTicket;
use axum::{extract::Request, http::StatusCode, middleware::Next, response::Response};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio_util::sync::CancellationToken;

fn locked<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Everything a single upload request must undo if it ends badly.
///
/// Handlers register the admission ticket and every file they create here.
/// [`UploadScope::finish`] runs once per request, from whichever path ends it
/// first: the middleware after a response, or the drop guard when the client
/// goes away and the handler future is discarded.
#[derive(Debug, Default)]
pub struct UploadScope {
    cancel: CancellationToken,
    ticket: Mutex<Option<AdmissionTicket>>,
    files: Mutex<Vec<PathBuf>>,
    state: Mutex<Option<UploadState>>,
    finished: AtomicBool,
}

impl UploadScope {
    pub fn new() -> Self {
        Self::default()
    }

    /// Token cancelled when the request is abandoned.
    pub fn cancellation(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn is_finished(&self) -> bool {
        self.finished.load(Ordering::Acquire)
    }

    /// Keeps the ticket until the request ends. Hands it back if the request
    /// has already finished, in which case the caller must release it.
    pub fn hold(&self, ticket: AdmissionTicket) -> Result<(), AdmissionTicket> {
        let mut slot = locked(&self.ticket);
        if self.is_finished() {
            return Err(ticket);
        }
        *slot = Some(ticket);
        Ok(())
    }

    /// Releases the held ticket, if any. Safe to call repeatedly.
    pub async fn release_admission(&self) -> bool {
        let ticket = locked(&self.ticket).take();
        match ticket {
            Some(mut ticket) => ticket.release().await,
            None => false,
        }
    }

    pub fn holds_admission(&self) -> bool {
        locked(&self.ticket).is_some()
    }

    /// Registers a file for removal if the request fails.
    pub fn track_file(&self, path: PathBuf) {
        locked(&self.files).push(path);
    }

    pub fn tracked_files(&self) -> Vec<PathBuf> {
        locked(&self.files).clone()
    }

    pub fn transition(&self, next: UploadState) {
        let mut state = locked(&self.state);
        tracing::debug!(
            "Upload state {} -> {}",
            state.map(UploadState::as_str).unwrap_or("new"),
            next
        );
        *state = Some(next);
    }

    pub fn state(&self) -> Option<UploadState> {
        *locked(&self.state)
    }

    /// Moves to `HandedOff` or `Failed` depending on how the steps after
    /// staging went.
    pub fn record_handoff<T, E: std::fmt::Display>(&self, outcome: &Result<T, E>) {
        match outcome {
            Ok(_) => self.transition(UploadState::HandedOff),
            Err(e) => {
                tracing::warn!("Handoff of staged upload failed: {}", e);
                self.transition(UploadState::Failed);
            }
        }
    }

    /// Ends the request. `status` is `None` when the connection closed
    /// before a response was produced.
    ///
    /// Releases admission, and for a missing or error status cancels any
    /// in-flight staging and deletes every tracked file. Returns `false` if
    /// the request had already been finished.
    pub async fn finish(&self, status: Option<StatusCode>) -> bool {
        if self.finished.swap(true, Ordering::AcqRel) {
            return false;
        }

        self.release_admission().await;

        if is_failure(status) {
            self.cancel.cancel();
            let files = std::mem::take(&mut *locked(&self.files));
            for path in &files {
                remove_quietly(path).await;
            }
            self.log_failure(status, files.len());
        }
        true
    }

    /// Variant for drop paths, where nothing can be awaited. The async
    /// cleanup is spawned on the current runtime; without one, the ticket is
    /// dropped and files are removed in place.
    fn finish_abandoned(&self) {
        if self.finished.swap(true, Ordering::AcqRel) {
            return;
        }

        self.cancel.cancel();
        let ticket = locked(&self.ticket).take();
        let files = std::mem::take(&mut *locked(&self.files));
        self.log_failure(None, files.len());

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if let Some(mut ticket) = ticket {
                        ticket.release().await;
                    }
                    for path in &files {
                        remove_quietly(path).await;
                    }
                });
            }
            Err(_) => {
                // Dropping the ticket frees its slot.
                drop(ticket);
                for path in &files {
                    if let Err(e) = std::fs::remove_file(path) {
                        if e.kind() != std::io::ErrorKind::NotFound {
                            tracing::debug!("Could not remove {}: {}", path.display(), e);
                        }
                    }
                }
            }
        }
    }

    fn log_failure(&self, status: Option<StatusCode>, removed: usize) {
        match status {
            Some(status) => tracing::info!(
                "🧹 Upload ended with {} in state {}, removed {} staged file(s)",
                status,
                self.state().map(UploadState::as_str).unwrap_or("new"),
                removed
            ),
            None => tracing::info!(
                "🧹 Client went away in state {}, removed {} staged file(s)",
                self.state().map(UploadState::as_str).unwrap_or("new"),
                removed
            ),
        }
    }
}

fn is_failure(status: Option<StatusCode>) -> bool {
    status.is_none_or(|s| s.as_u16() >= 400)
}

async fn remove_quietly(path: &std::path::Path) {
    if let Err(e) = tokio::fs::remove_file(path).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            tracing::debug!("Could not remove {}: {}", path.display(), e);
        }
    }
}

/// Finishes the scope as abandoned if the request future is dropped.
struct FinishOnDrop {
    scope: Arc<UploadScope>,
}

impl Drop for FinishOnDrop {
    fn drop(&mut self) {
        if !self.scope.is_finished() {
            self.scope.finish_abandoned();
        }
    }
}

/// Attaches an [`UploadScope`] to the request and settles it once the
/// response status is known, or when the client disconnects.
pub async fn abort_monitor(mut req: Request, next: Next) -> Response {
    let scope = Arc::new(UploadScope::new());
    req.extensions_mut().insert(scope.clone());
    let _guard = FinishOnDrop {
        scope: scope.clone(),
    };

    let response = next.run(req).await;
    scope.finish(Some(response.status())).await;
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::AdmissionKey;
    use crate::services::admission::{AdmissionGate, MemoryGate};
    use std::time::Duration;

    async fn scope_with_file(dir: &std::path::Path) -> (UploadScope, PathBuf) {
        let scope = UploadScope::new();
        let path = dir.join("staged.png");
        std::fs::write(&path, b"data").unwrap();
        scope.track_file(path.clone());
        (scope, path)
    }

    #[tokio::test]
    async fn test_success_keeps_files_and_releases_ticket() {
        let dir = tempfile::tempdir().unwrap();
        let gate = MemoryGate::new();
        let key = AdmissionKey::new("10.1.1.1");
        let (scope, path) = scope_with_file(dir.path()).await;
        scope.hold(gate.acquire(&key).await.unwrap()).unwrap();

        assert!(scope.finish(Some(StatusCode::OK)).await);
        assert!(path.exists());
        assert!(!gate.is_held(&key));
        assert!(!scope.cancellation().is_cancelled());
    }

    #[tokio::test]
    async fn test_error_status_removes_files() {
        let dir = tempfile::tempdir().unwrap();
        let (scope, path) = scope_with_file(dir.path()).await;
        scope.track_file(dir.path().join("never-created.webp"));

        assert!(scope.finish(Some(StatusCode::FORBIDDEN)).await);
        assert!(!path.exists());
        assert!(scope.cancellation().is_cancelled());
    }

    #[tokio::test]
    async fn test_finish_runs_once() {
        let dir = tempfile::tempdir().unwrap();
        let (scope, path) = scope_with_file(dir.path()).await;

        assert!(scope.finish(Some(StatusCode::OK)).await);
        assert!(!scope.finish(None).await);
        assert!(path.exists(), "a late abort must not undo a finished request");
    }

    #[tokio::test]
    async fn test_hold_after_finish_hands_ticket_back() {
        let gate = MemoryGate::new();
        let key = AdmissionKey::new("late");
        let scope = UploadScope::new();
        scope.finish(None).await;

        let ticket = gate.acquire(&key).await.unwrap();
        let mut returned = scope.hold(ticket).unwrap_err();
        assert!(returned.release().await);
        assert!(!gate.is_held(&key));
    }

    #[tokio::test]
    async fn test_dropped_guard_cleans_up() {
        let dir = tempfile::tempdir().unwrap();
        let gate = MemoryGate::new();
        let key = AdmissionKey::new("gone");
        let scope = Arc::new(UploadScope::new());
        let path = dir.path().join("half.jpg");
        std::fs::write(&path, b"half").unwrap();
        scope.track_file(path.clone());
        scope.hold(gate.acquire(&key).await.unwrap()).unwrap();

        drop(FinishOnDrop {
            scope: scope.clone(),
        });

        assert!(scope.is_finished());
        assert!(scope.cancellation().is_cancelled());
        let next = tokio::time::timeout(Duration::from_secs(1), gate.acquire(&key)).await;
        assert!(next.is_ok());

        tokio::time::timeout(Duration::from_secs(1), async {
            while path.exists() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("abandoned file was not removed");
    }

    #[test]
    fn test_dropped_guard_without_runtime_cleans_up_in_place() {
        let dir = tempfile::tempdir().unwrap();
        let gate = MemoryGate::new();
        let key = AdmissionKey::new("no-runtime");
        let scope = Arc::new(UploadScope::new());
        let path = dir.path().join("half.png");
        std::fs::write(&path, b"half").unwrap();
        scope.track_file(path.clone());
        let ticket = futures::executor::block_on(gate.acquire(&key)).unwrap();
        scope.hold(ticket).unwrap();

        drop(FinishOnDrop {
            scope: scope.clone(),
        });

        assert!(!path.exists());
        assert!(!gate.is_held(&key));
    }

    #[test]
    fn test_record_handoff_marks_outcome() {
        let scope = UploadScope::new();
        scope.transition(UploadState::Classified);

        scope.record_handoff(&Err::<(), _>("waiting list is full"));
        assert_eq!(scope.state(), Some(UploadState::Failed));

        scope.record_handoff(&Ok::<_, String>(()));
        assert_eq!(scope.state(), Some(UploadState::HandedOff));
    }
}
