use bytes::Bytes;
use futures::{Stream, StreamExt};
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Error)]
pub enum StageError {
    #[error("failed to create temp file {path}: {source}")]
    Create { path: PathBuf, source: io::Error },

    #[error("upload stream failed: {0}")]
    Upstream(String),

    #[error("request body exceeded the configured limit")]
    TooLarge,

    #[error("failed to write temp file: {0}")]
    Write(#[source] io::Error),

    #[error("upload cancelled")]
    Cancelled,
}

enum PipeMessage {
    Chunk(Bytes),
    Finish,
}

/// Streams an upload into `<temp_dir>/<name>` through a bounded pipe.
///
/// The network side and the disk side run as separate tasks joined by a
/// channel of `capacity` chunks; the reader suspends while the writer is
/// behind, so a slow disk throttles the client instead of filling memory.
#[derive(Debug, Clone)]
pub struct StagingWriter {
    temp_dir: PathBuf,
    capacity: usize,
}

impl StagingWriter {
    pub fn new(temp_dir: impl Into<PathBuf>, capacity: usize) -> Self {
        Self {
            temp_dir: temp_dir.into(),
            capacity: capacity.max(1),
        }
    }

    pub fn temp_dir(&self) -> &Path {
        &self.temp_dir
    }

    pub fn path_for(&self, temp_filename: &str) -> PathBuf {
        self.temp_dir.join(temp_filename)
    }

    /// Writes `body` to `target` and returns the size on disk.
    ///
    /// The file is created before the first byte is read, so callers that
    /// registered `target` for cleanup can always remove a partial write.
    pub async fn stage<S>(
        &self,
        target: &Path,
        body: S,
        cancel: CancellationToken,
    ) -> Result<u64, StageError>
    where
        S: Stream<Item = Result<Bytes, StageError>>,
    {
        let file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(target)
            .await
            .map_err(|source| StageError::Create {
                path: target.to_path_buf(),
                source,
            })?;

        let (tx, rx) = mpsc::channel(self.capacity);
        let writer = tokio::spawn(write_chunks(file, rx, cancel.clone()));

        let forwarded = forward_chunks(body, &tx, &cancel).await;
        if forwarded.is_ok() {
            // A closed channel here means the writer already failed; its
            // result below carries the cause.
            let _ = tx.send(PipeMessage::Finish).await;
        }
        drop(tx);

        let written = writer
            .await
            .map_err(|e| StageError::Write(io::Error::other(e)))?;

        // The body error is the root cause when both sides failed.
        forwarded?;
        written?;

        let size = tokio::fs::metadata(target)
            .await
            .map_err(StageError::Write)?
            .len();

        tracing::debug!("Staged {} bytes to {}", size, target.display());
        Ok(size)
    }
}

async fn forward_chunks<S>(
    body: S,
    tx: &mpsc::Sender<PipeMessage>,
    cancel: &CancellationToken,
) -> Result<(), StageError>
where
    S: Stream<Item = Result<Bytes, StageError>>,
{
    let mut body = std::pin::pin!(body);

    loop {
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(StageError::Cancelled),
            next = body.next() => next,
        };

        let Some(chunk) = next else {
            return Ok(());
        };
        let chunk = chunk?;
        if chunk.is_empty() {
            continue;
        }

        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(StageError::Cancelled),
            sent = tx.send(PipeMessage::Chunk(chunk)) => {
                if sent.is_err() {
                    return Ok(());
                }
            }
        }
    }
}

async fn write_chunks(
    file: File,
    mut rx: mpsc::Receiver<PipeMessage>,
    cancel: CancellationToken,
) -> Result<(), StageError> {
    let mut out = BufWriter::new(file);

    loop {
        let message = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(StageError::Cancelled),
            message = rx.recv() => message,
        };

        match message {
            Some(PipeMessage::Chunk(bytes)) => {
                out.write_all(&bytes).await.map_err(StageError::Write)?
            }
            Some(PipeMessage::Finish) => break,
            None => {
                return Err(StageError::Upstream(
                    "stream ended before the upload completed".to_string(),
                ));
            }
        }
    }

    out.flush().await.map_err(StageError::Write)?;
    Ok(())
}
