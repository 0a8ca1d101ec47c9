//! Contracts with the stages that run after a file is staged.
//!
//! Compression and moderation live outside this service; these traits are
//! the shape they are reached through, with in-process implementations for
//! single-node runs and tests.

use crate::models::StagedFile;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::VecDeque;
use std::path::PathBuf;
use thiserror::Error;
use tokio::sync::Mutex;

#[derive(Debug, Error)]
pub enum HandoffError {
    #[error("waiting list is full ({0} entries)")]
    WaitingListFull(usize),

    #[error("waiting list unavailable: {0}")]
    WaitingListUnavailable(String),

    #[error("compression failed: {0}")]
    Compression(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VerificationKind {
    Banner,
    Attachment,
}

/// What the moderation workflow receives, keyed by `file_id`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WaitingListEntry {
    pub kind: VerificationKind,
    pub file_id: String,
    pub group_id: Option<String>,
    pub original_filename: String,
    pub temp_filename: String,
    pub animated: bool,
    pub filesize: u64,
    pub mimetype: String,
    pub queued_at: DateTime<Utc>,
}

impl WaitingListEntry {
    pub fn new(kind: VerificationKind, file: &StagedFile, group_id: Option<String>) -> Self {
        Self {
            kind,
            file_id: file.file_id.clone(),
            group_id,
            original_filename: file.original_filename.clone(),
            temp_filename: file.temp_filename.clone(),
            animated: file.animated,
            filesize: file.filesize,
            mimetype: file.mimetype.clone(),
            queued_at: Utc::now(),
        }
    }
}

/// Queue of staged files awaiting verification
#[async_trait::async_trait]
pub trait WaitingList: Send + Sync {
    async fn add(&self, entry: WaitingListEntry) -> Result<(), HandoffError>;
}

/// Produces a compressed variant of a staged image
#[async_trait::async_trait]
pub trait ImageCompressor: Send + Sync {
    /// Returns the path of the derived file, or `None` if the original is
    /// used as-is.
    async fn compress(&self, file: &StagedFile) -> Result<Option<PathBuf>, HandoffError>;
}

/// Bounded in-process waiting list.
#[derive(Debug)]
pub struct MemoryWaitingList {
    entries: Mutex<VecDeque<WaitingListEntry>>,
    capacity: usize,
}

impl MemoryWaitingList {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: Mutex::new(VecDeque::new()),
            capacity,
        }
    }

    /// Removes and returns everything queued so far, oldest first.
    pub async fn drain(&self) -> Vec<WaitingListEntry> {
        self.entries.lock().await.drain(..).collect()
    }

    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.lock().await.is_empty()
    }
}

#[async_trait::async_trait]
impl WaitingList for MemoryWaitingList {
    async fn add(&self, entry: WaitingListEntry) -> Result<(), HandoffError> {
        let mut entries = self.entries.lock().await;
        if entries.len() >= self.capacity {
            return Err(HandoffError::WaitingListFull(self.capacity));
        }
        tracing::info!(
            "📝 Queued {:?} {} ({} bytes) for verification",
            entry.kind,
            entry.file_id,
            entry.filesize
        );
        entries.push_back(entry);
        Ok(())
    }
}

/// Leaves staged images untouched.
#[derive(Debug, Clone, Copy, Default)]
pub struct PassthroughCompressor;

#[async_trait::async_trait]
impl ImageCompressor for PassthroughCompressor {
    async fn compress(&self, _file: &StagedFile) -> Result<Option<PathBuf>, HandoffError> {
        Ok(None)
    }
}
