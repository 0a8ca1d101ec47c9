use crate::api::error::UploadError;
use crate::api::middleware::abort_monitor::UploadScope;
use crate::config::UploadConfig;
use crate::models::{AdmissionKey, StagedFile, UploadMode, UploadState};
use crate::services::admission::{AdmissionGate, GateError};
use crate::services::staging::{StageError, StagingWriter};
use crate::utils::validation::{extension_of, is_image_mime, safe_filename};
use axum::extract::Multipart;
use axum::http::StatusCode;
use futures::TryStreamExt;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

/// Admits, streams, stages and classifies one upload per request.
pub struct UploadPipeline {
    gate: Arc<dyn AdmissionGate>,
    writer: StagingWriter,
    image_max_body_length: u64,
    admission_timeout: Duration,
}

impl UploadPipeline {
    pub fn new(gate: Arc<dyn AdmissionGate>, config: &UploadConfig) -> Self {
        Self {
            gate,
            writer: StagingWriter::new(config.temp_dir.clone(), config.pipe_capacity),
            image_max_body_length: config.image_max_body_length as u64,
            admission_timeout: config.admission_timeout,
        }
    }

    pub fn gate(&self) -> &Arc<dyn AdmissionGate> {
        &self.gate
    }

    /// Runs the request's upload through admission and staging.
    ///
    /// Admission is released before this returns on every path; the scope's
    /// abort monitor releases it again (harmlessly) when the request ends.
    /// `Ok(None)` means the form carried only an empty file input.
    pub async fn run(
        &self,
        scope: &UploadScope,
        key: &AdmissionKey,
        multipart: Multipart,
        mode: UploadMode,
    ) -> Result<Option<StagedFile>, UploadError> {
        let outcome = self.admit_and_stage(scope, key, multipart, mode).await;
        scope.release_admission().await;

        if let Err(e) = &outcome {
            let terminal = if matches!(e, UploadError::InvalidImageMime) {
                UploadState::Rejected
            } else {
                UploadState::Failed
            };
            scope.transition(terminal);
            tracing::warn!("Upload from {} ended in {}: {}", key, terminal, e);
        }
        outcome
    }

    async fn admit_and_stage(
        &self,
        scope: &UploadScope,
        key: &AdmissionKey,
        mut multipart: Multipart,
        mode: UploadMode,
    ) -> Result<Option<StagedFile>, UploadError> {
        scope.transition(UploadState::Admitting);
        let ticket = tokio::time::timeout(self.admission_timeout, self.gate.acquire(key))
            .await
            .map_err(|_| GateError::WaitTimedOut(self.admission_timeout))??;

        // Only a scope finished by someone other than the middleware lands
        // here. A client that leaves while queued drops this future instead.
        if let Err(mut ticket) = scope.hold(ticket) {
            ticket.release().await;
            return Err(UploadError::ClientClosed);
        }
        tracing::debug!("Admitted upload from {}", key);

        scope.transition(UploadState::Streaming);
        let mut files_seen = 0usize;
        let mut staged = None;

        while let Some(field) = multipart
            .next_field()
            .await
            .map_err(UploadError::from_multipart)?
        {
            let Some(declared_name) = field.file_name().map(str::to_owned) else {
                return Err(UploadError::FieldsLimitReached);
            };
            files_seen += 1;
            if files_seen > 1 {
                return Err(UploadError::FilesLimitReached);
            }
            if declared_name.is_empty() {
                // Empty file input; the field is skipped by the next read.
                continue;
            }

            let mimetype = field
                .content_type()
                .map(str::to_owned)
                .unwrap_or_else(|| mime::APPLICATION_OCTET_STREAM.to_string());
            let is_image = is_image_mime(&mimetype);
            if mode == UploadMode::ImageOnly && !is_image {
                // Returning drops the body unread, which ends the transfer.
                return Err(UploadError::InvalidImageMime);
            }

            let file_id = Uuid::new_v4().simple().to_string();
            let temp_filename = format!("{}{}", file_id, extension_of(&declared_name));
            let temp_path = self.writer.path_for(&temp_filename);
            scope.track_file(temp_path.clone());

            let body = field.map_err(stage_error);
            let filesize = self
                .writer
                .stage(&temp_path, body, scope.cancellation())
                .await?;
            scope.transition(UploadState::Staged);

            staged = Some(StagedFile {
                file_id,
                temp_filename,
                temp_path,
                original_filename: safe_filename(&declared_name),
                mimetype,
                filesize,
                animated: false,
                should_compress: is_image && filesize <= self.image_max_body_length,
                compressed_path: None,
            });
            scope.transition(UploadState::Classified);
        }

        Ok(staged)
    }
}

fn stage_error(e: axum::extract::multipart::MultipartError) -> StageError {
    if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
        StageError::TooLarge
    } else {
        StageError::Upstream(e.body_text())
    }
}
