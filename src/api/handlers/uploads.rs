use crate::AppState;
use crate::api::error::UploadError;
use crate::api::middleware::abort_monitor::UploadScope;
use crate::models::{AdmissionKey, StagedFile, UploadMode};
use crate::services::handoff::{VerificationKind, WaitingListEntry};
use axum::{
    Extension, Json,
    extract::{Multipart, State, multipart::MultipartRejection},
};
use std::sync::Arc;

#[utoipa::path(
    post,
    path = "/uploads",
    request_body(content = String, description = "Single-file multipart form", content_type = "multipart/form-data"),
    responses(
        (status = 200, description = "File staged and queued", body = StagedFile),
        (status = 400, description = "No file in the form"),
        (status = 403, description = "More than one file, or a non-file field"),
        (status = 413, description = "Body exceeds the configured limit"),
        (status = 500, description = "Staging failed"),
        (status = 503, description = "Admission unavailable")
    ),
    tag = "uploads"
)]
pub async fn post_upload(
    State(state): State<AppState>,
    Extension(scope): Extension<Arc<UploadScope>>,
    key: AdmissionKey,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<StagedFile>, UploadError> {
    let multipart = multipart.map_err(|e| UploadError::Uncaught(Some(e.body_text())))?;

    let file = state
        .pipeline
        .run(&scope, &key, multipart, UploadMode::Any)
        .await?
        .ok_or(UploadError::MissingFile)?;

    let outcome = state
        .waiting_list
        .add(WaitingListEntry::new(VerificationKind::Attachment, &file, None))
        .await
        .map_err(|e| UploadError::WaitingListFailed(e.to_string()));
    scope.record_handoff(&outcome);
    outcome?;

    Ok(Json(file))
}
