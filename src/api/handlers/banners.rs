use crate::AppState;
use crate::api::error::UploadError;
use crate::api::middleware::abort_monitor::UploadScope;
use crate::models::{AdmissionKey, StagedFile, UploadMode};
use crate::services::handoff::{VerificationKind, WaitingListEntry};
use axum::{
    Extension, Json,
    extract::{Multipart, Path, State, multipart::MultipartRejection},
};
use serde::Serialize;
use std::sync::Arc;
use utoipa::ToSchema;

#[derive(Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct BannerAccepted {
    pub file_id: String,
}

#[utoipa::path(
    post,
    path = "/banners/{group_id}",
    params(
        ("group_id" = String, Path, description = "Group the banner belongs to")
    ),
    request_body(content = String, description = "Single image multipart form", content_type = "multipart/form-data"),
    responses(
        (status = 200, description = "Banner queued for verification", body = BannerAccepted),
        (status = 400, description = "Missing file or unsupported image type"),
        (status = 403, description = "More than one file, or a non-file field"),
        (status = 500, description = "Staging or handoff failed"),
        (status = 503, description = "Admission unavailable")
    ),
    tag = "uploads"
)]
pub async fn post_banner(
    State(state): State<AppState>,
    Extension(scope): Extension<Arc<UploadScope>>,
    Path(group_id): Path<String>,
    key: AdmissionKey,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<BannerAccepted>, UploadError> {
    let multipart = multipart.map_err(|e| UploadError::Uncaught(Some(e.body_text())))?;

    let file = state
        .pipeline
        .run(&scope, &key, multipart, UploadMode::ImageOnly)
        .await?
        .ok_or(UploadError::MissingFile)?;

    let outcome = queue_banner(&state, &scope, file, group_id).await;
    scope.record_handoff(&outcome);

    Ok(Json(BannerAccepted { file_id: outcome? }))
}

/// Compresses a staged banner and puts it on the waiting list.
async fn queue_banner(
    state: &AppState,
    scope: &UploadScope,
    mut file: StagedFile,
    group_id: String,
) -> Result<String, UploadError> {
    if !file.should_compress {
        return Err(UploadError::NotCompressible);
    }

    if let Some(derived) = state
        .compressor
        .compress(&file)
        .await
        .map_err(|e| UploadError::CompressionFailed(e.to_string()))?
    {
        scope.track_file(derived.clone());
        file.compressed_path = Some(derived);
    }

    state
        .waiting_list
        .add(WaitingListEntry::new(
            VerificationKind::Banner,
            &file,
            Some(group_id),
        ))
        .await
        .map_err(|e| UploadError::WaitingListFailed(e.to_string()))?;

    Ok(file.file_id)
}
