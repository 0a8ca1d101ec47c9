use crate::services::admission::GateError;
use crate::services::staging::StageError;
use axum::{
    Json,
    extract::multipart::MultipartError,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error;

pub const UNCAUGHT_PREFIX: &str = "Oops! An uncaught error occurred on our end. ";

#[derive(Error, Debug)]
pub enum UploadError {
    #[error("Invalid image mime type")]
    InvalidImageMime,

    #[error("Only one file can be uploaded at a time")]
    FilesLimitReached,

    #[error("There should be no fields in the request.")]
    FieldsLimitReached,

    #[error("Failed to upload file: {0}")]
    StageFailed(#[source] StageError),

    #[error("Payload Too Large")]
    PayloadTooLarge,

    #[error("Admission unavailable: {0}")]
    AdmissionUnavailable(#[from] GateError),

    #[error("Client closed the connection")]
    ClientClosed,

    #[error("Missing file")]
    MissingFile,

    #[error("Staged file is not eligible for compression")]
    NotCompressible,

    #[error("Image compression failed: {0}")]
    CompressionFailed(String),

    #[error("Failed to add to waiting list: {0}")]
    WaitingListFailed(String),

    #[error("Uncaught error: {0:?}")]
    Uncaught(Option<String>),
}

impl UploadError {
    /// Maps a failure from reading the multipart envelope itself.
    pub fn from_multipart(e: MultipartError) -> Self {
        if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
            Self::PayloadTooLarge
        } else {
            Self::Uncaught(Some(e.body_text()))
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            Self::InvalidImageMime | Self::MissingFile | Self::ClientClosed => {
                StatusCode::BAD_REQUEST
            }
            Self::FilesLimitReached | Self::FieldsLimitReached => StatusCode::FORBIDDEN,
            Self::PayloadTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            Self::AdmissionUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::StageFailed(_)
            | Self::NotCompressible
            | Self::CompressionFailed(_)
            | Self::WaitingListFailed(_)
            | Self::Uncaught(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<StageError> for UploadError {
    fn from(e: StageError) -> Self {
        match e {
            StageError::TooLarge => Self::PayloadTooLarge,
            StageError::Cancelled => Self::ClientClosed,
            other => Self::StageFailed(other),
        }
    }
}

fn json_error(status: StatusCode, message: &str) -> Response {
    (status, Json(json!({ "error": message }))).into_response()
}

impl IntoResponse for UploadError {
    fn into_response(self) -> Response {
        let status = self.status();
        match self {
            UploadError::InvalidImageMime => json_error(status, "Invalid image mime type"),
            UploadError::FilesLimitReached | UploadError::FieldsLimitReached => {
                (status, self.to_string()).into_response()
            }
            UploadError::StageFailed(e) => {
                tracing::error!("Stream to disk failed: {}", e);
                json_error(status, "Failed to upload file")
            }
            UploadError::PayloadTooLarge => json_error(status, "File too large"),
            UploadError::AdmissionUnavailable(e) => {
                tracing::error!("Admission gate error: {}", e);
                json_error(status, "Upload admission unavailable")
            }
            UploadError::ClientClosed => json_error(status, "Connection closed"),
            UploadError::MissingFile => json_error(status, "Missing file"),
            UploadError::NotCompressible => json_error(status, "Internal server error."),
            UploadError::CompressionFailed(e) => {
                tracing::error!("Compression failed: {}", e);
                json_error(status, "Failed to compress image")
            }
            UploadError::WaitingListFailed(e) => {
                tracing::error!("Waiting list rejected upload: {}", e);
                json_error(status, "Failed to add to waiting list")
            }
            UploadError::Uncaught(detail) => {
                tracing::error!("Uncaught upload error: {:?}", detail);
                let text = format!("{}{}", UNCAUGHT_PREFIX, detail.unwrap_or_default());
                (status, text).into_response()
            }
        }
    }
}
