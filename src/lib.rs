pub mod api;
pub mod config;
pub mod infrastructure;
pub mod models;
pub mod services;
pub mod utils;

use crate::config::UploadConfig;
use crate::services::handoff::{ImageCompressor, WaitingList};
use crate::services::upload_pipeline::UploadPipeline;
use axum::{
    Json, Router,
    extract::DefaultBodyLimit,
    middleware::from_fn,
    routing::{get, post},
};
use std::sync::Arc;
use utoipa::OpenApi;

/// Room for multipart boundaries and part headers on top of the file itself.
pub const MULTIPART_OVERHEAD: usize = 64 * 1024;

#[derive(OpenApi)]
#[openapi(
    paths(
        api::handlers::banners::post_banner,
        api::handlers::uploads::post_upload,
        api::handlers::health::health_check,
    ),
    components(
        schemas(
            api::handlers::banners::BannerAccepted,
            api::handlers::health::HealthResponse,
            models::StagedFile,
        )
    ),
    tags(
        (name = "uploads", description = "Single-file upload endpoints"),
        (name = "system", description = "Service health")
    )
)]
pub struct ApiDoc;

#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<UploadPipeline>,
    pub waiting_list: Arc<dyn WaitingList>,
    pub compressor: Arc<dyn ImageCompressor>,
    pub config: UploadConfig,
}

pub fn create_app(state: AppState) -> Router {
    let banner_limit = state.config.image_max_body_length + MULTIPART_OVERHEAD;
    let upload_limit = state.config.max_body_length + MULTIPART_OVERHEAD;

    Router::new()
        .route(
            "/api-docs/openapi.json",
            get(|| async { Json(ApiDoc::openapi()) }),
        )
        .route("/health", get(api::handlers::health::health_check))
        .route(
            "/banners/:group_id",
            post(api::handlers::banners::post_banner)
                .layer(DefaultBodyLimit::max(banner_limit))
                .layer(from_fn(api::middleware::abort_monitor::abort_monitor)),
        )
        .route(
            "/uploads",
            post(api::handlers::uploads::post_upload)
                .layer(DefaultBodyLimit::max(upload_limit))
                .layer(from_fn(api::middleware::abort_monitor::abort_monitor)),
        )
        .with_state(state)
}
