#![allow(dead_code)]

use axum::{
    Router,
    body::{Body, Bytes},
    http::{Request, Response},
};
use futures::StreamExt;
use http_body_util::BodyExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use upload_staging::config::UploadConfig;
use upload_staging::services::admission::{AdmissionGate, MemoryGate};
use upload_staging::services::handoff::{ImageCompressor, MemoryWaitingList, PassthroughCompressor};
use upload_staging::services::upload_pipeline::UploadPipeline;
use upload_staging::{AppState, create_app};

pub const BOUNDARY: &str = "----uploadstagingboundary";

/// One part of a multipart form.
pub struct Part {
    pub name: &'static str,
    pub filename: Option<String>,
    pub content_type: Option<&'static str>,
    pub data: Vec<u8>,
}

impl Part {
    pub fn file(filename: &str, content_type: &'static str, data: Vec<u8>) -> Self {
        Self {
            name: "file",
            filename: Some(filename.to_string()),
            content_type: Some(content_type),
            data,
        }
    }

    pub fn field(name: &'static str, value: &str) -> Self {
        Self {
            name,
            filename: None,
            content_type: None,
            data: value.as_bytes().to_vec(),
        }
    }
}

pub fn multipart_body(parts: &[Part]) -> Vec<u8> {
    let mut body = Vec::new();
    for part in parts {
        body.extend_from_slice(format!("--{}\r\n", BOUNDARY).as_bytes());
        match &part.filename {
            Some(filename) => body.extend_from_slice(
                format!(
                    "Content-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\n",
                    part.name, filename
                )
                .as_bytes(),
            ),
            None => body.extend_from_slice(
                format!("Content-Disposition: form-data; name=\"{}\"\r\n", part.name).as_bytes(),
            ),
        }
        if let Some(content_type) = part.content_type {
            body.extend_from_slice(format!("Content-Type: {}\r\n", content_type).as_bytes());
        }
        body.extend_from_slice(b"\r\n");
        body.extend_from_slice(&part.data);
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{}--\r\n", BOUNDARY).as_bytes());
    body
}

pub fn upload_request(uri: &str, client: &str, body: Body) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("cf-connecting-ip", client)
        .header(
            "Content-Type",
            format!("multipart/form-data; boundary={}", BOUNDARY),
        )
        .body(body)
        .unwrap()
}

/// Delivers `body` in `pieces` chunks, sleeping before each one.
pub fn trickle(body: Vec<u8>, pieces: usize, delay: Duration) -> Body {
    let size = body.len().div_ceil(pieces).max(1);
    let chunks: Vec<Bytes> = body.chunks(size).map(Bytes::copy_from_slice).collect();
    let stream = futures::stream::iter(chunks).then(move |chunk| async move {
        tokio::time::sleep(delay).await;
        Ok::<_, std::io::Error>(chunk)
    });
    Body::from_stream(stream)
}

/// Delivers the first `sent` bytes of `body`, then never finishes.
pub fn stalled(body: Vec<u8>, sent: usize) -> Body {
    let head = Bytes::copy_from_slice(&body[..sent]);
    let stream = futures::stream::once(async move { Ok::<_, std::io::Error>(head) })
        .chain(futures::stream::pending::<Result<Bytes, std::io::Error>>());
    Body::from_stream(stream)
}

pub async fn body_text(response: Response<Body>) -> String {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    String::from_utf8(bytes.to_vec()).unwrap()
}

pub async fn body_json(response: Response<Body>) -> serde_json::Value {
    serde_json::from_str(&body_text(response).await).unwrap()
}

pub fn staged_files(dir: &Path) -> Vec<PathBuf> {
    std::fs::read_dir(dir)
        .unwrap()
        .map(|entry| entry.unwrap().path())
        .collect()
}

pub struct TestApp {
    pub app: Router,
    pub dir: TempDir,
    pub config: UploadConfig,
    pub waiting_list: Arc<MemoryWaitingList>,
}

impl TestApp {
    pub fn temp_dir(&self) -> &Path {
        self.dir.path()
    }
}

pub struct TestAppBuilder {
    dir: TempDir,
    config: UploadConfig,
    gate: Arc<dyn AdmissionGate>,
    waiting_list: Arc<MemoryWaitingList>,
    compressor: Arc<dyn ImageCompressor>,
}

impl TestAppBuilder {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let config = UploadConfig::development(dir.path());
        Self {
            dir,
            config,
            gate: Arc::new(MemoryGate::new()),
            waiting_list: Arc::new(MemoryWaitingList::new(64)),
            compressor: Arc::new(PassthroughCompressor),
        }
    }

    pub fn configure(mut self, f: impl FnOnce(&mut UploadConfig)) -> Self {
        f(&mut self.config);
        self
    }

    pub fn gate(mut self, gate: Arc<dyn AdmissionGate>) -> Self {
        self.gate = gate;
        self
    }

    pub fn waiting_list_capacity(mut self, capacity: usize) -> Self {
        self.waiting_list = Arc::new(MemoryWaitingList::new(capacity));
        self
    }

    pub fn compressor(mut self, compressor: Arc<dyn ImageCompressor>) -> Self {
        self.compressor = compressor;
        self
    }

    pub fn build(self) -> TestApp {
        let state = AppState {
            pipeline: Arc::new(UploadPipeline::new(self.gate, &self.config)),
            waiting_list: self.waiting_list.clone(),
            compressor: self.compressor,
            config: self.config.clone(),
        };

        TestApp {
            app: create_app(state),
            dir: self.dir,
            config: self.config,
            waiting_list: self.waiting_list,
        }
    }
}

pub fn setup_app() -> TestApp {
    TestAppBuilder::new().build()
}

/// Waits until a staged file shows up in `dir`.
pub async fn wait_for_file(dir: &Path) -> PathBuf {
    loop {
        if let Some(path) = staged_files(dir).into_iter().next() {
            return path;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Waits until `path` no longer exists.
pub async fn wait_until_removed(path: &Path) {
    while path.exists() {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
