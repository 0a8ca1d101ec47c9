use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

/// Where the per-key admission gate keeps its state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdmissionBackend {
    /// Process-local gate. Only correct for a single serving process.
    Memory,
    /// Advisory locks in a shared Postgres database, honored by every replica.
    Postgres { url: String },
}

/// Configuration for the upload staging service
#[derive(Debug, Clone)]
pub struct UploadConfig {
    /// Directory staged uploads are written to (default: `<os temp>/upload-staging`)
    pub temp_dir: PathBuf,

    /// Largest image still eligible for compression, in bytes (default: 12 MB).
    /// Also caps the request body of image-only routes.
    pub image_max_body_length: usize,

    /// Maximum request body for generic uploads in bytes (default: 50 MB)
    pub max_body_length: usize,

    /// How long a request may queue for admission before giving up (default: 30s)
    pub admission_timeout: Duration,

    /// Chunks buffered between the network reader and the disk writer (default: 8)
    pub pipe_capacity: usize,

    /// Admission gate backend (default: memory)
    pub admission_backend: AdmissionBackend,

    /// Connections reserved for the postgres gate; every admitted or queued
    /// upload holds one (default: 32)
    pub admission_pool_size: u32,

    /// How often idle per-key gate entries are evicted (default: 5 min)
    pub gate_sweep_interval: Duration,

    /// Entries the in-process waiting list holds before refusing more (default: 1024)
    pub waiting_list_capacity: usize,

    /// Listen address (default: 127.0.0.1:3000)
    pub bind_addr: SocketAddr,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            temp_dir: env::temp_dir().join("upload-staging"),
            image_max_body_length: 12 * 1024 * 1024, // 12 MB
            max_body_length: 50 * 1024 * 1024,       // 50 MB
            admission_timeout: Duration::from_secs(30),
            pipe_capacity: 8,
            admission_backend: AdmissionBackend::Memory,
            admission_pool_size: 32,
            gate_sweep_interval: Duration::from_secs(300),
            waiting_list_capacity: 1024,
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 3000)),
        }
    }
}

impl UploadConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        let default = Self::default();

        let admission_backend = match env::var("ADMISSION_BACKEND")
            .map(|v| v.to_lowercase())
            .as_deref()
        {
            Ok("postgres") => match env::var("DATABASE_URL") {
                Ok(url) => AdmissionBackend::Postgres { url },
                Err(_) => {
                    tracing::warn!(
                        "ADMISSION_BACKEND=postgres but DATABASE_URL is unset, using in-memory gate"
                    );
                    AdmissionBackend::Memory
                }
            },
            _ => default.admission_backend,
        };

        Self {
            temp_dir: env::var("TEMP_DIR")
                .map(PathBuf::from)
                .unwrap_or(default.temp_dir),

            image_max_body_length: parse_var("IMAGE_MAX_BODY_LENGTH")
                .unwrap_or(default.image_max_body_length),

            max_body_length: parse_var("MAX_BODY_LENGTH").unwrap_or(default.max_body_length),

            admission_timeout: parse_var("ADMISSION_TIMEOUT_SECS")
                .map(Duration::from_secs)
                .unwrap_or(default.admission_timeout),

            pipe_capacity: parse_var("UPLOAD_PIPE_CAPACITY")
                .filter(|&n: &usize| n > 0)
                .unwrap_or(default.pipe_capacity),

            admission_backend,

            admission_pool_size: parse_var("ADMISSION_POOL_SIZE")
                .filter(|&n: &u32| n > 0)
                .unwrap_or(default.admission_pool_size),

            gate_sweep_interval: parse_var("GATE_SWEEP_INTERVAL_SECS")
                .map(Duration::from_secs)
                .unwrap_or(default.gate_sweep_interval),

            waiting_list_capacity: parse_var("WAITING_LIST_CAPACITY")
                .unwrap_or(default.waiting_list_capacity),

            bind_addr: parse_var("BIND_ADDR").unwrap_or(default.bind_addr),
        }
    }

    /// Config for tests and local runs: everything under `temp_dir`, short waits
    pub fn development(temp_dir: impl Into<PathBuf>) -> Self {
        Self {
            temp_dir: temp_dir.into(),
            admission_timeout: Duration::from_secs(5),
            gate_sweep_interval: Duration::from_secs(30),
            ..Self::default()
        }
    }
}

fn parse_var<T: std::str::FromStr>(name: &str) -> Option<T> {
    env::var(name).ok().and_then(|v| v.trim().parse().ok())
}
