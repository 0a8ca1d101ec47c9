use axum::{
    async_trait,
    extract::{ConnectInfo, FromRequestParts},
    http::{HeaderMap, request::Parts},
};
use serde::Serialize;
use std::convert::Infallible;
use std::fmt;
use std::net::SocketAddr;
use std::path::PathBuf;
use utoipa::ToSchema;

/// Headers consulted for the client address, most trusted first.
pub const CLIENT_IP_HEADERS: [&str; 2] = ["cf-connecting-ip", "x-forwarded-for"];

/// Origin an upload is serialized against. Shared by every request that
/// appears to come from the same client address.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AdmissionKey(String);

impl AdmissionKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// First present of the proxy headers, then the peer address.
    pub fn from_request(headers: &HeaderMap, peer: Option<SocketAddr>) -> Self {
        let forwarded = CLIENT_IP_HEADERS.iter().find_map(|name| {
            headers
                .get(*name)
                .and_then(|v| v.to_str().ok())
                .map(str::trim)
                .filter(|v| !v.is_empty())
                .map(str::to_string)
        });

        match (forwarded, peer) {
            (Some(value), _) => Self(value),
            (None, Some(addr)) => Self(addr.ip().to_string()),
            (None, None) => Self("unknown".to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AdmissionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for AdmissionKey
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let peer = parts
            .extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| *addr);
        Ok(Self::from_request(&parts.headers, peer))
    }
}

/// Whether a route accepts any file or only supported images.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadMode {
    Any,
    ImageOnly,
}

/// Lifecycle of a single upload request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadState {
    Admitting,
    Streaming,
    Staged,
    Classified,
    HandedOff,
    Rejected,
    Failed,
}

impl UploadState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::HandedOff | Self::Rejected | Self::Failed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Admitting => "admitting",
            Self::Streaming => "streaming",
            Self::Staged => "staged",
            Self::Classified => "classified",
            Self::HandedOff => "handed_off",
            Self::Rejected => "rejected",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for UploadState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Descriptor of a file that was streamed to the temp directory.
///
/// Handed to whatever runs after staging. The temp file is removed by the
/// request's abort monitor if the response ends in an error; otherwise the
/// last consumer owns it.
#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct StagedFile {
    pub file_id: String,
    pub temp_filename: String,
    #[schema(value_type = String)]
    pub temp_path: PathBuf,
    pub original_filename: String,
    pub mimetype: String,
    pub filesize: u64,
    /// Always false at stage time; set by later processing.
    pub animated: bool,
    pub should_compress: bool,
    /// Derived variant produced by compression, if any.
    #[serde(skip)]
    pub compressed_path: Option<PathBuf>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn peer() -> Option<SocketAddr> {
        Some(SocketAddr::from(([10, 0, 0, 7], 52114)))
    }

    #[test]
    fn test_admission_key_prefers_cloudflare_header() {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", HeaderValue::from_static("198.51.100.2"));
        headers.insert("cf-connecting-ip", HeaderValue::from_static("203.0.113.9"));
        assert_eq!(
            AdmissionKey::from_request(&headers, peer()).as_str(),
            "203.0.113.9"
        );
    }

    #[test]
    fn test_admission_key_falls_back_to_forwarded_then_peer() {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", HeaderValue::from_static(" 198.51.100.2 "));
        assert_eq!(
            AdmissionKey::from_request(&headers, peer()).as_str(),
            "198.51.100.2"
        );

        let headers = HeaderMap::new();
        assert_eq!(AdmissionKey::from_request(&headers, peer()).as_str(), "10.0.0.7");
        assert_eq!(AdmissionKey::from_request(&headers, None).as_str(), "unknown");
    }

    #[test]
    fn test_blank_header_is_ignored() {
        let mut headers = HeaderMap::new();
        headers.insert("cf-connecting-ip", HeaderValue::from_static("  "));
        assert_eq!(AdmissionKey::from_request(&headers, peer()).as_str(), "10.0.0.7");
    }

    #[test]
    fn test_terminal_states() {
        assert!(UploadState::HandedOff.is_terminal());
        assert!(UploadState::Failed.is_terminal());
        assert!(!UploadState::Classified.is_terminal());
    }
}
