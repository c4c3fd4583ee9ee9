// src/ingest/types.rs
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One configured external feed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FeedSource {
    pub name: String,
    pub url: String,
    #[serde(default = "enabled_by_default")]
    pub enabled: bool,
}

fn enabled_by_default() -> bool {
    true
}

impl FeedSource {
    pub fn new(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
            enabled: true,
        }
    }
}

/// Item as parsed from the feed document, before defaults are applied.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawFeedItem {
    pub title: Option<String>,
    pub link: Option<String>,
    pub guid: Option<String>,
    pub published: Option<DateTime<Utc>>,
    /// Full body (`content:encoded` / Atom `content`).
    pub content: Option<String>,
    /// Short text (`description` / Atom `summary`).
    pub snippet: Option<String>,
    pub image_url: Option<String>,
}

/// Item with defaults applied and text cleaned.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NormalizedItem {
    pub title: String,
    pub link: Option<String>,
    pub guid: Option<String>,
    pub published_at: DateTime<Utc>,
    pub content: String,
    pub source: String,
    pub image_url: Option<String>,
}

/// Typed failure of one feed fetch.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FetchError {
    #[error("feed request timed out")]
    Timeout,
    #[error("malformed feed data: {0}")]
    MalformedData(String),
    #[error("network unreachable: {0}")]
    NetworkUnreachable(String),
    #[error("feed fetch failed: {0}")]
    Unknown(String),
}

impl FetchError {
    /// Stable label used in logs and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            FetchError::Timeout => "timeout",
            FetchError::MalformedData(_) => "malformed_xml",
            FetchError::NetworkUnreachable(_) => "network",
            FetchError::Unknown(_) => "unknown",
        }
    }
}

impl From<reqwest::Error> for FetchError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            FetchError::Timeout
        } else if e.is_connect() || e.is_request() {
            FetchError::NetworkUnreachable(e.to_string())
        } else if e.is_decode() || e.is_body() {
            FetchError::MalformedData(e.to_string())
        } else {
            FetchError::Unknown(e.to_string())
        }
    }
}

/// Feed retrieval collaborator: URL in, parsed items or typed failure out.
#[async_trait::async_trait]
pub trait FeedRetriever: Send + Sync {
    async fn retrieve(&self, source: &FeedSource) -> Result<Vec<RawFeedItem>, FetchError>;
}
