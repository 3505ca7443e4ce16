use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::io::AsyncRead;

/// Where the bytes of an ingest come from.
pub enum IngestSource {
    /// An upload stream, e.g. a multipart body relayed by the HTTP layer.
    Stream {
        reader: Box<dyn AsyncRead + Send + Unpin>,
        file_name: String,
        declared_len: Option<u64>,
    },
    /// A file already on local disk (CLI ingest). Copied into staging so
    /// cleanup semantics match the stream path; the original is untouched.
    LocalFile { path: PathBuf },
}

impl IngestSource {
    pub fn stream(
        reader: impl AsyncRead + Send + Unpin + 'static,
        file_name: impl Into<String>,
        declared_len: Option<u64>,
    ) -> Self {
        Self::Stream {
            reader: Box::new(reader),
            file_name: file_name.into(),
            declared_len,
        }
    }

    pub fn local(path: impl Into<PathBuf>) -> Self {
        Self::LocalFile { path: path.into() }
    }
}

impl fmt::Debug for IngestSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Stream {
                file_name,
                declared_len,
                ..
            } => f
                .debug_struct("Stream")
                .field("file_name", file_name)
                .field("declared_len", declared_len)
                .finish_non_exhaustive(),
            Self::LocalFile { path } => {
                f.debug_struct("LocalFile").field("path", path).finish()
            }
        }
    }
}

#[derive(Debug)]
pub struct IngestRequest {
    /// Caller-supplied job id; generated when absent.
    pub job_id: Option<String>,
    pub title: String,
    pub description: Option<String>,
    pub content_type: Option<String>,
    pub source: IngestSource,
}

/// Per-job lifecycle. `Failed` is reachable from every non-terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Staged,
    Normalized,
    Rendered,
    Published,
    Failed,
}

impl JobState {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Staged => "staged",
            JobState::Normalized => "normalized",
            JobState::Rendered => "rendered",
            JobState::Published => "published",
            JobState::Failed => "failed",
        }
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Terminal success: the canonical tree is on disk and the metadata
/// collaborator has been notified.
#[derive(Debug, Clone, Serialize)]
pub struct PublishedAsset {
    pub job_id: String,
    pub title: String,
    pub output_dir: PathBuf,
    pub master_playlist: PathBuf,
    pub rendition_count: usize,
    pub published_at: DateTime<Utc>,
}

/// Terminal failure, shaped for the HTTP/CLI boundary.
#[derive(Debug, Clone, Serialize)]
pub struct FailureReport {
    pub job_id: String,
    pub stage: String,
    pub message: String,
    pub failed_at: DateTime<Utc>,
}
