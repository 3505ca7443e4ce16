use std::io;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;
use tokio::process::Command;
use tokio::time::timeout;

use crate::config::EncoderSection;
use crate::encoder::{CommandExecutor, SystemCommandExecutor};

pub type ProbeResult<T> = Result<T, ProbeError>;

#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("failed to launch ffprobe {path}: {source}")]
    Launch { source: io::Error, path: PathBuf },
    #[error("ffprobe could not read {path}: {stderr}")]
    Unreadable { path: PathBuf, stderr: String },
    #[error("invalid ffprobe payload: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("ffprobe timed out after {0:?}")]
    Timeout(Duration),
}

/// What the orchestrator needs to know about a source before spending an
/// encode on it.
#[derive(Debug, Clone)]
pub struct SourceSummary {
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub duration_seconds: Option<f64>,
    pub has_video: bool,
    pub has_audio: bool,
}

/// Thin ffprobe wrapper. Returns `Ok(None)` when the ffprobe binary is not
/// installed, so deployments without it degrade to unvalidated ingest
/// instead of failing every job.
#[derive(Clone)]
pub struct MediaProbe {
    ffprobe: PathBuf,
    probe_timeout: Duration,
    executor: Arc<dyn CommandExecutor>,
}

impl std::fmt::Debug for MediaProbe {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MediaProbe")
            .field("ffprobe", &self.ffprobe)
            .finish()
    }
}

impl MediaProbe {
    pub fn new(section: &EncoderSection) -> Self {
        Self {
            ffprobe: PathBuf::from(&section.ffprobe_path),
            probe_timeout: Duration::from_secs(20),
            executor: Arc::new(SystemCommandExecutor),
        }
    }

    pub fn with_executor(mut self, executor: Arc<dyn CommandExecutor>) -> Self {
        self.executor = executor;
        self
    }

    pub async fn inspect(&self, path: &Path) -> ProbeResult<Option<SourceSummary>> {
        let mut command = Command::new(&self.ffprobe);
        command
            .kill_on_drop(true)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .arg("-v")
            .arg("error")
            .arg("-print_format")
            .arg("json")
            .arg("-show_streams")
            .arg("-show_format")
            .arg(path);

        let output = match timeout(self.probe_timeout, self.executor.run(&mut command)).await {
            Ok(Ok(output)) => output,
            Ok(Err(source)) if source.kind() == io::ErrorKind::NotFound => return Ok(None),
            Ok(Err(source)) => {
                return Err(ProbeError::Launch {
                    source,
                    path: self.ffprobe.clone(),
                })
            }
            Err(_) => return Err(ProbeError::Timeout(self.probe_timeout)),
        };

        if !output.status.success() {
            return Err(ProbeError::Unreadable {
                path: path.to_path_buf(),
                stderr: String::from_utf8_lossy(&output.stderr).trim_end().to_string(),
            });
        }

        let payload: FfprobeOutput = serde_json::from_slice(&output.stdout)?;
        Ok(Some(summarize(&payload)))
    }
}

fn summarize(payload: &FfprobeOutput) -> SourceSummary {
    let video = payload
        .streams
        .iter()
        .find(|stream| stream.codec_type.as_deref() == Some("video"));
    let has_audio = payload
        .streams
        .iter()
        .any(|stream| stream.codec_type.as_deref() == Some("audio"));
    SourceSummary {
        width: video.and_then(|stream| stream.width),
        height: video.and_then(|stream| stream.height),
        duration_seconds: payload
            .format
            .duration
            .as_deref()
            .and_then(|value| value.parse::<f64>().ok()),
        has_video: video.is_some(),
        has_audio,
    }
}

#[derive(Debug, Deserialize)]
struct FfprobeOutput {
    #[serde(default)]
    streams: Vec<FfprobeStream>,
    #[serde(default)]
    format: FfprobeFormat,
}

#[derive(Debug, Deserialize)]
struct FfprobeStream {
    #[serde(default)]
    codec_type: Option<String>,
    #[serde(default)]
    width: Option<u32>,
    #[serde(default)]
    height: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
struct FfprobeFormat {
    #[serde(default)]
    duration: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn summarize_reads_streams_and_duration() {
        let payload: FfprobeOutput = serde_json::from_str(
            r#"{
                "streams": [
                    {"codec_type": "video", "width": 1920, "height": 1080},
                    {"codec_type": "audio"}
                ],
                "format": {"duration": "93.5"}
            }"#,
        )
        .unwrap();
        let summary = summarize(&payload);
        assert!(summary.has_video);
        assert!(summary.has_audio);
        assert_eq!(summary.width, Some(1920));
        assert_eq!(summary.duration_seconds, Some(93.5));
    }

    #[test]
    fn summarize_flags_missing_audio() {
        let payload: FfprobeOutput =
            serde_json::from_str(r#"{"streams": [{"codec_type": "video"}]}"#).unwrap();
        let summary = summarize(&payload);
        assert!(summary.has_video);
        assert!(!summary.has_audio);
        assert_eq!(summary.duration_seconds, None);
    }
}
