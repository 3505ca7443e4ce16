use std::io;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::debug;

use crate::config::EncoderSection;

pub type EncoderResult<T> = Result<T, EncoderError>;

#[derive(Debug, Error)]
pub enum EncoderError {
    #[error("encoder binary not found: {path}")]
    BinaryNotFound { path: PathBuf },
    #[error("failed to launch encoder {path}: {source}")]
    Launch { source: io::Error, path: PathBuf },
    #[error("encoder exited with status {status:?}: {stderr_tail}")]
    Process {
        status: Option<i32>,
        stderr_tail: String,
    },
    #[error("encoder reported success but output is missing or empty: {path}")]
    OutputMissing { path: PathBuf },
    #[error("encoder run exceeded the {0:?} limit")]
    Timeout(Duration),
}

/// One external encoder run: the argument vector, an optional working
/// directory, and the files that must exist (non-empty) afterwards for the
/// run to count as a success. Multi-output transcodes can exit 0 with some
/// outputs absent, so the exit code alone is not trusted.
#[derive(Debug, Clone, Default)]
pub struct EncoderInvocation {
    pub args: Vec<String>,
    pub working_dir: Option<PathBuf>,
    pub expected_outputs: Vec<PathBuf>,
}

impl EncoderInvocation {
    pub fn new(args: Vec<String>) -> Self {
        Self {
            args,
            working_dir: None,
            expected_outputs: Vec::new(),
        }
    }

    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    pub fn expect_output(mut self, path: impl Into<PathBuf>) -> Self {
        self.expected_outputs.push(path.into());
        self
    }
}

/// Diagnostics retained from a successful run.
#[derive(Debug, Clone)]
pub struct EncoderRunReport {
    pub stderr_tail: String,
}

#[async_trait::async_trait]
pub trait CommandExecutor: Send + Sync {
    async fn run(&self, command: &mut Command) -> io::Result<std::process::Output>;
}

#[derive(Debug, Default)]
pub struct SystemCommandExecutor;

#[async_trait::async_trait]
impl CommandExecutor for SystemCommandExecutor {
    async fn run(&self, command: &mut Command) -> io::Result<std::process::Output> {
        command.output().await
    }
}

/// Runs external encoder invocations and maps abnormal termination to typed
/// failures. Retry policy does not live here: a failed run is reported once
/// and the caller decides.
#[derive(Clone)]
pub struct EncoderGateway {
    ffmpeg: PathBuf,
    log_level: String,
    run_timeout: Duration,
    stderr_tail_bytes: usize,
    executor: Arc<dyn CommandExecutor>,
}

impl std::fmt::Debug for EncoderGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EncoderGateway")
            .field("ffmpeg", &self.ffmpeg)
            .field("run_timeout", &self.run_timeout)
            .finish()
    }
}

impl EncoderGateway {
    pub fn new(section: &EncoderSection) -> Self {
        Self {
            ffmpeg: PathBuf::from(&section.ffmpeg_path),
            log_level: section.log_level.clone(),
            run_timeout: Duration::from_secs(section.run_timeout_seconds),
            stderr_tail_bytes: section.stderr_tail_bytes,
            executor: Arc::new(SystemCommandExecutor),
        }
    }

    pub fn with_executor(mut self, executor: Arc<dyn CommandExecutor>) -> Self {
        self.executor = executor;
        self
    }

    pub fn with_run_timeout(mut self, limit: Duration) -> Self {
        self.run_timeout = limit;
        self
    }

    pub async fn run(&self, invocation: &EncoderInvocation) -> EncoderResult<EncoderRunReport> {
        let mut command = Command::new(&self.ffmpeg);
        command
            .kill_on_drop(true)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .arg("-hide_banner")
            .arg("-loglevel")
            .arg(&self.log_level);
        for arg in &invocation.args {
            command.arg(arg);
        }
        if let Some(dir) = &invocation.working_dir {
            command.current_dir(dir);
        }

        debug!(args = ?invocation.args, "running encoder");
        let output = match timeout(self.run_timeout, self.executor.run(&mut command)).await {
            Ok(Ok(output)) => output,
            Ok(Err(source)) if source.kind() == io::ErrorKind::NotFound => {
                return Err(EncoderError::BinaryNotFound {
                    path: self.ffmpeg.clone(),
                })
            }
            Ok(Err(source)) => {
                return Err(EncoderError::Launch {
                    source,
                    path: self.ffmpeg.clone(),
                })
            }
            // The in-flight child is killed when the dropped future releases it.
            Err(_) => return Err(EncoderError::Timeout(self.run_timeout)),
        };

        let stderr_tail = tail(&output.stderr, self.stderr_tail_bytes);
        if !output.status.success() {
            return Err(EncoderError::Process {
                status: output.status.code(),
                stderr_tail,
            });
        }

        for path in &invocation.expected_outputs {
            self.verify_output(path).await?;
        }

        Ok(EncoderRunReport { stderr_tail })
    }

    async fn verify_output(&self, path: &Path) -> EncoderResult<()> {
        match tokio::fs::metadata(path).await {
            Ok(meta) if meta.len() > 0 => Ok(()),
            _ => Err(EncoderError::OutputMissing {
                path: path.to_path_buf(),
            }),
        }
    }
}

/// Last `limit` bytes of captured stderr, trimmed and cut on a char boundary.
fn tail(bytes: &[u8], limit: usize) -> String {
    let text = String::from_utf8_lossy(bytes);
    let trimmed = text.trim_end();
    if trimmed.len() <= limit {
        return trimmed.to_string();
    }
    let mut start = trimmed.len() - limit;
    while !trimmed.is_char_boundary(start) {
        start += 1;
    }
    trimmed[start..].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tail_keeps_short_output_intact() {
        assert_eq!(tail(b"frame drop detected\n", 4096), "frame drop detected");
    }

    #[test]
    fn tail_truncates_on_char_boundaries() {
        let long = "x".repeat(100) + "fim código";
        let clipped = tail(long.as_bytes(), 6);
        assert!(clipped.len() <= 6);
        assert!(clipped.ends_with("digo"));
    }

    #[test]
    fn invocation_builder_accumulates_expected_outputs() {
        let invocation = EncoderInvocation::new(vec!["-i".into(), "in.mp4".into()])
            .with_working_dir("/work")
            .expect_output("/out/master.m3u8")
            .expect_output("/out/0/playlist.m3u8");
        assert_eq!(invocation.working_dir.as_deref(), Some(Path::new("/work")));
        assert_eq!(
            invocation.expected_outputs,
            vec![
                PathBuf::from("/out/master.m3u8"),
                PathBuf::from("/out/0/playlist.m3u8")
            ]
        );
    }
}
