use std::io;
use std::path::{Component, Path, PathBuf};

use tempfile::TempPath;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWriteExt, BufWriter};
use tracing::debug;

#[derive(Debug, Error)]
pub enum StagingError {
    #[error("unusable upload name {name:?}")]
    InvalidName { name: String },
    #[error("io error at {path}: {source}")]
    Io { source: io::Error, path: PathBuf },
    #[error("upload for {path} ended early: declared {declared} bytes, received {received}")]
    SizeMismatch {
        declared: u64,
        received: u64,
        path: PathBuf,
    },
}

pub type StagingResult<T> = Result<T, StagingError>;

/// A staged upload. The backing file is unlinked when this is dropped, so
/// temp artifacts cannot outlive the job that owns them, whatever the
/// outcome.
#[derive(Debug)]
pub struct StagedSource {
    path: TempPath,
    len: u64,
}

impl StagedSource {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

/// Writes upload streams into a single configured staging root under
/// collision-resistant names.
#[derive(Debug, Clone)]
pub struct StagingStore {
    root: PathBuf,
}

impl StagingStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Persist `reader` to a temp file named after a sanitised form of
    /// `suggested_name`. When the uploader declared a length, a short write
    /// is rejected rather than handed to the encoder.
    pub async fn stage<R>(
        &self,
        mut reader: R,
        suggested_name: &str,
        declared_len: Option<u64>,
    ) -> StagingResult<StagedSource>
    where
        R: AsyncRead + Unpin,
    {
        let safe_name = sanitize_name(suggested_name)?;
        let file = tempfile::Builder::new()
            .prefix(&format!("{safe_name}."))
            .suffix(".upload")
            .tempfile_in(&self.root)
            .map_err(|source| StagingError::Io {
                source,
                path: self.root.clone(),
            })?;
        let (std_file, temp_path) = file.into_parts();

        let mut writer = BufWriter::new(tokio::fs::File::from_std(std_file));
        let received = tokio::io::copy(&mut reader, &mut writer)
            .await
            .map_err(|source| StagingError::Io {
                source,
                path: temp_path.to_path_buf(),
            })?;
        writer.flush().await.map_err(|source| StagingError::Io {
            source,
            path: temp_path.to_path_buf(),
        })?;
        writer
            .into_inner()
            .sync_all()
            .await
            .map_err(|source| StagingError::Io {
                source,
                path: temp_path.to_path_buf(),
            })?;

        if let Some(declared) = declared_len {
            if declared != received {
                return Err(StagingError::SizeMismatch {
                    declared,
                    received,
                    path: temp_path.to_path_buf(),
                });
            }
        }

        debug!(path = %temp_path.display(), bytes = received, "upload staged");
        Ok(StagedSource {
            path: temp_path,
            len: received,
        })
    }

    /// Reserve a self-deleting scratch path in the staging root for an
    /// intermediate the encoder will write (e.g. the normalized source).
    pub fn allocate(&self, prefix: &str, suffix: &str) -> StagingResult<TempPath> {
        let file = tempfile::Builder::new()
            .prefix(&format!("{prefix}."))
            .suffix(suffix)
            .tempfile_in(&self.root)
            .map_err(|source| StagingError::Io {
                source,
                path: self.root.clone(),
            })?;
        Ok(file.into_temp_path())
    }
}

/// Reduce a caller-supplied name to a bare file-name component: absolute
/// paths, parent-dir escapes and empty names are rejected outright.
fn sanitize_name(name: &str) -> StagingResult<String> {
    let candidate = Path::new(name);
    let file_name = candidate
        .file_name()
        .and_then(|value| value.to_str())
        .ok_or_else(|| StagingError::InvalidName {
            name: name.to_string(),
        })?;
    if file_name.is_empty()
        || Path::new(file_name)
            .components()
            .any(|component| !matches!(component, Component::Normal(_)))
    {
        return Err(StagingError::InvalidName {
            name: name.to_string(),
        });
    }
    Ok(file_name.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn sanitize_keeps_only_the_file_name() {
        assert_eq!(sanitize_name("clip.mp4").unwrap(), "clip.mp4");
        assert_eq!(sanitize_name("nested/dir/clip.mp4").unwrap(), "clip.mp4");
        assert_eq!(sanitize_name("/etc/passwd").unwrap(), "passwd");
        assert_eq!(sanitize_name("trailing/").unwrap(), "trailing");
        assert!(sanitize_name("..").is_err());
        assert!(sanitize_name("").is_err());
        assert!(sanitize_name(".").is_err());
    }

    #[tokio::test]
    async fn stage_writes_stream_and_reports_length() {
        let root = TempDir::new().unwrap();
        let store = StagingStore::new(root.path());

        let staged = store
            .stage(&b"demo payload"[..], "../sneaky/clip.mp4", Some(12))
            .await
            .unwrap();
        assert_eq!(staged.len(), 12);
        assert!(staged.path().starts_with(root.path()));
        let name = staged.path().file_name().unwrap().to_string_lossy();
        assert!(name.starts_with("clip.mp4."));
        assert_eq!(std::fs::read(staged.path()).unwrap(), b"demo payload");
    }

    #[tokio::test]
    async fn short_uploads_are_rejected() {
        let root = TempDir::new().unwrap();
        let store = StagingStore::new(root.path());

        let err = store
            .stage(&b"half"[..], "clip.mp4", Some(100))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            StagingError::SizeMismatch {
                declared: 100,
                received: 4,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn dropping_a_staged_source_unlinks_the_file() {
        let root = TempDir::new().unwrap();
        let store = StagingStore::new(root.path());

        let staged = store.stage(&b"bytes"[..], "clip.mp4", None).await.unwrap();
        let path = staged.path().to_path_buf();
        assert!(path.exists());
        drop(staged);
        assert!(!path.exists());
    }
}
