use std::io;
use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io { source: io::Error, path: PathBuf },
    #[error("failed to parse config {path}: {source}")]
    Parse {
        source: toml::de::Error,
        path: PathBuf,
    },
}

/// Deployment-level problems detected before any job runs. These are fatal
/// to the whole process, never attributed to an individual ingest.
#[derive(Debug, Error)]
pub enum DeploymentConfigError {
    #[error("intro asset not found at {path}")]
    MissingIntroAsset { path: PathBuf },
    #[error("intro asset at {path} is not a regular file")]
    IntroAssetNotAFile { path: PathBuf },
    #[error("cannot prepare directory {path}: {source}")]
    UnusableRoot { source: io::Error, path: PathBuf },
    #[error("directory {path} is not writable: {source}")]
    RootNotWritable { source: io::Error, path: PathBuf },
}

pub type Result<T> = std::result::Result<T, ConfigError>;
