use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Deserialize;

use crate::error::{ConfigError, DeploymentConfigError, Result};

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct VodpressConfig {
    pub paths: PathsSection,
    pub encoder: EncoderSection,
    pub intro: IntroSection,
    pub limits: LimitsSection,
    pub hls: HlsSection,
}

impl VodpressConfig {
    pub fn resolve_path<P: AsRef<Path>>(&self, candidate: P) -> PathBuf {
        let path = candidate.as_ref();
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            Path::new(&self.paths.base_dir).join(path)
        }
    }

    pub fn staging_root(&self) -> PathBuf {
        self.resolve_path(&self.paths.staging_dir)
    }

    pub fn output_root(&self) -> PathBuf {
        self.resolve_path(&self.paths.output_dir)
    }

    pub fn data_root(&self) -> PathBuf {
        self.resolve_path(&self.paths.data_dir)
    }

    pub fn intro_asset(&self) -> PathBuf {
        self.resolve_path(&self.intro.asset_path)
    }

    /// Creates the staging/output/data roots and verifies the fixed intro
    /// asset is in place. Run once at process start; a failure here means
    /// the deployment is broken, not any particular job.
    pub fn validate_deployment(&self) -> std::result::Result<(), DeploymentConfigError> {
        for root in [self.staging_root(), self.output_root(), self.data_root()] {
            std::fs::create_dir_all(&root).map_err(|source| {
                DeploymentConfigError::UnusableRoot {
                    source,
                    path: root.clone(),
                }
            })?;
            probe_writable(&root)?;
        }

        let intro = self.intro_asset();
        match std::fs::metadata(&intro) {
            Ok(meta) if meta.is_file() => Ok(()),
            Ok(_) => Err(DeploymentConfigError::IntroAssetNotAFile { path: intro }),
            Err(_) => Err(DeploymentConfigError::MissingIntroAsset { path: intro }),
        }
    }
}

fn probe_writable(root: &Path) -> std::result::Result<(), DeploymentConfigError> {
    let probe = root.join(".vodpress-write-probe");
    std::fs::write(&probe, b"probe").map_err(|source| DeploymentConfigError::RootNotWritable {
        source,
        path: root.to_path_buf(),
    })?;
    let _ = std::fs::remove_file(&probe);
    Ok(())
}

#[derive(Debug, Clone, Deserialize)]
pub struct PathsSection {
    pub base_dir: String,
    /// Uploads land here before the pipeline runs; contents are transient.
    pub staging_dir: String,
    /// Published HLS trees live here; the layout under this root is read
    /// directly by the file-serving layer.
    pub output_dir: String,
    pub data_dir: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EncoderSection {
    pub ffmpeg_path: String,
    pub ffprobe_path: String,
    pub log_level: String,
    pub run_timeout_seconds: u64,
    pub stderr_tail_bytes: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct IntroSection {
    pub asset_path: String,
    pub canvas_width: u32,
    pub canvas_height: u32,
    pub crf: u8,
    pub preset: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LimitsSection {
    pub max_concurrent_encodes: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HlsSection {
    pub segment_seconds: u32,
}

pub fn load_config<P: AsRef<Path>>(path: P) -> Result<VodpressConfig> {
    load_toml(path)
}

fn load_toml<T, P>(path: P) -> Result<T>
where
    T: DeserializeOwned,
    P: AsRef<Path>,
{
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        source,
        path: path.to_path_buf(),
    })?;
    toml::from_str(&content).map_err(|source| ConfigError::Parse {
        source,
        path: path.to_path_buf(),
    })
}
