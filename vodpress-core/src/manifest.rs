use std::io;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::Serialize;
use sha2::{Digest, Sha256};
use thiserror::Error;
use tokio::fs;

use crate::ladder::Ladder;
use crate::pipeline::{MASTER_PLAYLIST_NAME, RENDITION_PLAYLIST_NAME};

pub const MANIFEST_NAME: &str = "manifest.json";

#[derive(Debug, Error)]
pub enum ManifestError {
    #[error("io error at {path}: {source}")]
    Io { source: io::Error, path: PathBuf },
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type ManifestResult<T> = Result<T, ManifestError>;

#[derive(Debug, Serialize)]
pub struct PublishManifest {
    pub job_id: String,
    pub master_playlist: String,
    pub master_sha256: String,
    pub renditions: Vec<ManifestRendition>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct ManifestRendition {
    pub index: usize,
    pub width: u32,
    pub height: u32,
    pub video_bitrate_kbps: u32,
    pub audio_bitrate_kbps: u32,
    pub playlist: String,
    pub playlist_sha256: String,
}

/// Write `manifest.json` with checksums of every playlist into the (still
/// unpublished) output tree. Segment files are not hashed; their count is
/// variable and the playlists already commit to their names.
pub async fn write_manifest(
    tree: &Path,
    job_id: &str,
    ladder: &Ladder,
) -> ManifestResult<PathBuf> {
    let master_rel = MASTER_PLAYLIST_NAME.to_string();
    let master_sha256 = checksum(&tree.join(MASTER_PLAYLIST_NAME)).await?;

    let mut renditions = Vec::with_capacity(ladder.len());
    for rendition in ladder.renditions() {
        let playlist_rel = format!("{}/{}", rendition.dir_name(), RENDITION_PLAYLIST_NAME);
        let playlist_sha256 = checksum(&tree.join(&playlist_rel)).await?;
        renditions.push(ManifestRendition {
            index: rendition.index,
            width: rendition.width,
            height: rendition.height,
            video_bitrate_kbps: rendition.video_bitrate_kbps,
            audio_bitrate_kbps: rendition.audio_bitrate_kbps,
            playlist: playlist_rel,
            playlist_sha256,
        });
    }

    let manifest = PublishManifest {
        job_id: job_id.to_string(),
        master_playlist: master_rel,
        master_sha256,
        renditions,
        created_at: Utc::now(),
    };

    let path = tree.join(MANIFEST_NAME);
    fs::write(&path, serde_json::to_vec_pretty(&manifest)?)
        .await
        .map_err(|source| ManifestError::Io {
            source,
            path: path.clone(),
        })?;
    Ok(path)
}

async fn checksum(path: &Path) -> ManifestResult<String> {
    let bytes = fs::read(path).await.map_err(|source| ManifestError::Io {
        source,
        path: path.to_path_buf(),
    })?;
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    Ok(hex::encode(hasher.finalize()))
}
