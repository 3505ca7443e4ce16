mod error;
mod intro;
mod renditions;
mod types;

use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::VodpressConfig;
use crate::encoder::{CommandExecutor, EncoderGateway};
use crate::ladder::Ladder;
use crate::manifest;
use crate::metadata::{MetadataStore, VideoRecord};
use crate::probe::{MediaProbe, ProbeError};
use crate::staging::{StagingError, StagingStore};

pub use error::{PipelineError, PipelineResult};
pub use renditions::{MASTER_PLAYLIST_NAME, RENDITION_PLAYLIST_NAME, SEGMENT_TEMPLATE};
pub use types::{FailureReport, IngestRequest, IngestSource, JobState, PublishedAsset};

/// Renditions are built under this subdirectory of the output root and
/// renamed into place only after every expected output is verified, so the
/// serving layer never observes a half-built canonical tree.
const PUBLISH_STAGING_DIR: &str = ".staging";

/// Sequences one job through staging, intro attachment, rendition fan-out
/// and publish, with cleanup of intermediates on every exit path.
pub struct Pipeline {
    config: Arc<VodpressConfig>,
    staging: StagingStore,
    gateway: EncoderGateway,
    probe: MediaProbe,
    metadata: Arc<dyn MetadataStore>,
    ladder: Ladder,
    encode_slots: Arc<Semaphore>,
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("staging", &self.staging)
            .field("gateway", &self.gateway)
            .field("ladder", &self.ladder)
            .finish()
    }
}

impl Pipeline {
    pub fn new(config: VodpressConfig, metadata: Arc<dyn MetadataStore>) -> Self {
        let staging = StagingStore::new(config.staging_root());
        let gateway = EncoderGateway::new(&config.encoder);
        let probe = MediaProbe::new(&config.encoder);
        let encode_slots = Arc::new(Semaphore::new(config.limits.max_concurrent_encodes.max(1)));
        Self {
            config: Arc::new(config),
            staging,
            gateway,
            probe,
            metadata,
            ladder: Ladder::standard(),
            encode_slots,
        }
    }

    pub fn with_ladder(mut self, ladder: Ladder) -> Self {
        self.ladder = ladder;
        self
    }

    pub fn with_executor(mut self, executor: Arc<dyn CommandExecutor>) -> Self {
        self.gateway = self.gateway.with_executor(executor.clone());
        self.probe = self.probe.with_executor(executor);
        self
    }

    pub fn ladder(&self) -> &Ladder {
        &self.ladder
    }

    /// Ingest one upload and publish its adaptive HLS tree. On failure the
    /// job's temp artifacts and any partial output are reclaimed before the
    /// error is returned; `PipelineError::report` shapes it for the caller.
    pub async fn ingest(&self, request: IngestRequest) -> PipelineResult<PublishedAsset> {
        match self.run_job(request).await {
            Ok(asset) => Ok(asset),
            Err(err) => {
                warn!(
                    job_id = err.job_id().unwrap_or("-"),
                    stage = err.stage(),
                    state = %JobState::Failed,
                    error = %err,
                    "ingest failed"
                );
                Err(err)
            }
        }
    }

    async fn run_job(&self, request: IngestRequest) -> PipelineResult<PublishedAsset> {
        let job_id = admit_job_id(request.job_id)?;

        // Re-ingesting a published id is rejected; replacing a live asset in
        // place would yank segments out from under active viewers.
        let existing = self
            .metadata
            .fetch(&job_id)
            .await
            .map_err(|source| PipelineError::Metadata {
                job_id: job_id.clone(),
                source,
            })?;
        if existing.is_some() {
            return Err(PipelineError::AlreadyPublished { job_id });
        }

        info!(job_id = %job_id, title = %request.title, "ingest accepted");
        let staged = self.stage_source(&job_id, request.source).await?;
        info!(
            job_id = %job_id,
            state = %JobState::Staged,
            bytes = staged.len(),
            "upload staged"
        );

        self.validate_source(&job_id, staged.path()).await?;

        // One permit covers the job's encoder runs; the pool size caps how
        // many external encodes the host runs at once.
        let _permit = self
            .encode_slots
            .acquire()
            .await
            .expect("encoder semaphore never closes");

        let normalized = self
            .staging
            .allocate(&format!("{job_id}-normalized"), ".mp4")
            .map_err(|source| PipelineError::Staging {
                job_id: job_id.clone(),
                source,
            })?;
        let intro_run = intro::build_invocation(
            &self.config.intro,
            &self.config.intro_asset(),
            staged.path(),
            &normalized,
        );
        self.gateway
            .run(&intro_run)
            .await
            .map_err(|source| PipelineError::IntroAttachment {
                job_id: job_id.clone(),
                source,
            })?;
        drop(staged);
        info!(job_id = %job_id, state = %JobState::Normalized, "intro attached");

        let output_root = self.config.output_root();
        let work_tree = output_root.join(PUBLISH_STAGING_DIR).join(&job_id);
        remove_existing_tree(&job_id, &work_tree).await?;
        let guard = PublishGuard::new(work_tree.clone());

        renditions::prepare_output_tree(&work_tree, &self.ladder)
            .await
            .map_err(|source| PipelineError::Publish {
                job_id: job_id.clone(),
                path: work_tree.clone(),
                source,
            })?;
        let rendition_run =
            renditions::build_invocation(&self.config.hls, &normalized, &work_tree, &self.ladder);
        self.gateway
            .run(&rendition_run)
            .await
            .map_err(|source| PipelineError::Rendition {
                job_id: job_id.clone(),
                source,
            })?;
        drop(normalized);
        info!(
            job_id = %job_id,
            state = %JobState::Rendered,
            renditions = self.ladder.len(),
            "rendition tree complete"
        );

        manifest::write_manifest(&work_tree, &job_id, &self.ladder)
            .await
            .map_err(|source| PipelineError::Manifest {
                job_id: job_id.clone(),
                source,
            })?;

        let canonical = output_root.join(&job_id);
        remove_existing_tree(&job_id, &canonical).await?;
        tokio::fs::rename(&work_tree, &canonical)
            .await
            .map_err(|source| PipelineError::Publish {
                job_id: job_id.clone(),
                path: canonical.clone(),
                source,
            })?;
        guard.defuse();

        let master_playlist = canonical.join(MASTER_PLAYLIST_NAME);
        let published_at = Utc::now();
        let record = VideoRecord {
            video_id: job_id.clone(),
            title: request.title.clone(),
            description: request.description.clone(),
            content_type: request.content_type.clone(),
            asset_path: master_playlist.to_string_lossy().to_string(),
            published_at,
        };
        if let Err(source) = self.metadata.record_published(&record).await {
            // A failed job must not leave a canonical tree behind.
            if let Err(error) = tokio::fs::remove_dir_all(&canonical).await {
                warn!(
                    job_id = %job_id,
                    path = %canonical.display(),
                    %error,
                    "failed to remove output tree after metadata failure"
                );
            }
            return Err(PipelineError::Metadata { job_id, source });
        }

        info!(
            job_id = %job_id,
            state = %JobState::Published,
            output = %canonical.display(),
            "job published"
        );
        Ok(PublishedAsset {
            job_id,
            title: request.title,
            output_dir: canonical,
            master_playlist,
            rendition_count: self.ladder.len(),
            published_at,
        })
    }

    async fn stage_source(
        &self,
        job_id: &str,
        source: IngestSource,
    ) -> PipelineResult<crate::staging::StagedSource> {
        let staged = match source {
            IngestSource::Stream {
                reader,
                file_name,
                declared_len,
            } => self.staging.stage(reader, &file_name, declared_len).await,
            IngestSource::LocalFile { path } => match tokio::fs::File::open(&path).await {
                Ok(file) => {
                    let declared_len = file.metadata().await.ok().map(|meta| meta.len());
                    let file_name = path
                        .file_name()
                        .map(|name| name.to_string_lossy().to_string())
                        .unwrap_or_else(|| "upload.bin".to_string());
                    self.staging.stage(file, &file_name, declared_len).await
                }
                Err(source) => Err(StagingError::Io {
                    source,
                    path: path.clone(),
                }),
            },
        };
        staged.map_err(|source| PipelineError::Staging {
            job_id: job_id.to_string(),
            source,
        })
    }

    async fn validate_source(&self, job_id: &str, path: &std::path::Path) -> PipelineResult<()> {
        match self.probe.inspect(path).await {
            Ok(Some(summary)) => {
                if !summary.has_video {
                    return Err(PipelineError::InvalidSource {
                        job_id: job_id.to_string(),
                        reason: "no video stream".to_string(),
                    });
                }
                if !summary.has_audio {
                    return Err(PipelineError::InvalidSource {
                        job_id: job_id.to_string(),
                        reason: "no audio stream".to_string(),
                    });
                }
                debug!(
                    job_id = %job_id,
                    width = ?summary.width,
                    height = ?summary.height,
                    duration = ?summary.duration_seconds,
                    "source probe ok"
                );
                Ok(())
            }
            Ok(None) => {
                warn!(job_id = %job_id, "ffprobe unavailable, skipping source validation");
                Ok(())
            }
            Err(ProbeError::Unreadable { stderr, .. }) => Err(PipelineError::InvalidSource {
                job_id: job_id.to_string(),
                reason: format!("unreadable source: {stderr}"),
            }),
            Err(source) => Err(PipelineError::Probe {
                job_id: job_id.to_string(),
                source,
            }),
        }
    }
}

fn admit_job_id(candidate: Option<String>) -> PipelineResult<String> {
    let Some(id) = candidate else {
        return Ok(Uuid::new_v4().to_string());
    };
    // Job ids name directories under the output root; keep them to plain
    // file-name characters and out of the publish staging namespace.
    let acceptable = !id.is_empty()
        && !id.starts_with('.')
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
    if acceptable {
        Ok(id)
    } else {
        Err(PipelineError::InvalidJobId(id))
    }
}

async fn remove_existing_tree(job_id: &str, path: &std::path::Path) -> PipelineResult<()> {
    match tokio::fs::remove_dir_all(path).await {
        Ok(()) => {
            debug!(job_id = %job_id, path = %path.display(), "removed leftover tree");
            Ok(())
        }
        Err(error) if error.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(source) => Err(PipelineError::Publish {
            job_id: job_id.to_string(),
            path: path.to_path_buf(),
            source,
        }),
    }
}

/// Reaps the publish staging subtree unless the job reached the rename.
/// Covers error returns and caller cancellation alike.
struct PublishGuard {
    path: PathBuf,
    armed: bool,
}

impl PublishGuard {
    fn new(path: PathBuf) -> Self {
        Self { path, armed: true }
    }

    fn defuse(mut self) {
        self.armed = false;
    }
}

impl Drop for PublishGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        if let Err(error) = std::fs::remove_dir_all(&self.path) {
            if error.kind() != std::io::ErrorKind::NotFound {
                warn!(
                    path = %self.path.display(),
                    %error,
                    "failed to remove publish staging tree"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_job_ids_are_unique() {
        let a = admit_job_id(None).unwrap();
        let b = admit_job_id(None).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn job_ids_that_escape_the_output_root_are_rejected() {
        for bad in ["", "..", "a/b", ".staging", "job id", "c:\\x"] {
            assert!(
                matches!(
                    admit_job_id(Some(bad.to_string())),
                    Err(PipelineError::InvalidJobId(_))
                ),
                "{bad:?} should be rejected"
            );
        }
        assert_eq!(
            admit_job_id(Some("job-42_final.v2".to_string())).unwrap(),
            "job-42_final.v2"
        );
    }

    #[test]
    fn publish_guard_reaps_unless_defused() {
        let base = tempfile::TempDir::new().unwrap();
        let tree = base.path().join("work");
        std::fs::create_dir_all(tree.join("0")).unwrap();

        let guard = PublishGuard::new(tree.clone());
        drop(guard);
        assert!(!tree.exists());

        std::fs::create_dir_all(tree.join("0")).unwrap();
        let guard = PublishGuard::new(tree.clone());
        guard.defuse();
        assert!(tree.exists());
    }
}
