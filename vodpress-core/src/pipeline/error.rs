use std::io;
use std::path::PathBuf;

use chrono::Utc;
use thiserror::Error;

use crate::encoder::EncoderError;
use crate::ladder::LadderError;
use crate::manifest::ManifestError;
use crate::metadata::MetadataError;
use crate::probe::ProbeError;
use crate::staging::StagingError;

use super::types::FailureReport;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("job id {0:?} is not usable as a directory name")]
    InvalidJobId(String),
    #[error("job {job_id} is already published")]
    AlreadyPublished { job_id: String },
    #[error("job {job_id} failed while staging the upload: {source}")]
    Staging {
        job_id: String,
        source: StagingError,
    },
    #[error("job {job_id} rejected: {reason}")]
    InvalidSource { job_id: String, reason: String },
    #[error("job {job_id} failed while probing the upload: {source}")]
    Probe { job_id: String, source: ProbeError },
    #[error("job {job_id} failed while attaching the intro clip: {source}")]
    IntroAttachment {
        job_id: String,
        source: EncoderError,
    },
    #[error("job {job_id} failed while generating renditions: {source}")]
    Rendition {
        job_id: String,
        source: EncoderError,
    },
    #[error("job {job_id} failed to publish {path}: {source}")]
    Publish {
        job_id: String,
        path: PathBuf,
        source: io::Error,
    },
    #[error("job {job_id} failed writing the publish manifest: {source}")]
    Manifest {
        job_id: String,
        source: ManifestError,
    },
    #[error("metadata store rejected job {job_id}: {source}")]
    Metadata {
        job_id: String,
        source: MetadataError,
    },
    #[error("invalid ladder: {0}")]
    Ladder(#[from] LadderError),
}

pub type PipelineResult<T> = Result<T, PipelineError>;

impl PipelineError {
    pub fn job_id(&self) -> Option<&str> {
        match self {
            PipelineError::InvalidJobId(_) | PipelineError::Ladder(_) => None,
            PipelineError::AlreadyPublished { job_id }
            | PipelineError::Staging { job_id, .. }
            | PipelineError::InvalidSource { job_id, .. }
            | PipelineError::Probe { job_id, .. }
            | PipelineError::IntroAttachment { job_id, .. }
            | PipelineError::Rendition { job_id, .. }
            | PipelineError::Publish { job_id, .. }
            | PipelineError::Manifest { job_id, .. }
            | PipelineError::Metadata { job_id, .. } => Some(job_id),
        }
    }

    /// Stage label for failure reports and logs.
    pub fn stage(&self) -> &'static str {
        match self {
            PipelineError::InvalidJobId(_)
            | PipelineError::AlreadyPublished { .. }
            | PipelineError::Ladder(_) => "admission",
            PipelineError::Staging { .. } => "staging",
            PipelineError::InvalidSource { .. } | PipelineError::Probe { .. } => "probe",
            PipelineError::IntroAttachment { .. } => "intro_attachment",
            PipelineError::Rendition { .. } => "renditions",
            PipelineError::Publish { .. } | PipelineError::Manifest { .. } => "publish",
            PipelineError::Metadata { .. } => "metadata",
        }
    }

    pub fn report(&self) -> FailureReport {
        FailureReport {
            job_id: self.job_id().unwrap_or("-").to_string(),
            stage: self.stage().to_string(),
            message: self.to_string(),
            failed_at: Utc::now(),
        }
    }
}
