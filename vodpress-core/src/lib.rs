pub mod config;
pub mod encoder;
pub mod error;
pub mod ladder;
pub mod manifest;
pub mod metadata;
pub mod pipeline;
pub mod probe;
pub mod staging;

pub use config::{load_config, EncoderSection, HlsSection, IntroSection, VodpressConfig};
pub use encoder::{
    CommandExecutor, EncoderError, EncoderGateway, EncoderInvocation, EncoderRunReport,
    SystemCommandExecutor,
};
pub use error::{ConfigError, DeploymentConfigError};
pub use ladder::{Ladder, LadderError, QualityRendition};
pub use metadata::{
    MetadataError, MetadataStore, SqliteMetadataStore, SqliteMetadataStoreBuilder, VideoRecord,
};
pub use pipeline::{
    FailureReport, IngestRequest, IngestSource, JobState, Pipeline, PipelineError, PipelineResult,
    PublishedAsset, MASTER_PLAYLIST_NAME, RENDITION_PLAYLIST_NAME, SEGMENT_TEMPLATE,
};
pub use probe::{MediaProbe, ProbeError, SourceSummary};
pub use staging::{StagedSource, StagingError, StagingStore};
