use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::Arc;

use clap::{Args, Parser, Subcommand, ValueEnum};
use serde::Serialize;
use thiserror::Error;
use vodpress_core::{
    load_config, IngestRequest, IngestSource, Pipeline, PublishedAsset, SqliteMetadataStore,
    VideoRecord, VodpressConfig,
};

pub type Result<T> = std::result::Result<T, AppError>;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("config error: {0}")]
    Config(#[from] vodpress_core::ConfigError),
    #[error("deployment error: {0}")]
    Deployment(#[from] vodpress_core::DeploymentConfigError),
    #[error("metadata error: {0}")]
    Metadata(#[from] vodpress_core::MetadataError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("ingest failed during {stage}")]
    IngestFailed { stage: String },
    #[error("{failures} health check(s) failed")]
    Unhealthy { failures: usize },
}

#[derive(Parser, Debug)]
#[command(author, version, about = "VODpress command-line control interface", long_about = None)]
pub struct Cli {
    /// Path to the main vodpress.toml
    #[arg(long, default_value = "configs/vodpress.toml")]
    pub config: PathBuf,
    /// Output format
    #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
    pub format: OutputFormat,
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Ingest a local video file and publish its HLS tree
    Ingest(IngestArgs),
    /// Operations on published videos
    #[command(subcommand)]
    Videos(VideoCommands),
    /// Deployment integrity checks
    #[command(subcommand)]
    Health(HealthCommands),
}

#[derive(Args, Debug)]
pub struct IngestArgs {
    /// Source video file
    pub file: PathBuf,
    /// Title stored with the published video
    #[arg(long)]
    pub title: String,
    /// Optional description
    #[arg(long)]
    pub description: Option<String>,
    /// Job id; generated when omitted
    #[arg(long)]
    pub job_id: Option<String>,
    /// MIME type; guessed from the file extension when omitted
    #[arg(long)]
    pub content_type: Option<String>,
}

#[derive(Subcommand, Debug)]
pub enum VideoCommands {
    /// List published videos, newest first
    List(VideoListArgs),
}

#[derive(Args, Debug)]
pub struct VideoListArgs {
    /// Maximum records returned
    #[arg(long, default_value_t = 20)]
    pub limit: usize,
}

#[derive(Subcommand, Debug)]
pub enum HealthCommands {
    /// Verify roots, the intro asset and the encoder binaries
    Check,
}

pub async fn run(cli: Cli) -> Result<()> {
    let config = load_config(&cli.config)?;

    match &cli.command {
        Commands::Ingest(args) => run_ingest(config, args, cli.format).await,
        Commands::Videos(VideoCommands::List(args)) => {
            let store = open_store(&config)?;
            let videos = vodpress_core::MetadataStore::list(&store, args.limit).await?;
            render(&VideoListing { videos }, cli.format)
        }
        Commands::Health(HealthCommands::Check) => {
            let report = gather_health(&config);
            let failures = report.checks.iter().filter(|check| !check.ok).count();
            render(&report, cli.format)?;
            if failures > 0 {
                return Err(AppError::Unhealthy { failures });
            }
            Ok(())
        }
    }
}

async fn run_ingest(config: VodpressConfig, args: &IngestArgs, format: OutputFormat) -> Result<()> {
    config.validate_deployment()?;
    let store = open_store(&config)?;
    let pipeline = Pipeline::new(config, Arc::new(store));

    let content_type = args
        .content_type
        .clone()
        .or_else(|| guess_content_type(&args.file));
    let request = IngestRequest {
        job_id: args.job_id.clone(),
        title: args.title.clone(),
        description: args.description.clone(),
        content_type,
        source: IngestSource::local(&args.file),
    };

    match pipeline.ingest(request).await {
        Ok(asset) => render(&IngestOutcome::from(asset), format),
        Err(err) => {
            let report = err.report();
            let stage = report.stage.clone();
            render(&report, format)?;
            Err(AppError::IngestFailed { stage })
        }
    }
}

fn open_store(config: &VodpressConfig) -> Result<SqliteMetadataStore> {
    std::fs::create_dir_all(config.data_root())?;
    let store = SqliteMetadataStore::new(config.data_root().join("videos.sqlite"))?;
    store.initialize()?;
    Ok(store)
}

fn guess_content_type(path: &Path) -> Option<String> {
    let ext = path.extension()?.to_str()?.to_ascii_lowercase();
    let mime = match ext.as_str() {
        "mp4" | "m4v" => "video/mp4",
        "mov" => "video/quicktime",
        "mkv" => "video/x-matroska",
        "webm" => "video/webm",
        _ => return None,
    };
    Some(mime.to_string())
}

#[derive(Debug, Serialize)]
struct IngestOutcome {
    job_id: String,
    title: String,
    master_playlist: PathBuf,
    rendition_count: usize,
}

impl From<PublishedAsset> for IngestOutcome {
    fn from(asset: PublishedAsset) -> Self {
        Self {
            job_id: asset.job_id,
            title: asset.title,
            master_playlist: asset.master_playlist,
            rendition_count: asset.rendition_count,
        }
    }
}

#[derive(Debug, Serialize)]
struct VideoListing {
    videos: Vec<VideoRecord>,
}

#[derive(Debug, Serialize)]
pub struct HealthReport {
    pub checks: Vec<HealthCheck>,
    pub healthy: bool,
}

#[derive(Debug, Serialize)]
pub struct HealthCheck {
    pub name: &'static str,
    pub ok: bool,
    pub detail: String,
}

pub fn gather_health(config: &VodpressConfig) -> HealthReport {
    let mut checks = Vec::new();

    let intro = config.intro_asset();
    checks.push(HealthCheck {
        name: "intro_asset",
        ok: intro.is_file(),
        detail: intro.display().to_string(),
    });

    for (name, root) in [
        ("staging_root", config.staging_root()),
        ("output_root", config.output_root()),
        ("data_root", config.data_root()),
    ] {
        let ok = ensure_writable(&root);
        checks.push(HealthCheck {
            name,
            ok,
            detail: root.display().to_string(),
        });
    }

    for (name, binary) in [
        ("ffmpeg", &config.encoder.ffmpeg_path),
        ("ffprobe", &config.encoder.ffprobe_path),
    ] {
        checks.push(HealthCheck {
            name,
            ok: binary_responds(binary),
            detail: binary.clone(),
        });
    }

    let healthy = checks.iter().all(|check| check.ok);
    HealthReport { checks, healthy }
}

fn ensure_writable(root: &Path) -> bool {
    if std::fs::create_dir_all(root).is_err() {
        return false;
    }
    let probe = root.join(".vodpressctl-probe");
    let ok = std::fs::write(&probe, b"probe").is_ok();
    let _ = std::fs::remove_file(&probe);
    ok
}

fn binary_responds(binary: &str) -> bool {
    Command::new(binary)
        .arg("-version")
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .map(|status| status.success())
        .unwrap_or(false)
}

fn render<T: Serialize + TextRender>(value: &T, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(value)?),
        OutputFormat::Text => value.render_text(),
    }
    Ok(())
}

trait TextRender {
    fn render_text(&self);
}

impl TextRender for IngestOutcome {
    fn render_text(&self) {
        println!("published {} ({})", self.job_id, self.title);
        println!("  master playlist: {}", self.master_playlist.display());
        println!("  renditions: {}", self.rendition_count);
    }
}

impl TextRender for vodpress_core::FailureReport {
    fn render_text(&self) {
        println!("job {} failed during {}", self.job_id, self.stage);
        println!("  {}", self.message);
    }
}

impl TextRender for VideoListing {
    fn render_text(&self) {
        if self.videos.is_empty() {
            println!("no published videos");
            return;
        }
        for video in &self.videos {
            println!(
                "{}  {}  {}  {}",
                video.video_id,
                video.published_at.to_rfc3339(),
                video.title,
                video.asset_path
            );
        }
    }
}

impl TextRender for HealthReport {
    fn render_text(&self) {
        for check in &self.checks {
            let mark = if check.ok { "ok " } else { "FAIL" };
            println!("{mark} {:<13} {}", check.name, check.detail);
        }
    }
}
