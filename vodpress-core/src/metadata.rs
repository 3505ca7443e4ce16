use std::io;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OpenFlags, Row};
use serde::Serialize;
use thiserror::Error;

const VIDEOS_SCHEMA: &str = include_str!("../../sql/videos.sql");

#[derive(Debug, Error)]
pub enum MetadataError {
    #[error("failed to open metadata database {path}: {source}")]
    Open {
        source: rusqlite::Error,
        path: PathBuf,
    },
    #[error("failed to execute statement on metadata database: {0}")]
    Execute(#[from] rusqlite::Error),
    #[error("metadata database path not configured")]
    MissingStore,
    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

pub type MetadataResult<T> = Result<T, MetadataError>;

/// Record handed to the metadata collaborator when a job publishes.
#[derive(Debug, Clone, Serialize)]
pub struct VideoRecord {
    pub video_id: String,
    pub title: String,
    pub description: Option<String>,
    pub content_type: Option<String>,
    /// Canonical master playlist path under the output root.
    pub asset_path: String,
    pub published_at: DateTime<Utc>,
}

impl VideoRecord {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            video_id: row.get("video_id")?,
            title: row.get("title")?,
            description: row.get("description")?,
            content_type: row.get("content_type")?,
            asset_path: row.get("asset_path")?,
            published_at: row.get("published_at")?,
        })
    }
}

/// Port for the metadata collaborator. The pipeline calls
/// `record_published` exactly once per successful job; tests substitute a
/// recording fake.
#[async_trait::async_trait]
pub trait MetadataStore: Send + Sync {
    async fn record_published(&self, record: &VideoRecord) -> MetadataResult<()>;
    async fn fetch(&self, video_id: &str) -> MetadataResult<Option<VideoRecord>>;
    async fn list(&self, limit: usize) -> MetadataResult<Vec<VideoRecord>>;
}

#[derive(Debug, Clone, Default)]
pub struct SqliteMetadataStoreBuilder {
    path: Option<PathBuf>,
    read_only: bool,
}

impl SqliteMetadataStoreBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn path(mut self, path: impl AsRef<Path>) -> Self {
        self.path = Some(path.as_ref().to_path_buf());
        self
    }

    pub fn read_only(mut self, value: bool) -> Self {
        self.read_only = value;
        self
    }

    pub fn build(self) -> MetadataResult<SqliteMetadataStore> {
        let path = self.path.ok_or(MetadataError::MissingStore)?;
        let flags = if self.read_only {
            OpenFlags::SQLITE_OPEN_READ_ONLY
        } else {
            OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_CREATE
        };
        Ok(SqliteMetadataStore { path, flags })
    }
}

#[derive(Debug, Clone)]
pub struct SqliteMetadataStore {
    path: PathBuf,
    flags: OpenFlags,
}

impl SqliteMetadataStore {
    pub fn builder() -> SqliteMetadataStoreBuilder {
        SqliteMetadataStoreBuilder::new()
    }

    pub fn new(path: impl AsRef<Path>) -> MetadataResult<Self> {
        SqliteMetadataStoreBuilder::new().path(path).build()
    }

    fn open(&self) -> MetadataResult<Connection> {
        let conn =
            Connection::open_with_flags(&self.path, self.flags).map_err(|source| {
                MetadataError::Open {
                    source,
                    path: self.path.clone(),
                }
            })?;
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;\n\
             PRAGMA synchronous = NORMAL;\n\
             PRAGMA busy_timeout = 5000;\n",
        )
        .map_err(|source| MetadataError::Open {
            source,
            path: self.path.clone(),
        })?;
        Ok(conn)
    }

    pub fn initialize(&self) -> MetadataResult<()> {
        let conn = self.open()?;
        conn.execute_batch(VIDEOS_SCHEMA)?;
        Ok(())
    }
}

#[async_trait::async_trait]
impl MetadataStore for SqliteMetadataStore {
    async fn record_published(&self, record: &VideoRecord) -> MetadataResult<()> {
        let conn = self.open()?;
        conn.execute(
            "INSERT INTO videos (video_id, title, description, content_type, asset_path, published_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                &record.video_id,
                &record.title,
                &record.description,
                &record.content_type,
                &record.asset_path,
                &record.published_at,
            ],
        )?;
        Ok(())
    }

    async fn fetch(&self, video_id: &str) -> MetadataResult<Option<VideoRecord>> {
        let conn = self.open()?;
        let mut stmt = conn.prepare("SELECT * FROM videos WHERE video_id = ?1")?;
        let mut rows = stmt.query(params![video_id])?;
        match rows.next()? {
            Some(row) => Ok(Some(VideoRecord::from_row(row)?)),
            None => Ok(None),
        }
    }

    async fn list(&self, limit: usize) -> MetadataResult<Vec<VideoRecord>> {
        let conn = self.open()?;
        let mut stmt =
            conn.prepare("SELECT * FROM videos ORDER BY published_at DESC LIMIT ?1")?;
        let mut rows = stmt.query(params![limit as i64])?;
        let mut records = Vec::new();
        while let Some(row) = rows.next()? {
            records.push(VideoRecord::from_row(row)?);
        }
        Ok(records)
    }
}
