//! Completion record repository
//!
//! Each launched output leaves two files in the work directory:
//! `<output_id>.log`, appended to while the encoder runs, and
//! `<output_id>.json` with the [`CompletionRecord`]. The JSON file is written
//! last and atomically, so its presence means the record is complete.

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tracing::debug;
use transcast_core::domain::status::CompletionRecord;
use uuid::Uuid;

/// Destination of an encoder's error stream
pub type LogWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Repository trait for per-output completion records
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Opens the error stream log of an output, truncating an earlier one
    async fn open_log(&self, output_id: Uuid) -> Result<LogWriter>;

    /// Persists the completion record
    async fn complete(&self, output_id: Uuid, record: &CompletionRecord) -> Result<()>;

    /// Persists a whole log, then the completion record
    async fn write(&self, output_id: Uuid, record: &CompletionRecord, log: &[u8]) -> Result<()> {
        let mut writer = self.open_log(output_id).await?;
        writer.write_all(log).await.context("Failed to write output log")?;
        writer.flush().await.context("Failed to flush output log")?;
        self.complete(output_id, record).await
    }

    /// Reads the completion record, `None` while the output is still running
    async fn read(&self, output_id: Uuid) -> Result<Option<CompletionRecord>>;

    /// Last `lines` lines of the captured error stream
    async fn tail(&self, output_id: Uuid, lines: usize) -> Result<Option<Vec<String>>>;

    /// Removes the record and log of an output
    async fn remove(&self, output_id: Uuid) -> Result<()>;

    /// Removes a produced artifact, given relative to the work directory
    async fn remove_artifact(&self, file: &str) -> Result<()>;
}

/// Filesystem implementation of RecordStore rooted at the work directory
#[derive(Debug, Clone)]
pub struct FsRecordStore {
    root: PathBuf,
}

impl FsRecordStore {
    /// Creates a store in `root`, creating the directory if needed
    pub async fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        tokio::fs::create_dir_all(&root)
            .await
            .with_context(|| format!("Failed to create work directory {}", root.display()))?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn record_path(&self, output_id: Uuid) -> PathBuf {
        self.root.join(format!("{}.json", output_id))
    }

    fn log_path(&self, output_id: Uuid) -> PathBuf {
        self.root.join(format!("{}.log", output_id))
    }
}

#[async_trait]
impl RecordStore for FsRecordStore {
    async fn open_log(&self, output_id: Uuid) -> Result<LogWriter> {
        let file = tokio::fs::File::create(self.log_path(output_id))
            .await
            .context("Failed to create output log")?;
        Ok(Box::new(file))
    }

    async fn complete(&self, output_id: Uuid, record: &CompletionRecord) -> Result<()> {
        let body = serde_json::to_vec(record).context("Failed to serialize completion record")?;
        let final_path = self.record_path(output_id);
        let tmp_path = self.root.join(format!(".{}.json.tmp", output_id));

        tokio::fs::write(&tmp_path, body)
            .await
            .context("Failed to write completion record")?;
        tokio::fs::rename(&tmp_path, &final_path)
            .await
            .context("Failed to commit completion record")?;

        debug!("Completion record written for output {}", output_id);
        Ok(())
    }

    async fn read(&self, output_id: Uuid) -> Result<Option<CompletionRecord>> {
        let body = match tokio::fs::read(self.record_path(output_id)).await {
            Ok(body) => body,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e).context("Failed to read completion record"),
        };

        let record = serde_json::from_slice(&body).context("Corrupt completion record")?;
        Ok(Some(record))
    }

    async fn tail(&self, output_id: Uuid, lines: usize) -> Result<Option<Vec<String>>> {
        let body = match tokio::fs::read(self.log_path(output_id)).await {
            Ok(body) => body,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e).context("Failed to read output log"),
        };

        let text = String::from_utf8_lossy(&body);
        let all: Vec<&str> = text.lines().collect();
        let start = all.len().saturating_sub(lines);
        Ok(Some(all[start..].iter().map(|l| l.to_string()).collect()))
    }

    async fn remove(&self, output_id: Uuid) -> Result<()> {
        remove_if_exists(&self.record_path(output_id)).await?;
        remove_if_exists(&self.log_path(output_id)).await
    }

    async fn remove_artifact(&self, file: &str) -> Result<()> {
        remove_if_exists(&self.root.join(file)).await
    }
}

async fn remove_if_exists(path: &Path) -> Result<()> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => {
            debug!("Removed {}", path.display());
            Ok(())
        }
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e).with_context(|| format!("Failed to remove {}", path.display())),
    }
}
