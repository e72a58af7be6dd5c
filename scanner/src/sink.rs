use serde::Deserialize;
use std::collections::HashSet;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};
use vodscan_common::record::EventRow;

/// Append-only JSON Lines file of located events, one object per line.
pub struct JsonlSink {
    path: PathBuf,
}

#[derive(Deserialize)]
struct StoredRow {
    source_url: String,
}

impl JsonlSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    #[allow(dead_code)]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Source URLs that already have rows, so reruns can skip them.
    pub async fn existing_urls(&self) -> Result<HashSet<String>, SinkError> {
        let content = match tokio::fs::read_to_string(&self.path).await {
            Ok(c) => c,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(HashSet::new()),
            Err(e) => return Err(SinkError::Read(self.path.display().to_string(), e)),
        };

        let mut urls = HashSet::new();
        for (n, line) in content.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<StoredRow>(line) {
                Ok(row) => {
                    urls.insert(row.source_url);
                }
                Err(e) => warn!(line = n + 1, error = %e, "skipping unparseable row"),
            }
        }
        Ok(urls)
    }

    pub async fn append(&self, rows: &[EventRow]) -> Result<(), SinkError> {
        if rows.is_empty() {
            return Ok(());
        }

        let mut buf = String::new();
        for row in rows {
            buf.push_str(&serde_json::to_string(row)?);
            buf.push('\n');
        }

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| SinkError::Write(parent.display().to_string(), e))?;
        }

        let write_err = |e: std::io::Error| SinkError::Write(self.path.display().to_string(), e);
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .map_err(write_err)?;
        file.write_all(buf.as_bytes()).await.map_err(write_err)?;
        file.flush().await.map_err(write_err)?;

        debug!(rows = rows.len(), path = %self.path.display(), "rows appended");
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    #[error("failed to read {0}: {1}")]
    Read(String, std::io::Error),
    #[error("failed to write {0}: {1}")]
    Write(String, std::io::Error),
    #[error("failed to encode row: {0}")]
    Encode(#[from] serde_json::Error),
}
