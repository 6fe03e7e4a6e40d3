/// Atomic on-disk persistence for positions, trade history and the paper ledger.
///
/// Every durable write goes through `write_atomic`: serialize to a tempfile in
/// the same directory as the target, fsync, then rename over the destination.
/// A crash mid-write leaves the previous file intact; readers never observe a
/// partially-written file.
use std::path::{Path, PathBuf};

use serde::{de::DeserializeOwned, Serialize};
use tempfile::NamedTempFile;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::debug;

use crate::error::{Result, TradingError};

/// Write `value` to `path` as pretty JSON, atomically.
pub async fn write_atomic<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let json = serde_json::to_vec_pretty(value)?;
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    tokio::fs::create_dir_all(dir).await?;

    let dir = dir.to_path_buf();
    let path = path.to_path_buf();
    tokio::task::spawn_blocking(move || -> Result<()> {
        let mut tmp = NamedTempFile::new_in(&dir)
            .map_err(|e| TradingError::FileError(e))?;
        std::io::Write::write_all(&mut tmp, &json).map_err(TradingError::FileError)?;
        tmp.as_file().sync_all().map_err(TradingError::FileError)?;
        tmp.persist(&path)
            .map_err(|e| TradingError::FileError(e.error))?;
        Ok(())
    })
    .await
    .map_err(|e| TradingError::InternalError(format!("persistence task join failed: {e}")))??;

    debug!("wrote {} atomically", path.display());
    Ok(())
}

/// Read a JSON file written by [`write_atomic`]. Returns `None` if the file
/// does not exist yet (first run).
pub async fn read_atomic<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    if !path.exists() {
        return Ok(None);
    }
    let content = tokio::fs::read(path).await?;
    let value = serde_json::from_slice(&content)?;
    Ok(Some(value))
}

/// Append one JSON line to an append-only log (positions journal, trade
/// history). Each write is flushed and fsynced; this is not atomic across the
/// whole file the way `write_atomic` is, matching the append-only semantics
/// the journal requires (old lines must never be rewritten).
pub async fn append_line<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    if let Some(dir) = path.parent() {
        tokio::fs::create_dir_all(dir).await?;
    }
    let json_line = serde_json::to_string(value)?;
    let mut file = tokio::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await?;
    file.write_all(json_line.as_bytes()).await?;
    file.write_all(b"\n").await?;
    file.sync_all().await?;
    Ok(())
}

/// Read every line of an append-only JSONL log, skipping lines that fail to
/// parse (a torn final line from a crash mid-append).
pub async fn read_lines<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let file = tokio::fs::File::open(path).await?;
    let reader = BufReader::new(file);
    let mut lines = reader.lines();
    let mut out = Vec::new();
    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str(&line) {
            Ok(v) => out.push(v),
            Err(e) => {
                tracing::warn!("skipping unparsable journal line: {e}");
            }
        }
    }
    Ok(out)
}

/// Standard layout of the three persisted files under a data directory
/// (spec §6: positions journal, trade history, paper ledger).
#[derive(Debug, Clone)]
pub struct DataPaths {
    pub root: PathBuf,
}

impl DataPaths {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        DataPaths { root: root.into() }
    }

    pub fn positions_journal(&self) -> PathBuf {
        self.root.join("positions.jsonl")
    }

    pub fn trade_history(&self) -> PathBuf {
        self.root.join("trades.jsonl")
    }

    pub fn paper_ledger(&self) -> PathBuf {
        self.root.join("paper_ledger.json")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct Sample {
        a: i32,
        b: String,
    }

    #[tokio::test]
    async fn write_then_read_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sample.json");
        let value = Sample {
            a: 7,
            b: "hello".to_string(),
        };
        write_atomic(&path, &value).await.unwrap();
        let read_back: Sample = read_atomic(&path).await.unwrap().unwrap();
        assert_eq!(value, read_back);
    }

    #[tokio::test]
    async fn missing_file_reads_as_none() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing.json");
        let read_back: Option<Sample> = read_atomic(&path).await.unwrap();
        assert!(read_back.is_none());
    }

    #[tokio::test]
    async fn append_then_read_lines_preserves_order() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("log.jsonl");
        for i in 0..3 {
            append_line(&path, &Sample { a: i, b: "x".into() })
                .await
                .unwrap();
        }
        let lines: Vec<Sample> = read_lines(&path).await.unwrap();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[2].a, 2);
    }
}
