//! File-backed durable log.
//!
//! Records are stored one JSON object per line. Each batch is written with a
//! single `write_all` followed by `sync_all`, so a successful append survives
//! a crash. A crash mid-write can leave a torn final line; it is cut off when
//! the log is next opened. Bytes from a batch whose write or sync failed are
//! cut off before the next write, so a retried batch appears once.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use delayq_core::{Error, LogConfig, Result};
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::event::PersistRecord;
use crate::store::{DurableLog, MemoryLog, TracingLog};

/// Open the backend selected by `config`, wrapped in [`TracingLog`].
///
/// # Errors
///
/// Returns `Error::Io` if a file backend cannot be opened.
pub async fn open_log(config: &LogConfig) -> Result<Arc<dyn DurableLog>> {
    match config {
        LogConfig::Memory => {
            info!("Using in-memory durable log");
            Ok(Arc::new(TracingLog::new(MemoryLog::new())))
        }
        LogConfig::File { path } => Ok(Arc::new(TracingLog::new(FileLog::open(path).await?))),
    }
}

/// Append-only JSON-lines log file.
pub struct FileLog {
    path: PathBuf,
    tail: Mutex<Tail>,
}

/// Open file handle plus the length of its durable prefix.
struct Tail {
    file: File,
    committed: u64,
}

impl Tail {
    /// Cut anything written past the committed length, so a batch that
    /// failed to sync is never left behind to be written a second time.
    async fn discard_uncommitted(&mut self) -> std::io::Result<()> {
        let len = self.file.metadata().await?.len();
        if len > self.committed {
            warn!(
                committed = self.committed,
                dropped_bytes = len - self.committed,
                "Discarding uncommitted log bytes"
            );
            self.file.set_len(self.committed).await?;
            self.file.sync_all().await?;
        }
        Ok(())
    }
}

impl FileLog {
    /// Open (creating if needed) the log at `path`.
    ///
    /// Parent directories are created. A torn final line left by an
    /// interrupted write is truncated away.
    ///
    /// # Errors
    ///
    /// Returns `Error::Io` if the directory or file cannot be created or opened.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .read(true)
            .open(&path)
            .await?;

        let committed = Self::intact_len(&path).await?;
        let mut tail = Tail { file, committed };
        tail.discard_uncommitted().await?;

        info!(path = %path.display(), committed, "Opened durable log file");
        Ok(Self {
            path,
            tail: Mutex::new(tail),
        })
    }

    /// Path of the backing file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Length of the file up to and including its last newline.
    async fn intact_len(path: &Path) -> Result<u64> {
        let contents = tokio::fs::read(path).await?;
        if contents.last().is_none_or(|&b| b == b'\n') {
            return Ok(contents.len() as u64);
        }

        let keep = contents
            .iter()
            .rposition(|&b| b == b'\n')
            .map_or(0, |pos| pos + 1);
        warn!(
            path = %path.display(),
            dropped_bytes = contents.len() - keep,
            "Truncating torn final record"
        );
        Ok(keep as u64)
    }
}

/// Parse the contents of a log file.
///
/// A final line without a terminating newline that does not parse is treated
/// as torn and skipped. Any other unparsable line is an error.
///
/// # Errors
///
/// Returns `Error::LogRead` naming the first corrupt line.
pub fn parse_lines(contents: &str) -> Result<Vec<PersistRecord>> {
    let terminated = contents.ends_with('\n');
    let lines: Vec<&str> = contents.lines().collect();
    let last = lines.len().saturating_sub(1);

    let mut records = Vec::with_capacity(lines.len());
    for (index, line) in lines.iter().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        match PersistRecord::from_json_line(line) {
            Ok(record) => records.push(record),
            Err(e) if index == last && !terminated => {
                warn!(line = index + 1, error = %e, "Skipping torn final record");
            }
            Err(e) => {
                return Err(Error::log_read(format!("line {}: {e}", index + 1)));
            }
        }
    }
    Ok(records)
}

#[async_trait]
impl DurableLog for FileLog {
    async fn append(&self, batch: &[PersistRecord]) -> Result<()> {
        if batch.is_empty() {
            return Ok(());
        }

        let mut buf = String::new();
        for record in batch {
            buf.push_str(&record.to_json_line()?);
            buf.push('\n');
        }

        let mut tail = self.tail.lock().await;
        tail.discard_uncommitted()
            .await
            .map_err(|e| Error::log_append(format!("rewind {}: {e}", self.path.display())))?;

        let written = match tail.file.write_all(buf.as_bytes()).await {
            Ok(()) => tail
                .file
                .sync_all()
                .await
                .map_err(|e| Error::log_append(format!("sync {}: {e}", self.path.display()))),
            Err(e) => Err(Error::log_append(format!("write {}: {e}", self.path.display()))),
        };
        if let Err(e) = written {
            if let Err(rewind) = tail.discard_uncommitted().await {
                warn!(error = %rewind, "Could not discard failed batch, retrying on next append");
            }
            return Err(e);
        }
        tail.committed += buf.len() as u64;

        debug!(batch_len = batch.len(), bytes = buf.len(), "Appended batch to log file");
        Ok(())
    }

    async fn read_all(&self) -> Result<Vec<PersistRecord>> {
        let _guard = self.tail.lock().await;
        let contents = tokio::fs::read_to_string(&self.path)
            .await
            .map_err(|e| Error::log_read(format!("read {}: {e}", self.path.display())))?;
        parse_lines(&contents)
    }

    async fn close(&self) -> Result<()> {
        let tail = self.tail.lock().await;
        tail.file.sync_all().await?;
        debug!(path = %self.path.display(), "Closed durable log file");
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::event::PersistEvent;
    use delayq_core::TimerId;

    fn line(seq: u64, id: &str) -> String {
        PersistRecord::new(seq, PersistEvent::stop(TimerId::from(id)))
            .to_json_line()
            .unwrap()
    }

    #[test]
    fn test_parse_empty() {
        assert!(parse_lines("").unwrap().is_empty());
    }

    #[test]
    fn test_parse_skips_torn_tail() {
        let contents = format!("{}\n{}\n{{\"seq\":3,\"reco", line(1, "a"), line(2, "b"));
        let records = parse_lines(&contents).unwrap();
        assert_eq!(records.len(), 2);
    }

    #[test]
    fn test_parse_accepts_unterminated_complete_tail() {
        let contents = format!("{}\n{}", line(1, "a"), line(2, "b"));
        assert_eq!(parse_lines(&contents).unwrap().len(), 2);
    }

    #[test]
    fn test_parse_rejects_corrupt_middle_line() {
        let contents = format!("{}\nnot json\n{}\n", line(1, "a"), line(3, "c"));
        let err = parse_lines(&contents).unwrap_err();
        assert!(matches!(err, Error::LogRead { .. }));
        assert!(err.to_string().contains("line 2"));
    }

    #[tokio::test]
    async fn test_open_log_from_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("from-config.log");

        let log = open_log(&LogConfig::File { path: path.clone() }).await.unwrap();
        log.append(&[PersistRecord::new(1, PersistEvent::stop(TimerId::from("a")))])
            .await
            .unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap().lines().count(), 1);

        let memory = open_log(&LogConfig::Memory).await.unwrap();
        assert!(memory.read_all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_open_creates_parent_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("deeper").join("timers.log");

        let log = FileLog::open(&path).await.unwrap();

        assert!(path.exists());
        assert_eq!(log.path(), path.as_path());
        assert!(log.read_all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_append_discards_unsynced_batch() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("timers.log");
        let log = FileLog::open(&path).await.unwrap();
        log.append(&[PersistRecord::new(1, PersistEvent::stop(TimerId::from("a")))])
            .await
            .unwrap();

        // A batch that reached the file but was never acknowledged as durable.
        let mut raw = std::fs::read_to_string(&path).unwrap();
        raw.push_str(&line(2, "b"));
        raw.push('\n');
        std::fs::write(&path, raw).unwrap();

        log.append(&[PersistRecord::new(2, PersistEvent::stop(TimerId::from("b")))])
            .await
            .unwrap();

        let seqs: Vec<u64> = log.read_all().await.unwrap().iter().map(|r| r.seq).collect();
        assert_eq!(seqs, vec![1, 2]);
    }

    #[tokio::test]
    async fn test_open_truncates_torn_tail() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("timers.log");
        std::fs::write(&path, format!("{}\n{{\"seq\":2", line(1, "a"))).unwrap();

        let log = FileLog::open(&path).await.unwrap();
        log.append(&[PersistRecord::new(2, PersistEvent::stop(TimerId::from("b")))])
            .await
            .unwrap();

        let seqs: Vec<u64> = log.read_all().await.unwrap().iter().map(|r| r.seq).collect();
        assert_eq!(seqs, vec![1, 2]);
    }
}
