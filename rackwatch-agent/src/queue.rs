//! Durable pending-payload queue.
//!
//! The queue is a single file of newline-terminated payload records in
//! enqueue order. The file existing means the queue is non-empty; removing it
//! empties the queue. Nothing is tracked outside the file itself.
//!
//! With [`Truncation::WholeStore`] the file is only ever deleted as a whole,
//! after every record in it was resent. A drain that fails part way leaves the
//! file untouched, so the records resent before the failure are sent again on
//! the next drain (at-least-once delivery).

use std::ffi::OsString;
use std::io::{ErrorKind, SeekFrom};
use std::path::{Path, PathBuf};

use rackwatch_common::payload::RECORD_SEPARATOR;
use rackwatch_common::{Payload, has_partial_record, split_records};
use tokio::fs::{self, OpenOptions};
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tracing::{debug, info, warn};

use crate::config::{QueueConfig, Truncation};
use crate::error::{AgentError, Result};
use crate::transport::{DeliveryOutcome, Transport};

/// How a drain ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrainOutcome {
    /// No store, or an empty one. Nothing was attempted.
    Empty,
    /// Every record was resent and the store was deleted.
    Completed,
    /// The record at this zero-based position failed; iteration stopped.
    Halted { at: usize },
}

/// Summary of one drain pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DrainReport {
    pub outcome: DrainOutcome,
    /// Complete records found in the store.
    pub records: usize,
    /// Records delivered during this pass.
    pub resent: usize,
}

impl DrainReport {
    fn empty() -> Self {
        Self {
            outcome: DrainOutcome::Empty,
            records: 0,
            resent: 0,
        }
    }
}

/// File-backed FIFO of payloads awaiting delivery.
#[derive(Debug, Clone)]
pub struct PendingQueue {
    path: PathBuf,
    truncation: Truncation,
}

impl PendingQueue {
    /// Create a queue over the store at `path`.
    pub fn new(path: impl Into<PathBuf>, truncation: Truncation) -> Self {
        Self {
            path: path.into(),
            truncation,
        }
    }

    /// Create a queue from configuration.
    pub fn from_config(config: &QueueConfig) -> Self {
        Self::new(config.path.clone(), config.truncation)
    }

    /// Path of the store.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Truncation mode in use.
    pub fn truncation(&self) -> Truncation {
        self.truncation
    }

    /// Create the directory holding the store if it is missing.
    pub async fn prepare(&self) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| AgentError::storage(parent, e))?;
        }
        Ok(())
    }

    /// Whether the store currently exists.
    pub async fn exists(&self) -> bool {
        fs::try_exists(&self.path).await.unwrap_or(false)
    }

    /// Append one payload followed by the record separator.
    ///
    /// An unterminated trailing record left by an interrupted append is cut
    /// off first, so the new record always starts on its own line.
    /// There is no retry: if this fails, the caller drops the payload.
    pub async fn append(&self, payload: &Payload) -> Result<()> {
        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .open(&self.path)
            .await
            .map_err(|e| AgentError::storage(&self.path, e))?;

        self.cut_partial_tail(&mut file)
            .await
            .map_err(|e| AgentError::storage(&self.path, e))?;

        file.seek(SeekFrom::End(0))
            .await
            .map_err(|e| AgentError::storage(&self.path, e))?;
        file.write_all(payload.to_record().as_bytes())
            .await
            .map_err(|e| AgentError::storage(&self.path, e))?;
        file.sync_data()
            .await
            .map_err(|e| AgentError::storage(&self.path, e))?;

        Ok(())
    }

    /// Truncate `file` back to its last record separator if it does not end
    /// with one.
    async fn cut_partial_tail(&self, file: &mut fs::File) -> std::io::Result<()> {
        let len = file.metadata().await?.len();
        if len == 0 {
            return Ok(());
        }

        let mut last = [0u8; 1];
        file.seek(SeekFrom::Start(len - 1)).await?;
        file.read_exact(&mut last).await?;
        if last[0] == RECORD_SEPARATOR {
            return Ok(());
        }

        let mut content = Vec::with_capacity(len as usize);
        file.seek(SeekFrom::Start(0)).await?;
        file.read_to_end(&mut content).await?;

        let keep = content
            .iter()
            .rposition(|&b| b == RECORD_SEPARATOR)
            .map_or(0, |i| i + 1);

        warn!(
            path = %self.path.display(),
            discarded = content.len() - keep,
            "Discarding unterminated trailing record before append"
        );

        file.set_len(keep as u64).await
    }

    /// Raw store content, or `None` if the store is absent.
    pub async fn contents(&self) -> Result<Option<Vec<u8>>> {
        match fs::read(&self.path).await {
            Ok(content) => Ok(Some(content)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(AgentError::storage(&self.path, e)),
        }
    }

    /// Complete records currently in the store, front to back.
    pub async fn records(&self) -> Result<Vec<Payload>> {
        Ok(self
            .contents()
            .await?
            .map(|content| split_records(&content))
            .unwrap_or_default())
    }

    /// Delete the store. Returns `false` if there was nothing to delete.
    pub async fn clear(&self) -> Result<bool> {
        match fs::remove_file(&self.path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(AgentError::storage(&self.path, e)),
        }
    }

    /// Resend every stored record in order through `transport`.
    ///
    /// Stops at the first transport failure. The store is deleted only when
    /// every record was delivered.
    pub async fn drain<T: Transport>(&self, transport: &T) -> Result<DrainReport> {
        let content = match self.contents().await? {
            Some(content) if !content.is_empty() => content,
            _ => return Ok(DrainReport::empty()),
        };

        if has_partial_record(&content) {
            warn!(path = %self.path.display(), "Ignoring unterminated trailing record");
        }

        let records = split_records(&content);
        let mut resent = 0;

        for (index, record) in records.iter().enumerate() {
            match transport.deliver(record).await {
                DeliveryOutcome::Delivered { status, .. } => {
                    debug!(record = %record, status, "Resent stored data");
                    resent += 1;
                }
                DeliveryOutcome::TransportFailure { reason } => {
                    warn!(
                        record = %record,
                        position = index,
                        error = %reason,
                        "Failed to resend stored data, keeping it for later"
                    );

                    if self.truncation == Truncation::Prefix && index > 0 {
                        self.rewrite(&records[index..]).await?;
                    }

                    return Ok(DrainReport {
                        outcome: DrainOutcome::Halted { at: index },
                        records: records.len(),
                        resent,
                    });
                }
            }
        }

        self.clear().await?;
        info!(records = records.len(), "All stored data sent and deleted");

        Ok(DrainReport {
            outcome: DrainOutcome::Completed,
            records: records.len(),
            resent,
        })
    }

    /// Atomically replace the store with `remaining`.
    async fn rewrite(&self, remaining: &[Payload]) -> Result<()> {
        let mut tmp_name = OsString::from(self.path.as_os_str());
        tmp_name.push(".tmp");
        let tmp_path = PathBuf::from(tmp_name);

        let content: String = remaining.iter().map(Payload::to_record).collect();

        let mut file = fs::File::create(&tmp_path)
            .await
            .map_err(|e| AgentError::storage(&tmp_path, e))?;
        file.write_all(content.as_bytes())
            .await
            .map_err(|e| AgentError::storage(&tmp_path, e))?;
        file.sync_data()
            .await
            .map_err(|e| AgentError::storage(&tmp_path, e))?;
        drop(file);

        fs::rename(&tmp_path, &self.path)
            .await
            .map_err(|e| AgentError::storage(&self.path, e))?;

        debug!(remaining = remaining.len(), "Store truncated to unsent records");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rackwatch_common::Reading;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Transport answering from a script; defaults to delivered once it runs out.
    #[derive(Default)]
    struct Scripted {
        outcomes: Mutex<VecDeque<bool>>,
        sent: Mutex<Vec<String>>,
    }

    impl Scripted {
        fn new(outcomes: &[bool]) -> Self {
            Self {
                outcomes: Mutex::new(outcomes.iter().copied().collect()),
                sent: Mutex::default(),
            }
        }

        fn sent(&self) -> Vec<String> {
            self.sent.lock().unwrap().clone()
        }
    }

    impl Transport for Scripted {
        async fn deliver(&self, payload: &Payload) -> DeliveryOutcome {
            self.sent.lock().unwrap().push(payload.to_string());
            let ok = self.outcomes.lock().unwrap().pop_front().unwrap_or(true);
            DeliveryOutcome::from_code(if ok { 200 } else { -1 }, "")
        }
    }

    fn payload(t: f64, h: f64) -> Payload {
        Payload::encode(&Reading::new(t, h))
    }

    fn queue_in(dir: &tempfile::TempDir, truncation: Truncation) -> PendingQueue {
        PendingQueue::new(dir.path().join("failed_data.txt"), truncation)
    }

    #[tokio::test]
    async fn test_append_creates_store() {
        let dir = tempfile::tempdir().unwrap();
        let queue = queue_in(&dir, Truncation::WholeStore);
        assert!(!queue.exists().await);

        queue.append(&payload(20.0, 50.0)).await.unwrap();

        assert!(queue.exists().await);
        let content = queue.contents().await.unwrap().unwrap();
        assert_eq!(content, b"temperature=20.0&humidity=50.0\n");
    }

    #[tokio::test]
    async fn test_append_into_missing_directory_fails() {
        let dir = tempfile::tempdir().unwrap();
        let queue = PendingQueue::new(
            dir.path().join("missing").join("failed_data.txt"),
            Truncation::WholeStore,
        );

        let err = queue.append(&payload(20.0, 50.0)).await.unwrap_err();
        assert!(matches!(err, AgentError::Storage { .. }));
        assert!(!queue.exists().await);
    }

    #[tokio::test]
    async fn test_prepare_creates_parent() {
        let dir = tempfile::tempdir().unwrap();
        let queue = PendingQueue::new(
            dir.path().join("nested").join("failed_data.txt"),
            Truncation::WholeStore,
        );

        queue.prepare().await.unwrap();
        queue.append(&payload(20.0, 50.0)).await.unwrap();
        assert_eq!(queue.records().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_drain_absent_store_is_noop() {
        let dir = tempfile::tempdir().unwrap();
        let queue = queue_in(&dir, Truncation::WholeStore);
        let transport = Scripted::default();

        let report = queue.drain(&transport).await.unwrap();

        assert_eq!(report.outcome, DrainOutcome::Empty);
        assert!(transport.sent().is_empty());
    }

    #[tokio::test]
    async fn test_drain_empty_store_is_noop() {
        let dir = tempfile::tempdir().unwrap();
        let queue = queue_in(&dir, Truncation::WholeStore);
        std::fs::write(queue.path(), b"").unwrap();
        let transport = Scripted::default();

        let report = queue.drain(&transport).await.unwrap();

        assert_eq!(report.outcome, DrainOutcome::Empty);
        assert!(transport.sent().is_empty());
        assert!(queue.exists().await);
    }

    #[tokio::test]
    async fn test_drain_skips_partial_tail() {
        let dir = tempfile::tempdir().unwrap();
        let queue = queue_in(&dir, Truncation::WholeStore);
        std::fs::write(
            queue.path(),
            b"temperature=20.0&humidity=50.0\ntemperature=21.0&humi",
        )
        .unwrap();
        let transport = Scripted::default();

        let report = queue.drain(&transport).await.unwrap();

        assert_eq!(report.outcome, DrainOutcome::Completed);
        assert_eq!(transport.sent(), vec!["temperature=20.0&humidity=50.0"]);
        assert!(!queue.exists().await);
    }

    #[tokio::test]
    async fn test_append_after_partial_tail_starts_new_record() {
        let dir = tempfile::tempdir().unwrap();
        let queue = queue_in(&dir, Truncation::WholeStore);
        std::fs::write(
            queue.path(),
            b"temperature=20.0&humidity=50.0\ntemperature=21.0&humi",
        )
        .unwrap();

        queue
            .append(&Payload::encode(&Reading::new(22.0, 52.0)))
            .await
            .unwrap();

        assert_eq!(
            queue.contents().await.unwrap().unwrap(),
            b"temperature=20.0&humidity=50.0\ntemperature=22.0&humidity=52.0\n"
        );
        assert_eq!(
            queue.records().await.unwrap(),
            vec![
                Payload::from_record("temperature=20.0&humidity=50.0"),
                Payload::from_record("temperature=22.0&humidity=52.0"),
            ]
        );
    }

    #[tokio::test]
    async fn test_append_after_lone_partial_record() {
        let dir = tempfile::tempdir().unwrap();
        let queue = queue_in(&dir, Truncation::WholeStore);
        std::fs::write(queue.path(), b"temperat").unwrap();

        queue
            .append(&Payload::encode(&Reading::new(22.0, 52.0)))
            .await
            .unwrap();

        assert_eq!(
            queue.contents().await.unwrap().unwrap(),
            b"temperature=22.0&humidity=52.0\n"
        );
    }

    #[tokio::test]
    async fn test_prefix_truncation_drops_resent_records() {
        let dir = tempfile::tempdir().unwrap();
        let queue = queue_in(&dir, Truncation::Prefix);
        queue.append(&payload(20.0, 50.0)).await.unwrap();
        queue.append(&payload(21.0, 51.0)).await.unwrap();
        queue.append(&payload(22.0, 52.0)).await.unwrap();

        let transport = Scripted::new(&[true, false]);
        let report = queue.drain(&transport).await.unwrap();

        assert_eq!(report.outcome, DrainOutcome::Halted { at: 1 });
        assert_eq!(report.resent, 1);
        assert_eq!(
            queue.records().await.unwrap(),
            vec![payload(21.0, 51.0), payload(22.0, 52.0)]
        );

        // Next pass starts at the failed record; nothing is sent twice.
        let report = queue.drain(&transport).await.unwrap();
        assert_eq!(report.outcome, DrainOutcome::Completed);
        assert_eq!(
            transport.sent(),
            vec![
                "temperature=20.0&humidity=50.0",
                "temperature=21.0&humidity=51.0",
                "temperature=21.0&humidity=51.0",
                "temperature=22.0&humidity=52.0",
            ]
        );
        assert!(!queue.exists().await);
    }

    #[tokio::test]
    async fn test_prefix_truncation_first_record_failure_leaves_store() {
        let dir = tempfile::tempdir().unwrap();
        let queue = queue_in(&dir, Truncation::Prefix);
        queue.append(&payload(20.0, 50.0)).await.unwrap();
        let before = queue.contents().await.unwrap();

        let report = queue.drain(&Scripted::new(&[false])).await.unwrap();

        assert_eq!(report.outcome, DrainOutcome::Halted { at: 0 });
        assert_eq!(queue.contents().await.unwrap(), before);
    }

    #[tokio::test]
    async fn test_clear() {
        let dir = tempfile::tempdir().unwrap();
        let queue = queue_in(&dir, Truncation::WholeStore);

        assert!(!queue.clear().await.unwrap());
        queue.append(&payload(20.0, 50.0)).await.unwrap();
        assert!(queue.clear().await.unwrap());
        assert!(!queue.clear().await.unwrap());
        assert_eq!(queue.contents().await.unwrap(), None);
    }
}
