//! Write-back queue for newly added records.
//!
//! `enqueue` only touches memory. A background thread appends pending
//! records to the delta log every interval; `shutdown` (also run on drop)
//! stops the thread and flushes once more.

use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, error, info, warn};

use super::delta::{read_delta, write_delta};
use crate::error::Result;
use crate::model::DiagramRecord;

struct QueueInner {
    path: PathBuf,
    pending: Mutex<Vec<DiagramRecord>>,
    /// Serializes flushes so two never interleave their read-modify-write.
    flush_lock: Mutex<()>,
}

impl QueueInner {
    fn pending(&self) -> MutexGuard<'_, Vec<DiagramRecord>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn flush(&self) -> Result<usize> {
        let _flushing = self.flush_lock.lock().unwrap_or_else(PoisonError::into_inner);

        let snapshot = self.pending().clone();
        if snapshot.is_empty() {
            return Ok(0);
        }

        let mut log = read_delta(&self.path);
        log.extend(snapshot.iter().cloned());
        write_delta(&self.path, &log)?;

        // Enqueue only appends, so the flushed records are the prefix.
        let flushed = snapshot.len();
        self.pending().drain(..flushed);
        debug!(flushed, total = log.len(), "Flushed records to delta log");
        Ok(flushed)
    }
}

struct Worker {
    stop: Sender<()>,
    handle: JoinHandle<()>,
}

/// Buffered, periodically flushed append queue over the delta log.
pub struct AutosaveQueue {
    inner: Arc<QueueInner>,
    worker: Mutex<Option<Worker>>,
}

impl std::fmt::Debug for AutosaveQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AutosaveQueue")
            .field("path", &self.inner.path)
            .field("pending", &self.pending_len())
            .finish_non_exhaustive()
    }
}

impl AutosaveQueue {
    /// A queue without a timer; records are written on `flush`/`shutdown`.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            inner: Arc::new(QueueInner {
                path: path.into(),
                pending: Mutex::new(Vec::new()),
                flush_lock: Mutex::new(()),
            }),
            worker: Mutex::new(None),
        }
    }

    /// A queue that also flushes every `interval` on a background thread.
    ///
    /// # Errors
    ///
    /// Returns an error if the thread cannot be spawned.
    pub fn start(path: impl Into<PathBuf>, interval: Duration) -> Result<Self> {
        let queue = Self::new(path);
        let (stop, stopped) = mpsc::channel::<()>();
        let inner = Arc::clone(&queue.inner);

        let handle = thread::Builder::new()
            .name("fkb-autosave".into())
            .spawn(move || {
                loop {
                    match stopped.recv_timeout(interval) {
                        Err(RecvTimeoutError::Timeout) => {
                            if let Err(e) = inner.flush() {
                                warn!(error = %e, "Autosave flush failed; records stay queued");
                            }
                        }
                        Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                    }
                }
            })?;

        *queue.lock_worker() = Some(Worker { stop, handle });
        info!(interval_secs = interval.as_secs(), "Autosave started");
        Ok(queue)
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.inner.path
    }

    /// Queue a record for the next flush.
    pub fn enqueue(&self, record: DiagramRecord) {
        debug!(reaction = %record.reaction, "Queued record for autosave");
        self.inner.pending().push(record);
    }

    #[must_use]
    pub fn pending_len(&self) -> usize {
        self.inner.pending().len()
    }

    /// Append pending records to the delta log.
    ///
    /// Returns how many were written. On error they stay queued.
    ///
    /// # Errors
    ///
    /// Returns an error if the delta log cannot be written.
    pub fn flush(&self) -> Result<usize> {
        self.inner.flush()
    }

    /// Stop the timer thread and flush. Safe to call more than once.
    ///
    /// # Errors
    ///
    /// Returns an error if the final flush fails.
    pub fn shutdown(&self) -> Result<usize> {
        if let Some(worker) = self.lock_worker().take() {
            let _ = worker.stop.send(());
            if worker.handle.join().is_err() {
                error!("Autosave thread panicked");
            }
        }
        self.inner.flush()
    }

    fn lock_worker(&self) -> MutexGuard<'_, Option<Worker>> {
        self.worker.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for AutosaveQueue {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown() {
            error!(
                error = %e,
                pending = self.pending_len(),
                "Final autosave failed; queued records are lost"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn record(reaction: &str) -> DiagramRecord {
        DiagramRecord::new(reaction, "t", "d")
    }

    #[test]
    fn test_enqueue_does_not_touch_disk() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("feynman_kb_user.json");
        let queue = AutosaveQueue::new(&path);

        queue.enqueue(record("a"));
        assert_eq!(queue.pending_len(), 1);
        assert!(!path.exists());

        assert_eq!(queue.flush().unwrap(), 1);
        assert_eq!(queue.pending_len(), 0);
        assert_eq!(read_delta(&path).len(), 1);
        assert_eq!(queue.flush().unwrap(), 0);
    }

    #[test]
    fn test_flush_appends_to_existing_log() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("feynman_kb_user.json");
        write_delta(&path, &[record("old")]).unwrap();

        let queue = AutosaveQueue::new(&path);
        queue.enqueue(record("new"));
        queue.flush().unwrap();

        let reactions: Vec<String> = read_delta(&path).into_iter().map(|r| r.reaction).collect();
        assert_eq!(reactions, vec!["old", "new"]);
    }

    #[test]
    fn test_corrupt_log_is_replaced() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("feynman_kb_user.json");
        fs::write(&path, "{{{").unwrap();

        let queue = AutosaveQueue::new(&path);
        queue.enqueue(record("a"));
        queue.flush().unwrap();
        assert_eq!(read_delta(&path).len(), 1);
    }

    #[test]
    fn test_failed_write_keeps_records() {
        let dir = TempDir::new().unwrap();
        // The target is a directory, so the rename over it fails.
        let path = dir.path().join("blocked");
        fs::create_dir(&path).unwrap();
        fs::write(path.join("inside"), "x").unwrap();

        let queue = AutosaveQueue::new(&path);
        queue.enqueue(record("a"));
        assert!(queue.flush().is_err());
        assert_eq!(queue.pending_len(), 1);
    }

    #[test]
    fn test_shutdown_flushes_and_stops_timer() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("feynman_kb_user.json");
        let queue = AutosaveQueue::start(&path, Duration::from_secs(3600)).unwrap();

        queue.enqueue(record("a"));
        queue.enqueue(record("b"));
        assert_eq!(queue.shutdown().unwrap(), 2);
        assert_eq!(read_delta(&path).len(), 2);
        assert_eq!(queue.shutdown().unwrap(), 0);
    }

    #[test]
    fn test_timer_flushes() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("feynman_kb_user.json");
        let queue = AutosaveQueue::start(&path, Duration::from_millis(20)).unwrap();
        queue.enqueue(record("a"));

        let mut waited = 0;
        while queue.pending_len() > 0 && waited < 200 {
            thread::sleep(Duration::from_millis(10));
            waited += 1;
        }
        assert_eq!(queue.pending_len(), 0);
        assert_eq!(read_delta(&path).len(), 1);
    }

    #[test]
    fn test_drop_flushes() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("feynman_kb_user.json");
        {
            let queue = AutosaveQueue::new(&path);
            queue.enqueue(record("a"));
        }
        assert_eq!(read_delta(&path).len(), 1);
    }
}
