//! Feedback into the local entropy pool
//!
//! Every exchange writes timestamps and intermediate digests back into the pool device. These
//! writes are fire-and-forget: failures are logged and counted, never propagated to the
//! request. The process-wide [`DeviceSink`] serializes all writes through a single task that
//! owns the device handle.

use crate::{Error, Result};
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Nanoseconds since the Unix epoch
pub fn timestamp_nanos() -> i64 {
    chrono::Utc::now().timestamp_nanos_opt().unwrap_or_default()
}

/// Write path into an entropy pool
pub trait PoolFeedback: Send + Sync {
    /// Queue bytes for the pool; never blocks the caller and never fails
    fn feed(&self, bytes: Vec<u8>);

    /// Queue the current wall-clock time as decimal nanoseconds
    fn feed_timestamp(&self) {
        self.feed(timestamp_nanos().to_string().into_bytes());
    }
}

/// Counters describing feedback health
#[derive(Debug, Default)]
pub struct SinkStats {
    events: AtomicU64,
    bytes_written: AtomicU64,
    failures: AtomicU64,
    dropped: AtomicU64,
}

impl SinkStats {
    /// Events written successfully
    pub fn events(&self) -> u64 {
        self.events.load(Ordering::Relaxed)
    }

    pub fn bytes_written(&self) -> u64 {
        self.bytes_written.load(Ordering::Relaxed)
    }

    /// Events lost to open or write errors
    pub fn failures(&self) -> u64 {
        self.failures.load(Ordering::Relaxed)
    }

    /// Events discarded because the queue was full
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

/// Process-wide sink backed by a single writer task
#[derive(Clone)]
pub struct DeviceSink {
    tx: mpsc::Sender<Vec<u8>>,
    stats: Arc<SinkStats>,
}

impl DeviceSink {
    /// Spawn the writer task for `path`
    ///
    /// The device is opened once up front and reopened lazily after a failure. The task ends
    /// when every clone of the sink has been dropped.
    pub fn spawn(path: impl Into<PathBuf>, queue_depth: usize) -> (Self, JoinHandle<()>) {
        let stats = Arc::new(SinkStats::default());
        let (tx, rx) = mpsc::channel(queue_depth.max(1));

        let handle = tokio::spawn(writer_loop(path.into(), Arc::clone(&stats), rx));

        (Self { tx, stats }, handle)
    }

    pub fn stats(&self) -> &SinkStats {
        &self.stats
    }

    /// Shared handle to the counters, outliving the sink itself
    pub fn shared_stats(&self) -> Arc<SinkStats> {
        Arc::clone(&self.stats)
    }
}

impl PoolFeedback for DeviceSink {
    fn feed(&self, bytes: Vec<u8>) {
        match self.tx.try_send(bytes) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                self.stats.dropped.fetch_add(1, Ordering::Relaxed);
                warn!("Pool feedback queue full, dropping event");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                self.stats.failures.fetch_add(1, Ordering::Relaxed);
                warn!("Pool feedback writer has stopped");
            }
        }
    }
}

async fn writer_loop(path: PathBuf, stats: Arc<SinkStats>, mut rx: mpsc::Receiver<Vec<u8>>) {
    let mut device = match open_device(&path).await {
        Ok(file) => {
            info!("Pool feedback writing to {}", path.display());
            Some(file)
        }
        Err(e) => {
            warn!("{}", e);
            None
        }
    };

    while let Some(bytes) = rx.recv().await {
        if device.is_none() {
            device = open_device(&path).await.ok();
        }

        let Some(file) = device.as_mut() else {
            stats.failures.fetch_add(1, Ordering::Relaxed);
            warn!("Pool feedback skipped, {} is not writable", path.display());
            continue;
        };

        match write_all(file, &bytes).await {
            Ok(()) => {
                stats.events.fetch_add(1, Ordering::Relaxed);
                stats
                    .bytes_written
                    .fetch_add(bytes.len() as u64, Ordering::Relaxed);
            }
            Err(e) => {
                stats.failures.fetch_add(1, Ordering::Relaxed);
                warn!("{}", e);
                device = None;
            }
        }
    }

    debug!("Pool feedback writer for {} stopped", path.display());
}

async fn open_device(path: &Path) -> Result<File> {
    OpenOptions::new()
        .append(true)
        .create(true)
        .open(path)
        .await
        .map_err(|e| Error::PoolFeedbackFailed(format!("Cannot open {}: {}", path.display(), e)))
}

async fn write_all(file: &mut File, bytes: &[u8]) -> Result<()> {
    file.write_all(bytes)
        .await
        .map_err(|e| Error::PoolFeedbackFailed(format!("Write failed: {}", e)))?;
    // tokio buffers file writes; flush so errors surface on this event
    file.flush()
        .await
        .map_err(|e| Error::PoolFeedbackFailed(format!("Flush failed: {}", e)))
}

/// One-shot write of `bytes` into the pool device at `path`
pub async fn write_device(path: impl AsRef<Path>, bytes: &[u8]) -> Result<()> {
    let mut file = open_device(path.as_ref()).await?;
    write_all(&mut file, bytes).await
}

/// Sink that keeps every event in memory
#[derive(Default)]
pub struct MemorySink {
    events: Mutex<Vec<Vec<u8>>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the events fed so far
    pub fn events(&self) -> Vec<Vec<u8>> {
        self.events.lock().clone()
    }
}

impl PoolFeedback for MemorySink {
    fn feed(&self, bytes: Vec<u8>) {
        self.events.lock().push(bytes);
    }
}
