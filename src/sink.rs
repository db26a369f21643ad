//! Storage hand-off for decoded readings.
//!
//! Sessions never wait on storage. They hand each batch to a
//! [`ReadingSink`], which for the service is a bounded channel drained by a
//! single store task:
//!
//! ```text
//! Session 1 ─┐
//! Session 2 ─┼─► ChannelSink (try_send) ─► store task ─► BatchStore
//! Session N ─┘
//! ```
//!
//! When the channel is full the batch is dropped and counted.

use std::future::Future;
use std::path::Path;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::{mpsc, oneshot};
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::{JoinError, JoinHandle};
use tracing::{error, info, warn};

use crate::error::Result;
use crate::protocol::{ProtocolTag, Reading, StationIdentity};

/// Default capacity of the storage channel.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 1024;

/// Boxed future returned by [`BatchStore::persist`].
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Readings of one frame, tagged with their origin.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StationBatch {
    /// Station that sent the frame.
    pub station: StationIdentity,
    /// Remote address of the connection.
    pub peer: String,
    /// Protocol the frame was decoded with.
    pub protocol: ProtocolTag,
    /// Device category id.
    pub device_id: u8,
    /// Timestamp entry followed by channel readings.
    pub readings: Vec<Reading>,
}

/// Receives decoded batches from sessions. Must not block.
pub trait ReadingSink: Send + Sync + 'static {
    /// Hand over a batch (fire-and-forget).
    fn store(&self, batch: StationBatch);
}

/// Sink forwarding batches into a bounded channel.
#[derive(Clone)]
pub struct ChannelSink {
    tx: mpsc::Sender<StationBatch>,
    dropped: Arc<AtomicUsize>,
}

impl ChannelSink {
    /// Create a sink and the receiver the store task drains.
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<StationBatch>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let sink = Self {
            tx,
            dropped: Arc::new(AtomicUsize::new(0)),
        };
        (sink, rx)
    }

    /// Number of batches dropped because the channel was full or closed.
    pub fn dropped(&self) -> usize {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl ReadingSink for ChannelSink {
    fn store(&self, batch: StationBatch) {
        match self.tx.try_send(batch) {
            Ok(()) => {}
            Err(TrySendError::Full(batch)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                warn!(
                    station = %batch.station,
                    device_id = batch.device_id,
                    "Storage channel full, dropping batch"
                );
            }
            Err(TrySendError::Closed(batch)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                error!(
                    station = %batch.station,
                    "Storage task stopped, dropping batch"
                );
            }
        }
    }
}

/// Persistence backend driven by the store task.
pub trait BatchStore: Send + 'static {
    /// Persist one batch.
    fn persist<'a>(&'a mut self, batch: &'a StationBatch) -> BoxFuture<'a, Result<()>>;
}

/// Store that writes one structured log line per batch.
#[derive(Debug, Default)]
pub struct LogStore;

impl BatchStore for LogStore {
    fn persist<'a>(&'a mut self, batch: &'a StationBatch) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let readings = serde_json::to_string(&batch.readings)?;
            info!(
                station = %batch.station,
                peer = %batch.peer,
                protocol = %batch.protocol,
                device_id = batch.device_id,
                readings = %readings,
                "Stored readings"
            );
            Ok(())
        })
    }
}

/// Store appending one JSON document per line to a file.
pub struct JsonLinesStore {
    file: File,
}

impl JsonLinesStore {
    /// Open (or create) the output file in append mode.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await?;
        Ok(Self { file })
    }
}

impl BatchStore for JsonLinesStore {
    fn persist<'a>(&'a mut self, batch: &'a StationBatch) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let mut line = serde_json::to_vec(batch)?;
            line.push(b'\n');
            self.file.write_all(&line).await?;
            self.file.flush().await?;
            Ok(())
        })
    }
}

/// Handle to the store task.
pub struct StoreTask {
    handle: JoinHandle<()>,
    close: oneshot::Sender<()>,
}

impl StoreTask {
    /// Wait for the task to end on its own, once every sender is dropped.
    pub async fn join(self) -> std::result::Result<(), JoinError> {
        self.handle.await
    }

    /// Stop intake, persist the batches already queued, and wait up to
    /// `grace` for that to finish.
    ///
    /// Returns `false` when the grace period ran out and the task was aborted.
    pub async fn shutdown(self, grace: Duration) -> bool {
        let StoreTask { mut handle, close } = self;
        // Err means the task already ended.
        let _ = close.send(());

        match tokio::time::timeout(grace, &mut handle).await {
            Ok(_) => true,
            Err(_) => {
                handle.abort();
                false
            }
        }
    }
}

/// Spawn the task draining the storage channel into `store`.
///
/// The task ends once every sender is dropped or [`StoreTask::shutdown`] is
/// called. A failed batch is logged and the task moves on.
pub fn spawn_store_task<S: BatchStore>(
    mut rx: mpsc::Receiver<StationBatch>,
    mut store: S,
) -> StoreTask {
    let (close, mut close_rx) = oneshot::channel();

    let handle = tokio::spawn(async move {
        info!("Starting storage task");
        let mut intake_open = true;

        loop {
            tokio::select! {
                batch = rx.recv() => {
                    let Some(batch) = batch else { break };
                    if let Err(e) = store.persist(&batch).await {
                        error!(
                            station = %batch.station,
                            device_id = batch.device_id,
                            error = %e,
                            "Failed to store batch"
                        );
                    }
                }
                closed = &mut close_rx, if intake_open => {
                    intake_open = false;
                    if closed.is_ok() {
                        info!("Storage intake closed, draining queued batches");
                        rx.close();
                    }
                }
            }
        }

        info!("Storage task stopped");
    });

    StoreTask { handle, close }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::ReadingValue;

    fn batch(device_id: u8) -> StationBatch {
        StationBatch {
            station: StationIdentity::new("AA", "BB", "001"),
            peer: "127.0.0.1:40000".to_string(),
            protocol: ProtocolTag::new("UMB").unwrap(),
            device_id,
            readings: vec![Reading::new("AirTemperature", ReadingValue::Float(4.5))],
        }
    }

    #[tokio::test]
    async fn test_channel_sink_delivers() {
        let (sink, mut rx) = ChannelSink::channel(4);
        sink.store(batch(7));

        let received = rx.recv().await.unwrap();
        assert_eq!(received, batch(7));
        assert_eq!(sink.dropped(), 0);
    }

    #[tokio::test]
    async fn test_full_channel_drops_without_blocking() {
        let (sink, mut rx) = ChannelSink::channel(1);
        sink.store(batch(1));
        sink.store(batch(2));
        sink.store(batch(3));

        assert_eq!(sink.dropped(), 2);
        assert_eq!(rx.recv().await.unwrap().device_id, 1);
    }

    #[tokio::test]
    async fn test_closed_channel_counts_drop() {
        let (sink, rx) = ChannelSink::channel(4);
        drop(rx);
        sink.store(batch(1));
        assert_eq!(sink.dropped(), 1);
    }

    #[tokio::test]
    async fn test_json_lines_store() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("readings.jsonl");

        let store = JsonLinesStore::open(&path).await.unwrap();
        let (sink, rx) = ChannelSink::channel(8);
        let task = spawn_store_task(rx, store);

        sink.store(batch(7));
        sink.store(batch(9));
        drop(sink);
        task.join().await.unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<serde_json::Value> = content
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();

        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["device_id"], 7);
        assert_eq!(lines[0]["station"]["project_code"], "AA");
        assert_eq!(lines[0]["protocol"], "UMB");
        assert_eq!(lines[0]["readings"][0]["field"], "AirTemperature");
        assert_eq!(lines[0]["readings"][0]["value"], 4.5);
        assert_eq!(lines[1]["device_id"], 9);
    }

    #[tokio::test]
    async fn test_shutdown_drains_queued_batches() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("readings.jsonl");

        let store = JsonLinesStore::open(&path).await.unwrap();
        let (sink, rx) = ChannelSink::channel(8);
        let task = spawn_store_task(rx, store);

        // A live sender (a running session) must not hold up shutdown.
        for id in 1..=3 {
            sink.store(batch(id));
        }
        assert!(task.shutdown(Duration::from_secs(5)).await);

        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content.lines().count(), 3);

        sink.store(batch(4));
        assert_eq!(sink.dropped(), 1);
    }

    /// Store whose writes never complete.
    struct StalledStore;

    impl BatchStore for StalledStore {
        fn persist<'a>(&'a mut self, _batch: &'a StationBatch) -> BoxFuture<'a, Result<()>> {
            Box::pin(std::future::pending())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_gives_up_after_grace() {
        let (sink, rx) = ChannelSink::channel(8);
        let task = spawn_store_task(rx, StalledStore);

        sink.store(batch(1));
        tokio::task::yield_now().await;

        assert!(!task.shutdown(Duration::from_secs(5)).await);
    }

    #[tokio::test]
    async fn test_log_store() {
        let mut store = LogStore;
        assert!(store.persist(&batch(7)).await.is_ok());
    }
}
