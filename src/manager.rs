//! Transfer Managers
//!
//! A transfer manager owns the buffers used by a streaming upload and decides how
//! many chunk writers may run at once. Two implementations are provided:
//!   - [`StaticBuffer`]: a fixed set of preallocated buffers; concurrency is bounded
//!     by how many buffers exist
//!   - [`SyncPool`]: buffers allocated on demand and recycled; concurrency is
//!     bounded by a semaphore

use async_trait::async_trait;
use bytes::BytesMut;
use futures::future::BoxFuture;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::{mpsc, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::errors::{Result, TransferError};

/// Buffer pool plus bounded task runner driving a streaming upload
#[async_trait]
pub trait TransferManager: Send + Sync {
    /// Acquires a buffer, waiting until one is free
    ///
    /// Fails with [`TransferError::ManagerClosed`] once the manager is closed.
    async fn get(&self) -> Result<BytesMut>;

    /// Returns a buffer obtained from [`get`](Self::get)
    fn put(&self, buffer: BytesMut);

    /// Schedules `task`, waiting if the concurrency bound is reached
    async fn run(&self, task: BoxFuture<'static, ()>);

    /// Releases pooled buffers; pending and later `get` calls fail
    fn close(&self);
}

/// Manager with a fixed number of preallocated buffers
///
/// At most `max` chunks can be in flight because a chunk holds its buffer until
/// its write completes.
pub struct StaticBuffer {
    size: usize,
    max: usize,
    tx: mpsc::Sender<BytesMut>,
    rx: tokio::sync::Mutex<mpsc::Receiver<BytesMut>>,
    closed: CancellationToken,
}

impl StaticBuffer {
    /// Creates `max` buffers of `size` bytes each
    pub fn new(size: usize, max: usize) -> Result<Self> {
        if size == 0 {
            return Err(TransferError::InvalidArgument(
                "buffer size must be greater than zero".to_string(),
            ));
        }
        if max == 0 {
            return Err(TransferError::InvalidArgument(
                "buffer count must be greater than zero".to_string(),
            ));
        }

        let (tx, rx) = mpsc::channel(max);
        for _ in 0..max {
            // Capacity was sized for exactly `max` buffers.
            let _ = tx.try_send(BytesMut::zeroed(size));
        }

        Ok(Self {
            size,
            max,
            tx,
            rx: tokio::sync::Mutex::new(rx),
            closed: CancellationToken::new(),
        })
    }

    /// Returns the size of each buffer
    pub fn buffer_size(&self) -> usize {
        self.size
    }

    /// Returns the number of buffers
    pub fn max_buffers(&self) -> usize {
        self.max
    }
}

#[async_trait]
impl TransferManager for StaticBuffer {
    async fn get(&self) -> Result<BytesMut> {
        if self.closed.is_cancelled() {
            return Err(TransferError::ManagerClosed);
        }
        tokio::select! {
            _ = self.closed.cancelled() => Err(TransferError::ManagerClosed),
            buffer = async { self.rx.lock().await.recv().await } => {
                buffer.ok_or(TransferError::ManagerClosed)
            }
        }
    }

    fn put(&self, mut buffer: BytesMut) {
        if self.closed.is_cancelled() {
            return;
        }
        buffer.resize(self.size, 0);
        if self.tx.try_send(buffer).is_err() {
            trace!("static buffer pool full, dropping returned buffer");
        }
    }

    async fn run(&self, task: BoxFuture<'static, ()>) {
        tokio::spawn(task);
    }

    fn close(&self) {
        self.closed.cancel();
        if let Ok(mut rx) = self.rx.try_lock() {
            rx.close();
            while rx.try_recv().is_ok() {}
        }
        debug!(size = self.size, max = self.max, "static buffer closed");
    }
}

/// Manager that allocates buffers on demand and bounds concurrency separately
pub struct SyncPool {
    size: usize,
    concurrency: usize,
    pool: Mutex<Vec<BytesMut>>,
    permits: Arc<Semaphore>,
    closed: CancellationToken,
}

impl SyncPool {
    /// Creates a pool of `size`-byte buffers running at most `concurrency` tasks
    pub fn new(size: usize, concurrency: usize) -> Result<Self> {
        if size == 0 {
            return Err(TransferError::InvalidArgument(
                "buffer size must be greater than zero".to_string(),
            ));
        }
        if concurrency == 0 {
            return Err(TransferError::InvalidArgument(
                "concurrency must be at least 1".to_string(),
            ));
        }

        Ok(Self {
            size,
            concurrency,
            pool: Mutex::new(Vec::new()),
            permits: Arc::new(Semaphore::new(concurrency)),
            closed: CancellationToken::new(),
        })
    }

    /// Returns the number of idle buffers currently pooled
    pub fn idle(&self) -> usize {
        self.pool.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}

#[async_trait]
impl TransferManager for SyncPool {
    async fn get(&self) -> Result<BytesMut> {
        if self.closed.is_cancelled() {
            return Err(TransferError::ManagerClosed);
        }
        let reused = self
            .pool
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop();
        Ok(reused.unwrap_or_else(|| BytesMut::zeroed(self.size)))
    }

    fn put(&self, mut buffer: BytesMut) {
        if self.closed.is_cancelled() {
            return;
        }
        let mut pool = self.pool.lock().unwrap_or_else(PoisonError::into_inner);
        // Keep at most one idle buffer per runner.
        if pool.len() >= self.concurrency {
            return;
        }
        buffer.resize(self.size, 0);
        pool.push(buffer);
    }

    async fn run(&self, task: BoxFuture<'static, ()>) {
        match Arc::clone(&self.permits).acquire_owned().await {
            Ok(permit) => {
                tokio::spawn(async move {
                    task.await;
                    drop(permit);
                });
            }
            Err(_) => {
                debug!("sync pool closed, running task without a permit");
                tokio::spawn(task);
            }
        }
    }

    fn close(&self) {
        self.closed.cancel();
        self.permits.close();
        self.pool
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
        debug!(size = self.size, concurrency = self.concurrency, "sync pool closed");
    }
}
