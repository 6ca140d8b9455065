//! In-Memory Block Blob
//!
//! [`MemoryBlob`] implements both storage capabilities against process memory.
//! It records how it was called and can inject failures, which makes it the
//! destination of choice for tests and benchmarks of the transfer core.

use async_trait::async_trait;
use bytes::{Buf, Bytes};
use std::collections::HashMap;
use std::io;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::io::{AsyncRead, ReadBuf};
use tokio_util::sync::CancellationToken;

use crate::blob::{BlobSource, BlockWriter, RangeBody};
use crate::errors::{Result, TransferError};
use crate::types::{CommitBlockListOptions, DownloadRangeOptions, HttpRange, StageBlockOptions};

const NO_FAILURE: usize = usize::MAX;

/// Result of committing a block list to a [`MemoryBlob`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryCommit {
    /// Number of blocks in the committed list
    pub block_count: usize,
    /// Length of the committed content
    pub content_length: i64,
}

#[derive(Default)]
struct BlobState {
    staged: HashMap<String, Bytes>,
    committed: Bytes,
    committed_ids: Vec<String>,
    content_type: Option<String>,
}

/// A block blob held in memory
pub struct MemoryBlob {
    state: Mutex<BlobState>,
    stage_calls: AtomicUsize,
    commit_calls: AtomicUsize,
    range_calls: AtomicUsize,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
    fail_stage_at: AtomicUsize,
    fail_range_at: AtomicUsize,
    broken_bodies: AtomicUsize,
    stage_delay: Option<Duration>,
}

impl MemoryBlob {
    /// Creates an empty blob
    pub fn new() -> Self {
        Self {
            state: Mutex::new(BlobState::default()),
            stage_calls: AtomicUsize::new(0),
            commit_calls: AtomicUsize::new(0),
            range_calls: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            peak_in_flight: AtomicUsize::new(0),
            fail_stage_at: AtomicUsize::new(NO_FAILURE),
            fail_range_at: AtomicUsize::new(NO_FAILURE),
            broken_bodies: AtomicUsize::new(0),
            stage_delay: None,
        }
    }

    /// Creates a blob whose committed content is `content`
    pub fn with_content(content: Bytes) -> Self {
        let blob = Self::new();
        blob.lock().committed = content;
        blob
    }

    /// Makes every staging call take at least `delay`
    pub fn with_stage_delay(mut self, delay: Duration) -> Self {
        self.stage_delay = Some(delay);
        self
    }

    /// Makes the staging call with the given zero-based index fail
    pub fn fail_stage_call(&self, index: usize) {
        self.fail_stage_at.store(index, Ordering::SeqCst);
    }

    /// Makes the ranged read with the given zero-based index fail to open
    pub fn fail_range_call(&self, index: usize) {
        self.fail_range_at.store(index, Ordering::SeqCst);
    }

    /// Makes the next `count` range bodies fail half way through
    pub fn break_range_bodies(&self, count: usize) {
        self.broken_bodies.store(count, Ordering::SeqCst);
    }

    /// Returns the committed content
    pub fn content(&self) -> Bytes {
        self.lock().committed.clone()
    }

    /// Returns the block IDs of the last commit, in order
    pub fn committed_block_ids(&self) -> Vec<String> {
        self.lock().committed_ids.clone()
    }

    /// Returns the content type recorded by the last commit
    pub fn content_type(&self) -> Option<String> {
        self.lock().content_type.clone()
    }

    /// Returns the number of staged, uncommitted blocks
    pub fn staged_count(&self) -> usize {
        self.lock().staged.len()
    }

    /// Returns the number of staging calls made
    pub fn stage_calls(&self) -> usize {
        self.stage_calls.load(Ordering::SeqCst)
    }

    /// Returns the number of commit calls made
    pub fn commit_calls(&self) -> usize {
        self.commit_calls.load(Ordering::SeqCst)
    }

    /// Returns the number of ranged reads opened
    pub fn range_calls(&self) -> usize {
        self.range_calls.load(Ordering::SeqCst)
    }

    /// Returns the highest number of staging calls that ran at once
    pub fn peak_concurrent_stages(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BlobState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for MemoryBlob {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BlockWriter for MemoryBlob {
    type Committed = MemoryCommit;

    async fn stage_block(
        &self,
        cancel: &CancellationToken,
        block_id: &str,
        body: &[u8],
        _options: &StageBlockOptions,
    ) -> Result<()> {
        let call = self.stage_calls.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(now, Ordering::SeqCst);

        let result = async {
            if let Some(delay) = self.stage_delay {
                tokio::select! {
                    _ = cancel.cancelled() => return Err(TransferError::Cancelled),
                    _ = tokio::time::sleep(delay) => {}
                }
            }
            if call == self.fail_stage_at.load(Ordering::SeqCst) {
                return Err(TransferError::service("stage_block", "injected failure"));
            }
            self.lock()
                .staged
                .insert(block_id.to_string(), Bytes::copy_from_slice(body));
            Ok(())
        }
        .await;

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }

    async fn commit_block_list(
        &self,
        _cancel: &CancellationToken,
        block_ids: &[String],
        options: &CommitBlockListOptions,
    ) -> Result<MemoryCommit> {
        self.commit_calls.fetch_add(1, Ordering::SeqCst);

        let mut state = self.lock();
        let mut content = Vec::new();
        for id in block_ids {
            let block = state
                .staged
                .get(id)
                .ok_or_else(|| TransferError::Commit(format!("block {id} was never staged")))?;
            content.extend_from_slice(block);
        }

        state.staged.clear();
        state.committed = Bytes::from(content);
        state.committed_ids = block_ids.to_vec();
        state.content_type = options.content_type.clone();

        Ok(MemoryCommit {
            block_count: block_ids.len(),
            content_length: state.committed.len() as i64,
        })
    }
}

#[async_trait]
impl BlobSource for MemoryBlob {
    async fn content_length(&self, _cancel: &CancellationToken) -> Result<i64> {
        Ok(self.lock().committed.len() as i64)
    }

    async fn download_range(
        &self,
        _cancel: &CancellationToken,
        range: HttpRange,
        _options: &DownloadRangeOptions,
    ) -> Result<RangeBody> {
        let call = self.range_calls.fetch_add(1, Ordering::SeqCst);
        if call == self.fail_range_at.load(Ordering::SeqCst) {
            return Err(TransferError::service("download_range", "injected failure"));
        }

        let content = self.content();
        let len = content.len() as i64;
        if range.offset < 0 || range.count < 0 || range.end() > len {
            return Err(TransferError::service(
                "download_range",
                format!("range {}+{} outside blob of {len} bytes", range.offset, range.count),
            ));
        }
        let end = if range.count == 0 { len } else { range.end() };
        let data = content.slice(range.offset as usize..end as usize);

        let broken = self
            .broken_bodies
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        let body = if broken {
            MemoryBody {
                remaining: data.slice(..data.len() / 2),
                fail_at_end: true,
            }
        } else {
            MemoryBody {
                remaining: data,
                fail_at_end: false,
            }
        };
        Ok(Box::new(body))
    }
}

struct MemoryBody {
    remaining: Bytes,
    fail_at_end: bool,
}

impl AsyncRead for MemoryBody {
    fn poll_read(
        mut self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        if self.remaining.is_empty() {
            if self.fail_at_end {
                return Poll::Ready(Err(io::Error::new(
                    io::ErrorKind::ConnectionReset,
                    "injected body failure",
                )));
            }
            return Poll::Ready(Ok(()));
        }
        let n = buf.remaining().min(self.remaining.len());
        buf.put_slice(&self.remaining[..n]);
        self.remaining.advance(n);
        Poll::Ready(Ok(()))
    }
}
