//! Concurrent Streaming Upload
//!
//! The copier reads a source stream into buffers from a transfer manager, stages
//! every filled buffer as a block on a task scheduled through the manager, and
//! commits the ordered block list once the source is exhausted and every block is
//! staged. Reading never waits for staging beyond the manager's buffer and
//! concurrency bounds, so reads and writes overlap.

use bytes::BytesMut;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::io::AsyncRead;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, trace, warn};

use crate::blob::BlockWriter;
use crate::chunk_id::ChunkIdGenerator;
use crate::errors::{Result, TransferError};
use crate::io::read_full;
use crate::manager::{StaticBuffer, TransferManager};
use crate::progress::ProgressTracker;
use crate::types::{CommitBlockListOptions, StageBlockOptions, UploadStreamOptions};

/// Uploads everything `reader` yields to `writer` as staged blocks, then commits them
///
/// Blocks are staged concurrently within the bounds of the transfer manager in
/// `options` (or a per-call [`StaticBuffer`] of `buffer_size` x `max_buffers`).
/// The commit list is the block IDs in the order the data was read. If reading,
/// staging, or the caller's token fails, no commit is attempted and the first
/// failure is returned once every scheduled block has finished. A failed block
/// does not cancel its siblings; it only stops further blocks from being scheduled.
pub async fn concurrent_upload<R, W>(
    cancel: &CancellationToken,
    reader: R,
    writer: Arc<W>,
    options: UploadStreamOptions,
) -> Result<W::Committed>
where
    R: AsyncRead + Unpin + Send,
    W: BlockWriter + ?Sized,
{
    let ids = ChunkIdGenerator::try_new()?;
    let (manager, per_call) = match &options.transfer_manager {
        Some(manager) => (Arc::clone(manager), false),
        None => {
            let manager: Arc<dyn TransferManager> =
                Arc::new(StaticBuffer::new(options.buffer_size, options.max_buffers)?);
            (manager, true)
        }
    };

    let copier = Copier::new(cancel, ids, writer, Arc::clone(&manager), &options);
    let result = copier.copy(reader).await;

    if per_call {
        manager.close();
    }
    result
}

/// A filled buffer waiting to be staged
struct CopierChunk {
    buffer: BytesMut,
    id: String,
    length: usize,
}

enum ReadState {
    More,
    Done,
}

/// Everything a staging task needs, cloned once per chunk
struct StageContext<W: ?Sized> {
    token: CancellationToken,
    writer: Arc<W>,
    manager: Arc<dyn TransferManager>,
    errors: mpsc::Sender<TransferError>,
    progress: Arc<ProgressTracker>,
    options: Arc<StageBlockOptions>,
}

impl<W: ?Sized> Clone for StageContext<W> {
    fn clone(&self) -> Self {
        Self {
            token: self.token.clone(),
            writer: Arc::clone(&self.writer),
            manager: Arc::clone(&self.manager),
            errors: self.errors.clone(),
            progress: Arc::clone(&self.progress),
            options: Arc::clone(&self.options),
        }
    }
}

impl<W: BlockWriter + ?Sized> StageContext<W> {
    async fn stage(self, chunk: CopierChunk) {
        if !self.token.is_cancelled() {
            let body = &chunk.buffer[..chunk.length];
            match self
                .writer
                .stage_block(&self.token, &chunk.id, body, &self.options)
                .await
            {
                Ok(()) => {
                    trace!(block_id = %chunk.id, length = chunk.length, "staged block");
                    self.progress.add(chunk.length as i64);
                }
                Err(err) => {
                    warn!(block_id = %chunk.id, error = %err, "failed to stage block");
                    // Capacity 1: only the first failure is kept, later ones never block.
                    // Siblings keep running; the recorded error stops scheduling and the commit.
                    let _ = self.errors.try_send(TransferError::Stage {
                        block_id: chunk.id.clone(),
                        source: Box::new(err),
                    });
                }
            }
        }
        self.manager.put(chunk.buffer);
    }
}

struct Copier<W: ?Sized> {
    stage: StageContext<W>,
    ids: ChunkIdGenerator,
    first_error: Mutex<mpsc::Receiver<TransferError>>,
    tasks: TaskTracker,
    commit_options: CommitBlockListOptions,
}

impl<W: BlockWriter + ?Sized> Copier<W> {
    fn new(
        cancel: &CancellationToken,
        ids: ChunkIdGenerator,
        writer: Arc<W>,
        manager: Arc<dyn TransferManager>,
        options: &UploadStreamOptions,
    ) -> Self {
        let (errors, first_error) = mpsc::channel(1);
        Self {
            stage: StageContext {
                token: cancel.child_token(),
                writer,
                manager,
                errors,
                progress: Arc::new(ProgressTracker::new(options.progress.clone())),
                options: Arc::new(options.stage_block.clone()),
            },
            ids,
            first_error: Mutex::new(first_error),
            tasks: TaskTracker::new(),
            commit_options: options.commit.clone(),
        }
    }

    async fn copy<R>(self, mut reader: R) -> Result<W::Committed>
    where
        R: AsyncRead + Unpin + Send,
    {
        let _cancel_on_exit = self.stage.token.clone().drop_guard();

        let outcome = loop {
            match self.send_chunk(&mut reader).await {
                Ok(ReadState::More) => continue,
                Ok(ReadState::Done) => break Ok(()),
                Err(err) => break Err(err),
            }
        };

        if let Err(err) = outcome {
            // Chunks already scheduled finish before the error is returned.
            self.join().await;
            return Err(err);
        }

        self.join().await;
        self.check()?;

        let block_ids = self.ids.issued();
        debug!(blocks = block_ids.len(), "committing block list");
        self.stage
            .writer
            .commit_block_list(&self.stage.token, &block_ids, &self.commit_options)
            .await
    }

    /// Reads one buffer from the source and schedules it for staging
    async fn send_chunk<R>(&self, reader: &mut R) -> Result<ReadState>
    where
        R: AsyncRead + Unpin + Send,
    {
        self.check()?;

        let manager = &self.stage.manager;
        let mut buffer = manager.get().await?;
        if buffer.is_empty() {
            return Err(TransferError::InvalidArgument(
                "transfer manager returned a zero-size buffer".to_string(),
            ));
        }

        let length = match read_full(reader, &mut buffer).await {
            Ok(n) => n,
            Err(err) => {
                manager.put(buffer);
                self.check()?;
                return Err(err.into());
            }
        };
        let state = if length == buffer.len() {
            ReadState::More
        } else {
            ReadState::Done
        };

        if length == 0 {
            manager.put(buffer);
            return Ok(state);
        }

        let id = match self.ids.try_next() {
            Ok(id) => id,
            Err(err) => {
                manager.put(buffer);
                return Err(err);
            }
        };
        trace!(block_id = %id, length, "scheduling block");

        let chunk = CopierChunk { buffer, id, length };
        let task = self.tasks.track_future(self.stage.clone().stage(chunk));
        manager.run(Box::pin(task)).await;
        Ok(state)
    }

    /// Returns the first recorded staging error, or `Cancelled` if the token fired
    fn check(&self) -> Result<()> {
        let recorded = self
            .first_error
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .try_recv();
        if let Ok(err) = recorded {
            return Err(err);
        }
        if self.stage.token.is_cancelled() {
            return Err(TransferError::Cancelled);
        }
        Ok(())
    }

    async fn join(&self) {
        self.tasks.close();
        self.tasks.wait().await;
    }
}
