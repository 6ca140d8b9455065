//! Buffer Upload
//!
//! Uploads an in-memory payload of known size by staging fixed-size slices of it
//! through the batch transfer executor and committing them in offset order.

use bytes::Bytes;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::batch::do_batch_transfer;
use crate::blob::BlockWriter;
use crate::chunk_id::ChunkIdGenerator;
use crate::errors::{Result, TransferError};
use crate::progress::ProgressTracker;
use crate::types::{
    BatchTransferOptions, UploadBufferOptions, DEFAULT_BLOCK_SIZE, MAX_STAGE_BLOCKS,
    MAX_STAGE_BLOCK_BYTES,
};

/// Picks the block size for a payload of `size` bytes
///
/// A requested size of 0 picks the smallest size that keeps the block count within
/// [`MAX_STAGE_BLOCKS`], but never less than [`DEFAULT_BLOCK_SIZE`].
pub fn resolve_block_size(size: i64, requested: i64) -> Result<i64> {
    if requested < 0 {
        return Err(TransferError::InvalidArgument(format!(
            "block size must not be negative: {requested}"
        )));
    }
    if requested > MAX_STAGE_BLOCK_BYTES {
        return Err(TransferError::InvalidArgument(format!(
            "block size {requested} exceeds the maximum of {MAX_STAGE_BLOCK_BYTES}"
        )));
    }
    if size > MAX_STAGE_BLOCK_BYTES * MAX_STAGE_BLOCKS {
        return Err(TransferError::InvalidArgument(format!(
            "payload of {size} bytes is too large for a block blob"
        )));
    }
    if requested > 0 {
        return Ok(requested);
    }

    let spread = (size + MAX_STAGE_BLOCKS - 1) / MAX_STAGE_BLOCKS;
    Ok(spread.max(DEFAULT_BLOCK_SIZE))
}

/// Uploads `data` to `writer` in parallel blocks and commits them
///
/// An empty payload commits an empty block list without staging anything.
pub async fn upload_buffer<W>(
    cancel: &CancellationToken,
    data: Bytes,
    writer: Arc<W>,
    options: &UploadBufferOptions,
) -> Result<W::Committed>
where
    W: BlockWriter + ?Sized,
{
    let size = data.len() as i64;
    let block_size = resolve_block_size(size, options.block_size)?;
    let token = cancel.child_token();
    let _cancel_on_exit = token.clone().drop_guard();

    let ids = ChunkIdGenerator::try_new()?;
    if size == 0 {
        return writer
            .commit_block_list(&token, &ids.issued(), &options.commit)
            .await;
    }

    let num_blocks = (size - 1) / block_size + 1;
    if num_blocks > MAX_STAGE_BLOCKS {
        return Err(TransferError::InvalidArgument(format!(
            "{num_blocks} blocks of {block_size} bytes exceed the limit of {MAX_STAGE_BLOCKS}"
        )));
    }

    // IDs are issued up front in offset order so the commit list does not depend
    // on which block finishes first.
    let block_ids = (0..num_blocks)
        .map(|_| ids.try_next())
        .collect::<Result<Vec<_>>>()?;
    let block_ids = Arc::new(block_ids);
    let progress = Arc::new(ProgressTracker::new(options.progress.clone()));
    let stage_options = Arc::new(options.stage_block.clone());

    let batch = BatchTransferOptions::new("upload_buffer", size, block_size)
        .with_parallelism(options.parallelism);
    do_batch_transfer(&token, &batch, |op_token, range| {
        let block_id = block_ids[(range.offset / block_size) as usize].clone();
        let body = data.slice(range.offset as usize..range.end() as usize);
        let writer = Arc::clone(&writer);
        let progress = Arc::clone(&progress);
        let stage_options = Arc::clone(&stage_options);
        async move {
            writer
                .stage_block(&op_token, &block_id, &body, &stage_options)
                .await
                .map_err(|err| TransferError::Stage {
                    block_id: block_id.clone(),
                    source: Box::new(err),
                })?;
            progress.add(body.len() as i64);
            Ok(())
        }
    })
    .await?;

    debug!(blocks = num_blocks, size, "committing uploaded buffer");
    writer
        .commit_block_list(&token, &ids.issued(), &options.commit)
        .await
}
