//! Parallel Ranged Download
//!
//! Downloads a blob of known length by splitting it into block-sized ranges and
//! fetching them concurrently through the batch transfer executor. Every range
//! writes into its own window of a shared [`WriterAt`] sink, so ranges may finish
//! in any order.

use bytes::Bytes;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::batch::do_batch_transfer;
use crate::blob::BlobSource;
use crate::errors::{Result, TransferError};
use crate::io::{SectionWriter, WriteAtBuffer, WriterAt};
use crate::progress::ProgressTracker;
use crate::retry::RetryReader;
use crate::types::{BatchTransferOptions, DownloadOptions, HttpRange, DEFAULT_BLOCK_SIZE};

/// Size of the copy buffer each range worker uses
const COPY_BUFFER_SIZE: usize = 64 * 1024;

/// Resolves how many bytes a download of `range` covers
///
/// A zero count means "to the end of the blob" and is resolved from the source's
/// content length.
async fn resolve_count<S>(cancel: &CancellationToken, source: &S, range: HttpRange) -> Result<i64>
where
    S: BlobSource + ?Sized,
{
    if range.offset < 0 || range.count < 0 {
        return Err(TransferError::InvalidArgument(format!(
            "invalid download range: offset {} count {}",
            range.offset, range.count
        )));
    }
    if range.count > 0 {
        return Ok(range.count);
    }
    let length = source.content_length(cancel).await?;
    Ok(length - range.offset)
}

/// Downloads `source` into `writer` using concurrent ranged reads
///
/// Byte `options.range.offset + i` of the blob is written at offset `i` of
/// `writer`. Returns the number of bytes transferred; a blob with nothing to
/// transfer returns 0 without opening any range.
pub async fn download_to_writer_at<S, W>(
    cancel: &CancellationToken,
    source: Arc<S>,
    writer: Arc<W>,
    options: &DownloadOptions,
) -> Result<i64>
where
    S: BlobSource + ?Sized,
    W: WriterAt + ?Sized + 'static,
{
    let count = resolve_count(cancel, source.as_ref(), options.range).await?;
    if count <= 0 {
        return Ok(0);
    }
    let block_size = if options.block_size <= 0 {
        DEFAULT_BLOCK_SIZE
    } else {
        options.block_size
    };

    let base = options.range.offset;
    let progress = Arc::new(ProgressTracker::new(options.progress.clone()));
    let batch = BatchTransferOptions::new("download_to_writer_at", count, block_size)
        .with_parallelism(options.parallelism);

    do_batch_transfer(cancel, &batch, |token, chunk| {
        let source = Arc::clone(&source);
        let writer = Arc::clone(&writer);
        let progress = Arc::clone(&progress);
        let range_options = options.range_options.clone();
        let retry = options.retry;
        async move {
            if token.is_cancelled() {
                return Err(TransferError::Cancelled);
            }
            let mut body = RetryReader::open(
                source,
                token,
                HttpRange::new(base + chunk.offset, chunk.count),
                range_options,
                retry,
            )
            .await?;
            let mut section = SectionWriter::new(writer, chunk.offset as u64, chunk.count as u64);

            let mut buf = vec![0u8; COPY_BUFFER_SIZE.min(chunk.count as usize)];
            loop {
                let n = body.read(&mut buf).await?;
                if n == 0 {
                    break;
                }
                section.write(&buf[..n])?;
                progress.add(n as i64);
            }
            Ok(())
        }
    })
    .await?;

    debug!(bytes = count, "download complete");
    Ok(count)
}

/// Downloads `source` into memory using concurrent ranged reads
pub async fn download_buffer<S>(
    cancel: &CancellationToken,
    source: Arc<S>,
    options: &DownloadOptions,
) -> Result<Bytes>
where
    S: BlobSource + ?Sized,
{
    let count = resolve_count(cancel, source.as_ref(), options.range).await?;
    if count <= 0 {
        return Ok(Bytes::new());
    }

    let sink = Arc::new(WriteAtBuffer::with_capacity(count as usize));
    let options = options
        .clone()
        .with_range(HttpRange::new(options.range.offset, count));
    download_to_writer_at(cancel, source, Arc::clone(&sink), &options).await?;

    Ok(match Arc::try_unwrap(sink) {
        Ok(buffer) => Bytes::from(buffer.into_inner()),
        Err(shared) => shared.bytes(),
    })
}
