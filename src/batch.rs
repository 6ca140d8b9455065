//! Batch Transfer Executor
//!
//! Splits a known transfer size into fixed-size ranges and runs one operation per
//! range on a bounded set of worker tasks. Used by the parallel downloader and the
//! buffer upload.

use futures::future::BoxFuture;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::errors::{Result, TransferError};
use crate::types::{BatchTransferOptions, HttpRange, DEFAULT_PARALLELISM};

type Operation = BoxFuture<'static, Result<()>>;

/// Splits `[0, transfer_size)` into contiguous ranges of `chunk_size` bytes
///
/// The last range holds the remainder. Both sizes must be positive.
pub fn split_ranges(transfer_size: i64, chunk_size: i64) -> Result<Vec<HttpRange>> {
    if chunk_size <= 0 {
        return Err(TransferError::InvalidArgument(
            "chunk size must be greater than zero".to_string(),
        ));
    }
    if transfer_size <= 0 {
        return Err(TransferError::InvalidArgument(
            "transfer size must be greater than zero".to_string(),
        ));
    }

    let num_chunks = (transfer_size - 1) / chunk_size + 1;
    let ranges = (0..num_chunks)
        .map(|i| {
            let offset = i * chunk_size;
            let count = if i == num_chunks - 1 {
                transfer_size - offset
            } else {
                chunk_size
            };
            HttpRange::new(offset, count)
        })
        .collect();
    Ok(ranges)
}

/// Runs `operation` once per range of the transfer with bounded parallelism
///
/// Up to `options.parallelism` workers pull operations from a bounded queue. When
/// an operation fails, the token handed to every operation is cancelled so that
/// running operations can stop early and queued ones are skipped, but every
/// submitted operation still reports before this function returns.
///
/// The returned error is the first one the collector observes. Operations finish
/// in any order, so with several failures which one is returned is not
/// deterministic; treat it as "an error occurred", not as the error of a
/// particular range.
pub async fn do_batch_transfer<F, Fut>(
    cancel: &CancellationToken,
    options: &BatchTransferOptions,
    operation: F,
) -> Result<()>
where
    F: Fn(CancellationToken, HttpRange) -> Fut,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    let ranges = split_ranges(options.transfer_size, options.chunk_size)?;
    let num_chunks = ranges.len();
    let parallelism = if options.parallelism == 0 {
        DEFAULT_PARALLELISM
    } else {
        options.parallelism
    };

    debug!(
        operation = %options.operation_name,
        transfer_size = options.transfer_size,
        chunk_size = options.chunk_size,
        num_chunks,
        parallelism,
        "starting batch transfer"
    );

    let token = cancel.child_token();
    let _cancel_on_exit = token.clone().drop_guard();

    let (op_tx, op_rx) = mpsc::channel::<Operation>(parallelism);
    let op_rx = Arc::new(Mutex::new(op_rx));
    let (res_tx, mut res_rx) = mpsc::channel::<Result<()>>(num_chunks);

    let mut workers = JoinSet::new();
    for _ in 0..parallelism.min(num_chunks) {
        let op_rx = Arc::clone(&op_rx);
        let res_tx = res_tx.clone();
        let token = token.clone();
        workers.spawn(async move {
            loop {
                let next = op_rx.lock().await.recv().await;
                let Some(op) = next else { break };
                let result = if token.is_cancelled() {
                    Err(TransferError::Cancelled)
                } else {
                    op.await
                };
                if res_tx.send(result).await.is_err() {
                    break;
                }
            }
        });
    }
    drop(res_tx);
    drop(op_rx);

    // Results are collected while operations are still being queued, so the
    // first failure cancels work that has not been picked up yet.
    let submit = async {
        for range in ranges {
            let op: Operation = Box::pin(operation(token.clone(), range));
            if op_tx.send(op).await.is_err() {
                break;
            }
        }
        drop(op_tx);
    };
    let collect = async {
        let mut first_err = None;
        for _ in 0..num_chunks {
            match res_rx.recv().await {
                Some(Ok(())) => {}
                Some(Err(err)) => {
                    if first_err.is_none() {
                        warn!(operation = %options.operation_name, error = %err, "batch operation failed, cancelling siblings");
                        token.cancel();
                        first_err = Some(err);
                    }
                }
                None => {
                    token.cancel();
                    first_err.get_or_insert_with(|| {
                        TransferError::Join("batch worker exited before reporting".to_string())
                    });
                    break;
                }
            }
        }
        first_err
    };
    let ((), mut first_err) = tokio::join!(submit, collect);

    while let Some(joined) = workers.join_next().await {
        if let Err(err) = joined {
            first_err.get_or_insert_with(|| err.into());
        }
    }

    match first_err {
        Some(err) => Err(err),
        None => {
            debug!(operation = %options.operation_name, num_chunks, "batch transfer complete");
            Ok(())
        }
    }
}
