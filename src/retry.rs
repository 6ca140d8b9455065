//! Resumable Range Bodies
//!
//! A ranged read can break part way through. [`RetryReader`] remembers how many
//! bytes of its range were delivered and, on failure, re-requests only the
//! remainder, up to a fixed number of times.

use std::io;
use std::sync::Arc;
use tokio::io::AsyncReadExt;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::blob::{BlobSource, RangeBody};
use crate::errors::{Result, TransferError};
use crate::types::{DownloadRangeOptions, HttpRange, RetryReaderOptions};

/// Reader over one byte range that reopens the range after body failures
pub struct RetryReader<S: ?Sized> {
    source: Arc<S>,
    cancel: CancellationToken,
    range: HttpRange,
    range_options: DownloadRangeOptions,
    max_retries: u32,
    retries: u32,
    consumed: i64,
    body: Option<RangeBody>,
}

impl<S: BlobSource + ?Sized> RetryReader<S> {
    /// Opens `range` on `source`
    pub async fn open(
        source: Arc<S>,
        cancel: CancellationToken,
        range: HttpRange,
        range_options: DownloadRangeOptions,
        retry: RetryReaderOptions,
    ) -> Result<Self> {
        if cancel.is_cancelled() {
            return Err(TransferError::Cancelled);
        }
        let body = source.download_range(&cancel, range, &range_options).await?;
        Ok(Self {
            source,
            cancel,
            range,
            range_options,
            max_retries: retry.max_retries,
            retries: 0,
            consumed: 0,
            body: Some(body),
        })
    }

    /// Reads the next bytes of the range into `buf`
    ///
    /// Returns 0 once the whole range has been delivered. A body that ends early
    /// counts as a failure and is retried like any other read error.
    pub async fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        loop {
            let remaining = self.range.count - self.consumed;
            if remaining <= 0 || buf.is_empty() {
                return Ok(0);
            }
            if self.cancel.is_cancelled() {
                return Err(TransferError::Cancelled);
            }

            let mut body = match self.body.take() {
                Some(body) => body,
                None => {
                    let rest = self.remainder();
                    self.source
                        .download_range(&self.cancel, rest, &self.range_options)
                        .await?
                }
            };

            let limit = buf.len().min(remaining as usize);
            let err = match body.read(&mut buf[..limit]).await {
                Ok(0) => io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    format!("range body ended with {remaining} bytes outstanding"),
                ),
                Ok(n) => {
                    self.consumed += n as i64;
                    self.body = Some(body);
                    return Ok(n);
                }
                Err(err) => err,
            };

            if self.retries >= self.max_retries {
                return Err(err.into());
            }
            self.retries += 1;
            warn!(
                offset = self.range.offset + self.consumed,
                remaining,
                attempt = self.retries,
                error = %err,
                "range body failed, reopening remainder"
            );
        }
    }

    /// Returns the number of bytes delivered so far
    pub fn consumed(&self) -> i64 {
        self.consumed
    }

    /// Returns the number of times the range was reopened
    pub fn retries(&self) -> u32 {
        self.retries
    }

    /// Returns the part of the range not yet delivered
    fn remainder(&self) -> HttpRange {
        HttpRange::new(
            self.range.offset + self.consumed,
            self.range.count - self.consumed,
        )
    }
}
