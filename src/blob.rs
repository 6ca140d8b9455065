//! Storage Capabilities
//!
//! The transfer core never talks to a storage service directly. It consumes the
//! two capabilities defined here, which a generated service client (or the
//! in-memory [`MemoryBlob`](crate::memory::MemoryBlob)) implements.

use async_trait::async_trait;
use tokio::io::AsyncRead;
use tokio_util::sync::CancellationToken;

use crate::errors::Result;
use crate::types::{CommitBlockListOptions, DownloadRangeOptions, HttpRange, StageBlockOptions};

/// Readable body of one ranged read
pub type RangeBody = Box<dyn AsyncRead + Send + Unpin>;

/// Destination that accepts uncommitted blocks and commits them as a list
#[async_trait]
pub trait BlockWriter: Send + Sync + 'static {
    /// Result of a successful commit
    type Committed: Send + 'static;

    /// Uploads one uncommitted block
    ///
    /// `cancel` is cancelled when a sibling block fails or the caller gives up.
    async fn stage_block(
        &self,
        cancel: &CancellationToken,
        block_id: &str,
        body: &[u8],
        options: &StageBlockOptions,
    ) -> Result<()>;

    /// Commits the staged blocks, in the given order, as the blob content
    async fn commit_block_list(
        &self,
        cancel: &CancellationToken,
        block_ids: &[String],
        options: &CommitBlockListOptions,
    ) -> Result<Self::Committed>;
}

/// Source that can report its length and serve byte ranges
#[async_trait]
pub trait BlobSource: Send + Sync + 'static {
    /// Returns the declared content length of the blob
    async fn content_length(&self, cancel: &CancellationToken) -> Result<i64>;

    /// Opens a body streaming exactly the bytes of `range`
    async fn download_range(
        &self,
        cancel: &CancellationToken,
        range: HttpRange,
        options: &DownloadRangeOptions,
    ) -> Result<RangeBody>;
}
