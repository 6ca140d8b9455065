//! Transfer Types and Constants
//!
//! This module defines the constants, byte ranges and option structures used by
//! the upload, download and batch transfer entry points.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::manager::TransferManager;
use crate::progress::ProgressFn;

/// Size of one mebibyte
pub const MIB: i64 = 1024 * 1024;

/// Default block size for ranged downloads and buffer uploads (4 MiB)
pub const DEFAULT_BLOCK_SIZE: i64 = 4 * MIB;

/// Default buffer size for streaming uploads (1 MiB)
pub const DEFAULT_BUFFER_SIZE: usize = 1024 * 1024;

/// Default number of buffers for streaming uploads
pub const DEFAULT_MAX_BUFFERS: usize = 1;

/// Default number of concurrent batch workers
pub const DEFAULT_PARALLELISM: usize = 5;

/// Default number of times a broken range body is reopened
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Maximum number of blocks a block blob may be committed with
pub const MAX_STAGE_BLOCKS: i64 = 50_000;

/// Maximum size of a single staged block (4000 MiB)
pub const MAX_STAGE_BLOCK_BYTES: i64 = 4000 * MIB;

/// Length of the random run identifier prefixed to every chunk ID
pub const CHUNK_ID_RUN_LEN: usize = 16;

/// Length of the big-endian sequence number suffixed to every chunk ID
pub const CHUNK_ID_SEQ_LEN: usize = 4;

/// Metadata dictionary type
pub type Metadata = HashMap<String, String>;

/// A half-open byte range `[offset, offset + count)`
///
/// A `count` of zero means "to the end of the blob" when used as a download range.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HttpRange {
    /// First byte of the range
    pub offset: i64,
    /// Number of bytes in the range
    pub count: i64,
}

impl HttpRange {
    /// Creates a new range
    pub fn new(offset: i64, count: i64) -> Self {
        Self { offset, count }
    }

    /// Returns the exclusive end offset of the range
    pub fn end(&self) -> i64 {
        self.offset + self.count
    }
}

/// Pass-through options for each staged block
#[derive(Debug, Clone, Default)]
pub struct StageBlockOptions {
    /// Lease the blob must hold
    pub lease_id: Option<String>,
    /// Encryption scope applied to the block
    pub encryption_scope: Option<String>,
}

/// Pass-through options for the final block list commit
#[derive(Debug, Clone, Default)]
pub struct CommitBlockListOptions {
    /// Content type recorded on the committed blob
    pub content_type: Option<String>,
    /// User metadata recorded on the committed blob
    pub metadata: Metadata,
    /// Lease the blob must hold
    pub lease_id: Option<String>,
}

/// Pass-through options for each ranged read
#[derive(Debug, Clone, Default)]
pub struct DownloadRangeOptions {
    /// Lease the blob must hold
    pub lease_id: Option<String>,
    /// ETag the blob must still match
    pub if_match: Option<String>,
}

/// Options controlling how a broken range body is resumed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryReaderOptions {
    /// Maximum number of times the remainder of a range is re-requested
    pub max_retries: u32,
}

impl Default for RetryReaderOptions {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }
}

/// Options for a batch transfer
#[derive(Debug, Clone)]
pub struct BatchTransferOptions {
    /// Name used in log events
    pub operation_name: String,
    /// Total number of bytes to transfer
    pub transfer_size: i64,
    /// Size of every range except possibly the last
    pub chunk_size: i64,
    /// Number of concurrent workers, 0 selects the default
    pub parallelism: usize,
}

impl BatchTransferOptions {
    /// Creates batch options for the given sizes
    pub fn new(operation_name: impl Into<String>, transfer_size: i64, chunk_size: i64) -> Self {
        Self {
            operation_name: operation_name.into(),
            transfer_size,
            chunk_size,
            parallelism: DEFAULT_PARALLELISM,
        }
    }

    /// Sets the number of concurrent workers
    pub fn with_parallelism(mut self, parallelism: usize) -> Self {
        self.parallelism = parallelism;
        self
    }
}

/// Options for a streaming upload
#[derive(Clone)]
pub struct UploadStreamOptions {
    /// Size of each buffer when no transfer manager is supplied
    pub buffer_size: usize,
    /// Number of buffers when no transfer manager is supplied
    pub max_buffers: usize,
    /// Transfer manager supplying buffers and bounding concurrency
    pub transfer_manager: Option<Arc<dyn TransferManager>>,
    /// Options passed to every staged block
    pub stage_block: StageBlockOptions,
    /// Options passed to the final commit
    pub commit: CommitBlockListOptions,
    /// Callback receiving the cumulative number of bytes staged
    pub progress: Option<ProgressFn>,
}

impl Default for UploadStreamOptions {
    fn default() -> Self {
        Self {
            buffer_size: DEFAULT_BUFFER_SIZE,
            max_buffers: DEFAULT_MAX_BUFFERS,
            transfer_manager: None,
            stage_block: StageBlockOptions::default(),
            commit: CommitBlockListOptions::default(),
            progress: None,
        }
    }
}

impl fmt::Debug for UploadStreamOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UploadStreamOptions")
            .field("buffer_size", &self.buffer_size)
            .field("max_buffers", &self.max_buffers)
            .field("transfer_manager", &self.transfer_manager.is_some())
            .field("stage_block", &self.stage_block)
            .field("commit", &self.commit)
            .field("progress", &self.progress.is_some())
            .finish()
    }
}

impl UploadStreamOptions {
    /// Sets the buffer size used when no transfer manager is supplied
    pub fn with_buffer_size(mut self, buffer_size: usize) -> Self {
        self.buffer_size = buffer_size;
        self
    }

    /// Sets the buffer count used when no transfer manager is supplied
    pub fn with_max_buffers(mut self, max_buffers: usize) -> Self {
        self.max_buffers = max_buffers;
        self
    }

    /// Uses the given transfer manager instead of a per-call static buffer
    pub fn with_transfer_manager(mut self, manager: Arc<dyn TransferManager>) -> Self {
        self.transfer_manager = Some(manager);
        self
    }

    /// Sets the options passed to every staged block
    pub fn with_stage_block_options(mut self, options: StageBlockOptions) -> Self {
        self.stage_block = options;
        self
    }

    /// Sets the options passed to the final commit
    pub fn with_commit_options(mut self, options: CommitBlockListOptions) -> Self {
        self.commit = options;
        self
    }

    /// Sets the progress callback
    pub fn with_progress(mut self, progress: ProgressFn) -> Self {
        self.progress = Some(progress);
        self
    }
}

/// Options for uploading an in-memory buffer of known size
#[derive(Clone)]
pub struct UploadBufferOptions {
    /// Block size, 0 derives one from the payload size
    pub block_size: i64,
    /// Number of concurrent staging workers, 0 selects the default
    pub parallelism: usize,
    /// Options passed to every staged block
    pub stage_block: StageBlockOptions,
    /// Options passed to the final commit
    pub commit: CommitBlockListOptions,
    /// Callback receiving the cumulative number of bytes staged
    pub progress: Option<ProgressFn>,
}

impl Default for UploadBufferOptions {
    fn default() -> Self {
        Self {
            block_size: 0,
            parallelism: DEFAULT_PARALLELISM,
            stage_block: StageBlockOptions::default(),
            commit: CommitBlockListOptions::default(),
            progress: None,
        }
    }
}

impl fmt::Debug for UploadBufferOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UploadBufferOptions")
            .field("block_size", &self.block_size)
            .field("parallelism", &self.parallelism)
            .field("stage_block", &self.stage_block)
            .field("commit", &self.commit)
            .field("progress", &self.progress.is_some())
            .finish()
    }
}

impl UploadBufferOptions {
    /// Sets the block size
    pub fn with_block_size(mut self, block_size: i64) -> Self {
        self.block_size = block_size;
        self
    }

    /// Sets the number of concurrent staging workers
    pub fn with_parallelism(mut self, parallelism: usize) -> Self {
        self.parallelism = parallelism;
        self
    }

    /// Sets the options passed to the final commit
    pub fn with_commit_options(mut self, options: CommitBlockListOptions) -> Self {
        self.commit = options;
        self
    }

    /// Sets the progress callback
    pub fn with_progress(mut self, progress: ProgressFn) -> Self {
        self.progress = Some(progress);
        self
    }
}

/// Options for a parallel ranged download
#[derive(Clone)]
pub struct DownloadOptions {
    /// Portion of the blob to download, a zero count reads to the end
    pub range: HttpRange,
    /// Size of each ranged read, 0 selects the default
    pub block_size: i64,
    /// Number of concurrent range workers, 0 selects the default
    pub parallelism: usize,
    /// How a broken range body is resumed
    pub retry: RetryReaderOptions,
    /// Options passed to every ranged read
    pub range_options: DownloadRangeOptions,
    /// Callback receiving the cumulative number of bytes written
    pub progress: Option<ProgressFn>,
}

impl Default for DownloadOptions {
    fn default() -> Self {
        Self {
            range: HttpRange::default(),
            block_size: DEFAULT_BLOCK_SIZE,
            parallelism: DEFAULT_PARALLELISM,
            retry: RetryReaderOptions::default(),
            range_options: DownloadRangeOptions::default(),
            progress: None,
        }
    }
}

impl fmt::Debug for DownloadOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DownloadOptions")
            .field("range", &self.range)
            .field("block_size", &self.block_size)
            .field("parallelism", &self.parallelism)
            .field("retry", &self.retry)
            .field("range_options", &self.range_options)
            .field("progress", &self.progress.is_some())
            .finish()
    }
}

impl DownloadOptions {
    /// Restricts the download to a range of the blob
    pub fn with_range(mut self, range: HttpRange) -> Self {
        self.range = range;
        self
    }

    /// Sets the size of each ranged read
    pub fn with_block_size(mut self, block_size: i64) -> Self {
        self.block_size = block_size;
        self
    }

    /// Sets the number of concurrent range workers
    pub fn with_parallelism(mut self, parallelism: usize) -> Self {
        self.parallelism = parallelism;
        self
    }

    /// Sets the number of times a broken range body is reopened
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.retry.max_retries = max_retries;
        self
    }

    /// Sets the progress callback
    pub fn with_progress(mut self, progress: ProgressFn) -> Self {
        self.progress = Some(progress);
        self
    }
}

/// Client-wide transfer configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferConfig {
    /// Block size for ranged downloads and buffer uploads
    pub block_size: i64,
    /// Buffer size for streaming uploads
    pub buffer_size: usize,
    /// Number of buffers for streaming uploads
    pub max_buffers: usize,
    /// Number of concurrent batch workers
    pub parallelism: usize,
    /// Number of times a broken range body is reopened
    pub max_retries: u32,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            block_size: DEFAULT_BLOCK_SIZE,
            buffer_size: DEFAULT_BUFFER_SIZE,
            max_buffers: DEFAULT_MAX_BUFFERS,
            parallelism: DEFAULT_PARALLELISM,
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }
}

impl TransferConfig {
    /// Sets the block size
    pub fn with_block_size(mut self, block_size: i64) -> Self {
        self.block_size = block_size;
        self
    }

    /// Sets the streaming upload buffer size
    pub fn with_buffer_size(mut self, buffer_size: usize) -> Self {
        self.buffer_size = buffer_size;
        self
    }

    /// Sets the streaming upload buffer count
    pub fn with_max_buffers(mut self, max_buffers: usize) -> Self {
        self.max_buffers = max_buffers;
        self
    }

    /// Sets the number of concurrent batch workers
    pub fn with_parallelism(mut self, parallelism: usize) -> Self {
        self.parallelism = parallelism;
        self
    }

    /// Sets the number of range body retries
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }
}
