//! Blob Transfer
//!
//! Concurrent chunked data-transfer core for block-blob storage clients.
//! The storage service is reached through two capabilities, [`BlockWriter`] and
//! [`BlobSource`]; this crate supplies the transfer machinery on top of them.
//!
//! # Features
//!
//! - Streaming upload with pipelined reads and bounded concurrent block staging
//! - Parallel upload of in-memory buffers
//! - Parallel ranged download into any random-access sink
//! - Resumable range bodies
//! - Aggregate progress reporting
//! - First-error propagation with cooperative cancellation of sibling work
//! - Pluggable buffer pools and concurrency bounds
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use blob_transfer::{
//!     concurrent_upload, download_buffer, CancellationToken, DownloadOptions, MemoryBlob,
//!     UploadStreamOptions,
//! };
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let blob = Arc::new(MemoryBlob::new());
//!     let cancel = CancellationToken::new();
//!     let payload = vec![7u8; 10 * 1024 * 1024];
//!
//!     let options = UploadStreamOptions::default()
//!         .with_buffer_size(1024 * 1024)
//!         .with_max_buffers(4);
//!     concurrent_upload(&cancel, &payload[..], Arc::clone(&blob), options).await?;
//!
//!     let data = download_buffer(&cancel, blob, &DownloadOptions::default()).await?;
//!     assert_eq!(data.len(), payload.len());
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

mod batch;
mod blob;
mod chunk_id;
mod client;
mod copier;
mod download;
mod errors;
mod io;
mod manager;
mod memory;
mod progress;
mod retry;
mod types;
mod upload;

// Re-export public API
pub use batch::{do_batch_transfer, split_ranges};
pub use blob::{BlobSource, BlockWriter, RangeBody};
pub use chunk_id::{decode_chunk_id, decode_sequence, encode_chunk_id, ChunkIdGenerator};
pub use client::TransferClient;
pub use copier::concurrent_upload;
pub use download::{download_buffer, download_to_writer_at};
pub use errors::{Result, TransferError};
pub use io::{read_full, SectionWriter, WriteAtBuffer, WriterAt};
pub use manager::{StaticBuffer, SyncPool, TransferManager};
pub use memory::{MemoryBlob, MemoryCommit};
pub use progress::{ProgressFn, ProgressTracker};
pub use retry::RetryReader;
pub use tokio_util::sync::CancellationToken;
pub use types::{
    BatchTransferOptions, CommitBlockListOptions, DownloadOptions, DownloadRangeOptions,
    HttpRange, Metadata, RetryReaderOptions, StageBlockOptions, TransferConfig,
    UploadBufferOptions, UploadStreamOptions, CHUNK_ID_RUN_LEN, CHUNK_ID_SEQ_LEN,
    DEFAULT_BLOCK_SIZE, DEFAULT_BUFFER_SIZE, DEFAULT_MAX_BUFFERS, DEFAULT_MAX_RETRIES,
    DEFAULT_PARALLELISM, MAX_STAGE_BLOCKS, MAX_STAGE_BLOCK_BYTES, MIB,
};
pub use upload::{resolve_block_size, upload_buffer};
