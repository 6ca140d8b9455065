//! Transfer Client
//!
//! Configured entry point bundling one blob with the transfer settings applied to
//! every upload and download of it.

use bytes::Bytes;
use std::sync::Arc;
use tokio::io::AsyncRead;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

use crate::blob::{BlobSource, BlockWriter};
use crate::copier::concurrent_upload;
use crate::download::{download_buffer, download_to_writer_at};
use crate::errors::{Result, TransferError};
use crate::io::WriterAt;
use crate::progress::ProgressFn;
use crate::types::{
    DownloadOptions, TransferConfig, UploadBufferOptions, UploadStreamOptions,
};
use crate::upload::upload_buffer;

/// Client for chunked transfers to and from one blob
///
/// # Example
///
/// ```no_run
/// use std::sync::Arc;
/// use blob_transfer::{CancellationToken, MemoryBlob, TransferClient, TransferConfig};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let blob = Arc::new(MemoryBlob::new());
///     let client = TransferClient::new(blob, TransferConfig::default())?;
///     let cancel = CancellationToken::new();
///
///     client.upload_stream(&cancel, &b"Hello, blob!"[..]).await?;
///     let data = client.download_buffer(&cancel).await?;
///     assert_eq!(&data[..], b"Hello, blob!");
///
///     client.close().await;
///     Ok(())
/// }
/// ```
pub struct TransferClient<B: ?Sized> {
    config: TransferConfig,
    blob: Arc<B>,
    progress: Option<ProgressFn>,
    closed: Arc<RwLock<bool>>,
}

impl<B> TransferClient<B>
where
    B: BlockWriter + BlobSource + ?Sized,
{
    /// Creates a new client for `blob` with the given configuration
    pub fn new(blob: Arc<B>, config: TransferConfig) -> Result<Self> {
        Self::validate_config(&config)?;
        Ok(Self {
            config,
            blob,
            progress: None,
            closed: Arc::new(RwLock::new(false)),
        })
    }

    /// Reports the cumulative bytes of every transfer to `progress`
    pub fn with_progress(mut self, progress: ProgressFn) -> Self {
        self.progress = Some(progress);
        self
    }

    /// Validates the transfer configuration
    fn validate_config(config: &TransferConfig) -> Result<()> {
        if config.block_size <= 0 {
            return Err(TransferError::InvalidArgument(
                "Block size must be greater than zero".to_string(),
            ));
        }
        if config.buffer_size == 0 || config.max_buffers == 0 {
            return Err(TransferError::InvalidArgument(
                "Upload buffers must have a non-zero size and count".to_string(),
            ));
        }
        if config.parallelism == 0 {
            return Err(TransferError::InvalidArgument(
                "Parallelism must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Checks if the client is closed
    async fn check_closed(&self) -> Result<()> {
        let closed = self.closed.read().await;
        if *closed {
            return Err(TransferError::ClientClosed);
        }
        Ok(())
    }

    /// Uploads everything `reader` yields as the new blob content
    pub async fn upload_stream<R>(
        &self,
        cancel: &CancellationToken,
        reader: R,
    ) -> Result<B::Committed>
    where
        R: AsyncRead + Unpin + Send,
    {
        self.check_closed().await?;
        let mut options = UploadStreamOptions::default()
            .with_buffer_size(self.config.buffer_size)
            .with_max_buffers(self.config.max_buffers);
        options.progress = self.progress.clone();
        concurrent_upload(cancel, reader, Arc::clone(&self.blob), options).await
    }

    /// Uploads an in-memory payload as the new blob content
    pub async fn upload_buffer(&self, cancel: &CancellationToken, data: Bytes) -> Result<B::Committed> {
        self.check_closed().await?;
        let mut options = UploadBufferOptions::default()
            .with_block_size(self.config.block_size)
            .with_parallelism(self.config.parallelism);
        options.progress = self.progress.clone();
        upload_buffer(cancel, data, Arc::clone(&self.blob), &options).await
    }

    /// Downloads the blob into a random-access sink, returning the bytes written
    pub async fn download_to_writer_at<W>(
        &self,
        cancel: &CancellationToken,
        writer: Arc<W>,
    ) -> Result<i64>
    where
        W: WriterAt + ?Sized + 'static,
    {
        self.check_closed().await?;
        download_to_writer_at(cancel, Arc::clone(&self.blob), writer, &self.download_options()).await
    }

    /// Downloads the blob into memory
    pub async fn download_buffer(&self, cancel: &CancellationToken) -> Result<Bytes> {
        self.check_closed().await?;
        download_buffer(cancel, Arc::clone(&self.blob), &self.download_options()).await
    }

    fn download_options(&self) -> DownloadOptions {
        let mut options = DownloadOptions::default()
            .with_block_size(self.config.block_size)
            .with_parallelism(self.config.parallelism)
            .with_max_retries(self.config.max_retries);
        options.progress = self.progress.clone();
        options
    }

    /// Returns the client configuration
    pub fn config(&self) -> &TransferConfig {
        &self.config
    }

    /// Returns the blob this client transfers
    pub fn blob(&self) -> &Arc<B> {
        &self.blob
    }

    /// Closes the client
    ///
    /// After close is called, every transfer returns [`TransferError::ClientClosed`].
    /// It's safe to call close multiple times.
    pub async fn close(&self) {
        let mut closed = self.closed.write().await;
        *closed = true;
    }
}
