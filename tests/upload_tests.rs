//! Tests for streaming and buffer uploads
//!
//! These tests drive the copier and the buffer upload against an in-memory blob
//! and check what was staged and committed.

use async_trait::async_trait;
use blob_transfer::{
    concurrent_upload, decode_chunk_id, decode_sequence, upload_buffer, BlockWriter,
    CancellationToken, CommitBlockListOptions, MemoryBlob, ProgressFn, StageBlockOptions,
    SyncPool, TransferError, TransferManager, UploadBufferOptions, UploadStreamOptions,
};
use bytes::Bytes;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Builds a payload whose bytes identify their position
fn payload(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

/// Returns a progress callback recording every reported value
fn recording_progress() -> (ProgressFn, Arc<Mutex<Vec<i64>>>) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let s = Arc::clone(&seen);
    let callback: ProgressFn = Arc::new(move |total| s.lock().unwrap().push(total));
    (callback, seen)
}

/// Block writer whose first stage call can fail quickly while the others are slow
///
/// Slow calls record whether their token was cancelled by the time they finish.
struct SiblingWatcher {
    fail_first: bool,
    calls: AtomicUsize,
    finished: AtomicUsize,
    saw_cancelled: AtomicUsize,
    commits: AtomicUsize,
}

impl SiblingWatcher {
    fn new(fail_first: bool) -> Self {
        Self {
            fail_first,
            calls: AtomicUsize::new(0),
            finished: AtomicUsize::new(0),
            saw_cancelled: AtomicUsize::new(0),
            commits: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl BlockWriter for SiblingWatcher {
    type Committed = ();

    async fn stage_block(
        &self,
        cancel: &CancellationToken,
        _block_id: &str,
        _body: &[u8],
        _options: &StageBlockOptions,
    ) -> blob_transfer::Result<()> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if call == 0 && self.fail_first {
            tokio::time::sleep(Duration::from_millis(20)).await;
            return Err(TransferError::service("stage_block", "first block rejected"));
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
        if cancel.is_cancelled() {
            self.saw_cancelled.fetch_add(1, Ordering::SeqCst);
        }
        self.finished.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn commit_block_list(
        &self,
        _cancel: &CancellationToken,
        _block_ids: &[String],
        _options: &CommitBlockListOptions,
    ) -> blob_transfer::Result<()> {
        self.commits.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Test suite for the streaming copier
#[cfg(test)]
mod stream_upload_tests {
    use super::*;

    /// Test that a stream is staged in buffer-sized blocks and committed once
    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_stream_is_staged_in_buffer_sized_blocks() {
        // Arrange
        let blob = Arc::new(MemoryBlob::new());
        let data = payload(10 * 1024 + 17);
        let options = UploadStreamOptions::default()
            .with_buffer_size(1024)
            .with_max_buffers(3);

        // Act
        let commit = concurrent_upload(&CancellationToken::new(), &data[..], Arc::clone(&blob), options)
            .await
            .expect("upload should succeed");

        // Assert
        assert_eq!(blob.stage_calls(), 11, "ceil(N/B) blocks");
        assert_eq!(blob.commit_calls(), 1);
        assert_eq!(commit.block_count, 11);
        assert_eq!(commit.content_length, data.len() as i64);
        assert_eq!(&blob.content()[..], &data[..]);
    }

    /// Test that the committed list follows read order
    ///
    /// Every ID carries the same run prefix and the sequence numbers count up
    /// from zero without gaps.
    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_commit_list_is_in_read_order() {
        // Arrange: a stage delay makes completion order differ from read order
        let blob = Arc::new(MemoryBlob::new().with_stage_delay(Duration::from_millis(2)));
        let data = payload(64 * 100);
        let options = UploadStreamOptions::default()
            .with_buffer_size(64)
            .with_max_buffers(8);

        // Act
        concurrent_upload(&CancellationToken::new(), &data[..], Arc::clone(&blob), options)
            .await
            .unwrap();

        // Assert
        let ids = blob.committed_block_ids();
        assert_eq!(ids.len(), 100);
        let (run_id, _) = decode_chunk_id(&ids[0]).unwrap();
        for (i, id) in ids.iter().enumerate() {
            assert_eq!(id.len(), 28);
            let (run, seq) = decode_chunk_id(id).unwrap();
            assert_eq!(run, run_id);
            assert_eq!(seq, i as u32);
        }
    }

    /// Test that two uploads use different run prefixes
    #[tokio::test]
    async fn test_each_upload_has_its_own_run_id() {
        let first = Arc::new(MemoryBlob::new());
        let second = Arc::new(MemoryBlob::new());
        let cancel = CancellationToken::new();

        concurrent_upload(&cancel, &b"abc"[..], Arc::clone(&first), UploadStreamOptions::default())
            .await
            .unwrap();
        concurrent_upload(&cancel, &b"abc"[..], Arc::clone(&second), UploadStreamOptions::default())
            .await
            .unwrap();

        let (a, _) = decode_chunk_id(&first.committed_block_ids()[0]).unwrap();
        let (b, _) = decode_chunk_id(&second.committed_block_ids()[0]).unwrap();
        assert_ne!(a, b);
    }

    /// Test that an empty source commits an empty block list
    #[tokio::test]
    async fn test_empty_source_commits_empty_list() {
        // Arrange
        let blob = Arc::new(MemoryBlob::new());
        let empty: &[u8] = &[];

        // Act
        let commit = concurrent_upload(
            &CancellationToken::new(),
            empty,
            Arc::clone(&blob),
            UploadStreamOptions::default(),
        )
        .await
        .unwrap();

        // Assert
        assert_eq!(blob.stage_calls(), 0);
        assert_eq!(blob.commit_calls(), 1);
        assert_eq!(commit.block_count, 0);
        assert!(blob.content().is_empty());
    }

    /// Test that a source ending on a buffer boundary produces no empty block
    #[tokio::test]
    async fn test_exact_multiple_of_buffer_size() {
        let blob = Arc::new(MemoryBlob::new());
        let data = payload(4096);
        let options = UploadStreamOptions::default().with_buffer_size(1024);

        concurrent_upload(&CancellationToken::new(), &data[..], Arc::clone(&blob), options)
            .await
            .unwrap();

        assert_eq!(blob.stage_calls(), 4);
        assert_eq!(blob.committed_block_ids().len(), 4);
    }

    /// Test that staging never exceeds the number of buffers
    #[tokio::test(flavor = "multi_thread", worker_threads = 8)]
    async fn test_staging_concurrency_is_bounded_by_buffers() {
        // Arrange
        let blob = Arc::new(MemoryBlob::new().with_stage_delay(Duration::from_millis(10)));
        let data = payload(256 * 40);
        let options = UploadStreamOptions::default()
            .with_buffer_size(256)
            .with_max_buffers(4);

        // Act
        concurrent_upload(&CancellationToken::new(), &data[..], Arc::clone(&blob), options)
            .await
            .unwrap();

        // Assert
        let peak = blob.peak_concurrent_stages();
        assert!(peak <= 4, "peak was {peak}");
        assert!(peak >= 2, "staging should overlap, peak was {peak}");
    }

    /// Test that content type and metadata options reach the commit
    #[tokio::test]
    async fn test_commit_options_are_forwarded() {
        let blob = Arc::new(MemoryBlob::new());
        let commit = CommitBlockListOptions {
            content_type: Some("text/plain".to_string()),
            ..Default::default()
        };
        let options = UploadStreamOptions::default().with_commit_options(commit);

        concurrent_upload(&CancellationToken::new(), &b"hello"[..], Arc::clone(&blob), options)
            .await
            .unwrap();

        assert_eq!(blob.content_type().as_deref(), Some("text/plain"));
    }

    /// Test uploading through a shared pool manager
    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_upload_with_sync_pool_manager() {
        // Arrange
        let pool = Arc::new(SyncPool::new(512, 3).unwrap());
        let manager: Arc<dyn TransferManager> = pool.clone();
        let blob = Arc::new(MemoryBlob::new());
        let data = payload(512 * 9 + 1);
        let options = UploadStreamOptions::default().with_transfer_manager(manager);

        // Act
        concurrent_upload(&CancellationToken::new(), &data[..], Arc::clone(&blob), options)
            .await
            .unwrap();

        // Assert
        assert_eq!(blob.stage_calls(), 10);
        assert_eq!(&blob.content()[..], &data[..]);
        assert!(pool.idle() <= 3);
    }

    /// Test that progress is reported monotonically up to the payload size
    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_upload_progress_is_monotonic() {
        let blob = Arc::new(MemoryBlob::new());
        let data = payload(1000);
        let (callback, seen) = recording_progress();
        let options = UploadStreamOptions::default()
            .with_buffer_size(100)
            .with_max_buffers(4)
            .with_progress(callback);

        concurrent_upload(&CancellationToken::new(), &data[..], Arc::clone(&blob), options)
            .await
            .unwrap();

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 10);
        assert!(seen.windows(2).all(|w| w[0] <= w[1]));
        assert_eq!(*seen.last().unwrap(), 1000);
    }
}

/// Test suite for upload failure handling
#[cfg(test)]
mod stream_failure_tests {
    use super::*;

    /// Test that a failed stage prevents the commit
    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_stage_failure_skips_commit() {
        // Arrange
        let blob = Arc::new(MemoryBlob::new());
        blob.fail_stage_call(3);
        let data = payload(100 * 10);
        let options = UploadStreamOptions::default()
            .with_buffer_size(100)
            .with_max_buffers(2);

        // Act
        let result =
            concurrent_upload(&CancellationToken::new(), &data[..], Arc::clone(&blob), options).await;

        // Assert
        match result {
            Err(TransferError::Stage { block_id, source }) => {
                assert!(decode_sequence(&block_id).is_ok());
                assert!(matches!(*source, TransferError::Service { .. }));
            }
            other => panic!("expected a stage error, got {other:?}"),
        }
        assert_eq!(blob.commit_calls(), 0);
    }

    /// Test that a source read error is returned and nothing is committed
    #[tokio::test]
    async fn test_read_error_skips_commit() {
        // Arrange
        let reader = tokio_test::io::Builder::new()
            .read(&[1u8; 300])
            .read_error(std::io::Error::new(std::io::ErrorKind::Other, "disk gone"))
            .build();
        let blob = Arc::new(MemoryBlob::new());
        let options = UploadStreamOptions::default().with_buffer_size(1024);

        // Act
        let result =
            concurrent_upload(&CancellationToken::new(), reader, Arc::clone(&blob), options).await;

        // Assert
        match result {
            Err(TransferError::Io(err)) => assert_eq!(err.to_string(), "disk gone"),
            other => panic!("expected an io error, got {other:?}"),
        }
        assert_eq!(blob.commit_calls(), 0);
    }

    /// Test that a cancelled caller token stops the upload before any staging
    #[tokio::test]
    async fn test_cancelled_token_stops_upload() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let blob = Arc::new(MemoryBlob::new());

        let result = concurrent_upload(
            &cancel,
            &payload(4096)[..],
            Arc::clone(&blob),
            UploadStreamOptions::default().with_buffer_size(1024),
        )
        .await;

        assert!(matches!(result, Err(TransferError::Cancelled)));
        assert_eq!(blob.stage_calls(), 0);
        assert_eq!(blob.commit_calls(), 0);
    }

    /// Test that zero-size buffers are rejected
    #[tokio::test]
    async fn test_zero_buffer_size_is_rejected() {
        let blob = Arc::new(MemoryBlob::new());
        let options = UploadStreamOptions::default().with_buffer_size(0);

        let result =
            concurrent_upload(&CancellationToken::new(), &b"data"[..], Arc::clone(&blob), options).await;

        assert!(matches!(result, Err(TransferError::InvalidArgument(_))));
    }

    /// Test that a failed block leaves in-flight siblings running on a live token
    ///
    /// The failure is still returned and still prevents the commit.
    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_stage_failure_does_not_cancel_siblings() {
        // Arrange
        let writer = Arc::new(SiblingWatcher::new(true));
        let data = payload(400);
        let options = UploadStreamOptions::default()
            .with_buffer_size(100)
            .with_max_buffers(4);

        // Act
        let result =
            concurrent_upload(&CancellationToken::new(), &data[..], Arc::clone(&writer), options).await;

        // Assert
        assert!(matches!(result, Err(TransferError::Stage { .. })));
        assert_eq!(writer.finished.load(Ordering::SeqCst), 3);
        assert_eq!(writer.saw_cancelled.load(Ordering::SeqCst), 0);
        assert_eq!(writer.commits.load(Ordering::SeqCst), 0);
    }

    /// Test that blocks scheduled before a read error finish on a live token
    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_read_error_awaits_scheduled_blocks() {
        // Arrange
        let reader = tokio_test::io::Builder::new()
            .read(&[1u8; 100])
            .read(&[2u8; 100])
            .read_error(std::io::Error::new(std::io::ErrorKind::Other, "disk gone"))
            .build();
        let writer = Arc::new(SiblingWatcher::new(false));
        let options = UploadStreamOptions::default()
            .with_buffer_size(100)
            .with_max_buffers(4);

        // Act
        let result =
            concurrent_upload(&CancellationToken::new(), reader, Arc::clone(&writer), options).await;

        // Assert
        assert!(matches!(result, Err(TransferError::Io(_))));
        assert_eq!(writer.finished.load(Ordering::SeqCst), 2);
        assert_eq!(writer.saw_cancelled.load(Ordering::SeqCst), 0);
        assert_eq!(writer.commits.load(Ordering::SeqCst), 0);
    }
}

/// Test suite for the buffer upload
#[cfg(test)]
mod buffer_upload_tests {
    use super::*;

    /// Test that a buffer is staged in block-sized slices and committed in offset order
    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_buffer_upload_commits_in_offset_order() {
        // Arrange
        let blob = Arc::new(MemoryBlob::new().with_stage_delay(Duration::from_millis(1)));
        let data = Bytes::from(payload(10_000));
        let options = UploadBufferOptions::default()
            .with_block_size(999)
            .with_parallelism(4);

        // Act
        let commit = upload_buffer(&CancellationToken::new(), data.clone(), Arc::clone(&blob), &options)
            .await
            .unwrap();

        // Assert
        assert_eq!(commit.block_count, 11);
        assert_eq!(blob.content(), data);
        let sequences: Vec<u32> = blob
            .committed_block_ids()
            .iter()
            .map(|id| decode_sequence(id).unwrap())
            .collect();
        assert_eq!(sequences, (0..11).collect::<Vec<_>>());
    }

    /// Test that an empty buffer commits without staging
    #[tokio::test]
    async fn test_empty_buffer_commits_empty_list() {
        let blob = Arc::new(MemoryBlob::new());

        let commit = upload_buffer(
            &CancellationToken::new(),
            Bytes::new(),
            Arc::clone(&blob),
            &UploadBufferOptions::default(),
        )
        .await
        .unwrap();

        assert_eq!(commit.block_count, 0);
        assert_eq!(blob.stage_calls(), 0);
        assert_eq!(blob.commit_calls(), 1);
    }

    /// Test that a stage failure in a buffer upload skips the commit
    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_buffer_stage_failure_skips_commit() {
        let blob = Arc::new(MemoryBlob::new());
        blob.fail_stage_call(0);
        let options = UploadBufferOptions::default().with_block_size(10);

        let result = upload_buffer(
            &CancellationToken::new(),
            Bytes::from(payload(100)),
            Arc::clone(&blob),
            &options,
        )
        .await;

        assert!(matches!(result, Err(TransferError::Stage { .. })));
        assert_eq!(blob.commit_calls(), 0);
    }

    /// Test that buffer upload progress ends at the payload size
    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_buffer_upload_progress() {
        let blob = Arc::new(MemoryBlob::new());
        let (callback, seen) = recording_progress();
        let options = UploadBufferOptions::default()
            .with_block_size(64)
            .with_progress(callback);

        upload_buffer(
            &CancellationToken::new(),
            Bytes::from(payload(640)),
            Arc::clone(&blob),
            &options,
        )
        .await
        .unwrap();

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 10);
        assert!(seen.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(*seen.last().unwrap(), 640);
    }
}
