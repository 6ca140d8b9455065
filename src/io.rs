//! Random-Access Sinks and Read Helpers
//!
//! This module provides the destinations used by the parallel downloader: the
//! [`WriterAt`] trait, an auto-growing in-memory [`WriteAtBuffer`], and the
//! bounded [`SectionWriter`] that confines each range worker to its own window.

use bytes::Bytes;
use std::io;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::errors::{Result, TransferError};

/// A destination accepting writes at arbitrary byte offsets
///
/// Implementations must tolerate concurrent calls at disjoint offsets.
pub trait WriterAt: Send + Sync {
    /// Writes `buf` starting at `offset`, returning the number of bytes written
    fn write_at(&self, buf: &[u8], offset: u64) -> io::Result<usize>;
}

impl<T: WriterAt + ?Sized> WriterAt for Arc<T> {
    fn write_at(&self, buf: &[u8], offset: u64) -> io::Result<usize> {
        (**self).write_at(buf, offset)
    }
}

impl<T: WriterAt + ?Sized> WriterAt for &T {
    fn write_at(&self, buf: &[u8], offset: u64) -> io::Result<usize> {
        (**self).write_at(buf, offset)
    }
}

#[cfg(unix)]
impl WriterAt for std::fs::File {
    fn write_at(&self, buf: &[u8], offset: u64) -> io::Result<usize> {
        std::os::unix::fs::FileExt::write_all_at(self, buf, offset)?;
        Ok(buf.len())
    }
}

/// Thread-safe in-memory sink that grows to fit every write
///
/// Writes beyond the current end extend the buffer with zeroes; the buffer never
/// shrinks. A single mutex guards both the write and read paths.
#[derive(Debug)]
pub struct WriteAtBuffer {
    buf: Mutex<Vec<u8>>,
    growth_coefficient: f64,
}

impl WriteAtBuffer {
    /// Creates an empty buffer
    pub fn new() -> Self {
        Self::from_vec(Vec::new())
    }

    /// Creates an empty buffer with room for `capacity` bytes
    pub fn with_capacity(capacity: usize) -> Self {
        Self::from_vec(Vec::with_capacity(capacity))
    }

    /// Wraps existing contents
    pub fn from_vec(buf: Vec<u8>) -> Self {
        Self {
            buf: Mutex::new(buf),
            growth_coefficient: 1.0,
        }
    }

    /// Sets how much extra capacity is reserved when the buffer grows
    ///
    /// Growing to `n` bytes reserves `coefficient * n`. Values below 1 are treated as 1.
    pub fn with_growth_coefficient(mut self, coefficient: f64) -> Self {
        self.growth_coefficient = coefficient.max(1.0);
        self
    }

    /// Returns a snapshot of the current contents
    pub fn bytes(&self) -> Bytes {
        Bytes::copy_from_slice(&self.lock())
    }

    /// Returns the current length
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Returns true if nothing has been written
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Consumes the buffer and returns its contents
    pub fn into_inner(self) -> Vec<u8> {
        self.buf.into_inner().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<u8>> {
        self.buf.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for WriteAtBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl WriterAt for WriteAtBuffer {
    fn write_at(&self, data: &[u8], offset: u64) -> io::Result<usize> {
        let start = usize::try_from(offset)
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "offset exceeds usize"))?;
        let end = start
            .checked_add(data.len())
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "write end overflows"))?;

        let mut buf = self.lock();
        if buf.len() < end {
            if buf.capacity() < end {
                let wanted = (self.growth_coefficient * end as f64) as usize;
                let len = buf.len();
                buf.reserve_exact(wanted.max(end) - len);
            }
            buf.resize(end, 0);
        }
        buf[start..end].copy_from_slice(data);
        Ok(data.len())
    }
}

/// Writer confined to the window `[offset, offset + count)` of a [`WriterAt`]
#[derive(Debug)]
pub struct SectionWriter<W> {
    sink: W,
    offset: u64,
    count: u64,
    position: u64,
}

impl<W: WriterAt> SectionWriter<W> {
    /// Creates a writer over `count` bytes of `sink` starting at `offset`
    pub fn new(sink: W, offset: u64, count: u64) -> Self {
        Self {
            sink,
            offset,
            count,
            position: 0,
        }
    }

    /// Writes as much of `p` as fits in the remaining window
    ///
    /// Returns [`TransferError::EndOfSection`] once the window is full and
    /// [`TransferError::ShortWrite`] if `p` did not fit or the sink accepted
    /// fewer bytes than offered. The bytes that were written are still counted.
    pub fn write(&mut self, p: &[u8]) -> Result<usize> {
        let remaining = self.count.saturating_sub(self.position);
        if remaining == 0 {
            return Err(TransferError::EndOfSection);
        }

        let slice = if (p.len() as u64) > remaining {
            &p[..remaining as usize]
        } else {
            p
        };
        let n = self.sink.write_at(slice, self.offset + self.position)?;
        self.position += n as u64;

        if n < p.len() {
            return Err(TransferError::ShortWrite {
                written: n,
                expected: p.len(),
            });
        }
        Ok(n)
    }

    /// Returns the number of bytes written so far
    pub fn position(&self) -> u64 {
        self.position
    }

    /// Returns the number of bytes still accepted
    pub fn remaining(&self) -> u64 {
        self.count.saturating_sub(self.position)
    }
}

/// Reads until `buf` is full or the reader reaches end-of-stream
///
/// Returns the number of bytes read; a value below `buf.len()` means the stream
/// ended.
pub async fn read_full<R>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]).await {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}
