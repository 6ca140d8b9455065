//! Chunk Identifier Generation
//!
//! Every block staged during one upload gets an identifier made of a random
//! 16-byte run ID followed by a 4-byte big-endian sequence number, base64-encoded.
//! All identifiers of one upload therefore have the same length, are unique, and
//! sort by issuance order once decoded.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Mutex, PoisonError};

use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use base64::Engine;
use bytes::{Buf, BufMut, BytesMut};
use rand::rngs::OsRng;
use rand::RngCore;
use uuid::Builder;

use crate::errors::{Result, TransferError};
use crate::types::{CHUNK_ID_RUN_LEN, CHUNK_ID_SEQ_LEN};

/// Issues ordered, unique block identifiers for a single upload
#[derive(Debug)]
pub struct ChunkIdGenerator {
    run_id: [u8; CHUNK_ID_RUN_LEN],
    sequence: AtomicU32,
    issued: Mutex<Vec<String>>,
}

impl ChunkIdGenerator {
    /// Creates a generator with a random run ID
    ///
    /// Fails if the operating system cannot supply random bytes.
    pub fn try_new() -> Result<Self> {
        Self::from_random_source(|bytes| OsRng.try_fill_bytes(bytes))
    }

    /// Creates a generator whose run ID is a version 4 UUID built from `fill`
    fn from_random_source<F>(fill: F) -> Result<Self>
    where
        F: FnOnce(&mut [u8]) -> std::result::Result<(), rand::Error>,
    {
        let mut bytes = [0u8; CHUNK_ID_RUN_LEN];
        fill(&mut bytes[..]).map_err(|e| TransferError::Randomness(e.to_string()))?;
        let run_id = Builder::from_random_bytes(bytes).into_uuid();
        Ok(Self::with_run_id(*run_id.as_bytes()))
    }

    /// Creates a generator with an explicit run ID
    pub fn with_run_id(run_id: [u8; CHUNK_ID_RUN_LEN]) -> Self {
        Self {
            run_id,
            sequence: AtomicU32::new(0),
            issued: Mutex::new(Vec::new()),
        }
    }

    /// Returns the run ID shared by every identifier of this generator
    pub fn run_id(&self) -> [u8; CHUNK_ID_RUN_LEN] {
        self.run_id
    }

    /// Issues the next identifier
    ///
    /// Fails once the 32-bit sequence space is exhausted.
    pub fn try_next(&self) -> Result<String> {
        // The issued list is locked while the sequence number is taken so that
        // list order always equals sequence order.
        let mut issued = self.issued.lock().unwrap_or_else(PoisonError::into_inner);
        let seq = self
            .sequence
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_add(1))
            .map_err(|_| {
                TransferError::InvalidArgument("chunk ID sequence exhausted".to_string())
            })?;
        let id = encode_chunk_id(&self.run_id, seq);
        issued.push(id.clone());
        Ok(id)
    }

    /// Returns every identifier issued so far, in issuance order
    pub fn issued(&self) -> Vec<String> {
        self.issued
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Returns the number of identifiers issued so far
    pub fn len(&self) -> usize {
        self.issued.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Returns true if no identifier has been issued
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Encodes a run ID and sequence number into a chunk identifier
///
/// The raw layout is:
///   - Bytes 0-15: run ID
///   - Bytes 16-19: sequence number (big-endian u32)
pub fn encode_chunk_id(run_id: &[u8; CHUNK_ID_RUN_LEN], seq: u32) -> String {
    let mut buf = BytesMut::with_capacity(CHUNK_ID_RUN_LEN + CHUNK_ID_SEQ_LEN);
    buf.put_slice(run_id);
    buf.put_u32(seq);
    BASE64_STANDARD.encode(&buf)
}

/// Decodes a chunk identifier into its run ID and sequence number
pub fn decode_chunk_id(id: &str) -> Result<([u8; CHUNK_ID_RUN_LEN], u32)> {
    let raw = BASE64_STANDARD
        .decode(id)
        .map_err(|e| TransferError::InvalidChunkId(format!("{id}: {e}")))?;
    if raw.len() != CHUNK_ID_RUN_LEN + CHUNK_ID_SEQ_LEN {
        return Err(TransferError::InvalidChunkId(format!(
            "{id}: expected {} bytes, got {}",
            CHUNK_ID_RUN_LEN + CHUNK_ID_SEQ_LEN,
            raw.len()
        )));
    }

    let mut run_id = [0u8; CHUNK_ID_RUN_LEN];
    run_id.copy_from_slice(&raw[..CHUNK_ID_RUN_LEN]);
    let mut tail = &raw[CHUNK_ID_RUN_LEN..];
    Ok((run_id, tail.get_u32()))
}

/// Decodes only the sequence number of a chunk identifier
pub fn decode_sequence(id: &str) -> Result<u32> {
    decode_chunk_id(id).map(|(_, seq)| seq)
}
