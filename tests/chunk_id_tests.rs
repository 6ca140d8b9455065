//! Tests for chunk identifier encoding
//!
//! These tests verify the byte layout of chunk identifiers and the behavior of
//! the generator that issues them.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use blob_transfer::{
    decode_chunk_id, decode_sequence, encode_chunk_id, ChunkIdGenerator, TransferError,
    CHUNK_ID_RUN_LEN, CHUNK_ID_SEQ_LEN,
};

/// Test suite for the identifier layout
#[cfg(test)]
mod layout_tests {
    use super::*;

    /// Test that the raw identifier is the run ID followed by a big-endian sequence
    #[test]
    fn test_raw_layout() {
        // Arrange
        let run_id = [0xAB; CHUNK_ID_RUN_LEN];

        // Act
        let id = encode_chunk_id(&run_id, 0x0102_0304);
        let raw = STANDARD.decode(&id).unwrap();

        // Assert
        assert_eq!(raw.len(), CHUNK_ID_RUN_LEN + CHUNK_ID_SEQ_LEN);
        assert_eq!(&raw[..CHUNK_ID_RUN_LEN], &run_id[..]);
        assert_eq!(&raw[CHUNK_ID_RUN_LEN..], &[1, 2, 3, 4]);
    }

    /// Test a known encoding
    ///
    /// Twenty zero bytes encode to twenty-seven `A`s and one padding character.
    #[test]
    fn test_known_encoding() {
        let id = encode_chunk_id(&[0; CHUNK_ID_RUN_LEN], 0);
        assert_eq!(id, format!("{}=", "A".repeat(27)));
    }

    /// Test decoding an identifier back into its parts
    #[test]
    fn test_decode_round_trip() {
        let run_id = *b"0123456789abcdef";
        let id = encode_chunk_id(&run_id, 77);

        let (decoded_run, seq) = decode_chunk_id(&id).unwrap();

        assert_eq!(decoded_run, run_id);
        assert_eq!(seq, 77);
        assert_eq!(decode_sequence(&id).unwrap(), 77);
    }

    /// Test that malformed identifiers are rejected
    #[test]
    fn test_decode_rejects_malformed_ids() {
        assert!(matches!(
            decode_chunk_id("not base64!"),
            Err(TransferError::InvalidChunkId(_))
        ));
        let short = STANDARD.encode([0u8; 8]);
        assert!(matches!(
            decode_chunk_id(&short),
            Err(TransferError::InvalidChunkId(_))
        ));
    }
}

/// Test suite for the generator
#[cfg(test)]
mod generator_tests {
    use super::*;

    /// Test that the generator issues increasing sequences under one run ID
    #[test]
    fn test_generator_issues_in_order() {
        // Arrange
        let ids = ChunkIdGenerator::with_run_id([7; CHUNK_ID_RUN_LEN]);

        // Act
        let issued: Vec<String> = (0..5).map(|_| ids.try_next().unwrap()).collect();

        // Assert
        assert_eq!(ids.issued(), issued);
        for (i, id) in issued.iter().enumerate() {
            let (run, seq) = decode_chunk_id(id).unwrap();
            assert_eq!(run, [7; CHUNK_ID_RUN_LEN]);
            assert_eq!(seq, i as u32);
        }
    }

    /// Test that generators draw distinct run IDs
    #[test]
    fn test_generators_have_distinct_run_ids() {
        let a = ChunkIdGenerator::try_new().unwrap();
        let b = ChunkIdGenerator::try_new().unwrap();
        assert_ne!(a.run_id(), b.run_id());
        assert_ne!(a.try_next().unwrap(), b.try_next().unwrap());
    }

    /// Test that a fresh generator has issued nothing
    #[test]
    fn test_fresh_generator_is_empty() {
        let ids = ChunkIdGenerator::try_new().unwrap();
        assert!(ids.is_empty());
        assert_eq!(ids.len(), 0);
        assert!(ids.issued().is_empty());
    }
}
