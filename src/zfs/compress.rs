//! ZFS block compression.
//!
//! Of the many on-disk compression algorithms ZFS has shipped, a read-only
//! examiner over blocks actually encountered while walking metadata only
//! needs LZ4: the framing matches `ZFS_POOL.cpp::readData(Blkptr*, ...)`
//! exactly — a 4-byte big-endian length prefix naming the size of the
//! compressed payload that follows, then the payload itself, decompressed
//! into an `lsize`-byte buffer.

use super::{Result, ZfsError};
use byteorder::{BigEndian, ByteOrder};

/// Decompresses one LZ4-framed ZFS block into a buffer of exactly
/// `lsize` bytes.
pub fn decompress_lz4(compressed: &[u8], lsize: usize) -> Result<Vec<u8>> {
    if compressed.len() < 4 {
        return Err(ZfsError::DecompressionError(
            "LZ4 block too small for length prefix".to_string(),
        ));
    }

    let payload_len = BigEndian::read_u32(&compressed[0..4]) as usize;
    let end = 4 + payload_len;
    if end > compressed.len() {
        return Err(ZfsError::DecompressionError(format!(
            "LZ4 payload length {} exceeds buffer of {} bytes",
            payload_len,
            compressed.len()
        )));
    }

    let payload = &compressed[4..end];
    let decompressed = lz4::block::decompress(payload, Some(lsize as i32))
        .map_err(|e| ZfsError::DecompressionError(format!("lz4: {}", e)))?;

    if decompressed.len() != lsize {
        return Err(ZfsError::DecompressionError(format!(
            "decompressed {} bytes, expected {}",
            decompressed.len(),
            lsize
        )));
    }

    Ok(decompressed)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(payload: &[u8]) -> Vec<u8> {
        let mut out = Vec::with_capacity(4 + payload.len());
        let mut len_be = [0u8; 4];
        BigEndian::write_u32(&mut len_be, payload.len() as u32);
        out.extend_from_slice(&len_be);
        out.extend_from_slice(payload);
        out
    }

    #[test]
    fn test_roundtrip() {
        let data = b"uberblock root blkptr payload, repeated repeated repeated".to_vec();
        let compressed = lz4::block::compress(&data, None, false).unwrap();
        let framed = frame(&compressed);
        let out = decompress_lz4(&framed, data.len()).unwrap();
        assert_eq!(out, data);
    }

    #[test]
    fn test_too_small() {
        assert!(decompress_lz4(&[1, 2, 3], 10).is_err());
    }

    #[test]
    fn test_truncated_payload() {
        let mut framed = vec![0u8, 0, 0, 100];
        framed.extend_from_slice(&[1, 2, 3]);
        assert!(decompress_lz4(&framed, 100).is_err());
    }

    #[test]
    fn test_size_mismatch_rejected() {
        let data = vec![7u8; 64];
        let compressed = lz4::block::compress(&data, None, false).unwrap();
        let framed = frame(&compressed);
        assert!(decompress_lz4(&framed, 128).is_err());
    }
}
