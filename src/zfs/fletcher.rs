//! Fletcher-4 checksum, ZFS's default block checksum algorithm.
//!
//! Operates over 32-bit little-endian words and accumulates four running
//! sums (a, b, c, d), each depending on the ones before it, giving stronger
//! error detection than a single running sum at roughly the same cost.

use byteorder::{ByteOrder, LittleEndian};

/// The four accumulators that make up a Fletcher-4 checksum.
pub type Fletcher4 = [u64; 4];

/// Computes the Fletcher-4 checksum of `data`.
///
/// `data.len()` must be a multiple of 4 (ZFS always checksums whole blocks,
/// which are always a multiple of the sector size).
pub fn fletcher4(data: &[u8]) -> Fletcher4 {
    let mut a: u64 = 0;
    let mut b: u64 = 0;
    let mut c: u64 = 0;
    let mut d: u64 = 0;

    for chunk in data.chunks_exact(4) {
        let value = LittleEndian::read_u32(chunk) as u64;
        a = a.wrapping_add(value);
        b = b.wrapping_add(a);
        c = c.wrapping_add(b);
        d = d.wrapping_add(c);
    }

    [a, b, c, d]
}

/// Verifies `data` against an expected checksum, tolerating the trailing
/// bytes (if any) that don't fill a complete 32-bit word.
pub fn verify(data: &[u8], expected: Fletcher4) -> bool {
    fletcher4(data) == expected
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fletcher4_zero_block() {
        let data = vec![0u8; 64];
        assert_eq!(fletcher4(&data), [0, 0, 0, 0]);
    }

    #[test]
    fn test_fletcher4_single_word() {
        let mut data = vec![0u8; 4];
        LittleEndian::write_u32(&mut data, 1);
        assert_eq!(fletcher4(&data), [1, 1, 1, 1]);
    }

    #[test]
    fn test_fletcher4_accumulates() {
        let mut data = vec![0u8; 8];
        LittleEndian::write_u32(&mut data[0..4], 1);
        LittleEndian::write_u32(&mut data[4..8], 2);
        // a = 1, 3
        // b = 1, 4
        // c = 1, 5
        // d = 1, 6
        assert_eq!(fletcher4(&data), [3, 4, 5, 6]);
    }

    #[test]
    fn test_verify() {
        let data = vec![0u8; 16];
        let sum = fletcher4(&data);
        assert!(verify(&data, sum));
        assert!(!verify(&data, [1, 2, 3, 4]));
    }
}
