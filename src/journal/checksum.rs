//! CRC32 checksum for record tails
//!
//! The tail checksum covers every byte from the record header magic up to
//! (not including) the tail itself. Padding is not covered.

use crc32fast::Hasher;

/// Computes a CRC32 (IEEE) checksum over `data`.
pub fn compute_checksum(data: &[u8]) -> u32 {
    let mut hasher = Hasher::new();
    hasher.update(data);
    hasher.finalize()
}

/// Returns true when `data` hashes to `expected`.
pub fn verify_checksum(data: &[u8], expected: u32) -> bool {
    compute_checksum(data) == expected
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_checksum_deterministic() {
        let data = b"enqueue body";
        assert_eq!(compute_checksum(data), compute_checksum(data));
    }

    #[test]
    fn test_checksum_detects_single_bit_flip() {
        let mut data = vec![0x51, 0x4c, 0x53, 0x65, 0x02, 0x00];
        let original = compute_checksum(&data);
        data[3] ^= 0x01;
        assert_ne!(original, compute_checksum(&data));
    }

    #[test]
    fn test_verify_checksum() {
        let data = b"commit xid";
        let sum = compute_checksum(data);
        assert!(verify_checksum(data, sum));
        assert!(!verify_checksum(data, sum ^ 1));
    }
}
