//! # Positional Fragmentation
//!
//! Splits a blob length into `count` contiguous ranges. Every range has
//! `len / count` bytes except the last, which absorbs the remainder.

use sha3::{Digest, Keccak256};
use std::ops::Range;

use crate::domain::{Hash, PartitionError, MIN_FRAGMENT_COUNT};

/// Compute the byte ranges of each fragment.
///
/// Fails with `InvalidFragmentCount` when `count` is zero or the
/// per-fragment size would be zero.
pub fn fragment_ranges(len: usize, count: usize) -> Result<Vec<Range<usize>>, PartitionError> {
    if count < MIN_FRAGMENT_COUNT || len / count == 0 {
        return Err(PartitionError::InvalidFragmentCount { count, len });
    }

    let size = len / count;
    let ranges = (0..count)
        .map(|i| {
            let start = i * size;
            let end = if i + 1 == count { len } else { start + size };
            start..end
        })
        .collect();

    Ok(ranges)
}

/// Keccak-256 digest of a fragment payload.
pub fn payload_digest(payload: &[u8]) -> Hash {
    let mut hasher = Keccak256::new();
    hasher.update(payload);
    let result = hasher.finalize();

    let mut digest = [0u8; 32];
    digest.copy_from_slice(&result);
    digest
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sizes(ranges: &[Range<usize>]) -> Vec<usize> {
        ranges.iter().map(|r| r.len()).collect()
    }

    #[test]
    fn test_ten_bytes_three_fragments() {
        let ranges = fragment_ranges(10, 3).unwrap();
        assert_eq!(sizes(&ranges), vec![3, 3, 4]);
        assert_eq!(ranges[2], 6..10);
    }

    #[test]
    fn test_even_split() {
        let ranges = fragment_ranges(8, 4).unwrap();
        assert_eq!(sizes(&ranges), vec![2, 2, 2, 2]);
    }

    #[test]
    fn test_single_fragment_covers_all() {
        let ranges = fragment_ranges(5, 1).unwrap();
        assert_eq!(ranges, vec![0..5]);
    }

    #[test]
    fn test_zero_count_rejected() {
        assert!(matches!(
            fragment_ranges(10, 0),
            Err(PartitionError::InvalidFragmentCount { count: 0, len: 10 })
        ));
    }

    #[test]
    fn test_zero_size_rejected() {
        assert!(fragment_ranges(2, 3).is_err());
        assert!(fragment_ranges(0, 1).is_err());
    }

    #[test]
    fn test_ranges_are_contiguous() {
        let ranges = fragment_ranges(101, 7).unwrap();
        for pair in ranges.windows(2) {
            assert_eq!(pair[0].end, pair[1].start);
        }
        assert_eq!(ranges.last().map(|r| r.end), Some(101));
    }

    #[test]
    fn test_digest_differs_per_payload() {
        assert_ne!(payload_digest(b"a"), payload_digest(b"b"));
        assert_eq!(payload_digest(b"a"), payload_digest(b"a"));
    }
}
