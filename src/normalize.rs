//! Mapping iteration counts to 8-bit intensities.

use log::trace;
use rayon::prelude::{IntoParallelRefIterator, ParallelIterator};

/// `round(255 * iterations / max_iterations)`, clamped to `0..=255`.
///
/// Samples that never escape (`iterations == max_iterations`) come out brightest.
pub fn normalize(iterations: u32, max_iterations: u32) -> u8 {
    debug_assert!(max_iterations > 0);
    let max_iterations = u64::from(max_iterations.max(1));
    let scaled = (255 * u64::from(iterations) + max_iterations / 2) / max_iterations;
    scaled.min(255) as u8
}

pub fn normalize_field(iterations: &[u32], max_iterations: u32) -> Vec<u8> {
    trace!("normalizing {} samples", iterations.len());
    iterations
        .par_iter()
        .map(|&count| normalize(count, max_iterations))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoints() {
        assert_eq!(normalize(0, 128), 0);
        assert_eq!(normalize(128, 128), 255);
        assert_eq!(normalize(1, 1), 255);
    }

    #[test]
    fn rounds_to_nearest() {
        // 255 * 64 / 128 = 127.5
        assert_eq!(normalize(64, 128), 128);
        // 255 * 1 / 128 = 1.99
        assert_eq!(normalize(1, 128), 2);
        // 255 * 1 / 3 = 85
        assert_eq!(normalize(1, 3), 85);
    }

    #[test]
    fn monotonic() {
        let values: Vec<u8> = (0..=128).map(|count| normalize(count, 128)).collect();
        assert!(values.windows(2).all(|pair| pair[0] <= pair[1]));
    }

    #[test]
    fn clamps_out_of_range_counts() {
        assert_eq!(normalize(1000, 128), 255);
    }

    #[test]
    fn field_is_index_aligned() {
        assert_eq!(normalize_field(&[0, 128, 64, 4], 128), vec![0, 255, 128, 8]);
    }
}
