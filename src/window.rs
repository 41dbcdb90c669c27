//! Sliding context window over the generated sequence.

/// Trailing at most `block_size` elements of `sequence`.
///
/// The result is a borrowed suffix, so the sequence order is preserved and
/// nothing is copied. A non-empty input always yields a non-empty window as
/// long as `block_size` is positive.
pub fn window(sequence: &[usize], block_size: usize) -> &[usize] {
    &sequence[sequence.len().saturating_sub(block_size)..]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shorter_than_block() {
        let seq = [1, 2, 3];
        assert_eq!(window(&seq, 8), &[1, 2, 3]);
    }

    #[test]
    fn test_keeps_the_tail() {
        let seq: Vec<usize> = (0..10).collect();
        let w = window(&seq, 4);
        assert_eq!(w, &[6, 7, 8, 9]);
        assert!(seq.ends_with(w));
    }

    #[test]
    fn test_length_is_min_of_both() {
        let seq: Vec<usize> = (0..7).collect();
        for block in 1..12 {
            assert_eq!(window(&seq, block).len(), seq.len().min(block));
        }
        assert!(window(&[], 4).is_empty());
    }
}
