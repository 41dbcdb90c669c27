//! Contract between the generation engine and an inference backend.

use crate::error::{Error, Result};
use async_trait::async_trait;
use ndarray::{s, Array2, Array3};
use std::sync::Arc;

/// A model that maps a batch of one id sequence to per-position logits.
///
/// Implementations must accept any context length from 1 up to the
/// vocabulary's `block_size`. Calls from concurrent generation runs may
/// overlap, so the backend serializes internally if it needs to.
#[async_trait]
pub trait InferenceBackend: Send + Sync {
    /// Number of logits produced per position.
    fn vocab_size(&self) -> usize;

    /// Run the model on `ids` of shape `[1, context_length]` and return
    /// logits of shape `[1, context_length, vocab_size]`.
    async fn infer(&self, ids: Array2<i64>) -> Result<Array3<f32>>;
}

#[async_trait]
impl<B: InferenceBackend + ?Sized> InferenceBackend for Arc<B> {
    fn vocab_size(&self) -> usize {
        (**self).vocab_size()
    }

    async fn infer(&self, ids: Array2<i64>) -> Result<Array3<f32>> {
        (**self).infer(ids).await
    }
}

/// Pack a context window into the `[1, context_length]` input tensor.
pub fn input_tensor(context: &[usize]) -> Array2<i64> {
    Array2::from_shape_fn((1, context.len()), |(_, i)| context[i] as i64)
}

/// Copy the final position's logits out of a backend result.
///
/// The output must have shape `[1, context_length, vocab_size]`; a transposed
/// or flattened result with the right element count is still a mismatch.
pub fn last_position(logits: &Array3<f32>, context_length: usize, vocab_size: usize) -> Result<Vec<f32>> {
    let expected = [1, context_length, vocab_size];
    if context_length == 0 || vocab_size == 0 || logits.shape() != &expected[..] {
        return Err(Error::Backend(format!(
            "expected logits of shape {:?}, got {:?}",
            expected,
            logits.shape()
        )));
    }
    Ok(logits.slice(s![0, context_length - 1, ..]).to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_input_tensor_shape() {
        let t = input_tensor(&[4, 5, 6]);
        assert_eq!(t.shape(), &[1, 3]);
        assert_eq!(t[[0, 2]], 6);
    }

    #[test]
    fn test_last_position_slice() {
        // Position p, symbol s holds 10 * p + s.
        let logits = Array3::from_shape_fn((1, 3, 4), |(_, p, s)| (10 * p + s) as f32);
        assert_eq!(last_position(&logits, 3, 4).unwrap(), vec![20.0, 21.0, 22.0, 23.0]);
    }

    #[test]
    fn test_last_position_shape_mismatch() {
        let logits = Array3::<f32>::zeros((1, 2, 4));
        assert!(matches!(last_position(&logits, 3, 4), Err(Error::Backend(_))));
        assert!(matches!(last_position(&logits, 2, 5), Err(Error::Backend(_))));
    }

    #[test]
    fn test_last_position_rejects_same_count_wrong_layout() {
        let transposed = Array3::<f32>::zeros((3, 1, 4));
        assert!(matches!(last_position(&transposed, 3, 4), Err(Error::Backend(_))));
        let flattened = Array3::<f32>::zeros((1, 1, 12));
        assert!(matches!(last_position(&flattened, 3, 4), Err(Error::Backend(_))));
        let swapped = Array3::<f32>::zeros((1, 4, 3));
        assert!(matches!(last_position(&swapped, 3, 4), Err(Error::Backend(_))));
    }
}
