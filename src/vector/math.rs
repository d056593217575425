use ndarray::ArrayView1;

use crate::core::errors::{EngineError, Result};

/// Dot product of two equal-length vectors.
pub fn dot(a: &[f32], b: &[f32]) -> Result<f32> {
    check_dims(a, b)?;
    Ok(ArrayView1::from(a).dot(&ArrayView1::from(b)))
}

/// Euclidean norm.
pub fn l2_norm(v: &[f32]) -> f32 {
    ArrayView1::from(v).dot(&ArrayView1::from(v)).sqrt()
}

/// Cosine similarity in [-1, 1]. Zero vectors score 0.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> Result<f32> {
    let dot = dot(a, b)?;
    let denom = l2_norm(a) * l2_norm(b);

    if denom <= f32::EPSILON {
        Ok(0.0)
    } else {
        Ok((dot / denom).clamp(-1.0, 1.0))
    }
}

fn check_dims(a: &[f32], b: &[f32]) -> Result<()> {
    if a.is_empty() || b.is_empty() {
        return Err(EngineError::Validation(
            "vectors must not be empty".to_string(),
        ));
    }
    if a.len() != b.len() {
        return Err(EngineError::Validation(format!(
            "vector dimension mismatch: {} != {}",
            a.len(),
            b.len()
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx_eq(left: f32, right: f32) -> bool {
        (left - right).abs() < 1e-5
    }

    #[test]
    fn cosine_is_one_for_identical_vectors() {
        let vec = vec![1.0, 2.0, 3.0, 4.0];
        let score = cosine_similarity(&vec, &vec).expect("cosine should work");
        assert!(approx_eq(score, 1.0));
    }

    #[test]
    fn cosine_is_zero_for_orthogonal_vectors() {
        let score = cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).expect("cosine should work");
        assert!(approx_eq(score, 0.0));
    }

    #[test]
    fn mismatched_dimensions_are_a_validation_error() {
        let err = cosine_similarity(&[1.0, 0.0], &[1.0]).unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)));
    }

    #[test]
    fn zero_vector_scores_zero() {
        let score = cosine_similarity(&[0.0, 0.0], &[1.0, 1.0]).unwrap();
        assert!(approx_eq(score, 0.0));
    }
}
