use digest_common::DigestError;

use crate::vector::normalize_in_place;

/// `normalize(concat(dense, lambda * sparse))` for each row.
pub fn fuse(
    dense: &[Vec<f32>],
    sparse: &[Vec<f32>],
    lambda_weight: f32,
) -> Result<Vec<Vec<f32>>, DigestError> {
    if dense.len() != sparse.len() {
        return Err(DigestError::DimensionMismatch {
            stage: "hybrid fusion (row count)",
            expected: dense.len(),
            found: sparse.len(),
        });
    }
    if lambda_weight < 0.0 || !lambda_weight.is_finite() {
        return Err(DigestError::Config(format!(
            "lambda_weight must be a non-negative number, got {lambda_weight}"
        )));
    }

    Ok(dense
        .iter()
        .zip(sparse)
        .map(|(d, s)| {
            let mut row = Vec::with_capacity(d.len() + s.len());
            row.extend_from_slice(d);
            row.extend(s.iter().map(|x| x * lambda_weight));
            normalize_in_place(&mut row);
            row
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vector::l2_norm;

    fn rows() -> (Vec<Vec<f32>>, Vec<Vec<f32>>) {
        let dense = vec![vec![0.6, 0.8, 0.0], vec![0.0, 0.0, 1.0]];
        let sparse = vec![vec![1.0, 0.0], vec![0.0, 0.0]];
        (dense, sparse)
    }

    #[test]
    fn hybrid_dimension_is_sum_and_norm_is_one() {
        let (dense, sparse) = rows();
        for lambda in [0.0, 0.35, 1.0, 5.0] {
            let fused = fuse(&dense, &sparse, lambda).unwrap();
            for row in &fused {
                assert_eq!(row.len(), 5);
                assert!((l2_norm(row) - 1.0).abs() < 1e-6, "lambda {lambda}");
            }
        }
    }

    #[test]
    fn zero_lambda_keeps_dense_geometry() {
        let (dense, sparse) = rows();
        let fused = fuse(&dense, &sparse, 0.0).unwrap();
        let expected = [0.6, 0.8, 0.0, 0.0, 0.0];
        for (got, want) in fused[0].iter().zip(expected) {
            assert!((got - want).abs() < 1e-6);
        }
    }

    #[test]
    fn sparse_weight_is_applied_before_normalization() {
        let fused = fuse(&[vec![1.0]], &[vec![1.0]], 0.35).unwrap();
        let norm = (1.0f32 + 0.35 * 0.35).sqrt();
        assert!((fused[0][0] - 1.0 / norm).abs() < 1e-6);
        assert!((fused[0][1] - 0.35 / norm).abs() < 1e-6);
    }

    #[test]
    fn mismatched_rows_and_negative_lambda_are_errors() {
        let (dense, _) = rows();
        assert!(matches!(
            fuse(&dense, &[vec![1.0]], 0.35),
            Err(DigestError::DimensionMismatch { .. })
        ));
        let (dense, sparse) = rows();
        assert!(matches!(fuse(&dense, &sparse, -0.1), Err(DigestError::Config(_))));
    }
}
