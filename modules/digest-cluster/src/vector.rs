//! Small dense-vector helpers shared by every stage.

pub fn l2_norm(v: &[f32]) -> f32 {
    v.iter().map(|x| x * x).sum::<f32>().sqrt()
}

/// Scale to unit length in place. Zero vectors stay zero.
pub fn normalize_in_place(v: &mut [f32]) {
    let norm = l2_norm(v);
    if norm > 0.0 {
        for x in v.iter_mut() {
            *x /= norm;
        }
    }
}

pub fn normalized(mut v: Vec<f32>) -> Vec<f32> {
    normalize_in_place(&mut v);
    v
}

/// Cosine similarity; 0 when either side has zero norm.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a = l2_norm(a);
    let norm_b = l2_norm(b);
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

/// Euclidean distance, accumulated in f64.
pub fn euclidean(a: &[f32], b: &[f32]) -> f64 {
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| {
            let d = (*x as f64) - (*y as f64);
            d * d
        })
        .sum::<f64>()
        .sqrt()
}

/// Component-wise mean of the selected rows.
pub fn mean_of<'a>(rows: impl IntoIterator<Item = &'a Vec<f32>>, dim: usize) -> Vec<f32> {
    let mut sum = vec![0.0f64; dim];
    let mut count = 0usize;
    for row in rows {
        for (s, x) in sum.iter_mut().zip(row.iter()) {
            *s += *x as f64;
        }
        count += 1;
    }
    if count == 0 {
        return vec![0.0; dim];
    }
    sum.into_iter().map(|s| (s / count as f64) as f32).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_gives_unit_length() {
        let v = normalized(vec![3.0, 4.0]);
        assert!((l2_norm(&v) - 1.0).abs() < 1e-6);
        assert!((v[0] - 0.6).abs() < 1e-6);
    }

    #[test]
    fn zero_vector_stays_zero() {
        let v = normalized(vec![0.0, 0.0, 0.0]);
        assert_eq!(v, vec![0.0, 0.0, 0.0]);
        assert_eq!(cosine_similarity(&v, &[1.0, 0.0, 0.0]), 0.0);
    }

    #[test]
    fn cosine_of_identical_and_orthogonal() {
        assert!((cosine_similarity(&[1.0, 2.0], &[2.0, 4.0]) - 1.0).abs() < 1e-6);
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-6);
    }

    #[test]
    fn mean_of_rows() {
        let rows = vec![vec![1.0, 3.0], vec![3.0, 5.0]];
        assert_eq!(mean_of(rows.iter(), 2), vec![2.0, 4.0]);
        assert_eq!(mean_of(std::iter::empty(), 2), vec![0.0, 0.0]);
    }
}
