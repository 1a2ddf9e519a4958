use std::collections::{BTreeMap, BTreeSet};

use rand::rngs::StdRng;
use rand::SeedableRng;

use digest_common::{QualityGateConfig, QualityMetrics, NOISE};

use crate::vector::euclidean;

fn clustered_points<'a>(space: &'a [Vec<f32>], labels: &[i32]) -> Vec<(&'a Vec<f32>, i32)> {
    space
        .iter()
        .zip(labels)
        .filter(|(_, &l)| l != NOISE)
        .map(|(v, &l)| (v, l))
        .collect()
}

/// Mean silhouette over non-noise points (Euclidean). `None` with fewer than
/// two clusters, as many clusters as points, or when every distance is zero.
pub fn silhouette(space: &[Vec<f32>], labels: &[i32]) -> Option<f64> {
    score(&clustered_points(space, labels))
}

/// Silhouette over a seeded sample of `sample_size` clustered points. A size
/// of 0, or one covering every clustered point, scores them all.
pub fn sampled_silhouette(
    space: &[Vec<f32>],
    labels: &[i32],
    sample_size: usize,
    seed: u64,
) -> Option<f64> {
    let points = clustered_points(space, labels);
    if sample_size == 0 || points.len() <= sample_size {
        return score(&points);
    }

    let mut rng = StdRng::seed_from_u64(seed);
    let mut picked = rand::seq::index::sample(&mut rng, points.len(), sample_size).into_vec();
    picked.sort_unstable();
    let sample: Vec<(&Vec<f32>, i32)> = picked.into_iter().map(|i| points[i]).collect();
    score(&sample)
}

fn score(points: &[(&Vec<f32>, i32)]) -> Option<f64> {
    let distinct: BTreeSet<i32> = points.iter().map(|(_, l)| *l).collect();
    if points.len() < 2 || distinct.len() < 2 || distinct.len() >= points.len() {
        return None;
    }

    let mut sizes: BTreeMap<i32, usize> = BTreeMap::new();
    for (_, l) in points {
        *sizes.entry(*l).or_insert(0) += 1;
    }

    let mut any_distance = false;
    let mut total = 0.0f64;
    for (i, (vi, li)) in points.iter().enumerate() {
        let mut sums: BTreeMap<i32, f64> = BTreeMap::new();
        for (j, (vj, lj)) in points.iter().enumerate() {
            if i == j {
                continue;
            }
            let d = euclidean(vi, vj);
            if d > 0.0 {
                any_distance = true;
            }
            *sums.entry(*lj).or_insert(0.0) += d;
        }

        let own_size = sizes[li];
        if own_size < 2 {
            continue;
        }
        let a = sums.get(li).copied().unwrap_or(0.0) / (own_size - 1) as f64;
        let b = sums
            .iter()
            .filter(|(l, _)| *l != li)
            .map(|(l, s)| s / sizes[l] as f64)
            .fold(f64::INFINITY, f64::min);
        let denom = a.max(b);
        if denom > 0.0 {
            total += (b - a) / denom;
        }
    }

    if !any_distance {
        return None;
    }
    Some(total / points.len() as f64)
}

/// Advisory pass/fail over validity, silhouette and noise share.
pub fn quality_pass(
    relative_validity: Option<f64>,
    silhouette: Option<f64>,
    noise_fraction: f64,
    gate: &QualityGateConfig,
) -> bool {
    let validity_ok = relative_validity.is_none_or(|v| v > gate.min_relative_validity);
    let silhouette_ok = silhouette.is_none_or(|s| s > gate.min_silhouette);
    let noise_ok = noise_fraction < gate.max_noise_fraction;
    validity_ok && silhouette_ok && noise_ok
}

pub fn evaluate(
    space: Option<&[Vec<f32>]>,
    labels: &[i32],
    relative_validity: Option<f64>,
    gate: &QualityGateConfig,
) -> QualityMetrics {
    let noise_count = labels.iter().filter(|&&l| l == NOISE).count();
    let cluster_count = labels
        .iter()
        .filter(|&&l| l != NOISE)
        .collect::<BTreeSet<_>>()
        .len();
    let noise_fraction = if labels.is_empty() {
        0.0
    } else {
        noise_count as f64 / labels.len() as f64
    };
    let silhouette = space.and_then(|s| {
        sampled_silhouette(s, labels, gate.silhouette_sample_size, gate.silhouette_seed)
    });

    QualityMetrics {
        relative_validity,
        silhouette,
        noise_fraction,
        noise_count,
        cluster_count,
        quality_pass: quality_pass(relative_validity, silhouette, noise_fraction, gate),
    }
}
