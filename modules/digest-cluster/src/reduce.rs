//! Manifold reduction in the style of UMAP.
//!
//! Builds a fuzzy k-nearest-neighbor graph under cosine distance and lays it
//! out in a low-dimensional Euclidean space with negative-sampling SGD.
//! Density clustering degrades badly in thousands of dimensions; this keeps
//! local neighborhoods while making Euclidean distance meaningful again.

use std::collections::BTreeMap;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::debug;

use digest_common::ReductionConfig;

const SPREAD: f32 = 1.0;
const NEGATIVE_SAMPLE_RATE: usize = 5;
const SMOOTH_KNN_TOLERANCE: f32 = 1e-5;
const SMOOTH_KNN_ITERATIONS: usize = 64;
const MIN_K_DIST_SCALE: f32 = 1e-3;
const GRADIENT_CLIP: f32 = 4.0;
const INIT_RANGE: f32 = 10.0;

#[derive(Debug, Clone)]
pub struct ManifoldReducer {
    pub n_components: usize,
    pub n_neighbors: usize,
    pub min_dist: f32,
    pub n_epochs: usize,
    pub seed: Option<u64>,
}

impl From<&ReductionConfig> for ManifoldReducer {
    fn from(config: &ReductionConfig) -> Self {
        Self {
            n_components: config.n_components,
            n_neighbors: config.n_neighbors,
            min_dist: config.min_dist,
            n_epochs: config.n_epochs,
            seed: config.seed,
        }
    }
}

struct Edge {
    head: usize,
    tail: usize,
    epochs_per_sample: f32,
}

impl ManifoldReducer {
    pub fn is_enabled(&self) -> bool {
        self.n_components > 0
    }

    /// Reduce `data` to `n_components` dimensions. Inputs that are already
    /// small enough, or too few points to build a graph, are returned as is.
    pub fn reduce(&self, data: &[Vec<f32>]) -> Vec<Vec<f32>> {
        let n = data.len();
        let dim = data.first().map_or(0, Vec::len);
        if !self.is_enabled() || n < 3 || dim <= self.n_components {
            return data.to_vec();
        }

        let k = self.n_neighbors.clamp(2, n);
        let (knn_indices, knn_dists) = cosine_knn(data, k - 1);
        let graph = fuzzy_simplicial_set(&knn_indices, &knn_dists, k);
        let (a, b) = fit_ab(SPREAD, self.min_dist);

        debug!(points = n, neighbors = k, edges = graph.len(), a, b, "Manifold graph built");

        let mut rng = match self.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };

        let mut embedding: Vec<Vec<f32>> = (0..n)
            .map(|_| {
                (0..self.n_components)
                    .map(|_| rng.random_range(-INIT_RANGE..INIT_RANGE))
                    .collect()
            })
            .collect();

        let edges = epoch_schedule(&graph, self.n_epochs);
        optimize_layout(&mut embedding, &edges, self.n_epochs, a, b, &mut rng);
        embedding
    }
}

/// Brute-force neighbors under cosine distance, self excluded, nearest first.
fn cosine_knn(data: &[Vec<f32>], k: usize) -> (Vec<Vec<usize>>, Vec<Vec<f32>>) {
    let unit: Vec<Vec<f32>> = data.iter().map(|v| crate::vector::normalized(v.clone())).collect();
    let n = unit.len();

    let mut indices = Vec::with_capacity(n);
    let mut dists = Vec::with_capacity(n);
    for i in 0..n {
        let mut row: Vec<(usize, f32)> = (0..n)
            .filter(|&j| j != i)
            .map(|j| {
                let dot: f32 = unit[i].iter().zip(&unit[j]).map(|(x, y)| x * y).sum();
                (j, (1.0 - dot).max(0.0))
            })
            .collect();
        row.sort_by(|x, y| x.1.total_cmp(&y.1).then(x.0.cmp(&y.0)));
        row.truncate(k);
        indices.push(row.iter().map(|(j, _)| *j).collect());
        dists.push(row.iter().map(|(_, d)| *d).collect());
    }
    (indices, dists)
}

/// Per-point `rho` (nearest positive distance) and `sigma` (bandwidth giving
/// a membership sum of `log2(k)`).
fn smooth_knn_dist(knn_dists: &[Vec<f32>], k: usize) -> (Vec<f32>, Vec<f32>) {
    let target = (k as f32).log2();
    let mean_all: f32 = {
        let (sum, count) = knn_dists
            .iter()
            .flatten()
            .fold((0.0f32, 0usize), |(s, c), d| (s + d, c + 1));
        if count > 0 { sum / count as f32 } else { 0.0 }
    };

    let mut rhos = Vec::with_capacity(knn_dists.len());
    let mut sigmas = Vec::with_capacity(knn_dists.len());
    for dists in knn_dists {
        let rho = dists.iter().copied().find(|&d| d > 0.0).unwrap_or(0.0);

        let (mut lo, mut hi, mut mid) = (0.0f32, f32::INFINITY, 1.0f32);
        for _ in 0..SMOOTH_KNN_ITERATIONS {
            let psum: f32 = dists
                .iter()
                .map(|&d| {
                    let excess = d - rho;
                    if excess > 0.0 { (-excess / mid).exp() } else { 1.0 }
                })
                .sum();
            if (psum - target).abs() < SMOOTH_KNN_TOLERANCE {
                break;
            }
            if psum > target {
                hi = mid;
                mid = (lo + hi) / 2.0;
            } else {
                lo = mid;
                mid = if hi.is_infinite() { mid * 2.0 } else { (lo + hi) / 2.0 };
            }
        }

        let mean_local = if dists.is_empty() {
            0.0
        } else {
            dists.iter().sum::<f32>() / dists.len() as f32
        };
        let floor = MIN_K_DIST_SCALE * if rho > 0.0 { mean_local } else { mean_all };
        rhos.push(rho);
        sigmas.push(mid.max(floor));
    }
    (rhos, sigmas)
}

/// Symmetric fuzzy graph: `w_ij + w_ji - w_ij * w_ji`, both directions kept.
fn fuzzy_simplicial_set(
    knn_indices: &[Vec<usize>],
    knn_dists: &[Vec<f32>],
    k: usize,
) -> BTreeMap<(usize, usize), f32> {
    let (rhos, sigmas) = smooth_knn_dist(knn_dists, k);

    let mut directed: BTreeMap<(usize, usize), f32> = BTreeMap::new();
    for (i, (neighbors, dists)) in knn_indices.iter().zip(knn_dists).enumerate() {
        for (&j, &d) in neighbors.iter().zip(dists) {
            let excess = d - rhos[i];
            let w = if excess <= 0.0 || sigmas[i] == 0.0 {
                1.0
            } else {
                (-excess / sigmas[i]).exp()
            };
            directed.insert((i, j), w);
        }
    }

    let mut graph = BTreeMap::new();
    for (&(i, j), &w_ij) in &directed {
        let w_ji = directed.get(&(j, i)).copied().unwrap_or(0.0);
        let w = w_ij + w_ji - w_ij * w_ji;
        if w > 0.0 {
            graph.insert((i, j), w);
            graph.insert((j, i), w);
        }
    }
    graph
}

/// Drop edges too weak to be sampled and derive each edge's sampling period.
fn epoch_schedule(graph: &BTreeMap<(usize, usize), f32>, n_epochs: usize) -> Vec<Edge> {
    let max_weight = graph.values().copied().fold(0.0f32, f32::max);
    if max_weight <= 0.0 {
        return Vec::new();
    }
    let cutoff = max_weight / n_epochs.max(1) as f32;
    graph
        .iter()
        .filter(|(_, &w)| w >= cutoff)
        .map(|(&(head, tail), &w)| Edge {
            head,
            tail,
            epochs_per_sample: max_weight / w,
        })
        .collect()
}

fn clip(value: f32) -> f32 {
    value.clamp(-GRADIENT_CLIP, GRADIENT_CLIP)
}

fn squared_distance(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| (x - y) * (x - y)).sum()
}

fn optimize_layout(
    embedding: &mut [Vec<f32>],
    edges: &[Edge],
    n_epochs: usize,
    a: f32,
    b: f32,
    rng: &mut StdRng,
) {
    let n = embedding.len();
    let dim = embedding.first().map_or(0, Vec::len);
    let epochs_per_negative: Vec<f32> = edges
        .iter()
        .map(|e| e.epochs_per_sample / NEGATIVE_SAMPLE_RATE as f32)
        .collect();
    let mut next_sample: Vec<f32> = edges.iter().map(|e| e.epochs_per_sample).collect();
    let mut next_negative = epochs_per_negative.clone();
    let mut grad = vec![0.0f32; dim];

    for epoch in 0..n_epochs {
        let alpha = 1.0 - epoch as f32 / n_epochs as f32;
        let epoch_f = epoch as f32;

        for (e, edge) in edges.iter().enumerate() {
            if next_sample[e] > epoch_f {
                continue;
            }
            let (j, k) = (edge.head, edge.tail);

            let dist_sq = squared_distance(&embedding[j], &embedding[k]);
            let coeff = if dist_sq > 0.0 {
                -2.0 * a * b * dist_sq.powf(b - 1.0) / (a * dist_sq.powf(b) + 1.0)
            } else {
                0.0
            };
            for d in 0..dim {
                grad[d] = clip(coeff * (embedding[j][d] - embedding[k][d]));
            }
            for d in 0..dim {
                embedding[j][d] += grad[d] * alpha;
                embedding[k][d] -= grad[d] * alpha;
            }
            next_sample[e] += edge.epochs_per_sample;

            let negatives = ((epoch_f - next_negative[e]) / epochs_per_negative[e]).max(0.0) as usize;
            for _ in 0..negatives {
                let other = rng.random_range(0..n);
                if other == j {
                    continue;
                }
                let dist_sq = squared_distance(&embedding[j], &embedding[other]);
                if dist_sq <= 0.0 {
                    continue;
                }
                let coeff = 2.0 * b / ((0.001 + dist_sq) * (a * dist_sq.powf(b) + 1.0));
                for d in 0..dim {
                    grad[d] = clip(coeff * (embedding[j][d] - embedding[other][d]));
                }
                for d in 0..dim {
                    embedding[j][d] += grad[d] * alpha;
                }
            }
            next_negative[e] += negatives as f32 * epochs_per_negative[e];
        }
    }
}

/// Fit `1 / (1 + a x^(2b))` to the offset-exponential target curve by least
/// squares: coarse grid, then pattern search.
pub fn fit_ab(spread: f32, min_dist: f32) -> (f32, f32) {
    let xs: Vec<f64> = (0..300).map(|i| 3.0 * spread as f64 * i as f64 / 299.0).collect();
    let ys: Vec<f64> = xs
        .iter()
        .map(|&x| {
            if x < min_dist as f64 {
                1.0
            } else {
                (-(x - min_dist as f64) / spread as f64).exp()
            }
        })
        .collect();

    let loss = |a: f64, b: f64| -> f64 {
        xs.iter()
            .zip(&ys)
            .map(|(&x, &y)| {
                let fitted = 1.0 / (1.0 + a * x.powf(2.0 * b));
                (fitted - y).powi(2)
            })
            .sum()
    };

    let mut best = (1.0f64, 1.0f64);
    let mut best_loss = loss(best.0, best.1);
    for ai in 1..=100 {
        for bi in 30..=200 {
            let (a, b) = (ai as f64 * 0.05, bi as f64 * 0.01);
            let l = loss(a, b);
            if l < best_loss {
                best = (a, b);
                best_loss = l;
            }
        }
    }

    let mut step = 0.05f64;
    while step > 1e-7 {
        let mut improved = false;
        for (da, db) in [(step, 0.0), (-step, 0.0), (0.0, step), (0.0, -step)] {
            let candidate = (best.0 + da, best.1 + db);
            if candidate.0 <= 0.0 || candidate.1 <= 0.0 {
                continue;
            }
            let l = loss(candidate.0, candidate.1);
            if l < best_loss {
                best = candidate;
                best_loss = l;
                improved = true;
            }
        }
        if !improved {
            step /= 2.0;
        }
    }

    (best.0 as f32, best.1 as f32)
}
