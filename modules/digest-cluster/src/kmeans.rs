//! Seeded k-means: k-means++ starts, Lloyd iterations, best of `n_init`.
//!
//! Every point gets a cluster, so there is no noise and no relative
//! validity. Clusters are renumbered by first appearance in input order.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use digest_common::KmeansConfig;

#[derive(Debug, Clone, Copy)]
pub struct KmeansParams {
    pub n_clusters: usize,
    pub n_init: usize,
    pub max_iter: usize,
    pub seed: Option<u64>,
}

impl From<&KmeansConfig> for KmeansParams {
    fn from(config: &KmeansConfig) -> Self {
        Self {
            n_clusters: config.n_clusters,
            n_init: config.n_init,
            max_iter: config.max_iter,
            seed: config.seed,
        }
    }
}

#[derive(Debug, Clone)]
pub struct KmeansResult {
    /// Cluster number in `0..k` for every point.
    pub labels: Vec<i32>,
    pub centroids: Vec<Vec<f32>>,
    /// Sum of squared distances to the assigned centroid.
    pub inertia: f64,
}

fn squared_distance(a: &[f32], b: &[f32]) -> f64 {
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| {
            let d = (*x as f64) - (*y as f64);
            d * d
        })
        .sum()
}

/// Partition `data` into `min(n_clusters, n)` clusters.
pub fn kmeans(data: &[Vec<f32>], params: KmeansParams) -> KmeansResult {
    let n = data.len();
    let k = params.n_clusters.min(n);
    if k == 0 {
        return KmeansResult {
            labels: Vec::new(),
            centroids: Vec::new(),
            inertia: 0.0,
        };
    }

    let mut rng = match params.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_os_rng(),
    };

    let max_iter = params.max_iter.max(1);
    let start = |rng: &mut StdRng| lloyd(data, plus_plus_init(data, k, rng), max_iter);
    let mut best = start(&mut rng);
    for _ in 1..params.n_init {
        let candidate = start(&mut rng);
        if candidate.2 < best.2 {
            best = candidate;
        }
    }

    let (assignment, centers, inertia) = best;
    renumber(assignment, centers, inertia)
}

/// k-means++ seeding: each new center is drawn with probability
/// proportional to its squared distance from the nearest chosen center.
fn plus_plus_init(data: &[Vec<f32>], k: usize, rng: &mut StdRng) -> Vec<Vec<f32>> {
    let n = data.len();
    let mut centers = Vec::with_capacity(k);
    centers.push(data[rng.random_range(0..n)].clone());

    let mut nearest: Vec<f64> = data.iter().map(|p| squared_distance(p, &centers[0])).collect();
    while centers.len() < k {
        let total: f64 = nearest.iter().sum();
        let pick = if total > 0.0 {
            let target = rng.random::<f64>() * total;
            let mut cumulative = 0.0;
            nearest
                .iter()
                .position(|d| {
                    cumulative += d;
                    cumulative > target
                })
                .unwrap_or(n - 1)
        } else {
            rng.random_range(0..n)
        };

        let center = data[pick].clone();
        for (d, p) in nearest.iter_mut().zip(data) {
            *d = d.min(squared_distance(p, &center));
        }
        centers.push(center);
    }
    centers
}

/// Nearest center per point, ties to the lower index. Returns whether any
/// assignment changed.
fn assign(data: &[Vec<f32>], centers: &[Vec<f32>], assignment: &mut [usize]) -> bool {
    let mut changed = false;
    for (slot, point) in assignment.iter_mut().zip(data) {
        let mut best = 0;
        let mut best_d = f64::INFINITY;
        for (c, center) in centers.iter().enumerate() {
            let d = squared_distance(point, center);
            if d < best_d {
                best = c;
                best_d = d;
            }
        }
        if *slot != best {
            *slot = best;
            changed = true;
        }
    }
    changed
}

/// Move every center to the mean of its points. An empty cluster takes over
/// the point farthest from its current center.
fn update(data: &[Vec<f32>], assignment: &[usize], centers: &mut [Vec<f32>]) {
    let dim = data[0].len();
    let k = centers.len();
    let mut sums = vec![vec![0.0f64; dim]; k];
    let mut counts = vec![0usize; k];
    for (point, &c) in data.iter().zip(assignment) {
        counts[c] += 1;
        for (s, x) in sums[c].iter_mut().zip(point) {
            *s += *x as f64;
        }
    }

    let mut taken = vec![false; data.len()];
    for c in 0..k {
        if counts[c] > 0 {
            centers[c] = sums[c].iter().map(|s| (s / counts[c] as f64) as f32).collect();
            continue;
        }
        let far = (0..data.len())
            .filter(|&i| !taken[i])
            .max_by(|&a, &b| {
                let da = squared_distance(&data[a], &centers[assignment[a]]);
                let db = squared_distance(&data[b], &centers[assignment[b]]);
                da.total_cmp(&db)
            });
        if let Some(i) = far {
            taken[i] = true;
            centers[c] = data[i].clone();
        }
    }
}

fn lloyd(
    data: &[Vec<f32>],
    mut centers: Vec<Vec<f32>>,
    max_iter: usize,
) -> (Vec<usize>, Vec<Vec<f32>>, f64) {
    let mut assignment = vec![usize::MAX; data.len()];
    for _ in 0..max_iter {
        if !assign(data, &centers, &mut assignment) {
            break;
        }
        update(data, &assignment, &mut centers);
    }
    assign(data, &centers, &mut assignment);

    let inertia = data
        .iter()
        .zip(&assignment)
        .map(|(p, &c)| squared_distance(p, &centers[c]))
        .sum();
    (assignment, centers, inertia)
}

fn renumber(assignment: Vec<usize>, centers: Vec<Vec<f32>>, inertia: f64) -> KmeansResult {
    let mut mapping: Vec<Option<i32>> = vec![None; centers.len()];
    let mut order = Vec::new();
    let labels = assignment
        .iter()
        .map(|&c| {
            *mapping[c].get_or_insert_with(|| {
                order.push(c);
                (order.len() - 1) as i32
            })
        })
        .collect();
    let centroids = order.into_iter().map(|c| centers[c].clone()).collect();
    KmeansResult {
        labels,
        centroids,
        inertia,
    }
}
