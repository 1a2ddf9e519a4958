//! HDBSCAN density clustering.
//!
//! Mutual-reachability graph -> minimum spanning tree -> single-linkage
//! hierarchy -> condensed tree -> flat clusters by excess of mass or leaves.
//! The root of the condensed tree is never selected, so a corpus with one
//! dense blob and nothing else comes back as all noise.

use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};

use digest_common::{ClusterSelection, HdbscanConfig, NOISE};

use crate::vector::euclidean;

/// Floor applied to distances before inverting them into lambdas.
const MIN_DISTANCE: f64 = 1e-12;

#[derive(Debug, Clone, Copy)]
pub struct HdbscanParams {
    pub min_cluster_size: usize,
    pub min_samples: usize,
    pub selection: ClusterSelection,
}

impl From<&HdbscanConfig> for HdbscanParams {
    fn from(config: &HdbscanConfig) -> Self {
        Self {
            min_cluster_size: config.min_cluster_size,
            min_samples: config.min_samples,
            selection: config.selection,
        }
    }
}

#[derive(Debug, Clone)]
pub struct HdbscanResult {
    /// `NOISE` or a cluster number in `0..cluster_count`.
    pub labels: Vec<i32>,
    pub probabilities: Vec<f32>,
    pub relative_validity: Option<f64>,
}

impl HdbscanResult {
    fn all_noise(n: usize) -> Self {
        Self {
            labels: vec![NOISE; n],
            probabilities: vec![0.0; n],
            relative_validity: None,
        }
    }

    pub fn cluster_count(&self) -> usize {
        self.labels
            .iter()
            .filter(|&&l| l != NOISE)
            .collect::<BTreeSet<_>>()
            .len()
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct MstEdge {
    pub a: usize,
    pub b: usize,
    pub weight: f64,
}

#[derive(Debug, Clone, Copy)]
struct Merge {
    left: usize,
    right: usize,
    distance: f64,
    size: usize,
}

/// One edge of the condensed tree. `child < n` is a point, otherwise a cluster.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct CondensedRow {
    pub parent: usize,
    pub child: usize,
    pub lambda: f64,
    pub size: usize,
}

pub fn hdbscan(data: &[Vec<f32>], params: HdbscanParams) -> HdbscanResult {
    let n = data.len();
    if n < 2 || n < params.min_cluster_size {
        return HdbscanResult::all_noise(n);
    }

    let core = core_distances(data, params.min_samples);
    let mst = prim_mst(data, &core);
    let linkage = single_linkage(&mst, n);
    let condensed = condense_tree(&linkage, n, params.min_cluster_size.max(2));
    let stability = stabilities(&condensed, n);
    let selected = select_clusters(&condensed, &stability, n, params.selection);
    let labels = label_points(&condensed, &selected, n);
    let probabilities = membership_probabilities(&condensed, &selected, &labels);
    let relative_validity = relative_validity(&mst, &labels);

    HdbscanResult {
        labels,
        probabilities,
        relative_validity,
    }
}

/// Distance to the `min_samples`-th nearest other point. One row of
/// distances is live at a time.
fn core_distances(data: &[Vec<f32>], min_samples: usize) -> Vec<f64> {
    let n = data.len();
    let k = min_samples.clamp(1, n.saturating_sub(1).max(1));
    let mut row = Vec::with_capacity(n.saturating_sub(1));
    data.iter()
        .enumerate()
        .map(|(i, point)| {
            row.clear();
            row.extend(
                data.iter()
                    .enumerate()
                    .filter(|(j, _)| *j != i)
                    .map(|(_, other)| euclidean(point, other)),
            );
            if row.len() < k {
                return 0.0;
            }
            let (_, kth, _) = row.select_nth_unstable_by(k - 1, |a, b| a.total_cmp(b));
            *kth
        })
        .collect()
}

/// Prim's algorithm over the implicit mutual-reachability graph; distances
/// are computed as the tree grows, so memory stays linear in `n`.
fn prim_mst(data: &[Vec<f32>], core: &[f64]) -> Vec<MstEdge> {
    let n = data.len();
    let mut in_tree = vec![false; n];
    let mut best = vec![f64::INFINITY; n];
    let mut best_from = vec![0usize; n];
    let mut edges = Vec::with_capacity(n.saturating_sub(1));

    let mut current = 0;
    in_tree[0] = true;
    for _ in 1..n {
        for j in 0..n {
            if in_tree[j] {
                continue;
            }
            let mr = euclidean(&data[current], &data[j])
                .max(core[current])
                .max(core[j]);
            if mr < best[j] {
                best[j] = mr;
                best_from[j] = current;
            }
        }

        let mut next = usize::MAX;
        let mut next_weight = f64::INFINITY;
        for j in 0..n {
            if !in_tree[j] && (next == usize::MAX || best[j] < next_weight) {
                next = j;
                next_weight = best[j];
            }
        }

        in_tree[next] = true;
        edges.push(MstEdge {
            a: best_from[next],
            b: next,
            weight: next_weight,
        });
        current = next;
    }
    edges
}

struct UnionFind {
    parent: Vec<usize>,
}

impl UnionFind {
    fn new(size: usize) -> Self {
        Self {
            parent: (0..size).collect(),
        }
    }

    fn find(&mut self, mut x: usize) -> usize {
        let mut root = x;
        while self.parent[root] != root {
            root = self.parent[root];
        }
        while self.parent[x] != root {
            let next = self.parent[x];
            self.parent[x] = root;
            x = next;
        }
        root
    }
}

/// Merge MST edges in ascending weight order. Merge `i` creates node `n + i`.
fn single_linkage(mst: &[MstEdge], n: usize) -> Vec<Merge> {
    let mut edges = mst.to_vec();
    edges.sort_by(|x, y| x.weight.total_cmp(&y.weight));

    let mut uf = UnionFind::new(2 * n);
    let mut sizes = vec![1usize; 2 * n];
    let mut merges = Vec::with_capacity(edges.len());

    for (i, edge) in edges.iter().enumerate() {
        let left = uf.find(edge.a);
        let right = uf.find(edge.b);
        let node = n + i;
        sizes[node] = sizes[left] + sizes[right];
        uf.parent[left] = node;
        uf.parent[right] = node;
        merges.push(Merge {
            left,
            right,
            distance: edge.weight,
            size: sizes[node],
        });
    }
    merges
}

fn bfs_hierarchy(merges: &[Merge], n: usize, start: usize) -> Vec<usize> {
    let mut out = Vec::new();
    let mut queue = VecDeque::from([start]);
    while let Some(node) = queue.pop_front() {
        out.push(node);
        if node >= n {
            let m = merges[node - n];
            queue.push_back(m.left);
            queue.push_back(m.right);
        }
    }
    out
}

fn condense_tree(merges: &[Merge], n: usize, min_cluster_size: usize) -> Vec<CondensedRow> {
    let root = 2 * n - 2;
    let node_size = |node: usize| if node < n { 1 } else { merges[node - n].size };

    let mut relabel: HashMap<usize, usize> = HashMap::new();
    relabel.insert(root, n);
    let mut next_label = n + 1;
    let mut ignore = vec![false; 2 * n - 1];
    let mut rows = Vec::new();

    for node in bfs_hierarchy(merges, n, root) {
        if node < n || ignore[node] {
            continue;
        }
        let merge = merges[node - n];
        let lambda = 1.0 / merge.distance.max(MIN_DISTANCE);
        let parent = relabel[&node];
        let left_size = node_size(merge.left);
        let right_size = node_size(merge.right);

        let fall_out = |child: usize, rows: &mut Vec<CondensedRow>, ignore: &mut Vec<bool>| {
            for sub in bfs_hierarchy(merges, n, child) {
                if sub < n {
                    rows.push(CondensedRow {
                        parent,
                        child: sub,
                        lambda,
                        size: 1,
                    });
                }
                ignore[sub] = true;
            }
        };

        match (left_size >= min_cluster_size, right_size >= min_cluster_size) {
            (true, true) => {
                for (child, size) in [(merge.left, left_size), (merge.right, right_size)] {
                    relabel.insert(child, next_label);
                    rows.push(CondensedRow {
                        parent,
                        child: next_label,
                        lambda,
                        size,
                    });
                    next_label += 1;
                }
            }
            (false, false) => {
                fall_out(merge.left, &mut rows, &mut ignore);
                fall_out(merge.right, &mut rows, &mut ignore);
            }
            (true, false) => {
                relabel.insert(merge.left, parent);
                fall_out(merge.right, &mut rows, &mut ignore);
            }
            (false, true) => {
                relabel.insert(merge.right, parent);
                fall_out(merge.left, &mut rows, &mut ignore);
            }
        }
    }
    rows
}

/// Excess-of-mass stability of every cluster node (root included).
pub(crate) fn stabilities(rows: &[CondensedRow], n: usize) -> BTreeMap<usize, f64> {
    let mut births: HashMap<usize, f64> = HashMap::new();
    births.insert(n, 0.0);
    for row in rows.iter().filter(|r| r.child >= n) {
        births.insert(row.child, row.lambda);
    }

    let mut stability: BTreeMap<usize, f64> = BTreeMap::new();
    stability.insert(n, 0.0);
    for row in rows {
        if row.child >= n {
            stability.entry(row.child).or_insert(0.0);
        }
        let birth = births.get(&row.parent).copied().unwrap_or(0.0);
        *stability.entry(row.parent).or_insert(0.0) += (row.lambda - birth) * row.size as f64;
    }
    stability
}

fn cluster_children(rows: &[CondensedRow], n: usize) -> BTreeMap<usize, Vec<usize>> {
    let mut children: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
    for row in rows.iter().filter(|r| r.child >= n) {
        children.entry(row.parent).or_default().push(row.child);
    }
    children
}

fn descendants(children: &BTreeMap<usize, Vec<usize>>, node: usize) -> Vec<usize> {
    let mut out = Vec::new();
    let mut queue = VecDeque::from([node]);
    while let Some(current) = queue.pop_front() {
        if let Some(kids) = children.get(&current) {
            for &kid in kids {
                out.push(kid);
                queue.push_back(kid);
            }
        }
    }
    out
}

pub(crate) fn select_clusters(
    rows: &[CondensedRow],
    stability: &BTreeMap<usize, f64>,
    n: usize,
    selection: ClusterSelection,
) -> BTreeSet<usize> {
    let children = cluster_children(rows, n);
    // Root is `n`, the smallest cluster id; it is never a candidate.
    let candidates: Vec<usize> = stability.keys().copied().filter(|&c| c != n).collect();

    match selection {
        ClusterSelection::Leaf => candidates
            .into_iter()
            .filter(|c| !children.contains_key(c))
            .collect(),
        ClusterSelection::Eom => {
            let mut stability = stability.clone();
            let mut is_cluster: BTreeMap<usize, bool> =
                candidates.iter().map(|&c| (c, true)).collect();

            for &node in candidates.iter().rev() {
                let subtree: f64 = children
                    .get(&node)
                    .map(|kids| kids.iter().map(|k| stability[k]).sum())
                    .unwrap_or(0.0);
                if subtree > stability[&node] {
                    is_cluster.insert(node, false);
                    stability.insert(node, subtree);
                } else {
                    for sub in descendants(&children, node) {
                        is_cluster.insert(sub, false);
                    }
                }
            }

            is_cluster
                .into_iter()
                .filter_map(|(c, keep)| keep.then_some(c))
                .collect()
        }
    }
}

/// Each point takes the nearest selected ancestor of the node it fell out of.
pub(crate) fn label_points(rows: &[CondensedRow], selected: &BTreeSet<usize>, n: usize) -> Vec<i32> {
    let numbering: HashMap<usize, i32> = selected
        .iter()
        .enumerate()
        .map(|(i, &c)| (c, i as i32))
        .collect();

    let mut cluster_parent: HashMap<usize, usize> = HashMap::new();
    let mut point_parent = vec![None; n];
    for row in rows {
        if row.child >= n {
            cluster_parent.insert(row.child, row.parent);
        } else {
            point_parent[row.child] = Some(row.parent);
        }
    }

    point_parent
        .into_iter()
        .map(|start| {
            let mut node = start;
            while let Some(current) = node {
                if let Some(&label) = numbering.get(&current) {
                    return label;
                }
                node = cluster_parent.get(&current).copied();
            }
            NOISE
        })
        .collect()
}

/// Point lambda relative to the deepest lambda seen directly under its cluster.
pub(crate) fn membership_probabilities(
    rows: &[CondensedRow],
    selected: &BTreeSet<usize>,
    labels: &[i32],
) -> Vec<f32> {
    let n = labels.len();
    let clusters: Vec<usize> = selected.iter().copied().collect();

    let mut max_lambda: HashMap<usize, f64> = HashMap::new();
    for row in rows {
        let entry = max_lambda.entry(row.parent).or_insert(0.0);
        *entry = entry.max(row.lambda);
    }

    let mut probabilities = vec![0.0f32; n];
    for row in rows.iter().filter(|r| r.child < n) {
        let label = labels[row.child];
        if label == NOISE {
            continue;
        }
        let cluster = clusters[label as usize];
        let death = max_lambda.get(&cluster).copied().unwrap_or(0.0);
        probabilities[row.child] = if death == 0.0 || !death.is_finite() || !row.lambda.is_finite() {
            1.0
        } else {
            (row.lambda.min(death) / death) as f32
        };
    }
    probabilities
}

/// Density-based validity approximated over the mutual-reachability MST.
/// `None` when no cluster was found.
pub(crate) fn relative_validity(mst: &[MstEdge], labels: &[i32]) -> Option<f64> {
    let cluster_count = labels.iter().filter(|&&l| l != NOISE).max().map(|&m| m as usize + 1)?;
    let mut sizes = vec![0usize; cluster_count];
    for &label in labels.iter().filter(|&&l| l != NOISE) {
        sizes[label as usize] += 1;
    }
    let total = labels.len() as f64;

    let mut sparseness = vec![0.0f64; cluster_count];
    let mut separation = vec![f64::INFINITY; cluster_count];
    let mut min_outlier_sep = f64::INFINITY;
    let mut max_distance = 0.0f64;

    for edge in mst {
        let (la, lb) = (labels[edge.a], labels[edge.b]);
        max_distance = max_distance.max(edge.weight);

        match (la == NOISE, lb == NOISE) {
            (true, true) => continue,
            (true, false) | (false, true) => {
                min_outlier_sep = min_outlier_sep.min(edge.weight);
            }
            (false, false) if la == lb => {
                let slot = &mut sparseness[la as usize];
                *slot = slot.max(edge.weight);
            }
            (false, false) => {
                for l in [la, lb] {
                    let slot = &mut separation[l as usize];
                    *slot = slot.min(edge.weight);
                }
            }
        }
    }

    if min_outlier_sep.is_infinite() {
        min_outlier_sep = max_distance;
    }
    let widest_separation = separation
        .iter()
        .copied()
        .filter(|s| s.is_finite())
        .fold(None, |acc: Option<f64>, s| Some(acc.map_or(s, |a| a.max(s))));
    let correction = 2.0
        * match widest_separation {
            Some(s) if cluster_count > 1 => s,
            _ => min_outlier_sep,
        };

    let score = (0..cluster_count)
        .map(|i| {
            let dspc = if separation[i].is_finite() {
                separation[i]
            } else {
                correction
            };
            let dsc = sparseness[i];
            let denom = dspc.max(dsc);
            let v = if denom > 0.0 { (dspc - dsc) / denom } else { 0.0 };
            sizes[i] as f64 * v / total
        })
        .sum();

    Some(score)
}
