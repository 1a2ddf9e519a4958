//! Centroids and secondary ("soft") cluster memberships.

use std::collections::BTreeMap;

use digest_common::{ClusterAssignment, SoftAssignmentConfig, NOISE};

use crate::vector::{cosine_similarity, mean_of, normalized};

/// Unit-length mean of each non-noise cluster's members.
pub fn compute_centroids(space: &[Vec<f32>], labels: &[i32]) -> BTreeMap<i32, Vec<f32>> {
    let dim = space.first().map_or(0, Vec::len);
    let mut members: BTreeMap<i32, Vec<&Vec<f32>>> = BTreeMap::new();
    for (row, &label) in space.iter().zip(labels) {
        if label != NOISE {
            members.entry(label).or_default().push(row);
        }
    }
    members
        .into_iter()
        .map(|(label, rows)| (label, normalized(mean_of(rows, dim))))
        .collect()
}

/// Secondary clusters for each point. A cluster other than the primary
/// qualifies when its similarity clears `sim_threshold` or sits within
/// `delta_threshold` of the primary similarity. Noise points get none.
pub fn secondary_labels(
    space: &[Vec<f32>],
    labels: &[i32],
    centroids: &BTreeMap<i32, Vec<f32>>,
    config: &SoftAssignmentConfig,
) -> Vec<Vec<i32>> {
    space
        .iter()
        .zip(labels)
        .map(|(row, &primary)| {
            if primary == NOISE {
                return Vec::new();
            }
            let Some(primary_centroid) = centroids.get(&primary) else {
                return Vec::new();
            };
            let primary_sim = cosine_similarity(row, primary_centroid);

            let mut candidates: Vec<(i32, f32)> = centroids
                .iter()
                .filter(|(label, _)| **label != primary)
                .map(|(label, centroid)| (*label, cosine_similarity(row, centroid)))
                .filter(|(_, sim)| {
                    *sim >= config.sim_threshold || primary_sim - *sim <= config.delta_threshold
                })
                .collect();

            candidates.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));
            candidates.truncate(config.max_secondary);
            candidates.into_iter().map(|(label, _)| label).collect()
        })
        .collect()
}

pub fn build_assignments(
    labels: &[i32],
    probabilities: &[f32],
    secondary: Vec<Vec<i32>>,
) -> Vec<ClusterAssignment> {
    labels
        .iter()
        .zip(probabilities)
        .zip(secondary)
        .map(|((&label, &p), secondary_labels)| {
            if label == NOISE {
                ClusterAssignment::noise()
            } else {
                ClusterAssignment {
                    primary_label: label,
                    membership_confidence: p.clamp(0.0, 1.0),
                    secondary_labels,
                }
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> SoftAssignmentConfig {
        SoftAssignmentConfig::default()
    }

    #[test]
    fn centroids_skip_noise_and_are_unit_length() {
        let space = vec![vec![1.0, 0.0], vec![1.0, 0.2], vec![50.0, 50.0], vec![0.0, 3.0]];
        let labels = vec![0, 0, NOISE, 1];
        let centroids = compute_centroids(&space, &labels);

        assert_eq!(centroids.keys().copied().collect::<Vec<_>>(), vec![0, 1]);
        assert_eq!(centroids[&1], vec![0.0, 1.0]);
        let norm: f32 = centroids[&0].iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-6);
    }

    #[test]
    fn noise_gets_no_secondary() {
        let space = vec![vec![1.0, 0.0], vec![0.7, 0.7]];
        let labels = vec![0, NOISE];
        let mut centroids = BTreeMap::new();
        centroids.insert(0, vec![1.0, 0.0]);
        centroids.insert(1, vec![0.0, 1.0]);

        let secondary = secondary_labels(&space, &labels, &centroids, &config());
        assert!(secondary[1].is_empty());
    }

    #[test]
    fn close_second_cluster_is_granted() {
        // Point sits between clusters 0 and 1; cluster 2 is far away.
        let s = std::f32::consts::FRAC_1_SQRT_2;
        let space = vec![vec![s, s, 0.0]];
        let mut centroids = BTreeMap::new();
        centroids.insert(0, vec![1.0, 0.0, 0.0]);
        centroids.insert(1, vec![0.0, 1.0, 0.0]);
        centroids.insert(2, vec![0.0, 0.0, 1.0]);

        let secondary = secondary_labels(&space, &[0], &centroids, &config());
        assert_eq!(secondary[0], vec![1]);
    }

    #[test]
    fn distant_clusters_are_not_granted() {
        let space = vec![vec![1.0, 0.1, 0.0]];
        let mut centroids = BTreeMap::new();
        centroids.insert(0, vec![1.0, 0.0, 0.0]);
        centroids.insert(1, vec![0.0, 1.0, 0.0]);

        let secondary = secondary_labels(&space, &[0], &centroids, &config());
        assert!(secondary[0].is_empty());
    }

    #[test]
    fn secondary_capped_and_sorted_by_similarity() {
        // Every other centroid clears the absolute threshold.
        let space = vec![vec![1.0, 0.0]];
        let mut centroids = BTreeMap::new();
        centroids.insert(0, vec![1.0, 0.0]);
        centroids.insert(1, crate::vector::normalized(vec![1.0, 0.3]));
        centroids.insert(2, crate::vector::normalized(vec![1.0, 0.1]));
        centroids.insert(3, crate::vector::normalized(vec![1.0, 0.2]));

        let secondary = secondary_labels(&space, &[0], &centroids, &config());
        assert_eq!(secondary[0], vec![2, 3]);
    }

    #[test]
    fn assignments_reflect_labels() {
        let labels = vec![0, NOISE];
        let assignments = build_assignments(&labels, &[0.9, 0.4], vec![vec![1], vec![]]);

        assert_eq!(assignments[0].primary_label, 0);
        assert_eq!(assignments[0].secondary_labels, vec![1]);
        assert!((assignments[0].membership_confidence - 0.9).abs() < 1e-6);
        assert!(assignments[1].is_noise());
        assert!(assignments[1].secondary_labels.is_empty());
        assert_eq!(assignments[1].membership_confidence, 0.0);
    }
}
