//! End-to-end clustering run over one corpus.
//!
//! `prepare corpus -> strategy clustering -> centroids -> soft assignment ->
//! keywords/entities/labels -> quality`. Strategy-specific work lives behind
//! [`Clusterer`]; everything after the labels are known is shared.

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::{info, warn};

use digest_common::{
    ClusterAssignment, DigestError, NormalizedPost, PipelineConfig, Post, QualityMetrics,
    TextEmbedder, TimeWindow, NOISE,
};

use crate::clusterer::{build_clusterer, ClusterOutput, Clusterer};
use crate::labeling::{cluster_entities, cluster_keywords, make_label, Entities, Keywords};
use crate::normalize::prepare_corpus;
use crate::quality;
use crate::soft_assign::{build_assignments, compute_centroids, secondary_labels};

/// One discovered cluster with everything the manifest needs.
#[derive(Debug, Clone)]
pub struct ClusterDetail {
    pub id: i32,
    pub label: String,
    /// Corpus indices of the members, in corpus order.
    pub members: Vec<usize>,
    pub keywords: Keywords,
    pub entities: Entities,
    /// Posts with another primary cluster that list this one as secondary.
    pub secondary_members: usize,
}

impl ClusterDetail {
    pub fn size(&self) -> usize {
        self.members.len()
    }
}

/// Result of a run, row-aligned: `assignments[i]` belongs to `corpus[i]`.
#[derive(Debug, Clone)]
pub struct ClusteringRun {
    pub corpus: Vec<NormalizedPost>,
    pub assignments: Vec<ClusterAssignment>,
    /// Ordered by cluster id.
    pub clusters: Vec<ClusterDetail>,
    pub centroids: BTreeMap<i32, Vec<f32>>,
    pub quality: QualityMetrics,
    pub window: Option<TimeWindow>,
}

impl ClusteringRun {
    pub fn total_posts(&self) -> usize {
        self.corpus.len()
    }

    pub fn noise_posts(&self) -> usize {
        self.assignments.iter().filter(|a| a.is_noise()).count()
    }

    pub fn clustered_posts(&self) -> usize {
        self.total_posts() - self.noise_posts()
    }

    /// Corpus indices of noise posts, in corpus order.
    pub fn noise_members(&self) -> Vec<usize> {
        self.assignments
            .iter()
            .enumerate()
            .filter(|(_, a)| a.is_noise())
            .map(|(i, _)| i)
            .collect()
    }
}

pub struct ClusteringPipeline {
    config: PipelineConfig,
    clusterer: Box<dyn Clusterer>,
}

impl ClusteringPipeline {
    /// Pipeline for `config.strategy`, embedding through `embedder`.
    pub fn from_config(
        config: PipelineConfig,
        embedder: Arc<dyn TextEmbedder>,
    ) -> Result<Self, DigestError> {
        let clusterer = build_clusterer(&config, embedder);
        Self::new(config, clusterer)
    }

    pub fn new(config: PipelineConfig, clusterer: Box<dyn Clusterer>) -> Result<Self, DigestError> {
        config.validate()?;
        Ok(Self { config, clusterer })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub async fn run(&self, posts: Vec<Post>) -> Result<ClusteringRun, DigestError> {
        let corpus = prepare_corpus(posts, self.config.corpus.min_posts)?;
        info!(
            posts = corpus.len(),
            strategy = %self.clusterer.strategy(),
            "Clustering corpus"
        );

        let output = self.clusterer.cluster(&corpus).await?;
        check_alignment(&output, corpus.len())?;

        let ClusterOutput {
            labels,
            probabilities,
            space,
            relative_validity,
            secondary,
            names,
        } = output;

        let centroids = space
            .as_deref()
            .map(|s| compute_centroids(s, &labels))
            .unwrap_or_default();

        let secondary = if !self.config.soft_assignment.enabled {
            vec![Vec::new(); labels.len()]
        } else if let Some(secondary) = secondary {
            secondary
        } else if let Some(space) = space.as_deref() {
            secondary_labels(space, &labels, &centroids, &self.config.soft_assignment)
        } else {
            vec![Vec::new(); labels.len()]
        };
        let multi_assigned = secondary.iter().filter(|s| !s.is_empty()).count();
        info!(multi_assigned, "Soft assignment done");

        let assignments = build_assignments(&labels, &probabilities, secondary);

        let labeling = &self.config.labeling;
        let mut keywords = cluster_keywords(&corpus, &labels, labeling);
        let mut entities = cluster_entities(&corpus, &labels, labeling.top_entities);

        let mut members: BTreeMap<i32, Vec<usize>> = BTreeMap::new();
        for (i, &label) in labels.iter().enumerate() {
            if label != NOISE {
                members.entry(label).or_default().push(i);
            }
        }

        let mut secondary_counts: BTreeMap<i32, usize> = BTreeMap::new();
        for assignment in &assignments {
            for &label in &assignment.secondary_labels {
                *secondary_counts.entry(label).or_insert(0) += 1;
            }
        }

        let clusters: Vec<ClusterDetail> = members
            .into_iter()
            .map(|(id, members)| {
                let keywords = keywords.remove(&id).unwrap_or_default();
                let entities = entities.remove(&id).unwrap_or_default();
                let label = names
                    .as_ref()
                    .and_then(|n| n.get(&id).cloned())
                    .unwrap_or_else(|| {
                        make_label(id, members.len(), &keywords, &entities, labeling)
                    });
                info!(cluster = id, size = members.len(), label = label.as_str(), "Cluster labeled");
                ClusterDetail {
                    id,
                    label,
                    members,
                    keywords,
                    entities,
                    secondary_members: secondary_counts.get(&id).copied().unwrap_or(0),
                }
            })
            .collect();

        let quality = quality::evaluate(
            space.as_deref(),
            &labels,
            relative_validity,
            &self.config.quality,
        );
        info!(
            clusters = quality.cluster_count,
            noise = quality.noise_count,
            noise_fraction = quality.noise_fraction,
            silhouette = ?quality.silhouette,
            relative_validity = ?quality.relative_validity,
            pass = quality.quality_pass,
            "Quality evaluated"
        );
        if !quality.quality_pass {
            warn!("Clustering did not pass the quality gate");
        }

        let window = time_window(&corpus);

        Ok(ClusteringRun {
            corpus,
            assignments,
            clusters,
            centroids,
            quality,
            window,
        })
    }
}

fn check_alignment(output: &ClusterOutput, n: usize) -> Result<(), DigestError> {
    let mismatch = |stage, found| DigestError::DimensionMismatch {
        stage,
        expected: n,
        found,
    };
    if output.labels.len() != n {
        return Err(mismatch("cluster labels", output.labels.len()));
    }
    if output.probabilities.len() != n {
        return Err(mismatch("membership probabilities", output.probabilities.len()));
    }
    if let Some(space) = &output.space {
        if space.len() != n {
            return Err(mismatch("clustering space", space.len()));
        }
    }
    if let Some(secondary) = &output.secondary {
        if secondary.len() != n {
            return Err(mismatch("secondary labels", secondary.len()));
        }
    }
    Ok(())
}

/// Earliest and latest parsable timestamps in the corpus.
pub fn time_window(corpus: &[NormalizedPost]) -> Option<TimeWindow> {
    let mut stamps = corpus.iter().filter_map(|p| p.post.created_at_parsed());
    let first = stamps.next()?;
    let (earliest, latest) = stamps.fold((first, first), |(lo, hi), ts| (lo.min(ts), hi.max(ts)));
    Some(TimeWindow { earliest, latest })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{axis, post, FixedEmbedder};
    use async_trait::async_trait;
    use digest_common::{ClusteringStrategy, ReductionConfig};

    /// Returns canned labels without looking at the corpus.
    struct CannedClusterer(ClusterOutput);

    #[async_trait]
    impl Clusterer for CannedClusterer {
        fn strategy(&self) -> ClusteringStrategy {
            ClusteringStrategy::Hybrid
        }

        async fn cluster(&self, _posts: &[NormalizedPost]) -> Result<ClusterOutput, DigestError> {
            Ok(self.0.clone())
        }
    }

    fn small_config() -> PipelineConfig {
        let mut config = PipelineConfig::default();
        config.corpus.min_posts = 1;
        config
    }

    fn posts(n: usize) -> Vec<Post> {
        (0..n).map(|i| post(&i.to_string(), &format!("post number {i}"))).collect()
    }

    #[tokio::test]
    async fn too_small_corpus_is_rejected() {
        let pipeline = ClusteringPipeline::from_config(
            PipelineConfig::default(),
            Arc::new(FixedEmbedder::new()),
        )
        .unwrap();
        let err = pipeline.run(posts(5)).await.unwrap_err();
        assert!(matches!(
            err,
            DigestError::CorpusTooSmall {
                found: 5,
                required: 20
            }
        ));
    }

    #[tokio::test]
    async fn invalid_config_is_rejected_up_front() {
        let mut config = PipelineConfig::default();
        config.hdbscan.min_cluster_size = 1;
        let result = ClusteringPipeline::from_config(config, Arc::new(FixedEmbedder::new()));
        assert!(matches!(result, Err(DigestError::Config(_))));
    }

    #[tokio::test]
    async fn misaligned_strategy_output_is_an_error() {
        let canned = ClusterOutput {
            labels: vec![0, 0],
            probabilities: vec![1.0, 1.0],
            ..Default::default()
        };
        let pipeline =
            ClusteringPipeline::new(small_config(), Box::new(CannedClusterer(canned))).unwrap();
        let err = pipeline.run(posts(3)).await.unwrap_err();
        assert!(matches!(
            err,
            DigestError::DimensionMismatch {
                stage: "cluster labels",
                ..
            }
        ));
    }

    #[tokio::test]
    async fn fixed_names_and_secondary_counts_flow_through() {
        let mut names = BTreeMap::new();
        names.insert(0, "alpha".to_string());
        names.insert(1, "beta".to_string());
        let canned = ClusterOutput {
            labels: vec![0, 0, 1, NOISE],
            probabilities: vec![1.0, 1.0, 1.0, 0.0],
            secondary: Some(vec![vec![1], vec![], vec![0], vec![]]),
            names: Some(names),
            ..Default::default()
        };
        let pipeline =
            ClusteringPipeline::new(small_config(), Box::new(CannedClusterer(canned))).unwrap();
        let run = pipeline.run(posts(4)).await.unwrap();

        assert_eq!(run.clusters.len(), 2);
        assert_eq!(run.clusters[0].label, "alpha");
        assert_eq!(run.clusters[0].members, vec![0, 1]);
        assert_eq!(run.clusters[0].secondary_members, 1);
        assert_eq!(run.clusters[1].label, "beta");
        assert_eq!(run.noise_posts(), 1);
        assert_eq!(run.noise_members(), vec![3]);
        assert!(run.centroids.is_empty());
        assert_eq!(run.quality.silhouette, None);
    }

    #[tokio::test]
    async fn disabled_soft_assignment_drops_secondaries() {
        let canned = ClusterOutput {
            labels: vec![0, 1],
            probabilities: vec![1.0, 1.0],
            secondary: Some(vec![vec![1], vec![0]]),
            ..Default::default()
        };
        let mut config = small_config();
        config.soft_assignment.enabled = false;
        let pipeline = ClusteringPipeline::new(config, Box::new(CannedClusterer(canned))).unwrap();
        let run = pipeline.run(posts(2)).await.unwrap();

        assert!(run.assignments.iter().all(|a| a.secondary_labels.is_empty()));
        assert!(run.clusters.iter().all(|c| c.secondary_members == 0));
    }

    #[tokio::test]
    async fn noise_fraction_matches_counts() {
        let embedder = FixedEmbedder::new()
            .on_topic("bitcoin", axis(64, 0))
            .on_topic("telescope", axis(64, 1));
        let mut config = PipelineConfig {
            reduction: ReductionConfig {
                n_components: 0,
                ..Default::default()
            },
            ..Default::default()
        };
        config.corpus.min_posts = 20;

        let mut input = Vec::new();
        for i in 0..12 {
            input.push(post(&format!("b{i}"), &format!("bitcoin halving miners {i}")));
        }
        for i in 0..12 {
            input.push(post(&format!("t{i}"), &format!("telescope galaxy nebula {i}")));
        }
        let pipeline = ClusteringPipeline::from_config(config, Arc::new(embedder)).unwrap();
        let run = pipeline.run(input).await.unwrap();

        let expected = run.noise_posts() as f64 / run.total_posts() as f64;
        assert!((run.quality.noise_fraction - expected).abs() < 1e-12);
        assert_eq!(run.quality.noise_count, run.noise_posts());
        assert_eq!(run.clustered_posts() + run.noise_posts(), 24);
    }

    #[test]
    fn time_window_spans_parsable_timestamps() {
        let mut early = post("1", "a");
        early.created_at = Some("Mon Jan 01 08:00:00 +0000 2024".to_string());
        let mut late = post("2", "b");
        late.created_at = Some("Tue Jan 02 09:30:00 +0000 2024".to_string());
        let mut broken = post("3", "c");
        broken.created_at = Some("not a date".to_string());

        let corpus: Vec<NormalizedPost> = [late, broken, early]
            .into_iter()
            .map(crate::normalize::normalize_post)
            .collect();
        let window = time_window(&corpus).unwrap();
        assert_eq!(window.earliest.to_rfc3339(), "2024-01-01T08:00:00+00:00");
        assert_eq!(window.latest.to_rfc3339(), "2024-01-02T09:30:00+00:00");

        assert!(time_window(&[]).is_none());
    }
}
