// Clustering strategies behind one trait.
//
// HybridClusterer:    dense + weighted sparse -> fuse -> reduce -> partition
// EmbeddingClusterer: dense only              -> reduce -> partition
// RuleBasedClusterer: keyword/account topic tables, no vector space
//
// The partition step is HDBSCAN or seeded k-means (`Partitioner`).
//
// Centroids, soft assignment, labeling and quality are shared downstream in
// the pipeline; a strategy only has to produce labels (and whatever extras it
// knows better than the shared machinery, such as fixed cluster names).

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;

use digest_common::{
    ClusterAlgorithm, ClusteringStrategy, DigestError, NormalizedPost, PipelineConfig,
    TextEmbedder, NOISE,
};

use crate::embedding::DualEmbedder;
use crate::hdbscan::{hdbscan, HdbscanParams};
use crate::hybrid::fuse;
use crate::kmeans::{kmeans, KmeansParams};
use crate::reduce::ManifoldReducer;
use crate::topics::assign_topics;

/// What a strategy hands back for a corpus, row-aligned with its input.
#[derive(Debug, Clone, Default)]
pub struct ClusterOutput {
    pub labels: Vec<i32>,
    pub probabilities: Vec<f32>,
    /// The space clusters were found in. Drives centroids, soft assignment
    /// and silhouette; `None` for strategies without a vector space.
    pub space: Option<Vec<Vec<f32>>>,
    pub relative_validity: Option<f64>,
    /// Secondary memberships the strategy decided itself.
    pub secondary: Option<Vec<Vec<i32>>>,
    /// Cluster names the strategy decided itself.
    pub names: Option<BTreeMap<i32, String>>,
}

#[async_trait]
pub trait Clusterer: Send + Sync {
    fn strategy(&self) -> ClusteringStrategy;

    async fn cluster(&self, posts: &[NormalizedPost]) -> Result<ClusterOutput, DigestError>;
}

/// How a vector-space strategy turns its space into labels.
#[derive(Debug, Clone, Copy)]
pub enum Partitioner {
    Density(HdbscanParams),
    Centroid(KmeansParams),
}

impl Partitioner {
    pub fn from_config(config: &PipelineConfig) -> Self {
        match config.algorithm {
            ClusterAlgorithm::Hdbscan => Partitioner::Density(HdbscanParams::from(&config.hdbscan)),
            ClusterAlgorithm::Kmeans => Partitioner::Centroid(KmeansParams::from(&config.kmeans)),
        }
    }
}

/// Pick the clusterer for `config.strategy`.
pub fn build_clusterer(
    config: &PipelineConfig,
    embedder: Arc<dyn TextEmbedder>,
) -> Box<dyn Clusterer> {
    let dual = || {
        DualEmbedder::new(
            embedder.clone(),
            config.embedding.batch_size,
            config.sparse.clone(),
        )
        .with_concurrency(config.embedding.max_concurrent_batches)
    };
    match config.strategy {
        ClusteringStrategy::Hybrid => Box::new(HybridClusterer {
            embedder: dual(),
            lambda_weight: config.hybrid.lambda_weight,
            reducer: ManifoldReducer::from(&config.reduction),
            partitioner: Partitioner::from_config(config),
        }),
        ClusteringStrategy::Embedding => Box::new(EmbeddingClusterer {
            embedder: dual(),
            reducer: ManifoldReducer::from(&config.reduction),
            partitioner: Partitioner::from_config(config),
        }),
        ClusteringStrategy::RuleBased => Box::new(RuleBasedClusterer {
            min_topic_size: config.topics.min_topic_size,
            max_secondary: config.soft_assignment.max_secondary,
        }),
    }
}

fn partition(
    space: Vec<Vec<f32>>,
    reducer: &ManifoldReducer,
    partitioner: Partitioner,
) -> ClusterOutput {
    let space = if reducer.is_enabled() {
        let reduced = reducer.reduce(&space);
        info!(
            dims = reduced.first().map_or(0, Vec::len),
            neighbors = reducer.n_neighbors,
            "Manifold reduction done"
        );
        reduced
    } else {
        space
    };

    match partitioner {
        Partitioner::Density(params) => density_labels(space, params),
        Partitioner::Centroid(params) => centroid_labels(space, params),
    }
}

fn density_labels(space: Vec<Vec<f32>>, params: HdbscanParams) -> ClusterOutput {
    let result = hdbscan(&space, params);
    info!(
        clusters = result.cluster_count(),
        noise = result.labels.iter().filter(|&&l| l == NOISE).count(),
        "Density clustering done"
    );

    ClusterOutput {
        labels: result.labels,
        probabilities: result.probabilities,
        space: Some(space),
        relative_validity: result.relative_validity,
        secondary: None,
        names: None,
    }
}

fn centroid_labels(space: Vec<Vec<f32>>, params: KmeansParams) -> ClusterOutput {
    let result = kmeans(&space, params);
    info!(
        clusters = result.centroids.len(),
        inertia = result.inertia,
        restarts = params.n_init,
        "K-means clustering done"
    );

    ClusterOutput {
        probabilities: vec![1.0; result.labels.len()],
        labels: result.labels,
        space: Some(space),
        relative_validity: None,
        secondary: None,
        names: None,
    }
}

// ---------------------------------------------------------------------------
// HybridClusterer
// ---------------------------------------------------------------------------

pub struct HybridClusterer {
    embedder: DualEmbedder,
    lambda_weight: f32,
    reducer: ManifoldReducer,
    partitioner: Partitioner,
}

impl HybridClusterer {
    pub fn new(
        embedder: DualEmbedder,
        lambda_weight: f32,
        reducer: ManifoldReducer,
        partitioner: Partitioner,
    ) -> Self {
        Self {
            embedder,
            lambda_weight,
            reducer,
            partitioner,
        }
    }
}

#[async_trait]
impl Clusterer for HybridClusterer {
    fn strategy(&self) -> ClusteringStrategy {
        ClusteringStrategy::Hybrid
    }

    async fn cluster(&self, posts: &[NormalizedPost]) -> Result<ClusterOutput, DigestError> {
        let dense = self.embedder.dense(posts).await?;
        let sparse = self.embedder.sparse(posts)?;
        let hybrid = fuse(&dense, &sparse, self.lambda_weight)?;
        info!(
            dim = hybrid.first().map_or(0, Vec::len),
            lambda_weight = self.lambda_weight,
            "Hybrid embeddings ready"
        );
        Ok(partition(hybrid, &self.reducer, self.partitioner))
    }
}

// ---------------------------------------------------------------------------
// EmbeddingClusterer
// ---------------------------------------------------------------------------

pub struct EmbeddingClusterer {
    embedder: DualEmbedder,
    reducer: ManifoldReducer,
    partitioner: Partitioner,
}

impl EmbeddingClusterer {
    pub fn new(embedder: DualEmbedder, reducer: ManifoldReducer, partitioner: Partitioner) -> Self {
        Self {
            embedder,
            reducer,
            partitioner,
        }
    }
}

#[async_trait]
impl Clusterer for EmbeddingClusterer {
    fn strategy(&self) -> ClusteringStrategy {
        ClusteringStrategy::Embedding
    }

    async fn cluster(&self, posts: &[NormalizedPost]) -> Result<ClusterOutput, DigestError> {
        let dense = self.embedder.dense(posts).await?;
        Ok(partition(dense, &self.reducer, self.partitioner))
    }
}

// ---------------------------------------------------------------------------
// RuleBasedClusterer
// ---------------------------------------------------------------------------

pub struct RuleBasedClusterer {
    min_topic_size: usize,
    max_secondary: usize,
}

impl RuleBasedClusterer {
    pub fn new(min_topic_size: usize, max_secondary: usize) -> Self {
        Self {
            min_topic_size,
            max_secondary,
        }
    }
}

#[async_trait]
impl Clusterer for RuleBasedClusterer {
    fn strategy(&self) -> ClusteringStrategy {
        ClusteringStrategy::RuleBased
    }

    async fn cluster(&self, posts: &[NormalizedPost]) -> Result<ClusterOutput, DigestError> {
        let topics = assign_topics(posts, self.min_topic_size, self.max_secondary);
        info!(topics = topics.names.len(), "Topic tagging done");

        let probabilities = topics
            .labels
            .iter()
            .map(|&l| if l == NOISE { 0.0 } else { 1.0 })
            .collect();

        Ok(ClusterOutput {
            labels: topics.labels,
            probabilities,
            space: None,
            relative_validity: None,
            secondary: Some(topics.secondary),
            names: Some(topics.names),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::normalize::normalize_post;
    use crate::testing::{axis, post, FixedEmbedder};
    use digest_common::ReductionConfig;

    fn blob_corpus() -> Vec<NormalizedPost> {
        let mut posts = Vec::new();
        for i in 0..12 {
            posts.push(normalize_post(post(&format!("b{i}"), &format!("bitcoin halving update {i}"))));
        }
        for i in 0..12 {
            posts.push(normalize_post(post(&format!("t{i}"), &format!("telescope galaxy survey {i}"))));
        }
        posts
    }

    fn blob_embedder() -> Arc<dyn TextEmbedder> {
        Arc::new(
            FixedEmbedder::new()
                .on_topic("bitcoin", axis(64, 0))
                .on_topic("telescope", axis(64, 1)),
        )
    }

    fn raw_space_config(strategy: ClusteringStrategy) -> PipelineConfig {
        PipelineConfig {
            strategy,
            reduction: ReductionConfig {
                n_components: 0,
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[test]
    fn build_clusterer_honors_strategy() {
        for strategy in [
            ClusteringStrategy::Hybrid,
            ClusteringStrategy::Embedding,
            ClusteringStrategy::RuleBased,
        ] {
            let clusterer = build_clusterer(&raw_space_config(strategy), blob_embedder());
            assert_eq!(clusterer.strategy(), strategy);
        }
    }

    #[tokio::test]
    async fn embedding_clusterer_separates_topics() {
        let clusterer =
            build_clusterer(&raw_space_config(ClusteringStrategy::Embedding), blob_embedder());
        let posts = blob_corpus();
        let output = clusterer.cluster(&posts).await.unwrap();

        assert_eq!(output.labels.len(), posts.len());
        assert!(output.labels.iter().all(|&l| l != NOISE));
        assert!(output.labels[..12].iter().all(|&l| l == output.labels[0]));
        assert!(output.labels[12..].iter().all(|&l| l == output.labels[12]));
        assert_ne!(output.labels[0], output.labels[12]);
        assert_eq!(output.space.as_ref().map(|s| s[0].len()), Some(64));
    }

    #[tokio::test]
    async fn embedding_kmeans_splits_fifteen_and_ten() {
        let mut config = raw_space_config(ClusteringStrategy::Embedding);
        config.algorithm = ClusterAlgorithm::Kmeans;
        config.kmeans.n_clusters = 2;
        let clusterer = build_clusterer(&config, blob_embedder());

        let mut posts = Vec::new();
        for i in 0..15 {
            posts.push(normalize_post(post(&format!("b{i}"), &format!("bitcoin halving update {i}"))));
        }
        for i in 0..10 {
            posts.push(normalize_post(post(&format!("t{i}"), &format!("telescope galaxy survey {i}"))));
        }
        let output = clusterer.cluster(&posts).await.unwrap();

        assert_eq!(output.labels[..15], [0; 15]);
        assert_eq!(output.labels[15..], [1; 10]);
        assert!(output.probabilities.iter().all(|&p| p == 1.0));
        assert_eq!(output.relative_validity, None);
        assert_eq!(output.space.as_ref().map(|s| s.len()), Some(25));
    }

    #[tokio::test]
    async fn hybrid_space_is_dense_plus_sparse() {
        let clusterer =
            build_clusterer(&raw_space_config(ClusteringStrategy::Hybrid), blob_embedder());
        let posts = blob_corpus();
        let output = clusterer.cluster(&posts).await.unwrap();

        let space = output.space.unwrap();
        assert!(space[0].len() > 64);
        assert!(space.iter().all(|row| row.len() == space[0].len()));
        assert!(output.names.is_none());
    }

    #[tokio::test]
    async fn rule_based_clusterer_names_topics() {
        let clusterer =
            build_clusterer(&raw_space_config(ClusteringStrategy::RuleBased), blob_embedder());
        let posts = blob_corpus();
        let output = clusterer.cluster(&posts).await.unwrap();

        // only the bitcoin posts match a topic table; the rest fall to general
        let names = output.names.unwrap();
        assert_eq!(names.values().cloned().collect::<Vec<_>>(), vec!["crypto", "general"]);
        assert!(output.space.is_none());
        assert!(output.probabilities.iter().all(|&p| p == 1.0));
    }

    #[tokio::test]
    async fn embedding_failure_surfaces_as_error() {
        let clusterer = build_clusterer(
            &raw_space_config(ClusteringStrategy::Hybrid),
            Arc::new(FixedEmbedder::failing()),
        );
        let err = clusterer.cluster(&blob_corpus()).await.unwrap_err();
        assert!(matches!(err, DigestError::Embedding(_)));
    }
}
