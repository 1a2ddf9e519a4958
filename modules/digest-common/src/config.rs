use std::env;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::error::DigestError;

/// Which clustering variant a run uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ClusteringStrategy {
    #[default]
    Hybrid,
    Embedding,
    RuleBased,
}

impl std::fmt::Display for ClusteringStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ClusteringStrategy::Hybrid => write!(f, "hybrid"),
            ClusteringStrategy::Embedding => write!(f, "embedding"),
            ClusteringStrategy::RuleBased => write!(f, "rule-based"),
        }
    }
}

/// How a vector-space strategy partitions its clustering space.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClusterAlgorithm {
    /// Density clustering; leaves outliers as noise.
    #[default]
    Hdbscan,
    /// Fixed number of centroids; every post lands in a cluster.
    Kmeans,
}

impl std::fmt::Display for ClusterAlgorithm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ClusterAlgorithm::Hdbscan => write!(f, "hdbscan"),
            ClusterAlgorithm::Kmeans => write!(f, "kmeans"),
        }
    }
}

/// How flat clusters are read off the condensed tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClusterSelection {
    /// Excess of mass: prefer larger, more stable clusters.
    #[default]
    Eom,
    /// Leaves of the condensed tree: more, smaller clusters.
    Leaf,
}

impl std::fmt::Display for ClusterSelection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ClusterSelection::Eom => write!(f, "eom"),
            ClusterSelection::Leaf => write!(f, "leaf"),
        }
    }
}

/// Full pipeline configuration. Every section has defaults, so an empty TOML
/// file (or no file at all) yields the standard run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PipelineConfig {
    pub strategy: ClusteringStrategy,
    /// Ignored by the rule-based strategy.
    pub algorithm: ClusterAlgorithm,
    pub corpus: CorpusConfig,
    pub embedding: EmbeddingConfig,
    pub sparse: SparseConfig,
    pub hybrid: HybridConfig,
    pub reduction: ReductionConfig,
    pub hdbscan: HdbscanConfig,
    pub kmeans: KmeansConfig,
    pub soft_assignment: SoftAssignmentConfig,
    pub labeling: LabelingConfig,
    pub quality: QualityGateConfig,
    pub topics: TopicConfig,
    pub output: OutputConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CorpusConfig {
    pub min_posts: usize,
}

impl Default for CorpusConfig {
    fn default() -> Self {
        Self { min_posts: 20 }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    pub model: String,
    pub batch_size: usize,
    /// Batches in flight at once against the embedding endpoint.
    pub max_concurrent_batches: usize,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            model: "BAAI/bge-small-en-v1.5".to_string(),
            batch_size: 64,
            max_concurrent_batches: 4,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SparseConfig {
    /// Minimum document count for a term.
    pub min_df: usize,
    /// Maximum document fraction for a term.
    pub max_df: f64,
    pub max_features: usize,
}

impl Default for SparseConfig {
    fn default() -> Self {
        Self {
            min_df: 2,
            max_df: 0.8,
            max_features: 5000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HybridConfig {
    /// Weight of the sparse block before fusion.
    pub lambda_weight: f32,
}

impl Default for HybridConfig {
    fn default() -> Self {
        Self { lambda_weight: 0.35 }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReductionConfig {
    /// Target dimensionality; 0 disables reduction.
    pub n_components: usize,
    pub n_neighbors: usize,
    pub min_dist: f32,
    pub n_epochs: usize,
    /// `None` gives a non-reproducible layout.
    pub seed: Option<u64>,
}

impl Default for ReductionConfig {
    fn default() -> Self {
        Self {
            n_components: 10,
            n_neighbors: 15,
            min_dist: 0.0,
            n_epochs: 200,
            seed: Some(42),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HdbscanConfig {
    pub min_cluster_size: usize,
    pub min_samples: usize,
    pub selection: ClusterSelection,
}

impl Default for HdbscanConfig {
    fn default() -> Self {
        Self {
            min_cluster_size: 10,
            min_samples: 5,
            selection: ClusterSelection::Eom,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct KmeansConfig {
    pub n_clusters: usize,
    /// Independent k-means++ starts; the lowest-inertia run wins.
    pub n_init: usize,
    pub max_iter: usize,
    pub seed: Option<u64>,
}

impl Default for KmeansConfig {
    fn default() -> Self {
        Self {
            n_clusters: 20,
            n_init: 10,
            max_iter: 300,
            seed: Some(42),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SoftAssignmentConfig {
    pub enabled: bool,
    pub sim_threshold: f32,
    pub delta_threshold: f32,
    pub max_secondary: usize,
}

impl Default for SoftAssignmentConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            sim_threshold: 0.80,
            delta_threshold: 0.03,
            max_secondary: 2,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LabelingConfig {
    pub top_keywords: usize,
    pub top_entities: usize,
    pub max_features: usize,
    pub mmr_lambda: f64,
    pub mmr_top_k: usize,
    /// Share of member posts the top entity must exceed to lead the label.
    pub strong_entity_share: f64,
}

impl Default for LabelingConfig {
    fn default() -> Self {
        Self {
            top_keywords: 10,
            top_entities: 10,
            max_features: 1000,
            mmr_lambda: 0.5,
            mmr_top_k: 5,
            strong_entity_share: 0.3,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QualityGateConfig {
    pub min_relative_validity: f64,
    pub min_silhouette: f64,
    pub max_noise_fraction: f64,
    /// Silhouette is scored on a seeded sample of this many clustered posts;
    /// 0 scores every post.
    pub silhouette_sample_size: usize,
    pub silhouette_seed: u64,
}

impl Default for QualityGateConfig {
    fn default() -> Self {
        Self {
            min_relative_validity: 0.0,
            min_silhouette: 0.05,
            max_noise_fraction: 0.35,
            silhouette_sample_size: 5000,
            silhouette_seed: 42,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TopicConfig {
    /// Topics with fewer posts than this are folded into noise.
    pub min_topic_size: usize,
}

impl Default for TopicConfig {
    fn default() -> Self {
        Self { min_topic_size: 5 }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    pub max_per_cluster: usize,
    pub excerpt_chars: usize,
    pub noise_min_likes: u64,
    pub noise_max_posts: usize,
    pub viral_min_likes: u64,
    pub viral_max_posts: usize,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            max_per_cluster: 100,
            excerpt_chars: 500,
            noise_min_likes: 1_000,
            noise_max_posts: 50,
            viral_min_likes: 5_000,
            viral_max_posts: 20,
        }
    }
}

impl PipelineConfig {
    /// Reject parameter combinations the engine cannot run with.
    pub fn validate(&self) -> Result<(), DigestError> {
        if self.hybrid.lambda_weight < 0.0 || !self.hybrid.lambda_weight.is_finite() {
            return Err(DigestError::Config(format!(
                "hybrid.lambda_weight must be a non-negative number, got {}",
                self.hybrid.lambda_weight
            )));
        }
        if self.hdbscan.min_cluster_size < 2 {
            return Err(DigestError::Config(format!(
                "hdbscan.min_cluster_size must be at least 2, got {}",
                self.hdbscan.min_cluster_size
            )));
        }
        if self.hdbscan.min_samples == 0 {
            return Err(DigestError::Config(
                "hdbscan.min_samples must be at least 1".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.sparse.max_df) || self.sparse.max_df == 0.0 {
            return Err(DigestError::Config(format!(
                "sparse.max_df must be in (0, 1], got {}",
                self.sparse.max_df
            )));
        }
        if self.embedding.batch_size == 0 {
            return Err(DigestError::Config(
                "embedding.batch_size must be at least 1".to_string(),
            ));
        }
        if self.embedding.max_concurrent_batches == 0 {
            return Err(DigestError::Config(
                "embedding.max_concurrent_batches must be at least 1".to_string(),
            ));
        }
        if self.reduction.n_components > 0 && self.reduction.n_neighbors < 2 {
            return Err(DigestError::Config(format!(
                "reduction.n_neighbors must be at least 2, got {}",
                self.reduction.n_neighbors
            )));
        }
        if self.reduction.n_components > 0 && self.reduction.n_epochs == 0 {
            return Err(DigestError::Config(
                "reduction.n_epochs must be at least 1 when reduction is enabled".to_string(),
            ));
        }
        if self.algorithm == ClusterAlgorithm::Kmeans {
            if self.kmeans.n_clusters == 0 {
                return Err(DigestError::Config(
                    "kmeans.n_clusters must be at least 1".to_string(),
                ));
            }
            if self.kmeans.n_init == 0 || self.kmeans.max_iter == 0 {
                return Err(DigestError::Config(format!(
                    "kmeans.n_init and kmeans.max_iter must be at least 1, got {} and {}",
                    self.kmeans.n_init, self.kmeans.max_iter
                )));
            }
        }
        if self.quality.silhouette_sample_size == 1 {
            return Err(DigestError::Config(
                "quality.silhouette_sample_size must be 0 or at least 2".to_string(),
            ));
        }
        Ok(())
    }
}

/// Load and parse a TOML config file.
pub fn load_config(path: &Path) -> Result<PipelineConfig> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    let config: PipelineConfig = toml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
    Ok(config)
}

/// Embedding endpoint settings. Secrets stay in the environment.
#[derive(Debug, Clone)]
pub struct EmbeddingEnv {
    pub api_url: String,
    pub api_key: Option<String>,
}

impl EmbeddingEnv {
    pub fn from_env() -> Self {
        Self {
            api_url: env::var("EMBEDDING_API_URL")
                .unwrap_or_else(|_| "http://localhost:8080/v1".to_string()),
            api_key: env::var("EMBEDDING_API_KEY").ok().filter(|k| !k.is_empty()),
        }
    }

    /// Log which endpoint is in use without printing the key.
    pub fn log_redacted(&self) {
        tracing::info!(
            api_url = self.api_url.as_str(),
            api_key = if self.api_key.is_some() { "[set]" } else { "[unset]" },
            "Embedding endpoint"
        );
    }
}
