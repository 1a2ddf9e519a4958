use std::path::PathBuf;

use clap::{Parser, ValueEnum};

use digest_common::{ClusterAlgorithm, ClusterSelection, ClusteringStrategy, PipelineConfig};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum StrategyArg {
    Hybrid,
    Embedding,
    RuleBased,
}

impl From<StrategyArg> for ClusteringStrategy {
    fn from(arg: StrategyArg) -> Self {
        match arg {
            StrategyArg::Hybrid => ClusteringStrategy::Hybrid,
            StrategyArg::Embedding => ClusteringStrategy::Embedding,
            StrategyArg::RuleBased => ClusteringStrategy::RuleBased,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum AlgorithmArg {
    /// Density clustering with a noise label
    Hdbscan,
    /// Fixed cluster count, every post assigned
    Kmeans,
}

impl From<AlgorithmArg> for ClusterAlgorithm {
    fn from(arg: AlgorithmArg) -> Self {
        match arg {
            AlgorithmArg::Hdbscan => ClusterAlgorithm::Hdbscan,
            AlgorithmArg::Kmeans => ClusterAlgorithm::Kmeans,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum SelectionArg {
    /// Excess of mass: fewer, larger clusters
    Eom,
    /// Condensed-tree leaves: more, smaller clusters
    Leaf,
}

impl From<SelectionArg> for ClusterSelection {
    fn from(arg: SelectionArg) -> Self {
        match arg {
            SelectionArg::Eom => ClusterSelection::Eom,
            SelectionArg::Leaf => ClusterSelection::Leaf,
        }
    }
}

#[derive(Debug, Parser)]
#[command(
    name = "timeline-digest",
    about = "Cluster a timeline export into topic bundles for summarization"
)]
pub struct Cli {
    /// Input JSON file with posts
    pub input: PathBuf,

    /// Output directory
    #[arg(short, long, default_value = "data/clusters_hybrid")]
    pub output: PathBuf,

    /// Path to a pipeline config TOML file
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Clustering strategy
    #[arg(long, value_enum)]
    pub strategy: Option<StrategyArg>,

    /// Partitioning algorithm for the hybrid and embedding strategies
    #[arg(long, value_enum)]
    pub algorithm: Option<AlgorithmArg>,

    /// Number of clusters for k-means
    #[arg(long)]
    pub n_clusters: Option<usize>,

    /// Dense embedding model
    #[arg(long)]
    pub model: Option<String>,

    /// Weight for sparse embeddings in the hybrid space
    #[arg(long)]
    pub lambda_weight: Option<f32>,

    /// HDBSCAN min_cluster_size
    #[arg(long)]
    pub min_cluster_size: Option<usize>,

    /// HDBSCAN min_samples
    #[arg(long)]
    pub min_samples: Option<usize>,

    /// HDBSCAN cluster selection method
    #[arg(long, value_enum)]
    pub cluster_method: Option<SelectionArg>,

    /// Manifold reduction dimensions (0 to skip)
    #[arg(long)]
    pub umap_dims: Option<usize>,

    /// Skip secondary cluster assignment
    #[arg(long)]
    pub skip_soft_assign: bool,

    /// Seed for the manifold layout
    #[arg(long)]
    pub seed: Option<u64>,

    /// Emit logs as JSON lines
    #[arg(long)]
    pub json_logs: bool,
}

impl Cli {
    /// Layer command-line flags over a file (or default) config.
    pub fn apply_overrides(&self, config: &mut PipelineConfig) {
        if let Some(strategy) = self.strategy {
            config.strategy = strategy.into();
        }
        if let Some(algorithm) = self.algorithm {
            config.algorithm = algorithm.into();
        }
        if let Some(n) = self.n_clusters {
            config.kmeans.n_clusters = n;
        }
        if let Some(model) = &self.model {
            config.embedding.model = model.clone();
        }
        if let Some(lambda) = self.lambda_weight {
            config.hybrid.lambda_weight = lambda;
        }
        if let Some(size) = self.min_cluster_size {
            config.hdbscan.min_cluster_size = size;
        }
        if let Some(samples) = self.min_samples {
            config.hdbscan.min_samples = samples;
        }
        if let Some(method) = self.cluster_method {
            config.hdbscan.selection = method.into();
        }
        if let Some(dims) = self.umap_dims {
            config.reduction.n_components = dims;
        }
        if self.skip_soft_assign {
            config.soft_assignment.enabled = false;
        }
        if let Some(seed) = self.seed {
            config.reduction.seed = Some(seed);
        }
    }
}
