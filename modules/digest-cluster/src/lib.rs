pub mod clusterer;
pub mod embedding;
pub mod hdbscan;
pub mod hybrid;
pub mod kmeans;
pub mod labeling;
pub mod manifest;
pub mod normalize;
pub mod pipeline;
pub mod quality;
pub mod reduce;
pub mod soft_assign;
pub mod stopwords;
#[cfg(any(test, feature = "test-support"))]
pub mod testing;
pub mod tfidf;
pub mod topics;
pub mod vector;

pub use clusterer::{build_clusterer, ClusterOutput, Clusterer, Partitioner};
pub use manifest::{build_output, run_settings, Bundle, DigestOutput};
pub use pipeline::{ClusterDetail, ClusteringPipeline, ClusteringRun};
