use std::collections::BTreeMap;

use chrono::{DateTime, FixedOffset, Utc};
use serde::{Deserialize, Deserializer, Serialize};

/// Label carried by posts that belong to no cluster.
pub const NOISE: i32 = -1;

/// Timestamp format used by the timeline export (`Wed Oct 10 20:19:24 +0000 2018`).
pub const TIMELINE_DATE_FORMAT: &str = "%a %b %d %H:%M:%S %z %Y";

// --- Posts ---

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Author {
    #[serde(default)]
    pub name: String,
    #[serde(default, alias = "screen_name")]
    pub handle: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Metrics {
    #[serde(default, deserialize_with = "de_count")]
    pub likes: u64,
    #[serde(default, deserialize_with = "de_count")]
    pub retweets: u64,
    #[serde(default, deserialize_with = "de_count")]
    pub replies: u64,
    #[serde(default, deserialize_with = "de_opt_count")]
    pub views: Option<u64>,
}

/// A short social-media post as exported from the timeline fetcher.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Post {
    #[serde(default, deserialize_with = "de_id")]
    pub id: String,
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default, alias = "user")]
    pub author: Author,
    #[serde(default)]
    pub metrics: Metrics,
    #[serde(default)]
    pub is_retweet: bool,
    #[serde(default)]
    pub is_quote: bool,
}

impl Post {
    pub fn likes(&self) -> u64 {
        self.metrics.likes
    }

    pub fn engagement_tier(&self) -> EngagementTier {
        EngagementTier::from_likes(self.metrics.likes)
    }

    /// Parse `created_at`, accepting the timeline format or RFC 3339.
    pub fn created_at_parsed(&self) -> Option<DateTime<FixedOffset>> {
        let raw = self.created_at.as_deref()?.trim();
        DateTime::parse_from_str(raw, TIMELINE_DATE_FORMAT)
            .or_else(|_| DateTime::parse_from_rfc3339(raw))
            .ok()
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawScalar {
    Int(u64),
    Float(f64),
    Str(String),
}

fn de_id<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    Ok(match Option::<RawScalar>::deserialize(deserializer)? {
        Some(RawScalar::Int(n)) => n.to_string(),
        Some(RawScalar::Float(f)) => format!("{f}"),
        Some(RawScalar::Str(s)) => s,
        None => String::new(),
    })
}

fn scalar_to_count(raw: RawScalar) -> Option<u64> {
    match raw {
        RawScalar::Int(n) => Some(n),
        RawScalar::Float(f) if f.is_finite() && f >= 0.0 => Some(f as u64),
        RawScalar::Float(_) => None,
        RawScalar::Str(s) => s.trim().replace(',', "").parse().ok(),
    }
}

fn de_count<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u64, D::Error> {
    Ok(Option::<RawScalar>::deserialize(deserializer)?
        .and_then(scalar_to_count)
        .unwrap_or(0))
}

fn de_opt_count<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<u64>, D::Error> {
    Ok(Option::<RawScalar>::deserialize(deserializer)?.and_then(scalar_to_count))
}

// --- Engagement ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EngagementTier {
    Viral,
    High,
    Medium,
    Low,
}

impl EngagementTier {
    pub fn from_likes(likes: u64) -> Self {
        match likes {
            l if l >= 50_000 => EngagementTier::Viral,
            l if l >= 10_000 => EngagementTier::High,
            l if l >= 1_000 => EngagementTier::Medium,
            _ => EngagementTier::Low,
        }
    }
}

impl std::fmt::Display for EngagementTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngagementTier::Viral => write!(f, "viral"),
            EngagementTier::High => write!(f, "high"),
            EngagementTier::Medium => write!(f, "medium"),
            EngagementTier::Low => write!(f, "low"),
        }
    }
}

// --- Normalized corpus ---

/// A post plus the features extracted by the normalizer. Built once per run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NormalizedPost {
    pub post: Post,
    pub clean_text: String,
    pub hashtags: Vec<String>,
    pub cashtags: Vec<String>,
    pub mentions: Vec<String>,
    /// Unique entity candidates, sorted.
    pub entities: Vec<String>,
}

// --- Cluster results ---

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterAssignment {
    pub primary_label: i32,
    pub membership_confidence: f32,
    pub secondary_labels: Vec<i32>,
}

impl ClusterAssignment {
    pub fn noise() -> Self {
        Self {
            primary_label: NOISE,
            membership_confidence: 0.0,
            secondary_labels: Vec::new(),
        }
    }

    pub fn is_noise(&self) -> bool {
        self.primary_label == NOISE
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RepresentativePost {
    pub author: String,
    pub id: String,
    pub likes: u64,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterSummary {
    pub id: i32,
    pub label: String,
    pub size: usize,
    pub prioritized_count: usize,
    pub bundle_file: String,
    pub top_keywords: Vec<(String, f64)>,
    pub top_entities: Vec<(String, usize)>,
    pub engagement: BTreeMap<EngagementTier, usize>,
    pub representative_post: Option<RepresentativePost>,
    /// Posts outside this cluster that list it as a secondary membership.
    pub secondary_members: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityMetrics {
    pub relative_validity: Option<f64>,
    pub silhouette: Option<f64>,
    pub noise_fraction: f64,
    pub noise_count: usize,
    pub cluster_count: usize,
    pub quality_pass: bool,
}

// --- Manifest ---

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeWindow {
    pub earliest: DateTime<FixedOffset>,
    pub latest: DateTime<FixedOffset>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ViralHighlight {
    pub author: String,
    pub id: String,
    pub likes: u64,
    pub text: String,
}

/// Run parameters echoed into the manifest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSettings {
    pub strategy: String,
    pub algorithm: String,
    /// Set only for k-means runs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub n_clusters: Option<usize>,
    pub model: String,
    pub lambda_weight: f32,
    pub min_cluster_size: usize,
    pub min_samples: usize,
    pub cluster_selection: String,
    pub manifold_dims: usize,
    pub soft_assignment: bool,
    pub seed: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    pub total_posts: usize,
    pub clustered_posts: usize,
    pub noise_posts: usize,
    pub cluster_count: usize,
    pub generated_at: DateTime<Utc>,
    pub window: Option<TimeWindow>,
    pub config: RunSettings,
    pub quality: QualityMetrics,
    pub clusters: Vec<ClusterSummary>,
    pub noise_bundle_file: Option<String>,
    pub viral_highlights: Vec<ViralHighlight>,
    pub viral_highlights_file: Option<String>,
}
