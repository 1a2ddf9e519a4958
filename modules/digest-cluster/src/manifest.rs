//! Summarization bundles and the run manifest.
//!
//! Each cluster becomes one plain-text bundle: a short header with
//! instructions for the summarizer, then the cluster's most-liked posts.
//! Notable noise posts and viral highlights get bundles of their own.

use std::collections::BTreeMap;
use std::sync::LazyLock;

use chrono::{DateTime, Utc};
use regex::Regex;

use digest_common::{
    ClusterAlgorithm, ClusterSummary, EngagementTier, Manifest, OutputConfig, PipelineConfig, Post,
    RepresentativePost, RunSettings, ViralHighlight, NOISE,
};

use crate::pipeline::{ClusterDetail, ClusteringRun};

pub const NOISE_BUNDLE_FILE: &str = "cluster_noise_uncategorized.txt";
pub const VIRAL_BUNDLE_FILE: &str = "viral_highlights.txt";
pub const MANIFEST_FILE: &str = "manifest.json";

const REPRESENTATIVE_EXCERPT_CHARS: usize = 100;
const HIGHLIGHT_EXCERPT_CHARS: usize = 200;
const SAFE_LABEL_MAX_CHARS: usize = 40;

static UNSAFE_LABEL_CHARS: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[^\w\s-]").unwrap());

/// A named text file destined for the output directory.
#[derive(Debug, Clone, PartialEq)]
pub struct Bundle {
    pub file_name: String,
    pub contents: String,
}

/// Everything a run writes: the manifest plus its bundles.
#[derive(Debug, Clone)]
pub struct DigestOutput {
    pub manifest: Manifest,
    pub bundles: Vec<Bundle>,
}

/// `1234567` -> `1,234,567`.
pub fn format_thousands(n: u64) -> String {
    let digits = n.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(ch);
    }
    out
}

/// First `max_chars` characters with newlines flattened to spaces.
pub fn excerpt(text: &str, max_chars: usize) -> String {
    text.chars()
        .take(max_chars)
        .map(|c| if c == '\n' || c == '\r' { ' ' } else { c })
        .collect()
}

/// Label reduced to word characters, spaces and hyphens, spaces turned into
/// underscores, capped at 40 characters.
pub fn safe_label(label: &str) -> String {
    UNSAFE_LABEL_CHARS
        .replace_all(label, "")
        .replace(' ', "_")
        .chars()
        .take(SAFE_LABEL_MAX_CHARS)
        .collect()
}

pub fn bundle_file_name(cluster_id: i32, label: &str) -> String {
    format!("cluster_{cluster_id:02}_{}.txt", safe_label(label))
}

/// Posts ordered by likes, most liked first; ties keep corpus order.
pub fn by_likes<'a>(posts: impl IntoIterator<Item = &'a Post>) -> Vec<&'a Post> {
    let mut posts: Vec<&Post> = posts.into_iter().collect();
    posts.sort_by(|a, b| b.likes().cmp(&a.likes()));
    posts
}

fn push_entries(lines: &mut Vec<String>, posts: &[&Post], excerpt_chars: usize) {
    for (i, post) in posts.iter().enumerate() {
        lines.push(format!(
            "[{}] @{} ({} likes)",
            i + 1,
            post.author.handle,
            format_thousands(post.likes())
        ));
        lines.push(format!("ID: {}", post.id));
        lines.push(format!("Text: {}", excerpt(&post.text, excerpt_chars)));
        lines.push(String::new());
    }
}

/// Summarization bundle for one cluster (or the noise pseudo-cluster).
pub fn format_cluster_bundle(
    cluster_id: i32,
    label: &str,
    posts: &[&Post],
    excerpt_chars: usize,
) -> String {
    let mut lines = vec![
        format!("# Cluster {cluster_id}: {label}"),
        format!("# Post count: {}", posts.len()),
        String::new(),
        "Summarize the key narratives, stories, and sentiment in these posts.".to_string(),
        "Include specific examples with @handles and post IDs for sourcing.".to_string(),
        "Focus on: What's happening? Why does it matter? What's the sentiment?".to_string(),
        String::new(),
        "---".to_string(),
        String::new(),
    ];
    push_entries(&mut lines, posts, excerpt_chars);
    lines.join("\n")
}

pub fn format_viral_bundle(posts: &[&Post], excerpt_chars: usize) -> String {
    let mut lines = vec![
        "# Viral Highlights".to_string(),
        "# High-engagement posts that didn't fit into topic clusters".to_string(),
        format!("# Post count: {}", posts.len()),
        String::new(),
        "These are standalone viral posts: unique content that resonated but doesn't".to_string(),
        "belong to a trending topic or narrative. Worth including in the digest.".to_string(),
        String::new(),
        "---".to_string(),
        String::new(),
    ];
    push_entries(&mut lines, posts, excerpt_chars);
    lines.join("\n")
}

/// Run parameters as echoed into the manifest.
pub fn run_settings(config: &PipelineConfig) -> RunSettings {
    RunSettings {
        strategy: config.strategy.to_string(),
        algorithm: config.algorithm.to_string(),
        n_clusters: (config.algorithm == ClusterAlgorithm::Kmeans)
            .then_some(config.kmeans.n_clusters),
        model: config.embedding.model.clone(),
        lambda_weight: config.hybrid.lambda_weight,
        min_cluster_size: config.hdbscan.min_cluster_size,
        min_samples: config.hdbscan.min_samples,
        cluster_selection: config.hdbscan.selection.to_string(),
        manifold_dims: config.reduction.n_components,
        soft_assignment: config.soft_assignment.enabled,
        seed: config.reduction.seed,
    }
}

fn summarize_cluster(
    run: &ClusteringRun,
    detail: &ClusterDetail,
    config: &OutputConfig,
) -> (ClusterSummary, Bundle) {
    let ranked = by_likes(detail.members.iter().map(|&i| &run.corpus[i].post));
    let prioritized: Vec<&Post> = ranked.iter().take(config.max_per_cluster).copied().collect();

    let mut engagement: BTreeMap<EngagementTier, usize> = BTreeMap::new();
    for post in &ranked {
        *engagement.entry(post.engagement_tier()).or_insert(0) += 1;
    }

    let representative_post = ranked.first().map(|post| RepresentativePost {
        author: post.author.handle.clone(),
        id: post.id.clone(),
        likes: post.likes(),
        text: excerpt(&post.text, REPRESENTATIVE_EXCERPT_CHARS),
    });

    let file_name = bundle_file_name(detail.id, &detail.label);
    let bundle = Bundle {
        contents: format_cluster_bundle(detail.id, &detail.label, &prioritized, config.excerpt_chars),
        file_name: file_name.clone(),
    };

    let summary = ClusterSummary {
        id: detail.id,
        label: detail.label.clone(),
        size: detail.size(),
        prioritized_count: prioritized.len(),
        bundle_file: file_name,
        top_keywords: detail.keywords.clone(),
        top_entities: detail.entities.clone(),
        engagement,
        representative_post,
        secondary_members: detail.secondary_members,
    };
    (summary, bundle)
}

/// Lay out the manifest and every bundle for a finished run.
pub fn build_output(
    run: &ClusteringRun,
    settings: RunSettings,
    config: &OutputConfig,
    generated_at: DateTime<Utc>,
) -> DigestOutput {
    let mut bundles = Vec::new();
    let mut clusters = Vec::with_capacity(run.clusters.len());
    for detail in &run.clusters {
        let (summary, bundle) = summarize_cluster(run, detail, config);
        clusters.push(summary);
        bundles.push(bundle);
    }

    let noise = by_likes(run.noise_members().into_iter().map(|i| &run.corpus[i].post));

    let notable: Vec<&Post> = noise
        .iter()
        .filter(|p| p.likes() >= config.noise_min_likes)
        .take(config.noise_max_posts)
        .copied()
        .collect();
    let noise_bundle_file = (!notable.is_empty()).then(|| {
        bundles.push(Bundle {
            file_name: NOISE_BUNDLE_FILE.to_string(),
            contents: format_cluster_bundle(
                NOISE,
                "uncategorized (noise)",
                &notable,
                config.excerpt_chars,
            ),
        });
        NOISE_BUNDLE_FILE.to_string()
    });

    let viral: Vec<&Post> = noise
        .iter()
        .filter(|p| p.likes() >= config.viral_min_likes)
        .take(config.viral_max_posts)
        .copied()
        .collect();
    let viral_highlights_file = (!viral.is_empty()).then(|| {
        bundles.push(Bundle {
            file_name: VIRAL_BUNDLE_FILE.to_string(),
            contents: format_viral_bundle(&viral, config.excerpt_chars),
        });
        VIRAL_BUNDLE_FILE.to_string()
    });
    let viral_highlights = viral
        .iter()
        .map(|post| ViralHighlight {
            author: post.author.handle.clone(),
            id: post.id.clone(),
            likes: post.likes(),
            text: excerpt(&post.text, HIGHLIGHT_EXCERPT_CHARS),
        })
        .collect();

    let manifest = Manifest {
        total_posts: run.total_posts(),
        clustered_posts: run.clustered_posts(),
        noise_posts: run.noise_posts(),
        cluster_count: run.clusters.len(),
        generated_at,
        window: run.window.clone(),
        config: settings,
        quality: run.quality.clone(),
        clusters,
        noise_bundle_file,
        viral_highlights,
        viral_highlights_file,
    };

    DigestOutput { manifest, bundles }
}
