//! End-to-end clustering scenarios with a deterministic embedder.
//!
//! Runs that must produce an exact partition cluster in the raw hybrid space
//! (`reduction.n_components = 0`); the reduced-space run only checks
//! invariants.

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::Utc;

use digest_cluster::quality::quality_pass;
use digest_cluster::testing::{axis, post, post_by, FixedEmbedder, TEST_EMBEDDING_DIM};
use digest_cluster::vector::normalized;
use digest_cluster::{build_output, run_settings, ClusteringPipeline, ClusteringRun};
use digest_common::{
    ClusterAlgorithm, ClusteringStrategy, PipelineConfig, Post, ReductionConfig, NOISE,
};

fn raw_space_config() -> PipelineConfig {
    PipelineConfig {
        reduction: ReductionConfig {
            n_components: 0,
            ..Default::default()
        },
        ..Default::default()
    }
}

fn topic_embedder() -> FixedEmbedder {
    FixedEmbedder::new()
        .on_topic("bitcoin", axis(TEST_EMBEDDING_DIM, 0))
        .on_topic("telescope", axis(TEST_EMBEDDING_DIM, 1))
}

fn blob_posts(bitcoin: usize, telescope: usize) -> Vec<Post> {
    let mut posts = Vec::new();
    for i in 0..bitcoin {
        posts.push(post_by(
            &format!("b{i}"),
            &format!("coinfan{i}"),
            &format!("bitcoin halving miners {i}"),
            (i as u64 + 1) * 100,
        ));
    }
    for i in 0..telescope {
        posts.push(post_by(
            &format!("t{i}"),
            &format!("stargazer{i}"),
            &format!("telescope galaxy nebula {i}"),
            (i as u64 + 1) * 50,
        ));
    }
    posts
}

async fn run_with(config: PipelineConfig, embedder: FixedEmbedder, posts: Vec<Post>) -> ClusteringRun {
    ClusteringPipeline::from_config(config, Arc::new(embedder))
        .unwrap()
        .run(posts)
        .await
        .unwrap()
}

/// `with_centroids` is false only for strategies without a vector space.
fn assert_assignment_invariants(run: &ClusteringRun, with_centroids: bool) {
    assert_eq!(run.assignments.len(), run.corpus.len());
    let cluster_ids: BTreeSet<i32> = run.clusters.iter().map(|c| c.id).collect();
    for assignment in &run.assignments {
        let p = assignment.primary_label;
        if p != NOISE {
            assert!(cluster_ids.contains(&p), "label {p} has no cluster");
            if with_centroids {
                assert!(run.centroids.contains_key(&p), "label {p} has no centroid");
            }
        }
        assert!((0.0..=1.0).contains(&assignment.membership_confidence));
        assert!(assignment.secondary_labels.len() <= 2);
        assert!(!assignment.secondary_labels.contains(&p));
        if assignment.is_noise() {
            assert!(assignment.secondary_labels.is_empty());
        }
    }
    let expected = run.noise_posts() as f64 / run.total_posts() as f64;
    assert!((run.quality.noise_fraction - expected).abs() < 1e-12);
}

#[tokio::test]
async fn two_tight_blobs_form_two_clean_clusters() {
    let mut config = raw_space_config();
    config.hdbscan.min_cluster_size = 10;
    let run = run_with(config, topic_embedder(), blob_posts(15, 10)).await;

    assert_eq!(run.clusters.len(), 2);
    assert_eq!(run.noise_posts(), 0);
    let sizes: BTreeSet<usize> = run.clusters.iter().map(|c| c.size()).collect();
    assert_eq!(sizes, BTreeSet::from([10, 15]));

    let silhouette = run.quality.silhouette.unwrap();
    assert!(silhouette > 0.5, "silhouette {silhouette}");

    // members of each blob share one primary label
    let first = run.assignments[0].primary_label;
    assert!(run.assignments[..15].iter().all(|a| a.primary_label == first));
    assert!(run.assignments[15..].iter().all(|a| a.primary_label != first));

    assert_eq!(run.centroids.len(), 2);
    assert_assignment_invariants(&run, true);
}

#[tokio::test]
async fn far_outlier_is_noise_and_excluded_everywhere() {
    let away = normalized(
        axis(TEST_EMBEDDING_DIM, 0)
            .iter()
            .zip(axis(TEST_EMBEDDING_DIM, 1))
            .map(|(a, b)| -(a + b))
            .collect(),
    );
    let embedder = topic_embedder().on_topic("volcano", away);

    let mut posts = blob_posts(12, 12);
    posts.push(post_by("odd", "loner", "volcano eruption footage", 9_000));
    let outlier = posts.len() - 1;

    let run = run_with(raw_space_config(), embedder, posts).await;

    assert!(run.assignments[outlier].is_noise());
    assert!(run.assignments[outlier].secondary_labels.is_empty());
    assert!(!run.centroids.contains_key(&NOISE));
    assert!(run.clusters.iter().all(|c| !c.members.contains(&outlier)));
    assert_eq!(
        run.centroids.keys().copied().collect::<Vec<_>>(),
        run.clusters.iter().map(|c| c.id).collect::<Vec<_>>()
    );

    let config = PipelineConfig::default();
    let output = build_output(&run, run_settings(&config), &config.output, Utc::now());
    let summarized: usize = output.manifest.clusters.iter().map(|c| c.size).sum();
    assert_eq!(summarized, run.clustered_posts());
    assert!(output
        .manifest
        .clusters
        .iter()
        .all(|c| c.representative_post.as_ref().map(|p| p.id.as_str()) != Some("odd")));
    assert_eq!(output.manifest.viral_highlights[0].id, "odd");
    assert_assignment_invariants(&run, true);
}

#[tokio::test]
async fn duplicates_and_retweets_are_dropped_before_clustering() {
    let mut posts = blob_posts(12, 12);
    posts.push(post("b0", "bitcoin halving miners duplicate"));
    let mut retweet = post("rt1", "RT telescope galaxy nebula");
    retweet.is_retweet = true;
    posts.push(retweet);

    let run = run_with(raw_space_config(), topic_embedder(), posts).await;

    assert_eq!(run.total_posts(), 24);
    let b0: Vec<_> = run.corpus.iter().filter(|p| p.post.id == "b0").collect();
    assert_eq!(b0.len(), 1);
    assert_eq!(b0[0].post.text, "bitcoin halving miners 0");
    assert!(run.corpus.iter().all(|p| !p.post.is_retweet));
}

#[tokio::test]
async fn quality_verdict_matches_the_gate() {
    let run = run_with(raw_space_config(), topic_embedder(), blob_posts(12, 12)).await;
    let gate = PipelineConfig::default().quality;

    assert_eq!(
        run.quality.quality_pass,
        quality_pass(
            run.quality.relative_validity,
            run.quality.silhouette,
            run.quality.noise_fraction,
            &gate
        )
    );
    assert_eq!(run.quality.cluster_count, run.clusters.len());
}

#[tokio::test]
async fn reduced_space_run_keeps_invariants() {
    let mut config = PipelineConfig::default();
    config.reduction.n_neighbors = 10;
    config.reduction.n_epochs = 100;
    let run = run_with(config, topic_embedder(), blob_posts(15, 15)).await;

    assert_assignment_invariants(&run, true);
    for (id, centroid) in &run.centroids {
        assert_eq!(centroid.len(), 10, "centroid {id} lives in the reduced space");
    }
    for cluster in &run.clusters {
        assert!(!cluster.label.is_empty());
        assert!(cluster.keywords.len() <= 10);
    }
}

#[tokio::test]
async fn rule_based_run_uses_topic_names() {
    let mut posts = Vec::new();
    for i in 0..8 {
        posts.push(post(&format!("c{i}"), &format!("bitcoin wallet drained {i}")));
    }
    for i in 0..8 {
        posts.push(post(&format!("a{i}"), &format!("new gpt benchmark {i}")));
    }
    for i in 0..4 {
        posts.push(post(&format!("s{i}"), &format!("nasa rover photo {i}")));
    }

    let config = PipelineConfig {
        strategy: ClusteringStrategy::RuleBased,
        ..Default::default()
    };
    let run = run_with(config.clone(), FixedEmbedder::failing(), posts).await;

    let labels: Vec<&str> = run.clusters.iter().map(|c| c.label.as_str()).collect();
    assert_eq!(labels, vec!["ai", "crypto"]);
    // science has only four posts
    assert_eq!(run.noise_posts(), 4);
    assert!(run.centroids.is_empty());
    assert_eq!(run.quality.silhouette, None);
    assert_assignment_invariants(&run, false);

    let output = build_output(&run, run_settings(&config), &config.output, Utc::now());
    assert_eq!(output.manifest.config.strategy, "rule-based");
    assert_eq!(output.manifest.clusters[0].bundle_file, "cluster_00_ai.txt");
}

#[tokio::test]
async fn manifest_serializes_with_expected_fields() {
    let run = run_with(raw_space_config(), topic_embedder(), blob_posts(12, 12)).await;
    let config = raw_space_config();
    let output = build_output(&run, run_settings(&config), &config.output, Utc::now());
    let value = serde_json::to_value(&output.manifest).unwrap();

    assert_eq!(value["total_posts"], 24);
    assert_eq!(value["config"]["manifold_dims"], 0);
    assert_eq!(value["config"]["seed"], 42);
    assert!(value["window"]["earliest"].is_string());
    assert!(value["clusters"].as_array().unwrap().len() == run.clusters.len());
    assert!(value["quality"].get("quality_pass").is_some());
}

const SUFFIXES: &[&str] = &[
    "alpha", "bravo", "charlie", "delta", "echo", "foxtrot", "golf", "hotel", "india", "juliet",
    "kilo", "lima",
];

/// Ten posts about one launch, `naming` of which credit OpenAI by name, and
/// twelve telescope posts that also say "gpt5" and "launch", just never
/// side by side.
fn launch_corpus(naming: usize) -> Vec<Post> {
    let mut posts = Vec::new();
    for (i, word) in SUFFIXES.iter().take(10).enumerate() {
        let text = if i < naming {
            format!("OpenAI confirms gpt5 launch {word}")
        } else {
            format!("watching gpt5 launch {word}")
        };
        posts.push(post(&format!("g{i}"), &text));
    }
    for (i, word) in SUFFIXES.iter().enumerate() {
        posts.push(post(
            &format!("t{i}"),
            &format!("telescope crew gpt5 demo rocket launch {word}"),
        ));
    }
    posts
}

async fn launch_cluster_label(naming: usize) -> String {
    // "telescope" is registered first so the telescope posts ignore "gpt5"
    let embedder = FixedEmbedder::new()
        .on_topic("telescope", axis(TEST_EMBEDDING_DIM, 1))
        .on_topic("gpt5", axis(TEST_EMBEDDING_DIM, 0));
    let config = PipelineConfig {
        strategy: ClusteringStrategy::Embedding,
        ..raw_space_config()
    };
    let run = run_with(config, embedder, launch_corpus(naming)).await;

    assert_eq!(run.clusters.len(), 2);
    assert_eq!(run.noise_posts(), 0);
    let launch = run.clusters.iter().find(|c| c.members.contains(&0)).unwrap();
    assert_eq!(launch.members, (0..10).collect::<Vec<_>>());
    assert_eq!(launch.keywords[0].0, "gpt5 launch");
    launch.label.clone()
}

#[tokio::test]
async fn dominant_entity_leads_the_cluster_label() {
    assert_eq!(launch_cluster_label(4).await, "OpenAI: gpt5 launch");
}

#[tokio::test]
async fn entity_at_exactly_thirty_percent_does_not_lead() {
    let label = launch_cluster_label(3).await;
    assert!(label.starts_with("gpt5 launch / "), "label {label}");
    assert!(!label.contains("OpenAI"), "label {label}");
}

#[tokio::test]
async fn kmeans_run_assigns_every_post() {
    let mut config = PipelineConfig {
        strategy: ClusteringStrategy::Embedding,
        algorithm: ClusterAlgorithm::Kmeans,
        ..raw_space_config()
    };
    config.kmeans.n_clusters = 2;
    let run = run_with(config.clone(), topic_embedder(), blob_posts(15, 10)).await;

    assert_eq!(run.noise_posts(), 0);
    let sizes: BTreeSet<usize> = run.clusters.iter().map(|c| c.size()).collect();
    assert_eq!(sizes, BTreeSet::from([10, 15]));
    assert_eq!(run.quality.relative_validity, None);
    assert!(run.quality.silhouette.unwrap() > 0.5);
    assert!(run.assignments.iter().all(|a| a.membership_confidence == 1.0));
    assert_assignment_invariants(&run, true);

    let output = build_output(&run, run_settings(&config), &config.output, Utc::now());
    assert_eq!(output.manifest.config.algorithm, "kmeans");
    assert_eq!(output.manifest.config.n_clusters, Some(2));
}
