//! Cluster keywords, entities and human-readable labels.
//!
//! Keywords come from class-based TF-IDF: every cluster's members are joined
//! into one document and the documents are vectorized against each other, so
//! a term scores high when it is frequent in one cluster and rare elsewhere.

use std::collections::{BTreeMap, HashMap, HashSet};

use tracing::warn;

use digest_common::{LabelingConfig, NormalizedPost, NOISE};

use crate::stopwords;
use crate::tfidf::{DocFrequency, TfidfParams, TfidfVectorizer};

pub type Keywords = Vec<(String, f64)>;
pub type Entities = Vec<(String, usize)>;

fn members_by_cluster<'a>(
    posts: &'a [NormalizedPost],
    labels: &[i32],
) -> BTreeMap<i32, Vec<&'a NormalizedPost>> {
    let mut clusters: BTreeMap<i32, Vec<&NormalizedPost>> = BTreeMap::new();
    for (post, &label) in posts.iter().zip(labels) {
        if label != NOISE {
            clusters.entry(label).or_default().push(post);
        }
    }
    clusters
}

/// Top c-TF-IDF terms per cluster, highest score first, zero scores dropped.
pub fn cluster_keywords(
    posts: &[NormalizedPost],
    labels: &[i32],
    config: &LabelingConfig,
) -> BTreeMap<i32, Keywords> {
    let clusters = members_by_cluster(posts, labels);
    if clusters.is_empty() {
        return BTreeMap::new();
    }

    let cluster_ids: Vec<i32> = clusters.keys().copied().collect();
    let docs: Vec<String> = clusters
        .values()
        .map(|members| {
            members
                .iter()
                .map(|p| p.clean_text.as_str())
                .collect::<Vec<_>>()
                .join(" ")
        })
        .collect();

    let params = TfidfParams {
        ngram_max: 2,
        min_df: DocFrequency::Count(1),
        max_df: DocFrequency::Fraction(1.0),
        max_features: Some(config.max_features),
    };
    let mut vectorizer = TfidfVectorizer::new(params, &stopwords::KEYWORD);
    let rows = match vectorizer.fit_transform(&docs) {
        Ok(rows) => rows,
        Err(e) => {
            warn!(error = %e, "Keyword extraction found no usable terms");
            return cluster_ids.into_iter().map(|id| (id, Vec::new())).collect();
        }
    };

    let vocabulary = vectorizer.vocabulary();
    cluster_ids
        .into_iter()
        .zip(rows)
        .map(|(id, row)| {
            let mut scored: Vec<(String, f64)> = row
                .iter()
                .enumerate()
                .filter(|(_, &score)| score > 0.0)
                .map(|(j, &score)| (vocabulary[j].clone(), score as f64))
                .collect();
            scored.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
            scored.truncate(config.top_keywords);
            (id, scored)
        })
        .collect()
}

/// Entities ranked by how many member posts mention them.
pub fn cluster_entities(
    posts: &[NormalizedPost],
    labels: &[i32],
    top_n: usize,
) -> BTreeMap<i32, Entities> {
    members_by_cluster(posts, labels)
        .into_iter()
        .map(|(id, members)| {
            let mut counts: HashMap<&str, usize> = HashMap::new();
            for post in members {
                for entity in &post.entities {
                    *counts.entry(entity.as_str()).or_insert(0) += 1;
                }
            }
            let mut ranked: Entities = counts
                .into_iter()
                .map(|(e, c)| (e.to_string(), c))
                .collect();
            ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
            ranked.truncate(top_n);
            (id, ranked)
        })
        .collect()
}

fn word_set(phrase: &str) -> HashSet<String> {
    phrase.to_lowercase().split_whitespace().map(str::to_string).collect()
}

/// Shared words over the larger word count.
fn word_overlap(a: &HashSet<String>, b: &HashSet<String>) -> f64 {
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    a.intersection(b).count() as f64 / a.len().max(b.len()) as f64
}

/// Maximal marginal relevance over keyword candidates: the first pick is the
/// most relevant, later picks trade relevance against word overlap with what
/// is already chosen. Never repeats a candidate, never exceeds `top_k`.
pub fn mmr_select(candidates: &[(String, f64)], lambda: f64, top_k: usize) -> Keywords {
    let mut remaining: Vec<(&(String, f64), HashSet<String>)> =
        candidates.iter().map(|c| (c, word_set(&c.0))).collect();
    let mut chosen: Vec<(&(String, f64), HashSet<String>)> = Vec::new();

    while chosen.len() < top_k && !remaining.is_empty() {
        let mut best_idx = 0;
        let mut best_score = f64::NEG_INFINITY;

        for (idx, (candidate, words)) in remaining.iter().enumerate() {
            let score = if chosen.is_empty() {
                candidate.1
            } else {
                let max_sim = chosen
                    .iter()
                    .map(|(_, picked)| word_overlap(words, picked))
                    .fold(0.0f64, f64::max);
                lambda * candidate.1 - (1.0 - lambda) * max_sim
            };
            if score > best_score {
                best_score = score;
                best_idx = idx;
            }
        }

        chosen.push(remaining.remove(best_idx));
    }

    chosen.into_iter().map(|(c, _)| c.clone()).collect()
}

/// `"{entity}: {phrase}"` when one entity dominates, else up to three
/// phrases joined by `" / "`, else `cluster_{id}`.
pub fn make_label(
    cluster_id: i32,
    cluster_size: usize,
    keywords: &[(String, f64)],
    entities: &[(String, usize)],
    config: &LabelingConfig,
) -> String {
    let diverse = mmr_select(keywords, config.mmr_lambda, config.mmr_top_k);

    let strong_entity = entities.first().and_then(|(entity, count)| {
        (cluster_size > 0 && *count as f64 / cluster_size as f64 > config.strong_entity_share)
            .then_some(entity.as_str())
    });

    match (strong_entity, diverse.first()) {
        (Some(entity), Some((phrase, _))) => format!("{entity}: {phrase}"),
        (None, Some(_)) => diverse
            .iter()
            .take(3)
            .map(|(phrase, _)| phrase.as_str())
            .collect::<Vec<_>>()
            .join(" / "),
        _ => format!("cluster_{cluster_id}"),
    }
}
