//! TF-IDF vectorizer over unigrams and bigrams.
//!
//! Tokens are lowercase runs of two or more word characters. Stopwords are
//! dropped before n-grams are formed, so bigrams never span a stopword slot.
//! Weights are raw counts times smoothed idf `ln((1 + n) / (1 + df)) + 1`,
//! and every row is L2-normalized.

use std::collections::{HashMap, HashSet};
use std::sync::LazyLock;

use regex::Regex;

use digest_common::DigestError;

static TOKEN_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\b\w\w+\b").unwrap());

/// A document-frequency bound, either absolute or relative to corpus size.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DocFrequency {
    Count(usize),
    Fraction(f64),
}

impl DocFrequency {
    fn resolve(self, n_docs: usize) -> f64 {
        match self {
            DocFrequency::Count(c) => c as f64,
            DocFrequency::Fraction(f) => f * n_docs as f64,
        }
    }
}

#[derive(Debug, Clone)]
pub struct TfidfParams {
    pub ngram_max: usize,
    pub min_df: DocFrequency,
    pub max_df: DocFrequency,
    pub max_features: Option<usize>,
}

impl Default for TfidfParams {
    fn default() -> Self {
        Self {
            ngram_max: 2,
            min_df: DocFrequency::Count(1),
            max_df: DocFrequency::Fraction(1.0),
            max_features: None,
        }
    }
}

pub struct TfidfVectorizer<'a> {
    params: TfidfParams,
    stopwords: &'a HashSet<String>,
    vocabulary: Vec<String>,
    idf: Vec<f64>,
}

impl<'a> TfidfVectorizer<'a> {
    pub fn new(params: TfidfParams, stopwords: &'a HashSet<String>) -> Self {
        Self {
            params,
            stopwords,
            vocabulary: Vec::new(),
            idf: Vec::new(),
        }
    }

    /// Fitted terms in column order (alphabetical).
    pub fn vocabulary(&self) -> &[String] {
        &self.vocabulary
    }

    pub fn dim(&self) -> usize {
        self.vocabulary.len()
    }

    /// Split a document into its n-gram terms.
    pub fn analyze(&self, doc: &str) -> Vec<String> {
        let lowered = doc.to_lowercase();
        let tokens: Vec<&str> = TOKEN_RE
            .find_iter(&lowered)
            .map(|m| m.as_str())
            .filter(|t| !self.stopwords.contains(*t))
            .collect();

        let mut terms = Vec::new();
        for n in 1..=self.params.ngram_max.max(1) {
            if tokens.len() < n {
                break;
            }
            for window in tokens.windows(n) {
                terms.push(window.join(" "));
            }
        }
        terms
    }

    /// Learn the vocabulary and idf from `docs`, returning their weight rows.
    pub fn fit_transform(&mut self, docs: &[String]) -> Result<Vec<Vec<f32>>, DigestError> {
        let n_docs = docs.len();
        let doc_counts: Vec<HashMap<String, u32>> = docs
            .iter()
            .map(|doc| {
                let mut counts = HashMap::new();
                for term in self.analyze(doc) {
                    *counts.entry(term).or_insert(0u32) += 1;
                }
                counts
            })
            .collect();

        let mut df: HashMap<&str, usize> = HashMap::new();
        let mut total_tf: HashMap<&str, u64> = HashMap::new();
        for counts in &doc_counts {
            for (term, count) in counts {
                *df.entry(term.as_str()).or_insert(0) += 1;
                *total_tf.entry(term.as_str()).or_insert(0) += *count as u64;
            }
        }

        if df.is_empty() {
            return Err(DigestError::Vectorizer(
                "empty vocabulary; documents contain only stopwords".to_string(),
            ));
        }

        let max_count = self.params.max_df.resolve(n_docs);
        let min_count = self.params.min_df.resolve(n_docs);
        if max_count < min_count {
            return Err(DigestError::Vectorizer(format!(
                "max_df corresponds to fewer documents ({max_count}) than min_df ({min_count})"
            )));
        }

        let mut kept: Vec<&str> = df
            .iter()
            .filter(|(_, &d)| d as f64 >= min_count && d as f64 <= max_count)
            .map(|(term, _)| *term)
            .collect();

        if let Some(limit) = self.params.max_features {
            if kept.len() > limit {
                kept.sort_by(|a, b| total_tf[b].cmp(&total_tf[a]).then_with(|| a.cmp(b)));
                kept.truncate(limit);
            }
        }

        if kept.is_empty() {
            return Err(DigestError::Vectorizer(format!(
                "after pruning, no terms remain (min_df {min_count}, max_df {max_count}); \
                 try a lower min_df or a higher max_df"
            )));
        }

        kept.sort_unstable();
        self.vocabulary = kept.iter().map(|t| t.to_string()).collect();
        self.idf = kept
            .iter()
            .map(|t| ((1.0 + n_docs as f64) / (1.0 + df[t] as f64)).ln() + 1.0)
            .collect();

        let index: HashMap<&str, usize> = self
            .vocabulary
            .iter()
            .enumerate()
            .map(|(i, t)| (t.as_str(), i))
            .collect();

        let rows = doc_counts
            .iter()
            .map(|counts| {
                let mut row = vec![0.0f64; self.vocabulary.len()];
                for (term, count) in counts {
                    if let Some(&j) = index.get(term.as_str()) {
                        row[j] = *count as f64 * self.idf[j];
                    }
                }
                let norm = row.iter().map(|x| x * x).sum::<f64>().sqrt();
                row.into_iter()
                    .map(|x| if norm > 0.0 { (x / norm) as f32 } else { 0.0 })
                    .collect()
            })
            .collect();

        Ok(rows)
    }
}
