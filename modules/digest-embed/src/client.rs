use anyhow::{anyhow, Result};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use tracing::debug;

use crate::types::{EmbeddingData, EmbeddingRequest, EmbeddingResponse};

const DEFAULT_API_URL: &str = "https://api.openai.com/v1";

/// Minimal client for any server speaking the OpenAI `/embeddings` protocol
/// (OpenAI itself, text-embeddings-inference, vLLM, Ollama, ...).
#[derive(Clone)]
pub struct EmbeddingClient {
    api_key: Option<String>,
    http: reqwest::Client,
    base_url: String,
}

impl EmbeddingClient {
    pub fn new(api_key: Option<&str>) -> Self {
        Self {
            api_key: api_key.map(str::to_string),
            http: reqwest::Client::new(),
            base_url: DEFAULT_API_URL.to_string(),
        }
    }

    pub fn with_base_url(mut self, url: &str) -> Self {
        self.base_url = url.trim_end_matches('/').to_string();
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn headers(&self) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        if let Some(key) = &self.api_key {
            headers.insert(
                AUTHORIZATION,
                HeaderValue::from_str(&format!("Bearer {key}"))?,
            );
        }
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        Ok(headers)
    }

    /// Embed a batch of texts. The result is in input order and has exactly
    /// one vector per text.
    pub async fn embed_batch(&self, model: &str, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let url = format!("{}/embeddings", self.base_url);
        let request = EmbeddingRequest {
            model,
            input: texts,
        };

        debug!(model, count = texts.len(), "Embedding batch request");

        let response = self
            .http
            .post(&url)
            .headers(self.headers()?)
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await?;
            return Err(anyhow!(
                "Embedding API error ({}): {}",
                status,
                error_text
            ));
        }

        let embed_response: EmbeddingResponse = response.json().await?;
        order_by_index(embed_response.data, texts.len())
    }
}

/// Servers may return `data` out of order; `index` is authoritative when present.
pub(crate) fn order_by_index(data: Vec<EmbeddingData>, expected: usize) -> Result<Vec<Vec<f32>>> {
    if data.len() != expected {
        return Err(anyhow!(
            "Embedding API returned {} vectors for {} inputs",
            data.len(),
            expected
        ));
    }

    if data.iter().all(|d| d.index.is_some()) {
        let mut slots: Vec<Option<Vec<f32>>> = vec![None; expected];
        for item in data {
            let idx = item.index.unwrap_or_default();
            let slot = slots
                .get_mut(idx)
                .ok_or_else(|| anyhow!("Embedding index {idx} out of range"))?;
            if slot.is_some() {
                return Err(anyhow!("Duplicate embedding index {idx}"));
            }
            *slot = Some(item.embedding);
        }
        return slots
            .into_iter()
            .enumerate()
            .map(|(i, v)| v.ok_or_else(|| anyhow!("Missing embedding for input {i}")))
            .collect();
    }

    Ok(data.into_iter().map(|d| d.embedding).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(index: Option<usize>, value: f32) -> EmbeddingData {
        EmbeddingData {
            embedding: vec![value],
            index,
        }
    }

    #[test]
    fn reorders_by_index() {
        let data = vec![item(Some(2), 2.0), item(Some(0), 0.0), item(Some(1), 1.0)];
        let ordered = order_by_index(data, 3).unwrap();
        assert_eq!(ordered, vec![vec![0.0], vec![1.0], vec![2.0]]);
    }

    #[test]
    fn keeps_order_without_indices() {
        let data = vec![item(None, 5.0), item(None, 6.0)];
        let ordered = order_by_index(data, 2).unwrap();
        assert_eq!(ordered, vec![vec![5.0], vec![6.0]]);
    }

    #[test]
    fn count_mismatch_is_error() {
        let data = vec![item(Some(0), 0.0)];
        let err = order_by_index(data, 2).unwrap_err();
        assert!(err.to_string().contains("1 vectors for 2 inputs"));
    }

    #[test]
    fn duplicate_index_is_error() {
        let data = vec![item(Some(0), 0.0), item(Some(0), 1.0)];
        assert!(order_by_index(data, 2).is_err());
    }

    #[test]
    fn response_parses_openai_shape() {
        let body = r#"{"object":"list","data":[{"object":"embedding","index":0,"embedding":[0.1,0.2]}],"model":"m","usage":{"prompt_tokens":2,"total_tokens":2}}"#;
        let parsed: EmbeddingResponse = serde_json::from_str(body).unwrap();
        assert_eq!(parsed.data.len(), 1);
        assert_eq!(parsed.data[0].index, Some(0));
    }

    #[test]
    fn headers_skip_auth_without_key() {
        let client = EmbeddingClient::new(None);
        let headers = client.headers().unwrap();
        assert!(headers.get(AUTHORIZATION).is_none());

        let client = EmbeddingClient::new(Some("sk-test")).with_base_url("http://localhost:8080/v1/");
        let headers = client.headers().unwrap();
        assert_eq!(headers.get(AUTHORIZATION).unwrap(), "Bearer sk-test");
        assert_eq!(client.base_url(), "http://localhost:8080/v1");
    }

    #[tokio::test]
    async fn empty_batch_makes_no_request() {
        let client = EmbeddingClient::new(None).with_base_url("http://127.0.0.1:1");
        let out = client.embed_batch("m", &[]).await.unwrap();
        assert!(out.is_empty());
    }
}
