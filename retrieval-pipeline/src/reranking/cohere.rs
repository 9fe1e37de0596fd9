use async_trait::async_trait;
use common::error::AppError;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use super::RerankCapability;

const COHERE_RERANK_URL: &str = "https://api.cohere.com/v2/rerank";

#[derive(Serialize)]
struct RerankRequest<'a> {
    model: &'a str,
    query: &'a str,
    documents: &'a [String],
    top_n: usize,
}

#[derive(Deserialize)]
struct RerankResponse {
    results: Vec<RerankHit>,
}

#[derive(Deserialize)]
struct RerankHit {
    index: usize,
    relevance_score: f32,
}

/// Hosted reranking through the Cohere HTTP API.
pub struct CohereReranker {
    http: Client,
    api_key: String,
    model: String,
    endpoint: String,
}

impl CohereReranker {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self::with_endpoint(api_key, model, COHERE_RERANK_URL)
    }

    pub fn with_endpoint(
        api_key: impl Into<String>,
        model: impl Into<String>,
        endpoint: impl Into<String>,
    ) -> Self {
        Self {
            http: Client::new(),
            api_key: api_key.into(),
            model: model.into(),
            endpoint: endpoint.into(),
        }
    }
}

#[async_trait]
impl RerankCapability for CohereReranker {
    fn name(&self) -> &'static str {
        "cohere"
    }

    async fn score(&self, query: &str, documents: Vec<String>) -> Result<Vec<f32>, AppError> {
        if documents.is_empty() {
            return Ok(Vec::new());
        }

        let body = RerankRequest {
            model: &self.model,
            query,
            documents: &documents,
            top_n: documents.len(),
        };

        let response: RerankResponse = self
            .http
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        let mut scores = vec![None; documents.len()];
        for hit in response.results {
            if let Some(slot) = scores.get_mut(hit.index) {
                *slot = Some(hit.relevance_score);
            }
        }
        scores
            .into_iter()
            .collect::<Option<Vec<f32>>>()
            .ok_or_else(|| AppError::RerankUnavailable("cohere omitted some documents".into()))
    }
}
