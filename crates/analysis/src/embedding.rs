//! Text embedding collaborator.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::error::AnalysisError;

/// Trait for embedding backends.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Embed a batch of texts, returning one vector per input text (in order).
    async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, AnalysisError>;

    /// The dimensionality of the output vectors.
    fn dimensions(&self) -> usize;
}

/// HTTP-served embeddings model.
pub struct HttpEmbedder {
    client: Client,
    base_url: String,
    dimensions: usize,
}

impl HttpEmbedder {
    pub fn new(base_url: String, dimensions: usize) -> Self {
        Self {
            client: Client::builder()
                .timeout(std::time::Duration::from_secs(120))
                .build()
                .unwrap_or_else(|_| Client::new()),
            base_url,
            dimensions,
        }
    }
}

#[derive(Serialize)]
struct EncodeRequest<'a> {
    texts: &'a [&'a str],
}

#[derive(Deserialize)]
struct EncodeResponse {
    embeddings: Vec<Vec<f32>>,
}

#[async_trait]
impl Embedder for HttpEmbedder {
    async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, AnalysisError> {
        let response = self
            .client
            .post(format!("{}/encode", self.base_url))
            .json(&EncodeRequest { texts })
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(AnalysisError::Api(format!("{status}: {body}")));
        }

        let resp: EncodeResponse = response.json().await?;
        if resp.embeddings.len() != texts.len() {
            return Err(AnalysisError::Api(format!(
                "embedder returned {} vectors for {} texts",
                resp.embeddings.len(),
                texts.len()
            )));
        }
        for vector in &resp.embeddings {
            if vector.len() != self.dimensions {
                return Err(AnalysisError::DimensionMismatch {
                    expected: self.dimensions,
                    actual: vector.len(),
                });
            }
        }
        Ok(resp.embeddings)
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }
}
