//! Multi-label category classifier collaborator.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::error::AnalysisError;

/// Trait for classifier backends.
#[async_trait]
pub trait Classifier: Send + Sync {
    /// Predict category labels for a batch of texts. The output has one
    /// label list per input text, in order; inner lists may be empty.
    async fn predict_batch(&self, texts: &[&str]) -> Result<Vec<Vec<String>>, AnalysisError>;
}

/// HTTP-served classifier model.
pub struct HttpClassifier {
    client: Client,
    base_url: String,
}

impl HttpClassifier {
    pub fn new(base_url: String) -> Self {
        Self {
            client: Client::builder()
                .timeout(std::time::Duration::from_secs(120))
                .build()
                .unwrap_or_else(|_| Client::new()),
            base_url,
        }
    }
}

#[derive(Serialize)]
struct PredictRequest<'a> {
    texts: &'a [&'a str],
}

#[derive(Deserialize)]
struct PredictResponse {
    labels: Vec<Vec<String>>,
}

#[async_trait]
impl Classifier for HttpClassifier {
    async fn predict_batch(&self, texts: &[&str]) -> Result<Vec<Vec<String>>, AnalysisError> {
        let response = self
            .client
            .post(format!("{}/predict", self.base_url))
            .json(&PredictRequest { texts })
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(AnalysisError::Api(format!("{status}: {body}")));
        }

        let resp: PredictResponse = response.json().await?;
        if resp.labels.len() != texts.len() {
            return Err(AnalysisError::Api(format!(
                "classifier returned {} label lists for {} texts",
                resp.labels.len(),
                texts.len()
            )));
        }
        Ok(resp.labels)
    }
}
