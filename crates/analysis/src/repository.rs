//! Scraper document-store side channel.
//!
//! Some deployments publish only `{id, url, scrape_time}` notifications on
//! the stream; the full scraped documents live in a repository and are
//! fetched by id when the batch is processed.

use std::sync::Arc;

use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use serde_json::Value;
use tracing::{error, info};

use newsflow_stream::BatchProcessor;

use crate::analyzer::Analyzer;
use crate::error::AnalysisError;

/// Trait for scraper document stores.
#[async_trait]
pub trait ScraperRepository: Send + Sync {
    /// Fetch the scraped documents for the given article ids. Unknown ids
    /// are simply absent from the result.
    async fn get_article_batch(&self, ids: &[String]) -> Result<Vec<Value>, AnalysisError>;
}

/// HTTP-backed scraper repository.
pub struct HttpScraperRepository {
    client: Client,
    base_url: String,
}

impl HttpScraperRepository {
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
struct BatchRequest<'a> {
    ids: &'a [String],
}

#[async_trait]
impl ScraperRepository for HttpScraperRepository {
    async fn get_article_batch(&self, ids: &[String]) -> Result<Vec<Value>, AnalysisError> {
        let response = self
            .client
            .post(format!("{}/articles/batch", self.base_url))
            .json(&BatchRequest { ids })
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(AnalysisError::Api(format!("{status}: {body}")));
        }

        Ok(response.json().await?)
    }
}

/// Batch processor for notification-mode deployments: resolves notification
/// payloads to full documents through the repository, then runs the regular
/// enrichment pipeline.
pub struct NotificationProcessor {
    repository: Arc<dyn ScraperRepository>,
    analyzer: Arc<Analyzer>,
}

impl NotificationProcessor {
    pub fn new(repository: Arc<dyn ScraperRepository>, analyzer: Arc<Analyzer>) -> Self {
        Self {
            repository,
            analyzer,
        }
    }
}

#[async_trait]
impl BatchProcessor for NotificationProcessor {
    async fn process_batch(&self, batch: &[Value]) -> anyhow::Result<Vec<String>> {
        let ids: Vec<String> = batch
            .iter()
            .filter_map(|notification| {
                match notification.get("id").and_then(Value::as_str) {
                    Some(id) => Some(id.to_string()),
                    None => {
                        error!(payload = %notification, "notification has no 'id', skipping");
                        None
                    }
                }
            })
            .collect();

        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let documents = self.repository.get_article_batch(&ids).await?;
        info!(requested = ids.len(), fetched = documents.len(), "resolved notification batch");
        self.analyzer.process(&documents).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::Classifier;
    use crate::embedding::Embedder;
    use newsflow_core::{Category, EnrichedArticle};
    use newsflow_index::ArticleStore;
    use serde_json::json;
    use tokio::sync::Mutex;

    struct FakeRepository {
        requests: Mutex<Vec<Vec<String>>>,
        documents: Vec<Value>,
    }

    #[async_trait]
    impl ScraperRepository for FakeRepository {
        async fn get_article_batch(&self, ids: &[String]) -> Result<Vec<Value>, AnalysisError> {
            self.requests.lock().await.push(ids.to_vec());
            Ok(self.documents.clone())
        }
    }

    struct NoLabels;

    #[async_trait]
    impl Classifier for NoLabels {
        async fn predict_batch(&self, texts: &[&str]) -> Result<Vec<Vec<String>>, AnalysisError> {
            Ok(vec![Vec::new(); texts.len()])
        }
    }

    struct ZeroEmbedder;

    #[async_trait]
    impl Embedder for ZeroEmbedder {
        async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, AnalysisError> {
            Ok(vec![vec![0.0; 4]; texts.len()])
        }

        fn dimensions(&self) -> usize {
            4
        }
    }

    #[derive(Default)]
    struct NullStore;

    #[async_trait]
    impl ArticleStore for NullStore {
        async fn store_categories(
            &self,
            categories: &[Category],
        ) -> Result<Vec<String>, newsflow_index::IndexError> {
            Ok(categories.iter().map(|c| c.id.clone()).collect())
        }

        async fn store_articles(
            &self,
            articles: &[EnrichedArticle],
        ) -> Result<Vec<String>, newsflow_index::IndexError> {
            Ok(articles.iter().map(|a| a.id.clone()).collect())
        }
    }

    fn document(id: &str) -> Value {
        json!({
            "id": id,
            "url": format!("http://x/{id}"),
            "components": { "article": [
                { "title": "T" },
                { "paragraphs": ["p"] },
                { "publish_date": "2024-03-10T12:00:00" }
            ]}
        })
    }

    fn processor(documents: Vec<Value>) -> (NotificationProcessor, Arc<FakeRepository>) {
        let repository = Arc::new(FakeRepository {
            requests: Mutex::new(Vec::new()),
            documents,
        });
        let analyzer = Arc::new(Analyzer::new(
            Arc::new(NullStore),
            Arc::new(NoLabels),
            Arc::new(ZeroEmbedder),
        ));
        (
            NotificationProcessor::new(repository.clone(), analyzer),
            repository,
        )
    }

    #[tokio::test]
    async fn test_notifications_resolve_and_process() {
        let (processor, repository) = processor(vec![document("A"), document("B")]);

        let notifications = vec![
            json!({ "id": "A", "url": "http://x/A", "scrape_time": "2024-03-10T12:00:00" }),
            json!({ "id": "B", "url": "http://x/B", "scrape_time": "2024-03-10T12:01:00" }),
        ];
        let ids = processor.process_batch(&notifications).await.unwrap();

        assert_eq!(ids, vec!["A", "B"]);
        assert_eq!(*repository.requests.lock().await, vec![vec!["A", "B"]]);
    }

    #[tokio::test]
    async fn test_notifications_without_id_are_skipped() {
        let (processor, repository) = processor(vec![document("A")]);

        let notifications = vec![
            json!({ "id": "A" }),
            json!({ "url": "http://x/no-id" }),
        ];
        let ids = processor.process_batch(&notifications).await.unwrap();

        assert_eq!(ids, vec!["A"]);
        assert_eq!(*repository.requests.lock().await, vec![vec!["A"]]);
    }

    #[tokio::test]
    async fn test_all_malformed_notifications_short_circuit() {
        let (processor, repository) = processor(vec![]);

        let ids = processor.process_batch(&[json!({}), Value::Null]).await.unwrap();

        assert!(ids.is_empty());
        assert!(repository.requests.lock().await.is_empty());
    }
}
