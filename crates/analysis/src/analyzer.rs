//! Batch enrichment: parse, classify, embed, reconcile categories, store.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use tracing::{info, warn};

use newsflow_core::category::normalize_name;
use newsflow_core::{Category, EnrichedArticle, ScrapedArticle};
use newsflow_index::ArticleStore;
use newsflow_stream::BatchProcessor;

use crate::classifier::Classifier;
use crate::embedding::Embedder;
use crate::parser;

/// Orchestrates classification and embedding over a batch of scraped
/// payloads and writes the enriched results to the article store.
pub struct Analyzer {
    store: Arc<dyn ArticleStore>,
    classifier: Arc<dyn Classifier>,
    embedder: Arc<dyn Embedder>,
}

impl Analyzer {
    pub fn new(
        store: Arc<dyn ArticleStore>,
        classifier: Arc<dyn Classifier>,
        embedder: Arc<dyn Embedder>,
    ) -> Self {
        Self {
            store,
            classifier,
            embedder,
        }
    }

    /// Enrich and store one batch. Returns the stored article ids in
    /// input-surviving order. Parser rejects are dropped (already logged);
    /// classifier, embedder and call-wide store failures abort the batch so
    /// nothing gets acked upstream.
    pub async fn process(&self, batch: &[Value]) -> anyhow::Result<Vec<String>> {
        let articles: Vec<ScrapedArticle> = batch.iter().filter_map(parser::parse).collect();
        if articles.is_empty() {
            warn!("no text found in documents in scraped batch, skipping batch");
            return Ok(Vec::new());
        }

        let texts: Vec<String> = articles.iter().map(extract_text).collect();
        let text_refs: Vec<&str> = texts.iter().map(String::as_str).collect();

        let labels = self.classifier.predict_batch(&text_refs).await?;
        anyhow::ensure!(
            labels.len() == articles.len(),
            "classifier returned {} label lists for {} articles",
            labels.len(),
            articles.len()
        );

        let embeddings = self.embedder.embed_batch(&text_refs).await?;
        anyhow::ensure!(
            embeddings.len() == articles.len(),
            "embedder returned {} vectors for {} articles",
            embeddings.len(),
            articles.len()
        );

        let (categories, enriched) = build_categories_and_articles(articles, labels, embeddings);

        // categories first so articles never reference a missing id
        let category_ids = self.store.store_categories(&categories).await?;
        info!(stored = category_ids.len(), "stored categories");

        let ids = self.store.store_articles(&enriched).await?;
        info!(stored = ids.len(), batch = enriched.len(), "done storing batch of articles");
        Ok(ids)
    }
}

#[async_trait]
impl BatchProcessor for Analyzer {
    async fn process_batch(&self, batch: &[Value]) -> anyhow::Result<Vec<String>> {
        self.process(batch).await
    }
}

/// Text handed to both collaborators. The title block and the paragraph
/// block are joined without a separator between them; prior deployments
/// embedded exactly this concatenation, so it must not change.
fn extract_text(article: &ScrapedArticle) -> String {
    format!("{}{}", article.title.join("\n"), article.paragraphs.join("\n"))
}

/// Merge metadata and predicted category names through one content-addressed
/// catalog and build the enriched records. One `analyze_time` for the whole
/// batch.
fn build_categories_and_articles(
    articles: Vec<ScrapedArticle>,
    predicted: Vec<Vec<String>>,
    embeddings: Vec<Vec<f32>>,
) -> (Vec<Category>, Vec<EnrichedArticle>) {
    let analyze_time = Utc::now();
    let mut catalog: BTreeMap<String, Category> = BTreeMap::new();
    let mut enriched = Vec::with_capacity(articles.len());

    for ((article, labels), vector) in articles.into_iter().zip(predicted).zip(embeddings) {
        let predicted_names: BTreeSet<String> =
            labels.iter().map(|name| normalize_name(name)).collect();
        let mut all_names: BTreeSet<String> = article
            .metadata
            .categories
            .iter()
            .map(|name| normalize_name(name))
            .collect();
        all_names.extend(predicted_names.iter().cloned());

        for name in &all_names {
            catalog
                .entry(name.clone())
                .or_insert_with(|| Category::new(name));
        }

        let categories: Vec<Category> = all_names.iter().map(|n| catalog[n].clone()).collect();
        let analyzed_categories: Vec<Category> =
            predicted_names.iter().map(|n| catalog[n].clone()).collect();

        enriched.push(EnrichedArticle {
            id: article.id,
            url: article.url,
            source: article.metadata.source,
            publish_date: article.publish_date,
            image: article.image,
            author: article.author,
            title: article.title,
            paragraphs: article.paragraphs,
            analyze_time,
            categories,
            analyzed_categories,
            embeddings: vector,
        });
    }

    (catalog.into_values().collect(), enriched)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AnalysisError;
    use serde_json::json;
    use tokio::sync::Mutex;

    struct FakeClassifier {
        labels: Vec<Vec<String>>,
    }

    #[async_trait]
    impl Classifier for FakeClassifier {
        async fn predict_batch(&self, _texts: &[&str]) -> Result<Vec<Vec<String>>, AnalysisError> {
            Ok(self.labels.clone())
        }
    }

    struct FakeEmbedder {
        dims: usize,
    }

    #[async_trait]
    impl Embedder for FakeEmbedder {
        async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, AnalysisError> {
            Ok((0..texts.len())
                .map(|i| (0..self.dims).map(|d| (i * self.dims + d) as f32 / 10.0).collect())
                .collect())
        }

        fn dimensions(&self) -> usize {
            self.dims
        }
    }

    #[derive(Default)]
    struct FakeStore {
        categories: Mutex<Vec<Vec<Category>>>,
        articles: Mutex<Vec<Vec<EnrichedArticle>>>,
    }

    #[async_trait]
    impl ArticleStore for FakeStore {
        async fn store_categories(
            &self,
            categories: &[Category],
        ) -> Result<Vec<String>, newsflow_index::IndexError> {
            self.categories.lock().await.push(categories.to_vec());
            Ok(categories.iter().map(|c| c.id.clone()).collect())
        }

        async fn store_articles(
            &self,
            articles: &[EnrichedArticle],
        ) -> Result<Vec<String>, newsflow_index::IndexError> {
            assert!(
                !self.categories.lock().await.is_empty(),
                "categories must be written before articles"
            );
            self.articles.lock().await.push(articles.to_vec());
            Ok(articles.iter().map(|a| a.id.clone()).collect())
        }
    }

    fn payload(id: &str) -> Value {
        json!({
            "id": id,
            "url": format!("http://x/{id}"),
            "metadata": { "categories": [" Sports "] },
            "components": { "article": [
                { "title": "T" },
                { "paragraphs": ["p1", "p2"] },
                { "publish_date": "2024-03-10T12:34:56" }
            ]}
        })
    }

    fn analyzer(labels: Vec<Vec<String>>, store: Arc<FakeStore>) -> Analyzer {
        Analyzer::new(
            store,
            Arc::new(FakeClassifier { labels }),
            Arc::new(FakeEmbedder { dims: 4 }),
        )
    }

    #[tokio::test]
    async fn test_single_article_happy_path() {
        let store = Arc::new(FakeStore::default());
        let analyzer = analyzer(vec![vec!["politics".to_string()]], store.clone());

        let ids = analyzer.process(&[payload("A")]).await.unwrap();
        assert_eq!(ids, vec!["A"]);

        let categories = store.categories.lock().await;
        let names: Vec<&str> = categories[0].iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["politics", "sports"]);
        assert_eq!(
            categories[0][0].id,
            "4c5fd84e89eda6074c7fed6fce2c6c199d4e2eb8"
        );
        assert_eq!(
            categories[0][1].id,
            "150a8af76a92892f269dead204d533cbfad5cd7f"
        );

        let articles = store.articles.lock().await;
        let article = &articles[0][0];
        assert_eq!(article.categories.len(), 2);
        assert_eq!(article.analyzed_categories.len(), 1);
        assert_eq!(article.analyzed_categories[0].name, "politics");
        assert_eq!(article.embeddings.len(), 4);
        assert_eq!(
            article.publish_date.to_rfc3339(),
            "2024-03-10T12:34:00+00:00"
        );
        // the predicted set is always inside the merged set
        for cat in &article.analyzed_categories {
            assert!(article.categories.contains(cat));
        }
    }

    #[tokio::test]
    async fn test_parser_reject_amid_valid() {
        let store = Arc::new(FakeStore::default());
        let analyzer = analyzer(vec![vec![], vec![]], store.clone());

        let mut bad = payload("B");
        bad["components"]["article"].as_array_mut().unwrap().remove(2);

        let ids = analyzer
            .process(&[payload("A"), bad, payload("C")])
            .await
            .unwrap();
        // rejects are dropped, survivors keep input order
        assert_eq!(ids, vec!["A", "C"]);
        assert_eq!(store.articles.lock().await[0].len(), 2);
    }

    #[tokio::test]
    async fn test_zero_survivors_is_success_without_store_calls() {
        let store = Arc::new(FakeStore::default());
        let analyzer = analyzer(vec![], store.clone());

        let ids = analyzer.process(&[json!({ "id": "A" }), Value::Null]).await.unwrap();
        assert!(ids.is_empty());
        assert!(store.categories.lock().await.is_empty());
        assert!(store.articles.lock().await.is_empty());
    }

    #[tokio::test]
    async fn test_case_and_whitespace_variants_collapse() {
        let store = Arc::new(FakeStore::default());
        // metadata carries " Sports ", the classifier predicts "SPORTS"
        let analyzer = analyzer(vec![vec!["SPORTS".to_string()]], store.clone());

        analyzer.process(&[payload("A")]).await.unwrap();

        let categories = store.categories.lock().await;
        assert_eq!(categories[0].len(), 1);
        assert_eq!(categories[0][0].name, "sports");

        let articles = store.articles.lock().await;
        assert_eq!(articles[0][0].categories.len(), 1);
        assert_eq!(articles[0][0].analyzed_categories.len(), 1);
    }

    #[tokio::test]
    async fn test_no_metadata_categories_means_analyzed_equals_merged() {
        let store = Arc::new(FakeStore::default());
        let analyzer = analyzer(vec![vec!["world".to_string()]], store.clone());

        let mut p = payload("A");
        p.as_object_mut().unwrap().remove("metadata");
        analyzer.process(&[p]).await.unwrap();

        let articles = store.articles.lock().await;
        let article = &articles[0][0];
        assert_eq!(article.categories, article.analyzed_categories);
    }

    #[tokio::test]
    async fn test_catalog_is_shared_across_the_batch() {
        let store = Arc::new(FakeStore::default());
        let analyzer = analyzer(
            vec![vec!["sports".to_string()], vec!["sports".to_string()]],
            store.clone(),
        );

        analyzer.process(&[payload("A"), payload("B")]).await.unwrap();

        // both articles reference the same minted category, stored once
        let categories = store.categories.lock().await;
        assert_eq!(categories[0].len(), 1);
        let articles = store.articles.lock().await;
        assert_eq!(articles[0][0].categories, articles[0][1].categories);
    }

    #[tokio::test]
    async fn test_classifier_length_mismatch_aborts_batch() {
        let store = Arc::new(FakeStore::default());
        let analyzer = analyzer(vec![], store.clone());

        let err = analyzer.process(&[payload("A")]).await.unwrap_err();
        assert!(err.to_string().contains("classifier returned"));
        assert!(store.articles.lock().await.is_empty());
    }

    #[test]
    fn test_extract_text_has_no_separator_between_blocks() {
        let article = parser::parse(&payload("A")).unwrap();
        assert_eq!(extract_text(&article), "Tp1\np2");
    }
}
