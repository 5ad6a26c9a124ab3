//! Elasticsearch-backed article store.
//!
//! Documents stream into the index through `_bulk` requests with
//! upsert-by-id semantics; per-document success is reported in order by the
//! bulk response. Index mappings are asserted on construction.

use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use reqwest::{Certificate, Client, StatusCode};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, error, info};

use newsflow_core::config::ElasticConfig;
use newsflow_core::{Category, EnrichedArticle};

use crate::error::IndexError;
use crate::store::ArticleStore;

const ARTICLES_INDEX: &str = "articles";
const CATEGORIES_INDEX: &str = "categories";

pub struct ElasticWriter {
    client: Client,
    base_url: String,
    user: String,
    password: String,
}

impl ElasticWriter {
    /// Connect to the search index and assert both indices. An index that
    /// already exists is fine; any other failure is fatal to startup.
    pub async fn connect(config: &ElasticConfig, dimensions: usize) -> Result<Self, IndexError> {
        let mut builder = Client::builder().timeout(std::time::Duration::from_secs(120));
        if let Some(ca_path) = &config.ca_path {
            let pem = std::fs::read(ca_path)?;
            builder = builder.add_root_certificate(Certificate::from_pem(&pem)?);
        }
        if config.tls_insecure {
            builder = builder.danger_accept_invalid_certs(true);
        }

        info!(conn = %config.conn, "connecting to Elasticsearch");
        let writer = Self {
            client: builder.build()?,
            base_url: config.conn.trim_end_matches('/').to_string(),
            user: config.user.clone(),
            password: config.password.clone(),
        };
        writer
            .assert_index(CATEGORIES_INDEX, categories_mapping())
            .await?;
        writer
            .assert_index(ARTICLES_INDEX, articles_mapping(dimensions))
            .await?;
        Ok(writer)
    }

    async fn assert_index(&self, index: &str, mappings: Value) -> Result<(), IndexError> {
        info!(index, "creating/asserting index");
        let response = self
            .client
            .put(format!("{}/{}", self.base_url, index))
            .basic_auth(&self.user, Some(&self.password))
            .json(&json!({ "mappings": mappings }))
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        let body = response.text().await.unwrap_or_default();
        if status == StatusCode::BAD_REQUEST && body.contains("resource_already_exists_exception") {
            info!(index, "index already exists");
            return Ok(());
        }
        Err(IndexError::Api {
            status: status.as_u16(),
            body,
        })
    }

    /// Send one `_bulk` request and collect the ids of the documents the
    /// index accepted, in input order. Item failures are logged and skipped;
    /// a call-wide failure is returned to the caller.
    async fn bulk(&self, index: &str, operations: &[(String, Value)]) -> Result<Vec<String>, IndexError> {
        if operations.is_empty() {
            return Ok(Vec::new());
        }

        let response = self
            .client
            .post(format!("{}/_bulk", self.base_url))
            .basic_auth(&self.user, Some(&self.password))
            .header(CONTENT_TYPE, "application/x-ndjson")
            .body(build_bulk_body(index, operations))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(IndexError::Api {
                status: status.as_u16(),
                body: response.text().await.unwrap_or_default(),
            });
        }

        let reply: BulkResponse = response.json().await?;
        Ok(collect_stored_ids(index, reply))
    }
}

#[async_trait]
impl ArticleStore for ElasticWriter {
    async fn store_categories(&self, categories: &[Category]) -> Result<Vec<String>, IndexError> {
        info!(count = categories.len(), index = CATEGORIES_INDEX, "attempting to insert categories");
        let operations: Vec<(String, Value)> = categories
            .iter()
            .map(|cat| (cat.id.clone(), category_doc(cat)))
            .collect();
        self.bulk(CATEGORIES_INDEX, &operations).await
    }

    async fn store_articles(&self, articles: &[EnrichedArticle]) -> Result<Vec<String>, IndexError> {
        info!(count = articles.len(), index = ARTICLES_INDEX, "attempting to insert articles");
        let operations: Vec<(String, Value)> = articles
            .iter()
            .map(|article| (article.id.clone(), article_doc(article)))
            .collect();
        self.bulk(ARTICLES_INDEX, &operations).await
    }
}

/// NDJSON body for a `_bulk` call: one `index` action line per document,
/// followed by the document source.
fn build_bulk_body(index: &str, operations: &[(String, Value)]) -> String {
    let mut body = String::new();
    for (id, doc) in operations {
        body.push_str(&json!({ "index": { "_index": index, "_id": id } }).to_string());
        body.push('\n');
        body.push_str(&doc.to_string());
        body.push('\n');
    }
    body
}

#[derive(Debug, Deserialize)]
struct BulkResponse {
    errors: bool,
    items: Vec<BulkItem>,
}

#[derive(Debug, Deserialize)]
struct BulkItem {
    index: BulkItemStatus,
}

#[derive(Debug, Deserialize)]
struct BulkItemStatus {
    #[serde(rename = "_id")]
    id: String,
    status: u16,
    error: Option<Value>,
}

fn collect_stored_ids(index: &str, reply: BulkResponse) -> Vec<String> {
    if reply.errors {
        debug!(index, "bulk reply reports item-level errors");
    }
    let mut ids = Vec::with_capacity(reply.items.len());
    for item in reply.items {
        if item.index.status < 300 {
            ids.push(item.index.id);
        } else {
            error!(
                index,
                id = %item.index.id,
                status = item.index.status,
                error = %item.index.error.unwrap_or(serde_json::Value::Null),
                "failed to bulk store document"
            );
        }
    }
    ids
}

fn category_doc(category: &Category) -> Value {
    json!({ "name": category.name })
}

fn article_doc(article: &EnrichedArticle) -> Value {
    json!({
        "analyze_time": article.analyze_time.to_rfc3339(),
        "analyzer": {
            "category_ids": article.analyzed_categories.iter().map(|c| c.id.as_str()).collect::<Vec<_>>(),
            "embeddings": article.embeddings,
        },
        "article": {
            "id": article.id,
            "url": article.url,
            "source": article.source,
            "publish_date": article.publish_date.to_rfc3339(),
            "image": article.image,
            "author": article.author,
            "title": article.title,
            "paragraphs": article.paragraphs,
            "categories": {
                "ids": article.categories.iter().map(|c| c.id.as_str()).collect::<Vec<_>>(),
                "names": article.categories.iter().map(|c| c.name.as_str()).collect::<Vec<_>>(),
            },
        },
    })
}

fn categories_mapping() -> Value {
    json!({
        "properties": {
            "name": { "type": "text" }
        }
    })
}

fn articles_mapping(dimensions: usize) -> Value {
    json!({
        "properties": {
            "analyze_time": { "type": "date" },
            "analyzer": {
                "properties": {
                    // kept unindexed: only there to tell predicted categories
                    // apart from the merged set
                    "category_ids": { "type": "keyword", "index": false },
                    "embeddings": { "type": "dense_vector", "dims": dimensions }
                }
            },
            "article": {
                "properties": {
                    "id": { "type": "keyword" },
                    "url": { "type": "keyword" },
                    "source": {
                        "type": "text",
                        // keyword mapping needed so we can do aggregations
                        "fields": { "keyword": { "type": "keyword", "ignore_above": 256 } }
                    },
                    "publish_date": { "type": "date" },
                    "image": { "type": "keyword", "index": false },
                    "author": { "type": "text" },
                    "title": { "type": "text" },
                    "paragraphs": { "type": "text" },
                    "categories": {
                        "properties": {
                            "ids": { "type": "keyword" },
                            "names": {
                                "type": "text",
                                "fields": { "keyword": { "type": "keyword", "ignore_above": 256 } }
                            }
                        }
                    }
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn article() -> EnrichedArticle {
        let sports = Category::new("sports");
        let politics = Category::new("politics");
        EnrichedArticle {
            id: "A".into(),
            url: "http://x/1".into(),
            source: Some("x".into()),
            publish_date: Utc.with_ymd_and_hms(2024, 3, 10, 12, 34, 0).unwrap(),
            image: None,
            author: vec!["jane doe".into()],
            title: vec!["T".into()],
            paragraphs: vec!["p1".into(), "p2".into()],
            analyze_time: Utc.with_ymd_and_hms(2024, 3, 10, 13, 0, 0).unwrap(),
            categories: vec![politics.clone(), sports.clone()],
            analyzed_categories: vec![politics.clone()],
            embeddings: vec![0.1, 0.2, 0.3, 0.4],
        }
    }

    #[test]
    fn test_article_doc_shape() {
        let doc = article_doc(&article());
        assert_eq!(doc["article"]["id"], "A");
        assert_eq!(doc["article"]["publish_date"], "2024-03-10T12:34:00+00:00");
        assert_eq!(doc["article"]["categories"]["ids"].as_array().unwrap().len(), 2);
        assert_eq!(doc["analyzer"]["category_ids"].as_array().unwrap().len(), 1);
        assert_eq!(
            doc["analyzer"]["category_ids"][0],
            "4c5fd84e89eda6074c7fed6fce2c6c199d4e2eb8"
        );
        assert_eq!(doc["analyzer"]["embeddings"].as_array().unwrap().len(), 4);
        // topics are added later by other jobs, never here
        assert!(doc.get("topics").is_none());
    }

    #[test]
    fn test_category_doc_shape() {
        let doc = category_doc(&Category::new(" Sports "));
        assert_eq!(doc, json!({ "name": "sports" }));
    }

    #[test]
    fn test_build_bulk_body() {
        let operations = vec![
            ("id1".to_string(), json!({ "name": "sports" })),
            ("id2".to_string(), json!({ "name": "politics" })),
        ];
        let body = build_bulk_body("categories", &operations);
        let lines: Vec<&str> = body.lines().collect();
        assert_eq!(lines.len(), 4);
        assert_eq!(
            serde_json::from_str::<Value>(lines[0]).unwrap(),
            json!({ "index": { "_index": "categories", "_id": "id1" } })
        );
        assert_eq!(
            serde_json::from_str::<Value>(lines[3]).unwrap(),
            json!({ "name": "politics" })
        );
        assert!(body.ends_with('\n'));
    }

    #[test]
    fn test_collect_stored_ids_skips_failures() {
        let reply: BulkResponse = serde_json::from_str(
            r#"{
                "took": 3,
                "errors": true,
                "items": [
                    { "index": { "_id": "a", "status": 201 } },
                    { "index": { "_id": "b", "status": 400,
                        "error": { "type": "mapper_parsing_exception", "reason": "bad field" } } },
                    { "index": { "_id": "c", "status": 200 } }
                ]
            }"#,
        )
        .unwrap();
        assert_eq!(collect_stored_ids("articles", reply), vec!["a", "c"]);
    }

    #[test]
    fn test_articles_mapping_carries_vector_width() {
        let mapping = articles_mapping(384);
        assert_eq!(
            mapping["properties"]["analyzer"]["properties"]["embeddings"]["dims"],
            384
        );
    }
}
