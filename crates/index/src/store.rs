//! Storage contract the analyzer writes through.

use async_trait::async_trait;

use newsflow_core::{Category, EnrichedArticle};

use crate::error::IndexError;

/// Bulk storage for categories and enriched articles.
///
/// Both operations are upsert-by-id: category ids are content-addressed and
/// article ids come from the scraper, so re-writing the same input is
/// idempotent. Implementations report the ids of the documents that were
/// stored, in input order; per-document failures are logged and skipped
/// rather than failing the call.
#[async_trait]
pub trait ArticleStore: Send + Sync {
    async fn store_categories(&self, categories: &[Category]) -> Result<Vec<String>, IndexError>;

    async fn store_articles(&self, articles: &[EnrichedArticle]) -> Result<Vec<String>, IndexError>;
}
