use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::category::Category;

/// Optional metadata the scraper attaches to an article.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScrapedArticleMetadata {
    pub source: Option<String>,
    /// Free-text category names as the scraper delivered them — normalization
    /// happens when the analyzer builds the category catalog.
    pub categories: Vec<String>,
}

/// A scraped article after validation, in a manageable shape.
///
/// `title`, `paragraphs` and `publish_date` are mandatory; payloads missing
/// any of them never make it past the parser.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScrapedArticle {
    /// Unique per scraped event, assigned by the scraper.
    pub id: String,
    pub url: String,
    pub metadata: ScrapedArticleMetadata,
    /// Minute resolution — seconds and below are truncated at parse time.
    pub publish_date: DateTime<Utc>,
    pub image: Option<String>,
    pub author: Vec<String>,
    pub title: Vec<String>,
    pub paragraphs: Vec<String>,
}

/// An article after analysis: the scraped fields plus classifier labels,
/// the merged category set and a dense embedding vector.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnrichedArticle {
    pub id: String,
    pub url: String,
    pub source: Option<String>,
    pub publish_date: DateTime<Utc>,
    pub image: Option<String>,
    pub author: Vec<String>,
    pub title: Vec<String>,
    pub paragraphs: Vec<String>,

    /// When the owning batch was analyzed (one value per batch).
    pub analyze_time: DateTime<Utc>,
    /// Union of metadata-derived and classifier-predicted categories.
    pub categories: Vec<Category>,
    /// Subset of `categories` contributed by the classifier.
    pub analyzed_categories: Vec<Category>,
    /// Fixed-dimension embedding; the width is a deployment constant.
    pub embeddings: Vec<f32>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_analyzed_categories_are_subset() {
        let sports = Category::new("sports");
        let politics = Category::new("politics");
        let article = EnrichedArticle {
            id: "a1".into(),
            url: "http://example.com/1".into(),
            source: None,
            publish_date: Utc::now(),
            image: None,
            author: vec![],
            title: vec!["t".into()],
            paragraphs: vec!["p".into()],
            analyze_time: Utc::now(),
            categories: vec![sports.clone(), politics.clone()],
            analyzed_categories: vec![politics.clone()],
            embeddings: vec![0.0; 4],
        };
        for cat in &article.analyzed_categories {
            assert!(article.categories.contains(cat));
        }
    }
}
