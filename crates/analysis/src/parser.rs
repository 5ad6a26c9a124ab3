//! Parse loosely-typed scraped documents into [`ScrapedArticle`]s.
//!
//! A payload that violates the schema is logged with its content and dropped
//! from the batch; a bad document never aborts the batch it arrived in.

use chrono::{DateTime, NaiveDateTime, TimeZone, Timelike, Utc};
use serde_json::Value;
use tracing::error;

use newsflow_core::{ScrapedArticle, ScrapedArticleMetadata};

/// Map a scraped payload to a validated article, or reject it.
///
/// `components.article` is a sequence of fragment records, each carrying at
/// most one recognized key. A document should only contain one title and one
/// paragraphs fragment, but repeats accumulate just in case.
pub fn parse(payload: &Value) -> Option<ScrapedArticle> {
    let Some(id) = payload.get("id").and_then(Value::as_str) else {
        error!(payload = %payload, "no 'id' in doc, skipping analysis");
        return None;
    };
    let Some(url) = payload.get("url").and_then(Value::as_str) else {
        error!(payload = %payload, "no 'url' in doc, skipping analysis");
        return None;
    };

    let metadata = parse_metadata(payload.get("metadata"));

    let Some(components) = payload.get("components") else {
        error!(payload = %payload, "no 'components' in doc, skipping analysis");
        return None;
    };
    let Some(fragments) = components.get("article") else {
        error!(payload = %payload, "'components.article' not found in doc, skipping analysis");
        return None;
    };
    let Some(fragments) = fragments.as_array() else {
        error!(payload = %payload, "'components.article' is not an array, skipping analysis");
        return None;
    };

    let mut titles = Vec::new();
    let mut paragraphs = Vec::new();
    let mut authors = Vec::new();
    let mut publish_date = None;
    let mut image = None;

    for fragment in fragments {
        if let Some(title) = fragment.get("title") {
            if let Some(title) = title.as_str() {
                titles.push(title.to_string());
            }
        } else if let Some(paras) = fragment.get("paragraphs") {
            let Some(paras) = paras.as_array() else {
                error!(payload = %payload, "'components.article.paragraphs' is not an array, skipping analysis");
                return None;
            };
            for para in paras {
                let Some(para) = para.as_str() else {
                    error!(payload = %payload, "'components.article.paragraphs' contains a non-string, skipping analysis");
                    return None;
                };
                paragraphs.push(para.to_string());
            }
        } else if let Some(author) = fragment.get("author") {
            match author {
                Value::Array(entries) => authors.extend(
                    entries
                        .iter()
                        .filter_map(Value::as_str)
                        .map(str::to_string),
                ),
                Value::String(author) => authors.push(author.clone()),
                _ => {}
            }
        } else if let Some(date) = fragment.get("publish_date") {
            // last occurrence wins
            match date.as_str().and_then(parse_publish_date) {
                Some(date) => publish_date = Some(date),
                None => {
                    error!(payload = %payload, "'publish_date' is not a valid timestamp, skipping analysis");
                    return None;
                }
            }
        } else if let Some(img) = fragment.get("image") {
            if let Some(img) = img.as_str() {
                image = Some(img.to_string());
            }
        }
        // unrecognized fragment keys are ignored
    }

    if publish_date.is_none() {
        error!(payload = %payload, "'publish_date' not found in doc, skipping analysis");
        return None;
    }
    if titles.is_empty() {
        error!(payload = %payload, "'title' not found in doc, skipping analysis");
        return None;
    }
    if paragraphs.is_empty() {
        error!(payload = %payload, "'paragraphs' not found in doc, skipping analysis");
        return None;
    }

    Some(ScrapedArticle {
        id: id.to_string(),
        url: url.to_string(),
        metadata,
        publish_date: publish_date.unwrap(),
        image,
        author: authors,
        title: titles,
        paragraphs,
    })
}

/// Metadata is optional; category strings are carried through unchanged —
/// normalization happens when the analyzer builds the catalog.
fn parse_metadata(metadata: Option<&Value>) -> ScrapedArticleMetadata {
    let Some(metadata) = metadata else {
        return ScrapedArticleMetadata::default();
    };
    ScrapedArticleMetadata {
        source: metadata
            .get("source")
            .and_then(Value::as_str)
            .map(str::to_string),
        categories: metadata
            .get("categories")
            .and_then(Value::as_array)
            .map(|cats| {
                cats.iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default(),
    }
}

/// Parse an ISO-8601 timestamp and truncate it to minute precision.
fn parse_publish_date(raw: &str) -> Option<DateTime<Utc>> {
    let parsed = DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .or_else(|_| {
            raw.parse::<NaiveDateTime>()
                .map(|naive| Utc.from_utc_datetime(&naive))
        })
        .ok()?;
    parsed.with_second(0)?.with_nanosecond(0)
}
