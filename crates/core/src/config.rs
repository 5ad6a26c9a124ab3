use std::env;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Load .env file (silently ignores if missing).
pub fn load_dotenv() {
    dotenvy::dotenv().ok();
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_opt(key: &str) -> Option<String> {
    env::var(key).ok().filter(|s| !s.is_empty())
}

fn env_req(key: &str) -> Result<String, ConfigError> {
    env_opt(key).ok_or_else(|| ConfigError::MissingVar(key.to_string()))
}

fn env_u16(key: &str, default: u16) -> u16 {
    env_opt(key).and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn env_u64(key: &str, default: u64) -> u64 {
    env_opt(key).and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn env_usize(key: &str, default: usize) -> usize {
    env_opt(key).and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn env_bool(key: &str, default: bool) -> bool {
    env_opt(key)
        .map(|v| matches!(v.to_lowercase().as_str(), "1" | "true" | "yes"))
        .unwrap_or(default)
}

// ── Top-level config ──────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub redis: RedisConfig,
    pub batch: BatchConfig,
    pub elastic: ElasticConfig,
    pub analysis: AnalysisConfig,
}

impl Config {
    /// Build config from environment variables (call `load_dotenv()` first).
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            redis: RedisConfig::from_env(),
            batch: BatchConfig::from_env(),
            elastic: ElasticConfig::from_env()?,
            analysis: AnalysisConfig::from_env()?,
        })
    }

    /// Print a redacted summary for startup logs.
    pub fn log_summary(&self) {
        tracing::info!("Config loaded:");
        tracing::info!(
            "  redis:    {}:{}, stream={}, group={}",
            self.redis.host,
            self.redis.port,
            self.redis.stream_name,
            self.redis.consumer_group
        );
        tracing::info!(
            "  batch:    max_size={}, timeout={}ms",
            self.batch.max_size,
            self.batch.timeout_millis
        );
        tracing::info!("  elastic:  {}, user={}", self.elastic.conn, self.elastic.user);
        tracing::info!(
            "  analysis: classifier={}, embeddings={} (dims={}), scraper_repo={}",
            self.analysis.classifier_url,
            self.analysis.embeddings_url,
            self.analysis.embeddings_dimensions,
            self.analysis.scraper_repo_url.as_deref().unwrap_or("(none)")
        );
    }
}

// ── Redis broker ──────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisConfig {
    pub host: String,
    pub port: u16,
    pub stream_name: String,
    pub consumer_group: String,
    /// Minimum pending time before an entry is eligible for takeover.
    pub claim_idle_millis: u64,
    /// Period of takeover attempts.
    pub claim_check_interval_millis: u64,
    /// Upper bound on entries moved per takeover attempt.
    pub claim_max_count: usize,
}

impl RedisConfig {
    fn from_env() -> Self {
        Self {
            host: env_or("REDIS_HOST", "localhost"),
            port: env_u16("REDIS_PORT", 6379),
            stream_name: env_or("REDIS_STREAM_NAME", "scraped_articles"),
            consumer_group: env_or("REDIS_CONSUMER_GROUP", "article_analyzer"),
            claim_idle_millis: env_u64("CLAIM_IDLE_MILLIS", 30_000),
            claim_check_interval_millis: env_u64("CLAIM_CHECK_INTERVAL_MILLIS", 120_000),
            claim_max_count: env_usize("CLAIM_MAX_COUNT", 20),
        }
    }

    pub fn url(&self) -> String {
        format!("redis://{}:{}", self.host, self.port)
    }
}

// ── Batcher ───────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchConfig {
    pub max_size: usize,
    pub timeout_millis: u64,
}

impl BatchConfig {
    fn from_env() -> Self {
        Self {
            max_size: env_usize("MAX_BATCH_SIZE", 300),
            timeout_millis: env_u64("MAX_BATCH_TIMEOUT_MILLIS", 5000),
        }
    }
}

// ── Elasticsearch ─────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ElasticConfig {
    pub conn: String,
    pub user: String,
    pub password: String,
    pub ca_path: Option<String>,
    pub tls_insecure: bool,
}

impl ElasticConfig {
    fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            conn: env_or("ELASTIC_HOST", "https://localhost:9200"),
            user: env_or("ELASTIC_USER", "elastic"),
            password: env_req("ELASTIC_PASSWORD")?,
            ca_path: env_opt("ELASTIC_CA_PATH"),
            tls_insecure: env_bool("ELASTIC_TLS_INSECURE", false),
        })
    }
}

// ── Analysis collaborators ────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisConfig {
    /// Base URL of the category classifier service.
    pub classifier_url: String,
    /// Base URL of the embeddings service.
    pub embeddings_url: String,
    /// Width of the embedding vectors the deployment produces.
    pub embeddings_dimensions: usize,
    /// When set, stream payloads are treated as scrape notifications and the
    /// full documents are fetched from this repository by id.
    pub scraper_repo_url: Option<String>,
}

impl AnalysisConfig {
    fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            classifier_url: env_req("CLASSIFIER_URL")?,
            embeddings_url: env_req("EMBEDDINGS_URL")?,
            embeddings_dimensions: env_usize("EMBEDDINGS_DIMENSIONS", 384),
            scraper_repo_url: env_opt("SCRAPER_REPO_URL"),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_env_or_default() {
        assert_eq!(env_or("NEWSFLOW_TEST_UNSET_A", "fallback"), "fallback");
    }

    #[test]
    fn test_env_opt_filters_empty() {
        env::set_var("NEWSFLOW_TEST_EMPTY_B", "");
        assert_eq!(env_opt("NEWSFLOW_TEST_EMPTY_B"), None);
        env::remove_var("NEWSFLOW_TEST_EMPTY_B");
    }

    #[test]
    fn test_env_req_missing() {
        let err = env_req("NEWSFLOW_TEST_UNSET_C").unwrap_err();
        assert!(err.to_string().contains("NEWSFLOW_TEST_UNSET_C"));
    }

    #[test]
    fn test_numeric_parse_falls_back() {
        env::set_var("NEWSFLOW_TEST_NUM_D", "not-a-number");
        assert_eq!(env_u64("NEWSFLOW_TEST_NUM_D", 42), 42);
        env::remove_var("NEWSFLOW_TEST_NUM_D");
    }

    #[test]
    fn test_env_bool_variants() {
        env::set_var("NEWSFLOW_TEST_BOOL_E", "true");
        assert!(env_bool("NEWSFLOW_TEST_BOOL_E", false));
        env::set_var("NEWSFLOW_TEST_BOOL_E", "0");
        assert!(!env_bool("NEWSFLOW_TEST_BOOL_E", true));
        env::remove_var("NEWSFLOW_TEST_BOOL_E");
    }

    #[test]
    fn test_redis_url() {
        let cfg = RedisConfig {
            host: "broker".into(),
            port: 6380,
            stream_name: "s".into(),
            consumer_group: "g".into(),
            claim_idle_millis: 0,
            claim_check_interval_millis: 0,
            claim_max_count: 0,
        };
        assert_eq!(cfg.url(), "redis://broker:6380");
    }
}
