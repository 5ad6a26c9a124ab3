//! Pipeline wiring and lifecycle.
//!
//! Owns the shutdown channel and constructs every collaborator explicitly —
//! store, classifier, embedder, analyzer, batcher, consumer — then runs the
//! consumer loop until shutdown or teardown.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::info;

use newsflow_analysis::{
    Analyzer, HttpClassifier, HttpEmbedder, HttpScraperRepository, NotificationProcessor,
};
use newsflow_core::Config;
use newsflow_index::{ArticleStore, ElasticWriter};
use newsflow_stream::{BatchProcessor, Batcher, RedisStreamConsumer};

pub struct PipelineHost {
    config: Config,
    shutdown: Arc<watch::Sender<bool>>,
}

impl PipelineHost {
    pub fn new(config: Config) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            config,
            shutdown: Arc::new(shutdown),
        }
    }

    /// Handle for external termination: sending `true` stops the consumer
    /// loop, the reclaim task and the batch timer.
    pub fn shutdown_handle(&self) -> Arc<watch::Sender<bool>> {
        self.shutdown.clone()
    }

    /// Construct collaborators and run the pipeline to completion.
    pub async fn run(&self) -> anyhow::Result<()> {
        let config = &self.config;

        let store: Arc<dyn ArticleStore> = Arc::new(
            ElasticWriter::connect(&config.elastic, config.analysis.embeddings_dimensions).await?,
        );
        let analyzer = Arc::new(Analyzer::new(
            store,
            Arc::new(HttpClassifier::new(config.analysis.classifier_url.clone())),
            Arc::new(HttpEmbedder::new(
                config.analysis.embeddings_url.clone(),
                config.analysis.embeddings_dimensions,
            )),
        ));

        // Notification-mode deployments carry only ids on the stream and
        // fetch the documents from the scraper repository.
        let processor: Arc<dyn BatchProcessor> = match &config.analysis.scraper_repo_url {
            Some(url) => {
                info!(repository = %url, "running in notification mode");
                Arc::new(NotificationProcessor::new(
                    Arc::new(HttpScraperRepository::new(url.clone())),
                    analyzer,
                ))
            }
            None => analyzer,
        };

        let batcher = Batcher::start(
            config.batch.max_size,
            Duration::from_millis(config.batch.timeout_millis),
            processor,
            self.shutdown.clone(),
        );

        let consumer =
            RedisStreamConsumer::connect(&config.redis, self.shutdown.subscribe()).await?;
        let result = consumer
            .consume(
                &config.redis.stream_name,
                &config.redis.consumer_group,
                batcher.clone(),
            )
            .await;

        // Stop the batch timer and flush whatever is queued; entries that
        // fail to flush stay pending at the broker.
        let _ = self.shutdown.send(true);
        batcher.drain().await;

        result?;
        anyhow::ensure!(!batcher.has_failed(), "batch processing failed, restart required");
        info!("pipeline stopped");
        Ok(())
    }
}
