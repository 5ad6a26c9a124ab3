pub mod analyzer;
pub mod classifier;
pub mod embedding;
pub mod error;
pub mod parser;
pub mod repository;

pub use analyzer::Analyzer;
pub use classifier::{Classifier, HttpClassifier};
pub use embedding::{Embedder, HttpEmbedder};
pub use error::AnalysisError;
pub use repository::{HttpScraperRepository, NotificationProcessor, ScraperRepository};
