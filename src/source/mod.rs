//! Question sources: the opaque capability that turns requests into questions.
//!
//! The engine only depends on `QuestionSource`. Two implementations exist:
//! `OpenAiSource` for production and `OfflineSource`, a deterministic generator
//! over static question trees used in mock mode and in tests.

mod mock;
mod openai;

use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;

pub use mock::OfflineSource;
pub use openai::OpenAiSource;

use crate::config::AppConfig;
use crate::domain::{GenerationRequest, Question, Review};
use crate::error::GenerationResult;

#[async_trait]
pub trait QuestionSource: Send + Sync {
  /// Short label for logs.
  fn name(&self) -> &str;

  /// Ordered curriculum for a topic.
  async fn skillmap(&self, topic: &str) -> GenerationResult<Vec<String>>;

  /// Generate one question in the mode carried by `request`.
  async fn generate(&self, request: &GenerationRequest) -> GenerationResult<Question>;

  /// Independently check whether `question.correct_answer` is right.
  async fn review(&self, question: &Question) -> GenerationResult<Review>;
}

/// Pick the backend described by the configuration.
pub fn build_source(cfg: &Arc<AppConfig>) -> Arc<dyn QuestionSource> {
  match OpenAiSource::from_config(cfg.clone()) {
    Some(oa) if !cfg.backend.use_offline_source() => {
      info!(target: "recque_backend", base_url = %oa.base_url, model = %oa.model, "OpenAI source enabled.");
      Arc::new(oa)
    }
    _ => {
      info!(target: "recque_backend", mock_mode = cfg.backend.mock_mode, "Using offline question source.");
      Arc::new(OfflineSource::new())
    }
  }
}
