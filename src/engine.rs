//! QuestionEngine: generation with caching, prefetch fan-out, repair, shuffling and judging.
//!
//! The engine owns no session state. It turns engine-level arguments into a
//! `GenerationRequest`, asks the injected `QuestionSource`, validates what comes
//! back and, for seed requests, memoizes it in the optional `QuestionCache`.

use std::{collections::HashSet, sync::Arc, time::Duration};

use rand::seq::SliceRandom;
use tokio::{sync::Semaphore, task::JoinSet};
use tracing::{debug, info, instrument, warn};

use crate::cache::{fingerprint, QuestionCache};
use crate::config::EngineConfig;
use crate::domain::{GenerationRequest, Question};
use crate::error::{GenerationError, GenerationResult};
use crate::source::QuestionSource;
use crate::stack::PrefetchMap;
use crate::util::trunc_for_log;

const DEFAULT_PREFETCH_TIMEOUT: Duration = Duration::from_secs(30);

/// Skill string handed to the source: the topic gives the skill its context.
pub fn full_skill(topic: &str, skill: &str) -> String {
  format!("{topic}. {skill}")
}

#[derive(Clone)]
pub struct QuestionEngine {
  source: Arc<dyn QuestionSource>,
  cache: Option<Arc<QuestionCache>>,
  prefetch_limit: Option<usize>,
  prefetch_timeout: Duration,
  verify: bool,
}

impl QuestionEngine {
  pub fn new(source: Arc<dyn QuestionSource>, cache: Option<Arc<QuestionCache>>) -> Self {
    Self { source, cache, prefetch_limit: None, prefetch_timeout: DEFAULT_PREFETCH_TIMEOUT, verify: false }
  }

  pub fn from_config(source: Arc<dyn QuestionSource>, cache: Option<Arc<QuestionCache>>, cfg: &EngineConfig) -> Self {
    Self::new(source, cache)
      .with_prefetch_limit(cfg.prefetch_concurrency)
      .with_prefetch_timeout(Duration::from_secs(cfg.prefetch_timeout_secs))
      .with_verification(cfg.verify_questions)
  }

  /// Cap on concurrent prefetch requests. `None` or `Some(0)` means one task per answer.
  pub fn with_prefetch_limit(mut self, limit: Option<usize>) -> Self {
    self.prefetch_limit = limit.filter(|n| *n > 0);
    self
  }

  pub fn with_prefetch_timeout(mut self, timeout: Duration) -> Self {
    self.prefetch_timeout = timeout;
    self
  }

  pub fn with_verification(mut self, verify: bool) -> Self {
    self.verify = verify;
    self
  }

  pub fn source_name(&self) -> &str {
    self.source.name()
  }

  /// One uncached call to the source. An empty curriculum is a generation error.
  #[instrument(level = "info", skip(self), fields(source = self.source.name()))]
  pub async fn generate_skillmap(&self, topic: &str) -> GenerationResult<Vec<String>> {
    let skills = self.source.skillmap(topic).await?;
    if skills.is_empty() {
      return Err(GenerationError::Malformed(format!("no skills for topic {topic:?}")));
    }
    Ok(skills)
  }

  /// Seed, remediation or escalation depending on the arguments.
  ///
  /// Requests without a prior question are served from the cache when present and
  /// stored after a successful generation; the variation flag is part of the key.
  /// Every returned question has passed `Question::validate`.
  #[instrument(level = "info", skip(self, prior_question, prior_answer), fields(has_prior = prior_question.is_some()))]
  pub async fn generate_question(
    &self,
    skill: &str,
    prior_question: Option<&str>,
    prior_answer: Option<&str>,
    variation: bool,
  ) -> GenerationResult<Question> {
    let cacheable = prior_question.is_none();
    let is_seed = cacheable && !variation;
    let key = match (&self.cache, cacheable) {
      (Some(cache), true) => {
        let key = fingerprint(skill, prior_question, prior_answer, variation);
        if let Some(hit) = cache.get(&key).await {
          debug!(target: "engine", %key, variation, "Cache hit");
          return Ok(hit);
        }
        Some(key)
      }
      _ => None,
    };

    let request = GenerationRequest::from_parts(skill, prior_question, prior_answer, variation);
    let mut question = self.source.generate(&request).await?;
    question.validate()?;
    if is_seed && self.verify {
      question = self.verify_question(question).await?;
    }

    if let (Some(cache), Some(key)) = (&self.cache, key) {
      if cache.put(key, question.clone()).await {
        cache.persist_logged().await;
      }
    }
    Ok(question)
  }

  /// Remediation questions for every distinct incorrect answer of `current`, generated concurrently.
  ///
  /// Failed or timed-out branches are logged and left out of the map; the call itself never fails.
  #[instrument(level = "info", skip(self, current), fields(answers = current.incorrect_answers.len()))]
  pub async fn prefetch_simpler_questions(&self, topic: &str, skill: &str, current: &Question) -> PrefetchMap {
    let skill = full_skill(topic, skill);
    let mut seen = HashSet::new();
    let answers: Vec<String> =
      current.incorrect_answers.iter().filter(|a| seen.insert(a.as_str())).cloned().collect();

    let limiter = self.prefetch_limit.map(|n| Arc::new(Semaphore::new(n)));
    let mut tasks = JoinSet::new();
    for answer in answers {
      let engine = self.clone();
      let skill = skill.clone();
      let prior = current.question_text.clone();
      let limiter = limiter.clone();
      tasks.spawn(async move {
        let _permit = match limiter {
          Some(sem) => sem.acquire_owned().await.ok(),
          None => None,
        };
        let generation = engine.generate_question(&skill, Some(&prior), Some(&answer), false);
        let result = match tokio::time::timeout(engine.prefetch_timeout, generation).await {
          Ok(r) => r,
          Err(_) => Err(GenerationError::Timeout(engine.prefetch_timeout.as_secs())),
        };
        (answer, result)
      });
    }

    let mut map = PrefetchMap::new();
    while let Some(joined) = tasks.join_next().await {
      match joined {
        Ok((answer, Ok(question))) => {
          map.insert(answer, question);
        }
        Ok((answer, Err(e))) => {
          warn!(target: "engine", answer = %trunc_for_log(&answer, 30), error = %e, "Prefetch branch failed");
        }
        Err(e) => warn!(target: "engine", error = %e, "Prefetch task aborted"),
      }
    }
    info!(target: "engine", prefetched = map.len(), "Prefetch complete");
    map
  }

  /// Ask the source to review the stated answer and repair it when flagged.
  ///
  /// If the replacement already appears among the incorrect answers, that slot
  /// takes the old correct answer so the answer set keeps its size and never
  /// lists one string as both correct and incorrect.
  #[instrument(level = "info", skip(self, question), fields(preview = %trunc_for_log(&question.question_text, 40)))]
  pub async fn verify_question(&self, mut question: Question) -> GenerationResult<Question> {
    let review = self.source.review(&question).await?;
    let replacement = review.correct_answer.trim();
    if review.valid || replacement.is_empty() || replacement == question.correct_answer {
      return Ok(question);
    }
    let replacement = replacement.to_string();
    let previous = std::mem::replace(&mut question.correct_answer, replacement.clone());
    if let Some(slot) = question.incorrect_answers.iter_mut().find(|a| **a == replacement) {
      *slot = previous.clone();
    }
    warn!(
      target: "engine",
      previous = %trunc_for_log(&previous, 30),
      repaired = %trunc_for_log(&question.correct_answer, 30),
      "Repaired correct answer after review"
    );
    Ok(question)
  }

  /// All answers in uniformly random order. Does not touch `question`.
  pub fn shuffle_answers(question: &Question) -> Vec<String> {
    let mut answers = question.all_answers();
    answers.shuffle(&mut rand::thread_rng());
    answers
  }

  /// Byte-for-byte comparison with the stated correct answer.
  pub fn judge(question: &Question, selected: &str) -> bool {
    selected == question.correct_answer
  }
}
