//! LearningSession: the answer loop over one topic, independent of any UI.
//!
//! A session walks the skillmap in order. For the current skill it keeps a
//! `LearningStack`: wrong answers push a simpler question, right answers pop,
//! and an empty stack means the skill is mastered. Prefetching is split into a
//! `PrefetchJob` (taken while holding the session) and `apply_prefetch` (merged
//! back later), so the slow part can run without holding any lock.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::domain::Question;
use crate::engine::{full_skill, QuestionEngine};
use crate::error::{GenerationError, SessionError};
use crate::stack::{EntryId, LearningStack, PrefetchMap, StaleStackError};
use crate::store::{SessionRecord, SessionStatus};

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionStats {
  pub answered: u32,
  pub correct: u32,
  pub max_depth: usize,
}

/// What an answer did to the stack.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AnswerOutcome {
  /// Correct, and a parked question is back on top.
  Returned { depth: usize },
  /// Correct, and the stack is empty.
  SkillComplete { skill: String },
  /// Incorrect; a simpler question was pushed.
  Remediation { depth: usize, prefetched: bool },
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SkillAdvance {
  Started { skill: String, index: usize },
  TopicComplete,
}

/// Snapshot of everything a client needs to render the current state.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct SessionView {
  pub id: String,
  pub topic: String,
  pub status: SessionStatus,
  pub skill: Option<String>,
  pub skill_index: usize,
  pub skill_count: usize,
  pub question: Option<String>,
  pub answers: Vec<String>,
  pub marked_incorrect: Vec<String>,
  pub depth: usize,
  pub breadcrumb: Vec<String>,
  pub stats: SessionStats,
}

/// Remediation prefetch for one stack entry, runnable away from the session.
#[derive(Clone, Debug)]
pub struct PrefetchJob {
  entry: EntryId,
  topic: String,
  skill: String,
  question: Question,
}

impl PrefetchJob {
  pub async fn run(self, engine: &QuestionEngine) -> PrefetchOutcome {
    let map = engine.prefetch_simpler_questions(&self.topic, &self.skill, &self.question).await;
    PrefetchOutcome { entry: self.entry, map }
  }
}

#[derive(Clone, Debug)]
pub struct PrefetchOutcome {
  entry: EntryId,
  map: PrefetchMap,
}

#[derive(Debug)]
pub struct LearningSession {
  id: String,
  topic: String,
  skills: Vec<String>,
  skill_index: usize,
  stack: LearningStack,
  /// Answer order for the current top; reshuffled only when the top changes.
  shuffled: Vec<String>,
  stats: SessionStats,
  status: SessionStatus,
  last_mastered: Option<Question>,
  started_at: DateTime<Utc>,
}

impl LearningSession {
  /// Fetch the skillmap and seed the first skill.
  #[instrument(level = "info", skip(engine))]
  pub async fn start(engine: &QuestionEngine, topic: &str) -> Result<Self, SessionError> {
    let skills = engine.generate_skillmap(topic).await?;
    let first = skills.first().ok_or_else(|| GenerationError::Malformed("empty skillmap".into()))?;
    let seed = engine.generate_question(&full_skill(topic, first), None, None, false).await?;
    let mut session = Self {
      id: Uuid::new_v4().to_string(),
      topic: topic.to_string(),
      skills,
      skill_index: 0,
      stack: LearningStack::new(),
      shuffled: Vec::new(),
      stats: SessionStats::default(),
      status: SessionStatus::Active,
      last_mastered: None,
      started_at: Utc::now(),
    };
    session.push(seed);
    info!(target: "session", id = %session.id, %topic, skills = session.skills.len(), source = engine.source_name(), "Session started");
    Ok(session)
  }

  pub fn id(&self) -> &str {
    &self.id
  }

  pub fn topic(&self) -> &str {
    &self.topic
  }

  pub fn status(&self) -> SessionStatus {
    self.status
  }

  pub fn stats(&self) -> &SessionStats {
    &self.stats
  }

  pub fn stack(&self) -> &LearningStack {
    &self.stack
  }

  pub fn current_skill(&self) -> Option<&str> {
    self.skills.get(self.skill_index).map(String::as_str)
  }

  pub fn view(&self) -> SessionView {
    let top = self.stack.current_entry();
    SessionView {
      id: self.id.clone(),
      topic: self.topic.clone(),
      status: self.status,
      skill: self.current_skill().map(str::to_string),
      skill_index: self.skill_index,
      skill_count: self.skills.len(),
      question: top.map(|e| e.question.question_text.clone()),
      answers: if top.is_some() { self.shuffled.clone() } else { Vec::new() },
      marked_incorrect: top.map(|e| e.marked_incorrect.clone()).unwrap_or_default(),
      depth: self.stack.depth(),
      breadcrumb: self.stack.breadcrumb(),
      stats: self.stats.clone(),
    }
  }

  /// Judge `selected` against the top question and move the stack accordingly.
  #[instrument(level = "info", skip(self, engine, selected), fields(id = %self.id, depth = self.stack.depth()))]
  pub async fn answer(&mut self, engine: &QuestionEngine, selected: &str) -> Result<AnswerOutcome, SessionError> {
    self.ensure_active()?;
    let top = self.stack.peek().cloned().ok_or(SessionError::NoActiveQuestion)?;
    if !top.has_answer(selected) {
      return Err(SessionError::UnknownAnswer(selected.to_string()));
    }

    if QuestionEngine::judge(&top, selected) {
      self.stats.answered += 1;
      self.stats.correct += 1;
      self.stack.pop();
      self.last_mastered = Some(top);
      if let Some(next) = self.stack.peek() {
        self.shuffled = QuestionEngine::shuffle_answers(next);
        debug!(target: "session", depth = self.stack.depth(), "Correct; returned to parked question");
        return Ok(AnswerOutcome::Returned { depth: self.stack.depth() });
      }
      let skill = self.current_skill().unwrap_or_default().to_string();
      info!(target: "session", id = %self.id, %skill, "Skill complete");
      return Ok(AnswerOutcome::SkillComplete { skill });
    }

    self.stack.mark_incorrect(selected);
    let (next, prefetched) = match self.stack.get_prefetched(selected).cloned() {
      Some(q) => (q, true),
      None => {
        let skill = self.full_skill();
        let q = engine.generate_question(&skill, Some(&top.question_text), Some(selected), false).await?;
        (q, false)
      }
    };
    self.stats.answered += 1;
    self.push(next);
    debug!(target: "session", depth = self.stack.depth(), prefetched, "Incorrect; pushed remediation");
    Ok(AnswerOutcome::Remediation { depth: self.stack.depth(), prefetched })
  }

  /// Harder variation of the last mastered question (a seed when nothing was
  /// mastered yet). The stack is reset to just that question.
  #[instrument(level = "info", skip(self, engine), fields(id = %self.id))]
  pub async fn new_question(&mut self, engine: &QuestionEngine) -> Result<(), SessionError> {
    self.ensure_active()?;
    if self.current_skill().is_none() {
      return Err(SessionError::NoActiveQuestion);
    }
    let skill = self.full_skill();
    let base = self.last_mastered.clone().or_else(|| self.stack.peek().cloned());
    let question = match &base {
      Some(b) => engine.generate_question(&skill, Some(&b.question_text), None, true).await?,
      None => engine.generate_question(&skill, None, None, false).await?,
    };
    self.stack.clear();
    self.push(question);
    Ok(())
  }

  /// Abandon the current stack and seed the next skill, or finish the topic.
  #[instrument(level = "info", skip(self, engine), fields(id = %self.id))]
  pub async fn next_skill(&mut self, engine: &QuestionEngine) -> Result<SkillAdvance, SessionError> {
    self.ensure_active()?;
    let next_index = self.skill_index + 1;
    let Some(next_skill) = self.skills.get(next_index).cloned() else {
      self.stack.clear();
      self.skill_index = self.skills.len();
      self.status = SessionStatus::Completed;
      info!(target: "session", id = %self.id, topic = %self.topic, "Topic complete");
      return Ok(SkillAdvance::TopicComplete);
    };
    // Generate before mutating so a failure leaves the session where it was.
    let seed = engine.generate_question(&full_skill(&self.topic, &next_skill), None, None, false).await?;
    self.stack.clear();
    self.last_mastered = None;
    self.skill_index = next_index;
    self.push(seed);
    info!(target: "session", id = %self.id, skill = %next_skill, index = next_index, "Advanced to next skill");
    Ok(SkillAdvance::Started { skill: next_skill, index: next_index })
  }

  /// Prefetch work for the current top, if it has none yet.
  pub fn prefetch_job(&self) -> Option<PrefetchJob> {
    if self.status != SessionStatus::Active {
      return None;
    }
    let top = self.stack.current_entry()?;
    if !top.prefetched.is_empty() {
      return None;
    }
    Some(PrefetchJob {
      entry: top.id(),
      topic: self.topic.clone(),
      skill: self.current_skill()?.to_string(),
      question: top.question.clone(),
    })
  }

  /// Merge prefetch results, refusing them if their entry is no longer on top.
  pub fn apply_prefetch(&mut self, outcome: PrefetchOutcome) -> Result<usize, StaleStackError> {
    let n = outcome.map.len();
    match self.stack.set_prefetched_for(outcome.entry, outcome.map) {
      Ok(()) => {
        debug!(target: "session", id = %self.id, prefetched = n, "Prefetch applied");
        Ok(n)
      }
      Err(e) => {
        warn!(target: "session", id = %self.id, error = %e, "Discarding stale prefetch");
        Err(e)
      }
    }
  }

  /// Run the prefetch for the current top inline and merge it.
  pub async fn prefetch(&mut self, engine: &QuestionEngine) -> Result<usize, StaleStackError> {
    match self.prefetch_job() {
      Some(job) => {
        let outcome = job.run(engine).await;
        self.apply_prefetch(outcome)
      }
      None => Ok(0),
    }
  }

  pub fn pause(&mut self) -> Result<(), SessionError> {
    self.ensure_active()?;
    self.status = SessionStatus::Paused;
    Ok(())
  }

  pub fn resume(&mut self) -> Result<(), SessionError> {
    match self.status {
      SessionStatus::Paused | SessionStatus::Active => {
        self.status = SessionStatus::Active;
        Ok(())
      }
      other => Err(SessionError::NotActive(other.as_str())),
    }
  }

  pub fn abandon(&mut self) -> Result<(), SessionError> {
    match self.status {
      SessionStatus::Completed | SessionStatus::Abandoned => Err(SessionError::NotActive(self.status.as_str())),
      _ => {
        self.status = SessionStatus::Abandoned;
        Ok(())
      }
    }
  }

  pub fn snapshot(&self) -> SessionRecord {
    SessionRecord {
      id: self.id.clone(),
      topic: self.topic.clone(),
      skills: self.skills.clone(),
      current_skill_index: self.skill_index,
      stack: self.stack.serialize(),
      status: self.status,
      stats: self.stats.clone(),
      started_at: self.started_at,
      updated_at: Utc::now(),
      last_mastered: self.last_mastered.clone(),
    }
  }

  pub fn restore(record: SessionRecord) -> Self {
    let stack = LearningStack::deserialize(record.stack);
    let shuffled = stack.peek().map(QuestionEngine::shuffle_answers).unwrap_or_default();
    Self {
      id: record.id,
      topic: record.topic,
      skills: record.skills,
      skill_index: record.current_skill_index,
      stack,
      shuffled,
      stats: record.stats,
      status: record.status,
      last_mastered: record.last_mastered,
      started_at: record.started_at,
    }
  }

  fn ensure_active(&self) -> Result<(), SessionError> {
    match self.status {
      SessionStatus::Active => Ok(()),
      other => Err(SessionError::NotActive(other.as_str())),
    }
  }

  fn full_skill(&self) -> String {
    full_skill(&self.topic, self.current_skill().unwrap_or_default())
  }

  fn push(&mut self, question: Question) {
    self.shuffled = QuestionEngine::shuffle_answers(&question);
    self.stack.push(question, PrefetchMap::new());
    self.stats.max_depth = self.stats.max_depth.max(self.stack.depth());
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::sync::Arc;

  use async_trait::async_trait;

  use crate::domain::{GenerationMode, GenerationRequest, Review};
  use crate::error::GenerationResult;
  use crate::source::{OfflineSource, QuestionSource};

  /// Addition drills: seed is 2+2, every remediation is 1+1, variations are 12+13.
  struct Arithmetic {
    fail_remediation: bool,
  }

  #[async_trait]
  impl QuestionSource for Arithmetic {
    fn name(&self) -> &str {
      "arithmetic"
    }

    async fn skillmap(&self, _topic: &str) -> GenerationResult<Vec<String>> {
      Ok(vec!["Addition".into(), "Subtraction".into()])
    }

    async fn generate(&self, request: &GenerationRequest) -> GenerationResult<Question> {
      match request.mode {
        GenerationMode::Seed => Ok(Question::new("What is 2+2?", "4", ["3", "5", "6"])),
        GenerationMode::Remediation if self.fail_remediation => Err(GenerationError::Transport("down".into())),
        GenerationMode::Remediation => Ok(Question::new(
          format!("What is 1+1? (after {})", request.prior_answer.as_deref().unwrap_or("-")),
          "2",
          ["1", "3"],
        )),
        GenerationMode::Escalation => Ok(Question::new("What is 12+13?", "25", ["24", "26"])),
      }
    }

    async fn review(&self, question: &Question) -> GenerationResult<Review> {
      Ok(Review { valid: true, correct_answer: question.correct_answer.clone() })
    }
  }

  fn arithmetic() -> QuestionEngine {
    QuestionEngine::new(Arc::new(Arithmetic { fail_remediation: false }), None)
  }

  #[tokio::test]
  async fn wrong_then_right_returns_to_the_seed() {
    let engine = arithmetic();
    let mut s = LearningSession::start(&engine, "Math").await.expect("start");
    assert_eq!(s.stack().depth(), 1);
    assert_eq!(s.stack().peek().expect("top").correct_answer, "4");

    let out = s.answer(&engine, "3").await.expect("answer");
    assert_eq!(out, AnswerOutcome::Remediation { depth: 2, prefetched: false });
    assert_eq!(s.stack().peek().expect("top").question_text, "What is 1+1? (after 3)");

    let out = s.answer(&engine, "2").await.expect("answer");
    assert_eq!(out, AnswerOutcome::Returned { depth: 1 });
    assert_eq!(s.stack().peek().expect("top").question_text, "What is 2+2?");
    assert_eq!(s.view().marked_incorrect, vec!["3"]);
    assert_eq!(s.stats(), &SessionStats { answered: 2, correct: 1, max_depth: 2 });
  }

  #[tokio::test]
  async fn correct_on_single_entry_completes_the_skill() {
    let engine = arithmetic();
    let mut s = LearningSession::start(&engine, "Math").await.expect("start");
    let out = s.answer(&engine, "4").await.expect("answer");
    assert_eq!(out, AnswerOutcome::SkillComplete { skill: "Addition".into() });
    assert!(s.stack().is_empty());
    let view = s.view();
    assert!(view.question.is_none());
    assert!(view.answers.is_empty());
    assert!(matches!(s.answer(&engine, "4").await, Err(SessionError::NoActiveQuestion)));
  }

  #[tokio::test]
  async fn unknown_answers_are_rejected_without_side_effects() {
    let engine = arithmetic();
    let mut s = LearningSession::start(&engine, "Math").await.expect("start");
    let err = s.answer(&engine, "five").await.expect_err("not an option");
    assert_eq!(err, SessionError::UnknownAnswer("five".into()));
    assert_eq!(s.stats().answered, 0);
    assert!(s.view().marked_incorrect.is_empty());
  }

  #[tokio::test]
  async fn generation_failure_leaves_the_stack_in_place() {
    let engine = QuestionEngine::new(Arc::new(Arithmetic { fail_remediation: true }), None);
    let mut s = LearningSession::start(&engine, "Math").await.expect("start");
    let err = s.answer(&engine, "3").await.expect_err("source down");
    assert!(matches!(err, SessionError::Generation(_)));
    assert_eq!(s.stack().depth(), 1);
    assert_eq!(s.stats().answered, 0);
  }

  #[tokio::test]
  async fn prefetched_remediation_is_used() {
    let engine = arithmetic();
    let mut s = LearningSession::start(&engine, "Math").await.expect("start");
    assert_eq!(s.prefetch(&engine).await.expect("fresh"), 3);
    assert!(s.prefetch_job().is_none());
    let out = s.answer(&engine, "6").await.expect("answer");
    assert_eq!(out, AnswerOutcome::Remediation { depth: 2, prefetched: true });
    assert_eq!(s.stack().peek().expect("top").question_text, "What is 1+1? (after 6)");
  }

  #[tokio::test]
  async fn stale_prefetch_is_discarded() {
    let engine = arithmetic();
    let mut s = LearningSession::start(&engine, "Math").await.expect("start");
    let job = s.prefetch_job().expect("job");
    s.answer(&engine, "3").await.expect("answer");
    let outcome = job.run(&engine).await;
    assert!(s.apply_prefetch(outcome).is_err());
    assert!(s.stack().current_entry().expect("top").prefetched.is_empty());
  }

  #[tokio::test]
  async fn new_question_escalates_from_the_mastered_question() {
    let engine = arithmetic();
    let mut s = LearningSession::start(&engine, "Math").await.expect("start");
    s.answer(&engine, "4").await.expect("answer");
    s.new_question(&engine).await.expect("variation");
    assert_eq!(s.stack().depth(), 1);
    assert_eq!(s.view().question.as_deref(), Some("What is 12+13?"));
  }

  #[tokio::test]
  async fn next_skill_walks_to_topic_completion() {
    let engine = arithmetic();
    let mut s = LearningSession::start(&engine, "Math").await.expect("start");
    s.answer(&engine, "3").await.expect("answer");
    let adv = s.next_skill(&engine).await.expect("advance");
    assert_eq!(adv, SkillAdvance::Started { skill: "Subtraction".into(), index: 1 });
    assert_eq!(s.stack().depth(), 1);
    assert_eq!(s.current_skill(), Some("Subtraction"));

    assert_eq!(s.next_skill(&engine).await.expect("finish"), SkillAdvance::TopicComplete);
    assert_eq!(s.status(), SessionStatus::Completed);
    assert!(s.current_skill().is_none());
    assert!(matches!(s.answer(&engine, "4").await, Err(SessionError::NotActive("completed"))));
  }

  #[tokio::test]
  async fn status_transitions() {
    let engine = arithmetic();
    let mut s = LearningSession::start(&engine, "Math").await.expect("start");
    s.pause().expect("pause");
    assert!(matches!(s.answer(&engine, "4").await, Err(SessionError::NotActive("paused"))));
    assert!(s.prefetch_job().is_none());
    s.resume().expect("resume");
    s.abandon().expect("abandon");
    assert!(s.resume().is_err());
    assert!(s.abandon().is_err());
  }

  #[tokio::test]
  async fn snapshot_round_trip_resumes_mid_stack() {
    let engine = arithmetic();
    let mut s = LearningSession::start(&engine, "Math").await.expect("start");
    s.prefetch(&engine).await.expect("prefetch");
    s.answer(&engine, "5").await.expect("answer");
    s.pause().expect("pause");

    let json = serde_json::to_string(&s.snapshot()).expect("json");
    let record: SessionRecord = serde_json::from_str(&json).expect("record");
    let mut restored = LearningSession::restore(record);
    assert_eq!(restored.id(), s.id());
    assert_eq!(restored.status(), SessionStatus::Paused);
    assert_eq!(restored.stack().depth(), 2);
    assert_eq!(restored.stack().breadcrumb(), s.stack().breadcrumb());
    assert_eq!(restored.stats(), s.stats());
    let mut answers = restored.view().answers;
    answers.sort();
    assert_eq!(answers, vec!["1", "2", "3"]);

    restored.resume().expect("resume");
    assert_eq!(restored.answer(&engine, "2").await.expect("answer"), AnswerOutcome::Returned { depth: 1 });
    assert_eq!(restored.view().marked_incorrect, vec!["5"]);
    // Prefetch was not persisted, so the restored top needs a fresh job.
    assert!(restored.prefetch_job().is_some());
  }

  #[tokio::test]
  async fn offline_source_drills_down_its_tree() {
    let engine = QuestionEngine::new(Arc::new(OfflineSource::new()), None);
    let mut s = LearningSession::start(&engine, "math").await.expect("start");
    assert_eq!(s.current_skill(), Some("Basic Arithmetic"));
    assert_eq!(s.view().question.as_deref(), Some("What is 7 × 8?"));

    s.prefetch(&engine).await.expect("prefetch");
    let out = s.answer(&engine, "54").await.expect("answer");
    assert_eq!(out, AnswerOutcome::Remediation { depth: 2, prefetched: true });
    assert_eq!(s.view().question.as_deref(), Some("What is 7 × 7?"));

    s.answer(&engine, "42").await.expect("answer");
    assert_eq!(s.view().question.as_deref(), Some("What is 7 + 7?"));
    assert_eq!(s.view().breadcrumb.len(), 3);

    for _ in 0..3 {
      let top = s.stack().peek().expect("top").correct_answer.clone();
      s.answer(&engine, &top).await.expect("answer");
    }
    assert!(s.stack().is_empty());
  }
}
