//! Domain models: questions, skillmaps, reviews and generation requests.

use serde::{Deserialize, Serialize};

use crate::error::{GenerationError, GenerationResult};

/// A multiple-choice question with exactly one correct answer.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Question {
  pub question_text: String,
  pub correct_answer: String,
  pub incorrect_answers: Vec<String>,
}

impl Question {
  pub fn new(
    question_text: impl Into<String>,
    correct_answer: impl Into<String>,
    incorrect_answers: impl IntoIterator<Item = impl Into<String>>,
  ) -> Self {
    Self {
      question_text: question_text.into(),
      correct_answer: correct_answer.into(),
      incorrect_answers: incorrect_answers.into_iter().map(Into::into).collect(),
    }
  }

  /// Correct answer first, then the incorrect ones in their stored order.
  pub fn all_answers(&self) -> Vec<String> {
    let mut out = Vec::with_capacity(self.incorrect_answers.len() + 1);
    out.push(self.correct_answer.clone());
    out.extend(self.incorrect_answers.iter().cloned());
    out
  }

  pub fn has_answer(&self, answer: &str) -> bool {
    self.correct_answer == answer || self.incorrect_answers.iter().any(|a| a == answer)
  }

  /// Checks the shape a source must deliver before a question enters the engine.
  pub fn validate(&self) -> GenerationResult<()> {
    if self.question_text.trim().is_empty() {
      return Err(GenerationError::InvalidQuestion("empty question_text".into()));
    }
    if self.correct_answer.trim().is_empty() {
      return Err(GenerationError::InvalidQuestion("empty correct_answer".into()));
    }
    if self.incorrect_answers.len() < 2 {
      return Err(GenerationError::InvalidQuestion(format!(
        "expected at least 2 incorrect answers, got {}",
        self.incorrect_answers.len()
      )));
    }
    if self.incorrect_answers.iter().any(|a| a == &self.correct_answer) {
      return Err(GenerationError::InvalidQuestion(
        "correct_answer also listed as incorrect".into(),
      ));
    }
    Ok(())
  }
}

/// Ordered curriculum for a topic.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Skillmap {
  pub skills: Vec<String>,
}

/// Outcome of an independent review of a question's stated answer.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Review {
  pub valid: bool,
  pub correct_answer: String,
}

/// Which kind of question a request asks for.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GenerationMode {
  /// First question for a skill, no prior context.
  Seed,
  /// Simpler question targeting the misconception behind a wrong answer.
  Remediation,
  /// Harder variation of a question answered correctly.
  Escalation,
}

/// Context passed to a `QuestionSource` when generating a question.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GenerationRequest {
  pub mode: GenerationMode,
  pub skill: String,
  pub prior_question: Option<String>,
  pub prior_answer: Option<String>,
}

impl GenerationRequest {
  /// Derives the mode from the engine-level arguments.
  ///
  /// `variation` wins over remediation; a prior question without an answer is
  /// still treated as remediation so the source sees the context it was given.
  pub fn from_parts(
    skill: &str,
    prior_question: Option<&str>,
    prior_answer: Option<&str>,
    variation: bool,
  ) -> Self {
    let mode = if variation {
      GenerationMode::Escalation
    } else if prior_question.is_some() {
      GenerationMode::Remediation
    } else {
      GenerationMode::Seed
    };
    Self {
      mode,
      skill: skill.to_string(),
      prior_question: prior_question.map(str::to_string),
      prior_answer: prior_answer.map(str::to_string),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn two_plus_two() -> Question {
    Question::new("What is 2+2?", "4", ["3", "5", "6"])
  }

  #[test]
  fn all_answers_puts_correct_first() {
    assert_eq!(two_plus_two().all_answers(), vec!["4", "3", "5", "6"]);
  }

  #[test]
  fn validate_rejects_bad_shapes() {
    assert!(two_plus_two().validate().is_ok());
    assert!(Question::new("q", "a", ["b"]).validate().is_err());
    assert!(Question::new("q", "a", ["a", "b"]).validate().is_err());
    assert!(Question::new("  ", "a", ["b", "c"]).validate().is_err());
  }

  #[test]
  fn request_mode_follows_arguments() {
    assert_eq!(GenerationRequest::from_parts("s", None, None, false).mode, GenerationMode::Seed);
    assert_eq!(
      GenerationRequest::from_parts("s", Some("q"), Some("a"), false).mode,
      GenerationMode::Remediation
    );
    assert_eq!(
      GenerationRequest::from_parts("s", Some("q"), None, true).mode,
      GenerationMode::Escalation
    );
  }
}
