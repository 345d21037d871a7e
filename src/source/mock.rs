//! Offline question source over the built-in trees in `seeds`.
//!
//! Deterministic: seeds rotate through a skill's roots in order, remediation
//! walks the tree edge for the wrong answer, and review always agrees.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use tracing::{debug, info};

use super::QuestionSource;
use crate::domain::{GenerationMode, GenerationRequest, Question, Review};
use crate::error::GenerationResult;
use crate::seeds::{self, QuestionNode};

const GENERIC_POOL: &str = "generic";

pub struct OfflineSource {
  trees: Vec<(&'static str, Vec<QuestionNode>)>,
  generic: Vec<QuestionNode>,
  /// Next root index per pool.
  cursors: Mutex<HashMap<&'static str, usize>>,
}

impl Default for OfflineSource {
  fn default() -> Self {
    Self::new()
  }
}

impl OfflineSource {
  pub fn new() -> Self {
    Self { trees: seeds::skill_trees(), generic: seeds::generic_trees(), cursors: Mutex::new(HashMap::new()) }
  }

  /// The roots for a skill, matched by substring either way, or the generic pool.
  fn pool_for(&self, skill: &str) -> (&'static str, &[QuestionNode]) {
    let lower = skill.to_lowercase();
    self
      .trees
      .iter()
      .find(|(key, _)| lower.contains(key) || (!lower.is_empty() && key.contains(lower.as_str())))
      .map(|(key, roots)| (*key, roots.as_slice()))
      .unwrap_or((GENERIC_POOL, self.generic.as_slice()))
  }

  /// Next root of `pool` in rotation, skipping `avoid` when another root exists.
  fn rotate(&self, key: &'static str, pool: &[QuestionNode], avoid: Option<&str>) -> Option<Question> {
    if pool.is_empty() {
      return None;
    }
    let mut cursors = self.cursors.lock().unwrap_or_else(|e| e.into_inner());
    let cursor = cursors.entry(key).or_insert(0);
    for _ in 0..pool.len() {
      let node = &pool[*cursor % pool.len()];
      *cursor = (*cursor + 1) % pool.len();
      if avoid != Some(node.question.question_text.as_str()) {
        return Some(node.question.clone());
      }
    }
    None
  }

  fn seed(&self, skill: &str, avoid: Option<&str>) -> Question {
    let (key, pool) = self.pool_for(skill);
    self
      .rotate(key, pool, avoid)
      .or_else(|| self.rotate(GENERIC_POOL, &self.generic, avoid))
      .unwrap_or_else(|| {
        Question::new(
          format!("Which statement about {skill} is true?"),
          "It can be learned step by step",
          ["It cannot be learned", "It has no basics"],
        )
      })
  }

  fn find_node<'a>(&'a self, text: &str) -> Option<&'a QuestionNode> {
    fn search<'n>(node: &'n QuestionNode, text: &str) -> Option<&'n QuestionNode> {
      if node.question.question_text == text {
        return Some(node);
      }
      node.followups.iter().find_map(|(_, child)| search(child, text))
    }
    self
      .trees
      .iter()
      .flat_map(|(_, roots)| roots.iter())
      .chain(self.generic.iter())
      .find_map(|root| search(root, text))
  }
}

#[async_trait]
impl QuestionSource for OfflineSource {
  fn name(&self) -> &str {
    "offline"
  }

  async fn skillmap(&self, topic: &str) -> GenerationResult<Vec<String>> {
    let lower = topic.to_lowercase();
    let skills: Vec<String> = match seeds::TOPIC_SKILLS.iter().find(|t| lower.contains(t.key)) {
      Some(known) => known.skills.iter().map(|s| s.to_string()).collect(),
      None => seeds::GENERIC_SKILLS.iter().map(|s| format!("{topic} - {s}")).collect(),
    };
    info!(target: "engine", %topic, skills = skills.len(), "Offline skillmap");
    Ok(skills)
  }

  async fn generate(&self, request: &GenerationRequest) -> GenerationResult<Question> {
    let prior = request.prior_question.as_deref();
    let question = match request.mode {
      GenerationMode::Seed => self.seed(&request.skill, None),
      GenerationMode::Escalation => self.seed(&request.skill, prior),
      GenerationMode::Remediation => {
        let followup = prior
          .zip(request.prior_answer.as_deref())
          .and_then(|(q, a)| self.find_node(q)?.followup(a));
        match followup {
          Some(node) => node.question.clone(),
          None => {
            debug!(target: "engine", skill = %request.skill, "No offline follow-up; serving a seed");
            self.seed(&request.skill, prior)
          }
        }
      }
    };
    Ok(question)
  }

  async fn review(&self, question: &Question) -> GenerationResult<Review> {
    Ok(Review { valid: true, correct_answer: question.correct_answer.clone() })
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn seed(skill: &str) -> GenerationRequest {
    GenerationRequest::from_parts(skill, None, None, false)
  }

  #[tokio::test]
  async fn skillmaps_for_known_and_unknown_topics() {
    let src = OfflineSource::new();
    assert_eq!(
      src.skillmap("Intro to Python").await.expect("skills"),
      vec!["Variables and Data Types", "Control Flow", "Functions"]
    );
    assert_eq!(src.skillmap("math").await.expect("skills")[1], "Fractions");
    assert_eq!(
      src.skillmap("Cooking").await.expect("skills"),
      vec!["Cooking - Fundamental Concepts", "Cooking - Core Principles", "Cooking - Practical Applications"]
    );
  }

  #[tokio::test]
  async fn seeds_rotate_through_roots() {
    let src = OfflineSource::new();
    let skill = "Python. Variables and Data Types";
    let a = src.generate(&seed(skill)).await.expect("q");
    let b = src.generate(&seed(skill)).await.expect("q");
    let c = src.generate(&seed(skill)).await.expect("q");
    assert_ne!(a, b);
    assert_eq!(a, c);
    assert!(a.validate().is_ok());
  }

  #[tokio::test]
  async fn unknown_skill_gets_generic_questions() {
    let src = OfflineSource::new();
    let q = src.generate(&seed("Cooking - Core Principles")).await.expect("q");
    assert_eq!(q, seeds::generic_trees()[0].question);
  }

  #[tokio::test]
  async fn remediation_follows_the_wrong_answer_edge() {
    let src = OfflineSource::new();
    let req = GenerationRequest::from_parts("math. Order of Operations", Some("What is 2 + 3 × 4?"), Some("20"), false);
    let q = src.generate(&req).await.expect("q");
    assert_eq!(q.question_text, "In 2 + 3 × 4, which operation happens first?");

    let deeper = GenerationRequest::from_parts("math. Order of Operations", Some(&q.question_text), Some("Addition"), false);
    let q2 = src.generate(&deeper).await.expect("q");
    assert_eq!(q2.correct_answer, "Multiplication");
    assert_eq!(q2.question_text, "What does the M in PEMDAS stand for?");
  }

  #[tokio::test]
  async fn remediation_without_edge_falls_back_to_another_question() {
    let src = OfflineSource::new();
    let prior = "What is 2 + 3 × 4?";
    let req = GenerationRequest::from_parts("math. Order of Operations", Some(prior), Some("12"), false);
    let q = src.generate(&req).await.expect("q");
    assert_ne!(q.question_text, prior);
    assert!(q.validate().is_ok());
  }

  #[tokio::test]
  async fn escalation_never_repeats_the_prior_root() {
    let src = OfflineSource::new();
    let prior = "What is 7 × 8?";
    for _ in 0..4 {
      let req = GenerationRequest::from_parts("math. Basic Arithmetic", Some(prior), None, true);
      assert_ne!(src.generate(&req).await.expect("q").question_text, prior);
    }
  }

  #[tokio::test]
  async fn review_agrees_with_the_question() {
    let src = OfflineSource::new();
    let q = Question::new("q", "a", ["b", "c"]);
    assert_eq!(src.review(&q).await.expect("review"), Review { valid: true, correct_answer: "a".into() });
  }
}
