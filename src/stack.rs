//! The learning stack: questions still in progress for the current skill.
//!
//! A wrong answer pushes a simpler question; a right answer pops back to the
//! question that was parked underneath. Only the top entry is ever shown or
//! mutated. The stack is a plain sequential structure with no interior
//! locking: prefetch results computed elsewhere are merged back through
//! `set_prefetched_for`, which refuses results meant for an entry that is no
//! longer on top.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::domain::Question;
use crate::util::truncate_label;

/// Breadcrumb labels are cut to this many characters.
pub const BREADCRUMB_MAX_CHARS: usize = 50;

/// Speculative follow-ups keyed by the incorrect answer that would trigger them.
pub type PrefetchMap = HashMap<String, Question>;

/// Identity of one push. Never reused within a stack, including after `clear`
/// and after a round trip through `deserialize`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EntryId(u64);

/// Prefetch results arrived for an entry that is no longer the top.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("stale prefetch: computed for {expected:?}, top is {current:?}")]
pub struct StaleStackError {
  pub expected: EntryId,
  pub current: Option<EntryId>,
}

#[derive(Clone, Debug)]
pub struct StackEntry {
  id: EntryId,
  pub question: Question,
  /// Answers already tried and failed on, in the order they were tried.
  pub marked_incorrect: Vec<String>,
  pub prefetched: PrefetchMap,
}

impl StackEntry {
  pub fn id(&self) -> EntryId {
    self.id
  }

  pub fn is_marked(&self, answer: &str) -> bool {
    self.marked_incorrect.iter().any(|a| a == answer)
  }
}

/// Persisted shape of one entry. Prefetched questions are never persisted.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SerializedEntry {
  #[serde(flatten)]
  pub question: Question,
  #[serde(default)]
  pub marked_incorrect: Vec<String>,
}

#[derive(Clone, Debug, Default)]
pub struct LearningStack {
  entries: Vec<StackEntry>,
  next_id: u64,
}

impl LearningStack {
  pub fn new() -> Self {
    Self::default()
  }

  /// Push a new top entry and return its identity.
  pub fn push(&mut self, question: Question, prefetched: PrefetchMap) -> EntryId {
    let id = EntryId(self.next_id);
    self.next_id += 1;
    self.entries.push(StackEntry { id, question, marked_incorrect: Vec::new(), prefetched });
    debug!(target: "session", depth = self.depth(), "Pushed question");
    id
  }

  pub fn pop(&mut self) -> Option<Question> {
    let entry = self.entries.pop()?;
    debug!(target: "session", depth = self.depth(), "Popped question");
    Some(entry.question)
  }

  pub fn peek(&self) -> Option<&Question> {
    self.entries.last().map(|e| &e.question)
  }

  pub fn current_entry(&self) -> Option<&StackEntry> {
    self.entries.last()
  }

  /// Record a failed answer on the top entry. Idempotent; no-op on an empty stack.
  pub fn mark_incorrect(&mut self, answer: &str) {
    if let Some(top) = self.entries.last_mut() {
      if !top.is_marked(answer) {
        top.marked_incorrect.push(answer.to_string());
      }
    }
  }

  pub fn get_prefetched(&self, answer: &str) -> Option<&Question> {
    self.entries.last().and_then(|e| e.prefetched.get(answer))
  }

  /// Replace the top entry's prefetch map wholesale.
  pub fn set_prefetched(&mut self, prefetched: PrefetchMap) {
    if let Some(top) = self.entries.last_mut() {
      top.prefetched = prefetched;
    }
  }

  /// Like `set_prefetched`, but only if `expected` is still the top entry.
  pub fn set_prefetched_for(
    &mut self,
    expected: EntryId,
    prefetched: PrefetchMap,
  ) -> Result<(), StaleStackError> {
    match self.entries.last_mut() {
      Some(top) if top.id == expected => {
        top.prefetched = prefetched;
        Ok(())
      }
      other => Err(StaleStackError { expected, current: other.map(|e| e.id) }),
    }
  }

  pub fn depth(&self) -> usize {
    self.entries.len()
  }

  pub fn is_empty(&self) -> bool {
    self.entries.is_empty()
  }

  /// One truncated label per entry, bottom to top.
  pub fn breadcrumb(&self) -> Vec<String> {
    self
      .entries
      .iter()
      .map(|e| truncate_label(&e.question.question_text, BREADCRUMB_MAX_CHARS))
      .collect()
  }

  pub fn clear(&mut self) {
    self.entries.clear();
    debug!(target: "session", "Stack cleared");
  }

  pub fn serialize(&self) -> Vec<SerializedEntry> {
    self
      .entries
      .iter()
      .map(|e| SerializedEntry { question: e.question.clone(), marked_incorrect: e.marked_incorrect.clone() })
      .collect()
  }

  pub fn deserialize(data: Vec<SerializedEntry>) -> Self {
    let mut stack = Self::new();
    for item in data {
      let id = stack.push(item.question, PrefetchMap::new());
      if let Some(top) = stack.entries.last_mut() {
        debug_assert_eq!(top.id, id);
        for answer in item.marked_incorrect {
          if !top.is_marked(&answer) {
            top.marked_incorrect.push(answer);
          }
        }
      }
    }
    stack
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn two_plus_two() -> Question {
    Question::new("What is 2+2?", "4", ["3", "5", "6"])
  }

  fn three_plus_three() -> Question {
    Question::new("What is 3+3?", "6", ["5", "7", "8"])
  }

  fn nth(n: usize) -> Question {
    Question::new(format!("Question {n}"), "yes", ["no", "maybe"])
  }

  #[test]
  fn empty_stack_signals_absence() {
    let mut stack = LearningStack::new();
    assert!(stack.is_empty());
    assert_eq!(stack.depth(), 0);
    assert!(stack.peek().is_none());
    assert!(stack.pop().is_none());
    assert!(stack.get_prefetched("3").is_none());
    stack.mark_incorrect("3");
    stack.set_prefetched(PrefetchMap::new());
    assert!(stack.is_empty());
  }

  #[test]
  fn pops_in_reverse_push_order() {
    let mut stack = LearningStack::new();
    for n in 1..=5 {
      stack.push(nth(n), PrefetchMap::new());
    }
    assert_eq!(stack.depth(), 5);
    for n in (1..=5).rev() {
      assert_eq!(stack.pop(), Some(nth(n)));
    }
    assert!(stack.pop().is_none());
  }

  #[test]
  fn mark_incorrect_is_idempotent() {
    let mut stack = LearningStack::new();
    stack.push(two_plus_two(), PrefetchMap::new());
    stack.mark_incorrect("3");
    stack.mark_incorrect("3");
    stack.mark_incorrect("5");
    let top = stack.current_entry().expect("top");
    assert_eq!(top.marked_incorrect, vec!["3", "5"]);
  }

  #[test]
  fn marks_only_touch_the_top_entry() {
    let mut stack = LearningStack::new();
    stack.push(two_plus_two(), PrefetchMap::new());
    stack.mark_incorrect("3");
    stack.push(three_plus_three(), PrefetchMap::new());
    stack.mark_incorrect("5");
    assert_eq!(stack.current_entry().expect("top").marked_incorrect, vec!["5"]);
    stack.pop();
    assert_eq!(stack.current_entry().expect("top").marked_incorrect, vec!["3"]);
  }

  #[test]
  fn prefetch_lookup_reads_the_top_entry() {
    let mut stack = LearningStack::new();
    let mut map = PrefetchMap::new();
    map.insert("3".to_string(), three_plus_three());
    stack.push(two_plus_two(), map);
    assert_eq!(stack.get_prefetched("3"), Some(&three_plus_three()));
    assert!(stack.get_prefetched("5").is_none());

    stack.set_prefetched(PrefetchMap::new());
    assert!(stack.get_prefetched("3").is_none());
  }

  #[test]
  fn stale_prefetch_is_refused() {
    let mut stack = LearningStack::new();
    let first = stack.push(two_plus_two(), PrefetchMap::new());
    let second = stack.push(three_plus_three(), PrefetchMap::new());
    assert_ne!(first, second);

    let mut map = PrefetchMap::new();
    map.insert("3".to_string(), nth(9));
    let err = stack.set_prefetched_for(first, map.clone()).expect_err("stale");
    assert_eq!(err, StaleStackError { expected: first, current: Some(second) });
    assert!(stack.get_prefetched("3").is_none());

    stack.set_prefetched_for(second, map.clone()).expect("current top");
    assert_eq!(stack.get_prefetched("3"), Some(&nth(9)));

    // A popped-then-repushed entry gets a fresh id, so old results stay stale.
    stack.pop();
    let third = stack.push(three_plus_three(), PrefetchMap::new());
    assert_ne!(third, second);
    assert!(stack.set_prefetched_for(second, map).is_err());
  }

  #[test]
  fn breadcrumb_truncates_long_text() {
    let mut stack = LearningStack::new();
    stack.push(Question::new("x".repeat(80), "a", ["b", "c"]), PrefetchMap::new());
    stack.push(two_plus_two(), PrefetchMap::new());
    let crumbs = stack.breadcrumb();
    assert_eq!(crumbs.len(), 2);
    assert_eq!(crumbs[0], format!("{}...", "x".repeat(50)));
    assert_eq!(crumbs[1], "What is 2+2?");
    assert_eq!(stack.depth(), 2);
  }

  #[test]
  fn round_trip_drops_prefetch_and_keeps_marks() {
    let mut stack = LearningStack::new();
    let mut map = PrefetchMap::new();
    map.insert("3".to_string(), three_plus_three());
    stack.push(two_plus_two(), map);
    stack.mark_incorrect("3");
    stack.push(three_plus_three(), PrefetchMap::new());
    stack.mark_incorrect("7");
    stack.mark_incorrect("5");

    let json = serde_json::to_string(&stack.serialize()).expect("serialize");
    let data: Vec<SerializedEntry> = serde_json::from_str(&json).expect("deserialize");
    let restored = LearningStack::deserialize(data);

    assert_eq!(restored.depth(), stack.depth());
    assert_eq!(restored.serialize(), stack.serialize());
    assert!(restored.entries.iter().all(|e| e.prefetched.is_empty()));
    assert_eq!(restored.peek(), Some(&three_plus_three()));
    assert_eq!(restored.current_entry().expect("top").marked_incorrect, vec!["7", "5"]);
  }

  #[test]
  fn serialized_entries_are_flat_json() {
    let mut stack = LearningStack::new();
    stack.push(two_plus_two(), PrefetchMap::new());
    stack.mark_incorrect("3");
    let value = serde_json::to_value(stack.serialize()).expect("json");
    assert_eq!(
      value,
      serde_json::json!([{
        "question_text": "What is 2+2?",
        "correct_answer": "4",
        "incorrect_answers": ["3", "5", "6"],
        "marked_incorrect": ["3"]
      }])
    );
  }

  #[test]
  fn clear_empties_the_stack() {
    let mut stack = LearningStack::new();
    stack.push(two_plus_two(), PrefetchMap::new());
    stack.push(three_plus_three(), PrefetchMap::new());
    stack.clear();
    assert!(stack.is_empty());
    assert!(stack.breadcrumb().is_empty());
  }
}
