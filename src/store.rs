//! Session persistence: records, status, and the `SessionStore` seam.
//!
//! `MemorySessionStore` keeps records in a map; `FileSessionStore` writes one
//! pretty-printed JSON file per session under a directory.

use std::{collections::HashMap, path::PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, instrument, warn};

use crate::domain::Question;
use crate::error::StoreError;
use crate::session::SessionStats;
use crate::stack::SerializedEntry;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
  Active,
  Paused,
  Completed,
  Abandoned,
}

impl SessionStatus {
  pub fn as_str(&self) -> &'static str {
    match self {
      SessionStatus::Active => "active",
      SessionStatus::Paused => "paused",
      SessionStatus::Completed => "completed",
      SessionStatus::Abandoned => "abandoned",
    }
  }

  pub fn is_resumable(&self) -> bool {
    matches!(self, SessionStatus::Active | SessionStatus::Paused)
  }
}

/// Everything needed to rebuild a `LearningSession`. Prefetched questions are not kept.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SessionRecord {
  pub id: String,
  pub topic: String,
  pub skills: Vec<String>,
  pub current_skill_index: usize,
  #[serde(default)]
  pub stack: Vec<SerializedEntry>,
  pub status: SessionStatus,
  #[serde(default)]
  pub stats: SessionStats,
  pub started_at: DateTime<Utc>,
  pub updated_at: DateTime<Utc>,
  #[serde(default)]
  pub last_mastered: Option<Question>,
}

impl SessionRecord {
  pub fn skills_completed(&self) -> usize {
    match self.status {
      SessionStatus::Completed => self.skills.len(),
      _ => self.current_skill_index.min(self.skills.len()),
    }
  }
}

/// Listing row for sessions that can be picked up again.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct SessionSummary {
  pub id: String,
  pub topic: String,
  pub status: SessionStatus,
  pub current_skill: Option<String>,
  pub skills_completed: usize,
  pub skills_total: usize,
  pub depth: usize,
  pub updated_at: DateTime<Utc>,
}

impl From<&SessionRecord> for SessionSummary {
  fn from(r: &SessionRecord) -> Self {
    Self {
      id: r.id.clone(),
      topic: r.topic.clone(),
      status: r.status,
      current_skill: r.skills.get(r.current_skill_index).cloned(),
      skills_completed: r.skills_completed(),
      skills_total: r.skills.len(),
      depth: r.stack.len(),
      updated_at: r.updated_at,
    }
  }
}

#[async_trait]
pub trait SessionStore: Send + Sync {
  async fn save(&self, record: &SessionRecord) -> Result<(), StoreError>;

  /// `StoreError::NotFound` when no record has this id.
  async fn load(&self, id: &str) -> Result<SessionRecord, StoreError>;

  async fn list(&self) -> Result<Vec<SessionRecord>, StoreError>;

  /// Returns whether a record was removed.
  async fn delete(&self, id: &str) -> Result<bool, StoreError>;
}

/// Active and paused sessions, most recently updated first.
pub async fn resumable(store: &dyn SessionStore) -> Result<Vec<SessionSummary>, StoreError> {
  let mut records: Vec<SessionRecord> =
    store.list().await?.into_iter().filter(|r| r.status.is_resumable()).collect();
  records.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
  Ok(records.iter().map(SessionSummary::from).collect())
}

#[derive(Default)]
pub struct MemorySessionStore {
  records: RwLock<HashMap<String, SessionRecord>>,
}

impl MemorySessionStore {
  pub fn new() -> Self {
    Self::default()
  }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
  async fn save(&self, record: &SessionRecord) -> Result<(), StoreError> {
    self.records.write().await.insert(record.id.clone(), record.clone());
    Ok(())
  }

  async fn load(&self, id: &str) -> Result<SessionRecord, StoreError> {
    self.records.read().await.get(id).cloned().ok_or_else(|| StoreError::NotFound(id.to_string()))
  }

  async fn list(&self) -> Result<Vec<SessionRecord>, StoreError> {
    Ok(self.records.read().await.values().cloned().collect())
  }

  async fn delete(&self, id: &str) -> Result<bool, StoreError> {
    Ok(self.records.write().await.remove(id).is_some())
  }
}

pub struct FileSessionStore {
  base_dir: PathBuf,
}

impl FileSessionStore {
  pub fn new(base_dir: impl Into<PathBuf>) -> Self {
    Self { base_dir: base_dir.into() }
  }

  /// Ids become file names, so anything beyond `[A-Za-z0-9_-]` is refused.
  fn record_path(&self, id: &str) -> Result<PathBuf, StoreError> {
    let safe = !id.is_empty() && id.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if !safe {
      return Err(StoreError::NotFound(id.to_string()));
    }
    Ok(self.base_dir.join(format!("{id}.json")))
  }
}

#[async_trait]
impl SessionStore for FileSessionStore {
  #[instrument(level = "debug", skip_all, fields(id = %record.id))]
  async fn save(&self, record: &SessionRecord) -> Result<(), StoreError> {
    let path = self.record_path(&record.id)?;
    tokio::fs::create_dir_all(&self.base_dir).await?;
    let body = serde_json::to_string_pretty(record)?;
    let tmp = path.with_extension("json.tmp");
    tokio::fs::write(&tmp, body).await?;
    tokio::fs::rename(&tmp, &path).await?;
    debug!(target: "session", path = %path.display(), "Session saved");
    Ok(())
  }

  async fn load(&self, id: &str) -> Result<SessionRecord, StoreError> {
    let path = self.record_path(id)?;
    match tokio::fs::read_to_string(&path).await {
      Ok(s) => Ok(serde_json::from_str(&s)?),
      Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(StoreError::NotFound(id.to_string())),
      Err(e) => Err(e.into()),
    }
  }

  async fn list(&self) -> Result<Vec<SessionRecord>, StoreError> {
    let mut dir = match tokio::fs::read_dir(&self.base_dir).await {
      Ok(d) => d,
      Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
      Err(e) => return Err(e.into()),
    };
    let mut out = Vec::new();
    while let Some(entry) = dir.next_entry().await? {
      let path = entry.path();
      if path.extension().and_then(|e| e.to_str()) != Some("json") {
        continue;
      }
      let parsed = tokio::fs::read_to_string(&path)
        .await
        .map_err(StoreError::from)
        .and_then(|s| serde_json::from_str::<SessionRecord>(&s).map_err(StoreError::from));
      match parsed {
        Ok(record) => out.push(record),
        Err(e) => warn!(target: "session", path = %path.display(), error = %e, "Skipping unreadable session file"),
      }
    }
    Ok(out)
  }

  async fn delete(&self, id: &str) -> Result<bool, StoreError> {
    let path = self.record_path(id)?;
    match tokio::fs::remove_file(&path).await {
      Ok(()) => Ok(true),
      Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
      Err(e) => Err(e.into()),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use chrono::Duration;

  fn record(id: &str, status: SessionStatus, minutes_ago: i64) -> SessionRecord {
    let now = Utc::now();
    SessionRecord {
      id: id.into(),
      topic: "math".into(),
      skills: vec!["Basic Arithmetic".into(), "Fractions".into(), "Order of Operations".into()],
      current_skill_index: 1,
      stack: vec![SerializedEntry {
        question: Question::new("What is 1/2 + 1/4?", "3/4", ["2/6", "1/6"]),
        marked_incorrect: vec!["2/6".into()],
      }],
      status,
      stats: SessionStats::default(),
      started_at: now - Duration::minutes(minutes_ago + 10),
      updated_at: now - Duration::minutes(minutes_ago),
      last_mastered: None,
    }
  }

  async fn exercise(store: &dyn SessionStore) {
    assert!(matches!(store.load("nope").await, Err(StoreError::NotFound(_))));
    store.save(&record("a", SessionStatus::Paused, 30)).await.expect("save");
    store.save(&record("b", SessionStatus::Active, 5)).await.expect("save");
    store.save(&record("c", SessionStatus::Completed, 1)).await.expect("save");
    store.save(&record("d", SessionStatus::Abandoned, 1)).await.expect("save");

    let loaded = store.load("a").await.expect("load");
    let expected = record("a", SessionStatus::Paused, 30);
    assert_eq!(loaded.status, SessionStatus::Paused);
    assert_eq!(loaded.skills, expected.skills);
    assert_eq!(loaded.stack, expected.stack);
    assert_eq!(store.list().await.expect("list").len(), 4);

    let rows = resumable(store).await.expect("resumable");
    let ids: Vec<&str> = rows.iter().map(|r| r.id.as_str()).collect();
    assert_eq!(ids, vec!["b", "a"]);
    assert_eq!(rows[0].skills_completed, 1);
    assert_eq!(rows[0].skills_total, 3);
    assert_eq!(rows[0].current_skill.as_deref(), Some("Fractions"));
    assert_eq!(rows[0].depth, 1);

    assert!(store.delete("a").await.expect("delete"));
    assert!(!store.delete("a").await.expect("delete again"));
    assert_eq!(store.list().await.expect("list").len(), 3);
  }

  #[tokio::test]
  async fn memory_store_contract() {
    exercise(&MemorySessionStore::new()).await;
  }

  #[tokio::test]
  async fn file_store_contract() {
    let dir = tempfile::tempdir().expect("tempdir");
    exercise(&FileSessionStore::new(dir.path().join("sessions"))).await;
  }

  #[tokio::test]
  async fn file_store_survives_reopen_and_skips_junk() {
    let dir = tempfile::tempdir().expect("tempdir");
    FileSessionStore::new(dir.path()).save(&record("x1", SessionStatus::Active, 0)).await.expect("save");
    std::fs::write(dir.path().join("broken.json"), "{not json").expect("write");
    std::fs::write(dir.path().join("notes.txt"), "ignored").expect("write");

    let reopened = FileSessionStore::new(dir.path());
    let all = reopened.list().await.expect("list");
    assert_eq!(all.len(), 1);
    assert_eq!(all[0].stack[0].marked_incorrect, vec!["2/6"]);
  }

  #[tokio::test]
  async fn file_store_rejects_path_like_ids() {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = FileSessionStore::new(dir.path());
    assert!(matches!(store.load("../etc/passwd").await, Err(StoreError::NotFound(_))));
    assert!(store.save(&record("../x", SessionStatus::Active, 0)).await.is_err());
  }

  #[test]
  fn completed_sessions_count_every_skill() {
    assert_eq!(record("c", SessionStatus::Completed, 0).skills_completed(), 3);
    assert_eq!(record("p", SessionStatus::Paused, 0).skills_completed(), 1);
  }
}
