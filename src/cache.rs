//! Content-addressed question cache keyed by a fingerprint of the generation request.
//!
//! The key is derived from what was *asked* (skill, prior question, prior answer,
//! variation flag), not from what came back, so a repeated request is served
//! without calling the source again. Writes are first-writer-wins.

use std::{collections::HashMap, fmt, path::PathBuf};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, instrument, warn};

use crate::domain::Question;
use crate::error::StoreError;

/// Hex characters kept from the SHA-256 digest (128 bits).
const FINGERPRINT_HEX_LEN: usize = 32;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CacheKey(String);

impl CacheKey {
  pub fn as_str(&self) -> &str {
    &self.0
  }
}

impl fmt::Display for CacheKey {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.0)
  }
}

/// Deterministic digest of a generation request.
///
/// Each text field is length-prefixed and absent fields get their own marker,
/// so `("a|b", None)` and `("a", Some("b"))` can never encode to the same bytes.
pub fn fingerprint(
  skill: &str,
  prior_question: Option<&str>,
  prior_answer: Option<&str>,
  variation: bool,
) -> CacheKey {
  let mut hasher = Sha256::new();
  hasher.update(encode_field('s', Some(skill)));
  hasher.update(encode_field('q', prior_question));
  hasher.update(encode_field('a', prior_answer));
  hasher.update(if variation { "v1" } else { "v0" });
  let digest = hex::encode(hasher.finalize());
  CacheKey(digest[..FINGERPRINT_HEX_LEN].to_string())
}

fn encode_field(tag: char, value: Option<&str>) -> String {
  match value {
    Some(v) => format!("{tag}{}:{v}|", v.len()),
    None => format!("{tag}-|"),
  }
}

/// Shared between concurrent generation calls; a coarse lock is enough here.
#[derive(Debug, Default)]
pub struct QuestionCache {
  entries: RwLock<HashMap<CacheKey, Question>>,
  path: Option<PathBuf>,
  // Held for a whole snapshot + write + rename so writers never interleave.
  persist_lock: Mutex<()>,
}

impl QuestionCache {
  pub fn new() -> Self {
    Self::default()
  }

  /// Open a cache backed by a JSON file. A missing file yields an empty cache;
  /// an unreadable one is an error so a corrupt cache is not silently discarded.
  #[instrument(level = "info", skip_all, fields(path = %path.display()))]
  pub async fn load(path: PathBuf) -> Result<Self, StoreError> {
    let entries = match tokio::fs::read_to_string(&path).await {
      Ok(s) => serde_json::from_str::<HashMap<CacheKey, Question>>(&s)?,
      Err(e) if e.kind() == std::io::ErrorKind::NotFound => HashMap::new(),
      Err(e) => return Err(e.into()),
    };
    info!(target: "engine", entries = entries.len(), "Question cache loaded");
    Ok(Self { entries: RwLock::new(entries), path: Some(path), persist_lock: Mutex::new(()) })
  }

  pub async fn get(&self, key: &CacheKey) -> Option<Question> {
    self.entries.read().await.get(key).cloned()
  }

  /// Returns `true` if this call stored the value, `false` if a value was already present.
  pub async fn put(&self, key: CacheKey, question: Question) -> bool {
    let mut entries = self.entries.write().await;
    if entries.contains_key(&key) {
      debug!(target: "engine", %key, "Cache put ignored; key already present");
      return false;
    }
    entries.insert(key, question);
    true
  }

  pub async fn len(&self) -> usize {
    self.entries.read().await.len()
  }

  /// Write the current entries to the backing file, if any.
  ///
  /// The snapshot is taken under the persist lock, so a later write always
  /// carries at least the entries of an earlier one.
  pub async fn persist(&self) -> Result<(), StoreError> {
    let Some(path) = &self.path else { return Ok(()) };
    let _guard = self.persist_lock.lock().await;
    let body = {
      let entries = self.entries.read().await;
      serde_json::to_string_pretty(&*entries)?
    };
    if let Some(parent) = path.parent() {
      if !parent.as_os_str().is_empty() {
        tokio::fs::create_dir_all(parent).await?;
      }
    }
    let tmp = path.with_extension("json.tmp");
    tokio::fs::write(&tmp, body).await?;
    tokio::fs::rename(&tmp, path).await?;
    Ok(())
  }

  /// Persist and log instead of failing; used after cache writes in the engine.
  pub async fn persist_logged(&self) {
    if let Err(e) = self.persist().await {
      warn!(target: "engine", error = %e, "Failed to persist question cache");
    }
  }
}
