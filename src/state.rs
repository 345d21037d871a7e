//! Application state: config, the question engine, live sessions and the session store.
//!
//! Live sessions are held behind per-session mutexes so operations on one
//! session are serialized while different sessions proceed independently.
//! A session that is not live (e.g. after a restart) is restored from the store
//! on first access.

use std::{collections::HashMap, sync::Arc};

use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, instrument, warn};

use crate::cache::QuestionCache;
use crate::config::AppConfig;
use crate::engine::QuestionEngine;
use crate::error::{ApiError, StoreError};
use crate::session::LearningSession;
use crate::source::build_source;
use crate::store::{FileSessionStore, MemorySessionStore, SessionStore};

pub type SessionHandle = Arc<Mutex<LearningSession>>;

pub struct AppState {
    pub cfg: Arc<AppConfig>,
    pub engine: QuestionEngine,
    pub store: Arc<dyn SessionStore>,
    live: RwLock<HashMap<String, SessionHandle>>,
}

impl AppState {
    /// Build state from config: pick the source, open the cache and the session store.
    #[instrument(level = "info", skip_all)]
    pub async fn new(cfg: AppConfig) -> Self {
        let cfg = Arc::new(cfg);
        let source = build_source(&cfg);

        let cache = match &cfg.engine.cache_path {
            Some(path) => match QuestionCache::load(path.clone()).await {
                Ok(c) => c,
                Err(e) => {
                    warn!(target: "recque_backend", path = %path.display(), error = %e, "Question cache unreadable; starting empty and not persisting");
                    QuestionCache::new()
                }
            },
            None => QuestionCache::new(),
        };
        let engine = QuestionEngine::from_config(source, Some(Arc::new(cache)), &cfg.engine);

        let store: Arc<dyn SessionStore> = match &cfg.server.sessions_dir {
            Some(dir) => {
                info!(target: "recque_backend", dir = %dir.display(), "Sessions persisted as JSON files");
                Arc::new(FileSessionStore::new(dir.clone()))
            }
            None => {
                info!(target: "recque_backend", "Sessions kept in memory");
                Arc::new(MemorySessionStore::new())
            }
        };

        info!(
            target: "recque_backend",
            source = engine.source_name(),
            model = %cfg.backend.model,
            prefetch_concurrency = ?cfg.engine.prefetch_concurrency,
            verify_questions = cfg.engine.verify_questions,
            "Engine ready"
        );
        Self::with_parts(cfg, engine, store)
    }

    pub fn with_parts(cfg: Arc<AppConfig>, engine: QuestionEngine, store: Arc<dyn SessionStore>) -> Self {
        Self { cfg, engine, store, live: RwLock::new(HashMap::new()) }
    }

    /// Register a freshly started session and persist it.
    pub async fn insert(&self, session: LearningSession) -> Result<SessionHandle, ApiError> {
        self.store.save(&session.snapshot()).await?;
        let id = session.id().to_string();
        let handle = Arc::new(Mutex::new(session));
        self.live.write().await.insert(id, handle.clone());
        Ok(handle)
    }

    /// Live session by id, restoring it from the store when needed.
    #[instrument(level = "debug", skip(self))]
    pub async fn session(&self, id: &str) -> Result<SessionHandle, ApiError> {
        if let Some(h) = self.live.read().await.get(id) {
            return Ok(h.clone());
        }
        let record = match self.store.load(id).await {
            Ok(r) => r,
            Err(StoreError::NotFound(_)) => return Err(ApiError::UnknownSession(id.to_string())),
            Err(e) => return Err(e.into()),
        };
        debug!(target: "session", %id, status = record.status.as_str(), "Restored session from store");
        let mut live = self.live.write().await;
        // Another request may have restored it while we were loading.
        let handle = live
            .entry(id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(LearningSession::restore(record))))
            .clone();
        Ok(handle)
    }

    /// Save an already-applied change. A failed save is logged, not returned:
    /// the in-memory session stays authoritative and the next save catches up.
    pub async fn persist(&self, session: &LearningSession) -> bool {
        match self.store.save(&session.snapshot()).await {
            Ok(()) => true,
            Err(e) => {
                warn!(target: "session", id = %session.id(), error = %e, "Session save failed; keeping it in memory");
                false
            }
        }
    }

    /// Drop a session from memory; its record stays in the store.
    pub async fn evict(&self, id: &str) {
        self.live.write().await.remove(id);
    }

    /// Prefetch remediation for the session's current top in the background.
    /// The session lock is only held to take the job and to merge the result.
    pub fn spawn_prefetch(self: &Arc<Self>, handle: SessionHandle) {
        let state = self.clone();
        tokio::spawn(async move {
            let Some(job) = handle.lock().await.prefetch_job() else { return };
            let outcome = job.run(&state.engine).await;
            // A stale result is logged and dropped by the session itself.
            let _ = handle.lock().await.apply_prefetch(outcome);
        });
    }
}
