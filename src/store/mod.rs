// src/store/mod.rs

//! Storage collaborators of the exam session core.
//!
//! * `KeyValueStore` / `SessionStore`: fast local cache for the timer anchor
//!   and the latest snapshot, synchronous like browser session storage.
//! * `RemoteStore`: durable progress snapshots and attempt records.
//! * `QuizCatalog`: quiz definitions including answer keys.

pub mod memory;
pub mod postgres;

use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;

use crate::{
    error::AppError,
    models::{
        attempt::AttemptRecord,
        quiz::QuizDefinition,
        snapshot::{PersistedSnapshot, Selection, StoredSnapshot, TimerAnchor},
    },
};

/// Identifies one student's attempt at one quiz.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct SessionKey {
    pub quiz_id: i64,
    pub user_id: i64,
}

impl SessionKey {
    pub fn new(quiz_id: i64, user_id: i64) -> Self {
        Self { quiz_id, user_id }
    }

    fn storage_key(&self, slot: &str) -> String {
        format!("quiz-{}-{}-{}", self.quiz_id, self.user_id, slot)
    }
}

/// Synchronous string key-value storage.
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;
    fn set(&self, key: &str, value: String);
    fn remove(&self, key: &str);
}

/// Typed view of a `KeyValueStore` scoped to one `SessionKey`.
#[derive(Clone)]
pub struct SessionStore {
    key: SessionKey,
    kv: Arc<dyn KeyValueStore>,
}

impl SessionStore {
    const TIMER: &'static str = "timer";
    const PROGRESS: &'static str = "progress";

    pub fn new(kv: Arc<dyn KeyValueStore>, key: SessionKey) -> Self {
        Self { key, kv }
    }

    pub fn key(&self) -> SessionKey {
        self.key
    }

    /// Returns `None` when absent or unreadable.
    pub fn load_anchor(&self) -> Option<TimerAnchor> {
        let raw = self.kv.get(&self.key.storage_key(Self::TIMER))?;
        match serde_json::from_str(&raw) {
            Ok(anchor) => Some(anchor),
            Err(e) => {
                tracing::warn!("Discarding unreadable timer anchor for {:?}: {}", self.key, e);
                None
            }
        }
    }

    pub fn save_anchor(&self, anchor: &TimerAnchor) {
        match serde_json::to_string(anchor) {
            Ok(raw) => self.kv.set(&self.key.storage_key(Self::TIMER), raw),
            Err(e) => tracing::error!("Failed to encode timer anchor: {}", e),
        }
    }

    pub fn clear_anchor(&self) {
        self.kv.remove(&self.key.storage_key(Self::TIMER));
    }

    pub fn load_snapshot(&self) -> Option<StoredSnapshot> {
        let raw = self.kv.get(&self.key.storage_key(Self::PROGRESS))?;
        match StoredSnapshot::from_json(&raw) {
            Ok(snapshot) => Some(snapshot),
            Err(e) => {
                tracing::warn!("Discarding unreadable local snapshot for {:?}: {}", self.key, e);
                None
            }
        }
    }

    pub fn save_snapshot(&self, snapshot: &PersistedSnapshot) {
        match snapshot.to_json() {
            Ok(raw) => self.kv.set(&self.key.storage_key(Self::PROGRESS), raw),
            Err(e) => tracing::error!("Failed to encode snapshot: {}", e),
        }
    }

    /// Removes everything stored for this session.
    pub fn clear(&self) {
        self.clear_anchor();
        self.kv.remove(&self.key.storage_key(Self::PROGRESS));
    }
}

/// Durable store for progress snapshots and attempt records.
///
/// Snapshot writes are idempotent upserts keyed by `SessionKey`. A full
/// snapshot replaces the stored one only if its revision is not older; a
/// single-answer write merges into whatever is stored.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    async fn upsert_snapshot(
        &self,
        key: SessionKey,
        snapshot: &PersistedSnapshot,
    ) -> Result<(), AppError>;

    async fn upsert_answer(
        &self,
        key: SessionKey,
        question_id: i64,
        selection: &Selection,
        revision: u64,
    ) -> Result<(), AppError>;

    async fn read_snapshot(&self, key: SessionKey) -> Result<Option<StoredSnapshot>, AppError>;

    async fn delete_snapshot(&self, key: SessionKey) -> Result<(), AppError>;

    /// Returns the new record's id.
    async fn insert_attempt(&self, record: &AttemptRecord) -> Result<i64, AppError>;

    async fn count_attempts(&self, key: SessionKey) -> Result<i64, AppError>;
}

#[async_trait]
pub trait QuizCatalog: Send + Sync {
    async fn quiz(&self, quiz_id: i64) -> Result<Option<QuizDefinition>, AppError>;
}
