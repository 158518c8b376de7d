// src/store/memory.rs

//! In-process stores. Used when no database is configured and by the tests;
//! the remote store can simulate latency and outages.

use std::{
    collections::HashMap,
    sync::{
        Mutex, MutexGuard,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::{
    error::AppError,
    models::{
        attempt::AttemptRecord,
        quiz::QuizDefinition,
        snapshot::{PersistedSnapshot, Selection, StoredSnapshot},
    },
    store::{KeyValueStore, QuizCatalog, RemoteStore, SessionKey},
};

#[derive(Debug, Default)]
pub struct MemoryKv {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryKv {
    fn entries(&self) -> MutexGuard<'_, HashMap<String, String>> {
        self.entries.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl KeyValueStore for MemoryKv {
    fn get(&self, key: &str) -> Option<String> {
        self.entries().get(key).cloned()
    }

    fn set(&self, key: &str, value: String) {
        self.entries().insert(key.to_string(), value);
    }

    fn remove(&self, key: &str) {
        self.entries().remove(key);
    }
}

#[derive(Debug, Default)]
struct Tables {
    quizzes: HashMap<i64, QuizDefinition>,
    progress: HashMap<SessionKey, Value>,
    attempts: Vec<(i64, AttemptRecord)>,
}

/// Remote store and quiz catalog backed by process memory.
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
    attempt_write_delay: Mutex<Option<Duration>>,
    answer_write_delay: Mutex<Option<Duration>>,
    unavailable: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn tables(&self) -> MutexGuard<'_, Tables> {
        self.tables.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn insert_quiz(&self, quiz: QuizDefinition) {
        self.tables().quizzes.insert(quiz.id, quiz);
    }

    /// Raw stored progress document for `key`.
    pub fn progress(&self, key: SessionKey) -> Option<Value> {
        self.tables().progress.get(&key).cloned()
    }

    /// Stores a raw progress document as-is, e.g. one in an older encoding.
    pub fn seed_progress(&self, key: SessionKey, doc: Value) {
        self.tables().progress.insert(key, doc);
    }

    pub fn attempts(&self, key: SessionKey) -> Vec<AttemptRecord> {
        self.tables()
            .attempts
            .iter()
            .filter(|(_, r)| r.quiz_id == key.quiz_id && r.user_id == key.user_id)
            .map(|(_, r)| r.clone())
            .collect()
    }

    /// Delays attempt inserts, to exercise submission timeouts.
    pub fn set_attempt_write_delay(&self, delay: Option<Duration>) {
        *lock_delay(&self.attempt_write_delay) = delay;
    }

    /// Delays single-answer upserts, so they land late.
    pub fn set_answer_write_delay(&self, delay: Option<Duration>) {
        *lock_delay(&self.answer_write_delay) = delay;
    }

    /// Makes every remote call fail as if the network were down.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn check_available(&self) -> Result<(), AppError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(AppError::ServiceUnavailable(
                "memory store marked unavailable".to_string(),
            ));
        }
        Ok(())
    }
}

fn lock_delay(slot: &Mutex<Option<Duration>>) -> MutexGuard<'_, Option<Duration>> {
    slot.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

async fn simulate_latency(slot: &Mutex<Option<Duration>>) {
    let delay = *lock_delay(slot);
    if let Some(delay) = delay {
        tokio::time::sleep(delay).await;
    }
}

fn stored_revision(doc: &Value) -> u64 {
    doc.get("revision").and_then(Value::as_u64).unwrap_or(0)
}

#[async_trait]
impl RemoteStore for MemoryStore {
    async fn upsert_snapshot(
        &self,
        key: SessionKey,
        snapshot: &PersistedSnapshot,
    ) -> Result<(), AppError> {
        self.check_available()?;
        let incoming = snapshot.to_value()?;
        let mut tables = self.tables();
        let stale = tables
            .progress
            .get(&key)
            .is_some_and(|current| stored_revision(current) > snapshot.revision);
        if stale {
            tracing::debug!(
                "Ignoring stale snapshot for {:?} (revision {})",
                key,
                snapshot.revision
            );
            return Ok(());
        }
        tables.progress.insert(key, incoming);
        Ok(())
    }

    async fn upsert_answer(
        &self,
        key: SessionKey,
        question_id: i64,
        selection: &Selection,
        revision: u64,
    ) -> Result<(), AppError> {
        self.check_available()?;
        simulate_latency(&self.answer_write_delay).await;
        let answer = serde_json::to_value(selection)?;
        let mut tables = self.tables();
        let doc = tables
            .progress
            .entry(key)
            .or_insert_with(|| Value::Object(Map::new()));

        let merged_revision = stored_revision(doc).max(revision);
        if let Value::Object(fields) = doc {
            let answers = fields
                .entry("answers")
                .or_insert_with(|| Value::Object(Map::new()));
            if let Value::Object(answers) = answers {
                answers.insert(question_id.to_string(), answer);
            }
            fields.insert("revision".to_string(), Value::from(merged_revision));
        }
        Ok(())
    }

    async fn read_snapshot(&self, key: SessionKey) -> Result<Option<StoredSnapshot>, AppError> {
        self.check_available()?;
        let doc = self.tables().progress.get(&key).cloned();
        match doc {
            Some(doc) => Ok(Some(StoredSnapshot::from_value(doc)?)),
            None => Ok(None),
        }
    }

    async fn delete_snapshot(&self, key: SessionKey) -> Result<(), AppError> {
        self.check_available()?;
        self.tables().progress.remove(&key);
        Ok(())
    }

    async fn insert_attempt(&self, record: &AttemptRecord) -> Result<i64, AppError> {
        self.check_available()?;
        simulate_latency(&self.attempt_write_delay).await;

        let mut tables = self.tables();
        let id = tables.attempts.len() as i64 + 1;
        tables.attempts.push((id, record.clone()));
        Ok(id)
    }

    async fn count_attempts(&self, key: SessionKey) -> Result<i64, AppError> {
        self.check_available()?;
        Ok(self
            .tables()
            .attempts
            .iter()
            .filter(|(_, r)| r.quiz_id == key.quiz_id && r.user_id == key.user_id)
            .count() as i64)
    }
}

#[async_trait]
impl QuizCatalog for MemoryStore {
    async fn quiz(&self, quiz_id: i64) -> Result<Option<QuizDefinition>, AppError> {
        self.check_available()?;
        Ok(self.tables().quizzes.get(&quiz_id).cloned())
    }
}
