// src/session/handle.rs

use std::{collections::HashMap, sync::Arc};

use serde::Serialize;
use tokio::{
    sync::{Mutex, watch},
    task::JoinHandle,
    time::MissedTickBehavior,
};

use crate::{
    clock::Clock,
    config::SessionSettings,
    error::{AppError, SubmitError},
    models::{
        attempt::{SubmitReceipt, SubmitTrigger},
        snapshot::Selection,
    },
    session::{
        ExamSession, SessionView,
        integrity::{Violation, ViolationOutcome},
        submit::SubmissionOrchestrator,
        sync::{self, SyncLayer},
    },
    store::{KeyValueStore, QuizCatalog, RemoteStore, SessionKey, SessionStore},
};

/// Collaborators every session needs.
#[derive(Clone)]
pub struct SessionDeps {
    pub remote: Arc<dyn RemoteStore>,
    pub catalog: Arc<dyn QuizCatalog>,
    pub local: Arc<dyn KeyValueStore>,
    pub clock: Arc<dyn Clock>,
    pub settings: SessionSettings,
}

/// Result of a violation report, including the forced submission if the
/// report crossed the threshold.
#[derive(Debug, Serialize)]
pub struct ViolationReport {
    #[serde(flatten)]
    pub outcome: ViolationOutcome,
    pub receipt: Option<SubmitReceipt>,
    pub submit_error: Option<String>,
}

/// A live session with its background ticker and sync worker.
///
/// Dropping the handle stops both tasks.
pub struct SessionHandle {
    key: SessionKey,
    state: Arc<Mutex<ExamSession>>,
    sync: SyncLayer,
    orchestrator: SubmissionOrchestrator,
    remaining: Arc<watch::Sender<i64>>,
    tasks: Vec<JoinHandle<()>>,
}

impl SessionHandle {
    /// Starts a new attempt or resumes the stored one.
    pub async fn open(
        deps: SessionDeps,
        key: SessionKey,
        user_name: String,
    ) -> Result<Arc<Self>, AppError> {
        let quiz = deps
            .catalog
            .quiz(key.quiz_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Quiz {} not found", key.quiz_id)))?;

        let local = SessionStore::new(deps.local.clone(), key);
        let prior = sync::load_prior_snapshot(&local, deps.remote.as_ref(), &quiz.paper()).await;
        match &prior {
            Some(snapshot) => tracing::info!(
                "Resuming session {:?} at revision {}",
                key,
                snapshot.revision
            ),
            None => tracing::info!("Starting session {:?} for '{}'", key, user_name),
        }

        let session = ExamSession::new(
            key,
            user_name,
            &quiz,
            prior,
            local.clone(),
            deps.clock.clone(),
            &deps.settings,
        );
        let sync = SyncLayer::new(local, deps.remote.clone(), &deps.settings);
        sync.record_change(&session.snapshot(), true);

        let (remaining, _) = watch::channel(session.remaining_secs());
        let remaining = Arc::new(remaining);
        let state = Arc::new(Mutex::new(session));
        let orchestrator = SubmissionOrchestrator::new(
            deps.remote.clone(),
            deps.catalog.clone(),
            deps.clock.clone(),
            sync.clone(),
            deps.settings.clone(),
        );

        let worker = sync.spawn_worker(state.clone());
        let ticker = spawn_ticker(
            state.clone(),
            orchestrator.clone(),
            remaining.clone(),
            deps.settings.tick_interval,
        );

        Ok(Arc::new(Self {
            key,
            state,
            sync,
            orchestrator,
            remaining,
            tasks: vec![worker, ticker],
        }))
    }

    pub fn key(&self) -> SessionKey {
        self.key
    }

    /// Remaining seconds as of the latest tick.
    pub fn subscribe_remaining(&self) -> watch::Receiver<i64> {
        self.remaining.subscribe()
    }

    pub async fn view(&self) -> SessionView {
        self.state.lock().await.view()
    }

    pub async fn is_finished(&self) -> bool {
        self.state.lock().await.is_finished()
    }

    /// Applies a mutation, writes the snapshot locally and schedules sync.
    async fn mutate<T>(
        &self,
        counts_toward_ceiling: bool,
        apply: impl FnOnce(&mut ExamSession) -> Result<T, AppError>,
    ) -> Result<(T, u64), AppError> {
        let mut session = self.state.lock().await;
        let value = apply(&mut session)?;
        let snapshot = session.snapshot();
        self.sync.record_change(&snapshot, counts_toward_ceiling);
        Ok((value, snapshot.revision))
    }

    pub async fn select_option(
        &self,
        question_id: i64,
        option_index: usize,
    ) -> Result<Selection, AppError> {
        let (selection, revision) = self
            .mutate(true, |s| s.select_option(question_id, option_index))
            .await?;
        self.sync
            .write_answer_now(question_id, selection.clone(), revision);
        Ok(selection)
    }

    pub async fn toggle_flag(&self, question_id: i64) -> Result<bool, AppError> {
        Ok(self.mutate(true, |s| s.toggle_flag(question_id)).await?.0)
    }

    pub async fn toggle_bookmark(&self, question_id: i64) -> Result<bool, AppError> {
        Ok(self.mutate(true, |s| s.toggle_bookmark(question_id)).await?.0)
    }

    pub async fn toggle_mark_for_review(&self, question_id: i64) -> Result<bool, AppError> {
        Ok(self
            .mutate(true, |s| s.toggle_mark_for_review(question_id))
            .await?
            .0)
    }

    pub async fn visit(&self, question_id: i64) -> Result<bool, AppError> {
        Ok(self.mutate(false, |s| s.visit(question_id)).await?.0)
    }

    /// Connectivity change reported by the client. Returns whether the
    /// timer's pause state changed.
    pub async fn set_online(&self, online: bool) -> bool {
        let mut session = self.state.lock().await;
        let changed = if online {
            session.go_online()
        } else {
            session.go_offline()
        };
        if changed {
            tracing::info!(
                "Session {:?} went {}",
                self.key,
                if online { "online" } else { "offline" }
            );
            self.sync.record_change(&session.snapshot(), false);
        }
        changed
    }

    /// Counts a violation and force-submits once the threshold is reached.
    pub async fn report_violation(&self, violation: Violation) -> ViolationReport {
        let outcome = {
            let mut session = self.state.lock().await;
            let finished = session.is_finished();
            let outcome = session.record_violation(violation);
            if !finished {
                self.sync.record_change(&session.snapshot(), true);
            }
            outcome
        };
        tracing::warn!(
            "Integrity violation {:?} in {:?} ({} so far)",
            violation,
            self.key,
            outcome.violation_count
        );

        let mut report = ViolationReport {
            outcome,
            receipt: None,
            submit_error: None,
        };
        if report.outcome.force_submit {
            match self.submit(SubmitTrigger::IntegrityViolation).await {
                Ok(receipt) => report.receipt = Some(receipt),
                Err(e) => report.submit_error = Some(e.user_message()),
            }
        }
        report
    }

    /// Page teardown: push the full snapshot to the remote store now.
    pub async fn flush(&self) -> Result<(), AppError> {
        let (snapshot, changes) = {
            let session = self.state.lock().await;
            if session.is_submitted() {
                return Ok(());
            }
            (session.snapshot(), self.sync.changes_noted())
        };
        self.sync.flush(&snapshot, changes).await
    }

    pub async fn submit(&self, trigger: SubmitTrigger) -> Result<SubmitReceipt, SubmitError> {
        self.orchestrator.submit(&self.state, trigger).await
    }
}

impl Drop for SessionHandle {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

/// Ticks the timer, publishes remaining time and submits on expiry.
/// Ticks are skipped while a submission is in flight; the loop ends once
/// the session is done.
fn spawn_ticker(
    state: Arc<Mutex<ExamSession>>,
    orchestrator: SubmissionOrchestrator,
    remaining: Arc<watch::Sender<i64>>,
    interval: std::time::Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticks = tokio::time::interval(interval);
        ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticks.tick().await;
            let tick = {
                let mut session = state.lock().await;
                if session.is_finished() {
                    break;
                }
                if session.is_submitted() {
                    continue;
                }
                session.tick()
            };
            remaining.send_replace(tick.remaining_secs);

            if tick.expired {
                match orchestrator.submit(&state, SubmitTrigger::TimeExpired).await {
                    Ok(receipt) => tracing::info!("Time expired, attempt {} recorded", receipt.attempt_id),
                    Err(e) => tracing::warn!("Time expired but submission failed: {}", e),
                }
            }
        }
    })
}

/// Live sessions, one per `SessionKey`.
#[derive(Clone, Default)]
pub struct SessionRegistry {
    sessions: Arc<Mutex<HashMap<SessionKey, Arc<SessionHandle>>>>,
}

impl SessionRegistry {
    /// Returns the live session for `key`, opening (or resuming) one if
    /// there is none. A finished session is replaced by a new attempt.
    pub async fn open(
        &self,
        deps: &SessionDeps,
        key: SessionKey,
        user_name: String,
    ) -> Result<Arc<SessionHandle>, AppError> {
        let mut sessions = self.sessions.lock().await;
        if let Some(handle) = sessions.get(&key) {
            if !handle.is_finished().await {
                return Ok(handle.clone());
            }
        }

        let handle = SessionHandle::open(deps.clone(), key, user_name).await?;
        sessions.insert(key, handle.clone());
        Ok(handle)
    }

    /// Returns the live session for `key`, dropping it if it has finished.
    pub async fn get(&self, key: SessionKey) -> Option<Arc<SessionHandle>> {
        let mut sessions = self.sessions.lock().await;
        let handle = sessions.get(&key)?.clone();
        if handle.is_finished().await {
            sessions.remove(&key);
            return None;
        }
        Some(handle)
    }

    pub async fn remove(&self, key: SessionKey) {
        self.sessions.lock().await.remove(&key);
    }
}
