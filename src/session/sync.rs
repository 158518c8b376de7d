// src/session/sync.rs

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::{
    sync::{Notify, RwLock},
    task::JoinHandle,
    time::{Instant, sleep_until, timeout},
};

use crate::{
    config::SessionSettings,
    error::AppError,
    models::{
        question::PublicQuestion,
        snapshot::{PersistedSnapshot, Selection},
    },
    session::ExamSession,
    store::{RemoteStore, SessionKey, SessionStore},
};

/// Decides when the next background snapshot write is due.
///
/// One scheduler replaces a separate debounce and throttle: a pending write
/// is due `debounce` after the last change or `throttle` after the first
/// unwritten change, whichever comes first, and never sooner than
/// `throttle` after the previous write. Changes that do not count toward the
/// ceiling (visits) only move the debounce deadline.
#[derive(Debug, Clone)]
pub struct WriteScheduler {
    debounce: Duration,
    throttle: Duration,
    last_change: Option<Instant>,
    first_ceiling_change: Option<Instant>,
    last_write: Option<Instant>,
    changes: u64,
}

impl WriteScheduler {
    pub fn new(debounce: Duration, throttle: Duration) -> Self {
        Self {
            debounce,
            throttle,
            last_change: None,
            first_ceiling_change: None,
            last_write: None,
            changes: 0,
        }
    }

    pub fn note_change(&mut self, now: Instant, counts_toward_ceiling: bool) {
        self.changes += 1;
        self.last_change = Some(now);
        if counts_toward_ceiling && self.first_ceiling_change.is_none() {
            self.first_ceiling_change = Some(now);
        }
    }

    pub fn due_at(&self) -> Option<Instant> {
        let last_change = self.last_change?;
        let mut due = last_change + self.debounce;
        if let Some(first) = self.first_ceiling_change {
            due = due.min(first + self.throttle);
        }
        if let Some(written) = self.last_write {
            due = due.max(written + self.throttle);
        }
        Some(due)
    }

    /// Number of changes noted so far.
    pub fn changes(&self) -> u64 {
        self.changes
    }

    pub fn mark_written(&mut self, now: Instant) {
        self.last_change = None;
        self.first_ceiling_change = None;
        self.last_write = Some(now);
    }

    /// A write covering the first `changes` changes completed. Anything
    /// noted since stays pending.
    pub fn mark_written_through(&mut self, changes: u64, now: Instant) {
        if changes >= self.changes {
            self.mark_written(now);
        } else {
            self.last_write = Some(now);
        }
    }
}

/// Keeps local storage current on every change and the remote store
/// eventually consistent with it.
///
/// Remote progress writes hold a shared guard on the `discarded` flag.
/// `discard` takes it exclusively, so it waits for writes already running
/// and every later write sees the flag and is dropped. Nothing can recreate
/// progress after a successful submission deleted it.
#[derive(Clone)]
pub struct SyncLayer {
    key: SessionKey,
    local: SessionStore,
    remote: Arc<dyn RemoteStore>,
    scheduler: Arc<Mutex<WriteScheduler>>,
    wake: Arc<Notify>,
    discarded: Arc<RwLock<bool>>,
    write_timeout: Duration,
}

impl SyncLayer {
    pub fn new(local: SessionStore, remote: Arc<dyn RemoteStore>, settings: &SessionSettings) -> Self {
        Self {
            key: local.key(),
            local,
            remote,
            scheduler: Arc::new(Mutex::new(WriteScheduler::new(
                settings.sync_debounce,
                settings.sync_throttle,
            ))),
            wake: Arc::new(Notify::new()),
            discarded: Arc::new(RwLock::new(false)),
            write_timeout: settings.write_timeout,
        }
    }

    fn scheduler(&self) -> MutexGuard<'_, WriteScheduler> {
        self.scheduler
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Writes the snapshot locally and schedules a remote write.
    ///
    /// Call while holding the session lock so the worker cannot capture an
    /// older snapshot and clear this change.
    pub fn record_change(&self, snapshot: &PersistedSnapshot, counts_toward_ceiling: bool) {
        self.local.save_snapshot(snapshot);
        self.scheduler()
            .note_change(Instant::now(), counts_toward_ceiling);
        self.wake.notify_one();
    }

    /// Changes noted so far. Read under the session lock together with the
    /// snapshot handed to `flush`.
    pub fn changes_noted(&self) -> u64 {
        self.scheduler().changes()
    }

    /// Fire-and-forget upsert of a single answer.
    pub fn write_answer_now(&self, question_id: i64, selection: Selection, revision: u64) {
        let sync = self.clone();
        tokio::spawn(async move {
            let discarded = sync.discarded.read().await;
            if *discarded {
                return;
            }
            let write = sync
                .remote
                .upsert_answer(sync.key, question_id, &selection, revision);
            let result = match timeout(sync.write_timeout, write).await {
                Ok(result) => result,
                Err(_) => Err(timed_out()),
            };
            if let Err(e) = result {
                tracing::warn!(
                    "Immediate answer write for {:?} question {} failed, the next sync will retry: {}",
                    sync.key,
                    question_id,
                    e
                );
            }
        });
    }

    /// Unload flush: writes the full snapshot now, bypassing the scheduler.
    /// Best effort; the caller may be torn down before it completes.
    ///
    /// `changes` is `changes_noted()` as of `snapshot`. Scheduled work is
    /// only cleared once the write succeeds, and never for later changes.
    pub async fn flush(&self, snapshot: &PersistedSnapshot, changes: u64) -> Result<(), AppError> {
        self.local.save_snapshot(snapshot);
        self.write_snapshot(snapshot).await?;
        self.scheduler()
            .mark_written_through(changes, Instant::now());
        Ok(())
    }

    /// Remote snapshot upsert, dropped once progress has been discarded.
    async fn write_snapshot(&self, snapshot: &PersistedSnapshot) -> Result<(), AppError> {
        let discarded = self.discarded.read().await;
        if *discarded {
            return Ok(());
        }
        match timeout(self.write_timeout, self.remote.upsert_snapshot(self.key, snapshot)).await {
            Ok(result) => result,
            Err(_) => Err(timed_out()),
        }
    }

    /// Lets the worker continue after a failed submission.
    pub fn resume(&self) {
        self.wake.notify_one();
    }

    /// Deletes local and remote progress after a successful submission.
    ///
    /// Waits for remote writes already in flight and blocks all later ones.
    pub async fn discard(&self) -> Result<(), AppError> {
        let mut discarded = self.discarded.write().await;
        *discarded = true;
        self.local.clear();
        self.wake.notify_one();
        self.remote.delete_snapshot(self.key).await
    }

    /// Runs the scheduled remote writes until the session is finished.
    pub fn spawn_worker(&self, session: Arc<tokio::sync::Mutex<ExamSession>>) -> JoinHandle<()> {
        let sync = self.clone();
        tokio::spawn(async move { sync.run_worker(session).await })
    }

    async fn run_worker(self, session: Arc<tokio::sync::Mutex<ExamSession>>) {
        loop {
            let due = self.scheduler().due_at();
            match due {
                None => {
                    self.wake.notified().await;
                    continue;
                }
                Some(at) => {
                    tokio::select! {
                        _ = self.wake.notified() => continue,
                        _ = sleep_until(at) => {}
                    }
                }
            }

            let guard = session.lock().await;
            if guard.is_finished() {
                break;
            }
            if guard.is_submitted() {
                // Pending changes wait for the submission to fail or finish.
                drop(guard);
                self.wake.notified().await;
                continue;
            }
            self.scheduler().mark_written(Instant::now());
            let snapshot = guard.snapshot();
            drop(guard);

            tracing::debug!(
                "Syncing snapshot for {:?} (revision {})",
                self.key,
                snapshot.revision
            );
            if let Err(e) = self.write_snapshot(&snapshot).await {
                tracing::warn!(
                    "Background sync for {:?} failed, will retry on the next change: {}",
                    self.key,
                    e
                );
            }
        }
        tracing::debug!("Sync worker for {:?} stopped", self.key);
    }
}

fn timed_out() -> AppError {
    AppError::ServiceUnavailable("Progress write timed out".to_string())
}

/// Finds the latest prior snapshot for this session.
///
/// Local storage is read first, then the remote store; the higher revision
/// wins and ties keep the local copy. A remote failure degrades to the local
/// copy. `None` means a fresh session.
pub async fn load_prior_snapshot(
    local: &SessionStore,
    remote: &dyn RemoteStore,
    paper: &[PublicQuestion],
) -> Option<PersistedSnapshot> {
    let local_snapshot = local.load_snapshot();
    let remote_snapshot = match remote.read_snapshot(local.key()).await {
        Ok(snapshot) => snapshot,
        Err(e) => {
            tracing::warn!(
                "Could not read remote progress for {:?}, resuming from local state: {}",
                local.key(),
                e
            );
            None
        }
    };

    let chosen = match (local_snapshot, remote_snapshot) {
        (Some(local), Some(remote)) if remote.revision > local.revision => remote,
        (Some(local), _) => local,
        (None, Some(remote)) => remote,
        (None, None) => return None,
    };
    Some(chosen.normalize(paper))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn secs(n: u64) -> Duration {
        Duration::from_secs(n)
    }

    #[test]
    fn test_idle_scheduler_has_nothing_due() {
        let scheduler = WriteScheduler::new(secs(5), secs(2));
        assert_eq!(scheduler.due_at(), None);
    }

    #[test]
    fn test_ceiling_caps_latency_under_continuous_input() {
        let t0 = Instant::now();
        let mut scheduler = WriteScheduler::new(secs(5), secs(2));

        scheduler.note_change(t0, true);
        scheduler.note_change(t0 + Duration::from_millis(900), true);
        scheduler.note_change(t0 + Duration::from_millis(1800), true);
        assert_eq!(scheduler.due_at(), Some(t0 + secs(2)));

        scheduler.mark_written(t0 + secs(2));
        assert_eq!(scheduler.due_at(), None);

        scheduler.note_change(t0 + Duration::from_millis(2100), true);
        assert_eq!(scheduler.due_at(), Some(t0 + Duration::from_millis(4100)));
    }

    #[test]
    fn test_minimum_gap_between_writes() {
        let t0 = Instant::now();
        let mut scheduler = WriteScheduler::new(secs(1), secs(2));

        scheduler.note_change(t0, true);
        assert_eq!(scheduler.due_at(), Some(t0 + secs(1)));
        scheduler.mark_written(t0 + secs(1));

        scheduler.note_change(t0 + Duration::from_millis(1200), true);
        assert_eq!(scheduler.due_at(), Some(t0 + secs(3)));
    }

    #[test]
    fn test_visits_only_debounce() {
        let t0 = Instant::now();
        let mut scheduler = WriteScheduler::new(secs(5), secs(2));

        scheduler.note_change(t0, false);
        scheduler.note_change(t0 + secs(3), false);
        assert_eq!(scheduler.due_at(), Some(t0 + secs(8)));

        scheduler.note_change(t0 + secs(4), true);
        assert_eq!(scheduler.due_at(), Some(t0 + secs(6)));
    }

    #[test]
    fn test_write_keeps_later_changes_pending() {
        let t0 = Instant::now();
        let mut scheduler = WriteScheduler::new(secs(5), secs(2));

        scheduler.note_change(t0, true);
        let written = scheduler.changes();
        scheduler.note_change(t0 + secs(1), true);

        scheduler.mark_written_through(written, t0 + secs(1));
        assert_eq!(scheduler.due_at(), Some(t0 + secs(3)));

        scheduler.mark_written_through(scheduler.changes(), t0 + secs(3));
        assert_eq!(scheduler.due_at(), None);
    }

    #[test]
    fn test_debounce_wins_when_shorter() {
        let t0 = Instant::now();
        let mut scheduler = WriteScheduler::new(secs(1), secs(10));
        scheduler.note_change(t0, true);
        scheduler.note_change(t0 + secs(2), true);
        assert_eq!(scheduler.due_at(), Some(t0 + secs(3)));
    }
}
