// tests/session_tests.rs

use std::{sync::Arc, time::Duration};

use chrono::{TimeZone, Utc};
use exam_session::{
    clock::ManualClock,
    config::SessionSettings,
    error::{AppError, SubmitError},
    models::{
        attempt::SubmitTrigger,
        question::{Question, QuestionOption, QuestionType},
        quiz::QuizDefinition,
        snapshot::Selection,
    },
    session::{
        SubmitPhase,
        handle::{SessionDeps, SessionHandle, SessionRegistry},
        integrity::Violation,
    },
    store::{
        KeyValueStore, SessionKey,
        memory::{MemoryKv, MemoryStore},
    },
};
use serde_json::json;

const T0: i64 = 1_700_000_000_000;
const QUIZ_ID: i64 = 1;
const USER_ID: i64 = 7;

fn option(text: &str, is_correct: bool) -> QuestionOption {
    QuestionOption {
        text: text.to_string(),
        is_correct,
    }
}

/// Two questions: a single-choice worth 4 marks and a multiple-choice worth 2.
fn quiz(duration_minutes: i64) -> QuizDefinition {
    QuizDefinition {
        id: QUIZ_ID,
        title: "Geography".to_string(),
        duration_minutes: Some(duration_minutes),
        max_attempts: None,
        passing_score: None,
        start_time: None,
        end_time: None,
        questions: vec![
            Question {
                id: 1,
                section_id: None,
                question_type: QuestionType::Single,
                content: "Capital of France".to_string(),
                options: vec![option("Paris", true), option("Berlin", false), option("Rome", false)],
                marks: Some(4.0),
            },
            Question {
                id: 2,
                section_id: None,
                question_type: QuestionType::Multiple,
                content: "Pick the primes".to_string(),
                options: vec![option("Two", true), option("Four", false), option("Five", true)],
                marks: Some(2.0),
            },
        ],
    }
}

struct Harness {
    store: Arc<MemoryStore>,
    kv: Arc<MemoryKv>,
    clock: Arc<ManualClock>,
    settings: SessionSettings,
}

impl Harness {
    fn new(quiz: QuizDefinition) -> Self {
        let store = Arc::new(MemoryStore::new());
        store.insert_quiz(quiz);
        Self {
            store,
            kv: Arc::new(MemoryKv::default()),
            clock: Arc::new(ManualClock::new(T0)),
            settings: SessionSettings::default(),
        }
    }

    fn key(&self) -> SessionKey {
        SessionKey::new(QUIZ_ID, USER_ID)
    }

    fn deps(&self) -> SessionDeps {
        SessionDeps {
            remote: self.store.clone(),
            catalog: self.store.clone(),
            local: self.kv.clone(),
            clock: self.clock.clone(),
            settings: self.settings.clone(),
        }
    }

    async fn open(&self) -> Arc<SessionHandle> {
        SessionHandle::open(self.deps(), self.key(), "Ada".to_string())
            .await
            .expect("session should open")
    }
}

#[tokio::test(start_paused = true)]
async fn test_reload_keeps_timer_and_answers() {
    let harness = Harness::new(quiz(10));
    let handle = harness.open().await;
    handle.select_option(1, 0).await.unwrap();
    handle.toggle_flag(2).await.unwrap();

    harness.clock.advance_secs(120);
    drop(handle);

    let handle = harness.open().await;
    let view = handle.view().await;
    // Ten configured minutes are raised to the 30 minute fallback.
    assert_eq!(view.remaining_secs, 1800 - 120);
    assert_eq!(view.answers.get(&1), Some(&Selection::from([0])));
    assert_eq!(view.flagged, vec![2]);
}

#[tokio::test(start_paused = true)]
async fn test_offline_time_is_not_counted() {
    let harness = Harness::new(quiz(10));
    let handle = harness.open().await;

    harness.clock.advance_secs(60);
    assert!(handle.set_online(false).await);
    assert!(!handle.set_online(false).await);
    harness.clock.advance_secs(100);
    assert!(handle.view().await.paused);
    assert!(handle.set_online(true).await);

    assert_eq!(handle.view().await.remaining_secs, 1800 - 60);
}

#[tokio::test(start_paused = true)]
async fn test_duration_is_at_least_the_fallback() {
    let harness = Harness::new(quiz(45));
    assert_eq!(harness.open().await.view().await.remaining_secs, 45 * 60);

    let mut harness = Harness::new(quiz(45));
    harness.settings.fallback_duration_minutes = 60;
    assert_eq!(harness.open().await.view().await.remaining_secs, 60 * 60);
}

#[tokio::test(start_paused = true)]
async fn test_resume_normalizes_legacy_remote_answers() {
    let harness = Harness::new(quiz(10));
    harness.store.seed_progress(
        harness.key(),
        json!({
            "revision": 3,
            "answers": { "1": "0", "2": "[\"Two\", \"Five\"]" },
            "flagged": { "2": "true" },
            "timer": { "startedAtEpochMs": T0 - 300_000, "durationMs": 600_000 }
        }),
    );

    let handle = harness.open().await;
    let view = handle.view().await;
    assert_eq!(view.answers.get(&1), Some(&Selection::from([0])));
    assert_eq!(view.answers.get(&2), Some(&Selection::from([0, 2])));
    assert_eq!(view.flagged, vec![2]);
    assert_eq!(view.revision, 3);
    // The remote anchor is restored because there is no local one.
    assert_eq!(view.remaining_secs, 300);
}

#[tokio::test(start_paused = true)]
async fn test_higher_remote_revision_wins_over_local() {
    let harness = Harness::new(quiz(10));
    harness.kv.set(
        "quiz-1-7-progress",
        json!({ "revision": 2, "answers": { "1": [1] } }).to_string(),
    );
    harness.store.seed_progress(
        harness.key(),
        json!({ "revision": 5, "answers": { "1": [2] } }),
    );

    let handle = harness.open().await;
    assert_eq!(handle.view().await.answers.get(&1), Some(&Selection::from([2])));
}

#[tokio::test(start_paused = true)]
async fn test_answer_is_written_immediately() {
    let harness = Harness::new(quiz(10));
    let handle = harness.open().await;
    handle.select_option(2, 2).await.unwrap();

    // Well before any scheduled snapshot write would be due.
    tokio::time::sleep(Duration::from_millis(50)).await;

    let progress = harness.store.progress(harness.key()).expect("progress stored");
    assert_eq!(progress["answers"]["2"], json!([2]));
}

#[tokio::test(start_paused = true)]
async fn test_background_sync_catches_up() {
    let harness = Harness::new(quiz(10));
    let handle = harness.open().await;
    handle.toggle_bookmark(1).await.unwrap();
    handle.visit(2).await.unwrap();

    tokio::time::sleep(Duration::from_secs(8)).await;

    let progress = harness.store.progress(harness.key()).expect("progress stored");
    assert_eq!(progress["bookmarked"]["1"], json!(true));
    assert_eq!(progress["visited"]["2"], json!(true));
    assert_eq!(progress["currentQuestion"], json!(1));
    assert_eq!(progress["revision"], json!(handle.view().await.revision));
}

#[tokio::test(start_paused = true)]
async fn test_flush_writes_latest_snapshot() {
    let harness = Harness::new(quiz(10));
    let handle = harness.open().await;
    handle.toggle_mark_for_review(1).await.unwrap();

    handle.flush().await.unwrap();

    let progress = harness.store.progress(harness.key()).expect("progress stored");
    assert_eq!(progress["markedForReview"]["1"], json!(true));
}

#[tokio::test(start_paused = true)]
async fn test_failed_flush_keeps_change_pending() {
    let harness = Harness::new(quiz(10));
    let handle = harness.open().await;
    handle.toggle_flag(1).await.unwrap();

    harness.store.set_unavailable(true);
    assert!(handle.flush().await.is_err());
    harness.store.set_unavailable(false);

    // The background sync still owes the remote store this change.
    tokio::time::sleep(Duration::from_secs(8)).await;
    let progress = harness.store.progress(harness.key()).expect("progress stored");
    assert_eq!(progress["flagged"]["1"], json!(true));
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_submits_write_one_record() {
    let harness = Harness::new(quiz(10));
    harness
        .store
        .set_attempt_write_delay(Some(Duration::from_millis(200)));
    let handle = harness.open().await;
    handle.select_option(1, 0).await.unwrap();

    let (first, second) = tokio::join!(
        handle.submit(SubmitTrigger::Manual),
        handle.submit(SubmitTrigger::Manual)
    );

    let outcomes = [first, second];
    assert_eq!(outcomes.iter().filter(|o| o.is_ok()).count(), 1);
    assert!(
        outcomes
            .iter()
            .any(|o| matches!(o, Err(SubmitError::AlreadySubmitted)))
    );
    assert_eq!(harness.store.attempts(harness.key()).len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_submit_scores_and_clears_progress() {
    let harness = Harness::new(quiz(10));
    let handle = harness.open().await;
    handle.select_option(1, 0).await.unwrap();
    handle.select_option(2, 0).await.unwrap();
    handle.toggle_flag(2).await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    harness.clock.advance_secs(90);

    let receipt = handle.submit(SubmitTrigger::Manual).await.unwrap();

    assert_eq!(receipt.score.obtained_marks, 5.0);
    assert_eq!(receipt.score.total_marks, 6.0);
    assert_eq!(receipt.score.percentage, 83);
    assert_eq!(receipt.score.correct_count, 1);
    assert!(receipt.score.passed);
    assert_eq!(receipt.redirect_after_ms, 2000);

    let records = harness.store.attempts(harness.key());
    assert_eq!(records.len(), 1);
    let record = &records[0];
    assert_eq!(record.user_name, "Ada");
    assert_eq!(record.time_taken_secs, 90);
    assert_eq!(record.flagged, vec![2]);
    assert_eq!(record.answers[&1].selected_texts, vec!["Paris".to_string()]);

    assert!(handle.is_finished().await);
    assert!(harness.store.progress(harness.key()).is_none());
    assert!(harness.kv.get("quiz-1-7-progress").is_none());
    assert!(harness.kv.get("quiz-1-7-timer").is_none());
}

#[tokio::test(start_paused = true)]
async fn test_late_answer_write_does_not_recreate_progress() {
    let harness = Harness::new(quiz(10));
    harness
        .store
        .set_answer_write_delay(Some(Duration::from_millis(500)));
    let handle = harness.open().await;
    handle.select_option(1, 0).await.unwrap();

    let receipt = handle.submit(SubmitTrigger::Manual).await.unwrap();
    assert_eq!(receipt.score.obtained_marks, 4.0);
    tokio::time::sleep(Duration::from_secs(1)).await;

    assert!(harness.store.progress(harness.key()).is_none());
    assert!(harness.kv.get("quiz-1-7-progress").is_none());

    let next = harness.open().await;
    let view = next.view().await;
    assert_eq!(view.revision, 0);
    assert!(view.answers.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_mutations_rejected_after_submit() {
    let harness = Harness::new(quiz(10));
    let handle = harness.open().await;
    handle.submit(SubmitTrigger::Manual).await.unwrap();

    assert!(matches!(handle.select_option(1, 0).await, Err(AppError::Conflict(_))));
    assert!(matches!(handle.toggle_flag(1).await, Err(AppError::Conflict(_))));
    assert!(matches!(
        handle.submit(SubmitTrigger::Manual).await,
        Err(SubmitError::AlreadySubmitted)
    ));
    assert_eq!(harness.store.attempts(harness.key()).len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_third_violation_forces_one_submission() {
    let harness = Harness::new(quiz(10));
    let handle = harness.open().await;

    let first = handle.report_violation(Violation::TabHidden).await;
    let second = handle.report_violation(Violation::FullscreenExit).await;
    assert!(!first.outcome.force_submit && first.receipt.is_none());
    assert!(!second.outcome.force_submit && second.receipt.is_none());

    let third = handle.report_violation(Violation::TabHidden).await;
    assert!(third.outcome.force_submit);
    let receipt = third.receipt.expect("forced submission receipt");
    assert_eq!(receipt.trigger, SubmitTrigger::IntegrityViolation);

    let fourth = handle.report_violation(Violation::TabHidden).await;
    assert!(!fourth.outcome.force_submit);
    assert!(fourth.receipt.is_none());

    let records = harness.store.attempts(harness.key());
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].violation_count, 3);
}

#[tokio::test(start_paused = true)]
async fn test_violation_during_failed_submission_is_kept() {
    let harness = Harness::new(quiz(10));
    harness
        .store
        .set_attempt_write_delay(Some(Duration::from_secs(30)));
    let handle = harness.open().await;
    handle.report_violation(Violation::TabHidden).await;
    handle.report_violation(Violation::TabHidden).await;

    let (submitted, report) = tokio::join!(handle.submit(SubmitTrigger::Manual), async {
        tokio::time::sleep(Duration::from_secs(1)).await;
        handle.report_violation(Violation::FullscreenExit).await
    });

    // Counted, but the submission already in flight is not duplicated.
    assert_eq!(report.outcome.violation_count, 3);
    assert!(!report.outcome.force_submit);
    assert!(report.receipt.is_none());

    assert!(matches!(submitted, Err(SubmitError::WriteTimedOut)));
    let view = handle.view().await;
    assert_eq!(view.phase, SubmitPhase::InProgress);
    assert_eq!(view.violation_count, 3);
}

#[tokio::test(start_paused = true)]
async fn test_expiry_submits_once() {
    let harness = Harness::new(quiz(1));
    let handle = harness.open().await;
    let mut remaining = handle.subscribe_remaining();

    tokio::time::sleep(Duration::from_millis(1500)).await;
    assert_eq!(*remaining.borrow_and_update(), 1800);

    harness.clock.advance_secs(1801);
    tokio::time::sleep(Duration::from_secs(3)).await;

    assert!(handle.is_finished().await);
    let records = harness.store.attempts(harness.key());
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].trigger, SubmitTrigger::TimeExpired);

    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(harness.store.attempts(harness.key()).len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_attempt_limit_reopens_session() {
    let mut limited = quiz(10);
    limited.max_attempts = Some(1);
    let harness = Harness::new(limited);

    harness
        .open()
        .await
        .submit(SubmitTrigger::Manual)
        .await
        .unwrap();

    let handle = harness.open().await;
    let err = handle.submit(SubmitTrigger::Manual).await.unwrap_err();
    assert!(matches!(err, SubmitError::MaxAttemptsReached { max_attempts: 1 }));
    assert_eq!(handle.view().await.phase, SubmitPhase::InProgress);
    assert!(handle.select_option(1, 1).await.is_ok());
    assert_eq!(harness.store.attempts(harness.key()).len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_closed_window_rejects_submission() {
    let mut windowed = quiz(10);
    windowed.end_time = Utc.timestamp_millis_opt(T0 - 1000).single();
    let harness = Harness::new(windowed);
    let handle = harness.open().await;

    let err = handle.submit(SubmitTrigger::Manual).await.unwrap_err();
    assert!(matches!(err, SubmitError::WindowClosed));
    assert_eq!(handle.view().await.phase, SubmitPhase::InProgress);
}

#[tokio::test(start_paused = true)]
async fn test_slow_write_times_out_and_reopens() {
    let harness = Harness::new(quiz(10));
    harness
        .store
        .set_attempt_write_delay(Some(Duration::from_secs(30)));
    let handle = harness.open().await;

    let err = handle.submit(SubmitTrigger::Manual).await.unwrap_err();
    assert!(matches!(err, SubmitError::WriteTimedOut));
    assert_eq!(handle.view().await.phase, SubmitPhase::InProgress);
    assert!(handle.toggle_flag(1).await.is_ok());
}

#[tokio::test(start_paused = true)]
async fn test_guard_bounds_whole_submission() {
    let mut harness = Harness::new(quiz(10));
    harness.settings.write_timeout = Duration::from_secs(60);
    harness
        .store
        .set_attempt_write_delay(Some(Duration::from_secs(30)));
    let handle = harness.open().await;

    let err = handle.submit(SubmitTrigger::Manual).await.unwrap_err();
    assert!(matches!(err, SubmitError::TakingTooLong));
    assert_eq!(handle.view().await.phase, SubmitPhase::InProgress);
}

#[tokio::test(start_paused = true)]
async fn test_store_outage_reopens_session() {
    let harness = Harness::new(quiz(10));
    let handle = harness.open().await;
    harness.store.set_unavailable(true);

    let err = handle.submit(SubmitTrigger::Manual).await.unwrap_err();
    assert!(matches!(err, SubmitError::Store(AppError::ServiceUnavailable(_))));

    harness.store.set_unavailable(false);
    assert!(handle.submit(SubmitTrigger::Manual).await.is_ok());
}

#[tokio::test(start_paused = true)]
async fn test_registry_reuses_live_session() {
    let harness = Harness::new(quiz(10));
    let registry = SessionRegistry::default();
    let deps = harness.deps();

    let first = registry
        .open(&deps, harness.key(), "Ada".into())
        .await
        .unwrap();
    let again = registry
        .open(&deps, harness.key(), "Ada".into())
        .await
        .unwrap();
    assert!(Arc::ptr_eq(&first, &again));

    first.submit(SubmitTrigger::Manual).await.unwrap();
    assert!(registry.get(harness.key()).await.is_none());

    let next = registry
        .open(&deps, harness.key(), "Ada".into())
        .await
        .unwrap();
    assert!(!Arc::ptr_eq(&first, &next));
    assert_eq!(next.view().await.revision, 0);
}

#[tokio::test(start_paused = true)]
async fn test_unknown_quiz_is_not_found() {
    let harness = Harness::new(quiz(10));
    let result = SessionHandle::open(harness.deps(), SessionKey::new(99, USER_ID), "Ada".into()).await;
    assert!(matches!(result, Err(AppError::NotFound(_))));
}
