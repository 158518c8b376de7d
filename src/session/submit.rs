// src/session/submit.rs

use std::{collections::BTreeMap, sync::Arc};

use chrono::{TimeZone, Utc};
use tokio::sync::Mutex;

use crate::{
    clock::Clock,
    config::SessionSettings,
    error::{AppError, SubmitError},
    models::{
        attempt::{AnsweredQuestion, AttemptRecord, SubmitReceipt, SubmitTrigger},
        quiz::{QuizDefinition, WindowStatus},
    },
    session::{
        ExamSession, SubmissionDraft, SubmitPhase,
        scoring::{self, ScoreReport},
        sync::SyncLayer,
    },
    store::{QuizCatalog, RemoteStore},
};

/// Drives the terminal transition of a session.
///
/// Manual, timer and integrity submissions all go through `submit`.
#[derive(Clone)]
pub struct SubmissionOrchestrator {
    remote: Arc<dyn RemoteStore>,
    catalog: Arc<dyn QuizCatalog>,
    clock: Arc<dyn Clock>,
    sync: SyncLayer,
    settings: SessionSettings,
}

impl SubmissionOrchestrator {
    pub fn new(
        remote: Arc<dyn RemoteStore>,
        catalog: Arc<dyn QuizCatalog>,
        clock: Arc<dyn Clock>,
        sync: SyncLayer,
        settings: SessionSettings,
    ) -> Self {
        Self {
            remote,
            catalog,
            clock,
            sync,
            settings,
        }
    }

    /// Submits the session once.
    ///
    /// * Returns `AlreadySubmitted` without side effects if another
    ///   submission holds the session.
    /// * Any failure returns the session to `InProgress` for retry.
    /// * On success the stored progress is deleted.
    pub async fn submit(
        &self,
        state: &Arc<Mutex<ExamSession>>,
        trigger: SubmitTrigger,
    ) -> Result<SubmitReceipt, SubmitError> {
        let draft = state.lock().await.begin_submit()?;
        let key = draft.key;
        tracing::info!("Submitting {:?} ({})", key, trigger.as_str());

        let guarded = tokio::time::timeout(
            self.settings.submit_guard,
            self.validate_and_write(state, &draft, trigger),
        );
        let outcome = match guarded.await {
            Ok(outcome) => outcome,
            Err(_) => Err(SubmitError::TakingTooLong),
        };

        let (attempt_id, score) = match outcome {
            Ok(written) => written,
            Err(err) => {
                state.lock().await.abort_submit();
                self.sync.resume();
                tracing::warn!("Submission of {:?} failed, session reopened: {}", key, err);
                return Err(err);
            }
        };

        state.lock().await.set_phase(SubmitPhase::Done);
        if let Err(e) = self.sync.discard().await {
            tracing::warn!("Attempt {} saved but progress cleanup failed: {}", attempt_id, e);
        }
        tracing::info!(
            "Attempt {} recorded for {:?}: {}/{} marks",
            attempt_id,
            key,
            score.obtained_marks,
            score.total_marks
        );

        Ok(SubmitReceipt {
            attempt_id,
            trigger,
            score,
            redirect_after_ms: self.settings.redirect_delay.as_millis() as u64,
            message: match trigger {
                SubmitTrigger::Manual => "Exam submitted successfully".to_string(),
                SubmitTrigger::TimeExpired => {
                    "Time is up. Your exam was submitted automatically".to_string()
                }
                SubmitTrigger::IntegrityViolation => {
                    "Your exam was submitted automatically after repeated violations".to_string()
                }
            },
        })
    }

    async fn validate_and_write(
        &self,
        state: &Arc<Mutex<ExamSession>>,
        draft: &SubmissionDraft,
        trigger: SubmitTrigger,
    ) -> Result<(i64, ScoreReport), SubmitError> {
        let key = draft.key;
        let quiz = self
            .catalog
            .quiz(key.quiz_id)
            .await?
            .ok_or(SubmitError::QuizNotFound(key.quiz_id))?;

        let score = scoring::score(&quiz.questions, &draft.answers, quiz.passing_marks());

        // Re-checked here rather than trusted from when the session started.
        if let Some(max_attempts) = quiz.attempt_limit() {
            let used = self.remote.count_attempts(key).await?;
            if used >= max_attempts {
                return Err(SubmitError::MaxAttemptsReached { max_attempts });
            }
        }
        let now_ms = self.clock.now_ms();
        match quiz.window_status(now_ms) {
            WindowStatus::NotYetOpen => return Err(SubmitError::NotYetOpen),
            WindowStatus::Closed => return Err(SubmitError::WindowClosed),
            WindowStatus::Open => {}
        }

        state.lock().await.set_phase(SubmitPhase::Writing);
        let record = build_record(&quiz, draft, &score, trigger, now_ms);

        // The write runs on its own task so a timeout abandons it rather than
        // cancelling it mid-request.
        let remote = self.remote.clone();
        let write = tokio::spawn(async move { remote.insert_attempt(&record).await });
        let attempt_id = match tokio::time::timeout(self.settings.write_timeout, write).await {
            Ok(Ok(Ok(id))) => id,
            Ok(Ok(Err(e))) => return Err(SubmitError::Store(e)),
            Ok(Err(join_error)) => {
                return Err(SubmitError::Store(AppError::InternalServerError(
                    join_error.to_string(),
                )));
            }
            Err(_) => return Err(SubmitError::WriteTimedOut),
        };

        Ok((attempt_id, score))
    }
}

fn build_record(
    quiz: &QuizDefinition,
    draft: &SubmissionDraft,
    score: &ScoreReport,
    trigger: SubmitTrigger,
    now_ms: i64,
) -> AttemptRecord {
    let answers: BTreeMap<i64, AnsweredQuestion> = draft
        .answers
        .iter()
        .filter(|(_, selection)| !selection.is_empty())
        .map(|(question_id, selection)| {
            let options = quiz
                .questions
                .iter()
                .find(|q| q.id == *question_id)
                .map(|q| q.options.as_slice())
                .unwrap_or_default();
            let answered = AnsweredQuestion {
                selected_indices: selection.iter().copied().collect(),
                selected_texts: selection
                    .iter()
                    .filter_map(|index| options.get(*index).map(|o| o.text.clone()))
                    .collect(),
            };
            (*question_id, answered)
        })
        .collect();

    AttemptRecord {
        quiz_id: draft.key.quiz_id,
        user_id: draft.key.user_id,
        user_name: draft.user_name.clone(),
        answers,
        obtained_marks: score.obtained_marks,
        total_marks: score.total_marks,
        percentage: score.percentage,
        correct_count: score.correct_count,
        total_questions: score.total_questions,
        passed: score.passed,
        breakdown: score.questions.clone(),
        violation_count: draft.violation_count,
        flagged: draft.flagged.clone(),
        marked_for_review: draft.marked_for_review.clone(),
        trigger,
        time_taken_secs: draft.time_taken_secs,
        submitted_at: Utc
            .timestamp_millis_opt(now_ms)
            .single()
            .unwrap_or_else(Utc::now),
    }
}
