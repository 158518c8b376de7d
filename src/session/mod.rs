// src/session/mod.rs

//! The exam attempt session: one student's timed attempt at one quiz.

pub mod answers;
pub mod handle;
pub mod integrity;
pub mod scoring;
pub mod submit;
pub mod sync;
pub mod timer;

use std::{collections::BTreeMap, sync::Arc};

use serde::Serialize;

use crate::{
    clock::Clock,
    config::SessionSettings,
    error::{AppError, SubmitError},
    models::{
        question::PublicQuestion,
        quiz::QuizDefinition,
        snapshot::{PersistedSnapshot, Selection},
    },
    session::{
        answers::{AnswerStore, AnswerSummary, set_ids},
        integrity::{IntegrityMonitor, ProctoringPolicy, Violation, ViolationOutcome},
        timer::{Tick, TimerEngine},
    },
    store::{SessionKey, SessionStore},
};

/// Submission state machine. Anything but `InProgress` counts as submitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SubmitPhase {
    InProgress,
    Validating,
    Writing,
    Done,
}

/// State captured when a submission starts.
#[derive(Debug, Clone)]
pub struct SubmissionDraft {
    pub key: SessionKey,
    pub user_name: String,
    pub answers: BTreeMap<i64, Selection>,
    pub violation_count: u32,
    pub flagged: Vec<i64>,
    pub marked_for_review: Vec<i64>,
    pub time_taken_secs: i64,
}

/// Client-facing view of a live session.
#[derive(Debug, Clone, Serialize)]
pub struct SessionView {
    pub quiz_id: i64,
    pub user_id: i64,
    pub title: String,
    pub questions: Vec<PublicQuestion>,
    pub answers: BTreeMap<i64, Selection>,
    pub flagged: Vec<i64>,
    pub bookmarked: Vec<i64>,
    pub marked_for_review: Vec<i64>,
    pub visited: Vec<i64>,
    pub current_question: usize,
    pub remaining_secs: i64,
    pub paused: bool,
    pub violation_count: u32,
    pub phase: SubmitPhase,
    pub summary: AnswerSummary,
    pub policy: ProctoringPolicy,
    pub revision: u64,
}

/// Root aggregate of one attempt.
///
/// Holds no locks and performs no I/O apart from the timer's local anchor
/// writes; `SessionHandle` wraps it for concurrent use and persistence.
pub struct ExamSession {
    key: SessionKey,
    user_name: String,
    title: String,
    paper: Vec<PublicQuestion>,
    timer: TimerEngine,
    answers: AnswerStore,
    integrity: IntegrityMonitor,
    phase: SubmitPhase,
    current_question: usize,
    revision: u64,
    clock: Arc<dyn Clock>,
}

impl ExamSession {
    /// Builds the session from the quiz and an optional resumed snapshot.
    ///
    /// A timer anchor carried by the snapshot is restored to local storage
    /// only when local storage has none.
    pub fn new(
        key: SessionKey,
        user_name: String,
        quiz: &QuizDefinition,
        resumed: Option<PersistedSnapshot>,
        local: SessionStore,
        clock: Arc<dyn Clock>,
        settings: &SessionSettings,
    ) -> Self {
        let resumed = resumed.unwrap_or_default();
        if let Some(anchor) = resumed.timer {
            if local.load_anchor().is_none() {
                local.save_anchor(&anchor);
            }
        }

        let timer = TimerEngine::initialize(
            local,
            clock.clone(),
            quiz.duration_minutes,
            settings.fallback_duration_minutes,
        );

        Self {
            key,
            user_name,
            title: quiz.title.clone(),
            paper: quiz.paper(),
            timer,
            answers: AnswerStore::from_snapshot(&resumed),
            integrity: IntegrityMonitor::new(settings.violation_threshold, resumed.violation_count),
            phase: SubmitPhase::InProgress,
            current_question: resumed.current_question,
            revision: resumed.revision,
            clock,
        }
    }

    pub fn phase(&self) -> SubmitPhase {
        self.phase
    }

    pub fn is_submitted(&self) -> bool {
        self.phase != SubmitPhase::InProgress
    }

    pub fn is_finished(&self) -> bool {
        self.phase == SubmitPhase::Done
    }

    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn answers(&self) -> &AnswerStore {
        &self.answers
    }

    pub fn remaining_secs(&self) -> i64 {
        self.timer.remaining_secs()
    }

    fn ensure_open(&self) -> Result<(), AppError> {
        if self.is_submitted() {
            return Err(AppError::Conflict(
                "This exam has already been submitted; answers can no longer be changed."
                    .to_string(),
            ));
        }
        Ok(())
    }

    fn question(&self, question_id: i64) -> Result<(usize, &PublicQuestion), AppError> {
        self.paper
            .iter()
            .enumerate()
            .find(|(_, q)| q.id == question_id)
            .ok_or_else(|| {
                AppError::NotFound(format!("Question {} is not part of this quiz", question_id))
            })
    }

    fn bump(&mut self) {
        self.revision += 1;
    }

    pub fn select_option(
        &mut self,
        question_id: i64,
        option_index: usize,
    ) -> Result<Selection, AppError> {
        self.ensure_open()?;
        let (_, question) = self.question(question_id)?;
        if option_index >= question.options.len() {
            return Err(AppError::BadRequest(format!(
                "Question {} has no option {}",
                question_id, option_index
            )));
        }
        let question_type = question.question_type;

        let selection = self
            .answers
            .select_option(question_id, option_index, question_type);
        self.bump();
        Ok(selection)
    }

    pub fn toggle_flag(&mut self, question_id: i64) -> Result<bool, AppError> {
        self.ensure_open()?;
        self.question(question_id)?;
        let flagged = self.answers.toggle_flag(question_id);
        self.bump();
        Ok(flagged)
    }

    pub fn toggle_bookmark(&mut self, question_id: i64) -> Result<bool, AppError> {
        self.ensure_open()?;
        self.question(question_id)?;
        let bookmarked = self.answers.toggle_bookmark(question_id);
        self.bump();
        Ok(bookmarked)
    }

    pub fn toggle_mark_for_review(&mut self, question_id: i64) -> Result<bool, AppError> {
        self.ensure_open()?;
        self.question(question_id)?;
        let marked = self.answers.toggle_mark_for_review(question_id);
        self.bump();
        Ok(marked)
    }

    /// Marks the question visited and makes it the current one.
    pub fn visit(&mut self, question_id: i64) -> Result<bool, AppError> {
        self.ensure_open()?;
        let (index, _) = self.question(question_id)?;
        let first_visit = self.answers.visit(question_id);
        if first_visit || self.current_question != index {
            self.current_question = index;
            self.bump();
        }
        Ok(first_visit)
    }

    /// Counts a violation. Reports arriving mid-submission still count so a
    /// failed submission reopens with them.
    pub fn record_violation(&mut self, violation: Violation) -> ViolationOutcome {
        let outcome = self.integrity.record(violation, self.phase);
        if !self.is_finished() {
            self.bump();
        }
        outcome
    }

    /// Connection lost: stop the clock. Returns false if already offline.
    pub fn go_offline(&mut self) -> bool {
        self.timer.pause()
    }

    /// Connection back: resume the clock. Returns false if already online.
    pub fn go_online(&mut self) -> bool {
        self.timer.resume()
    }

    pub fn tick(&mut self) -> Tick {
        self.timer.tick()
    }

    pub fn snapshot(&self) -> PersistedSnapshot {
        PersistedSnapshot {
            revision: self.revision,
            answers: self.answers.answers().clone(),
            flagged: self.answers.flagged().clone(),
            bookmarked: self.answers.bookmarked().clone(),
            marked_for_review: self.answers.marked_for_review().clone(),
            visited: self.answers.visited().clone(),
            violation_count: self.integrity.count(),
            current_question: self.current_question,
            timer: Some(self.timer.anchor()),
            saved_at_epoch_ms: self.clock.now_ms(),
        }
    }

    pub fn view(&self) -> SessionView {
        SessionView {
            quiz_id: self.key.quiz_id,
            user_id: self.key.user_id,
            title: self.title.clone(),
            questions: self.paper.clone(),
            answers: self.answers.answers().clone(),
            flagged: set_ids(self.answers.flagged()),
            bookmarked: set_ids(self.answers.bookmarked()),
            marked_for_review: set_ids(self.answers.marked_for_review()),
            visited: set_ids(self.answers.visited()),
            current_question: self.current_question,
            remaining_secs: self.timer.remaining_secs(),
            paused: self.timer.is_paused(),
            violation_count: self.integrity.count(),
            phase: self.phase,
            summary: self.answers.summary(),
            policy: self.integrity.policy(),
            revision: self.revision,
        }
    }

    /// Check-and-set of the submitted guard. Must run without yielding
    /// between the check and the set, which holding `&mut self` ensures.
    pub(crate) fn begin_submit(&mut self) -> Result<SubmissionDraft, SubmitError> {
        if self.is_submitted() {
            return Err(SubmitError::AlreadySubmitted);
        }
        self.phase = SubmitPhase::Validating;

        Ok(SubmissionDraft {
            key: self.key,
            user_name: self.user_name.clone(),
            answers: self.answers.answers().clone(),
            violation_count: self.integrity.count(),
            flagged: set_ids(self.answers.flagged()),
            marked_for_review: set_ids(self.answers.marked_for_review()),
            time_taken_secs: (self.timer.elapsed_ms() / 1000).max(0),
        })
    }

    pub(crate) fn set_phase(&mut self, phase: SubmitPhase) {
        self.phase = phase;
    }

    /// Returns a failed submission to `InProgress` so it can be retried.
    pub(crate) fn abort_submit(&mut self) {
        if self.phase != SubmitPhase::Done {
            self.phase = SubmitPhase::InProgress;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        clock::ManualClock,
        models::question::{Question, QuestionOption, QuestionType},
        store::memory::MemoryKv,
    };

    fn quiz() -> QuizDefinition {
        QuizDefinition {
            id: 1,
            title: "Basics".into(),
            duration_minutes: Some(5),
            max_attempts: None,
            passing_score: None,
            start_time: None,
            end_time: None,
            questions: vec![Question {
                id: 10,
                section_id: None,
                question_type: QuestionType::Single,
                content: "1 + 1".into(),
                options: vec![
                    QuestionOption { text: "2".into(), is_correct: true },
                    QuestionOption { text: "3".into(), is_correct: false },
                ],
                marks: None,
            }],
        }
    }

    fn session() -> ExamSession {
        let key = SessionKey::new(1, 2);
        let local = SessionStore::new(Arc::new(MemoryKv::default()), key);
        ExamSession::new(
            key,
            "Student".into(),
            &quiz(),
            None,
            local,
            Arc::new(ManualClock::new(0)),
            &SessionSettings::default(),
        )
    }

    #[test]
    fn test_mutations_rejected_after_submit() {
        let mut session = session();
        session.select_option(10, 0).unwrap();
        session.begin_submit().unwrap();

        assert!(matches!(session.select_option(10, 1), Err(AppError::Conflict(_))));
        assert!(matches!(session.toggle_flag(10), Err(AppError::Conflict(_))));
        assert!(matches!(session.toggle_bookmark(10), Err(AppError::Conflict(_))));
        assert!(matches!(session.toggle_mark_for_review(10), Err(AppError::Conflict(_))));
        assert!(matches!(session.visit(10), Err(AppError::Conflict(_))));
        assert!(matches!(session.begin_submit(), Err(SubmitError::AlreadySubmitted)));
        assert_eq!(session.answers().selection(10), Selection::from([0]));

        session.abort_submit();
        assert!(session.select_option(10, 1).is_ok());
    }

    #[test]
    fn test_rejects_unknown_question_and_option() {
        let mut session = session();
        assert!(matches!(session.select_option(99, 0), Err(AppError::NotFound(_))));
        assert!(matches!(session.select_option(10, 2), Err(AppError::BadRequest(_))));
        assert_eq!(session.revision(), 0);
    }

    #[test]
    fn test_revision_tracks_mutations() {
        let mut session = session();
        session.select_option(10, 1).unwrap();
        session.toggle_flag(10).unwrap();
        session.visit(10).unwrap();
        session.visit(10).unwrap();
        assert_eq!(session.revision(), 3);
        assert_eq!(session.snapshot().revision, 3);
    }

    #[test]
    fn test_done_is_not_reset() {
        let mut session = session();
        session.begin_submit().unwrap();
        session.set_phase(SubmitPhase::Done);
        session.abort_submit();
        assert!(session.is_finished());
    }
}
