// src/models/attempt.rs

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::session::scoring::{QuestionScore, ScoreReport};

/// What caused a submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubmitTrigger {
    Manual,
    TimeExpired,
    IntegrityViolation,
}

impl SubmitTrigger {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubmitTrigger::Manual => "manual",
            SubmitTrigger::TimeExpired => "time_expired",
            SubmitTrigger::IntegrityViolation => "integrity_violation",
        }
    }
}

/// Final answer to one question, by index and by option text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnsweredQuestion {
    pub selected_indices: Vec<usize>,
    pub selected_texts: Vec<String>,
}

/// Terminal, immutable result of one submitted session.
/// Stored in the `attempts` table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttemptRecord {
    pub quiz_id: i64,
    pub user_id: i64,
    pub user_name: String,
    pub answers: BTreeMap<i64, AnsweredQuestion>,
    pub obtained_marks: f64,
    pub total_marks: f64,
    pub percentage: i64,
    pub correct_count: usize,
    pub total_questions: usize,
    pub passed: bool,
    pub breakdown: Vec<QuestionScore>,
    pub violation_count: u32,
    pub flagged: Vec<i64>,
    pub marked_for_review: Vec<i64>,
    pub trigger: SubmitTrigger,
    pub time_taken_secs: i64,
    pub submitted_at: DateTime<Utc>,
}

/// DTO returned to the client after a confirmed submission.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitReceipt {
    pub attempt_id: i64,
    pub trigger: SubmitTrigger,
    pub score: ScoreReport,
    /// How long the client shows the confirmation before navigating away.
    pub redirect_after_ms: u64,
    pub message: String,
}
