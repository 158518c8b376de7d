// src/models/quiz.rs

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::question::{PublicQuestion, Question};

/// Quiz configuration as supplied by the quiz-definition collaborator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuizDefinition {
    pub id: i64,
    pub title: String,
    pub duration_minutes: Option<i64>,
    pub max_attempts: Option<i64>,
    /// Absolute marks needed to pass. Unset or zero falls back to a percentage.
    pub passing_score: Option<f64>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub questions: Vec<Question>,
}

/// Where "now" falls relative to a quiz's configured window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowStatus {
    NotYetOpen,
    Open,
    Closed,
}

impl QuizDefinition {
    /// Questions without their answer keys, in quiz order.
    pub fn paper(&self) -> Vec<PublicQuestion> {
        self.questions.iter().map(Question::to_public).collect()
    }

    pub fn attempt_limit(&self) -> Option<i64> {
        self.max_attempts.filter(|max| *max > 0)
    }

    pub fn passing_marks(&self) -> Option<f64> {
        self.passing_score.filter(|score| *score > 0.0)
    }

    pub fn window_status(&self, now_ms: i64) -> WindowStatus {
        if let Some(start) = self.start_time {
            if now_ms < start.timestamp_millis() {
                return WindowStatus::NotYetOpen;
            }
        }
        if let Some(end) = self.end_time {
            if now_ms > end.timestamp_millis() {
                return WindowStatus::Closed;
            }
        }
        WindowStatus::Open
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn quiz() -> QuizDefinition {
        QuizDefinition {
            id: 1,
            title: "Window".to_string(),
            duration_minutes: Some(20),
            max_attempts: Some(0),
            passing_score: Some(0.0),
            start_time: Some(Utc.timestamp_millis_opt(1_000).unwrap()),
            end_time: Some(Utc.timestamp_millis_opt(5_000).unwrap()),
            questions: Vec::new(),
        }
    }

    #[test]
    fn test_window_status() {
        let quiz = quiz();
        assert_eq!(quiz.window_status(999), WindowStatus::NotYetOpen);
        assert_eq!(quiz.window_status(1_000), WindowStatus::Open);
        assert_eq!(quiz.window_status(5_000), WindowStatus::Open);
        assert_eq!(quiz.window_status(5_001), WindowStatus::Closed);
    }

    #[test]
    fn test_zero_limits_mean_unset() {
        let quiz = quiz();
        assert_eq!(quiz.attempt_limit(), None);
        assert_eq!(quiz.passing_marks(), None);
    }
}
