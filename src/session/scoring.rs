// src/session/scoring.rs

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::{
    config::DEFAULT_PASSING_PERCENTAGE,
    models::{question::Question, snapshot::Selection},
};

/// Marks awarded for one question.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuestionScore {
    pub question_id: i64,
    pub marks: f64,
    pub obtained: f64,
    /// Selection equals the correct set exactly.
    pub fully_correct: bool,
    pub selected: Vec<usize>,
    pub correct: Vec<usize>,
}

/// Aggregate result of scoring a set of answers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreReport {
    pub obtained_marks: f64,
    pub total_marks: f64,
    pub percentage: i64,
    pub correct_count: usize,
    pub total_questions: usize,
    pub passed: bool,
    pub questions: Vec<QuestionScore>,
}

/// Scores `answers` against the answer keys of `questions`.
///
/// Partial credit is proportional to the fraction of correct options
/// selected; wrong extra selections do not reduce it but do prevent the
/// question from counting as fully correct. A question with no correct
/// option contributes nothing to the obtained marks but its marks still
/// count toward the total.
///
/// `passing_marks` is an absolute threshold; without one the attempt passes
/// at `DEFAULT_PASSING_PERCENTAGE`.
pub fn score(
    questions: &[Question],
    answers: &BTreeMap<i64, Selection>,
    passing_marks: Option<f64>,
) -> ScoreReport {
    let empty = Selection::new();
    let mut obtained_marks = 0.0;
    let mut total_marks = 0.0;
    let mut correct_count = 0;
    let mut breakdown = Vec::with_capacity(questions.len());

    for question in questions {
        let marks = question.marks();
        let correct = question.correct_indices();
        let selected = answers.get(&question.id).unwrap_or(&empty);
        let correct_selected = selected.intersection(&correct).count();

        total_marks += marks;

        let mut obtained = 0.0;
        let mut fully_correct = false;
        if !correct.is_empty() {
            obtained = correct_selected as f64 / correct.len() as f64 * marks;
            fully_correct = correct_selected == correct.len() && selected.len() == correct.len();
        }

        obtained_marks += obtained;
        if fully_correct {
            correct_count += 1;
        }

        breakdown.push(QuestionScore {
            question_id: question.id,
            marks,
            obtained,
            fully_correct,
            selected: selected.iter().copied().collect(),
            correct: correct.into_iter().collect(),
        });
    }

    let percentage = (obtained_marks / total_marks.max(1.0) * 100.0).round() as i64;
    let passed = match passing_marks {
        Some(threshold) => obtained_marks >= threshold,
        None => percentage >= DEFAULT_PASSING_PERCENTAGE,
    };

    ScoreReport {
        obtained_marks,
        total_marks,
        percentage,
        correct_count,
        total_questions: questions.len(),
        passed,
        questions: breakdown,
    }
}
