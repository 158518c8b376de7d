// src/models/question.rs

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

/// Selection semantics of a question.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QuestionType {
    /// Radio-style: at most one selected option.
    Single,
    /// Checkbox-style: any subset of options.
    Multiple,
}

impl QuestionType {
    /// Parses the value of the `questions.type` column.
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "single" => Some(QuestionType::Single),
            "multiple" => Some(QuestionType::Multiple),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            QuestionType::Single => "single",
            QuestionType::Multiple => "multiple",
        }
    }
}

/// One answer option of a question.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuestionOption {
    pub text: String,
    #[serde(default)]
    pub is_correct: bool,
}

/// A question as owned by the quiz definition, including the answer key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Question {
    pub id: i64,

    pub section_id: Option<i64>,

    /// Question type: 'single' (single choice) or 'multiple' (multiple choice).
    #[serde(rename = "type")]
    pub question_type: QuestionType,

    /// The text content of the question.
    pub content: String,

    /// Ordered options. Selections refer to positions in this list.
    pub options: Vec<QuestionOption>,

    /// Marks awarded for a fully correct answer. Defaults to 1.
    pub marks: Option<f64>,
}

impl Question {
    pub fn marks(&self) -> f64 {
        self.marks.unwrap_or(1.0)
    }

    pub fn correct_indices(&self) -> BTreeSet<usize> {
        self.options
            .iter()
            .enumerate()
            .filter(|(_, option)| option.is_correct)
            .map(|(index, _)| index)
            .collect()
    }

    /// Projection sent to the student before submission (no answer key).
    pub fn to_public(&self) -> PublicQuestion {
        PublicQuestion {
            id: self.id,
            section_id: self.section_id,
            question_type: self.question_type,
            content: self.content.clone(),
            options: self.options.iter().map(|o| o.text.clone()).collect(),
            marks: self.marks(),
        }
    }
}

/// DTO for sending question to client (excludes `is_correct`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PublicQuestion {
    pub id: i64,
    pub section_id: Option<i64>,
    #[serde(rename = "type")]
    pub question_type: QuestionType,
    pub content: String,
    pub options: Vec<String>,
    pub marks: f64,
}

impl PublicQuestion {
    /// Finds an option by its text, ignoring surrounding whitespace.
    pub fn option_index_by_text(&self, text: &str) -> Option<usize> {
        let needle = text.trim();
        self.options.iter().position(|option| option.trim() == needle)
    }
}
