// src/models/snapshot.rs

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::models::question::{PublicQuestion, QuestionType};

/// Selected option indices of one question.
pub type Selection = BTreeSet<usize>;

/// Persisted timer state. Absolute timestamps so a reload does not reset it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimerAnchor {
    pub started_at_epoch_ms: i64,
    /// Zero when missing from storage, which the timer treats as corrupt.
    #[serde(default)]
    pub duration_ms: i64,
    #[serde(default)]
    pub paused_accumulated_ms: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_pause_started_at_epoch_ms: Option<i64>,
}

/// Durable projection of a session's mutable state.
///
/// Serialized as camelCase JSON with answers as `{questionId: number[]}` and
/// side-maps as `{questionId: bool}`. Reading goes through [`StoredSnapshot`]
/// so older encodings can be normalized against the question list.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistedSnapshot {
    /// Monotonic mutation counter; the remote store keeps the highest one.
    pub revision: u64,
    pub answers: BTreeMap<i64, Selection>,
    pub flagged: BTreeMap<i64, bool>,
    pub bookmarked: BTreeMap<i64, bool>,
    pub marked_for_review: BTreeMap<i64, bool>,
    pub visited: BTreeMap<i64, bool>,
    pub violation_count: u32,
    pub current_question: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timer: Option<TimerAnchor>,
    pub saved_at_epoch_ms: i64,
}

impl PersistedSnapshot {
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn to_value(&self) -> Result<Value, serde_json::Error> {
        serde_json::to_value(self)
    }
}

/// A snapshot as read back from storage, before normalization.
///
/// Every field is optional so partial remote payloads (a single merged
/// answer) and older shapes still deserialize.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StoredSnapshot {
    pub revision: u64,
    pub answers: BTreeMap<i64, Value>,
    pub flagged: BTreeMap<i64, Value>,
    pub bookmarked: BTreeMap<i64, Value>,
    pub marked_for_review: BTreeMap<i64, Value>,
    pub visited: BTreeMap<i64, Value>,
    pub violation_count: u32,
    pub current_question: usize,
    pub timer: Option<TimerAnchor>,
    pub saved_at_epoch_ms: i64,
}

impl StoredSnapshot {
    pub fn from_json(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }

    pub fn from_value(value: Value) -> Result<Self, serde_json::Error> {
        serde_json::from_value(value)
    }

    /// Converts stored answers into sorted, de-duplicated option indices.
    ///
    /// Accepted encodings per question: a number, a numeric string, a
    /// JSON-encoded array string, option text, or an array of any of those.
    /// Answers to questions not on the paper, unknown option text and
    /// out-of-range indices are dropped. Single-choice questions keep at
    /// most one index (the lowest).
    pub fn normalize(self, paper: &[PublicQuestion]) -> PersistedSnapshot {
        let answers = self
            .answers
            .iter()
            .filter_map(|(question_id, value)| {
                let question = paper.iter().find(|q| q.id == *question_id)?;
                let selection = normalize_selection(value, question);
                (!selection.is_empty()).then_some((*question_id, selection))
            })
            .collect();

        PersistedSnapshot {
            revision: self.revision,
            answers,
            flagged: normalize_flags(self.flagged),
            bookmarked: normalize_flags(self.bookmarked),
            marked_for_review: normalize_flags(self.marked_for_review),
            visited: normalize_flags(self.visited),
            violation_count: self.violation_count,
            current_question: self
                .current_question
                .min(paper.len().saturating_sub(1)),
            timer: self.timer,
            saved_at_epoch_ms: self.saved_at_epoch_ms,
        }
    }
}

fn normalize_selection(value: &Value, question: &PublicQuestion) -> Selection {
    let mut selection = Selection::new();
    collect_indices(value, question, &mut selection, 0);
    selection.retain(|index| *index < question.options.len());

    if question.question_type == QuestionType::Single {
        if let Some(first) = selection.first().copied() {
            selection = Selection::from([first]);
        }
    }
    selection
}

fn collect_indices(value: &Value, question: &PublicQuestion, out: &mut Selection, depth: u8) {
    match value {
        Value::Number(number) => {
            if let Some(index) = number.as_u64() {
                out.insert(index as usize);
            }
        }
        Value::String(raw) => {
            let text = raw.trim();
            if text.is_empty() {
                return;
            }
            if let Ok(index) = text.parse::<usize>() {
                if index < question.options.len() {
                    out.insert(index);
                    return;
                }
            }
            if text.starts_with('[') && depth == 0 {
                if let Ok(inner) = serde_json::from_str::<Value>(text) {
                    collect_indices(&inner, question, out, depth + 1);
                    return;
                }
            }
            if let Some(index) = question.option_index_by_text(text) {
                out.insert(index);
            }
        }
        Value::Array(items) => {
            for item in items {
                collect_indices(item, question, out, depth);
            }
        }
        Value::Null | Value::Bool(_) | Value::Object(_) => {}
    }
}

fn normalize_flags(raw: BTreeMap<i64, Value>) -> BTreeMap<i64, bool> {
    raw.into_iter()
        .filter_map(|(question_id, value)| {
            let flag = match value {
                Value::Bool(flag) => flag,
                Value::String(text) => text.trim().eq_ignore_ascii_case("true"),
                Value::Number(number) => number.as_f64().is_some_and(|n| n != 0.0),
                _ => false,
            };
            flag.then_some((question_id, true))
        })
        .collect()
}
