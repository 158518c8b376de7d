// src/session/answers.rs

use std::collections::BTreeMap;

use serde::Serialize;

use crate::models::{
    question::QuestionType,
    snapshot::{PersistedSnapshot, Selection},
};

/// Selections and per-question side flags of one session.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AnswerStore {
    answers: BTreeMap<i64, Selection>,
    flagged: BTreeMap<i64, bool>,
    bookmarked: BTreeMap<i64, bool>,
    marked_for_review: BTreeMap<i64, bool>,
    visited: BTreeMap<i64, bool>,
}

/// Counts shown on the question palette.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct AnswerSummary {
    pub answered: usize,
    pub flagged: usize,
    pub bookmarked: usize,
    pub marked_for_review: usize,
    pub visited: usize,
}

impl AnswerStore {
    pub fn from_snapshot(snapshot: &PersistedSnapshot) -> Self {
        Self {
            answers: snapshot.answers.clone(),
            flagged: snapshot.flagged.clone(),
            bookmarked: snapshot.bookmarked.clone(),
            marked_for_review: snapshot.marked_for_review.clone(),
            visited: snapshot.visited.clone(),
        }
    }

    /// Applies a click on option `option_index` and returns the new selection.
    ///
    /// Single choice: clicking the selected option clears it, any other
    /// option replaces it. Multiple choice: toggles membership.
    pub fn select_option(
        &mut self,
        question_id: i64,
        option_index: usize,
        question_type: QuestionType,
    ) -> Selection {
        let selection = self.answers.entry(question_id).or_default();
        match question_type {
            QuestionType::Single => {
                let was_sole = selection.len() == 1 && selection.contains(&option_index);
                selection.clear();
                if !was_sole {
                    selection.insert(option_index);
                }
            }
            QuestionType::Multiple => {
                if !selection.remove(&option_index) {
                    selection.insert(option_index);
                }
            }
        }

        let result = selection.clone();
        if result.is_empty() {
            self.answers.remove(&question_id);
        }
        result
    }

    pub fn toggle_flag(&mut self, question_id: i64) -> bool {
        toggle(&mut self.flagged, question_id)
    }

    pub fn toggle_bookmark(&mut self, question_id: i64) -> bool {
        toggle(&mut self.bookmarked, question_id)
    }

    pub fn toggle_mark_for_review(&mut self, question_id: i64) -> bool {
        toggle(&mut self.marked_for_review, question_id)
    }

    /// Returns true if this is the first visit.
    pub fn visit(&mut self, question_id: i64) -> bool {
        self.visited.insert(question_id, true) != Some(true)
    }

    pub fn selection(&self, question_id: i64) -> Selection {
        self.answers.get(&question_id).cloned().unwrap_or_default()
    }

    pub fn answers(&self) -> &BTreeMap<i64, Selection> {
        &self.answers
    }

    pub fn flagged(&self) -> &BTreeMap<i64, bool> {
        &self.flagged
    }

    pub fn bookmarked(&self) -> &BTreeMap<i64, bool> {
        &self.bookmarked
    }

    pub fn marked_for_review(&self) -> &BTreeMap<i64, bool> {
        &self.marked_for_review
    }

    pub fn visited(&self) -> &BTreeMap<i64, bool> {
        &self.visited
    }

    pub fn summary(&self) -> AnswerSummary {
        AnswerSummary {
            answered: self.answers.values().filter(|s| !s.is_empty()).count(),
            flagged: count_set(&self.flagged),
            bookmarked: count_set(&self.bookmarked),
            marked_for_review: count_set(&self.marked_for_review),
            visited: count_set(&self.visited),
        }
    }
}

fn toggle(map: &mut BTreeMap<i64, bool>, question_id: i64) -> bool {
    let flag = map.entry(question_id).or_insert(false);
    *flag = !*flag;
    let value = *flag;
    if !value {
        map.remove(&question_id);
    }
    value
}

fn count_set(map: &BTreeMap<i64, bool>) -> usize {
    map.values().filter(|v| **v).count()
}

/// Ids whose flag is set, in ascending order.
pub fn set_ids(map: &BTreeMap<i64, bool>) -> Vec<i64> {
    map.iter().filter(|(_, v)| **v).map(|(id, _)| *id).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_choice_toggle() {
        let mut store = AnswerStore::default();
        assert_eq!(store.select_option(1, 2, QuestionType::Single), Selection::from([2]));
        assert_eq!(store.select_option(1, 2, QuestionType::Single), Selection::new());
        assert!(store.answers().is_empty());

        store.select_option(1, 2, QuestionType::Single);
        assert_eq!(store.select_option(1, 0, QuestionType::Single), Selection::from([0]));
    }

    #[test]
    fn test_multiple_choice_toggle() {
        let mut store = AnswerStore::default();
        store.select_option(5, 1, QuestionType::Multiple);
        store.select_option(5, 1, QuestionType::Multiple);
        assert_eq!(store.select_option(5, 3, QuestionType::Multiple), Selection::from([3]));
        assert_eq!(store.select_option(5, 0, QuestionType::Multiple), Selection::from([0, 3]));
        assert_eq!(store.selection(5), Selection::from([0, 3]));
    }

    #[test]
    fn test_side_flags_are_independent() {
        let mut store = AnswerStore::default();
        assert!(store.toggle_flag(1));
        assert!(store.toggle_bookmark(1));
        assert!(!store.toggle_flag(1));
        assert!(store.toggle_mark_for_review(2));

        let summary = store.summary();
        assert_eq!(summary.flagged, 0);
        assert_eq!(summary.bookmarked, 1);
        assert_eq!(summary.marked_for_review, 1);
        assert_eq!(summary.answered, 0);
        assert_eq!(set_ids(store.marked_for_review()), vec![2]);
    }

    #[test]
    fn test_visit_is_idempotent() {
        let mut store = AnswerStore::default();
        assert!(store.visit(4));
        assert!(!store.visit(4));
        assert_eq!(store.summary().visited, 1);
    }
}
