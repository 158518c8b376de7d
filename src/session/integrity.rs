// src/session/integrity.rs

use serde::{Deserialize, Serialize};

use crate::session::SubmitPhase;

/// A detected breach of the exam-view policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Violation {
    /// The exam tab or window became hidden.
    TabHidden,
    FullscreenExit,
}

impl Violation {
    fn rule(&self) -> &'static str {
        match self {
            Violation::TabHidden => "Switching tabs or windows is not allowed during the exam",
            Violation::FullscreenExit => "The exam must stay in fullscreen mode",
        }
    }
}

/// Client input the exam view suppresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockedInput {
    Copy,
    Cut,
    Paste,
    ContextMenu,
    Print,
}

/// Proctoring settings handed to the client with the session.
///
/// The blocked inputs only discourage copying exam content. A client can
/// ignore them, so they are not a security boundary; violations and the
/// server-side submission checks are the enforcement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProctoringPolicy {
    pub blocked_inputs: Vec<BlockedInput>,
    pub require_fullscreen: bool,
    pub violation_threshold: u32,
}

/// What the client should do after a violation report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ViolationOutcome {
    pub violation: Violation,
    pub violation_count: u32,
    pub warning: String,
    /// The threshold is reached; the attempt is being submitted.
    pub force_submit: bool,
}

#[derive(Debug, Clone)]
pub struct IntegrityMonitor {
    count: u32,
    threshold: u32,
}

impl IntegrityMonitor {
    pub fn new(threshold: u32, count: u32) -> Self {
        Self {
            count,
            threshold: threshold.max(1),
        }
    }

    pub fn count(&self) -> u32 {
        self.count
    }

    pub fn policy(&self) -> ProctoringPolicy {
        ProctoringPolicy {
            blocked_inputs: vec![
                BlockedInput::Copy,
                BlockedInput::Cut,
                BlockedInput::Paste,
                BlockedInput::ContextMenu,
                BlockedInput::Print,
            ],
            require_fullscreen: true,
            violation_threshold: self.threshold,
        }
    }

    /// Counts a violation unless the attempt is already recorded.
    ///
    /// While a submission is in flight the report still counts, so a failed
    /// submission reopens with it, but it cannot start a second submission.
    pub fn record(&mut self, violation: Violation, phase: SubmitPhase) -> ViolationOutcome {
        if phase == SubmitPhase::Done {
            return ViolationOutcome {
                violation,
                violation_count: self.count,
                warning: "The exam has already been submitted.".to_string(),
                force_submit: false,
            };
        }

        self.count += 1;
        let reached = self.count >= self.threshold;
        let force_submit = reached && phase == SubmitPhase::InProgress;
        let warning = if force_submit {
            format!(
                "{}. Violation limit of {} reached: your exam is being submitted automatically.",
                violation.rule(),
                self.threshold
            )
        } else if reached {
            format!(
                "{}. Violation limit of {} reached while your exam is being submitted.",
                violation.rule(),
                self.threshold
            )
        } else {
            let left = self.threshold - self.count;
            format!(
                "{}. Warning {} of {}: {} more violation(s) will submit your exam automatically.",
                violation.rule(),
                self.count,
                self.threshold,
                left
            )
        };

        ViolationOutcome {
            violation,
            violation_count: self.count,
            warning,
            force_submit,
        }
    }
}
