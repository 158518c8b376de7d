// src/session/timer.rs

use std::sync::Arc;

use crate::{clock::Clock, models::snapshot::TimerAnchor, store::SessionStore};

/// Result of one timer tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tick {
    pub remaining_secs: i64,
    /// True on exactly one tick: the first zero after a positive reading.
    pub expired: bool,
}

/// Derives remaining time from the persisted anchor rather than from how
/// long this process has been running, so reloads never reset the clock.
pub struct TimerEngine {
    store: SessionStore,
    clock: Arc<dyn Clock>,
    fallback_minutes: i64,
    anchor: TimerAnchor,
    seen_positive: bool,
    expiry_fired: bool,
}

impl TimerEngine {
    /// Loads the persisted anchor, or writes a fresh one if none exists.
    /// An existing anchor is never overwritten.
    pub fn initialize(
        store: SessionStore,
        clock: Arc<dyn Clock>,
        configured_minutes: Option<i64>,
        fallback_minutes: i64,
    ) -> Self {
        let anchor = match store.load_anchor() {
            Some(anchor) => anchor,
            None => {
                let anchor = fresh_anchor(
                    clock.now_ms(),
                    duration_minutes(configured_minutes, fallback_minutes),
                );
                store.save_anchor(&anchor);
                tracing::debug!("Timer anchored for {:?}: {:?}", store.key(), anchor);
                anchor
            }
        };

        Self {
            store,
            clock,
            fallback_minutes,
            anchor,
            seen_positive: false,
            expiry_fired: false,
        }
    }

    pub fn anchor(&self) -> TimerAnchor {
        self.anchor
    }

    pub fn is_paused(&self) -> bool {
        self.anchor.current_pause_started_at_epoch_ms.is_some()
    }

    /// Active (unpaused) milliseconds since the anchor.
    pub fn elapsed_ms(&self) -> i64 {
        let now = self.clock.now_ms();
        let pause_span = self
            .anchor
            .current_pause_started_at_epoch_ms
            .map(|started| (now - started).max(0))
            .unwrap_or(0);
        now - self.anchor.started_at_epoch_ms - self.anchor.paused_accumulated_ms - pause_span
    }

    pub fn remaining_secs(&self) -> i64 {
        let remaining_ms = self.anchor.duration_ms - self.elapsed_ms();
        remaining_ms.div_euclid(1000).max(0)
    }

    pub fn tick(&mut self) -> Tick {
        if self.anchor.duration_ms <= 0 {
            tracing::warn!(
                "Timer state for {:?} has no usable duration, reinitializing",
                self.store.key()
            );
            self.anchor = fresh_anchor(self.clock.now_ms(), self.fallback_minutes.max(1));
            self.store.save_anchor(&self.anchor);
        }

        let remaining_secs = self.remaining_secs();
        let mut expired = false;
        if remaining_secs > 0 {
            self.seen_positive = true;
        } else if self.seen_positive && !self.expiry_fired {
            self.expiry_fired = true;
            expired = true;
        }

        Tick {
            remaining_secs,
            expired,
        }
    }

    /// Starts a pause span (connection lost). Returns false if already paused.
    pub fn pause(&mut self) -> bool {
        if self.is_paused() {
            return false;
        }
        self.anchor.current_pause_started_at_epoch_ms = Some(self.clock.now_ms());
        self.store.save_anchor(&self.anchor);
        true
    }

    /// Folds the current pause span into the accumulated total.
    /// Returns false if not paused.
    pub fn resume(&mut self) -> bool {
        let Some(started) = self.anchor.current_pause_started_at_epoch_ms.take() else {
            return false;
        };
        self.anchor.paused_accumulated_ms += (self.clock.now_ms() - started).max(0);
        self.store.save_anchor(&self.anchor);
        true
    }
}

/// `max(configured, fallback)`, with a missing or non-positive configured
/// value read as the fallback. The fallback is a floor, not just a default.
fn duration_minutes(configured: Option<i64>, fallback: i64) -> i64 {
    let fallback = fallback.max(1);
    configured
        .filter(|minutes| *minutes > 0)
        .unwrap_or(fallback)
        .max(fallback)
}

fn fresh_anchor(now_ms: i64, minutes: i64) -> TimerAnchor {
    TimerAnchor {
        started_at_epoch_ms: now_ms,
        duration_ms: minutes * 60_000,
        paused_accumulated_ms: 0,
        current_pause_started_at_epoch_ms: None,
    }
}
