//! Adaptive concurrency control
//!
//! A ring of the last 100 outcomes drives the concurrency target: +5 on a
//! success that crosses the threshold, -10 on every captcha or block,
//! always clamped to [min, max]. The adjustment is evaluated inline in the
//! outcome handler, one comparison per outcome, so a reduce-on-block and
//! an increase-on-success can never race.

use std::collections::VecDeque;

/// Size of the recent-outcome window.
const WINDOW: usize = 100;

/// Concurrency step on qualifying successes.
const INCREASE_STEP: usize = 5;

/// Concurrency step on captcha/block.
const DECREASE_STEP: usize = 10;

/// Margin over the target rate required before growing.
const GROWTH_MARGIN: f64 = 0.05;

/// Recent-outcome window plus the current concurrency value.
pub struct AdaptiveController {
    outcomes: VecDeque<bool>,
    current: usize,
    min: usize,
    max: usize,
    target_rate: f64,
    enabled: bool,
}

impl AdaptiveController {
    pub fn new(initial: usize, min: usize, max: usize, target_rate: f64, enabled: bool) -> Self {
        let min = min.max(1);
        let max = max.max(min);
        Self {
            outcomes: VecDeque::with_capacity(WINDOW),
            current: initial.clamp(min, max),
            min,
            max,
            target_rate,
            enabled,
        }
    }

    pub fn current(&self) -> usize {
        self.current
    }

    /// Success rate over the window; denominator is min(outcomes, 100).
    pub fn recent_success_rate(&self) -> f64 {
        if self.outcomes.is_empty() {
            return 0.0;
        }
        let successes = self.outcomes.iter().filter(|s| **s).count();
        successes as f64 / self.outcomes.len() as f64
    }

    fn push(&mut self, success: bool) {
        if self.outcomes.len() == WINDOW {
            self.outcomes.pop_front();
        }
        self.outcomes.push_back(success);
    }

    /// Record a success. Returns the new concurrency when it changed.
    pub fn on_success(&mut self) -> Option<usize> {
        self.push(true);
        if !self.enabled {
            return None;
        }

        if self.recent_success_rate() >= self.target_rate + GROWTH_MARGIN
            && self.current < self.max
        {
            self.current = (self.current + INCREASE_STEP).min(self.max);
            return Some(self.current);
        }
        None
    }

    /// Record a captcha or block. Returns the new concurrency when it
    /// changed.
    pub fn on_throttle(&mut self) -> Option<usize> {
        self.push(false);
        if !self.enabled {
            return None;
        }

        if self.current > self.min {
            self.current = self.current.saturating_sub(DECREASE_STEP).max(self.min);
            return Some(self.current);
        }
        None
    }

    /// Record a transport-level failure: counts against the window but
    /// does not adjust concurrency.
    pub fn on_failure(&mut self) {
        self.push(false);
    }

    /// Reset the window and concurrency for a fresh run.
    pub fn reset(&mut self, initial: usize) {
        self.outcomes.clear();
        self.current = initial.clamp(self.min, self.max);
    }
}
