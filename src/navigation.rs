//! Step index state machine.
//!
//! Out-of-range transitions are no-ops, never errors. Validation gating
//! belongs to the controller; the navigator only enforces bounds.

use serde::Serialize;

/// What a transition did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum NavigationResult {
    Moved { from: usize, to: usize },
    /// At a boundary, out of range, or already there.
    Unchanged,
}

impl NavigationResult {
    pub fn moved(&self) -> bool {
        matches!(self, NavigationResult::Moved { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepNavigator {
    current: usize,
    total: usize,
}

impl StepNavigator {
    /// A navigator over `total` steps, starting at step 0. `total` is at
    /// least 1; a zero count is raised to 1.
    pub fn new(total: usize) -> Self {
        Self {
            current: 0,
            total: total.max(1),
        }
    }

    /// Zero-based index of the current step.
    pub fn current_step(&self) -> usize {
        self.current
    }

    pub fn total_steps(&self) -> usize {
        self.total
    }

    pub fn is_first_step(&self) -> bool {
        self.current == 0
    }

    /// True on the final step, where advancing means submitting.
    pub fn is_last_step(&self) -> bool {
        self.current == self.total - 1
    }

    /// `round(100 * (current + 1) / total)`, so step 1 of 4 reports 25.
    pub fn progress_percent(&self) -> u8 {
        let percent = ((self.current + 1) * 100 + self.total / 2) / self.total;
        // current < total keeps this within 100
        percent.min(100) as u8
    }

    /// Advance one step. `Unchanged` on the last step.
    pub fn next_step(&mut self) -> NavigationResult {
        if self.is_last_step() {
            return NavigationResult::Unchanged;
        }
        self.move_to(self.current + 1)
    }

    /// Go back one step. `Unchanged` on the first step.
    pub fn prev_step(&mut self) -> NavigationResult {
        if self.is_first_step() {
            return NavigationResult::Unchanged;
        }
        self.move_to(self.current - 1)
    }

    pub fn go_to_step(&mut self, index: usize) -> NavigationResult {
        if index >= self.total {
            return NavigationResult::Unchanged;
        }
        self.move_to(index)
    }

    /// Unconditional set used when restoring; callers clamp first (see
    /// [`StepNavigator::clamp`]). An out-of-range index is clamped anyway so
    /// the bounds invariant cannot break.
    pub fn set_step(&mut self, index: usize) {
        self.current = index.min(self.total - 1);
    }

    /// Clamp a persisted step number into `[0, total)`.
    pub fn clamp(&self, step: i64) -> usize {
        let last = self.total - 1;
        usize::try_from(step.max(0)).map_or(last, |s| s.min(last))
    }

    fn move_to(&mut self, index: usize) -> NavigationResult {
        if index == self.current {
            return NavigationResult::Unchanged;
        }
        let from = self.current;
        self.current = index;
        NavigationResult::Moved { from, to: index }
    }
}
