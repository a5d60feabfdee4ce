// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Compensation log for multi-step fabric operations.
//!
//! Each side effect is recorded once it has succeeded. If a later step
//! fails, the recorded steps are undone in reverse order; if every step
//! succeeds the log is discarded with [`Saga::complete`].

use tracing::debug;

/// Ordered list of committed steps.
#[derive(Debug)]
pub struct Saga<S> {
    operation: &'static str,
    steps: Vec<S>,
}

impl<S: std::fmt::Debug> Saga<S> {
    /// Start an empty log for `operation`.
    pub fn new(operation: &'static str) -> Self {
        Self {
            operation,
            steps: Vec::new(),
        }
    }

    /// Record a step that has taken effect.
    pub fn commit(&mut self, step: S) {
        debug!("{}: committed {:?}", self.operation, step);
        self.steps.push(step);
    }

    /// Committed steps, oldest first.
    pub fn steps(&self) -> &[S] {
        &self.steps
    }

    /// Finish successfully; nothing is undone.
    pub fn complete(self) {
        debug!("{}: completed after {} steps", self.operation, self.steps.len());
    }

    /// Undo every committed step, newest first.
    pub fn unwind<F>(mut self, mut compensate: F)
    where
        F: FnMut(S),
    {
        debug!("{}: unwinding {} steps", self.operation, self.steps.len());
        while let Some(step) = self.steps.pop() {
            compensate(step);
        }
    }
}
