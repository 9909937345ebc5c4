use std::{
    collections::HashMap,
    sync::{Mutex, MutexGuard, PoisonError},
};

/// Per-learner aggregation progress, kept in memory only.
///
/// A restarted monitor starts from zero and replays every sequence; the overall status CAS makes that idempotent.
#[derive(Debug, Default)]
pub struct LearnerLedger {
    inner: Mutex<HashMap<u32, LearnerProgress>>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LearnerProgress {
    /// Entries of the learner sequence already processed.
    pub processed: usize,
    /// A terminal status of this learner has been counted.
    pub terminal_counted: bool,
}

impl LearnerLedger {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<u32, LearnerProgress>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn get(&self, learner: u32) -> LearnerProgress {
        self.lock().get(&learner).copied().unwrap_or_default()
    }

    /// Number of entries already processed for `learner`.
    pub fn watermark(&self, learner: u32) -> usize {
        self.get(learner).processed
    }

    /// Move the watermark forward to `processed`; a lower value is ignored.
    pub fn advance(&self, learner: u32, processed: usize) {
        let mut inner = self.lock();
        let progress = inner.entry(learner).or_default();
        progress.processed = progress.processed.max(processed);
    }

    /// Record a terminal status; true only the first time for a learner.
    pub fn mark_terminal(&self, learner: u32) -> bool {
        let mut inner = self.lock();
        let progress = inner.entry(learner).or_default();
        !std::mem::replace(&mut progress.terminal_counted, true)
    }
}
