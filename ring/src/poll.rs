//! Poll results.

/// Why a poll pass stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    /// No completions left; the interrupt has been re-armed.
    Exhausted,
    /// Budget used up; more work may be pending and the interrupt stays
    /// masked. Poll again.
    BudgetReached,
}

/// Result of one [`RxQueue::poll`](crate::RxQueue::poll) pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollReport {
    /// Descriptors processed, good or bad. Never exceeds the budget.
    pub completed: usize,
    /// Why the pass stopped.
    pub outcome: PollOutcome,
}

impl PollReport {
    /// Whether the caller should wait for the next interrupt instead of
    /// polling again.
    #[inline]
    pub fn rearm(&self) -> bool {
        self.outcome == PollOutcome::Exhausted
    }
}
