//! Bounded retry counter for source reconnection

use std::sync::atomic::{AtomicU32, Ordering};

/// Retries left before a source failure becomes fatal.
///
/// Decremented by the forwarder on each failure, refilled when the gateway
/// reports video flowing again.
#[derive(Debug)]
pub struct RetryBudget {
    initial: u32,
    remaining: AtomicU32,
}

impl RetryBudget {
    pub fn new(initial: u32) -> Self {
        Self {
            initial,
            remaining: AtomicU32::new(initial),
        }
    }

    /// Take one attempt; returns false when the budget is exhausted
    pub fn try_consume(&self) -> bool {
        self.remaining
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |left| left.checked_sub(1))
            .is_ok()
    }

    pub fn reset(&self) {
        self.remaining.store(self.initial, Ordering::Release);
    }

    pub fn remaining(&self) -> u32 {
        self.remaining.load(Ordering::Acquire)
    }

    pub fn initial(&self) -> u32 {
        self.initial
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_consume_until_exhausted() {
        let budget = RetryBudget::new(3);
        assert!(budget.try_consume());
        assert!(budget.try_consume());
        assert!(budget.try_consume());
        assert!(!budget.try_consume());
        assert_eq!(budget.remaining(), 0);
    }

    #[test]
    fn test_reset_refills() {
        let budget = RetryBudget::new(2);
        assert!(budget.try_consume());
        assert!(budget.try_consume());
        budget.reset();
        assert_eq!(budget.remaining(), 2);
        assert!(budget.try_consume());
    }

    #[test]
    fn test_zero_budget() {
        let budget = RetryBudget::new(0);
        assert!(!budget.try_consume());
    }
}
