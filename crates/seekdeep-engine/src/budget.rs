//! Token budget accounting.
//!
//! The one piece of shared mutable state in an invocation. Every gateway
//! call records its usage here after it returns; the orchestrator consults
//! `reached` before spawning child work and before recursing. The final
//! report is never budget-gated.

use seekdeep_core::{BudgetState, TokenUsage};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

pub struct BudgetMeter {
    cap: Option<u64>,
    used: AtomicU64,
    reached: AtomicBool,
}

impl BudgetMeter {
    pub fn new(cap: Option<u64>) -> Self {
        Self {
            cap,
            used: AtomicU64::new(0),
            reached: AtomicBool::new(false),
        }
    }

    /// Add a call's usage. `reached` is sticky: once the cap is hit it
    /// never clears, even though `used` keeps growing (the budget is a
    /// soft cap, checked after calls rather than before them).
    pub fn record(&self, usage: TokenUsage) {
        let used = self.used.fetch_add(usage.total, Ordering::Relaxed) + usage.total;
        if let Some(cap) = self.cap {
            if used >= cap {
                self.reached.store(true, Ordering::Release);
            }
        }
    }

    /// Point-in-time check; a stale `false` costs at most one extra call.
    pub fn reached(&self) -> bool {
        self.reached.load(Ordering::Acquire)
    }

    pub fn snapshot(&self) -> BudgetState {
        BudgetState {
            cap: self.cap,
            used_tokens: self.used.load(Ordering::Relaxed),
            reached: self.reached(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_cap_never_reaches() {
        let meter = BudgetMeter::new(None);
        meter.record(TokenUsage { total: 1_000_000 });
        assert!(!meter.reached());
        assert_eq!(meter.snapshot().used_tokens, 1_000_000);
    }

    #[test]
    fn reached_flips_at_cap_and_sticks() {
        let meter = BudgetMeter::new(Some(1_000));
        meter.record(TokenUsage { total: 600 });
        assert!(!meter.reached());
        meter.record(TokenUsage { total: 600 });
        assert!(meter.reached());
        // Still sticky after more usage.
        meter.record(TokenUsage { total: 1 });
        assert!(meter.reached());
        let snap = meter.snapshot();
        assert_eq!(snap.used_tokens, 1_201);
        assert!(snap.reached);
    }

    #[test]
    fn used_is_monotonic_under_concurrent_records() {
        let meter = std::sync::Arc::new(BudgetMeter::new(Some(10_000)));
        let mut handles = Vec::new();
        for _ in 0..8 {
            let meter = meter.clone();
            handles.push(std::thread::spawn(move || {
                for _ in 0..100 {
                    meter.record(TokenUsage { total: 10 });
                }
            }));
        }
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(meter.snapshot().used_tokens, 8_000);
        assert!(!meter.reached());
    }
}
