use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Process-wide ceiling on resident frame memory, shared by every loaded match.
#[derive(Debug)]
pub struct MemoryBudget {
    limit_bytes: usize,
    used_bytes: AtomicUsize,
}

impl MemoryBudget {
    pub fn new(limit_bytes: usize) -> Self {
        Self { limit_bytes, used_bytes: AtomicUsize::new(0) }
    }

    pub fn shared(limit_bytes: usize) -> Arc<Self> {
        Arc::new(Self::new(limit_bytes))
    }

    pub fn limit(&self) -> usize {
        self.limit_bytes
    }

    pub fn used(&self) -> usize {
        self.used_bytes.load(Ordering::Acquire)
    }

    pub fn charge(&self, bytes: usize) {
        self.used_bytes.fetch_add(bytes, Ordering::AcqRel);
    }

    pub fn release(&self, bytes: usize) {
        let _ = self
            .used_bytes
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |used| Some(used.saturating_sub(bytes)));
    }

    pub fn over_limit(&self) -> bool {
        self.used() > self.limit_bytes
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_charge_and_release() {
        let budget = MemoryBudget::new(100);
        budget.charge(60);
        budget.charge(60);
        assert!(budget.over_limit());
        budget.release(60);
        assert_eq!(budget.used(), 60);
        assert!(!budget.over_limit());
        budget.release(1_000);
        assert_eq!(budget.used(), 0);
    }
}
