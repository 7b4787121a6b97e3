//! Strictly monotonic per-session sequence numbers (§8 property 9). Shared
//! by every adapter so the allocator lives in one place instead of being
//! reimplemented three times.

use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
pub struct SequenceAllocator(AtomicU64);

impl SequenceAllocator {
    pub fn new() -> Self {
        Self(AtomicU64::new(0))
    }

    pub fn next(&self) -> u64 {
        self.0.fetch_add(1, Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sequence_numbers_strictly_increase() {
        let seq = SequenceAllocator::new();
        let a = seq.next();
        let b = seq.next();
        let c = seq.next();
        assert!(a < b && b < c);
    }
}
