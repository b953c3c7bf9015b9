//! Flat array of atomic flag words.
//!
//! All bit updates go through single atomic read-modify-write operations, so
//! agents that own different bits can update the same word from different
//! threads without a lock. `Relaxed` ordering is enough for the words
//! themselves: the dispatcher's join barrier is what orders "all agents are
//! done with this buffer" before "this buffer is flushed".

use std::sync::atomic::{AtomicU64, Ordering};

use crate::types::FlagWord;

/// Fixed-length array of atomic [`FlagWord`]s.
#[derive(Debug)]
pub struct AtomicLattice {
    words: Vec<AtomicU64>,
}

impl AtomicLattice {
    /// Allocate `len` zeroed words.
    pub fn zeroed(len: usize) -> Self {
        let mut words = Vec::with_capacity(len);
        words.resize_with(len, || AtomicU64::new(0));
        Self { words }
    }

    pub fn len(&self) -> usize {
        self.words.len()
    }

    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }

    /// Current value of word `index`.
    #[inline]
    pub fn load(&self, index: usize) -> FlagWord {
        self.words[index].load(Ordering::Relaxed)
    }

    /// Set `mask` in word `index`; returns the previous value.
    #[inline]
    pub fn fetch_or(&self, index: usize, mask: FlagWord) -> FlagWord {
        self.words[index].fetch_or(mask, Ordering::Relaxed)
    }

    /// Clear `mask` in word `index`; returns the previous value.
    #[inline]
    pub fn fetch_and_not(&self, index: usize, mask: FlagWord) -> FlagWord {
        self.words[index].fetch_and(!mask, Ordering::Relaxed)
    }

    /// Overwrite word `index`. Requires exclusive access.
    #[inline]
    pub fn put(&mut self, index: usize, value: FlagWord) {
        *self.words[index].get_mut() = value;
    }

    /// Plain copy of words `[start, start + len)`.
    pub fn snapshot(&self, start: usize, len: usize) -> Vec<FlagWord> {
        self.words[start..start + len]
            .iter()
            .map(|w| w.load(Ordering::Relaxed))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_fetch_or_and_not() {
        let lattice = AtomicLattice::zeroed(4);
        assert_eq!(lattice.fetch_or(1, 0b100), 0);
        assert_eq!(lattice.fetch_or(1, 0b100), 0b100);
        assert_eq!(lattice.load(1), 0b100);
        assert_eq!(lattice.fetch_and_not(1, 0b100), 0b100);
        assert_eq!(lattice.load(1), 0);
        assert_eq!(lattice.load(0), 0);
    }

    #[test]
    fn test_put_and_snapshot() {
        let mut lattice = AtomicLattice::zeroed(3);
        lattice.put(0, 7);
        lattice.put(2, 9);
        assert_eq!(lattice.snapshot(0, 3), vec![7, 0, 9]);
        assert_eq!(lattice.snapshot(1, 2), vec![0, 9]);
    }

    #[test]
    fn test_concurrent_disjoint_bits() {
        let lattice = Arc::new(AtomicLattice::zeroed(16));
        std::thread::scope(|scope| {
            for b in 0..8u32 {
                let lattice = Arc::clone(&lattice);
                scope.spawn(move || {
                    for i in 0..16 {
                        lattice.fetch_or(i, 1 << b);
                    }
                });
            }
        });
        for i in 0..16 {
            assert_eq!(lattice.load(i), 0xff);
        }
    }
}
