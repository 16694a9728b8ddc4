//! Approximate-set (BITSET) metric: a growable bit-packed set of
//! dictionary codes with a cached cardinality, used to implement
//! distinct-count metrics (spec §3 BITSET row, §4.3 step 6).
//!
//! The bit array is a `Vec<u64>` word-packed the same way as a bloom
//! filter's bit array, but grows on demand rather than being sized
//! up-front for a fixed false-positive rate: a BITSET metric tracks
//! exact membership over the declared code width's domain, not a
//! probabilistic approximation.

use serde::{Deserialize, Serialize};

/// A bit-packed set of `u64` codes with O(1) cached cardinality.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BitsetMetric {
    words: Vec<u64>,
    cardinality: u64,
}

impl BitsetMetric {
    /// An empty bitset, allocation-free until the first insert.
    pub fn new() -> Self {
        Self {
            words: Vec::new(),
            cardinality: 0,
        }
    }

    /// A reusable empty-bitset scratch value, matching the ingest path's
    /// "reusable empty-bitset scratch to avoid allocation when the
    /// subsequent upsert merges" (spec §4.3 step 4).
    pub fn empty_scratch() -> Self {
        Self::new()
    }

    /// A fresh bitset containing a single code, as produced for a brand
    /// new row before its first upsert merge.
    pub fn singleton(code: u64) -> Self {
        let mut b = Self::new();
        b.insert(code);
        b
    }

    fn ensure_capacity(&mut self, word_index: usize) {
        if word_index >= self.words.len() {
            self.words.resize(word_index + 1, 0);
        }
    }

    /// Insert `code`, returning whether it was newly added.
    pub fn insert(&mut self, code: u64) -> bool {
        let word_index = (code / 64) as usize;
        let bit_offset = code % 64;
        self.ensure_capacity(word_index);
        let mask = 1u64 << bit_offset;
        let was_set = self.words[word_index] & mask != 0;
        if !was_set {
            self.words[word_index] |= mask;
            self.cardinality += 1;
        }
        !was_set
    }

    pub fn contains(&self, code: u64) -> bool {
        let word_index = (code / 64) as usize;
        match self.words.get(word_index) {
            Some(word) => word & (1u64 << (code % 64)) != 0,
            None => false,
        }
    }

    /// `a ∪= b` (spec §3 BITSET update rule), merging `other`'s bits
    /// into `self` and updating the cached cardinality incrementally.
    pub fn merge(&mut self, other: &BitsetMetric) {
        if other.words.len() > self.words.len() {
            self.words.resize(other.words.len(), 0);
        }
        for (i, &word) in other.words.iter().enumerate() {
            let before = self.words[i];
            let after = before | word;
            if after != before {
                self.cardinality += (after ^ before).count_ones() as u64;
                self.words[i] = after;
            }
        }
    }

    /// Number of distinct codes currently held. Cached at insert/merge
    /// time rather than recomputed by popcounting every word.
    pub fn cardinality(&self) -> u64 {
        self.cardinality
    }

    /// Trim trailing all-zero words, trading a touch of CPU now for a
    /// smaller resident footprint (spec §4.3 step 6: "every N updates
    /// optimize any bitset metric in place").
    pub fn optimize(&mut self) {
        while matches!(self.words.last(), Some(&0)) {
            self.words.pop();
        }
        self.words.shrink_to_fit();
    }

    /// Resident size of the bit array in bytes, useful for diagnostics.
    pub fn memory_usage(&self) -> usize {
        self.words.len() * std::mem::size_of::<u64>()
    }
}
