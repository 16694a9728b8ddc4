//! Per-string-dimension dictionary: an append-only bidirectional mapping
//! between small integer codes and string values (spec §4.1).

use parking_lot::RwLock;
use std::collections::HashMap;

/// Code 0 is reserved in every dictionary for the `__exceeded` sentinel:
/// it stands both for "dictionary at capacity" and "cardinality guard
/// tripped" (spec §9, preserved for parity with the reference).
pub const EXCEEDED_CODE: u64 = 0;
pub const EXCEEDED_VALUE: &str = "__exceeded";

struct DictData {
    /// code -> value
    c2v: Vec<String>,
    /// value -> code
    v2c: HashMap<String, u64>,
}

/// Append-only bidirectional string<->code mapping, shared between the
/// single ingest writer and any number of concurrent query readers.
pub struct Dictionary {
    data: RwLock<DictData>,
    cardinality: u64,
}

impl std::fmt::Debug for Dictionary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dictionary")
            .field("size", &self.size())
            .field("cardinality", &self.cardinality)
            .finish()
    }
}

impl Dictionary {
    /// Create a new dictionary pre-seeded with the sentinel at code 0,
    /// capped at `cardinality` distinct codes (including the sentinel).
    pub fn new(cardinality: u64) -> Self {
        let mut c2v = Vec::new();
        let mut v2c = HashMap::new();
        c2v.push(EXCEEDED_VALUE.to_string());
        v2c.insert(EXCEEDED_VALUE.to_string(), EXCEEDED_CODE);
        Self {
            data: RwLock::new(DictData { c2v, v2c }),
            cardinality: cardinality.max(1),
        }
    }

    /// Look up `value`'s code if it already exists, without mutating the
    /// dictionary. Takes the lock shared.
    pub fn lookup(&self, value: &str) -> Option<u64> {
        let data = self.data.read();
        data.v2c.get(value).copied()
    }

    /// Return the existing code for `value`, or append a fresh one.
    ///
    /// If the dictionary is already at its cardinality limit, the row is
    /// remapped to the sentinel code 0 instead of failing (spec §4.1,
    /// §7 CapacityError: "not surfaced").
    pub fn encode(&self, value: &str) -> u64 {
        if let Some(code) = self.lookup(value) {
            return code;
        }
        let mut data = self.data.write();
        // Re-check under the exclusive lock: another writer may have
        // raced us between the shared lookup and taking the write lock.
        if let Some(code) = data.v2c.get(value) {
            return *code;
        }
        let next_code = data.c2v.len() as u64;
        if next_code >= self.cardinality {
            log::debug!("dictionary at capacity ({}), remapping to sentinel", self.cardinality);
            return EXCEEDED_CODE;
        }
        data.c2v.push(value.to_string());
        data.v2c.insert(value.to_string(), next_code);
        next_code
    }

    /// Decode a code back to its value. Codes are never reused or
    /// deleted, so this is a simple O(1) vector index.
    pub fn decode(&self, code: u64) -> Option<String> {
        let data = self.data.read();
        data.c2v.get(code as usize).cloned()
    }

    /// Number of distinct codes currently assigned, including the
    /// sentinel.
    pub fn size(&self) -> usize {
        self.data.read().c2v.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sentinel_preseeded() {
        let dict = Dictionary::new(100);
        assert_eq!(dict.size(), 1);
        assert_eq!(dict.decode(0).as_deref(), Some(EXCEEDED_VALUE));
    }

    #[test]
    fn test_encode_is_stable_and_monotonic() {
        let dict = Dictionary::new(100);
        let a = dict.encode("US");
        let b = dict.encode("RU");
        let a2 = dict.encode("US");
        assert_eq!(a, a2);
        assert_ne!(a, b);
        assert!(a >= 1 && b >= 1);
    }

    #[test]
    fn test_overflow_remaps_to_sentinel() {
        // cardinality 2 => 1 sentinel slot + 1 real code
        let dict = Dictionary::new(2);
        let first = dict.encode("US");
        assert_ne!(first, EXCEEDED_CODE);
        let second = dict.encode("RU");
        assert_eq!(second, EXCEEDED_CODE);
        // a value that already got a real code before overflow stays stable
        assert_eq!(dict.encode("US"), first);
    }

    #[test]
    fn test_decode_unknown_code() {
        let dict = Dictionary::new(10);
        assert_eq!(dict.decode(999), None);
    }
}
