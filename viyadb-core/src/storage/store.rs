//! Append-only ordered sequence of segments (spec §3 "Store", §4.2).

use crate::schema::TableSchema;
use crate::storage::segment::Segment;
use parking_lot::RwLock;
use std::sync::Arc;

/// An append-only vector of segments. A store-level `RwLock` guards only
/// *list-structure* changes (appending a new segment); individual
/// segments are locked independently for reads/writes, so scans never
/// contend with each other or with an ingest that isn't rotating the
/// tail (spec §4.2 "Rationale", §5 "Shared-resource policy").
pub struct Store {
    segments: RwLock<Vec<Arc<Segment>>>,
}

impl Store {
    pub fn new() -> Self {
        Store {
            segments: RwLock::new(Vec::new()),
        }
    }

    /// Return the tail segment and its index, creating a fresh one under
    /// the store's exclusive lock when the store is empty or the current
    /// tail is full (spec §4.2 "Store operations"). The index is needed
    /// by the upsert engine to compute a tuple's global offset.
    pub fn last_segment(&self, schema: &TableSchema) -> (usize, Arc<Segment>) {
        {
            let segments = self.segments.read();
            if let Some(last) = segments.last() {
                if !last.is_full() {
                    return (segments.len() - 1, last.clone());
                }
            }
        }
        let mut segments = self.segments.write();
        // Re-check under the exclusive lock: another writer may have
        // already rotated the tail between the shared check above and
        // taking the write lock (harmless under single-writer ingest,
        // but kept correct in case that assumption is ever relaxed).
        if let Some(last) = segments.last() {
            if !last.is_full() {
                return (segments.len() - 1, last.clone());
            }
        }
        let fresh = Arc::new(Segment::new(schema));
        segments.push(fresh.clone());
        let index = segments.len() - 1;
        log::info!("store: rotated to a new segment (index {})", index);
        (index, fresh)
    }

    /// A consistent snapshot of the segment list, taken under a shared
    /// lock — this is the scan input for a query (spec §4.2, §5
    /// "Ordering guarantees": segments appended after the snapshot is
    /// taken are not observed by that query).
    pub fn snapshot(&self) -> Vec<Arc<Segment>> {
        self.segments.read().clone()
    }

    pub fn segment_count(&self) -> usize {
        self.segments.read().len()
    }

    /// Total live tuples across all segments.
    pub fn total_size(&self) -> usize {
        self.snapshot().iter().map(|s| s.size()).sum()
    }
}

impl Default for Store {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store")
            .field("segment_count", &self.segment_count())
            .field("total_size", &self.total_size())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{Dimension, StringDimension, TableSchema};
    use crate::storage::segment::DimValue;
    use crate::types::NumType;

    fn tiny_schema(segment_size: usize) -> TableSchema {
        TableSchema {
            name: "t".into(),
            segment_size,
            dimensions: vec![Dimension::String(StringDimension {
                name: "d".into(),
                cardinality: 100,
                max_length: None,
                code_width: NumType::Ubyte,
            })],
            metrics: Vec::new(),
            cardinality_guards: Vec::new(),
            watch: None,
        }
    }

    #[test]
    fn test_empty_store_creates_first_segment() {
        let store = Store::new();
        let schema = tiny_schema(2);
        assert_eq!(store.segment_count(), 0);
        let (index, seg) = store.last_segment(&schema);
        assert_eq!(index, 0);
        assert_eq!(store.segment_count(), 1);
        assert_eq!(seg.size(), 0);
    }

    #[test]
    fn test_rotates_when_tail_full() {
        let store = Store::new();
        let schema = tiny_schema(1);
        let (idx0, seg0) = store.last_segment(&schema);
        seg0.insert(vec![DimValue::String(1)], vec![]);
        assert!(seg0.is_full());
        let (idx1, seg1) = store.last_segment(&schema);
        assert_eq!(idx0, 0);
        assert_eq!(idx1, 1);
        assert_eq!(store.segment_count(), 2);
        assert_eq!(seg1.size(), 0);
    }

    #[test]
    fn test_snapshot_is_a_point_in_time_copy() {
        let store = Store::new();
        let schema = tiny_schema(10);
        store.last_segment(&schema);
        let snap = store.snapshot();
        assert_eq!(snap.len(), 1);
        // appending after the snapshot doesn't retroactively change it
        let schema2 = tiny_schema(1);
        for _ in 0..3 {
            store.last_segment(&schema2).1.insert(vec![DimValue::String(1)], vec![]);
        }
        assert_eq!(snap.len(), 1);
        assert!(store.segment_count() >= 1);
    }
}
