//! Fixed-capacity columnar segment: parallel per-dimension and per-metric
//! columns plus per-segment min/max stats (spec §3 "Segment", §4.2).

use crate::bitset::BitsetMetric;
use crate::rollup::Granularity;
use crate::schema::{AggType, Dimension, Metric, TableSchema};
use crate::types::AnyNum;
use parking_lot::RwLock;
use std::hash::{Hash, Hasher};

/// A single dimension value, tagged the same way as `Dimension` (spec §9:
/// dispatch by pattern match, not a visitor).
#[derive(Debug, Clone, Copy)]
pub enum DimValue {
    String(u64),
    Numeric(AnyNum),
    Time(i64),
    Boolean(bool),
}

impl DimValue {
    /// Canonical bit-pattern used for equality/hashing. Floats compare by
    /// exact bits (not `==`), which is sound here because dimension
    /// values always come from the same deterministic parse path, never
    /// from independent float arithmetic that could differ by rounding.
    fn eq_key(&self) -> (u8, u64) {
        match self {
            DimValue::String(c) => (0, *c),
            DimValue::Boolean(b) => (1, *b as u64),
            DimValue::Time(t) => (2, *t as u64),
            DimValue::Numeric(n) => (3, n.key_bits()),
        }
    }

    /// Widen to `f64` for segment-stats/filter comparisons.
    pub fn as_f64(&self) -> f64 {
        match self {
            DimValue::String(c) => *c as f64,
            DimValue::Boolean(b) => {
                if *b {
                    1.0
                } else {
                    0.0
                }
            }
            DimValue::Time(t) => *t as f64,
            DimValue::Numeric(n) => n.as_f64(),
        }
    }
}

impl PartialEq for DimValue {
    fn eq(&self, other: &Self) -> bool {
        self.eq_key() == other.eq_key()
    }
}
impl Eq for DimValue {}
impl Hash for DimValue {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.eq_key().hash(state);
    }
}

/// A single metric value, as carried in a parsed ingest row or scanned
/// out of a tuple (spec §3 "Metric kinds").
#[derive(Debug, Clone)]
pub enum MetricValue {
    /// SUM/MIN/MAX/COUNT
    Value(AnyNum),
    /// AVG, stored as its running sum plus a companion count (spec §4.3
    /// step 4, "AVG sets the implicit ... count field").
    Avg { sum: AnyNum, count: u64 },
    Bitset(BitsetMetric),
}

impl MetricValue {
    /// Merge `other` into `self` per the metric's `AggType` update rule
    /// (spec §3 "Metric kinds" Update rule column).
    pub fn update(&mut self, other: &MetricValue, agg: AggType) {
        match (self, other) {
            (MetricValue::Value(a), MetricValue::Value(b)) => {
                *a = match agg {
                    AggType::Sum | AggType::Count => a.add(*b),
                    AggType::Min => a.min(*b),
                    AggType::Max => a.max(*b),
                    AggType::Avg => unreachable!("avg metrics use the Avg variant"),
                };
            }
            (MetricValue::Avg { sum, count }, MetricValue::Avg { sum: s2, count: c2 }) => {
                *sum = sum.add(*s2);
                *count += c2;
            }
            (MetricValue::Bitset(a), MetricValue::Bitset(b)) => a.merge(b),
            _ => unreachable!("mismatched metric value kinds"),
        }
    }
}

/// Per-dimension min/max accumulated across inserted tuples, using `f64`
/// as the common comparison domain (spec §3 "Segment stats").
#[derive(Debug, Clone, Copy)]
pub struct DimStats {
    pub min: f64,
    pub max: f64,
}

impl DimStats {
    fn observe(&mut self, v: f64) {
        if v < self.min {
            self.min = v;
        }
        if v > self.max {
            self.max = v;
        }
    }

    fn initial(v: f64) -> Self {
        DimStats { min: v, max: v }
    }
}

struct SegmentData {
    dims: Vec<Vec<DimValue>>,
    metrics: Vec<Vec<MetricValue>>,
    stats: Vec<Option<DimStats>>,
    size: usize,
}

/// A fixed-capacity block of columnar tuples. Reads and writes are
/// synchronized by a single segment-level `RwLock`: appends/updates take
/// it exclusive, scans take it shared (spec §4.2).
pub struct Segment {
    capacity: usize,
    data: RwLock<SegmentData>,
}

impl Segment {
    pub fn new(schema: &TableSchema) -> Self {
        Segment {
            capacity: schema.segment_size,
            data: RwLock::new(SegmentData {
                dims: vec![Vec::new(); schema.dimensions.len()],
                metrics: vec![Vec::new(); schema.metrics.len()],
                stats: vec![None; schema.dimensions.len()],
                size: 0,
            }),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Current number of live tuples, under a shared lock.
    pub fn size(&self) -> usize {
        self.data.read().size
    }

    pub fn is_full(&self) -> bool {
        self.size() >= self.capacity
    }

    /// Append one tuple, returning its index within the segment. Updates
    /// `stats` for numeric/time dimensions (spec §4.2 "insert").
    pub fn insert(&self, dims: Vec<DimValue>, metrics: Vec<MetricValue>) -> usize {
        let mut data = self.data.write();
        let index = data.size;
        for (i, d) in dims.iter().enumerate() {
            data.dims[i].push(*d);
            if let Some(stats) = &mut data.stats[i] {
                stats.observe(d.as_f64());
            } else {
                data.stats[i] = Some(DimStats::initial(d.as_f64()));
            }
        }
        for (i, m) in metrics.into_iter().enumerate() {
            data.metrics[i].push(m);
        }
        data.size += 1;
        index
    }

    /// Merge `metrics` into the tuple at `index` per each metric's
    /// `AggType` (spec §4.2 "update").
    pub fn update(&self, index: usize, metrics: &[MetricValue], aggs: &[AggType]) {
        let mut data = self.data.write();
        for (i, (m, agg)) in metrics.iter().zip(aggs.iter()).enumerate() {
            data.metrics[i][index].update(m, *agg);
        }
    }

    /// Conservative segment-skip check against a single dimension's
    /// observed stats (spec §4.4 "Segment-skip predicate"). Returns
    /// `None` if the dimension carries no stats yet (empty segment) or
    /// doesn't participate in stats (string/boolean).
    pub fn dim_stats(&self, dim_index: usize) -> Option<DimStats> {
        self.data.read().stats.get(dim_index).copied().flatten()
    }

    /// Read-only snapshot of one dimension column, for scanning.
    pub fn with_dim_column<R>(&self, dim_index: usize, f: impl FnOnce(&[DimValue]) -> R) -> R {
        let data = self.data.read();
        f(&data.dims[dim_index])
    }

    /// Run `f` over a consistent view of the whole tuple set (all
    /// dimension and metric columns plus the live size), under one
    /// shared-lock acquisition — used by the query executor's scan loop
    /// so a tuple's dimensions and metrics are read from the same
    /// snapshot instant.
    pub fn scan<R>(&self, f: impl FnOnce(&[Vec<DimValue>], &[Vec<MetricValue>], usize) -> R) -> R {
        let data = self.data.read();
        f(&data.dims, &data.metrics, data.size)
    }

    /// Apply `optimize()` to every bitset metric column in place (spec
    /// §4.3 step 6).
    pub fn optimize_bitsets(&self, metrics: &[Metric]) {
        let mut data = self.data.write();
        for (i, m) in metrics.iter().enumerate() {
            if matches!(m, Metric::Bitset(_)) {
                for v in &mut data.metrics[i] {
                    if let MetricValue::Bitset(b) = v {
                        b.optimize();
                    }
                }
            }
        }
    }
}

impl std::fmt::Debug for Segment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Segment")
            .field("capacity", &self.capacity)
            .field("size", &self.size())
            .finish()
    }
}

/// Query-time bucketing of a time dimension value to a coarser
/// granularity (spec §4.5 step 2, distinct from ingest-time rollup).
pub fn truncate_for_query(value: i64, precision: crate::types::TimePrecision, granularity: Granularity) -> i64 {
    let secs = crate::schema::to_secs(value, precision);
    crate::schema::from_secs(granularity.truncate(secs), precision)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{AggType, Dimension, Metric, NumericDimension, StringDimension, ValueMetric};
    use crate::types::NumType;

    fn schema_with(dims: usize, metrics: usize, segment_size: usize) -> TableSchema {
        TableSchema {
            name: "t".into(),
            segment_size,
            dimensions: (0..dims)
                .map(|i| {
                    Dimension::String(StringDimension {
                        name: format!("d{}", i),
                        cardinality: 1000,
                        max_length: None,
                        code_width: NumType::Ushort,
                    })
                })
                .collect(),
            metrics: (0..metrics)
                .map(|i| {
                    Metric::Value(ValueMetric {
                        name: format!("m{}", i),
                        agg: AggType::Sum,
                        num_type: NumType::Double,
                        field: format!("m{}", i),
                    })
                })
                .collect(),
            cardinality_guards: Vec::new(),
            watch: None,
        }
    }

    #[test]
    fn test_insert_and_size() {
        let schema = schema_with(1, 1, 10);
        let seg = Segment::new(&schema);
        assert_eq!(seg.size(), 0);
        let idx = seg.insert(vec![DimValue::String(1)], vec![MetricValue::Value(AnyNum::Double(1.0))]);
        assert_eq!(idx, 0);
        assert_eq!(seg.size(), 1);
        assert!(!seg.is_full());
    }

    #[test]
    fn test_update_merges_sum() {
        let schema = schema_with(1, 1, 10);
        let seg = Segment::new(&schema);
        let idx = seg.insert(vec![DimValue::String(1)], vec![MetricValue::Value(AnyNum::Double(1.0))]);
        seg.update(idx, &[MetricValue::Value(AnyNum::Double(2.0))], &[AggType::Sum]);
        seg.scan(|_dims, metrics, _size| {
            if let MetricValue::Value(v) = &metrics[0][idx] {
                assert_eq!(v.as_f64(), 3.0);
            } else {
                panic!("expected value metric");
            }
        });
    }

    #[test]
    fn test_full_segment() {
        let schema = schema_with(1, 1, 2);
        let seg = Segment::new(&schema);
        seg.insert(vec![DimValue::String(1)], vec![MetricValue::Value(AnyNum::Double(1.0))]);
        assert!(!seg.is_full());
        seg.insert(vec![DimValue::String(2)], vec![MetricValue::Value(AnyNum::Double(1.0))]);
        assert!(seg.is_full());
    }

    #[test]
    fn test_numeric_dim_stats_tracked() {
        let mut schema = schema_with(0, 0, 10);
        schema.dimensions.push(Dimension::Numeric(NumericDimension {
            name: "n".into(),
            num_type: NumType::Int,
        }));
        let seg = Segment::new(&schema);
        seg.insert(vec![DimValue::Numeric(AnyNum::Int(5))], vec![]);
        seg.insert(vec![DimValue::Numeric(AnyNum::Int(9))], vec![]);
        seg.insert(vec![DimValue::Numeric(AnyNum::Int(1))], vec![]);
        let stats = seg.dim_stats(0).unwrap();
        assert_eq!(stats.min, 1.0);
        assert_eq!(stats.max, 9.0);
    }

    #[test]
    fn test_dim_value_equality_for_group_by_keys() {
        use std::collections::HashSet;
        let mut set = HashSet::new();
        set.insert(DimValue::String(5));
        set.insert(DimValue::String(5));
        set.insert(DimValue::Numeric(AnyNum::Double(1.5)));
        assert_eq!(set.len(), 2);
    }
}
