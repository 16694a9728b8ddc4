//! Per-table ingest context and the upsert-with-rollup row algorithm
//! (spec §3 "UpsertContext", §4.3).

use crate::bitset::BitsetMetric;
use crate::config::UpsertConfig;
use crate::dict::{Dictionary, EXCEEDED_CODE};
use crate::error::{Error, Result};
use crate::rollup::apply_rollup;
use crate::schema::{AggType, Dimension, Metric, TableSchema};
use crate::storage::{DimValue, MetricValue, Store};
use crate::types::AnyNum;
use std::collections::HashMap;

/// Per-file/per-call ingest counters (spec §4.3 "Failure semantics").
#[derive(Debug, Clone, Copy, Default)]
pub struct UpsertStats {
    pub new_records: u64,
    pub updated_records: u64,
    pub failed_records: u64,
}

/// Whether a row created a brand new tuple or merged into an existing
/// one (spec §4.3 step 5).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Inserted,
    Updated,
}

/// Per-table mutable ingest state, owned by the table for its lifetime
/// (spec §3 "UpsertContext"). Only ever touched by the single ingest
/// writer for this table (spec §4.3 "Concurrency").
pub struct UpsertContext {
    /// (dimension tuple) -> global offset (`segment_index * segment_size
    /// + tuple_index`).
    tuple_offsets: HashMap<Vec<DimValue>, u64>,
    /// One entry per schema-level cardinality guard: (companion-dims key)
    /// -> bitset of observed guarded-dimension codes.
    guard_state: Vec<HashMap<Vec<DimValue>, BitsetMetric>>,
    updates_since_optimize: u64,
    pub stats: UpsertStats,
}

impl UpsertContext {
    pub fn new(schema: &TableSchema) -> Self {
        UpsertContext {
            tuple_offsets: HashMap::new(),
            guard_state: schema.cardinality_guards.iter().map(|_| HashMap::new()).collect(),
            updates_since_optimize: 0,
            stats: UpsertStats::default(),
        }
    }

    /// Number of distinct tuples currently tracked — P1 (Uniqueness)
    /// depends on this equaling the store's summed live segment sizes
    /// minus in-place updates.
    pub fn tuple_count(&self) -> usize {
        self.tuple_offsets.len()
    }
}

fn metric_agg(m: &Metric) -> AggType {
    match m {
        Metric::Value(v) => v.agg,
        // Bitset's `update` dispatches on the variant itself, not this
        // tag; any placeholder works here.
        Metric::Bitset(_) => AggType::Sum,
    }
}

fn count_one(num_type: crate::types::NumType) -> AnyNum {
    AnyNum::from_u64(num_type, 1)
}

fn truncate_chars(text: &str, max_len: usize) -> &str {
    match text.char_indices().nth(max_len) {
        Some((byte_idx, _)) => &text[..byte_idx],
        None => text,
    }
}

fn parse_dimension(dim: &Dimension, text: &str, dict: Option<&Dictionary>, now: i64) -> Result<DimValue> {
    match dim {
        Dimension::String(sd) => {
            let input = match sd.max_length {
                Some(len) => truncate_chars(text, len),
                None => text,
            };
            let dict = dict.ok_or_else(|| Error::internal("string dimension missing its dictionary"))?;
            Ok(DimValue::String(dict.encode(input)))
        }
        Dimension::Numeric(nd) => Ok(DimValue::Numeric(nd.num_type.parse(text)?)),
        Dimension::Time(td) => {
            let raw = td.format.parse(text, td.precision)?;
            let secs = crate::schema::to_secs(raw, td.precision);
            let truncated = if !td.rollup_rules.is_empty() {
                apply_rollup(secs, &td.rollup_rules, now)
            } else if let Some(g) = td.granularity {
                g.truncate(secs)
            } else {
                secs
            };
            Ok(DimValue::Time(crate::schema::from_secs(truncated, td.precision)))
        }
        Dimension::Boolean(_) => Ok(DimValue::Boolean(text.trim().eq_ignore_ascii_case("true"))),
    }
}

fn parse_metric(metric: &Metric, text: &str, schema: &TableSchema, dims: &[DimValue]) -> Result<MetricValue> {
    match metric {
        Metric::Value(vm) => match vm.agg {
            AggType::Count => Ok(MetricValue::Value(count_one(vm.num_type))),
            AggType::Avg => Ok(MetricValue::Avg {
                sum: vm.num_type.parse(text)?,
                count: 1,
            }),
            AggType::Sum | AggType::Min | AggType::Max => Ok(MetricValue::Value(vm.num_type.parse(text)?)),
        },
        Metric::Bitset(bm) => {
            let code = match schema.dimension_index(&bm.field) {
                Some(dim_idx) => dim_value_as_code(dims[dim_idx]),
                None => text
                    .trim()
                    .parse::<u64>()
                    .map_err(|_| Error::parse(format!("cannot parse '{}' as a bitset code", text)))?,
            };
            Ok(MetricValue::Bitset(BitsetMetric::singleton(code)))
        }
    }
}

fn dim_value_as_code(v: DimValue) -> u64 {
    match v {
        DimValue::String(c) => c,
        DimValue::Numeric(n) => n.as_u64(),
        DimValue::Time(t) => t as u64,
        DimValue::Boolean(b) => b as u64,
    }
}

/// The upsert engine: a namespace for the stateless per-row algorithm
/// that mutates a `UpsertContext` (spec §4.3).
pub struct UpsertEngine;

impl UpsertEngine {
    /// Process one already-column-mapped row: `fields` has one entry per
    /// dimension (in schema order) followed by one entry per metric (in
    /// schema order); partition filtering and source-column mapping are
    /// the loader's responsibility (spec §2 item 11) and must have
    /// already happened by the time this is called.
    ///
    /// Parse errors are returned as `Err` so the caller (the loader) can
    /// count the row as failed and continue with the next one (spec
    /// §4.3 "Failure semantics") — this function itself never aborts a
    /// whole file.
    #[allow(clippy::too_many_arguments)]
    pub fn upsert_row(
        ctx: &mut UpsertContext,
        schema: &TableSchema,
        dictionaries: &[Option<Dictionary>],
        store: &Store,
        config: &UpsertConfig,
        fields: &[&str],
        now: i64,
    ) -> Result<UpsertOutcome> {
        let ndims = schema.dimensions.len();

        // Step 2: parse dimensions in schema order.
        let mut dims = Vec::with_capacity(ndims);
        for (i, dim) in schema.dimensions.iter().enumerate() {
            let text = fields.get(i).copied().unwrap_or("");
            dims.push(parse_dimension(dim, text, dictionaries[i].as_ref(), now)?);
        }

        // Step 3: cardinality guards remap the guarded dimension's code
        // to the sentinel once the companion key has seen `limit`
        // distinct values.
        for (gi, guard) in schema.cardinality_guards.iter().enumerate() {
            let key: Vec<DimValue> = guard.companion_dims.iter().map(|&ci| dims[ci]).collect();
            if let DimValue::String(code) = dims[guard.guarded_dim] {
                let bitset = ctx.guard_state[gi].entry(key).or_insert_with(BitsetMetric::new);
                if bitset.contains(code) {
                    // already counted, no guard action needed
                } else if bitset.cardinality() >= guard.limit {
                    dims[guard.guarded_dim] = DimValue::String(EXCEEDED_CODE);
                } else {
                    bitset.insert(code);
                }
            }
        }

        // Step 4: parse metrics (after dims, since BITSET may source a
        // dimension's already-resolved code).
        let mut metrics = Vec::with_capacity(schema.metrics.len());
        for (i, metric) in schema.metrics.iter().enumerate() {
            let text = fields.get(ndims + i).copied().unwrap_or("");
            metrics.push(parse_metric(metric, text, schema, &dims)?);
        }

        // Step 5: upsert-or-insert, keyed on the full dimension tuple.
        let outcome = if let Some(&offset) = ctx.tuple_offsets.get(&dims) {
            let seg_idx = (offset / schema.segment_size as u64) as usize;
            let tup_idx = (offset % schema.segment_size as u64) as usize;
            let segments = store.snapshot();
            let segment = segments
                .get(seg_idx)
                .ok_or_else(|| Error::internal("tuple_offsets references a segment no longer in the store"))?;
            let aggs: Vec<AggType> = schema.metrics.iter().map(metric_agg).collect();
            segment.update(tup_idx, &metrics, &aggs);
            ctx.stats.updated_records += 1;
            UpsertOutcome::Updated
        } else {
            let (seg_idx, segment) = store.last_segment(schema);
            let tup_idx = segment.insert(dims.clone(), metrics);
            let offset = seg_idx as u64 * schema.segment_size as u64 + tup_idx as u64;
            ctx.tuple_offsets.insert(dims, offset);
            ctx.stats.new_records += 1;
            UpsertOutcome::Inserted
        };

        // Step 6: periodically compact bitset metrics in the tail
        // segment (spec §4.3 step 6: "N >= 1024").
        ctx.updates_since_optimize += 1;
        if ctx.updates_since_optimize >= config.updates_before_optimize {
            ctx.updates_since_optimize = 0;
            let (_, tail) = store.last_segment(schema);
            tail.optimize_bitsets(&schema.metrics);
        }

        Ok(outcome)
    }
}
