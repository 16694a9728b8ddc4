//! Query execution: resolve output columns, scan with segment-skip,
//! group (aggregate) or pass through (select) tuples, apply HAVING over
//! the *output* columns, sort, skip/limit, and emit rows (spec §4.5
//! "Aggregate query", "Select (raw)"; §4.6 "HAVING"; §4.7 "Sort").

use crate::error::{Error, Result};
use crate::filter::{self, ValueDecoder};
use crate::query::descriptor::{OutputColumnDescriptor, QueryDescriptor, QuerySpec, SearchQuerySpec, ShowQuerySpec};
use crate::query::sort::{sort_rows, SortColumn, SortType};
use crate::rollup::Granularity;
use crate::schema::{AggType, Dimension, Metric};
use crate::storage::segment::truncate_for_query;
use crate::storage::{DimValue, MetricValue};
use crate::table::{Database, Table};
use crate::types::{AnyNum, TimePrecision};
use std::collections::{HashMap, HashSet};
use std::io::Write;

/// Per-query scan/output counters, returned alongside the emitted rows
/// (spec §4.5, useful for the scenario-6 "scans exactly one segment"
/// invariant).
#[derive(Debug, Clone, Copy, Default)]
pub struct QueryStats {
    pub scanned_segments: usize,
    pub scanned_tuples: usize,
    pub output_rows: usize,
}

/// Sink for a query's header (if requested) and data rows, one `Vec<String>`
/// per row in output-column order (spec §4.5 "Result format").
pub trait RowOutput {
    fn emit_header(&mut self, columns: &[String]) -> Result<()>;
    fn emit_row(&mut self, columns: &[String]) -> Result<()>;
}

/// TAB-separated `RowOutput` over any `Write`, mirroring the TSV
/// ingestion format used on the way in (spec §6 "TSV ingestion format").
pub struct TsvRowOutput<'a, W: Write> {
    writer: &'a mut W,
}

impl<'a, W: Write> TsvRowOutput<'a, W> {
    pub fn new(writer: &'a mut W) -> Self {
        TsvRowOutput { writer }
    }
}

impl<'a, W: Write> RowOutput for TsvRowOutput<'a, W> {
    fn emit_header(&mut self, columns: &[String]) -> Result<()> {
        self.emit_row(columns)
    }

    fn emit_row(&mut self, columns: &[String]) -> Result<()> {
        writeln!(self.writer, "{}", columns.join("\t"))?;
        Ok(())
    }
}

/// A resolved output column: either a dimension (with an optional
/// query-time granularity override and text format) or a metric, kept in
/// select order (spec §4.5, §6 "select").
#[derive(Debug, Clone)]
enum OutputColumn {
    Dimension {
        dim_index: usize,
        granularity: Option<Granularity>,
        format: Option<String>,
    },
    Metric {
        metric_index: usize,
    },
}

fn resolve_one_column(
    table: &Table,
    name: &str,
    format: Option<&str>,
    granularity: Option<&str>,
) -> Result<(String, OutputColumn)> {
    if let Some(dim_index) = table.schema.dimension_index(name) {
        let granularity = granularity.map(Granularity::parse).transpose()?;
        return Ok((
            name.to_string(),
            OutputColumn::Dimension {
                dim_index,
                granularity,
                format: format.map(str::to_string),
            },
        ));
    }
    if let Some(metric_index) = table.schema.metric_index(name) {
        return Ok((name.to_string(), OutputColumn::Metric { metric_index }));
    }
    Err(Error::lookup(format!("unknown column: {}", name)))
}

fn resolve_outputs(table: &Table, spec: &QuerySpec) -> Result<Vec<(String, OutputColumn)>> {
    if let Some(select) = &spec.select {
        select
            .iter()
            .map(|oc: &OutputColumnDescriptor| resolve_one_column(table, &oc.column, oc.format.as_deref(), oc.granularity.as_deref()))
            .collect()
    } else {
        let dims = spec.dimensions.clone().unwrap_or_default();
        let metrics = spec.metrics.clone().unwrap_or_default();
        let mut outputs = Vec::new();
        for name in expand_names(table, &dims, true) {
            outputs.push(resolve_one_column(table, &name, None, None)?);
        }
        for name in expand_names(table, &metrics, false) {
            outputs.push(resolve_one_column(table, &name, None, None)?);
        }
        Ok(outputs)
    }
}

fn expand_names(table: &Table, names: &[String], is_dimension: bool) -> Vec<String> {
    if names.iter().any(|n| n == "*") {
        if is_dimension {
            table.schema.dimensions.iter().map(|d| d.name().to_string()).collect()
        } else {
            table.schema.metrics.iter().map(|m| m.name().to_string()).collect()
        }
    } else {
        names.to_vec()
    }
}

fn time_precision(table: &Table, dim_index: usize) -> TimePrecision {
    match &table.schema.dimensions[dim_index] {
        Dimension::Time(td) => td.precision,
        _ => TimePrecision::Seconds,
    }
}

fn metric_agg_of(table: &Table, metric_index: usize) -> AggType {
    match &table.schema.metrics[metric_index] {
        Metric::Value(vm) => vm.agg,
        Metric::Bitset(_) => AggType::Sum,
    }
}

fn format_dim_value(table: &Table, dim_index: usize, value: DimValue, format_override: Option<&str>) -> String {
    match (&table.schema.dimensions[dim_index], value) {
        (Dimension::String(_), DimValue::String(code)) => table.decode_string(dim_index, code).unwrap_or_default(),
        (Dimension::Boolean(_), DimValue::Boolean(b)) => {
            if b {
                "true".to_string()
            } else {
                "false".to_string()
            }
        }
        (Dimension::Numeric(_), DimValue::Numeric(n)) => n.to_string(),
        (Dimension::Time(td), DimValue::Time(t)) => {
            let pattern = format_override.or(match &td.format {
                crate::schema::TimeFormat::Strftime(p) => Some(p.as_str()),
                _ => None,
            });
            match pattern {
                Some(p) => {
                    let secs = crate::schema::to_secs(t, td.precision);
                    let dt = chrono::NaiveDateTime::from_timestamp_opt(secs, 0)
                        .unwrap_or_else(|| chrono::NaiveDateTime::from_timestamp_opt(0, 0).unwrap());
                    dt.format(p).to_string()
                }
                None => t.to_string(),
            }
        }
        _ => String::new(),
    }
}

fn format_metric_value(mv: &MetricValue) -> String {
    match mv {
        MetricValue::Value(v) => v.to_string(),
        MetricValue::Avg { sum, count } => {
            if *count == 0 {
                "0".to_string()
            } else {
                format!("{}", sum.as_f64() / *count as f64)
            }
        }
        MetricValue::Bitset(b) => b.cardinality().to_string(),
    }
}

fn metric_to_dimvalue(mv: &MetricValue) -> DimValue {
    match mv {
        MetricValue::Value(v) => DimValue::Numeric(*v),
        MetricValue::Avg { sum, count } => {
            let avg = if *count == 0 { 0.0 } else { sum.as_f64() / *count as f64 };
            DimValue::Numeric(AnyNum::Double(avg))
        }
        MetricValue::Bitset(b) => DimValue::Numeric(AnyNum::Ulong(b.cardinality())),
    }
}

fn sort_type_for_output(table: &Table, oc: &OutputColumn) -> SortType {
    match oc {
        OutputColumn::Dimension { dim_index, .. } => match &table.schema.dimensions[*dim_index] {
            Dimension::String(_) | Dimension::Boolean(_) => SortType::String,
            Dimension::Numeric(nd) => {
                if nd.num_type.is_float() {
                    SortType::Float
                } else {
                    SortType::Integer
                }
            }
            Dimension::Time(_) => SortType::Integer,
        },
        OutputColumn::Metric { metric_index } => match &table.schema.metrics[*metric_index] {
            Metric::Value(vm) => {
                if vm.agg == AggType::Avg || vm.num_type.is_float() {
                    SortType::Float
                } else {
                    SortType::Integer
                }
            }
            Metric::Bitset(_) => SortType::Integer,
        },
    }
}

fn resolve_sort(table: &Table, outputs: &[(String, OutputColumn)], sort_desc: &[crate::query::descriptor::SortColumnDescriptor]) -> Result<Vec<SortColumn>> {
    sort_desc
        .iter()
        .map(|s| {
            let idx = outputs
                .iter()
                .position(|(n, _)| n == &s.column)
                .ok_or_else(|| Error::lookup(format!("unknown sort column: {}", s.column)))?;
            Ok(SortColumn {
                output_index: idx,
                ascending: s.ascending,
                sort_type: sort_type_for_output(table, &outputs[idx].1),
            })
        })
        .collect()
}

/// Resolves a HAVING filter's column references against the *selected
/// output columns*, not the raw schema (spec §4.6: "HAVING is evaluated
/// after aggregation, against output columns — including aliased
/// metrics — rather than raw schema fields").
struct HavingDecoder<'a> {
    table: &'a Table,
    outputs: &'a [(String, OutputColumn)],
}

impl<'a> ValueDecoder for HavingDecoder<'a> {
    fn dim_index(&self, name: &str) -> Option<usize> {
        self.outputs.iter().position(|(n, _)| n == name)
    }

    fn decode(&self, output_index: usize, text: &str) -> Result<DimValue> {
        match &self.outputs[output_index].1 {
            OutputColumn::Dimension { dim_index, .. } => self.table.decode(*dim_index, text),
            OutputColumn::Metric { metric_index } => match &self.table.schema.metrics[*metric_index] {
                Metric::Value(vm) => Ok(DimValue::Numeric(vm.num_type.parse(text)?)),
                Metric::Bitset(_) => Ok(DimValue::Numeric(AnyNum::Ulong(text.trim().parse().map_err(|_| {
                    Error::parse(format!("cannot parse '{}' as a bitset cardinality", text))
                })?))),
            },
        }
    }
}

struct DimProjection {
    dim_index: usize,
    query_granularity: Option<Granularity>,
}

fn project_key(table: &Table, dim_projections: &[DimProjection], dims_cols: &[Vec<DimValue>], row: usize) -> Vec<DimValue> {
    dim_projections
        .iter()
        .map(|p| {
            let v = dims_cols[p.dim_index][row];
            match (v, p.query_granularity) {
                (DimValue::Time(t), Some(g)) => {
                    let precision = time_precision(table, p.dim_index);
                    DimValue::Time(truncate_for_query(t, precision, g))
                }
                _ => v,
            }
        })
        .collect()
}

fn build_typed_row(outputs: &[(String, OutputColumn)], key: &[DimValue], metrics: &[MetricValue]) -> Vec<DimValue> {
    let mut dim_iter = key.iter();
    let mut metric_iter = metrics.iter();
    outputs
        .iter()
        .map(|(_, oc)| match oc {
            OutputColumn::Dimension { .. } => *dim_iter.next().unwrap(),
            OutputColumn::Metric { .. } => metric_to_dimvalue(metric_iter.next().unwrap()),
        })
        .collect()
}

fn build_text_row(table: &Table, outputs: &[(String, OutputColumn)], key: &[DimValue], metrics: &[MetricValue]) -> Vec<String> {
    let mut dim_iter = key.iter();
    let mut metric_iter = metrics.iter();
    outputs
        .iter()
        .map(|(_, oc)| match oc {
            OutputColumn::Dimension { dim_index, format, .. } => {
                format_dim_value(table, *dim_index, *dim_iter.next().unwrap(), format.as_deref())
            }
            OutputColumn::Metric { .. } => format_metric_value(metric_iter.next().unwrap()),
        })
        .collect()
}

/// Drive an `aggregate` or `select` query against `table` (spec §4.5).
/// `aggregate` selects between a grouping hash map and a flat per-tuple
/// scan; every other stage (filter, HAVING, sort, skip/limit, emission)
/// is shared.
fn execute_query_spec(table: &Table, spec: &QuerySpec, aggregate: bool, output: &mut dyn RowOutput) -> Result<QueryStats> {
    let outputs = resolve_outputs(table, spec)?;
    let value_filter = filter::build(&spec.filter, table)?;
    let having = match &spec.having {
        Some(h) => Some(filter::build(h, &HavingDecoder { table, outputs: &outputs })?),
        None => None,
    };
    let sort_columns = resolve_sort(table, &outputs, &spec.sort)?;

    let dim_projections: Vec<DimProjection> = outputs
        .iter()
        .filter_map(|(_, oc)| match oc {
            OutputColumn::Dimension { dim_index, granularity, .. } => Some(DimProjection {
                dim_index: *dim_index,
                query_granularity: *granularity,
            }),
            OutputColumn::Metric { .. } => None,
        })
        .collect();
    let metric_projections: Vec<usize> = outputs
        .iter()
        .filter_map(|(_, oc)| match oc {
            OutputColumn::Metric { metric_index } => Some(*metric_index),
            OutputColumn::Dimension { .. } => None,
        })
        .collect();
    let metric_aggs: Vec<AggType> = metric_projections.iter().map(|&i| metric_agg_of(table, i)).collect();

    let segments = table.store().snapshot();
    let mut stats = QueryStats::default();

    let mut typed_rows: Vec<Vec<DimValue>> = Vec::new();
    let mut string_rows: Vec<Vec<String>> = Vec::new();

    if aggregate {
        let mut groups: HashMap<Vec<DimValue>, Vec<MetricValue>> = HashMap::new();
        let mut order: Vec<Vec<DimValue>> = Vec::new();

        for segment in &segments {
            if !value_filter.keep_segment(&|di| segment.dim_stats(di)) {
                continue;
            }
            stats.scanned_segments += 1;
            segment.scan(|dims_cols, metrics_cols, size| {
                for row in 0..size {
                    stats.scanned_tuples += 1;
                    let get = |di: usize| dims_cols[di][row];
                    if !value_filter.evaluate(&get) {
                        continue;
                    }
                    let key = project_key(table, &dim_projections, dims_cols, row);
                    match groups.get_mut(&key) {
                        Some(existing) => {
                            for (slot, (&midx, &agg)) in existing.iter_mut().zip(metric_projections.iter().zip(metric_aggs.iter())) {
                                slot.update(&metrics_cols[midx][row], agg);
                            }
                        }
                        None => {
                            let row_metrics: Vec<MetricValue> = metric_projections.iter().map(|&mi| metrics_cols[mi][row].clone()).collect();
                            groups.insert(key.clone(), row_metrics);
                            order.push(key);
                        }
                    }
                }
            });
        }

        for key in &order {
            let metrics = groups.get(key).expect("every grouped key has metrics");
            typed_rows.push(build_typed_row(&outputs, key, metrics));
            string_rows.push(build_text_row(table, &outputs, key, metrics));
        }
    } else {
        for segment in &segments {
            if !value_filter.keep_segment(&|di| segment.dim_stats(di)) {
                continue;
            }
            stats.scanned_segments += 1;
            segment.scan(|dims_cols, metrics_cols, size| {
                for row in 0..size {
                    stats.scanned_tuples += 1;
                    let get = |di: usize| dims_cols[di][row];
                    if !value_filter.evaluate(&get) {
                        continue;
                    }
                    let key = project_key(table, &dim_projections, dims_cols, row);
                    let row_metrics: Vec<MetricValue> = metric_projections.iter().map(|&mi| metrics_cols[mi][row].clone()).collect();
                    typed_rows.push(build_typed_row(&outputs, &key, &row_metrics));
                    string_rows.push(build_text_row(table, &outputs, &key, &row_metrics));
                }
            });
        }
    }

    if let Some(h) = &having {
        let mut kept_typed = Vec::with_capacity(typed_rows.len());
        let mut kept_text = Vec::with_capacity(string_rows.len());
        for (typed, text) in typed_rows.into_iter().zip(string_rows.into_iter()) {
            if h.evaluate(&|i| typed[i]) {
                kept_typed.push(typed);
                kept_text.push(text);
            }
        }
        typed_rows = kept_typed;
        string_rows = kept_text;
    }
    let _ = typed_rows;

    if !sort_columns.is_empty() {
        sort_rows(&mut string_rows, &sort_columns);
    }

    let mut string_rows: Vec<_> = string_rows.into_iter().skip(spec.skip).collect();
    if spec.limit != 0 {
        string_rows.truncate(spec.limit);
    }

    if spec.header {
        let header: Vec<String> = outputs.iter().map(|(n, _)| n.clone()).collect();
        output.emit_header(&header)?;
    }
    for row in &string_rows {
        output.emit_row(row)?;
    }
    stats.output_rows = string_rows.len();
    Ok(stats)
}

/// `search` query: scan a single dimension for distinct values
/// containing `term` (spec §4.5 "Search query").
fn run_search(table: &Table, spec: &SearchQuerySpec, output: &mut dyn RowOutput) -> Result<QueryStats> {
    let dim_index = table
        .schema
        .dimension_index(&spec.dimension)
        .ok_or_else(|| Error::lookup(format!("unknown dimension: {}", spec.dimension)))?;
    let value_filter = filter::build(&spec.filter, table)?;
    let segments = table.store().snapshot();
    let mut stats = QueryStats::default();
    let mut seen = HashSet::new();
    let mut values: Vec<String> = Vec::new();

    for segment in &segments {
        if !value_filter.keep_segment(&|di| segment.dim_stats(di)) {
            continue;
        }
        stats.scanned_segments += 1;
        let hit_limit = segment.scan(|dims_cols, _metrics_cols, size| {
            for row in 0..size {
                stats.scanned_tuples += 1;
                let get = |di: usize| dims_cols[di][row];
                if !value_filter.evaluate(&get) {
                    continue;
                }
                let v = format_dim_value(table, dim_index, dims_cols[dim_index][row], None);
                if v.contains(&spec.term) && seen.insert(v.clone()) {
                    values.push(v);
                    if spec.limit != 0 && values.len() >= spec.limit {
                        return true;
                    }
                }
            }
            false
        });
        if hit_limit {
            break;
        }
    }

    for v in &values {
        output.emit_row(std::slice::from_ref(v))?;
    }
    stats.output_rows = values.len();
    Ok(stats)
}

/// `show` query: list tables or report configured worker-pool sizes
/// (spec §4.5 "Show query", §6).
fn run_show(db: &Database, spec: &ShowQuerySpec, output: &mut dyn RowOutput) -> Result<QueryStats> {
    match spec.what.as_str() {
        "tables" => {
            for name in db.table_names() {
                output.emit_row(std::slice::from_ref(&name))?;
            }
        }
        "workers" => {
            let threads = &db.config().threads;
            output.emit_row(&["write".to_string(), threads.write_threads.to_string()])?;
            output.emit_row(&["read".to_string(), threads.read_threads.to_string()])?;
        }
        other => return Err(Error::lookup(format!("unknown 'show' target: {}", other))),
    }
    Ok(QueryStats::default())
}

impl Database {
    /// Dispatch a parsed query descriptor to its executor and stream the
    /// result through `output` (spec §2 item 13 "Query Executor").
    pub fn query(&self, descriptor: &QueryDescriptor, output: &mut dyn RowOutput) -> Result<QueryStats> {
        match descriptor {
            QueryDescriptor::Aggregate(spec) => {
                let table = self.table(&spec.table)?;
                execute_query_spec(&table, spec, true, output)
            }
            QueryDescriptor::Select(spec) => {
                let table = self.table(&spec.table)?;
                execute_query_spec(&table, spec, false, output)
            }
            QueryDescriptor::Search(spec) => {
                let table = self.table(&spec.table)?;
                run_search(&table, spec, output)
            }
            QueryDescriptor::Show(spec) => run_show(self, spec, output),
        }
    }
}
