//! Column schema: dimensions (string/numeric/time/boolean) and metrics
//! (sum/min/max/avg/count/bitset), parsed from the JSON table descriptor
//! (spec §3 "Dimension kinds", "Metric kinds", §6 "Table descriptor").

use crate::error::{Error, Result};
use crate::rollup::{Duration, Granularity, RollupRule};
use crate::types::{NumType, TimePrecision};
use serde::{Deserialize, Serialize};

/// Precision- and format-aware parser for the Time dimension's declared
/// ingest representation (spec §3 "Time" row).
#[derive(Debug, Clone, PartialEq)]
pub enum TimeFormat {
    /// Source field is whole seconds since the epoch
    Posix,
    /// Source field is milliseconds since the epoch
    Millis,
    /// Source field is microseconds since the epoch
    Micros,
    /// Source field is already in the dimension's declared stored unit
    Integer,
    /// Source field is a `strftime`-style textual timestamp
    Strftime(String),
}

impl TimeFormat {
    fn parse_descriptor(format: Option<&str>) -> TimeFormat {
        match format {
            None | Some("posix") => TimeFormat::Posix,
            Some("millis") => TimeFormat::Millis,
            Some("micros") => TimeFormat::Micros,
            Some("integer") => TimeFormat::Integer,
            Some(pattern) => TimeFormat::Strftime(pattern.to_string()),
        }
    }

    /// Parse `text` into the dimension's stored unit (seconds or
    /// microseconds, per `precision`).
    pub fn parse(&self, text: &str, precision: TimePrecision) -> Result<i64> {
        let text = text.trim();
        let bad = || Error::parse(format!("cannot parse '{}' as a time value", text));
        match self {
            TimeFormat::Integer => text.parse::<i64>().map_err(|_| bad()),
            TimeFormat::Posix => {
                let secs: i64 = text.parse().map_err(|_| bad())?;
                Ok(secs_to_precision(secs, precision))
            }
            TimeFormat::Millis => {
                let millis: i64 = text.parse().map_err(|_| bad())?;
                Ok(millis_to_precision(millis, precision))
            }
            TimeFormat::Micros => {
                let micros: i64 = text.parse().map_err(|_| bad())?;
                Ok(micros_to_precision(micros, precision))
            }
            TimeFormat::Strftime(pattern) => {
                let dt = chrono::NaiveDateTime::parse_from_str(text, pattern).map_err(|_| bad())?;
                Ok(secs_to_precision(dt.and_utc().timestamp(), precision))
            }
        }
    }
}

fn secs_to_precision(secs: i64, precision: TimePrecision) -> i64 {
    match precision {
        TimePrecision::Seconds => secs,
        TimePrecision::Micros => secs.saturating_mul(1_000_000),
    }
}

fn millis_to_precision(millis: i64, precision: TimePrecision) -> i64 {
    match precision {
        TimePrecision::Seconds => millis.div_euclid(1_000),
        TimePrecision::Micros => millis.saturating_mul(1_000),
    }
}

fn micros_to_precision(micros: i64, precision: TimePrecision) -> i64 {
    match precision {
        TimePrecision::Seconds => micros.div_euclid(1_000_000),
        TimePrecision::Micros => micros,
    }
}

/// Convert a stored value of `precision` back to whole seconds, for
/// rollup/truncation math which always operates in the seconds domain.
pub fn to_secs(value: i64, precision: TimePrecision) -> i64 {
    match precision {
        TimePrecision::Seconds => value,
        TimePrecision::Micros => value.div_euclid(1_000_000),
    }
}

/// Convert whole seconds back to the dimension's stored precision.
pub fn from_secs(secs: i64, precision: TimePrecision) -> i64 {
    secs_to_precision(secs, precision)
}

/// A string dimension: dictionary-encoded, with an optional input-length
/// cap and an optional cardinality guard keyed on companion dimensions.
#[derive(Debug, Clone)]
pub struct StringDimension {
    pub name: String,
    pub cardinality: u64,
    pub max_length: Option<usize>,
    pub code_width: NumType,
}

/// A numeric dimension, stored as its declared `NumType`.
#[derive(Debug, Clone)]
pub struct NumericDimension {
    pub name: String,
    pub num_type: NumType,
}

/// A time dimension: declared stored precision, ingest parse format, and
/// optional ingest-time rollup (either a flat `granularity` or age-based
/// `rollup_rules`, per spec §3 "Time" row and "Invariants").
#[derive(Debug, Clone)]
pub struct TimeDimension {
    pub name: String,
    pub precision: TimePrecision,
    pub format: TimeFormat,
    pub granularity: Option<Granularity>,
    pub rollup_rules: Vec<RollupRule>,
}

/// A boolean dimension, stored as a single byte.
#[derive(Debug, Clone)]
pub struct BooleanDimension {
    pub name: String,
}

/// Tagged variant over the four dimension kinds (spec §9 "Polymorphism
/// over columns": `Column = String{..} | Numeric{..} | Time{..} |
/// Boolean{..}`, dispatched by pattern match rather than a visitor).
#[derive(Debug, Clone)]
pub enum Dimension {
    String(StringDimension),
    Numeric(NumericDimension),
    Time(TimeDimension),
    Boolean(BooleanDimension),
}

impl Dimension {
    pub fn name(&self) -> &str {
        match self {
            Dimension::String(d) => &d.name,
            Dimension::Numeric(d) => &d.name,
            Dimension::Time(d) => &d.name,
            Dimension::Boolean(d) => &d.name,
        }
    }

    /// Whether this dimension participates in segment-level min/max stats
    /// (spec §3 "Segment"/"Invariants": numeric and time dimensions only).
    pub fn has_stats(&self) -> bool {
        matches!(self, Dimension::Numeric(_) | Dimension::Time(_))
    }

    /// Stored width in bytes, used only for documentation/diagnostics —
    /// the in-memory representation here is not literally bit-packed
    /// (see DESIGN.md).
    pub fn width(&self) -> usize {
        match self {
            Dimension::String(d) => d.code_width.width(),
            Dimension::Numeric(d) => d.num_type.width(),
            Dimension::Time(d) => d.precision.width(),
            Dimension::Boolean(_) => 1,
        }
    }
}

/// Aggregation rule for a value metric (spec §3 "Metric kinds").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggType {
    Sum,
    Min,
    Max,
    Avg,
    Count,
}

/// A scalar metric: SUM/MIN/MAX/AVG/COUNT.
#[derive(Debug, Clone)]
pub struct ValueMetric {
    pub name: String,
    pub agg: AggType,
    pub num_type: NumType,
    /// Source TSV column name (defaults to `name`); unused for COUNT.
    pub field: String,
}

/// A BITSET metric: approximate distinct-count over a source column's
/// dictionary-encoded (or otherwise integral) values.
#[derive(Debug, Clone)]
pub struct BitsetMetricDef {
    pub name: String,
    /// Source column whose value is inserted into the bitset on each row
    /// (defaults to `name`, per scenario 3's `user_id: bitset`).
    pub field: String,
}

/// Tagged variant over the two metric storage shapes (spec §9: `Metric =
/// Value{..} | Bitset{..}`).
#[derive(Debug, Clone)]
pub enum Metric {
    Value(ValueMetric),
    Bitset(BitsetMetricDef),
}

impl Metric {
    pub fn name(&self) -> &str {
        match self {
            Metric::Value(m) => &m.name,
            Metric::Bitset(m) => &m.name,
        }
    }
}

/// A cardinality guard: the number of distinct values of `guarded_dim`
/// observed per distinct combination of `companion_dims` is capped at
/// `limit`; excess values remap to the sentinel code (spec §4.3 step 3).
#[derive(Debug, Clone)]
pub struct CardinalityGuard {
    pub guarded_dim: usize,
    pub companion_dims: Vec<usize>,
    pub limit: u64,
}

/// Raw JSON shape of a dimension entry in a table descriptor (spec §6).
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DimensionDescriptor {
    pub name: String,
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
    #[serde(default)]
    pub length: Option<usize>,
    #[serde(default)]
    pub cardinality: Option<u64>,
    #[serde(default)]
    pub format: Option<String>,
    #[serde(default)]
    pub granularity: Option<String>,
    #[serde(default)]
    pub rollup_rules: Vec<RollupRuleDescriptor>,
    #[serde(default)]
    pub cardinality_guard: Option<CardinalityGuardDescriptor>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RollupRuleDescriptor {
    pub granularity: String,
    pub after: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CardinalityGuardDescriptor {
    pub dimensions: Vec<String>,
    pub limit: u64,
}

/// Raw JSON shape of a metric entry in a table descriptor (spec §6).
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MetricDescriptor {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub max: Option<u64>,
    #[serde(default)]
    pub field: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct WatchDescriptor {
    pub directory: String,
    #[serde(default = "default_watch_extensions")]
    pub extensions: Vec<String>,
}

fn default_watch_extensions() -> Vec<String> {
    vec![".tsv".to_string()]
}

fn default_segment_size() -> usize {
    1_000_000
}

/// The full JSON table descriptor consumed by `CreateTable` (spec §6).
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TableDescriptor {
    pub name: String,
    #[serde(default = "default_segment_size")]
    pub segment_size: usize,
    pub dimensions: Vec<DimensionDescriptor>,
    #[serde(default)]
    pub metrics: Vec<MetricDescriptor>,
    #[serde(default)]
    pub watch: Option<WatchDescriptor>,
}

/// A validated, fully-resolved table schema: ordered dimensions and
/// metrics with stable 0-based indices (spec §3 "Table").
#[derive(Debug, Clone)]
pub struct TableSchema {
    pub name: String,
    pub segment_size: usize,
    pub dimensions: Vec<Dimension>,
    pub metrics: Vec<Metric>,
    pub cardinality_guards: Vec<CardinalityGuard>,
    pub watch: Option<WatchDescriptor>,
}

/// Reject table/column names carrying characters that would break the
/// descriptor's JSON encoding or a downstream SQL identifier (spec §6:
/// "legal identifier, no `\"` or `\\`").
fn validate_identifier(kind: &str, name: &str) -> Result<()> {
    if name.is_empty() || name.contains('"') || name.contains('\\') {
        return Err(Error::config(format!("illegal {} name: {:?}", kind, name)));
    }
    Ok(())
}

impl TableSchema {
    pub fn from_descriptor(desc: &TableDescriptor) -> Result<TableSchema> {
        validate_identifier("table", &desc.name)?;
        if desc.dimensions.is_empty() {
            return Err(Error::config("table must declare at least one dimension"));
        }

        let mut dimensions = Vec::with_capacity(desc.dimensions.len());
        let mut names_by_index = Vec::with_capacity(desc.dimensions.len());
        for dd in &desc.dimensions {
            validate_identifier("dimension", &dd.name)?;
            dimensions.push(Self::build_dimension(dd)?);
            names_by_index.push(dd.name.clone());
        }

        let mut cardinality_guards = Vec::new();
        for (idx, dd) in desc.dimensions.iter().enumerate() {
            if let Some(guard) = &dd.cardinality_guard {
                let companion_dims = guard
                    .dimensions
                    .iter()
                    .map(|n| {
                        names_by_index
                            .iter()
                            .position(|cand| cand == n)
                            .ok_or_else(|| Error::config(format!("unknown companion dimension: {}", n)))
                    })
                    .collect::<Result<Vec<usize>>>()?;
                cardinality_guards.push(CardinalityGuard {
                    guarded_dim: idx,
                    companion_dims,
                    limit: guard.limit,
                });
            }
        }

        let mut metrics = Vec::with_capacity(desc.metrics.len());
        for md in &desc.metrics {
            validate_identifier("metric", &md.name)?;
            metrics.push(Self::build_metric(md)?);
        }

        Ok(TableSchema {
            name: desc.name.clone(),
            segment_size: if desc.segment_size == 0 {
                default_segment_size()
            } else {
                desc.segment_size
            },
            dimensions,
            metrics,
            cardinality_guards,
            watch: desc.watch.clone(),
        })
    }

    fn build_dimension(dd: &DimensionDescriptor) -> Result<Dimension> {
        match dd.kind.as_deref() {
            None | Some("string") => {
                let cardinality = dd.cardinality.unwrap_or(u32::MAX as u64);
                Ok(Dimension::String(StringDimension {
                    name: dd.name.clone(),
                    cardinality,
                    max_length: dd.length,
                    code_width: NumType::code_width_for_cardinality(cardinality),
                }))
            }
            Some("time") => {
                let precision = match dd.format.as_deref() {
                    Some("micros") => TimePrecision::Micros,
                    _ => TimePrecision::Seconds,
                };
                let granularity = dd.granularity.as_deref().map(Granularity::parse).transpose()?;
                let rollup_rules = dd
                    .rollup_rules
                    .iter()
                    .map(|r| {
                        Ok(RollupRule::new(
                            Granularity::parse(&r.granularity)?,
                            Duration::parse(&r.after)?,
                        ))
                    })
                    .collect::<Result<Vec<_>>>()?;
                Ok(Dimension::Time(TimeDimension {
                    name: dd.name.clone(),
                    precision,
                    format: TimeFormat::parse_descriptor(dd.format.as_deref()),
                    granularity,
                    rollup_rules,
                }))
            }
            Some("boolean") | Some("bool") => Ok(Dimension::Boolean(BooleanDimension {
                name: dd.name.clone(),
            })),
            Some(other) => {
                let num_type = parse_num_type_name(other)
                    .ok_or_else(|| Error::config(format!("unsupported dimension type: {}", other)))?;
                Ok(Dimension::Numeric(NumericDimension {
                    name: dd.name.clone(),
                    num_type,
                }))
            }
        }
    }

    fn build_metric(md: &MetricDescriptor) -> Result<Metric> {
        let field = md.field.clone().unwrap_or_else(|| md.name.clone());
        if md.kind == "count" {
            let num_type = NumType::smallest_unsigned_covering(md.max.unwrap_or(u32::MAX as u64));
            return Ok(Metric::Value(ValueMetric {
                name: md.name.clone(),
                agg: AggType::Count,
                num_type,
                field,
            }));
        }
        if md.kind == "bitset" {
            return Ok(Metric::Bitset(BitsetMetricDef {
                name: md.name.clone(),
                field,
            }));
        }
        let (type_part, agg_part) = md
            .kind
            .rsplit_once('_')
            .ok_or_else(|| Error::config(format!("unsupported metric type: {}", md.kind)))?;
        let num_type = parse_num_type_name(type_part)
            .ok_or_else(|| Error::config(format!("unsupported metric numeric type: {}", type_part)))?;
        let agg = match agg_part {
            "sum" => AggType::Sum,
            "min" => AggType::Min,
            "max" => AggType::Max,
            "avg" => AggType::Avg,
            other => return Err(Error::config(format!("unsupported metric aggregation: {}", other))),
        };
        Ok(Metric::Value(ValueMetric {
            name: md.name.clone(),
            agg,
            num_type,
            field,
        }))
    }

    pub fn dimension_index(&self, name: &str) -> Option<usize> {
        self.dimensions.iter().position(|d| d.name() == name)
    }

    pub fn metric_index(&self, name: &str) -> Option<usize> {
        self.metrics.iter().position(|m| m.name() == name)
    }
}

fn parse_num_type_name(name: &str) -> Option<NumType> {
    Some(match name {
        "byte" => NumType::Byte,
        "ubyte" => NumType::Ubyte,
        "short" => NumType::Short,
        "ushort" => NumType::Ushort,
        "int" => NumType::Int,
        "uint" => NumType::Uint,
        "long" => NumType::Long,
        "ulong" => NumType::Ulong,
        "float" => NumType::Float,
        "double" => NumType::Double,
        _ => return None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_descriptor() -> TableDescriptor {
        serde_json::from_str(
            r#"{
                "name": "events",
                "dimensions": [
                    {"name": "country", "cardinality": 300},
                    {"name": "event_name", "cardinality": 1000},
                    {"name": "install_time", "type": "uint"}
                ],
                "metrics": [
                    {"name": "count", "type": "count"},
                    {"name": "revenue", "type": "double_sum"}
                ]
            }"#,
        )
        .unwrap()
    }

    #[test]
    fn test_build_basic_schema() {
        let desc = sample_descriptor();
        let schema = TableSchema::from_descriptor(&desc).unwrap();
        assert_eq!(schema.name, "events");
        assert_eq!(schema.segment_size, 1_000_000);
        assert_eq!(schema.dimensions.len(), 3);
        assert_eq!(schema.metrics.len(), 2);
        assert!(matches!(schema.dimensions[0], Dimension::String(_)));
        assert!(matches!(schema.dimensions[2], Dimension::Numeric(_)));
    }

    #[test]
    fn test_metric_type_parsing() {
        let desc = sample_descriptor();
        let schema = TableSchema::from_descriptor(&desc).unwrap();
        match &schema.metrics[0] {
            Metric::Value(m) => assert_eq!(m.agg, AggType::Count),
            _ => panic!("expected value metric"),
        }
        match &schema.metrics[1] {
            Metric::Value(m) => {
                assert_eq!(m.agg, AggType::Sum);
                assert_eq!(m.num_type, NumType::Double);
            }
            _ => panic!("expected value metric"),
        }
    }

    #[test]
    fn test_illegal_name_rejected() {
        let mut desc = sample_descriptor();
        desc.name = "bad\"name".to_string();
        assert!(TableSchema::from_descriptor(&desc).is_err());
    }

    #[test]
    fn test_cardinality_guard_resolution() {
        let mut desc = sample_descriptor();
        desc.dimensions[1].cardinality_guard = Some(CardinalityGuardDescriptor {
            dimensions: vec!["country".to_string()],
            limit: 3,
        });
        let schema = TableSchema::from_descriptor(&desc).unwrap();
        assert_eq!(schema.cardinality_guards.len(), 1);
        let guard = &schema.cardinality_guards[0];
        assert_eq!(guard.guarded_dim, 1);
        assert_eq!(guard.companion_dims, vec![0]);
        assert_eq!(guard.limit, 3);
    }

    #[test]
    fn test_bitset_metric_defaults_field_to_name() {
        let desc: TableDescriptor = serde_json::from_str(
            r#"{"name":"t","dimensions":[{"name":"user_id","cardinality":1000}],
                "metrics":[{"name":"user_id","type":"bitset"}]}"#,
        )
        .unwrap();
        let schema = TableSchema::from_descriptor(&desc).unwrap();
        match &schema.metrics[0] {
            Metric::Bitset(b) => assert_eq!(b.field, "user_id"),
            _ => panic!("expected bitset metric"),
        }
    }
}
