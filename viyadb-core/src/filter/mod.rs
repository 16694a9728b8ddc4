//! Tagged filter tree: relational, in-set, composite AND/OR, with NOT
//! eliminated at build time and a derived segment-skip predicate (spec
//! §4.4).

use crate::error::{Error, Result};
use crate::storage::{DimStats, DimValue};
use serde::Deserialize;
use std::cmp::Ordering;

/// Relational operator for a single-column comparison (spec §4.4,
/// §6 filter tree).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl RelOp {
    fn negate(self) -> RelOp {
        match self {
            RelOp::Eq => RelOp::Ne,
            RelOp::Ne => RelOp::Eq,
            RelOp::Lt => RelOp::Ge,
            RelOp::Ge => RelOp::Lt,
            RelOp::Le => RelOp::Gt,
            RelOp::Gt => RelOp::Le,
        }
    }

    fn from_name(name: &str) -> Result<RelOp> {
        Ok(match name {
            "eq" => RelOp::Eq,
            "ne" => RelOp::Ne,
            "lt" => RelOp::Lt,
            "le" => RelOp::Le,
            "gt" => RelOp::Gt,
            "ge" => RelOp::Ge,
            other => return Err(Error::config(format!("unknown relational op: {}", other))),
        })
    }
}

/// Intrinsic evaluation-order precedence (spec §4.4: "Children are
/// sorted by an intrinsic precedence ... so that cheaper, more-selective
/// predicates evaluate first"). Lower sorts first.
fn precedence(f: &Filter) -> u8 {
    match f {
        Filter::Empty => 0,
        Filter::Relational { .. } => 1,
        Filter::And(_) => 2,
        Filter::Or(_) => 3,
        Filter::InSet { .. } => 4,
    }
}

/// A filter tree node, evaluated against one tuple's dimension values or,
/// conservatively, against a segment's min/max stats.
#[derive(Debug, Clone)]
pub enum Filter {
    Empty,
    Relational {
        dim_index: usize,
        op: RelOp,
        value: DimValue,
    },
    InSet {
        dim_index: usize,
        negated: bool,
        values: Vec<DimValue>,
    },
    And(Vec<Filter>),
    Or(Vec<Filter>),
}

impl Filter {
    fn sorted(mut children: Vec<Filter>) -> Vec<Filter> {
        children.sort_by_key(precedence);
        children
    }

    pub fn and(children: Vec<Filter>) -> Filter {
        Filter::And(Self::sorted(children))
    }

    pub fn or(children: Vec<Filter>) -> Filter {
        Filter::Or(Self::sorted(children))
    }

    /// Eliminate NOT at build time via De Morgan, swapping relational
    /// operators and AND/OR (spec §4.4 "NOT filter").
    pub fn negate(self) -> Filter {
        match self {
            Filter::Empty => Filter::Empty, // NOT(accept-all) has no representable dual; callers never wrap Empty in NOT
            Filter::Relational { dim_index, op, value } => Filter::Relational {
                dim_index,
                op: op.negate(),
                value,
            },
            Filter::InSet { dim_index, negated, values } => Filter::InSet {
                dim_index,
                negated: !negated,
                values,
            },
            Filter::And(children) => Filter::or(children.into_iter().map(Filter::negate).collect()),
            Filter::Or(children) => Filter::and(children.into_iter().map(Filter::negate).collect()),
        }
    }

    /// Evaluate against one tuple, fetching a dimension's value lazily
    /// via `get` (spec §4.5 step 2, per-tuple filter evaluation).
    pub fn evaluate(&self, get: &dyn Fn(usize) -> DimValue) -> bool {
        match self {
            Filter::Empty => true,
            Filter::Relational { dim_index, op, value } => {
                let actual = get(*dim_index);
                match op {
                    RelOp::Eq => actual == *value,
                    RelOp::Ne => actual != *value,
                    RelOp::Lt => actual.as_f64() < value.as_f64(),
                    RelOp::Le => actual.as_f64() <= value.as_f64(),
                    RelOp::Gt => actual.as_f64() > value.as_f64(),
                    RelOp::Ge => actual.as_f64() >= value.as_f64(),
                }
            }
            Filter::InSet { dim_index, negated, values } => {
                let actual = get(*dim_index);
                let hit = values.iter().any(|v| *v == actual);
                hit != *negated
            }
            Filter::And(children) => children.iter().all(|c| c.evaluate(get)),
            Filter::Or(children) => children.iter().any(|c| c.evaluate(get)),
        }
    }

    /// Conservative segment-skip predicate: `true` means the segment must
    /// be scanned, `false` means no tuple in it can satisfy the filter
    /// (spec §4.4 "Segment-skip predicate").
    pub fn keep_segment(&self, stats: &dyn Fn(usize) -> Option<DimStats>) -> bool {
        match self {
            Filter::Empty => true,
            Filter::Relational { dim_index, op, value } => match stats(*dim_index) {
                None => true,
                Some(s) => {
                    let v = value.as_f64();
                    match op {
                        RelOp::Eq => s.min <= v && v <= s.max,
                        RelOp::Ne => true,
                        RelOp::Lt | RelOp::Le => s.min <= v,
                        RelOp::Gt | RelOp::Ge => s.max >= v,
                    }
                }
            },
            Filter::InSet { dim_index, negated, values } => {
                if *negated {
                    return true;
                }
                match stats(*dim_index) {
                    None => true,
                    Some(s) => values.iter().any(|v| {
                        let v = v.as_f64();
                        s.min <= v && v <= s.max
                    }),
                }
            }
            Filter::And(children) => children.iter().all(|c| c.keep_segment(stats)),
            Filter::Or(children) => children.iter().any(|c| c.keep_segment(stats)),
        }
    }
}

/// Resolves column names to dimension indices and decodes textual filter
/// values into typed `DimValue`s, implemented by `Table` (spec §4.4
/// "Values are decoded against the column's type at plan time").
pub trait ValueDecoder {
    fn dim_index(&self, name: &str) -> Option<usize>;
    fn decode(&self, dim_index: usize, text: &str) -> Result<DimValue>;
}

/// Raw JSON shape of a filter-tree node (spec §6 "Filter tree"). Fields
/// are all optional because the shape varies by `op`; `FilterDescriptor`
/// is resolved into a `Filter` by `build`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct FilterDescriptor {
    #[serde(default)]
    pub op: Option<String>,
    #[serde(default)]
    pub column: Option<String>,
    #[serde(default)]
    pub value: Option<serde_json::Value>,
    #[serde(default)]
    pub values: Option<Vec<serde_json::Value>>,
    #[serde(default)]
    pub filters: Option<Vec<FilterDescriptor>>,
    #[serde(default)]
    pub filter: Option<Box<FilterDescriptor>>,
}

fn json_to_text(v: &serde_json::Value) -> String {
    match v {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Build a `Filter` tree from its JSON descriptor, resolving column names
/// and decoding values through `decoder` (spec §4.4, §6).
pub fn build(desc: &FilterDescriptor, decoder: &dyn ValueDecoder) -> Result<Filter> {
    let op = match &desc.op {
        None => return Ok(Filter::Empty),
        Some(op) => op.as_str(),
    };
    match op {
        "eq" | "ne" | "lt" | "le" | "gt" | "ge" => {
            let column = desc
                .column
                .as_deref()
                .ok_or_else(|| Error::config("relational filter missing 'column'"))?;
            let dim_index = decoder
                .dim_index(column)
                .ok_or_else(|| Error::lookup(format!("unknown column: {}", column)))?;
            let value_json = desc
                .value
                .as_ref()
                .ok_or_else(|| Error::config("relational filter missing 'value'"))?;
            let value = decoder.decode(dim_index, &json_to_text(value_json))?;
            Ok(Filter::Relational {
                dim_index,
                op: RelOp::from_name(op)?,
                value,
            })
        }
        "in" | "not_in" => {
            let column = desc
                .column
                .as_deref()
                .ok_or_else(|| Error::config("in filter missing 'column'"))?;
            let dim_index = decoder
                .dim_index(column)
                .ok_or_else(|| Error::lookup(format!("unknown column: {}", column)))?;
            let values_json = desc
                .values
                .as_ref()
                .ok_or_else(|| Error::config("in filter missing 'values'"))?;
            let values = values_json
                .iter()
                .map(|v| decoder.decode(dim_index, &json_to_text(v)))
                .collect::<Result<Vec<_>>>()?;
            Ok(Filter::InSet {
                dim_index,
                negated: op == "not_in",
                values,
            })
        }
        "and" => {
            let children = desc
                .filters
                .as_ref()
                .ok_or_else(|| Error::config("and filter missing 'filters'"))?
                .iter()
                .map(|f| build(f, decoder))
                .collect::<Result<Vec<_>>>()?;
            Ok(Filter::and(children))
        }
        "or" => {
            let children = desc
                .filters
                .as_ref()
                .ok_or_else(|| Error::config("or filter missing 'filters'"))?
                .iter()
                .map(|f| build(f, decoder))
                .collect::<Result<Vec<_>>>()?;
            Ok(Filter::or(children))
        }
        "not" => {
            let inner = desc
                .filter
                .as_ref()
                .ok_or_else(|| Error::config("not filter missing 'filter'"))?;
            Ok(build(inner, decoder)?.negate())
        }
        other => Err(Error::config(format!("unknown filter op: {}", other))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::AnyNum;

    struct FakeDecoder;
    impl ValueDecoder for FakeDecoder {
        fn dim_index(&self, name: &str) -> Option<usize> {
            match name {
                "country" => Some(0),
                "time" => Some(1),
                _ => None,
            }
        }
        fn decode(&self, dim_index: usize, text: &str) -> Result<DimValue> {
            if dim_index == 0 {
                Ok(DimValue::String(text.parse().unwrap_or(0)))
            } else {
                Ok(DimValue::Numeric(AnyNum::Long(text.parse().unwrap())))
            }
        }
    }

    #[test]
    fn test_empty_filter_accepts_all() {
        let f = Filter::Empty;
        assert!(f.evaluate(&|_| DimValue::String(0)));
    }

    #[test]
    fn test_precedence_sorted_in_and() {
        let f = Filter::and(vec![
            Filter::InSet { dim_index: 0, negated: false, values: vec![] },
            Filter::Relational { dim_index: 0, op: RelOp::Eq, value: DimValue::String(1) },
            Filter::Empty,
        ]);
        if let Filter::And(children) = f {
            assert!(matches!(children[0], Filter::Empty));
            assert!(matches!(children[1], Filter::Relational { .. }));
            assert!(matches!(children[2], Filter::InSet { .. }));
        } else {
            panic!("expected And");
        }
    }

    #[test]
    fn test_not_elimination_relational() {
        let f = Filter::Relational { dim_index: 0, op: RelOp::Eq, value: DimValue::String(5) }.negate();
        match f {
            Filter::Relational { op, .. } => assert_eq!(op, RelOp::Ne),
            _ => panic!("expected relational"),
        }
    }

    #[test]
    fn test_not_elimination_and_becomes_or() {
        let f = Filter::and(vec![
            Filter::Relational { dim_index: 0, op: RelOp::Lt, value: DimValue::String(1) },
            Filter::Relational { dim_index: 0, op: RelOp::Gt, value: DimValue::String(2) },
        ])
        .negate();
        match f {
            Filter::Or(children) => {
                assert_eq!(children.len(), 2);
                for c in &children {
                    assert!(matches!(c, Filter::Relational { op: RelOp::Ge, .. } | Filter::Relational { op: RelOp::Le, .. }));
                }
            }
            _ => panic!("expected or"),
        }
    }

    #[test]
    fn test_segment_skip_eq_outside_range() {
        let f = Filter::Relational { dim_index: 0, op: RelOp::Eq, value: DimValue::Numeric(AnyNum::Int(50)) };
        let stats = |_: usize| Some(DimStats { min: 0.0, max: 10.0 });
        assert!(!f.keep_segment(&stats));
        let stats2 = |_: usize| Some(DimStats { min: 0.0, max: 100.0 });
        assert!(f.keep_segment(&stats2));
    }

    #[test]
    fn test_segment_skip_scenario_6() {
        // spec §8 scenario 6: time > boundary AND dummy != "bla" scans exactly one segment
        let f = build(
            &FilterDescriptor {
                op: Some("and".into()),
                filters: Some(vec![
                    FilterDescriptor {
                        op: Some("gt".into()),
                        column: Some("time".into()),
                        value: Some(serde_json::json!(1_000_000)),
                        ..Default::default()
                    },
                    FilterDescriptor {
                        op: Some("ne".into()),
                        column: Some("country".into()),
                        value: Some(serde_json::json!(999)),
                        ..Default::default()
                    },
                ]),
                ..Default::default()
            },
            &FakeDecoder,
        )
        .unwrap();
        // segment whose time stats are entirely below the boundary is skipped
        let low_stats = |dim: usize| if dim == 1 { Some(DimStats { min: 0.0, max: 500_000.0 }) } else { None };
        assert!(!f.keep_segment(&low_stats));
        // segment overlapping the boundary is kept
        let high_stats = |dim: usize| if dim == 1 { Some(DimStats { min: 900_000.0, max: 2_000_000.0 }) } else { None };
        assert!(f.keep_segment(&high_stats));
    }
}
