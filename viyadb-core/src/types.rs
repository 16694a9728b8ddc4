//! Numeric/time types and `AnyNum`, the scalar union used for filter
//! arguments, metric initial/updated values, and segment min/max stats.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

/// Declared numeric storage type for a dimension or metric.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NumType {
    Byte,
    Ubyte,
    Short,
    Ushort,
    Int,
    Uint,
    Long,
    Ulong,
    Float,
    Double,
}

impl NumType {
    /// Stored width in bytes for this type
    pub fn width(self) -> usize {
        match self {
            NumType::Byte | NumType::Ubyte => 1,
            NumType::Short | NumType::Ushort => 2,
            NumType::Int | NumType::Uint | NumType::Float => 4,
            NumType::Long | NumType::Ulong | NumType::Double => 8,
        }
    }

    /// Whether the type is a floating-point type
    pub fn is_float(self) -> bool {
        matches!(self, NumType::Float | NumType::Double)
    }

    /// Parse a textual field into an `AnyNum` of this declared type
    pub fn parse(self, text: &str) -> Result<AnyNum> {
        let text = text.trim();
        let map_err = |_| Error::parse(format!("cannot parse '{}' as {:?}", text, self));
        Ok(match self {
            NumType::Byte => AnyNum::Byte(text.parse::<i8>().map_err(map_err)?),
            NumType::Ubyte => AnyNum::Ubyte(text.parse::<u8>().map_err(map_err)?),
            NumType::Short => AnyNum::Short(text.parse::<i16>().map_err(map_err)?),
            NumType::Ushort => AnyNum::Ushort(text.parse::<u16>().map_err(map_err)?),
            NumType::Int => AnyNum::Int(text.parse::<i32>().map_err(map_err)?),
            NumType::Uint => AnyNum::Uint(text.parse::<u32>().map_err(map_err)?),
            NumType::Long => AnyNum::Long(text.parse::<i64>().map_err(map_err)?),
            NumType::Ulong => AnyNum::Ulong(text.parse::<u64>().map_err(map_err)?),
            NumType::Float => AnyNum::Float(text.parse::<f32>().map_err(map_err)?),
            NumType::Double => AnyNum::Double(text.parse::<f64>().map_err(map_err)?),
        })
    }

    /// The minimal representable value of this type, as an `AnyNum`
    pub fn min_value(self) -> AnyNum {
        match self {
            NumType::Byte => AnyNum::Byte(i8::MIN),
            NumType::Ubyte => AnyNum::Ubyte(u8::MIN),
            NumType::Short => AnyNum::Short(i16::MIN),
            NumType::Ushort => AnyNum::Ushort(u16::MIN),
            NumType::Int => AnyNum::Int(i32::MIN),
            NumType::Uint => AnyNum::Uint(u32::MIN),
            NumType::Long => AnyNum::Long(i64::MIN),
            NumType::Ulong => AnyNum::Ulong(u64::MIN),
            NumType::Float => AnyNum::Float(f32::MIN),
            NumType::Double => AnyNum::Double(f64::MIN),
        }
    }

    /// The maximal representable value of this type, as an `AnyNum`
    pub fn max_value(self) -> AnyNum {
        match self {
            NumType::Byte => AnyNum::Byte(i8::MAX),
            NumType::Ubyte => AnyNum::Ubyte(u8::MAX),
            NumType::Short => AnyNum::Short(i16::MAX),
            NumType::Ushort => AnyNum::Ushort(u16::MAX),
            NumType::Int => AnyNum::Int(i32::MAX),
            NumType::Uint => AnyNum::Uint(u32::MAX),
            NumType::Long => AnyNum::Long(i64::MAX),
            NumType::Ulong => AnyNum::Ulong(u64::MAX),
            NumType::Float => AnyNum::Float(f32::MAX),
            NumType::Double => AnyNum::Double(f64::MAX),
        }
    }

    /// The zero value of this type, as an `AnyNum`
    pub fn zero(self) -> AnyNum {
        match self {
            NumType::Byte => AnyNum::Byte(0),
            NumType::Ubyte => AnyNum::Ubyte(0),
            NumType::Short => AnyNum::Short(0),
            NumType::Ushort => AnyNum::Ushort(0),
            NumType::Int => AnyNum::Int(0),
            NumType::Uint => AnyNum::Uint(0),
            NumType::Long => AnyNum::Long(0),
            NumType::Ulong => AnyNum::Ulong(0),
            NumType::Float => AnyNum::Float(0.0),
            NumType::Double => AnyNum::Double(0.0),
        }
    }

    /// The smallest unsigned integer type whose range covers `max`,
    /// defaulting to `Uint` — used to size COUNT metrics per their
    /// configured `max` (spec §3, metric kind COUNT).
    pub fn smallest_unsigned_covering(max: u64) -> NumType {
        if max <= u8::MAX as u64 {
            NumType::Ubyte
        } else if max <= u16::MAX as u64 {
            NumType::Ushort
        } else if max <= u32::MAX as u64 {
            NumType::Uint
        } else {
            NumType::Ulong
        }
    }

    /// The smallest unsigned code width covering a declared cardinality,
    /// used to pick the stored width of a string dimension's dictionary
    /// code (spec §3, "Width chosen from declared cardinality").
    pub fn code_width_for_cardinality(cardinality: u64) -> NumType {
        Self::smallest_unsigned_covering(cardinality)
    }
}

/// Tagless scalar union over every declared numeric representation.
///
/// Used wherever the engine needs to carry "some number of some declared
/// type" without boxing: filter relational-operator arguments, metric
/// init/update values, and segment min/max stats.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub enum AnyNum {
    Byte(i8),
    Ubyte(u8),
    Short(i16),
    Ushort(u16),
    Int(i32),
    Uint(u32),
    Long(i64),
    Ulong(u64),
    Float(f32),
    Double(f64),
}

impl AnyNum {
    /// The `NumType` tag of this value
    pub fn num_type(self) -> NumType {
        match self {
            AnyNum::Byte(_) => NumType::Byte,
            AnyNum::Ubyte(_) => NumType::Ubyte,
            AnyNum::Short(_) => NumType::Short,
            AnyNum::Ushort(_) => NumType::Ushort,
            AnyNum::Int(_) => NumType::Int,
            AnyNum::Uint(_) => NumType::Uint,
            AnyNum::Long(_) => NumType::Long,
            AnyNum::Ulong(_) => NumType::Ulong,
            AnyNum::Float(_) => NumType::Float,
            AnyNum::Double(_) => NumType::Double,
        }
    }

    /// Widen to `f64`, for generic arithmetic across declared types
    pub fn as_f64(self) -> f64 {
        match self {
            AnyNum::Byte(v) => v as f64,
            AnyNum::Ubyte(v) => v as f64,
            AnyNum::Short(v) => v as f64,
            AnyNum::Ushort(v) => v as f64,
            AnyNum::Int(v) => v as f64,
            AnyNum::Uint(v) => v as f64,
            AnyNum::Long(v) => v as f64,
            AnyNum::Ulong(v) => v as f64,
            AnyNum::Float(v) => v as f64,
            AnyNum::Double(v) => v,
        }
    }

    /// Widen to `u64`, used for dictionary codes and unsigned-only paths
    pub fn as_u64(self) -> u64 {
        match self {
            AnyNum::Byte(v) => v.max(0) as u64,
            AnyNum::Ubyte(v) => v as u64,
            AnyNum::Short(v) => v.max(0) as u64,
            AnyNum::Ushort(v) => v as u64,
            AnyNum::Int(v) => v.max(0) as u64,
            AnyNum::Uint(v) => v as u64,
            AnyNum::Long(v) => v.max(0) as u64,
            AnyNum::Ulong(v) => v,
            AnyNum::Float(v) => v.max(0.0) as u64,
            AnyNum::Double(v) => v.max(0.0) as u64,
        }
    }

    /// Reconstruct an `AnyNum` of `ty` from a `u64`, used when a dictionary
    /// code (always representable as `u64`) must flow back through a
    /// segment's typed min/max stats.
    pub fn from_u64(ty: NumType, value: u64) -> AnyNum {
        match ty {
            NumType::Byte => AnyNum::Byte(value as i8),
            NumType::Ubyte => AnyNum::Ubyte(value as u8),
            NumType::Short => AnyNum::Short(value as i16),
            NumType::Ushort => AnyNum::Ushort(value as u16),
            NumType::Int => AnyNum::Int(value as i32),
            NumType::Uint => AnyNum::Uint(value as u32),
            NumType::Long => AnyNum::Long(value as i64),
            NumType::Ulong => AnyNum::Ulong(value),
            NumType::Float => AnyNum::Float(value as f32),
            NumType::Double => AnyNum::Double(value as f64),
        }
    }

    /// `SUM`/`AVG` update rule: `a += b`
    pub fn add(self, other: AnyNum) -> AnyNum {
        match (self, other) {
            (AnyNum::Byte(a), AnyNum::Byte(b)) => AnyNum::Byte(a.wrapping_add(b)),
            (AnyNum::Ubyte(a), AnyNum::Ubyte(b)) => AnyNum::Ubyte(a.wrapping_add(b)),
            (AnyNum::Short(a), AnyNum::Short(b)) => AnyNum::Short(a.wrapping_add(b)),
            (AnyNum::Ushort(a), AnyNum::Ushort(b)) => AnyNum::Ushort(a.wrapping_add(b)),
            (AnyNum::Int(a), AnyNum::Int(b)) => AnyNum::Int(a.wrapping_add(b)),
            (AnyNum::Uint(a), AnyNum::Uint(b)) => AnyNum::Uint(a.wrapping_add(b)),
            (AnyNum::Long(a), AnyNum::Long(b)) => AnyNum::Long(a.wrapping_add(b)),
            (AnyNum::Ulong(a), AnyNum::Ulong(b)) => AnyNum::Ulong(a.wrapping_add(b)),
            (AnyNum::Float(a), AnyNum::Float(b)) => AnyNum::Float(a + b),
            (AnyNum::Double(a), AnyNum::Double(b)) => AnyNum::Double(a + b),
            (a, b) => AnyNum::Double(a.as_f64() + b.as_f64()),
        }
    }

    /// `MIN` update rule: `a = min(a, b)`
    pub fn min(self, other: AnyNum) -> AnyNum {
        if self.partial_cmp_num(&other) == Some(Ordering::Greater) {
            other
        } else {
            self
        }
    }

    /// `MAX` update rule: `a = max(a, b)`
    pub fn max(self, other: AnyNum) -> AnyNum {
        if self.partial_cmp_num(&other) == Some(Ordering::Less) {
            other
        } else {
            self
        }
    }

    /// Numeric ordering across possibly-differing declared types, via
    /// widening to `f64`. Used for segment stats and relational filters.
    pub fn partial_cmp_num(&self, other: &AnyNum) -> Option<Ordering> {
        self.as_f64().partial_cmp(&other.as_f64())
    }

    /// Canonical bit pattern for equality/hashing, used when an `AnyNum`
    /// participates in a group-by key or `tuple_offsets` key (dimension
    /// values are always produced by the same deterministic parse path,
    /// so exact-bits comparison is sound — see `storage::segment::DimValue`).
    pub fn key_bits(self) -> u64 {
        match self {
            AnyNum::Byte(v) => v as i64 as u64,
            AnyNum::Ubyte(v) => v as u64,
            AnyNum::Short(v) => v as i64 as u64,
            AnyNum::Ushort(v) => v as u64,
            AnyNum::Int(v) => v as i64 as u64,
            AnyNum::Uint(v) => v as u64,
            AnyNum::Long(v) => v as u64,
            AnyNum::Ulong(v) => v,
            AnyNum::Float(v) => v.to_bits() as u64,
            AnyNum::Double(v) => v.to_bits(),
        }
    }
}

impl PartialEq for AnyNum {
    fn eq(&self, other: &Self) -> bool {
        self.as_f64() == other.as_f64()
    }
}

impl fmt::Display for AnyNum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AnyNum::Byte(v) => write!(f, "{}", v),
            AnyNum::Ubyte(v) => write!(f, "{}", v),
            AnyNum::Short(v) => write!(f, "{}", v),
            AnyNum::Ushort(v) => write!(f, "{}", v),
            AnyNum::Int(v) => write!(f, "{}", v),
            AnyNum::Uint(v) => write!(f, "{}", v),
            AnyNum::Long(v) => write!(f, "{}", v),
            AnyNum::Ulong(v) => write!(f, "{}", v),
            AnyNum::Float(v) => write!(f, "{}", v),
            AnyNum::Double(v) => write!(f, "{}", v),
        }
    }
}

/// Precision of a stored time dimension, per spec §3 ("4-byte seconds or
/// 8-byte microseconds").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TimePrecision {
    Seconds,
    Micros,
}

impl TimePrecision {
    /// Stored width in bytes
    pub fn width(self) -> usize {
        match self {
            TimePrecision::Seconds => 4,
            TimePrecision::Micros => 8,
        }
    }
}
