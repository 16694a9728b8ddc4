//! Columnar storage: fixed-capacity segments and the append-only store
//! that sequences them (spec §3 "Segment", "Store", §4.2).

pub mod segment;
pub mod store;

pub use segment::{DimStats, DimValue, MetricValue, Segment};
pub use store::Store;
