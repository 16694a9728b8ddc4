//! Core in-memory columnar query/ingest engine for ViyaDB: schema-driven
//! tables, upsert-with-rollup ingestion, a filtered/aggregated query
//! executor, TSV loading, and directory watching.

pub mod bitset;
pub mod config;
pub mod dict;
pub mod error;
pub mod filter;
pub mod loader;
pub mod query;
pub mod rollup;
pub mod schema;
pub mod storage;
pub mod table;
pub mod types;
pub mod upsert;
pub mod watch;

pub use config::Config;
pub use error::{Error, Result};
pub use loader::{LoadDescriptor, LoadStats, TsvLoader};
pub use query::{QueryDescriptor, QueryStats, RowOutput, TsvRowOutput};
pub use table::{Database, Table};
pub use watch::{ThreadPool, Watcher};
