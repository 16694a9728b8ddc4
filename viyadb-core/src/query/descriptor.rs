//! JSON query descriptors consumed by `Query` (spec §6 "Query descriptor").

use crate::filter::FilterDescriptor;
use serde::Deserialize;

/// One entry of the `select` array form: a dimension or metric column,
/// with an optional time output `format` and query-time `granularity`
/// (spec §6, §4.5).
#[derive(Debug, Clone, Deserialize)]
pub struct OutputColumnDescriptor {
    pub column: String,
    #[serde(default)]
    pub format: Option<String>,
    #[serde(default)]
    pub granularity: Option<String>,
}

/// One sort key (spec §6 "sort").
#[derive(Debug, Clone, Deserialize)]
pub struct SortColumnDescriptor {
    pub column: String,
    #[serde(default = "default_true")]
    pub ascending: bool,
}

fn default_true() -> bool {
    true
}

/// Fields shared by `aggregate` and `select` queries (spec §6).
#[derive(Debug, Clone, Default, Deserialize)]
pub struct QuerySpec {
    pub table: String,
    #[serde(default)]
    pub select: Option<Vec<OutputColumnDescriptor>>,
    #[serde(default)]
    pub dimensions: Option<Vec<String>>,
    #[serde(default)]
    pub metrics: Option<Vec<String>>,
    #[serde(default)]
    pub filter: FilterDescriptor,
    #[serde(default)]
    pub having: Option<FilterDescriptor>,
    #[serde(default)]
    pub sort: Vec<SortColumnDescriptor>,
    #[serde(default)]
    pub skip: usize,
    #[serde(default)]
    pub limit: usize,
    #[serde(default)]
    pub header: bool,
}

/// `search` query: scan a single dimension for distinct values matching
/// a substring (spec §4.5 "Search query", §6).
#[derive(Debug, Clone, Deserialize)]
pub struct SearchQuerySpec {
    pub table: String,
    pub dimension: String,
    #[serde(default)]
    pub term: String,
    #[serde(default)]
    pub limit: usize,
    #[serde(default)]
    pub filter: FilterDescriptor,
}

/// `show` query: list tables or worker threads (spec §6).
#[derive(Debug, Clone, Deserialize)]
pub struct ShowQuerySpec {
    pub what: String,
}

/// Top-level query descriptor; `type` selects the variant (spec §6).
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum QueryDescriptor {
    Aggregate(QuerySpec),
    Select(QuerySpec),
    Search(SearchQuerySpec),
    Show(ShowQuerySpec),
}
