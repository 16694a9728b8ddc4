//! TSV file/batch loading: column-order mapping, partition filtering, and
//! per-file upsert statistics (spec §2 item 11 "Loader", §4.3, §6
//! "Load descriptor").

use crate::error::{Error, Result};
use crate::table::{Database, Table};
use serde::Deserialize;
use std::fs::File;
use std::io::{BufRead, BufReader, Read};
use std::path::Path;

/// A TSV line longer than this is rejected rather than parsed, guarding
/// against unbounded memory growth from a malformed or truncated file
/// (spec §4.3 "Failure semantics").
pub const MAX_LINE_BYTES: usize = 1_024_000;

/// A partition filter on the JSON load descriptor: only rows whose
/// key-column hash falls in `values` are accepted (spec §4.3 "Partition
/// filter").
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PartitionFilterDescriptor {
    pub columns: Vec<String>,
    pub total_partitions: u32,
    pub values: Vec<u32>,
}

/// Raw JSON shape of a `load` command (spec §6 "Load descriptor").
#[derive(Debug, Clone, Deserialize)]
pub struct LoadDescriptor {
    #[serde(rename = "type", default)]
    pub load_type: Option<String>,
    pub table: String,
    #[serde(default)]
    pub format: Option<String>,
    pub file: String,
    /// Source-file column order: maps each schema-order field to its
    /// position in the raw TSV line; absent means identity order.
    #[serde(default)]
    pub columns: Option<Vec<String>>,
    #[serde(default)]
    pub partition_filter: Option<PartitionFilterDescriptor>,
    /// Monotonic batch identifier; the database records the greatest one
    /// seen across all loads (spec §6 "Load descriptor").
    #[serde(default)]
    pub batch_id: Option<i64>,
}

/// CRC32 over the undelimited concatenation of the key columns' raw
/// input strings, modulo `total_partitions`, against the descriptor's
/// accepted partition list (spec §4.3 "Partition filter").
pub struct PartitionFilter {
    column_indices: Vec<usize>,
    total_partitions: u32,
    accepted: Vec<u32>,
}

impl PartitionFilter {
    /// `column_map[schema_index]` gives that schema field's position in
    /// the raw input line; `desc.columns` names schema dimensions or
    /// metrics, resolved through `table` and then translated into raw
    /// input positions via `column_map`.
    pub fn new(desc: &PartitionFilterDescriptor, table: &Table, column_map: &[usize]) -> Result<Self> {
        if desc.total_partitions == 0 {
            return Err(Error::config("partition filter must declare total_partitions > 0"));
        }
        let column_indices = desc
            .columns
            .iter()
            .map(|name| {
                let schema_idx = table
                    .schema
                    .dimension_index(name)
                    .or_else(|| table.schema.metric_index(name).map(|i| table.schema.dimensions.len() + i))
                    .ok_or_else(|| Error::config(format!("unknown partition filter column: {}", name)))?;
                Ok(column_map[schema_idx])
            })
            .collect::<Result<Vec<usize>>>()?;
        Ok(PartitionFilter {
            column_indices,
            total_partitions: desc.total_partitions,
            accepted: desc.values.clone(),
        })
    }

    /// Evaluate the filter against one raw (pre-reorder) TSV line's
    /// fields, addressed by their position in the *input* file.
    pub fn accepts(&self, raw_fields: &[&str]) -> bool {
        let mut hasher = crc32fast::Hasher::new();
        for &idx in &self.column_indices {
            hasher.update(raw_fields.get(idx).copied().unwrap_or("").as_bytes());
        }
        let hash = hasher.finalize() % self.total_partitions;
        self.accepted.contains(&hash)
    }
}

/// Per-file/per-buffer load counters (spec §4.3 "Failure semantics").
#[derive(Debug, Clone, Copy, Default)]
pub struct LoadStats {
    pub total_records: u64,
    pub new_records: u64,
    pub updated_records: u64,
    pub failed_records: u64,
    pub filtered_records: u64,
}

/// Resolve the descriptor's `columns` (source-file order) into, for each
/// schema-order field, the index of that field in a raw input line.
/// Absent `columns` means the input is already in schema order.
fn build_column_map(table: &Table, columns: Option<&[String]>) -> Result<Vec<usize>> {
    let field_count = table.schema.dimensions.len() + table.schema.metrics.len();
    match columns {
        None => Ok((0..field_count).collect()),
        Some(names) => names
            .iter()
            .map(|name| {
                if let Some(i) = table.schema.dimension_index(name) {
                    return Ok(i);
                }
                if let Some(i) = table.schema.metric_index(name) {
                    return Ok(table.schema.dimensions.len() + i);
                }
                Err(Error::config(format!("unknown load column: {}", name)))
            })
            .collect(),
    }
}

/// Split one TSV line on TABs, rejecting a line with more fields than
/// the table declares — a short line (missing trailing fields) is
/// accepted and padded with empty strings by the caller (spec §6 "TSV
/// ingestion format"). Too many fields is a structural error distinct
/// from an ordinary per-row parse failure: it aborts the whole file load
/// at this line number rather than being counted as a failed record
/// (spec §6 "a row with too many fields aborts that file load at its
/// line number").
fn split_line(line: &str, line_no: usize, max_fields: usize) -> Result<Vec<&str>> {
    let fields: Vec<&str> = line.split('\t').collect();
    if fields.len() > max_fields {
        return Err(Error::parse(format!(
            "line {}: {} fields, expected at most {}",
            line_no,
            fields.len(),
            max_fields
        )));
    }
    Ok(fields)
}

/// Reorders a raw (source-order) line's fields into schema order via
/// `column_map`, where `column_map[schema_index]` is that field's
/// position in `raw`. Missing trailing positions become empty strings
/// (spec §6 "TSV ingestion format": "missing trailing fields default to
/// empty").
fn reorder_fields<'a>(raw: &[&'a str], column_map: &[usize]) -> Vec<&'a str> {
    column_map.iter().map(|&i| raw.get(i).copied().unwrap_or("")).collect()
}

/// Loads TSV lines into a table, applying column reordering and an
/// optional partition filter per row (spec §4.3, §6).
pub struct TsvLoader<'a> {
    table: &'a Table,
    column_map: Vec<usize>,
    partition_filter: Option<PartitionFilter>,
    now: i64,
}

impl<'a> TsvLoader<'a> {
    pub fn new(table: &'a Table, desc: &LoadDescriptor, now: i64) -> Result<Self> {
        let column_map = build_column_map(table, desc.columns.as_deref())?;
        let partition_filter = match &desc.partition_filter {
            Some(pf_desc) => Some(PartitionFilter::new(pf_desc, table, &column_map)?),
            None => None,
        };
        Ok(TsvLoader {
            table,
            column_map,
            partition_filter,
            now,
        })
    }

    /// Load every LF-terminated line in `buf`, one row at a time (spec
    /// §6 "TSV ingestion format"). Aborts at the offending line, without
    /// applying it, if that line has more fields than the table
    /// declares; every other per-row error is counted as a failed record
    /// and the load continues.
    pub fn load_buffer(&self, buf: &str) -> Result<LoadStats> {
        let max_fields = self.column_map.len();
        let mut stats = LoadStats::default();
        for (i, line) in buf.lines().enumerate() {
            let line_no = i + 1;
            if line.is_empty() {
                continue;
            }
            if line.len() > MAX_LINE_BYTES {
                stats.total_records += 1;
                stats.failed_records += 1;
                log::warn!("load: line exceeds {} bytes, skipping", MAX_LINE_BYTES);
                continue;
            }
            stats.total_records += 1;
            let raw = split_line(line, line_no, max_fields)?;
            if let Some(pf) = &self.partition_filter {
                if !pf.accepts(&raw) {
                    stats.filtered_records += 1;
                    continue;
                }
            }
            let fields = reorder_fields(&raw, &self.column_map);
            match self.table.upsert_row(&fields, self.now) {
                Ok(crate::upsert::UpsertOutcome::Inserted) => stats.new_records += 1,
                Ok(crate::upsert::UpsertOutcome::Updated) => stats.updated_records += 1,
                Err(e) => {
                    stats.failed_records += 1;
                    log::warn!("load: row rejected: {}", e);
                }
            }
        }
        Ok(stats)
    }

    /// Load an entire file from disk (spec §2 item 11 "Loader").
    pub fn load_file(&self, path: &Path) -> Result<LoadStats> {
        let file = File::open(path)?;
        let mut reader = BufReader::new(file);
        let mut buf = String::new();
        reader.read_to_string(&mut buf)?;
        self.load_buffer(&buf)
    }
}

impl Database {
    /// Run one `load` command against its target table (spec §2 item 11,
    /// §6 "Load descriptor").
    pub fn load(&self, desc: &LoadDescriptor, now: i64) -> Result<LoadStats> {
        let table = self.table(&desc.table)?;
        let loader = TsvLoader::new(&table, desc, now)?;
        let path = Path::new(&desc.file);
        let stats = loader.load_file(path)?;
        if let Some(batch_id) = desc.batch_id {
            self.record_batch_id(batch_id);
            log::info!("load: table '{}' batch {} complete: {:?}", desc.table, batch_id, stats);
        }
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::schema::TableDescriptor;
    use std::io::Write as _;

    fn events_descriptor() -> TableDescriptor {
        serde_json::from_str(
            r#"{
                "name": "events",
                "dimensions": [
                    {"name": "country", "cardinality": 300},
                    {"name": "event_name", "cardinality": 1000}
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
    fn test_load_buffer_parses_schema_order_rows() {
        let db = Database::new(Config::default());
        let table = db.create_table(&events_descriptor()).unwrap();
        let loader = TsvLoader::new(
            &table,
            &LoadDescriptor {
                load_type: None,
                table: "events".into(),
                format: None,
                file: String::new(),
                columns: None,
                partition_filter: None,
                batch_id: None,
            },
            0,
        )
        .unwrap();
        let buf = "US\tpurchase\t1\t0.5\nRU\tdonate\t1\t1.0\n";
        let stats = loader.load_buffer(buf).unwrap();
        assert_eq!(stats.total_records, 2);
        assert_eq!(stats.new_records, 2);
        assert_eq!(stats.failed_records, 0);
        assert_eq!(table.tuple_count(), 2);
    }

    #[test]
    fn test_load_buffer_pads_missing_trailing_fields() {
        let db = Database::new(Config::default());
        let table = db.create_table(&events_descriptor()).unwrap();
        let loader = TsvLoader::new(
            &table,
            &LoadDescriptor {
                load_type: None,
                table: "events".into(),
                format: None,
                file: String::new(),
                columns: None,
                partition_filter: None,
                batch_id: None,
            },
            0,
        )
        .unwrap();
        // revenue field missing entirely -> defaults to empty, which fails
        // to parse as a double and is counted as a failed record.
        let buf = "US\tpurchase\t1\n";
        let stats = loader.load_buffer(buf).unwrap();
        assert_eq!(stats.total_records, 1);
        assert_eq!(stats.failed_records, 1);
    }

    #[test]
    fn test_load_buffer_aborts_file_on_too_many_fields() {
        let db = Database::new(Config::default());
        let table = db.create_table(&events_descriptor()).unwrap();
        let loader = TsvLoader::new(
            &table,
            &LoadDescriptor {
                load_type: None,
                table: "events".into(),
                format: None,
                file: String::new(),
                columns: None,
                partition_filter: None,
                batch_id: None,
            },
            0,
        )
        .unwrap();
        // the first row is well-formed and gets applied before the
        // second row's extra field aborts the rest of the load.
        let buf = "US\tpurchase\t1\t0.5\nRU\tdonate\t1\t0.5\textra\n";
        let err = loader.load_buffer(buf).unwrap_err();
        assert!(err.to_string().contains("line 2"));
        assert_eq!(table.tuple_count(), 1);
    }

    #[test]
    fn test_load_buffer_reorders_non_schema_column_order() {
        let db = Database::new(Config::default());
        let table = db.create_table(&events_descriptor()).unwrap();
        let desc = LoadDescriptor {
            load_type: None,
            table: "events".into(),
            format: None,
            file: String::new(),
            columns: Some(vec!["event_name".into(), "country".into(), "revenue".into(), "count".into()]),
            partition_filter: None,
            batch_id: None,
        };
        let loader = TsvLoader::new(&table, &desc, 0).unwrap();
        let stats = loader.load_buffer("purchase\tUS\t0.5\t1\n").unwrap();
        assert_eq!(stats.new_records, 1);
        assert_eq!(table.tuple_count(), 1);
    }

    #[test]
    fn test_partition_filter_matches_manually_computed_crc32() {
        let db = Database::new(Config::default());
        let table = db.create_table(&events_descriptor()).unwrap();

        // Compute, independently, which partition "US" (the sole key
        // column) lands in under mod 4, then accept only that partition.
        let mut hasher = crc32fast::Hasher::new();
        hasher.update(b"US");
        let us_partition = hasher.finalize() % 4;

        let desc = LoadDescriptor {
            load_type: None,
            table: "events".into(),
            format: None,
            file: String::new(),
            columns: None,
            partition_filter: Some(PartitionFilterDescriptor {
                columns: vec!["country".into()],
                total_partitions: 4,
                values: vec![us_partition],
            }),
            batch_id: None,
        };
        let loader = TsvLoader::new(&table, &desc, 0).unwrap();
        let stats = loader.load_buffer("US\tpurchase\t1\t0.5\nRU\tdonate\t1\t1.0\n").unwrap();
        assert_eq!(stats.total_records, 2);
        assert_eq!(stats.new_records, 1);
        assert_eq!(stats.filtered_records, 1);
        assert_eq!(table.tuple_count(), 1);
    }

    #[test]
    fn test_load_file_reads_from_disk() {
        let db = Database::new(Config::default());
        let table = db.create_table(&events_descriptor()).unwrap();
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "US\tpurchase\t1\t0.5").unwrap();
        let desc = LoadDescriptor {
            load_type: Some("file".into()),
            table: "events".into(),
            format: Some("tsv".into()),
            file: file.path().to_str().unwrap().to_string(),
            columns: None,
            partition_filter: None,
            batch_id: Some(1),
        };
        let stats = db.load(&desc, 0).unwrap();
        assert_eq!(stats.new_records, 1);
        assert_eq!(table.tuple_count(), 1);
        assert_eq!(db.last_batch_id(), 1);
    }
}
