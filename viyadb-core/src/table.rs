//! `Table` (dimensions, metrics, dictionaries, store, upsert context) and
//! `Database` (named tables, lifecycle). Spec §3 "Table"/"Lifecycle",
//! §5 "Shared-resource policy", §9 "Cyclic/back references".

use crate::config::Config;
use crate::dict::Dictionary;
use crate::error::{Error, Result};
use crate::filter::ValueDecoder;
use crate::schema::{Dimension, TableDescriptor, TableSchema};
use crate::storage::{DimValue, Store};
use crate::upsert::{UpsertContext, UpsertEngine, UpsertOutcome};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

/// A single table: schema plus every piece of owned mutable state
/// (dictionaries, the segment store, the upsert context). Lives until
/// explicitly dropped from its `Database` (spec §3 "Lifecycle").
pub struct Table {
    pub schema: TableSchema,
    dictionaries: Vec<Option<Dictionary>>,
    store: Store,
    upsert_ctx: Mutex<UpsertContext>,
    upsert_config: crate::config::UpsertConfig,
}

impl Table {
    pub fn new(schema: TableSchema, upsert_config: crate::config::UpsertConfig) -> Self {
        let dictionaries = schema
            .dimensions
            .iter()
            .map(|d| match d {
                Dimension::String(sd) => Some(Dictionary::new(sd.cardinality)),
                _ => None,
            })
            .collect();
        let upsert_ctx = Mutex::new(UpsertContext::new(&schema));
        Table {
            schema,
            dictionaries,
            store: Store::new(),
            upsert_ctx,
            upsert_config,
        }
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn dictionary(&self, dim_index: usize) -> Option<&Dictionary> {
        self.dictionaries.get(dim_index).and_then(|d| d.as_ref())
    }

    /// Ingest one already column-mapped row (spec §4.3). `now` is the
    /// reference instant for age-based time rollup (spec §3
    /// "Invariants").
    pub fn upsert_row(&self, fields: &[&str], now: i64) -> Result<UpsertOutcome> {
        let mut ctx = self.upsert_ctx.lock();
        UpsertEngine::upsert_row(
            &mut ctx,
            &self.schema,
            &self.dictionaries,
            &self.store,
            &self.upsert_config,
            fields,
            now,
        )
    }

    pub fn upsert_stats(&self) -> crate::upsert::UpsertStats {
        self.upsert_ctx.lock().stats
    }

    pub fn tuple_count(&self) -> usize {
        self.upsert_ctx.lock().tuple_count()
    }

    /// Decode a dictionary code back to its textual value, used by the
    /// query executor's row-emission path (spec §4.5 step 3).
    pub fn decode_string(&self, dim_index: usize, code: u64) -> Option<String> {
        self.dictionary(dim_index).and_then(|d| d.decode(code))
    }
}

impl ValueDecoder for Table {
    fn dim_index(&self, name: &str) -> Option<usize> {
        self.schema.dimension_index(name)
    }

    /// Decode a filter's textual value against the column's declared
    /// type (spec §4.4 "Relational filter"). For a string column whose
    /// value has no dictionary entry, this yields the max code for the
    /// dimension's stored width, which can never equal a real stored
    /// code and so never matches — preserving correct `=`/`≠` semantics
    /// without a spurious lookup failure.
    fn decode(&self, dim_index: usize, text: &str) -> Result<DimValue> {
        match &self.schema.dimensions[dim_index] {
            Dimension::String(sd) => {
                let dict = self
                    .dictionary(dim_index)
                    .ok_or_else(|| Error::internal("string dimension missing its dictionary"))?;
                match dict.lookup(text) {
                    Some(code) => Ok(DimValue::String(code)),
                    None => Ok(DimValue::String(sd.code_width.max_value().as_u64())),
                }
            }
            Dimension::Numeric(nd) => Ok(DimValue::Numeric(nd.num_type.parse(text)?)),
            Dimension::Time(td) => {
                let raw = td.format.parse(text, td.precision)?;
                Ok(DimValue::Time(raw))
            }
            Dimension::Boolean(_) => Ok(DimValue::Boolean(text.trim().eq_ignore_ascii_case("true"))),
        }
    }
}

impl std::fmt::Debug for Table {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Table")
            .field("name", &self.schema.name)
            .field("dimensions", &self.schema.dimensions.len())
            .field("metrics", &self.schema.metrics.len())
            .field("tuples", &self.tuple_count())
            .finish()
    }
}

/// A named collection of tables, guarded by a shared/exclusive lock:
/// lookup takes it shared, create/drop take it exclusive (spec §5
/// "Shared-resource policy").
pub struct Database {
    tables: RwLock<HashMap<String, Arc<Table>>>,
    config: Config,
    /// Highest `batch_id` seen across every completed load (spec §6
    /// "Load descriptor": "optional monotonic long recorded as the
    /// database's last batch id").
    last_batch_id: AtomicI64,
}

impl Database {
    pub fn new(config: Config) -> Self {
        Database {
            tables: RwLock::new(HashMap::new()),
            config,
            last_batch_id: AtomicI64::new(0),
        }
    }

    pub fn last_batch_id(&self) -> i64 {
        self.last_batch_id.load(Ordering::Acquire)
    }

    /// Raise the recorded last batch id to `id` if it's greater (spec §6:
    /// monotonic max, not an overwrite).
    pub fn record_batch_id(&self, id: i64) {
        self.last_batch_id.fetch_max(id, Ordering::AcqRel);
    }

    pub fn create_table(&self, descriptor: &TableDescriptor) -> Result<Arc<Table>> {
        let schema = TableSchema::from_descriptor(descriptor)?;
        let name = schema.name.clone();
        let table = Arc::new(Table::new(schema, self.config.upsert.clone()));
        let mut tables = self.tables.write();
        if tables.contains_key(&name) {
            return Err(Error::config(format!("table already exists: {}", name)));
        }
        log::info!("created table '{}'", name);
        tables.insert(name, table.clone());
        Ok(table)
    }

    pub fn drop_table(&self, name: &str) -> Result<()> {
        let mut tables = self.tables.write();
        if tables.remove(name).is_none() {
            return Err(Error::lookup(format!("unknown table: {}", name)));
        }
        log::info!("dropped table '{}'", name);
        Ok(())
    }

    pub fn table(&self, name: &str) -> Result<Arc<Table>> {
        self.tables
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| Error::lookup(format!("unknown table: {}", name)))
    }

    pub fn table_names(&self) -> Vec<String> {
        self.tables.read().keys().cloned().collect()
    }

    pub fn config(&self) -> &Config {
        &self.config
    }
}
