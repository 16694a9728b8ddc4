//! End-to-end scenarios driven entirely through the public API: create a
//! table, ingest TSV rows, run JSON-descriptor queries, and check the
//! emitted TSV output. Complements the inline `#[cfg(test)]` unit tests
//! that exercise internal structures directly.

use viyadb_core::query::executor::TsvRowOutput;
use viyadb_core::schema::TableDescriptor;
use viyadb_core::{Config, Database, QueryDescriptor};

fn events_table() -> TableDescriptor {
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

fn load_rows(db: &Database, table: &str, rows: &[&str]) {
    let t = db.table(table).unwrap();
    for row in rows {
        let fields: Vec<&str> = row.split('\t').collect();
        t.upsert_row(&fields, 0).unwrap();
    }
}

fn run_query(db: &Database, descriptor_json: &str) -> Vec<String> {
    let descriptor: QueryDescriptor = serde_json::from_str(descriptor_json).unwrap();
    let mut buf: Vec<u8> = Vec::new();
    {
        let mut out = TsvRowOutput::new(&mut buf);
        db.query(&descriptor, &mut out).unwrap();
    }
    String::from_utf8(buf)
        .unwrap()
        .lines()
        .map(|l| l.to_string())
        .collect()
}

#[test]
fn scenario_group_by_country_and_event_aggregates_revenue() {
    let db = Database::new(Config::default());
    db.create_table(&events_table()).unwrap();
    load_rows(
        &db,
        "events",
        &[
            "US\tpurchase\t1\t1.0",
            "US\tpurchase\t1\t0.2",
            "US\tdonate\t1\t5.0",
            "RU\tpurchase\t1\t3.0",
        ],
    );

    let rows = run_query(
        &db,
        r#"{
            "type": "aggregate",
            "table": "events",
            "dimensions": ["country", "event_name"],
            "metrics": ["count", "revenue"],
            "sort": [{"column": "country"}, {"column": "event_name"}]
        }"#,
    );

    assert_eq!(
        rows,
        vec![
            "RU\tpurchase\t1\t3".to_string(),
            "US\tdonate\t1\t5".to_string(),
            "US\tpurchase\t2\t1.2".to_string(),
        ]
    );
}

#[test]
fn scenario_having_keeps_only_groups_above_threshold() {
    let db = Database::new(Config::default());
    db.create_table(&events_table()).unwrap();
    load_rows(
        &db,
        "events",
        &["US\tpurchase\t1\t1.2", "US\tdonate\t1\t5.0"],
    );

    let rows = run_query(
        &db,
        r#"{
            "type": "aggregate",
            "table": "events",
            "dimensions": ["event_name"],
            "metrics": ["revenue"],
            "having": {"op": "gt", "column": "revenue", "value": 2},
            "sort": [{"column": "event_name"}]
        }"#,
    );

    assert_eq!(rows, vec!["donate\t5".to_string()]);
}

#[test]
fn scenario_select_query_emits_one_row_per_stored_tuple() {
    let db = Database::new(Config::default());
    db.create_table(&events_table()).unwrap();
    load_rows(
        &db,
        "events",
        &["US\tpurchase\t1\t1.0", "US\tdonate\t1\t2.0"],
    );

    let rows = run_query(
        &db,
        r#"{
            "type": "select",
            "table": "events",
            "dimensions": ["country", "event_name"],
            "metrics": ["revenue"],
            "sort": [{"column": "event_name"}]
        }"#,
    );
    assert_eq!(
        rows,
        vec!["US\tdonate\t2".to_string(), "US\tpurchase\t1".to_string()]
    );
}

#[test]
fn scenario_filter_restricts_rows_before_grouping() {
    let db = Database::new(Config::default());
    db.create_table(&events_table()).unwrap();
    load_rows(
        &db,
        "events",
        &["US\tpurchase\t1\t1.0", "RU\tpurchase\t1\t1.0"],
    );

    let rows = run_query(
        &db,
        r#"{
            "type": "aggregate",
            "table": "events",
            "dimensions": ["country"],
            "metrics": ["count"],
            "filter": {"op": "eq", "column": "country", "value": "US"}
        }"#,
    );
    assert_eq!(rows, vec!["US\t1".to_string()]);
}

#[test]
fn scenario_show_tables_lists_created_tables() {
    let db = Database::new(Config::default());
    db.create_table(&events_table()).unwrap();

    let rows = run_query(&db, r#"{"type":"show","what":"tables"}"#);
    assert_eq!(rows, vec!["events".to_string()]);
}

#[test]
fn scenario_search_finds_distinct_values_containing_term() {
    let db = Database::new(Config::default());
    db.create_table(&events_table()).unwrap();
    load_rows(
        &db,
        "events",
        &["US\tpurchase\t1\t1.0", "US\topen-app\t1\t0.0"],
    );

    let mut rows = run_query(
        &db,
        r#"{"type":"search","table":"events","dimension":"event_name","term":"app"}"#,
    );
    rows.sort();
    assert_eq!(rows, vec!["open-app".to_string()]);
}

#[test]
fn scenario_skip_and_limit_paginate_sorted_output() {
    let db = Database::new(Config::default());
    db.create_table(&events_table()).unwrap();
    load_rows(
        &db,
        "events",
        &[
            "AA\tpurchase\t1\t1.0",
            "BB\tpurchase\t1\t1.0",
            "CC\tpurchase\t1\t1.0",
            "DD\tpurchase\t1\t1.0",
        ],
    );

    let rows = run_query(
        &db,
        r#"{
            "type": "aggregate",
            "table": "events",
            "dimensions": ["country"],
            "metrics": ["count"],
            "sort": [{"column": "country"}],
            "skip": 1,
            "limit": 2
        }"#,
    );
    assert_eq!(rows, vec!["BB\t1".to_string(), "CC\t1".to_string()]);
}
