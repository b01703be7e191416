#![allow(dead_code)]

use std::sync::{Arc, Once};

use chrono::{NaiveDate, NaiveDateTime};
use recordplan::schema::FieldSpec;
use recordplan::{
    EngineContext, FieldType, MemoryStore, ProposedRow, ProposedSet, RecordTypeSchema, RunClock, SchemaStore, Value,
};
use tracing_subscriber::EnvFilter;

static INIT: Once = Once::new();

/// Route engine logs to the test writer when RUST_LOG is set.
pub fn init_logging() {
    INIT.call_once(|| {
        if std::env::var("RUST_LOG").is_ok() {
            tracing_subscriber::fmt()
                .with_test_writer()
                .with_env_filter(EnvFilter::from_default_env())
                .try_init()
                .ok();
        }
    });
}

pub fn run_time() -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2024, 3, 15)
        .unwrap()
        .and_hms_opt(10, 30, 0)
        .unwrap()
}

pub fn clock() -> RunClock {
    RunClock::fixed(run_time())
}

/// Order with order-significant lines.
pub fn order_schema() -> SchemaStore {
    SchemaStore::from_kinds([
        RecordTypeSchema::new("Order")
            .keys(["order_id"])
            .field("status", FieldSpec::new(FieldType::Text).with_default("OPEN")),
        RecordTypeSchema::new("OrderLine")
            .parent("Order")
            .keys(["line_no"])
            .ordered()
            .field("qty", FieldSpec::new(FieldType::Integer)),
    ])
    .unwrap()
}

/// Order 1001, status OPEN, lines 1 (qty 5) and 2 (qty 3).
pub fn order_store() -> MemoryStore {
    MemoryStore::new()
        .with_rows(
            "order",
            vec![vec![("order_id", Value::from(1001)), ("status", Value::from("OPEN"))]],
        )
        .with_rows(
            "orderline",
            vec![
                vec![
                    ("order_id", Value::from(1001)),
                    ("line_no", Value::from(1)),
                    ("qty", Value::from(5)),
                    ("order_number", Value::from(1)),
                ],
                vec![
                    ("order_id", Value::from(1001)),
                    ("line_no", Value::from(2)),
                    ("qty", Value::from(3)),
                    ("order_number", Value::from(2)),
                ],
            ],
        )
}

/// Invoice kinds with audit stamps, a remapped key and a blocked kind.
pub fn invoice_schema() -> SchemaStore {
    SchemaStore::from_kinds([
        RecordTypeSchema::new("Invoice")
            .keys(["invoice_no", "version"])
            .field("customer", FieldSpec::new(FieldType::Text))
            .field("paid", FieldSpec::new(FieldType::Boolean).with_default(false))
            .field("changed_on", FieldSpec::new(FieldType::Text))
            .field("changed_by", FieldSpec::new(FieldType::Text)),
        RecordTypeSchema::new("Item")
            .parent("Invoice")
            .keys(["item_no"])
            .remap("invoice_no", "inv_no")
            .ordered()
            .field("sku", FieldSpec::new(FieldType::Text))
            .field("amount", FieldSpec::new(FieldType::Number)),
        RecordTypeSchema::new("Charge")
            .parent("Item")
            .keys(["charge_no"])
            .remap("invoice_no", "inv_no")
            .field("fee", FieldSpec::new(FieldType::Number)),
        RecordTypeSchema::new("Memo").parent("Invoice").keys(["memo_no"]),
    ])
    .unwrap()
}

/// Invoice INV-1 version 2 with two items; item 1 carries a charge.
pub fn invoice_store() -> MemoryStore {
    MemoryStore::new()
        .with_rows(
            "invoice",
            vec![
                vec![
                    ("invoice_no", Value::from("INV-1")),
                    ("version", Value::from(1)),
                    ("customer", Value::from("Old Co")),
                    ("paid", Value::from("F")),
                    ("changed_on", Value::from("2023-12-01 09:00:00")),
                    ("changed_by", Value::from("alice")),
                ],
                vec![
                    ("invoice_no", Value::from("INV-1")),
                    ("version", Value::from(2)),
                    ("customer", Value::from("Acme")),
                    ("paid", Value::from("F")),
                    ("changed_on", Value::from("2024-01-01 09:00:00")),
                    ("changed_by", Value::from("alice")),
                ],
            ],
        )
        .with_rows(
            "item",
            vec![
                vec![
                    ("inv_no", Value::from("INV-1")),
                    ("version", Value::from(2)),
                    ("item_no", Value::from(1)),
                    ("sku", Value::from("A-1")),
                    ("amount", Value::from(10.5)),
                    ("order_number", Value::from(1)),
                ],
                vec![
                    ("inv_no", Value::from("INV-1")),
                    ("version", Value::from(2)),
                    ("item_no", Value::from(2)),
                    ("sku", Value::from("B-2")),
                    ("amount", Value::from(4.0)),
                    ("order_number", Value::from(2)),
                ],
            ],
        )
        .with_rows(
            "charge",
            vec![vec![
                ("inv_no", Value::from("INV-1")),
                ("version", Value::from(2)),
                ("item_no", Value::from(1)),
                ("charge_no", Value::from(1)),
                ("fee", Value::from(1.25)),
            ]],
        )
        .with_rows("memo", Vec::<Vec<(&str, Value)>>::new())
        .with_rows(
            "versions",
            vec![
                vec![
                    ("table_name", Value::from("Invoice")),
                    ("name", Value::from("INV-1")),
                    ("version", Value::from(1)),
                ],
                vec![
                    ("table_name", Value::from("Invoice")),
                    ("name", Value::from("INV-1")),
                    ("version", Value::from(2)),
                ],
            ],
        )
}

pub fn context(schema: SchemaStore, store: MemoryStore) -> EngineContext {
    init_logging();
    EngineContext::new(schema, Arc::new(store))
}

pub fn row(pairs: &[(&str, Value)]) -> ProposedRow {
    ProposedRow::from_pairs(pairs.iter().cloned())
}

pub fn proposed(kind: &str, rows: Vec<ProposedRow>) -> ProposedSet {
    ProposedSet::new().with_rows(kind, rows)
}
