//! Common test utilities
//!
//! Builds a [`TransferService`] over the in-memory driver so every operation
//! runs through the real connection manager.

#![allow(dead_code)]

use std::sync::Arc;

use chbridge_core::testing::{MemoryDriver, MemoryStore};
use chbridge_core::{
    ColumnDef, ColumnProjection, ColumnType, DatabaseEndpoint, Row, TableSchema, Value,
};
use chbridge_drivers::DriverRegistry;
use chbridge_services::{BridgeConfig, TransferConfig, TransferService};

pub struct Harness {
    pub service: TransferService,
    pub driver: Arc<MemoryDriver>,
    pub store: Arc<MemoryStore>,
    pub endpoint: DatabaseEndpoint,
}

pub fn harness() -> Harness {
    harness_with(TransferConfig::default())
}

pub fn harness_with(transfer: TransferConfig) -> Harness {
    let store = MemoryStore::new();
    let driver = Arc::new(MemoryDriver::new(store.clone()));
    let mut registry = DriverRegistry::new();
    registry.register(driver.clone());

    let config = BridgeConfig {
        transfer,
        ..BridgeConfig::default()
    };
    Harness {
        service: TransferService::from_config(Arc::new(registry), &config),
        driver,
        store,
        endpoint: DatabaseEndpoint::new("memory", "localhost", 8123, "default"),
    }
}

pub fn projection(columns: &[&str]) -> ColumnProjection {
    ColumnProjection::new(columns.iter().copied()).unwrap()
}

/// `orders(id, total, note)` with three rows
pub fn seed_orders(store: &MemoryStore) {
    store.seed(
        TableSchema::new(
            "orders",
            vec![
                ColumnDef::new("id", ColumnType::Integer),
                ColumnDef::new("total", ColumnType::Float),
                ColumnDef::new("note", ColumnType::String),
            ],
        ),
        vec![
            Row::new(vec![Value::Int64(1), Value::Float64(10.5), Value::String("first".into())]),
            Row::new(vec![Value::Int64(2), Value::Float64(20.0), Value::Null]),
            Row::new(vec![Value::Int64(3), Value::Float64(30.25), Value::String("a,b".into())]),
        ],
    );
}

/// `customers(id, name)`; ids 1 and 3 match orders
pub fn seed_customers(store: &MemoryStore) {
    store.seed(
        TableSchema::new(
            "customers",
            vec![
                ColumnDef::new("id", ColumnType::Integer),
                ColumnDef::new("name", ColumnType::String),
            ],
        ),
        vec![
            Row::new(vec![Value::Int64(1), Value::String("ada".into())]),
            Row::new(vec![Value::Int64(3), Value::String("grace".into())]),
            Row::new(vec![Value::Int64(4), Value::String("linus".into())]),
        ],
    );
}

/// `events(n)` with `count` rows
pub fn seed_events(store: &MemoryStore, count: i64) {
    store.seed(
        TableSchema::new("events", vec![ColumnDef::new("n", ColumnType::Integer)]),
        (0..count).map(|n| Row::new(vec![Value::Int64(n)])).collect(),
    );
}
