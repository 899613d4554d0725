// A dataset-scoped graph statement store.
//
// Components:
//  - Dataset registry: name -> id, prefix and range lookups
//  - Interning tables: entities, attributes, string and byte values, each
//    entry carrying the set of datasets that reference it
//  - Statement table: (entity, attribute, value) triples keyed by dataset
//  - Garbage collector: dataset deletion releases every reference
//
// Life of a write:
// 1. Resolve the dataset name, take the writer lock
// 2. Run caller logic against a write batch
// 3. Append the batch to the WAL, sync, publish the new snapshot
#![cfg_attr(test, allow(clippy::disallowed_methods))]

pub mod config;
pub mod error;
pub mod storage;
pub mod store;
pub mod types;

pub use config::{ConfigError, StoreConfig};
pub use error::StoreError;
pub use storage::{ReadTxn, StatementReader, WriteTxn};
pub use store::GraphStore;
pub use types::{Dataset, Statement, StatementPattern, Value, ValueRef};
