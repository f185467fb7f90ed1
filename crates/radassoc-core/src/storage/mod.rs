//! # Storage Module
//!
//! Persistent backend for association databases.

mod redb_tables;

pub use redb_tables::{RedbStore, RedbTables, TableCounts};
