//! Persistence layer: libSQL-backed, append-only storage for classified records.

pub mod libsql_backend;
pub mod migrations;
pub mod traits;

pub use libsql_backend::LibSqlBackend;
pub use traits::{NewRecord, Record, RecordStore, Source};
