//! Persistence layer — libSQL-backed storage for processed email records.

pub mod libsql_backend;
pub mod traits;

pub use libsql_backend::LibSqlBackend;
pub use traits::{Database, EmailRecord, NewEmailRecord, RecordStatus};
