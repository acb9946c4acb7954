//! Persistence layer: libSQL-backed storage for vendors, RFPs, proposals
//! and the inbound email ledger.

pub mod libsql_backend;
pub mod migrations;
pub mod traits;

pub use libsql_backend::LibSqlBackend;
pub use traits::{Database, InboundOutcome, InboundRecord, UpsertOutcome};
