// CRM Reconcile - Core Library
// Spreadsheet exports → clients / BANs / subscribers, and audits against the
// remote system of record. Used by the CLI and by tests.

pub mod reader;        // Tabular reader: CSV / workbook → CellGrid
pub mod schema;        // Schema Mapper: header aliases → columns
pub mod normalizer;    // Row Normalizer
pub mod entities;      // Client / Ban / Subscriber
pub mod deduplication; // Entity Resolver (RunContext)
pub mod db;            // SQLite store + event log
pub mod import;        // Transactional Committer + pipeline
pub mod audit;         // Audit Differ
pub mod sync;          // Sync Applier
pub mod export;        // Structure export to CSV
pub mod cancel;
pub mod config;
pub mod error;

// Re-export commonly used types
pub use reader::{read_grid, Cell, CellGrid, FileFormat, TabularReader};
pub use schema::{AliasTable, AuditField, CanonicalField, ColumnMapping, FieldName};
pub use normalizer::{ParsedRow, RowNormalizer};
pub use entities::{BanDraft, BanRecord, BanStatus, ClientDraft, SubscriberDraft};
pub use deduplication::{ResolveAction, ResolvedRow, RunContext, SkipReason};
pub use db::{setup_database, CrmStore, Event, SqliteStore, StoreCounts};
pub use import::{resolve_grid, run_import, Committer, ImportOptions, ImportSource, RunReport};
pub use audit::{extract_audit_rows, AuditReport, AuditRow, AuditStatus, AuditSummary, RemoteRecord, RemoteSnapshot};
pub use sync::{RemoteStore, SqliteRemoteStore, SyncReport};
pub use export::StructurePlan;
pub use cancel::CancelToken;
pub use config::EngineConfig;
pub use error::{ImportError, StoreError};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
