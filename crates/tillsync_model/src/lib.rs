//! # tillsync Model
//!
//! Shared data model for the tillsync replication core.
//!
//! This crate defines the types that flow between the replication engine
//! and its collaborators:
//! - Documents mirrored from the remote REST source of truth
//! - Per-document sync status records (the reconciliation ledger)
//! - The replication side-record (cached remote-ID snapshot + audit time)
//! - The REST query contract (fields/include/exclude/modified_after)
//! - GMT timestamp parsing and comparison
//!
//! ## Key invariants
//!
//! - Sync status records are unique per `(id, endpoint)`
//! - Timestamp comparison is datetime-based, never lexical
//! - The pull checkpoint is recomputed every cycle, never persisted

mod checkpoint;
mod document;
mod meta;
mod query;
mod status;
pub mod timestamp;

pub use checkpoint::PullCheckpoint;
pub use document::{BulkOutcome, RemoteDocument};
pub use meta::ReplicationMeta;
pub use query::{RestQuery, METHOD_OVERRIDE_HEADER};
pub use status::{AuditEntry, SyncStatus, SyncStatusRecord};
