//! # TillSync Engine
//!
//! Audit-based replication engine for offline-first point-of-sale
//! stores.
//!
//! This crate provides:
//! - Audit-based diffing against the server's id listing
//! - Checkpoint-free incremental pulls (recomputed every cycle)
//! - Last-write-wins conflict avoidance on `date_modified_gmt`
//! - Request deduplication for identical in-flight fetches
//! - Bounded pull loops with a hard iteration cap
//! - Leadership gating for multi-instance hosts
//!
//! ## Architecture
//!
//! The engine implements an **audit-then-pull** synchronization model:
//! 1. Audit: fetch the remote id listing, diff against local ids
//! 2. Delete local orphans the server no longer has
//! 3. Pull missing documents (explicit include) or recent changes
//!    (modified-after watermark) and apply what is strictly newer
//!
//! There is no persisted cursor: the pull checkpoint is recomputed from
//! live diffs at the start of every cycle, so an interrupted cycle
//! costs nothing but the recompute.
//!
//! ## Key Invariants
//!
//! - Server is authoritative for existence; absence from a top-level
//!   id listing means deletion (sub-resources are exempt)
//! - A local document is only overwritten by a strictly newer server
//!   copy
//! - Cycles within one instance are strictly serialized
//! - Cancellation is terminal and idempotent
//! - At most [`MAX_PULL_ITERATIONS`] pulls per trigger

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod collection;
mod config;
mod driver;
mod error;
mod events;
mod http;
mod leadership;
mod ledger;
mod logger;
mod processor;
mod registry;
mod state;
mod status;

pub use collection::{Collection, MemoryCollection};
pub use config::EngineConfig;
pub use driver::{
    PullHandler, PushHandler, Replication, ReplicationHooks, MAX_PULL_ITERATIONS,
};
pub use error::{EngineError, EngineResult};
pub use events::EventChannel;
pub use http::{MockRestClient, RecordedCall, RequestOptions, RestClient, RestResponse};
pub use leadership::{AlwaysLeader, LeadershipProvider, ManualLeadership};
pub use ledger::{MemoryMetaStore, MemoryStatusLedger, MetaStore, StatusLedger};
pub use logger::{FetchKind, LogEntry, RecordingLogger, SyncLogger, TracingLogger};
pub use processor::DataProcessor;
pub use registry::{replication_hash, DriverRegistry, Registrable, Registry, ReplicationRegistry};
pub use state::{
    strategy_for, DefaultEndpoint, EndpointStrategy, ReplicationQuery, ReplicationState,
    SubResourceEndpoint,
};
pub use status::{is_sub_resource_endpoint, SyncStateManager};
