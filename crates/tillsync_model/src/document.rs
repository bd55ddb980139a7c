//! Documents mirrored from the remote source of truth.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// A local copy of a remote document.
///
/// The replication engine never interprets the payload beyond the fields
/// it needs for reconciliation: the server-assigned `id` and the
/// `date_modified_gmt` stamp. Everything else is opaque to the engine
/// and owned by the host collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteDocument {
    /// Stable local primary key, assigned when the document first lands
    /// in the local store.
    pub uuid: Uuid,
    /// Server-assigned identifier. `None` for documents created locally
    /// that have not been pushed yet.
    pub id: Option<u64>,
    /// Last modification time confirmed by (or against) the server.
    pub date_modified_gmt: Option<String>,
    /// The full document body as returned by the REST API.
    pub payload: Value,
}

impl RemoteDocument {
    /// Creates a document from a raw REST response object.
    ///
    /// Pulls `id` and `date_modified_gmt` out of the payload and assigns
    /// a fresh local primary key.
    pub fn from_response(payload: Value) -> Self {
        let id = payload.get("id").and_then(Value::as_u64);
        let date_modified_gmt = payload
            .get("date_modified_gmt")
            .and_then(Value::as_str)
            .map(str::to_string);
        Self {
            uuid: Uuid::new_v4(),
            id,
            date_modified_gmt,
            payload,
        }
    }

    /// Returns the modification timestamp as a string slice.
    pub fn modified(&self) -> Option<&str> {
        self.date_modified_gmt.as_deref()
    }
}

/// Outcome of a bulk store operation.
///
/// A non-empty `error` list alongside successes is a partial failure:
/// the engine logs the failures and carries on with the successes. A
/// single bad document must never block the rest of the batch.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BulkOutcome {
    /// Server ids of documents that were applied.
    pub success: Vec<u64>,
    /// Error descriptions for documents that were not.
    pub error: Vec<String>,
}

impl BulkOutcome {
    /// An outcome where every document succeeded.
    pub fn all_success(ids: Vec<u64>) -> Self {
        Self {
            success: ids,
            error: Vec::new(),
        }
    }

    /// Returns true if any document in the batch failed.
    pub fn has_errors(&self) -> bool {
        !self.error.is_empty()
    }
}
