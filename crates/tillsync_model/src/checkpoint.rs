//! The recomputed pull checkpoint.

/// The logical description of what to fetch next.
///
/// Unlike cursor-based replication, this checkpoint is never persisted:
/// it is recomputed at the start of every cycle from live id and
/// timestamp diffs, so a crashed or interrupted cycle costs nothing but
/// the recompute.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PullCheckpoint {
    /// Server ids missing locally; fetch these.
    pub include: Vec<u64>,
    /// Server ids already held locally; skip these.
    pub exclude: Vec<u64>,
    /// Maximum `date_modified_gmt` across local documents, used as the
    /// `modified_after` watermark once the initial sync is complete.
    pub last_modified: Option<String>,
    /// True once every remote id has a local copy.
    pub complete_initial_sync: bool,
    /// Iteration counter within the current bounded pull loop.
    pub count: u32,
}

impl PullCheckpoint {
    /// Returns true when there is nothing left to fetch by id and no
    /// watermark to advance from.
    pub fn is_settled(&self) -> bool {
        self.include.is_empty() && self.complete_initial_sync && self.last_modified.is_none()
    }
}
