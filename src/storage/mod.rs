//! Snapshot persistence.
//!
//! Every registry update is written once as a dated file; the most recently
//! promoted one is mirrored to `latest.csv` and serves as the baseline of the
//! next run.
//!
//! ## Directory Structure
//!
//! ```text
//! csv/
//! ├── 2024-01-05.csv        # Dated: written once per update token
//! ├── 2024-01-12.csv
//! ├── latest.csv            # Baseline: copy of the last promoted snapshot
//! ├── latest.json           # Pointer: token of latest.csv
//! └── last_run.json         # Report of the most recent run
//! ```

pub mod csv;
pub mod local;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::models::{Snapshot, UpdateToken};

// Re-export for convenience
pub use local::LocalStorage;

/// Which snapshot to load.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SnapshotId {
    /// The promoted baseline
    Latest,
    /// The snapshot written for a given update
    Dated(UpdateToken),
}

/// Metadata about a snapshot write.
#[derive(Debug, Clone)]
pub struct SaveMetadata {
    pub location: String,
    pub rows: usize,
}

/// Pointer stored next to the baseline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LatestPointer {
    pub token: UpdateToken,
    pub promoted_at: DateTime<Utc>,
}

/// Summary of one pipeline run, kept for `info`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub token: Option<UpdateToken>,
    pub outcome: String,
    pub rows: usize,
    pub macro_total: Option<i64>,
}

/// Trait for snapshot storage backends.
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    /// Whether a snapshot was already written for `token`.
    async fn exists(&self, token: &UpdateToken) -> Result<bool>;

    /// Load a snapshot; `None` if it does not exist.
    async fn load(&self, id: &SnapshotId) -> Result<Option<Snapshot>>;

    /// Write the snapshot for `token`.
    ///
    /// Fails with `AppError::AlreadyPublished` if one exists, leaving the
    /// existing file untouched.
    async fn save(&self, token: &UpdateToken, snapshot: &Snapshot) -> Result<SaveMetadata>;

    /// Make the saved snapshot for `token` the baseline.
    async fn promote(&self, token: &UpdateToken) -> Result<()>;

    /// Persist the report of the latest run.
    async fn write_report(&self, report: &RunReport) -> Result<()>;

    /// Load the report of the latest run.
    async fn load_report(&self) -> Result<Option<RunReport>>;
}
