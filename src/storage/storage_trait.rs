//! Node backend trait
//!
//! A `NodeBackend` is one capture node's record store. The core reads it
//! through table scans and only writes to it from the bulk-ingest path.
//!
//! Implementors are responsible for:
//! - Bounding every scan by the request time range and the row limit
//! - Rendering the predicate without splicing values into SQL
//! - Giving up with `StorageError::Timeout` once the deadline passes

use crate::error_handling::types::StorageError;
use crate::model::context::Deadline;
use crate::model::record::CapturedRecord;
use crate::storage::types::ScanRequest;

pub trait NodeBackend: Send + Sync {
    /// Returns matching rows ordered by `create_date`. A table that does not
    /// exist yields no rows.
    fn scan(&self, request: &ScanRequest, deadline: &Deadline) -> Result<Vec<CapturedRecord>, StorageError>;

    /// Appends one record and returns its id. A positive `record.id` is kept.
    fn insert(&self, table: &str, record: &CapturedRecord) -> Result<i64, StorageError>;

    /// Creates the record table if it is missing.
    fn ensure_table(&self, table: &str) -> Result<(), StorageError>;
}
