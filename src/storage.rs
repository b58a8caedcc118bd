//! Storage subsystem
//!
//! Per-node record stores and the registry that maps node names to them.
//!
//! Components:
//! - `storage_trait`: the NodeBackend trait every capture node implements.
//! - `types`: scan requests and the `create_date` column format.
//! - `database_storage`: SQLite implementation on sqlx.
//! - `registry`: the explicitly passed node name → backend map.

pub mod database_storage;
pub mod registry;
pub mod storage_trait;
pub mod types;

pub use database_storage::SqliteNodeStorage;
pub use registry::NodeRegistry;
pub use storage_trait::NodeBackend;
pub use types::ScanRequest;
