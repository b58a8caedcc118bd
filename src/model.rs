//! Request-scoped data model.
//!
//! Typed views over the JSON shapes exchanged with the request layer:
//! - `filter`: filter elements, search requests, field-mapping tables.
//! - `record`: the stored capture record and dotted-path extraction.
//! - `correlation`: correlation rules and report selection.
//! - `summary`: call summary projection and alias table.
//! - `context`: caller identity, IP exclusions and deadlines.

pub mod context;
pub mod correlation;
pub mod filter;
pub mod record;
pub mod summary;

pub use context::{CallerContext, Deadline};
pub use correlation::{CorrelationRule, ReportType};
pub use filter::{
    FieldMapping, FieldMappingTable, FilterElement, FilterType, IdentifierLookup, SearchRequest,
    TimeRange, ValueType,
};
pub use record::{CapturedRecord, FieldPath};
pub use summary::{AliasTable, CallSummary, HostEntry};
