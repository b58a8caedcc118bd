//! Request-level operations: search, message lookup, transactions and
//! capture import.

pub mod search_service;


pub use search_service::{FieldMappings, SearchService, TransactionReport};
