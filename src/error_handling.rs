//! Error types for every layer, converted upward with `From`.

pub mod types;

pub use types::{
    ConfigError, CorrelationError, DecodeError, ScriptError, SearchError, SmartExpressionError,
    StorageError,
};
