//! Filter compilation
//!
//! Turns per-category filter lists into backend-agnostic predicates.
//!
//! Components:
//! - `compiler`: filter element rules, limit handling, OR-prefix joins.
//! - `smart_expression`: tokenizer and parser for smart-input values.
//! - `predicate`: the predicate tree and its parameterised SQLite rendering.
//! - `sanitize`: value scrubbing applied before values reach a backend.

pub mod compiler;
pub mod predicate;
pub mod sanitize;
pub mod smart_expression;

pub use compiler::{compile, CompiledFilter, Join, DEFAULT_LIMIT};
pub use predicate::{CompareOp, Predicate, ScalarValue, SqlFragment};
