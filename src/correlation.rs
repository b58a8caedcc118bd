//! Transaction correlation over declared rule chains.

pub mod correlator;

pub use correlator::{CorrelationOutcome, TransactionCorrelator};
