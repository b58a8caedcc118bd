//! Deduplication and the reply projections built on top of it.

pub mod dedup;
pub mod payload_types;
pub mod sip;
pub mod summarizer;

pub use dedup::{dedup_by_content, dedup_exact, dedup_records};
pub use summarizer::{flat_reply, message_element, search_element, summarize};
