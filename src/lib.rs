pub mod configuration;
pub mod correlation;
pub mod decoder;
pub mod error_handling;
pub mod fanout;
pub mod model;
pub mod query;
pub mod scripting;
pub mod service;
pub mod storage;
pub mod summary;

pub use error_handling::types::SearchError;
pub use service::SearchService;
