//! Sandboxed transform scripts used by correlation rules.

pub mod sandbox;
pub mod script_store;

pub use sandbox::ScriptSandbox;
pub use script_store::{InMemoryScriptStore, ScriptStore};
