use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::Deserialize;

/// One capture node and the SQLite database holding its records.
#[derive(Debug, PartialEq, Clone, Deserialize)]
pub struct NodeConfig {
    pub name: String,
    pub database: PathBuf,
}

/// Tenant isolation: callers in `group` only see rows matching `query`.
#[derive(Debug, PartialEq, Clone, Default, Deserialize)]
pub struct IsolationConfig {
    #[serde(default)]
    pub group: Option<String>,
    #[serde(default)]
    pub query: Option<String>,
}

impl IsolationConfig {
    /// The isolation fragment to apply for a caller, if any.
    pub fn fragment_for(&self, user_group: &str) -> Option<&str> {
        match (&self.group, &self.query) {
            (Some(group), Some(query)) if !query.trim().is_empty() && group == user_group => Some(query.as_str()),
            _ => None,
        }
    }
}

#[derive(Debug, PartialEq, Clone, Default, Deserialize)]
pub struct TransactionConfig {
    /// Collapse repeated payload sightings from the same capture agent.
    #[serde(default)]
    pub global_deduplicate: bool,
}

fn default_max_workers() -> usize {
    4
}

#[derive(Debug, PartialEq, Clone, Deserialize)]
pub struct FanoutConfig {
    #[serde(default = "default_max_workers")]
    pub max_workers: usize,
    /// Per-request deadline in seconds, `0` for none.
    #[serde(default)]
    pub timeout_secs: u64,
}

impl Default for FanoutConfig {
    fn default() -> Self {
        Self {
            max_workers: default_max_workers(),
            timeout_secs: 0,
        }
    }
}

fn default_decoder_binary() -> PathBuf {
    PathBuf::from("/usr/bin/tshark")
}

fn default_import_table() -> String {
    "hep_proto_1_default".to_string()
}

fn default_decoder_timeout() -> u64 {
    30
}

/// External protocol decoder settings.
#[derive(Debug, PartialEq, Clone, Deserialize)]
pub struct DecoderConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_decoder_binary")]
    pub binary: PathBuf,
    /// Extra decoder argument appended after the fixed ones (e.g. a display filter).
    #[serde(default)]
    pub param: String,
    /// Categories (`1_call`, ...) whose records are decodable.
    #[serde(default)]
    pub protocols: Vec<String>,
    #[serde(default)]
    pub uid: u32,
    #[serde(default)]
    pub gid: u32,
    #[serde(default)]
    pub import_node: Option<String>,
    #[serde(default = "default_import_table")]
    pub import_table: String,
    #[serde(default = "default_decoder_timeout")]
    pub timeout_secs: u64,
}

impl Default for DecoderConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            binary: default_decoder_binary(),
            param: String::new(),
            protocols: Vec::new(),
            uid: 0,
            gid: 0,
            import_node: None,
            import_table: default_import_table(),
            timeout_secs: default_decoder_timeout(),
        }
    }
}

impl DecoderConfig {
    /// Target identity for privilege downgrade, when one is configured.
    pub fn identity(&self) -> Option<(u32, u32)> {
        if self.uid != 0 && self.gid != 0 {
            Some((self.uid, self.gid))
        } else {
            None
        }
    }
}

/// Script name to script source.
pub type ScriptTable = BTreeMap<String, String>;
