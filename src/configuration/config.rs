use super::types::*;
use crate::error_handling::types::ConfigError;
use log::info;
use serde::Deserialize;
use std::collections::HashSet;
use std::path::Path;

pub const DECODER_BIN_ENV: &str = "SIPSIFT_DECODER_BIN";
pub const IMPORT_NODE_ENV: &str = "SIPSIFT_IMPORT_NODE";

/// Application configuration loaded from a TOML file.
///
/// # Example
///
/// ```toml
/// [[nodes]]
/// name = "local"
/// database = "/var/lib/sipsift/local.sqlite3"
///
/// [isolation]
/// group = "tenant-a"
/// query = "json_extract(protocol_header, '$.captureId') = 2001"
///
/// [transaction]
/// global_deduplicate = true
///
/// [fanout]
/// max_workers = 4
/// timeout_secs = 30
///
/// [decoder]
/// enabled = true
/// binary = "/usr/bin/tshark"
/// protocols = ["1_call"]
/// uid = 1000
/// gid = 1000
///
/// [scripts]
/// keep_invites = "data.filter(|r| r.raw.starts_with(\"INVITE\"))"
/// ```
///
/// # Sections
///
/// - `nodes`: the capture node databases that can be queried. At least one is required
/// - `isolation`: optional tenant fragment added to every correlation lookup of one group
/// - `transaction`: correlation result options
/// - `fanout`: worker bound and deadline for multi-node queries
/// - `decoder`: external decoder and bulk import settings
/// - `scripts`: named transform scripts for correlation rules
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub nodes: Vec<NodeConfig>,
    #[serde(default)]
    pub isolation: IsolationConfig,
    #[serde(default)]
    pub transaction: TransactionConfig,
    #[serde(default)]
    pub fanout: FanoutConfig,
    #[serde(default)]
    pub decoder: DecoderConfig,
    #[serde(default)]
    pub scripts: ScriptTable,
}

impl Config {
    /// Reads, parses, applies environment overrides and validates a configuration file.
    pub fn from_file(path: &Path) -> Result<Config, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        let mut config = Config::parse_str(&contents)?;
        config.apply_env_overrides();
        config.validate()?;
        info!("Loaded configuration with {} node(s) from {}", config.nodes.len(), path.display());
        Ok(config)
    }

    pub fn parse_str(contents: &str) -> Result<Config, ConfigError> {
        toml::from_str(contents).map_err(|e| ConfigError::TomlError(e.to_string()))
    }

    /// Environment variables win over file values.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(bin) = std::env::var(DECODER_BIN_ENV) {
            if !bin.is_empty() {
                self.decoder.binary = bin.into();
            }
        }
        if let Ok(node) = std::env::var(IMPORT_NODE_ENV) {
            if !node.is_empty() {
                self.decoder.import_node = Some(node);
            }
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.nodes.is_empty() {
            return Err(ConfigError::NodesEmpty("at least one [[nodes]] entry is required".into()));
        }
        let mut seen = HashSet::new();
        for node in &self.nodes {
            if node.name.trim().is_empty() {
                return Err(ConfigError::NodesEmpty("node name must not be empty".into()));
            }
            if !seen.insert(node.name.as_str()) {
                return Err(ConfigError::DuplicateNode(node.name.clone()));
            }
        }
        if self.fanout.max_workers == 0 {
            return Err(ConfigError::NotInRange("fanout.max_workers must be at least 1".into()));
        }
        if self.decoder.enabled && self.decoder.binary.as_os_str().is_empty() {
            return Err(ConfigError::DecoderMisconfigured("decoder.binary is empty".into()));
        }
        if let Some(import) = &self.decoder.import_node {
            if !self.nodes.iter().any(|n| &n.name == import) {
                return Err(ConfigError::DecoderMisconfigured(format!(
                    "decoder.import_node '{}' is not a configured node",
                    import
                )));
            }
        }
        if (self.decoder.uid == 0) != (self.decoder.gid == 0) {
            return Err(ConfigError::DecoderMisconfigured("decoder.uid and decoder.gid must be set together".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::io::Write;
    use std::path::PathBuf;

    const SAMPLE: &str = r#"
[[nodes]]
name = "local"
database = "/tmp/local.sqlite3"

[[nodes]]
name = "remote"
database = "/tmp/remote.sqlite3"

[isolation]
group = "tenant-a"
query = "sid <> ''"

[transaction]
global_deduplicate = true

[decoder]
enabled = true
protocols = ["1_call"]
uid = 1000
gid = 1000

[scripts]
noop = "data"
"#;

    #[test]
    fn parses_all_sections_with_defaults() {
        let config = Config::parse_str(SAMPLE).unwrap();
        assert_eq!(config.nodes.len(), 2);
        assert_eq!(config.nodes[1].database, PathBuf::from("/tmp/remote.sqlite3"));
        assert!(config.transaction.global_deduplicate);
        assert_eq!(config.fanout.max_workers, 4);
        assert_eq!(config.fanout.timeout_secs, 0);
        assert_eq!(config.decoder.import_table, "hep_proto_1_default");
        assert_eq!(config.decoder.identity(), Some((1000, 1000)));
        assert_eq!(config.isolation.fragment_for("tenant-a"), Some("sid <> ''"));
        assert_eq!(config.isolation.fragment_for("tenant-b"), None);
        assert_eq!(config.scripts.get("noop").map(String::as_str), Some("data"));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn validation_rejects_bad_nodes() {
        let empty = Config::parse_str("").unwrap();
        assert!(matches!(empty.validate(), Err(ConfigError::NodesEmpty(_))));

        let dup = Config::parse_str(
            "[[nodes]]\nname = \"a\"\ndatabase = \"x\"\n[[nodes]]\nname = \"a\"\ndatabase = \"y\"\n",
        )
        .unwrap();
        assert!(matches!(dup.validate(), Err(ConfigError::DuplicateNode(_))));

        let mut config = Config::parse_str(SAMPLE).unwrap();
        config.decoder.import_node = Some("ghost".into());
        assert!(matches!(config.validate(), Err(ConfigError::DecoderMisconfigured(_))));
        config.decoder.import_node = None;
        config.fanout.max_workers = 0;
        assert!(matches!(config.validate(), Err(ConfigError::NotInRange(_))));
    }

    #[test]
    fn malformed_toml_is_reported() {
        assert!(matches!(Config::parse_str("[[nodes]"), Err(ConfigError::TomlError(_))));
    }

    #[test]
    #[serial]
    fn env_overrides_apply_on_load() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(SAMPLE.as_bytes()).unwrap();
        std::env::set_var(DECODER_BIN_ENV, "/opt/decoder");
        std::env::set_var(IMPORT_NODE_ENV, "remote");
        let loaded = Config::from_file(file.path());
        std::env::remove_var(DECODER_BIN_ENV);
        std::env::remove_var(IMPORT_NODE_ENV);

        let config = loaded.unwrap();
        assert_eq!(config.decoder.binary, PathBuf::from("/opt/decoder"));
        assert_eq!(config.decoder.import_node.as_deref(), Some("remote"));
    }

    #[test]
    #[serial]
    fn missing_file_is_io_error() {
        let res = Config::from_file(Path::new("/nonexistent/sipsift.toml"));
        assert!(matches!(res, Err(ConfigError::IoError(_))));
    }
}
