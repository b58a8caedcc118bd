//! Call summary projection types and the display alias table.

use std::collections::HashMap;
use std::net::IpAddr;

use serde::{Deserialize, Serialize};

/// `ip:port`, with IPv6 addresses bracketed.
pub fn endpoint_key(ip: &str, port: i64) -> String {
    match ip.parse::<IpAddr>() {
        Ok(IpAddr::V6(_)) => format!("[{}]:{}", ip, port),
        _ => format!("{}:{}", ip, port),
    }
}

/// Flattened per-message view used by call-flow displays.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallSummary {
    pub id: i64,
    pub sid: String,
    pub src_host: String,
    pub dst_host: String,
    pub src_id: String,
    pub dst_id: String,
    pub src_ip: String,
    pub dst_ip: String,
    pub src_port: i64,
    pub dst_port: i64,
    pub method: String,
    #[serde(rename = "method_text")]
    pub method_text: String,
    #[serde(rename = "create_date")]
    pub create_date: i64,
    #[serde(rename = "micro_ts")]
    pub micro_ts: i64,
    pub protocol: i64,
    #[serde(rename = "msg_color")]
    pub msg_color: String,
    #[serde(rename = "ruri_user")]
    pub ruri_user: String,
    pub destination: usize,
    pub alias_src: String,
    pub alias_dst: String,
}

impl Default for CallSummary {
    fn default() -> Self {
        Self {
            id: 0,
            sid: "12345".to_string(),
            src_host: "127.0.0.1".to_string(),
            dst_host: "127.0.0.1".to_string(),
            src_id: "127.0.0.1:5060".to_string(),
            dst_id: "127.0.0.1:5060".to_string(),
            src_ip: "127.0.0.1".to_string(),
            dst_ip: "127.0.0.2".to_string(),
            src_port: 0,
            dst_port: 0,
            method: "Generic".to_string(),
            method_text: "generic".to_string(),
            create_date: 0,
            micro_ts: 0,
            protocol: 1,
            msg_color: "blue".to_string(),
            ruri_user: String::new(),
            destination: 0,
            alias_src: String::new(),
            alias_dst: String::new(),
        }
    }
}

/// Entry of the host table, keyed by endpoint id in the summary reply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostEntry {
    pub host: Vec<String>,
    pub position: usize,
}

/// Read-only `ip:port` → display name map. `ip:0` entries act as wildcards.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AliasTable {
    entries: HashMap<String, String>,
}

impl AliasTable {
    pub fn new(entries: HashMap<String, String>) -> Self {
        Self { entries }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Exact endpoint match first, then the `ip:0` wildcard.
    pub fn lookup(&self, ip: &str, port: i64) -> Option<&str> {
        self.entries
            .get(&endpoint_key(ip, port))
            .or_else(|| self.entries.get(&endpoint_key(ip, 0)))
            .map(String::as_str)
    }

    /// Display name for an endpoint, falling back to the endpoint key itself.
    pub fn resolve(&self, ip: &str, port: i64) -> String {
        self.lookup(ip, port)
            .map(str::to_string)
            .unwrap_or_else(|| endpoint_key(ip, port))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> AliasTable {
        let mut m = HashMap::new();
        m.insert("10.0.0.1:5060".to_string(), "proxy".to_string());
        m.insert("10.0.0.1:0".to_string(), "proxy-any".to_string());
        m.insert("10.0.0.2:0".to_string(), "gateway".to_string());
        m.insert("[2001:db8::1]:5060".to_string(), "v6-edge".to_string());
        m.insert("[2001:db8::1]:0".to_string(), "v6-any".to_string());
        AliasTable::new(m)
    }

    #[test]
    fn exact_beats_wildcard_beats_literal() {
        let aliases = table();
        assert_eq!(aliases.resolve("10.0.0.1", 5060), "proxy");
        assert_eq!(aliases.resolve("10.0.0.1", 5080), "proxy-any");
        assert_eq!(aliases.resolve("10.0.0.2", 5060), "gateway");
        assert_eq!(aliases.resolve("10.0.0.3", 5060), "10.0.0.3:5060");
    }

    #[test]
    fn ipv6_endpoints_are_bracketed() {
        let aliases = table();
        assert_eq!(endpoint_key("2001:db8::1", 5060), "[2001:db8::1]:5060");
        assert_eq!(aliases.resolve("2001:db8::1", 5060), "v6-edge");
        assert_eq!(aliases.resolve("2001:db8::1", 5080), "v6-any");
        assert_eq!(aliases.resolve("2001:db8::2", 5060), "[2001:db8::2]:5060");
    }

    #[test]
    fn summary_defaults_match_display_conventions() {
        let s = CallSummary::default();
        assert_eq!(s.src_ip, "127.0.0.1");
        assert_eq!(s.dst_ip, "127.0.0.2");
        let v = serde_json::to_value(&s).unwrap();
        assert!(v.get("srcIp").is_some());
        assert!(v.get("method_text").is_some());
        assert!(v.get("aliasSrc").is_some());
    }
}
