//! The canonical stored capture record.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Column names that hold JSON documents.
pub const DATA_HEADER: &str = "data_header";
pub const PROTOCOL_HEADER: &str = "protocol_header";

/// A field reference, either a plain column or `container.key` inside a JSON column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldPath {
    Column(String),
    Json { container: String, key: String },
}

impl FieldPath {
    /// Splits on the first dot: `protocol_header.srcIp` addresses `srcIp` inside `protocol_header`.
    pub fn parse(name: &str) -> Self {
        match name.split_once('.') {
            Some((container, key)) => FieldPath::Json {
                container: container.to_string(),
                key: key.to_string(),
            },
            None => FieldPath::Column(name.to_string()),
        }
    }

    pub fn is_json(&self) -> bool {
        matches!(self, FieldPath::Json { .. })
    }
}

/// One row of a `hep_proto_*` table, stamped with the node it came from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapturedRecord {
    #[serde(default)]
    pub id: i64,
    #[serde(default)]
    pub sid: String,
    #[serde(rename = "create_date")]
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub protocol_header: Map<String, Value>,
    #[serde(default)]
    pub data_header: Map<String, Value>,
    #[serde(default)]
    pub raw: String,
    #[serde(default)]
    pub node: String,
    #[serde(default, rename = "dbnode")]
    pub origin_node: String,
    #[serde(default)]
    pub profile: String,
}

impl CapturedRecord {
    pub fn new<S: Into<String>>(id: i64, sid: S, created_at: DateTime<Utc>) -> Self {
        Self {
            id,
            sid: sid.into(),
            created_at,
            protocol_header: Map::new(),
            data_header: Map::new(),
            raw: String::new(),
            node: String::new(),
            origin_node: String::new(),
            profile: String::new(),
        }
    }

    /// Creation time rendered with microsecond precision, used in dedup keys.
    pub fn created_at_string(&self) -> String {
        self.created_at.to_rfc3339_opts(SecondsFormat::Micros, true)
    }

    /// Stage-1 deduplication key: `(id, createdAt)`.
    pub fn dedup_key(&self) -> String {
        format!("{}:{}", self.id, self.created_at_string())
    }

    /// Capture agent identifier from the protocol header, empty when absent.
    pub fn capture_id(&self) -> String {
        match self.protocol_header.get("captureId") {
            Some(Value::String(s)) => s.clone(),
            Some(Value::Number(n)) => n.to_string(),
            _ => String::new(),
        }
    }

    /// Extracts a scalar by dotted path (`data_header.callid`) or top-level column name.
    pub fn field(&self, path: &FieldPath) -> Option<Value> {
        match path {
            FieldPath::Json { container, key } => {
                let doc = match container.as_str() {
                    DATA_HEADER => &self.data_header,
                    PROTOCOL_HEADER => &self.protocol_header,
                    _ => return None,
                };
                doc.get(key).filter(|v| is_scalar(v)).cloned()
            }
            FieldPath::Column(name) => match name.as_str() {
                "id" => Some(Value::from(self.id)),
                "sid" => Some(Value::from(self.sid.clone())),
                "create_date" => Some(Value::from(self.created_at_string())),
                "raw" => Some(Value::from(self.raw.clone())),
                "node" => Some(Value::from(self.node.clone())),
                "dbnode" => Some(Value::from(self.origin_node.clone())),
                "profile" => Some(Value::from(self.profile.clone())),
                _ => None,
            },
        }
    }

    /// Looks a key up in the protocol header first, then the data header.
    pub fn header(&self, key: &str) -> Option<&Value> {
        self.protocol_header
            .get(key)
            .or_else(|| self.data_header.get(key))
    }

    /// Capture time in microseconds, preferring the agent's own `timeSeconds`/`timeUseconds`.
    pub fn capture_micros(&self) -> i64 {
        let secs = self.protocol_header.get("timeSeconds").and_then(as_f64);
        let usecs = self.protocol_header.get("timeUseconds").and_then(as_f64);
        match (secs, usecs) {
            (Some(s), Some(u)) => (s * 1_000_000.0 + u) as i64,
            _ => self.created_at.timestamp_micros(),
        }
    }
}

fn is_scalar(value: &Value) -> bool {
    matches!(value, Value::String(_) | Value::Number(_) | Value::Bool(_))
}

/// Numeric view of a JSON value, accepting numeric strings.
pub fn as_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
}

/// Text view of a scalar JSON value; numbers lose their JSON quoting.
pub fn as_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}
