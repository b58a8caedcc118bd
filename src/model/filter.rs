//! Filter elements, search requests and smart-input field mappings.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use log::warn;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error_handling::types::SearchError;

/// How a filter element's value is interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterType {
    String,
    Integer,
    Raw,
    Limit,
}

impl FilterType {
    fn from_name(name: &str) -> Self {
        match name {
            "integer" | "number" => FilterType::Integer,
            "raw" => FilterType::Raw,
            "limit" => FilterType::Limit,
            _ => FilterType::String,
        }
    }
}

/// One `{name, value, type}` triple from a category's filter list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterElement {
    pub name: String,
    pub value: String,
    pub kind: FilterType,
}

impl FilterElement {
    pub fn new<N: Into<String>, V: Into<String>>(name: N, value: V, kind: FilterType) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            kind,
        }
    }

    /// Reads an element from loosely-shaped JSON. Anything that is not a
    /// string name with a string value is rejected with a reason.
    pub fn from_json(value: &Value) -> Result<Self, String> {
        let obj = value
            .as_object()
            .ok_or_else(|| format!("element is not an object: {}", value))?;
        let name = match obj.get("name") {
            Some(Value::String(s)) => s.clone(),
            other => return Err(format!("unsupported name type: {:?}", other)),
        };
        let raw_value = match obj.get("value") {
            Some(Value::String(s)) => s.clone(),
            other => return Err(format!("unsupported value type for {}: {:?}", name, other)),
        };
        let kind = match obj.get("type") {
            Some(Value::String(t)) => FilterType::from_name(t),
            _ => FilterType::String,
        };
        Ok(Self {
            name,
            value: raw_value,
            kind,
        })
    }
}

/// Request time window in microseconds since the epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TimeRange {
    pub from: i64,
    pub to: i64,
}

impl TimeRange {
    pub fn new(from: i64, to: i64) -> Self {
        Self { from, to }
    }

    pub fn from_datetimes(from: DateTime<Utc>, to: DateTime<Utc>) -> Self {
        Self {
            from: from.timestamp_micros(),
            to: to.timestamp_micros(),
        }
    }

    pub fn start(&self) -> DateTime<Utc> {
        DateTime::from_timestamp_micros(self.from).unwrap_or_default()
    }

    pub fn end(&self) -> DateTime<Utc> {
        DateTime::from_timestamp_micros(self.to).unwrap_or_default()
    }

    /// Moves each bound by its own number of seconds.
    pub fn shifted(&self, from_secs: f64, to_secs: f64) -> Self {
        Self {
            from: self.from + (from_secs * 1_000_000.0) as i64,
            to: self.to + (to_secs * 1_000_000.0) as i64,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Location {
    #[serde(default)]
    pub node: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchParam {
    /// Category key (`1_call`, `5_default`, ...) to its filter list or lookup object.
    #[serde(default)]
    pub search: Map<String, Value>,
    #[serde(default)]
    pub location: Location,
    #[serde(default, rename = "orlogic")]
    pub or_logic: bool,
    #[serde(default)]
    pub limit: Option<usize>,
}

/// A search or transaction request as handed over by the request layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchRequest {
    pub timestamp: TimeRange,
    #[serde(default)]
    pub param: SearchParam,
}

/// Identifier lookup carried by message-by-id requests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IdentifierLookup {
    Id(i64),
    Uuids(Vec<i64>),
}

impl SearchRequest {
    pub fn from_json(value: &Value) -> Result<Self, SearchError> {
        serde_json::from_value(value.clone()).map_err(|e| SearchError::InvalidRequest(e.to_string()))
    }

    pub fn nodes(&self) -> &[String] {
        &self.param.location.node
    }

    pub fn categories(&self) -> impl Iterator<Item = &String> {
        self.param.search.keys()
    }

    /// Filter elements of one category; malformed elements are logged and skipped.
    pub fn filter_elements(&self, category: &str) -> Vec<FilterElement> {
        let Some(list) = self.param.search.get(category) else {
            return Vec::new();
        };
        let Some(items) = list.as_array() else {
            warn!("Filter list for {} is not an array, ignoring it", category);
            return Vec::new();
        };
        items
            .iter()
            .filter_map(|item| match FilterElement::from_json(item) {
                Ok(element) => Some(element),
                Err(reason) => {
                    warn!("Skipping malformed filter element in {}: {}", category, reason);
                    None
                }
            })
            .collect()
    }

    /// `id` (single number) or `uuid` (list) of a category; neither is a request error.
    pub fn identifier_lookup(&self, category: &str) -> Result<IdentifierLookup, SearchError> {
        let obj = self
            .param
            .search
            .get(category)
            .and_then(Value::as_object)
            .ok_or_else(|| SearchError::MissingIdentifier(category.to_string()))?;

        if let Some(id) = obj.get("id").and_then(integer_of) {
            return Ok(IdentifierLookup::Id(id));
        }
        if let Some(Value::Array(items)) = obj.get("uuid") {
            let ids: Vec<i64> = items.iter().filter_map(integer_of).collect();
            if ids.len() != items.len() {
                warn!("Ignoring {} non-numeric uuid entries in {}", items.len() - ids.len(), category);
            }
            return Ok(IdentifierLookup::Uuids(ids));
        }
        Err(SearchError::MissingIdentifier(category.to_string()))
    }

    /// All `callid` values across categories, in request order.
    pub fn call_ids(&self) -> Vec<Value> {
        self.param
            .search
            .values()
            .filter_map(|v| v.get("callid"))
            .filter_map(Value::as_array)
            .flatten()
            .cloned()
            .collect()
    }
}

fn integer_of(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Value type a smart-input operand resolves to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueType {
    Text,
    Integer,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldMapping {
    pub target: String,
    pub value_type: ValueType,
}

/// Per-category operand → field/type table used by smart-input resolution.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FieldMappingTable {
    entries: HashMap<String, FieldMapping>,
}

impl FieldMappingTable {
    /// Builds the table from a list of `{id, type, field?}` objects; entries
    /// missing `id` or `type` are ignored. `field` defaults to `id`.
    pub fn from_json(value: &Value) -> Self {
        let mut entries = HashMap::new();
        for item in value.as_array().into_iter().flatten() {
            let (Some(id), Some(kind)) = (
                item.get("id").and_then(Value::as_str),
                item.get("type").and_then(Value::as_str),
            ) else {
                continue;
            };
            let target = item
                .get("field")
                .and_then(Value::as_str)
                .unwrap_or(id)
                .to_string();
            let value_type = match kind {
                "integer" | "number" => ValueType::Integer,
                _ => ValueType::Text,
            };
            entries.insert(id.to_string(), FieldMapping { target, value_type });
        }
        Self { entries }
    }

    pub fn insert<S: Into<String>>(&mut self, operand: S, mapping: FieldMapping) {
        self.entries.insert(operand.into(), mapping);
    }

    pub fn resolve(&self, operand: &str) -> Option<&FieldMapping> {
        self.entries.get(operand)
    }
}
