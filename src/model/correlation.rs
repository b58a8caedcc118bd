//! Correlation rules and transaction report selection.

use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::model::filter::TimeRange;

fn default_propagate_field() -> Option<String> {
    Some("sid".to_string())
}

/// One declared step of a transaction correlation chain.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct CorrelationRule {
    /// Dotted path read from already collected records.
    pub source_field: String,
    /// Payload category of the lookup table; `0` is the unsupported remote source.
    pub lookup_id: i64,
    #[serde(default = "default_profile")]
    pub lookup_profile: String,
    /// Field of the lookup table compared against the extracted values.
    pub lookup_field: String,
    /// `[from_offset, to_offset]` in seconds, added to the request window.
    #[serde(default)]
    pub lookup_range: Vec<f64>,
    #[serde(default)]
    pub like_search: bool,
    /// Inline script that appends to the extracted value list.
    #[serde(default, alias = "input_function_js")]
    pub input_function: Option<String>,
    /// Named script from the script store, appending like `input_function`.
    #[serde(default)]
    pub input_script: Option<String>,
    /// Named script run over the accumulated record set.
    #[serde(default)]
    pub output_script: Option<String>,
    /// Carry identifiers found by this rule into later rules.
    #[serde(default)]
    pub append_sid: bool,
    #[serde(default = "default_propagate_field")]
    pub propagate_field: Option<String>,
}

fn default_profile() -> String {
    "default".to_string()
}

impl CorrelationRule {
    /// `hep_proto_<id>_<profile>`
    pub fn table(&self) -> String {
        format!("hep_proto_{}_{}", self.lookup_id, self.lookup_profile)
    }

    /// Request window widened by the rule's offsets; missing offsets count as zero.
    pub fn window(&self, base: &TimeRange) -> TimeRange {
        let from = self.lookup_range.first().copied().unwrap_or(0.0);
        let to = self.lookup_range.get(1).copied().unwrap_or(0.0);
        base.shifted(from, to)
    }

    pub fn is_remote(&self) -> bool {
        self.lookup_id == 0
    }
}

/// Output rendering of a correlated transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReportType {
    #[default]
    Summary,
    Pcap,
    Text,
}

impl ReportType {
    pub fn from_code(code: i64) -> Self {
        match code {
            1 => ReportType::Pcap,
            2 => ReportType::Text,
            _ => ReportType::Summary,
        }
    }
}

impl FromStr for ReportType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "summary" | "0" => Ok(ReportType::Summary),
            "pcap" | "1" => Ok(ReportType::Pcap),
            "text" | "2" => Ok(ReportType::Text),
            other => Err(format!("unknown report type: {}", other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn rule_parses_with_js_alias() {
        let rule: CorrelationRule = serde_json::from_value(json!({
            "source_field": "data_header.callid",
            "lookup_id": 5,
            "lookup_profile": "default",
            "lookup_field": "sid",
            "lookup_range": [-30, 30],
            "input_function_js": "data"
        }))
        .unwrap();
        assert_eq!(rule.table(), "hep_proto_5_default");
        assert_eq!(rule.input_function.as_deref(), Some("data"));
        assert_eq!(rule.propagate_field.as_deref(), Some("sid"));
        assert!(!rule.like_search);
    }

    #[test]
    fn window_adds_offsets_to_both_bounds() {
        let rule = CorrelationRule {
            lookup_range: vec![-30.0, 30.0],
            ..Default::default()
        };
        let base = TimeRange::new(600_000_000, 1_200_000_000);
        assert_eq!(rule.window(&base), TimeRange::new(570_000_000, 1_230_000_000));
        let bare = CorrelationRule::default();
        assert_eq!(bare.window(&base), base);
    }

    #[test]
    fn report_type_codes() {
        assert_eq!(ReportType::from_code(1), ReportType::Pcap);
        assert_eq!(ReportType::from_code(9), ReportType::Summary);
        assert_eq!("text".parse::<ReportType>().unwrap(), ReportType::Text);
        assert!("xml".parse::<ReportType>().is_err());
    }
}
