use std::collections::BTreeMap;

use serde_json::Value;

/// Resolves a script name to its source text.
pub trait ScriptStore: Send + Sync {
    fn script(&self, name: &str) -> Option<String>;
}

/// Script store backed by the `[scripts]` configuration table.
#[derive(Debug, Clone, Default)]
pub struct InMemoryScriptStore {
    scripts: BTreeMap<String, String>,
}

impl InMemoryScriptStore {
    pub fn new(scripts: BTreeMap<String, String>) -> Self {
        Self { scripts }
    }

    pub fn insert<N: Into<String>, S: Into<String>>(&mut self, name: N, source: S) {
        self.scripts.insert(name.into(), source.into());
    }
}

impl ScriptStore for InMemoryScriptStore {
    fn script(&self, name: &str) -> Option<String> {
        self.scripts.get(name).map(|text| unquote(text))
    }
}

/// Stored scripts are sometimes saved as JSON string literals; those are
/// decoded before use.
pub fn unquote(text: &str) -> String {
    let trimmed = text.trim();
    if trimmed.starts_with('"') {
        if let Ok(Value::String(inner)) = serde_json::from_str::<Value>(trimmed) {
            return inner;
        }
    }
    text.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quoted_scripts_are_decoded() {
        let mut store = InMemoryScriptStore::default();
        store.insert("plain", "data");
        store.insert("quoted", r#""data.filter(|r| r.raw != \"\")""#);
        assert_eq!(store.script("plain").as_deref(), Some("data"));
        assert_eq!(store.script("quoted").as_deref(), Some(r#"data.filter(|r| r.raw != "")"#));
        assert_eq!(store.script("missing"), None);
        assert_eq!(unquote("\"broken"), "\"broken");
    }
}
