use log::{debug, trace};
use rhai::module_resolvers::DummyModuleResolver;
use rhai::{Dynamic, Engine, Scope};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;

use crate::error_handling::types::ScriptError;
use crate::model::record::CapturedRecord;

/// Name under which scripts see their input.
pub const INPUT_VARIABLE: &str = "data";

const DEFAULT_MAX_OPERATIONS: u64 = 500_000;

/// Runs transform scripts in a fresh engine per call. Nothing a script
/// defines or mutates survives the call, and scripts only see the copy of
/// the data they were handed.
#[derive(Debug, Clone)]
pub struct ScriptSandbox {
    max_operations: u64,
}

impl Default for ScriptSandbox {
    fn default() -> Self {
        Self {
            max_operations: DEFAULT_MAX_OPERATIONS,
        }
    }
}

impl ScriptSandbox {
    pub fn new(max_operations: u64) -> Self {
        Self { max_operations }
    }

    fn engine(&self) -> Engine {
        let mut engine = Engine::new();
        engine.set_max_operations(self.max_operations);
        engine.set_max_call_levels(32);
        engine.set_max_expr_depths(64, 32);
        engine.set_max_string_size(1 << 20);
        engine.set_max_array_size(100_000);
        engine.set_max_map_size(10_000);
        engine.set_module_resolver(DummyModuleResolver::new());
        engine.register_fn("scriptPrintf", |value: Dynamic| {
            debug!("script: {}", value);
        });
        engine
    }

    fn run<I, O>(&self, script: &str, input: &I) -> Result<O, ScriptError>
    where
        I: Serialize,
        O: DeserializeOwned,
    {
        let engine = self.engine();
        let ast = engine
            .compile(script)
            .map_err(|e| ScriptError::Compile(e.to_string()))?;
        let data = rhai::serde::to_dynamic(input).map_err(|e| ScriptError::Serialize(e.to_string()))?;
        let mut scope = Scope::new();
        scope.push_dynamic(INPUT_VARIABLE, data);

        let result: Dynamic = engine
            .eval_ast_with_scope(&mut scope, &ast)
            .map_err(|e| ScriptError::Runtime(e.to_string()))?;
        trace!("script returned {}", result.type_name());
        if !result.is_array() {
            return Err(ScriptError::Shape(format!("expected an array, got {}", result.type_name())));
        }
        rhai::serde::from_dynamic(&result).map_err(|e| ScriptError::Shape(e.to_string()))
    }

    /// Runs an identifier script: `data` is the array of identifiers, the
    /// script's value must be an array of identifiers.
    pub fn transform_identifiers(&self, script: &str, identifiers: &[Value]) -> Result<Vec<Value>, ScriptError> {
        self.run(script, &identifiers)
    }

    /// Runs a record script: `data` is the array of records, the script's
    /// value must be an array of records of the same shape.
    pub fn transform_records(&self, script: &str, records: &[CapturedRecord]) -> Result<Vec<CapturedRecord>, ScriptError> {
        self.run(script, &records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use serde_json::json;

    fn records() -> Vec<CapturedRecord> {
        let base = Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap();
        ["INVITE sip:1@x", "BYE sip:1@x", "INVITE sip:2@x"]
            .iter()
            .enumerate()
            .map(|(i, raw)| {
                let mut r = CapturedRecord::new(i as i64 + 1, "s", base);
                r.raw = raw.to_string();
                r.protocol_header.insert("srcPort".into(), json!(5060));
                r
            })
            .collect()
    }

    #[test]
    fn identifiers_can_be_rewritten() {
        let sandbox = ScriptSandbox::default();
        let out = sandbox
            .transform_identifiers(
                r#"let out = []; for id in data { scriptPrintf(id); out.push(id + "_b2b-1"); } out"#,
                &[json!("abc"), json!("def")],
            )
            .unwrap();
        assert_eq!(out, vec![json!("abc_b2b-1"), json!("def_b2b-1")]);
    }

    #[test]
    fn records_can_be_filtered() {
        let sandbox = ScriptSandbox::default();
        let input = records();
        let out = sandbox
            .transform_records(r#"data.filter(|r| r.raw.starts_with("INVITE"))"#, &input)
            .unwrap();
        assert_eq!(out.len(), 2);
        assert_eq!(out[1].id, 3);
        assert_eq!(out[0].created_at, input[0].created_at);
        assert_eq!(out[0].protocol_header.get("srcPort"), Some(&json!(5060)));
    }

    #[test]
    fn failures_are_typed() {
        let sandbox = ScriptSandbox::default();
        let ids = [json!("a")];
        assert!(matches!(sandbox.transform_identifiers("let = ;", &ids), Err(ScriptError::Compile(_))));
        assert!(matches!(sandbox.transform_identifiers("undefined_fn(data)", &ids), Err(ScriptError::Runtime(_))));
        assert!(matches!(sandbox.transform_identifiers("42", &ids), Err(ScriptError::Shape(_))));
        assert!(matches!(
            sandbox.transform_records("[1, 2]", &records()),
            Err(ScriptError::Shape(_))
        ));
    }

    #[test]
    fn runaway_scripts_hit_the_operation_budget() {
        let sandbox = ScriptSandbox::new(10_000);
        let res = sandbox.transform_identifiers("loop { }", &[]);
        assert!(matches!(res, Err(ScriptError::Runtime(_))));
    }

    #[test]
    fn no_state_survives_between_runs() {
        let sandbox = ScriptSandbox::default();
        sandbox
            .transform_identifiers("let leaked = 1; data", &[json!("x")])
            .unwrap();
        let res = sandbox.transform_identifiers("[leaked]", &[]);
        assert!(matches!(res, Err(ScriptError::Runtime(_))));
    }
}
