use std::collections::HashSet;

use log::{debug, info, warn};
use serde_json::Value;

use crate::error_handling::types::CorrelationError;
use crate::fanout::executor::{FanoutQuery, NodeFailurePolicy, NodeFanoutExecutor};
use crate::model::context::CallerContext;
use crate::model::correlation::CorrelationRule;
use crate::model::filter::TimeRange;
use crate::model::record::{as_text, CapturedRecord, FieldPath};
use crate::query::predicate::{Predicate, ScalarValue};
use crate::scripting::sandbox::ScriptSandbox;
use crate::scripting::script_store::ScriptStore;

/// Correlation lookups are not row-limited.
pub const LOOKUP_LIMIT: usize = usize::MAX;

/// Records gathered by a correlation run.
#[derive(Debug, Clone, Default)]
pub struct CorrelationOutcome {
    pub records: Vec<CapturedRecord>,
    /// Number of lookup fanouts issued, at most one per rule.
    pub queries_issued: usize,
}

/// Insertion-ordered set of scalar JSON values.
#[derive(Debug, Default)]
struct ValueSet {
    seen: HashSet<String>,
    values: Vec<Value>,
}

impl ValueSet {
    fn push(&mut self, value: Value) {
        if self.seen.insert(value.to_string()) {
            self.values.push(value);
        }
    }

    fn extend<I: IntoIterator<Item = Value>>(&mut self, values: I) {
        for v in values {
            self.push(v);
        }
    }

    fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

fn scalar(value: &Value) -> Option<ScalarValue> {
    match value {
        Value::Number(n) if n.is_i64() => n.as_i64().map(ScalarValue::Integer),
        other => as_text(other).map(ScalarValue::Text),
    }
}

/// Walks a declared rule chain once, growing the record set with every
/// lookup.
pub struct TransactionCorrelator<'a> {
    executor: &'a NodeFanoutExecutor,
    sandbox: &'a ScriptSandbox,
    scripts: &'a dyn ScriptStore,
}

impl<'a> TransactionCorrelator<'a> {
    pub fn new(executor: &'a NodeFanoutExecutor, sandbox: &'a ScriptSandbox, scripts: &'a dyn ScriptStore) -> Self {
        Self {
            executor,
            sandbox,
            scripts,
        }
    }

    /// Rejects rule chains that cannot run, before anything is queried.
    pub fn validate(rules: &[CorrelationRule]) -> Result<(), CorrelationError> {
        for (index, rule) in rules.iter().enumerate() {
            if rule.is_remote() {
                return Err(CorrelationError::UnsupportedLookup {
                    rule: index,
                    source_field: rule.source_field.clone(),
                });
            }
            if rule.source_field.trim().is_empty() || rule.lookup_field.trim().is_empty() {
                return Err(CorrelationError::InvalidRule {
                    rule: index,
                    reason: "source_field and lookup_field are required".into(),
                });
            }
            if rule.lookup_range.len() == 1 || rule.lookup_range.len() > 2 {
                return Err(CorrelationError::InvalidRule {
                    rule: index,
                    reason: format!("lookup_range needs two offsets, got {}", rule.lookup_range.len()),
                });
            }
        }
        Ok(())
    }

    pub fn correlate(
        &self,
        seed: Vec<CapturedRecord>,
        rules: &[CorrelationRule],
        window: &TimeRange,
        allowlist: &[String],
        caller: &CallerContext,
    ) -> Result<CorrelationOutcome, CorrelationError> {
        Self::validate(rules)?;
        let rid = caller.request_id;
        let mut accumulated = seed;
        let mut found_identifiers = ValueSet::default();
        let mut queries_issued = 0;

        for (index, rule) in rules.iter().enumerate() {
            let source = FieldPath::parse(&rule.source_field);
            let mut values = ValueSet::default();
            values.extend(accumulated.iter().filter_map(|r| r.field(&source)));

            if values.is_empty() {
                debug!("[{}] Rule #{} ({}) found no source values, skipping", rid, index, rule.source_field);
                continue;
            }

            if let Some(inline) = rule.input_function.as_deref() {
                self.augment(&mut values, inline, index, caller);
            }
            if let Some(name) = rule.input_script.as_deref() {
                match self.scripts.script(name) {
                    Some(source_text) => self.augment(&mut values, &source_text, index, caller),
                    None => warn!("[{}] Rule #{} input script '{}' not found", rid, index, name),
                }
            }
            values.extend(found_identifiers.values.iter().cloned());

            let lookup_field = FieldPath::parse(&rule.lookup_field);
            let predicate = if rule.like_search {
                Predicate::LikeAny {
                    field: lookup_field,
                    patterns: values.values.iter().filter_map(as_text).collect(),
                    negated: false,
                }
            } else {
                Predicate::InList {
                    field: lookup_field,
                    values: values.values.iter().filter_map(scalar).collect(),
                    negated: false,
                }
            };
            let query = FanoutQuery {
                table: rule.table(),
                profile: format!("{}_{}", rule.lookup_id, rule.lookup_profile),
                time_range: rule.window(window),
                predicate,
                limit: LOOKUP_LIMIT,
                allowlist: allowlist.to_vec(),
            };
            queries_issued += 1;
            let found = self.executor.execute(&query, caller, NodeFailurePolicy::Partial)?;
            info!(
                "[{}] Rule #{} {} -> {}: {} values, {} rows",
                rid,
                index,
                rule.source_field,
                query.table,
                values.values.len(),
                found.len()
            );

            if rule.append_sid {
                if let Some(field) = rule.propagate_field.as_deref() {
                    let path = FieldPath::parse(field);
                    found_identifiers.extend(found.iter().filter_map(|r| r.field(&path)));
                }
            }
            accumulated.extend(found);

            if let Some(name) = rule.output_script.as_deref() {
                match self.scripts.script(name) {
                    Some(source_text) => match self.sandbox.transform_records(&source_text, &accumulated) {
                        Ok(replaced) => {
                            debug!("[{}] Output script '{}' kept {} of {} rows", rid, name, replaced.len(), accumulated.len());
                            accumulated = replaced;
                        }
                        Err(e) => warn!("[{}] Output script '{}' failed, keeping rows: {}", rid, name, e),
                    },
                    None => warn!("[{}] Rule #{} output script '{}' not found", rid, index, name),
                }
            }
        }

        Ok(CorrelationOutcome {
            records: accumulated,
            queries_issued,
        })
    }

    fn augment(&self, values: &mut ValueSet, script: &str, index: usize, caller: &CallerContext) {
        match self.sandbox.transform_identifiers(script, &values.values) {
            Ok(extra) => {
                debug!("[{}] Rule #{} input script added {} values", caller.request_id, index, extra.len());
                values.extend(extra.into_iter().filter(|v| as_text(v).is_some()));
            }
            Err(e) => warn!("[{}] Rule #{} input script failed, values unchanged: {}", caller.request_id, index, e),
        }
    }
}
