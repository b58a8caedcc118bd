//! Filter list to predicate compilation.

use log::{debug, warn};

use crate::model::filter::{FieldMappingTable, FilterElement, FilterType, ValueType};
use crate::model::record::FieldPath;
use crate::query::predicate::{checked_field, CompareOp, Predicate, ScalarValue};
use crate::query::sanitize::{sanitize, sanitize_all};
use crate::query::smart_expression::{self, Condition, Logical};

pub const DEFAULT_LIMIT: usize = 200;

const SMART_INPUT: &str = "smartinput";
const EMPTY_SENTINEL: &str = "isEmpty";
const NULL_SENTINEL: &str = "isNull";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Join {
    And,
    Or,
}

/// Result of compiling one category's filter list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompiledFilter {
    /// Clauses in input order, each with the join to its predecessor.
    pub clauses: Vec<(Join, Predicate)>,
    pub limit: usize,
}

impl Default for CompiledFilter {
    fn default() -> Self {
        Self {
            clauses: Vec::new(),
            limit: DEFAULT_LIMIT,
        }
    }
}

impl CompiledFilter {
    /// Folds the clause list with AND binding tighter than OR.
    pub fn to_predicate(&self) -> Predicate {
        let mut groups: Vec<Predicate> = Vec::new();
        let mut current: Vec<Predicate> = Vec::new();
        for (join, predicate) in &self.clauses {
            if *join == Join::Or && !current.is_empty() {
                groups.push(Predicate::and(std::mem::take(&mut current)));
            }
            current.push(predicate.clone());
        }
        if !current.is_empty() {
            groups.push(Predicate::and(current));
        }
        match groups.len() {
            0 => Predicate::All(Vec::new()),
            _ => Predicate::or(groups),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.clauses.is_empty()
    }
}

/// Compiles an ordered filter list. Never fails: elements that cannot be
/// compiled are logged and skipped.
pub fn compile(elements: &[FilterElement], or_logic: bool, mapping: &FieldMappingTable) -> CompiledFilter {
    let mut compiled = CompiledFilter::default();

    for (index, element) in elements.iter().enumerate() {
        let mut value = element.value.as_str();
        let mut join = if or_logic { Join::Or } else { Join::And };

        if element.name == SMART_INPUT {
            if let Some(predicate) = compile_smart(value, mapping) {
                compiled.clauses.push((Join::And, predicate));
            }
            continue;
        }

        if let Some(rest) = value.strip_prefix("||") {
            value = rest;
            if index > 0 {
                join = Join::Or;
            }
        }
        let mut negated = false;
        if let Some(rest) = value.strip_prefix("!=") {
            value = rest;
            negated = true;
        }

        if element.name == "limit" || element.kind == FilterType::Limit {
            match value.trim().parse::<usize>() {
                Ok(limit) => compiled.limit = limit,
                Err(_) => warn!("Ignoring non-numeric limit value '{}'", value),
            }
            continue;
        }

        if let Some(predicate) = compile_element(element, value, negated) {
            debug!("Compiled filter element {} -> {:?}", element.name, predicate);
            compiled.clauses.push((join, predicate));
        }
    }
    compiled
}

fn eq_op(negated: bool) -> CompareOp {
    if negated {
        CompareOp::NotEq
    } else {
        CompareOp::Eq
    }
}

fn like_op(negated: bool) -> CompareOp {
    if negated {
        CompareOp::NotLike
    } else {
        CompareOp::Like
    }
}

fn parse_integer(name: &str, value: &str) -> Option<i64> {
    match value.trim().parse::<i64>() {
        Ok(v) => Some(v),
        Err(_) => {
            warn!("Skipping integer filter {} with non-numeric value '{}'", name, value);
            None
        }
    }
}

fn compile_element(element: &FilterElement, value: &str, negated: bool) -> Option<Predicate> {
    let field = FieldPath::parse(&element.name);
    if let Err(e) = checked_field(&field) {
        warn!("Skipping filter element with unusable field: {}", e);
        return None;
    }

    if element.name == "raw" || element.kind == FilterType::Raw {
        let op = if negated { CompareOp::NotILike } else { CompareOp::ILike };
        return Some(Predicate::compare(field, op, ScalarValue::Text(sanitize(value))));
    }

    if element.kind == FilterType::Integer {
        let number = parse_integer(&element.name, value)?;
        return Some(Predicate::compare(field, eq_op(negated), ScalarValue::Integer(number)));
    }

    let has_wildcard = value.contains('%');
    let alternatives: Vec<String> = if value.contains(';') {
        sanitize_all(&value.split(';').collect::<Vec<_>>())
    } else {
        vec![sanitize(value)]
    };

    if has_wildcard && alternatives.len() > 1 {
        return Some(Predicate::LikeAny {
            field,
            patterns: alternatives,
            negated,
        });
    }
    if has_wildcard {
        return Some(Predicate::compare(field, like_op(negated), ScalarValue::Text(sanitize(value))));
    }
    if alternatives.len() > 1 {
        return Some(Predicate::InList {
            field,
            values: alternatives.into_iter().map(ScalarValue::Text).collect(),
            negated,
        });
    }

    let single = alternatives.into_iter().next().unwrap_or_default();
    if single == EMPTY_SENTINEL {
        return Some(Predicate::compare(field, eq_op(negated), ScalarValue::Text(String::new())));
    }
    if single == NULL_SENTINEL && !negated {
        return Some(Predicate::IsNull { field });
    }
    if field.is_json() {
        Some(Predicate::compare(field, eq_op(negated), ScalarValue::Text(single)))
    } else {
        Some(Predicate::InList {
            field,
            values: vec![ScalarValue::Text(single)],
            negated,
        })
    }
}

/// Parses and resolves a smart-input value. Returns `None` (after logging)
/// for malformed expressions.
fn compile_smart(expression: &str, mapping: &FieldMappingTable) -> Option<Predicate> {
    let conditions = match smart_expression::parse(expression) {
        Ok(conditions) => conditions,
        Err(e) => {
            warn!("Ignoring malformed smart expression '{}': {}", expression, e);
            return None;
        }
    };
    let pattern_value = expression.contains('%');

    // Every OR opens a group that stays open until the end of the list.
    let mut open_groups: Vec<Vec<Predicate>> = vec![Vec::new()];
    for condition in &conditions {
        if let Some(predicate) = smart_condition(condition, mapping, pattern_value) {
            if let Some(group) = open_groups.last_mut() {
                group.push(predicate);
            }
        }
        // A skipped condition still closes its group.
        if condition.logical == Some(Logical::Or) {
            open_groups.push(Vec::new());
        }
    }

    let mut inner: Option<Predicate> = None;
    while let Some(group) = open_groups.pop() {
        let mut parts = group;
        let run = if parts.is_empty() {
            None
        } else if parts.len() == 1 {
            Some(parts.remove(0))
        } else {
            Some(Predicate::All(parts))
        };
        inner = match (run, inner.take()) {
            (Some(run), Some(nested)) => Some(Predicate::Any(vec![run, nested])),
            (Some(run), None) => Some(run),
            (None, nested) => nested,
        };
    }
    inner
}

fn smart_condition(condition: &Condition, mapping: &FieldMappingTable, pattern_value: bool) -> Option<Predicate> {
    let (target, value_type) = match mapping.resolve(&condition.operand) {
        Some(m) => (m.target.clone(), m.value_type),
        None => (condition.operand.clone(), ValueType::Text),
    };
    let field = FieldPath::parse(&target);
    if let Err(e) = checked_field(&field) {
        warn!("Skipping smart condition with unusable field: {}", e);
        return None;
    }
    let mut op = condition.operator;

    if value_type == ValueType::Integer {
        let number = parse_integer(&target, &condition.value)?;
        return Some(Predicate::compare(field, op, ScalarValue::Integer(number)));
    }

    if field.is_json() {
        if pattern_value && !op.is_pattern() {
            op = like_op(op == CompareOp::NotEq);
        }
        return Some(Predicate::compare(field, op, ScalarValue::Text(sanitize(&condition.value))));
    }

    if condition.value == EMPTY_SENTINEL {
        return Some(Predicate::compare(field, op, ScalarValue::Text(String::new())));
    }
    // Compares the field name, not the operator, against "=".
    if condition.value == NULL_SENTINEL && target == "=" {
        return Some(Predicate::IsNull { field });
    }
    Some(Predicate::compare(field, op, ScalarValue::Text(sanitize(&condition.value))))
}
