//! Backend-agnostic predicate tree and its SQLite rendering.

use std::fmt;

use crate::error_handling::types::StorageError;
use crate::model::record::FieldPath;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    NotEq,
    Lt,
    Gt,
    LtEq,
    GtEq,
    Like,
    NotLike,
    /// Case-insensitive pattern match.
    ILike,
    NotILike,
}

impl CompareOp {
    /// The negated form used when a value carries a leading `!=`.
    pub fn negate(self) -> Self {
        match self {
            CompareOp::Eq => CompareOp::NotEq,
            CompareOp::NotEq => CompareOp::Eq,
            CompareOp::Lt => CompareOp::GtEq,
            CompareOp::GtEq => CompareOp::Lt,
            CompareOp::Gt => CompareOp::LtEq,
            CompareOp::LtEq => CompareOp::Gt,
            CompareOp::Like => CompareOp::NotLike,
            CompareOp::NotLike => CompareOp::Like,
            CompareOp::ILike => CompareOp::NotILike,
            CompareOp::NotILike => CompareOp::ILike,
        }
    }

    pub fn is_pattern(self) -> bool {
        matches!(
            self,
            CompareOp::Like | CompareOp::NotLike | CompareOp::ILike | CompareOp::NotILike
        )
    }

    fn sql(self) -> &'static str {
        match self {
            CompareOp::Eq => "=",
            CompareOp::NotEq => "<>",
            CompareOp::Lt => "<",
            CompareOp::Gt => ">",
            CompareOp::LtEq => "<=",
            CompareOp::GtEq => ">=",
            CompareOp::Like | CompareOp::ILike => "LIKE",
            CompareOp::NotLike | CompareOp::NotILike => "NOT LIKE",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScalarValue {
    Text(String),
    Integer(i64),
}

impl fmt::Display for ScalarValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScalarValue::Text(s) => write!(f, "'{}'", s),
            ScalarValue::Integer(i) => write!(f, "{}", i),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Predicate {
    Compare {
        field: FieldPath,
        op: CompareOp,
        value: ScalarValue,
        cast_integer: bool,
    },
    InList {
        field: FieldPath,
        values: Vec<ScalarValue>,
        negated: bool,
    },
    /// Matches when any of the patterns matches.
    LikeAny {
        field: FieldPath,
        patterns: Vec<String>,
        negated: bool,
    },
    IsNull {
        field: FieldPath,
    },
    /// Operator-supplied SQL fragment, embedded verbatim.
    Raw(String),
    All(Vec<Predicate>),
    Any(Vec<Predicate>),
}

impl Predicate {
    pub fn compare(field: FieldPath, op: CompareOp, value: ScalarValue) -> Self {
        let cast_integer = matches!(value, ScalarValue::Integer(_));
        Predicate::Compare {
            field,
            op,
            value,
            cast_integer,
        }
    }

    /// Conjunction, flattening trivial cases.
    pub fn and(parts: Vec<Predicate>) -> Self {
        let mut parts: Vec<Predicate> = parts
            .into_iter()
            .filter(|p| !matches!(p, Predicate::All(inner) if inner.is_empty()))
            .collect();
        if parts.len() == 1 {
            parts.remove(0)
        } else {
            Predicate::All(parts)
        }
    }

    /// Disjunction, flattening trivial cases.
    pub fn or(mut parts: Vec<Predicate>) -> Self {
        if parts.len() == 1 {
            parts.remove(0)
        } else {
            Predicate::Any(parts)
        }
    }

    pub fn is_trivial(&self) -> bool {
        matches!(self, Predicate::All(inner) if inner.is_empty())
    }

    /// Renders to a parameterised SQLite fragment; identifiers are validated,
    /// values always travel as bind parameters.
    pub fn to_sql(&self) -> Result<SqlFragment, StorageError> {
        let mut out = SqlFragment::default();
        self.render(&mut out)?;
        Ok(out)
    }

    fn render(&self, out: &mut SqlFragment) -> Result<(), StorageError> {
        match self {
            Predicate::Compare {
                field,
                op,
                value,
                cast_integer,
            } => {
                let column = field_sql(field, *cast_integer)?;
                match op {
                    CompareOp::ILike | CompareOp::NotILike => {
                        out.sql.push_str(&format!("LOWER({}) {} LOWER(?)", column, op.sql()));
                    }
                    _ => out.sql.push_str(&format!("{} {} ?", column, op.sql())),
                }
                out.binds.push(value.clone());
            }
            Predicate::InList {
                field,
                values,
                negated,
            } => {
                if values.is_empty() {
                    out.sql.push_str(if *negated { "1=1" } else { "1=0" });
                    return Ok(());
                }
                let cast = values.iter().all(|v| matches!(v, ScalarValue::Integer(_)));
                let column = field_sql(field, cast)?;
                let marks = vec!["?"; values.len()].join(", ");
                let not = if *negated { "NOT " } else { "" };
                out.sql.push_str(&format!("{} {}IN ({})", column, not, marks));
                out.binds.extend(values.iter().cloned());
            }
            Predicate::LikeAny {
                field,
                patterns,
                negated,
            } => {
                if patterns.is_empty() {
                    out.sql.push_str(if *negated { "1=1" } else { "1=0" });
                    return Ok(());
                }
                let column = field_sql(field, false)?;
                let any = patterns
                    .iter()
                    .map(|_| format!("{} LIKE ?", column))
                    .collect::<Vec<_>>()
                    .join(" OR ");
                if *negated {
                    out.sql.push_str(&format!("NOT ({})", any));
                } else {
                    out.sql.push_str(&format!("({})", any));
                }
                out.binds
                    .extend(patterns.iter().map(|p| ScalarValue::Text(p.clone())));
            }
            Predicate::IsNull { field } => {
                let column = field_sql(field, false)?;
                out.sql.push_str(&format!("{} IS NULL", column));
            }
            Predicate::Raw(fragment) => {
                out.sql.push_str(&format!("({})", fragment));
            }
            Predicate::All(parts) => render_group(parts, " AND ", "1=1", out)?,
            Predicate::Any(parts) => render_group(parts, " OR ", "1=0", out)?,
        }
        Ok(())
    }
}

fn render_group(
    parts: &[Predicate],
    joiner: &str,
    empty: &str,
    out: &mut SqlFragment,
) -> Result<(), StorageError> {
    if parts.is_empty() {
        out.sql.push_str(empty);
        return Ok(());
    }
    out.sql.push('(');
    for (i, part) in parts.iter().enumerate() {
        if i > 0 {
            out.sql.push_str(joiner);
        }
        part.render(out)?;
    }
    out.sql.push(')');
    Ok(())
}

/// Rendered SQL plus the values to bind, in placeholder order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SqlFragment {
    pub sql: String,
    pub binds: Vec<ScalarValue>,
}

fn is_identifier(name: &str, allow_dash: bool) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || (allow_dash && c == '-'))
}

/// Validates a table or column name before it is spliced into SQL.
pub fn checked_identifier(name: &str) -> Result<&str, StorageError> {
    if is_identifier(name, false) {
        Ok(name)
    } else {
        Err(StorageError::InvalidIdentifier(name.to_string()))
    }
}

/// Checks that a field reference would render, so a bad name can be
/// dropped before it reaches a backend.
pub fn checked_field(field: &FieldPath) -> Result<(), StorageError> {
    field_sql(field, false).map(|_| ())
}

fn field_sql(field: &FieldPath, cast_integer: bool) -> Result<String, StorageError> {
    let base = match field {
        FieldPath::Column(name) => {
            let name = checked_identifier(name)?;
            return Ok(if cast_integer {
                format!("CAST({} AS INTEGER)", name)
            } else {
                name.to_string()
            });
        }
        FieldPath::Json { container, key } => {
            let container = checked_identifier(container)?;
            // JSON keys may carry dashes (`X-CID`), they are quoted in the path.
            if !is_identifier(key, true) {
                return Err(StorageError::InvalidIdentifier(key.clone()));
            }
            format!("json_extract({}, '$.\"{}\"')", container, key)
        }
    };
    if cast_integer {
        Ok(format!("CAST({} AS INTEGER)", base))
    } else {
        Ok(format!("CAST({} AS TEXT)", base))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn json(path: &str) -> FieldPath {
        FieldPath::parse(path)
    }

    #[test]
    fn json_fields_render_as_extraction() {
        let p = Predicate::compare(
            json("data_header.callid"),
            CompareOp::Eq,
            ScalarValue::Text("abc".into()),
        );
        let sql = p.to_sql().unwrap();
        assert_eq!(sql.sql, "CAST(json_extract(data_header, '$.\"callid\"') AS TEXT) = ?");
        assert!(!sql.sql.contains("data_header.callid"));
        assert_eq!(sql.binds, vec![ScalarValue::Text("abc".into())]);
    }

    #[test]
    fn integer_comparisons_cast() {
        let p = Predicate::compare(json("protocol_header.srcPort"), CompareOp::Eq, ScalarValue::Integer(5060));
        assert_eq!(
            p.to_sql().unwrap().sql,
            "CAST(json_extract(protocol_header, '$.\"srcPort\"') AS INTEGER) = ?"
        );
    }

    #[test]
    fn ilike_lowers_both_sides() {
        let p = Predicate::compare(FieldPath::parse("raw"), CompareOp::ILike, ScalarValue::Text("%INVITE%".into()));
        assert_eq!(p.to_sql().unwrap().sql, "LOWER(raw) LIKE LOWER(?)");
    }

    #[test]
    fn groups_render_with_parentheses() {
        let a = Predicate::compare(FieldPath::parse("sid"), CompareOp::Eq, ScalarValue::Text("a".into()));
        let b = Predicate::IsNull { field: json("data_header.x") };
        let c = Predicate::InList {
            field: FieldPath::parse("sid"),
            values: vec![ScalarValue::Text("b".into()), ScalarValue::Text("c".into())],
            negated: true,
        };
        let p = Predicate::Any(vec![Predicate::All(vec![a, b]), c]);
        let sql = p.to_sql().unwrap();
        assert_eq!(
            sql.sql,
            "((sid = ? AND CAST(json_extract(data_header, '$.\"x\"') AS TEXT) IS NULL) OR sid NOT IN (?, ?))"
        );
        assert_eq!(sql.binds.len(), 3);
    }

    #[test]
    fn empty_lists_are_constant() {
        let p = Predicate::InList { field: FieldPath::parse("sid"), values: vec![], negated: false };
        assert_eq!(p.to_sql().unwrap().sql, "1=0");
        assert_eq!(Predicate::All(vec![]).to_sql().unwrap().sql, "1=1");
    }

    #[test]
    fn bad_identifiers_are_rejected() {
        let p = Predicate::IsNull { field: FieldPath::parse("sid; DROP TABLE x") };
        assert!(matches!(p.to_sql(), Err(StorageError::InvalidIdentifier(_))));
        let p = Predicate::IsNull { field: FieldPath::parse("=") };
        assert!(p.to_sql().is_err());
        assert!(checked_identifier("hep_proto_1_call").is_ok());
        assert!(checked_identifier("hep-proto").is_err());
        assert!(checked_field(&FieldPath::parse("data_header.X-CID")).is_ok());
        assert!(checked_field(&FieldPath::parse("bad name")).is_err());
        assert!(checked_field(&FieldPath::parse("data_header.a.b")).is_err());
    }
}
