//! Parser for the smart-input expression language.
//!
//! ```text
//! expression := [WHERE] condition { (AND | OR) condition }
//! condition  := operand operator value
//! operator   := = | != | <> | < | > | <= | >= | LIKE | NOT LIKE
//! value      := 'text' | "text" | bare-word
//! ```
//!
//! Operands are dotted identifiers (`data_header.from_user`). Keywords are
//! case-insensitive.

use crate::error_handling::types::SmartExpressionError;
use crate::query::predicate::CompareOp;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Logical {
    And,
    Or,
}

/// One parsed comparison; `logical` joins it to the next condition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Condition {
    pub operand: String,
    pub operator: CompareOp,
    pub value: String,
    pub logical: Option<Logical>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    Word(String),
    Quoted(String),
    Op(CompareOp),
}

impl Token {
    fn describe(&self) -> String {
        match self {
            Token::Word(w) => w.clone(),
            Token::Quoted(q) => format!("'{}'", q),
            Token::Op(op) => format!("{:?}", op),
        }
    }

    fn keyword(&self, kw: &str) -> bool {
        matches!(self, Token::Word(w) if w.eq_ignore_ascii_case(kw))
    }
}

fn tokenize(input: &str) -> Result<Vec<(usize, Token)>, SmartExpressionError> {
    let chars: Vec<char> = input.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        if c.is_whitespace() {
            i += 1;
            continue;
        }
        let start = i;
        match c {
            '\'' | '"' => {
                let quote = c;
                i += 1;
                let mut text = String::new();
                loop {
                    match chars.get(i) {
                        None => return Err(SmartExpressionError::UnterminatedString(start)),
                        // doubled quote is an escaped quote
                        Some(&q) if q == quote && chars.get(i + 1) == Some(&quote) => {
                            text.push(quote);
                            i += 2;
                        }
                        Some(&q) if q == quote => {
                            i += 1;
                            break;
                        }
                        Some(&other) => {
                            text.push(other);
                            i += 1;
                        }
                    }
                }
                tokens.push((start, Token::Quoted(text)));
            }
            '=' => {
                i += 1;
                tokens.push((start, Token::Op(CompareOp::Eq)));
            }
            '!' if chars.get(i + 1) == Some(&'=') => {
                i += 2;
                tokens.push((start, Token::Op(CompareOp::NotEq)));
            }
            '<' => {
                let op = match chars.get(i + 1) {
                    Some('=') => CompareOp::LtEq,
                    Some('>') => CompareOp::NotEq,
                    _ => CompareOp::Lt,
                };
                i += if op == CompareOp::Lt { 1 } else { 2 };
                tokens.push((start, Token::Op(op)));
            }
            '>' => {
                let op = if chars.get(i + 1) == Some(&'=') {
                    CompareOp::GtEq
                } else {
                    CompareOp::Gt
                };
                i += if op == CompareOp::Gt { 1 } else { 2 };
                tokens.push((start, Token::Op(op)));
            }
            _ => {
                let mut word = String::new();
                while let Some(&w) = chars.get(i) {
                    if w.is_whitespace() || matches!(w, '=' | '!' | '<' | '>' | '\'' | '"') {
                        break;
                    }
                    word.push(w);
                    i += 1;
                }
                if word.is_empty() {
                    return Err(SmartExpressionError::UnexpectedToken {
                        position: start,
                        found: c.to_string(),
                    });
                }
                tokens.push((start, Token::Word(word)));
            }
        }
    }
    Ok(tokens)
}

/// Parses an expression into its ordered condition list.
pub fn parse(input: &str) -> Result<Vec<Condition>, SmartExpressionError> {
    let tokens = tokenize(input)?;
    let mut pos = 0;
    if tokens.first().map(|(_, t)| t.keyword("WHERE")).unwrap_or(false) {
        pos = 1;
    }
    if pos >= tokens.len() {
        return Err(SmartExpressionError::Empty);
    }

    let mut conditions: Vec<Condition> = Vec::new();
    loop {
        let operand = match tokens.get(pos) {
            Some((_, Token::Word(w))) => w.clone(),
            Some((_, Token::Quoted(q))) => q.clone(),
            Some((p, t)) => {
                return Err(SmartExpressionError::UnexpectedToken {
                    position: *p,
                    found: t.describe(),
                })
            }
            None => return Err(SmartExpressionError::UnexpectedEnd("operand".into())),
        };
        pos += 1;

        let operator = match tokens.get(pos) {
            Some((_, Token::Op(op))) => {
                pos += 1;
                *op
            }
            Some((_, t)) if t.keyword("LIKE") => {
                pos += 1;
                CompareOp::Like
            }
            Some((p, t)) if t.keyword("NOT") => match tokens.get(pos + 1) {
                Some((_, next)) if next.keyword("LIKE") => {
                    pos += 2;
                    CompareOp::NotLike
                }
                _ => {
                    return Err(SmartExpressionError::UnexpectedToken {
                        position: *p,
                        found: t.describe(),
                    })
                }
            },
            Some((p, t)) => {
                return Err(SmartExpressionError::UnexpectedToken {
                    position: *p,
                    found: t.describe(),
                })
            }
            None => return Err(SmartExpressionError::UnexpectedEnd("operator".into())),
        };

        let value = match tokens.get(pos) {
            Some((_, Token::Word(w))) | Some((_, Token::Quoted(w))) => w.clone(),
            Some((p, t)) => {
                return Err(SmartExpressionError::UnexpectedToken {
                    position: *p,
                    found: t.describe(),
                })
            }
            None => return Err(SmartExpressionError::UnexpectedEnd("value".into())),
        };
        pos += 1;

        let logical = match tokens.get(pos) {
            None => None,
            Some((_, t)) if t.keyword("AND") => Some(Logical::And),
            Some((_, t)) if t.keyword("OR") => Some(Logical::Or),
            Some((p, t)) => {
                return Err(SmartExpressionError::UnexpectedToken {
                    position: *p,
                    found: t.describe(),
                })
            }
        };
        conditions.push(Condition {
            operand,
            operator,
            value,
            logical,
        });
        match logical {
            None => break,
            Some(_) => {
                pos += 1;
                if pos >= tokens.len() {
                    return Err(SmartExpressionError::UnexpectedEnd("condition".into()));
                }
            }
        }
    }
    Ok(conditions)
}
