//! Matcher expression compiler.
//!
//! Roles select nodes with a small symbolic expression language over
//! the node's tag dictionary:
//!
//! ```text
//! (and E1 E2 …)    conjunction, at least one operand
//! (or  E1 E2 …)    disjunction, at least one operand
//! (not E)          negation, exactly one operand
//! (eq  A1 A2 …)    all accessors yield equal values, at least one
//! ```
//!
//! Accessors inside `eq`: a keyword `:k` reads tag `k` (absent tags
//! read as none), a string literal is itself, and `nil` is none. A
//! missing tag therefore equals only `nil` or another missing tag.
//!
//! Expressions are compiled once per role into a [`Matcher`] tree and
//! evaluated against each node's tags. Compile errors drop the role,
//! never the engine.

use crate::edn::Value;
use indexmap::IndexMap;
use thiserror::Error;

/// Matcher compile error.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MatcherError {
    /// The expression node is not a list form.
    #[error("matcher form must be a list, got {kind}")]
    NotAList { kind: &'static str },

    /// The list does not start with an operator symbol.
    #[error("matcher form must start with an operator symbol")]
    MissingOperator,

    /// The leading symbol is not a known operator.
    #[error("unknown matcher operator '{op}'")]
    UnknownOperator { op: String },

    /// `and`, `or`, or `eq` was given no operands.
    #[error("({op}) requires at least one operand")]
    MissingOperands { op: &'static str },

    /// `not` was given a number of operands other than one.
    #[error("(not …) takes exactly one operand, got {count}")]
    NotArity { count: usize },

    /// An `eq` operand is not a keyword, string, or nil.
    #[error("eq accessor must be a keyword, string, or nil, got {kind}")]
    BadAccessor { kind: &'static str },
}

/// A compiled matcher predicate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Matcher {
    /// All sub-matchers accept.
    And(Vec<Matcher>),
    /// Any sub-matcher accepts.
    Or(Vec<Matcher>),
    /// The sub-matcher rejects.
    Not(Box<Matcher>),
    /// All accessors resolve to equal values.
    Eq(Vec<Accessor>),
}

/// An `eq` operand.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Accessor {
    /// Read a tag by name; absent reads as none.
    Tag(String),
    /// A literal string.
    Literal(String),
    /// Always none.
    Nil,
}

impl Accessor {
    fn resolve<'a>(&'a self, tags: &'a IndexMap<String, String>) -> Option<&'a str> {
        match self {
            Self::Tag(name) => tags.get(name).map(String::as_str),
            Self::Literal(s) => Some(s),
            Self::Nil => None,
        }
    }
}

/// Compile a symbolic expression into a matcher.
pub fn compile(expr: &Value) -> Result<Matcher, MatcherError> {
    let items = match expr {
        Value::List(items) => items,
        other => {
            return Err(MatcherError::NotAList {
                kind: other.kind(),
            })
        }
    };
    let (head, operands) = match items.split_first() {
        Some((Value::Symbol(op), rest)) => (op.as_str(), rest),
        _ => return Err(MatcherError::MissingOperator),
    };
    match head {
        "and" => Ok(Matcher::And(compile_operands("and", operands)?)),
        "or" => Ok(Matcher::Or(compile_operands("or", operands)?)),
        "not" => {
            if operands.len() != 1 {
                return Err(MatcherError::NotArity {
                    count: operands.len(),
                });
            }
            Ok(Matcher::Not(Box::new(compile(&operands[0])?)))
        }
        "eq" => {
            if operands.is_empty() {
                return Err(MatcherError::MissingOperands { op: "eq" });
            }
            let accessors = operands
                .iter()
                .map(|operand| match operand {
                    Value::Keyword(k) => Ok(Accessor::Tag(k.clone())),
                    Value::String(s) => Ok(Accessor::Literal(s.clone())),
                    Value::Nil => Ok(Accessor::Nil),
                    other => Err(MatcherError::BadAccessor {
                        kind: other.kind(),
                    }),
                })
                .collect::<Result<Vec<_>, _>>()?;
            Ok(Matcher::Eq(accessors))
        }
        op => Err(MatcherError::UnknownOperator { op: op.to_string() }),
    }
}

fn compile_operands(op: &'static str, operands: &[Value]) -> Result<Vec<Matcher>, MatcherError> {
    if operands.is_empty() {
        return Err(MatcherError::MissingOperands { op });
    }
    operands.iter().map(compile).collect()
}

impl Matcher {
    /// Evaluate the predicate against a node's tags.
    pub fn eval(&self, tags: &IndexMap<String, String>) -> bool {
        match self {
            Self::And(subs) => subs.iter().all(|m| m.eval(tags)),
            Self::Or(subs) => subs.iter().any(|m| m.eval(tags)),
            Self::Not(sub) => !sub.eval(tags),
            Self::Eq(accessors) => {
                let mut resolved = accessors.iter().map(|a| a.resolve(tags));
                match resolved.next() {
                    None => true,
                    Some(first) => resolved.all(|v| v == first),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::edn::parse;

    fn compiled(text: &str) -> Matcher {
        compile(&parse(text).unwrap()).unwrap()
    }

    fn tags(pairs: &[(&str, &str)]) -> IndexMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn eq_against_literal() {
        let m = compiled("(eq :dc \"eu\")");
        assert!(m.eval(&tags(&[("dc", "eu")])));
        assert!(!m.eval(&tags(&[("dc", "us")])));
        assert!(!m.eval(&tags(&[])));
    }

    #[test]
    fn eq_between_tags() {
        let m = compiled("(eq :k1 :k2)");
        assert!(m.eval(&tags(&[("k1", "a"), ("k2", "a")])));
        assert!(!m.eval(&tags(&[("k1", "a"), ("k2", "b")])));
        // One side missing resolves to none, which a present tag never equals.
        assert!(!m.eval(&tags(&[("k1", "a")])));
    }

    #[test]
    fn eq_single_operand_is_vacuously_true() {
        let m = compiled("(eq :anything)");
        assert!(m.eval(&tags(&[])));
    }

    #[test]
    fn missing_tag_equals_nil() {
        let m = compiled("(eq :absent nil)");
        assert!(m.eval(&tags(&[("other", "x")])));
        assert!(!m.eval(&tags(&[("absent", "x")])));
    }

    #[test]
    fn not_inverts() {
        let m = compiled("(not (eq :role \"web\"))");
        assert!(m.eval(&tags(&[("role", "db")])));
        assert!(!m.eval(&tags(&[("role", "web")])));
    }

    #[test]
    fn and_or_combinators() {
        let m = compiled("(and (eq :dc \"eu\") (or (eq :role \"web\") (eq :role \"db\")))");
        assert!(m.eval(&tags(&[("dc", "eu"), ("role", "db")])));
        assert!(!m.eval(&tags(&[("dc", "us"), ("role", "db")])));
        assert!(!m.eval(&tags(&[("dc", "eu"), ("role", "cache")])));
    }

    #[test]
    fn single_operand_and_is_identity() {
        let direct = compiled("(eq :dc \"eu\")");
        let wrapped = compiled("(and (eq :dc \"eu\"))");
        for t in [tags(&[("dc", "eu")]), tags(&[("dc", "us")]), tags(&[])] {
            assert_eq!(direct.eval(&t), wrapped.eval(&t));
        }
    }

    #[test]
    fn empty_combinators_rejected() {
        assert_eq!(
            compile(&parse("(and)").unwrap()),
            Err(MatcherError::MissingOperands { op: "and" })
        );
        assert_eq!(
            compile(&parse("(or)").unwrap()),
            Err(MatcherError::MissingOperands { op: "or" })
        );
        assert_eq!(
            compile(&parse("(eq)").unwrap()),
            Err(MatcherError::MissingOperands { op: "eq" })
        );
    }

    #[test]
    fn arity_and_shape_errors() {
        assert!(matches!(
            compile(&parse("(not (eq :a \"x\") (eq :b \"y\"))").unwrap()),
            Err(MatcherError::NotArity { count: 2 })
        ));
        assert!(matches!(
            compile(&parse(":dc").unwrap()),
            Err(MatcherError::NotAList { .. })
        ));
        assert!(matches!(
            compile(&parse("(\"eq\" :a)").unwrap()),
            Err(MatcherError::MissingOperator)
        ));
        assert!(matches!(
            compile(&parse("(xor :a :b)").unwrap()),
            Err(MatcherError::UnknownOperator { .. })
        ));
        assert!(matches!(
            compile(&parse("(eq (eq :a) :b)").unwrap()),
            Err(MatcherError::BadAccessor { .. })
        ));
    }
}
