//! Edge condition expressions.
//!
//! Grammar: `expr := clause ("&&" clause)*` where a clause is `key`,
//! `key = value`, or `key != value`. Whitespace is insignificant except
//! inside value tokens. The empty expression is always true. Keys resolve
//! through a caller-supplied resolver so the evaluator stays decoupled from
//! outcome and context representations.

use crate::error::{PipelineError, Result};

/// Comparison operator in a clause.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    Eq,
    Ne,
}

/// One clause of a condition expression.
#[derive(Debug, Clone, PartialEq)]
pub struct Clause {
    pub key: String,
    /// `None` for a bare-key truthiness check.
    pub op: Option<Operator>,
    pub value: String,
}

/// A parsed condition: the conjunction of its clauses.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ConditionExpr {
    pub clauses: Vec<Clause>,
}

impl ConditionExpr {
    /// True when the expression has no clauses (always-true).
    pub fn is_empty(&self) -> bool {
        self.clauses.is_empty()
    }
}

/// Parse a condition expression. Empty (or all-whitespace) input parses to
/// the always-true expression.
pub fn parse_condition(source: &str) -> Result<ConditionExpr> {
    let source = source.trim();
    if source.is_empty() {
        return Ok(ConditionExpr::default());
    }
    let mut clauses = Vec::new();
    for raw in source.split("&&") {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(PipelineError::Validation(format!(
                "empty clause in condition '{source}'"
            )));
        }
        clauses.push(parse_clause(raw, source)?);
    }
    Ok(ConditionExpr { clauses })
}

fn parse_clause(raw: &str, source: &str) -> Result<Clause> {
    // `!=` must be checked before `=`.
    if let Some(idx) = raw.find("!=") {
        let key = raw[..idx].trim();
        let value = raw[idx + 2..].trim();
        if key.is_empty() {
            return Err(PipelineError::Validation(format!(
                "clause '{raw}' in condition '{source}' has no key"
            )));
        }
        return Ok(Clause {
            key: key.to_string(),
            op: Some(Operator::Ne),
            value: unquote(value),
        });
    }
    if let Some(idx) = raw.find('=') {
        let key = raw[..idx].trim();
        let value = raw[idx + 1..].trim();
        if key.is_empty() {
            return Err(PipelineError::Validation(format!(
                "clause '{raw}' in condition '{source}' has no key"
            )));
        }
        return Ok(Clause {
            key: key.to_string(),
            op: Some(Operator::Eq),
            value: unquote(value),
        });
    }
    if raw.contains(char::is_whitespace) {
        return Err(PipelineError::Validation(format!(
            "malformed clause '{raw}' in condition '{source}'"
        )));
    }
    Ok(Clause {
        key: raw.to_string(),
        op: None,
        value: String::new(),
    })
}

fn unquote(value: &str) -> String {
    let v = value.trim();
    if v.len() >= 2 && v.starts_with('"') && v.ends_with('"') {
        v[1..v.len() - 1].to_string()
    } else {
        v.to_string()
    }
}

/// Evaluate an expression against a key resolver. The resolver returns the
/// string form of a key's current value, or `None` when absent.
pub fn evaluate_condition<F>(expr: &ConditionExpr, resolve: F) -> bool
where
    F: Fn(&str) -> Option<String>,
{
    expr.clauses.iter().all(|clause| {
        let actual = resolve(&clause.key);
        match clause.op {
            None => match actual {
                // Bare key: present and not a falsy literal.
                Some(v) => !v.is_empty() && v != "false" && v != "0",
                None => false,
            },
            Some(Operator::Eq) => actual.as_deref() == Some(clause.value.as_str()),
            Some(Operator::Ne) => actual.as_deref() != Some(clause.value.as_str()),
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn resolver(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn test_empty_condition_is_true() {
        let expr = parse_condition("").unwrap();
        assert!(expr.is_empty());
        assert!(evaluate_condition(&expr, |_| None));
    }

    #[test]
    fn test_eq_and_ne() {
        let expr = parse_condition("outcome=success").unwrap();
        assert!(evaluate_condition(&expr, resolver(&[("outcome", "success")])));
        assert!(!evaluate_condition(&expr, resolver(&[("outcome", "fail")])));

        let expr = parse_condition("outcome != fail").unwrap();
        assert!(evaluate_condition(&expr, resolver(&[("outcome", "success")])));
        assert!(!evaluate_condition(&expr, resolver(&[("outcome", "fail")])));
    }

    #[test]
    fn test_conjunction() {
        let expr = parse_condition("outcome=success && context.approved=true").unwrap();
        assert_eq!(expr.clauses.len(), 2);
        assert!(evaluate_condition(
            &expr,
            resolver(&[("outcome", "success"), ("context.approved", "true")])
        ));
        assert!(!evaluate_condition(
            &expr,
            resolver(&[("outcome", "success"), ("context.approved", "false")])
        ));
    }

    #[test]
    fn test_bare_key_truthiness() {
        let expr = parse_condition("approved").unwrap();
        assert!(evaluate_condition(&expr, resolver(&[("approved", "true")])));
        assert!(evaluate_condition(&expr, resolver(&[("approved", "yes")])));
        assert!(!evaluate_condition(&expr, resolver(&[("approved", "false")])));
        assert!(!evaluate_condition(&expr, resolver(&[("approved", "0")])));
        assert!(!evaluate_condition(&expr, resolver(&[])));
    }

    #[test]
    fn test_quoted_values() {
        let expr = parse_condition(r#"preferred_label = "try again""#).unwrap();
        assert_eq!(expr.clauses[0].value, "try again");
    }

    #[test]
    fn test_missing_key_never_equals() {
        let expr = parse_condition("missing=x").unwrap();
        assert!(!evaluate_condition(&expr, |_| None));
        // But != succeeds when the key is absent.
        let expr = parse_condition("missing!=x").unwrap();
        assert!(evaluate_condition(&expr, |_| None));
    }

    #[test]
    fn test_malformed_conditions() {
        assert!(parse_condition("=x").is_err());
        assert!(parse_condition("a && ").is_err());
        assert!(parse_condition("two words").is_err());
    }
}
