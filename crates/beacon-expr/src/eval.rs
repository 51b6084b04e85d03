//! Evaluation against a label map

use std::collections::{BTreeMap, HashMap};

use crate::ast::{BinaryOp, Expr, Literal};
use crate::error::ExprError;
use crate::parser::Expression;

/// Read-only label lookup
pub trait Labels {
    fn label(&self, name: &str) -> Option<&str>;
}

impl Labels for BTreeMap<String, String> {
    fn label(&self, name: &str) -> Option<&str> {
        self.get(name).map(String::as_str)
    }
}

impl Labels for HashMap<String, String> {
    fn label(&self, name: &str) -> Option<&str> {
        self.get(name).map(String::as_str)
    }
}

impl<L: Labels + ?Sized> Labels for &L {
    fn label(&self, name: &str) -> Option<&str> {
        (**self).label(name)
    }
}

/// Runtime value
#[derive(Debug, Clone, PartialEq)]
pub enum Value<'a> {
    /// A label that is not present. Never equal to anything.
    Missing,
    Str(&'a str),
    Number(f64),
    Bool(bool),
    List(Vec<Value<'a>>),
}

impl Value<'_> {
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Missing => "missing",
            Value::Str(_) => "string",
            Value::Number(_) => "number",
            Value::Bool(_) => "bool",
            Value::List(_) => "list",
        }
    }
}

impl Expression {
    /// Evaluate to a boolean, or report why it could not be
    pub fn evaluate<L: Labels + ?Sized>(&self, labels: &L) -> Result<bool, ExprError> {
        match eval(self.ast(), labels)? {
            Value::Bool(b) => Ok(b),
            other => Err(ExprError::NotBoolean(other.type_name())),
        }
    }

    /// Evaluate, folding every error into `false`
    pub fn matches<L: Labels + ?Sized>(&self, labels: &L) -> bool {
        self.evaluate(labels).unwrap_or(false)
    }
}

fn eval<'a, L: Labels + ?Sized>(expr: &'a Expr, labels: &'a L) -> Result<Value<'a>, ExprError> {
    match expr {
        Expr::Literal(Literal::Str(s)) => Ok(Value::Str(s)),
        Expr::Literal(Literal::Number(n)) => Ok(Value::Number(*n)),
        Expr::Literal(Literal::Bool(b)) => Ok(Value::Bool(*b)),
        Expr::List(items) => items
            .iter()
            .map(|item| eval(item, labels))
            .collect::<Result<Vec<_>, _>>()
            .map(Value::List),
        Expr::Key(name) => Ok(labels.label(name).map_or(Value::Missing, Value::Str)),
        Expr::Not(inner) => match eval(inner, labels)? {
            Value::Bool(b) => Ok(Value::Bool(!b)),
            other => Err(ExprError::TypeMismatch {
                op: "!",
                left: other.type_name(),
                right: "none",
            }),
        },
        Expr::Binary { op, left, right } => eval_binary(*op, left, right, labels),
    }
}

fn eval_binary<'a, L: Labels + ?Sized>(
    op: BinaryOp,
    left: &'a Expr,
    right: &'a Expr,
    labels: &'a L,
) -> Result<Value<'a>, ExprError> {
    let result = match op {
        // `&&` and `||` skip the right side once the left decides
        BinaryOp::And => as_bool(op, eval(left, labels)?)? && as_bool(op, eval(right, labels)?)?,
        BinaryOp::Or => as_bool(op, eval(left, labels)?)? || as_bool(op, eval(right, labels)?)?,
        BinaryOp::Eq => {
            let (lhs, rhs) = operands(left, right, labels)?;
            equals(&lhs, &rhs, op)?
        }
        BinaryOp::NotEq => {
            let (lhs, rhs) = operands(left, right, labels)?;
            !equals(&lhs, &rhs, op)?
        }
        BinaryOp::In => {
            let (lhs, rhs) = operands(left, right, labels)?;
            member_of(&lhs, &rhs, op)?
        }
        BinaryOp::NotIn => {
            let (lhs, rhs) = operands(left, right, labels)?;
            !member_of(&lhs, &rhs, op)?
        }
        BinaryOp::Contains | BinaryOp::StartsWith | BinaryOp::EndsWith => {
            let (lhs, rhs) = operands(left, right, labels)?;
            match (&lhs, &rhs) {
                (Value::Missing, Value::Str(_)) => false,
                (Value::Str(haystack), Value::Str(needle)) => match op {
                    BinaryOp::Contains => haystack.contains(needle),
                    BinaryOp::StartsWith => haystack.starts_with(needle),
                    _ => haystack.ends_with(needle),
                },
                _ => return Err(mismatch(op, &lhs, &rhs)),
            }
        }
    };
    Ok(Value::Bool(result))
}

fn operands<'a, L: Labels + ?Sized>(
    left: &'a Expr,
    right: &'a Expr,
    labels: &'a L,
) -> Result<(Value<'a>, Value<'a>), ExprError> {
    Ok((eval(left, labels)?, eval(right, labels)?))
}

fn as_bool(op: BinaryOp, value: Value<'_>) -> Result<bool, ExprError> {
    match value {
        Value::Bool(b) => Ok(b),
        other => Err(ExprError::TypeMismatch {
            op: op.symbol(),
            left: other.type_name(),
            right: "bool",
        }),
    }
}

fn mismatch(op: BinaryOp, lhs: &Value<'_>, rhs: &Value<'_>) -> ExprError {
    ExprError::TypeMismatch {
        op: op.symbol(),
        left: lhs.type_name(),
        right: rhs.type_name(),
    }
}

fn equals(lhs: &Value<'_>, rhs: &Value<'_>, op: BinaryOp) -> Result<bool, ExprError> {
    Ok(match (lhs, rhs) {
        (Value::Missing, _) | (_, Value::Missing) => false,
        (Value::Str(a), Value::Str(b)) => a == b,
        (Value::Number(a), Value::Number(b)) => a == b,
        (Value::Bool(a), Value::Bool(b)) => a == b,
        // label values are strings; compare numerically when the label parses
        (Value::Str(s), Value::Number(n)) | (Value::Number(n), Value::Str(s)) => {
            s.trim().parse::<f64>().map_or(false, |v| v == *n)
        }
        _ => return Err(mismatch(op, lhs, rhs)),
    })
}

fn member_of(needle: &Value<'_>, haystack: &Value<'_>, op: BinaryOp) -> Result<bool, ExprError> {
    let Value::List(items) = haystack else {
        return Err(mismatch(op, needle, haystack));
    };
    if matches!(needle, Value::Missing) {
        return Ok(false);
    }
    for item in items {
        if equals(needle, item, op)? {
            return Ok(true);
        }
    }
    Ok(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rstest::rstest;

    fn labels(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn alert() -> BTreeMap<String, String> {
        labels(&[
            ("threshold.name", "critical"),
            ("service", "auth"),
            ("host", "prod-1"),
            ("code", "500"),
        ])
    }

    #[rstest]
    #[case(r#"labels["threshold.name"] == 'critical'"#, true)]
    #[case(r#"labels["threshold.name"] != 'critical'"#, false)]
    #[case(r#"labels["service"] in ['auth','payment']"#, true)]
    #[case(r#"labels["service"] not in ['auth','payment']"#, false)]
    #[case(r#"labels["host"].contains('prod')"#, true)]
    #[case(r#"labels["host"] startsWith 'prod-'"#, true)]
    #[case(r#"labels["host"].endsWith('-2')"#, false)]
    #[case(r#"labels.service == "auth" && !(labels.host == "dev")"#, true)]
    #[case(r#"labels["service"] == 'billing' || labels["code"] == 500"#, true)]
    #[case(r#"not labels["service"] == 'auth' or false"#, false)]
    fn test_evaluate(#[case] src: &str, #[case] expected: bool) {
        let expr = Expression::compile(src).unwrap();
        assert_eq!(expr.evaluate(&alert()).unwrap(), expected, "{}", src);
    }

    #[rstest]
    #[case(r#"labels["missing"] == ''"#)]
    #[case(r#"labels["missing"] in ['', 'x']"#)]
    #[case(r#"labels["missing"].contains('')"#)]
    #[case(r#"labels["missing"] startsWith ''"#)]
    #[case(r#"labels["missing"] == labels["also_missing"]"#)]
    fn test_missing_key_never_matches(#[case] src: &str) {
        let expr = Expression::compile(src).unwrap();
        assert_eq!(expr.evaluate(&alert()), Ok(false), "{}", src);
    }

    #[test]
    fn test_missing_key_inequality_is_true() {
        let expr = Expression::compile(r#"labels["missing"] != 'x'"#).unwrap();
        assert!(expr.matches(&alert()));
    }

    #[test]
    fn test_non_boolean_result_is_false() {
        let expr = Expression::compile(r#"labels["service"]"#).unwrap();
        assert_eq!(
            expr.evaluate(&alert()),
            Err(ExprError::NotBoolean("string"))
        );
        assert!(!expr.matches(&alert()));
    }

    #[test]
    fn test_type_errors_fold_to_false() {
        for src in [
            r#"labels["service"] && true"#,
            r#"labels["service"] in 'auth'"#,
            r#"labels["service"].contains(1)"#,
            r#"!labels["service"]"#,
            r#"true == 'true'"#,
        ] {
            let expr = Expression::compile(src).unwrap();
            assert!(
                matches!(expr.evaluate(&alert()), Err(ExprError::TypeMismatch { .. })),
                "{}",
                src
            );
            assert!(!expr.matches(&alert()));
        }
    }

    #[test]
    fn test_short_circuit_skips_type_error() {
        let expr = Expression::compile(r#"false && labels["service"]"#).unwrap();
        assert_eq!(expr.evaluate(&alert()), Ok(false));
        let expr = Expression::compile(r#"true || labels["service"]"#).unwrap();
        assert_eq!(expr.evaluate(&alert()), Ok(true));
        let expr = Expression::compile(r#"true && labels["service"]"#).unwrap();
        assert!(matches!(
            expr.evaluate(&alert()),
            Err(ExprError::TypeMismatch { op: "&&", .. })
        ));
    }

    proptest! {
        #[test]
        fn prop_equality_matches_label_value(value in "[a-z0-9._-]{0,12}", needle in "[a-z0-9._-]{0,12}") {
            let expr = Expression::compile(&format!("labels[\"k\"] == {:?}", needle)).unwrap();
            let set = labels(&[("k", value.as_str())]);
            prop_assert_eq!(expr.matches(&set), value == needle);
        }

        #[test]
        fn prop_missing_key_is_false(needle in "[a-z]{0,8}") {
            let expr = Expression::compile(&format!("labels[\"absent\"] == {:?}", needle)).unwrap();
            prop_assert!(!expr.matches(&BTreeMap::new()));
        }
    }
}
