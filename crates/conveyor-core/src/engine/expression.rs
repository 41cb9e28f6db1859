//! Pure evaluator for condition predicates.
//!
//! Evaluates a [`Predicate`] tree against the run's data map. No IO, no
//! state: the same predicate and data always produce the same answer.
//! Variable names resolve with dotted paths into nested objects
//! (`"batch.processed"`); an absent variable resolves to `null`.

use conveyor_types::flow::Predicate;
use serde_json::Value;

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// Errors that can occur during predicate evaluation.
#[derive(Debug, thiserror::Error)]
pub enum ExpressionError {
    /// A `gte` comparison was applied to values that are not both numbers.
    #[error("cannot compare '{var}' numerically: got {actual}, expected against {expected}")]
    NotComparable {
        var: String,
        actual: Value,
        expected: Value,
    },
}

// ---------------------------------------------------------------------------
// Evaluation
// ---------------------------------------------------------------------------

/// Evaluate a predicate against a run data object.
pub fn evaluate(predicate: &Predicate, data: &Value) -> Result<bool, ExpressionError> {
    match predicate {
        Predicate::Var { name } => Ok(truthy(lookup(data, name).unwrap_or(&Value::Null))),
        Predicate::Eq { var, value } => {
            Ok(lookup(data, var).unwrap_or(&Value::Null) == value)
        }
        Predicate::Gte { var, value } => {
            let actual = lookup(data, var).unwrap_or(&Value::Null);
            match (actual.as_f64(), value.as_f64()) {
                (Some(left), Some(right)) => Ok(left >= right),
                _ => Err(ExpressionError::NotComparable {
                    var: var.clone(),
                    actual: actual.clone(),
                    expected: value.clone(),
                }),
            }
        }
        Predicate::And { all } => {
            for sub in all {
                if !evaluate(sub, data)? {
                    return Ok(false);
                }
            }
            Ok(true)
        }
        Predicate::Or { any } => {
            for sub in any {
                if evaluate(sub, data)? {
                    return Ok(true);
                }
            }
            Ok(false)
        }
    }
}

/// Resolve a dotted path inside a JSON object.
fn lookup<'a>(data: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = data;
    for segment in path.split('.') {
        current = current.get(segment)?;
    }
    Some(current)
}

/// Truthiness: false for null, false, 0, and ""; true otherwise.
fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().unwrap_or(0.0) != 0.0,
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    // -----------------------------------------------------------------------
    // Leaf predicates
    // -----------------------------------------------------------------------

    #[test]
    fn var_truthiness() {
        let data = json!({
            "yes": true, "no": false, "zero": 0, "count": 3,
            "empty": "", "name": "widget", "nothing": null,
            "list": [], "obj": {}
        });
        let cases = [
            ("yes", true),
            ("no", false),
            ("zero", false),
            ("count", true),
            ("empty", false),
            ("name", true),
            ("nothing", false),
            ("list", true),
            ("obj", true),
            ("absent", false),
        ];
        for (name, expected) in cases {
            let result = evaluate(&Predicate::Var { name: name.into() }, &data).unwrap();
            assert_eq!(result, expected, "var '{name}'");
        }
    }

    #[test]
    fn eq_compares_literals() {
        let data = json!({"status": "ready", "count": 3});
        assert!(evaluate(
            &Predicate::Eq { var: "status".into(), value: json!("ready") },
            &data
        )
        .unwrap());
        assert!(!evaluate(
            &Predicate::Eq { var: "status".into(), value: json!("done") },
            &data
        )
        .unwrap());
        assert!(evaluate(
            &Predicate::Eq { var: "count".into(), value: json!(3) },
            &data
        )
        .unwrap());
    }

    #[test]
    fn eq_on_absent_var_matches_null() {
        let data = json!({});
        assert!(evaluate(
            &Predicate::Eq { var: "missing".into(), value: Value::Null },
            &data
        )
        .unwrap());
        assert!(!evaluate(
            &Predicate::Eq { var: "missing".into(), value: json!(1) },
            &data
        )
        .unwrap());
    }

    #[test]
    fn gte_compares_numbers() {
        let data = json!({"processed_count": 8});
        assert!(evaluate(
            &Predicate::Gte { var: "processed_count".into(), value: json!(8) },
            &data
        )
        .unwrap());
        assert!(evaluate(
            &Predicate::Gte { var: "processed_count".into(), value: json!(3.5) },
            &data
        )
        .unwrap());
        assert!(!evaluate(
            &Predicate::Gte { var: "processed_count".into(), value: json!(9) },
            &data
        )
        .unwrap());
    }

    #[test]
    fn gte_on_non_number_errors() {
        let data = json!({"status": "ready"});
        let err = evaluate(
            &Predicate::Gte { var: "status".into(), value: json!(1) },
            &data,
        )
        .unwrap_err();
        assert!(err.to_string().contains("status"));
    }

    // -----------------------------------------------------------------------
    // Combinators
    // -----------------------------------------------------------------------

    #[test]
    fn and_short_circuits() {
        let data = json!({"a": true, "b": false});
        let pred = Predicate::And {
            all: vec![
                Predicate::Var { name: "b".into() },
                // Would error if evaluated; short-circuit must skip it.
                Predicate::Gte { var: "a".into(), value: json!(1) },
            ],
        };
        assert!(!evaluate(&pred, &data).unwrap());
    }

    #[test]
    fn or_short_circuits() {
        let data = json!({"a": true});
        let pred = Predicate::Or {
            any: vec![
                Predicate::Var { name: "a".into() },
                Predicate::Gte { var: "a".into(), value: json!(1) },
            ],
        };
        assert!(evaluate(&pred, &data).unwrap());
    }

    #[test]
    fn empty_combinators() {
        let data = json!({});
        assert!(evaluate(&Predicate::And { all: vec![] }, &data).unwrap());
        assert!(!evaluate(&Predicate::Or { any: vec![] }, &data).unwrap());
    }

    #[test]
    fn nested_combination() {
        let data = json!({"status": "ready", "count": 12, "force": false});
        let pred = Predicate::And {
            all: vec![
                Predicate::Eq { var: "status".into(), value: json!("ready") },
                Predicate::Or {
                    any: vec![
                        Predicate::Gte { var: "count".into(), value: json!(10) },
                        Predicate::Var { name: "force".into() },
                    ],
                },
            ],
        };
        assert!(evaluate(&pred, &data).unwrap());
    }

    // -----------------------------------------------------------------------
    // Dotted paths
    // -----------------------------------------------------------------------

    #[test]
    fn dotted_paths_resolve_nested_objects() {
        let data = json!({"batch": {"processed": 3, "meta": {"source": "csv"}}});
        assert!(evaluate(
            &Predicate::Gte { var: "batch.processed".into(), value: json!(3) },
            &data
        )
        .unwrap());
        assert!(evaluate(
            &Predicate::Eq { var: "batch.meta.source".into(), value: json!("csv") },
            &data
        )
        .unwrap());
        assert!(!evaluate(
            &Predicate::Var { name: "batch.missing.deep".into() },
            &data
        )
        .unwrap());
    }
}
