//! Small expression language for `while` loops and the builtin `condition` node.
//!
//! Supported forms, evaluated against a map of variables:
//! - `true` / `false`
//! - `key == "value"`, `key != "value"`
//! - `key contains "substr"`
//! - `key matches "regex"`
//! - `key < 3`, `key <= 3`, `key > 3`, `key >= 3` (numeric)
//! - `key is_empty`, `key not_empty`
//! - clauses joined with `&&` or `||` (`&&` binds tighter, no parentheses)
//!
//! Missing keys and unparseable expressions evaluate to `false`.

use std::collections::HashMap;

use serde_json::Value;

pub type Vars = HashMap<String, Value>;

pub fn evaluate_condition(expr: &str, vars: &Vars) -> bool {
    expr.split("||").any(|any| {
        any.split("&&")
            .all(|clause| evaluate_clause(clause.trim(), vars))
    })
}

fn evaluate_clause(expr: &str, vars: &Vars) -> bool {
    match expr {
        "true" => return true,
        "false" | "" => return false,
        _ => {}
    }

    if let Some(key) = expr.strip_suffix("not_empty") {
        return lookup(vars, key.trim()).is_some_and(|s| !s.trim().is_empty());
    }
    if let Some(key) = expr.strip_suffix("is_empty") {
        return lookup(vars, key.trim()).map_or(true, |s| s.trim().is_empty());
    }

    // key contains "value"
    if let Some((key, substr)) = parse_operator(expr, " contains ") {
        return lookup(vars, key).is_some_and(|s| s.contains(substr));
    }

    // key matches "regex"
    if let Some((key, pattern)) = parse_operator(expr, " matches ") {
        return match regex::Regex::new(pattern) {
            Ok(re) => lookup(vars, key).is_some_and(|s| re.is_match(&s)),
            Err(e) => {
                tracing::warn!(pattern, error = %e, "Invalid regex in condition");
                false
            }
        };
    }

    if let Some((key, value)) = parse_operator(expr, "!=") {
        return lookup(vars, key).is_some_and(|s| s != value);
    }
    if let Some((key, value)) = parse_operator(expr, "==") {
        return lookup(vars, key).is_some_and(|s| s == value);
    }

    for op in ["<=", ">=", "<", ">"] {
        if let Some((key, value)) = parse_operator(expr, op) {
            let (Some(lhs), Ok(rhs)) = (
                lookup(vars, key).and_then(|s| s.trim().parse::<f64>().ok()),
                value.parse::<f64>(),
            ) else {
                return false;
            };
            return match op {
                "<=" => lhs <= rhs,
                ">=" => lhs >= rhs,
                "<" => lhs < rhs,
                _ => lhs > rhs,
            };
        }
    }

    false
}

/// Render a variable as a string. Strings are returned without quotes.
fn lookup(vars: &Vars, key: &str) -> Option<String> {
    vars.get(key).map(|v| match v {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    })
}

/// Parse `key OP "value"` expressions, returning (key, value).
fn parse_operator<'a>(expr: &'a str, op: &str) -> Option<(&'a str, &'a str)> {
    let parts: Vec<&str> = expr.splitn(2, op).collect();
    if parts.len() != 2 {
        return None;
    }
    let key = parts[0].trim();
    let val = parts[1].trim().trim_matches('"');
    Some((key, val))
}

/// Interpret an executor's output as a boolean.
///
/// Accepts `true|yes|1` and `false|no|0|""` (trimmed, case-insensitive) and
/// JSON objects of the form `{"result": bool}`.
pub fn parse_bool_output(output: &str) -> Option<bool> {
    let trimmed = output.trim();
    match trimmed.to_ascii_lowercase().as_str() {
        "true" | "yes" | "1" => return Some(true),
        "false" | "no" | "0" | "" => return Some(false),
        _ => {}
    }
    serde_json::from_str::<Value>(trimmed)
        .ok()?
        .get("result")?
        .as_bool()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars(pairs: &[(&str, Value)]) -> Vars {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn test_equality() {
        let v = vars(&[("status", serde_json::json!("success"))]);
        assert!(evaluate_condition(r#"status == "success""#, &v));
        assert!(!evaluate_condition(r#"status == "failure""#, &v));
        assert!(evaluate_condition(r#"status != "failure""#, &v));
    }

    #[test]
    fn test_contains_and_matches() {
        let v = vars(&[("input", serde_json::json!("The file was created."))]);
        assert!(evaluate_condition(r#"input contains "created""#, &v));
        assert!(!evaluate_condition(r#"input contains "deleted""#, &v));
        assert!(evaluate_condition(r#"input matches "^The \w+""#, &v));
        assert!(!evaluate_condition(r#"input matches "(unclosed""#, &v));
    }

    #[test]
    fn test_numeric_comparisons() {
        let v = vars(&[("index", serde_json::json!(2))]);
        assert!(evaluate_condition("index < 3", &v));
        assert!(evaluate_condition("index <= 2", &v));
        assert!(!evaluate_condition("index > 2", &v));
        assert!(evaluate_condition("index >= 2", &v));
        assert!(!evaluate_condition("index < abc", &v));
    }

    #[test]
    fn test_emptiness() {
        let v = vars(&[
            ("blank", serde_json::json!("   ")),
            ("full", serde_json::json!("x")),
        ]);
        assert!(evaluate_condition("blank is_empty", &v));
        assert!(evaluate_condition("missing is_empty", &v));
        assert!(evaluate_condition("full not_empty", &v));
        assert!(!evaluate_condition("missing not_empty", &v));
    }

    #[test]
    fn test_boolean_connectives() {
        let v = vars(&[
            ("index", serde_json::json!(1)),
            ("input", serde_json::json!("go")),
        ]);
        assert!(evaluate_condition(r#"index < 5 && input == "go""#, &v));
        assert!(!evaluate_condition(r#"index > 5 && input == "go""#, &v));
        assert!(evaluate_condition(r#"index > 5 || input == "go""#, &v));
        assert!(evaluate_condition("true", &v));
        assert!(!evaluate_condition("nonsense", &v));
    }

    #[test]
    fn test_parse_bool_output() {
        assert_eq!(parse_bool_output(" TRUE\n"), Some(true));
        assert_eq!(parse_bool_output("yes"), Some(true));
        assert_eq!(parse_bool_output("0"), Some(false));
        assert_eq!(parse_bool_output(""), Some(false));
        assert_eq!(parse_bool_output(r#"{"result": true}"#), Some(true));
        assert_eq!(parse_bool_output(r#"{"other": true}"#), None);
        assert_eq!(parse_bool_output("maybe"), None);
    }
}
