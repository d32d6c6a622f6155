//! Condition evaluation for approval rules, blueprint gates, stored views,
//! and workflow triggers.
//!
//! A rule is a flat list of (field, operator, value) conditions joined by
//! AND or OR, evaluated against a record's data object. A condition that
//! references a field the record does not carry is a non-match, with the
//! one exception of `is_empty`, which treats a missing field as empty.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operator {
    Equals,
    NotEquals,
    GreaterThan,
    LessThan,
    Contains,
    InList,
    IsEmpty,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Join {
    And,
    Or,
}

impl Default for Join {
    fn default() -> Self {
        Join::And
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Condition {
    pub field: String,
    pub op: Operator,
    #[serde(default)]
    pub value: Value,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RuleGroup {
    #[serde(default)]
    pub join: Join,
    #[serde(default)]
    pub conditions: Vec<Condition>,
}

impl RuleGroup {
    /// Parse a stored rule definition, rejecting unknown operators at save
    /// time rather than evaluation time.
    pub fn parse(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }
}

/// Evaluate a rule group against a record's data.
///
/// An empty condition list matches regardless of join: rules gate on their
/// trigger alone when no conditions are configured.
pub fn evaluate(group: &RuleGroup, data: &Map<String, Value>) -> bool {
    if group.conditions.is_empty() {
        return true;
    }
    match group.join {
        Join::And => group.conditions.iter().all(|c| matches(c, data)),
        Join::Or => group.conditions.iter().any(|c| matches(c, data)),
    }
}

fn matches(cond: &Condition, data: &Map<String, Value>) -> bool {
    let actual = data.get(&cond.field);

    if cond.op == Operator::IsEmpty {
        return is_empty(actual);
    }

    // Missing field never matches a value comparison.
    let actual = match actual {
        Some(v) if !v.is_null() => v,
        _ => return false,
    };

    match cond.op {
        Operator::Equals => values_equal(actual, &cond.value),
        Operator::NotEquals => !values_equal(actual, &cond.value),
        Operator::GreaterThan => compare(actual, &cond.value).map_or(false, |o| o == std::cmp::Ordering::Greater),
        Operator::LessThan => compare(actual, &cond.value).map_or(false, |o| o == std::cmp::Ordering::Less),
        Operator::Contains => contains(actual, &cond.value),
        Operator::InList => match &cond.value {
            Value::Array(list) => list.iter().any(|v| values_equal(actual, v)),
            _ => false,
        },
        Operator::IsEmpty => unreachable!(),
    }
}

fn is_empty(v: Option<&Value>) -> bool {
    match v {
        None | Some(Value::Null) => true,
        Some(Value::String(s)) => s.is_empty(),
        Some(Value::Array(a)) => a.is_empty(),
        Some(Value::Object(o)) => o.is_empty(),
        Some(_) => false,
    }
}

/// Equality with numeric coercion: `5` and `5.0` are the same value, and a
/// stored rule value of `"5"` matches a numeric field.
fn values_equal(a: &Value, b: &Value) -> bool {
    if let (Some(x), Some(y)) = (as_number(a), as_number(b)) {
        return x == y;
    }
    match (a, b) {
        (Value::String(x), Value::String(y)) => x == y,
        (Value::Bool(x), Value::Bool(y)) => x == y,
        _ => a == b,
    }
}

/// Ordering: numeric when both sides parse as numbers, string otherwise.
fn compare(a: &Value, b: &Value) -> Option<std::cmp::Ordering> {
    if let (Some(x), Some(y)) = (as_number(a), as_number(b)) {
        return x.partial_cmp(&y);
    }
    match (a, b) {
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        _ => None,
    }
}

fn as_number(v: &Value) -> Option<f64> {
    match v {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn contains(actual: &Value, needle: &Value) -> bool {
    match actual {
        Value::String(s) => match needle {
            Value::String(n) => s.contains(n.as_str()),
            _ => false,
        },
        Value::Array(items) => items.iter().any(|v| values_equal(v, needle)),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn data(v: Value) -> Map<String, Value> {
        v.as_object().unwrap().clone()
    }

    fn cond(field: &str, op: Operator, value: Value) -> Condition {
        Condition { field: field.to_string(), op, value }
    }

    fn group(join: Join, conditions: Vec<Condition>) -> RuleGroup {
        RuleGroup { join, conditions }
    }

    #[test]
    fn test_equals_and_not_equals() {
        let d = data(json!({"status": "active", "premium": 120}));

        assert!(evaluate(&group(Join::And, vec![cond("status", Operator::Equals, json!("active"))]), &d));
        assert!(!evaluate(&group(Join::And, vec![cond("status", Operator::Equals, json!("lapsed"))]), &d));
        assert!(evaluate(&group(Join::And, vec![cond("status", Operator::NotEquals, json!("lapsed"))]), &d));

        // Numeric coercion: "120" matches 120.
        assert!(evaluate(&group(Join::And, vec![cond("premium", Operator::Equals, json!("120"))]), &d));
        assert!(evaluate(&group(Join::And, vec![cond("premium", Operator::Equals, json!(120.0))]), &d));
    }

    #[test]
    fn test_ordering() {
        let d = data(json!({"premium": 120, "name": "baker"}));

        assert!(evaluate(&group(Join::And, vec![cond("premium", Operator::GreaterThan, json!(100))]), &d));
        assert!(!evaluate(&group(Join::And, vec![cond("premium", Operator::GreaterThan, json!(120))]), &d));
        assert!(evaluate(&group(Join::And, vec![cond("premium", Operator::LessThan, json!("150"))]), &d));

        // Strings order lexicographically.
        assert!(evaluate(&group(Join::And, vec![cond("name", Operator::GreaterThan, json!("abel"))]), &d));
        // Mixed types do not order.
        assert!(!evaluate(&group(Join::And, vec![cond("name", Operator::LessThan, json!(true))]), &d));
    }

    #[test]
    fn test_contains_and_in_list() {
        let d = data(json!({"email": "pat@example.com", "tags": ["vip", "renewal"]}));

        assert!(evaluate(&group(Join::And, vec![cond("email", Operator::Contains, json!("@example"))]), &d));
        assert!(evaluate(&group(Join::And, vec![cond("tags", Operator::Contains, json!("vip"))]), &d));
        assert!(!evaluate(&group(Join::And, vec![cond("tags", Operator::Contains, json!("churned"))]), &d));

        assert!(evaluate(
            &group(Join::And, vec![cond("email", Operator::InList, json!(["a@b.c", "pat@example.com"]))]),
            &d
        ));
        // A non-array in_list value never matches.
        assert!(!evaluate(&group(Join::And, vec![cond("email", Operator::InList, json!("pat@example.com"))]), &d));
    }

    #[test]
    fn test_is_empty() {
        let d = data(json!({"notes": "", "tags": [], "stage": "quoted", "cleared": null}));

        assert!(evaluate(&group(Join::And, vec![cond("notes", Operator::IsEmpty, Value::Null)]), &d));
        assert!(evaluate(&group(Join::And, vec![cond("tags", Operator::IsEmpty, Value::Null)]), &d));
        assert!(evaluate(&group(Join::And, vec![cond("cleared", Operator::IsEmpty, Value::Null)]), &d));
        // Missing field counts as empty.
        assert!(evaluate(&group(Join::And, vec![cond("never_set", Operator::IsEmpty, Value::Null)]), &d));
        assert!(!evaluate(&group(Join::And, vec![cond("stage", Operator::IsEmpty, Value::Null)]), &d));
    }

    #[test]
    fn test_missing_field_is_non_match() {
        let d = data(json!({"status": "active"}));

        assert!(!evaluate(&group(Join::And, vec![cond("missing", Operator::Equals, json!("x"))]), &d));
        assert!(!evaluate(&group(Join::And, vec![cond("missing", Operator::NotEquals, json!("x"))]), &d));
        assert!(!evaluate(&group(Join::And, vec![cond("missing", Operator::GreaterThan, json!(1))]), &d));
    }

    #[test]
    fn test_join_semantics() {
        let d = data(json!({"status": "active", "premium": 50}));
        let hit = cond("status", Operator::Equals, json!("active"));
        let miss = cond("premium", Operator::GreaterThan, json!(100));

        assert!(!evaluate(&group(Join::And, vec![hit.clone(), miss.clone()]), &d));
        assert!(evaluate(&group(Join::Or, vec![hit, miss]), &d));

        // Empty groups match under either join.
        assert!(evaluate(&group(Join::And, vec![]), &d));
        assert!(evaluate(&group(Join::Or, vec![]), &d));
    }

    #[test]
    fn test_parse_rejects_unknown_operator() {
        assert!(RuleGroup::parse(r#"{"join":"and","conditions":[{"field":"a","op":"regex","value":"x"}]}"#).is_err());
        let parsed = RuleGroup::parse(r#"{"conditions":[{"field":"a","op":"equals","value":1}]}"#).unwrap();
        assert_eq!(parsed.join, Join::And);
    }
}
