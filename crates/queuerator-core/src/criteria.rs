//! Criteria evaluation
//!
//! A criteria expression is an immutable boolean tree built once from
//! configuration and evaluated against every decoded record.
//!
//! ## Node Types
//!
//! - **All**: conjunction, short-circuits on the first `false` child
//! - **Any**: disjunction, short-circuits on the first `true` child
//! - **Not**: negation of a single child
//! - **Leaf**: a [`Predicate`], normally a field [`Comparison`]
//!
//! ## Example
//!
//! ```rust,ignore
//! let criteria: CriteriaConfig = serde_json::from_str(
//!     r#"{"all": [{"field": "temp", "op": ">", "value": 30},
//!                 {"not": {"field": "status", "op": "eq", "value": "off"}}]}"#,
//! )?;
//! let criteria = criteria.build()?;
//! assert!(criteria.evaluate(&record));
//! ```
//!
//! Evaluation is total. A missing field, a type mismatch between the field
//! and the literal, or a path that runs through a scalar all make the
//! comparison `false`. Malformed expressions are rejected by
//! [`CriteriaConfig::build`], never during evaluation.

use crate::error::{QueueratorError, Result};
use crate::record::{kind_name, lookup, Record};
use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Number, Value};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

/// Leaf predicate evaluated against a record
pub trait Predicate: Send + Sync + fmt::Debug {
    /// Evaluate the predicate. Must not fail.
    fn test(&self, record: &Record) -> bool;

    /// Get predicate name for debugging/metrics
    fn name(&self) -> &'static str;

    /// Short rendering used when logging the expression
    fn describe(&self) -> String {
        self.name().to_string()
    }
}

// ============================================================================
// Operators
// ============================================================================

/// Comparison operator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operator {
    Eq,
    Ne,
    Lt,
    Lte,
    Gt,
    Gte,
    In,
    NotIn,
    Contains,
    StartsWith,
    EndsWith,
    Matches,
    Exists,
}

impl Operator {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Eq => "==",
            Self::Ne => "!=",
            Self::Lt => "<",
            Self::Lte => "<=",
            Self::Gt => ">",
            Self::Gte => ">=",
            Self::In => "in",
            Self::NotIn => "not_in",
            Self::Contains => "contains",
            Self::StartsWith => "starts_with",
            Self::EndsWith => "ends_with",
            Self::Matches => "matches",
            Self::Exists => "exists",
        }
    }

    fn is_ordering(&self) -> bool {
        matches!(self, Self::Lt | Self::Lte | Self::Gt | Self::Gte)
    }
}

impl FromStr for Operator {
    type Err = QueueratorError;

    fn from_str(s: &str) -> Result<Self> {
        let op = match s.trim() {
            "==" | "=" | "eq" => Self::Eq,
            "!=" | "<>" | "ne" => Self::Ne,
            "<" | "lt" => Self::Lt,
            "<=" | "lte" => Self::Lte,
            ">" | "gt" => Self::Gt,
            ">=" | "gte" => Self::Gte,
            "in" => Self::In,
            "not_in" | "nin" => Self::NotIn,
            "contains" => Self::Contains,
            "starts_with" | "prefix" => Self::StartsWith,
            "ends_with" | "suffix" => Self::EndsWith,
            "matches" | "regex" => Self::Matches,
            "exists" => Self::Exists,
            other => {
                return Err(QueueratorError::criteria(format!(
                    "unknown operator \"{}\"",
                    other
                )))
            }
        };
        Ok(op)
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Comparison
// ============================================================================

/// Validated operand of a comparison
#[derive(Debug, Clone)]
enum Operand {
    None,
    Scalar(Value),
    List(Vec<Value>),
    Pattern(Regex),
}

/// Field comparison leaf
#[derive(Debug, Clone)]
pub struct Comparison {
    field: String,
    path: Vec<String>,
    op: Operator,
    operand: Operand,
}

impl Comparison {
    /// Build a comparison, validating the operand against the operator
    pub fn new(field: impl Into<String>, op: Operator, value: Option<Value>) -> Result<Self> {
        let field = field.into();
        let path: Vec<String> = field.split('.').map(str::to_string).collect();
        if path.iter().any(|p| p.is_empty()) {
            return Err(QueueratorError::criteria(format!(
                "invalid field path \"{}\"",
                field
            )));
        }

        let operand = Self::operand(&field, op, value)?;
        Ok(Self {
            field,
            path,
            op,
            operand,
        })
    }

    fn operand(field: &str, op: Operator, value: Option<Value>) -> Result<Operand> {
        let wrong = |expected: &str, found: &Value| {
            QueueratorError::criteria(format!(
                "operator \"{}\" on \"{}\" expects {}, found {}",
                op,
                field,
                expected,
                kind_name(found)
            ))
        };

        if op == Operator::Exists {
            return match value {
                None => Ok(Operand::None),
                Some(_) => Err(QueueratorError::criteria(format!(
                    "operator \"exists\" on \"{}\" takes no value",
                    field
                ))),
            };
        }

        let value = value.ok_or_else(|| {
            QueueratorError::criteria(format!(
                "operator \"{}\" on \"{}\" requires a value",
                op, field
            ))
        })?;

        match op {
            Operator::In | Operator::NotIn => match value {
                Value::Array(items) => {
                    if let Some(bad) = items.iter().find(|v| !is_scalar(v)) {
                        return Err(wrong("a list of scalars", bad));
                    }
                    Ok(Operand::List(items))
                }
                other => Err(wrong("a list of scalars", &other)),
            },
            Operator::StartsWith | Operator::EndsWith => match value {
                Value::String(_) => Ok(Operand::Scalar(value)),
                other => Err(wrong("a string", &other)),
            },
            Operator::Matches => match value {
                Value::String(pattern) => Regex::new(&pattern)
                    .map(Operand::Pattern)
                    .map_err(|e| {
                        QueueratorError::criteria(format!(
                            "invalid pattern for \"{}\": {}",
                            field, e
                        ))
                    }),
                other => Err(wrong("a string pattern", &other)),
            },
            _ if op.is_ordering() => match value {
                Value::Number(_) | Value::String(_) => Ok(Operand::Scalar(value)),
                other => Err(wrong("a number or string", &other)),
            },
            _ => {
                if is_scalar(&value) {
                    Ok(Operand::Scalar(value))
                } else {
                    Err(wrong("a scalar", &value))
                }
            }
        }
    }

    fn apply(&self, value: &Value) -> bool {
        match (&self.operand, self.op) {
            (Operand::None, _) => true,
            (Operand::Scalar(lit), Operator::Eq) => equal(value, lit) == Some(true),
            (Operand::Scalar(lit), Operator::Ne) => equal(value, lit) == Some(false),
            (Operand::Scalar(lit), Operator::Lt) => compare(value, lit) == Some(Ordering::Less),
            (Operand::Scalar(lit), Operator::Lte) => {
                matches!(compare(value, lit), Some(Ordering::Less | Ordering::Equal))
            }
            (Operand::Scalar(lit), Operator::Gt) => compare(value, lit) == Some(Ordering::Greater),
            (Operand::Scalar(lit), Operator::Gte) => {
                matches!(compare(value, lit), Some(Ordering::Greater | Ordering::Equal))
            }
            (Operand::Scalar(lit), Operator::Contains) => match value {
                Value::String(s) => lit.as_str().map(|needle| s.contains(needle)).unwrap_or(false),
                Value::Array(items) => items.iter().any(|item| equal(item, lit) == Some(true)),
                _ => false,
            },
            (Operand::Scalar(lit), Operator::StartsWith) => match (value, lit) {
                (Value::String(s), Value::String(prefix)) => s.starts_with(prefix.as_str()),
                _ => false,
            },
            (Operand::Scalar(lit), Operator::EndsWith) => match (value, lit) {
                (Value::String(s), Value::String(suffix)) => s.ends_with(suffix.as_str()),
                _ => false,
            },
            (Operand::List(items), Operator::In) => {
                items.iter().any(|lit| equal(value, lit) == Some(true))
            }
            (Operand::List(items), Operator::NotIn) => {
                let mut comparable = false;
                for lit in items {
                    match equal(value, lit) {
                        Some(true) => return false,
                        Some(false) => comparable = true,
                        None => {}
                    }
                }
                comparable
            }
            (Operand::Pattern(re), _) => value.as_str().map(|s| re.is_match(s)).unwrap_or(false),
            // operand kinds are fixed per operator by `Comparison::new`
            _ => false,
        }
    }
}

impl Predicate for Comparison {
    fn test(&self, record: &Record) -> bool {
        match lookup(record, &self.path) {
            Some(value) => self.apply(value),
            None => false,
        }
    }

    fn name(&self) -> &'static str {
        "comparison"
    }

    fn describe(&self) -> String {
        match &self.operand {
            Operand::None => format!("{} {}", self.field, self.op),
            Operand::Scalar(v) => format!("{} {} {}", self.field, self.op, v),
            Operand::List(items) => {
                format!("{} {} {}", self.field, self.op, Value::Array(items.clone()))
            }
            Operand::Pattern(re) => format!("{} {} /{}/", self.field, self.op, re.as_str()),
        }
    }
}

fn is_scalar(value: &Value) -> bool {
    !matches!(value, Value::Array(_) | Value::Object(_))
}

/// Compare numbers exactly when both are integers, otherwise as floats
fn compare_numbers(a: &Number, b: &Number) -> Option<Ordering> {
    if let (Some(x), Some(y)) = (a.as_i64(), b.as_i64()) {
        return Some(x.cmp(&y));
    }
    if let (Some(x), Some(y)) = (a.as_u64(), b.as_u64()) {
        return Some(x.cmp(&y));
    }
    a.as_f64()?.partial_cmp(&b.as_f64()?)
}

/// Equality between a field value and a literal; `None` when the types are incompatible
fn equal(value: &Value, literal: &Value) -> Option<bool> {
    match (value, literal) {
        (Value::Null, Value::Null) => Some(true),
        (Value::Bool(a), Value::Bool(b)) => Some(a == b),
        (Value::Number(a), Value::Number(b)) => compare_numbers(a, b).map(|o| o == Ordering::Equal),
        (Value::String(a), Value::String(b)) => Some(a == b),
        _ => None,
    }
}

/// Ordering between a field value and a literal; `None` when unordered
fn compare(value: &Value, literal: &Value) -> Option<Ordering> {
    match (value, literal) {
        (Value::Number(a), Value::Number(b)) => compare_numbers(a, b),
        (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
        _ => None,
    }
}

// ============================================================================
// Expression Tree
// ============================================================================

/// Built criteria expression
#[derive(Debug, Clone)]
pub enum Criteria {
    /// Every child must match (empty matches)
    All(Vec<Criteria>),
    /// At least one child must match (empty never matches)
    Any(Vec<Criteria>),
    /// Child must not match
    Not(Box<Criteria>),
    /// Leaf predicate
    Leaf(Arc<dyn Predicate>),
}

impl Criteria {
    /// Expression that matches every record
    pub fn always() -> Self {
        Self::All(Vec::new())
    }

    pub fn all(children: impl IntoIterator<Item = Criteria>) -> Self {
        Self::All(children.into_iter().collect())
    }

    pub fn any(children: impl IntoIterator<Item = Criteria>) -> Self {
        Self::Any(children.into_iter().collect())
    }

    pub fn negate(child: Criteria) -> Self {
        Self::Not(Box::new(child))
    }

    /// Field comparison leaf
    pub fn compare(field: impl Into<String>, op: Operator, value: Option<Value>) -> Result<Self> {
        Ok(Self::Leaf(Arc::new(Comparison::new(field, op, value)?)))
    }

    /// Custom predicate leaf
    pub fn predicate(predicate: impl Predicate + 'static) -> Self {
        Self::Leaf(Arc::new(predicate))
    }

    /// Evaluate against a record
    pub fn evaluate(&self, record: &Record) -> bool {
        match self {
            Self::All(children) => children.iter().all(|c| c.evaluate(record)),
            Self::Any(children) => children.iter().any(|c| c.evaluate(record)),
            Self::Not(child) => !child.evaluate(record),
            Self::Leaf(predicate) => predicate.test(record),
        }
    }

    /// Number of leaf predicates
    pub fn leaf_count(&self) -> usize {
        match self {
            Self::All(children) | Self::Any(children) => {
                children.iter().map(Self::leaf_count).sum()
            }
            Self::Not(child) => child.leaf_count(),
            Self::Leaf(_) => 1,
        }
    }
}

impl Default for Criteria {
    fn default() -> Self {
        Self::always()
    }
}

impl fmt::Display for Criteria {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::All(children) => write_group(f, "all", children),
            Self::Any(children) => write_group(f, "any", children),
            Self::Not(child) => write!(f, "not({})", child),
            Self::Leaf(predicate) => f.write_str(&predicate.describe()),
        }
    }
}

fn write_group(f: &mut fmt::Formatter<'_>, name: &str, children: &[Criteria]) -> fmt::Result {
    write!(f, "{}(", name)?;
    for (i, child) in children.iter().enumerate() {
        if i > 0 {
            f.write_str(", ")?;
        }
        write!(f, "{}", child)?;
    }
    f.write_str(")")
}

// ============================================================================
// Criteria Configuration
// ============================================================================

/// Serializable criteria configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CriteriaConfig {
    All {
        all: Vec<CriteriaConfig>,
    },
    Any {
        any: Vec<CriteriaConfig>,
    },
    Not {
        not: Box<CriteriaConfig>,
    },
    Compare {
        field: String,
        op: String,
        #[serde(
            default,
            deserialize_with = "present",
            skip_serializing_if = "Option::is_none"
        )]
        value: Option<Value>,
    },
}

/// Distinguishes an explicit `null` literal from an absent value
fn present<'de, D>(deserializer: D) -> std::result::Result<Option<Value>, D::Error>
where
    D: Deserializer<'de>,
{
    Value::deserialize(deserializer).map(Some)
}

impl CriteriaConfig {
    /// Convert to a validated expression tree
    pub fn build(&self) -> Result<Criteria> {
        match self {
            Self::All { all } => Ok(Criteria::All(
                all.iter().map(Self::build).collect::<Result<_>>()?,
            )),
            Self::Any { any } => Ok(Criteria::Any(
                any.iter().map(Self::build).collect::<Result<_>>()?,
            )),
            Self::Not { not } => Ok(Criteria::negate(not.build()?)),
            Self::Compare { field, op, value } => {
                Criteria::compare(field.clone(), op.parse()?, value.clone())
            }
        }
    }
}

impl Default for CriteriaConfig {
    fn default() -> Self {
        Self::All { all: Vec::new() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::decode;
    use proptest::prelude::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};

    fn record(value: Value) -> Record {
        match value {
            Value::Object(map) => map,
            _ => panic!("test record must be an object"),
        }
    }

    fn cmp(field: &str, op: &str, value: Value) -> Criteria {
        Criteria::compare(field, op.parse().unwrap(), Some(value)).unwrap()
    }

    /// Leaf that counts how often it is evaluated
    #[derive(Debug)]
    struct Counting {
        result: bool,
        calls: Arc<AtomicUsize>,
    }

    impl Predicate for Counting {
        fn test(&self, _record: &Record) -> bool {
            self.calls.fetch_add(1, AtomicOrdering::SeqCst);
            self.result
        }

        fn name(&self) -> &'static str {
            "counting"
        }
    }

    #[test]
    fn test_threshold_scenario() {
        let criteria = cmp("temp", ">", json!(30));

        assert!(criteria.evaluate(&record(json!({"temp": 35}))));
        assert!(!criteria.evaluate(&record(json!({"temp": 20}))));
        assert!(!criteria.evaluate(&record(json!({"temp": "hot"}))));
    }

    #[test]
    fn test_numeric_normalization() {
        assert!(cmp("x", ">", json!(4.5)).evaluate(&record(json!({"x": 5}))));
        assert!(cmp("x", "==", json!(5)).evaluate(&record(json!({"x": 5.0}))));
        assert!(cmp("x", "<=", json!(5.0)).evaluate(&record(json!({"x": 5}))));
        assert!(cmp("x", "<", json!(-1)).evaluate(&record(json!({"x": -1.5}))));
        assert!(cmp("x", ">", json!(0)).evaluate(&record(json!({"x": u64::MAX}))));
    }

    #[test]
    fn test_missing_field() {
        let empty = record(json!({"other": 1}));
        for op in ["==", "!=", "<", ">=", "contains"] {
            let c = cmp("missing", op, json!(1));
            assert!(!c.evaluate(&empty), "{op} on missing field");
            assert!(Criteria::negate(c).evaluate(&empty), "not({op}) on missing field");
        }
    }

    #[test]
    fn test_type_mismatch_is_false() {
        let r = record(json!({"s": "text", "n": 3, "b": true, "o": {"k": 1}}));
        assert!(!cmp("s", ">", json!(1)).evaluate(&r));
        assert!(!cmp("n", "==", json!("3")).evaluate(&r));
        assert!(!cmp("n", "!=", json!("3")).evaluate(&r));
        assert!(!cmp("b", "==", json!(1)).evaluate(&r));
        assert!(!cmp("o", "==", json!(1)).evaluate(&r));
        assert!(!cmp("n", "starts_with", json!("3")).evaluate(&r));
    }

    #[test]
    fn test_empty_groups() {
        let r = record(json!({}));
        assert!(Criteria::all(vec![]).evaluate(&r));
        assert!(!Criteria::any(vec![]).evaluate(&r));
    }

    #[test]
    fn test_conjunction_short_circuits() {
        let calls = Arc::new(AtomicUsize::new(0));
        let criteria = Criteria::all(vec![
            cmp("a", "==", json!(1)),
            Criteria::predicate(Counting {
                result: true,
                calls: calls.clone(),
            }),
        ]);

        assert!(!criteria.evaluate(&record(json!({"a": 2}))));
        assert_eq!(calls.load(AtomicOrdering::SeqCst), 0);

        assert!(criteria.evaluate(&record(json!({"a": 1}))));
        assert_eq!(calls.load(AtomicOrdering::SeqCst), 1);
    }

    #[test]
    fn test_disjunction_short_circuits() {
        let calls = Arc::new(AtomicUsize::new(0));
        let criteria = Criteria::any(vec![
            cmp("a", "==", json!(1)),
            Criteria::predicate(Counting {
                result: false,
                calls: calls.clone(),
            }),
        ]);

        assert!(criteria.evaluate(&record(json!({"a": 1}))));
        assert_eq!(calls.load(AtomicOrdering::SeqCst), 0);
    }

    #[test]
    fn test_string_operators() {
        let r = record(json!({"topic": "sensors/north/temp", "tags": ["urgent", "ops"]}));
        assert!(cmp("topic", "starts_with", json!("sensors/")).evaluate(&r));
        assert!(cmp("topic", "ends_with", json!("/temp")).evaluate(&r));
        assert!(cmp("topic", "contains", json!("north")).evaluate(&r));
        assert!(cmp("tags", "contains", json!("urgent")).evaluate(&r));
        assert!(!cmp("tags", "contains", json!("low")).evaluate(&r));
        assert!(cmp("topic", "matches", json!("^sensors/[a-z]+/temp$")).evaluate(&r));
        assert!(cmp("topic", "<", json!("t")).evaluate(&r));
    }

    #[test]
    fn test_set_membership() {
        let r = record(json!({"site": "b", "level": 2}));
        assert!(cmp("site", "in", json!(["a", "b"])).evaluate(&r));
        assert!(!cmp("site", "in", json!(["c"])).evaluate(&r));
        assert!(cmp("level", "in", json!([1.0, 2.0])).evaluate(&r));
        assert!(cmp("site", "not_in", json!(["a", "c"])).evaluate(&r));
        assert!(!cmp("site", "not_in", json!(["b"])).evaluate(&r));
        // nothing comparable in the list
        assert!(!cmp("site", "not_in", json!([1, 2])).evaluate(&r));
    }

    #[test]
    fn test_nested_path_and_exists() {
        let r = record(json!({"device": {"id": "d1", "readings": [10, 20]}, "gone": null}));
        assert!(cmp("device.id", "==", json!("d1")).evaluate(&r));
        assert!(cmp("device.readings.1", ">=", json!(20)).evaluate(&r));
        assert!(cmp("gone", "==", Value::Null).evaluate(&r));

        let exists = Criteria::compare("gone", Operator::Exists, None).unwrap();
        assert!(exists.evaluate(&r));
        let exists = Criteria::compare("device.serial", Operator::Exists, None).unwrap();
        assert!(!exists.evaluate(&r));
    }

    #[test]
    fn test_config_build() {
        let config: CriteriaConfig = serde_json::from_value(json!({
            "all": [
                {"field": "temp", "op": ">", "value": 30},
                {"not": {"field": "status", "op": "eq", "value": "off"}},
                {"any": [
                    {"field": "site", "op": "in", "value": ["a", "b"]},
                    {"field": "sensor", "op": "exists"}
                ]}
            ]
        }))
        .unwrap();

        let criteria = config.build().unwrap();
        assert_eq!(criteria.leaf_count(), 4);
        assert_eq!(
            criteria.to_string(),
            r#"all(temp > 30, not(status == "off"), any(site in ["a","b"], sensor exists))"#
        );

        let on = decode(br#"{"temp": 31, "status": "on", "site": "a"}"#).unwrap();
        let off = decode(br#"{"temp": 31, "status": "off", "site": "a"}"#).unwrap();
        assert!(criteria.evaluate(&on));
        assert!(!criteria.evaluate(&off));
    }

    #[test]
    fn test_config_null_literal() {
        let config: CriteriaConfig =
            serde_json::from_value(json!({"field": "x", "op": "==", "value": null})).unwrap();
        assert_eq!(
            config,
            CriteriaConfig::Compare {
                field: "x".into(),
                op: "==".into(),
                value: Some(Value::Null)
            }
        );
        assert!(config.build().is_ok());
    }

    #[test]
    fn test_malformed_config_rejected() {
        let bad = [
            json!({"field": "x", "op": "~~", "value": 1}),
            json!({"field": "x", "op": ">", "value": {"nested": 1}}),
            json!({"field": "x", "op": ">", "value": true}),
            json!({"field": "x", "op": "==", "value": [1, 2]}),
            json!({"field": "x", "op": "in", "value": 1}),
            json!({"field": "x", "op": "in", "value": [[1]]}),
            json!({"field": "x", "op": "=="}),
            json!({"field": "x", "op": "exists", "value": 1}),
            json!({"field": "x", "op": "starts_with", "value": 1}),
            json!({"field": "x", "op": "matches", "value": "("}),
            json!({"field": "a..b", "op": "==", "value": 1}),
            json!({"not": {"all": [{"field": "", "op": "==", "value": 1}]}}),
        ];

        for config in bad {
            let parsed: CriteriaConfig = serde_json::from_value(config.clone()).unwrap();
            let err = parsed.build().unwrap_err();
            assert!(
                matches!(err, QueueratorError::Criteria { .. }),
                "{config} gave {err}"
            );
        }
    }

    fn scalar() -> impl Strategy<Value = Value> {
        prop_oneof![
            Just(Value::Null),
            any::<bool>().prop_map(Value::Bool),
            any::<i64>().prop_map(|n| json!(n)),
            (-1.0e6f64..1.0e6).prop_map(|n| json!(n)),
            "[a-z]{0,8}".prop_map(Value::String),
        ]
    }

    proptest! {
        #[test]
        fn prop_evaluation_is_deterministic(
            field in "[a-c]",
            value in scalar(),
            literal in -100i64..100,
        ) {
            let criteria = Criteria::any(vec![
                cmp("a", ">", json!(literal)),
                Criteria::negate(cmp("b", "==", json!(literal))),
            ]);
            let mut r = Record::new();
            r.insert(field, value);

            let first = criteria.evaluate(&r);
            for _ in 0..3 {
                prop_assert_eq!(criteria.evaluate(&r), first);
            }
        }

        #[test]
        fn prop_missing_field_never_matches(
            value in scalar(),
            op in prop::sample::select(vec!["==", "!=", "contains"]),
        ) {
            let c = Criteria::compare("absent", op.parse().unwrap(), Some(value)).unwrap();
            let r = record(json!({"present": 1}));
            prop_assert!(!c.evaluate(&r));
            prop_assert!(Criteria::negate(c).evaluate(&r));
        }
    }
}
