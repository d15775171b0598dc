//! Label selectors.
//!
//! [`LabelSelector`] is the wire form found in a propagation spec. It is
//! compiled into a [`Selector`] before use so that malformed keys, values and
//! operators are reported once, up front, instead of silently matching
//! nothing.

use crate::error::{CoreError, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::LazyLock;

/// Label name segment: at most 63 characters, alphanumeric at both ends.
static NAME_REGEX: LazyLock<regex::Regex> = LazyLock::new(|| {
    regex::Regex::new(r"^([A-Za-z0-9][-A-Za-z0-9_.]*)?[A-Za-z0-9]$").expect("Invalid name regex")
});

/// DNS-1123 subdomain used as the optional key prefix.
static PREFIX_REGEX: LazyLock<regex::Regex> = LazyLock::new(|| {
    regex::Regex::new(r"^[a-z0-9]([-a-z0-9]*[a-z0-9])?(\.[a-z0-9]([-a-z0-9]*[a-z0-9])?)*$")
        .expect("Invalid prefix regex")
});

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LabelSelector {
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub match_labels: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub match_expressions: Vec<LabelSelectorRequirement>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LabelSelectorRequirement {
    pub key: String,
    /// Kept as a string so an unknown operator surfaces as a compile error.
    pub operator: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub values: Vec<String>,
}

impl LabelSelector {
    pub fn compile(&self) -> Result<Selector> {
        let mut requirements = Vec::new();
        for (key, value) in &self.match_labels {
            validate_key(key)?;
            validate_value(value)?;
            requirements.push(Requirement {
                key: key.clone(),
                operator: SelectorOperator::Equals,
                values: BTreeSet::from([value.clone()]),
            });
        }
        for expr in &self.match_expressions {
            requirements.push(Requirement::compile(expr)?);
        }
        Ok(Selector { requirements })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectorOperator {
    Equals,
    In,
    NotIn,
    Exists,
    DoesNotExist,
}

impl SelectorOperator {
    fn parse(raw: &str) -> Result<Self> {
        match raw {
            "In" => Ok(Self::In),
            "NotIn" => Ok(Self::NotIn),
            "Exists" => Ok(Self::Exists),
            "DoesNotExist" => Ok(Self::DoesNotExist),
            other => Err(CoreError::invalid_selector(format!(
                "unsupported operator '{other}'"
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Requirement {
    key: String,
    operator: SelectorOperator,
    values: BTreeSet<String>,
}

impl Requirement {
    fn compile(expr: &LabelSelectorRequirement) -> Result<Self> {
        validate_key(&expr.key)?;
        let operator = SelectorOperator::parse(&expr.operator)?;
        match operator {
            SelectorOperator::In | SelectorOperator::NotIn if expr.values.is_empty() => {
                return Err(CoreError::invalid_selector(format!(
                    "operator {} on key '{}' requires at least one value",
                    expr.operator, expr.key
                )));
            }
            SelectorOperator::Exists | SelectorOperator::DoesNotExist
                if !expr.values.is_empty() =>
            {
                return Err(CoreError::invalid_selector(format!(
                    "operator {} on key '{}' takes no values",
                    expr.operator, expr.key
                )));
            }
            _ => {}
        }
        for value in &expr.values {
            validate_value(value)?;
        }
        Ok(Self {
            key: expr.key.clone(),
            operator,
            values: expr.values.iter().cloned().collect(),
        })
    }

    fn matches(&self, labels: &BTreeMap<String, String>) -> bool {
        let actual = labels.get(&self.key);
        match self.operator {
            SelectorOperator::Equals | SelectorOperator::In => {
                actual.is_some_and(|v| self.values.contains(v))
            }
            SelectorOperator::NotIn => actual.is_none_or(|v| !self.values.contains(v)),
            SelectorOperator::Exists => actual.is_some(),
            SelectorOperator::DoesNotExist => actual.is_none(),
        }
    }
}

impl fmt::Display for Requirement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let values = || self.values.iter().cloned().collect::<Vec<_>>().join(",");
        match self.operator {
            SelectorOperator::Equals => write!(f, "{}={}", self.key, values()),
            SelectorOperator::In => write!(f, "{} in ({})", self.key, values()),
            SelectorOperator::NotIn => write!(f, "{} notin ({})", self.key, values()),
            SelectorOperator::Exists => write!(f, "{}", self.key),
            SelectorOperator::DoesNotExist => write!(f, "!{}", self.key),
        }
    }
}

/// A compiled, validated label selector. The empty selector matches
/// everything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Selector {
    requirements: Vec<Requirement>,
}

impl Selector {
    pub fn everything() -> Self {
        Self::default()
    }

    /// Equality selector for a single label.
    pub fn label_equals(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            requirements: vec![Requirement {
                key: key.into(),
                operator: SelectorOperator::Equals,
                values: BTreeSet::from([value.into()]),
            }],
        }
    }

    pub fn is_everything(&self) -> bool {
        self.requirements.is_empty()
    }

    pub fn matches(&self, labels: &BTreeMap<String, String>) -> bool {
        self.requirements.iter().all(|r| r.matches(labels))
    }
}

impl fmt::Display for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self.requirements.iter().map(|r| r.to_string()).collect();
        write!(f, "{}", parts.join(","))
    }
}

fn validate_key(key: &str) -> Result<()> {
    let (prefix, name) = match key.split_once('/') {
        Some((prefix, name)) => (Some(prefix), name),
        None => (None, key),
    };
    if let Some(prefix) = prefix
        && (prefix.is_empty() || prefix.len() > 253 || !PREFIX_REGEX.is_match(prefix))
    {
        return Err(CoreError::invalid_selector(format!(
            "invalid label key prefix in '{key}'"
        )));
    }
    if name.is_empty() || name.len() > 63 || !NAME_REGEX.is_match(name) {
        return Err(CoreError::invalid_selector(format!(
            "invalid label key '{key}'"
        )));
    }
    Ok(())
}

fn validate_value(value: &str) -> Result<()> {
    if value.is_empty() {
        return Ok(());
    }
    if value.len() > 63 || !NAME_REGEX.is_match(value) {
        return Err(CoreError::invalid_selector(format!(
            "invalid label value '{value}'"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn labels(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn expr(key: &str, op: &str, values: &[&str]) -> LabelSelectorRequirement {
        LabelSelectorRequirement {
            key: key.to_string(),
            operator: op.to_string(),
            values: values.iter().map(|v| v.to_string()).collect(),
        }
    }

    #[test]
    fn test_empty_selector_matches_everything() {
        let selector = LabelSelector::default().compile().unwrap();
        assert!(selector.is_everything());
        assert!(selector.matches(&labels(&[])));
        assert!(selector.matches(&labels(&[("env", "prod")])));
    }

    #[test]
    fn test_match_labels() {
        let selector = LabelSelector {
            match_labels: labels(&[("env", "prod")]),
            ..Default::default()
        }
        .compile()
        .unwrap();
        assert!(selector.matches(&labels(&[("env", "prod"), ("team", "a")])));
        assert!(!selector.matches(&labels(&[("env", "dev")])));
        assert!(!selector.matches(&labels(&[])));
    }

    #[test]
    fn test_match_expressions() {
        let selector = LabelSelector {
            match_expressions: vec![
                expr("env", "In", &["prod", "staging"]),
                expr("tier", "NotIn", &["db"]),
                expr("team", "Exists", &[]),
                expr("legacy", "DoesNotExist", &[]),
            ],
            ..Default::default()
        }
        .compile()
        .unwrap();

        assert!(selector.matches(&labels(&[("env", "prod"), ("team", "a")])));
        assert!(selector.matches(&labels(&[
            ("env", "staging"),
            ("team", "b"),
            ("tier", "web")
        ])));
        assert!(!selector.matches(&labels(&[("env", "prod"), ("team", "a"), ("tier", "db")])));
        assert!(!selector.matches(&labels(&[("env", "prod")])));
        assert!(!selector.matches(&labels(&[
            ("env", "prod"),
            ("team", "a"),
            ("legacy", "true")
        ])));
    }

    #[test]
    fn test_unknown_operator_is_invalid() {
        let err = LabelSelector {
            match_expressions: vec![expr("env", "Matches", &["prod"])],
            ..Default::default()
        }
        .compile()
        .unwrap_err();
        assert!(matches!(err, CoreError::InvalidSelector(_)));
    }

    #[test]
    fn test_operator_value_arity() {
        for (op, values) in [("In", vec![]), ("NotIn", vec![]), ("Exists", vec!["x"])] {
            let result = LabelSelector {
                match_expressions: vec![expr("env", op, &values)],
                ..Default::default()
            }
            .compile();
            assert!(result.is_err(), "{op} with {values:?} should fail");
        }
    }

    #[test]
    fn test_invalid_keys_and_values() {
        let long = "k".repeat(64);
        for key in ["", "-env", "env-", "Bad_Prefix/env", "a/b/c", long.as_str()] {
            let result = LabelSelector {
                match_labels: labels(&[(key, "x")]),
                ..Default::default()
            }
            .compile();
            assert!(result.is_err(), "key '{key}' should be rejected");
        }
        let result = LabelSelector {
            match_labels: labels(&[("env", "not valid")]),
            ..Default::default()
        }
        .compile();
        assert!(result.is_err());
    }

    #[test]
    fn test_prefixed_key() {
        let selector = Selector::label_equals("sync.propagators.io/owner", "default.app");
        assert!(selector.matches(&labels(&[("sync.propagators.io/owner", "default.app")])));
        assert!(
            LabelSelector {
                match_labels: labels(&[("sync.propagators.io/owner", "default.app")]),
                ..Default::default()
            }
            .compile()
            .is_ok()
        );
    }

    #[test]
    fn test_display() {
        let selector = LabelSelector {
            match_labels: labels(&[("env", "prod")]),
            match_expressions: vec![expr("tier", "NotIn", &["db", "cache"])],
        }
        .compile()
        .unwrap();
        assert_eq!(selector.to_string(), "env=prod,tier notin (cache,db)");
    }

    #[test]
    fn test_deserialize_camel_case() {
        let raw = r#"{"matchLabels":{"env":"prod"},"matchExpressions":[{"key":"team","operator":"Exists"}]}"#;
        let selector: LabelSelector = serde_json::from_str(raw).unwrap();
        assert_eq!(selector.match_labels.get("env").map(String::as_str), Some("prod"));
        assert_eq!(selector.match_expressions[0].operator, "Exists");
    }
}
