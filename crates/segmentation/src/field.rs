//! Field paths into the user record and the rule targets built from them.

use std::fmt;

use drip_core::{DripError, DripResult};
use serde::{Deserialize, Serialize};

const COUNT_SUFFIX: &str = "count";

/// A path such as `profile__country` or `profile.country`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct FieldPath(Vec<String>);

impl FieldPath {
    pub fn parse(raw: &str) -> DripResult<Self> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(DripError::InvalidRule("field name is empty".to_string()));
        }
        let segments: Vec<String> = raw
            .split('.')
            .flat_map(|part| part.split("__"))
            .map(str::to_string)
            .collect();
        for segment in &segments {
            let valid = !segment.is_empty()
                && segment.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
            if !valid {
                return Err(DripError::InvalidRule(format!(
                    "malformed field path '{raw}'"
                )));
            }
        }
        Ok(Self(segments))
    }

    pub fn single(name: impl Into<String>) -> Self {
        Self(vec![name.into()])
    }

    pub fn segments(&self) -> &[String] {
        &self.0
    }
}

impl fmt::Display for FieldPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0.join("__"))
    }
}

impl TryFrom<String> for FieldPath {
    type Error = DripError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<FieldPath> for String {
    fn from(path: FieldPath) -> Self {
        path.to_string()
    }
}

/// What a rule's field name points at: a plain field, or a distinct count
/// over a relation (`purchases__count`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum RuleTarget {
    Field { path: FieldPath },
    Count { relation: FieldPath },
}

impl RuleTarget {
    pub fn parse(field_name: &str) -> DripResult<Self> {
        let path = FieldPath::parse(field_name)?;
        match path.segments().split_last() {
            Some((last, rest)) if last == COUNT_SUFFIX && !rest.is_empty() => Ok(RuleTarget::Count {
                relation: FieldPath(rest.to_vec()),
            }),
            _ => Ok(RuleTarget::Field { path }),
        }
    }

    /// Synthetic field name a count annotation is exposed under:
    /// `purchases__count` becomes `num_purchases`.
    pub fn alias(&self) -> Option<String> {
        match self {
            RuleTarget::Field { .. } => None,
            RuleTarget::Count { relation } => Some(format!("num_{}", relation.segments().join("_"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_both_separators_are_accepted() {
        let a = FieldPath::parse("profile__country").unwrap();
        let b = FieldPath::parse("profile.country").unwrap();
        assert_eq!(a, b);
        assert_eq!(a.to_string(), "profile__country");
    }

    #[test]
    fn test_malformed_paths_are_rejected() {
        assert!(FieldPath::parse("").is_err());
        assert!(FieldPath::parse("profile..country").is_err());
        assert!(FieldPath::parse("first name").is_err());
    }

    #[test]
    fn test_count_suffix_becomes_aggregation() {
        let target = RuleTarget::parse("purchases__count").unwrap();
        assert_eq!(
            target,
            RuleTarget::Count {
                relation: FieldPath::single("purchases")
            }
        );
        assert_eq!(target.alias().as_deref(), Some("num_purchases"));
    }

    #[test]
    fn test_nested_count_alias_joins_segments() {
        let target = RuleTarget::parse("orders__items__count").unwrap();
        assert_eq!(target.alias().as_deref(), Some("num_orders_items"));
    }

    #[test]
    fn test_bare_count_is_a_plain_field() {
        let target = RuleTarget::parse("count").unwrap();
        assert!(matches!(target, RuleTarget::Field { .. }));
        assert_eq!(target.alias(), None);
    }
}
