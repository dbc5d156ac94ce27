//! A single audience-selection predicate attached to a drip.

use chrono::{DateTime, Utc};
use drip_core::{DripError, DripResult};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::field::RuleTarget;
use crate::predicates::{Lookup, Method};
use crate::query::{Annotation, Comparison, Condition, FieldRef, UserCollection, UserQuery};
use crate::resolver::{resolve, EvaluationTime, RuleValue};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "StoredRule")]
pub struct Rule {
    pub id: Uuid,
    pub drip_id: Uuid,
    pub method: Method,
    /// The field name as authored, e.g. `profile__age` or `purchases__count`.
    pub field_name: String,
    /// Always derived from `field_name`, never read back from storage.
    #[serde(skip_serializing)]
    pub target: RuleTarget,
    pub lookup: Lookup,
    /// Raw value: a literal or one of the symbolic forms (`now-7 days`, `F_x`, `True`).
    pub field_value: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Persisted form of a rule; the target is re-parsed on load.
#[derive(Deserialize)]
struct StoredRule {
    id: Uuid,
    drip_id: Uuid,
    method: Method,
    field_name: String,
    lookup: Lookup,
    field_value: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<StoredRule> for Rule {
    type Error = DripError;

    fn try_from(stored: StoredRule) -> Result<Self, Self::Error> {
        Ok(Self {
            id: stored.id,
            drip_id: stored.drip_id,
            method: stored.method,
            target: RuleTarget::parse(&stored.field_name)?,
            field_name: stored.field_name,
            lookup: stored.lookup,
            field_value: stored.field_value,
            created_at: stored.created_at,
            updated_at: stored.updated_at,
        })
    }
}

impl Rule {
    /// Parses the field name; the value is only checked by [`Rule::validate`].
    pub fn new(
        drip_id: Uuid,
        method: Method,
        field_name: impl Into<String>,
        lookup: Lookup,
        field_value: impl Into<String>,
    ) -> DripResult<Self> {
        let field_name = field_name.into();
        let target = RuleTarget::parse(&field_name)?;
        let now = Utc::now();
        Ok(Self {
            id: Uuid::new_v4(),
            drip_id,
            method,
            field_name,
            target,
            lookup,
            field_value: field_value.into(),
            created_at: now,
            updated_at: now,
        })
    }

    /// Same as [`Rule::new`] but from the string forms an author types in.
    pub fn parse(
        drip_id: Uuid,
        method: &str,
        field_name: &str,
        lookup: &str,
        field_value: &str,
    ) -> DripResult<Self> {
        Self::new(
            drip_id,
            Method::parse_lenient(method),
            field_name,
            lookup.parse()?,
            field_value,
        )
    }

    /// The count annotation this rule needs on the query, if any.
    pub fn annotation(&self) -> Option<Annotation> {
        match &self.target {
            RuleTarget::Field { .. } => None,
            RuleTarget::Count { relation } => Some(Annotation {
                alias: self.target.alias()?,
                relation: relation.clone(),
            }),
        }
    }

    pub fn resolve_value(&self, at: &EvaluationTime) -> DripResult<RuleValue> {
        resolve(&self.field_value, at)
    }

    /// The constraint this rule contributes, resolved as of `at`.
    pub fn condition(&self, at: &EvaluationTime) -> DripResult<Condition> {
        let value = self.resolve_value(at)?;
        let field = match &self.target {
            RuleTarget::Field { path } => FieldRef::Path(path.clone()),
            RuleTarget::Count { .. } => FieldRef::Annotation(self.target.alias().unwrap_or_default()),
        };
        Ok(Condition::Compare(Comparison::new(field, self.lookup, value)?))
    }

    /// Apply this rule on its own: annotate, then filter or exclude.
    pub fn apply(&self, query: UserQuery, at: &EvaluationTime) -> DripResult<UserQuery> {
        let condition = self.condition(at)?;
        let query = match self.annotation() {
            Some(annotation) => query.annotate(annotation)?,
            None => query,
        };
        match self.method {
            Method::Filter => query.filter(condition),
            Method::Exclude => query.exclude(condition),
        }
    }

    /// Trial-run the rule against the collection so a bad rule is rejected
    /// when it is authored rather than when a drip runs.
    pub fn validate(&self, users: &dyn UserCollection, at: &EvaluationTime) -> DripResult<()> {
        let outcome = self
            .apply(UserQuery::all(), at)
            .and_then(|query| users.count(&query));
        match outcome {
            Ok(_) => Ok(()),
            Err(err @ DripError::RuleResolution(_)) => Err(err),
            Err(err) => Err(DripError::InvalidRule(format!(
                "rule on '{}' failed a trial query: {err}",
                self.field_name
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryUsers;
    use chrono::TimeZone;
    use drip_core::User;
    use serde_json::json;

    fn at() -> EvaluationTime {
        EvaluationTime::utc(Utc.with_ymd_and_hms(2024, 1, 15, 0, 0, 0).unwrap())
    }

    fn users() -> InMemoryUsers {
        InMemoryUsers::from_users([
            User::new("old@example.com")
                .with_field("date_joined", json!("2023-06-01T00:00:00Z"))
                .with_field("purchases", json!(["a", "b", "c"])),
            User::new("new@example.com")
                .with_field("date_joined", json!("2024-01-14T00:00:00Z"))
                .with_field("purchases", json!([])),
        ])
    }

    #[test]
    fn test_parse_accepts_author_strings() {
        let rule = Rule::parse(Uuid::new_v4(), "exclude", "country", "IEXACT", "fr").unwrap();
        assert_eq!(rule.method, Method::Exclude);
        assert_eq!(rule.lookup, Lookup::IExact);
        assert!(Rule::parse(Uuid::new_v4(), "filter", "country", "nope", "fr").is_err());
        assert!(Rule::parse(Uuid::new_v4(), "filter", "bad field", "exact", "fr").is_err());
    }

    #[test]
    fn test_relative_date_rule_filters() {
        let rule = Rule::new(Uuid::new_v4(), Method::Filter, "date_joined", Lookup::Lt, "now-7 days")
            .unwrap();
        let query = rule.apply(UserQuery::all(), &at()).unwrap();
        let matched = users().fetch(&query).unwrap();
        assert_eq!(matched.len(), 1);
        assert_eq!(matched[0].email, "old@example.com");
    }

    #[test]
    fn test_count_rule_annotates_then_compares() {
        let rule = Rule::new(Uuid::new_v4(), Method::Filter, "purchases__count", Lookup::Gte, "2")
            .unwrap();
        assert_eq!(rule.annotation().unwrap().alias, "num_purchases");
        let query = rule.apply(UserQuery::all(), &at()).unwrap();
        let matched = users().fetch(&query).unwrap();
        assert_eq!(matched.len(), 1);
        assert_eq!(matched[0].email, "old@example.com");
    }

    #[test]
    fn test_exclude_rule_removes_matches() {
        let rule = Rule::new(Uuid::new_v4(), Method::Exclude, "purchases__count", Lookup::Exact, "0")
            .unwrap();
        let query = rule.apply(UserQuery::all(), &at()).unwrap();
        let matched = users().fetch(&query).unwrap();
        assert_eq!(matched.len(), 1);
        assert_eq!(matched[0].email, "old@example.com");
    }

    #[test]
    fn test_validate_rejects_bad_relative_dates() {
        let rule = Rule::new(Uuid::new_v4(), Method::Filter, "date_joined", Lookup::Lt, "now-whenever")
            .unwrap();
        let err = rule.validate(&users(), &at()).unwrap_err();
        assert!(matches!(err, DripError::RuleResolution(_)));
    }

    #[test]
    fn test_validate_rejects_bad_patterns() {
        let rule = Rule::new(Uuid::new_v4(), Method::Filter, "email", Lookup::Regex, "(unclosed")
            .unwrap();
        let err = rule.validate(&users(), &at()).unwrap_err();
        assert!(matches!(err, DripError::InvalidRule(_)));
    }

    #[test]
    fn test_validate_accepts_good_rules() {
        let rule = Rule::new(Uuid::new_v4(), Method::Filter, "email", Lookup::EndsWith, "@example.com")
            .unwrap();
        rule.validate(&users(), &at()).unwrap();
    }

    #[test]
    fn test_deserialize_derives_target_from_field_name() {
        let rule = Rule::new(Uuid::new_v4(), Method::Filter, "purchases__count", Lookup::Gte, "2")
            .unwrap();
        let mut stored = serde_json::to_value(&rule).unwrap();
        assert!(stored.get("target").is_none());

        // A stale target left in an edited snapshot is ignored.
        stored["target"] = json!({"kind": "field", "path": "age"});
        let loaded: Rule = serde_json::from_value(stored.clone()).unwrap();
        assert_eq!(loaded.target, rule.target);
        assert_eq!(loaded.annotation().unwrap().alias, "num_purchases");

        stored["field_name"] = json!("bad name");
        assert!(serde_json::from_value::<Rule>(stored).is_err());
    }
}
