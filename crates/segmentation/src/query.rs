//! Query model over the user collection: annotations, conditions, and the
//! collaborator trait a user store implements.

use std::collections::{BTreeSet, HashMap};

use drip_core::{DripError, DripResult, User};
use regex::Regex;
use serde_json::Value;
use uuid::Uuid;

use crate::field::FieldPath;
use crate::predicates::{compare, Lookup, Scalar};
use crate::resolver::RuleValue;

/// A distinct-count over a relation, exposed to conditions under `alias`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Annotation {
    pub alias: String,
    pub relation: FieldPath,
}

/// Where a comparison reads its left-hand value from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldRef {
    Path(FieldPath),
    Annotation(String),
}

#[derive(Debug, Clone)]
pub struct Comparison {
    pub field: FieldRef,
    pub lookup: Lookup,
    pub value: RuleValue,
    pattern: Option<Regex>,
}

impl Comparison {
    /// Build a comparison, compiling literal regex patterns up front.
    pub fn new(field: FieldRef, lookup: Lookup, value: RuleValue) -> DripResult<Self> {
        let pattern = match (&value, lookup.is_regex()) {
            (RuleValue::Text(p), true) => Some(lookup.compile(p)?),
            _ => None,
        };
        Ok(Self {
            field,
            lookup,
            value,
            pattern,
        })
    }

    fn evaluate(&self, row: &Row<'_>) -> bool {
        let expected = match &self.value {
            RuleValue::Timestamp(ts) => Scalar::Timestamp(*ts),
            RuleValue::Date(d) => Scalar::Date(*d),
            RuleValue::Bool(b) => Scalar::Bool(*b),
            RuleValue::Text(s) => Scalar::Text(s.clone()),
            RuleValue::Field(path) => match row.path_values(path).into_iter().next() {
                Some(v) => Scalar::from_json(&v),
                None => return false,
            },
        };
        // Multi-valued paths match when any value does.
        row.values(&self.field)
            .iter()
            .any(|actual| compare(actual, self.lookup, &expected, self.pattern.as_ref()))
    }
}

#[derive(Debug, Clone)]
pub enum Condition {
    Compare(Comparison),
    IdIn(BTreeSet<Uuid>),
    /// True when every member is; an empty list is true.
    All(Vec<Condition>),
    /// True when any member is; an empty list is false.
    Any(Vec<Condition>),
    Not(Box<Condition>),
}

impl Condition {
    pub fn evaluate(&self, row: &Row<'_>) -> bool {
        match self {
            Condition::Compare(cmp) => cmp.evaluate(row),
            Condition::IdIn(ids) => ids.contains(&row.user.id),
            Condition::All(items) => items.iter().all(|c| c.evaluate(row)),
            Condition::Any(items) => items.iter().any(|c| c.evaluate(row)),
            Condition::Not(inner) => !inner.evaluate(row),
        }
    }

    fn annotation_refs<'a>(&'a self, out: &mut Vec<&'a str>) {
        match self {
            Condition::Compare(cmp) => {
                if let FieldRef::Annotation(alias) = &cmp.field {
                    out.push(alias);
                }
            }
            Condition::IdIn(_) => {}
            Condition::All(items) | Condition::Any(items) => {
                items.iter().for_each(|c| c.annotation_refs(out))
            }
            Condition::Not(inner) => inner.annotation_refs(out),
        }
    }
}

/// One user plus the annotation values computed for it.
pub struct Row<'a> {
    pub user: &'a User,
    pub annotations: HashMap<String, Value>,
}

impl<'a> Row<'a> {
    pub fn new(user: &'a User, annotations: &[Annotation]) -> Self {
        let annotations = annotations
            .iter()
            .map(|a| (a.alias.clone(), Value::from(distinct_count(user, &a.relation))))
            .collect();
        Self { user, annotations }
    }

    fn values(&self, field: &FieldRef) -> Vec<Value> {
        match field {
            FieldRef::Path(path) => self.path_values(path),
            FieldRef::Annotation(alias) => self.annotations.get(alias).cloned().into_iter().collect(),
        }
    }

    /// Field references may name an annotation alias as well as a real field.
    fn path_values(&self, path: &FieldPath) -> Vec<Value> {
        if let [single] = path.segments() {
            if let Some(value) = self.annotations.get(single) {
                return vec![value.clone()];
            }
        }
        self.user.values_at(path.segments())
    }
}

/// Number of distinct related entries reachable through `relation`.
///
/// Scalars are treated as keys and counted once per value. Objects count
/// once per `id` when they carry one; objects without an `id` are separate
/// rows and always count. Nulls never count.
pub fn distinct_count(user: &User, relation: &FieldPath) -> u64 {
    let mut keys = BTreeSet::new();
    let mut anonymous = 0u64;
    let mut tally = |item: Value| match item {
        Value::Null => {}
        Value::Object(map) => match map.get("id").filter(|id| !id.is_null()) {
            Some(id) => {
                keys.insert(id.to_string());
            }
            None => anonymous += 1,
        },
        other => {
            keys.insert(other.to_string());
        }
    };
    for value in user.values_at(relation.segments()) {
        match value {
            Value::Array(items) => items.into_iter().for_each(&mut tally),
            other => tally(other),
        }
    }
    keys.len() as u64 + anonymous
}

/// An immutable-by-value query: each operation returns a new query.
#[derive(Debug, Clone, Default)]
pub struct UserQuery {
    annotations: Vec<Annotation>,
    conditions: Vec<Condition>,
}

impl UserQuery {
    pub fn all() -> Self {
        Self::default()
    }

    /// Request an annotation. Asking again for an identical annotation is a
    /// no-op; reusing an alias for a different relation is an error.
    pub fn annotate(mut self, annotation: Annotation) -> DripResult<Self> {
        match self.annotations.iter().find(|a| a.alias == annotation.alias) {
            Some(existing) if existing.relation == annotation.relation => Ok(self),
            Some(existing) => Err(DripError::Query(format!(
                "annotation '{}' already counts '{}', cannot count '{}'",
                annotation.alias, existing.relation, annotation.relation
            ))),
            None => {
                self.annotations.push(annotation);
                Ok(self)
            }
        }
    }

    pub fn filter(mut self, condition: Condition) -> DripResult<Self> {
        self.check_refs(&condition)?;
        self.conditions.push(condition);
        Ok(self)
    }

    pub fn exclude(mut self, condition: Condition) -> DripResult<Self> {
        self.check_refs(&condition)?;
        self.conditions.push(Condition::Not(Box::new(condition)));
        Ok(self)
    }

    pub fn annotations(&self) -> &[Annotation] {
        &self.annotations
    }

    pub fn conditions(&self) -> &[Condition] {
        &self.conditions
    }

    pub fn matches(&self, user: &User) -> bool {
        let row = Row::new(user, &self.annotations);
        self.conditions.iter().all(|c| c.evaluate(&row))
    }

    /// Conditions may only read annotations already requested on the query.
    fn check_refs(&self, condition: &Condition) -> DripResult<()> {
        let mut refs = Vec::new();
        condition.annotation_refs(&mut refs);
        for alias in refs {
            if !self.annotations.iter().any(|a| a.alias == alias) {
                return Err(DripError::Query(format!(
                    "'{alias}' is referenced before it is annotated"
                )));
            }
        }
        Ok(())
    }
}

/// The user collection collaborator.
pub trait UserCollection: Send + Sync {
    /// Users matching `query`, in the collection's natural order.
    fn fetch(&self, query: &UserQuery) -> DripResult<Vec<User>>;

    fn count(&self, query: &UserQuery) -> DripResult<usize> {
        Ok(self.fetch(query)?.len())
    }

    fn get(&self, id: &Uuid) -> Option<User>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn compare_cond(field: &str, lookup: Lookup, value: RuleValue) -> Condition {
        Condition::Compare(
            Comparison::new(FieldRef::Path(FieldPath::parse(field).unwrap()), lookup, value).unwrap(),
        )
    }

    fn purchases() -> Annotation {
        Annotation {
            alias: "num_purchases".into(),
            relation: FieldPath::single("purchases"),
        }
    }

    #[test]
    fn test_empty_all_is_true_and_empty_any_is_false() {
        let user = User::new("a@example.com");
        let row = Row::new(&user, &[]);
        assert!(Condition::All(vec![]).evaluate(&row));
        assert!(!Condition::Any(vec![]).evaluate(&row));
    }

    #[test]
    fn test_exclude_negates() {
        let user = User::new("a@example.com").with_field("country", json!("FR"));
        let query = UserQuery::all()
            .exclude(compare_cond("country", Lookup::Exact, RuleValue::Text("FR".into())))
            .unwrap();
        assert!(!query.matches(&user));
    }

    #[test]
    fn test_id_in_matches_listed_ids() {
        let user = User::new("a@example.com");
        let query = UserQuery::all()
            .exclude(Condition::IdIn([user.id].into_iter().collect()))
            .unwrap();
        assert!(!query.matches(&user));
        assert!(query.matches(&User::new("b@example.com")));
    }

    #[test]
    fn test_identical_annotation_twice_is_a_no_op() {
        let query = UserQuery::all()
            .annotate(purchases())
            .unwrap()
            .annotate(purchases())
            .unwrap();
        assert_eq!(query.annotations().len(), 1);
    }

    #[test]
    fn test_conflicting_annotation_alias_is_rejected() {
        let conflicting = Annotation {
            alias: "num_purchases".into(),
            relation: FieldPath::single("refunds"),
        };
        let err = UserQuery::all()
            .annotate(purchases())
            .unwrap()
            .annotate(conflicting)
            .unwrap_err();
        assert!(matches!(err, DripError::Query(_)));
    }

    #[test]
    fn test_annotation_must_precede_reference() {
        let cond = Condition::Compare(
            Comparison::new(
                FieldRef::Annotation("num_purchases".into()),
                Lookup::Gte,
                RuleValue::Text("2".into()),
            )
            .unwrap(),
        );
        assert!(UserQuery::all().filter(cond.clone()).is_err());
        let query = UserQuery::all().annotate(purchases()).unwrap().filter(cond).unwrap();
        let buyer = User::new("a@example.com").with_field("purchases", json!(["a", "b", "b"]));
        let browser = User::new("b@example.com").with_field("purchases", json!(["a"]));
        assert!(query.matches(&buyer));
        assert!(!query.matches(&browser));
    }

    #[test]
    fn test_distinct_count_ignores_duplicates_and_nulls() {
        let user = User::new("a@example.com").with_field("purchases", json!([1, 2, 2, null]));
        assert_eq!(distinct_count(&user, &FieldPath::single("purchases")), 2);
        assert_eq!(distinct_count(&user, &FieldPath::single("missing")), 0);
    }

    #[test]
    fn test_distinct_count_keys_related_rows_by_id() {
        let user = User::new("a@example.com").with_field(
            "purchases",
            json!([
                {"id": 1, "sku": "mug"},
                {"id": 1, "sku": "mug"},
                {"id": 2, "sku": "mug"},
                {"sku": "tea"},
                {"sku": "tea"}
            ]),
        );
        assert_eq!(distinct_count(&user, &FieldPath::single("purchases")), 4);
    }

    #[test]
    fn test_field_reference_compares_against_same_row() {
        let cond = compare_cond(
            "last_login",
            Lookup::Lt,
            RuleValue::Field(FieldPath::single("date_joined")),
        );
        let query = UserQuery::all().filter(cond).unwrap();
        let never_returned = User::new("a@example.com")
            .with_field("last_login", json!("2024-01-01T00:00:00Z"))
            .with_field("date_joined", json!("2024-01-02T00:00:00Z"));
        let returned = User::new("b@example.com")
            .with_field("last_login", json!("2024-02-01T00:00:00Z"))
            .with_field("date_joined", json!("2024-01-02T00:00:00Z"));
        assert!(query.matches(&never_returned));
        assert!(!query.matches(&returned));
    }

    #[test]
    fn test_invalid_literal_regex_fails_at_construction() {
        let err = Comparison::new(
            FieldRef::Path(FieldPath::single("email")),
            Lookup::Regex,
            RuleValue::Text("([".into()),
        )
        .unwrap_err();
        assert!(matches!(err, DripError::InvalidRule(_)));
    }
}
