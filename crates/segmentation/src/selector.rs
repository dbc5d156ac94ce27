//! Audience selection: composes a drip's rules and its already-contacted
//! users into one query against the user collection.

use std::collections::BTreeSet;

use drip_core::{DripResult, User};
use tracing::debug;
use uuid::Uuid;

use crate::predicates::Method;
use crate::query::{Condition, UserCollection, UserQuery};
use crate::resolver::EvaluationTime;
use crate::rule::Rule;

pub struct AudienceSelector<'a> {
    users: &'a dyn UserCollection,
}

impl<'a> AudienceSelector<'a> {
    pub fn new(users: &'a dyn UserCollection) -> Self {
        Self { users }
    }

    /// Build the query: users not yet contacted, matching every filter rule
    /// and none of the exclude rules.
    pub fn build_query(
        &self,
        rules: &[Rule],
        contacted: BTreeSet<Uuid>,
        at: &EvaluationTime,
    ) -> DripResult<UserQuery> {
        let mut query = UserQuery::all();
        if !contacted.is_empty() {
            query = query.exclude(Condition::IdIn(contacted))?;
        }

        let mut filters = Vec::new();
        let mut excludes = Vec::new();
        for rule in rules {
            let condition = rule.condition(at)?;
            match rule.method {
                Method::Filter => filters.push(condition),
                Method::Exclude => excludes.push(condition),
            }
            if let Some(annotation) = rule.annotation() {
                query = query.annotate(annotation)?;
            }
        }

        if !excludes.is_empty() {
            query = query.exclude(Condition::Any(excludes))?;
        }
        if !filters.is_empty() {
            query = query.filter(Condition::All(filters))?;
        }
        Ok(query)
    }

    pub fn select(
        &self,
        rules: &[Rule],
        contacted: BTreeSet<Uuid>,
        at: &EvaluationTime,
    ) -> DripResult<Vec<User>> {
        let excluded = contacted.len();
        let query = self.build_query(rules, contacted, at)?;
        let audience = self.users.fetch(&query)?;
        debug!(
            rules = rules.len(),
            already_contacted = excluded,
            selected = audience.len(),
            now = %at.now,
            "Selected audience"
        );
        Ok(audience)
    }
}
