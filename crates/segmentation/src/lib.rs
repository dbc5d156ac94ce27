//! Audience segmentation for drips — the rule language, symbolic value
//! resolution, the query model, and the selector that composes them.

pub mod field;
pub mod memory;
pub mod predicates;
pub mod query;
pub mod resolver;
pub mod rule;
pub mod selector;

pub use field::{FieldPath, RuleTarget};
pub use memory::InMemoryUsers;
pub use predicates::{Lookup, Method};
pub use query::{Annotation, Condition, UserCollection, UserQuery};
pub use resolver::{resolve, EvaluationTime, RuleValue};
pub use rule::Rule;
pub use selector::AudienceSelector;
