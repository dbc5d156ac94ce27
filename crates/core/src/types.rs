use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// A recipient record. Only `id` and `email` are fixed; everything else is an
/// open set of named fields that rules may query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,
    pub email: String,
    #[serde(default)]
    pub fields: Map<String, Value>,
}

impl User {
    pub fn new(email: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            email: email.into(),
            fields: Map::new(),
        }
    }

    /// Builder-style field setter, mostly for fixtures.
    pub fn with_field(mut self, name: impl Into<String>, value: Value) -> Self {
        self.fields.insert(name.into(), value);
        self
    }

    /// Look up a top-level field. `id` and `email` resolve to the fixed columns.
    pub fn field(&self, name: &str) -> Option<Value> {
        match name {
            "id" => Some(Value::String(self.id.to_string())),
            "email" => Some(Value::String(self.email.clone())),
            other => self.fields.get(other).cloned(),
        }
    }

    /// Walk a path of segments through nested objects. Arrays met along the
    /// way fan out, so the result may hold several values.
    pub fn values_at(&self, segments: &[String]) -> Vec<Value> {
        let Some((head, rest)) = segments.split_first() else {
            return Vec::new();
        };
        let Some(root) = self.field(head) else {
            return Vec::new();
        };
        let mut current = vec![root];
        for segment in rest {
            let mut next = Vec::new();
            for value in current {
                collect_child(&value, segment, &mut next);
            }
            current = next;
        }
        current
    }

    /// The record as a JSON object, the shape templates see as `user`.
    pub fn to_context(&self) -> Value {
        let mut map = self.fields.clone();
        map.insert("id".to_string(), Value::String(self.id.to_string()));
        map.insert("email".to_string(), Value::String(self.email.clone()));
        Value::Object(map)
    }
}

fn collect_child(value: &Value, segment: &str, out: &mut Vec<Value>) {
    match value {
        Value::Object(map) => {
            if let Some(child) = map.get(segment) {
                out.push(child.clone());
            }
        }
        Value::Array(items) => {
            for item in items {
                collect_child(item, segment, out);
            }
        }
        _ => {}
    }
}
