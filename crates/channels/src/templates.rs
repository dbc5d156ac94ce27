//! Template rendering for drip subjects and bodies.
//!
//! `TemplateRenderer` is the seam; `TemplateEngine` is the built-in
//! implementation: `{{ user.first_name }}` lookups with optional filters
//! such as `{{ user.first_name | capitalize }}` or `{{ user.nick | default:"friend" }}`.

use std::collections::HashMap;

use drip_core::{DripError, DripResult, User};
use serde_json::Value;

/// Variables visible to a template.
#[derive(Debug, Clone, Default)]
pub struct RenderContext {
    vars: HashMap<String, Value>,
}

impl RenderContext {
    pub fn for_user(user: &User) -> Self {
        let mut vars = HashMap::new();
        vars.insert("user".to_string(), user.to_context());
        Self { vars }
    }

    /// Resolve a dotted path such as `user.profile.city`.
    pub fn lookup(&self, path: &str) -> Option<&Value> {
        let mut parts = path.split('.');
        let mut current = self.vars.get(parts.next()?)?;
        for part in parts {
            current = match current {
                Value::Object(map) => map.get(part)?,
                Value::Array(items) => items.get(part.parse::<usize>().ok()?)?,
                _ => return None,
            };
        }
        Some(current)
    }
}

pub trait TemplateRenderer: Send + Sync {
    fn render(&self, template: &str, context: &RenderContext) -> DripResult<String>;
}

type FilterFn = Box<dyn Fn(&str, Option<&str>) -> String + Send + Sync>;

pub struct TemplateEngine {
    filters: HashMap<String, FilterFn>,
}

impl TemplateEngine {
    pub fn new() -> Self {
        let mut filters: HashMap<String, FilterFn> = HashMap::new();
        filters.insert("upper".to_string(), Box::new(|s: &str, _: Option<&str>| s.to_uppercase()));
        filters.insert("lower".to_string(), Box::new(|s: &str, _: Option<&str>| s.to_lowercase()));
        filters.insert(
            "capitalize".to_string(),
            Box::new(|s: &str, _: Option<&str>| {
                let mut chars = s.chars();
                match chars.next() {
                    None => String::new(),
                    Some(c) => c.to_uppercase().to_string() + chars.as_str(),
                }
            }),
        );
        filters.insert("strip".to_string(), Box::new(|s: &str, _: Option<&str>| s.trim().to_string()));
        filters.insert(
            "default".to_string(),
            Box::new(|s: &str, arg: Option<&str>| {
                if s.is_empty() {
                    arg.unwrap_or_default().to_string()
                } else {
                    s.to_string()
                }
            }),
        );
        Self { filters }
    }

    fn evaluate(&self, expr: &str, context: &RenderContext) -> DripResult<String> {
        let mut pieces = expr.split('|').map(str::trim);
        let path = pieces.next().unwrap_or_default();
        if path.is_empty() {
            return Err(DripError::Render("empty variable tag".to_string()));
        }
        let mut output = context.lookup(path).map(display).unwrap_or_default();

        for filter in pieces {
            let (name, arg) = match filter.split_once(':') {
                Some((name, arg)) => (name.trim(), Some(unquote(arg.trim()))),
                None => (filter, None),
            };
            let apply = self
                .filters
                .get(name)
                .ok_or_else(|| DripError::Render(format!("unknown filter '{name}'")))?;
            output = apply(&output, arg);
        }
        Ok(output)
    }
}

impl Default for TemplateEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl TemplateRenderer for TemplateEngine {
    fn render(&self, template: &str, context: &RenderContext) -> DripResult<String> {
        let mut result = String::with_capacity(template.len());
        let mut rest = template;
        while let Some(start) = rest.find("{{") {
            result.push_str(&rest[..start]);
            let after = &rest[start + 2..];
            let end = after
                .find("}}")
                .ok_or_else(|| DripError::Render("unclosed '{{' tag".to_string()))?;
            result.push_str(&self.evaluate(after[..end].trim(), context)?);
            rest = &after[end + 2..];
        }
        result.push_str(rest);
        Ok(result)
    }
}

fn display(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

fn unquote(arg: &str) -> &str {
    arg.strip_prefix('"')
        .and_then(|a| a.strip_suffix('"'))
        .unwrap_or(arg)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ctx() -> RenderContext {
        RenderContext::for_user(
            &User::new("ada@example.com")
                .with_field("first_name", json!("ada"))
                .with_field("profile", json!({"city": "London"}))
                .with_field("visits", json!(3)),
        )
    }

    #[test]
    fn test_substitutes_user_fields() {
        let out = TemplateEngine::new()
            .render("Hi {{ user.first_name }} from {{user.profile.city}}!", &ctx())
            .unwrap();
        assert_eq!(out, "Hi ada from London!");
    }

    #[test]
    fn test_renders_numbers_and_fixed_columns() {
        let out = TemplateEngine::new()
            .render("{{ user.visits }} visits, {{ user.email }}", &ctx())
            .unwrap();
        assert_eq!(out, "3 visits, ada@example.com");
    }

    #[test]
    fn test_applies_filters_in_order() {
        let out = TemplateEngine::new()
            .render("{{ user.first_name | upper }} {{ user.first_name | capitalize }}", &ctx())
            .unwrap();
        assert_eq!(out, "ADA Ada");
    }

    #[test]
    fn test_missing_values_render_empty_or_default() {
        let engine = TemplateEngine::new();
        assert_eq!(engine.render("[{{ user.nick }}]", &ctx()).unwrap(), "[]");
        assert_eq!(
            engine.render("{{ user.nick | default:\"friend\" }}", &ctx()).unwrap(),
            "friend"
        );
    }

    #[test]
    fn test_syntax_errors_are_render_errors() {
        let engine = TemplateEngine::new();
        assert!(matches!(engine.render("Hi {{ user.first_name", &ctx()), Err(DripError::Render(_))));
        assert!(matches!(engine.render("{{ }}", &ctx()), Err(DripError::Render(_))));
        assert!(matches!(
            engine.render("{{ user.first_name | shout }}", &ctx()),
            Err(DripError::Render(_))
        ));
    }

    #[test]
    fn test_plain_text_passes_through() {
        assert_eq!(TemplateEngine::new().render("no tags", &ctx()).unwrap(), "no tags");
    }
}
