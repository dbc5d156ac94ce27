use chrono::{DateTime, Utc};
use drip_channels::{HtmlTransform, RenderContext, TemplateRenderer};
use drip_core::config::DripConfig;
use drip_core::{DripError, DripResult, User};
use drip_segmentation::{EvaluationTime, Rule, UserCollection};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A drip campaign definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Drip {
    pub id: Uuid,
    /// Unique across the store.
    pub name: String,
    pub from_email: Option<String>,
    pub sender_name: Option<String>,
    pub subject_template: Option<String>,
    pub text_template: Option<String>,
    pub html_template: Option<String>,
    pub active: bool,
    /// Applied in order, though order does not change the audience.
    #[serde(default)]
    pub rules: Vec<Rule>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Subject and bodies rendered for one user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenderedEmail {
    pub subject: String,
    pub text_body: String,
    pub html_body: String,
}

/// Everything a render needs besides the drip and the user.
pub struct RenderEnv<'a> {
    pub renderer: &'a dyn TemplateRenderer,
    pub html_transform: Option<&'a dyn HtmlTransform>,
    pub config: &'a DripConfig,
}

impl Drip {
    pub fn new(name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            from_email: None,
            sender_name: None,
            subject_template: None,
            text_template: None,
            html_template: None,
            active: false,
            rules: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn from_email(mut self, email: impl Into<String>) -> Self {
        self.from_email = Some(email.into());
        self
    }

    pub fn sender_name(mut self, name: impl Into<String>) -> Self {
        self.sender_name = Some(name.into());
        self
    }

    pub fn subject(mut self, template: impl Into<String>) -> Self {
        self.subject_template = Some(template.into());
        self
    }

    pub fn text(mut self, template: impl Into<String>) -> Self {
        self.text_template = Some(template.into());
        self
    }

    pub fn html(mut self, template: impl Into<String>) -> Self {
        self.html_template = Some(template.into());
        self
    }

    pub fn active(mut self, active: bool) -> Self {
        self.active = active;
        self
    }

    /// Validate `rule` with a trial query and attach it. Invalid rules are
    /// rejected and the drip is left unchanged.
    pub fn add_rule(
        &mut self,
        mut rule: Rule,
        users: &dyn UserCollection,
        at: &EvaluationTime,
    ) -> DripResult<()> {
        rule.drip_id = self.id;
        rule.validate(users, at)?;
        self.rules.push(rule);
        self.updated_at = Utc::now();
        Ok(())
    }

    pub fn remove_rule(&mut self, rule_id: &Uuid) -> DripResult<Rule> {
        let index = self
            .rules
            .iter()
            .position(|r| &r.id == rule_id)
            .ok_or_else(|| DripError::not_found("rule", rule_id))?;
        self.updated_at = Utc::now();
        Ok(self.rules.remove(index))
    }

    /// Explicit sender, else the configured default.
    pub fn effective_from_email(&self, config: &DripConfig) -> String {
        match self.from_email.as_deref() {
            Some(email) if !email.trim().is_empty() => email.to_string(),
            _ => config.default_from_email.clone(),
        }
    }

    pub fn effective_sender_name(&self, config: &DripConfig) -> String {
        match self.sender_name.as_deref() {
            Some(name) if !name.trim().is_empty() => name.to_string(),
            _ => config.default_sender_name.clone(),
        }
    }

    pub fn render_subject(&self, user: &User, env: &RenderEnv<'_>) -> DripResult<String> {
        render_optional(&self.subject_template, user, env.renderer)
    }

    pub fn render_text(&self, user: &User, env: &RenderEnv<'_>) -> DripResult<String> {
        render_optional(&self.text_template, user, env.renderer)
    }

    /// Renders the html body and, when enabled, runs the post-processing step.
    pub fn render_html(&self, user: &User, env: &RenderEnv<'_>) -> DripResult<String> {
        let html = render_optional(&self.html_template, user, env.renderer)?;
        match env.html_transform {
            Some(transform) if env.config.html_post_process && !html.is_empty() => {
                transform.transform(&html)
            }
            _ => Ok(html),
        }
    }

    pub fn render_for(&self, user: &User, env: &RenderEnv<'_>) -> DripResult<RenderedEmail> {
        Ok(RenderedEmail {
            subject: self.render_subject(user, env)?,
            text_body: self.render_text(user, env)?,
            html_body: self.render_html(user, env)?,
        })
    }
}

fn render_optional(
    template: &Option<String>,
    user: &User,
    renderer: &dyn TemplateRenderer,
) -> DripResult<String> {
    match template.as_deref() {
        Some(t) if !t.is_empty() => renderer.render(t, &RenderContext::for_user(user)),
        _ => Ok(String::new()),
    }
}
