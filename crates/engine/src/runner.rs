//! Drip run orchestration: select the audience, render, and enqueue.

use chrono::{DateTime, Utc};
use drip_channels::{HtmlTransform, TemplateRenderer};
use drip_core::config::DripConfig;
use drip_core::{DripError, DripResult, User};
use drip_segmentation::{AudienceSelector, EvaluationTime, UserCollection};
use serde::Serialize;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::drip::{Drip, RenderEnv, RenderedEmail};
use crate::sent::SentRecord;
use crate::store::{DripStore, Enqueued};

/// A user whose enqueue was abandoned during a run.
#[derive(Debug, Clone, Serialize)]
pub struct UserFailure {
    pub user_id: Uuid,
    pub error: String,
}

/// Outcome of one drip run.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub drip_id: Uuid,
    pub drip_name: String,
    pub now: DateTime<Utc>,
    pub selected: usize,
    pub enqueued: Vec<Uuid>,
    /// Users a concurrent run enqueued between selection and insert.
    pub already_queued: usize,
    pub failures: Vec<UserFailure>,
}

pub struct DripRunner<'a> {
    store: &'a DripStore,
    users: &'a dyn UserCollection,
    renderer: &'a dyn TemplateRenderer,
    html_transform: Option<&'a dyn HtmlTransform>,
    config: &'a DripConfig,
}

impl<'a> DripRunner<'a> {
    pub fn new(
        store: &'a DripStore,
        users: &'a dyn UserCollection,
        renderer: &'a dyn TemplateRenderer,
        config: &'a DripConfig,
    ) -> Self {
        Self {
            store,
            users,
            renderer,
            html_transform: None,
            config,
        }
    }

    /// Post-processing step used for html bodies when the config enables it.
    pub fn with_html_transform(mut self, transform: &'a dyn HtmlTransform) -> Self {
        self.html_transform = Some(transform);
        self
    }

    fn env(&self) -> RenderEnv<'_> {
        RenderEnv {
            renderer: self.renderer,
            html_transform: self.html_transform,
            config: self.config,
        }
    }

    fn evaluation_time(&self, now: DateTime<Utc>) -> EvaluationTime {
        EvaluationTime::utc(now).with_offset(self.config.time_zone())
    }

    /// Users the drip would enqueue if it ran at `now`.
    pub fn audience(&self, drip: &Drip, now: DateTime<Utc>) -> DripResult<Vec<User>> {
        let contacted = self.store.contacted_users(&drip.id);
        AudienceSelector::new(self.users).select(&drip.rules, contacted, &self.evaluation_time(now))
    }

    /// Run one drip as of `now`. A render failure for one user is recorded in
    /// the report and the run carries on with the rest.
    pub fn run(&self, drip_id: &Uuid, now: DateTime<Utc>) -> DripResult<RunReport> {
        let drip = self
            .store
            .get_drip(drip_id)
            .ok_or_else(|| DripError::not_found("drip", drip_id))?;

        let from_email = drip.effective_from_email(self.config);
        let sender_name = drip.effective_sender_name(self.config);
        let audience = self.audience(&drip, now)?;
        let env = self.env();

        let mut report = RunReport {
            drip_id: drip.id,
            drip_name: drip.name.clone(),
            now,
            selected: audience.len(),
            enqueued: Vec::new(),
            already_queued: 0,
            failures: Vec::new(),
        };

        for user in &audience {
            let outcome = self.store.get_or_create_record(drip.id, user.id, || {
                let content = drip.render_for(user, &env)?;
                Ok(SentRecord::queued(
                    drip.id,
                    user.id,
                    &user.email,
                    &from_email,
                    &sender_name,
                    content,
                ))
            });
            match outcome {
                Ok((record, Enqueued::Created)) => {
                    debug!(drip = %drip.name, user_id = %user.id, record_id = %record.id, "Enqueued drip");
                    metrics::counter!("drip.records_enqueued", "drip" => drip.name.clone()).increment(1);
                    report.enqueued.push(user.id);
                }
                Ok((_, Enqueued::Existing)) => report.already_queued += 1,
                Err(err) => {
                    warn!(drip = %drip.name, user_id = %user.id, error = %err, "Skipping user");
                    metrics::counter!("drip.render_failures", "drip" => drip.name.clone()).increment(1);
                    report.failures.push(UserFailure {
                        user_id: user.id,
                        error: err.to_string(),
                    });
                }
            }
        }

        info!(
            drip = %drip.name,
            now = %now,
            selected = report.selected,
            enqueued = report.enqueued.len(),
            failed = report.failures.len(),
            "Drip run complete"
        );
        Ok(report)
    }

    /// Run every active drip as of `now`. A drip whose audience query fails is
    /// logged and skipped.
    pub fn run_active(&self, now: DateTime<Utc>) -> Vec<RunReport> {
        self.store
            .active_drips()
            .iter()
            .filter_map(|drip| match self.run(&drip.id, now) {
                Ok(report) => Some(report),
                Err(err) => {
                    warn!(drip = %drip.name, error = %err, "Drip run failed");
                    None
                }
            })
            .collect()
    }

    /// Render a drip for one user without enqueueing anything.
    pub fn preview(&self, drip_id: &Uuid, user_id: &Uuid) -> DripResult<RenderedEmail> {
        let drip = self
            .store
            .get_drip(drip_id)
            .ok_or_else(|| DripError::not_found("drip", drip_id))?;
        let user = self
            .users
            .get(user_id)
            .ok_or_else(|| DripError::not_found("user", user_id))?;
        drip.render_for(&user, &self.env())
    }
}
