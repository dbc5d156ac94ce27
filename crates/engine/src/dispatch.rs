//! Dispatch pass: submit queued records and mark the accepted ones sent.

use drip_channels::MailTransport;
use drip_core::{DripError, DripResult};
use serde::Serialize;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::sent::SentRecord;
use crate::store::DripStore;

#[derive(Debug, Clone, Serialize)]
pub struct DispatchFailure {
    pub record_id: Uuid,
    pub error: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct DispatchReport {
    pub attempted: usize,
    pub sent: Vec<Uuid>,
    /// Records another dispatcher was already handling.
    pub skipped: usize,
    pub failures: Vec<DispatchFailure>,
}

pub struct Dispatcher<'a> {
    store: &'a DripStore,
    transport: &'a dyn MailTransport,
}

impl<'a> Dispatcher<'a> {
    pub fn new(store: &'a DripStore, transport: &'a dyn MailTransport) -> Self {
        Self { store, transport }
    }

    /// Send one record. On transport failure the record stays queued and the
    /// error is returned.
    pub fn dispatch(&self, record_id: &Uuid) -> DripResult<SentRecord> {
        let record = self
            .store
            .get_record(record_id)
            .ok_or_else(|| DripError::not_found("sent record", record_id))?;
        if !record.is_queued() {
            return Err(DripError::InvalidTransition {
                from: record.state.to_string(),
                to: "sent".to_string(),
            });
        }
        if !self.store.claim(record_id) {
            return Err(DripError::InFlight(record_id.to_string()));
        }

        self.submit(&record)
    }

    /// Submit a record this dispatcher has claimed, then release the claim.
    fn submit(&self, record: &SentRecord) -> DripResult<SentRecord> {
        let result = self
            .transport
            .send(&record.message())
            .and_then(|()| self.store.mark_sent(&record.id));
        self.store.release(&record.id);

        match &result {
            Ok(sent) => {
                debug!(record_id = %sent.id, to = %sent.recipient, "Drip email sent");
                metrics::counter!("drip.emails_sent").increment(1);
            }
            Err(err) => {
                warn!(record_id = %record.id, to = %record.recipient, error = %err, "Drip email failed");
                metrics::counter!("drip.transport_failures").increment(1);
            }
        }
        result
    }

    /// Attempt every queued record once. Failures are collected, not retried.
    pub fn dispatch_queued(&self) -> DispatchReport {
        let mut report = DispatchReport::default();
        for record in self.store.queued_records() {
            if !self.store.claim(&record.id) {
                report.skipped += 1;
                continue;
            }
            report.attempted += 1;
            match self.submit(&record) {
                Ok(sent) => report.sent.push(sent.id),
                Err(err) => report.failures.push(DispatchFailure {
                    record_id: record.id,
                    error: err.to_string(),
                }),
            }
        }
        info!(
            attempted = report.attempted,
            sent = report.sent.len(),
            failed = report.failures.len(),
            skipped = report.skipped,
            "Dispatch pass complete"
        );
        report
    }
}
