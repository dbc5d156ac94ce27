//! In-memory drip store backed by DashMap.
//!
//! Holds drips and their sent records. The (drip, user) pair index is the
//! uniqueness constraint behind idempotent enqueueing, and the in-flight set
//! makes the queued-to-sent transition safe across concurrent dispatchers.

use std::collections::BTreeSet;

use chrono::Utc;
use dashmap::mapref::entry::Entry;
use dashmap::{DashMap, DashSet};
use drip_core::{DripError, DripResult};
use tracing::{debug, info};
use uuid::Uuid;

use crate::drip::Drip;
use crate::sent::{SendState, SentRecord};

/// Whether a get-or-create call inserted a new record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Enqueued {
    Created,
    Existing,
}

#[derive(Debug, Default)]
pub struct DripStore {
    drips: DashMap<Uuid, Drip>,
    names: DashMap<String, Uuid>,
    records: DashMap<Uuid, SentRecord>,
    by_pair: DashMap<(Uuid, Uuid), Uuid>,
    in_flight: DashSet<Uuid>,
}

impl DripStore {
    pub fn new() -> Self {
        debug!("Drip store initialized (in-memory)");
        Self::default()
    }

    // ─── Drips ─────────────────────────────────────────────────────────────

    pub fn create_drip(&self, drip: Drip) -> DripResult<Drip> {
        match self.names.entry(drip.name.clone()) {
            Entry::Occupied(_) => Err(DripError::DuplicateName(drip.name)),
            Entry::Vacant(slot) => {
                slot.insert(drip.id);
                info!(drip_id = %drip.id, name = %drip.name, "Created drip");
                self.drips.insert(drip.id, drip.clone());
                Ok(drip)
            }
        }
    }

    pub fn get_drip(&self, id: &Uuid) -> Option<Drip> {
        self.drips.get(id).map(|d| d.clone())
    }

    pub fn get_drip_by_name(&self, name: &str) -> Option<Drip> {
        let id = *self.names.get(name)?;
        self.get_drip(&id)
    }

    /// All drips, oldest first.
    pub fn list_drips(&self) -> Vec<Drip> {
        let mut drips: Vec<Drip> = self.drips.iter().map(|d| d.value().clone()).collect();
        drips.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.name.cmp(&b.name)));
        drips
    }

    pub fn active_drips(&self) -> Vec<Drip> {
        self.list_drips().into_iter().filter(|d| d.active).collect()
    }

    /// Mutate a drip in place. Renames go through the uniqueness check.
    pub fn update_drip<F>(&self, id: &Uuid, update: F) -> DripResult<Drip>
    where
        F: FnOnce(&mut Drip) -> DripResult<()>,
    {
        let mut entry = self
            .drips
            .get_mut(id)
            .ok_or_else(|| DripError::not_found("drip", id))?;
        let mut draft = entry.clone();
        update(&mut draft)?;
        if draft.name != entry.name {
            match self.names.entry(draft.name.clone()) {
                Entry::Occupied(_) => return Err(DripError::DuplicateName(draft.name)),
                Entry::Vacant(slot) => {
                    slot.insert(*id);
                }
            }
            self.names.remove(&entry.name);
        }
        draft.id = *id;
        draft.updated_at = Utc::now();
        *entry = draft.clone();
        Ok(draft)
    }

    // ─── Sent records ──────────────────────────────────────────────────────

    /// Users that already have a record for `drip_id`, in any state.
    pub fn contacted_users(&self, drip_id: &Uuid) -> BTreeSet<Uuid> {
        self.by_pair
            .iter()
            .filter(|e| &e.key().0 == drip_id)
            .map(|e| e.key().1)
            .collect()
    }

    /// Return the record for (drip, user), creating it with `make` only when
    /// none exists. The pair index entry is held while `make` runs, so a
    /// concurrent call for the same pair sees `Existing` rather than inserting
    /// twice. If `make` fails nothing is stored.
    pub fn get_or_create_record<F>(
        &self,
        drip_id: Uuid,
        user_id: Uuid,
        make: F,
    ) -> DripResult<(SentRecord, Enqueued)>
    where
        F: FnOnce() -> DripResult<SentRecord>,
    {
        match self.by_pair.entry((drip_id, user_id)) {
            Entry::Occupied(slot) => {
                let record = self
                    .records
                    .get(slot.get())
                    .map(|r| r.clone())
                    .ok_or_else(|| DripError::not_found("sent record", slot.get()))?;
                Ok((record, Enqueued::Existing))
            }
            Entry::Vacant(slot) => {
                let record = make()?;
                self.records.insert(record.id, record.clone());
                slot.insert(record.id);
                Ok((record, Enqueued::Created))
            }
        }
    }

    pub fn get_record(&self, id: &Uuid) -> Option<SentRecord> {
        self.records.get(id).map(|r| r.clone())
    }

    pub fn record_for(&self, drip_id: &Uuid, user_id: &Uuid) -> Option<SentRecord> {
        let id = *self.by_pair.get(&(*drip_id, *user_id))?;
        self.get_record(&id)
    }

    /// Records for one drip, oldest first.
    pub fn records_for_drip(&self, drip_id: &Uuid) -> Vec<SentRecord> {
        self.sorted(|r| &r.drip_id == drip_id)
    }

    /// Records currently queued, oldest first.
    pub fn queued_records(&self) -> Vec<SentRecord> {
        self.sorted(|r| r.state == SendState::Queued)
    }

    pub fn all_records(&self) -> Vec<SentRecord> {
        self.sorted(|_| true)
    }

    fn sorted(&self, keep: impl Fn(&SentRecord) -> bool) -> Vec<SentRecord> {
        let mut records: Vec<SentRecord> = self
            .records
            .iter()
            .filter(|r| keep(r.value()))
            .map(|r| r.value().clone())
            .collect();
        records.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        records
    }

    /// Reserve a queued record for submission. Returns `false` when the record
    /// is not queued or another dispatcher already holds it.
    pub fn claim(&self, id: &Uuid) -> bool {
        // Holders mark sent before releasing, so the state is checked only
        // once the slot is ours.
        if !self.in_flight.insert(*id) {
            return false;
        }
        if self.records.get(id).is_some_and(|r| r.is_queued()) {
            return true;
        }
        self.in_flight.remove(id);
        false
    }

    pub fn release(&self, id: &Uuid) {
        self.in_flight.remove(id);
    }

    /// Atomically move a queued record to sent.
    pub fn mark_sent(&self, id: &Uuid) -> DripResult<SentRecord> {
        let mut record = self
            .records
            .get_mut(id)
            .ok_or_else(|| DripError::not_found("sent record", id))?;
        record.transition(SendState::Sent)?;
        Ok(record.clone())
    }

    // ─── Bulk load ─────────────────────────────────────────────────────────

    /// Rebuild a store from persisted drips and records.
    pub fn restore(drips: Vec<Drip>, records: Vec<SentRecord>) -> DripResult<Self> {
        let store = Self::new();
        for drip in drips {
            store.create_drip(drip)?;
        }
        for record in records {
            match store.by_pair.entry((record.drip_id, record.user_id)) {
                Entry::Occupied(_) => {
                    return Err(DripError::Query(format!(
                        "duplicate sent record for drip {} and user {}",
                        record.drip_id, record.user_id
                    )))
                }
                Entry::Vacant(slot) => {
                    slot.insert(record.id);
                }
            }
            store.records.insert(record.id, record);
        }
        Ok(store)
    }
}
