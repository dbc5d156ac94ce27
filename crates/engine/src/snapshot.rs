//! JSON snapshot of users, drips, and sent records, so that separate
//! scheduled invocations (run, then dispatch) share state.

use std::fs;
use std::path::Path;

use drip_core::{DripResult, User};
use drip_segmentation::InMemoryUsers;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::drip::Drip;
use crate::sent::SentRecord;
use crate::store::DripStore;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Snapshot {
    #[serde(default)]
    pub users: Vec<User>,
    #[serde(default)]
    pub drips: Vec<Drip>,
    #[serde(default)]
    pub sent_records: Vec<SentRecord>,
}

impl Snapshot {
    /// Read a snapshot; a missing file is an empty snapshot.
    pub fn load(path: &Path) -> DripResult<Self> {
        if !path.exists() {
            info!(path = %path.display(), "No snapshot found, starting empty");
            return Ok(Self::default());
        }
        let raw = fs::read_to_string(path)?;
        let snapshot: Snapshot = serde_json::from_str(&raw)?;
        info!(
            path = %path.display(),
            users = snapshot.users.len(),
            drips = snapshot.drips.len(),
            sent_records = snapshot.sent_records.len(),
            "Loaded snapshot"
        );
        Ok(snapshot)
    }

    /// Write via a temporary file and rename, so a crash never leaves a
    /// half-written snapshot behind.
    pub fn save(&self, path: &Path) -> DripResult<()> {
        let raw = serde_json::to_string_pretty(self)?;
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, raw)?;
        fs::rename(&tmp, path)?;
        Ok(())
    }

    pub fn capture(users: &InMemoryUsers, store: &DripStore) -> Self {
        Self {
            users: users.all(),
            drips: store.list_drips(),
            sent_records: store.all_records(),
        }
    }

    pub fn into_parts(self) -> DripResult<(InMemoryUsers, DripStore)> {
        let store = DripStore::restore(self.drips, self.sent_records)?;
        Ok((InMemoryUsers::from_users(self.users), store))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drip::RenderedEmail;
    use serde_json::json;

    #[test]
    fn test_save_and_load_preserve_state() {
        let dir = std::env::temp_dir().join(format!("drip-snapshot-{}", uuid::Uuid::new_v4()));
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join("state.json");

        let user = User::new("ada@example.com").with_field("age", json!(36));
        let users = InMemoryUsers::from_users([user.clone()]);
        let store = DripStore::new();
        let drip = store.create_drip(Drip::new("welcome").active(true)).unwrap();
        store
            .get_or_create_record(drip.id, user.id, || {
                Ok(SentRecord::queued(
                    drip.id,
                    user.id,
                    &user.email,
                    "news@example.com",
                    "",
                    RenderedEmail {
                        subject: "Hi".into(),
                        text_body: "Hello".into(),
                        html_body: String::new(),
                    },
                ))
            })
            .unwrap();

        Snapshot::capture(&users, &store).save(&path).unwrap();
        let (users, store) = Snapshot::load(&path).unwrap().into_parts().unwrap();
        assert_eq!(users.len(), 1);
        assert_eq!(store.get_drip_by_name("welcome").unwrap().id, drip.id);
        assert!(store.record_for(&drip.id, &user.id).unwrap().is_queued());

        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_missing_file_is_empty() {
        let path = std::env::temp_dir().join(format!("missing-{}.json", uuid::Uuid::new_v4()));
        let snapshot = Snapshot::load(&path).unwrap();
        assert!(snapshot.users.is_empty() && snapshot.drips.is_empty());
    }
}
