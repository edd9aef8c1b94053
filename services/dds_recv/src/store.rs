//! Outage persistence
//!
//! The recovery engine only needs four things from storage: assert an
//! outage, change its status, delete it, and find the highest-priority
//! active one. [`MemoryOutageStore`] keeps them in process;
//! [`JsonFileOutageStore`] also rewrites a JSON file after every change so
//! the queue survives a restart.

use crate::error::{RecvError, Result};
use dds_types::{Outage, OutageId, OutageKind, OutageStatus};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

pub trait OutageStore: Send + Sync {
    /// Stores an outage. Id 0 inserts and assigns an id; any other id
    /// replaces the stored copy. Returns what was stored.
    fn assert_outage(&self, outage: Outage) -> Result<Outage>;

    /// Replaces an existing outage. `Ok(false)` if it is no longer stored.
    fn update(&self, outage: &Outage) -> Result<bool>;

    fn change_status(&self, id: OutageId, status: OutageStatus) -> Result<bool>;

    fn delete(&self, id: OutageId) -> Result<bool>;

    /// Highest-priority outage, if it is active.
    fn highest_priority_active(&self) -> Result<Option<Outage>>;

    /// Every stored outage in priority order.
    fn list(&self) -> Result<Vec<Outage>>;
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct StoreState {
    next_id: OutageId,
    outages: BTreeMap<OutageId, Outage>,
}

impl StoreState {
    fn assert_outage(&mut self, mut outage: Outage) -> Outage {
        if outage.id == 0 {
            if matches!(outage.kind, OutageKind::RealTime { .. }) {
                // A new real-time outage supersedes the previous one.
                self.outages
                    .retain(|_, o| !matches!(o.kind, OutageKind::RealTime { .. }));
            }
            self.next_id = self.next_id.max(1);
            outage.id = self.next_id;
            self.next_id += 1;
        } else if outage.id >= self.next_id {
            self.next_id = outage.id + 1;
        }
        self.outages.insert(outage.id, outage.clone());
        outage
    }

    fn update(&mut self, outage: &Outage) -> bool {
        match self.outages.get_mut(&outage.id) {
            Some(stored) => {
                *stored = outage.clone();
                true
            }
            None => false,
        }
    }

    fn change_status(&mut self, id: OutageId, status: OutageStatus) -> bool {
        match self.outages.get_mut(&id) {
            Some(stored) => {
                stored.status = status;
                true
            }
            None => false,
        }
    }

    fn highest_priority_active(&self) -> Option<Outage> {
        self.outages
            .values()
            .min_by(|a, b| a.priority_cmp(b))
            .filter(|o| o.status == OutageStatus::Active)
            .cloned()
    }

    fn sorted(&self) -> Vec<Outage> {
        let mut all: Vec<_> = self.outages.values().cloned().collect();
        all.sort_by(|a, b| a.priority_cmp(b));
        all
    }
}

#[derive(Default)]
pub struct MemoryOutageStore {
    state: Mutex<StoreState>,
}

impl MemoryOutageStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl OutageStore for MemoryOutageStore {
    fn assert_outage(&self, outage: Outage) -> Result<Outage> {
        Ok(self.state.lock().assert_outage(outage))
    }

    fn update(&self, outage: &Outage) -> Result<bool> {
        Ok(self.state.lock().update(outage))
    }

    fn change_status(&self, id: OutageId, status: OutageStatus) -> Result<bool> {
        Ok(self.state.lock().change_status(id, status))
    }

    fn delete(&self, id: OutageId) -> Result<bool> {
        Ok(self.state.lock().outages.remove(&id).is_some())
    }

    fn highest_priority_active(&self) -> Result<Option<Outage>> {
        Ok(self.state.lock().highest_priority_active())
    }

    fn list(&self) -> Result<Vec<Outage>> {
        Ok(self.state.lock().sorted())
    }
}

/// Store backed by a JSON file, rewritten after every change.
pub struct JsonFileOutageStore {
    path: PathBuf,
    state: Mutex<StoreState>,
}

impl JsonFileOutageStore {
    /// Opens `path`, starting empty if the file does not exist yet.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let state = match fs::read_to_string(&path) {
            Ok(text) => {
                let state: StoreState = serde_json::from_str(&text)?;
                info!(path = %path.display(), outages = state.outages.len(), "Loaded outage queue");
                state
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => StoreState::default(),
            Err(e) => return Err(RecvError::io(path, e)),
        };
        Ok(Self {
            path,
            state: Mutex::new(state),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn persist(&self, state: &StoreState) -> Result<()> {
        if let Some(dir) = self.path.parent().filter(|d| !d.as_os_str().is_empty()) {
            fs::create_dir_all(dir).map_err(|e| RecvError::io(dir, e))?;
        }
        let text = serde_json::to_string_pretty(state)?;
        let tmp = self.path.with_extension("tmp");
        fs::write(&tmp, text).map_err(|e| RecvError::io(&tmp, e))?;
        fs::rename(&tmp, &self.path).map_err(|e| RecvError::io(&self.path, e))?;
        debug!(path = %self.path.display(), outages = state.outages.len(), "Saved outage queue");
        Ok(())
    }

    /// Applies `change` and persists when it reports a modification.
    fn mutate<T>(&self, change: impl FnOnce(&mut StoreState) -> (T, bool)) -> Result<T> {
        let mut state = self.state.lock();
        let (value, changed) = change(&mut state);
        if changed {
            self.persist(&state)?;
        }
        Ok(value)
    }
}

impl OutageStore for JsonFileOutageStore {
    fn assert_outage(&self, outage: Outage) -> Result<Outage> {
        self.mutate(|s| (s.assert_outage(outage), true))
    }

    fn update(&self, outage: &Outage) -> Result<bool> {
        self.mutate(|s| {
            let found = s.update(outage);
            (found, found)
        })
    }

    fn change_status(&self, id: OutageId, status: OutageStatus) -> Result<bool> {
        self.mutate(|s| {
            let found = s.change_status(id, status);
            (found, found)
        })
    }

    fn delete(&self, id: OutageId) -> Result<bool> {
        self.mutate(|s| {
            let found = s.outages.remove(&id).is_some();
            (found, found)
        })
    }

    fn highest_priority_active(&self) -> Result<Option<Outage>> {
        Ok(self.state.lock().highest_priority_active())
    }

    fn list(&self) -> Result<Vec<Outage>> {
        Ok(self.state.lock().sorted())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use tempfile::tempdir;

    #[test]
    fn test_assigns_ids_and_picks_highest_priority() {
        let store = MemoryOutageStore::new();
        let now = Utc::now();
        let rt = store.assert_outage(Outage::real_time(now)).unwrap();
        let seq = store.assert_outage(Outage::sequence("domsat", 10, 20).unwrap()).unwrap();
        let sys = store
            .assert_outage(Outage::system(now - Duration::hours(1), now).unwrap())
            .unwrap();
        assert_eq!((rt.id, seq.id, sys.id), (1, 2, 3));

        assert_eq!(store.highest_priority_active().unwrap().unwrap().id, sys.id);
        store.delete(sys.id).unwrap();
        assert_eq!(store.highest_priority_active().unwrap().unwrap().id, seq.id);
    }

    #[test]
    fn test_only_active_outages_are_claimable() {
        let store = MemoryOutageStore::new();
        let seq = store.assert_outage(Outage::sequence("domsat", 1, 2).unwrap()).unwrap();
        store.change_status(seq.id, OutageStatus::Failed).unwrap();
        assert!(store.highest_priority_active().unwrap().is_none());
        assert_eq!(store.list().unwrap().len(), 1);
    }

    #[test]
    fn test_new_real_time_outage_supersedes_old() {
        let store = MemoryOutageStore::new();
        let old = store.assert_outage(Outage::real_time(Utc::now())).unwrap();
        let new = store.assert_outage(Outage::real_time(Utc::now())).unwrap();
        let all = store.list().unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].id, new.id);
        assert!(!store.update(&old).unwrap());
    }

    #[test]
    fn test_file_store_survives_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("state").join("outages.json");

        let store = JsonFileOutageStore::open(&path).unwrap();
        let seq = store.assert_outage(Outage::sequence("domsat", 100, 200).unwrap()).unwrap();
        let addr = store
            .assert_outage(
                Outage::address("CE1234A6".parse().unwrap(), Utc::now() - Duration::hours(1), Utc::now())
                    .unwrap(),
            )
            .unwrap();
        store.change_status(addr.id, OutageStatus::Partial).unwrap();
        drop(store);

        let store = JsonFileOutageStore::open(&path).unwrap();
        let all = store.list().unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].id, seq.id);
        assert_eq!(all[1].status, OutageStatus::Partial);

        // Ids keep counting after a reload.
        let next = store.assert_outage(Outage::sequence("domsat", 1, 1).unwrap()).unwrap();
        assert_eq!(next.id, 3);
    }

    #[test]
    fn test_corrupt_file_is_an_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("outages.json");
        fs::write(&path, "{ not json").unwrap();
        assert!(matches!(JsonFileOutageStore::open(&path), Err(RecvError::Json(_))));
    }
}
