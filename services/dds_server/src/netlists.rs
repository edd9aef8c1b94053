//! Name-mapping lists shared by all client sessions
//!
//! Network lists live as files in one directory, keyed by file name. The
//! registry reloads a file when its modification time changes. A user's
//! sandbox directory is searched before the shared directory, so users can
//! keep private lists with the same names.

use crate::error::{Result, ServerError};
use dds_types::{DcpAddress, NetworkList, SearchCriteria};
use parking_lot::RwLock;
use std::collections::{BTreeSet, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;
use tracing::{debug, info, warn};

const LIST_EXTENSION: &str = "nl";

struct LoadedList {
    list: Arc<NetworkList>,
    modified: Option<SystemTime>,
}

pub struct NetlistRegistry {
    dir: PathBuf,
    lists: RwLock<HashMap<String, LoadedList>>,
}

impl NetlistRegistry {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            lists: RwLock::new(HashMap::new()),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Rescans the directory, loading new or modified lists and dropping
    /// removed ones. Returns whether anything changed.
    pub fn check_for_changes(&self) -> bool {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) => {
                debug!(dir = %self.dir.display(), error = %e, "Network list directory not readable");
                return false;
            }
        };

        let mut seen = Vec::new();
        let mut changed = false;
        for entry in entries.flatten() {
            let path = entry.path();
            if !path.is_file() {
                continue;
            }
            let Some(name) = path.file_name().and_then(|n| n.to_str()).map(str::to_string) else {
                continue;
            };
            let modified = entry.metadata().and_then(|m| m.modified()).ok();
            seen.push(name.clone());

            let unchanged = self
                .lists
                .read()
                .get(&name)
                .is_some_and(|loaded| loaded.modified == modified);
            if unchanged {
                continue;
            }

            match load_list(&name, &path) {
                Some(list) => {
                    info!(list = %name, entries = list.len(), "Loaded network list");
                    self.lists.write().insert(
                        name,
                        LoadedList {
                            list: Arc::new(list),
                            modified,
                        },
                    );
                    changed = true;
                }
                None => continue,
            }
        }

        let mut lists = self.lists.write();
        let before = lists.len();
        lists.retain(|name, _| seen.contains(name));
        if lists.len() != before {
            info!(removed = before - lists.len(), "Dropped deleted network lists");
            changed = true;
        }
        changed
    }

    pub fn insert(&self, list: NetworkList) {
        self.lists.write().insert(
            list.name.clone(),
            LoadedList {
                list: Arc::new(list),
                modified: None,
            },
        );
    }

    pub fn get(&self, name: &str) -> Option<Arc<NetworkList>> {
        let lists = self.lists.read();
        lists
            .get(name)
            .or_else(|| lists.get(&format!("{}.{}", name, LIST_EXTENSION)))
            .map(|loaded| loaded.list.clone())
    }

    /// Finds `name` in the user's sandbox first, then the shared lists.
    pub fn lookup(&self, name: &str, sandbox: Option<&Path>) -> Option<Arc<NetworkList>> {
        if let Some(dir) = sandbox {
            for candidate in [dir.join(name), dir.join(format!("{}.{}", name, LIST_EXTENSION))] {
                if candidate.is_file() {
                    if let Some(list) = load_list(name, &candidate) {
                        return Some(Arc::new(list));
                    }
                }
            }
        }
        self.get(name)
    }

    /// Maps a DCP name to its address using any loaded list.
    pub fn address_for_name(&self, name: &str) -> Option<DcpAddress> {
        self.lists
            .read()
            .values()
            .find_map(|loaded| loaded.list.address_for_name(name))
    }

    /// Expands the list and name references in `criteria` into addresses.
    pub fn resolve(&self, criteria: &SearchCriteria, sandbox: Option<&Path>) -> Result<BTreeSet<DcpAddress>> {
        let mut addresses = BTreeSet::new();
        for name in &criteria.network_lists {
            let list = self
                .lookup(name, sandbox)
                .ok_or_else(|| ServerError::UnknownNetworkList { name: name.clone() })?;
            addresses.extend(list.addresses());
        }
        for name in &criteria.dcp_names {
            let address = self
                .address_for_name(name)
                .ok_or_else(|| ServerError::UnknownDcpName { name: name.clone() })?;
            addresses.insert(address);
        }
        Ok(addresses)
    }

    pub fn len(&self) -> usize {
        self.lists.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn load_list(name: &str, path: &Path) -> Option<NetworkList> {
    match fs::read_to_string(path) {
        Ok(text) => Some(NetworkList::parse(name, &text)),
        Err(e) => {
            warn!(list = %name, path = %path.display(), error = %e, "Cannot read network list");
            None
        }
    }
}
