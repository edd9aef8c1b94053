//! Network lists: named sets of DCP addresses
//!
//! File format is one `ADDRESS:NAME description` entry per line. Malformed
//! lines are skipped with a warning so one bad entry never hides the rest.

use crate::DcpAddress;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::warn;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkListEntry {
    pub address: DcpAddress,
    pub name: Option<String>,
    pub description: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkList {
    pub name: String,
    entries: BTreeMap<DcpAddress, NetworkListEntry>,
}

impl NetworkList {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            entries: BTreeMap::new(),
        }
    }

    pub fn parse(name: impl Into<String>, text: &str) -> Self {
        let mut list = Self::new(name);
        for (idx, raw) in text.lines().enumerate() {
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            let (addr_part, rest) = match line.split_once(':') {
                Some((a, r)) => (a, Some(r.trim())),
                None => (line, None),
            };
            let address = match addr_part.trim().parse::<DcpAddress>() {
                Ok(a) => a,
                Err(e) => {
                    warn!(list = %list.name, line = idx + 1, error = %e, "Skipping malformed network list entry");
                    continue;
                }
            };

            let (name, description) = match rest.filter(|r| !r.is_empty()) {
                Some(r) => match r.split_once(char::is_whitespace) {
                    Some((n, d)) => (Some(n.to_string()), Some(d.trim().to_string())),
                    None => (Some(r.to_string()), None),
                },
                None => (None, None),
            };

            list.insert(NetworkListEntry {
                address,
                name,
                description,
            });
        }
        list
    }

    pub fn insert(&mut self, entry: NetworkListEntry) {
        self.entries.insert(entry.address, entry);
    }

    pub fn contains(&self, address: &DcpAddress) -> bool {
        self.entries.contains_key(address)
    }

    pub fn addresses(&self) -> impl Iterator<Item = DcpAddress> + '_ {
        self.entries.keys().copied()
    }

    /// Name-to-address lookup used for `DCP_NAME` criteria.
    pub fn address_for_name(&self, name: &str) -> Option<DcpAddress> {
        self.entries
            .values()
            .find(|e| e.name.as_deref().is_some_and(|n| n.eq_ignore_ascii_case(name)))
            .map(|e| e.address)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
