//! Outage queue
//!
//! Thin layer over an [`OutageStore`] that enforces outage invariants on the
//! way in and applies the resolve rule on the way out: delete when
//! recovered, update when anything changed, otherwise leave it alone.

use crate::error::Result;
use crate::store::OutageStore;
use dds_types::{Outage, OutageStatus};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// What resolving a claimed outage did to the store
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    Deleted,
    Updated,
    Unchanged,
}

#[derive(Clone)]
pub struct OutageQueue {
    store: Arc<dyn OutageStore>,
}

impl OutageQueue {
    pub fn new(store: Arc<dyn OutageStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<dyn OutageStore> {
        &self.store
    }

    /// Validates and stores a newly detected outage.
    pub fn register(&self, outage: Outage) -> Result<Outage> {
        outage.validate()?;
        let stored = self.store.assert_outage(outage)?;
        info!(outage = %stored, source = %stored.source, "Outage registered");
        Ok(stored)
    }

    /// Registers a missing run of satellite sequence numbers. A run that
    /// wraps past 65535 is stored as two outages.
    pub fn register_sequence_gap(&self, source: &str, begin: u16, end: u16) -> Result<Vec<Outage>> {
        Outage::sequence_wrapping(source, begin, end)
            .into_iter()
            .map(|o| self.register(o))
            .collect()
    }

    pub fn highest_priority_active(&self) -> Result<Option<Outage>> {
        self.store.highest_priority_active()
    }

    pub fn list(&self) -> Result<Vec<Outage>> {
        self.store.list()
    }

    /// Persists the final state of a claimed outage. `claimed_status` is
    /// the status it had when claimed; `modified` says whether any other
    /// field changed while it was worked.
    pub fn resolve(&self, outage: &Outage, claimed_status: OutageStatus, modified: bool) -> Result<Resolution> {
        if outage.status == OutageStatus::Recovered {
            if !self.store.delete(outage.id)? {
                warn!(outage = %outage, "Recovered outage was already gone from the store");
            }
            info!(outage = %outage, "Outage recovered");
            return Ok(Resolution::Deleted);
        }

        if outage.status != claimed_status || modified {
            outage.validate()?;
            if self.store.update(outage)? {
                info!(outage = %outage, "Outage updated");
                return Ok(Resolution::Updated);
            }
            debug!(outage = %outage, "Outage no longer stored, update dropped");
        }
        Ok(Resolution::Unchanged)
    }

    /// Saves progress on an outage that stays claimed.
    pub fn checkpoint(&self, outage: &Outage) -> Result<()> {
        outage.validate()?;
        self.store.update(outage)?;
        Ok(())
    }
}
