//! # Retrieval Session
//!
//! One per attached client. Drives an incremental archive search for the
//! client's filter and keeps the bookkeeping needed for status reporting
//! and for resuming with `LRGS_SINCE: last`.
//!
//! ```text
//! Init ──init()──▶ Searching ──entry──▶ Delivering ──▶ Searching
//!                      │                                  │
//!                      ├──caught up──▶ CaughtUp ──────────┘
//!                      └──until reached──▶ Terminated
//! ```
//!
//! Only the receive time of the last delivered message is persisted, never
//! an archive position, so a saved point stays valid across archive
//! rebuilds.

use crate::archive::{MessageArchive, SearchHandle, SearchResult};
use crate::error::{Result, ServerError};
use crate::filter::SearchFilter;
use chrono::{DateTime, SecondsFormat, Utc};
pub use dds_config::SaveLastPolicy;
use dds_types::{DcpMessage, IndexEntry};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Messages younger than this are held back when settling is requested.
pub const SETTLE_DELAY_SECS: i64 = 30;

const PAUSE_INTERVAL: Duration = Duration::from_secs(1);

/// File name of the saved receive time inside a user's sandbox.
pub const LAST_RECEIVE_FILE: &str = "last_receive";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Init,
    Searching,
    Delivering,
    CaughtUp,
    Terminated,
}

/// Outcome of one [`RetrievalSession::next_passing_index`] call
#[derive(Debug, Clone, PartialEq)]
pub enum NextIndex {
    Entry(IndexEntry),
    /// Deadline passed mid-search; more may follow.
    TimeLimit,
    /// Nothing newer is available yet.
    CaughtUp,
    /// Until-time reached; nothing more will ever match.
    UntilReached,
}

pub struct RetrievalSession {
    user: String,
    archive: Arc<dyn MessageArchive>,
    filter: Option<SearchFilter>,
    handle: Option<SearchHandle>,
    state: SessionState,
    save_last: SaveLastPolicy,
    last_receive_path: Option<PathBuf>,
    delivered: u64,
    last_receive_time: Option<DateTime<Utc>>,
}

impl RetrievalSession {
    pub fn new(user: impl Into<String>, archive: Arc<dyn MessageArchive>) -> Self {
        Self {
            user: user.into(),
            archive,
            filter: None,
            handle: None,
            state: SessionState::Init,
            save_last: SaveLastPolicy::Never,
            last_receive_path: None,
            delivered: 0,
            last_receive_time: None,
        }
    }

    /// Persists the last receive time to `<sandbox>/last_receive`.
    pub fn with_save_last(mut self, policy: SaveLastPolicy, sandbox: &Path) -> Self {
        self.save_last = policy;
        self.last_receive_path = Some(sandbox.join(LAST_RECEIVE_FILE));
        self
    }

    pub fn user(&self) -> &str {
        &self.user
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn filter(&self) -> Option<&SearchFilter> {
        self.filter.as_ref()
    }

    pub fn delivered(&self) -> u64 {
        self.delivered
    }

    pub fn last_receive_time(&self) -> Option<DateTime<Utc>> {
        self.last_receive_time
    }

    /// Receive time saved by an earlier session of this user.
    pub fn saved_receive_time(&self) -> Option<DateTime<Utc>> {
        let path = self.last_receive_path.as_ref()?;
        let text = fs::read_to_string(path).ok()?;
        match DateTime::parse_from_rfc3339(text.trim()) {
            Ok(t) => Some(t.with_timezone(&Utc)),
            Err(e) => {
                warn!(user = %self.user, path = %path.display(), error = %e, "Ignoring unreadable saved receive time");
                None
            }
        }
    }

    /// Starts a new search for `filter`, discarding any previous one.
    pub fn init(&mut self, filter: SearchFilter) {
        let handle = self.archive.start_search(&filter);
        debug!(user = %self.user, method = ?handle.method(), "Session search initialised");
        self.handle = Some(handle);
        self.filter = Some(filter);
        self.state = SessionState::Searching;
    }

    /// Returns the next entry that passes the filter, or why there is none.
    /// Never waits past `deadline`.
    pub async fn next_passing_index(&mut self, deadline: Instant) -> Result<NextIndex> {
        if self.state == SessionState::Terminated {
            return Ok(NextIndex::UntilReached);
        }
        let settle = match &self.filter {
            Some(filter) => filter.realtime_settling_delay(),
            None => return Err(ServerError::out_of_sequence("no search criteria")),
        };

        loop {
            if let Some(entry) = self.handle.as_mut().and_then(SearchHandle::pop) {
                let settled_before = Utc::now() - chrono::Duration::seconds(SETTLE_DELAY_SECS);
                if settle && entry.receive_time > settled_before {
                    if let Some(handle) = self.handle.as_mut() {
                        handle.push_front(entry);
                    }
                    if !pause_until(deadline).await {
                        self.state = SessionState::CaughtUp;
                        return Ok(NextIndex::CaughtUp);
                    }
                    continue;
                }
                self.record_delivery(&entry);
                return Ok(NextIndex::Entry(entry));
            }

            let result = match (self.filter.as_ref(), self.handle.as_mut()) {
                (Some(filter), Some(handle)) => self.archive.search(handle, filter, deadline)?,
                _ => return Err(ServerError::out_of_sequence("no search criteria")),
            };

            match result {
                SearchResult::More => {
                    let empty = self.handle.as_ref().is_some_and(|h| h.buffered() == 0);
                    if empty && Instant::now() >= deadline {
                        self.state = SessionState::Searching;
                        return Ok(NextIndex::TimeLimit);
                    }
                }
                SearchResult::Done => {
                    self.state = SessionState::Terminated;
                    return Ok(NextIndex::UntilReached);
                }
                SearchResult::TimeLimit => {
                    self.state = SessionState::Searching;
                    return Ok(NextIndex::TimeLimit);
                }
                SearchResult::Pause => {
                    if !pause_until(deadline).await {
                        self.state = SessionState::CaughtUp;
                        return Ok(NextIndex::CaughtUp);
                    }
                }
            }
        }
    }

    pub fn read_message(&self, entry: &IndexEntry) -> Result<DcpMessage> {
        self.archive.read_message(entry)
    }

    /// Ends the session, saving the resume point if the policy asks for it.
    pub fn detach(&mut self) {
        if self.save_last == SaveLastPolicy::OnDetach {
            self.save_last_receive();
        }
        self.handle = None;
        self.state = SessionState::Terminated;
    }

    fn record_delivery(&mut self, entry: &IndexEntry) {
        self.delivered += 1;
        self.state = SessionState::Delivering;
        if self.last_receive_time.map_or(true, |t| entry.receive_time > t) {
            self.last_receive_time = Some(entry.receive_time);
        }
        if self.save_last == SaveLastPolicy::EveryDelivery {
            self.save_last_receive();
        }
    }

    fn save_last_receive(&self) {
        let (Some(path), Some(t)) = (&self.last_receive_path, self.last_receive_time) else {
            return;
        };
        if let Some(dir) = path.parent() {
            if let Err(e) = fs::create_dir_all(dir) {
                warn!(user = %self.user, dir = %dir.display(), error = %e, "Cannot create user sandbox");
                return;
            }
        }
        if let Err(e) = fs::write(path, t.to_rfc3339_opts(SecondsFormat::Nanos, true)) {
            warn!(user = %self.user, path = %path.display(), error = %e, "Cannot save last receive time");
        }
    }
}

/// Sleeps toward `deadline`. Returns false when the deadline has passed.
async fn pause_until(deadline: Instant) -> bool {
    let now = Instant::now();
    if now >= deadline {
        return false;
    }
    tokio::time::sleep((deadline - now).min(PAUSE_INTERVAL)).await;
    true
}
