//! # Message Archive
//!
//! The archive is consumed as an indexed-search service: a session asks for
//! a [`SearchHandle`] once, then repeatedly calls [`MessageArchive::search`]
//! with a deadline. Each call fills the handle's buffer with matching index
//! entries and reports how the search stands.
//!
//! Two search methods exist:
//!
//! - **Index scan**: walk every index entry forward from the since-time.
//!   Used for real-time retrievals, for criteria without addresses, and
//!   whenever the filter forces ascending order.
//! - **Back reference**: for each requested address, walk that address's
//!   messages newest first until the since-time, then release everything
//!   collected oldest first. Chosen when a handful of addresses are
//!   requested over a long history.
//!
//! [`MemoryArchive`] keeps everything in memory. The netback receiver
//! appends recovered messages to it.

use crate::error::{Result, ServerError};
use crate::filter::SearchFilter;
use chrono::{DateTime, Utc};
use dds_types::{DcpAddress, DcpMessage, IndexEntry};
use parking_lot::RwLock;
use std::cmp::Reverse;
use std::collections::{HashMap, VecDeque};
use tokio::time::Instant;
use tracing::debug;

/// Index entries buffered per search call.
pub const SEARCH_BATCH: usize = 1000;

/// Entries examined between deadline checks.
const DEADLINE_STRIDE: usize = 64;

/// Assumed average messages per address per day, used to pick a method.
const MESSAGES_PER_DAY: f64 = 12.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchResult {
    /// Entries were buffered; process them and call again.
    More,
    /// Until-time reached; the search is over.
    Done,
    /// Deadline hit before anything matched; call again.
    TimeLimit,
    /// Caught up with real time; wait before calling again.
    Pause,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchMethod {
    IndexScan,
    BackReference,
}

/// Search position owned by one session
#[derive(Debug)]
pub struct SearchHandle {
    method: SearchMethod,
    next_location: u64,
    addresses: Vec<DcpAddress>,
    current_address: usize,
    /// Position within the current address's history, counting down.
    back_position: Option<usize>,
    /// Back-reference matches, newest first once sorted.
    collected: Vec<IndexEntry>,
    sorted: bool,
    buffer: VecDeque<IndexEntry>,
}

impl SearchHandle {
    fn new(method: SearchMethod, addresses: Vec<DcpAddress>) -> Self {
        Self {
            method,
            next_location: 0,
            addresses,
            current_address: 0,
            back_position: None,
            collected: Vec::new(),
            sorted: false,
            buffer: VecDeque::new(),
        }
    }

    pub fn method(&self) -> SearchMethod {
        self.method
    }

    pub fn pop(&mut self) -> Option<IndexEntry> {
        self.buffer.pop_front()
    }

    /// Returns an entry to the front of the buffer.
    pub fn push_front(&mut self, entry: IndexEntry) {
        self.buffer.push_front(entry);
    }

    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    fn capacity(&self) -> usize {
        SEARCH_BATCH.saturating_sub(self.buffer.len())
    }
}

pub trait MessageArchive: Send + Sync {
    /// Starts a search for `filter`, choosing the search method.
    fn start_search(&self, filter: &SearchFilter) -> SearchHandle;

    /// Advances the search, never running past `deadline`.
    fn search(&self, handle: &mut SearchHandle, filter: &SearchFilter, deadline: Instant) -> Result<SearchResult>;

    fn read_message(&self, entry: &IndexEntry) -> Result<DcpMessage>;
}

#[derive(Default)]
struct ArchiveInner {
    messages: Vec<DcpMessage>,
    index: Vec<IndexEntry>,
    /// Locations per address in arrival order.
    by_address: HashMap<DcpAddress, Vec<u64>>,
}

/// In-memory archive indexed in arrival order
#[derive(Default)]
pub struct MemoryArchive {
    inner: RwLock<ArchiveInner>,
}

impl MemoryArchive {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&self, message: DcpMessage) -> IndexEntry {
        let mut inner = self.inner.write();
        let location = inner.messages.len() as u64;
        let entry = message.index_entry(location);
        inner.by_address.entry(message.address).or_default().push(location);
        inner.index.push(entry);
        inner.messages.push(message);
        entry
    }

    pub fn len(&self) -> usize {
        self.inner.read().messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Latest receive time of any stored message.
    pub fn last_receive_time(&self) -> Option<DateTime<Utc>> {
        self.inner.read().index.iter().map(|e| e.receive_time).max()
    }

    fn choose_method(filter: &SearchFilter, now: DateTime<Utc>) -> SearchMethod {
        let n = filter.addresses().len();
        let (Some(since), Some(until)) = (filter.since(), filter.until()) else {
            return SearchMethod::IndexScan;
        };
        if n == 0 || filter.force_ascending() {
            return SearchMethod::IndexScan;
        }

        // Weighted reads for a back-reference walk against minutes an
        // index scan has to cover.
        let history_minutes = (now - since).num_minutes().max(0) as f64;
        let scan_minutes = (until - since).num_minutes().max(0) as f64;
        let back_reads = n as f64 * MESSAGES_PER_DAY * (history_minutes / 1440.0) * 0.5;

        if back_reads < scan_minutes {
            SearchMethod::BackReference
        } else {
            SearchMethod::IndexScan
        }
    }

    fn index_scan(
        inner: &ArchiveInner,
        handle: &mut SearchHandle,
        filter: &SearchFilter,
        deadline: Instant,
    ) -> SearchResult {
        let total = inner.index.len() as u64;
        let mut examined = 0usize;

        while handle.next_location < total && handle.capacity() > 0 {
            if examined % DEADLINE_STRIDE == DEADLINE_STRIDE - 1 && Instant::now() >= deadline {
                break;
            }
            let entry = inner.index[handle.next_location as usize];
            handle.next_location += 1;
            examined += 1;
            if filter.passes(&entry) {
                handle.buffer.push_back(entry);
            }
        }

        if !handle.buffer.is_empty() {
            SearchResult::More
        } else if handle.next_location < total {
            SearchResult::TimeLimit
        } else if filter.until().is_some_and(|until| until <= Utc::now()) {
            SearchResult::Done
        } else {
            SearchResult::Pause
        }
    }

    fn back_reference(
        inner: &ArchiveInner,
        handle: &mut SearchHandle,
        filter: &SearchFilter,
        deadline: Instant,
    ) -> SearchResult {
        let mut examined = 0usize;

        while handle.current_address < handle.addresses.len() {
            if examined % DEADLINE_STRIDE == DEADLINE_STRIDE - 1 && Instant::now() >= deadline {
                return if handle.buffer.is_empty() {
                    SearchResult::TimeLimit
                } else {
                    SearchResult::More
                };
            }
            examined += 1;

            let address = handle.addresses[handle.current_address];
            let locations = inner.by_address.get(&address).map(Vec::as_slice).unwrap_or(&[]);
            let position = handle.back_position.unwrap_or(locations.len());
            if position == 0 {
                handle.current_address += 1;
                handle.back_position = None;
                continue;
            }

            let entry = inner.index[locations[position - 1] as usize];
            if filter.since().is_some_and(|since| entry.receive_time < since) {
                handle.current_address += 1;
                handle.back_position = None;
                continue;
            }
            handle.back_position = Some(position - 1);
            if filter.passes(&entry) {
                handle.collected.push(entry);
            }
        }

        // Every address walked: hand out the matches in ascending time.
        if !handle.sorted {
            handle
                .collected
                .sort_unstable_by_key(|e| Reverse((e.receive_time, e.location)));
            handle.sorted = true;
        }
        while handle.capacity() > 0 {
            match handle.collected.pop() {
                Some(entry) => handle.buffer.push_back(entry),
                None => break,
            }
        }

        if handle.buffer.is_empty() {
            SearchResult::Done
        } else {
            SearchResult::More
        }
    }
}

impl MessageArchive for MemoryArchive {
    fn start_search(&self, filter: &SearchFilter) -> SearchHandle {
        let method = Self::choose_method(filter, Utc::now());
        debug!(?method, addresses = filter.addresses().len(), "Starting archive search");
        SearchHandle::new(method, filter.addresses().iter().copied().collect())
    }

    fn search(&self, handle: &mut SearchHandle, filter: &SearchFilter, deadline: Instant) -> Result<SearchResult> {
        let inner = self.inner.read();
        let result = match handle.method {
            SearchMethod::IndexScan => Self::index_scan(&inner, handle, filter, deadline),
            SearchMethod::BackReference => Self::back_reference(&inner, handle, filter, deadline),
        };
        Ok(result)
    }

    fn read_message(&self, entry: &IndexEntry) -> Result<DcpMessage> {
        self.inner
            .read()
            .messages
            .get(entry.location as usize)
            .cloned()
            .ok_or_else(|| ServerError::archive(format!("no message at location {}", entry.location)))
    }
}
