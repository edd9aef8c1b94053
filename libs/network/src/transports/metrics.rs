//! Connection Status Counters
//!
//! Per-connection counters exposed read-only to monitoring. The owning
//! connection or session is the only writer.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ConnectionState {
    Disconnected,
    Connected,
    Receiving,
}

impl ConnectionState {
    fn from_u8(v: u8) -> Self {
        match v {
            1 => ConnectionState::Connected,
            2 => ConnectionState::Receiving,
            _ => ConnectionState::Disconnected,
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            ConnectionState::Disconnected => 0,
            ConnectionState::Connected => 1,
            ConnectionState::Receiving => 2,
        }
    }
}

/// Point-in-time copy of a connection's counters
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConnectionStatus {
    pub id: u64,
    pub name: String,
    pub host: String,
    pub state: ConnectionState,
    pub messages: u64,
    pub errors: u64,
    pub last_activity: Option<DateTime<Utc>>,
    pub last_message: Option<DateTime<Utc>>,
}

#[derive(Debug)]
pub struct ConnectionStats {
    id: u64,
    name: String,
    host: RwLock<String>,
    state: AtomicU8,
    messages: AtomicU64,
    errors: AtomicU64,
    last_activity: RwLock<Option<DateTime<Utc>>>,
    last_message: RwLock<Option<DateTime<Utc>>>,
}

impl ConnectionStats {
    pub fn new(id: u64, name: impl Into<String>, host: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            host: RwLock::new(host.into()),
            state: AtomicU8::new(ConnectionState::Disconnected.as_u8()),
            messages: AtomicU64::new(0),
            errors: AtomicU64::new(0),
            last_activity: RwLock::new(None),
            last_message: RwLock::new(None),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn set_host(&self, host: impl Into<String>) {
        *self.host.write() = host.into();
    }

    pub fn set_state(&self, state: ConnectionState) {
        self.state.store(state.as_u8(), Ordering::Release);
    }

    pub fn state(&self) -> ConnectionState {
        ConnectionState::from_u8(self.state.load(Ordering::Acquire))
    }

    #[inline]
    pub fn record_activity(&self) {
        *self.last_activity.write() = Some(Utc::now());
    }

    #[inline]
    pub fn record_messages(&self, count: u64) {
        if count == 0 {
            return;
        }
        self.messages.fetch_add(count, Ordering::Release);
        let now = Utc::now();
        *self.last_message.write() = Some(now);
        *self.last_activity.write() = Some(now);
    }

    #[inline]
    pub fn record_error(&self) {
        self.errors.fetch_add(1, Ordering::Release);
    }

    pub fn messages(&self) -> u64 {
        self.messages.load(Ordering::Acquire)
    }

    pub fn last_activity(&self) -> Option<DateTime<Utc>> {
        *self.last_activity.read()
    }

    /// Time since the last recorded activity; `None` if there never was any.
    pub fn idle_for(&self) -> Option<chrono::Duration> {
        self.last_activity().map(|t| Utc::now() - t)
    }

    pub fn snapshot(&self) -> ConnectionStatus {
        ConnectionStatus {
            id: self.id,
            name: self.name.clone(),
            host: self.host.read().clone(),
            state: self.state(),
            messages: self.messages(),
            errors: self.errors.load(Ordering::Acquire),
            last_activity: self.last_activity(),
            last_message: *self.last_message.read(),
        }
    }
}
