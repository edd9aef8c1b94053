//! Persisted connection-id counter
//!
//! Ids keep increasing across restarts. A missing or unreadable counter file
//! starts over at 1.

use parking_lot::Mutex;
use std::fs;
use std::path::PathBuf;
use tracing::warn;

pub type ConnectionId = u64;

pub struct ConnectionIdCounter {
    path: Option<PathBuf>,
    next: Mutex<ConnectionId>,
}

impl ConnectionIdCounter {
    pub fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let next = match fs::read_to_string(&path) {
            Ok(text) => match text.trim().parse::<ConnectionId>() {
                Ok(n) if n > 0 => n,
                _ => {
                    warn!(path = %path.display(), "Connection id file corrupt, restarting at 1");
                    1
                }
            },
            Err(_) => 1,
        };
        Self {
            path: Some(path),
            next: Mutex::new(next),
        }
    }

    /// Counter that is never written to disk.
    pub fn in_memory() -> Self {
        Self {
            path: None,
            next: Mutex::new(1),
        }
    }

    pub fn next_id(&self) -> ConnectionId {
        let mut next = self.next.lock();
        let id = *next;
        *next = id.wrapping_add(1).max(1);
        if let Some(path) = &self.path {
            if let Err(e) = fs::write(path, format!("{}\n", *next)) {
                warn!(path = %path.display(), error = %e, "Cannot save connection id");
            }
        }
        id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_ids_survive_restart() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("ddsconnection.id");

        let counter = ConnectionIdCounter::load(&path);
        assert_eq!(counter.next_id(), 1);
        assert_eq!(counter.next_id(), 2);

        let counter = ConnectionIdCounter::load(&path);
        assert_eq!(counter.next_id(), 3);
    }

    #[test]
    fn test_corrupt_file_restarts_at_one() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("ddsconnection.id");
        fs::write(&path, "garbage").unwrap();

        let counter = ConnectionIdCounter::load(&path);
        assert_eq!(counter.next_id(), 1);
    }
}
