//! Persisted time of the last message received
//!
//! Read once at startup to size the bootstrap system outage. Written as a
//! single RFC 3339 line, at most once per save interval while messages flow
//! and once more on shutdown.

use crate::error::{RecvError, Result};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

const SAVE_INTERVAL: Duration = Duration::from_secs(10);

struct State {
    last: Option<DateTime<Utc>>,
    saved: Option<DateTime<Utc>>,
    saved_at: Option<Instant>,
}

pub struct LastReceiveFile {
    path: PathBuf,
    state: Mutex<State>,
}

impl LastReceiveFile {
    /// Loads the stored time. A missing or unreadable file means this is
    /// the first start.
    pub fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let last = match fs::read_to_string(&path) {
            Ok(text) => match DateTime::parse_from_rfc3339(text.trim()) {
                Ok(t) => Some(t.with_timezone(&Utc)),
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Last receive file unreadable, ignoring");
                    None
                }
            },
            Err(_) => None,
        };
        Self {
            path,
            state: Mutex::new(State {
                last,
                saved: last,
                saved_at: None,
            }),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn last(&self) -> Option<DateTime<Utc>> {
        self.state.lock().last
    }

    /// Records a receive time and saves it if the save interval has passed.
    /// Older times are ignored.
    pub fn record(&self, t: DateTime<Utc>) -> Result<()> {
        let due = {
            let mut state = self.state.lock();
            if state.last.is_some_and(|last| t <= last) {
                return Ok(());
            }
            state.last = Some(t);
            state.saved_at.map_or(true, |at| at.elapsed() >= SAVE_INTERVAL)
        };
        if due {
            self.flush()?;
        }
        Ok(())
    }

    /// Writes the latest time if it has not been written yet.
    pub fn flush(&self) -> Result<()> {
        let mut state = self.state.lock();
        let Some(last) = state.last else {
            return Ok(());
        };
        if state.saved == Some(last) {
            return Ok(());
        }
        if let Some(dir) = self.path.parent().filter(|d| !d.as_os_str().is_empty()) {
            fs::create_dir_all(dir).map_err(|e| RecvError::io(dir, e))?;
        }
        fs::write(&self.path, format!("{}\n", last.to_rfc3339()))
            .map_err(|e| RecvError::io(&self.path, e))?;
        state.saved = Some(last);
        state.saved_at = Some(Instant::now());
        debug!(path = %self.path.display(), last = %last, "Saved last receive time");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;
    use tempfile::tempdir;

    #[test]
    fn test_first_start_has_no_time() {
        let dir = tempdir().unwrap();
        let file = LastReceiveFile::load(dir.path().join("ddsrecv.last"));
        assert!(file.last().is_none());
        file.flush().unwrap();
        assert!(!file.path().exists());
    }

    #[test]
    fn test_record_and_reload() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("ddsrecv.last");
        let t = DateTime::parse_from_rfc3339("2026-03-01T12:00:00Z").unwrap().with_timezone(&Utc);

        let file = LastReceiveFile::load(&path);
        file.record(t).unwrap();
        file.record(t - ChronoDuration::hours(1)).unwrap();
        assert_eq!(file.last(), Some(t));

        // Throttled: the newer time is held in memory until flushed.
        file.record(t + ChronoDuration::seconds(5)).unwrap();
        assert_eq!(LastReceiveFile::load(&path).last(), Some(t));
        file.flush().unwrap();
        assert_eq!(LastReceiveFile::load(&path).last(), Some(t + ChronoDuration::seconds(5)));
    }

    #[test]
    fn test_garbage_file_is_ignored() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("ddsrecv.last");
        fs::write(&path, "yesterday-ish").unwrap();
        assert!(LastReceiveFile::load(&path).last().is_none());
    }
}
