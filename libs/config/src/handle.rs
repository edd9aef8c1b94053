//! Shared, reloadable configuration snapshot

use crate::DdsConfig;
use anyhow::{Context, Result};
use parking_lot::{Mutex, RwLock};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;
use tracing::{info, warn};

/// Holds the current [`DdsConfig`] and swaps it atomically on reload.
///
/// Readers take a cheap `Arc` clone and keep a consistent view for as long
/// as they hold it, even if a reload lands meanwhile.
#[derive(Debug)]
pub struct ConfigHandle {
    path: Option<PathBuf>,
    current: RwLock<Arc<DdsConfig>>,
    loaded_mtime: Mutex<Option<SystemTime>>,
}

impl ConfigHandle {
    pub fn load(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let mtime = modified(&path)?;
        let config = DdsConfig::load(&path)?;
        info!(path = %path.display(), "Configuration loaded");
        Ok(Self {
            path: Some(path),
            current: RwLock::new(Arc::new(config)),
            loaded_mtime: Mutex::new(Some(mtime)),
        })
    }

    /// A handle with no backing file; `reload_if_changed` never reloads.
    pub fn fixed(config: DdsConfig) -> Self {
        Self {
            path: None,
            current: RwLock::new(Arc::new(config)),
            loaded_mtime: Mutex::new(None),
        }
    }

    pub fn current(&self) -> Arc<DdsConfig> {
        self.current.read().clone()
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Swaps in a new snapshot directly.
    pub fn replace(&self, config: DdsConfig) {
        *self.current.write() = Arc::new(config);
    }

    /// Reloads when the file's modification time changed since the last
    /// load. On a parse failure the previous snapshot stays in effect.
    pub fn reload_if_changed(&self) -> Result<bool> {
        let Some(path) = &self.path else {
            return Ok(false);
        };

        let mtime = modified(path)?;
        {
            let loaded = self.loaded_mtime.lock();
            if *loaded == Some(mtime) {
                return Ok(false);
            }
        }

        match DdsConfig::load(path) {
            Ok(config) => {
                *self.current.write() = Arc::new(config);
                *self.loaded_mtime.lock() = Some(mtime);
                info!(path = %path.display(), "Configuration reloaded");
                Ok(true)
            }
            Err(e) => {
                // Remember the bad mtime so a broken file is not re-parsed every check.
                *self.loaded_mtime.lock() = Some(mtime);
                warn!(path = %path.display(), error = %e, "Configuration reload failed, keeping previous settings");
                Err(e)
            }
        }
    }
}

fn modified(path: &Path) -> Result<SystemTime> {
    std::fs::metadata(path)
        .and_then(|m| m.modified())
        .with_context(|| format!("Cannot stat {}", path.display()))
}
