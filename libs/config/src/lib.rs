//! # DDS Configuration
//!
//! Settings for the distribution server ([`ServerSettings`]) and the netback
//! receiver ([`RecvSettings`]), loaded from one TOML file with `DDS__`
//! environment overrides.
//!
//! Configuration is never a global. Services hold a [`ConfigHandle`] and read
//! an `Arc` snapshot; a reload builds a complete new snapshot and swaps it in,
//! so readers never observe a half-applied change.
//!
//! ## Usage
//!
//! ```no_run
//! use dds_config::ConfigHandle;
//!
//! let handle = ConfigHandle::load("config/lrgs.toml").unwrap();
//! let max = handle.current().server.max_clients;
//! # let _ = max;
//! ```

pub mod handle;
pub mod settings;

pub use handle::ConfigHandle;
pub use settings::{
    ConnectionGroup, ConnectionSettings, DdsConfig, NetlistGroup, RecvSettings, SaveLastPolicy,
    ServerSettings, UserSettings, DEFAULT_DDS_PORT,
};
