//! Server and receiver settings
//!
//! Loads from TOML files with environment-specific overrides. Connection
//! entries are validated one at a time: a malformed entry is logged and
//! dropped while the rest of the file still loads.

use anyhow::{Context, Result};
use config_crate::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, warn};

pub const DEFAULT_DDS_PORT: u16 = 16003;

/// Complete configuration for one LRGS process
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DdsConfig {
    pub server: ServerSettings,
    pub recv: RecvSettings,
}

/// Distribution server settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    pub listen_addr: String,
    pub enabled: bool,
    pub max_clients: usize,
    /// Size of the per-client status table.
    pub status_slots: usize,
    /// Seconds without a request before a client is hung up on.
    pub hangup_secs: u64,
    pub housekeeping_secs: u64,
    pub netlist_check_secs: u64,
    /// Per-request archive search window.
    pub search_window_secs: u64,
    pub netlist_dir: PathBuf,
    /// Root of the per-user directories holding saved positions.
    pub sandbox_dir: PathBuf,
    pub connection_id_file: PathBuf,
    pub require_auth: bool,
    pub users: Vec<UserSettings>,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            listen_addr: format!("0.0.0.0:{}", DEFAULT_DDS_PORT),
            enabled: true,
            max_clients: 150,
            status_slots: 250,
            hangup_secs: 3600,
            housekeeping_secs: 10,
            netlist_check_secs: 60,
            search_window_secs: 45,
            netlist_dir: PathBuf::from("netlist"),
            sandbox_dir: PathBuf::from("users"),
            connection_id_file: PathBuf::from("ddsconnection.id"),
            require_auth: false,
            users: Vec::new(),
        }
    }
}

impl ServerSettings {
    pub fn hangup(&self) -> Duration {
        Duration::from_secs(self.hangup_secs)
    }

    pub fn housekeeping_interval(&self) -> Duration {
        Duration::from_secs(self.housekeeping_secs.max(1))
    }

    pub fn netlist_check_interval(&self) -> Duration {
        Duration::from_secs(self.netlist_check_secs.max(1))
    }

    pub fn search_window(&self) -> Duration {
        Duration::from_secs(self.search_window_secs)
    }

    pub fn user(&self, name: &str) -> Option<&UserSettings> {
        self.users.iter().find(|u| u.name == name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserSettings {
    pub name: String,
    #[serde(default)]
    pub password: Option<String>,
    /// Suppress bad-quality GOES messages for this user.
    #[serde(default)]
    pub good_only: bool,
    /// Always use the forward index scan, even for address-limited history.
    #[serde(default)]
    pub force_ascending: bool,
    #[serde(default)]
    pub disabled: bool,
    /// When the user's resume point for `LRGS_SINCE: last` is written.
    #[serde(default)]
    pub save_last: SaveLastPolicy,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SaveLastPolicy {
    Never,
    #[default]
    OnDetach,
    EveryDelivery,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionGroup {
    #[default]
    Primary,
    Secondary,
}

/// One upstream DDS peer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionSettings {
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub group: ConnectionGroup,
    #[serde(default)]
    pub authenticate: bool,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: Option<String>,
    /// Ask the peer for DAPS status messages as well as real ones.
    #[serde(default)]
    pub accept_error_messages: bool,
}

impl ConnectionSettings {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            name: None,
            enabled: true,
            group: ConnectionGroup::Primary,
            authenticate: false,
            username: String::new(),
            password: None,
            accept_error_messages: false,
        }
    }

    pub fn display_name(&self) -> String {
        self.name
            .clone()
            .unwrap_or_else(|| format!("{}:{}", self.host, self.port))
    }
}

fn default_port() -> u16 {
    DEFAULT_DDS_PORT
}

fn default_true() -> bool {
    true
}

/// Network list included in every recovery criteria for a group
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetlistGroup {
    pub netlist: String,
    #[serde(default)]
    pub group: ConnectionGroup,
}

/// Netback receiver settings
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecvSettings {
    pub enabled: bool,
    pub group: ConnectionGroup,
    pub connections: Vec<ConnectionSettings>,
    pub netlists: Vec<NetlistGroup>,
    /// A connected peer silent for longer than this is considered dead.
    pub timeout_secs: u64,
    pub reconnect_secs: u64,
    /// Upper bound on one wait for the next message.
    pub message_wait_secs: u64,
    pub keepalive_secs: u64,
    pub config_check_secs: u64,
    pub outage_file: PathBuf,
    pub last_receive_file: PathBuf,
    /// Whether any local satellite link feeds real-time data.
    pub satellite_links_enabled: bool,
}

impl Default for RecvSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            group: ConnectionGroup::Primary,
            connections: Vec::new(),
            netlists: Vec::new(),
            timeout_secs: 120,
            reconnect_secs: 10,
            message_wait_secs: 60,
            keepalive_secs: 120,
            config_check_secs: 30,
            outage_file: PathBuf::from("outages.json"),
            last_receive_file: PathBuf::from("ddsrecv.last"),
            satellite_links_enabled: false,
        }
    }
}

impl RecvSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn reconnect_interval(&self) -> Duration {
        Duration::from_secs(self.reconnect_secs)
    }

    pub fn message_wait(&self) -> Duration {
        Duration::from_secs(self.message_wait_secs)
    }

    pub fn keepalive(&self) -> Duration {
        Duration::from_secs(self.keepalive_secs)
    }

    pub fn config_check_interval(&self) -> Duration {
        Duration::from_secs(self.config_check_secs.max(1))
    }

    /// Connections belonging to the configured group, in file order.
    pub fn group_connections(&self) -> Vec<ConnectionSettings> {
        self.connections
            .iter()
            .filter(|c| c.group == self.group)
            .cloned()
            .collect()
    }

    pub fn group_netlists(&self) -> Vec<String> {
        self.netlists
            .iter()
            .filter(|n| n.group == self.group)
            .map(|n| n.netlist.clone())
            .collect()
    }
}

/// Wire form of the receiver section; connection entries stay untyped until
/// each one is validated on its own.
#[derive(Debug, Deserialize)]
#[serde(default)]
struct RawRecvSettings {
    enabled: bool,
    group: ConnectionGroup,
    connections: Vec<toml::Value>,
    netlists: Vec<NetlistGroup>,
    timeout_secs: u64,
    reconnect_secs: u64,
    message_wait_secs: u64,
    keepalive_secs: u64,
    config_check_secs: u64,
    outage_file: PathBuf,
    last_receive_file: PathBuf,
    satellite_links_enabled: bool,
}

impl Default for RawRecvSettings {
    fn default() -> Self {
        let d = RecvSettings::default();
        Self {
            enabled: d.enabled,
            group: d.group,
            connections: Vec::new(),
            netlists: d.netlists,
            timeout_secs: d.timeout_secs,
            reconnect_secs: d.reconnect_secs,
            message_wait_secs: d.message_wait_secs,
            keepalive_secs: d.keepalive_secs,
            config_check_secs: d.config_check_secs,
            outage_file: d.outage_file,
            last_receive_file: d.last_receive_file,
            satellite_links_enabled: d.satellite_links_enabled,
        }
    }
}

impl RawRecvSettings {
    fn validate(self) -> RecvSettings {
        let connections = self
            .connections
            .into_iter()
            .enumerate()
            .filter_map(|(idx, value)| match value.try_into::<ConnectionSettings>() {
                Ok(conn) => Some(conn),
                Err(e) => {
                    warn!(index = idx, error = %e, "Skipping malformed connection entry");
                    None
                }
            })
            .collect();

        RecvSettings {
            enabled: self.enabled,
            group: self.group,
            connections,
            netlists: self.netlists,
            timeout_secs: self.timeout_secs,
            reconnect_secs: self.reconnect_secs,
            message_wait_secs: self.message_wait_secs,
            keepalive_secs: self.keepalive_secs,
            config_check_secs: self.config_check_secs,
            outage_file: self.outage_file,
            last_receive_file: self.last_receive_file,
            satellite_links_enabled: self.satellite_links_enabled,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawDdsConfig {
    server: ServerSettings,
    recv: RawRecvSettings,
}

impl DdsConfig {
    /// Load configuration from a file with `DDS__SECTION__KEY` environment overrides
    pub fn load(path: &Path) -> Result<Self> {
        let builder = Config::builder()
            .add_source(File::from(path).required(true))
            .add_source(
                Environment::with_prefix("DDS")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            );

        let raw: RawDdsConfig = builder
            .build()
            .context("Failed to build configuration")?
            .try_deserialize()
            .context("Failed to deserialize configuration")?;

        let mut config = raw.finish();
        config.expand_paths()?;
        debug!(path = %path.display(), connections = config.recv.connections.len(), "Loaded configuration");
        Ok(config)
    }

    /// Parses TOML text directly, without environment overrides.
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let raw: RawDdsConfig = toml::from_str(text).context("Failed to parse configuration")?;
        let mut config = raw.finish();
        config.expand_paths()?;
        Ok(config)
    }

    /// Expand environment variables in path values
    pub fn expand_paths(&mut self) -> Result<()> {
        for path in [
            &mut self.server.netlist_dir,
            &mut self.server.sandbox_dir,
            &mut self.server.connection_id_file,
            &mut self.recv.outage_file,
            &mut self.recv.last_receive_file,
        ] {
            let text = path.to_string_lossy().into_owned();
            let expanded = shellexpand::full(&text)
                .with_context(|| format!("Failed to expand path {}", text))?;
            *path = PathBuf::from(expanded.as_ref());
        }
        Ok(())
    }
}

impl RawDdsConfig {
    fn finish(self) -> DdsConfig {
        DdsConfig {
            server: self.server,
            recv: self.recv.validate(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    const SAMPLE: &str = r#"
[server]
listen_addr = "127.0.0.1:17000"
max_clients = 4
hangup_secs = 30

[[server.users]]
name = "alice"
password = "pw"
good_only = true

[[server.users]]
name = "bob"
save_last = "every_delivery"

[recv]
timeout_secs = 90

[[recv.connections]]
host = "cdadata.wcda.noaa.gov"
name = "cda"

[[recv.connections]]
host = "backup.example.org"
port = 16004
group = "secondary"

[[recv.connections]]
port = "not-a-port"

[[recv.netlists]]
netlist = "rivers"
"#;

    #[test]
    fn test_load_base_config() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("lrgs.toml");
        fs::write(&path, SAMPLE).unwrap();

        let config = DdsConfig::load(&path).unwrap();
        assert_eq!(config.server.listen_addr, "127.0.0.1:17000");
        assert_eq!(config.server.max_clients, 4);
        assert!(config.server.user("alice").unwrap().good_only);
        assert_eq!(config.server.user("alice").unwrap().save_last, SaveLastPolicy::OnDetach);
        assert_eq!(config.server.user("bob").unwrap().save_last, SaveLastPolicy::EveryDelivery);
        assert_eq!(config.recv.timeout_secs, 90);
        assert_eq!(config.recv.connections.len(), 2);
        assert_eq!(config.recv.connections[0].port, DEFAULT_DDS_PORT);
    }

    #[test]
    fn test_malformed_connection_is_skipped() {
        let config = DdsConfig::from_toml_str(SAMPLE).unwrap();
        let hosts: Vec<&str> = config
            .recv
            .connections
            .iter()
            .map(|c| c.host.as_str())
            .collect();
        assert_eq!(hosts, vec!["cdadata.wcda.noaa.gov", "backup.example.org"]);
    }

    #[test]
    fn test_group_selection() {
        let mut config = DdsConfig::from_toml_str(SAMPLE).unwrap();
        assert_eq!(config.recv.group_connections().len(), 1);
        assert_eq!(config.recv.group_netlists(), vec!["rivers".to_string()]);

        config.recv.group = ConnectionGroup::Secondary;
        let secondary = config.recv.group_connections();
        assert_eq!(secondary.len(), 1);
        assert_eq!(secondary[0].port, 16004);
        assert!(config.recv.group_netlists().is_empty());
    }

    #[test]
    fn test_defaults_when_sections_missing() {
        let config = DdsConfig::from_toml_str("").unwrap();
        assert_eq!(config, DdsConfig::default());
    }
}
