//! Configuration file support.
//!
//! Loads settings from `~/.config/wintest-bridge/config.toml` on Linux
//! (or the platform-appropriate location elsewhere), or from a path given
//! on the command line.

use anyhow::{Context, Result, bail};
use serde::Deserialize;
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::band::{Band, BandTable, FollowMode};
use crate::cat::RadioConfig;
use crate::extractor::{DigiPolicy, SpotFilters};
use crate::relay::{QsyTarget, RelaySettings};
use crate::session::SessionConfig;
use crate::wintest::FrequencyField;

/// WinTest network port.
pub const WINTEST_PORT: u16 = 9871;

/// UDP side of the bridge.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct UdpConfig {
    pub bind_address: String,
    pub bind_port: u16,

    /// Usually the LAN broadcast address.
    pub broadcast_address: String,
    pub broadcast_port: u16,

    /// Subsystem name WinTest addresses `REMOTE` frames to.
    pub remote_subsystem: String,

    /// Where the frequency sits in a `STATUS` frame.
    pub status_frequency: FrequencyField,

    pub receive_timeout_ms: u64,
}

impl Default for UdpConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0".to_string(),
            bind_port: WINTEST_PORT,
            broadcast_address: "255.255.255.255".to_string(),
            broadcast_port: WINTEST_PORT,
            remote_subsystem: "SNIFFER".to_string(),
            status_frequency: FrequencyField::default(),
            receive_timeout_ms: 100,
        }
    }
}

impl UdpConfig {
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.bind_address, self.bind_port)
    }

    pub fn broadcast_addr(&self) -> String {
        format!("{}:{}", self.broadcast_address, self.broadcast_port)
    }
}

/// One telnet feed, skimmer or cluster.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EndpointConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub password_prompt: Option<String>,
    pub prompt: String,
    pub login_prompt: String,
    pub connect_timeout_secs: u64,
    pub login_timeout_secs: u64,
    pub receive_timeout_ms: u64,
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 7300,
            user: "N0CALL".to_string(),
            password: String::new(),
            password_prompt: None,
            prompt: ">".to_string(),
            login_prompt: "login:".to_string(),
            connect_timeout_secs: 5,
            login_timeout_secs: 10,
            receive_timeout_ms: 100,
        }
    }
}

impl EndpointConfig {
    /// CW Skimmer Server asks for a callsign rather than a login.
    fn skimmer() -> Self {
        Self {
            login_prompt: "callsign:".to_string(),
            ..Default::default()
        }
    }

    fn validate(&self, name: &str) -> Result<()> {
        if self.host.is_empty() {
            bail!("[{}] host is empty", name);
        }
        if self.prompt.is_empty() {
            bail!("[{}] prompt is empty", name);
        }
        if self.login_prompt.is_empty() {
            bail!("[{}] login_prompt is empty", name);
        }
        if self.receive_timeout_ms == 0 {
            bail!("[{}] receive_timeout_ms must be positive", name);
        }
        Ok(())
    }
}

/// Metrics HTTP endpoint.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    pub enabled: bool,
    pub port: u16,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            port: 9090,
        }
    }
}

/// Application configuration loaded from TOML file.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Strip bell characters from relayed spots.
    pub remove_bell: bool,

    /// Drop FT8/FT4 spots.
    pub remove_digi: bool,

    pub digi_policy: DigiPolicy,

    /// How the skimmer follows WinTest.
    pub follow_mode: FollowMode,

    /// Tune the radio's VFO B when a skimmer spot is clicked.
    pub radio_follow: bool,

    pub qsy_target: QsyTarget,

    /// Idle poll cycles before a dropped session is reconnected.
    pub reconnect_threshold: u32,

    /// Pause between `SKIMMER/QSY` and `SKIMMER/SETT`.
    pub qsy_settle_ms: u64,

    /// Log a statistics summary every N seconds (0 = never).
    pub stats_interval: u64,

    pub udp: UdpConfig,

    /// Prompts default to CW Skimmer Server's only when the section is absent.
    #[serde(default = "EndpointConfig::skimmer")]
    pub skimmer: EndpointConfig,

    pub cluster: EndpointConfig,

    pub radio: RadioConfig,

    /// Replaces the built-in band table when not empty.
    pub bands: Vec<Band>,

    pub metrics: MetricsConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            remove_bell: true,
            remove_digi: false,
            digi_policy: DigiPolicy::default(),
            follow_mode: FollowMode::default(),
            radio_follow: false,
            qsy_target: QsyTarget::default(),
            reconnect_threshold: 100,
            qsy_settle_ms: 200,
            stats_interval: 300,
            udp: UdpConfig::default(),
            skimmer: EndpointConfig::skimmer(),
            cluster: EndpointConfig::default(),
            radio: RadioConfig::default(),
            bands: Vec::new(),
            metrics: MetricsConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from the default config file location.
    ///
    /// Returns default config if the file doesn't exist.
    /// Returns an error if the file exists but is malformed.
    pub fn load() -> Result<Self> {
        match Self::config_path() {
            Some(path) if path.exists() => Self::load_from(&path),
            _ => Ok(Config::default()),
        }
    }

    /// Load configuration from an explicit path, which must exist.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        toml::from_str(&content)
            .with_context(|| format!("Invalid TOML in config file: {}", path.display()))
    }

    /// Returns the path to the config file.
    pub fn config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("wintest-bridge/config.toml"))
    }

    /// Validate all configuration settings.
    pub fn validate(&self) -> Result<()> {
        self.skimmer.validate("skimmer")?;
        self.cluster.validate("cluster")?;

        self.udp
            .status_frequency
            .validate()
            .map_err(|e| anyhow::anyhow!("[udp] {}", e))?;
        self.udp
            .broadcast_addr()
            .parse::<SocketAddr>()
            .with_context(|| format!("[udp] invalid broadcast address {}", self.udp.broadcast_addr()))?;
        if self.udp.receive_timeout_ms == 0 {
            bail!("[udp] receive_timeout_ms must be positive");
        }

        self.band_table()
            .validate()
            .map_err(|e| anyhow::anyhow!("[[bands]] {}", e))?;

        if self.reconnect_threshold == 0 {
            bail!("reconnect_threshold must be at least 1");
        }

        if self.radio_follow {
            self.radio
                .validate()
                .map_err(|e| anyhow::anyhow!("[radio] {}", e))?;
        }
        Ok(())
    }

    /// Session parameters for the skimmer feed.
    pub fn skimmer_session(&self) -> SessionConfig {
        session_config("skimmer", &self.skimmer)
    }

    /// Session parameters for the cluster feed.
    pub fn cluster_session(&self) -> SessionConfig {
        session_config("cluster", &self.cluster)
    }

    pub fn spot_filters(&self) -> SpotFilters {
        SpotFilters {
            remove_digi: self.remove_digi,
            remove_bell: self.remove_bell,
            digi_policy: self.digi_policy,
        }
    }

    pub fn band_table(&self) -> BandTable {
        if self.bands.is_empty() {
            BandTable::default()
        } else {
            BandTable::new(self.bands.clone())
        }
    }

    pub fn relay_settings(&self) -> RelaySettings {
        RelaySettings {
            follow_mode: self.follow_mode,
            qsy_target: self.qsy_target,
            remote_subsystem: self.udp.remote_subsystem.clone(),
            status_frequency: self.udp.status_frequency.clone(),
            radio_follow: self.radio_follow,
            qsy_settle: Duration::from_millis(self.qsy_settle_ms),
        }
    }

    pub fn udp_receive_timeout(&self) -> Duration {
        Duration::from_millis(self.udp.receive_timeout_ms)
    }
}

fn session_config(name: &str, endpoint: &EndpointConfig) -> SessionConfig {
    SessionConfig {
        name: name.to_string(),
        host: endpoint.host.clone(),
        port: endpoint.port,
        user: endpoint.user.clone(),
        password: endpoint.password.clone(),
        password_prompt: endpoint.password_prompt.clone(),
        prompt: endpoint.prompt.clone(),
        login_prompt: endpoint.login_prompt.clone(),
        connect_timeout: Duration::from_secs(endpoint.connect_timeout_secs),
        login_timeout: Duration::from_secs(endpoint.login_timeout_secs),
        receive_timeout: Duration::from_millis(endpoint.receive_timeout_ms),
    }
}
