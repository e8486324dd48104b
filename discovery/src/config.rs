use crate::error::DiscoveryError;
use crate::ssdp::SsdpConfig;
use crate::wsd::WsdConfig;
use serde::{Deserialize, Serialize};
use std::net::Ipv4Addr;
use std::path::Path;
use std::time::Duration;

/// Multicast group shared by SSDP and WS-Discovery.
pub const DEFAULT_MULTICAST_IPV4: Ipv4Addr = Ipv4Addr::new(239, 255, 255, 250);

/// Transport settings for one discovery session.
///
/// The configuration is copied into the session on start and never changes
/// afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Group the probes are sent to and the notification socket joins.
    pub address: Ipv4Addr,

    /// Well-known port of the dialect, 0 lets the dialect pick its default.
    pub port: u16,

    /// Seconds between automatic probes, 0 disables periodic probing.
    pub discovery_interval_secs: u64,

    /// Only listen for unicast replies to our own probes.
    pub unicast_responses_only: bool,

    /// How long `stop` waits for each worker.
    pub stop_wait_ms: u64,

    /// Upper bound for a single receive, also bounds stop/probe latency.
    pub receive_timeout_ms: u64,

    /// Window in which an identical payload is dropped, 0 disables it.
    pub dedup_threshold_secs: u64,

    /// Maximum number of payloads remembered per worker.
    pub dedup_max_messages: usize,

    pub multicast_ttl: u32,

    pub receive_buffer_size: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            address: DEFAULT_MULTICAST_IPV4,
            port: 0,
            discovery_interval_secs: 20 * 60,
            unicast_responses_only: false,
            stop_wait_ms: 10_000,
            receive_timeout_ms: 1_000,
            dedup_threshold_secs: 2,
            dedup_max_messages: 100,
            multicast_ttl: 2,
            receive_buffer_size: 20 * 1024,
        }
    }
}

impl Config {
    /// Returns a copy with the port filled in when none was configured.
    pub fn with_default_port(&self, port: u16) -> Self {
        let mut config = self.clone();
        if config.port == 0 {
            config.port = port;
        }
        config
    }

    /// Creates a configuration with default timings for the given group.
    pub fn for_group(address: Ipv4Addr, port: u16) -> Self {
        Self {
            address,
            port,
            ..Self::default()
        }
    }

    /// Returns the periodic probe interval, `None` when disabled.
    pub fn discovery_interval(&self) -> Option<Duration> {
        match self.discovery_interval_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        }
    }

    pub fn stop_wait(&self) -> Duration {
        Duration::from_millis(self.stop_wait_ms)
    }

    pub fn receive_timeout(&self) -> Duration {
        Duration::from_millis(self.receive_timeout_ms)
    }

    pub fn dedup_threshold(&self) -> Duration {
        Duration::from_secs(self.dedup_threshold_secs)
    }

    /// Checks the configuration before any socket is created.
    pub fn validate(&self) -> Result<(), DiscoveryError> {
        if self.port == 0 {
            return Err(DiscoveryError::InvalidConfig(
                "a multicast port is required".into(),
            ));
        }

        // A unicast target is fine when we never listen on the group
        if !self.address.is_multicast() && !self.unicast_responses_only {
            return Err(DiscoveryError::InvalidConfig(format!(
                "{} is not a multicast address",
                self.address
            )));
        }

        if self.receive_timeout_ms == 0 {
            return Err(DiscoveryError::InvalidConfig(
                "receive timeout must be greater than zero".into(),
            ));
        }

        if self.stop_wait_ms == 0 {
            return Err(DiscoveryError::InvalidConfig(
                "stop wait must be greater than zero".into(),
            ));
        }

        if self.receive_buffer_size == 0 {
            return Err(DiscoveryError::InvalidConfig(
                "receive buffer size must be greater than zero".into(),
            ));
        }

        Ok(())
    }
}

/// Settings file read by the command line front end.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfigFile {
    pub ssdp: SsdpConfig,
    pub wsd: WsdConfig,
}

impl ConfigFile {
    pub fn load(path: &Path) -> Result<Self, DiscoveryError> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    pub fn from_yaml(contents: &str) -> Result<Self, DiscoveryError> {
        let file = serde_yaml::from_str(contents)?;
        tracing::debug!("Loaded configuration: {:?}", file);
        Ok(file)
    }
}
