//! Simple Service Discovery Protocol.
//!
//! Probes are `M-SEARCH` requests; inbound messages are `M-SEARCH` requests of
//! other control points, `NOTIFY` announcements and `HTTP/1.x 200` search
//! responses, all in HTTP header form.

mod headers;

use crate::config::{Config, DEFAULT_MULTICAST_IPV4};
use crate::engine::{MessageKind, ParsedMessage, Protocol, ServiceDetails, ServiceDiscovery, ServiceInfo};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};

pub use headers::parse_headers;

/// Search target matching every service.
pub const SSDP_ALL: &str = "ssdp:all";
pub const SSDP_MULTICAST_IPV4: Ipv4Addr = DEFAULT_MULTICAST_IPV4;
pub const SSDP_PORT: u16 = 1900;

const SSDP_ALIVE: &str = "ssdp:alive";
const SSDP_BYEBYE: &str = "ssdp:byebye";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SsdpConfig {
    pub transport: Config,

    /// Search target sent in probes; anything but `ssdp:all` also filters
    /// inbound messages by their advertised type.
    pub search: String,

    /// Maximum response delay requested from responders.
    pub mx_delay_secs: u32,

    /// Report messages of unknown shape as `Other` instead of dropping them.
    pub unrecognized_as_other: bool,
}

impl Default for SsdpConfig {
    fn default() -> Self {
        Self {
            transport: Config::for_group(SSDP_MULTICAST_IPV4, SSDP_PORT),
            search: SSDP_ALL.to_string(),
            mx_delay_secs: 4,
            unrecognized_as_other: false,
        }
    }
}

impl SsdpConfig {
    /// Transport configuration with the SSDP port filled in if unset.
    pub fn transport_config(&self) -> Config {
        self.transport.with_default_port(SSDP_PORT)
    }
}

/// SSDP specific fields.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SsdpDetails {
    /// When the announcement should be considered stale.
    pub expires: Option<DateTime<Utc>>,

    /// All headers, keyed by lower-case name.
    pub headers: HashMap<String, String>,
}

impl SsdpDetails {
    /// Case-insensitive header lookup.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }
}

/// Role of a message, determined by its first line.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
enum StartLine {
    Search,
    Notify,
    Response,
    Unknown,
}

impl StartLine {
    fn classify(line: &str) -> Self {
        let line = line.to_ascii_lowercase();

        if line.starts_with("m-search") {
            Self::Search
        } else if line.starts_with("notify") {
            Self::Notify
        } else if line.starts_with("http") {
            Self::Response
        } else {
            Self::Unknown
        }
    }
}

#[derive(Debug, Clone)]
pub struct Ssdp {
    config: SsdpConfig,
}

impl Ssdp {
    pub fn new(config: SsdpConfig) -> Self {
        Self { config }
    }

    /// Creates a discovery session for the given configuration.
    pub fn discovery(config: SsdpConfig) -> ServiceDiscovery<Ssdp> {
        let transport = config.transport_config();
        ServiceDiscovery::new(Self::new(config), transport)
    }

    /// The probe sent with the default configuration.
    pub fn standard_probe() -> String {
        Self::new(SsdpConfig::default()).build_probe()
    }

    pub fn config(&self) -> &SsdpConfig {
        &self.config
    }

    /// Parses a message as if received at `now`.
    pub fn parse_at(
        &self,
        message: &str,
        from: SocketAddr,
        now: DateTime<Utc>,
    ) -> Option<ParsedMessage> {
        let mut lines = message.lines();
        let start_line = lines.next()?.trim();
        let role = StartLine::classify(start_line);

        let headers = parse_headers(lines);
        let info = Self::service_info(role, headers, from, now);

        if self.config.search != SSDP_ALL && info.types.as_deref() != Some(self.config.search.as_str()) {
            tracing::debug!(
                "Discarding SSDP message for ST mismatch ({}/{})",
                self.config.search,
                info.types.as_deref().unwrap_or("-")
            );
            return None;
        }

        let kind = match role {
            StartLine::Search => {
                tracing::debug!(
                    "M-SEARCH for {} from {}",
                    info.types.as_deref().unwrap_or("-"),
                    from
                );
                MessageKind::Search
            }
            StartLine::Notify => {
                let nts = info
                    .ssdp()
                    .and_then(|v| v.header("nts"))
                    .unwrap_or_default();

                if nts.eq_ignore_ascii_case(SSDP_ALIVE) {
                    tracing::debug!("ssdp:alive for {}", info.id.as_deref().unwrap_or("-"));
                    MessageKind::Alive
                } else if nts.eq_ignore_ascii_case(SSDP_BYEBYE) {
                    tracing::debug!("ssdp:byebye for {}", info.id.as_deref().unwrap_or("-"));
                    MessageKind::Gone
                } else {
                    tracing::debug!("Unexpected NTS value for NOTIFY from {}: {}", from, nts);
                    return self.unrecognized(info);
                }
            }
            StartLine::Response => {
                tracing::debug!(
                    "M-SEARCH response for {}",
                    info.id.as_deref().unwrap_or("-")
                );
                MessageKind::Alive
            }
            StartLine::Unknown => {
                tracing::debug!("Unexpected SSDP message from {}: {}", from, start_line);
                return self.unrecognized(info);
            }
        };

        Some(ParsedMessage { kind, info })
    }

    fn unrecognized(&self, info: ServiceInfo) -> Option<ParsedMessage> {
        self.config
            .unrecognized_as_other
            .then_some(ParsedMessage {
                kind: MessageKind::Other,
                info,
            })
    }

    fn service_info(
        role: StartLine,
        headers: HashMap<String, String>,
        from: SocketAddr,
        now: DateTime<Utc>,
    ) -> ServiceInfo {
        let header = |name: &str| headers.get(name).cloned();

        // Notifications carry the type in NT, requests and responses in ST
        let types = match role {
            StartLine::Notify => header("nt").or_else(|| header("st")),
            _ => header("st").or_else(|| header("nt")),
        };

        let max_age = headers
            .get("cache-control")
            .and_then(|v| headers::parse_max_age(v))
            .map(|age| now + chrono::Duration::seconds(i64::from(age)));
        let expires = headers.get("expires").and_then(|v| headers::parse_expires(v));

        ServiceInfo {
            id: header("usn"),
            types,
            location: header("location"),
            source: from,
            details: ServiceDetails::Ssdp(SsdpDetails {
                // max-age takes precedence over Expires, as in HTTP caching
                expires: max_age.or(expires),
                headers,
            }),
        }
    }
}

impl Protocol for Ssdp {
    fn build_probe(&self) -> String {
        let host = SocketAddrV4::new(self.config.transport.address, self.config.transport_config().port);

        format!(
            "M-SEARCH * HTTP/1.1\r\n\
             Host: {}\r\n\
             Man: \"ssdp:discover\"\r\n\
             ST: {}\r\n\
             Mx: {}\r\n\
             \r\n",
            host, self.config.search, self.config.mx_delay_secs
        )
    }

    fn parse(&self, message: &str, from: SocketAddr) -> Option<ParsedMessage> {
        self.parse_at(message, from, Utc::now())
    }
}
