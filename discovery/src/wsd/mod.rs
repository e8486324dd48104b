//! WS-Discovery over SOAP 1.2.

use crate::config::{Config, DEFAULT_MULTICAST_IPV4};
use crate::engine::{MessageKind, ParsedMessage, Protocol, ServiceDetails, ServiceDiscovery, ServiceInfo};
use roxmltree::{Document, Node};
use serde::{Deserialize, Serialize};
use std::net::{Ipv4Addr, SocketAddr};

pub const WSD_MULTICAST_IPV4: Ipv4Addr = DEFAULT_MULTICAST_IPV4;
pub const WSD_PORT: u16 = 3702;

pub const SOAP_ENVELOPE_NS: &str = "http://www.w3.org/2003/05/soap-envelope";
pub const ADDRESSING_NS: &str = "http://schemas.xmlsoap.org/ws/2004/08/addressing";
pub const DISCOVERY_NS: &str = "http://schemas.xmlsoap.org/ws/2005/04/discovery";

/// Namespaces of WS-Discovery 1.1, accepted on input only.
const ADDRESSING_1_1_NS: &str = "http://www.w3.org/2005/08/addressing";
const DISCOVERY_1_1_NS: &str = "http://docs.oasis-open.org/ws-dd/ns/discovery/2009/01";

const ADDRESSING: &[&str] = &[ADDRESSING_NS, ADDRESSING_1_1_NS];
const DISCOVERY: &[&str] = &[DISCOVERY_NS, DISCOVERY_1_1_NS];

const PROBE_TO: &str = "urn:schemas-xmlsoap-org:ws:2005:04:discovery";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WsdConfig {
    pub transport: Config,
}

impl Default for WsdConfig {
    fn default() -> Self {
        Self {
            transport: Config::for_group(WSD_MULTICAST_IPV4, WSD_PORT),
        }
    }
}

impl WsdConfig {
    /// Transport configuration with the WS-Discovery port filled in if unset.
    pub fn transport_config(&self) -> Config {
        self.transport.with_default_port(WSD_PORT)
    }
}

/// Fields pulled from the SOAP header and body.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WsdDetails {
    pub action: String,
    pub message_id: Option<String>,
    pub relates_to: Option<String>,
    pub endpoint: Option<String>,
    pub types: Vec<String>,
    pub xaddrs: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct Wsd {
    config: WsdConfig,
}

impl Wsd {
    pub fn new(config: WsdConfig) -> Self {
        Self { config }
    }

    /// Creates a discovery session for the given configuration.
    pub fn discovery(config: WsdConfig) -> ServiceDiscovery<Wsd> {
        let transport = config.transport_config();
        ServiceDiscovery::new(Self::new(config), transport)
    }

    /// A probe with a fresh message id.
    pub fn standard_probe() -> String {
        Self::default().build_probe()
    }

    pub fn config(&self) -> &WsdConfig {
        &self.config
    }
}

fn classify(action: &str) -> MessageKind {
    let action = action.to_ascii_lowercase();

    if action.ends_with("/probematches")
        || action.ends_with("/resolvematches")
        || action.ends_with("/hello")
    {
        MessageKind::Alive
    } else if action.ends_with("/probe") {
        MessageKind::Search
    } else if action.ends_with("/bye") {
        MessageKind::Gone
    } else {
        MessageKind::Other
    }
}

fn first<'a, 'input>(
    root: Node<'a, 'input>,
    namespaces: &[&str],
    name: &str,
) -> Option<Node<'a, 'input>> {
    root.descendants()
        .find(|n| n.is_element() && namespaces.iter().any(|ns| n.has_tag_name((*ns, name))))
}

fn text_of(node: Option<Node>) -> Option<String> {
    node.and_then(|n| n.text())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

fn split_list(value: Option<&str>) -> Vec<String> {
    value
        .map(|v| v.split_whitespace().map(str::to_string).collect())
        .unwrap_or_default()
}

impl Protocol for Wsd {
    fn build_probe(&self) -> String {
        format!(
            "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\r\n\
             <soap:Envelope xmlns:soap=\"{}\" xmlns:wsd=\"{}\" xmlns:wsa=\"{}\">\r\n\
             \x20  <soap:Header>\r\n\
             \x20     <wsa:Action>{}/Probe</wsa:Action>\r\n\
             \x20     <wsa:MessageID>urn:uuid:{}</wsa:MessageID>\r\n\
             \x20     <wsa:To>{}</wsa:To>\r\n\
             \x20  </soap:Header>\r\n\
             \x20  <soap:Body>\r\n\
             \x20     <wsd:Probe/>\r\n\
             \x20  </soap:Body>\r\n\
             </soap:Envelope>\r\n",
            SOAP_ENVELOPE_NS,
            DISCOVERY_NS,
            ADDRESSING_NS,
            DISCOVERY_NS,
            uuid::Uuid::new_v4(),
            PROBE_TO
        )
    }

    fn parse(&self, message: &str, from: SocketAddr) -> Option<ParsedMessage> {
        let doc = match Document::parse(message.trim()) {
            Ok(v) => v,
            Err(err) => {
                tracing::warn!("Failed to parse WS-Discovery XML from {}: {}", from, err);
                tracing::trace!("Offending payload: {}", message);
                return None;
            }
        };
        let root = doc.root();

        let Some(action) = text_of(first(root, ADDRESSING, "Action")) else {
            tracing::debug!("WS-Discovery message from {} without Action", from);
            return None;
        };

        // The endpoint reference carries the identity, fall back to any
        // addressing Address for lenient senders
        let endpoint = first(root, ADDRESSING, "EndpointReference")
            .and_then(|epr| text_of(first(epr, ADDRESSING, "Address")))
            .or_else(|| text_of(first(root, ADDRESSING, "Address")));

        let types = text_of(first(root, DISCOVERY, "Types"));
        let xaddrs = split_list(text_of(first(root, DISCOVERY, "XAddrs")).as_deref());

        let kind = classify(&action);
        tracing::debug!("WS-Discovery {:?} ({}) from {}", kind, action, from);

        let details = WsdDetails {
            message_id: text_of(first(root, ADDRESSING, "MessageID")),
            relates_to: text_of(first(root, ADDRESSING, "RelatesTo")),
            endpoint: endpoint.clone(),
            types: split_list(types.as_deref()),
            xaddrs: xaddrs.clone(),
            action,
        };

        Some(ParsedMessage {
            kind,
            info: ServiceInfo {
                id: endpoint,
                types,
                location: xaddrs.into_iter().next(),
                source: from,
                details: ServiceDetails::Wsd(details),
            },
        })
    }
}
