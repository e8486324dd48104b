//! Classified service events on top of the raw transport.
//!
//! A [`Protocol`] turns datagrams into [`ParsedMessage`]s, the engine routes
//! each one to the matching [`ServiceHandler`] method.

use crate::config::Config;
use crate::error::DiscoveryError;
use crate::ssdp::SsdpDetails;
use crate::transport::{DatagramHandler, Session, Transport};
use crate::wsd::WsdDetails;
use std::fmt::{Display, Formatter};
use std::net::SocketAddr;
use tokio::sync::mpsc::UnboundedSender;

#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
pub enum MessageKind {
    /// A service appeared or refreshed its announcement
    Alive,

    /// A service withdrew
    Gone,

    /// Someone else probed for services
    Search,

    /// Anything else the dialect understood
    Other,
}

/// Dialect specific fields of a [`ServiceInfo`].
#[derive(Debug, Clone, PartialEq)]
pub enum ServiceDetails {
    Ssdp(SsdpDetails),
    Wsd(WsdDetails),
}

/// A service as described by one received datagram.
#[derive(Debug, Clone, PartialEq)]
pub struct ServiceInfo {
    /// Identity of the service (USN or endpoint address).
    pub id: Option<String>,

    /// Advertised type(s).
    pub types: Option<String>,

    /// Where the service can be reached.
    pub location: Option<String>,

    /// Sender of the datagram.
    pub source: SocketAddr,

    pub details: ServiceDetails,
}

impl ServiceInfo {
    pub fn ssdp(&self) -> Option<&SsdpDetails> {
        match &self.details {
            ServiceDetails::Ssdp(v) => Some(v),
            ServiceDetails::Wsd(_) => None,
        }
    }

    pub fn wsd(&self) -> Option<&WsdDetails> {
        match &self.details {
            ServiceDetails::Wsd(v) => Some(v),
            ServiceDetails::Ssdp(_) => None,
        }
    }
}

impl Display for ServiceInfo {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} | {} | {} | ({})",
            self.id.as_deref().unwrap_or("-"),
            self.types.as_deref().unwrap_or("-"),
            self.location.as_deref().unwrap_or("-"),
            self.source
        )
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ParsedMessage {
    pub kind: MessageKind,
    pub info: ServiceInfo,
}

/// A discovery dialect.
pub trait Protocol: Send + Sync + 'static {
    /// Builds the probe payload, called once per probe cycle.
    fn build_probe(&self) -> String;

    /// Parses and classifies an inbound message.
    ///
    /// Returns `None` for anything that should not produce an event. Must not
    /// panic on malformed input.
    fn parse(&self, message: &str, from: SocketAddr) -> Option<ParsedMessage>;
}

/// Receives classified events.
///
/// Methods are invoked on the worker thread that received the datagram, possibly
/// concurrently from both workers, and should return quickly.
pub trait ServiceHandler: Send + Sync + 'static {
    fn alive(&self, _info: ServiceInfo) {}

    fn gone(&self, _info: ServiceInfo) {}

    fn search(&self, _info: ServiceInfo) {}

    fn other(&self, _info: ServiceInfo) {}

    /// A probe cycle is starting.
    fn probing(&self) {}
}

/// Event form of the [`ServiceHandler`] callbacks.
#[derive(Debug, Clone, PartialEq)]
pub enum DiscoveryEvent {
    Probing,
    Alive(ServiceInfo),
    Gone(ServiceInfo),
    Search(ServiceInfo),
    Other(ServiceInfo),
}

impl ServiceHandler for UnboundedSender<DiscoveryEvent> {
    fn alive(&self, info: ServiceInfo) {
        forward(self, DiscoveryEvent::Alive(info));
    }

    fn gone(&self, info: ServiceInfo) {
        forward(self, DiscoveryEvent::Gone(info));
    }

    fn search(&self, info: ServiceInfo) {
        forward(self, DiscoveryEvent::Search(info));
    }

    fn other(&self, info: ServiceInfo) {
        forward(self, DiscoveryEvent::Other(info));
    }

    fn probing(&self) {
        forward(self, DiscoveryEvent::Probing);
    }
}

fn forward(sender: &UnboundedSender<DiscoveryEvent>, event: DiscoveryEvent) {
    if sender.send(event).is_err() {
        tracing::trace!("Event receiver dropped, discarding event");
    }
}

/// Adapts a protocol and a service handler to the transport callbacks.
struct Dispatcher<P, H> {
    protocol: P,
    handler: H,
}

impl<P: Protocol, H: ServiceHandler> DatagramHandler for Dispatcher<P, H> {
    fn probe_message(&self) -> Vec<u8> {
        self.protocol.build_probe().into_bytes()
    }

    fn receive(&self, message: &str, from: SocketAddr) {
        let Some(parsed) = self.protocol.parse(message, from) else {
            return;
        };

        match parsed.kind {
            MessageKind::Alive => self.handler.alive(parsed.info),
            MessageKind::Gone => self.handler.gone(parsed.info),
            MessageKind::Search => self.handler.search(parsed.info),
            MessageKind::Other => self.handler.other(parsed.info),
        }
    }

    fn probing(&self) {
        self.handler.probing();
    }
}

/// A protocol bound to a transport configuration, ready to be started.
#[derive(Debug, Clone)]
pub struct ServiceDiscovery<P> {
    protocol: P,
    transport: Transport,
}

impl<P: Protocol> ServiceDiscovery<P> {
    pub fn new(protocol: P, config: Config) -> Self {
        Self {
            protocol,
            transport: Transport::new(config),
        }
    }

    pub fn protocol(&self) -> &P {
        &self.protocol
    }

    pub fn config(&self) -> &Config {
        self.transport.config()
    }

    /// Starts the session, delivering classified events to `handler`.
    pub async fn start<H: ServiceHandler>(self, handler: H) -> Result<Session, DiscoveryError> {
        let dispatcher = Dispatcher {
            protocol: self.protocol,
            handler,
        };

        self.transport.start(dispatcher).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wsd::WsdDetails;
    use parking_lot::Mutex;
    use std::net::{Ipv4Addr, SocketAddrV4};

    /// Classifies by the first word of the message.
    struct WordProtocol;

    impl Protocol for WordProtocol {
        fn build_probe(&self) -> String {
            "probe".into()
        }

        fn parse(&self, message: &str, from: SocketAddr) -> Option<ParsedMessage> {
            let kind = match message.split_whitespace().next()? {
                "alive" => MessageKind::Alive,
                "gone" => MessageKind::Gone,
                "search" => MessageKind::Search,
                "other" => MessageKind::Other,
                _ => return None,
            };

            Some(ParsedMessage {
                kind,
                info: ServiceInfo {
                    id: message.split_whitespace().nth(1).map(str::to_string),
                    types: None,
                    location: None,
                    source: from,
                    details: ServiceDetails::Wsd(WsdDetails::default()),
                },
            })
        }
    }

    #[derive(Default)]
    struct Recorder {
        calls: Mutex<Vec<String>>,
    }

    impl Recorder {
        fn record(&self, what: &str, info: ServiceInfo) {
            self.calls
                .lock()
                .push(format!("{} {}", what, info.id.unwrap_or_default()));
        }
    }

    impl ServiceHandler for std::sync::Arc<Recorder> {
        fn alive(&self, info: ServiceInfo) {
            self.record("alive", info);
        }

        fn gone(&self, info: ServiceInfo) {
            self.record("gone", info);
        }

        fn search(&self, info: ServiceInfo) {
            self.record("search", info);
        }

        fn other(&self, info: ServiceInfo) {
            self.record("other", info);
        }

        fn probing(&self) {
            self.calls.lock().push("probing".into());
        }
    }

    fn source() -> SocketAddr {
        SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::new(10, 0, 0, 7), 1900))
    }

    #[test]
    fn routes_each_kind_to_one_method() {
        let recorder = std::sync::Arc::new(Recorder::default());
        let dispatcher = Dispatcher {
            protocol: WordProtocol,
            handler: recorder.clone(),
        };

        for message in ["alive a", "gone b", "search c", "other d", "garbage e"] {
            dispatcher.receive(message, source());
        }
        dispatcher.probing();

        assert_eq!(
            *recorder.calls.lock(),
            vec!["alive a", "gone b", "search c", "other d", "probing"]
        );
    }

    #[test]
    fn probe_comes_from_protocol() {
        let dispatcher = Dispatcher {
            protocol: WordProtocol,
            handler: std::sync::Arc::new(Recorder::default()),
        };

        assert_eq!(dispatcher.probe_message(), b"probe".to_vec());
    }

    #[test]
    fn channel_handler_forwards_events() {
        let (sender, mut receiver) = tokio::sync::mpsc::unbounded_channel();
        let dispatcher = Dispatcher {
            protocol: WordProtocol,
            handler: sender,
        };

        dispatcher.probing();
        dispatcher.receive("gone x", source());

        assert_eq!(receiver.try_recv().unwrap(), DiscoveryEvent::Probing);
        match receiver.try_recv().unwrap() {
            DiscoveryEvent::Gone(info) => assert_eq!(info.id.as_deref(), Some("x")),
            other => panic!("unexpected event {:?}", other),
        }
        assert!(receiver.try_recv().is_err());
    }

    #[test]
    fn closed_channel_is_ignored() {
        let (sender, receiver) = tokio::sync::mpsc::unbounded_channel();
        drop(receiver);

        // Must not panic
        sender.alive(ServiceInfo {
            id: None,
            types: None,
            location: None,
            source: source(),
            details: ServiceDetails::Wsd(WsdDetails::default()),
        });
    }

    #[test]
    fn display_uses_placeholders() {
        let info = ServiceInfo {
            id: Some("uuid:1".into()),
            types: None,
            location: Some("http://10.0.0.7/desc.xml".into()),
            source: source(),
            details: ServiceDetails::Wsd(WsdDetails::default()),
        };

        assert_eq!(
            info.to_string(),
            "uuid:1 | - | http://10.0.0.7/desc.xml | (10.0.0.7:1900)"
        );
    }
}
