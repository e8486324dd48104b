//! Service discovery over UDP multicast.
//!
//! The [`transport`] runs the sockets, [`engine`] turns datagrams into service
//! events for a [`Protocol`], and [`ssdp`] and [`wsd`] implement the two
//! supported dialects.

pub mod config;
pub mod engine;
pub mod error;
pub mod net;
pub mod oneshot;
pub mod ssdp;
pub mod transport;
pub mod wsd;

pub use config::{Config, ConfigFile};
pub use engine::{
    DiscoveryEvent, MessageKind, ParsedMessage, Protocol, ServiceDetails, ServiceDiscovery,
    ServiceHandler, ServiceInfo,
};
pub use error::DiscoveryError;
pub use ssdp::{Ssdp, SsdpConfig, SsdpDetails};
pub use transport::{DatagramHandler, Session, Transport};
pub use wsd::{Wsd, WsdConfig, WsdDetails};
