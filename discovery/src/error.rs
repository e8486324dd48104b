use std::net::Ipv4Addr;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("could not join multicast group {group} on any of {attempted} interfaces")]
    NoMulticastMembership { group: Ipv4Addr, attempted: usize },

    #[error("failed to decode configuration file: {0}")]
    ConfigFile(#[from] serde_yaml::Error),
}
