//! Fixed-window discovery: probe once, collect what answers, stop.

use crate::engine::{Protocol, ServiceDiscovery, ServiceHandler, ServiceInfo};
use crate::error::DiscoveryError;
use crate::ssdp::{Ssdp, SsdpConfig};
use crate::wsd::{Wsd, WsdConfig};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

pub type Services = HashMap<String, ServiceInfo>;

#[derive(Clone, Default)]
struct Collector {
    services: Arc<Mutex<Services>>,
}

impl ServiceHandler for Collector {
    fn alive(&self, info: ServiceInfo) {
        let Some(id) = info.id.clone() else {
            tracing::debug!("Ignoring service without identity: {}", info);
            return;
        };

        self.services.lock().insert(id, info);
    }
}

/// Runs `discovery` for `window` and returns every service that announced
/// itself alive, keyed by identity.
pub async fn search<P: Protocol>(
    discovery: ServiceDiscovery<P>,
    window: Duration,
) -> Result<Services, DiscoveryError> {
    let collector = Collector::default();
    let session = discovery.start(collector.clone()).await?;

    tokio::time::sleep(window).await;
    session.stop().await;

    let services = std::mem::take(&mut *collector.services.lock());
    tracing::debug!("Collected {} services", services.len());

    Ok(services)
}

/// SSDP search for all service types over unicast responses.
pub async fn ssdp(window: Duration) -> Result<Services, DiscoveryError> {
    let mut config = SsdpConfig::default();
    config.transport.unicast_responses_only = true;

    search(Ssdp::discovery(config), window).await
}

/// WS-Discovery probe over unicast responses.
pub async fn wsd(window: Duration) -> Result<Services, DiscoveryError> {
    let mut config = WsdConfig::default();
    config.transport.unicast_responses_only = true;

    search(Wsd::discovery(config), window).await
}
