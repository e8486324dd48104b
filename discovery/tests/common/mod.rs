#![allow(dead_code)]

use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::sync::mpsc::UnboundedReceiver;
use udp_discovery::{Config, DiscoveryEvent};

pub const WAIT: Duration = Duration::from_secs(5);

/// Transport settings that probe `target` directly and react quickly.
pub fn unicast_config(target: SocketAddr) -> Config {
    let SocketAddr::V4(target) = target else {
        panic!("IPv4 target expected, got {}", target);
    };

    let mut config = Config::for_group(*target.ip(), target.port());
    config.unicast_responses_only = true;
    config.receive_timeout_ms = 100;
    config.stop_wait_ms = 2000;
    config
}

/// A device answering on the loopback interface.
pub struct FakeDevice {
    socket: UdpSocket,
}

impl FakeDevice {
    pub async fn bind() -> Self {
        Self {
            socket: UdpSocket::bind((Ipv4Addr::LOCALHOST, 0)).await.unwrap(),
        }
    }

    pub fn addr(&self) -> SocketAddr {
        self.socket.local_addr().unwrap()
    }

    /// Waits for the next datagram, panicking after [`WAIT`].
    pub async fn recv(&self) -> (String, SocketAddr) {
        let mut buffer = vec![0u8; 20480];
        let (len, from) = tokio::time::timeout(WAIT, self.socket.recv_from(&mut buffer))
            .await
            .expect("no datagram received in time")
            .unwrap();

        (String::from_utf8_lossy(&buffer[..len]).into_owned(), from)
    }

    pub async fn send(&self, message: &str, to: SocketAddr) {
        self.socket.send_to(message.as_bytes(), to).await.unwrap();
    }
}

/// Waits for the next Alive, Gone or Other event, skipping probe bookkeeping
/// and searches.
pub async fn next_service_event(events: &mut UnboundedReceiver<DiscoveryEvent>) -> DiscoveryEvent {
    loop {
        let event = tokio::time::timeout(WAIT, events.recv())
            .await
            .expect("no event received in time")
            .expect("event channel closed");

        match event {
            DiscoveryEvent::Probing | DiscoveryEvent::Search(_) => continue,
            other => return other,
        }
    }
}

pub fn loopback(port: u16) -> SocketAddr {
    SocketAddr::from((Ipv4Addr::LOCALHOST, port))
}
