use crate::config::Config;
use crate::error::DiscoveryError;
use crate::net::interfaces::{self, Interface};
use crate::transport::dedup::RecentMessages;
use crate::transport::{DatagramHandler, Signals};
use socket2::{Domain, Protocol, SockRef, Socket};
use std::fmt::{Display, Formatter};
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tokio::net::UdpSocket;
use tokio::sync::oneshot;

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub(crate) enum Role {
    /// Ephemeral port, sends probes and receives unicast replies.
    Discovery,

    /// Well-known port, member of the multicast group.
    Notification,
}

impl Display for Role {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::Discovery => f.write_str("discovery"),
            Role::Notification => f.write_str("notification"),
        }
    }
}

/// Decides when the discovery worker sends the next probe.
#[derive(Debug)]
pub(crate) struct ProbeSchedule {
    interval: Option<Duration>,
    last_probe: Option<Instant>,
}

impl ProbeSchedule {
    pub fn new(interval: Option<Duration>) -> Self {
        Self {
            interval,
            last_probe: None,
        }
    }

    /// Returns true if a probe should go out now and restarts the interval if so.
    ///
    /// The request flag is always consumed, so a request is honored exactly once.
    pub fn is_due(&mut self, requested: &AtomicBool, now: Instant) -> bool {
        let requested = requested.swap(false, Ordering::AcqRel);

        let due = requested
            || match (self.last_probe, self.interval) {
                (None, _) => true,
                (Some(last), Some(interval)) => now.saturating_duration_since(last) >= interval,
                (Some(_), None) => false,
            };

        if due {
            self.last_probe = Some(now);
        }

        due
    }
}

/// A bound socket whose receive loop has not been started yet.
#[derive(Debug)]
pub(crate) struct BoundSocket {
    role: Role,
    socket: std::net::UdpSocket,
}

impl BoundSocket {
    /// Binds the discovery socket to an ephemeral port.
    pub fn discovery(config: &Config) -> Result<Self, DiscoveryError> {
        let socket = Socket::new(Domain::IPV4, socket2::Type::DGRAM, Some(Protocol::UDP))?;

        // Looping the probe back lets local listeners (including our own
        // notification socket) see it
        socket.set_multicast_loop_v4(true)?;
        socket.set_multicast_ttl_v4(config.multicast_ttl)?;
        socket.bind(&SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, 0)).into())?;

        Self::new(Role::Discovery, socket)
    }

    /// Binds the notification socket to the well-known port and joins the
    /// multicast group on every qualifying interface.
    pub fn notification(config: &Config) -> Result<Self, DiscoveryError> {
        let socket = Socket::new(Domain::IPV4, socket2::Type::DGRAM, Some(Protocol::UDP))?;

        // Other discovery clients on this host listen on the same port
        socket.set_reuse_address(true)?;
        #[cfg(all(unix, not(any(target_os = "solaris", target_os = "illumos"))))]
        socket.set_reuse_port(true)?;

        socket.bind(&SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, config.port)).into())?;

        Self::join_group(&socket, config.address)?;

        Self::new(Role::Notification, socket)
    }

    fn join_group(socket: &Socket, group: Ipv4Addr) -> Result<(), DiscoveryError> {
        let candidates = interfaces::qualifying_interfaces()?;

        if candidates.is_empty() {
            tracing::warn!(
                "No multicast capable interface found, only unicast traffic will be received"
            );
            return Ok(());
        }

        let outcome = interfaces::for_each(&candidates, "join multicast group", |iface| {
            tracing::debug!("Joining multicast group {} on {}", group, iface);
            socket.join_multicast_v4(&group, &iface.addr)
        });

        if outcome.succeeded() == 0 {
            return Err(DiscoveryError::NoMulticastMembership {
                group,
                attempted: outcome.attempted,
            });
        }

        Ok(())
    }

    fn new(role: Role, socket: Socket) -> Result<Self, DiscoveryError> {
        socket.set_nonblocking(true)?;

        Ok(Self {
            role,
            socket: socket.into(),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, DiscoveryError> {
        Ok(self.socket.local_addr()?)
    }

    /// Starts the receive loop on a dedicated thread with its own runtime.
    ///
    /// A handler blocking on one worker therefore never stalls the other
    /// worker or the caller's runtime.
    pub fn spawn<H: DatagramHandler>(
        self,
        config: Arc<Config>,
        handler: Arc<H>,
        signals: Arc<Signals>,
    ) -> Result<WorkerHandle, DiscoveryError> {
        let role = self.role;
        let (exited_tx, exited) = oneshot::channel();

        thread::Builder::new()
            .name(format!("{}-worker", role))
            .spawn(move || {
                self.run_thread(config, handler, signals);
                let _ = exited_tx.send(());
            })?;

        Ok(WorkerHandle { role, exited })
    }

    fn run_thread<H: DatagramHandler>(
        self,
        config: Arc<Config>,
        handler: Arc<H>,
        signals: Arc<Signals>,
    ) {
        // Create a single-threaded tokio runtime for this worker
        let runtime = match tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
        {
            Ok(v) => v,
            Err(err) => {
                tracing::error!("Failed to create runtime for {} worker: {}", self.role, err);
                return;
            }
        };

        runtime.block_on(async move {
            // The socket has to be registered with the reactor of this runtime
            let socket = match UdpSocket::from_std(self.socket) {
                Ok(v) => v,
                Err(err) => {
                    tracing::error!("Failed to register {} socket: {}", self.role, err);
                    return;
                }
            };

            Worker {
                role: self.role,
                socket,
                recent: RecentMessages::new(config.dedup_threshold(), config.dedup_max_messages),
                schedule: ProbeSchedule::new(config.discovery_interval()),
                config,
                handler,
                signals,
            }
            .run()
            .await;
        });
    }
}

/// Owns one UDP socket and runs its receive loop.
struct Worker<H> {
    role: Role,
    socket: UdpSocket,
    config: Arc<Config>,
    handler: Arc<H>,
    signals: Arc<Signals>,
    recent: RecentMessages,
    schedule: ProbeSchedule,
}

impl<H: DatagramHandler> Worker<H> {
    async fn run(mut self) {
        let local_addr = self
            .socket
            .local_addr()
            .map(|v| v.to_string())
            .unwrap_or_else(|_| "<unknown>".into());
        tracing::info!("Starting {} worker on {}...", self.role, local_addr);

        let mut buffer = vec![0u8; self.config.receive_buffer_size];
        let receive_timeout = self.config.receive_timeout();

        while !self.signals.shutdown.load(Ordering::Acquire) {
            if self.role == Role::Discovery
                && self
                    .schedule
                    .is_due(&self.signals.probe_requested, Instant::now())
            {
                self.probe().await;
            }

            let received = tokio::select! {
                _ = self.signals.shutdown_notify.notified() => break,
                _ = self.signals.probe_notify.notified(), if self.role == Role::Discovery => continue,
                res = tokio::time::timeout(receive_timeout, self.socket.recv_from(&mut buffer)) => res,
            };

            let (len, from) = match received {
                // Timed out, just loop
                Err(_) => continue,
                Ok(Ok(v)) => v,
                Ok(Err(err)) => {
                    tracing::warn!("Receive failed on {} worker: {}", self.role, err);
                    continue;
                }
            };

            let message = String::from_utf8_lossy(&buffer[..len]);
            let message = message.trim();

            if self.recent.is_duplicate(message, Instant::now()) {
                tracing::trace!("Skipping duplicate message from {}", from);
                continue;
            }

            tracing::trace!("Received from {} on {} worker:\n{}", from, self.role, message);
            self.handler.receive(message, from);
        }

        tracing::info!("Exiting {} worker...", self.role);
    }

    /// Sends the handler's probe on every qualifying interface.
    async fn probe(&self) {
        let payload = self.handler.probe_message();
        let target = SocketAddr::V4(SocketAddrV4::new(self.config.address, self.config.port));

        tracing::debug!(
            "Sending probe to {}: {}",
            target,
            String::from_utf8_lossy(&payload).replace("\r\n", " | ")
        );
        self.handler.probing();

        if !self.config.address.is_multicast() {
            // Unicast target, the routing table picks the interface
            if let Err(err) = self.socket.send_to(&payload, target).await {
                tracing::warn!("Failed to send probe to {}: {}", target, err);
            }
            return;
        }

        let candidates = match interfaces::qualifying_interfaces() {
            Ok(v) => v,
            Err(err) => {
                tracing::warn!("Failed to enumerate interfaces, skipping probe: {}", err);
                return;
            }
        };

        let outcome = send_on_each(&self.socket, &candidates, &payload, target).await;
        tracing::debug!(
            "Probe sent on {} of {} interfaces",
            outcome.succeeded(),
            outcome.attempted
        );
    }
}

async fn send_on_each(
    socket: &UdpSocket,
    candidates: &[Interface],
    payload: &[u8],
    target: SocketAddr,
) -> interfaces::Outcome {
    let sock_ref = SockRef::from(socket);
    let mut outcome = interfaces::Outcome::default();

    for iface in candidates {
        tracing::trace!("Sending probe on {}", iface);

        let result = match sock_ref.set_multicast_if_v4(&iface.addr) {
            Ok(()) => socket.send_to(payload, target).await.map(|_| ()),
            Err(err) => Err(err),
        };
        outcome.record(iface, "send probe", result);
    }

    outcome
}

/// Exit notification of a spawned worker thread.
#[derive(Debug)]
pub(crate) struct WorkerHandle {
    role: Role,
    exited: oneshot::Receiver<()>,
}

impl WorkerHandle {
    /// Waits up to `budget` for the worker to exit, abandoning it otherwise.
    ///
    /// An abandoned thread keeps its socket until it returns from the handler
    /// and observes the stop signal.
    pub async fn wait_for_stop(self, budget: Duration) -> bool {
        match tokio::time::timeout(budget, self.exited).await {
            Ok(Ok(())) => {
                tracing::debug!("{} worker stopped", self.role);
                true
            }
            Ok(Err(_)) => {
                tracing::warn!("{} worker terminated abnormally", self.role);
                true
            }
            Err(_) => {
                tracing::warn!(
                    "{} worker did not stop within {:?}, abandoning it",
                    self.role,
                    budget
                );
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_check_is_due() {
        let requested = AtomicBool::new(false);
        let mut schedule = ProbeSchedule::new(None);

        assert!(schedule.is_due(&requested, Instant::now()));
    }

    #[test]
    fn disabled_interval_only_probes_on_request() {
        let requested = AtomicBool::new(false);
        let mut schedule = ProbeSchedule::new(None);
        let start = Instant::now();

        assert!(schedule.is_due(&requested, start));
        assert!(!schedule.is_due(&requested, start + Duration::from_secs(3600)));

        requested.store(true, Ordering::Release);
        assert!(schedule.is_due(&requested, start + Duration::from_secs(3601)));
        assert!(!requested.load(Ordering::Acquire));
    }

    #[test]
    fn request_is_observed_exactly_once() {
        let requested = AtomicBool::new(false);
        let mut schedule = ProbeSchedule::new(Some(Duration::from_secs(60)));
        let start = Instant::now();

        assert!(schedule.is_due(&requested, start));

        requested.store(true, Ordering::Release);
        assert!(schedule.is_due(&requested, start + Duration::from_secs(1)));
        assert!(!schedule.is_due(&requested, start + Duration::from_secs(2)));
    }

    #[test]
    fn interval_elapsing_makes_probe_due() {
        let requested = AtomicBool::new(false);
        let mut schedule = ProbeSchedule::new(Some(Duration::from_secs(60)));
        let start = Instant::now();

        assert!(schedule.is_due(&requested, start));
        assert!(!schedule.is_due(&requested, start + Duration::from_secs(59)));
        assert!(schedule.is_due(&requested, start + Duration::from_secs(60)));
        // The interval restarts from the last probe
        assert!(!schedule.is_due(&requested, start + Duration::from_secs(90)));
        assert!(schedule.is_due(&requested, start + Duration::from_secs(120)));
    }

    #[test]
    fn forced_probe_restarts_interval() {
        let requested = AtomicBool::new(false);
        let mut schedule = ProbeSchedule::new(Some(Duration::from_secs(60)));
        let start = Instant::now();

        assert!(schedule.is_due(&requested, start));

        requested.store(true, Ordering::Release);
        assert!(schedule.is_due(&requested, start + Duration::from_secs(50)));
        assert!(!schedule.is_due(&requested, start + Duration::from_secs(70)));
        assert!(schedule.is_due(&requested, start + Duration::from_secs(110)));
    }

    #[tokio::test]
    async fn sends_once_per_interface() {
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let receiver = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let target = receiver.local_addr().unwrap();

        // Every entry is the loopback address so each send succeeds
        let candidates = (0..3)
            .map(|i| Interface {
                name: format!("lo{}", i),
                addr: Ipv4Addr::LOCALHOST,
            })
            .collect::<Vec<_>>();

        let outcome = send_on_each(&socket, &candidates, b"probe", target).await;
        assert_eq!(outcome.attempted, 3);

        let mut received = 0;
        let mut buffer = [0u8; 16];
        while let Ok(Ok((len, _))) =
            tokio::time::timeout(Duration::from_millis(500), receiver.recv_from(&mut buffer)).await
        {
            assert_eq!(&buffer[..len], b"probe");
            received += 1;
        }

        assert_eq!(received, outcome.succeeded());
    }
}
