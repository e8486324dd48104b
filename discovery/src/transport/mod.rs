//! Protocol agnostic multicast transport.
//!
//! A session runs two workers, each owning one UDP socket:
//!
//! - the *discovery* worker sends probes from an ephemeral port and receives
//!   the unicast replies,
//! - the *notification* worker listens on the well-known port as a member of
//!   the multicast group and receives unsolicited announcements.
//!
//! Each worker runs on its own thread. Every received datagram is handed to the
//! [`DatagramHandler`] on the thread of the worker that received it, so a slow
//! handler only delays further receives on that worker.

mod dedup;
mod worker;

use crate::config::Config;
use crate::error::DiscoveryError;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;
use worker::{BoundSocket, WorkerHandle};

/// Raw callback interface of the transport.
pub trait DatagramHandler: Send + Sync + 'static {
    /// Returns the payload of the next probe, called once per probe cycle.
    fn probe_message(&self) -> Vec<u8>;

    /// Called for every received datagram.
    fn receive(&self, message: &str, from: SocketAddr);

    /// Called when a probe cycle starts.
    fn probing(&self) {}
}

/// State shared between a session and its workers.
#[derive(Debug)]
pub(crate) struct Signals {
    pub probe_requested: AtomicBool,
    pub probe_notify: Notify,
    pub shutdown: AtomicBool,
    pub shutdown_notify: Notify,
}

impl Signals {
    fn new() -> Self {
        Self {
            // The first loop iteration always probes
            probe_requested: AtomicBool::new(true),
            probe_notify: Notify::new(),
            shutdown: AtomicBool::new(false),
            shutdown_notify: Notify::new(),
        }
    }

    fn signal_stop(&self) {
        self.shutdown.store(true, Ordering::Release);
        self.shutdown_notify.notify_waiters();
    }
}

/// A transport that has not been started yet.
#[derive(Debug, Clone)]
pub struct Transport {
    config: Config,
}

impl Transport {
    pub fn new(config: Config) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Binds the sockets and starts the workers.
    ///
    /// Each worker runs on its own thread. Fails if the configuration is
    /// invalid or a socket cannot be bound or joined to the group, in which
    /// case no worker is left running.
    pub async fn start<H: DatagramHandler>(self, handler: H) -> Result<Session, DiscoveryError> {
        self.config.validate()?;

        let notification = match self.config.unicast_responses_only {
            true => None,
            false => Some(BoundSocket::notification(&self.config)?),
        };
        let discovery = BoundSocket::discovery(&self.config)?;
        let discovery_addr = discovery.local_addr()?;

        let config = Arc::new(self.config);
        let handler = Arc::new(handler);
        let signals = Arc::new(Signals::new());

        tracing::info!("Starting worker threads...");

        let mut workers = Vec::with_capacity(2);
        for socket in std::iter::once(discovery).chain(notification) {
            match socket.spawn(config.clone(), handler.clone(), signals.clone()) {
                Ok(v) => workers.push(v),
                Err(err) => {
                    signals.signal_stop();
                    return Err(err);
                }
            }
        }

        Ok(Session {
            signals,
            workers,
            stop_wait: config.stop_wait(),
            discovery_addr,
        })
    }
}

/// A running discovery session.
///
/// Dropping the session signals the workers to stop without waiting for them,
/// use [`Session::stop`] for an orderly shutdown.
#[derive(Debug)]
pub struct Session {
    signals: Arc<Signals>,
    workers: Vec<WorkerHandle>,
    stop_wait: std::time::Duration,
    discovery_addr: SocketAddr,
}

impl Session {
    /// Requests a probe on the next iteration of the discovery worker.
    pub fn probe_now(&self) {
        self.signals.probe_requested.store(true, Ordering::Release);
        self.signals.probe_notify.notify_waiters();
    }

    /// Local address of the socket probes are sent from.
    pub fn discovery_addr(&self) -> SocketAddr {
        self.discovery_addr
    }

    /// Signals both workers and waits up to the stop budget for each.
    ///
    /// Always returns; a worker that does not exit in time is abandoned.
    pub async fn stop(mut self) {
        tracing::info!("Signaling stop for worker threads...");
        self.signals.signal_stop();

        let budget = self.stop_wait;
        let workers = std::mem::take(&mut self.workers);
        let stopped = futures::future::join_all(workers.into_iter().map(|w| w.wait_for_stop(budget)))
            .await
            .into_iter()
            .filter(|v| *v)
            .count();

        tracing::info!("{} worker threads stopped", stopped);
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.signals.signal_stop();
    }
}
