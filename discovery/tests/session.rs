mod common;

use common::{unicast_config, FakeDevice, WAIT};
use std::net::SocketAddr;
use std::time::{Duration, Instant};
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use udp_discovery::{Config, DatagramHandler, DiscoveryError, Transport};

struct Recorder {
    probe: &'static str,
    received: UnboundedSender<(String, SocketAddr)>,
}

impl DatagramHandler for Recorder {
    fn probe_message(&self) -> Vec<u8> {
        self.probe.as_bytes().to_vec()
    }

    fn receive(&self, message: &str, from: SocketAddr) {
        let _ = self.received.send((message.to_string(), from));
    }
}

fn recorder(probe: &'static str) -> (Recorder, UnboundedReceiver<(String, SocketAddr)>) {
    let (sender, receiver) = unbounded_channel();
    let recorder = Recorder {
        probe,
        received: sender,
    };

    (recorder, receiver)
}

async fn next(received: &mut UnboundedReceiver<(String, SocketAddr)>) -> (String, SocketAddr) {
    tokio::time::timeout(WAIT, received.recv())
        .await
        .expect("no datagram delivered in time")
        .unwrap()
}

#[tokio::test]
async fn probe_reaches_target_and_reply_is_delivered() {
    let device = FakeDevice::bind().await;
    let (handler, mut received) = recorder("hello?");

    let session = Transport::new(unicast_config(device.addr()))
        .start(handler)
        .await
        .unwrap();

    let (probe, from) = device.recv().await;
    assert_eq!(probe, "hello?");
    assert_eq!(from.port(), session.discovery_addr().port());

    device.send("  hello!\r\n", from).await;

    // Delivered trimmed, attributed to the device
    let (message, source) = next(&mut received).await;
    assert_eq!(message, "hello!");
    assert_eq!(source, device.addr());

    session.stop().await;
}

#[tokio::test]
async fn probe_now_probes_within_receive_timeout() {
    let device = FakeDevice::bind().await;
    let (handler, _received) = recorder("probe");

    let mut config = unicast_config(device.addr());
    config.discovery_interval_secs = 0;
    let bound = Duration::from_millis(config.receive_timeout_ms) + Duration::from_millis(250);

    let session = Transport::new(config).start(handler).await.unwrap();

    // Initial probe
    device.recv().await;

    let requested = Instant::now();
    session.probe_now();
    let (probe, _) = device.recv().await;

    assert_eq!(probe, "probe");
    assert!(
        requested.elapsed() < bound,
        "forced probe took {:?}",
        requested.elapsed()
    );

    session.stop().await;
}

#[tokio::test]
async fn repeated_datagrams_are_delivered_once() {
    let device = FakeDevice::bind().await;
    let (handler, mut received) = recorder("probe");

    let session = Transport::new(unicast_config(device.addr()))
        .start(handler)
        .await
        .unwrap();

    let (_, from) = device.recv().await;
    device.send("announce", from).await;
    device.send("announce", from).await;
    device.send("different", from).await;

    assert_eq!(next(&mut received).await.0, "announce");
    // Within one worker delivery follows receive order, so the repeat was skipped
    assert_eq!(next(&mut received).await.0, "different");

    session.stop().await;
}

#[tokio::test]
async fn stop_returns_within_budget() {
    let device = FakeDevice::bind().await;
    let (handler, _received) = recorder("probe");

    let session = Transport::new(unicast_config(device.addr()))
        .start(handler)
        .await
        .unwrap();

    device.recv().await;

    tokio::time::timeout(Duration::from_secs(3), session.stop())
        .await
        .expect("stop exceeded its budget");
}

/// Blocks in the handler whenever it receives `block`.
struct Stalling {
    entered: UnboundedSender<()>,
    received: UnboundedSender<(String, Instant)>,
}

impl DatagramHandler for Stalling {
    fn probe_message(&self) -> Vec<u8> {
        b"probe".to_vec()
    }

    fn receive(&self, message: &str, _from: SocketAddr) {
        if message == "block" {
            let _ = self.entered.send(());
            std::thread::sleep(Duration::from_secs(3));
        } else {
            let _ = self.received.send((message.to_string(), Instant::now()));
        }
    }
}

fn stalling() -> (
    Stalling,
    UnboundedReceiver<()>,
    UnboundedReceiver<(String, Instant)>,
) {
    let (entered_tx, entered) = unbounded_channel();
    let (received_tx, received) = unbounded_channel();
    let handler = Stalling {
        entered: entered_tx,
        received: received_tx,
    };

    (handler, entered, received)
}

#[tokio::test]
async fn stop_abandons_unresponsive_worker() {
    let device = FakeDevice::bind().await;
    let (handler, mut entered, _received) = stalling();

    let mut config = unicast_config(device.addr());
    config.stop_wait_ms = 300;
    let budget = config.stop_wait();

    let session = Transport::new(config).start(handler).await.unwrap();

    let (_, from) = device.recv().await;
    device.send("block", from).await;
    tokio::time::timeout(WAIT, entered.recv())
        .await
        .expect("handler was not entered")
        .unwrap();

    let started = Instant::now();
    session.stop().await;

    assert!(
        started.elapsed() < budget * 2,
        "stop took {:?} with a budget of {:?}",
        started.elapsed(),
        budget
    );
}

#[tokio::test]
async fn blocked_handler_does_not_stall_other_worker() {
    let device = FakeDevice::bind().await;
    let (handler, mut entered, mut received) = stalling();

    let mut config = Config::for_group(udp_discovery::config::DEFAULT_MULTICAST_IPV4, 44_811);
    config.receive_timeout_ms = 100;
    config.stop_wait_ms = 300;
    config.discovery_interval_secs = 0;

    let session = Transport::new(config).start(handler).await.unwrap();
    let discovery = common::loopback(session.discovery_addr().port());

    // Occupy the notification worker
    device.send("block", common::loopback(44_811)).await;
    tokio::time::timeout(WAIT, entered.recv())
        .await
        .expect("handler was not entered")
        .unwrap();

    let sent = Instant::now();
    device.send("ping", discovery).await;

    loop {
        let (message, at) = tokio::time::timeout(WAIT, received.recv())
            .await
            .expect("no datagram delivered in time")
            .unwrap();

        // Our own looped back probe may arrive on the notification socket
        if message == "ping" {
            let latency = at.duration_since(sent);
            assert!(
                latency < Duration::from_millis(1000),
                "delivery took {:?} while the other worker was blocked",
                latency
            );
            break;
        }
    }

    session.stop().await;
}

#[tokio::test]
async fn invalid_config_does_not_start() {
    let (handler, _received) = recorder("probe");

    let err = Transport::new(Config::default())
        .start(handler)
        .await
        .unwrap_err();

    assert!(matches!(err, DiscoveryError::InvalidConfig(_)));
}

#[tokio::test]
async fn notification_socket_receives_unicast() {
    let device = FakeDevice::bind().await;
    let (handler, mut received) = recorder("probe");

    let mut config = Config::for_group(udp_discovery::config::DEFAULT_MULTICAST_IPV4, 41_917);
    config.receive_timeout_ms = 100;
    config.discovery_interval_secs = 0;

    let session = Transport::new(config).start(handler).await.unwrap();

    device.send("unsolicited", common::loopback(41_917)).await;

    loop {
        // Our own looped back probe may arrive first
        let (message, source) = next(&mut received).await;
        if message == "unsolicited" {
            assert_eq!(source, device.addr());
            break;
        }
    }

    session.stop().await;
}
