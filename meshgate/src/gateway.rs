//! The interface object handed to the host framework.
//!
//! [`MeshInterfaceBuilder::start`] resolves the transport, builds the status
//! holder with every field initialized, and spawns two tasks on a shared
//! tracker: the connection manager and the ingress pump. The returned
//! [`MeshInterface`] is usable immediately, before the radio connects.

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::breaker::CircuitBreaker;
use crate::config::Config;
use crate::error::{ContractViolation, RelayError, Result};
use crate::frame::Frame;
use crate::interface::{
    FrequencyLog, HostInterface, Ingress, InterfaceMetrics, InterfaceMode, InterfaceStatus,
    FREQUENCY_LOG_CAPACITY,
};
use crate::manager::{ConnectionManager, ConnectionState, Link};
use crate::relay::{self, FrameRelay};
use crate::selector::{validate_bitrate, PortScanner, TransportSelector};
use crate::tracing::prelude::*;
use crate::transport::Connector;

/// Name the host sees when none is given.
pub const DEFAULT_INTERFACE_NAME: &str = "Meshtastic Interface";

pub struct MeshInterfaceBuilder {
    config: Config,
    name: String,
    ingress: Option<Arc<dyn Ingress>>,
    connector: Option<Arc<dyn Connector>>,
    log_capacity: usize,
}

impl MeshInterfaceBuilder {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            name: DEFAULT_INTERFACE_NAME.to_string(),
            ingress: None,
            connector: None,
            log_capacity: FREQUENCY_LOG_CAPACITY,
        }
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Where inbound payloads go. Required.
    pub fn ingress(mut self, ingress: Arc<dyn Ingress>) -> Self {
        self.ingress = Some(ingress);
        self
    }

    /// Use `connector` instead of the link described by the config.
    pub fn connector(mut self, connector: Arc<dyn Connector>) -> Self {
        self.connector = Some(connector);
        self
    }

    pub fn log_capacity(mut self, capacity: usize) -> Self {
        self.log_capacity = capacity;
        self
    }

    /// Start the interface using the serial ports present on this machine.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(self) -> Result<MeshInterface> {
        self.start_with(&TransportSelector::new())
    }

    /// Start the interface, resolving the link with `selector`.
    pub fn start_with<S: PortScanner>(
        self,
        selector: &TransportSelector<S>,
    ) -> Result<MeshInterface> {
        let ingress = self
            .ingress
            .ok_or_else(|| ContractViolation("no ingress registered".into()))?;

        let (connector, bitrate) = match self.connector {
            Some(connector) => (connector, validate_bitrate(self.config.gateway.bitrate)?),
            None => {
                let resolved = selector.resolve(&self.config.gateway)?;
                info!(transport = %resolved.descriptor, "Resolved radio link.");
                let connector = resolved
                    .descriptor
                    .connector(self.config.reconnect.connect_timeout());
                (connector, resolved.bitrate)
            }
        };

        let status = Arc::new(InterfaceStatus::with_capacity(
            self.name,
            bitrate,
            self.log_capacity,
        )?);
        let breaker = self
            .config
            .features
            .circuit_breaker
            .then(CircuitBreaker::default);
        let link = Arc::new(Link::new(breaker, self.config.reconnect.send_timeout()));
        let (relay, queue) = FrameRelay::new(
            link.clone(),
            status.clone(),
            self.config.features.ingress_queue_depth,
        );
        let label = connector.label();
        let manager = ConnectionManager::new(
            connector,
            link.clone(),
            status.clone(),
            relay.inbound_handler(),
            &self.config.reconnect,
        );

        let shutdown = CancellationToken::new();
        let tracker = TaskTracker::new();
        tracker.spawn(manager.run(shutdown.clone()));
        tracker.spawn(relay::pump_ingress(queue, ingress, shutdown.clone()));
        tracker.close();
        info!(interface = status.name(), transport = %label, bitrate, "Interface started.");

        Ok(MeshInterface {
            status,
            relay,
            link,
            shutdown,
            tracker,
            grace: self.config.reconnect.shutdown_grace(),
            label,
        })
    }
}

pub struct MeshInterface {
    status: Arc<InterfaceStatus>,
    relay: Arc<FrameRelay>,
    link: Arc<Link>,
    shutdown: CancellationToken,
    tracker: TaskTracker,
    grace: Duration,
    label: String,
}

impl MeshInterface {
    pub fn builder(config: Config) -> MeshInterfaceBuilder {
        MeshInterfaceBuilder::new(config)
    }

    pub fn state(&self) -> ConnectionState {
        self.link.state()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.link.subscribe()
    }

    pub fn metrics(&self) -> InterfaceMetrics {
        self.status.metrics()
    }

    pub fn transport(&self) -> &str {
        &self.label
    }
}

#[async_trait]
impl HostInterface for MeshInterface {
    fn name(&self) -> &str {
        self.status.name()
    }

    fn ingress_control(&self) -> bool {
        self.status.ingress_control()
    }

    fn held_announces(&self) -> &Mutex<VecDeque<Bytes>> {
        self.status.held_announces()
    }

    fn inbound_frequency(&self) -> &FrequencyLog {
        self.status.inbound_frequency()
    }

    fn outbound_frequency(&self) -> &FrequencyLog {
        self.status.outbound_frequency()
    }

    fn mode(&self) -> InterfaceMode {
        self.status.mode()
    }

    fn online(&self) -> bool {
        self.status.online()
    }

    fn bitrate(&self) -> u32 {
        self.status.bitrate()
    }

    async fn process_outgoing(&self, payload: Bytes) -> std::result::Result<(), RelayError> {
        self.relay.send_outbound(Frame::outbound(payload)).await
    }

    async fn detach(&self) {
        if self.shutdown.is_cancelled() && self.tracker.is_empty() {
            return;
        }
        debug!(interface = self.status.name(), "Detaching.");
        self.shutdown.cancel();
        if time::timeout(self.grace, self.tracker.wait()).await.is_err() {
            warn!(
                interface = self.status.name(),
                grace_ms = self.grace.as_millis() as u64,
                "Background tasks did not stop within the grace period."
            );
        }
        info!(interface = self.status.name(), "Detached.");
    }
}

impl Drop for MeshInterface {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::testing::{MockConnector, MockRadio};

    struct Collect(Mutex<Vec<Vec<u8>>>);

    impl Ingress for Collect {
        fn inbound(&self, payload: &[u8]) {
            self.0.lock().push(payload.to_vec());
        }
    }

    fn sink() -> Arc<Collect> {
        Arc::new(Collect(Mutex::new(Vec::new())))
    }

    #[tokio::test]
    async fn test_missing_ingress_is_contract_violation() {
        let (connector, _radios) = MockConnector::new();
        let result = MeshInterface::builder(Config::default())
            .connector(connector)
            .start();
        assert!(matches!(result, Err(Error::Contract(_))));
    }

    #[tokio::test]
    async fn test_zero_log_capacity_is_contract_violation() {
        let (connector, _radios) = MockConnector::new();
        let result = MeshInterface::builder(Config::default())
            .connector(connector)
            .ingress(sink())
            .log_capacity(0)
            .start();
        assert!(matches!(result, Err(Error::Contract(_))));
    }

    #[tokio::test]
    async fn test_invalid_config_is_config_error() {
        let mut config = Config::default();
        config.gateway.connection_type = "bluetooth".into();
        let result = MeshInterface::builder(config).ingress(sink()).start();
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_fields_ready_before_connect() {
        let (connector, _radios) = MockConnector::new();
        for _ in 0..10 {
            connector.fail_next(crate::error::ConnectError::Refused("in use".into()));
        }
        let iface = MeshInterface::builder(Config::default())
            .connector(connector)
            .ingress(sink())
            .name("mesh0")
            .start()
            .unwrap();

        assert_eq!(iface.name(), "mesh0");
        assert!(!iface.online());
        assert!(!iface.ingress_control());
        assert_eq!(iface.mode(), InterfaceMode::AccessPoint);
        assert_eq!(iface.bitrate(), 500);
        assert!(iface.held_announces().lock().is_empty());
        assert_eq!(iface.inbound_frequency().capacity(), 100);

        let err = iface
            .process_outgoing(Bytes::from_static(b"early"))
            .await
            .unwrap_err();
        assert_eq!(err, RelayError::NotConnected);
        iface.detach().await;
        assert_eq!(iface.state(), ConnectionState::Disconnected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_relays_both_directions() {
        let (connector, mut radios) = MockConnector::new();
        let ingress = sink();
        let iface = MeshInterface::builder(Config::default())
            .connector(connector)
            .ingress(ingress.clone())
            .start()
            .unwrap();

        let mut states = iface.subscribe_state();
        states
            .wait_for(|s| *s == ConnectionState::Connected)
            .await
            .unwrap();
        assert!(iface.online());
        let mut radio = MockRadio::new(radios.recv().await.unwrap());

        iface
            .process_outgoing(Bytes::from_static(b"outbound"))
            .await
            .unwrap();
        let packet = radio.next_packet().await.unwrap();
        assert_eq!(packet.to, crate::proto::BROADCAST_ADDR);
        assert_eq!(&packet.decoded.unwrap().payload[..], b"outbound");

        radio.send_payload(b"inbound").await;
        while ingress.0.lock().is_empty() {
            tokio::task::yield_now().await;
        }
        assert_eq!(ingress.0.lock()[0], b"inbound".to_vec());

        let metrics = iface.metrics();
        assert_eq!(metrics.tx_packets, 1);
        assert_eq!(metrics.rx_packets, 1);
        assert_eq!(iface.outbound_frequency().len(), 1);

        iface.detach().await;
        assert!(!iface.online());
        assert_eq!(iface.state(), ConnectionState::Disconnected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_oversize_payload_rejected() {
        let (connector, _radios) = MockConnector::new();
        let iface = MeshInterface::builder(Config::default())
            .connector(connector)
            .ingress(sink())
            .start()
            .unwrap();
        iface
            .subscribe_state()
            .wait_for(|s| *s == ConnectionState::Connected)
            .await
            .unwrap();

        let err = iface
            .process_outgoing(Bytes::from(vec![0u8; 600]))
            .await
            .unwrap_err();
        assert!(matches!(err, RelayError::PayloadTooLarge { len: 600, .. }));
        assert_eq!(iface.metrics().tx_errors, 1);
        iface.detach().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_status_survives_reconnect() {
        let (connector, mut radios) = MockConnector::new();
        let ingress = sink();
        let iface = MeshInterface::builder(Config::default())
            .connector(connector)
            .ingress(ingress.clone())
            .start()
            .unwrap();
        let mut states = iface.subscribe_state();
        states
            .wait_for(|s| *s == ConnectionState::Connected)
            .await
            .unwrap();
        iface
            .held_announces()
            .lock()
            .push_back(Bytes::from_static(b"held"));

        let mut first = MockRadio::new(radios.recv().await.unwrap());
        first.send_payload(b"one").await;
        while ingress.0.lock().is_empty() {
            tokio::task::yield_now().await;
        }

        drop(first);
        states
            .wait_for(|s| *s == ConnectionState::Reconnecting)
            .await
            .unwrap();
        states
            .wait_for(|s| *s == ConnectionState::Connected)
            .await
            .unwrap();

        let mut second = MockRadio::new(radios.recv().await.unwrap());
        second.send_payload(b"two").await;
        while ingress.0.lock().len() < 2 {
            tokio::task::yield_now().await;
        }

        assert_eq!(*ingress.0.lock(), vec![b"one".to_vec(), b"two".to_vec()]);
        assert_eq!(iface.inbound_frequency().len(), 2);
        let metrics = iface.metrics();
        assert_eq!(metrics.rx_packets, 2);
        assert_eq!(metrics.rx_bytes, 6);
        assert_eq!(metrics.reconnects, 1);
        assert_eq!(
            iface.held_announces().lock().front(),
            Some(&Bytes::from_static(b"held"))
        );

        iface
            .process_outgoing(Bytes::from_static(b"after"))
            .await
            .unwrap();
        assert_eq!(iface.outbound_frequency().len(), 1);
        iface.detach().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_detach_during_stalled_health_check() {
        // The radio end stays in the channel unread, so the pipe fills up.
        let (connector, _radios) = MockConnector::new();
        let iface = MeshInterface::builder(Config::default())
            .connector(connector)
            .ingress(sink())
            .start()
            .unwrap();
        iface
            .subscribe_state()
            .wait_for(|s| *s == ConnectionState::Connected)
            .await
            .unwrap();
        let connected_at = time::Instant::now();

        while iface
            .process_outgoing(Bytes::from(vec![0u8; 400]))
            .await
            .is_ok()
        {}

        // Past the first health tick; its heartbeat is blocked on the pipe.
        time::sleep_until(connected_at + Duration::from_secs(31)).await;
        assert_eq!(iface.state(), ConnectionState::Connected);

        let started = time::Instant::now();
        iface.detach().await;
        assert!(started.elapsed() < Config::default().reconnect.shutdown_grace());
        assert_eq!(iface.state(), ConnectionState::Disconnected);
        assert!(!iface.online());
    }
}
