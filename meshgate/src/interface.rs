//! The host framework's view of this interface.
//!
//! An overlay host treats every transport as a generic interface object and
//! polls a fixed set of status fields on it at any time after registration,
//! including before the radio is connected. [`InterfaceStatus`] holds those
//! fields, all initialized by its constructor. The relay writes to it; the
//! host only reads.

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use strum::Display;
use tokio::time::Instant;

use crate::error::{ContractViolation, RelayError};

/// Entries kept in each announce frequency log.
pub const FREQUENCY_LOG_CAPACITY: usize = 100;

/// Interface operating mode as understood by the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, Serialize)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum InterfaceMode {
    Full,
    PointToPoint,
    AccessPoint,
    Roaming,
    Boundary,
    Gateway,
}

/// The host framework's ingress entry point for inbound traffic.
pub trait Ingress: Send + Sync + 'static {
    fn inbound(&self, payload: &[u8]);
}

/// Capabilities the host framework requires from any interface.
#[async_trait]
pub trait HostInterface: Send + Sync {
    fn name(&self) -> &str;

    /// Whether the host should rate-limit ingress announces on this interface.
    fn ingress_control(&self) -> bool;

    /// Announces held back by the host's rate limiting.
    fn held_announces(&self) -> &Mutex<VecDeque<Bytes>>;

    fn inbound_frequency(&self) -> &FrequencyLog;

    fn outbound_frequency(&self) -> &FrequencyLog;

    fn mode(&self) -> InterfaceMode;

    fn online(&self) -> bool;

    fn bitrate(&self) -> u32;

    /// Transmit `payload` from the host to the radio side.
    async fn process_outgoing(&self, payload: Bytes) -> Result<(), RelayError>;

    /// Release the link and stop all background work.
    async fn detach(&self);
}

/// Bounded FIFO of event timestamps; the oldest entry is evicted when full.
#[derive(Debug)]
pub struct FrequencyLog {
    capacity: usize,
    entries: RwLock<VecDeque<Instant>>,
}

impl FrequencyLog {
    pub fn new(capacity: usize) -> Result<Self, ContractViolation> {
        if capacity == 0 {
            return Err(ContractViolation(
                "frequency log capacity must be non-zero".into(),
            ));
        }
        Ok(Self {
            capacity,
            entries: RwLock::new(VecDeque::with_capacity(capacity)),
        })
    }

    pub fn record(&self, at: Instant) {
        let mut entries = self.entries.write();
        if entries.len() == self.capacity {
            entries.pop_front();
        }
        entries.push_back(at);
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Consistent copy of the log, oldest first.
    pub fn snapshot(&self) -> Vec<Instant> {
        self.entries.read().iter().copied().collect()
    }
}

/// Traffic counters for dashboards and status displays.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct InterfaceMetrics {
    pub online: bool,
    pub rx_packets: u64,
    pub tx_packets: u64,
    pub rx_bytes: u64,
    pub tx_bytes: u64,
    pub tx_errors: u64,
    pub rx_dropped: u64,
    pub reconnects: u64,
}

/// Status fields and counters shared between the relay and the host.
#[derive(Debug)]
pub struct InterfaceStatus {
    name: String,
    bitrate: u32,
    mode: InterfaceMode,
    held_announces: Mutex<VecDeque<Bytes>>,
    inbound: FrequencyLog,
    outbound: FrequencyLog,
    online: AtomicBool,
    rx_packets: AtomicU64,
    tx_packets: AtomicU64,
    rx_bytes: AtomicU64,
    tx_bytes: AtomicU64,
    tx_errors: AtomicU64,
    rx_dropped: AtomicU64,
    reconnects: AtomicU64,
}

impl InterfaceStatus {
    pub fn new(name: impl Into<String>, bitrate: u32) -> Result<Self, ContractViolation> {
        Self::with_capacity(name, bitrate, FREQUENCY_LOG_CAPACITY)
    }

    pub fn with_capacity(
        name: impl Into<String>,
        bitrate: u32,
        log_capacity: usize,
    ) -> Result<Self, ContractViolation> {
        let name = name.into();
        if name.is_empty() {
            return Err(ContractViolation("interface name must be non-empty".into()));
        }
        Ok(Self {
            name,
            bitrate,
            mode: InterfaceMode::AccessPoint,
            held_announces: Mutex::new(VecDeque::new()),
            inbound: FrequencyLog::new(log_capacity)?,
            outbound: FrequencyLog::new(log_capacity)?,
            online: AtomicBool::new(false),
            rx_packets: AtomicU64::new(0),
            tx_packets: AtomicU64::new(0),
            rx_bytes: AtomicU64::new(0),
            tx_bytes: AtomicU64::new(0),
            tx_errors: AtomicU64::new(0),
            rx_dropped: AtomicU64::new(0),
            reconnects: AtomicU64::new(0),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn bitrate(&self) -> u32 {
        self.bitrate
    }

    pub fn mode(&self) -> InterfaceMode {
        self.mode
    }

    /// This link does no ingress shaping of its own.
    pub fn ingress_control(&self) -> bool {
        false
    }

    pub fn held_announces(&self) -> &Mutex<VecDeque<Bytes>> {
        &self.held_announces
    }

    pub fn inbound_frequency(&self) -> &FrequencyLog {
        &self.inbound
    }

    pub fn outbound_frequency(&self) -> &FrequencyLog {
        &self.outbound
    }

    pub fn online(&self) -> bool {
        self.online.load(Ordering::Acquire)
    }

    pub(crate) fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::Release);
    }

    pub(crate) fn record_inbound(&self, len: usize, at: Instant) {
        self.inbound.record(at);
        self.rx_packets.fetch_add(1, Ordering::Relaxed);
        self.rx_bytes.fetch_add(len as u64, Ordering::Relaxed);
    }

    pub(crate) fn record_inbound_dropped(&self) {
        self.rx_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_outbound(&self, len: usize, at: Instant) {
        self.outbound.record(at);
        self.tx_packets.fetch_add(1, Ordering::Relaxed);
        self.tx_bytes.fetch_add(len as u64, Ordering::Relaxed);
    }

    pub(crate) fn record_tx_error(&self) {
        self.tx_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_reconnect(&self) {
        self.reconnects.fetch_add(1, Ordering::Relaxed);
    }

    pub fn metrics(&self) -> InterfaceMetrics {
        InterfaceMetrics {
            online: self.online(),
            rx_packets: self.rx_packets.load(Ordering::Relaxed),
            tx_packets: self.tx_packets.load(Ordering::Relaxed),
            rx_bytes: self.rx_bytes.load(Ordering::Relaxed),
            tx_bytes: self.tx_bytes.load(Ordering::Relaxed),
            tx_errors: self.tx_errors.load(Ordering::Relaxed),
            rx_dropped: self.rx_dropped.load(Ordering::Relaxed),
            reconnects: self.reconnects.load(Ordering::Relaxed),
        }
    }
}
