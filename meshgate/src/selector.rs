//! Transport selection and validation.
//!
//! Turns a [`TransportConfig`] into a concrete [`TransportDescriptor`]. In
//! serial mode with no port configured, the first device that looks like a
//! radio is picked: either its name matches a known USB-serial naming scheme
//! or its USB VID:PID belongs to a chip used on common radio boards.
//! Enumeration only reads the device list; nothing is opened here.

use regex::Regex;

use crate::config::{ConnectionType, TransportConfig};
use crate::error::ConfigError;
use crate::tracing::prelude::*;
use crate::transport::TransportDescriptor;

/// Longest hostname allowed by DNS.
pub const MAX_HOSTNAME_LEN: usize = 253;

const DEVICE_NAME_PATTERN: &str = concat!(
    r"^(/dev/tty(USB|ACM)\d+",
    r"|/dev/cu\.(usbserial|usbmodem|SLAB_USBtoUART|wchusbserial)\S*",
    r"|COM\d+)$",
);

/// USB bridge chips found on radio boards.
pub const KNOWN_USB_IDS: &[(u16, u16, &str)] = &[
    (0x303a, 0x1001, "ESP32-S3"),
    (0x10c4, 0xea60, "CP210x"),
    (0x1a86, 0x7523, "CH340"),
    (0x0403, 0x6001, "FTDI"),
    (0x239a, 0x8029, "RAK4631"),
];

/// One enumerated serial device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortCandidate {
    pub path: String,
    pub usb_id: Option<(u16, u16)>,
    pub product: Option<String>,
}

impl PortCandidate {
    pub fn named(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            usb_id: None,
            product: None,
        }
    }
}

/// Source of serial device listings.
pub trait PortScanner: Send + Sync {
    fn scan(&self) -> Vec<PortCandidate>;
}

/// Lists the serial devices present on this machine.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemPorts;

impl PortScanner for SystemPorts {
    fn scan(&self) -> Vec<PortCandidate> {
        match tokio_serial::available_ports() {
            Ok(ports) => ports
                .into_iter()
                .map(|info| match info.port_type {
                    tokio_serial::SerialPortType::UsbPort(usb) => PortCandidate {
                        path: info.port_name,
                        usb_id: Some((usb.vid, usb.pid)),
                        product: usb.product,
                    },
                    _ => PortCandidate::named(info.port_name),
                })
                .collect(),
            Err(e) => {
                warn!(error = %e, "Failed to enumerate serial ports.");
                Vec::new()
            }
        }
    }
}

/// A validated transport plus the link speed to report upstream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedTransport {
    pub descriptor: TransportDescriptor,
    pub bitrate: u32,
}

pub struct TransportSelector<S = SystemPorts> {
    scanner: S,
    device_pattern: Regex,
}

impl TransportSelector<SystemPorts> {
    pub fn new() -> Self {
        Self::with_scanner(SystemPorts)
    }
}

impl Default for TransportSelector<SystemPorts> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S: PortScanner> TransportSelector<S> {
    pub fn with_scanner(scanner: S) -> Self {
        Self {
            scanner,
            device_pattern: Regex::new(DEVICE_NAME_PATTERN).expect("device pattern is valid"),
        }
    }

    /// Validate `config` and decide which link to open.
    pub fn resolve(&self, config: &TransportConfig) -> Result<ResolvedTransport, ConfigError> {
        let mode: ConnectionType = config
            .connection_type
            .trim()
            .to_ascii_lowercase()
            .parse()
            .map_err(|_| ConfigError::InvalidMode(config.connection_type.clone()))?;
        let bitrate = validate_bitrate(config.bitrate)?;

        let descriptor = match mode {
            ConnectionType::Serial => {
                let path = match config.port.as_deref().map(str::trim) {
                    Some(port) if !port.is_empty() => port.to_string(),
                    _ => self.detect().ok_or(ConfigError::NoPortDetected)?,
                };
                TransportDescriptor::Serial {
                    path,
                    baud_rate: config.baud_rate,
                }
            }
            ConnectionType::Tcp => {
                validate_hostname(&config.host)?;
                TransportDescriptor::Tcp {
                    host: config.host.clone(),
                    port: validate_port(config.tcp_port)?,
                }
            }
        };

        info!(transport = %descriptor, bitrate, "Transport selected.");
        Ok(ResolvedTransport {
            descriptor,
            bitrate,
        })
    }

    /// Whether `candidate` looks like a radio.
    pub fn is_radio_candidate(&self, candidate: &PortCandidate) -> bool {
        self.device_pattern.is_match(&candidate.path)
            || candidate.usb_id.is_some_and(|(vid, pid)| {
                KNOWN_USB_IDS.iter().any(|&(v, p, _)| v == vid && p == pid)
            })
    }

    /// All enumerated ports with their auto-detect verdict.
    pub fn survey(&self) -> Vec<(PortCandidate, bool)> {
        self.scanner
            .scan()
            .into_iter()
            .map(|c| {
                let ok = self.is_radio_candidate(&c);
                (c, ok)
            })
            .collect()
    }

    /// First enumerated port that looks like a radio.
    pub fn detect(&self) -> Option<String> {
        let found = self
            .scanner
            .scan()
            .into_iter()
            .find(|c| self.is_radio_candidate(c))
            .map(|c| c.path);
        match &found {
            Some(path) => info!(port = %path, "Auto-detected serial port."),
            None => warn!("No serial radio detected."),
        }
        found
    }
}

/// Strict hostname / IP literal check.
pub fn validate_hostname(host: &str) -> Result<(), ConfigError> {
    let invalid = |reason| ConfigError::InvalidHost {
        host: host.to_string(),
        reason,
    };
    if host.is_empty() {
        return Err(invalid("empty"));
    }
    if host.starts_with('-') {
        return Err(invalid("leading '-' (flag injection)"));
    }
    if host.len() > MAX_HOSTNAME_LEN {
        return Err(invalid("longer than 253 characters"));
    }
    if !host
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | ':'))
    {
        return Err(invalid("disallowed characters"));
    }
    Ok(())
}

pub fn validate_port(port: i64) -> Result<u16, ConfigError> {
    match u16::try_from(port) {
        Ok(p) if p >= 1 => Ok(p),
        _ => Err(ConfigError::InvalidPort(port)),
    }
}

pub fn validate_bitrate(bitrate: i64) -> Result<u32, ConfigError> {
    match u32::try_from(bitrate) {
        Ok(b) if b > 0 => Ok(b),
        _ => Err(ConfigError::InvalidBitrate(bitrate)),
    }
}
