//! Serial (USB CDC / UART) link to a locally attached radio.

use async_trait::async_trait;
use std::io;
use std::time::Duration;
use tokio_serial::SerialPortBuilderExt;

use super::{Connector, RawLink};
use crate::error::ConnectError;
use crate::tracing::prelude::*;

/// Opens the radio's serial device with exclusive access.
#[derive(Debug, Clone)]
pub struct SerialConnector {
    path: String,
    baud_rate: u32,
}

impl SerialConnector {
    pub fn new(path: String, baud_rate: u32) -> Self {
        Self { path, baud_rate }
    }
}

#[async_trait]
impl Connector for SerialConnector {
    fn label(&self) -> String {
        format!("serial:{}", self.path)
    }

    async fn connect(&self) -> Result<RawLink, ConnectError> {
        trace!(port = %self.path, baud = self.baud_rate, "Opening serial port.");

        #[allow(unused_mut)]
        let mut port = tokio_serial::new(&self.path, self.baud_rate)
            .open_native_async()
            .map_err(|e| classify(&e))?;

        // A second process opening the same tty then fails with EBUSY.
        #[cfg(unix)]
        port.set_exclusive(true).map_err(|e| classify(&e))?;

        debug!(port = %self.path, baud = self.baud_rate, "Serial port open.");
        Ok(RawLink::new(port))
    }
}

/// Map a serial-port error onto the connect taxonomy.
fn classify(err: &tokio_serial::Error) -> ConnectError {
    match err.kind {
        tokio_serial::ErrorKind::NoDevice => ConnectError::Unavailable(err.description.clone()),
        tokio_serial::ErrorKind::Io(kind) => ConnectError::from_io(
            &io::Error::new(kind, err.description.clone()),
            Duration::ZERO,
        ),
        _ if err.description.to_ascii_lowercase().contains("busy") => {
            ConnectError::ResourceBusy(err.description.clone())
        }
        _ => ConnectError::Unavailable(err.description.clone()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_busy_description_maps_to_resource_busy() {
        let err = tokio_serial::Error::new(
            tokio_serial::ErrorKind::Unknown,
            "Device or resource busy",
        );
        assert!(matches!(classify(&err), ConnectError::ResourceBusy(_)));
    }

    #[test]
    fn test_missing_device_is_unavailable() {
        let err = tokio_serial::Error::new(tokio_serial::ErrorKind::NoDevice, "gone");
        assert!(matches!(classify(&err), ConnectError::Unavailable(_)));
    }

    #[tokio::test]
    async fn test_open_nonexistent_port_fails() {
        let connector = SerialConnector::new("/dev/meshgate-does-not-exist".into(), 115_200);
        assert!(connector.connect().await.is_err());
    }
}
