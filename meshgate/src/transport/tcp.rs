//! TCP link to a meshtasticd daemon.
//!
//! The daemon serves one API client at a time; a second client is refused,
//! which surfaces as [`ConnectError::Refused`] and is retried like any other
//! connect failure.

use async_trait::async_trait;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time;

use super::{Connector, RawLink};
use crate::error::ConnectError;
use crate::tracing::prelude::*;

#[derive(Debug, Clone)]
pub struct TcpConnector {
    host: String,
    port: u16,
    connect_timeout: Duration,
}

impl TcpConnector {
    pub fn new(host: String, port: u16, connect_timeout: Duration) -> Self {
        Self {
            host,
            port,
            connect_timeout,
        }
    }
}

#[async_trait]
impl Connector for TcpConnector {
    fn label(&self) -> String {
        format!("tcp:{}:{}", self.host, self.port)
    }

    async fn connect(&self) -> Result<RawLink, ConnectError> {
        trace!(host = %self.host, port = self.port, "Connecting.");
        let stream = match time::timeout(
            self.connect_timeout,
            TcpStream::connect((self.host.as_str(), self.port)),
        )
        .await
        {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => return Err(ConnectError::from_io(&e, self.connect_timeout)),
            Err(_) => return Err(ConnectError::Timeout(self.connect_timeout)),
        };

        if let Err(e) = stream.set_nodelay(true) {
            debug!(error = %e, "Failed to set TCP_NODELAY.");
        }
        debug!(host = %self.host, port = self.port, "TCP connected.");
        Ok(RawLink::new(stream))
    }
}
