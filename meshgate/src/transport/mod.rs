//! Physical links to the radio.
//!
//! A [`Connector`] opens a raw byte stream (serial device or TCP socket). A
//! [`Transport`] wraps one open stream: it performs the stream handshake, runs
//! a reader task that hands decoded inbound payloads to a callback, and
//! provides framed sends. Dropping back to a [`Connector`] for the next attempt
//! is the only way to get a new link; a closed `Transport` is consumed.

pub mod codec;
pub mod serial;
pub mod tcp;

use async_trait::async_trait;
use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use std::fmt;
use std::io;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::task::JoinHandle;
use tokio::time;
use tokio_util::codec::{FramedRead, FramedWrite};
use tokio_util::sync::CancellationToken;

use crate::config::ConnectionType;
use crate::error::ConnectError;
use crate::frame::Frame;
use crate::proto::{FromRadio, ToRadio};
use crate::tracing::prelude::*;
use codec::{RadioCodec, WAKE_SEQUENCE};

pub use serial::SerialConnector;
pub use tcp::TcpConnector;

type BoxedRead = Box<dyn AsyncRead + Send + Unpin>;
type BoxedWrite = Box<dyn AsyncWrite + Send + Unpin>;

/// Callback invoked from the reader task for every inbound payload.
pub type InboundHandler = Arc<dyn Fn(Frame) + Send + Sync>;

/// Resolved link parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportDescriptor {
    Serial { path: String, baud_rate: u32 },
    Tcp { host: String, port: u16 },
}

impl TransportDescriptor {
    pub fn kind(&self) -> ConnectionType {
        match self {
            Self::Serial { .. } => ConnectionType::Serial,
            Self::Tcp { .. } => ConnectionType::Tcp,
        }
    }

    /// Build the connector that opens this link.
    pub fn connector(&self, connect_timeout: Duration) -> Arc<dyn Connector> {
        match self {
            Self::Serial { path, baud_rate } => {
                Arc::new(SerialConnector::new(path.clone(), *baud_rate))
            }
            Self::Tcp { host, port } => {
                Arc::new(TcpConnector::new(host.clone(), *port, connect_timeout))
            }
        }
    }
}

impl fmt::Display for TransportDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Serial { path, baud_rate } => write!(f, "serial:{path}@{baud_rate}"),
            Self::Tcp { host, port } => write!(f, "tcp:{host}:{port}"),
        }
    }
}

/// An opened but not yet handshaken byte stream.
pub struct RawLink {
    reader: BoxedRead,
    writer: BoxedWrite,
}

impl RawLink {
    pub fn new<S>(stream: S) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (reader, writer) = tokio::io::split(stream);
        Self {
            reader: Box::new(reader),
            writer: Box::new(writer),
        }
    }
}

/// Opens links of one kind. Each call yields an independent link.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Human-readable link name for logs.
    fn label(&self) -> String;

    async fn connect(&self) -> Result<RawLink, ConnectError>;
}

/// One live link to the radio.
pub struct Transport {
    writer: FramedWrite<BoxedWrite, RadioCodec>,
    reader: JoinHandle<()>,
    closed: CancellationToken,
    label: String,
}

impl Transport {
    /// Wake the radio, request the packet stream and start the reader task.
    pub async fn start(
        link: RawLink,
        label: String,
        on_frame: InboundHandler,
        handshake_timeout: Duration,
    ) -> Result<Self, ConnectError> {
        let RawLink { reader, mut writer } = link;
        let nonce: u32 = rand::random();

        let handshake = async move {
            writer.write_all(&WAKE_SEQUENCE).await?;
            writer.flush().await?;
            let mut framed = FramedWrite::new(writer, RadioCodec);
            framed.send(ToRadio::want_config(nonce)).await?;
            Ok::<_, io::Error>(framed)
        };
        let writer = match time::timeout(handshake_timeout, handshake).await {
            Ok(Ok(framed)) => framed,
            Ok(Err(e)) => return Err(ConnectError::Handshake(e.to_string())),
            Err(_) => return Err(ConnectError::Timeout(handshake_timeout)),
        };
        debug!(transport = %label, nonce, "Requested radio packet stream.");

        let closed = CancellationToken::new();
        let reader = tokio::spawn(read_loop(
            FramedRead::new(reader, RadioCodec),
            on_frame,
            closed.clone(),
            label.clone(),
            nonce,
        ));

        Ok(Self {
            writer,
            reader,
            closed,
            label,
        })
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// False once the reader has seen EOF or an I/O error.
    pub fn is_alive(&self) -> bool {
        !self.closed.is_cancelled()
    }

    /// Token cancelled when the link goes down.
    pub fn closed_token(&self) -> CancellationToken {
        self.closed.clone()
    }

    /// Broadcast one payload to the mesh.
    pub async fn send_broadcast(&mut self, payload: Bytes) -> io::Result<()> {
        if !self.is_alive() {
            return Err(io::Error::new(io::ErrorKind::NotConnected, "link closed"));
        }
        let packet_id: u32 = rand::random();
        trace!(
            transport = %self.label,
            packet_id,
            payload = %hex::encode(&payload),
            "Sending broadcast."
        );
        self.writer.send(ToRadio::broadcast(payload, packet_id)).await
    }

    /// Liveness round-trip: the reader is up and a heartbeat write succeeds.
    pub async fn probe(&mut self, timeout: Duration) -> Result<(), String> {
        if !self.is_alive() {
            return Err("reader stopped".to_string());
        }
        match time::timeout(timeout, self.writer.send(ToRadio::heartbeat())).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(format!("heartbeat write failed: {e}")),
            Err(_) => Err("heartbeat write timed out".to_string()),
        }
    }

    /// Stop the reader and release the underlying device or socket.
    pub async fn close(mut self) {
        self.closed.cancel();
        if let Err(e) = time::timeout(Duration::from_secs(1), self.writer.close()).await {
            debug!(transport = %self.label, error = %e, "Timed out closing writer.");
        }
        if let Err(e) = self.reader.await {
            warn!(transport = %self.label, error = %e, "Reader task ended abnormally.");
        }
        debug!(transport = %self.label, "Transport closed.");
    }
}

async fn read_loop(
    mut reader: FramedRead<BoxedRead, RadioCodec>,
    on_frame: InboundHandler,
    closed: CancellationToken,
    label: String,
    nonce: u32,
) {
    trace!(transport = %label, "Reader started.");
    loop {
        let next = tokio::select! {
            _ = closed.cancelled() => break,
            next = reader.next() => next,
        };
        match next {
            Some(Ok(msg)) => dispatch(msg, &on_frame, &label, nonce),
            Some(Err(e)) => {
                warn!(transport = %label, error = %e, "Read error on radio link.");
                break;
            }
            None => {
                warn!(transport = %label, "Radio link closed by peer.");
                break;
            }
        }
    }
    closed.cancel();
    trace!(transport = %label, "Reader stopped.");
}

fn dispatch(msg: FromRadio, on_frame: &InboundHandler, label: &str, nonce: u32) {
    if let Some(payload) = msg.private_payload() {
        if let Some(packet) = &msg.packet {
            debug!(
                transport = %label,
                from = %format!("!{:08x}", packet.from),
                len = payload.len(),
                snr = packet.rx_snr,
                rssi = packet.rx_rssi,
                "Inbound mesh packet."
            );
        }
        on_frame(Frame::inbound(payload.clone()));
    } else if msg.config_complete_id == Some(nonce) {
        info!(transport = %label, "Radio finished sending its configuration.");
    } else if msg.rebooted == Some(true) {
        warn!(transport = %label, "Radio reports it rebooted.");
    } else {
        trace!(transport = %label, id = msg.id, "Ignoring non-data message.");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::Direction;
    use crate::proto::{Data, MeshPacket, BROADCAST_ADDR, PORTNUM_PRIVATE_APP};
    use bytes::BytesMut;
    use parking_lot::Mutex;
    use prost::Message;
    use tokio::io::{AsyncReadExt, DuplexStream};

    fn collecting_handler() -> (InboundHandler, Arc<Mutex<Vec<Frame>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        (Arc::new(move |f| sink.lock().push(f)), seen)
    }

    fn encode_from_radio(msg: &FromRadio) -> Vec<u8> {
        let body = msg.encode_to_vec();
        let mut out = vec![codec::START1, codec::START2];
        out.extend_from_slice(&(body.len() as u16).to_be_bytes());
        out.extend_from_slice(&body);
        out
    }

    async fn read_to_radio(radio: &mut DuplexStream, buf: &mut BytesMut) -> ToRadio {
        loop {
            if let Some(start) = buf.iter().position(|&b| b == codec::START1) {
                if buf.len() >= start + 4 {
                    let len = u16::from_be_bytes([buf[start + 2], buf[start + 3]]) as usize;
                    if buf.len() >= start + 4 + len {
                        let body = buf.split_to(start + 4 + len).split_off(start + 4);
                        return ToRadio::decode(body.freeze()).unwrap();
                    }
                }
            }
            let mut chunk = [0u8; 256];
            let n = radio.read(&mut chunk).await.unwrap();
            assert!(n > 0, "link closed");
            buf.extend_from_slice(&chunk[..n]);
        }
    }

    #[tokio::test]
    async fn test_handshake_then_broadcast() {
        let (local, mut radio) = tokio::io::duplex(4096);
        let (handler, _) = collecting_handler();
        let mut transport = Transport::start(
            RawLink::new(local),
            "test".into(),
            handler,
            Duration::from_secs(1),
        )
        .await
        .unwrap();

        let mut buf = BytesMut::new();
        let hello = read_to_radio(&mut radio, &mut buf).await;
        assert!(hello.want_config_id.is_some());

        transport
            .send_broadcast(Bytes::from_static(b"announce"))
            .await
            .unwrap();
        let sent = read_to_radio(&mut radio, &mut buf).await;
        let packet = sent.packet.unwrap();
        assert_eq!(packet.to, BROADCAST_ADDR);
        assert_eq!(&packet.decoded.unwrap().payload[..], b"announce");

        transport.close().await;
    }

    #[tokio::test]
    async fn test_inbound_frames_reach_handler() {
        let (local, mut radio) = tokio::io::duplex(4096);
        let (handler, seen) = collecting_handler();
        let transport = Transport::start(
            RawLink::new(local),
            "test".into(),
            handler,
            Duration::from_secs(1),
        )
        .await
        .unwrap();

        let msg = FromRadio {
            packet: Some(MeshPacket {
                decoded: Some(Data {
                    portnum: PORTNUM_PRIVATE_APP,
                    payload: Bytes::from_static(b"\x01\x02"),
                    want_response: false,
                }),
                ..Default::default()
            }),
            ..Default::default()
        };
        radio.write_all(&encode_from_radio(&msg)).await.unwrap();
        radio.write_all(b"console noise\r\n").await.unwrap();
        radio.flush().await.unwrap();

        for _ in 0..100 {
            if !seen.lock().is_empty() {
                break;
            }
            tokio::task::yield_now().await;
        }
        let frames = seen.lock();
        assert_eq!(frames.len(), 1);
        assert_eq!(&frames[0].payload[..], b"\x01\x02");
        assert_eq!(frames[0].direction, Direction::Inbound);
        drop(frames);

        transport.close().await;
    }

    #[tokio::test]
    async fn test_peer_close_marks_transport_dead() {
        let (local, radio) = tokio::io::duplex(4096);
        let (handler, _) = collecting_handler();
        let mut transport = Transport::start(
            RawLink::new(local),
            "test".into(),
            handler,
            Duration::from_secs(1),
        )
        .await
        .unwrap();

        let closed = transport.closed_token();
        drop(radio);
        closed.cancelled().await;

        assert!(!transport.is_alive());
        assert!(transport.probe(Duration::from_secs(1)).await.is_err());
        let err = transport
            .send_broadcast(Bytes::from_static(b"late"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotConnected);
        transport.close().await;
    }

    #[test]
    fn test_descriptor_display() {
        let serial = TransportDescriptor::Serial {
            path: "/dev/ttyUSB0".into(),
            baud_rate: 115_200,
        };
        let tcp = TransportDescriptor::Tcp {
            host: "10.0.0.5".into(),
            port: 4403,
        };
        assert_eq!(serial.to_string(), "serial:/dev/ttyUSB0@115200");
        assert_eq!(tcp.to_string(), "tcp:10.0.0.5:4403");
        assert_eq!(tcp.kind(), ConnectionType::Tcp);
    }
}
