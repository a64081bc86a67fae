//! In-memory radio doubles for tests.

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use parking_lot::Mutex;
use prost::Message;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::error::ConnectError;
use crate::proto::{Data, FromRadio, MeshPacket, ToRadio, PORTNUM_PRIVATE_APP};
use crate::transport::codec::{START1, START2};
use crate::transport::{Connector, RawLink};

/// Connector handing out duplex pipes. The radio end of every successful
/// connect is delivered on the receiver returned by [`MockConnector::new`].
pub struct MockConnector {
    plan: Mutex<VecDeque<ConnectError>>,
    radios: mpsc::UnboundedSender<DuplexStream>,
    attempts: AtomicUsize,
}

impl MockConnector {
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<DuplexStream>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let connector = Arc::new(Self {
            plan: Mutex::new(VecDeque::new()),
            radios: tx,
            attempts: AtomicUsize::new(0),
        });
        (connector, rx)
    }

    /// Make the next unplanned attempt fail with `err`.
    pub fn fail_next(&self, err: ConnectError) {
        self.plan.lock().push_back(err);
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Connector for MockConnector {
    fn label(&self) -> String {
        "mock".into()
    }

    async fn connect(&self) -> Result<RawLink, ConnectError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if let Some(err) = self.plan.lock().pop_front() {
            return Err(err);
        }
        let (local, radio) = tokio::io::duplex(64 * 1024);
        // Receiver gone means the test no longer cares about the radio end.
        let _ = self.radios.send(radio);
        Ok(RawLink::new(local))
    }
}

/// The radio side of a duplex link.
pub struct MockRadio {
    stream: DuplexStream,
    buf: BytesMut,
}

impl MockRadio {
    pub fn new(stream: DuplexStream) -> Self {
        Self {
            stream,
            buf: BytesMut::new(),
        }
    }

    /// Next framed message from the host, or None on EOF.
    pub async fn next_to_radio(&mut self) -> Option<ToRadio> {
        loop {
            if let Some(start) = self
                .buf
                .windows(2)
                .position(|w| w[0] == START1 && w[1] == START2)
            {
                if self.buf.len() >= start + 4 {
                    let len = u16::from_be_bytes([self.buf[start + 2], self.buf[start + 3]]) as usize;
                    if self.buf.len() >= start + 4 + len {
                        let body = self.buf.split_to(start + 4 + len).split_off(start + 4);
                        return ToRadio::decode(body.freeze()).ok();
                    }
                }
            }
            let mut chunk = [0u8; 1024];
            let n = self.stream.read(&mut chunk).await.ok()?;
            if n == 0 {
                return None;
            }
            self.buf.extend_from_slice(&chunk[..n]);
        }
    }

    /// Next data packet from the host, skipping handshake and heartbeats.
    pub async fn next_packet(&mut self) -> Option<MeshPacket> {
        loop {
            if let Some(packet) = self.next_to_radio().await?.packet {
                return Some(packet);
            }
        }
    }

    /// Deliver `payload` to the host as a private-app mesh packet.
    pub async fn send_payload(&mut self, payload: &[u8]) {
        let msg = FromRadio {
            packet: Some(MeshPacket {
                from: 0x1234_5678,
                decoded: Some(Data {
                    portnum: PORTNUM_PRIVATE_APP,
                    payload: Bytes::copy_from_slice(payload),
                    want_response: false,
                }),
                ..Default::default()
            }),
            ..Default::default()
        };
        let body = msg.encode_to_vec();
        let mut out = vec![START1, START2];
        out.extend_from_slice(&(body.len() as u16).to_be_bytes());
        out.extend_from_slice(&body);
        self.stream.write_all(&out).await.unwrap();
        self.stream.flush().await.unwrap();
    }

    /// Keep reading and discarding host output so writes never block.
    pub fn drain(mut self) -> JoinHandle<()> {
        tokio::spawn(async move { while self.next_to_radio().await.is_some() {} })
    }
}
