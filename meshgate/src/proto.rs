//! Subset of the Meshtastic phone API protobufs.
//!
//! Only the fields the gateway reads or writes are declared; prost skips
//! anything else on decode. `MeshPacket.decoded` is a oneof member upstream,
//! which is wire-identical to an optional message field.

use bytes::Bytes;

/// Destination address meaning "every node on the mesh".
pub const BROADCAST_ADDR: u32 = 0xFFFF_FFFF;

/// Application port reserved for private use; carries overlay traffic.
pub const PORTNUM_PRIVATE_APP: i32 = 256;

/// Hop limit for outbound packets (firmware default).
pub const DEFAULT_HOP_LIMIT: u32 = 3;

/// Payload size above which the radio may fragment or drop a packet.
pub const MAX_MESH_PAYLOAD: usize = 228;

/// Largest payload whose broadcast `ToRadio` still fits one 512-byte stream
/// frame (24 bytes of protobuf overhead).
pub const MAX_BROADCAST_PAYLOAD: usize = 488;

#[derive(Clone, PartialEq, prost::Message)]
pub struct Data {
    #[prost(int32, tag = "1")]
    pub portnum: i32,
    #[prost(bytes = "bytes", tag = "2")]
    pub payload: Bytes,
    #[prost(bool, tag = "3")]
    pub want_response: bool,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct MeshPacket {
    #[prost(fixed32, tag = "1")]
    pub from: u32,
    #[prost(fixed32, tag = "2")]
    pub to: u32,
    #[prost(uint32, tag = "3")]
    pub channel: u32,
    #[prost(message, optional, tag = "4")]
    pub decoded: Option<Data>,
    #[prost(fixed32, tag = "6")]
    pub id: u32,
    #[prost(float, tag = "8")]
    pub rx_snr: f32,
    #[prost(uint32, tag = "9")]
    pub hop_limit: u32,
    #[prost(bool, tag = "10")]
    pub want_ack: bool,
    #[prost(int32, tag = "12")]
    pub rx_rssi: i32,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct Heartbeat {}

/// Host to radio.
#[derive(Clone, PartialEq, prost::Message)]
pub struct ToRadio {
    #[prost(message, optional, tag = "1")]
    pub packet: Option<MeshPacket>,
    #[prost(uint32, optional, tag = "3")]
    pub want_config_id: Option<u32>,
    #[prost(message, optional, tag = "7")]
    pub heartbeat: Option<Heartbeat>,
}

/// Radio to host.
#[derive(Clone, PartialEq, prost::Message)]
pub struct FromRadio {
    #[prost(uint32, tag = "1")]
    pub id: u32,
    #[prost(message, optional, tag = "2")]
    pub packet: Option<MeshPacket>,
    #[prost(uint32, optional, tag = "7")]
    pub config_complete_id: Option<u32>,
    #[prost(bool, optional, tag = "8")]
    pub rebooted: Option<bool>,
}

impl ToRadio {
    /// Broadcast `payload` to the whole mesh on the private-app port.
    pub fn broadcast(payload: Bytes, packet_id: u32) -> Self {
        Self {
            packet: Some(MeshPacket {
                to: BROADCAST_ADDR,
                decoded: Some(Data {
                    portnum: PORTNUM_PRIVATE_APP,
                    payload,
                    want_response: false,
                }),
                id: packet_id,
                hop_limit: DEFAULT_HOP_LIMIT,
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    /// Ask the radio to start streaming; the nonce echoes back when done.
    pub fn want_config(nonce: u32) -> Self {
        Self {
            want_config_id: Some(nonce),
            ..Default::default()
        }
    }

    pub fn heartbeat() -> Self {
        Self {
            heartbeat: Some(Heartbeat {}),
            ..Default::default()
        }
    }
}

impl FromRadio {
    /// Overlay payload carried by this message, if any.
    pub fn private_payload(&self) -> Option<&Bytes> {
        let data = self.packet.as_ref()?.decoded.as_ref()?;
        (data.portnum == PORTNUM_PRIVATE_APP).then_some(&data.payload)
    }
}
