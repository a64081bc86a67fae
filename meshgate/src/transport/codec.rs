//! Framing for the radio's stream API.
//!
//! Serial and TCP links carry the same framing:
//!
//! ```text
//! 0x94 0xC3 <len: u16 big-endian> <protobuf payload, len <= 512>
//! ```
//!
//! Anything between frames is the radio's debug console output and gets
//! skipped while searching for the next header.

use bytes::{Buf, BufMut, BytesMut};
use prost::Message;
use std::io;
use tokio_util::codec::{Decoder, Encoder};

use crate::proto::{FromRadio, ToRadio};
use crate::tracing::prelude::*;

pub const START1: u8 = 0x94;
pub const START2: u8 = 0xc3;
pub const HEADER_LEN: usize = 4;
pub const MAX_FRAME_PAYLOAD: usize = 512;

/// Bytes written before the first frame to wake a sleeping radio.
pub const WAKE_SEQUENCE: [u8; 32] = [START2; 32];

#[derive(Debug, Default)]
pub struct RadioCodec;

impl Encoder<ToRadio> for RadioCodec {
    type Error = io::Error;

    fn encode(&mut self, msg: ToRadio, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let len = msg.encoded_len();
        if len > MAX_FRAME_PAYLOAD {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("frame payload {len} exceeds {MAX_FRAME_PAYLOAD} bytes"),
            ));
        }

        dst.reserve(HEADER_LEN + len);
        dst.put_u8(START1);
        dst.put_u8(START2);
        dst.put_u16(len as u16);
        msg.encode(dst)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
        Ok(())
    }
}

impl Decoder for RadioCodec {
    type Item = FromRadio;
    type Error = io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        loop {
            let Some(start) = src.iter().position(|&b| b == START1) else {
                if !src.is_empty() {
                    trace!(bytes = src.len(), "Skipping radio console output.");
                }
                src.clear();
                return Ok(None);
            };
            src.advance(start);

            if src.len() < 2 {
                return Ok(None);
            }
            if src[1] != START2 {
                src.advance(1);
                continue;
            }
            if src.len() < HEADER_LEN {
                return Ok(None);
            }

            let len = u16::from_be_bytes([src[2], src[3]]) as usize;
            if len > MAX_FRAME_PAYLOAD {
                // Not a real header; resync from the next byte.
                src.advance(1);
                continue;
            }
            if src.len() < HEADER_LEN + len {
                src.reserve(HEADER_LEN + len - src.len());
                return Ok(None);
            }

            src.advance(HEADER_LEN);
            let payload = src.split_to(len).freeze();
            match FromRadio::decode(payload.clone()) {
                Ok(msg) => return Ok(Some(msg)),
                Err(e) => {
                    debug!(
                        error = %e,
                        payload = %hex::encode(&payload),
                        "Dropping undecodable frame."
                    );
                }
            }
        }
    }
}
