//! Advertisement framing for the radio emulation
//!
//! Each datagram carries exactly one frame. A receiver configured for a
//! different access address behaves like a radio that never locked onto
//! the packet: the frame is consumed and nothing is yielded.

use bytes::{BufMut, BytesMut};
use rbc_mesh_core::wire::{decode_pdu, encode_pdu, AdvPdu, MAX_PDU_LEN};
use thiserror::Error;
use tokio_util::codec::{Decoder, Encoder};

/// Access address prefix length.
const ACCESS_ADDR_LEN: usize = 4;

/// Maximum frame size on the air.
pub const MAX_FRAME_LEN: usize = ACCESS_ADDR_LEN + MAX_PDU_LEN;

/// Framing errors
#[derive(Debug, Error)]
pub enum FrameError {
    #[error("Frame truncated: {0} bytes")]
    Truncated(usize),
    #[error("Frame too large: {0} bytes (max {MAX_FRAME_LEN})")]
    TooLarge(usize),
    #[error("PDU error: {0}")]
    Pdu(#[from] rbc_mesh_core::Error),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Codec for access-address prefixed advertisement frames
///
/// Wire format:
/// - 4 bytes: access address (little-endian, as the radio sends it)
/// - N bytes: postcard-encoded [`AdvPdu`]
#[derive(Clone, Copy, Debug)]
pub struct AdvCodec {
    access_addr: u32,
}

impl AdvCodec {
    /// Create a codec for one access address
    pub fn new(access_addr: u32) -> Self {
        Self { access_addr }
    }

    pub fn access_addr(&self) -> u32 {
        self.access_addr
    }
}

impl Decoder for AdvCodec {
    type Item = AdvPdu;
    type Error = FrameError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.is_empty() {
            return Ok(None);
        }

        // One datagram is one frame: take all of it up front so a bad frame
        // can never be decoded twice.
        let frame = src.split();

        if frame.len() < ACCESS_ADDR_LEN {
            return Err(FrameError::Truncated(frame.len()));
        }
        if frame.len() > MAX_FRAME_LEN {
            return Err(FrameError::TooLarge(frame.len()));
        }

        let access_addr = u32::from_le_bytes([frame[0], frame[1], frame[2], frame[3]]);
        if access_addr != self.access_addr {
            return Ok(None);
        }

        Ok(Some(decode_pdu(&frame[ACCESS_ADDR_LEN..])?))
    }
}

impl Encoder<AdvPdu> for AdvCodec {
    type Error = FrameError;

    fn encode(&mut self, item: AdvPdu, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let mut buf = [0u8; MAX_PDU_LEN];
        let pdu = encode_pdu(&item, &mut buf)?;

        dst.reserve(ACCESS_ADDR_LEN + pdu.len());
        dst.put_u32_le(self.access_addr);
        dst.put_slice(pdu);

        Ok(())
    }
}
