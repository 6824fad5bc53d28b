use bytes::{BufMut, Bytes, BytesMut};

use crate::error::{FrameError, Result};

/// QMUX header: if-type (1) + length (2) + ctrl-flags (1) + service (1) + client (1).
pub const HEADER_SIZE: usize = 6;

/// The if-type byte every QMUX frame starts with.
pub const IF_TYPE: u8 = 0x01;

/// Client id sentinel addressing every client of a service.
pub const BROADCAST_CLIENT: u8 = 0xff;

/// Largest payload the 16-bit length field can declare.
///
/// The length field covers everything after the if-type byte, including
/// itself, so the payload ceiling is `u16::MAX` minus the five header bytes
/// it counts.
pub const MAX_PAYLOAD: usize = u16::MAX as usize - (HEADER_SIZE - 1);

/// A decoded QMUX frame.
#[derive(Debug, Clone)]
pub struct Frame {
    /// QMUX ctrl-flags byte. 0x00 for host-to-service traffic, 0x80 for
    /// service-to-host traffic.
    pub ctrl_flags: u8,
    /// Service id. 0 addresses the control service.
    pub service: u8,
    /// Client id within the service.
    pub client: u8,
    /// Everything after the QMUX header.
    pub payload: Bytes,
}

impl Frame {
    /// Create a host-originated frame (ctrl-flags 0).
    pub fn new(service: u8, client: u8, payload: impl Into<Bytes>) -> Self {
        Self {
            ctrl_flags: 0,
            service,
            client,
            payload: payload.into(),
        }
    }

    /// The total wire size of this frame (header + payload).
    pub fn wire_size(&self) -> usize {
        HEADER_SIZE + self.payload.len()
    }

    /// True for control-service frames.
    pub fn is_control(&self) -> bool {
        self.service == 0
    }
}

/// Encode a frame into the wire format.
///
/// Wire format:
/// ```text
/// ┌──────────┬───────────┬────────────┬─────────┬────────┬──────────┐
/// │ If-type  │ Length    │ Ctrl-flags │ Service │ Client │ Payload  │
/// │ 0x01     │ (2B LE)   │ (1B)       │ (1B)    │ (1B)   │          │
/// └──────────┴───────────┴────────────┴─────────┴────────┴──────────┘
/// ```
///
/// The length field counts everything after the if-type byte, including the
/// length field itself: `payload.len() + 5`.
pub fn encode_frame(service: u8, client: u8, payload: &[u8], dst: &mut BytesMut) -> Result<()> {
    if payload.len() > MAX_PAYLOAD {
        return Err(FrameError::PayloadTooLarge {
            size: payload.len(),
            max: MAX_PAYLOAD,
        });
    }
    dst.reserve(HEADER_SIZE + payload.len());
    dst.put_u8(IF_TYPE);
    dst.put_u16_le((payload.len() + HEADER_SIZE - 1) as u16);
    dst.put_u8(0); // ctrl-flags: host to service
    dst.put_u8(service);
    dst.put_u8(client);
    dst.put_slice(payload);
    Ok(())
}

/// Decode one complete frame from a buffer.
///
/// The channel preserves message boundaries (one read yields one frame), so
/// this is a whole-buffer decode: a declared length that disagrees with the
/// buffer size is malformed, not a partial read.
pub fn decode_frame(src: &[u8]) -> Result<Frame> {
    if src.len() < HEADER_SIZE {
        return Err(FrameError::Truncated {
            len: src.len(),
            need: HEADER_SIZE,
        });
    }
    if src[0] != IF_TYPE {
        return Err(FrameError::InvalidIfType(src[0]));
    }

    let declared = u16::from_le_bytes([src[1], src[2]]) as usize;
    let actual = src.len() - 1;
    if declared != actual {
        return Err(FrameError::LengthMismatch { declared, actual });
    }

    Ok(Frame {
        ctrl_flags: src[3],
        service: src[4],
        client: src[5],
        payload: Bytes::copy_from_slice(&src[HEADER_SIZE..]),
    })
}
