//! Control-service (QMI_CTL) message layer.
//!
//! Control payloads carry a fixed sub-header (flags, transaction id, message
//! id, TLV-block length) followed by a TLV block. This module decodes the
//! sub-header, builds the three control-plane requests the engine sends, and
//! parses their replies.

use bytes::{BufMut, Bytes, BytesMut};

use crate::codec::encode_frame;
use crate::error::{FrameError, Result};
use crate::tlv::TlvReader;

/// Service id of the control service.
pub const QMI_CTL: u8 = 0;

/// QMUX ctrl-flags value marking service-to-host traffic.
pub const QMUX_FLAG_RESPONSE: u8 = 0x80;

/// Control sub-header flags: request.
pub const CTL_FLAG_REQUEST: u8 = 0x00;
/// Control sub-header flags: response.
pub const CTL_FLAG_RESPONSE: u8 = 0x01;
/// Control sub-header flags: unsolicited indication.
pub const CTL_FLAG_INDICATION: u8 = 0x02;

/// Control message id: query supported service versions.
pub const MSG_GET_VERSION: u16 = 0x0021;
/// Control message id: allocate a client id.
pub const MSG_ALLOC_CID: u16 = 0x0022;
/// Control message id: release a client id.
pub const MSG_RELEASE_CID: u16 = 0x0023;

/// TLV type carrying the request argument or reply result.
pub const TLV_RESULT: u8 = 0x01;
/// TLV type carrying the mandatory status code of a reply.
pub const TLV_STATUS: u8 = 0x02;

/// Control sub-header: flags (1) + transaction (1) + message (2) + TLV length (2).
pub const CTL_HEADER_SIZE: usize = 6;

/// Transaction id stamped on outbound requests.
///
/// The control plane correlates replies by message id, not transaction id,
/// so requests all carry the same tid the original wire traces show.
const REQUEST_TID: u8 = 0x01;

/// Decoded control sub-header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControlHeader {
    pub flags: u8,
    pub transaction: u8,
    pub message: u16,
    pub tlv_len: u16,
}

impl ControlHeader {
    /// Decode the sub-header from a control-service payload, returning it
    /// together with the TLV block it declares.
    pub fn decode(payload: &[u8]) -> Result<(Self, &[u8])> {
        if payload.len() < CTL_HEADER_SIZE {
            return Err(FrameError::Truncated {
                len: payload.len(),
                need: CTL_HEADER_SIZE,
            });
        }
        let header = Self {
            flags: payload[0],
            transaction: payload[1],
            message: u16::from_le_bytes([payload[2], payload[3]]),
            tlv_len: u16::from_le_bytes([payload[4], payload[5]]),
        };
        let block = &payload[CTL_HEADER_SIZE..];
        if block.len() != header.tlv_len as usize {
            return Err(FrameError::LengthMismatch {
                declared: header.tlv_len as usize,
                actual: block.len(),
            });
        }
        Ok((header, block))
    }

    /// True when the flags mark a response.
    pub fn is_response(&self) -> bool {
        self.flags == CTL_FLAG_RESPONSE
    }
}

/// Mandatory status TLV of a control reply: result code plus error code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControlStatus {
    pub result: u16,
    pub error: u16,
}

impl ControlStatus {
    pub fn is_success(&self) -> bool {
        self.result == 0
    }
}

/// One entry of a get-version reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServiceVersion {
    pub service: u8,
    pub major: u16,
    pub minor: u16,
}

fn control_request(message: u16, tlvs: &[u8]) -> Bytes {
    let mut payload = BytesMut::with_capacity(CTL_HEADER_SIZE + tlvs.len());
    payload.put_u8(CTL_FLAG_REQUEST);
    payload.put_u8(REQUEST_TID);
    payload.put_u16_le(message);
    payload.put_u16_le(tlvs.len() as u16);
    payload.put_slice(tlvs);

    let mut frame = BytesMut::new();
    // Control TLV blocks are tiny; the length check cannot fail here.
    encode_frame(QMI_CTL, 0, &payload, &mut frame)
        .unwrap_or_else(|_| unreachable!("control request exceeds frame size"));
    frame.freeze()
}

/// Build a get-version request addressing all subsystems.
pub fn get_version_request() -> Bytes {
    control_request(MSG_GET_VERSION, &[TLV_RESULT, 0x01, 0x00, 0xff])
}

/// Build an allocate-CID request for a service.
pub fn alloc_cid_request(service: u8) -> Bytes {
    control_request(MSG_ALLOC_CID, &[TLV_RESULT, 0x01, 0x00, service])
}

/// Build a release-CID request for a (service, client) pair.
pub fn release_cid_request(service: u8, client: u8) -> Bytes {
    control_request(MSG_RELEASE_CID, &[TLV_RESULT, 0x02, 0x00, service, client])
}

/// Extract the mandatory status TLV from a reply TLV block.
pub fn parse_status(block: &[u8]) -> Result<ControlStatus> {
    let tlv = TlvReader::new(block)
        .find(TLV_STATUS)?
        .ok_or(FrameError::MissingTlv { tlv_type: TLV_STATUS })?;
    if tlv.data.len() < 4 {
        return Err(FrameError::TlvTooShort {
            tlv_type: TLV_STATUS,
            len: tlv.data.len(),
            need: 4,
        });
    }
    Ok(ControlStatus {
        result: u16::from_le_bytes([tlv.data[0], tlv.data[1]]),
        error: u16::from_le_bytes([tlv.data[2], tlv.data[3]]),
    })
}

/// Extract the (service, client) pair from an allocate-CID reply block.
pub fn parse_alloc_reply(block: &[u8]) -> Result<(u8, u8)> {
    let tlv = TlvReader::new(block)
        .find(TLV_RESULT)?
        .ok_or(FrameError::MissingTlv { tlv_type: TLV_RESULT })?;
    if tlv.data.len() < 2 {
        return Err(FrameError::TlvTooShort {
            tlv_type: TLV_RESULT,
            len: tlv.data.len(),
            need: 2,
        });
    }
    Ok((tlv.data[0], tlv.data[1]))
}

/// Extract the supported-service list from a get-version reply block.
///
/// Layout: a count byte, then `count` entries of (service u8, major u16 LE,
/// minor u16 LE).
pub fn parse_version_reply(block: &[u8]) -> Result<Vec<ServiceVersion>> {
    let tlv = TlvReader::new(block)
        .find(TLV_RESULT)?
        .ok_or(FrameError::MissingTlv { tlv_type: TLV_RESULT })?;
    if tlv.data.is_empty() {
        return Err(FrameError::TlvTooShort {
            tlv_type: TLV_RESULT,
            len: 0,
            need: 1,
        });
    }

    let count = tlv.data[0] as usize;
    let entries = &tlv.data[1..];
    if entries.len() < count * 5 {
        return Err(FrameError::TlvTooShort {
            tlv_type: TLV_RESULT,
            len: tlv.data.len(),
            need: 1 + count * 5,
        });
    }

    Ok(entries
        .chunks_exact(5)
        .take(count)
        .map(|e| ServiceVersion {
            service: e[0],
            major: u16::from_le_bytes([e[1], e[2]]),
            minor: u16::from_le_bytes([e[3], e[4]]),
        })
        .collect())
}
