//! QMUX wire codec for QMI-style multiplexed channels.
//!
//! Every message on the shared channel is wrapped in a QMUX envelope:
//! - A 1-byte if-type (always 0x01)
//! - A 2-byte little-endian length covering everything after the if-type
//! - A 1-byte ctrl-flags field (0x80 marks the service-to-host direction)
//! - A 1-byte service id (0 is the control service)
//! - A 1-byte client id (0xff is the broadcast sentinel)
//!
//! Control-service payloads carry a further sub-header and a TLV block;
//! this crate decodes those too and builds the three canned control-plane
//! requests (get-version, allocate CID, release CID). No I/O lives here.

pub mod codec;
pub mod control;
pub mod error;
pub mod tlv;

pub use codec::{decode_frame, encode_frame, Frame, BROADCAST_CLIENT, HEADER_SIZE, MAX_PAYLOAD};
pub use control::{
    alloc_cid_request, get_version_request, parse_alloc_reply, parse_status, parse_version_reply,
    release_cid_request, ControlHeader, ControlStatus, ServiceVersion, CTL_FLAG_INDICATION,
    CTL_FLAG_REQUEST, CTL_FLAG_RESPONSE, CTL_HEADER_SIZE, MSG_ALLOC_CID, MSG_GET_VERSION,
    MSG_RELEASE_CID, QMI_CTL, QMUX_FLAG_RESPONSE, TLV_RESULT, TLV_STATUS,
};
pub use error::{FrameError, Result};
pub use tlv::{Tlv, TlvReader};
