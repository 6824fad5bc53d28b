/// Errors that can occur while encoding or decoding QMUX frames.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// The buffer is shorter than the structure being decoded.
    #[error("truncated frame ({len} bytes, need at least {need})")]
    Truncated { len: usize, need: usize },

    /// The if-type byte is not 0x01.
    #[error("invalid if-type {0:#04x} (expected 0x01)")]
    InvalidIfType(u8),

    /// A declared length disagrees with the actual number of bytes present.
    #[error("declared length {declared} disagrees with actual {actual}")]
    LengthMismatch { declared: usize, actual: usize },

    /// The payload exceeds what the 16-bit length field can express.
    #[error("payload too large ({size} bytes, max {max})")]
    PayloadTooLarge { size: usize, max: usize },

    /// A TLV entry declares more data than its block has left.
    #[error("TLV {tlv_type:#04x} overruns its block (declares {len}, {remaining} left)")]
    TlvOverrun {
        tlv_type: u8,
        len: usize,
        remaining: usize,
    },

    /// Trailing bytes too short to hold a TLV header.
    #[error("truncated TLV header ({0} trailing bytes)")]
    TlvTruncated(usize),

    /// A TLV required by the message layout is absent.
    #[error("missing TLV {tlv_type:#04x} in control reply")]
    MissingTlv { tlv_type: u8 },

    /// A TLV is present but shorter than its fixed layout requires.
    #[error("TLV {tlv_type:#04x} too short ({len} bytes, need {need})")]
    TlvTooShort {
        tlv_type: u8,
        len: usize,
        need: usize,
    },
}

pub type Result<T> = std::result::Result<T, FrameError>;
