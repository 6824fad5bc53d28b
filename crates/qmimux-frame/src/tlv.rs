use crate::error::{FrameError, Result};

/// TLV header: type (1) + length (2 LE).
const TLV_HEADER: usize = 3;

/// A borrowed TLV entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tlv<'a> {
    pub tlv_type: u8,
    pub data: &'a [u8],
}

/// Iterator over the TLV entries of a control-message block.
///
/// The iteration is finite and non-restartable; it must consume exactly the
/// declared block, so an entry whose length overruns the remaining bytes or
/// a trailing fragment too short for a TLV header yields an error.
#[derive(Debug, Clone)]
pub struct TlvReader<'a> {
    rest: &'a [u8],
}

impl<'a> TlvReader<'a> {
    pub fn new(block: &'a [u8]) -> Self {
        Self { rest: block }
    }

    /// Scan for the first TLV of the given type.
    ///
    /// Consumes the reader. Returns `Ok(None)` when the block is well formed
    /// but contains no such entry.
    pub fn find(self, tlv_type: u8) -> Result<Option<Tlv<'a>>> {
        for entry in self {
            let entry = entry?;
            if entry.tlv_type == tlv_type {
                return Ok(Some(entry));
            }
        }
        Ok(None)
    }
}

impl<'a> Iterator for TlvReader<'a> {
    type Item = Result<Tlv<'a>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.rest.is_empty() {
            return None;
        }
        if self.rest.len() < TLV_HEADER {
            let len = self.rest.len();
            self.rest = &[];
            return Some(Err(FrameError::TlvTruncated(len)));
        }

        let tlv_type = self.rest[0];
        let len = u16::from_le_bytes([self.rest[1], self.rest[2]]) as usize;
        let remaining = self.rest.len() - TLV_HEADER;
        if len > remaining {
            self.rest = &[];
            return Some(Err(FrameError::TlvOverrun {
                tlv_type,
                len,
                remaining,
            }));
        }

        let data = &self.rest[TLV_HEADER..TLV_HEADER + len];
        self.rest = &self.rest[TLV_HEADER + len..];
        Some(Ok(Tlv { tlv_type, data }))
    }
}
