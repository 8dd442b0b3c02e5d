//! Fragment header encoding/decoding for UDP datagrams.
//!
//! Every datagram on the wire carries an 8-byte header followed by up to
//! 1040 bytes of payload:
//! ```text
//!  0                   1                   2                   3
//!  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                           frame id                            |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |           chunk id            |          total chunks         |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! ```
//! All fields are network byte order. In the low FEC scheme the high bit
//! of `chunk_id` marks a parity fragment and the low 15 bits carry the
//! group index; in the other schemes `chunk_id` is a plain 0-based index
//! into the ordered data+parity sequence.

use anyhow::{bail, Result};

/// Fragment header size in bytes.
pub const HEADER_SIZE: usize = 8;

/// Maximum datagram size (header + payload).
pub const MAX_PAYLOAD: usize = 1048;

/// Payload bytes available per fragment.
pub const DATA_SIZE: usize = MAX_PAYLOAD - HEADER_SIZE;

/// High bit of `chunk_id` marking a parity fragment (low scheme only).
pub const PARITY_FLAG: u16 = 0x8000;

/// Parsed fragment header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FragmentHeader {
    pub frame_id: u32,
    pub chunk_id: u16,
    pub total_chunks: u16,
}

impl FragmentHeader {
    pub fn new(frame_id: u32, chunk_id: u16, total_chunks: u16) -> Self {
        Self {
            frame_id,
            chunk_id,
            total_chunks,
        }
    }

    /// Encode into the 8-byte wire representation.
    pub fn encode(&self) -> [u8; HEADER_SIZE] {
        let mut buf = [0u8; HEADER_SIZE];
        buf[0..4].copy_from_slice(&self.frame_id.to_be_bytes());
        buf[4..6].copy_from_slice(&self.chunk_id.to_be_bytes());
        buf[6..8].copy_from_slice(&self.total_chunks.to_be_bytes());
        buf
    }

    /// Decode a header from the front of a datagram.
    pub fn decode(data: &[u8]) -> Result<Self> {
        if data.len() < HEADER_SIZE {
            bail!("fragment too short: {} bytes", data.len());
        }
        Ok(Self {
            frame_id: u32::from_be_bytes([data[0], data[1], data[2], data[3]]),
            chunk_id: u16::from_be_bytes([data[4], data[5]]),
            total_chunks: u16::from_be_bytes([data[6], data[7]]),
        })
    }

    /// Split a datagram into header and payload.
    pub fn parse(packet: &[u8]) -> Result<(Self, &[u8])> {
        let header = Self::decode(packet)?;
        Ok((header, &packet[HEADER_SIZE..]))
    }

    /// Prepend this header to a payload, producing a complete datagram.
    pub fn with_payload(&self, payload: &[u8]) -> Vec<u8> {
        let mut packet = Vec::with_capacity(HEADER_SIZE + payload.len());
        packet.extend_from_slice(&self.encode());
        packet.extend_from_slice(payload);
        packet
    }
}
