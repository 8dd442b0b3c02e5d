//! DXF0 frame envelope and block segment headers.
//!
//! Every encoded frame starts with a fixed 16-byte envelope, network byte
//! order:
//! ```text
//! offset  size  field
//!      0     4  magic      ASCII "DXF0"
//!      4     1  version    must be 1
//!      5     1  frame_type 0 = I, 1 = P
//!      6     2  reserved   0
//!      8     2  width      pixels
//!     10     2  height     pixels
//!     12     1  block      block side in pixels
//!     13     1  threshold  residual zero threshold
//!     14     2  nblocks    0 for I, block count for P
//! ```
//! I-frames carry a JPEG bytestream after the envelope. P-frames carry
//! `nblocks` block segments, each an 8-byte header
//! `(bx:u16, by:u16, dx:i8, dy:i8, datalen:u16)` followed by `datalen`
//! zlib-compressed bytes. `dx`/`dy` are reserved for motion offsets: the
//! encoder writes 0 and the decoder ignores them.

/// Envelope magic.
pub const MAGIC: [u8; 4] = *b"DXF0";

/// Envelope format version.
pub const VERSION: u8 = 1;

/// Envelope size in bytes.
pub const HDR_SIZE: usize = 16;

/// Block segment header size in bytes.
pub const BLK_HDR_SIZE: usize = 8;

/// Frame type discriminants.
pub const FRAME_I: u8 = 0;
pub const FRAME_P: u8 = 1;

/// Parsed DXF0 envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub frame_type: u8,
    pub width: u16,
    pub height: u16,
    pub block: u8,
    pub threshold: u8,
    pub nblocks: u16,
}

impl FrameHeader {
    /// Encode into the 16-byte wire representation.
    pub fn encode(&self) -> [u8; HDR_SIZE] {
        let mut buf = [0u8; HDR_SIZE];
        buf[0..4].copy_from_slice(&MAGIC);
        buf[4] = VERSION;
        buf[5] = self.frame_type;
        // bytes 6..8 reserved, 0
        buf[8..10].copy_from_slice(&self.width.to_be_bytes());
        buf[10..12].copy_from_slice(&self.height.to_be_bytes());
        buf[12] = self.block;
        buf[13] = self.threshold;
        buf[14..16].copy_from_slice(&self.nblocks.to_be_bytes());
        buf
    }

    /// Parse the envelope off the front of an encoded frame.
    ///
    /// Returns the header and the remaining payload, or `None` for short
    /// input, bad magic, or an unknown version (the whole frame is then
    /// untrusted and must be dropped).
    pub fn parse(bytes: &[u8]) -> Option<(Self, &[u8])> {
        if bytes.len() < HDR_SIZE {
            return None;
        }
        if bytes[0..4] != MAGIC || bytes[4] != VERSION {
            return None;
        }
        let header = Self {
            frame_type: bytes[5],
            width: u16::from_be_bytes([bytes[8], bytes[9]]),
            height: u16::from_be_bytes([bytes[10], bytes[11]]),
            block: bytes[12],
            threshold: bytes[13],
            nblocks: u16::from_be_bytes([bytes[14], bytes[15]]),
        };
        Some((header, &bytes[HDR_SIZE..]))
    }
}

/// True when `bytes` starts with a DXF0 I-frame envelope.
pub fn is_i_frame(bytes: &[u8]) -> bool {
    matches!(FrameHeader::parse(bytes), Some((h, _)) if h.frame_type == FRAME_I)
}

/// Parsed block segment header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockHeader {
    /// Left pixel column of the block.
    pub bx: u16,
    /// Top pixel row of the block.
    pub by: u16,
    /// Reserved motion offsets, always 0 on encode.
    pub dx: i8,
    pub dy: i8,
    /// Length of the compressed residual that follows.
    pub datalen: u16,
}

impl BlockHeader {
    pub fn encode(&self) -> [u8; BLK_HDR_SIZE] {
        let mut buf = [0u8; BLK_HDR_SIZE];
        buf[0..2].copy_from_slice(&self.bx.to_be_bytes());
        buf[2..4].copy_from_slice(&self.by.to_be_bytes());
        buf[4] = self.dx as u8;
        buf[5] = self.dy as u8;
        buf[6..8].copy_from_slice(&self.datalen.to_be_bytes());
        buf
    }

    pub fn decode(bytes: &[u8]) -> Option<Self> {
        if bytes.len() < BLK_HDR_SIZE {
            return None;
        }
        Some(Self {
            bx: u16::from_be_bytes([bytes[0], bytes[1]]),
            by: u16::from_be_bytes([bytes[2], bytes[3]]),
            dx: bytes[4] as i8,
            dy: bytes[5] as i8,
            datalen: u16::from_be_bytes([bytes[6], bytes[7]]),
        })
    }
}
