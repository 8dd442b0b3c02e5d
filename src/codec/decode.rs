//! DXF0 decoder: reference state and per-block residual application.
//!
//! The decoder owns the last fully decoded image as BGR plus its I420
//! decomposition. I-frames replace the whole reference; P-frames add luma
//! residuals on top of the reference Y plane, chroma stays frozen until
//! the next I-frame.
//!
//! Loss tolerance rules: a truncated or inconsistent block header makes
//! the remaining payload untrusted and stops the scan; a block that fails
//! to inflate, has the wrong raw length, or falls outside the frame is
//! skipped on its own and the region inherits the reference. No error
//! escapes: the result is an image or `None`.

use std::io::Read;

use flate2::read::ZlibDecoder;

use super::dxf0::{BlockHeader, FrameHeader, BLK_HDR_SIZE, FRAME_I, FRAME_P};
use super::yuv::{bgr_to_i420, i420_to_bgr, Plane};
use super::{jpeg, BgrFrame};

/// Stateful DXF0 decoder. One instance per stream.
#[derive(Default)]
pub struct DiffDecoder {
    ref_bgr: Option<BgrFrame>,
    ref_y: Option<Plane>,
    ref_u: Option<Plane>,
    ref_v: Option<Plane>,
    /// `(height, width)` from the last accepted envelope.
    last_shape: Option<(u16, u16)>,
}

impl DiffDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Discard all reference state; only an I-frame can restart decoding.
    pub fn reset(&mut self) {
        self.ref_bgr = None;
        self.ref_y = None;
        self.ref_u = None;
        self.ref_v = None;
        self.last_shape = None;
    }

    /// The last fully decoded image, if any.
    pub fn last_frame(&self) -> Option<&BgrFrame> {
        self.ref_bgr.as_ref()
    }

    /// Decode a DXF0 byte string. `None` means the frame is dropped.
    pub fn decode(&mut self, bytes: &[u8]) -> Option<BgrFrame> {
        let (header, payload) = FrameHeader::parse(bytes)?;

        match header.frame_type {
            FRAME_I => self.decode_i(&header, payload),
            FRAME_P => self.decode_p(&header, payload),
            _ => None,
        }
    }

    fn decode_i(&mut self, header: &FrameHeader, payload: &[u8]) -> Option<BgrFrame> {
        let bgr = jpeg::decode_jpeg(payload).ok()?;
        let (y, u, v) = bgr_to_i420(&bgr);
        // Return the plane-rebuilt image rather than the raw JPEG decode,
        // so an all-skip P-frame reproduces this frame bit for bit.
        let rebuilt = i420_to_bgr(&y, &u, &v);
        self.ref_y = Some(y);
        self.ref_u = Some(u);
        self.ref_v = Some(v);
        self.last_shape = Some((header.height, header.width));
        self.ref_bgr = Some(rebuilt.clone());
        Some(rebuilt)
    }

    fn decode_p(&mut self, header: &FrameHeader, payload: &[u8]) -> Option<BgrFrame> {
        if self.ref_y.is_none() || self.ref_u.is_none() || self.ref_v.is_none() {
            return None;
        }
        if self.last_shape != Some((header.height, header.width)) {
            // Sender changed resolution mid-stream; wait for the next I.
            self.reset();
            return None;
        }

        let (ref_y, ref_u, ref_v) = match (&self.ref_y, &self.ref_u, &self.ref_v) {
            (Some(y), Some(u), Some(v)) => (y, u, v),
            _ => return None,
        };

        let side = header.block as usize;
        let expected = side * side * 2;
        let w = ref_y.w;
        let h = ref_y.h;
        let mut new_y = ref_y.data.clone();
        let mut off = 0usize;

        for _ in 0..header.nblocks {
            if side == 0 || off + BLK_HDR_SIZE > payload.len() {
                break;
            }
            let block = match BlockHeader::decode(&payload[off..]) {
                Some(b) => b,
                None => break,
            };
            off += BLK_HDR_SIZE;

            let datalen = block.datalen as usize;
            if off + datalen > payload.len() {
                // datalen points past the end; the rest is untrusted.
                break;
            }
            let compressed = &payload[off..off + datalen];
            off += datalen;

            let raw = match inflate(compressed, expected) {
                Ok(raw) => raw,
                Err(_) => continue,
            };
            if raw.len() != expected {
                continue;
            }

            let x0 = block.bx as usize;
            let y0 = block.by as usize;
            if x0 + side > w || y0 + side > h {
                continue;
            }

            for row in 0..side {
                for col in 0..side {
                    let at = 2 * (row * side + col);
                    let residual = i16::from_le_bytes([raw[at], raw[at + 1]]);
                    let idx = (y0 + row) * w + x0 + col;
                    let value = ref_y.data[idx] as i16 + residual;
                    new_y[idx] = value.clamp(0, 255) as u8;
                }
            }
        }

        let y_plane = Plane::new(w, h, new_y);
        let bgr = i420_to_bgr(&y_plane, ref_u, ref_v);
        self.ref_bgr = Some(bgr.clone());
        self.ref_y = Some(y_plane);
        Some(bgr)
    }
}

/// Inflate with an output bound; corrupt streams error out, oversized
/// streams are detected by the caller's length check.
fn inflate(data: &[u8], expected: usize) -> std::io::Result<Vec<u8>> {
    let mut out = Vec::with_capacity(expected);
    ZlibDecoder::new(data)
        .take(expected as u64 + 1)
        .read_to_end(&mut out)?;
    Ok(out)
}
