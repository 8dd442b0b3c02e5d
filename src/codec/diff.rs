//! DXF0 encoder: I/P decision and residual block extraction.
//!
//! The encoder keeps the luma plane of the last emitted frame as its
//! prediction reference. Each frame is first JPEG-encoded (the I payload
//! and the size baseline for the P gate), then, if a reference exists and
//! no gate forces an I-frame, the luma residual is scanned block by block:
//! blocks whose mean absolute residual stays under the skip threshold are
//! omitted and inherit the reference at the decoder; surviving blocks are
//! serialized as little-endian i16 and deflated.
//!
//! Four promotion gates turn a candidate P-frame into an I-frame: the
//! caller's force flag (first frame / reset interval), a missing or
//! mismatched reference, the scene-change ratio, and the size gate
//! (a P-frame bigger than `jpeg_gate_ratio` of the JPEG is not worth it).

use std::io::Write;

use anyhow::{bail, Context, Result};
use flate2::write::ZlibEncoder;
use flate2::Compression;

use super::dxf0::{BlockHeader, FrameHeader, FRAME_I, FRAME_P, HDR_SIZE};
use super::yuv::{luma_plane, Plane};
use super::{jpeg, BgrFrame};

/// Tuning knobs for the differential encoder.
#[derive(Debug, Clone, Copy)]
pub struct DiffParams {
    /// Square block side in pixels. Edge remainders not covered by a whole
    /// block are never emitted.
    pub block: u8,
    /// Residual samples with |r| below this are zeroed before compression.
    pub threshold: u8,
    /// Blocks whose mean absolute residual is below this are skipped.
    pub sad_skip_per_px: f32,
    /// Kept-block ratio above which the frame is promoted to I.
    pub scene_change_ratio: f32,
    /// P-frame size gate as a fraction of the JPEG size.
    pub jpeg_gate_ratio: f32,
    /// Deflate level (0..=9) for residual blocks.
    pub zlib_level: u32,
}

impl Default for DiffParams {
    fn default() -> Self {
        Self {
            block: 16,
            threshold: 5,
            sad_skip_per_px: 1.5,
            scene_change_ratio: 0.25,
            jpeg_gate_ratio: 0.70,
            zlib_level: 6,
        }
    }
}

/// Stateful DXF0 encoder. One instance per stream; the reference plane is
/// owned here and refreshed on every emitted frame.
pub struct DiffCodec {
    params: DiffParams,
    ref_y: Option<Plane>,
    residual: Vec<i16>,
    raw_block: Vec<u8>,
}

impl DiffCodec {
    pub fn new(params: DiffParams) -> Self {
        let side = params.block as usize;
        Self {
            params,
            ref_y: None,
            residual: vec![0i16; side * side],
            raw_block: vec![0u8; side * side * 2],
        }
    }

    /// Drop the reference; the next frame becomes an I-frame.
    pub fn reset(&mut self) {
        self.ref_y = None;
    }

    /// Encode one frame as a DXF0 byte string.
    ///
    /// `force_i` is set by the caller on the first frame and when the
    /// reset interval has elapsed. The reference is refreshed with the
    /// current luma regardless of the I/P outcome.
    pub fn encode_frame(
        &mut self,
        frame: &BgrFrame,
        force_i: bool,
        jpeg_quality: u8,
    ) -> Result<Vec<u8>> {
        if frame.width == 0 || frame.height == 0 || frame.width > u16::MAX as u32
            || frame.height > u16::MAX as u32
        {
            bail!("unsupported frame size {}x{}", frame.width, frame.height);
        }

        let jpeg = jpeg::encode_jpeg(frame, jpeg_quality)?;
        let y = luma_plane(frame);

        // Take the reference out so the block scan can borrow scratch
        // buffers mutably; it is replaced with the fresh luma below.
        let previous = self.ref_y.take();
        let matching_ref = previous.as_ref().filter(|r| r.w == y.w && r.h == y.h);

        let out = match matching_ref {
            Some(reference) if !force_i => {
                match self.build_p_frame(reference, &y, jpeg.len())? {
                    Some(p_bytes) => p_bytes,
                    None => i_frame(frame.width as u16, frame.height as u16, &self.params, &jpeg),
                }
            }
            _ => i_frame(frame.width as u16, frame.height as u16, &self.params, &jpeg),
        };

        self.ref_y = Some(y);
        Ok(out)
    }

    /// Build a P-frame against `reference`, or return `None` when a
    /// promotion gate fires.
    fn build_p_frame(
        &mut self,
        reference: &Plane,
        y: &Plane,
        jpeg_len: usize,
    ) -> Result<Option<Vec<u8>>> {
        let side = self.params.block as usize;
        if side == 0 {
            bail!("block size must be non-zero");
        }
        let threshold = self.params.threshold as i16;
        let blocks_x = y.w / side;
        let blocks_y = y.h / side;
        let total_blocks = blocks_x * blocks_y;

        let mut segments: Vec<u8> = Vec::new();
        let mut kept = 0usize;

        for by in 0..blocks_y {
            for bx in 0..blocks_x {
                let x0 = bx * side;
                let y0 = by * side;

                // Zero-thresholded residual and its mean magnitude.
                let mut sum_abs = 0u32;
                for row in 0..side {
                    let off = (y0 + row) * y.w + x0;
                    for col in 0..side {
                        let cur = y.data[off + col] as i16;
                        let prd = reference.data[off + col] as i16;
                        let mut r = cur - prd;
                        if r.abs() < threshold {
                            r = 0;
                        }
                        self.residual[row * side + col] = r;
                        sum_abs += r.unsigned_abs() as u32;
                    }
                }

                let mean = sum_abs as f32 / (side * side) as f32;
                if mean < self.params.sad_skip_per_px {
                    continue;
                }

                for (dst, r) in self
                    .raw_block
                    .chunks_exact_mut(2)
                    .zip(self.residual.iter())
                {
                    dst.copy_from_slice(&r.to_le_bytes());
                }
                let compressed = deflate(&self.raw_block, self.params.zlib_level)?;
                if compressed.len() > u16::MAX as usize {
                    tracing::debug!(
                        "residual block at ({}, {}) too large to frame, skipping",
                        x0,
                        y0
                    );
                    continue;
                }

                kept += 1;
                let header = BlockHeader {
                    bx: x0 as u16,
                    by: y0 as u16,
                    dx: 0,
                    dy: 0,
                    datalen: compressed.len() as u16,
                };
                segments.extend_from_slice(&header.encode());
                segments.extend_from_slice(&compressed);
            }
        }

        let scene_change =
            kept as f32 / total_blocks.max(1) as f32 > self.params.scene_change_ratio;
        let p_size = HDR_SIZE + segments.len();
        let too_big = p_size as f32 > self.params.jpeg_gate_ratio * jpeg_len as f32;
        if scene_change || too_big || kept > u16::MAX as usize {
            return Ok(None);
        }

        let header = FrameHeader {
            frame_type: FRAME_P,
            width: y.w as u16,
            height: y.h as u16,
            block: self.params.block,
            threshold: self.params.threshold,
            nblocks: kept as u16,
        };
        let mut out = Vec::with_capacity(p_size);
        out.extend_from_slice(&header.encode());
        out.extend_from_slice(&segments);
        Ok(Some(out))
    }
}

fn i_frame(width: u16, height: u16, params: &DiffParams, jpeg: &[u8]) -> Vec<u8> {
    let header = FrameHeader {
        frame_type: FRAME_I,
        width,
        height,
        block: params.block,
        threshold: params.threshold,
        nblocks: 0,
    };
    let mut out = Vec::with_capacity(HDR_SIZE + jpeg.len());
    out.extend_from_slice(&header.encode());
    out.extend_from_slice(jpeg);
    out
}

fn deflate(data: &[u8], level: u32) -> Result<Vec<u8>> {
    let mut encoder = ZlibEncoder::new(
        Vec::with_capacity(data.len() / 2),
        Compression::new(level.min(9)),
    );
    encoder.write_all(data).context("zlib compress failed")?;
    encoder.finish().context("zlib finish failed")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::dxf0;

    fn flat_frame(w: u32, h: u32, value: u8) -> BgrFrame {
        let mut frame = BgrFrame::black(w, h);
        frame.data.fill(value);
        frame
    }

    fn header_of(bytes: &[u8]) -> FrameHeader {
        FrameHeader::parse(bytes).expect("valid envelope").0
    }

    #[test]
    fn test_first_frame_is_i() {
        let mut codec = DiffCodec::new(DiffParams::default());
        let frame = flat_frame(64, 64, 100);
        let bytes = codec.encode_frame(&frame, true, 70).unwrap();
        let header = header_of(&bytes);
        assert_eq!(header.frame_type, FRAME_I);
        assert_eq!(header.nblocks, 0);
        assert_eq!((header.width, header.height), (64, 64));
        assert!(dxf0::is_i_frame(&bytes));
    }

    #[test]
    fn test_no_reference_promotes_even_without_force() {
        let mut codec = DiffCodec::new(DiffParams::default());
        let frame = flat_frame(64, 64, 100);
        let bytes = codec.encode_frame(&frame, false, 70).unwrap();
        assert_eq!(header_of(&bytes).frame_type, FRAME_I);
    }

    #[test]
    fn test_identical_frames_give_empty_p() {
        let mut codec = DiffCodec::new(DiffParams::default());
        let frame = flat_frame(64, 64, 100);
        codec.encode_frame(&frame, true, 70).unwrap();
        let bytes = codec.encode_frame(&frame, false, 70).unwrap();
        let header = header_of(&bytes);
        assert_eq!(header.frame_type, FRAME_P);
        assert_eq!(header.nblocks, 0);
        assert_eq!(bytes.len(), HDR_SIZE);
    }

    #[test]
    fn test_small_noise_below_threshold_skipped() {
        let mut codec = DiffCodec::new(DiffParams::default());
        let frame = flat_frame(64, 64, 100);
        codec.encode_frame(&frame, true, 70).unwrap();
        // +2 on every channel stays under the zero-out threshold of 5.
        let noisy = flat_frame(64, 64, 102);
        let bytes = codec.encode_frame(&noisy, false, 70).unwrap();
        assert_eq!(header_of(&bytes).nblocks, 0);
    }

    #[test]
    fn test_local_change_emits_blocks() {
        let params = DiffParams {
            // Keep the size gate out of the way; this test is about blocks.
            jpeg_gate_ratio: 100.0,
            ..DiffParams::default()
        };
        let mut codec = DiffCodec::new(params);
        let base = flat_frame(64, 64, 100);
        codec.encode_frame(&base, true, 70).unwrap();

        // Brighten one 16x16 block far beyond the thresholds.
        let mut changed = base.clone();
        for row in 0..16 {
            for col in 0..16 {
                let off = (row * 64 + col) * 3;
                changed.data[off..off + 3].fill(220);
            }
        }
        let bytes = codec.encode_frame(&changed, false, 70).unwrap();
        let header = header_of(&bytes);
        assert_eq!(header.frame_type, FRAME_P);
        assert_eq!(header.nblocks, 1);

        let (_, payload) = FrameHeader::parse(&bytes).unwrap();
        let block = BlockHeader::decode(payload).unwrap();
        assert_eq!((block.bx, block.by), (0, 0));
        assert_eq!((block.dx, block.dy), (0, 0));
        assert_eq!(payload.len(), dxf0::BLK_HDR_SIZE + block.datalen as usize);
    }

    #[test]
    fn test_scene_change_promotes_to_i() {
        let mut codec = DiffCodec::new(DiffParams::default());
        codec
            .encode_frame(&flat_frame(64, 64, 10), true, 70)
            .unwrap();
        let bytes = codec
            .encode_frame(&flat_frame(64, 64, 240), false, 70)
            .unwrap();
        assert_eq!(header_of(&bytes).frame_type, FRAME_I);
    }

    #[test]
    fn test_size_gate_promotes_to_i() {
        // A zero gate makes every P-frame (even an empty one) too big.
        let params = DiffParams {
            jpeg_gate_ratio: 0.0,
            ..DiffParams::default()
        };
        let mut codec = DiffCodec::new(params);
        let frame = flat_frame(64, 64, 100);
        codec.encode_frame(&frame, true, 70).unwrap();
        let bytes = codec.encode_frame(&frame, false, 70).unwrap();
        assert_eq!(header_of(&bytes).frame_type, FRAME_I);
    }

    #[test]
    fn test_force_i_after_reference_exists() {
        let mut codec = DiffCodec::new(DiffParams::default());
        let frame = flat_frame(64, 64, 100);
        codec.encode_frame(&frame, true, 70).unwrap();
        let bytes = codec.encode_frame(&frame, true, 70).unwrap();
        assert_eq!(header_of(&bytes).frame_type, FRAME_I);
    }

    #[test]
    fn test_resolution_change_promotes_to_i() {
        let mut codec = DiffCodec::new(DiffParams::default());
        codec
            .encode_frame(&flat_frame(64, 64, 100), true, 70)
            .unwrap();
        let bytes = codec
            .encode_frame(&flat_frame(32, 32, 100), false, 70)
            .unwrap();
        assert_eq!(header_of(&bytes).frame_type, FRAME_I);
    }

    #[test]
    fn test_reset_discards_reference() {
        let mut codec = DiffCodec::new(DiffParams::default());
        let frame = flat_frame(64, 64, 100);
        codec.encode_frame(&frame, true, 70).unwrap();
        codec.reset();
        let bytes = codec.encode_frame(&frame, false, 70).unwrap();
        assert_eq!(header_of(&bytes).frame_type, FRAME_I);
    }
}
