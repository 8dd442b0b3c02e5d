//! JPEG encode/decode wrappers around the `image` crate.
//!
//! The transport treats JPEG as an opaque external codec: I-frames carry a
//! baseline JPEG bytestream, and plain (diff-off) operation is JPEG per
//! frame. Frames are BGR throughout the pipeline, so both directions
//! swizzle to/from the RGB ordering the codec expects.

use anyhow::{bail, Context, Result};
use image::codecs::jpeg::JpegEncoder;

use super::BgrFrame;

/// Encode a BGR frame as baseline JPEG at the given quality (1..=100).
pub fn encode_jpeg(frame: &BgrFrame, quality: u8) -> Result<Vec<u8>> {
    if !frame.is_well_formed() {
        bail!(
            "malformed frame: {}x{} with {} bytes",
            frame.width,
            frame.height,
            frame.data.len()
        );
    }
    let quality = quality.clamp(1, 100);

    let mut rgb = Vec::with_capacity(frame.data.len());
    for px in frame.data.chunks_exact(3) {
        rgb.extend_from_slice(&[px[2], px[1], px[0]]);
    }

    let mut out = Vec::new();
    let mut encoder = JpegEncoder::new_with_quality(&mut out, quality);
    encoder
        .encode(
            &rgb,
            frame.width,
            frame.height,
            image::ExtendedColorType::Rgb8,
        )
        .context("JPEG encode failed")?;
    Ok(out)
}

/// Decode a JPEG bytestream into a BGR frame.
pub fn decode_jpeg(bytes: &[u8]) -> Result<BgrFrame> {
    let img = image::load_from_memory_with_format(bytes, image::ImageFormat::Jpeg)
        .context("JPEG decode failed")?;
    let rgb = img.to_rgb8();
    let (width, height) = (rgb.width(), rgb.height());

    let raw = rgb.into_raw();
    let mut data = Vec::with_capacity(raw.len());
    for px in raw.chunks_exact(3) {
        data.extend_from_slice(&[px[2], px[1], px[0]]);
    }

    Ok(BgrFrame {
        width,
        height,
        data,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::TestPattern;

    #[test]
    fn test_roundtrip_dimensions() {
        let frame = TestPattern::new(64, 48).next_frame();
        let jpeg = encode_jpeg(&frame, 80).unwrap();
        let decoded = decode_jpeg(&jpeg).unwrap();
        assert_eq!(decoded.width, 64);
        assert_eq!(decoded.height, 48);
        assert!(decoded.is_well_formed());
    }

    #[test]
    fn test_quality_affects_size() {
        let frame = TestPattern::new(128, 96).next_frame();
        let lo = encode_jpeg(&frame, 20).unwrap();
        let hi = encode_jpeg(&frame, 95).unwrap();
        assert!(hi.len() > lo.len(), "hi={} lo={}", hi.len(), lo.len());
    }

    #[test]
    fn test_flat_frame_near_lossless() {
        // A flat mid-gray frame should survive JPEG almost exactly.
        let mut frame = BgrFrame::black(32, 32);
        frame.data.fill(128);
        let decoded = decode_jpeg(&encode_jpeg(&frame, 90).unwrap()).unwrap();
        for (&a, &b) in frame.data.iter().zip(decoded.data.iter()) {
            assert!((a as i16 - b as i16).abs() <= 2);
        }
    }

    #[test]
    fn test_decode_garbage_fails() {
        assert!(decode_jpeg(b"not a jpeg").is_err());
    }

    #[test]
    fn test_malformed_frame_rejected() {
        let frame = BgrFrame {
            width: 10,
            height: 10,
            data: vec![0; 5],
        };
        assert!(encode_jpeg(&frame, 70).is_err());
    }
}
