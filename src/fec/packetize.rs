//! Sender-side packetizers: frame bytes to ordered datagram lists.
//!
//! All four schemes cut the frame into `DATA_SIZE` chunks first. The
//! none/mid/high layouts interleave per group — a group's data chunks,
//! then its parity chunks — and number every fragment with one global
//! 0-based `chunk_id`; `total_chunks` counts data and parity together.
//! The low layout numbers data chunks only and flags parity with the
//! `chunk_id` high bit; its `total_chunks` counts data fragments alone.

use crate::wire::{FragmentHeader, PARITY_FLAG};

use super::{data_chunks, group_len, xor_into, MASKS};

/// No parity: one datagram per data chunk.
pub fn packetize_none(frame_id: u32, frame: &[u8]) -> Vec<Vec<u8>> {
    let chunks = data_chunks(frame);
    let total = chunks.len() as u16;
    chunks
        .iter()
        .enumerate()
        .map(|(i, chunk)| FragmentHeader::new(frame_id, i as u16, total).with_payload(chunk))
        .collect()
}

/// One whole-group XOR parity per group of `k`.
pub fn packetize_low(frame_id: u32, frame: &[u8], k: usize) -> Vec<Vec<u8>> {
    let k = k.max(1);
    let chunks = data_chunks(frame);
    let d = chunks.len();
    let groups = d.div_ceil(k);
    let total = d as u16;

    let mut packets = Vec::with_capacity(d + groups);
    for g in 0..groups {
        let start = g * k;
        let len = group_len(d, k, g);
        let mut parity: Vec<u8> = Vec::new();
        for (i, chunk) in chunks[start..start + len].iter().enumerate() {
            xor_into(&mut parity, chunk);
            packets.push(
                FragmentHeader::new(frame_id, (start + i) as u16, total).with_payload(chunk),
            );
        }
        packets.push(
            FragmentHeader::new(frame_id, PARITY_FLAG | g as u16, total).with_payload(&parity),
        );
    }
    packets
}

/// Two parities per group: `p0` over the whole group, `p1` over the
/// even local indices.
pub fn packetize_mid(frame_id: u32, frame: &[u8], k: usize) -> Vec<Vec<u8>> {
    packetize_grouped(frame_id, frame, k, 2, |chunks| {
        let mut p0: Vec<u8> = Vec::new();
        let mut p1: Vec<u8> = Vec::new();
        for (i, chunk) in chunks.iter().enumerate() {
            xor_into(&mut p0, chunk);
            if i % 2 == 0 {
                xor_into(&mut p1, chunk);
            }
        }
        vec![p0, p1]
    })
}

/// Four parities per group, one per mask bit of `MASKS[i % 8]`.
pub fn packetize_high(frame_id: u32, frame: &[u8], k: usize) -> Vec<Vec<u8>> {
    packetize_grouped(frame_id, frame, k, 4, |chunks| {
        let mut parity: Vec<Vec<u8>> = vec![Vec::new(); 4];
        for (i, chunk) in chunks.iter().enumerate() {
            let mask = MASKS[i % 8];
            for (b, p) in parity.iter_mut().enumerate() {
                if (mask >> b) & 1 == 1 {
                    xor_into(p, chunk);
                }
            }
        }
        parity
    })
}

/// Shared layout for the globally-numbered schemes: per group, data
/// chunks then `r` parity chunks from `make_parity`.
fn packetize_grouped(
    frame_id: u32,
    frame: &[u8],
    k: usize,
    r: usize,
    make_parity: impl Fn(&[&[u8]]) -> Vec<Vec<u8>>,
) -> Vec<Vec<u8>> {
    let k = k.max(1);
    let chunks = data_chunks(frame);
    let d = chunks.len();
    let groups = d.div_ceil(k);
    let total = (d + r * groups) as u16;

    let mut packets = Vec::with_capacity(d + r * groups);
    let mut chunk_id = 0u16;
    for g in 0..groups {
        let start = g * k;
        let len = group_len(d, k, g);
        let group = &chunks[start..start + len];

        for chunk in group {
            packets.push(FragmentHeader::new(frame_id, chunk_id, total).with_payload(chunk));
            chunk_id += 1;
        }
        for parity in make_parity(group) {
            packets.push(FragmentHeader::new(frame_id, chunk_id, total).with_payload(&parity));
            chunk_id += 1;
        }
    }
    packets
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::{FragmentHeader, DATA_SIZE, HEADER_SIZE};

    fn frame_of(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i * 31 % 251) as u8).collect()
    }

    fn header(packet: &[u8]) -> FragmentHeader {
        FragmentHeader::decode(packet).unwrap()
    }

    #[test]
    fn test_none_chunking() {
        let frame = frame_of(DATA_SIZE * 2 + 100);
        let packets = packetize_none(7, &frame);
        assert_eq!(packets.len(), 3);
        for (i, p) in packets.iter().enumerate() {
            let h = header(p);
            assert_eq!(h.frame_id, 7);
            assert_eq!(h.chunk_id, i as u16);
            assert_eq!(h.total_chunks, 3);
        }
        assert_eq!(packets[2].len(), HEADER_SIZE + 100);
    }

    #[test]
    fn test_none_empty_frame_single_chunk() {
        let packets = packetize_none(1, &[]);
        assert_eq!(packets.len(), 1);
        let h = header(&packets[0]);
        assert_eq!(h.total_chunks, 1);
        assert_eq!(packets[0].len(), HEADER_SIZE);
    }

    #[test]
    fn test_low_layout_10000_bytes() {
        // 10000 bytes -> 10 data chunks -> 2 groups of 8 and 2 -> 2 parity.
        let frame = frame_of(10000);
        let packets = packetize_low(3, &frame, 8);
        assert_eq!(packets.len(), 12);

        let parities: Vec<_> = packets
            .iter()
            .map(|p| header(p))
            .filter(|h| h.chunk_id & PARITY_FLAG != 0)
            .collect();
        assert_eq!(parities.len(), 2);
        assert_eq!(parities[0].chunk_id & !PARITY_FLAG, 0);
        assert_eq!(parities[1].chunk_id & !PARITY_FLAG, 1);
        // Low counts data fragments only.
        for p in &packets {
            assert_eq!(header(p).total_chunks, 10);
        }
    }

    #[test]
    fn test_low_parity_is_group_xor() {
        let frame = frame_of(DATA_SIZE * 3);
        let packets = packetize_low(0, &frame, 8);
        // Single group of 3 data + 1 parity.
        assert_eq!(packets.len(), 4);
        let mut expect: Vec<u8> = Vec::new();
        for p in &packets[0..3] {
            xor_into(&mut expect, &p[HEADER_SIZE..]);
        }
        assert_eq!(&packets[3][HEADER_SIZE..], &expect[..]);
    }

    #[test]
    fn test_parity_length_matches_longest_in_group() {
        let frame = frame_of(DATA_SIZE + 10);
        let packets = packetize_low(0, &frame, 8);
        assert_eq!(packets.len(), 3);
        assert_eq!(packets[1].len(), HEADER_SIZE + 10);
        assert_eq!(packets[2].len(), HEADER_SIZE + DATA_SIZE);
    }

    #[test]
    fn test_mid_layout_and_totals() {
        let frame = frame_of(10000);
        let packets = packetize_mid(5, &frame, 8);
        // 10 data + 2 groups * 2 parity = 14, numbered 0..13 in order.
        assert_eq!(packets.len(), 14);
        for (i, p) in packets.iter().enumerate() {
            let h = header(p);
            assert_eq!(h.chunk_id, i as u16);
            assert_eq!(h.total_chunks, 14);
        }
    }

    #[test]
    fn test_mid_parity_definitions() {
        let frame = frame_of(DATA_SIZE * 4);
        let packets = packetize_mid(0, &frame, 8);
        assert_eq!(packets.len(), 6);
        let data: Vec<&[u8]> = packets[0..4].iter().map(|p| &p[HEADER_SIZE..]).collect();

        let mut p0: Vec<u8> = Vec::new();
        let mut p1: Vec<u8> = Vec::new();
        for (i, d) in data.iter().enumerate() {
            xor_into(&mut p0, d);
            if i % 2 == 0 {
                xor_into(&mut p1, d);
            }
        }
        assert_eq!(&packets[4][HEADER_SIZE..], &p0[..]);
        assert_eq!(&packets[5][HEADER_SIZE..], &p1[..]);
    }

    #[test]
    fn test_high_layout_and_mask_parity() {
        let frame = frame_of(DATA_SIZE * 8);
        let packets = packetize_high(0, &frame, 8);
        assert_eq!(packets.len(), 12);
        for (i, p) in packets.iter().enumerate() {
            assert_eq!(header(p).chunk_id, i as u16);
            assert_eq!(header(p).total_chunks, 12);
        }

        let data: Vec<&[u8]> = packets[0..8].iter().map(|p| &p[HEADER_SIZE..]).collect();
        // p0 gathers mask-bit-0 indices: masks 1,3,5,7 at indices 0,2,4,6.
        let mut p0: Vec<u8> = Vec::new();
        for &i in &[0usize, 2, 4, 6] {
            xor_into(&mut p0, data[i]);
        }
        assert_eq!(&packets[8][HEADER_SIZE..], &p0[..]);

        // p3 has a single contributor: index 7 (mask 8).
        assert_eq!(&packets[11][HEADER_SIZE..], data[7]);
    }

    #[test]
    fn test_high_two_groups() {
        let frame = frame_of(DATA_SIZE * 10);
        let packets = packetize_high(0, &frame, 8);
        // 10 data + 2 groups * 4 parity = 18.
        assert_eq!(packets.len(), 18);
        // Second group: ids 12..13 data, 14..17 parity.
        assert_eq!(header(&packets[12]).chunk_id, 12);
        assert_eq!(header(&packets[17]).chunk_id, 17);
    }
}
