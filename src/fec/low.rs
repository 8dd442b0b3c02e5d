//! Low-scheme reassembler: one whole-group XOR parity per group.
//!
//! `total_chunks` on this scheme's wire counts data fragments only;
//! parity fragments are recognized by the `chunk_id` high bit, with the
//! group index in the low 15 bits. A group with exactly one missing data
//! slot and its parity present recovers the slot by XORing parity with
//! the surviving data.

use std::collections::{HashMap, VecDeque};

use crate::wire::{FragmentHeader, PARITY_FLAG};

use super::{
    evict_to_cap, group_len, trim_recovered, xor_into, Reassembler, MAX_PENDING_FRAMES,
};

struct Assembly {
    data_total: usize,
    groups: usize,
    data: Vec<Option<Vec<u8>>>,
    parity: Vec<Option<Vec<u8>>>,
    received: usize,
    fec_filled: Vec<bool>,
    recovered: u32,
}

impl Assembly {
    fn new(data_total: usize, k: usize) -> Self {
        let groups = data_total.div_ceil(k);
        Self {
            data_total,
            groups,
            data: vec![None; data_total],
            parity: vec![None; groups],
            received: 0,
            fec_filled: vec![false; data_total],
            recovered: 0,
        }
    }

    /// Recover the single missing slot of group `g` if parity allows it.
    fn try_recover(&mut self, g: usize, k: usize) {
        let parity = match &self.parity[g] {
            Some(p) => p,
            None => return,
        };
        let start = g * k;
        let len = group_len(self.data_total, k, g);

        let mut missing = None;
        for i in start..start + len {
            if self.data[i].is_none() {
                if missing.is_some() {
                    return;
                }
                missing = Some(i);
            }
        }
        let Some(slot) = missing else { return };
        if self.fec_filled[slot] {
            return;
        }

        let mut acc = parity.clone();
        for i in start..start + len {
            if let Some(chunk) = &self.data[i] {
                xor_into(&mut acc, chunk);
            }
        }
        self.data[slot] = Some(trim_recovered(acc, slot, self.data_total));
        self.fec_filled[slot] = true;
        self.received += 1;
        self.recovered += 1;
    }
}

pub struct LowReassembler {
    k: usize,
    frames: HashMap<u32, Assembly>,
    order: VecDeque<u32>,
}

impl LowReassembler {
    pub fn new(k: usize) -> Self {
        Self {
            k: k.max(1),
            frames: HashMap::new(),
            order: VecDeque::new(),
        }
    }
}

impl Reassembler for LowReassembler {
    fn add_packet(&mut self, packet: &[u8]) -> Option<(u32, Vec<u8>, u32)> {
        let (header, payload) = FragmentHeader::parse(packet).ok()?;
        let data_total = header.total_chunks as usize;
        if data_total == 0 {
            return None;
        }

        let k = self.k;
        let assembly = self.frames.entry(header.frame_id).or_insert_with(|| {
            self.order.push_back(header.frame_id);
            Assembly::new(data_total, k)
        });

        if header.chunk_id & PARITY_FLAG != 0 {
            let g = (header.chunk_id & !PARITY_FLAG) as usize;
            if g < assembly.groups && assembly.parity[g].is_none() {
                assembly.parity[g] = Some(payload.to_vec());
                assembly.try_recover(g, k);
            }
        } else {
            let idx = header.chunk_id as usize;
            if idx < assembly.data_total && assembly.data[idx].is_none() {
                assembly.data[idx] = Some(payload.to_vec());
                assembly.received += 1;
                assembly.try_recover(idx / k, k);
            }
        }

        if assembly.received == assembly.data_total {
            let assembly = self.frames.remove(&header.frame_id)?;
            let mut frame = Vec::new();
            for chunk in assembly.data.into_iter().flatten() {
                frame.extend_from_slice(&chunk);
            }
            return Some((header.frame_id, frame, assembly.recovered));
        }

        evict_to_cap(&mut self.frames, &mut self.order, MAX_PENDING_FRAMES);
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fec::packetize::packetize_low;
    use crate::wire::DATA_SIZE;

    fn frame_of(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i * 29 % 251) as u8).collect()
    }

    fn chunk_id(packet: &[u8]) -> u16 {
        FragmentHeader::decode(packet).unwrap().chunk_id
    }

    #[test]
    fn test_lossless_delivery() {
        let frame = frame_of(10000);
        let packets = packetize_low(1, &frame, 8);
        let mut r = LowReassembler::new(8);

        let mut result = None;
        for p in &packets {
            result = r.add_packet(p).or(result);
        }
        let (frame_id, bytes, recovered) = result.unwrap();
        assert_eq!(frame_id, 1);
        assert_eq!(bytes, frame);
        assert_eq!(recovered, 0);
    }

    #[test]
    fn test_single_drop_recovered() {
        // 10000 bytes -> 10 data + 2 parity; drop data chunk 3.
        let frame = frame_of(10000);
        let packets = packetize_low(2, &frame, 8);
        assert_eq!(packets.len(), 12);
        let mut r = LowReassembler::new(8);

        let mut result = None;
        for p in packets.iter().filter(|p| chunk_id(p) != 3) {
            result = r.add_packet(p).or(result);
        }
        let (_, bytes, recovered) = result.unwrap();
        assert_eq!(bytes, frame);
        assert_eq!(recovered, 1);
    }

    #[test]
    fn test_every_nonfinal_drop_recovers_exactly() {
        let frame = frame_of(10000);
        for dropped in 0u16..9 {
            let packets = packetize_low(7, &frame, 8);
            let mut r = LowReassembler::new(8);
            let mut result = None;
            for p in packets.iter().filter(|p| chunk_id(p) != dropped) {
                result = r.add_packet(p).or(result);
            }
            let (_, bytes, recovered) = result.unwrap();
            assert_eq!(bytes, frame, "dropped chunk {}", dropped);
            assert_eq!(recovered, 1);
        }
    }

    #[test]
    fn test_final_fragment_recovery_zero_padded() {
        // The last data fragment's true length is unknown to the parity;
        // recovery restores its content with a zero tail up to the group's
        // longest fragment.
        let frame = frame_of(10000);
        let packets = packetize_low(3, &frame, 8);
        let mut r = LowReassembler::new(8);

        let mut result = None;
        for p in packets.iter().filter(|p| chunk_id(p) != 9) {
            result = r.add_packet(p).or(result);
        }
        let (_, bytes, recovered) = result.unwrap();
        assert_eq!(recovered, 1);
        assert_eq!(&bytes[..frame.len()], &frame[..]);
        assert!(bytes[frame.len()..].iter().all(|&b| b == 0));
        assert_eq!(bytes.len(), 9 * DATA_SIZE + DATA_SIZE);
    }

    #[test]
    fn test_one_drop_per_group_recovered() {
        let frame = frame_of(10000);
        let packets = packetize_low(4, &frame, 8);
        let mut r = LowReassembler::new(8);

        // Drop chunk 2 (group 0) and chunk 8 (group 1).
        let mut result = None;
        for p in packets.iter().filter(|p| {
            let id = chunk_id(p);
            id != 2 && id != 8
        }) {
            result = r.add_packet(p).or(result);
        }
        let (_, bytes, recovered) = result.unwrap();
        assert_eq!(bytes, frame);
        assert_eq!(recovered, 2);
    }

    #[test]
    fn test_two_drops_same_group_not_recoverable() {
        let frame = frame_of(10000);
        let packets = packetize_low(5, &frame, 8);
        let mut r = LowReassembler::new(8);

        for p in packets.iter().filter(|p| {
            let id = chunk_id(p);
            id != 2 && id != 5
        }) {
            assert!(r.add_packet(p).is_none());
        }
    }

    #[test]
    fn test_parity_loss_harmless() {
        let frame = frame_of(10000);
        let packets = packetize_low(6, &frame, 8);
        let mut r = LowReassembler::new(8);

        let mut result = None;
        for p in packets.iter().filter(|p| chunk_id(p) & PARITY_FLAG == 0) {
            result = r.add_packet(p).or(result);
        }
        let (_, bytes, recovered) = result.unwrap();
        assert_eq!(bytes, frame);
        assert_eq!(recovered, 0);
    }

    #[test]
    fn test_single_chunk_frame_from_parity_alone() {
        let frame = frame_of(500);
        let packets = packetize_low(8, &frame, 8);
        assert_eq!(packets.len(), 2);
        let mut r = LowReassembler::new(8);

        // Only the parity arrives; it equals the lone data chunk.
        let (_, bytes, recovered) = r.add_packet(&packets[1]).unwrap();
        assert_eq!(bytes, frame);
        assert_eq!(recovered, 1);
    }
}
