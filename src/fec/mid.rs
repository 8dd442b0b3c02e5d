//! Mid-scheme reassembler: two parities per group.
//!
//! `p0` covers the whole group, `p1` the even local indices. One missing
//! data slot is always recoverable; two missing slots are recoverable
//! exactly when one is even-indexed and one odd-indexed (within the
//! group): the even one falls out of `p1`, then the odd one out of `p0`.
//!
//! Group structure is inferred from `total_chunks` by solving
//! `T = D + 2G, G = ceil(D/K)`; a data-count hint registered out-of-band
//! via [`MidReassembler::register_meta`] takes precedence.

use std::collections::{HashMap, VecDeque};

use crate::wire::FragmentHeader;

use super::{
    evict_to_cap, group_len, locate_grouped, solve_group_count, trim_recovered, xor_into,
    Reassembler, Slot, MAX_PENDING_FRAMES,
};

const R: usize = 2;

struct Assembly {
    data_total: usize,
    groups: usize,
    data: Vec<Option<Vec<u8>>>,
    p0: Vec<Option<Vec<u8>>>,
    p1: Vec<Option<Vec<u8>>>,
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
            p0: vec![None; groups],
            p1: vec![None; groups],
            received: 0,
            fec_filled: vec![false; data_total],
            recovered: 0,
        }
    }

    fn fill(&mut self, slot: usize, bytes: Vec<u8>) {
        // A slot is credited as recovered at most once.
        if self.data[slot].is_some() || self.fec_filled[slot] {
            return;
        }
        self.data[slot] = Some(trim_recovered(bytes, slot, self.data_total));
        self.fec_filled[slot] = true;
        self.received += 1;
        self.recovered += 1;
    }

    fn try_recover(&mut self, g: usize, k: usize) {
        let start = g * k;
        let len = group_len(self.data_total, k, g);

        let missing: Vec<usize> = (0..len)
            .filter(|&i| self.data[start + i].is_none())
            .collect();

        match missing[..] {
            [] => {}
            [local] => {
                if self.p0[g].is_some() {
                    let mut acc = self.p0[g].clone().unwrap_or_default();
                    for i in 0..len {
                        if let Some(chunk) = &self.data[start + i] {
                            xor_into(&mut acc, chunk);
                        }
                    }
                    self.fill(start + local, acc);
                } else if local % 2 == 0 && self.p1[g].is_some() {
                    let mut acc = self.p1[g].clone().unwrap_or_default();
                    for i in (0..len).step_by(2) {
                        if let Some(chunk) = &self.data[start + i] {
                            xor_into(&mut acc, chunk);
                        }
                    }
                    self.fill(start + local, acc);
                }
            }
            [a, b] if a % 2 != b % 2 => {
                let (Some(p0), Some(p1)) = (&self.p0[g], &self.p1[g]) else {
                    return;
                };
                let (even, odd) = if a % 2 == 0 { (a, b) } else { (b, a) };

                let mut d_even = p1.clone();
                for i in (0..len).step_by(2) {
                    if let Some(chunk) = &self.data[start + i] {
                        xor_into(&mut d_even, chunk);
                    }
                }
                let mut d_odd = p0.clone();
                xor_into(&mut d_odd, &d_even);
                for i in 0..len {
                    if let Some(chunk) = &self.data[start + i] {
                        xor_into(&mut d_odd, chunk);
                    }
                }

                self.fill(start + even, d_even);
                self.fill(start + odd, d_odd);
            }
            // Two same-parity losses (or more than two) stay pending
            // until another data fragment arrives.
            _ => {}
        }
    }
}

pub struct MidReassembler {
    k: usize,
    frames: HashMap<u32, Assembly>,
    order: VecDeque<u32>,
    meta: HashMap<u32, usize>,
}

impl MidReassembler {
    pub fn new(k: usize) -> Self {
        Self {
            k: k.max(1),
            frames: HashMap::new(),
            order: VecDeque::new(),
            meta: HashMap::new(),
        }
    }

    /// Register the data-chunk count for a frame ahead of its fragments;
    /// overrides the `total_chunks` inference.
    pub fn register_meta(&mut self, frame_id: u32, data_total: usize) {
        if data_total > 0 {
            self.meta.insert(frame_id, data_total);
        }
    }

}

impl Reassembler for MidReassembler {
    fn add_packet(&mut self, packet: &[u8]) -> Option<(u32, Vec<u8>, u32)> {
        let (header, payload) = FragmentHeader::parse(packet).ok()?;
        let total = header.total_chunks as usize;
        let frame_id = header.frame_id;

        if !self.frames.contains_key(&frame_id) {
            let data_total = match self.meta.get(&frame_id) {
                Some(&d) => d,
                None => solve_group_count(total, R, self.k)?.0,
            };
            self.frames.insert(frame_id, Assembly::new(data_total, self.k));
            self.order.push_back(frame_id);
        }
        let assembly = self.frames.get_mut(&frame_id)?;

        let slot = locate_grouped(
            self.k,
            R,
            assembly.data_total,
            assembly.groups,
            header.chunk_id as usize,
        );
        match slot {
            Some(Slot::Data(g, slot)) => {
                if assembly.data[slot].is_none() {
                    assembly.data[slot] = Some(payload.to_vec());
                    assembly.received += 1;
                    assembly.try_recover(g, self.k);
                }
            }
            Some(Slot::Parity(g, which)) => {
                let store = if which == 0 {
                    &mut assembly.p0[g]
                } else {
                    &mut assembly.p1[g]
                };
                if store.is_none() {
                    *store = Some(payload.to_vec());
                    assembly.try_recover(g, self.k);
                }
            }
            None => {}
        }

        if assembly.received == assembly.data_total {
            let assembly = self.frames.remove(&frame_id)?;
            self.meta.remove(&frame_id);
            let mut frame = Vec::new();
            for chunk in assembly.data.into_iter().flatten() {
                frame.extend_from_slice(&chunk);
            }
            return Some((frame_id, frame, assembly.recovered));
        }

        evict_to_cap(&mut self.frames, &mut self.order, MAX_PENDING_FRAMES);
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fec::packetize::packetize_mid;

    fn frame_of(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i * 37 % 241) as u8).collect()
    }

    fn chunk_id(packet: &[u8]) -> u16 {
        FragmentHeader::decode(packet).unwrap().chunk_id
    }

    fn deliver_without(
        r: &mut MidReassembler,
        packets: &[Vec<u8>],
        dropped: &[u16],
    ) -> Option<(u32, Vec<u8>, u32)> {
        let mut result = None;
        for p in packets.iter().filter(|p| !dropped.contains(&chunk_id(p))) {
            result = r.add_packet(p).or(result);
        }
        result
    }

    #[test]
    fn test_lossless_delivery() {
        let frame = frame_of(10000);
        let packets = packetize_mid(1, &frame, 8);
        let mut r = MidReassembler::new(8);
        let (_, bytes, recovered) = deliver_without(&mut r, &packets, &[]).unwrap();
        assert_eq!(bytes, frame);
        assert_eq!(recovered, 0);
    }

    #[test]
    fn test_single_drop_recovered() {
        let frame = frame_of(10000);
        let packets = packetize_mid(2, &frame, 8);
        let mut r = MidReassembler::new(8);
        let (_, bytes, recovered) = deliver_without(&mut r, &packets, &[4]).unwrap();
        assert_eq!(bytes, frame);
        assert_eq!(recovered, 1);
    }

    #[test]
    fn test_opposite_parity_double_drop_recovered() {
        // Group 0 data sits at ids 0..=7; drop local indices 2 and 5.
        let frame = frame_of(10000);
        let packets = packetize_mid(3, &frame, 8);
        let mut r = MidReassembler::new(8);
        let (_, bytes, recovered) = deliver_without(&mut r, &packets, &[2, 5]).unwrap();
        assert_eq!(bytes, frame);
        assert_eq!(recovered, 2);
    }

    #[test]
    fn test_same_parity_double_drop_stays_pending() {
        let frame = frame_of(10000);
        let packets = packetize_mid(4, &frame, 8);
        let mut r = MidReassembler::new(8);
        assert!(deliver_without(&mut r, &packets, &[2, 4]).is_none());

        // A late copy of one of the two resolves the group via p0.
        let late = packets.iter().find(|p| chunk_id(p) == 2).unwrap();
        let (_, bytes, recovered) = r.add_packet(late).unwrap();
        assert_eq!(bytes, frame);
        assert_eq!(recovered, 1);
    }

    #[test]
    fn test_even_loss_recovered_via_p1_when_p0_lost() {
        // Ids 8 and 9 are group 0's p0/p1; drop p0 and even data chunk 2.
        let frame = frame_of(10000);
        let packets = packetize_mid(5, &frame, 8);
        let mut r = MidReassembler::new(8);
        let (_, bytes, recovered) = deliver_without(&mut r, &packets, &[2, 8]).unwrap();
        assert_eq!(bytes, frame);
        assert_eq!(recovered, 1);
    }

    #[test]
    fn test_drops_across_groups() {
        // One loss in each group: ids 1 (group 0) and 11 (group 1 data).
        let frame = frame_of(10000);
        let packets = packetize_mid(6, &frame, 8);
        let mut r = MidReassembler::new(8);
        let (_, bytes, recovered) = deliver_without(&mut r, &packets, &[1, 11]).unwrap();
        assert_eq!(bytes, frame);
        assert_eq!(recovered, 2);
    }

    #[test]
    fn test_register_meta_overrides_inference() {
        let frame = frame_of(10000);
        let packets = packetize_mid(7, &frame, 8);
        let mut r = MidReassembler::new(8);
        r.register_meta(7, 10);
        let (_, bytes, recovered) = deliver_without(&mut r, &packets, &[3]).unwrap();
        assert_eq!(bytes, frame);
        assert_eq!(recovered, 1);
    }

    #[test]
    fn test_inconsistent_total_ignored() {
        // A total that admits no (D, G) split creates no state.
        let mut r = MidReassembler::new(8);
        let packet = FragmentHeader::new(9, 0, 2).with_payload(b"x");
        assert!(r.add_packet(&packet).is_none());
        assert!(r.frames.is_empty());
    }
}
