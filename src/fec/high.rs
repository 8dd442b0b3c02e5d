//! High-scheme reassembler: four parities per group, solved over GF(2).
//!
//! Data index `i` contributes to parity `b` iff bit `b` of `MASKS[i % 8]`
//! is set. Recovery builds the linear system `A·x = rhs` — one column per
//! missing data slot, one row per present parity, `rhs` being the parity
//! payload XORed with all known contributions — and reads the solution
//! back only when every column gets a pivot. A rank-deficient group stays
//! pending; incorrect bytes are never emitted.
//!
//! Group structure is inferred from `total_chunks` via
//! `T = D + 4G, G = ceil(D/K)`; when nothing fits, the frame is treated
//! as parity-less (`D = T, G = 0`).

use std::collections::{HashMap, VecDeque};

use crate::wire::FragmentHeader;

use super::{
    evict_to_cap, group_len, locate_grouped, solve_group_count, trim_recovered, xor_into,
    Reassembler, Slot, MASKS, MAX_PENDING_FRAMES,
};

const R: usize = 4;

struct Assembly {
    data_total: usize,
    groups: usize,
    data: Vec<Option<Vec<u8>>>,
    /// `parity[g][b]` is parity bit `b` of group `g`.
    parity: Vec<[Option<Vec<u8>>; 4]>,
    received: usize,
    fec_filled: Vec<bool>,
    recovered: u32,
}

impl Assembly {
    fn new(data_total: usize, groups: usize) -> Self {
        Self {
            data_total,
            groups,
            data: vec![None; data_total],
            parity: vec![[None, None, None, None]; groups],
            received: 0,
            fec_filled: vec![false; data_total],
            recovered: 0,
        }
    }

    fn try_recover(&mut self, g: usize, k: usize) {
        if g >= self.groups {
            return;
        }
        let start = g * k;
        let len = group_len(self.data_total, k, g);

        let missing: Vec<usize> = (0..len)
            .filter(|&i| self.data[start + i].is_none())
            .collect();
        if missing.is_empty() || missing.len() > R {
            return;
        }

        // One row per present parity: a bitmask over the missing columns
        // and the parity payload stripped of all known contributions.
        let mut rows: Vec<(u8, Vec<u8>)> = Vec::with_capacity(R);
        for b in 0..R {
            let Some(parity) = &self.parity[g][b] else {
                continue;
            };
            let mut rhs = parity.clone();
            let mut mask = 0u8;
            for i in 0..len {
                if (MASKS[i % 8] >> b) & 1 == 0 {
                    continue;
                }
                match &self.data[start + i] {
                    Some(chunk) => xor_into(&mut rhs, chunk),
                    None => {
                        // Index into the missing-column vector.
                        if let Some(j) = missing.iter().position(|&m| m == i) {
                            mask |= 1 << j;
                        }
                    }
                }
            }
            rows.push((mask, rhs));
        }

        // Gauss-Jordan over GF(2): pick a pivot row per column and
        // eliminate that column everywhere else.
        let mut pivots: Vec<usize> = Vec::with_capacity(missing.len());
        for j in 0..missing.len() {
            let pivot = (0..rows.len())
                .find(|r| !pivots.contains(r) && (rows[*r].0 >> j) & 1 == 1);
            let Some(r) = pivot else {
                // Deficient rank: leave the group pending.
                return;
            };
            pivots.push(r);
            let (pivot_mask, pivot_rhs) = rows[r].clone();
            for other in 0..rows.len() {
                if other != r && (rows[other].0 >> j) & 1 == 1 {
                    rows[other].0 ^= pivot_mask;
                    xor_into(&mut rows[other].1, &pivot_rhs);
                }
            }
        }

        for (j, &r) in pivots.iter().enumerate() {
            let slot = start + missing[j];
            // A slot is credited as recovered at most once.
            if self.data[slot].is_none() && !self.fec_filled[slot] {
                let bytes = rows[r].1.clone();
                self.data[slot] = Some(trim_recovered(bytes, slot, self.data_total));
                self.fec_filled[slot] = true;
                self.received += 1;
                self.recovered += 1;
            }
        }
    }
}

pub struct HighReassembler {
    k: usize,
    frames: HashMap<u32, Assembly>,
    order: VecDeque<u32>,
}

impl HighReassembler {
    pub fn new(k: usize) -> Self {
        Self {
            k: k.max(1),
            frames: HashMap::new(),
            order: VecDeque::new(),
        }
    }
}

impl Reassembler for HighReassembler {
    fn add_packet(&mut self, packet: &[u8]) -> Option<(u32, Vec<u8>, u32)> {
        let (header, payload) = FragmentHeader::parse(packet).ok()?;
        let total = header.total_chunks as usize;
        if total == 0 {
            return None;
        }
        let frame_id = header.frame_id;

        if !self.frames.contains_key(&frame_id) {
            // If no (D, G) split fits, treat the whole frame as data.
            let (data_total, groups) =
                solve_group_count(total, R, self.k).unwrap_or((total, 0));
            self.frames.insert(frame_id, Assembly::new(data_total, groups));
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
            Some(Slot::Parity(g, b)) => {
                if assembly.parity[g][b].is_none() {
                    assembly.parity[g][b] = Some(payload.to_vec());
                    assembly.try_recover(g, self.k);
                }
            }
            None => {}
        }

        if assembly.received == assembly.data_total {
            let assembly = self.frames.remove(&frame_id)?;
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
