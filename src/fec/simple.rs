//! Plain reassembly for the parity-less scheme.

use std::collections::{HashMap, VecDeque};

use crate::wire::FragmentHeader;

use super::{evict_to_cap, Reassembler, MAX_PENDING_FRAMES};

struct Assembly {
    total: usize,
    chunks: Vec<Option<Vec<u8>>>,
    received: usize,
}

/// Collects data fragments per frame and concatenates them in index order
/// once all are present. `recovered` is always 0.
#[derive(Default)]
pub struct SimpleReassembler {
    frames: HashMap<u32, Assembly>,
    order: VecDeque<u32>,
}

impl SimpleReassembler {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Reassembler for SimpleReassembler {
    fn add_packet(&mut self, packet: &[u8]) -> Option<(u32, Vec<u8>, u32)> {
        let (header, payload) = FragmentHeader::parse(packet).ok()?;
        let total = header.total_chunks as usize;
        if total == 0 {
            return None;
        }

        let assembly = self.frames.entry(header.frame_id).or_insert_with(|| {
            self.order.push_back(header.frame_id);
            Assembly {
                total,
                chunks: vec![None; total],
                received: 0,
            }
        });

        // A later fragment may claim a larger total; grow, never shrink.
        if total > assembly.total {
            assembly.chunks.resize(total, None);
            assembly.total = total;
        }

        let idx = header.chunk_id as usize;
        if idx < assembly.total && assembly.chunks[idx].is_none() {
            assembly.chunks[idx] = Some(payload.to_vec());
            assembly.received += 1;
        }

        if assembly.received == assembly.total {
            let assembly = self.frames.remove(&header.frame_id)?;
            let mut frame = Vec::new();
            for chunk in assembly.chunks.into_iter().flatten() {
                frame.extend_from_slice(&chunk);
            }
            return Some((header.frame_id, frame, 0));
        }

        evict_to_cap(&mut self.frames, &mut self.order, MAX_PENDING_FRAMES);
        None
    }
}
