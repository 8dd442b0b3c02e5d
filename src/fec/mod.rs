//! XOR-parity forward error correction over fragment groups.
//!
//! Four interchangeable schemes share the fragment header of [`crate::wire`]
//! and split a frame's data chunks into groups of up to `K` (default 8):
//!
//! | scheme | parity/group | recovers |
//! |--------|--------------|----------|
//! | none   | 0            | nothing |
//! | low    | 1 (group XOR) | any single data loss per group |
//! | mid    | 2 (all, even-index) | 1 always; 2 iff opposite index parity |
//! | high   | 4 (mask bits) | up to 4 if the GF(2) system is full rank |
//!
//! XOR treats unequal-length operands as zero-extended to the longer one,
//! so parity fragments are as long as the longest data fragment in their
//! group. `packetize` builds the sender-side datagram list; the
//! per-scheme reassemblers own receiver-side assembly state.

pub mod high;
pub mod low;
pub mod mid;
pub mod packetize;
pub mod simple;

use std::collections::HashMap;
use std::collections::VecDeque;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::wire::DATA_SIZE;

/// Default FEC group size (`fec_k`).
pub const DEFAULT_GROUP_SIZE: usize = 8;

/// Cap on concurrently pending frame assemblies; oldest evicted beyond it.
pub const MAX_PENDING_FRAMES: usize = 64;

/// Per-data-index parity participation masks for the high scheme.
/// Data index `i` contributes to parity `b` iff bit `b` of `MASKS[i % 8]`
/// is set.
pub const MASKS: [u8; 8] = [1, 2, 3, 4, 5, 6, 7, 8];

/// Erasure-code scheme selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum FecScheme {
    #[default]
    None,
    Low,
    Mid,
    High,
}

impl FromStr for FecScheme {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "none" => Ok(Self::None),
            "low" => Ok(Self::Low),
            "mid" => Ok(Self::Mid),
            "high" => Ok(Self::High),
            other => Err(format!(
                "unknown fec scheme '{}' (expected none/low/mid/high)",
                other
            )),
        }
    }
}

impl fmt::Display for FecScheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::None => "none",
            Self::Low => "low",
            Self::Mid => "mid",
            Self::High => "high",
        };
        f.write_str(s)
    }
}

/// Receiver-side assembly contract shared by all schemes.
///
/// Feeds one datagram at a time; returns `(frame_id, frame_bytes,
/// recovered_count)` when a frame completes. Malformed fragments are
/// ignored without touching assembly state.
pub trait Reassembler: Send {
    fn add_packet(&mut self, packet: &[u8]) -> Option<(u32, Vec<u8>, u32)>;
}

/// Build the reassembler matching `scheme` with group size `k`.
pub fn make_reassembler(scheme: FecScheme, k: usize) -> Box<dyn Reassembler> {
    match scheme {
        FecScheme::None => Box::new(simple::SimpleReassembler::new()),
        FecScheme::Low => Box::new(low::LowReassembler::new(k)),
        FecScheme::Mid => Box::new(mid::MidReassembler::new(k)),
        FecScheme::High => Box::new(high::HighReassembler::new(k)),
    }
}

/// Packetize one encoded frame for the selected scheme.
pub fn packetize(scheme: FecScheme, frame_id: u32, frame: &[u8], k: usize) -> Vec<Vec<u8>> {
    match scheme {
        FecScheme::None => packetize::packetize_none(frame_id, frame),
        FecScheme::Low => packetize::packetize_low(frame_id, frame, k),
        FecScheme::Mid => packetize::packetize_mid(frame_id, frame, k),
        FecScheme::High => packetize::packetize_high(frame_id, frame, k),
    }
}

/// XOR `other` into `acc`, zero-extending `acc` when `other` is longer.
pub fn xor_into(acc: &mut Vec<u8>, other: &[u8]) {
    if other.len() > acc.len() {
        acc.resize(other.len(), 0);
    }
    for (a, b) in acc.iter_mut().zip(other.iter()) {
        *a ^= b;
    }
}

/// Split a frame into `DATA_SIZE` chunks; a zero-length frame still
/// produces one (empty) chunk.
pub(crate) fn data_chunks(frame: &[u8]) -> Vec<&[u8]> {
    if frame.is_empty() {
        return vec![&frame[0..0]];
    }
    frame.chunks(DATA_SIZE).collect()
}

/// Number of data slots in group `g` when `d` data chunks are split into
/// groups of `k`.
pub(crate) fn group_len(d: usize, k: usize, g: usize) -> usize {
    (d - g * k).min(k)
}

/// Solve `total = d + r*g` with `g = ceil(d/k)` for `(d, g)`.
///
/// The mapping from `d` to `total` is strictly increasing, so at most one
/// candidate fits; the scan bound mirrors the search space of the header
/// arithmetic.
pub(crate) fn solve_group_count(total: usize, r: usize, k: usize) -> Option<(usize, usize)> {
    for g in 1..=(total / (k + r) + 4) {
        if total <= r * g {
            break;
        }
        let d = total - r * g;
        if d.div_ceil(k) == g {
            return Some((d, g));
        }
    }
    None
}

/// Where a globally-numbered chunk id lands in the group layout.
pub(crate) enum Slot {
    /// (group, absolute data slot index)
    Data(usize, usize),
    /// (group, parity index within the group)
    Parity(usize, usize),
}

/// Map a global chunk id onto the per-group layout of the mid/high
/// schemes: each group is `group_len` data chunks followed by `r` parity
/// chunks.
pub(crate) fn locate_grouped(
    k: usize,
    r: usize,
    data_total: usize,
    groups: usize,
    id: usize,
) -> Option<Slot> {
    if groups == 0 {
        return (id < data_total).then_some(Slot::Data(0, id));
    }
    let stride = k + r;
    let g = (id / stride).min(groups - 1);
    let local = id.checked_sub(g * stride)?;
    let len = group_len(data_total, k, g);
    if local < len {
        Some(Slot::Data(g, g * k + local))
    } else if local < len + r {
        Some(Slot::Parity(g, local - len))
    } else {
        None
    }
}

/// Trim a FEC-recovered fragment: every data fragment except the frame's
/// final one is exactly `DATA_SIZE` by construction. The final fragment's
/// true length is unknown, so the zero-extended XOR length stands.
pub(crate) fn trim_recovered(mut bytes: Vec<u8>, slot: usize, data_total: usize) -> Vec<u8> {
    if slot + 1 < data_total && bytes.len() > DATA_SIZE {
        bytes.truncate(DATA_SIZE);
    }
    bytes
}

/// Insertion-ordered eviction shared by the per-frame assembly maps.
pub(crate) fn evict_to_cap<T>(
    frames: &mut HashMap<u32, T>,
    order: &mut VecDeque<u32>,
    cap: usize,
) {
    // Entries for completed frames linger in the order queue; purge them
    // before they accumulate.
    if order.len() > cap.saturating_mul(4) {
        order.retain(|id| frames.contains_key(id));
    }
    while frames.len() > cap {
        match order.pop_front() {
            Some(oldest) => {
                if frames.remove(&oldest).is_some() {
                    tracing::debug!("evicted stale partial frame {}", oldest);
                }
            }
            None => break,
        }
    }
}
