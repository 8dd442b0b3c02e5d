//! Sender pipeline: frame ring -> encode worker -> send worker -> UDP.
//!
//! External code pushes BGR frames into the ring at any rate; the encode
//! worker paces itself to the configured fps, always encodes the newest
//! capture, owns the frame id counter and the forced-I clock, and
//! publishes into a newest-wins slot. The send worker packetizes per the
//! FEC scheme and transmits; a send error abandons the rest of that
//! frame's fragments.

use std::net::{SocketAddr, ToSocketAddrs, UdpSocket};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};

use crate::codec::diff::DiffCodec;
use crate::codec::{dxf0, jpeg, BgrFrame};
use crate::config::SenderConfig;
use crate::fec;

use super::{lock_recovering, FrameRing, SingleSlot, StopSignal};

/// How many captured frames the ring keeps before dropping the oldest.
const RING_DEPTH: usize = 3;

/// Counters published by the sender workers.
#[derive(Debug, Default, Clone)]
pub struct SenderStats {
    pub frames_in: u64,
    pub frames_encoded: u64,
    pub i_frames: u64,
    pub frames_sent: u64,
    pub packets_sent: u64,
    pub encode_errors: u64,
    pub send_errors: u64,
}

/// A running send pipeline. Feed it frames with [`VideoSender::send_frame`].
pub struct VideoSender {
    ring: Arc<FrameRing>,
    stop: StopSignal,
    workers: Vec<JoinHandle<()>>,
    stats: Arc<Mutex<SenderStats>>,
}

impl VideoSender {
    /// Bind a socket and spawn the encode and send workers.
    pub fn start(config: SenderConfig) -> Result<Self> {
        config.validate()?;

        let remote: SocketAddr = format!("{}:{}", config.server_ip, config.server_port)
            .to_socket_addrs()
            .with_context(|| format!("invalid server address {}", config.server_ip))?
            .next()
            .context("server address resolved to nothing")?;
        let socket = UdpSocket::bind(("0.0.0.0", 0)).context("failed to bind UDP socket")?;
        tracing::info!(
            "sender bound to {}, remote {} (diff: {}, fec: {})",
            socket.local_addr().context("no local address")?,
            remote,
            config.diff,
            config.fec
        );

        let ring = Arc::new(FrameRing::new(RING_DEPTH));
        let slot: Arc<SingleSlot<(u32, Vec<u8>)>> = Arc::new(SingleSlot::new());
        let stop = StopSignal::new();
        let stats = Arc::new(Mutex::new(SenderStats::default()));

        let encode_worker = {
            let ring = ring.clone();
            let slot = slot.clone();
            let stop = stop.clone();
            let stats = stats.clone();
            let config = config.clone();
            thread::spawn(move || encode_loop(&ring, &slot, &stop, &config, &stats))
        };

        let send_worker = {
            let stop = stop.clone();
            let stats = stats.clone();
            let scheme = config.fec;
            let k = config.fec_k;
            thread::spawn(move || send_loop(&slot, &socket, remote, &stop, scheme, k, &stats))
        };

        Ok(Self {
            ring,
            stop,
            workers: vec![encode_worker, send_worker],
            stats,
        })
    }

    /// Queue a frame for encoding; the newest frames win under pressure.
    pub fn send_frame(&self, frame: BgrFrame) {
        lock_recovering(&self.stats).frames_in += 1;
        self.ring.push(frame);
    }

    pub fn stats(&self) -> SenderStats {
        lock_recovering(&self.stats).clone()
    }

    /// Signal the workers and wait for them; all their blocking points
    /// are bounded, so the join is too.
    pub fn stop(&mut self) {
        self.stop.stop();
        for worker in self.workers.drain(..) {
            let _ = worker.join();
        }
        let stats = self.stats();
        tracing::info!(
            "sender stopped: {} frames in, {} encoded ({} I), {} sent / {} packets",
            stats.frames_in,
            stats.frames_encoded,
            stats.i_frames,
            stats.frames_sent,
            stats.packets_sent
        );
    }
}

impl Drop for VideoSender {
    fn drop(&mut self) {
        self.stop.stop();
    }
}

fn encode_loop(
    ring: &FrameRing,
    slot: &SingleSlot<(u32, Vec<u8>)>,
    stop: &StopSignal,
    config: &SenderConfig,
    stats: &Mutex<SenderStats>,
) {
    let mut codec = config
        .diff
        .then(|| DiffCodec::new(config.diff_params.params()));
    let interval = Duration::from_secs_f32(1.0 / config.fps);
    let reset_interval = config.diff_params.reset_interval;

    let mut frame_id: u32 = 0;
    let mut last_i = Instant::now();
    let mut last_encode = Instant::now();

    tracing::info!("encode loop started ({} fps target)", config.fps);

    while !stop.is_stopped() {
        if ring.is_empty() {
            thread::sleep(Duration::from_millis(1));
            continue;
        }

        let since = last_encode.elapsed();
        if since < interval {
            thread::sleep(interval - since);
        }
        last_encode = Instant::now();

        // Re-read after pacing so the freshest capture is encoded.
        let Some(frame) = ring.latest() else { continue };

        let encoded = match &mut codec {
            Some(codec) => {
                let force_i =
                    should_force_i(frame_id, last_i.elapsed().as_secs_f32(), reset_interval);
                codec.encode_frame(&frame, force_i, config.jpeg_quality)
            }
            None => jpeg::encode_jpeg(&frame, config.jpeg_quality),
        };

        let bytes = match encoded {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::warn!("encode error on frame {}: {:#}", frame_id, e);
                lock_recovering(stats).encode_errors += 1;
                continue;
            }
        };

        let is_i = config.diff && dxf0::is_i_frame(&bytes);
        if is_i {
            last_i = Instant::now();
        }
        {
            let mut s = lock_recovering(stats);
            s.frames_encoded += 1;
            if is_i {
                s.i_frames += 1;
            }
        }

        slot.put((frame_id, bytes));
        frame_id = frame_id.wrapping_add(1);
    }
}

/// The stream opens on an I-frame, and one is forced whenever the reset
/// interval has elapsed since the last one.
fn should_force_i(frame_id: u32, since_last_i_secs: f32, reset_interval: f32) -> bool {
    frame_id == 0 || (reset_interval > 0.0 && since_last_i_secs >= reset_interval)
}

fn send_loop(
    slot: &SingleSlot<(u32, Vec<u8>)>,
    socket: &UdpSocket,
    remote: SocketAddr,
    stop: &StopSignal,
    scheme: fec::FecScheme,
    k: usize,
    stats: &Mutex<SenderStats>,
) {
    tracing::info!("send loop started ({} fec)", scheme);

    while !stop.is_stopped() {
        let Some((frame_id, bytes)) = slot.take_timeout(Duration::from_millis(100)) else {
            continue;
        };

        let packets = fec::packetize(scheme, frame_id, &bytes, k);
        let mut sent = 0u64;
        let mut failed = false;
        for packet in &packets {
            match socket.send_to(packet, remote) {
                Ok(_) => sent += 1,
                Err(e) => {
                    tracing::warn!(
                        "send error on frame {}, abandoning remaining fragments: {:#}",
                        frame_id,
                        e
                    );
                    failed = true;
                    break;
                }
            }
        }

        let mut s = lock_recovering(stats);
        s.packets_sent += sent;
        if failed {
            s.send_errors += 1;
        } else {
            s.frames_sent += 1;
        }
    }
}
