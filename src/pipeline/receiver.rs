//! Receiver pipeline: UDP -> reassemble -> decode -> latest-frame sink.
//!
//! Four workers joined by bounded lossy channels: the socket reader, the
//! FEC reassembler, the decoder (DXF0 or plain JPEG), and the sink that
//! keeps only the most recent decoded frame in a shared register for
//! external consumers (a display, an HTTP streamer). Every queue drops
//! when full; liveness beats completeness throughout.

use std::net::{SocketAddr, UdpSocket};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, SyncSender, TrySendError};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use anyhow::{Context, Result};

use crate::codec::decode::DiffDecoder;
use crate::codec::{jpeg, BgrFrame};
use crate::config::ReceiverConfig;
use crate::fec::{self, Reassembler};

use super::{lock_recovering, StopSignal};

/// Socket read timeout; the stop signal is re-checked at this cadence.
const SOCKET_TIMEOUT: Duration = Duration::from_millis(500);

/// Queue drain timeout for the in-process workers.
const QUEUE_TIMEOUT: Duration = Duration::from_millis(100);

/// Receive buffer, a little roomier than the largest datagram.
const RECV_BUF: usize = 2000;

/// A decoded frame as handed to the external consumer.
#[derive(Debug, Clone)]
pub struct DecodedFrame {
    pub frame_id: u32,
    pub frame: BgrFrame,
    /// Fragments restored by FEC while reassembling this frame.
    pub recovered: u32,
}

/// Counters published by the receiver workers.
#[derive(Debug, Default, Clone)]
pub struct ReceiverStats {
    pub packets_received: u64,
    pub packets_dropped: u64,
    pub frames_reassembled: u64,
    pub frames_dropped: u64,
    pub chunks_recovered: u64,
    pub decode_failures: u64,
    pub frames_decoded: u64,
    pub last_frame_id: Option<u32>,
}

/// A running receive pipeline. Poll [`VideoReceiver::latest_frame`] for
/// output.
pub struct VideoReceiver {
    stop: StopSignal,
    workers: Vec<JoinHandle<()>>,
    latest: Arc<Mutex<Option<DecodedFrame>>>,
    stats: Arc<Mutex<ReceiverStats>>,
    local_addr: SocketAddr,
}

impl VideoReceiver {
    /// Bind the socket and spawn the four workers.
    pub fn start(config: ReceiverConfig) -> Result<Self> {
        config.validate()?;

        let socket = UdpSocket::bind((config.bind_ip.as_str(), config.port))
            .with_context(|| format!("failed to bind {}:{}", config.bind_ip, config.port))?;
        socket
            .set_read_timeout(Some(SOCKET_TIMEOUT))
            .context("failed to set socket timeout")?;
        let local_addr = socket.local_addr().context("no local address")?;
        tracing::info!(
            "receiver listening on {} (fec: {}, diff: {})",
            local_addr,
            config.fec,
            config.diff
        );

        let stop = StopSignal::new();
        let stats = Arc::new(Mutex::new(ReceiverStats::default()));
        let latest: Arc<Mutex<Option<DecodedFrame>>> = Arc::new(Mutex::new(None));

        let (packet_tx, packet_rx) = mpsc::sync_channel::<Vec<u8>>(config.packet_queue);
        let (frame_tx, frame_rx) =
            mpsc::sync_channel::<(u32, Vec<u8>, u32)>(config.frame_queue);
        let (decoded_tx, decoded_rx) = mpsc::sync_channel::<DecodedFrame>(config.decoded_queue);

        let recv_worker = {
            let stop = stop.clone();
            let stats = stats.clone();
            thread::spawn(move || recv_loop(&socket, &packet_tx, &stop, &stats))
        };

        let reassemble_worker = {
            let stop = stop.clone();
            let stats = stats.clone();
            let reassembler = fec::make_reassembler(config.fec, config.fec_k);
            thread::spawn(move || reassemble_loop(&packet_rx, &frame_tx, &stop, reassembler, &stats))
        };

        let decode_worker = {
            let stop = stop.clone();
            let stats = stats.clone();
            let diff = config.diff;
            thread::spawn(move || decode_loop(&frame_rx, &decoded_tx, &stop, diff, &stats))
        };

        let sink_worker = {
            let stop = stop.clone();
            let latest = latest.clone();
            thread::spawn(move || sink_loop(&decoded_rx, &latest, &stop))
        };

        Ok(Self {
            stop,
            workers: vec![recv_worker, reassemble_worker, decode_worker, sink_worker],
            latest,
            stats,
            local_addr,
        })
    }

    /// The most recent decoded frame, if any has arrived yet.
    pub fn latest_frame(&self) -> Option<DecodedFrame> {
        lock_recovering(&self.latest).clone()
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn stats(&self) -> ReceiverStats {
        lock_recovering(&self.stats).clone()
    }

    /// Signal the workers and wait for them; every blocking point is
    /// bounded, so the join is too.
    pub fn stop(&mut self) {
        self.stop.stop();
        for worker in self.workers.drain(..) {
            let _ = worker.join();
        }
        let stats = self.stats();
        tracing::info!(
            "receiver stopped: {} packets ({} dropped), {} frames reassembled, {} decoded, {} chunks recovered",
            stats.packets_received,
            stats.packets_dropped,
            stats.frames_reassembled,
            stats.frames_decoded,
            stats.chunks_recovered
        );
    }
}

impl Drop for VideoReceiver {
    fn drop(&mut self) {
        self.stop.stop();
    }
}

fn recv_loop(
    socket: &UdpSocket,
    packet_tx: &SyncSender<Vec<u8>>,
    stop: &StopSignal,
    stats: &Mutex<ReceiverStats>,
) {
    let mut buf = [0u8; RECV_BUF];
    tracing::info!("receive loop started");

    while !stop.is_stopped() {
        match socket.recv_from(&mut buf) {
            Ok((len, _from)) => {
                lock_recovering(stats).packets_received += 1;
                match packet_tx.try_send(buf[..len].to_vec()) {
                    Ok(()) => {}
                    Err(TrySendError::Full(_)) => {
                        lock_recovering(stats).packets_dropped += 1;
                    }
                    Err(TrySendError::Disconnected(_)) => break,
                }
            }
            Err(e)
                if matches!(
                    e.kind(),
                    std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut
                ) =>
            {
                continue;
            }
            Err(e) => {
                // Socket closed or unrecoverable; exit cleanly.
                tracing::debug!("receive loop exiting: {:#}", e);
                break;
            }
        }
    }
}

fn reassemble_loop(
    packet_rx: &Receiver<Vec<u8>>,
    frame_tx: &SyncSender<(u32, Vec<u8>, u32)>,
    stop: &StopSignal,
    mut reassembler: Box<dyn Reassembler>,
    stats: &Mutex<ReceiverStats>,
) {
    tracing::info!("reassemble loop started");

    while !stop.is_stopped() {
        let packet = match packet_rx.recv_timeout(QUEUE_TIMEOUT) {
            Ok(packet) => packet,
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => break,
        };

        let Some((frame_id, bytes, recovered)) = reassembler.add_packet(&packet) else {
            continue;
        };

        {
            let mut s = lock_recovering(stats);
            s.frames_reassembled += 1;
            s.chunks_recovered += recovered as u64;
        }

        match frame_tx.try_send((frame_id, bytes, recovered)) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                lock_recovering(stats).frames_dropped += 1;
            }
            Err(TrySendError::Disconnected(_)) => break,
        }
    }
}

fn decode_loop(
    frame_rx: &Receiver<(u32, Vec<u8>, u32)>,
    decoded_tx: &SyncSender<DecodedFrame>,
    stop: &StopSignal,
    diff: bool,
    stats: &Mutex<ReceiverStats>,
) {
    let mut decoder = diff.then(DiffDecoder::new);
    tracing::info!("decode loop started (diff: {})", diff);

    while !stop.is_stopped() {
        let (frame_id, bytes, recovered) = match frame_rx.recv_timeout(QUEUE_TIMEOUT) {
            Ok(item) => item,
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => break,
        };

        let frame = match &mut decoder {
            Some(decoder) => match decoder.decode(&bytes) {
                Some(frame) => frame,
                None => {
                    // Missing reference or damaged envelope; skip.
                    tracing::trace!("dropped undecodable frame {}", frame_id);
                    lock_recovering(stats).decode_failures += 1;
                    continue;
                }
            },
            None => match jpeg::decode_jpeg(&bytes) {
                Ok(frame) => frame,
                Err(e) => {
                    tracing::debug!("JPEG decode failed for frame {}: {:#}", frame_id, e);
                    lock_recovering(stats).decode_failures += 1;
                    continue;
                }
            },
        };

        {
            let mut s = lock_recovering(stats);
            s.frames_decoded += 1;
            s.last_frame_id = Some(frame_id);
        }

        match decoded_tx.try_send(DecodedFrame {
            frame_id,
            frame,
            recovered,
        }) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                lock_recovering(stats).frames_dropped += 1;
            }
            Err(TrySendError::Disconnected(_)) => break,
        }
    }
}

fn sink_loop(
    decoded_rx: &Receiver<DecodedFrame>,
    latest: &Mutex<Option<DecodedFrame>>,
    stop: &StopSignal,
) {
    tracing::info!("sink loop started");

    while !stop.is_stopped() {
        let mut newest = match decoded_rx.recv_timeout(QUEUE_TIMEOUT) {
            Ok(frame) => frame,
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => break,
        };
        // Drain whatever queued up behind it; only the newest survives.
        while let Ok(frame) = decoded_rx.try_recv() {
            newest = frame;
        }
        *lock_recovering(latest) = Some(newest);
    }
}
