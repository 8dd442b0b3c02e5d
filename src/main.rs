//! framecast CLI - stream a test pattern or receive and decode frames.

use std::path::PathBuf;
use std::time::{Duration, Instant};

use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use framecast::source::TestPattern;
use framecast::{FecScheme, ReceiverConfig, SenderConfig, VideoReceiver, VideoSender};

#[derive(Parser)]
#[command(name = "framecast")]
#[command(about = "Loss-tolerant video transport over UDP", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Stream the synthetic test pattern to a receiver
    Send {
        /// TOML config file; flags below override its values
        #[arg(long)]
        config: Option<PathBuf>,

        #[arg(long)]
        server_ip: Option<String>,

        #[arg(long)]
        server_port: Option<u16>,

        #[arg(long)]
        width: Option<u16>,

        #[arg(long)]
        height: Option<u16>,

        #[arg(long)]
        fps: Option<f32>,

        #[arg(long)]
        jpeg_quality: Option<u8>,

        /// Differential coding: on or off
        #[arg(long)]
        diff: Option<String>,

        #[arg(long)]
        block: Option<u8>,

        /// Residual zero-out threshold
        #[arg(long)]
        threshold: Option<u8>,

        #[arg(long)]
        sad_skip_per_px: Option<f32>,

        #[arg(long)]
        scene_change_ratio: Option<f32>,

        #[arg(long)]
        jpeg_gate_ratio: Option<f32>,

        #[arg(long)]
        zlib_level: Option<u32>,

        /// Seconds between forced I-frames
        #[arg(long)]
        reset_interval: Option<f32>,

        /// FEC scheme: none, low, mid or high
        #[arg(long)]
        fec: Option<String>,

        #[arg(long)]
        fec_k: Option<usize>,

        /// Seconds to stream; 0 runs until killed
        #[arg(long, default_value = "0")]
        duration: u64,
    },

    /// Receive, decode and report frames
    Recv {
        /// TOML config file; flags below override its values
        #[arg(long)]
        config: Option<PathBuf>,

        #[arg(long)]
        bind_ip: Option<String>,

        #[arg(long)]
        port: Option<u16>,

        /// FEC scheme: none, low, mid or high
        #[arg(long)]
        fec: Option<String>,

        /// Differential decoding: on or off
        #[arg(long)]
        diff: Option<String>,

        /// Seconds to run; 0 runs until killed
        #[arg(long, default_value = "0")]
        duration: u64,
    },
}

fn parse_switch(value: &str) -> Result<bool> {
    match value {
        "on" => Ok(true),
        "off" => Ok(false),
        other => bail!("expected 'on' or 'off', got '{}'", other),
    }
}

fn parse_fec(value: &str) -> Result<FecScheme> {
    value.parse().map_err(anyhow::Error::msg)
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    match cli.command {
        Commands::Send {
            config,
            server_ip,
            server_port,
            width,
            height,
            fps,
            jpeg_quality,
            diff,
            block,
            threshold,
            sad_skip_per_px,
            scene_change_ratio,
            jpeg_gate_ratio,
            zlib_level,
            reset_interval,
            fec,
            fec_k,
            duration,
        } => {
            let mut cfg = match config {
                Some(path) => SenderConfig::load(&path)?,
                None => SenderConfig::default(),
            };
            if let Some(v) = server_ip {
                cfg.server_ip = v;
            }
            if let Some(v) = server_port {
                cfg.server_port = v;
            }
            if let Some(v) = width {
                cfg.width = v;
            }
            if let Some(v) = height {
                cfg.height = v;
            }
            if let Some(v) = fps {
                cfg.fps = v;
            }
            if let Some(v) = jpeg_quality {
                cfg.jpeg_quality = v;
            }
            if let Some(v) = diff.as_deref() {
                cfg.diff = parse_switch(v)?;
            }
            if let Some(v) = block {
                cfg.diff_params.block = v;
            }
            if let Some(v) = threshold {
                cfg.diff_params.threshold = v;
            }
            if let Some(v) = sad_skip_per_px {
                cfg.diff_params.sad_skip_per_px = v;
            }
            if let Some(v) = scene_change_ratio {
                cfg.diff_params.scene_change_ratio = v;
            }
            if let Some(v) = jpeg_gate_ratio {
                cfg.diff_params.jpeg_gate_ratio = v;
            }
            if let Some(v) = zlib_level {
                cfg.diff_params.zlib_level = v;
            }
            if let Some(v) = reset_interval {
                cfg.diff_params.reset_interval = v;
            }
            if let Some(v) = fec.as_deref() {
                cfg.fec = parse_fec(v)?;
            }
            if let Some(v) = fec_k {
                cfg.fec_k = v;
            }
            run_send(cfg, duration)
        }

        Commands::Recv {
            config,
            bind_ip,
            port,
            fec,
            diff,
            duration,
        } => {
            let mut cfg = match config {
                Some(path) => ReceiverConfig::load(&path)?,
                None => ReceiverConfig::default(),
            };
            if let Some(v) = bind_ip {
                cfg.bind_ip = v;
            }
            if let Some(v) = port {
                cfg.port = v;
            }
            if let Some(v) = fec.as_deref() {
                cfg.fec = parse_fec(v)?;
            }
            if let Some(v) = diff.as_deref() {
                cfg.diff = parse_switch(v)?;
            }
            run_recv(cfg, duration)
        }
    }
}

fn run_send(config: SenderConfig, duration: u64) -> Result<()> {
    let capture_interval = Duration::from_secs_f32(1.0 / config.fps.max(0.001));
    let mut source = TestPattern::new(config.width as u32, config.height as u32);

    let mut sender = VideoSender::start(config)?;
    let started = Instant::now();
    let mut last_report = Instant::now();

    loop {
        sender.send_frame(source.next_frame());
        std::thread::sleep(capture_interval);

        if last_report.elapsed() >= Duration::from_secs(5) {
            let stats = sender.stats();
            tracing::info!(
                "sent {} frames / {} packets ({} I-frames, {} send errors)",
                stats.frames_sent,
                stats.packets_sent,
                stats.i_frames,
                stats.send_errors
            );
            last_report = Instant::now();
        }
        if duration > 0 && started.elapsed() >= Duration::from_secs(duration) {
            break;
        }
    }

    sender.stop();
    Ok(())
}

fn run_recv(config: ReceiverConfig, duration: u64) -> Result<()> {
    let mut receiver = VideoReceiver::start(config)?;
    let started = Instant::now();

    loop {
        std::thread::sleep(Duration::from_secs(1));

        let stats = receiver.stats();
        match receiver.latest_frame() {
            Some(frame) => tracing::info!(
                "frame {}: {}x{} ({} recovered chunks; {} decoded, {} packets)",
                frame.frame_id,
                frame.frame.width,
                frame.frame.height,
                frame.recovered,
                stats.frames_decoded,
                stats.packets_received
            ),
            None => tracing::info!(
                "waiting for frames ({} packets received)",
                stats.packets_received
            ),
        }
        if duration > 0 && started.elapsed() >= Duration::from_secs(duration) {
            break;
        }
    }

    receiver.stop();
    Ok(())
}
