//! Sender/receiver configuration: defaults, validation, TOML loading.
//!
//! Every field can come from a TOML file (missing fields fall back to the
//! defaults below) and is overridable by CLI flags in the binary.

use std::fs;
use std::path::Path;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};

use crate::codec::diff::DiffParams;
use crate::fec::{FecScheme, DEFAULT_GROUP_SIZE};

/// Differential-codec tuning, mirrored into [`DiffParams`] plus the
/// encode-worker owned reset interval.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DiffConfig {
    pub block: u8,
    pub threshold: u8,
    pub sad_skip_per_px: f32,
    pub scene_change_ratio: f32,
    pub jpeg_gate_ratio: f32,
    pub zlib_level: u32,
    /// Maximum seconds between forced I-frames.
    pub reset_interval: f32,
}

impl Default for DiffConfig {
    fn default() -> Self {
        Self {
            block: 16,
            threshold: 5,
            sad_skip_per_px: 1.5,
            scene_change_ratio: 0.25,
            jpeg_gate_ratio: 0.70,
            zlib_level: 6,
            reset_interval: 1.0,
        }
    }
}

impl DiffConfig {
    pub fn params(&self) -> DiffParams {
        DiffParams {
            block: self.block,
            threshold: self.threshold,
            sad_skip_per_px: self.sad_skip_per_px,
            scene_change_ratio: self.scene_change_ratio,
            jpeg_gate_ratio: self.jpeg_gate_ratio,
            zlib_level: self.zlib_level,
        }
    }

    fn validate(&self) -> Result<()> {
        if self.block == 0 {
            bail!("diff.block must be > 0");
        }
        if self.threshold == 0 {
            bail!("diff.threshold must be > 0");
        }
        if self.sad_skip_per_px <= 0.0 {
            bail!("diff.sad_skip_per_px must be > 0");
        }
        if !(0.0..=1.0).contains(&self.scene_change_ratio) {
            bail!("diff.scene_change_ratio must be within 0..=1");
        }
        if !(0.0..=1.0).contains(&self.jpeg_gate_ratio) {
            bail!("diff.jpeg_gate_ratio must be within 0..=1");
        }
        if self.zlib_level > 9 {
            bail!("diff.zlib_level must be within 0..=9");
        }
        if self.reset_interval < 0.0 {
            bail!("diff.reset_interval must be >= 0");
        }
        Ok(())
    }
}

/// Sender-side configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SenderConfig {
    pub server_ip: String,
    pub server_port: u16,
    /// Source resolution (used by the built-in test pattern source).
    pub width: u16,
    pub height: u16,
    pub fps: f32,
    pub jpeg_quality: u8,
    /// Differential coding on/off; off sends plain JPEG frames.
    pub diff: bool,
    pub diff_params: DiffConfig,
    pub fec: FecScheme,
    pub fec_k: usize,
}

impl Default for SenderConfig {
    fn default() -> Self {
        Self {
            server_ip: "127.0.0.1".to_string(),
            server_port: 5000,
            width: 640,
            height: 480,
            fps: 25.0,
            jpeg_quality: 70,
            diff: false,
            diff_params: DiffConfig::default(),
            fec: FecScheme::None,
            fec_k: DEFAULT_GROUP_SIZE,
        }
    }
}

impl SenderConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        toml::from_str(&content).context("failed to parse sender config")
    }

    pub fn validate(&self) -> Result<()> {
        if self.fps <= 0.0 {
            bail!("fps must be > 0");
        }
        if self.jpeg_quality == 0 || self.jpeg_quality > 100 {
            bail!("jpeg_quality must be within 1..=100");
        }
        if self.fec_k == 0 {
            bail!("fec_k must be > 0");
        }
        if self.diff {
            self.diff_params.validate()?;
        }
        Ok(())
    }
}

/// Receiver-side configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ReceiverConfig {
    pub bind_ip: String,
    pub port: u16,
    pub fec: FecScheme,
    /// Must match the sender: DXF0 decoding on, or plain JPEG off.
    pub diff: bool,
    pub fec_k: usize,
    pub packet_queue: usize,
    pub frame_queue: usize,
    pub decoded_queue: usize,
}

impl Default for ReceiverConfig {
    fn default() -> Self {
        Self {
            bind_ip: "0.0.0.0".to_string(),
            port: 5000,
            fec: FecScheme::None,
            diff: false,
            fec_k: DEFAULT_GROUP_SIZE,
            packet_queue: 1000,
            frame_queue: 120,
            decoded_queue: 120,
        }
    }
}

impl ReceiverConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        toml::from_str(&content).context("failed to parse receiver config")
    }

    pub fn validate(&self) -> Result<()> {
        if self.fec_k == 0 {
            bail!("fec_k must be > 0");
        }
        if self.packet_queue == 0 || self.frame_queue == 0 || self.decoded_queue == 0 {
            bail!("queue capacities must be > 0");
        }
        Ok(())
    }
}
