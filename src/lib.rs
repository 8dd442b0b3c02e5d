//! framecast - loss-tolerant, low-latency video transport over UDP.
//!
//! One endpoint compresses frames (plain JPEG or the DXF0 differential
//! format), fragments them into small datagrams with XOR-parity FEC, and
//! transmits; the peer reassembles, recovers what the parity allows, and
//! decodes. There is no retransmission and no delivery guarantee: frames
//! that cannot be completed are dropped and the stream carries on.
//!
//! Typical embedding:
//! ```no_run
//! use framecast::{SenderConfig, VideoSender};
//!
//! let sender = VideoSender::start(SenderConfig::default())?;
//! // sender.send_frame(bgr_frame) from any capture source...
//! # anyhow::Ok(())
//! ```

pub mod codec;
pub mod config;
pub mod fec;
pub mod pipeline;
pub mod source;
pub mod wire;

pub use codec::BgrFrame;
pub use config::{DiffConfig, ReceiverConfig, SenderConfig};
pub use fec::FecScheme;
pub use pipeline::receiver::{DecodedFrame, ReceiverStats, VideoReceiver};
pub use pipeline::sender::{SenderStats, VideoSender};
