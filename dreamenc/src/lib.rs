// SPDX-FileCopyrightText: 2025 Contributors to the dreamsource project.
// SPDX-License-Identifier: Apache-2.0

//! # dreamenc - Dreambox hardware encoder capture
//!
//! Continuous, zero-copy capture of the compressed audio and video produced by
//! the Dreambox hardware encoders (`/dev/aencN`, `/dev/vencN`).
//!
//! ## Overview
//!
//! The encoder writes compressed frames into a payload ring and describes each
//! one with a fixed-size descriptor record delivered through `read()`. This
//! crate drains the device on a background thread, so the kernel never
//! overruns, and hands frames to a consumer that pulls at its own pace.
//!
//! ### Key Concepts
//!
//! - **Descriptor**: fixed-size record locating one frame in the ring ([`FrameDescriptor`])
//! - **Payload ring**: read-only mapping the encoder writes into ([`PayloadRing`])
//! - **Lease**: zero-copy view of a frame's bytes, tracked until dropped ([`RingLease`])
//! - **Origin**: pipeline time zero of a play epoch, shared between paired
//!   audio and video streams ([`OriginCell`], [`StreamRegistry`])
//!
//! ## Architecture
//!
//! ```text
//!            ┌──────────────── producer thread ────────────────┐
//! device ──► │ DeviceChannel ─► decode ─► TimestampReconciler  │
//!            │                        └─► MemoryTracker/wrap   │ ─► FrameQueue ─► pull()
//! control ─► │ poll(control, device, timeout)                  │
//!            └─────────────────────────────────────────────────┘
//! ```
//!
//! ## Example
//!
//! ```no_run
//! use dreamenc::{EncoderStream, StreamConfig, StreamRegistry};
//!
//! # fn main() -> Result<(), dreamenc::Error> {
//! let registry = StreamRegistry::new();
//! let audio = EncoderStream::with_registry(StreamConfig::audio(), &registry, "dreamaudiosource0")?;
//! let video = EncoderStream::with_registry(StreamConfig::video(), &registry, "dreamvideosource0")?;
//!
//! audio.start()?;
//! video.start()?;
//! audio.play()?;
//! video.play()?;
//!
//! let frame = video.pull()?;
//! println!("{} bytes, pts {:?}", frame.len(), frame.pts);
//! # Ok(())
//! # }
//! ```

mod config;
mod control;
mod descriptor;
mod device;
mod error;
mod frame;
mod memory;
mod peer;
mod producer;
mod queue;
mod stream;
mod timestamp;

pub use config::{
    DEFAULT_AUDIO_BITRATE, DEFAULT_BUFFER_SIZE, DEFAULT_POLL_TIMEOUT_MS, DEFAULT_VIDEO_BITRATE,
    InputMode, SUPPORTED_FRAMERATES, SUPPORTED_RESOLUTIONS, StreamConfig, StreamKind, VideoFormat,
};
pub use descriptor::{DescriptorClass, DescriptorFlags, FrameDescriptor, decode};
pub use device::{CharDevice, Command, DeviceChannel, EncoderDevice};
pub use error::{Error, Result};
pub use frame::Frame;
pub use memory::{LeaseId, LeaseTracker, MemoryTracker, PayloadRing, RingLease, Span, wrap};
pub use peer::{
    OriginQuery, PeerHandle, Registration, StreamRegistry, locate_peer, query_peer_origin,
};
pub use queue::FrameQueue;
pub use stream::EncoderStream;
pub use timestamp::{
    ClockCalibration, NSEC_PER_SEC, OriginCell, TimestampReconciler, scale, ticks_to_nanos,
};

pub use dreamenc_sys as sys;
