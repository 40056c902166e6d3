//! GStreamer plugin for the Dreambox hardware encoders
//!
//! Two live source elements expose the compressed output of the set-top box
//! encoders to GStreamer pipelines:
//!
//! - **dreamaudiosource**: AAC in ADTS framing from `/dev/aencN`
//! - **dreamvideosource**: H.264 byte-stream from `/dev/vencN`
//!
//! Capture itself lives in the `dreamenc` crate. The elements map properties,
//! caps and state changes onto an [`dreamenc::EncoderStream`] and hand its
//! frames downstream without copying.
//!
//! ## Pairing
//! When both elements run in one pipeline under their default names
//! (`dreamaudiosource0`, `dreamvideosource0`) they find each other at start
//! and share one timestamp origin through the `get-base-pts` action signal,
//! keeping audio and video in sync.
//!
//! ```bash
//! gst-launch-1.0 dreamvideosource ! h264parse ! mux. \
//!     dreamaudiosource ! aacparse ! mux. mpegtsmux name=mux ! filesink location=out.ts
//! ```

// SPDX-FileCopyrightText: 2025 Contributors to the dreamsource project.
// SPDX-License-Identifier: Apache-2.0

#![allow(clippy::non_send_fields_in_send_ty, unused_doc_comments)]

use gst::glib;
use gstreamer as gst;

/// Helpers shared by both elements (settings, buffers, sibling lookup)
mod common;

/// Audio encoder source element
pub mod dreamaudiosrc;

/// Video encoder source element
pub mod dreamvideosrc;

pub use common::InputMode;

/// Registers both elements with GStreamer.
fn plugin_init(plugin: &gst::Plugin) -> Result<(), glib::BoolError> {
    dreamaudiosrc::register(plugin)?;
    dreamvideosrc::register(plugin)?;

    Ok(())
}

gst::plugin_define!(
    dreamsource,
    env!("CARGO_PKG_DESCRIPTION"),
    plugin_init,
    concat!(env!("CARGO_PKG_VERSION"), "-", env!("COMMIT_ID")),
    "Apache-2.0",
    env!("CARGO_PKG_NAME"),
    env!("CARGO_PKG_NAME"),
    env!("CARGO_PKG_REPOSITORY"),
    env!("BUILD_REL_DATE")
);
