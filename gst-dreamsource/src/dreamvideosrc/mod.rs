//! Dream Video Source Element
//!
//! `dreamvideosource` reads the H.264 elementary stream produced by
//! `/dev/venc0` and pushes it as `video/x-h264, stream-format=byte-stream,
//! profile=main`.
//!
//! ## Properties
//! - `bitrate`: encoder bitrate in kbit/s (16..200000, default 2048)
//! - `input-mode`: encoder input (`live`, `hdmi-in`, `background`)
//! - `caps`: restricts the output caps; the negotiated resolution and frame
//!   rate are programmed into the encoder
//!
//! Resolutions are 720x576, 1280x720 and 1920x1080 at 25, 30, 50 or 60 fps.
//! Unconstrained caps fixate to 1280x720 at 25 fps.
//!
//! ## Signals
//! - `get-base-pts`: action signal returning the stream origin in
//!   nanoseconds, or -1 before the first frame of the current play epoch
//!
//! ## Example Pipeline
//! ```bash
//! gst-launch-1.0 dreamvideosource caps="video/x-h264,width=1920,height=1080" ! \
//!     h264parse ! matroskamux ! filesink location=out.mkv
//! ```

// SPDX-FileCopyrightText: 2025 Contributors to the dreamsource project.
// SPDX-License-Identifier: Apache-2.0

use gst::glib;
use gst::prelude::*;
use gstreamer as gst;
use gstreamer_base as gst_base;

/// Element implementation (properties, caps negotiation, lifecycle)
mod imp;

glib::wrapper! {
    pub struct DreamVideoSrc(ObjectSubclass<imp::DreamVideoSrc>) @extends gst_base::PushSrc, gst_base::BaseSrc, gst::Element, gst::Object;
}

/// Registers `dreamvideosource` with GStreamer.
pub fn register(plugin: &gst::Plugin) -> Result<(), glib::BoolError> {
    gst::Element::register(
        Some(plugin),
        "dreamvideosource",
        gst::Rank::NONE,
        DreamVideoSrc::static_type(),
    )
}
