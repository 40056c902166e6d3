//! Dream Audio Source Element
//!
//! `dreamaudiosource` reads the AAC elementary stream produced by
//! `/dev/aenc0` and pushes it as `audio/mpeg, mpegversion=4,
//! stream-format=adts`.
//!
//! ## Properties
//! - `bitrate`: encoder bitrate in kbit/s (16..320, default 128)
//! - `input-mode`: encoder input (`live`, `hdmi-in`, `background`)
//!
//! ## Signals
//! - `get-base-pts`: action signal returning the stream origin in
//!   nanoseconds, or -1 before the first frame of the current play epoch
//!
//! ## Example Pipeline
//! ```bash
//! gst-launch-1.0 dreamaudiosource bitrate=192 ! aacparse ! filesink location=out.aac
//! ```

// SPDX-FileCopyrightText: 2025 Contributors to the dreamsource project.
// SPDX-License-Identifier: Apache-2.0

use gst::glib;
use gst::prelude::*;
use gstreamer as gst;
use gstreamer_base as gst_base;

/// Element implementation (properties, caps, lifecycle)
mod imp;

glib::wrapper! {
    pub struct DreamAudioSrc(ObjectSubclass<imp::DreamAudioSrc>) @extends gst_base::PushSrc, gst_base::BaseSrc, gst::Element, gst::Object;
}

/// Registers `dreamaudiosource` with GStreamer.
pub fn register(plugin: &gst::Plugin) -> Result<(), glib::BoolError> {
    gst::Element::register(
        Some(plugin),
        "dreamaudiosource",
        gst::Rank::NONE,
        DreamAudioSrc::static_type(),
    )
}
