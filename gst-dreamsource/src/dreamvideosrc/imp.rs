//! Dream Video Source Implementation
//!
//! A live `PushSrc` over a [`Capture`] of `/dev/venc0`. Unlike the audio
//! element it takes part in caps negotiation: `caps()` narrows the template
//! by the `caps` property, `fixate()` prefers the configured or default
//! format and `set_caps()` programs the result into the encoder.

// SPDX-FileCopyrightText: 2025 Contributors to the dreamsource project.
// SPDX-License-Identifier: Apache-2.0

use gst::glib;
use gst::prelude::*;
use gst::subclass::prelude::*;
use gst_base::prelude::*;
use gst_base::subclass::base_src::CreateSuccess;
use gst_base::subclass::prelude::*;
use gstreamer as gst;
use gstreamer_base as gst_base;

use std::sync::LazyLock;
use std::sync::Mutex;
use std::sync::MutexGuard;
use std::sync::PoisonError;

use dreamenc::{
    Error, SUPPORTED_FRAMERATES, SUPPORTED_RESOLUTIONS, StreamKind, VideoFormat, sys,
};

use crate::common::{Capture, GET_BASE_PTS, InputMode, Settings, init_tracing};
use crate::dreamvideosrc;

const KIND: StreamKind = StreamKind::Video;

pub(crate) static CAT: LazyLock<gst::DebugCategory> = LazyLock::new(|| {
    gst::DebugCategory::new(
        "dreamvideosource",
        gst::DebugColorFlags::empty(),
        Some("Dreambox video encoder source"),
    )
});

struct VideoSettings {
    common: Settings,

    /// Value of the `caps` property.
    caps: Option<gst::Caps>,

    /// Last negotiated format, reapplied on the next start.
    video_format: Option<VideoFormat>,
}

pub struct DreamVideoSrc {
    settings: Mutex<VideoSettings>,
    capture: Capture,
}

impl Default for DreamVideoSrc {
    fn default() -> Self {
        DreamVideoSrc {
            settings: Mutex::new(VideoSettings {
                common: Settings::new(KIND),
                caps: None,
                video_format: None,
            }),
            capture: Capture::default(),
        }
    }
}

#[glib::object_subclass]
impl ObjectSubclass for DreamVideoSrc {
    const NAME: &'static str = "GstDreamVideoSource";
    type Type = dreamvideosrc::DreamVideoSrc;
    type ParentType = gst_base::PushSrc;
}

impl ObjectImpl for DreamVideoSrc {
    fn properties() -> &'static [glib::ParamSpec] {
        static PROPERTIES: LazyLock<Vec<glib::ParamSpec>> = LazyLock::new(|| {
            let bitrates = KIND.bitrate_range();
            vec![
                glib::ParamSpecInt::builder("bitrate")
                    .nick("Bitrate (kb/s)")
                    .blurb("Bitrate in kbit/sec")
                    .minimum(*bitrates.start() as i32)
                    .maximum(*bitrates.end() as i32)
                    .default_value(KIND.default_bitrate() as i32)
                    .mutable_playing()
                    .build(),
                glib::ParamSpecEnum::builder_with_default("input-mode", InputMode::Live)
                    .nick("Input mode")
                    .blurb("Source the encoder takes its input from")
                    .mutable_playing()
                    .build(),
                glib::ParamSpecBoxed::builder::<gst::Caps>("caps")
                    .nick("Caps")
                    .blurb("The caps for the source stream")
                    .mutable_playing()
                    .build(),
            ]
        });

        PROPERTIES.as_ref()
    }

    fn signals() -> &'static [glib::subclass::Signal] {
        static SIGNALS: LazyLock<Vec<glib::subclass::Signal>> = LazyLock::new(|| {
            vec![
                glib::subclass::Signal::builder(GET_BASE_PTS)
                    .return_type::<i64>()
                    .action()
                    .class_handler(|args| {
                        let pts = args
                            .first()
                            .and_then(|value| value.get::<dreamvideosrc::DreamVideoSrc>().ok())
                            .map_or(-1, |element| element.imp().base_pts());
                        Some(pts.to_value())
                    })
                    .build(),
            ]
        });

        SIGNALS.as_ref()
    }

    fn constructed(&self) {
        self.parent_constructed();
        init_tracing();

        let obj = self.obj();
        obj.set_live(true);
        obj.set_format(gst::Format::Time);
    }

    fn set_property(&self, _id: usize, value: &glib::Value, pspec: &glib::ParamSpec) {
        let mut settings = self.lock_settings();
        match pspec.name() {
            "bitrate" => {
                let Some(kbps) = value.get::<i32>().ok().and_then(|v| u32::try_from(v).ok())
                else {
                    gst::error!(CAT, imp = self, "Invalid value for bitrate property");
                    return;
                };
                match self.capture.set_bitrate(&mut settings.common, kbps) {
                    Ok(()) => gst::info!(CAT, imp = self, "Bitrate set to {} kbit/s", kbps),
                    Err(err) => gst::warning!(
                        CAT,
                        imp = self,
                        "Keeping {} kbit/s: {}",
                        settings.common.bitrate,
                        err
                    ),
                }
            }
            "input-mode" => {
                let Ok(mode) = value.get::<InputMode>() else {
                    gst::error!(CAT, imp = self, "Invalid value for input-mode property");
                    return;
                };
                if let Err(err) = self.capture.set_input_mode(&mut settings.common, mode.into()) {
                    gst::warning!(CAT, imp = self, "Input mode {:?} rejected: {}", mode, err);
                }
            }
            "caps" => {
                let Ok(caps) = value.get::<Option<gst::Caps>>() else {
                    gst::error!(CAT, imp = self, "Invalid value for caps property");
                    return;
                };
                gst::info!(CAT, imp = self, "Requested caps {:?}", caps);
                settings.caps = caps;
                drop(settings);
                // Renegotiate if already streaming.
                self.obj().src_pad().mark_reconfigure();
            }
            other => {
                gst::error!(CAT, imp = self, "Unknown property '{}'", other);
            }
        }
    }

    fn property(&self, _id: usize, pspec: &glib::ParamSpec) -> glib::Value {
        let settings = self.lock_settings();
        match pspec.name() {
            "bitrate" => (settings.common.bitrate as i32).to_value(),
            "input-mode" => {
                InputMode::from(settings.common.input_mode.unwrap_or_default()).to_value()
            }
            "caps" => settings.caps.to_value(),
            _ => {
                gst::error!(CAT, imp = self, "Unknown property {}", pspec.name());
                pspec.default_value().clone()
            }
        }
    }
}

impl GstObjectImpl for DreamVideoSrc {}

impl ElementImpl for DreamVideoSrc {
    fn metadata() -> Option<&'static gst::subclass::ElementMetadata> {
        static ELEMENT_METADATA: LazyLock<gst::subclass::ElementMetadata> = LazyLock::new(|| {
            gst::subclass::ElementMetadata::new(
                "Dream Video source",
                "Source/Video",
                "Provide an h.264 video elementary stream from Dreambox encoder device",
                "Contributors to the dreamsource project",
            )
        });

        Some(&*ELEMENT_METADATA)
    }

    fn pad_templates() -> &'static [gst::PadTemplate] {
        static PAD_TEMPLATES: LazyLock<Result<Vec<gst::PadTemplate>, glib::BoolError>> =
            LazyLock::new(|| {
                let src_pad_template = gst::PadTemplate::new(
                    "src",
                    gst::PadDirection::Src,
                    gst::PadPresence::Always,
                    &template_caps(),
                )?;

                Ok(vec![src_pad_template])
            });

        match PAD_TEMPLATES.as_ref() {
            Ok(templates) => templates,
            Err(err) => {
                gst::error!(CAT, "Failed to create src pad template: {:?}", err);
                &[]
            }
        }
    }

    fn change_state(
        &self,
        transition: gst::StateChange,
    ) -> Result<gst::StateChangeSuccess, gst::StateChangeError> {
        self.capture
            .change_state(self.obj().upcast_ref(), *CAT, transition)?;
        self.parent_change_state(transition)
    }
}

impl BaseSrcImpl for DreamVideoSrc {
    fn caps(&self, filter: Option<&gst::Caps>) -> Option<gst::Caps> {
        let template = self.obj().src_pad().pad_template_caps();
        let caps = match &self.lock_settings().caps {
            Some(requested) => template.intersect(requested),
            None => template,
        };

        Some(match filter {
            Some(filter) => filter.intersect_with_mode(&caps, gst::CapsIntersectMode::First),
            None => caps,
        })
    }

    fn fixate(&self, mut caps: gst::Caps) -> gst::Caps {
        let target = self.lock_settings().video_format.unwrap_or_default();
        {
            let caps = caps.make_mut();
            if let Some(s) = caps.structure_mut(0) {
                s.fixate_field_nearest_int("width", target.width as i32);
                s.fixate_field_nearest_int("height", target.height as i32);
                s.fixate_field_nearest_fraction(
                    "framerate",
                    gst::Fraction::new(target.framerate as i32, 1),
                );
            }
        }

        self.parent_fixate(caps)
    }

    fn set_caps(&self, caps: &gst::Caps) -> Result<(), gst::LoggableError> {
        let format = video_format_from_caps(caps)
            .map_err(|err| gst::loggable_error!(CAT, "Unsupported caps {}: {}", caps, err))?;

        let mut settings = self.lock_settings();
        if let Some(stream) = self.capture.stream() {
            stream.set_video_format(format).map_err(|err| {
                gst::loggable_error!(CAT, "Encoder rejected {:?}: {}", format, err)
            })?;
        }
        settings.video_format = Some(format);
        gst::info!(
            CAT,
            imp = self,
            "Negotiated {}x{} at {} fps",
            format.width,
            format.height,
            format.framerate
        );

        Ok(())
    }

    fn start(&self) -> Result<(), gst::ErrorMessage> {
        let config = {
            let settings = self.lock_settings();
            let mut config = settings.common.stream_config(KIND);
            config.video_format = settings.video_format;
            config
        };
        self.capture.open(self.obj().upcast_ref(), config)?;
        gst::info!(CAT, imp = self, "Started");

        Ok(())
    }

    fn stop(&self) -> Result<(), gst::ErrorMessage> {
        self.capture.close()?;
        gst::info!(CAT, imp = self, "Stopped");

        Ok(())
    }

    fn unlock(&self) -> Result<(), gst::ErrorMessage> {
        gst::debug!(CAT, imp = self, "Unlocking");
        self.capture.set_flushing(true);

        Ok(())
    }

    fn unlock_stop(&self) -> Result<(), gst::ErrorMessage> {
        gst::debug!(CAT, imp = self, "Unlock stop");
        self.capture.set_flushing(false);

        Ok(())
    }
}

impl PushSrcImpl for DreamVideoSrc {
    fn create(
        &self,
        _buffer: Option<&mut gst::BufferRef>,
    ) -> Result<CreateSuccess, gst::FlowError> {
        let buffer = self.capture.create(self.obj().upcast_ref(), *CAT)?;
        Ok(CreateSuccess::NewBuffer(buffer))
    }
}

impl DreamVideoSrc {
    fn lock_settings(&self) -> MutexGuard<'_, VideoSettings> {
        self.settings.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Handler of `get-base-pts`.
    fn base_pts(&self) -> i64 {
        let pts = self.capture.base_pts();
        gst::debug!(CAT, imp = self, "Base pts {}", pts);
        pts
    }
}

/// H.264 caps listing every resolution and frame rate the encoder supports.
fn template_caps() -> gst::Caps {
    gst::Caps::builder("video/x-h264")
        .field(
            "width",
            gst::List::new(SUPPORTED_RESOLUTIONS.iter().map(|(w, _, _)| *w as i32)),
        )
        .field(
            "height",
            gst::List::new(SUPPORTED_RESOLUTIONS.iter().map(|(_, h, _)| *h as i32)),
        )
        .field(
            "framerate",
            gst::List::new(
                SUPPORTED_FRAMERATES
                    .iter()
                    .map(|(fps, _)| gst::Fraction::new(*fps as i32, 1)),
            ),
        )
        .field("stream-format", "byte-stream")
        .field("profile", "main")
        .build()
}

/// Reads the encoder format out of fixed caps.
fn video_format_from_caps(caps: &gst::CapsRef) -> dreamenc::Result<VideoFormat> {
    let invalid = |what: &str| Error::InvalidArg(format!("Missing or invalid {what}"));
    let s = caps.structure(0).ok_or_else(|| invalid("structure"))?;
    let width = s
        .get::<i32>("width")
        .ok()
        .and_then(|v| u32::try_from(v).ok())
        .ok_or_else(|| invalid("width"))?;
    let height = s
        .get::<i32>("height")
        .ok()
        .and_then(|v| u32::try_from(v).ok())
        .ok_or_else(|| invalid("height"))?;
    let framerate = s
        .get::<gst::Fraction>("framerate")
        .map_err(|_| invalid("framerate"))?;
    let rational = sys::Rational {
        numerator: u64::try_from(framerate.numer()).map_err(|_| invalid("framerate"))?,
        denominator: u64::try_from(framerate.denom()).map_err(|_| invalid("framerate"))?,
    };

    VideoFormat::new(width, height, rational)
}
