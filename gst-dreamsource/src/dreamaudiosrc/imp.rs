//! Dream Audio Source Implementation
//!
//! A live `PushSrc` over a [`Capture`] of `/dev/aenc0`. The caps are fixed,
//! so the default negotiation is used.

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
use std::sync::PoisonError;

use dreamenc::StreamKind;

use crate::common::{Capture, GET_BASE_PTS, InputMode, Settings, init_tracing};
use crate::dreamaudiosrc;

const KIND: StreamKind = StreamKind::Audio;

pub(crate) static CAT: LazyLock<gst::DebugCategory> = LazyLock::new(|| {
    gst::DebugCategory::new(
        "dreamaudiosource",
        gst::DebugColorFlags::empty(),
        Some("Dreambox audio encoder source"),
    )
});

pub struct DreamAudioSrc {
    settings: Mutex<Settings>,
    capture: Capture,
}

impl Default for DreamAudioSrc {
    fn default() -> Self {
        DreamAudioSrc {
            settings: Mutex::new(Settings::new(KIND)),
            capture: Capture::default(),
        }
    }
}

#[glib::object_subclass]
impl ObjectSubclass for DreamAudioSrc {
    const NAME: &'static str = "GstDreamAudioSource";
    type Type = dreamaudiosrc::DreamAudioSrc;
    type ParentType = gst_base::PushSrc;
}

impl ObjectImpl for DreamAudioSrc {
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
                            .and_then(|value| value.get::<dreamaudiosrc::DreamAudioSrc>().ok())
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
        let mut settings = self.settings.lock().unwrap_or_else(PoisonError::into_inner);
        match pspec.name() {
            "bitrate" => {
                let Some(kbps) = value.get::<i32>().ok().and_then(|v| u32::try_from(v).ok())
                else {
                    gst::error!(CAT, imp = self, "Invalid value for bitrate property");
                    return;
                };
                match self.capture.set_bitrate(&mut settings, kbps) {
                    Ok(()) => gst::info!(CAT, imp = self, "Bitrate set to {} kbit/s", kbps),
                    Err(err) => gst::warning!(
                        CAT,
                        imp = self,
                        "Keeping {} kbit/s: {}",
                        settings.bitrate,
                        err
                    ),
                }
            }
            "input-mode" => {
                let Ok(mode) = value.get::<InputMode>() else {
                    gst::error!(CAT, imp = self, "Invalid value for input-mode property");
                    return;
                };
                if let Err(err) = self.capture.set_input_mode(&mut settings, mode.into()) {
                    gst::warning!(CAT, imp = self, "Input mode {:?} rejected: {}", mode, err);
                }
            }
            other => {
                gst::error!(CAT, imp = self, "Unknown property '{}'", other);
            }
        }
    }

    fn property(&self, _id: usize, pspec: &glib::ParamSpec) -> glib::Value {
        let settings = self.settings.lock().unwrap_or_else(PoisonError::into_inner);
        match pspec.name() {
            "bitrate" => (settings.bitrate as i32).to_value(),
            "input-mode" => InputMode::from(settings.input_mode.unwrap_or_default()).to_value(),
            _ => {
                gst::error!(CAT, imp = self, "Unknown property {}", pspec.name());
                pspec.default_value().clone()
            }
        }
    }
}

impl GstObjectImpl for DreamAudioSrc {}

impl ElementImpl for DreamAudioSrc {
    fn metadata() -> Option<&'static gst::subclass::ElementMetadata> {
        static ELEMENT_METADATA: LazyLock<gst::subclass::ElementMetadata> = LazyLock::new(|| {
            gst::subclass::ElementMetadata::new(
                "Dream Audio source",
                "Source/Audio",
                "Provide an audio elementary stream from Dreambox encoder device",
                "Contributors to the dreamsource project",
            )
        });

        Some(&*ELEMENT_METADATA)
    }

    fn pad_templates() -> &'static [gst::PadTemplate] {
        static PAD_TEMPLATES: LazyLock<Result<Vec<gst::PadTemplate>, glib::BoolError>> =
            LazyLock::new(|| {
                let caps = gst::Caps::builder("audio/mpeg")
                    .field("mpegversion", 4i32)
                    .field("stream-format", "adts")
                    .build();
                let src_pad_template = gst::PadTemplate::new(
                    "src",
                    gst::PadDirection::Src,
                    gst::PadPresence::Always,
                    &caps,
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

impl BaseSrcImpl for DreamAudioSrc {
    fn start(&self) -> Result<(), gst::ErrorMessage> {
        let config = self
            .settings
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .stream_config(KIND);
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

impl PushSrcImpl for DreamAudioSrc {
    fn create(
        &self,
        _buffer: Option<&mut gst::BufferRef>,
    ) -> Result<CreateSuccess, gst::FlowError> {
        let buffer = self.capture.create(self.obj().upcast_ref(), *CAT)?;
        Ok(CreateSuccess::NewBuffer(buffer))
    }
}

impl DreamAudioSrc {
    /// Handler of `get-base-pts`.
    fn base_pts(&self) -> i64 {
        let pts = self.capture.base_pts();
        gst::debug!(CAT, imp = self, "Base pts {}", pts);
        pts
    }
}
