//! Pieces shared by `dreamaudiosource` and `dreamvideosource`.
//!
//! Both elements own a [`Capture`], which holds the running
//! [`EncoderStream`] between `start()` and `stop()` and turns pulled frames
//! into GStreamer buffers.

// SPDX-FileCopyrightText: 2025 Contributors to the dreamsource project.
// SPDX-License-Identifier: Apache-2.0

use std::sync::{Arc, Mutex, PoisonError};

use dreamenc::{EncoderStream, Error, Frame, StreamConfig, StreamKind};
use gst::glib;
use gstreamer as gst;

/// Sibling lookup and origin queries over `get-base-pts`
mod sibling;

/// Action signal returning the stream origin in nanoseconds, or -1.
pub(crate) const GET_BASE_PTS: &str = "get-base-pts";

/// Encoder input selected through the `input-mode` property.
#[derive(Debug, Default, Eq, PartialEq, Ord, PartialOrd, Hash, Clone, Copy, glib::Enum)]
#[repr(u32)]
#[enum_type(name = "GstDreamSourceInputMode")]
pub enum InputMode {
    #[default]
    #[enum_value(name = "Live TV from the tuner", nick = "live")]
    Live = 0,

    #[enum_value(name = "HDMI input connector", nick = "hdmi-in")]
    HdmiIn = 1,

    #[enum_value(name = "Decoder background output", nick = "background")]
    Background = 2,
}

impl From<InputMode> for dreamenc::InputMode {
    fn from(mode: InputMode) -> Self {
        match mode {
            InputMode::Live => dreamenc::InputMode::Live,
            InputMode::HdmiIn => dreamenc::InputMode::HdmiIn,
            InputMode::Background => dreamenc::InputMode::Background,
        }
    }
}

impl From<dreamenc::InputMode> for InputMode {
    fn from(mode: dreamenc::InputMode) -> Self {
        match mode {
            dreamenc::InputMode::Live => InputMode::Live,
            dreamenc::InputMode::HdmiIn => InputMode::HdmiIn,
            dreamenc::InputMode::Background => InputMode::Background,
        }
    }
}

/// Properties common to both elements.
#[derive(Debug, Clone)]
pub(crate) struct Settings {
    /// Bitrate in kbit/s.
    pub bitrate: u32,

    /// `None` until the property is set, so the device keeps its own source.
    pub input_mode: Option<dreamenc::InputMode>,
}

impl Settings {
    pub(crate) fn new(kind: StreamKind) -> Self {
        Settings {
            bitrate: kind.default_bitrate(),
            input_mode: None,
        }
    }

    pub(crate) fn stream_config(&self, kind: StreamKind) -> StreamConfig {
        StreamConfig {
            kind,
            bitrate: Some(self.bitrate),
            input_mode: self.input_mode,
            ..StreamConfig::default()
        }
    }
}

/// The element's view of its encoder stream.
#[derive(Default)]
pub(crate) struct Capture {
    stream: Mutex<Option<Arc<EncoderStream>>>,
}

impl Capture {
    /// The running stream, if started.
    pub(crate) fn stream(&self) -> Option<Arc<EncoderStream>> {
        self.stream
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Opens the device, resolves the sibling element and starts the producer.
    pub(crate) fn open(
        &self,
        element: &gst::Element,
        config: StreamConfig,
    ) -> Result<Arc<EncoderStream>, gst::ErrorMessage> {
        let kind = config.kind;
        let stream = EncoderStream::new(config).map_err(|err| {
            gst::error_msg!(gst::ResourceError::Settings, ["Invalid configuration: {}", err])
        })?;
        stream.set_peer(sibling::locate(element, kind));
        stream.start().map_err(|err| match err {
            Error::DeviceUnavailable { .. } => {
                gst::error_msg!(gst::ResourceError::OpenReadWrite, ["{}", err])
            }
            _ => gst::error_msg!(gst::ResourceError::Settings, ["{}", err]),
        })?;

        let stream = Arc::new(stream);
        *self.stream.lock().unwrap_or_else(PoisonError::into_inner) = Some(stream.clone());
        Ok(stream)
    }

    /// Stops the producer and closes the device. Buffers already pushed
    /// downstream stay valid.
    pub(crate) fn close(&self) -> Result<(), gst::ErrorMessage> {
        // Taken out first so a sibling querying our origin never waits on the join.
        let stream = self
            .stream
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(stream) = stream {
            stream.stop().map_err(|err| {
                gst::error_msg!(gst::ResourceError::Close, ["Failed to stop encoder: {}", err])
            })?;
        }
        Ok(())
    }

    /// Current origin for `get-base-pts`.
    pub(crate) fn base_pts(&self) -> i64 {
        self.stream()
            .and_then(|stream| stream.origin())
            .and_then(|origin| i64::try_from(origin).ok())
            .unwrap_or(-1)
    }

    pub(crate) fn set_flushing(&self, flushing: bool) {
        if let Some(stream) = self.stream() {
            stream.set_flushing(flushing);
        }
    }

    /// Applies a bitrate, keeping the previous value if the device rejects it.
    pub(crate) fn set_bitrate(&self, settings: &mut Settings, kbps: u32) -> dreamenc::Result<()> {
        if let Some(stream) = self.stream() {
            stream.set_bitrate(kbps)?;
        }
        settings.bitrate = kbps;
        Ok(())
    }

    pub(crate) fn set_input_mode(
        &self,
        settings: &mut Settings,
        mode: dreamenc::InputMode,
    ) -> dreamenc::Result<()> {
        if let Some(stream) = self.stream() {
            stream.set_input_mode(mode)?;
        }
        settings.input_mode = Some(mode);
        Ok(())
    }

    /// Starts or stops encoding for PLAYING and PAUSED.
    pub(crate) fn change_state(
        &self,
        element: &gst::Element,
        cat: gst::DebugCategory,
        transition: gst::StateChange,
    ) -> Result<(), gst::StateChangeError> {
        let Some(stream) = self.stream() else {
            return Ok(());
        };
        match transition {
            gst::StateChange::PausedToPlaying => stream.play().map_err(|err| {
                gst::element_error!(
                    element,
                    gst::ResourceError::Failed,
                    ["Failed to start encoding: {}", err]
                );
                gst::StateChangeError
            }),
            gst::StateChange::PlayingToPaused => {
                if let Err(err) = stream.pause() {
                    gst::warning!(cat, obj = element, "Failed to stop encoding: {}", err);
                }
                Ok(())
            }
            _ => Ok(()),
        }
    }

    /// Blocks for the next frame and wraps it in a buffer.
    pub(crate) fn create(
        &self,
        element: &gst::Element,
        cat: gst::DebugCategory,
    ) -> Result<gst::Buffer, gst::FlowError> {
        let stream = self.stream().ok_or(gst::FlowError::Flushing)?;
        match stream.pull() {
            Ok(frame) => {
                gst::trace!(
                    cat,
                    obj = element,
                    "Frame of {} bytes, pts {:?}",
                    frame.len(),
                    frame.pts
                );
                frame_to_buffer(frame)
            }
            Err(Error::Flushing) => Err(gst::FlowError::Flushing),
            Err(Error::Eos) => {
                gst::info!(cat, obj = element, "Encoder reached end of stream");
                Err(gst::FlowError::Eos)
            }
            Err(err) => {
                gst::element_error!(
                    element,
                    gst::ResourceError::Read,
                    ["Encoder capture failed: {}", err]
                );
                Err(gst::FlowError::Error)
            }
        }
    }
}

/// Wraps a frame without copying. The ring lease is released when the buffer
/// memory is freed.
pub(crate) fn frame_to_buffer(frame: Frame) -> Result<gst::Buffer, gst::FlowError> {
    let pts = frame.pts.map(gst::ClockTime::from_nseconds);
    let dts = frame.dts.map(gst::ClockTime::from_nseconds);
    let (mut buffer, gap) = match frame.into_payload() {
        Some(lease) => (gst::Buffer::from_slice(lease), false),
        None => (gst::Buffer::new(), true),
    };
    {
        let buffer = buffer.get_mut().ok_or(gst::FlowError::Error)?;
        buffer.set_pts(pts);
        buffer.set_dts(dts);
        if gap {
            buffer.set_flags(gst::BufferFlags::GAP);
        }
    }
    Ok(buffer)
}

/// Installs a fmt subscriber for the core crate's `tracing` output.
pub(crate) fn init_tracing() {
    #[cfg(feature = "tracing")]
    {
        use tracing_subscriber::filter::LevelFilter;
        use tracing_subscriber::util::SubscriberInitExt;
        let _ = tracing_subscriber::fmt()
            .compact()
            .with_file(true)
            .with_line_number(true)
            .with_thread_ids(true)
            .with_target(false)
            .with_max_level(LevelFilter::TRACE)
            .with_ansi(true)
            .finish()
            .try_init();
    }
}
