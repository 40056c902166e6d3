// SPDX-FileCopyrightText: 2025 Contributors to the dreamsource project.
// SPDX-License-Identifier: Apache-2.0

//! Stream configuration.
//!
//! [`StreamConfig`] collects everything a stream needs before it opens the
//! device: which encoder, where its device node lives, the requested encoder
//! parameters and the queue/poll tuning. It can be built in code or loaded from
//! JSON.

use std::{ops::RangeInclusive, path::PathBuf, time::Duration};

use dreamenc_sys as sys;
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Default frame queue capacity.
pub const DEFAULT_BUFFER_SIZE: usize = 16;

/// Default producer poll timeout in milliseconds.
pub const DEFAULT_POLL_TIMEOUT_MS: u64 = 200;

/// Default audio bitrate in kbit/s.
pub const DEFAULT_AUDIO_BITRATE: u32 = 128;

/// Default video bitrate in kbit/s.
pub const DEFAULT_VIDEO_BITRATE: u32 = 2048;

/// Which hardware encoder a stream drains.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamKind {
    #[default]
    Audio,
    Video,
}

impl StreamKind {
    pub fn device_prefix(self) -> &'static str {
        match self {
            StreamKind::Audio => sys::audio::DEVICE_PREFIX,
            StreamKind::Video => sys::video::DEVICE_PREFIX,
        }
    }

    /// Device node of encoder `index`, e.g. `/dev/aenc0`.
    pub fn device_path(self, index: u32) -> PathBuf {
        PathBuf::from(format!("{}{}", self.device_prefix(), index))
    }

    /// Size of one descriptor record.
    pub fn record_size(self) -> usize {
        match self {
            StreamKind::Audio => sys::audio::RECORD_SIZE,
            StreamKind::Video => sys::video::RECORD_SIZE,
        }
    }

    pub fn read_buffer_size(self) -> usize {
        match self {
            StreamKind::Audio => sys::audio::READ_BUFFER_SIZE,
            StreamKind::Video => sys::video::READ_BUFFER_SIZE,
        }
    }

    /// Size of the mapped payload ring.
    pub fn ring_size(self) -> usize {
        match self {
            StreamKind::Audio => sys::audio::MMAP_SIZE,
            StreamKind::Video => sys::video::MMAP_SIZE,
        }
    }

    pub fn default_bitrate(self) -> u32 {
        match self {
            StreamKind::Audio => DEFAULT_AUDIO_BITRATE,
            StreamKind::Video => DEFAULT_VIDEO_BITRATE,
        }
    }

    /// Accepted bitrates in kbit/s.
    pub fn bitrate_range(self) -> RangeInclusive<u32> {
        match self {
            StreamKind::Audio => 16..=320,
            StreamKind::Video => 16..=200_000,
        }
    }

    /// Name under which the first stream of this kind is registered.
    pub fn well_known_name(self) -> &'static str {
        match self {
            StreamKind::Audio => "dreamaudiosource0",
            StreamKind::Video => "dreamvideosource0",
        }
    }

    /// The stream kind this one pairs with for origin sharing.
    pub fn peer(self) -> StreamKind {
        match self {
            StreamKind::Audio => StreamKind::Video,
            StreamKind::Video => StreamKind::Audio,
        }
    }
}

/// Encoder input source.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum InputMode {
    /// Live TV from the tuner.
    #[default]
    Live,
    /// The HDMI input connector.
    HdmiIn,
    /// The decoder's background output.
    Background,
}

impl InputMode {
    pub(crate) fn device_code(self) -> u32 {
        match self {
            InputMode::Live => sys::ENC_SOURCE_LIVE,
            InputMode::HdmiIn => sys::ENC_SOURCE_HDMI_IN,
            InputMode::Background => sys::ENC_SOURCE_BACKGROUND,
        }
    }
}

/// Resolutions the video encoder accepts, as `(width, height, device code)`.
pub const SUPPORTED_RESOLUTIONS: [(u32, u32, u32); 3] = [
    (720, 576, sys::video::FMT_720X576),
    (1280, 720, sys::video::FMT_1280X720),
    (1920, 1080, sys::video::FMT_1920X1080),
];

/// Frame rates the video encoder accepts, as `(fps, device code)`.
pub const SUPPORTED_FRAMERATES: [(u32, u32); 4] = [
    (25, sys::video::RATE_25),
    (30, sys::video::RATE_30),
    (50, sys::video::RATE_50),
    (60, sys::video::RATE_60),
];

/// Output geometry and frame rate of the video encoder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VideoFormat {
    pub width: u32,
    pub height: u32,
    /// Frames per second.
    pub framerate: u32,
}

impl Default for VideoFormat {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 720,
            framerate: 25,
        }
    }
}

impl VideoFormat {
    /// Builds a format from a width, height and frame rate fraction.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArg`] if the frame rate is not a whole number of
    /// frames per second or the combination is not supported by the encoder.
    pub fn new(width: u32, height: u32, framerate: sys::Rational) -> Result<Self> {
        if framerate.denominator == 0 || framerate.numerator % framerate.denominator != 0 {
            return Err(Error::InvalidArg(format!(
                "Unsupported frame rate {}/{}",
                framerate.numerator, framerate.denominator
            )));
        }
        let fps = u32::try_from(framerate.numerator / framerate.denominator)
            .map_err(|_| Error::InvalidArg("Frame rate out of range".to_string()))?;
        let format = Self {
            width,
            height,
            framerate: fps,
        };
        format.validate()?;
        Ok(format)
    }

    pub fn validate(&self) -> Result<()> {
        self.resolution_code()?;
        self.framerate_code()?;
        Ok(())
    }

    pub(crate) fn resolution_code(&self) -> Result<u32> {
        SUPPORTED_RESOLUTIONS
            .iter()
            .find(|(w, h, _)| *w == self.width && *h == self.height)
            .map(|(_, _, code)| *code)
            .ok_or_else(|| {
                Error::InvalidArg(format!(
                    "Unsupported resolution {}x{}",
                    self.width, self.height
                ))
            })
    }

    pub(crate) fn framerate_code(&self) -> Result<u32> {
        SUPPORTED_FRAMERATES
            .iter()
            .find(|(fps, _)| *fps == self.framerate)
            .map(|(_, code)| *code)
            .ok_or_else(|| {
                Error::InvalidArg(format!("Unsupported frame rate {} fps", self.framerate))
            })
    }
}

/// Configuration of one capture stream.
///
/// Missing JSON fields take their defaults, so `{"kind": "video"}` is a valid
/// configuration for `/dev/venc0`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    pub kind: StreamKind,
    /// Encoder index, selects `/dev/aencN` or `/dev/vencN`.
    pub device_index: u32,
    /// Overrides the device node derived from `kind` and `device_index`.
    pub device_path: Option<PathBuf>,
    /// Requested bitrate in kbit/s. The kind's default is applied when unset.
    pub bitrate: Option<u32>,
    pub input_mode: Option<InputMode>,
    /// Video only.
    pub video_format: Option<VideoFormat>,
    /// Frame queue capacity.
    pub buffer_size: usize,
    pub poll_timeout_ms: u64,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            kind: StreamKind::default(),
            device_index: 0,
            device_path: None,
            bitrate: None,
            input_mode: None,
            video_format: None,
            buffer_size: DEFAULT_BUFFER_SIZE,
            poll_timeout_ms: DEFAULT_POLL_TIMEOUT_MS,
        }
    }
}

impl StreamConfig {
    pub fn audio() -> Self {
        Self {
            kind: StreamKind::Audio,
            ..Default::default()
        }
    }

    pub fn video() -> Self {
        Self {
            kind: StreamKind::Video,
            ..Default::default()
        }
    }

    /// Parses and validates a JSON configuration.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| Error::InvalidArg(format!("Invalid stream configuration: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self)
            .map_err(|e| Error::InvalidArg(format!("Cannot serialize configuration: {e}")))
    }

    /// Checks the requested parameters against what the encoder accepts.
    pub fn validate(&self) -> Result<()> {
        if self.buffer_size == 0 {
            return Err(Error::InvalidArg(
                "buffer_size must be at least 1".to_string(),
            ));
        }
        if let Some(bitrate) = self.bitrate {
            check_bitrate(self.kind, bitrate)?;
        }
        if let Some(format) = &self.video_format {
            if self.kind != StreamKind::Video {
                return Err(Error::InvalidArg(
                    "video_format is only valid for video streams".to_string(),
                ));
            }
            format.validate()?;
        }
        Ok(())
    }

    /// The device node to open.
    pub fn resolved_device_path(&self) -> PathBuf {
        self.device_path
            .clone()
            .unwrap_or_else(|| self.kind.device_path(self.device_index))
    }

    pub fn poll_timeout(&self) -> Duration {
        Duration::from_millis(self.poll_timeout_ms)
    }
}

pub(crate) fn check_bitrate(kind: StreamKind, kbps: u32) -> Result<()> {
    let range = kind.bitrate_range();
    if range.contains(&kbps) {
        Ok(())
    } else {
        Err(Error::InvalidArg(format!(
            "Bitrate {kbps} kbit/s outside {}..={}",
            range.start(),
            range.end()
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn device_paths_follow_the_kind() {
        assert_eq!(
            StreamKind::Audio.device_path(0),
            PathBuf::from("/dev/aenc0")
        );
        assert_eq!(
            StreamConfig::video().resolved_device_path(),
            PathBuf::from("/dev/venc0")
        );

        let config = StreamConfig {
            device_path: Some("/tmp/fake".into()),
            ..StreamConfig::audio()
        };
        assert_eq!(config.resolved_device_path(), PathBuf::from("/tmp/fake"));
    }

    #[test]
    fn json_fills_in_defaults() {
        let config = StreamConfig::from_json(
            r#"{"kind": "video", "bitrate": 4000, "input_mode": "hdmi-in",
                "video_format": {"width": 1920, "height": 1080, "framerate": 50}}"#,
        )
        .unwrap();
        assert_eq!(config.kind, StreamKind::Video);
        assert_eq!(config.bitrate, Some(4000));
        assert_eq!(config.input_mode, Some(InputMode::HdmiIn));
        assert_eq!(config.buffer_size, DEFAULT_BUFFER_SIZE);
        assert_eq!(config.poll_timeout(), Duration::from_millis(200));
        assert_eq!(config.video_format.unwrap().resolution_code().unwrap(), 2);
    }

    #[test]
    fn json_rejects_out_of_range_values() {
        assert!(matches!(
            StreamConfig::from_json(r#"{"kind": "audio", "bitrate": 500}"#),
            Err(Error::InvalidArg(_))
        ));
        assert!(matches!(
            StreamConfig::from_json(
                r#"{"kind": "video", "video_format": {"width": 800, "height": 600, "framerate": 25}}"#
            ),
            Err(Error::InvalidArg(_))
        ));
        assert!(matches!(
            StreamConfig::from_json(r#"{"kind": "audio", "buffer_size": 0}"#),
            Err(Error::InvalidArg(_))
        ));
        assert!(StreamConfig::from_json("not json").is_err());
    }

    #[test]
    fn video_format_from_fraction() {
        let format = VideoFormat::new(
            720,
            576,
            sys::Rational {
                numerator: 50,
                denominator: 1,
            },
        )
        .unwrap();
        assert_eq!(format.framerate, 50);
        assert_eq!(format.framerate_code().unwrap(), sys::video::RATE_50);

        let ntsc = sys::Rational {
            numerator: 30000,
            denominator: 1001,
        };
        assert!(VideoFormat::new(1280, 720, ntsc).is_err());
    }

    #[test]
    fn config_round_trips_through_json() {
        let config = StreamConfig {
            bitrate: Some(256),
            input_mode: Some(InputMode::Background),
            ..StreamConfig::audio()
        };
        let parsed = StreamConfig::from_json(&config.to_json().unwrap()).unwrap();
        assert_eq!(parsed, config);
    }
}
