// SPDX-FileCopyrightText: 2025 Contributors to the dreamsource project.
// SPDX-License-Identifier: Apache-2.0

//! Encoder parameters and start/stop commands.
//!
//! Parameters set before the device is open are kept and applied when it is
//! attached. Once attached, a change is sent to the device right away and only
//! recorded if the device accepts it.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::{
    Command, EncoderDevice, Error, InputMode, Result, StreamConfig, StreamKind, VideoFormat,
    config::check_bitrate,
};

pub(crate) struct EncoderControl {
    kind: StreamKind,
    device: Option<Arc<dyn EncoderDevice>>,
    bitrate: Option<u32>,
    input_mode: Option<InputMode>,
    video_format: Option<VideoFormat>,
    encoding: bool,
}

impl EncoderControl {
    pub(crate) fn new(config: &StreamConfig) -> Self {
        Self {
            kind: config.kind,
            device: None,
            bitrate: config.bitrate,
            input_mode: config.input_mode,
            video_format: config.video_format,
            encoding: false,
        }
    }

    /// Applies the pending parameters to a freshly opened device.
    ///
    /// The device is only kept if every parameter was accepted.
    pub(crate) fn attach(&mut self, device: Arc<dyn EncoderDevice>) -> Result<()> {
        let bitrate = self.bitrate();
        device.command(Command::SetBitrate(bitrate * 1000))?;
        if let Some(mode) = self.input_mode {
            device.command(Command::SetSource(mode))?;
        }
        if let Some(format) = &self.video_format {
            apply_video_format(device.as_ref(), format)?;
        }
        debug!(
            "Applied {bitrate} kbit/s, input {:?}, format {:?}",
            self.input_mode, self.video_format
        );
        self.device = Some(device);
        self.encoding = false;
        Ok(())
    }

    /// Stops encoding if needed and forgets the device.
    pub(crate) fn detach(&mut self) {
        if self.encoding
            && let Err(err) = self.stop_encoding()
        {
            warn!("Failed to stop encoder on close: {err}");
        }
        self.encoding = false;
        self.device = None;
    }

    pub(crate) fn start_encoding(&mut self) -> Result<()> {
        if self.encoding {
            return Ok(());
        }
        self.device()?.command(Command::Start)?;
        self.encoding = true;
        info!("Started {:?} encoder", self.kind);
        Ok(())
    }

    pub(crate) fn stop_encoding(&mut self) -> Result<()> {
        if !self.encoding {
            return Ok(());
        }
        self.device()?.command(Command::Stop)?;
        self.encoding = false;
        info!("Stopped {:?} encoder", self.kind);
        Ok(())
    }

    pub(crate) fn set_bitrate(&mut self, kbps: u32) -> Result<()> {
        check_bitrate(self.kind, kbps)?;
        if let Some(device) = &self.device {
            device.command(Command::SetBitrate(kbps * 1000))?;
        }
        self.bitrate = Some(kbps);
        Ok(())
    }

    pub(crate) fn set_input_mode(&mut self, mode: InputMode) -> Result<()> {
        if let Some(device) = &self.device {
            device.command(Command::SetSource(mode))?;
        }
        self.input_mode = Some(mode);
        Ok(())
    }

    pub(crate) fn set_video_format(&mut self, format: VideoFormat) -> Result<()> {
        if self.kind != StreamKind::Video {
            return Err(Error::InvalidArg(
                "Audio encoders have no video format".to_string(),
            ));
        }
        format.validate()?;
        if let Some(device) = &self.device {
            apply_video_format(device.as_ref(), &format)?;
        }
        self.video_format = Some(format);
        Ok(())
    }

    /// Requested bitrate in kbit/s, or the default for the stream kind.
    pub(crate) fn bitrate(&self) -> u32 {
        self.bitrate.unwrap_or_else(|| self.kind.default_bitrate())
    }

    pub(crate) fn input_mode(&self) -> InputMode {
        self.input_mode.unwrap_or_default()
    }

    pub(crate) fn video_format(&self) -> Option<VideoFormat> {
        self.video_format
    }

    pub(crate) fn is_encoding(&self) -> bool {
        self.encoding
    }

    fn device(&self) -> Result<&Arc<dyn EncoderDevice>> {
        self.device
            .as_ref()
            .ok_or_else(|| Error::InvalidArg("Encoder device is not open".to_string()))
    }
}

fn apply_video_format(device: &dyn EncoderDevice, format: &VideoFormat) -> Result<()> {
    device.command(Command::SetResolution(format.resolution_code()?))?;
    device.command(Command::SetFramerate(format.framerate_code()?))
}
