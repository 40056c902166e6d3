// SPDX-FileCopyrightText: 2025 Contributors to the dreamsource project.
// SPDX-License-Identifier: Apache-2.0

//! Error types for encoder capture.
//!
//! Device-level failures ([`Error::DeviceUnavailable`], [`Error::DeviceIoctlFailed`],
//! [`Error::ReadFailed`]) abort the stream. [`Error::QueueOverflow`] and stale
//! batches are recovered locally and only logged.

use std::path::PathBuf;

/// Convenience result type using [`Error`] as the error variant.
pub type Result<T> = core::result::Result<T, Error>;

/// Errors that can occur while capturing from an encoder device.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Opening or mapping the character device failed.
    #[error("Device {} unavailable: {source}", path.display())]
    DeviceUnavailable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The device rejected a configuration or start/stop command.
    #[error("Device command {command} failed: {source}")]
    DeviceIoctlFailed {
        command: &'static str,
        #[source]
        source: nix::Error,
    },

    /// A descriptor read failed or returned a partial record.
    #[error("Descriptor read failed: {0}")]
    ReadFailed(String),

    /// The driver reported that no more data will be delivered.
    #[error("End of stream")]
    Eos,

    /// The frame queue was full and the oldest frame was dropped.
    #[error("Frame queue overflow")]
    QueueOverflow,

    /// A required in-memory tracking structure could not be allocated.
    #[error("Allocation failed: {0}")]
    AllocationFailed(String),

    /// The stream is flushing or stopped.
    #[error("Flushing")]
    Flushing,

    /// An argument was out of range or unsupported by the device.
    #[error("Invalid argument: {0}")]
    InvalidArg(String),

    /// Any other I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Maps the result of a raw ioctl call to [`Error::DeviceIoctlFailed`].
    pub(crate) fn from_ioctl(command: &'static str, result: nix::Result<i32>) -> Result<()> {
        result
            .map(|_| ())
            .map_err(|source| Error::DeviceIoctlFailed { command, source })
    }
}
