// SPDX-FileCopyrightText: 2025 Contributors to the dreamsource project.
// SPDX-License-Identifier: Apache-2.0

//! Access to the encoder character device.
//!
//! [`EncoderDevice`] is the seam between the capture logic and the kernel:
//! [`CharDevice`] talks to `/dev/aencN` / `/dev/vencN`, tests substitute their
//! own implementation. [`DeviceChannel`] adds the descriptor read buffer and
//! the batch protocol on top.

use std::{
    fs::{File, OpenOptions},
    io::{Read, Write},
    os::{
        fd::{AsFd, AsRawFd, BorrowedFd},
        unix::fs::OpenOptionsExt,
    },
    path::{Path, PathBuf},
    sync::Arc,
};

use dreamenc_sys as sys;
use memmap2::MmapOptions;
use tracing::{debug, trace};

use crate::{Error, FrameDescriptor, InputMode, PayloadRing, Result, StreamKind, descriptor};

/// A command sent to the encoder through an ioctl.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Start,
    Stop,
    /// Bits per second.
    SetBitrate(u32),
    SetSource(InputMode),
    /// Device resolution code.
    SetResolution(u32),
    /// Device frame rate code.
    SetFramerate(u32),
}

impl Command {
    pub fn name(&self) -> &'static str {
        match self {
            Command::Start => "start",
            Command::Stop => "stop",
            Command::SetBitrate(_) => "set-bitrate",
            Command::SetSource(_) => "set-source",
            Command::SetResolution(_) => "set-resolution",
            Command::SetFramerate(_) => "set-framerate",
        }
    }
}

/// An open encoder device.
///
/// The file descriptor returned by [`AsFd`] must become readable when a
/// descriptor batch is available.
pub trait EncoderDevice: AsFd + Send + Sync + 'static {
    /// Reads one descriptor batch into `buf`, with plain `read()` semantics.
    fn read_records(&self, buf: &mut [u8]) -> std::io::Result<usize>;

    /// Hands `count` consumed descriptors back to the driver.
    fn acknowledge(&self, count: u32) -> std::io::Result<()>;

    fn command(&self, command: Command) -> Result<()>;

    /// The read-only payload ring.
    fn payload_ring(&self) -> Arc<dyn PayloadRing>;
}

/// Kernel encoder device node with its mapped payload ring.
pub struct CharDevice {
    path: PathBuf,
    file: File,
    ring: Arc<dyn PayloadRing>,
}

impl CharDevice {
    /// Opens `path` read-write/synchronous and maps `ring_size` bytes of it.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DeviceUnavailable`] if the node cannot be opened or mapped.
    pub fn open(path: &Path, ring_size: usize) -> Result<Self> {
        let unavailable = |source| Error::DeviceUnavailable {
            path: path.to_path_buf(),
            source,
        };
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .custom_flags(nix::libc::O_SYNC)
            .open(path)
            .map_err(unavailable)?;
        // Safety: the driver keeps the ring mapped for the lifetime of the
        // file and this process never writes through the private mapping.
        let ring = unsafe { MmapOptions::new().len(ring_size).map_copy_read_only(&file) }
            .map_err(unavailable)?;
        debug!("Opened {} with a {ring_size} byte ring", path.display());
        Ok(Self {
            path: path.to_path_buf(),
            file,
            ring: Arc::new(ring),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl AsFd for CharDevice {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.file.as_fd()
    }
}

impl EncoderDevice for CharDevice {
    fn read_records(&self, buf: &mut [u8]) -> std::io::Result<usize> {
        (&self.file).read(buf)
    }

    fn acknowledge(&self, count: u32) -> std::io::Result<()> {
        (&self.file).write_all(&count.to_ne_bytes())
    }

    fn command(&self, command: Command) -> Result<()> {
        let fd = self.file.as_raw_fd();
        // Safety: `fd` is an open encoder device and every argument outlives the call.
        let result = unsafe {
            match command {
                Command::Start => sys::enc_start(fd),
                Command::Stop => sys::enc_stop(fd),
                Command::SetBitrate(bps) => sys::enc_set_bitrate(fd, &bps),
                Command::SetSource(mode) => sys::enc_set_source(fd, &mode.device_code()),
                Command::SetResolution(code) => sys::venc_set_resolution(fd, &code),
                Command::SetFramerate(code) => sys::venc_set_framerate(fd, &code),
            }
        };
        Error::from_ioctl(command.name(), result)
    }

    fn payload_ring(&self) -> Arc<dyn PayloadRing> {
        self.ring.clone()
    }
}

/// Descriptor batches read from an [`EncoderDevice`].
pub struct DeviceChannel {
    device: Arc<dyn EncoderDevice>,
    kind: StreamKind,
    rawbuf: Vec<u8>,
    filled: usize,
}

impl DeviceChannel {
    /// # Errors
    ///
    /// Returns [`Error::AllocationFailed`] if the read buffer cannot be allocated.
    pub fn new(device: Arc<dyn EncoderDevice>, kind: StreamKind) -> Result<Self> {
        let size = kind.read_buffer_size();
        let mut rawbuf = Vec::new();
        rawbuf
            .try_reserve_exact(size)
            .map_err(|e| Error::AllocationFailed(format!("Descriptor buffer: {e}")))?;
        rawbuf.resize(size, 0);
        Ok(Self {
            device,
            kind,
            rawbuf,
            filled: 0,
        })
    }

    /// Reads the next descriptor batch and returns the number of records.
    ///
    /// # Errors
    ///
    /// - [`Error::Eos`] when the driver reports it has no more data.
    /// - [`Error::ReadFailed`] if the read fails or is not a positive multiple
    ///   of the record size.
    pub fn read_descriptors(&mut self) -> Result<usize> {
        let record_size = self.kind.record_size();
        self.filled = 0;
        match self.device.read_records(&mut self.rawbuf) {
            Ok(len) if len > 0 && len % record_size == 0 => {
                self.filled = len;
                trace!("Read {len} bytes of descriptors");
                Ok(len / record_size)
            }
            Ok(len) => Err(Error::ReadFailed(format!(
                "read returned {len} bytes, expected a multiple of {record_size}"
            ))),
            Err(e) if e.raw_os_error() == Some(sys::DEVICE_ERRNO_EOS) => Err(Error::Eos),
            Err(e) => Err(Error::ReadFailed(e.to_string())),
        }
    }

    /// Decodes record `slot` of the current batch.
    pub fn descriptor(&self, slot: usize) -> Result<FrameDescriptor> {
        descriptor::decode(&self.rawbuf[..self.filled], slot, self.kind)
    }

    /// Acknowledges `count` consumed descriptors.
    pub fn release(&self, count: usize) -> Result<()> {
        let count = u32::try_from(count)
            .map_err(|_| Error::InvalidArg(format!("Descriptor count {count} too large")))?;
        self.device
            .acknowledge(count)
            .map_err(|e| Error::ReadFailed(format!("Releasing {count} descriptors: {e}")))
    }

    pub fn ring(&self) -> Arc<dyn PayloadRing> {
        self.device.payload_ring()
    }

    pub fn device(&self) -> &Arc<dyn EncoderDevice> {
        &self.device
    }
}
