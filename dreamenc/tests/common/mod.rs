// SPDX-FileCopyrightText: 2025 Contributors to the dreamsource project.
// SPDX-License-Identifier: Apache-2.0

//! Socket-backed stand-in for the encoder device.
//!
//! Every datagram sent through a [`Feeder`] is one descriptor batch. The
//! payload ring is an in-memory buffer whose byte `i` is `i % 251`, so frame
//! contents can be checked against their span.

#![allow(dead_code)]

use std::{
    os::{
        fd::{AsFd, BorrowedFd},
        unix::net::UnixDatagram,
    },
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, Ordering},
    },
    time::{Duration, Instant},
};

use dreamenc::{
    Command, EncoderDevice, EncoderStream, Error, Frame, PayloadRing, Result, StreamConfig,
    StreamKind, sys,
};

/// Ensures logging is initialized only once across all tests.
static LOG_ONCE: std::sync::Once = std::sync::Once::new();

pub fn init_logging() {
    LOG_ONCE.call_once(|| {
        tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::builder()
                    .with_default_directive(tracing::level_filters::LevelFilter::INFO.into())
                    .from_env_lossy(),
            )
            .with_test_writer()
            .init();
    });
}

pub struct FakeDevice {
    socket: UnixDatagram,
    ring: Arc<Vec<u8>>,
    eos: AtomicBool,
    acks: Mutex<Vec<u32>>,
    commands: Mutex<Vec<Command>>,
    reject: Mutex<Option<&'static str>>,
    bitrate: Mutex<Option<u32>>,
}

/// Test side of a [`FakeDevice`].
pub struct Feeder {
    socket: UnixDatagram,
    device: Arc<FakeDevice>,
}

impl FakeDevice {
    pub fn new(kind: StreamKind) -> (Arc<Self>, Feeder) {
        let (device_end, feeder_end) = UnixDatagram::pair().unwrap();
        let ring: Vec<u8> = (0..kind.ring_size()).map(|i| (i % 251) as u8).collect();
        let device = Arc::new(Self {
            socket: device_end,
            ring: Arc::new(ring),
            eos: AtomicBool::new(false),
            acks: Mutex::new(Vec::new()),
            commands: Mutex::new(Vec::new()),
            reject: Mutex::new(None),
            bitrate: Mutex::new(None),
        });
        let feeder = Feeder {
            socket: feeder_end,
            device: device.clone(),
        };
        (device, feeder)
    }

    pub fn acks(&self) -> Vec<u32> {
        self.acks.lock().unwrap().clone()
    }

    pub fn commands(&self) -> Vec<Command> {
        self.commands.lock().unwrap().clone()
    }

    /// Bitrate in bit/s as last accepted by the device.
    pub fn bitrate(&self) -> Option<u32> {
        *self.bitrate.lock().unwrap()
    }

    /// Makes the device reject the named command.
    pub fn reject(&self, command: Option<&'static str>) {
        *self.reject.lock().unwrap() = command;
    }
}

impl AsFd for FakeDevice {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.socket.as_fd()
    }
}

impl EncoderDevice for FakeDevice {
    fn read_records(&self, buf: &mut [u8]) -> std::io::Result<usize> {
        let len = self.socket.recv(buf)?;
        if len == 0 && self.eos.load(Ordering::SeqCst) {
            return Err(std::io::Error::from_raw_os_error(sys::DEVICE_ERRNO_EOS));
        }
        Ok(len)
    }

    fn acknowledge(&self, count: u32) -> std::io::Result<()> {
        self.acks.lock().unwrap().push(count);
        Ok(())
    }

    fn command(&self, command: Command) -> Result<()> {
        if *self.reject.lock().unwrap() == Some(command.name()) {
            return Err(Error::DeviceIoctlFailed {
                command: command.name(),
                source: nix::Error::EINVAL,
            });
        }
        if let Command::SetBitrate(bps) = command {
            *self.bitrate.lock().unwrap() = Some(bps);
        }
        self.commands.lock().unwrap().push(command);
        Ok(())
    }

    fn payload_ring(&self) -> Arc<dyn PayloadRing> {
        self.ring.clone()
    }
}

impl Feeder {
    pub fn send_batch(&self, records: &[Vec<u8>]) {
        self.send_raw(&records.concat());
    }

    pub fn send_raw(&self, bytes: &[u8]) {
        self.socket.send(bytes).unwrap();
    }

    /// Makes the next read fail the way the driver signals end of stream.
    pub fn end_of_stream(&self) {
        self.device.eos.store(true, Ordering::SeqCst);
        self.socket.send(&[]).unwrap();
    }
}

/// Builds one descriptor record.
pub fn record(kind: StreamKind, flags: u32, offset: u32, length: u32, pts: u64) -> Vec<u8> {
    let mut raw = vec![0u8; kind.record_size()];
    raw[sys::common::FLAGS..][..4].copy_from_slice(&flags.to_le_bytes());
    raw[sys::common::OFFSET..][..4].copy_from_slice(&offset.to_le_bytes());
    raw[sys::common::LENGTH..][..4].copy_from_slice(&length.to_le_bytes());
    raw[sys::common::PTS..][..8].copy_from_slice(&pts.to_le_bytes());
    raw
}

/// A complete frame with a valid PTS.
pub fn data(kind: StreamKind, offset: u32, length: u32, pts: u64) -> Vec<u8> {
    record(
        kind,
        sys::CDB_FLAG_PTS_VALID | sys::CDB_FLAG_FRAME_START | sys::CDB_FLAG_FRAME_END,
        offset,
        length,
        pts,
    )
}

/// A video frame with a valid DTS.
pub fn video_data(offset: u32, length: u32, pts: u64, dts: u64) -> Vec<u8> {
    let mut raw = data(StreamKind::Video, offset, length, pts);
    raw[sys::video::VIDEO_FLAGS..][..4].copy_from_slice(&sys::VBD_FLAG_DTS_VALID.to_le_bytes());
    raw[sys::video::DTS..][..8].copy_from_slice(&dts.to_le_bytes());
    raw
}

pub fn metadata(kind: StreamKind) -> Vec<u8> {
    record(kind, sys::CDB_FLAG_METADATA, 0, 0, 0)
}

pub fn end_marker(kind: StreamKind) -> Vec<u8> {
    record(kind, sys::CDB_FLAG_EOS, 0, 0, 0)
}

/// Expected payload of the span `[offset, offset + length)`.
pub fn ring_bytes(offset: usize, length: usize) -> Vec<u8> {
    (offset..offset + length).map(|i| (i % 251) as u8).collect()
}

/// Opens a stream on a fresh fake device and starts playing.
pub fn setup(config: StreamConfig) -> (EncoderStream, Arc<FakeDevice>, Feeder) {
    init_logging();
    let kind = config.kind;
    let stream = EncoderStream::new(config).unwrap();
    let (device, feeder) = FakeDevice::new(kind);
    stream.start_with_device(device.clone()).unwrap();
    stream.play().unwrap();
    (stream, device, feeder)
}

/// Pulls the next frame that carries payload, skipping idle placeholders.
pub fn pull_data(stream: &EncoderStream) -> Frame {
    loop {
        let frame = stream.pull().unwrap();
        if !frame.is_placeholder() {
            return frame;
        }
    }
}

/// Polls `condition` until it holds or two seconds pass.
pub fn wait_for(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(2);
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    condition()
}
