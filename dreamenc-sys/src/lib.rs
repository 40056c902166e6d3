// SPDX-FileCopyrightText: 2025 Contributors to the dreamsource project.
// SPDX-License-Identifier: Apache-2.0

//! # dreamenc-sys: Raw ABI of the Dreambox encoder devices
//!
//! This crate describes the kernel interface of the hardware audio (`/dev/aencN`)
//! and video (`/dev/vencN`) encoders:
//! - Descriptor record layouts (byte offsets of every field)
//! - Descriptor flag bits
//! - Ioctl request functions (generated with the `nix` ioctl macros)
//! - Device paths, read buffer and payload ring sizes
//!
//! ## Usage
//!
//! **Most users should NOT use this crate directly.** Use the safe [`dreamenc`]
//! crate instead, which provides:
//! - A device channel with RAII ownership of the file descriptor and mapping
//! - Typed descriptor decoding
//! - Rust-idiomatic error handling with `Result`
//!
//! ## ABI
//!
//! The encoder driver runs on 32-bit little-endian SoCs. Records are laid out as
//! the driver's C structs with 8-byte alignment for 64-bit members and a 32-bit
//! `size_t`. Offsets are spelled out here instead of mirroring the structs with
//! `#[repr(C)]`, so decoding does not depend on the host ABI.
//!
//! [`dreamenc`]: https://docs.rs/dreamenc

/// Hardware timestamp tick rate (MPEG system clock base, 90 kHz).
pub const HW_TICK_RATE: u64 = 90_000;

/// Errno the driver reports from `read()` once it has no more data to deliver.
///
/// This is the kernel-internal `ERESTARTSYS`, which the driver leaks to user space.
pub const DEVICE_ERRNO_EOS: i32 = 512;

/// Size of the consumed-count acknowledgment written back to the device.
pub const ACK_SIZE: usize = 4;

/// Rational number (numerator / denominator).
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Rational {
    pub numerator: u64,
    pub denominator: u64,
}

// Validity flags
pub const CDB_FLAG_ORIGINALPTS_VALID: u32 = 0x0000_0001;
pub const CDB_FLAG_PTS_VALID: u32 = 0x0000_0002;
pub const CDB_FLAG_ESCR_VALID: u32 = 0x0000_0004;
pub const CDB_FLAG_TICKSPERBIT_VALID: u32 = 0x0000_0008;
pub const CDB_FLAG_SHR_VALID: u32 = 0x0000_0010;
pub const CDB_FLAG_STCSNAPSHOT_VALID: u32 = 0x0000_0020;

// Indicator flags
pub const CDB_FLAG_FRAME_START: u32 = 0x0001_0000;
pub const CDB_FLAG_EOS: u32 = 0x0002_0000;
pub const CDB_FLAG_EMPTY_FRAME: u32 = 0x0004_0000;
pub const CDB_FLAG_FRAME_END: u32 = 0x0008_0000;
pub const CDB_FLAG_EOC: u32 = 0x0010_0000;

pub const CDB_FLAG_METADATA: u32 = 0x4000_0000;
pub const CDB_FLAG_EXTENDED: u32 = 0x8000_0000;

/// Video-specific flag word: the DTS field carries a valid value.
pub const VBD_FLAG_DTS_VALID: u32 = 0x0000_0001;

/// Field offsets of the common compressed buffer descriptor.
pub mod common {
    pub const FLAGS: usize = 0;
    pub const ORIGINAL_PTS: usize = 4;
    pub const PTS: usize = 8;
    pub const STC_SNAPSHOT: usize = 16;
    pub const ESCR: usize = 24;
    pub const TICKS_PER_BIT: usize = 28;
    pub const SHR: usize = 30;
    pub const OFFSET: usize = 32;
    pub const LENGTH: usize = 36;
    pub const RESERVED: usize = 40;

    /// Size of the common part, padded to the 8-byte struct alignment.
    pub const SIZE: usize = 48;
}

/// Audio encoder (`/dev/aencN`).
pub mod audio {
    pub const DEVICE_PREFIX: &str = "/dev/aenc";

    pub const RAW_DATA_OFFSET: usize = super::common::SIZE;
    pub const RAW_DATA_LENGTH: usize = super::common::SIZE + 4;
    pub const DATA_UNIT_TYPE: usize = super::common::SIZE + 8;

    /// Size of one audio buffer descriptor.
    pub const RECORD_SIZE: usize = 64;

    /// Descriptor read buffer size.
    pub const READ_BUFFER_SIZE: usize = 16 * 1024;

    /// Size of the mapped payload ring.
    pub const MMAP_SIZE: usize = 256 * 1024;
}

/// Video encoder (`/dev/vencN`).
pub mod video {
    pub const DEVICE_PREFIX: &str = "/dev/venc";

    pub const VIDEO_FLAGS: usize = super::common::SIZE;
    pub const DTS: usize = super::common::SIZE + 8;
    pub const DATA_UNIT_TYPE: usize = super::common::SIZE + 16;

    /// Size of one video buffer descriptor.
    pub const RECORD_SIZE: usize = 72;

    /// Descriptor read buffer size (256 records).
    pub const READ_BUFFER_SIZE: usize = 256 * RECORD_SIZE;

    /// Size of the mapped payload ring.
    pub const MMAP_SIZE: usize = 4 * 1024 * 1024;

    // Resolution codes for `venc_set_resolution`
    pub const FMT_720X576: u32 = 0;
    pub const FMT_1280X720: u32 = 1;
    pub const FMT_1920X1080: u32 = 2;

    // Frame rate codes for `venc_set_framerate`
    pub const RATE_25: u32 = 0;
    pub const RATE_30: u32 = 1;
    pub const RATE_50: u32 = 2;
    pub const RATE_60: u32 = 3;
}

// Input source codes for `enc_set_source`
pub const ENC_SOURCE_LIVE: u32 = 0;
pub const ENC_SOURCE_HDMI_IN: u32 = 1;
pub const ENC_SOURCE_BACKGROUND: u32 = 2;

pub const ENC_IOC_MAGIC: u8 = b'v';
pub const ENC_IOC_START: u8 = 128;
pub const ENC_IOC_STOP: u8 = 129;
pub const ENC_IOC_SET_BITRATE: u8 = 130;
pub const VENC_IOC_SET_RESOLUTION: u8 = 131;
pub const VENC_IOC_SET_FRAMERATE: u8 = 132;
pub const ENC_IOC_SET_SOURCE: u8 = 140;

nix::ioctl_none!(enc_start, ENC_IOC_MAGIC, ENC_IOC_START);
nix::ioctl_none!(enc_stop, ENC_IOC_MAGIC, ENC_IOC_STOP);
nix::ioctl_write_ptr!(enc_set_bitrate, ENC_IOC_MAGIC, ENC_IOC_SET_BITRATE, u32);
nix::ioctl_write_ptr!(enc_set_source, ENC_IOC_MAGIC, ENC_IOC_SET_SOURCE, u32);
nix::ioctl_write_ptr!(
    venc_set_resolution,
    ENC_IOC_MAGIC,
    VENC_IOC_SET_RESOLUTION,
    u32
);
nix::ioctl_write_ptr!(
    venc_set_framerate,
    ENC_IOC_MAGIC,
    VENC_IOC_SET_FRAMERATE,
    u32
);
