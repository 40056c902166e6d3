// SPDX-FileCopyrightText: 2025 Contributors to the dreamsource project.
// SPDX-License-Identifier: Apache-2.0

//! Descriptor records read from the encoder device.
//!
//! Each `read()` on the device returns a batch of fixed-size records. A record
//! locates one compressed frame inside the payload ring and carries its
//! hardware timestamps. Fields are little-endian at the offsets defined in
//! [`dreamenc_sys`].

use std::ops::BitOr;

use dreamenc_sys as sys;

use crate::{Error, Result, StreamKind};

/// Flag word of a descriptor record.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DescriptorFlags(u32);

impl DescriptorFlags {
    pub const ORIGINALPTS_VALID: Self = Self(sys::CDB_FLAG_ORIGINALPTS_VALID);
    pub const PTS_VALID: Self = Self(sys::CDB_FLAG_PTS_VALID);
    pub const ESCR_VALID: Self = Self(sys::CDB_FLAG_ESCR_VALID);
    pub const TICKSPERBIT_VALID: Self = Self(sys::CDB_FLAG_TICKSPERBIT_VALID);
    pub const SHR_VALID: Self = Self(sys::CDB_FLAG_SHR_VALID);
    pub const STCSNAPSHOT_VALID: Self = Self(sys::CDB_FLAG_STCSNAPSHOT_VALID);
    pub const FRAME_START: Self = Self(sys::CDB_FLAG_FRAME_START);
    pub const EOS: Self = Self(sys::CDB_FLAG_EOS);
    pub const EMPTY_FRAME: Self = Self(sys::CDB_FLAG_EMPTY_FRAME);
    pub const FRAME_END: Self = Self(sys::CDB_FLAG_FRAME_END);
    pub const EOC: Self = Self(sys::CDB_FLAG_EOC);
    pub const METADATA: Self = Self(sys::CDB_FLAG_METADATA);
    pub const EXTENDED: Self = Self(sys::CDB_FLAG_EXTENDED);

    pub const fn empty() -> Self {
        Self(0)
    }

    pub const fn from_bits(bits: u32) -> Self {
        Self(bits)
    }

    pub const fn bits(self) -> u32 {
        self.0
    }

    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for DescriptorFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

/// How the producer treats a decoded record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DescriptorClass {
    /// The rest of the batch is stale and is skipped.
    Metadata,
    /// End-of-stream marker without payload, consumed silently.
    EndMarker,
    /// A compressed frame.
    Data,
}

/// One decoded descriptor record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameDescriptor {
    pub flags: DescriptorFlags,
    /// Byte offset of the payload in the ring.
    pub offset: usize,
    /// Payload length in bytes.
    pub length: usize,
    /// Presentation timestamp in 90 kHz ticks.
    pub pts: u64,
    /// Decode timestamp in 90 kHz ticks, video records only.
    pub dts: Option<u64>,
}

impl FrameDescriptor {
    pub fn class(&self) -> DescriptorClass {
        if self.flags.contains(DescriptorFlags::METADATA) {
            DescriptorClass::Metadata
        } else if self.flags.contains(DescriptorFlags::EOS) && self.length == 0 {
            DescriptorClass::EndMarker
        } else {
            DescriptorClass::Data
        }
    }

    /// The presentation timestamp, if the record marks it valid.
    pub fn pts(&self) -> Option<u64> {
        self.flags
            .contains(DescriptorFlags::PTS_VALID)
            .then_some(self.pts)
    }

    /// The hardware timestamp that anchors the stream origin: DTS when
    /// present, PTS otherwise.
    pub fn origin_ticks(&self) -> Option<u64> {
        self.dts.or_else(|| self.pts())
    }
}

// Callers pass a whole record, whose size covers every field offset.
fn read_u32(record: &[u8], at: usize) -> u32 {
    let bytes: [u8; 4] = record[at..at + 4].try_into().unwrap_or_default();
    u32::from_le_bytes(bytes)
}

fn read_u64(record: &[u8], at: usize) -> u64 {
    let bytes: [u8; 8] = record[at..at + 8].try_into().unwrap_or_default();
    u64::from_le_bytes(bytes)
}

/// Decodes record `slot` of a raw descriptor batch.
///
/// # Errors
///
/// Returns [`Error::ReadFailed`] if the batch does not contain the slot.
pub fn decode(raw: &[u8], slot: usize, kind: StreamKind) -> Result<FrameDescriptor> {
    let size = kind.record_size();
    let start = slot * size;
    let record = raw.get(start..start + size).ok_or_else(|| {
        Error::ReadFailed(format!(
            "Descriptor slot {slot} outside a {} byte batch",
            raw.len()
        ))
    })?;

    let dts = match kind {
        StreamKind::Audio => None,
        StreamKind::Video => {
            let video_flags = read_u32(record, sys::video::VIDEO_FLAGS);
            let dts = read_u64(record, sys::video::DTS);
            (video_flags & sys::VBD_FLAG_DTS_VALID != 0 && dts != 0).then_some(dts)
        }
    };

    Ok(FrameDescriptor {
        flags: DescriptorFlags::from_bits(read_u32(record, sys::common::FLAGS)),
        offset: read_u32(record, sys::common::OFFSET) as usize,
        length: read_u32(record, sys::common::LENGTH) as usize,
        pts: read_u64(record, sys::common::PTS),
        dts,
    })
}
