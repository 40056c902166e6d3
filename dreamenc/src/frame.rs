// SPDX-FileCopyrightText: 2025 Contributors to the dreamsource project.
// SPDX-License-Identifier: Apache-2.0

use crate::{DescriptorFlags, RingLease};

/// A compressed frame handed to the consumer.
///
/// Timestamps are pipeline nanoseconds relative to the stream origin. A frame
/// without timestamps was encoded before the origin.
#[derive(Debug)]
pub struct Frame {
    payload: Option<RingLease>,
    pub pts: Option<u64>,
    pub dts: Option<u64>,
    pub flags: DescriptorFlags,
}

impl Frame {
    pub fn new(payload: RingLease, pts: Option<u64>, flags: DescriptorFlags) -> Self {
        Self {
            payload: Some(payload),
            pts,
            dts: pts,
            flags,
        }
    }

    /// Empty frame emitted when the encoder stays idle for a poll period.
    pub fn placeholder() -> Self {
        Self {
            payload: None,
            pts: None,
            dts: None,
            flags: DescriptorFlags::empty(),
        }
    }

    pub fn is_placeholder(&self) -> bool {
        self.payload.is_none()
    }

    pub fn data(&self) -> &[u8] {
        match &self.payload {
            Some(lease) => lease.as_ref(),
            None => &[],
        }
    }

    pub fn len(&self) -> usize {
        self.payload.as_ref().map_or(0, RingLease::len)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Takes the payload lease, leaving a placeholder behind.
    pub fn into_payload(mut self) -> Option<RingLease> {
        self.payload.take()
    }
}
