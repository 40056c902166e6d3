// SPDX-FileCopyrightText: 2025 Contributors to the dreamsource project.
// SPDX-License-Identifier: Apache-2.0

//! Hardware to pipeline time conversion and per-epoch origins.
//!
//! The encoder stamps frames with 90 kHz ticks. A stream converts them to
//! nanoseconds and emits them relative to an origin established by the first
//! timestamped frame of each play epoch, or adopted from the paired stream.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dreamenc_sys as sys;
use tracing::debug;

pub const NSEC_PER_SEC: u64 = 1_000_000_000;

/// Computes `value * num / denom` without intermediate overflow.
///
/// Saturates at `u64::MAX`. A zero `denom` yields `u64::MAX`.
pub fn scale(value: u64, num: u64, denom: u64) -> u64 {
    if denom == 0 {
        return u64::MAX;
    }
    let scaled = u128::from(value) * u128::from(num) / u128::from(denom);
    u64::try_from(scaled).unwrap_or(u64::MAX)
}

/// Converts 90 kHz hardware ticks to nanoseconds.
pub fn ticks_to_nanos(ticks: u64) -> u64 {
    scale(ticks, NSEC_PER_SEC, sys::HW_TICK_RATE)
}

/// Relation between an internal clock and the pipeline clock it is slaved to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClockCalibration {
    pub internal: u64,
    pub external: u64,
    pub rate_num: u64,
    pub rate_denom: u64,
}

impl Default for ClockCalibration {
    fn default() -> Self {
        Self {
            internal: 0,
            external: 0,
            rate_num: 1,
            rate_denom: 1,
        }
    }
}

impl ClockCalibration {
    /// Projects internal time `t` onto the external clock.
    ///
    /// Times before `internal` are mirrored below `external` and saturate at zero.
    pub fn project(&self, t: u64) -> u64 {
        let (num, denom) = if self.rate_denom == 0 {
            (1, 1)
        } else {
            (self.rate_num, self.rate_denom)
        };
        if t >= self.internal {
            self.external
                .saturating_add(scale(t - self.internal, num, denom))
        } else {
            self.external
                .saturating_sub(scale(self.internal - t, num, denom))
        }
    }
}

const ORIGIN_UNSET: u64 = u64::MAX;

/// Published origin of one stream.
///
/// Lock-free so a paired stream can read it from its own producer thread.
#[derive(Debug)]
pub struct OriginCell(AtomicU64);

impl Default for OriginCell {
    fn default() -> Self {
        Self::new()
    }
}

impl OriginCell {
    pub fn new() -> Self {
        Self(AtomicU64::new(ORIGIN_UNSET))
    }

    pub fn get(&self) -> Option<u64> {
        match self.0.load(Ordering::Acquire) {
            ORIGIN_UNSET => None,
            origin => Some(origin),
        }
    }

    /// Sets the origin unless one is already set; returns the origin in effect.
    pub fn set_once(&self, origin: u64) -> u64 {
        let origin = origin.min(ORIGIN_UNSET - 1);
        match self
            .0
            .compare_exchange(ORIGIN_UNSET, origin, Ordering::AcqRel, Ordering::Acquire)
        {
            Ok(_) => origin,
            Err(current) => current,
        }
    }

    pub fn reset(&self) {
        self.0.store(ORIGIN_UNSET, Ordering::Release);
    }
}

/// Turns hardware timestamps into origin-relative pipeline timestamps.
#[derive(Debug)]
pub struct TimestampReconciler {
    origin: Arc<OriginCell>,
    calibration: Option<ClockCalibration>,
    base_offset: u64,
}

impl TimestampReconciler {
    pub fn new(origin: Arc<OriginCell>) -> Self {
        Self {
            origin,
            calibration: None,
            base_offset: 0,
        }
    }

    pub fn origin(&self) -> Option<u64> {
        self.origin.get()
    }

    /// Starts a new epoch: the next timestamped frame sets the origin again.
    pub fn reset(&mut self) {
        self.origin.reset();
    }

    /// Slaves conversion to a pipeline clock, or restores plain conversion.
    pub fn set_calibration(&mut self, calibration: Option<ClockCalibration>) {
        self.calibration = calibration;
    }

    /// Start-of-playback offset subtracted from calibrated times.
    pub fn set_base_offset(&mut self, base_offset: u64) {
        self.base_offset = base_offset;
    }

    /// Converts hardware ticks to pipeline nanoseconds.
    pub fn convert(&self, ticks: u64) -> u64 {
        let nanos = ticks_to_nanos(ticks);
        match &self.calibration {
            Some(calibration) => calibration
                .project(nanos)
                .saturating_sub(self.base_offset),
            None => nanos,
        }
    }

    /// Establishes the epoch origin from the first timestamped frame.
    ///
    /// `peer_origin` is the paired stream's origin, if it has one; it takes
    /// precedence over `ticks`. Once set, the origin is kept until [`Self::reset`].
    pub fn establish(&self, ticks: u64, peer_origin: Option<u64>) -> u64 {
        if let Some(origin) = self.origin.get() {
            return origin;
        }
        let origin = match peer_origin {
            Some(origin) => {
                debug!("Adopting paired stream origin {origin} ns");
                origin
            }
            None => {
                let origin = self.convert(ticks);
                debug!("Using stream timestamp as origin {origin} ns");
                origin
            }
        };
        self.origin.set_once(origin)
    }

    /// Origin-relative timestamp, `None` before the origin or while unset.
    pub fn timestamp(&self, ticks: u64) -> Option<u64> {
        let origin = self.origin.get()?;
        self.convert(ticks).checked_sub(origin)
    }
}
