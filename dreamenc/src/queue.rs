// SPDX-FileCopyrightText: 2025 Contributors to the dreamsource project.
// SPDX-License-Identifier: Apache-2.0

//! Bounded FIFO between the producer thread and `pull()`.

use std::collections::VecDeque;

use crate::{Error, Frame, Result};

/// Fixed-capacity frame queue that evicts its oldest entry when full.
///
/// Storage is reserved up front, so pushing never allocates.
#[derive(Debug)]
pub struct FrameQueue {
    frames: VecDeque<Frame>,
    capacity: usize,
}

impl FrameQueue {
    /// # Errors
    ///
    /// [`Error::InvalidArg`] for a zero capacity, [`Error::AllocationFailed`]
    /// if the storage cannot be reserved.
    pub fn with_capacity(capacity: usize) -> Result<Self> {
        if capacity == 0 {
            return Err(Error::InvalidArg("Queue capacity must be at least 1".to_string()));
        }
        let mut frames = VecDeque::new();
        frames
            .try_reserve_exact(capacity)
            .map_err(|e| Error::AllocationFailed(format!("Frame queue: {e}")))?;
        Ok(Self { frames, capacity })
    }

    /// Appends a frame, returning the evicted oldest frame if the queue was full.
    ///
    /// The caller drops the evicted frame, which releases its lease.
    #[must_use]
    pub fn push(&mut self, frame: Frame) -> Option<Frame> {
        let evicted = if self.frames.len() >= self.capacity {
            self.frames.pop_front()
        } else {
            None
        };
        self.frames.push_back(frame);
        evicted
    }

    pub fn pop(&mut self) -> Option<Frame> {
        self.frames.pop_front()
    }

    /// Removes every queued frame.
    pub fn drain(&mut self) -> Vec<Frame> {
        self.frames.drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
