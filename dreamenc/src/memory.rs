// SPDX-FileCopyrightText: 2025 Contributors to the dreamsource project.
// SPDX-License-Identifier: Apache-2.0

//! Zero-copy leases over the payload ring and their bookkeeping.
//!
//! The encoder writes compressed frames into a ring that this process maps
//! read-only. Frames are handed downstream as [`RingLease`]s borrowing a span
//! of that ring. Every live lease is recorded in a [`MemoryTracker`] so the
//! stream knows which part of the ring is still referenced.

use std::{
    collections::HashMap,
    fmt,
    sync::{Arc, Weak},
};

use crate::{Error, Result};

/// Identifier of a tracked lease.
pub type LeaseId = u64;

/// Read-only payload memory shared with the encoder.
pub trait PayloadRing: Send + Sync + 'static {
    fn bytes(&self) -> &[u8];
}

impl PayloadRing for memmap2::Mmap {
    fn bytes(&self) -> &[u8] {
        self
    }
}

impl PayloadRing for Vec<u8> {
    fn bytes(&self) -> &[u8] {
        self
    }
}

impl PayloadRing for Box<[u8]> {
    fn bytes(&self) -> &[u8] {
        self
    }
}

/// A byte range `[offset, offset + length)` of the ring.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Span {
    pub offset: usize,
    pub length: usize,
}

impl Span {
    pub fn new(offset: usize, length: usize) -> Self {
        Self { offset, length }
    }

    pub fn end(&self) -> usize {
        self.offset.saturating_add(self.length)
    }

    fn fits(&self, size: usize) -> bool {
        self.offset
            .checked_add(self.length)
            .is_some_and(|end| end <= size)
    }
}

/// Records outstanding leases and the ring range they cover.
///
/// `used_range` is the advisory bound `[min offset, max end)` over all live
/// leases. With no lease outstanding it reports `(usize::MAX, 0)`.
#[derive(Debug)]
pub struct MemoryTracker {
    leases: HashMap<LeaseId, Span>,
    next_id: LeaseId,
    used: (usize, usize),
}

const EMPTY_RANGE: (usize, usize) = (usize::MAX, 0);

impl Default for MemoryTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryTracker {
    pub fn new() -> Self {
        Self {
            leases: HashMap::new(),
            next_id: 0,
            used: EMPTY_RANGE,
        }
    }

    /// Records a new lease and widens the used range.
    ///
    /// # Errors
    ///
    /// Returns [`Error::AllocationFailed`] if the tracking map cannot grow.
    pub fn insert(&mut self, span: Span) -> Result<LeaseId> {
        self.leases
            .try_reserve(1)
            .map_err(|e| Error::AllocationFailed(format!("Lease tracker: {e}")))?;
        let id = self.next_id;
        self.next_id = self.next_id.wrapping_add(1);
        self.leases.insert(id, span);
        self.used = (self.used.0.min(span.offset), self.used.1.max(span.end()));
        Ok(id)
    }

    /// Forgets a lease and recomputes the used range over the survivors.
    ///
    /// Returns `false` if the lease was not tracked.
    pub fn remove(&mut self, id: LeaseId) -> bool {
        if self.leases.remove(&id).is_none() {
            return false;
        }
        self.used = self
            .leases
            .values()
            .fold(EMPTY_RANGE, |(lo, hi), span| {
                (lo.min(span.offset), hi.max(span.end()))
            });
        true
    }

    pub fn used_range(&self) -> (usize, usize) {
        self.used
    }

    /// Whether `span` intersects the used range.
    pub fn overlaps(&self, span: Span) -> bool {
        let (lo, hi) = self.used;
        span.length > 0 && span.offset < hi && span.end() > lo
    }

    pub fn len(&self) -> usize {
        self.leases.len()
    }

    pub fn is_empty(&self) -> bool {
        self.leases.is_empty()
    }
}

/// Owner of a [`MemoryTracker`] that leases report back to when released.
pub trait LeaseTracker: Send + Sync + 'static {
    fn release(&self, id: LeaseId);
}

type ReleaseFn = Box<dyn FnOnce() + Send>;

/// Read-only view of a span of the payload ring.
///
/// The release closure runs exactly once, when the lease is dropped. The
/// lease keeps the ring mapped for as long as it lives.
pub struct RingLease {
    ring: Arc<dyn PayloadRing>,
    span: Span,
    release: Option<ReleaseFn>,
}

impl RingLease {
    /// Creates a lease over `span` of `ring`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArg`] if the span lies outside the ring.
    pub fn new(
        ring: Arc<dyn PayloadRing>,
        span: Span,
        release: impl FnOnce() + Send + 'static,
    ) -> Result<Self> {
        check_span(ring.as_ref(), span)?;
        Ok(Self {
            ring,
            span,
            release: Some(Box::new(release)),
        })
    }

    pub fn span(&self) -> Span {
        self.span
    }

    pub fn len(&self) -> usize {
        self.span.length
    }

    pub fn is_empty(&self) -> bool {
        self.span.length == 0
    }
}

impl AsRef<[u8]> for RingLease {
    fn as_ref(&self) -> &[u8] {
        &self.ring.bytes()[self.span.offset..self.span.end()]
    }
}

impl fmt::Debug for RingLease {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RingLease")
            .field("span", &self.span)
            .field("released", &self.release.is_none())
            .finish()
    }
}

impl Drop for RingLease {
    fn drop(&mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
    }
}

fn check_span(ring: &dyn PayloadRing, span: Span) -> Result<()> {
    let size = ring.bytes().len();
    if span.fits(size) {
        Ok(())
    } else {
        Err(Error::InvalidArg(format!(
            "Span {}+{} outside the {size} byte ring",
            span.offset, span.length
        )))
    }
}

/// Leases `span` of `ring` and records it in `tracker`.
///
/// `tracker` must be the tracker guarded by `owner`: releasing the lease calls
/// [`LeaseTracker::release`] on `owner`. Only a weak reference to `owner` is
/// kept, so a lease that outlives its stream releases nothing.
pub fn wrap<T: LeaseTracker>(
    tracker: &mut MemoryTracker,
    owner: &Arc<T>,
    ring: &Arc<dyn PayloadRing>,
    span: Span,
) -> Result<RingLease> {
    check_span(ring.as_ref(), span)?;
    let id = tracker.insert(span)?;
    let owner: Weak<T> = Arc::downgrade(owner);
    Ok(RingLease {
        ring: ring.clone(),
        span,
        release: Some(Box::new(move || {
            if let Some(owner) = owner.upgrade() {
                owner.release(id);
            }
        })),
    })
}

#[cfg(test)]
mod tests {
    use std::sync::{
        Mutex,
        atomic::{AtomicUsize, Ordering},
    };

    use super::*;

    struct Owner(Mutex<MemoryTracker>);

    impl LeaseTracker for Owner {
        fn release(&self, id: LeaseId) {
            self.0.lock().unwrap().remove(id);
        }
    }

    fn ring() -> Arc<dyn PayloadRing> {
        Arc::new((0..=255u8).collect::<Vec<u8>>())
    }

    #[test]
    fn used_range_tracks_survivors() {
        let mut tracker = MemoryTracker::new();
        assert_eq!(tracker.used_range(), (usize::MAX, 0));

        let a = tracker.insert(Span::new(10, 10)).unwrap();
        let b = tracker.insert(Span::new(40, 20)).unwrap();
        assert_eq!(tracker.used_range(), (10, 60));

        assert!(tracker.remove(a));
        assert_eq!(tracker.used_range(), (40, 60));
        assert!(!tracker.remove(a));

        assert!(tracker.remove(b));
        assert_eq!(tracker.used_range(), (usize::MAX, 0));
        assert!(tracker.is_empty());
    }

    #[test]
    fn overlap_against_used_range() {
        let mut tracker = MemoryTracker::new();
        assert!(!tracker.overlaps(Span::new(0, 100)));

        tracker.insert(Span::new(100, 50)).unwrap();
        assert!(tracker.overlaps(Span::new(120, 10)));
        assert!(tracker.overlaps(Span::new(90, 20)));
        assert!(!tracker.overlaps(Span::new(150, 10)));
        assert!(!tracker.overlaps(Span::new(80, 20)));
        assert!(!tracker.overlaps(Span::new(120, 0)));
    }

    #[test]
    fn lease_views_ring_bytes() {
        let lease = RingLease::new(ring(), Span::new(4, 3), || {}).unwrap();
        assert_eq!(lease.as_ref(), &[4, 5, 6]);
        assert_eq!(lease.len(), 3);
    }

    #[test]
    fn out_of_ring_span_is_rejected() {
        assert!(matches!(
            RingLease::new(ring(), Span::new(250, 10), || {}),
            Err(Error::InvalidArg(_))
        ));
        assert!(matches!(
            RingLease::new(ring(), Span::new(usize::MAX, 2), || {}),
            Err(Error::InvalidArg(_))
        ));
    }

    #[test]
    fn release_runs_exactly_once() {
        let count = Arc::new(AtomicUsize::new(0));
        let counter = count.clone();
        let lease = RingLease::new(ring(), Span::new(0, 1), move || {
            counter.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();
        drop(lease);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn wrapped_lease_untracks_on_drop() {
        let owner = Arc::new(Owner(Mutex::new(MemoryTracker::new())));
        let lease = {
            let mut tracker = owner.0.lock().unwrap();
            wrap(&mut tracker, &owner, &ring(), Span::new(16, 32)).unwrap()
        };
        assert_eq!(owner.0.lock().unwrap().used_range(), (16, 48));

        drop(lease);
        let tracker = owner.0.lock().unwrap();
        assert!(tracker.is_empty());
        assert_eq!(tracker.used_range(), (usize::MAX, 0));
    }

    #[test]
    fn lease_outliving_owner_is_harmless() {
        let owner = Arc::new(Owner(Mutex::new(MemoryTracker::new())));
        let lease = {
            let mut tracker = owner.0.lock().unwrap();
            wrap(&mut tracker, &owner, &ring(), Span::new(0, 8)).unwrap()
        };
        drop(owner);
        assert_eq!(lease.as_ref().len(), 8);
        drop(lease);
    }

    #[test]
    fn wrap_rejects_before_tracking() {
        let owner = Arc::new(Owner(Mutex::new(MemoryTracker::new())));
        let mut tracker = owner.0.lock().unwrap();
        assert!(wrap(&mut tracker, &owner, &ring(), Span::new(200, 100)).is_err());
        assert!(tracker.is_empty());
    }
}
