//! Finding the paired element in the pipeline.
//!
//! The audio element looks for `dreamvideosource0` and the video element for
//! `dreamaudiosource0`, searching up from their parent bin. The sibling is
//! held weakly and asked for its origin through `get-base-pts`.

// SPDX-FileCopyrightText: 2025 Contributors to the dreamsource project.
// SPDX-License-Identifier: Apache-2.0

use std::sync::Arc;

use dreamenc::{OriginQuery, PeerHandle, StreamKind};
use gst::glib;
use gst::prelude::*;
use gstreamer as gst;
use tracing::debug;

use super::GET_BASE_PTS;
use crate::dreamaudiosrc::DreamAudioSrc;
use crate::dreamvideosrc::DreamVideoSrc;

struct SiblingOrigin(glib::WeakRef<gst::Element>);

impl OriginQuery for SiblingOrigin {
    fn query_origin(&self) -> Option<u64> {
        let sibling = self.0.upgrade()?;
        let pts = sibling.emit_by_name::<i64>(GET_BASE_PTS, &[]);
        u64::try_from(pts).ok()
    }
}

/// Looks up the paired element of a `kind` stream owned by `element`.
pub(crate) fn locate(element: &gst::Element, kind: StreamKind) -> Option<PeerHandle> {
    let name = kind.peer().well_known_name();
    let bin = element.parent()?.downcast::<gst::Bin>().ok()?;
    let Some(sibling) = bin.by_name_recurse_up(name) else {
        debug!("No {name} in the pipeline, using own origin");
        return None;
    };
    // Only our own elements answer `get-base-pts`.
    if !(sibling.is::<DreamAudioSrc>() || sibling.is::<DreamVideoSrc>()) {
        debug!("{name} is not a dreamsource element, ignoring it");
        return None;
    }
    debug!("Pairing with {name}");
    Some(PeerHandle::new(Arc::new(SiblingOrigin(sibling.downgrade()))))
}
