// SPDX-FileCopyrightText: 2025 Contributors to the dreamsource project.
// SPDX-License-Identifier: Apache-2.0

//! Origin sharing between an audio and a video stream.
//!
//! Streams publish their origin in a [`StreamRegistry`] under a well-known
//! name. At start a stream resolves its paired stream once and keeps the
//! [`PeerHandle`]. Queries never block: a missing peer or an unset origin
//! simply yields `None`.

use std::{
    collections::HashMap,
    fmt,
    sync::{Arc, Mutex, PoisonError, Weak},
};

use tracing::debug;

use crate::{Error, OriginCell, Result};

/// Answers "what is your current origin" without blocking.
pub trait OriginQuery: Send + Sync {
    fn query_origin(&self) -> Option<u64>;
}

impl OriginQuery for OriginCell {
    fn query_origin(&self) -> Option<u64> {
        self.get()
    }
}

struct RegisteredOrigin(Weak<OriginCell>);

impl OriginQuery for RegisteredOrigin {
    fn query_origin(&self) -> Option<u64> {
        self.0.upgrade().and_then(|cell| cell.get())
    }
}

/// Handle to a paired stream's origin.
#[derive(Clone)]
pub struct PeerHandle(Arc<dyn OriginQuery>);

impl PeerHandle {
    pub fn new(query: Arc<dyn OriginQuery>) -> Self {
        Self(query)
    }

    pub fn query_peer_origin(&self) -> Option<u64> {
        self.0.query_origin()
    }
}

impl fmt::Debug for PeerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("PeerHandle").finish_non_exhaustive()
    }
}

/// Queries the origin behind `handle`.
pub fn query_peer_origin(handle: &PeerHandle) -> Option<u64> {
    handle.query_peer_origin()
}

type Entries = HashMap<String, Weak<OriginCell>>;

/// Shared name to origin lookup for the streams of one pipeline.
///
/// Cloning is cheap; clones share the same entries.
#[derive(Clone, Default)]
pub struct StreamRegistry {
    entries: Arc<Mutex<Entries>>,
}

impl fmt::Debug for StreamRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        f.debug_struct("StreamRegistry")
            .field("names", &entries.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl StreamRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Publishes `origin` under `name` until the returned [`Registration`] is dropped.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArg`] if a live stream already holds the name.
    pub fn register(&self, name: &str, origin: &Arc<OriginCell>) -> Result<Registration> {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        if entries
            .get(name)
            .is_some_and(|existing| existing.strong_count() > 0)
        {
            return Err(Error::InvalidArg(format!(
                "Stream name \"{name}\" is already registered"
            )));
        }
        entries.insert(name.to_string(), Arc::downgrade(origin));
        debug!("Registered stream \"{name}\"");
        Ok(Registration {
            entries: Arc::downgrade(&self.entries),
            name: name.to_string(),
        })
    }

    /// Resolves the stream registered under `name`.
    pub fn locate_peer(&self, name: &str) -> Option<PeerHandle> {
        let entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        let cell = entries.get(name).filter(|cell| cell.strong_count() > 0)?;
        Some(PeerHandle::new(Arc::new(RegisteredOrigin(cell.clone()))))
    }
}

/// Free-function form of [`StreamRegistry::locate_peer`].
pub fn locate_peer(registry: &StreamRegistry, name: &str) -> Option<PeerHandle> {
    registry.locate_peer(name)
}

/// Keeps a name registered; unregisters it on drop.
pub struct Registration {
    entries: Weak<Mutex<Entries>>,
    name: String,
}

impl Registration {
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Debug for Registration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registration").field("name", &self.name).finish()
    }
}

impl Drop for Registration {
    fn drop(&mut self) {
        if let Some(entries) = self.entries.upgrade() {
            entries
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .remove(&self.name);
        }
    }
}
