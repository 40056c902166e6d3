// SPDX-FileCopyrightText: 2025 Contributors to the dreamsource project.
// SPDX-License-Identifier: Apache-2.0

//! The capture stream: lifecycle, configuration and the pull interface.

use std::{
    sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError},
    thread::{self, JoinHandle},
};

use tracing::{Span, debug, error, info, warn};

use crate::{
    CharDevice, ClockCalibration, DeviceChannel, EncoderDevice, Error, Frame, FrameQueue,
    InputMode, LeaseId, LeaseTracker, MemoryTracker, OriginCell, PeerHandle, Registration,
    Result, StreamConfig, StreamRegistry, TimestampReconciler, VideoFormat,
    control::EncoderControl,
    producer::{ControlSender, Producer, control_channel},
};

/// Per-stream state shared by the producer, the consumer and buffer releases.
pub(crate) struct StreamState {
    pub(crate) queue: FrameQueue,
    pub(crate) flushing: bool,
    pub(crate) running: bool,
    /// Why the producer exited, reported once by `pull()`.
    pub(crate) exit: Option<Error>,
    pub(crate) descriptors_available: usize,
    pub(crate) descriptors_count: usize,
    pub(crate) reconciler: TimestampReconciler,
    pub(crate) tracker: MemoryTracker,
}

pub(crate) struct Shared {
    state: Mutex<StreamState>,
    pub(crate) cond: Condvar,
}

impl Shared {
    /// Locks the stream state. A panicked holder leaves consistent state
    /// behind, so poisoning is ignored.
    pub(crate) fn lock(&self) -> MutexGuard<'_, StreamState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn wait<'a>(&self, guard: MutexGuard<'a, StreamState>) -> MutexGuard<'a, StreamState> {
        self.cond.wait(guard).unwrap_or_else(PoisonError::into_inner)
    }
}

impl LeaseTracker for Shared {
    fn release(&self, id: LeaseId) {
        let mut state = self.lock();
        if !state.tracker.remove(id) {
            warn!("Released untracked lease {id}");
        }
    }
}

struct Worker {
    stop: ControlSender,
    handle: JoinHandle<()>,
}

/// One audio or video capture stream.
///
/// A stream owns a background producer thread while started. All methods take
/// `&self`, so a stream can be shared between the thread calling
/// [`EncoderStream::pull`] and threads driving its lifecycle.
///
/// # Lifecycle
///
/// ```text
/// new ─► start ─► play ⇄ pause ─► stop
///          ▲                       │
///          └───────────────────────┘
/// ```
///
/// `start` opens the device and starts draining it, `play` begins a new
/// timestamp epoch and starts the encoder, `pause` stops the encoder, `stop`
/// joins the producer and closes the device. Dropping the stream stops it.
///
/// # Examples
///
/// ```no_run
/// use dreamenc::{EncoderStream, StreamConfig};
///
/// # fn main() -> Result<(), dreamenc::Error> {
/// let stream = EncoderStream::new(StreamConfig::audio())?;
/// stream.set_bitrate(192)?;
/// stream.start()?;
/// stream.play()?;
/// let frame = stream.pull()?;
/// println!("{} bytes at {:?}", frame.len(), frame.pts);
/// stream.stop()?;
/// # Ok(())
/// # }
/// ```
pub struct EncoderStream {
    config: StreamConfig,
    shared: Arc<Shared>,
    origin: Arc<OriginCell>,
    control: Mutex<EncoderControl>,
    registry: Option<StreamRegistry>,
    registration: Mutex<Option<Registration>>,
    peer: Mutex<Option<PeerHandle>>,
    worker: Mutex<Option<Worker>>,
}

impl EncoderStream {
    /// Creates a stopped stream.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidArg`] for an invalid configuration,
    /// [`Error::AllocationFailed`] if the frame queue cannot be allocated.
    pub fn new(config: StreamConfig) -> Result<Self> {
        config.validate()?;
        let origin = Arc::new(OriginCell::new());
        let state = StreamState {
            queue: FrameQueue::with_capacity(config.buffer_size)?,
            flushing: false,
            running: false,
            exit: None,
            descriptors_available: 0,
            descriptors_count: 0,
            reconciler: TimestampReconciler::new(origin.clone()),
            tracker: MemoryTracker::new(),
        };
        Ok(Self {
            control: Mutex::new(EncoderControl::new(&config)),
            config,
            shared: Arc::new(Shared {
                state: Mutex::new(state),
                cond: Condvar::new(),
            }),
            origin,
            registry: None,
            registration: Mutex::new(None),
            peer: Mutex::new(None),
            worker: Mutex::new(None),
        })
    }

    /// Creates a stream that publishes its origin in `registry` under `name`
    /// and finds its paired stream there at start.
    pub fn with_registry(config: StreamConfig, registry: &StreamRegistry, name: &str) -> Result<Self> {
        let mut stream = Self::new(config)?;
        let registration = registry.register(name, &stream.origin)?;
        *stream.registration.get_mut().unwrap_or_else(PoisonError::into_inner) = Some(registration);
        stream.registry = Some(registry.clone());
        Ok(stream)
    }

    pub fn config(&self) -> &StreamConfig {
        &self.config
    }

    /// Name this stream is registered under, if any.
    pub fn name(&self) -> Option<String> {
        lock(&self.registration)
            .as_ref()
            .map(|registration| registration.name().to_string())
    }

    /// Sets the paired stream explicitly, overriding the registry lookup.
    pub fn set_peer(&self, peer: Option<PeerHandle>) {
        *lock(&self.peer) = peer;
    }

    /// Shared handle to this stream's published origin.
    pub fn origin_handle(&self) -> Arc<OriginCell> {
        self.origin.clone()
    }

    /// Current origin in pipeline nanoseconds, `None` until the first
    /// timestamped frame of the epoch.
    pub fn origin(&self) -> Option<u64> {
        self.origin.get()
    }

    /// Requests a bitrate in kbit/s.
    ///
    /// Sent to the device right away when it is open, otherwise applied at start.
    /// A rejected value leaves the previous bitrate in place.
    pub fn set_bitrate(&self, kbps: u32) -> Result<()> {
        lock(&self.control).set_bitrate(kbps)
    }

    pub fn bitrate(&self) -> u32 {
        lock(&self.control).bitrate()
    }

    pub fn set_input_mode(&self, mode: InputMode) -> Result<()> {
        lock(&self.control).set_input_mode(mode)
    }

    pub fn input_mode(&self) -> InputMode {
        lock(&self.control).input_mode()
    }

    /// Video streams only.
    pub fn set_video_format(&self, format: VideoFormat) -> Result<()> {
        lock(&self.control).set_video_format(format)
    }

    pub fn video_format(&self) -> Option<VideoFormat> {
        lock(&self.control).video_format()
    }

    /// Slaves timestamps to a pipeline clock.
    ///
    /// `base_offset` is subtracted from every projected time.
    pub fn set_calibration(&self, calibration: Option<ClockCalibration>, base_offset: u64) {
        let mut state = self.shared.lock();
        state.reconciler.set_calibration(calibration);
        state.reconciler.set_base_offset(base_offset);
    }

    /// Opens the configured device node and starts the producer.
    ///
    /// # Errors
    ///
    /// [`Error::DeviceUnavailable`] if the device cannot be opened, or any
    /// error of [`Self::start_with_device`].
    pub fn start(&self) -> Result<()> {
        let path = self.config.resolved_device_path();
        let device = CharDevice::open(&path, self.config.kind.ring_size())?;
        self.start_with_device(Arc::new(device))
    }

    /// Starts the producer on an already open device.
    ///
    /// Pending parameters are applied first; a rejected parameter fails the start.
    pub fn start_with_device(&self, device: Arc<dyn EncoderDevice>) -> Result<()> {
        let mut worker = lock(&self.worker);
        if worker.is_some() {
            return Err(Error::InvalidArg("Stream is already started".to_string()));
        }

        let channel = DeviceChannel::new(device.clone(), self.config.kind)?;
        lock(&self.control).attach(device)?;
        let (stop, control) = match control_channel() {
            Ok(pair) => pair,
            Err(err) => {
                lock(&self.control).detach();
                return Err(err);
            }
        };

        let peer = self.resolve_peer();
        {
            let mut state = self.shared.lock();
            state.flushing = false;
            state.running = true;
            state.exit = None;
            state.descriptors_available = 0;
            state.descriptors_count = 0;
            state.reconciler.reset();
        }

        let producer = Producer {
            kind: self.config.kind,
            shared: self.shared.clone(),
            channel,
            control,
            peer,
            origin: self.origin.clone(),
            poll_timeout: self.config.poll_timeout(),
        };
        // Producer logs stay attributed to the caller's span.
        let span = Span::current();
        let spawned = thread::Builder::new()
            .name(format!("dreamenc-{:?}", self.config.kind).to_lowercase())
            .spawn(move || span.in_scope(|| producer.run()));
        let handle = match spawned {
            Ok(handle) => handle,
            Err(err) => {
                self.shared.lock().running = false;
                lock(&self.control).detach();
                return Err(err.into());
            }
        };
        *worker = Some(Worker { stop, handle });
        info!("Started {:?} stream", self.config.kind);
        Ok(())
    }

    fn resolve_peer(&self) -> Option<PeerHandle> {
        if let Some(peer) = lock(&self.peer).clone() {
            return Some(peer);
        }
        let name = self.config.kind.peer().well_known_name();
        let peer = self.registry.as_ref()?.locate_peer(name);
        debug!("Paired stream \"{name}\" found: {}", peer.is_some());
        peer
    }

    /// Begins a new epoch and starts the encoder.
    ///
    /// Frames still queued from the previous epoch are dropped, since their
    /// timestamps are relative to the old origin.
    pub fn play(&self) -> Result<()> {
        let stale = {
            let mut state = self.shared.lock();
            state.reconciler.reset();
            state.queue.drain()
        };
        if !stale.is_empty() {
            debug!("Dropped {} frames from the previous epoch", stale.len());
        }
        drop(stale);
        lock(&self.control).start_encoding()
    }

    /// Stops the encoder. The producer keeps draining the device.
    pub fn pause(&self) -> Result<()> {
        lock(&self.control).stop_encoding()
    }

    pub fn is_encoding(&self) -> bool {
        lock(&self.control).is_encoding()
    }

    pub fn is_running(&self) -> bool {
        self.shared.lock().running
    }

    /// Stops and joins the producer, drops queued frames and closes the device.
    ///
    /// Outstanding frames stay valid; they keep the ring mapped until dropped.
    pub fn stop(&self) -> Result<()> {
        let Some(worker) = lock(&self.worker).take() else {
            return Ok(());
        };
        if let Err(err) = worker.stop.send_stop() {
            error!("Failed to signal producer stop: {err}");
        }
        if worker.handle.join().is_err() {
            error!("{:?} producer thread panicked", self.config.kind);
        }

        let drained = {
            let mut state = self.shared.lock();
            state.running = false;
            state.descriptors_available = 0;
            state.descriptors_count = 0;
            state.queue.drain()
        };
        self.shared.cond.notify_all();
        debug!("Dropped {} queued frames", drained.len());
        drop(drained);

        lock(&self.control).detach();
        info!("Stopped {:?} stream", self.config.kind);
        Ok(())
    }

    /// Takes the next frame, blocking until one is queued.
    ///
    /// # Errors
    ///
    /// - [`Error::Flushing`] while flushing, or once the stream is stopped.
    /// - The producer's exit reason ([`Error::Eos`] or a device error), once,
    ///   after the queue has run empty.
    pub fn pull(&self) -> Result<Frame> {
        let mut state = self.shared.lock();
        loop {
            if state.flushing {
                return Err(Error::Flushing);
            }
            if let Some(frame) = state.queue.pop() {
                return Ok(frame);
            }
            if !state.running {
                return Err(state.exit.take().unwrap_or(Error::Flushing));
            }
            state = self.shared.wait(state);
        }
    }

    /// Sets or clears the flush flag. Setting it wakes a blocked [`Self::pull`].
    pub fn set_flushing(&self, flushing: bool) {
        self.shared.lock().flushing = flushing;
        if flushing {
            self.shared.cond.notify_all();
        }
    }

    pub fn queued_frames(&self) -> usize {
        self.shared.lock().queue.len()
    }

    /// Number of frames handed out and not yet dropped.
    pub fn outstanding_buffers(&self) -> usize {
        self.shared.lock().tracker.len()
    }

    /// Ring range `[start, end)` referenced by outstanding frames;
    /// `(usize::MAX, 0)` when there are none.
    pub fn memory_bounds(&self) -> (usize, usize) {
        self.shared.lock().tracker.used_range()
    }
}

impl Drop for EncoderStream {
    fn drop(&mut self) {
        if let Err(err) = self.stop() {
            error!("Failed to stop {:?} stream: {err}", self.config.kind);
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
