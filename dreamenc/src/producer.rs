// SPDX-FileCopyrightText: 2025 Contributors to the dreamsource project.
// SPDX-License-Identifier: Apache-2.0

//! The producer thread that drains the encoder into the frame queue.
//!
//! One iteration waits on the control socket and the device together, reads a
//! batch when the device is readable and turns at most one descriptor into a
//! frame. While a batch is pending only the control socket is polled, with a
//! zero timeout, so a stop request is seen between any two frames.

use std::{
    io::{ErrorKind, Read, Write},
    os::{
        fd::{AsFd, BorrowedFd},
        unix::net::UnixStream,
    },
    sync::Arc,
    time::Duration,
};

use nix::{
    errno::Errno,
    poll::{PollFd, PollFlags, PollTimeout, poll},
};
use tracing::{debug, error, info, trace, warn};

use crate::{
    DescriptorClass, DeviceChannel, Error, Frame, FrameDescriptor, OriginCell, PeerHandle,
    Result, Span, StreamKind, memory, stream::Shared,
};

const CONTROL_STOP: u8 = b'S';

/// Creates the non-blocking stop channel of one producer.
pub(crate) fn control_channel() -> Result<(ControlSender, ControlReceiver)> {
    let (tx, rx) = UnixStream::pair()?;
    tx.set_nonblocking(true)?;
    rx.set_nonblocking(true)?;
    Ok((ControlSender(tx), ControlReceiver(rx)))
}

pub(crate) struct ControlSender(UnixStream);

impl ControlSender {
    pub(crate) fn send_stop(&self) -> Result<()> {
        match (&self.0).write(&[CONTROL_STOP]) {
            Ok(_) => Ok(()),
            // A full socket already holds unread stop bytes.
            Err(e) if e.kind() == ErrorKind::WouldBlock => Ok(()),
            // The producer already exited and closed its end.
            Err(e) if matches!(e.kind(), ErrorKind::BrokenPipe | ErrorKind::ConnectionReset) => {
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }
}

pub(crate) struct ControlReceiver(UnixStream);

impl ControlReceiver {
    /// Drains pending control bytes; `true` if a stop was requested or the
    /// sender is gone.
    pub(crate) fn take_stop(&self) -> Result<bool> {
        let mut buf = [0u8; 16];
        let mut stop = false;
        loop {
            match (&self.0).read(&mut buf) {
                Ok(0) => return Ok(true),
                Ok(n) => stop |= buf[..n].contains(&CONTROL_STOP),
                Err(e) if e.kind() == ErrorKind::WouldBlock => return Ok(stop),
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
    }
}

impl AsFd for ControlReceiver {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.0.as_fd()
    }
}

enum Wake {
    Stop,
    Readable,
    Timeout,
    Spurious,
}

fn poll_timeout(timeout: Duration) -> PollTimeout {
    PollTimeout::from(u16::try_from(timeout.as_millis()).unwrap_or(u16::MAX))
}

pub(crate) struct Producer {
    pub(crate) kind: StreamKind,
    pub(crate) shared: Arc<Shared>,
    pub(crate) channel: DeviceChannel,
    pub(crate) control: ControlReceiver,
    pub(crate) peer: Option<PeerHandle>,
    pub(crate) origin: Arc<OriginCell>,
    pub(crate) poll_timeout: Duration,
}

impl Producer {
    /// Thread body: runs until stopped or a fatal error, then publishes the
    /// exit reason and wakes the consumer.
    pub(crate) fn run(mut self) {
        info!("{:?} producer started", self.kind);
        let result = self.run_loop();

        let mut state = self.shared.lock();
        state.running = false;
        state.descriptors_available = 0;
        state.descriptors_count = 0;
        match result {
            Ok(()) => info!("{:?} producer stopped", self.kind),
            Err(Error::Eos) => {
                info!("{:?} encoder reached end of stream", self.kind);
                state.exit = Some(Error::Eos);
            }
            Err(err) => {
                error!("{:?} producer failed: {err}", self.kind);
                state.exit = Some(err);
            }
        }
        drop(state);
        self.shared.cond.notify_all();
    }

    fn run_loop(&mut self) -> Result<()> {
        loop {
            let pending = self.shared.lock().descriptors_available > 0;
            match self.wait(pending)? {
                Wake::Stop => return Ok(()),
                Wake::Spurious => continue,
                Wake::Timeout if !pending => {
                    self.emit_placeholder();
                    continue;
                }
                Wake::Readable if !pending => self.read_batch()?,
                Wake::Readable | Wake::Timeout => {}
            }
            self.process_next()?;
        }
    }

    fn wait(&self, pending: bool) -> Result<Wake> {
        let control_fd = self.control.as_fd();
        let device_fd = self.channel.device().as_fd();
        let (control_ready, device_ready) = if pending {
            let mut fds = [PollFd::new(control_fd, PollFlags::POLLIN)];
            match poll(&mut fds, PollTimeout::ZERO) {
                Ok(_) => (readiness(&fds[0]), false),
                Err(Errno::EINTR) => (false, false),
                Err(e) => return Err(Error::Io(e.into())),
            }
        } else {
            let mut fds = [
                PollFd::new(control_fd, PollFlags::POLLIN),
                PollFd::new(device_fd, PollFlags::POLLIN),
            ];
            match poll(&mut fds, poll_timeout(self.poll_timeout)) {
                Ok(0) => return Ok(Wake::Timeout),
                Ok(_) => (readiness(&fds[0]), readiness(&fds[1])),
                Err(Errno::EINTR) => (false, false),
                Err(e) => return Err(Error::Io(e.into())),
            }
        };

        if control_ready && self.control.take_stop()? {
            debug!("{:?} producer received stop", self.kind);
            return Ok(Wake::Stop);
        }
        if device_ready {
            Ok(Wake::Readable)
        } else if pending {
            Ok(Wake::Timeout)
        } else {
            // Interrupted, or a control byte that was not a stop.
            Ok(Wake::Spurious)
        }
    }

    fn read_batch(&mut self) -> Result<()> {
        let count = self.channel.read_descriptors()?;
        debug!("{count} descriptors available");
        let mut state = self.shared.lock();
        state.descriptors_available = count;
        state.descriptors_count = 0;
        Ok(())
    }

    /// Consumes the next descriptor of the pending batch, emitting at most one frame.
    fn process_next(&mut self) -> Result<()> {
        let (slot, available) = {
            let state = self.shared.lock();
            (state.descriptors_count, state.descriptors_available)
        };
        if slot >= available {
            return Ok(());
        }

        let desc = self.channel.descriptor(slot)?;
        trace!(
            "descriptor {slot}/{available}: flags {:#x}, offset {}, length {}, pts {}",
            desc.flags.bits(),
            desc.offset,
            desc.length,
            desc.pts
        );
        let consumed = match desc.class() {
            DescriptorClass::Metadata => {
                debug!("Metadata descriptor, skipping {} stale descriptors", available - slot);
                available
            }
            DescriptorClass::EndMarker => {
                debug!("End-of-stream marker descriptor");
                slot + 1
            }
            DescriptorClass::Data => {
                self.emit(&desc)?;
                slot + 1
            }
        };

        let mut state = self.shared.lock();
        state.descriptors_count = consumed;
        if consumed >= available {
            self.channel.release(available)?;
            trace!("Released {available} consumed descriptors");
            state.descriptors_available = 0;
            state.descriptors_count = 0;
        }
        Ok(())
    }

    fn emit(&self, desc: &FrameDescriptor) -> Result<()> {
        let peer_origin = match (self.origin.get(), desc.origin_ticks()) {
            (None, Some(_)) => self.peer.as_ref().and_then(PeerHandle::query_peer_origin),
            _ => None,
        };
        let span = Span::new(desc.offset, desc.length);
        let ring = self.channel.ring();

        let evicted = {
            let mut state = self.shared.lock();
            if let Some(ticks) = desc.origin_ticks() {
                state.reconciler.establish(ticks, peer_origin);
            }
            let pts = desc.pts().and_then(|ticks| state.reconciler.timestamp(ticks));

            if state.tracker.overlaps(span) {
                let (lo, hi) = state.tracker.used_range();
                warn!(
                    "Frame at {}+{} overlaps in-use ring range {lo}..{hi}",
                    span.offset, span.length
                );
            }
            let lease = match memory::wrap(&mut state.tracker, &self.shared, &ring, span) {
                Ok(lease) => lease,
                Err(Error::InvalidArg(msg)) => {
                    warn!("Skipping descriptor: {msg}");
                    return Ok(());
                }
                Err(err) => return Err(err),
            };
            let evicted = state.queue.push(Frame::new(lease, pts, desc.flags));
            self.shared.cond.notify_one();
            evicted
        };

        if let Some(frame) = evicted {
            warn!("{}", Error::QueueOverflow);
            drop(frame);
        }
        Ok(())
    }

    fn emit_placeholder(&self) {
        debug!("No encoder data within {:?}, queueing placeholder", self.poll_timeout);
        let evicted = {
            let mut state = self.shared.lock();
            let evicted = state.queue.push(Frame::placeholder());
            self.shared.cond.notify_one();
            evicted
        };
        if let Some(frame) = evicted {
            warn!("{}", Error::QueueOverflow);
            drop(frame);
        }
    }
}

fn readiness(fd: &PollFd<'_>) -> bool {
    fd.revents().is_some_and(|events| {
        events.intersects(PollFlags::POLLIN | PollFlags::POLLHUP | PollFlags::POLLERR)
    })
}
