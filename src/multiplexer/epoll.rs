//! Linux `epoll` multiplexer backend.
//!
//! Responsibilities:
//! - maintain the fd → handle registration table
//! - propagate handle interest masks to the kernel via `epoll_ctl`
//! - block waiting for readiness and map reported bits back onto
//!   per-handle [`Readiness`] values
//!
//! Registration bookkeeping is carried on each handle as its
//! [`RegistrationState`] tag; the transition policy lives here.

use super::common::sys_close;
use crate::handle::EventHandle;
use crate::mask::{Readiness, RegistrationState};

use libc::{
    EPOLL_CLOEXEC, EPOLL_CTL_ADD, EPOLL_CTL_DEL, EPOLL_CTL_MOD, EPOLLERR, EPOLLHUP, EPOLLIN,
    EPOLLOUT, EPOLLPRI, epoll_create1, epoll_ctl, epoll_event, epoll_wait,
};
use std::collections::HashMap;
use std::io;
use std::os::fd::RawFd;
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

pub(crate) struct EpollMultiplexer {
    /// Epoll file descriptor.
    epoll: RawFd,

    /// Reusable buffer for epoll events.
    events: Vec<epoll_event>,

    /// Registration table. Entries are weak: the multiplexer observes
    /// handles, it never keeps them alive.
    handles: HashMap<RawFd, Weak<EventHandle>>,
}

impl EpollMultiplexer {
    /// Creates the epoll instance. Failure is fatal.
    pub(crate) fn new() -> Self {
        let epoll = unsafe { epoll_create1(EPOLL_CLOEXEC) };
        assert!(epoll >= 0, "epoll_create1 failed");

        Self {
            epoll,
            events: Vec::with_capacity(64),
            handles: HashMap::new(),
        }
    }

    /// Propagates a handle's current interest mask to the kernel.
    ///
    /// The handle's registration tag drives the operation:
    /// - `Unregistered` and `PendingRemoval` handles are (re-)added;
    ///   a pending-removal entry is still in the table, so re-enabling
    ///   interest revives it without a fresh table insert.
    /// - A `Registered` handle whose interest dropped to empty is
    ///   detached from epoll but kept in the table as `PendingRemoval`.
    /// - Otherwise the existing registration is modified in place.
    pub(crate) fn update(&mut self, handle: &EventHandle) {
        match handle.registration_state() {
            RegistrationState::Unregistered => {
                log::debug!("fd {}: registering with {:?}", handle.fd(), handle.interest());
                self.handles.insert(handle.fd(), handle.weak_ref());
                self.ctl(EPOLL_CTL_ADD, handle);
                handle.set_registration_state(RegistrationState::Registered);
            }
            RegistrationState::PendingRemoval => {
                log::debug!("fd {}: reviving with {:?}", handle.fd(), handle.interest());
                self.ctl(EPOLL_CTL_ADD, handle);
                handle.set_registration_state(RegistrationState::Registered);
            }
            RegistrationState::Registered => {
                if handle.interest().is_empty() {
                    self.ctl(EPOLL_CTL_DEL, handle);
                    handle.set_registration_state(RegistrationState::PendingRemoval);
                } else {
                    self.ctl(EPOLL_CTL_MOD, handle);
                }
            }
        }
    }

    /// Drops a handle from the registration table.
    ///
    /// Precondition: the handle's interest is empty (the caller must
    /// have disabled everything first).
    pub(crate) fn remove(&mut self, handle: &EventHandle) {
        assert!(
            handle.interest().is_empty(),
            "fd {} removed with active interest",
            handle.fd()
        );

        self.handles.remove(&handle.fd());
        if handle.registration_state() == RegistrationState::Registered {
            self.ctl(EPOLL_CTL_DEL, handle);
        }
        handle.set_registration_state(RegistrationState::Unregistered);
        log::debug!("fd {}: deregistered", handle.fd());
    }

    /// Polls for readiness.
    ///
    /// Blocks until at least one registered descriptor is ready or the
    /// timeout expires. Ready handles are appended to `active` together
    /// with the readiness observed for them; the returned instant is
    /// the pass timestamp handed to every dispatch.
    ///
    /// An interrupted wait (`EINTR`) yields an empty pass.
    pub(crate) fn poll(
        &mut self,
        active: &mut Vec<(Arc<EventHandle>, Readiness)>,
        timeout: Duration,
    ) -> io::Result<Instant> {
        let timeout_ms = timeout.as_millis() as i32;

        unsafe {
            self.events.set_len(self.events.capacity());
        }

        let n = unsafe {
            epoll_wait(
                self.epoll,
                self.events.as_mut_ptr(),
                self.events.capacity() as i32,
                timeout_ms,
            )
        };
        let timestamp = Instant::now();

        if n < 0 {
            unsafe {
                self.events.set_len(0);
            }

            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::Interrupted {
                return Ok(timestamp);
            }
            log::error!("epoll_wait failed: {err}");
            return Err(err);
        }

        unsafe {
            self.events.set_len(n as usize);
        }

        for ev in &self.events {
            let fd = ev.u64 as RawFd;

            let Some(handle) = self.handles.get(&fd).and_then(Weak::upgrade) else {
                // The owner dropped the handle without deregistering,
                // or removal raced a ready event. Nothing to dispatch.
                log::warn!("fd {fd}: readiness reported for a vanished handle");
                continue;
            };

            let readiness = Readiness {
                readable: ev.events & EPOLLIN as u32 != 0,
                priority: ev.events & EPOLLPRI as u32 != 0,
                writable: ev.events & EPOLLOUT as u32 != 0,
                closed: ev.events & EPOLLHUP as u32 != 0,
                error: ev.events & EPOLLERR as u32 != 0,
            };
            active.push((handle, readiness));
        }

        Ok(timestamp)
    }

    fn ctl(&self, op: i32, handle: &EventHandle) {
        let interest = handle.interest();
        let mut flags = 0;

        if interest.read {
            flags |= EPOLLIN | EPOLLPRI;
        }
        if interest.write {
            flags |= EPOLLOUT;
        }

        let mut event = epoll_event {
            events: flags as u32,
            u64: handle.fd() as u64,
        };

        let event_ptr = if op == EPOLL_CTL_DEL {
            std::ptr::null_mut()
        } else {
            &mut event
        };

        let rc = unsafe { epoll_ctl(self.epoll, op, handle.fd(), event_ptr) };
        if rc != 0 {
            log::error!(
                "epoll_ctl(op {op}) failed for fd {}: {}",
                handle.fd(),
                io::Error::last_os_error()
            );
        }
        debug_assert_eq!(rc, 0);
    }
}

impl Drop for EpollMultiplexer {
    fn drop(&mut self) {
        sys_close(self.epoll);
    }
}
