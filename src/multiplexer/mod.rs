//! Platform-specific readiness-multiplexing backends.
//!
//! The multiplexer is the engine behind the event loop: it keeps the
//! registration table of handles and their interest masks, translates
//! interest changes into OS poller operations, and performs the
//! blocking readiness query that drives each loop iteration.
//!
//! The concrete backend is selected at compile time. Only the Linux
//! `epoll` backend is currently implemented; the seam is kept so other
//! platforms can slot in.
//!
//! The multiplexer never owns a handle: its table holds weak
//! references, and the owning object controls the handle's lifetime.

pub(crate) mod common;

#[cfg(target_os = "linux")]
mod epoll;

#[cfg(target_os = "linux")]
pub(crate) type Multiplexer = epoll::EpollMultiplexer;
