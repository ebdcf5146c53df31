//! # Vigil
//!
//! **Vigil** is a compact reactor: a single-threaded event loop that
//! multiplexes readiness over many I/O resources and routes each
//! notification to owner-supplied callbacks.
//!
//! The central abstraction is the [`EventHandle`]: one handle per OS
//! resource, carrying the interest mask the multiplexer registers, the
//! readiness reported back each pass, and the read/write/close/error
//! callback slots that readiness is dispatched to. The [`EventLoop`]
//! owns the epoll-backed multiplexer, is pinned to the thread that
//! created it, and drives one readiness pass per iteration.
//!
//! Vigil offers:
//!
//! - **Strict loop-thread affinity** — every handle mutation and
//!   dispatch is asserted to run on the owning loop's thread; other
//!   threads marshal work in with [`EventLoop::run_in_loop`]
//! - **Lifetime-guarded dispatch** — [`EventHandle::tie`] attaches a
//!   weak owner reference checked before any callback fires, so an
//!   owner destroyed earlier in the same pass is a silent no-op, never
//!   a dangling call
//! - **Cheap registration bookkeeping** — each handle carries its
//!   [`RegistrationState`] tag, letting the multiplexer re-enable a
//!   pending-removal handle without a fresh registration
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use vigil::{EventHandle, EventLoop};
//!
//! let event_loop = EventLoop::new();
//!
//! let handle = EventHandle::new(&event_loop, fd);
//! handle.set_read_callback(move |timestamp| {
//!     // fd is readable; drain it here
//! });
//! handle.enable_read();
//!
//! event_loop.run().unwrap();
//! ```
//!
//! Higher layers (connections, protocols, buffering) are built on top
//! of these primitives, not inside them.

mod event_loop;
mod handle;
mod mask;
mod multiplexer;

pub use event_loop::EventLoop;
pub use handle::EventHandle;
pub use mask::{Interest, Readiness, RegistrationState};
