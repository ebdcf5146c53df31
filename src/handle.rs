use crate::event_loop::EventLoop;
use crate::mask::{Interest, Readiness, RegistrationState};

use std::any::Any;
use std::cell::{Cell, RefCell};
use std::os::fd::RawFd;
use std::sync::{Arc, Weak};
use std::time::Instant;

type ReadCallback = Box<dyn FnMut(Instant)>;
type EventCallback = Box<dyn FnMut()>;

/// Readiness interest in one I/O resource, bound to one event loop.
///
/// An `EventHandle` is the unit the reactor works in: it carries the
/// interest mask the multiplexer registers, the readiness the loop
/// reports back each pass, and the callbacks that readiness is routed
/// to. It is created and owned by a higher-level object (a connection,
/// an acceptor, a wakeup pipe) and shared as `Arc<EventHandle>`.
///
/// All mutation and dispatch must happen on the owning loop's thread;
/// calling from any other thread is a programming error and fails a
/// runtime assertion. The handle itself performs no synchronization.
///
/// A handle must be deregistered (`disable_all` + `remove`) before it
/// is dropped.
pub struct EventHandle {
    /// Observing back-reference: the loop strictly outlives its handles
    /// and a handle must never extend the loop's lifetime.
    event_loop: Weak<EventLoop>,

    /// Weak self-reference handed to the multiplexer's registration
    /// table, which observes handles without owning them.
    self_ref: Weak<EventHandle>,

    fd: RawFd,

    interest: Cell<Interest>,
    reported: Cell<Readiness>,
    state: Cell<RegistrationState>,

    /// Weak reference to the tied owner, if any. Checked at the top of
    /// every dispatch; see [`tie`](Self::tie).
    guard: RefCell<Option<Weak<dyn Any>>>,

    read_callback: RefCell<Option<ReadCallback>>,
    write_callback: RefCell<Option<EventCallback>>,
    close_callback: RefCell<Option<EventCallback>>,
    error_callback: RefCell<Option<EventCallback>>,
}

// Interior state is Cell/RefCell with no locking. Soundness of sharing
// across threads rests on the loop-affinity invariant: every mutating
// operation and dispatch asserts it runs on the owning loop's thread.
unsafe impl Send for EventHandle {}
unsafe impl Sync for EventHandle {}

impl EventHandle {
    /// Creates a handle bound to `event_loop` and `fd` for its whole
    /// lifetime. Neither binding can change afterwards.
    ///
    /// # Panics
    ///
    /// Panics if `fd` is not a valid descriptor value.
    pub fn new(event_loop: &Arc<EventLoop>, fd: RawFd) -> Arc<Self> {
        assert!(fd >= 0, "event handle requires a valid file descriptor");

        Arc::new_cyclic(|self_ref| Self {
            event_loop: Arc::downgrade(event_loop),
            self_ref: self_ref.clone(),
            fd,
            interest: Cell::new(Interest::default()),
            reported: Cell::new(Readiness::default()),
            state: Cell::new(RegistrationState::Unregistered),
            guard: RefCell::new(None),
            read_callback: RefCell::new(None),
            write_callback: RefCell::new(None),
            close_callback: RefCell::new(None),
            error_callback: RefCell::new(None),
        })
    }

    /// The OS resource this handle watches.
    pub fn fd(&self) -> RawFd {
        self.fd
    }

    /// The currently requested interest mask.
    pub fn interest(&self) -> Interest {
        self.interest.get()
    }

    /// Whether read readiness is currently requested.
    pub fn is_reading(&self) -> bool {
        self.interest.get().read
    }

    /// Whether write readiness is currently requested.
    pub fn is_writing(&self) -> bool {
        self.interest.get().write
    }

    /// Whether no readiness is requested at all.
    pub fn is_idle(&self) -> bool {
        self.interest.get().is_empty()
    }

    /// The loop this handle is bound to.
    ///
    /// # Panics
    ///
    /// Panics if the loop has already been dropped; the loop must
    /// strictly outlive every handle it hosts.
    pub fn owner_loop(&self) -> Arc<EventLoop> {
        self.event_loop
            .upgrade()
            .expect("event loop dropped before one of its handles")
    }

    /// Registration-table tag, maintained by the multiplexer.
    pub fn registration_state(&self) -> RegistrationState {
        self.state.get()
    }

    /// Sets the registration-table tag. Called by the multiplexer; the
    /// handle does not enforce any transition policy.
    pub fn set_registration_state(&self, state: RegistrationState) {
        self.state.set(state);
    }

    /// Records the readiness the multiplexer observed for this handle
    /// in the current pass. Called by the event loop immediately before
    /// [`dispatch`](Self::dispatch).
    pub fn set_reported(&self, readiness: Readiness) {
        self.reported.set(readiness);
    }

    /// Sets the callback invoked on read readiness, with the timestamp
    /// of the readiness pass.
    pub fn set_read_callback(&self, callback: impl FnMut(Instant) + 'static) {
        self.read_callback.replace(Some(Box::new(callback)));
    }

    /// Sets the callback invoked on write readiness.
    pub fn set_write_callback(&self, callback: impl FnMut() + 'static) {
        self.write_callback.replace(Some(Box::new(callback)));
    }

    /// Sets the callback invoked on peer hangup.
    pub fn set_close_callback(&self, callback: impl FnMut() + 'static) {
        self.close_callback.replace(Some(Box::new(callback)));
    }

    /// Sets the callback invoked on an error condition.
    pub fn set_error_callback(&self, callback: impl FnMut() + 'static) {
        self.error_callback.replace(Some(Box::new(callback)));
    }

    /// Ties this handle to the object that owns it.
    ///
    /// Some owners are destroyed indirectly: a callback of an earlier
    /// handle in the same readiness pass may drop the owner's last
    /// strong reference while this handle is still scheduled for
    /// dispatch. After `tie`, every dispatch first upgrades the weak
    /// guard; if the owner is gone the dispatch silently does nothing,
    /// and if it is alive the upgraded reference keeps it alive for the
    /// full extent of the callbacks.
    pub fn tie<T: 'static>(&self, owner: &Arc<T>) {
        let erased: Arc<dyn Any> = owner.clone();
        self.guard.replace(Some(Arc::downgrade(&erased)));
    }

    /// Requests read-readiness notifications.
    pub fn enable_read(&self) {
        self.mutate_interest(|interest| interest.read = true);
    }

    /// Stops requesting read-readiness notifications.
    pub fn disable_read(&self) {
        self.mutate_interest(|interest| interest.read = false);
    }

    /// Requests write-readiness notifications.
    pub fn enable_write(&self) {
        self.mutate_interest(|interest| interest.write = true);
    }

    /// Stops requesting write-readiness notifications.
    pub fn disable_write(&self) {
        self.mutate_interest(|interest| interest.write = false);
    }

    /// Drops all interest. Required before [`remove`](Self::remove).
    pub fn disable_all(&self) {
        self.mutate_interest(|interest| *interest = Interest::default());
    }

    /// Deregisters the handle from the multiplexer.
    ///
    /// # Panics
    ///
    /// Panics if any interest is still enabled, or when called off the
    /// loop thread.
    pub fn remove(&self) {
        assert!(
            self.is_idle(),
            "interest must be fully disabled before removing a handle"
        );
        self.owner_loop().remove_handle(self);
    }

    /// Routes the readiness recorded by [`set_reported`] to the
    /// callback slots. Called by the event loop at most once per handle
    /// per pass; `timestamp` is the pass timestamp.
    ///
    /// Precedence: a hangup with no read interest requested invokes
    /// only the close callback (a dead resource with nothing left to
    /// drain must not be read); otherwise the error, read (also fired
    /// for priority data) and write callbacks run in that order, each
    /// only if its bit is reported. An unset slot is a no-op.
    ///
    /// # Panics
    ///
    /// Panics when called off the loop thread.
    pub fn dispatch(&self, timestamp: Instant) {
        self.owner_loop().assert_in_loop_thread();

        let guard = self.guard.borrow().clone();
        match guard {
            Some(weak) => {
                // The upgraded reference is held across every callback
                // so the owner cannot be destroyed mid-dispatch. A
                // failed upgrade means the owner is already gone; that
                // is the designed silent no-op, not an error.
                if let Some(_owner) = weak.upgrade() {
                    self.dispatch_callbacks(timestamp);
                }
            }
            None => self.dispatch_callbacks(timestamp),
        }
    }

    fn dispatch_callbacks(&self, timestamp: Instant) {
        let reported = self.reported.get();
        log::trace!("fd {}: dispatching {:?}", self.fd, reported);

        if reported.closed && !self.interest.get().read {
            if let Some(callback) = self.close_callback.borrow_mut().as_mut() {
                callback();
            }
            return;
        }

        if reported.error {
            if let Some(callback) = self.error_callback.borrow_mut().as_mut() {
                callback();
            }
        }

        if reported.readable || reported.priority {
            if let Some(callback) = self.read_callback.borrow_mut().as_mut() {
                callback(timestamp);
            }
        }

        if reported.writable {
            if let Some(callback) = self.write_callback.borrow_mut().as_mut() {
                callback();
            }
        }
    }

    /// Weak reference for the multiplexer's registration table.
    pub(crate) fn weak_ref(&self) -> Weak<EventHandle> {
        self.self_ref.clone()
    }

    /// Clears interest and registration directly, without propagating
    /// through the loop. Used only while the loop itself is being torn
    /// down and its weak back-reference can no longer be upgraded.
    pub(crate) fn detach(&self) {
        self.interest.set(Interest::default());
        self.state.set(RegistrationState::Unregistered);
    }

    /// Applies one interest mutation and unconditionally propagates the
    /// post-mutation mask to the multiplexer, even when the mutation
    /// was a no-op. The affinity check runs before anything is touched.
    fn mutate_interest(&self, mutation: impl FnOnce(&mut Interest)) {
        let event_loop = self.owner_loop();
        event_loop.assert_in_loop_thread();

        let mut interest = self.interest.get();
        mutation(&mut interest);
        self.interest.set(interest);

        event_loop.update_handle(self);
    }
}

impl Drop for EventHandle {
    fn drop(&mut self) {
        // Skipped during unwinding so a misuse panic does not escalate
        // into an abort.
        if !std::thread::panicking() {
            assert!(
                self.state.get() == RegistrationState::Unregistered
                    || self.interest.get().is_empty(),
                "handle for fd {} dropped while still registered with active interest",
                self.fd
            );
        }
    }
}
