use crate::handle::EventHandle;
use crate::multiplexer::Multiplexer;
use crate::multiplexer::common::{Waker, drain_event_fd};

use std::cell::{Cell, RefCell};
use std::io;
use std::sync::{Arc, Weak};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{Receiver, Sender, channel};
use std::thread::{self, ThreadId};
use std::time::Duration;

type Task = Box<dyn FnOnce() + Send + 'static>;

/// Upper bound on one blocking readiness query. The waker interrupts
/// the wait whenever something actually happens, so the exact value
/// only caps how long a completely idle loop sleeps.
const POLL_TIMEOUT: Duration = Duration::from_secs(10);

/// A single-threaded reactor loop.
///
/// An `EventLoop` is pinned to the thread that constructed it for its
/// entire lifetime. Each iteration of [`run`](Self::run) asks the
/// multiplexer which handles are ready, stores the reported readiness
/// on each and dispatches them one at a time, then runs any work queued
/// from other threads.
///
/// Handles bound to the loop may only be mutated and dispatched from
/// the loop's own thread; other threads marshal work onto the loop with
/// [`run_in_loop`](Self::run_in_loop) / [`queue_in_loop`](Self::queue_in_loop)
/// and may stop it with [`quit`](Self::quit).
pub struct EventLoop {
    /// Identity of the affined thread, captured at construction.
    thread: ThreadId,

    multiplexer: RefCell<Multiplexer>,

    running: Cell<bool>,

    /// Set while the loop is inside a readiness pass; removals
    /// requested from callbacks are deferred until the pass ends.
    dispatching: Cell<bool>,
    removals: RefCell<Vec<Weak<EventHandle>>>,

    quit: AtomicBool,

    /// Cross-thread task queue and the waker that interrupts a blocked
    /// poll when something lands on it.
    sender: Sender<Task>,
    receiver: Receiver<Task>,
    waker: Waker,

    /// The waker's eventfd, registered with this very loop so wake-ups
    /// ride the ordinary dispatch path.
    wakeup: RefCell<Option<Arc<EventHandle>>>,
}

// Interior state is Cell/RefCell with no locking; only `sender`, `waker`
// and `quit` are touched from other threads, and those are safe to
// share. Everything else is guarded by the affinity assertion at the
// top of every mutating operation.
unsafe impl Sync for EventLoop {}

impl EventLoop {
    /// Creates a loop affined to the current thread.
    ///
    /// # Panics
    ///
    /// Panics if the OS poller or the wakeup eventfd cannot be created.
    pub fn new() -> Arc<Self> {
        let (sender, receiver) = channel();

        let event_loop = Arc::new(Self {
            thread: thread::current().id(),
            multiplexer: RefCell::new(Multiplexer::new()),
            running: Cell::new(false),
            dispatching: Cell::new(false),
            removals: RefCell::new(Vec::new()),
            quit: AtomicBool::new(false),
            sender,
            receiver,
            waker: Waker::new(),
            wakeup: RefCell::new(None),
        });

        let wakeup_fd = event_loop.waker.fd();
        let wakeup = EventHandle::new(&event_loop, wakeup_fd);
        wakeup.set_read_callback(move |_| drain_event_fd(wakeup_fd));
        wakeup.enable_read();
        event_loop.wakeup.replace(Some(wakeup));

        event_loop
    }

    /// Whether the calling thread is the loop's affined thread.
    pub fn is_in_loop_thread(&self) -> bool {
        thread::current().id() == self.thread
    }

    /// Fails fatally if the calling thread is not the affined thread.
    ///
    /// Every mutating handle operation funnels through this check; the
    /// invariant it protects is structural and recovery is not
    /// attempted.
    pub fn assert_in_loop_thread(&self) {
        assert!(
            self.is_in_loop_thread(),
            "loop operation performed off the loop thread (affined to {:?}, called from {:?})",
            self.thread,
            thread::current().id()
        );
    }

    /// Runs the loop until [`quit`](Self::quit).
    ///
    /// Each iteration: poll → one dispatch per ready handle, each to
    /// completion before the next begins → flush deferred removals →
    /// run cross-thread-queued tasks.
    ///
    /// # Panics
    ///
    /// Panics when called off the loop thread or while already running.
    ///
    /// # Errors
    ///
    /// Returns the error if the OS readiness query fails.
    pub fn run(&self) -> io::Result<()> {
        self.assert_in_loop_thread();
        assert!(!self.running.get(), "event loop is already running");
        self.running.set(true);

        let mut active = Vec::with_capacity(16);

        while !self.quit.load(Ordering::Acquire) {
            active.clear();

            let timestamp = match self
                .multiplexer
                .borrow_mut()
                .poll(&mut active, POLL_TIMEOUT)
            {
                Ok(timestamp) => timestamp,
                Err(err) => {
                    self.running.set(false);
                    return Err(err);
                }
            };

            log::trace!("readiness pass: {} active handle(s)", active.len());

            self.dispatching.set(true);
            for (handle, readiness) in active.drain(..) {
                handle.set_reported(readiness);
                handle.dispatch(timestamp);
            }
            self.dispatching.set(false);

            self.flush_removals();
            self.run_pending_tasks();
        }

        self.running.set(false);
        Ok(())
    }

    /// Stops the loop after the current iteration. Callable from any
    /// thread; a blocked poll is woken. A quit issued before
    /// [`run`](Self::run) makes it return immediately.
    pub fn quit(&self) {
        self.quit.store(true, Ordering::Release);
        if !self.is_in_loop_thread() {
            self.waker.wake();
        }
    }

    /// Runs `task` on the loop thread: immediately when already called
    /// there, otherwise queued for the end of the next iteration.
    pub fn run_in_loop(&self, task: impl FnOnce() + Send + 'static) {
        if self.is_in_loop_thread() {
            task();
        } else {
            self.queue_in_loop(task);
        }
    }

    /// Queues `task` for the end of the next loop iteration and wakes
    /// the loop. Callable from any thread.
    pub fn queue_in_loop(&self, task: impl FnOnce() + Send + 'static) {
        self.sender
            .send(Box::new(task))
            .expect("task channel closed while the loop is alive");
        self.waker.wake();
    }

    /// Propagates a handle's current interest mask to the multiplexer.
    /// Invoked by every handle interest mutator.
    pub(crate) fn update_handle(&self, handle: &EventHandle) {
        self.assert_in_loop_thread();
        self.multiplexer.borrow_mut().update(handle);
    }

    /// Deregisters a handle from the multiplexer.
    ///
    /// When requested from inside a readiness pass (a callback removing
    /// its own handle) the physical removal is deferred until the
    /// pass's last dispatch has returned.
    pub(crate) fn remove_handle(&self, handle: &EventHandle) {
        self.assert_in_loop_thread();

        if self.dispatching.get() {
            self.removals.borrow_mut().push(handle.weak_ref());
        } else {
            self.multiplexer.borrow_mut().remove(handle);
        }
    }

    fn flush_removals(&self) {
        let pending: Vec<_> = self.removals.borrow_mut().drain(..).collect();
        for weak in pending {
            let Some(handle) = weak.upgrade() else {
                continue;
            };
            // A callback may have re-enabled interest after requesting
            // removal; such a handle stays registered.
            if handle.is_idle() {
                self.multiplexer.borrow_mut().remove(&handle);
            }
        }
    }

    fn run_pending_tasks(&self) {
        while let Ok(task) = self.receiver.try_recv() {
            task();
        }
    }
}

impl Drop for EventLoop {
    fn drop(&mut self) {
        if let Some(wakeup) = self.wakeup.borrow_mut().take() {
            // The weak back-reference inside the handle can no longer
            // be upgraded at this point, so it is detached directly
            // instead of through its mutators.
            wakeup.detach();
        }
    }
}
