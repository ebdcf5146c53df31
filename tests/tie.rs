use vigil::{EventHandle, EventLoop, Readiness};

use std::cell::Cell;
use std::os::fd::RawFd;
use std::rc::Rc;
use std::sync::Arc;
use std::time::Instant;

struct Owner;

#[test]
fn tied_handle_dispatches_while_owner_is_alive() {
    let event_loop = EventLoop::new();
    let fd = new_event_fd();
    let handle = EventHandle::new(&event_loop, fd);

    let owner = Arc::new(Owner);
    handle.tie(&owner);

    let reads = Rc::new(Cell::new(0));
    let count = Rc::clone(&reads);
    handle.set_read_callback(move |_| count.set(count.get() + 1));

    handle.set_reported(Readiness {
        readable: true,
        ..Readiness::default()
    });
    handle.dispatch(Instant::now());

    assert_eq!(reads.get(), 1);

    close_fd(fd);
}

#[test]
fn dispatch_after_owner_destruction_is_a_silent_noop() {
    let event_loop = EventLoop::new();
    let fd = new_event_fd();
    let handle = EventHandle::new(&event_loop, fd);

    let owner = Arc::new(Owner);
    handle.tie(&owner);

    let reads = Rc::new(Cell::new(0));
    let count = Rc::clone(&reads);
    handle.set_read_callback(move |_| count.set(count.get() + 1));

    // The owner goes away between being scheduled and being
    // dispatched; this is the exact hazard the guard exists for.
    drop(owner);

    handle.set_reported(Readiness {
        readable: true,
        closed: true,
        error: true,
        ..Readiness::default()
    });
    handle.dispatch(Instant::now());

    assert_eq!(reads.get(), 0, "no callback may fire for a dead owner");

    close_fd(fd);
}

#[test]
fn guard_holds_the_owner_for_the_whole_dispatch() {
    let event_loop = EventLoop::new();
    let fd = new_event_fd();
    let handle = EventHandle::new(&event_loop, fd);

    let owner = Arc::new(Owner);
    handle.tie(&owner);

    // Drop the caller's strong reference from inside the first
    // callback; the guard's upgraded reference must keep the owner
    // alive until the second callback has returned.
    let weak = Arc::downgrade(&owner);
    let slot = Rc::new(Cell::new(Some(owner)));

    let drop_slot = Rc::clone(&slot);
    handle.set_read_callback(move |_| {
        drop_slot.take();
    });

    let observed = Rc::new(Cell::new(false));
    let seen = Rc::clone(&observed);
    let weak_in_write = weak.clone();
    handle.set_write_callback(move || {
        seen.set(weak_in_write.upgrade().is_some());
    });

    handle.set_reported(Readiness {
        readable: true,
        writable: true,
        ..Readiness::default()
    });
    handle.dispatch(Instant::now());

    assert!(
        observed.get(),
        "owner must still be alive in the second callback of the pass"
    );
    assert!(
        weak.upgrade().is_none(),
        "owner is released once the dispatch has completed"
    );

    close_fd(fd);
}

fn new_event_fd() -> RawFd {
    let fd = unsafe { libc::eventfd(0, libc::EFD_NONBLOCK | libc::EFD_CLOEXEC) };
    assert!(fd >= 0, "eventfd failed");
    fd
}

fn close_fd(fd: RawFd) {
    unsafe { libc::close(fd) };
}
