use vigil::{EventHandle, EventLoop, RegistrationState};

use std::os::fd::RawFd;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

#[test]
fn readiness_wakes_the_loop_and_dispatches() {
    let event_loop = EventLoop::new();
    let fd = new_event_fd();
    let handle = EventHandle::new(&event_loop, fd);

    let seen = Arc::new(AtomicUsize::new(0));
    {
        let seen = Arc::clone(&seen);
        let event_loop = Arc::clone(&event_loop);
        handle.set_read_callback(move |_timestamp| {
            drain_event_fd(fd);
            seen.fetch_add(1, Ordering::SeqCst);
            event_loop.quit();
        });
    }
    handle.enable_read();

    write_event_fd(fd);
    event_loop.run().expect("loop failed");

    assert_eq!(seen.load(Ordering::SeqCst), 1);

    handle.disable_all();
    handle.remove();
    close_fd(fd);
}

#[test]
fn queued_task_runs_on_the_loop_thread() {
    let event_loop = EventLoop::new();
    let loop_thread = thread::current().id();

    let observed = Arc::new(Mutex::new(None));

    {
        let event_loop = Arc::clone(&event_loop);
        let observed = Arc::clone(&observed);
        thread::spawn(move || {
            let quitter = Arc::clone(&event_loop);
            event_loop.queue_in_loop(move || {
                observed.lock().unwrap().replace(thread::current().id());
                quitter.quit();
            });
        })
        .join()
        .unwrap();
    }

    event_loop.run().expect("loop failed");

    assert_eq!(
        *observed.lock().unwrap(),
        Some(loop_thread),
        "queued work must execute on the affined thread"
    );
}

#[test]
fn quit_from_another_thread_stops_a_blocked_loop() {
    let event_loop = EventLoop::new();

    let remote = Arc::clone(&event_loop);
    let quitter = thread::spawn(move || {
        thread::sleep(Duration::from_millis(50));
        remote.quit();
    });

    event_loop.run().expect("loop failed");
    quitter.join().unwrap();
}

#[test]
fn run_in_loop_on_the_loop_thread_is_immediate() {
    let event_loop = EventLoop::new();

    let ran = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&ran);
    event_loop.run_in_loop(move || flag.store(true, Ordering::SeqCst));

    assert!(
        ran.load(Ordering::SeqCst),
        "no round-trip through the queue when already on the loop thread"
    );
}

#[test]
fn a_callback_may_remove_its_own_handle() {
    let event_loop = EventLoop::new();
    let fd = new_event_fd();
    let handle = EventHandle::new(&event_loop, fd);

    {
        let weak = Arc::downgrade(&handle);
        let event_loop = Arc::clone(&event_loop);
        handle.set_read_callback(move |_| {
            drain_event_fd(fd);
            if let Some(handle) = weak.upgrade() {
                handle.disable_all();
                handle.remove();
            }
            event_loop.quit();
        });
    }
    handle.enable_read();

    write_event_fd(fd);
    event_loop.run().expect("loop failed");

    assert!(handle.is_idle());
    assert_eq!(
        handle.registration_state(),
        RegistrationState::Unregistered,
        "deferred removal completes by the end of the pass"
    );

    close_fd(fd);
}

fn new_event_fd() -> RawFd {
    let fd = unsafe { libc::eventfd(0, libc::EFD_NONBLOCK | libc::EFD_CLOEXEC) };
    assert!(fd >= 0, "eventfd failed");
    fd
}

fn write_event_fd(fd: RawFd) {
    let buf: u64 = 1;
    unsafe {
        libc::write(fd, &buf as *const _ as *const _, 8);
    }
}

fn drain_event_fd(fd: RawFd) {
    let mut buf = 0u64;
    unsafe {
        libc::read(fd, &mut buf as *mut _ as *mut _, 8);
    }
}

fn close_fd(fd: RawFd) {
    unsafe { libc::close(fd) };
}
