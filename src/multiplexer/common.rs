use std::os::fd::RawFd;

/// Interrupts a blocked readiness query from another thread.
///
/// The waker wraps a non-blocking `eventfd`. The owning loop registers
/// the descriptor with its own multiplexer through an ordinary event
/// handle, so a cross-thread wake-up rides the normal dispatch path:
/// writing to the counter makes the descriptor readable and the poll
/// returns.
pub(crate) struct Waker(RawFd);

impl Waker {
    /// Creates the waker's eventfd. Failure is fatal.
    pub(crate) fn new() -> Self {
        let fd = unsafe { libc::eventfd(0, libc::EFD_NONBLOCK | libc::EFD_CLOEXEC) };
        assert!(fd >= 0, "eventfd failed");
        Self(fd)
    }

    pub(crate) fn fd(&self) -> RawFd {
        self.0
    }

    /// Makes the waker's descriptor readable, forcing a blocked poll
    /// to return. Callable from any thread.
    pub(crate) fn wake(&self) {
        let buf: u64 = 1;
        unsafe {
            libc::write(self.0, &buf as *const _ as *const _, 8);
        }
    }
}

impl Drop for Waker {
    fn drop(&mut self) {
        sys_close(self.0);
    }
}

/// Resets an eventfd counter after a wake-up has been observed.
pub(crate) fn drain_event_fd(fd: RawFd) {
    let mut buf = 0u64;
    unsafe {
        libc::read(fd, &mut buf as *mut _ as *mut _, 8);
    }
}

pub(crate) fn sys_close(fd: RawFd) {
    unsafe { libc::close(fd) };
}
