/// The readiness event kinds a handle wants to be notified about.
///
/// An `Interest` is the handle-side half of the multiplexer contract:
/// it is mutated through the handle's `enable_*`/`disable_*` operations
/// and propagated to the multiplexer after every mutation.
#[derive(Clone, Copy, Default, PartialEq, Eq, Debug)]
pub struct Interest {
    /// The handle wants read-readiness notifications.
    pub read: bool,

    /// The handle wants write-readiness notifications.
    pub write: bool,
}

impl Interest {
    /// Returns `true` when no event kind is currently requested.
    pub fn is_empty(self) -> bool {
        !self.read && !self.write
    }
}

/// The readiness observed by the multiplexer for one handle in one pass.
///
/// Written onto the handle by the event loop immediately before
/// `dispatch`, and interpreted there with a fixed precedence; several
/// bits may be set at once.
#[derive(Clone, Copy, Default, PartialEq, Eq, Debug)]
pub struct Readiness {
    /// Data can be read without blocking.
    pub readable: bool,

    /// Exceptional/priority data is pending. Folded into the read path
    /// at dispatch time.
    pub priority: bool,

    /// Data can be written without blocking.
    pub writable: bool,

    /// The peer hung up.
    pub closed: bool,

    /// An error condition is pending on the resource.
    pub error: bool,
}

/// Membership of a handle in the multiplexer's registration table.
///
/// The tag lives on the handle for O(1) bookkeeping, but the transition
/// policy belongs to the multiplexer; the handle only exposes get/set
/// accessors.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum RegistrationState {
    /// Never registered, or fully deregistered.
    Unregistered,

    /// Present in the registration table and known to the OS poller.
    Registered,

    /// Still in the registration table but detached from the OS poller;
    /// re-enabling interest revives it without a full re-registration.
    PendingRemoval,
}
