//! Per-invocation context passed to every syscall handler.

use aemu_state::GuestMemory;

/// A request from a handler to stop the calling guest thread.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExitRequest {
    /// `exit`: only the calling thread stops.
    Thread(i32),
    /// `exit_group`: every thread of the process stops.
    Group(i32),
}

impl ExitRequest {
    /// Exit status carried by the request.
    #[must_use]
    pub const fn code(self) -> i32 {
        match self {
            Self::Thread(code) | Self::Group(code) => code,
        }
    }
}

/// The emulator state a syscall handler may touch.
///
/// Lives for one syscall. The guest thread that issued the call is blocked
/// until the handler returns, and the context is borrowed mutably for the whole
/// dispatch, so the same thread can never have two handlers in flight.
pub struct SyscallContext<'a> {
    memory: &'a dyn GuestMemory,
    pid: u32,
    tid: u32,
    exit: Option<ExitRequest>,
}

impl<'a> SyscallContext<'a> {
    /// Create a context for a syscall issued by thread `tid` of process `pid`.
    #[must_use]
    pub fn new(memory: &'a dyn GuestMemory, pid: u32, tid: u32) -> Self {
        Self {
            memory,
            pid,
            tid,
            exit: None,
        }
    }

    /// Accessor for the guest address space.
    #[must_use]
    pub fn memory(&self) -> &'a dyn GuestMemory {
        self.memory
    }

    #[must_use]
    pub const fn pid(&self) -> u32 {
        self.pid
    }

    #[must_use]
    pub const fn tid(&self) -> u32 {
        self.tid
    }

    /// Ask the dispatcher to stop the guest thread once this syscall returns.
    pub const fn request_exit(&mut self, request: ExitRequest) {
        self.exit = Some(request);
    }

    /// Take a pending exit request, if any.
    pub const fn take_exit(&mut self) -> Option<ExitRequest> {
        self.exit.take()
    }
}
