//! Syscall override registry.

use std::sync::Arc;

use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use tracing::debug;

use crate::args::SyscallArgs;
use crate::context::SyscallContext;
use crate::nr;

/// A substitute implementation for one syscall number.
///
/// Receives the per-call context and the argument words, returns the value the
/// guest sees in its return register (negative errno on failure).
///
/// Handlers run synchronously on the issuing guest thread and block it until
/// they return. There is no timeout: a handler that never returns hangs its
/// guest thread.
pub type SyscallHandler = Arc<dyn Fn(&mut SyscallContext<'_>, &SyscallArgs) -> i64 + Send + Sync>;

/// Result of consulting the registry.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Outcome {
    /// An override ran and produced this return value.
    Handled(i64),
    /// No override is registered; the caller falls back to its default table.
    Unhandled,
}

/// The framework's default syscall implementations, used on [`Outcome::Unhandled`].
pub trait SyscallTable: Send + Sync {
    /// Execute syscall `nr` and return the guest-visible result.
    fn call(&self, nr: u64, ctx: &mut SyscallContext<'_>, args: &SyscallArgs) -> i64;
}

/// Mapping from syscall number to override handler.
///
/// Registration is expected before emulation starts but is allowed at any
/// time. Dispatch clones the handler out of the table and releases the lock
/// before calling it, so a dispatch in flight always completes with the
/// handler it looked up even if another thread re-registers meanwhile.
#[derive(Default)]
pub struct SyscallRegistry {
    handlers: RwLock<FxHashMap<u64, SyscallHandler>>,
}

impl SyscallRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Install `handler` for `nr`, replacing any previous one.
    ///
    /// Returns the replaced handler.
    pub fn register<F>(&self, nr: u64, handler: F) -> Option<SyscallHandler>
    where
        F: Fn(&mut SyscallContext<'_>, &SyscallArgs) -> i64 + Send + Sync + 'static,
    {
        self.register_handler(nr, Arc::new(handler))
    }

    /// Install an already shared handler for `nr`, replacing any previous one.
    pub fn register_handler(&self, nr: u64, handler: SyscallHandler) -> Option<SyscallHandler> {
        let previous = self.handlers.write().insert(nr, handler);
        debug!(
            nr,
            name = nr::name(nr).unwrap_or("?"),
            replaced = previous.is_some(),
            "registered syscall override"
        );
        previous
    }

    /// Remove the override for `nr`.
    pub fn unregister(&self, nr: u64) -> Option<SyscallHandler> {
        self.handlers.write().remove(&nr)
    }

    /// Check whether `nr` has an override.
    #[must_use]
    pub fn contains(&self, nr: u64) -> bool {
        self.handlers.read().contains_key(&nr)
    }

    /// Number of registered overrides.
    #[must_use]
    pub fn len(&self) -> usize {
        self.handlers.read().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.handlers.read().is_empty()
    }

    /// Overridden syscall numbers in ascending order.
    #[must_use]
    pub fn numbers(&self) -> Vec<u64> {
        let mut numbers: Vec<u64> = self.handlers.read().keys().copied().collect();
        numbers.sort_unstable();
        numbers
    }

    /// Drop every override. Called when the session is torn down.
    pub fn clear(&self) {
        self.handlers.write().clear();
    }

    /// Run the override for `nr`, if one is registered.
    pub fn dispatch(&self, nr: u64, ctx: &mut SyscallContext<'_>, args: &SyscallArgs) -> Outcome {
        let handler = self.handlers.read().get(&nr).cloned();
        handler.map_or(Outcome::Unhandled, |handler| Outcome::Handled(handler(ctx, args)))
    }
}
