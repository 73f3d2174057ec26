//! Register convention glue between the guest CPU and the registry.

use aemu_state::Aarch64Regs;
use tracing::trace;

use crate::args::{MAX_SYSCALL_ARGS, SyscallArgs};
use crate::context::SyscallContext;
use crate::nr;
use crate::registry::{Outcome, SyscallRegistry, SyscallTable};

/// Where a syscall's number, arguments and result live in the register file.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SyscallAbi {
    pub number: usize,
    pub args: [usize; MAX_SYSCALL_ARGS],
    pub ret: usize,
}

impl SyscallAbi {
    /// Linux on AArch64: number in `x8`, arguments in `x0..x5`, result in `x0`.
    pub const AARCH64: Self = Self {
        number: 8,
        args: [0, 1, 2, 3, 4, 5],
        ret: 0,
    };

    #[must_use]
    pub fn number(&self, regs: &Aarch64Regs) -> u64 {
        regs.get(self.number)
    }

    #[must_use]
    pub fn args(&self, regs: &Aarch64Regs) -> SyscallArgs {
        SyscallArgs::new(self.args.map(|r| regs.get(r)))
    }

    /// Store a signed result as the two's-complement register value.
    #[allow(clippy::cast_sign_loss)]
    pub fn set_return(&self, regs: &mut Aarch64Regs, value: i64) {
        regs.set(self.ret, value as u64);
    }
}

/// Service a guest `svc #0` trap.
///
/// Overrides take precedence over `fallback`. The result is written back into
/// `x0` before returning it.
pub fn handle_svc(
    regs: &mut Aarch64Regs,
    registry: &SyscallRegistry,
    fallback: &dyn SyscallTable,
    ctx: &mut SyscallContext<'_>,
) -> i64 {
    let abi = SyscallAbi::AARCH64;
    let number = abi.number(regs);
    let args = abi.args(regs);
    let name = nr::name(number).unwrap_or("unknown");

    let (ret, route) = match registry.dispatch(number, ctx, &args) {
        Outcome::Handled(ret) => (ret, "override"),
        Outcome::Unhandled => (fallback.call(number, ctx, &args), "builtin"),
    };
    trace!(tid = ctx.tid(), pc = regs.pc, "{name}({args:?}) = {ret:#x} [{route}]");
    metrics::counter!("aemu_syscalls_total", "route" => route).increment(1);

    abi.set_return(regs, ret);
    ret
}
