//! Built-in syscall table used when no override is registered.
//!
//! Covers the calls the Android linker and a hello-world binary make around
//! startup. Everything else returns `-ENOSYS`.

use std::fs;
use std::io::{self, ErrorKind, Write};
use std::os::unix::fs::MetadataExt;
use std::sync::atomic::{AtomicU64, Ordering};

use aemu_state::GuestMemory;
use aemu_syscall::errno::{EBADF, EFAULT, EINVAL, ENAMETOOLONG, ENOENT, ENOSYS, neg};
use aemu_syscall::{ExitRequest, SyscallArgs, SyscallContext, SyscallTable, nr};
use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::rootfs::{Rootfs, SELF_EXE};

/// `AT_FDCWD` as seen in a 32-bit dirfd argument.
const AT_FDCWD: i32 = -100;

/// Guest path buffer size, terminating NUL included.
const PATH_MAX: usize = 4096;

/// Size of the AArch64 `struct stat`.
const STAT_SIZE: usize = 128;

/// Largest single `write` forwarded to the host.
const MAX_WRITE: u64 = 1 << 20;

/// Default syscall implementations backed by the rootfs on the host.
pub struct BuiltinSyscalls {
    rootfs: Rootfs,
    /// Guest path returned for `readlink("/proc/self/exe")`.
    exe_path: String,
    brk: AtomicU64,
    output: Mutex<Vec<u8>>,
    echo: bool,
}

impl BuiltinSyscalls {
    #[must_use]
    pub fn new(rootfs: Rootfs, exe_path: impl Into<String>, echo: bool) -> Self {
        Self {
            rootfs,
            exe_path: exe_path.into(),
            brk: AtomicU64::new(0),
            output: Mutex::new(Vec::new()),
            echo,
        }
    }

    /// Set the initial program break once the image is loaded.
    pub fn set_brk(&self, brk: u64) {
        self.brk.store(brk, Ordering::Relaxed);
    }

    /// Drain everything the guest wrote to stdout and stderr.
    pub fn take_output(&self) -> Vec<u8> {
        std::mem::take(&mut *self.output.lock())
    }

    fn write(&self, ctx: &SyscallContext<'_>, args: &SyscallArgs) -> i64 {
        let fd = args.get_i32(0);
        if fd != 1 && fd != 2 {
            return neg(EBADF);
        }
        let count = args[2].min(MAX_WRITE);
        #[allow(clippy::cast_possible_truncation)]
        let mut data = vec![0u8; count as usize];
        if ctx.memory().read(args[1], &mut data).is_err() {
            return neg(EFAULT);
        }

        if self.echo {
            let _ = if fd == 1 {
                io::stdout().write_all(&data)
            } else {
                io::stderr().write_all(&data)
            };
        }
        self.output.lock().extend_from_slice(&data);
        i64::try_from(count).unwrap_or(i64::MAX)
    }

    fn readlinkat(&self, ctx: &SyscallContext<'_>, args: &SyscallArgs) -> i64 {
        let bufsiz = match usize::try_from(args.get_i32(3)) {
            Ok(bufsiz) if bufsiz > 0 => bufsiz,
            _ => return neg(EINVAL),
        };
        let path = match read_path(ctx, args.get_i32(0), args[1]) {
            Ok(path) => path,
            Err(errno) => return neg(errno),
        };

        let target = if path == SELF_EXE {
            self.exe_path.clone()
        } else {
            match fs::read_link(self.rootfs.host_path(&path)) {
                Ok(target) => target.to_string_lossy().into_owned(),
                Err(e) if e.kind() == ErrorKind::NotFound => return neg(ENOENT),
                Err(_) => return neg(EINVAL),
            }
        };

        // readlink does not NUL-terminate and silently truncates.
        let len = target.len().min(bufsiz);
        if ctx.memory().write(args[2], &target.as_bytes()[..len]).is_err() {
            return neg(EFAULT);
        }
        i64::try_from(len).unwrap_or(i64::MAX)
    }

    fn newfstatat(&self, ctx: &SyscallContext<'_>, args: &SyscallArgs) -> i64 {
        let path = match read_path(ctx, args.get_i32(0), args[1]) {
            Ok(path) => path,
            Err(errno) => return neg(errno),
        };
        let host = self.rootfs.host_path(&path);
        let meta = match fs::metadata(&host) {
            Ok(meta) => meta,
            Err(_) => {
                debug!(path = %path, host = %host.display(), "stat target missing from rootfs");
                return neg(ENOENT);
            }
        };

        if ctx.memory().write(args[2], &encode_stat(&meta)).is_err() {
            return neg(EFAULT);
        }
        0
    }

    fn faccessat(&self, ctx: &SyscallContext<'_>, args: &SyscallArgs) -> i64 {
        match read_path(ctx, args.get_i32(0), args[1]) {
            Ok(path) if self.rootfs.host_path(&path).exists() => 0,
            Ok(_) => neg(ENOENT),
            Err(errno) => neg(errno),
        }
    }
}

impl SyscallTable for BuiltinSyscalls {
    fn call(&self, number: u64, ctx: &mut SyscallContext<'_>, args: &SyscallArgs) -> i64 {
        match number {
            nr::WRITE => self.write(ctx, args),
            nr::READLINKAT => self.readlinkat(ctx, args),
            nr::NEWFSTATAT => self.newfstatat(ctx, args),
            nr::FACCESSAT => self.faccessat(ctx, args),
            nr::EXIT => {
                ctx.request_exit(ExitRequest::Thread(args.get_i32(0)));
                0
            }
            nr::EXIT_GROUP => {
                ctx.request_exit(ExitRequest::Group(args.get_i32(0)));
                0
            }
            nr::GETPID => i64::from(ctx.pid()),
            nr::GETTID | nr::SET_TID_ADDRESS => i64::from(ctx.tid()),
            // Growing the break is not supported; returning the current break
            // tells the guest the request failed.
            nr::BRK => i64::try_from(self.brk.load(Ordering::Relaxed)).unwrap_or(i64::MAX),
            _ => {
                warn!(
                    tid = ctx.tid(),
                    "unsupported syscall {number} ({}) {args:?}",
                    nr::name(number).unwrap_or("unknown")
                );
                neg(ENOSYS)
            }
        }
    }
}

/// Read a path argument, resolving it against the guest's `/` working directory.
fn read_path(ctx: &SyscallContext<'_>, dirfd: i32, addr: u64) -> Result<String, i64> {
    let bytes = ctx
        .memory()
        .read_cstr(addr, PATH_MAX - 1)
        .map_err(|_| EFAULT)?
        .ok_or(ENAMETOOLONG)?;
    let path = String::from_utf8_lossy(&bytes).into_owned();
    if path.is_empty() {
        return Err(ENOENT);
    }
    if !path.starts_with('/') && dirfd != AT_FDCWD {
        // No descriptor table: only absolute and cwd-relative lookups resolve.
        return Err(EBADF);
    }
    Ok(path)
}

/// Encode host metadata as an AArch64 `struct stat`.
fn encode_stat(meta: &fs::Metadata) -> [u8; STAT_SIZE] {
    let nlink = u32::try_from(meta.nlink()).unwrap_or(u32::MAX);
    let blksize = u32::try_from(meta.blksize()).unwrap_or(u32::MAX);
    let mut out = [0u8; STAT_SIZE];
    let mut put = |offset: usize, bytes: &[u8]| {
        out[offset..offset + bytes.len()].copy_from_slice(bytes);
    };
    put(0, &meta.dev().to_le_bytes());
    put(8, &meta.ino().to_le_bytes());
    put(16, &meta.mode().to_le_bytes());
    put(20, &nlink.to_le_bytes());
    put(24, &meta.uid().to_le_bytes());
    put(28, &meta.gid().to_le_bytes());
    put(32, &meta.rdev().to_le_bytes());
    put(48, &meta.size().to_le_bytes());
    put(56, &blksize.to_le_bytes());
    put(64, &meta.blocks().to_le_bytes());
    put(72, &meta.atime().to_le_bytes());
    put(80, &meta.atime_nsec().to_le_bytes());
    put(88, &meta.mtime().to_le_bytes());
    put(96, &meta.mtime_nsec().to_le_bytes());
    put(104, &meta.ctime().to_le_bytes());
    put(112, &meta.ctime_nsec().to_le_bytes());
    out
}

#[cfg(test)]
mod tests {
    use aemu_state::{AddressSpace, Prot};

    use super::*;

    const SCRATCH: u64 = 0x20_0000;

    struct Fixture {
        _dir: tempfile::TempDir,
        builtins: BuiltinSyscalls,
        space: AddressSpace,
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("proc/self")).unwrap();
        fs::write(dir.path().join("proc/self/exe"), b"").unwrap();
        fs::create_dir_all(dir.path().join("bin")).unwrap();
        fs::write(dir.path().join("bin/hello"), b"0123456789").unwrap();

        let rootfs = Rootfs::open(dir.path()).unwrap();
        let space = AddressSpace::new();
        space.map(SCRATCH, 0x2000, Prot::READ | Prot::WRITE).unwrap();
        Fixture {
            _dir: dir,
            builtins: BuiltinSyscalls::new(rootfs, "/bin/hello", false),
            space,
        }
    }

    impl Fixture {
        fn call(&self, number: u64, args: &[u64]) -> (i64, Option<ExitRequest>) {
            let mut ctx = SyscallContext::new(&self.space, 7, 8);
            let ret = self
                .builtins
                .call(number, &mut ctx, &SyscallArgs::from_slice(args).unwrap());
            (ret, ctx.take_exit())
        }

        fn put_str(&self, addr: u64, s: &str) {
            self.space.write(addr, s.as_bytes()).unwrap();
            self.space.write(addr + s.len() as u64, &[0]).unwrap();
        }
    }

    #[allow(clippy::cast_sign_loss, clippy::cast_lossless)]
    const fn fdcwd() -> u64 {
        AT_FDCWD as i64 as u64
    }

    #[test]
    fn test_write_captures_stdout() {
        let f = fixture();
        f.space.write(SCRATCH, b"hello\n").unwrap();
        assert_eq!(f.call(nr::WRITE, &[1, SCRATCH, 6]).0, 6);
        assert_eq!(f.call(nr::WRITE, &[5, SCRATCH, 6]).0, -EBADF);
        assert_eq!(f.call(nr::WRITE, &[2, 0x10, 6]).0, -EFAULT);
        assert_eq!(f.builtins.take_output(), b"hello\n");
        assert!(f.builtins.take_output().is_empty());
    }

    #[test]
    fn test_exit_requests() {
        let f = fixture();
        assert_eq!(f.call(nr::EXIT, &[3]), (0, Some(ExitRequest::Thread(3))));
        assert_eq!(f.call(nr::EXIT_GROUP, &[0]), (0, Some(ExitRequest::Group(0))));
    }

    #[test]
    fn test_ids() {
        let f = fixture();
        assert_eq!(f.call(nr::GETPID, &[]).0, 7);
        assert_eq!(f.call(nr::GETTID, &[]).0, 8);
        assert_eq!(f.call(nr::SET_TID_ADDRESS, &[SCRATCH]).0, 8);
    }

    #[test]
    fn test_readlink_self_exe() {
        let f = fixture();
        f.put_str(SCRATCH, SELF_EXE);
        let out = SCRATCH + 0x100;
        assert_eq!(f.call(nr::READLINKAT, &[fdcwd(), SCRATCH, out, 64]).0, 10);

        let mut buf = [0u8; 10];
        f.space.read(out, &mut buf).unwrap();
        assert_eq!(&buf, b"/bin/hello");

        // Truncated to the buffer size.
        assert_eq!(f.call(nr::READLINKAT, &[fdcwd(), SCRATCH, out, 4]).0, 4);

        // bufsiz is an int and must be positive.
        assert_eq!(f.call(nr::READLINKAT, &[fdcwd(), SCRATCH, out, 0]).0, -EINVAL);
        assert_eq!(f.call(nr::READLINKAT, &[fdcwd(), SCRATCH, out, u64::MAX]).0, -EINVAL);
    }

    #[test]
    fn test_path_max_counts_terminator() {
        let f = fixture();
        let long = format!("/{}", "a".repeat(PATH_MAX - 1));
        f.put_str(SCRATCH, &long);
        assert_eq!(f.call(nr::FACCESSAT, &[fdcwd(), SCRATCH, 0]).0, -ENAMETOOLONG);

        let fits = &long[..PATH_MAX - 1];
        f.put_str(SCRATCH, fits);
        assert_eq!(f.call(nr::FACCESSAT, &[fdcwd(), SCRATCH, 0]).0, -ENOENT);
    }

    #[test]
    fn test_stat_resolves_through_rootfs() {
        let f = fixture();
        let statbuf = SCRATCH + 0x200;

        f.put_str(SCRATCH, "/bin/hello");
        assert_eq!(f.call(nr::NEWFSTATAT, &[fdcwd(), SCRATCH, statbuf, 0]).0, 0);
        assert_eq!(f.space.read_u64(statbuf + 48).unwrap(), 10);

        f.put_str(SCRATCH, SELF_EXE);
        assert_eq!(f.call(nr::NEWFSTATAT, &[fdcwd(), SCRATCH, statbuf, 0]).0, 0);

        f.put_str(SCRATCH, "/system/bin/linker64");
        assert_eq!(f.call(nr::NEWFSTATAT, &[fdcwd(), SCRATCH, statbuf, 0]).0, -ENOENT);
    }

    #[test]
    fn test_relative_path_needs_cwd() {
        let f = fixture();
        f.put_str(SCRATCH, "bin/hello");
        assert_eq!(f.call(nr::FACCESSAT, &[fdcwd(), SCRATCH, 0]).0, 0);
        assert_eq!(f.call(nr::FACCESSAT, &[3, SCRATCH, 0]).0, -EBADF);
    }

    #[test]
    fn test_unknown_is_enosys() {
        let f = fixture();
        assert_eq!(f.call(nr::CLONE, &[]).0, -ENOSYS);
    }

    #[test]
    fn test_brk_reports_current_break() {
        let f = fixture();
        f.builtins.set_brk(0x55_0000);
        assert_eq!(f.call(nr::BRK, &[0]).0, 0x55_0000);
        assert_eq!(f.call(nr::BRK, &[0x60_0000]).0, 0x55_0000);
    }
}
