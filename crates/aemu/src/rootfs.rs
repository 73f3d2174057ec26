//! Host directory standing in for the guest's root filesystem.

use std::path::{Component, Path, PathBuf};

use crate::{Error, Result};

/// Guest path of the running executable's self reference.
///
/// The Android linker `stat`s this path during startup and bails if it is
/// missing, so the rootfs must carry a file there (empty is fine).
pub const SELF_EXE: &str = "/proc/self/exe";

/// A rootfs on the host.
#[derive(Clone, Debug)]
pub struct Rootfs {
    root: PathBuf,
}

impl Rootfs {
    /// Open the rootfs at `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if `path` is not an existing directory.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let root = path.into();
        if !root.is_dir() {
            return Err(Error::RootfsNotFound(root));
        }
        Ok(Self { root })
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Translate a guest path into a host path under the root.
    ///
    /// Relative paths are taken relative to the guest `/`. `..` never climbs
    /// above the root.
    #[must_use]
    pub fn host_path(&self, guest: &str) -> PathBuf {
        let mut parts: Vec<&str> = Vec::new();
        for part in guest.split('/') {
            match part {
                "" | "." => {}
                ".." => {
                    parts.pop();
                }
                part => parts.push(part),
            }
        }
        let mut host = self.root.clone();
        host.extend(parts);
        host
    }

    /// Translate a host path under the root back into a guest path.
    #[must_use]
    pub fn guest_path(&self, host: &Path) -> Option<String> {
        let relative = host.strip_prefix(&self.root).ok().map(Path::to_path_buf).or_else(|| {
            let root = self.root.canonicalize().ok()?;
            let host = host.canonicalize().ok()?;
            host.strip_prefix(root).ok().map(Path::to_path_buf)
        });
        let relative = relative?;
        let mut guest = String::new();
        for component in relative.components() {
            if let Component::Normal(part) = component {
                guest.push('/');
                guest.push_str(&part.to_string_lossy());
            }
        }
        if guest.is_empty() {
            guest.push('/');
        }
        Some(guest)
    }

    /// Ensure a regular file exists at `guest`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MissingFile`] naming the host path.
    pub fn require_file(&self, guest: &str) -> Result<PathBuf> {
        let host = self.host_path(guest);
        if host.is_file() {
            Ok(host)
        } else {
            Err(Error::MissingFile(host))
        }
    }

    /// Ensure the `/proc/self/exe` placeholder exists.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MissingSelfExe`] naming the host path.
    pub fn check_self_exe(&self) -> Result<PathBuf> {
        self.require_file(SELF_EXE).map_err(|e| match e {
            Error::MissingFile(path) => Error::MissingSelfExe(path),
            other => other,
        })
    }
}
