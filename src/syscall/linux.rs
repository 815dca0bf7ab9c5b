//! Implements Syscall trait for Linux systems
use std::{any::Any, path::Path};

use nix::sched::{unshare, CloneFlags};
use nix::unistd;

use super::{Result, Syscall, SyscallError};

/// Empty structure to implement Syscall trait for
#[derive(Clone)]
pub struct LinuxSyscall;

impl Syscall for LinuxSyscall {
    /// To enable dynamic typing,
    /// see https://doc.rust-lang.org/std/any/index.html for more information
    fn as_any(&self) -> &dyn Any {
        self
    }

    /// Make the given path the root directory of this process.
    /// Requires CAP_SYS_CHROOT; there is no way back.
    fn chroot(&self, path: &Path) -> Result<()> {
        unistd::chroot(path).map_err(|errno| SyscallError::ChrootFailed {
            path: path.to_path_buf(),
            errno,
        })?;

        // the working directory still points outside the new root,
        // so move it inside before anything resolves relative paths
        unistd::chdir("/").map_err(SyscallError::ChdirFailed)?;
        Ok(())
    }

    /// Disassociate parts of execution context
    // see https://man7.org/linux/man-pages/man2/unshare.2.html for more information
    fn unshare(&self, flags: CloneFlags) -> Result<()> {
        unshare(flags).map_err(SyscallError::UnshareFailed)?;
        Ok(())
    }
}
