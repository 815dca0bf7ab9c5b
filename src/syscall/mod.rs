//! Contains a wrapper of syscalls for unit tests
//! This provides a uniform interface for rest of pullrun
//! to call the process-wide syscalls needed for isolation

pub mod linux;
#[allow(clippy::module_inception)]
pub mod syscall;

pub use syscall::{create_syscall, Syscall};

#[derive(Debug, thiserror::Error)]
pub enum SyscallError {
    #[error("failed to chroot to {path:?}: {errno}")]
    ChrootFailed {
        path: std::path::PathBuf,
        errno: nix::errno::Errno,
    },
    #[error("failed to change directory to / after chroot: {0}")]
    ChdirFailed(nix::errno::Errno),
    #[error("failed to unshare: {0}")]
    UnshareFailed(nix::errno::Errno),
}

pub type Result<T> = std::result::Result<T, SyscallError>;
