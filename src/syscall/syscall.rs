//! An interface trait so that rest of pullrun can call
//! necessary functions without having to worry about their
//! implementation details
use std::{any::Any, path::Path};

use nix::sched::CloneFlags;

use super::Result;
use crate::syscall::{linux::LinuxSyscall, test::TestHelperSyscall};

/// This specifies the kernel functionality required to isolate the launched
/// command. Both calls change state for the whole process and cannot be undone.
pub trait Syscall {
    fn as_any(&self) -> &dyn Any;
    fn chroot(&self, path: &Path) -> Result<()>;
    fn unshare(&self, flags: CloneFlags) -> Result<()>;
}

pub fn create_syscall() -> Box<dyn Syscall> {
    if cfg!(test) {
        Box::<TestHelperSyscall>::default()
    } else {
        Box::new(LinuxSyscall)
    }
}
