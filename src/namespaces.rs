//! Namespaces provide isolation of resources for processes at a kernel level.
//! pullrun detaches itself from three of them before running the command:
//! Mount (filesystem mount table),
//! UTS (hostname and domain name),
//! Process (the next child becomes PID 1 of a new process tree).
//! Network and user namespaces are left shared with the host.

use nix::sched::CloneFlags;

use crate::syscall::{Result, Syscall};

pub struct Namespaces<'a> {
    command: &'a dyn Syscall,
    pub clone_flags: CloneFlags,
}

impl<'a> Namespaces<'a> {
    /// The set of namespaces every launched command is isolated with.
    pub fn isolated(command: &'a dyn Syscall) -> Self {
        Namespaces {
            command,
            clone_flags: CloneFlags::CLONE_NEWNS
                | CloneFlags::CLONE_NEWUTS
                | CloneFlags::CLONE_NEWPID,
        }
    }

    /// Detach from all configured namespaces in a single unshare(2) call.
    ///
    /// A new PID namespace only applies to children created afterwards, so this
    /// must run after every copy or extract step and right before the spawn.
    pub fn apply_unshare(&self) -> Result<()> {
        log::debug!("unshare namespaces {:?}", self.clone_flags);
        self.command.unshare(self.clone_flags)?;
        Ok(())
    }
}
