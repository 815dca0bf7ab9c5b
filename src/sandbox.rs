//! The isolated root filesystem the command runs in.
//!
//! A sandbox goes through two states. A [`PreparedSandbox`] is a fresh
//! temporary directory that is populated from the host with an image layer
//! and a copy of the command binary. It is removed again if it is dropped. Entering it
//! changes the root of the whole process and detaches it from the host's
//! mount, UTS and PID namespaces, producing a [`Sandbox`]. Neither step can be
//! undone, so a `Sandbox` has no teardown: it is the process's world for the
//! rest of its life.

use std::env;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tempfile::TempDir;

use crate::layer::{self, LayerError};
use crate::namespaces::Namespaces;
use crate::syscall::{Syscall, SyscallError};
use crate::utils::{self, PathBufExt, PathBufExtError};

const SANDBOX_PREFIX: &str = "pullrun";

#[derive(Debug, thiserror::Error)]
pub enum SandboxError {
    #[error("command {command:?} not found")]
    NotFound {
        command: String,
        #[source]
        source: io::Error,
    },
    #[error("command {0:?} is not a regular file")]
    NotRegularFile(PathBuf),
    #[error("failed to create sandbox directory")]
    CreateRoot(#[source] io::Error),
    #[error("invalid command path")]
    CommandPath(#[from] PathBufExtError),
    #[error("cannot copy command {src:?} to {dst:?}")]
    CopyCommand {
        src: PathBuf,
        dst: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to populate sandbox")]
    Populate(#[from] LayerError),
    #[error("cannot chroot to {0:?}")]
    ChangeRoot(PathBuf, #[source] SyscallError),
    #[error("cannot isolate namespaces")]
    Unshare(#[source] SyscallError),
}

type Result<T> = std::result::Result<T, SandboxError>;

/// Find the host binary for `command`.
///
/// A command containing a `/` is taken as a path, relative ones against the
/// current directory. A bare name is looked up on `PATH`. The result has to be
/// a regular file.
pub fn resolve_command(command: &str) -> Result<PathBuf> {
    let path = if command.contains('/') {
        let path = PathBuf::from(command);
        if path.is_absolute() {
            path
        } else {
            env::current_dir()
                .map_err(|source| SandboxError::NotFound {
                    command: command.to_owned(),
                    source,
                })?
                .join(path)
        }
    } else {
        which::which(command).map_err(|err| SandboxError::NotFound {
            command: command.to_owned(),
            source: io::Error::new(io::ErrorKind::NotFound, err),
        })?
    };

    let metadata = fs::metadata(&path).map_err(|source| SandboxError::NotFound {
        command: command.to_owned(),
        source,
    })?;
    if !metadata.is_file() {
        return Err(SandboxError::NotRegularFile(path));
    }

    log::debug!("resolved command {} to {:?}", command, path);
    Ok(path)
}

pub struct SandboxBuilder {
    command: PathBuf,
    parent: Option<PathBuf>,
}

impl SandboxBuilder {
    /// `command` is the resolved absolute host path of the binary to run.
    pub fn new<P: Into<PathBuf>>(command: P) -> Self {
        Self {
            command: command.into(),
            parent: None,
        }
    }

    /// Create the sandbox below `dir` instead of the system temp directory.
    pub fn with_parent<P: Into<PathBuf>>(mut self, dir: P) -> Self {
        self.parent = Some(dir.into());
        self
    }

    /// Check the command is still a regular file and create a uniquely named
    /// empty root for it.
    pub fn prepare(self) -> Result<PreparedSandbox> {
        let metadata = fs::metadata(&self.command).map_err(|source| SandboxError::NotFound {
            command: self.command.display().to_string(),
            source,
        })?;
        if !metadata.is_file() {
            return Err(SandboxError::NotRegularFile(self.command));
        }

        let mut builder = tempfile::Builder::new();
        builder.prefix(SANDBOX_PREFIX);
        let root = match &self.parent {
            Some(parent) => builder.tempdir_in(parent),
            None => builder.tempdir(),
        }
        .map_err(SandboxError::CreateRoot)?;
        log::debug!("created sandbox root {:?}", root.path());

        Ok(PreparedSandbox {
            root,
            command: self.command,
        })
    }
}

/// A sandbox that has not been entered yet. Dropping it removes the directory.
#[derive(Debug)]
pub struct PreparedSandbox {
    root: TempDir,
    command: PathBuf,
}

impl PreparedSandbox {
    /// Host path of the sandbox root.
    pub fn root(&self) -> &Path {
        self.root.path()
    }

    /// Path of the command, valid both on the host and inside the sandbox.
    pub fn command(&self) -> &Path {
        &self.command
    }

    /// Unpack an image layer into the root, then copy the command into it at
    /// the same absolute path it has on the host. Must happen before
    /// [`enter`], which hides every host path.
    ///
    /// [`enter`]: PreparedSandbox::enter
    pub fn populate<P: AsRef<Path>>(&self, archive: P) -> Result<()> {
        layer::extract(archive, self.root.path())?;
        let target = self.install_command()?;
        log::debug!("copied {:?} to {:?}", self.command, target);
        Ok(())
    }

    /// Directories on the way are resolved inside the root, so links from the
    /// layer such as `bin -> usr/bin` are followed and absolute ones stay
    /// scoped to it. A link at the command's own path is replaced.
    fn install_command(&self) -> Result<PathBuf> {
        let relative = self.command.as_relative()?;
        let (parent, file_name) = match (relative.parent(), relative.file_name()) {
            (Some(parent), Some(file_name)) => (parent, file_name),
            _ => return Err(SandboxError::NotRegularFile(self.command.clone())),
        };
        let copy_err = |dst: &Path, source: io::Error| SandboxError::CopyCommand {
            src: self.command.clone(),
            dst: dst.to_path_buf(),
            source,
        };

        let dir = safe_path::scoped_join(self.root.path(), parent)
            .map_err(|source| copy_err(&self.root.path().join(parent), source))?;
        let target = dir.join(file_name);
        if let Ok(metadata) = fs::symlink_metadata(&target) {
            if metadata.file_type().is_symlink() {
                fs::remove_file(&target).map_err(|source| copy_err(&target, source))?;
            }
        }

        utils::copy_with_mode(&self.command, &target).map_err(|source| copy_err(&target, source))?;
        Ok(target)
    }

    /// Change the root of the process to the sandbox, then detach from the
    /// host's mount, UTS and PID namespaces, in that order. The directory is
    /// kept from here on; if the chroot itself fails it is still removed.
    pub fn enter(self, syscall: &dyn Syscall) -> Result<Sandbox> {
        log::info!("entering sandbox {:?}", self.root.path());
        syscall
            .chroot(self.root.path())
            .map_err(|err| SandboxError::ChangeRoot(self.root.path().to_path_buf(), err))?;
        let root = self.root.keep();

        Namespaces::isolated(syscall)
            .apply_unshare()
            .map_err(SandboxError::Unshare)?;

        Ok(Sandbox {
            root,
            command: self.command,
        })
    }
}

/// An entered sandbox. There is no way back to the host root or namespaces.
#[derive(Debug)]
pub struct Sandbox {
    root: PathBuf,
    command: PathBuf,
}

impl Sandbox {
    /// Where the root lives as seen from the host, for diagnostics only.
    pub fn host_root(&self) -> &Path {
        &self.root
    }

    pub fn command(&self) -> &Path {
        &self.command
    }
}

#[cfg(test)]
mod tests {
    use std::fs::Permissions;
    use std::os::unix::fs::PermissionsExt;

    use anyhow::Result;
    use nix::sched::CloneFlags;

    use super::*;
    use crate::layer::tests::{build_layer, sample_layer, Entry};
    use crate::syscall::test::TestHelperSyscall;

    fn fake_binary(dir: &Path) -> Result<PathBuf> {
        let bin = dir.join("host/bin/tool");
        fs::create_dir_all(bin.parent().unwrap())?;
        fs::write(&bin, b"#!/bin/sh\n")?;
        fs::set_permissions(&bin, Permissions::from_mode(0o755))?;
        Ok(bin)
    }

    #[test]
    fn test_resolve_command_absolute() -> Result<()> {
        let tmp = tempfile::tempdir()?;
        let bin = fake_binary(tmp.path())?;
        assert_eq!(resolve_command(bin.to_str().unwrap())?, bin);
        Ok(())
    }

    #[test]
    fn test_resolve_command_on_path() -> Result<()> {
        let resolved = resolve_command("sh")?;
        assert!(resolved.is_absolute());
        assert!(resolved.ends_with("sh"));
        Ok(())
    }

    #[test]
    fn test_resolve_command_directory() -> Result<()> {
        let tmp = tempfile::tempdir()?;
        let err = resolve_command(tmp.path().to_str().unwrap()).unwrap_err();
        assert!(matches!(err, SandboxError::NotRegularFile(p) if p == tmp.path()));
        Ok(())
    }

    #[test]
    fn test_resolve_command_missing() {
        assert!(matches!(
            resolve_command("/definitely/not/here"),
            Err(SandboxError::NotFound { .. })
        ));
        assert!(matches!(
            resolve_command("pullrun-no-such-command"),
            Err(SandboxError::NotFound { .. })
        ));
    }

    fn write_layer(dir: &Path, layer: Vec<u8>) -> Result<PathBuf> {
        let archive = dir.join("layer.tar.gz");
        fs::write(&archive, layer)?;
        Ok(archive)
    }

    #[test]
    fn test_prepare_creates_empty_root() -> Result<()> {
        let tmp = tempfile::tempdir()?;
        let bin = fake_binary(tmp.path())?;

        let prepared = SandboxBuilder::new(&bin).with_parent(tmp.path()).prepare()?;
        assert!(prepared.root().starts_with(tmp.path()));
        assert_eq!(fs::read_dir(prepared.root())?.count(), 0);
        assert_eq!(prepared.command(), bin.as_path());
        Ok(())
    }

    #[test]
    fn test_prepare_rejects_directory() -> Result<()> {
        let tmp = tempfile::tempdir()?;
        let sandboxes = tmp.path().join("sandboxes");
        fs::create_dir(&sandboxes)?;

        let err = SandboxBuilder::new(tmp.path())
            .with_parent(&sandboxes)
            .prepare()
            .unwrap_err();
        assert!(matches!(err, SandboxError::NotRegularFile(_)));
        assert_eq!(fs::read_dir(&sandboxes)?.count(), 0);
        Ok(())
    }

    #[test]
    fn test_dropping_prepared_sandbox_removes_root() -> Result<()> {
        let tmp = tempfile::tempdir()?;
        let bin = fake_binary(tmp.path())?;
        let prepared = SandboxBuilder::new(&bin).with_parent(tmp.path()).prepare()?;
        let root = prepared.root().to_path_buf();
        drop(prepared);
        assert!(!root.exists());
        Ok(())
    }

    #[test]
    fn test_populate_copies_command_after_layer() -> Result<()> {
        let tmp = tempfile::tempdir()?;
        let bin = fake_binary(tmp.path())?;
        let archive = write_layer(tmp.path(), sample_layer()?)?;

        let prepared = SandboxBuilder::new(&bin).with_parent(tmp.path()).prepare()?;
        prepared.populate(&archive)?;

        assert!(prepared.root().join("etc/motd").is_file());
        let copy = prepared.root().join(bin.as_relative()?);
        assert_eq!(fs::read(&copy)?, fs::read(&bin)?);
        assert_eq!(fs::metadata(&copy)?.permissions().mode() & 0o7777, 0o755);
        Ok(())
    }

    #[test]
    fn test_populate_follows_merged_usr_link() -> Result<()> {
        let tmp = tempfile::tempdir()?;
        let sh = resolve_command("/bin/sh")?;
        let archive = write_layer(
            tmp.path(),
            build_layer(&[
                Entry::Dir("usr/"),
                Entry::Dir("usr/bin/"),
                Entry::Link("bin", "usr/bin"),
            ])?,
        )?;

        let prepared = SandboxBuilder::new(&sh).with_parent(tmp.path()).prepare()?;
        prepared.populate(&archive)?;

        let root = prepared.root();
        assert!(fs::symlink_metadata(root.join("bin"))?.file_type().is_symlink());
        assert_eq!(fs::read(root.join("usr/bin/sh"))?, fs::read(&sh)?);
        Ok(())
    }

    #[test]
    fn test_populate_keeps_absolute_link_inside_root() -> Result<()> {
        let tmp = tempfile::tempdir()?;
        let sh = resolve_command("/bin/sh")?;
        let archive = write_layer(
            tmp.path(),
            build_layer(&[
                Entry::Dir("usr/"),
                Entry::Dir("usr/bin/"),
                Entry::Link("bin", "/usr/bin"),
            ])?,
        )?;

        let prepared = SandboxBuilder::new(&sh).with_parent(tmp.path()).prepare()?;
        prepared.populate(&archive)?;

        assert_eq!(fs::read(prepared.root().join("usr/bin/sh"))?, fs::read(&sh)?);
        Ok(())
    }

    #[test]
    fn test_populate_replaces_link_at_command_path() -> Result<()> {
        let tmp = tempfile::tempdir()?;
        let sh = resolve_command("/bin/sh")?;
        let archive = write_layer(
            tmp.path(),
            build_layer(&[
                Entry::Dir("bin/"),
                Entry::File("bin/busybox", 0o755, b"busybox"),
                Entry::Link("bin/sh", "/bin/busybox"),
            ])?,
        )?;

        let prepared = SandboxBuilder::new(&sh).with_parent(tmp.path()).prepare()?;
        prepared.populate(&archive)?;

        let root = prepared.root();
        assert!(!fs::symlink_metadata(root.join("bin/sh"))?.file_type().is_symlink());
        assert_eq!(fs::read(root.join("bin/sh"))?, fs::read(&sh)?);
        assert_eq!(fs::read(root.join("bin/busybox"))?, b"busybox");
        Ok(())
    }

    #[test]
    fn test_populate_and_enter() -> Result<()> {
        let tmp = tempfile::tempdir()?;
        let bin = fake_binary(tmp.path())?;
        let archive = write_layer(tmp.path(), sample_layer()?)?;

        let prepared = SandboxBuilder::new(&bin).with_parent(tmp.path()).prepare()?;
        prepared.populate(&archive)?;

        let syscall = TestHelperSyscall::default();
        let sandbox = prepared.enter(&syscall)?;

        assert_eq!(syscall.get_chroot_args(), vec![sandbox.host_root().to_path_buf()]);
        assert_eq!(
            syscall.get_unshare_args(),
            vec![CloneFlags::CLONE_NEWNS | CloneFlags::CLONE_NEWUTS | CloneFlags::CLONE_NEWPID]
        );
        // entering keeps the directory
        assert!(sandbox.host_root().join(bin.as_relative()?).is_file());
        assert_eq!(sandbox.command(), bin.as_path());
        Ok(())
    }
}
