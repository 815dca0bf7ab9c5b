//! Utility functionality

use std::fs::{self, DirBuilder, File, Permissions};
use std::io;
use std::os::unix::fs::{DirBuilderExt, PermissionsExt};
use std::path::{Path, PathBuf};

#[derive(Debug, thiserror::Error)]
pub enum PathBufExtError {
    #[error("relative path {0:?} cannot be converted to the path in the sandbox")]
    RelativePath(PathBuf),
}

pub trait PathBufExt {
    fn as_relative(&self) -> Result<&Path, PathBufExtError>;
}

impl PathBufExt for Path {
    fn as_relative(&self) -> Result<&Path, PathBufExtError> {
        if !self.is_absolute() {
            return Err(PathBufExtError::RelativePath(self.to_path_buf()));
        }
        self.strip_prefix("/")
            .map_err(|_| PathBufExtError::RelativePath(self.to_path_buf()))
    }
}

/// Creates the specified directory and all missing parents with the given
/// permission bits. Directories that already exist are left untouched.
pub fn create_dir_all_with_mode<P: AsRef<Path>>(path: P, mode: u32) -> io::Result<()> {
    let path = path.as_ref();
    if path.is_dir() {
        return Ok(());
    }

    // DirBuilder applies the umask, so set every newly created level explicitly
    let mut missing = Vec::new();
    let mut current = Some(path);
    while let Some(dir) = current {
        if dir.exists() {
            break;
        }
        missing.push(dir.to_path_buf());
        current = dir.parent();
    }

    DirBuilder::new().recursive(true).mode(mode).create(path)?;
    for dir in missing {
        fs::set_permissions(&dir, Permissions::from_mode(mode))?;
    }
    Ok(())
}

/// Copy a regular file to `dst`, creating missing parent directories, and give
/// the copy exactly the permission bits of the source.
pub fn copy_with_mode<P: AsRef<Path>, Q: AsRef<Path>>(src: P, dst: Q) -> io::Result<u64> {
    let src = src.as_ref();
    let dst = dst.as_ref();
    let mode = fs::metadata(src)?.permissions().mode() & 0o7777;

    if let Some(parent) = dst.parent() {
        create_dir_all_with_mode(parent, mode)?;
    }

    let mut source = File::open(src)?;
    let mut destination = File::create(dst)?;
    destination.set_permissions(Permissions::from_mode(mode))?;
    io::copy(&mut source, &mut destination)
}
