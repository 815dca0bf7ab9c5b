//! Unpacks a downloaded layer (a gzip compressed tar stream) into a directory.

use std::fs::File;
use std::path::{Path, PathBuf};

use flate2::read::GzDecoder;
use tar::Archive;

#[derive(Debug, thiserror::Error)]
pub enum LayerError {
    #[error("failed to open layer archive {path:?}")]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to unpack {archive:?} to {dest:?}")]
    Unpack {
        archive: PathBuf,
        dest: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Extract `archive` into `dest`, keeping the directory structure, file modes
/// and symbolic links recorded in the tar stream. Entries that would land
/// outside `dest` are skipped by the unpacker. Nothing is rolled back on error.
pub fn extract<P: AsRef<Path>, Q: AsRef<Path>>(archive: P, dest: Q) -> Result<(), LayerError> {
    let archive = archive.as_ref();
    let dest = dest.as_ref();
    log::debug!("extract {:?} into {:?}", archive, dest);

    let tar_gz = File::open(archive).map_err(|source| LayerError::Open {
        path: archive.to_path_buf(),
        source,
    })?;
    let mut tar = Archive::new(GzDecoder::new(tar_gz));
    tar.set_preserve_permissions(true);
    tar.set_preserve_mtime(true);
    tar.set_overwrite(true);
    tar.unpack(dest).map_err(|source| LayerError::Unpack {
        archive: archive.to_path_buf(),
        dest: dest.to_path_buf(),
        source,
    })?;

    Ok(())
}
