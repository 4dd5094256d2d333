#![forbid(unsafe_code)]
//! Positioned file I/O and the temp-file/rename commit used for every archive write.

use std::{
    fs::{self, File, OpenOptions},
    io::{self, ErrorKind},
    path::{Path, PathBuf},
    sync::Arc,
};

use tracing::{debug, warn};

use crate::types::{Result, RoadError};

/// Extension reserved for in-flight archive writes.
pub const TEMP_EXTENSION: &str = "tmp";

/// Trait for performing positioned file I/O operations.
pub trait FileIo: Send + Sync + 'static {
    /// Reads exactly `dst.len()` bytes at `off`.
    fn read_at(&self, off: u64, dst: &mut [u8]) -> Result<()>;
    /// Writes all of `src` at `off`.
    fn write_at(&self, off: u64, src: &[u8]) -> Result<()>;
    /// Synchronizes all file data and metadata to disk.
    fn sync_all(&self) -> Result<()>;
    /// Returns the current length of the file in bytes.
    fn len(&self) -> Result<u64>;
    /// Returns true if the file is empty.
    fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }
}

#[cfg(unix)]
mod platform {
    use std::{
        fs::File,
        io::{self, ErrorKind},
        os::unix::fs::FileExt,
    };

    pub fn read_exact(file: &File, mut off: u64, mut dst: &mut [u8]) -> io::Result<()> {
        while !dst.is_empty() {
            let read = file.read_at(dst, off)?;
            if read == 0 {
                return Err(io::Error::new(ErrorKind::UnexpectedEof, "read_at reached EOF"));
            }
            dst = &mut dst[read..];
            off += read as u64;
        }
        Ok(())
    }

    pub fn write_all(file: &File, mut off: u64, mut src: &[u8]) -> io::Result<()> {
        while !src.is_empty() {
            let written = file.write_at(src, off)?;
            if written == 0 {
                return Err(io::Error::new(ErrorKind::WriteZero, "write_at wrote zero bytes"));
            }
            src = &src[written..];
            off += written as u64;
        }
        Ok(())
    }
}

#[cfg(windows)]
mod platform {
    use std::{
        fs::File,
        io::{self, ErrorKind},
        os::windows::fs::FileExt,
    };

    pub fn read_exact(file: &File, mut off: u64, mut dst: &mut [u8]) -> io::Result<()> {
        while !dst.is_empty() {
            let read = file.seek_read(dst, off)?;
            if read == 0 {
                return Err(io::Error::new(ErrorKind::UnexpectedEof, "seek_read reached EOF"));
            }
            dst = &mut dst[read..];
            off += read as u64;
        }
        Ok(())
    }

    pub fn write_all(file: &File, mut off: u64, mut src: &[u8]) -> io::Result<()> {
        while !src.is_empty() {
            let written = file.seek_write(src, off)?;
            if written == 0 {
                return Err(io::Error::new(ErrorKind::WriteZero, "seek_write wrote zero bytes"));
            }
            src = &src[written..];
            off += written as u64;
        }
        Ok(())
    }
}

/// Standard file I/O implementation sharing one handle across readers.
#[derive(Clone)]
pub struct StdFileIo {
    inner: Arc<File>,
}

impl StdFileIo {
    /// Wraps an already opened file.
    pub fn new(file: File) -> Self {
        Self {
            inner: Arc::new(file),
        }
    }

    /// Opens an existing file for positioned reads.
    pub fn open_read(path: impl AsRef<Path>) -> Result<Self> {
        let file = File::open(path).map_err(RoadError::from)?;
        Ok(Self::new(file))
    }

    /// Creates (or truncates) a file for positioned writes.
    pub fn create(path: impl AsRef<Path>) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)
            .map_err(RoadError::from)?;
        Ok(Self::new(file))
    }

    fn file(&self) -> &File {
        &self.inner
    }
}

impl FileIo for StdFileIo {
    fn read_at(&self, off: u64, dst: &mut [u8]) -> Result<()> {
        platform::read_exact(self.file(), off, dst).map_err(RoadError::from)
    }

    fn write_at(&self, off: u64, src: &[u8]) -> Result<()> {
        platform::write_all(self.file(), off, src).map_err(RoadError::from)
    }

    fn sync_all(&self) -> Result<()> {
        self.file().sync_all().map_err(RoadError::from)
    }

    fn len(&self) -> Result<u64> {
        Ok(self.file().metadata().map_err(RoadError::from)?.len())
    }
}

/// Returns the in-flight path used while `target` is being rewritten.
pub fn temp_path(target: &Path) -> PathBuf {
    let mut name = target
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".");
    name.push(TEMP_EXTENSION);
    target.with_file_name(name)
}

/// Writes `target` through a temporary sibling file.
///
/// `write` receives a fresh file at [`temp_path`]. If it fails, the temporary
/// file is removed and `target` is left exactly as it was. On success the
/// temporary file is optionally synced and then renamed over `target`.
pub fn write_atomically<F>(target: &Path, sync: bool, write: F) -> Result<()>
where
    F: FnOnce(&StdFileIo) -> Result<()>,
{
    let tmp = temp_path(target);
    let io = StdFileIo::create(&tmp)?;
    let outcome = write(&io).and_then(|()| if sync { io.sync_all() } else { Ok(()) });
    drop(io);
    if let Err(err) = outcome {
        warn!(target = %target.display(), error = %err, "io.atomic.rollback");
        discard(&tmp);
        return Err(err);
    }
    if let Err(err) = replace(&tmp, target) {
        warn!(target = %target.display(), error = %err, "io.atomic.rename_failed");
        discard(&tmp);
        return Err(err.into());
    }
    debug!(target = %target.display(), "io.atomic.committed");
    Ok(())
}

#[cfg(not(windows))]
fn replace(tmp: &Path, target: &Path) -> io::Result<()> {
    fs::rename(tmp, target)
}

#[cfg(windows)]
fn replace(tmp: &Path, target: &Path) -> io::Result<()> {
    match fs::remove_file(target) {
        Ok(()) => {}
        Err(err) if err.kind() == ErrorKind::NotFound => {}
        Err(err) => return Err(err),
    }
    fs::rename(tmp, target)
}

fn discard(tmp: &Path) {
    match fs::remove_file(tmp) {
        Ok(()) => {}
        Err(err) if err.kind() == ErrorKind::NotFound => {}
        Err(err) => warn!(path = %tmp.display(), error = %err, "io.atomic.cleanup_failed"),
    }
}
