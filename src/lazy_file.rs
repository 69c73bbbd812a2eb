use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};

/// A file segment identified by path, opened only while its bytes are being
/// read.
///
/// When a response spans many file segments, keeping every file open for the
/// duration of the response could exhaust the descriptor table. A `LazyFile`
/// holds no descriptor at all between reads; the emitter acquires one per
/// payload through [`LazyFile::with`] and releases it before moving on.
#[derive(Debug, Clone)]
pub struct LazyFile {
    path: PathBuf,
}

impl LazyFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        LazyFile { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Byte length of the file, stat'd on demand.
    pub fn size(&self) -> io::Result<u64> {
        Ok(std::fs::metadata(&self.path)?.len())
    }

    /// Opens the file read-only, runs `f` with the handle, and closes it on
    /// every exit path, errors and unwinds included.
    pub fn with<T, E>(&self, f: impl FnOnce(&mut File) -> Result<T, E>) -> Result<T, E>
    where
        E: From<io::Error>,
    {
        let mut file = File::open(&self.path)?;
        f(&mut file)
    }
}
