//! Temp-file storage for values too large to keep in memory.

use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

use smart_default::SmartDefault;
use tempfile::{NamedTempFile, TempPath};
use tracing::{debug, warn};

use crate::constant::MAX_PAYLOAD_LENGTH;
use crate::error::{Error, Result};

/// Largest payload minus the widest length-encoded prefix
pub const DEFAULT_BIG_COLUMN_THRESHOLD: usize = MAX_PAYLOAD_LENGTH - 9;

pub const DEFAULT_MAX_IN_MEMORY_ROW_SIZE: usize = 64 * 1024 * 1024;

const SPOOL_PREFIX: &str = "mysql-spool-";

/// Thresholds and location for spooling.
#[derive(Debug, Clone, PartialEq, Eq, SmartDefault)]
pub struct SpoolOpts {
    /// Directory receiving the temp files
    #[default(std::env::temp_dir())]
    pub dir: PathBuf,

    /// Column values declared longer than this are written to their own temp file
    #[default(DEFAULT_BIG_COLUMN_THRESHOLD)]
    pub big_column_threshold: usize,

    /// Rows with a larger payload are written to a temp file as a whole
    #[default(DEFAULT_MAX_IN_MEMORY_ROW_SIZE)]
    pub max_in_memory_row_size: usize,
}

/// A temp file being filled as packets arrive.
///
/// A failed create or write is recorded; later writes only count bytes so the caller can keep
/// consuming the wire, and [`SpoolWriter::finish`] reports the recorded error.
#[derive(Debug)]
pub struct SpoolWriter {
    file: Option<NamedTempFile>,
    written: u64,
    error: Option<Error>,
}

impl SpoolWriter {
    pub fn create(dir: &Path) -> Self {
        let created = tempfile::Builder::new()
            .prefix(SPOOL_PREFIX)
            .tempfile_in(dir);
        match created {
            Ok(file) => {
                debug!(path = ?file.path(), "spool file created");
                Self {
                    file: Some(file),
                    written: 0,
                    error: None,
                }
            }
            Err(source) => Self {
                file: None,
                written: 0,
                error: Some(Error::SpoolError {
                    path: Some(dir.to_path_buf()),
                    source,
                }),
            },
        }
    }

    pub fn written(&self) -> u64 {
        self.written
    }

    pub fn has_failed(&self) -> bool {
        self.error.is_some()
    }

    pub fn write(&mut self, chunk: &[u8]) {
        self.written += chunk.len() as u64;
        let Some(file) = self.file.as_mut() else {
            return;
        };
        if let Err(source) = file.write_all(chunk) {
            let path = file.path().to_path_buf();
            self.error = Some(Error::SpoolError {
                path: Some(path),
                source,
            });
            if let Some(file) = self.file.take() {
                remove(file);
            }
        }
    }

    /// Seal the file into a handle, or return the recorded failure.
    pub fn finish(mut self) -> Result<SpooledValue> {
        if let Some(error) = self.error.take() {
            return Err(error);
        }
        let Some(mut file) = self.file.take() else {
            return Err(Error::LibraryBug(crate::error::eyre!(
                "spool writer finished twice"
            )));
        };
        if let Err(source) = file.flush() {
            let path = file.path().to_path_buf();
            remove(file);
            return Err(Error::SpoolError {
                path: Some(path),
                source,
            });
        }
        Ok(SpooledValue {
            path: file.into_temp_path(),
            total: self.written,
            written: self.written,
        })
    }

    /// Delete the file without producing a value.
    pub fn discard(mut self) {
        if let Some(file) = self.file.take() {
            remove(file);
        }
    }
}

fn remove(file: NamedTempFile) {
    let path = file.path().to_path_buf();
    if let Err(error) = file.close() {
        warn!(?path, %error, "failed to delete spool file");
    }
}

/// Handle to a value stored in a temp file.
///
/// The file is deleted when the handle is dropped.
#[derive(Debug)]
pub struct SpooledValue {
    path: TempPath,
    total: u64,
    written: u64,
}

impl SpooledValue {
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Declared length of the value
    pub fn total(&self) -> u64 {
        self.total
    }

    pub fn written(&self) -> u64 {
        self.written
    }

    pub fn is_complete(&self) -> bool {
        self.written == self.total
    }

    pub fn open(&self) -> Result<File> {
        File::open(&self.path).map_err(|source| self.error(source))
    }

    pub fn read_all(&self) -> Result<Vec<u8>> {
        std::fs::read(&self.path).map_err(|source| self.error(source))
    }

    /// Delete the file now, reporting failure instead of ignoring it.
    pub fn delete(self) -> Result<()> {
        let path = self.path.to_path_buf();
        self.path.close().map_err(|source| Error::SpoolError {
            path: Some(path),
            source,
        })
    }

    /// Keep the file past the handle's lifetime.
    pub fn persist(self) -> Result<PathBuf> {
        let path = self.path.to_path_buf();
        self.path.keep().map_err(|e| Error::SpoolError {
            path: Some(path),
            source: e.error,
        })
    }

    fn error(&self, source: std::io::Error) -> Error {
        Error::SpoolError {
            path: Some(self.path.to_path_buf()),
            source,
        }
    }
}

impl PartialEq for SpooledValue {
    fn eq(&self, other: &Self) -> bool {
        *self.path == *other.path && self.total == other.total
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_spool_round_trip_and_cleanup() {
        let dir = tempfile::tempdir().unwrap();
        let mut writer = SpoolWriter::create(dir.path());
        writer.write(b"hello ");
        writer.write(b"world");
        let spooled = writer.finish().unwrap();

        assert_eq!(spooled.total(), 11);
        assert!(spooled.is_complete());
        assert!(spooled.path().starts_with(dir.path()));
        let name = spooled.path().file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.starts_with("mysql-spool-"));
        assert_eq!(spooled.read_all().unwrap(), b"hello world");

        let path = spooled.path().to_path_buf();
        drop(spooled);
        assert!(!path.exists());
    }

    #[test]
    fn test_create_failure_is_recorded() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("does-not-exist");
        let mut writer = SpoolWriter::create(&missing);
        assert!(writer.has_failed());
        writer.write(&[0u8; 100]);
        assert_eq!(writer.written(), 100);
        let err = writer.finish().unwrap_err();
        assert!(matches!(err, Error::SpoolError { .. }));
    }

    #[test]
    fn test_discard_removes_file() {
        let dir = tempfile::tempdir().unwrap();
        let mut writer = SpoolWriter::create(dir.path());
        writer.write(b"partial");
        writer.discard();
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }
}
