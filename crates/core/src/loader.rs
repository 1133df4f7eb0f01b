//! Materializes the input stream into a run-scoped temporary file.
//!
//! Engines open binaries by path, so the complete input is written to a
//! uniquely named temporary file before analysis starts. The file is removed
//! when the `BinaryImage` is dropped, on success and error paths alike.

use std::io::{self, Read, Write};
use std::path::Path;

use sha2::{Digest, Sha256};
use tempfile::NamedTempFile;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("Failed to read the complete input stream: {0}")]
    Read(#[source] io::Error),
    #[error("Input stream is empty; expected an executable image")]
    Empty,
    #[error("Failed to stage input in a temporary file: {0}")]
    Stage(#[source] io::Error),
}

/// Immutable executable image owned by one run.
#[derive(Debug)]
pub struct BinaryImage {
    file: NamedTempFile,
    len: usize,
    sha256: String,
}

impl BinaryImage {
    /// Read `reader` to the end and stage it on disk.
    ///
    /// A read failure aborts before any file is handed to an engine; partial
    /// images are never analyzed.
    pub fn from_reader(mut reader: impl Read) -> Result<Self, LoadError> {
        let mut bytes = Vec::new();
        reader.read_to_end(&mut bytes).map_err(LoadError::Read)?;
        Self::from_bytes(&bytes)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, LoadError> {
        if bytes.is_empty() {
            return Err(LoadError::Empty);
        }

        let mut file = tempfile::Builder::new()
            .prefix("batch-decomp-")
            .suffix(".bin")
            .tempfile()
            .map_err(LoadError::Stage)?;
        file.write_all(bytes).map_err(LoadError::Stage)?;
        file.flush().map_err(LoadError::Stage)?;
        file.as_file().sync_all().map_err(LoadError::Stage)?;

        let digest = Sha256::digest(bytes);
        Ok(Self { file, len: bytes.len(), sha256: format!("{:x}", digest) })
    }

    /// Path of the staged file; valid until the image is dropped.
    pub fn path(&self) -> &Path {
        self.file.path()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Hex SHA-256 of the image contents.
    pub fn sha256(&self) -> &str {
        &self.sha256
    }

    /// Read the staged bytes back from disk.
    pub fn read_bytes(&self) -> io::Result<Vec<u8>> {
        std::fs::read(self.path())
    }
}
