// Dotlanth
// Copyright (C) 2025 Synerthink

// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.

// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU Affero General Public License for more details.

// You should have received a copy of the GNU Affero General Public License
// along with this program.  If not, see <http://www.gnu.org/licenses/>.

//! Physical archive storage seam
//!
//! The engine marshals tables to bytes; where those bytes live is the
//! embedder's concern. The file-backed store here is what the CLI uses.

use super::ArchiveError;
use std::fs;
use std::io::ErrorKind;
use std::path::PathBuf;

/// Opaque byte storage for one archive.
pub trait ArchiveStore {
    fn write_bytes(&mut self, bytes: &[u8]) -> Result<(), ArchiveError>;

    /// `Ok(None)` when no archive exists at this location.
    fn read_bytes(&self) -> Result<Option<Vec<u8>>, ArchiveError>;
}

/// Archive file on the local filesystem.
pub struct FileStore {
    path: PathBuf,
}

impl FileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        FileStore { path: path.into() }
    }

    pub fn path(&self) -> &std::path::Path {
        &self.path
    }
}

impl ArchiveStore for FileStore {
    fn write_bytes(&mut self, bytes: &[u8]) -> Result<(), ArchiveError> {
        fs::write(&self.path, bytes)?;
        Ok(())
    }

    fn read_bytes(&self) -> Result<Option<Vec<u8>>, ArchiveError> {
        match fs::read(&self.path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(ArchiveError::Io(e)),
        }
    }
}

/// In-memory store; keeps tests and benchmarks off the filesystem.
#[derive(Default)]
pub struct MemoryStore {
    bytes: Option<Vec<u8>>,
}

impl ArchiveStore for MemoryStore {
    fn write_bytes(&mut self, bytes: &[u8]) -> Result<(), ArchiveError> {
        self.bytes = Some(bytes.to_vec());
        Ok(())
    }

    fn read_bytes(&self) -> Result<Option<Vec<u8>>, ArchiveError> {
        Ok(self.bytes.clone())
    }
}
