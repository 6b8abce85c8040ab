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

//! Archive tables and their serialized form
//!
//! The archive is the write-once aggregate a dump produces and a replay
//! consumes: one preload table per loader tier for each archive kind, the
//! pending dynamic-call-site worklist, and the unregistered-class carryover
//! used by the trial-to-final pipeline. Classes are persisted by name, tier
//! and fingerprint; in-process identities never cross a process boundary.

pub mod store;

use crate::runtime::HiddenKind;
use dotlink_common::{LoaderTier, PoolIndex};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use store::{ArchiveStore, FileStore, MemoryStore};

/// What kind of archive the current dump session is producing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DumpKind {
    /// A base archive built from a single training run.
    Static,
    /// A layered archive on top of an existing static archive.
    Dynamic,
    /// The trial archive of a two-stage pipeline.
    Preimage,
    /// The final archive assembled from a preimage.
    Final,
}

impl DumpKind {
    /// Which table group this dump writes into.
    pub fn writes_static_tables(&self) -> bool {
        !matches!(self, DumpKind::Dynamic)
    }

    pub fn is_preimage(&self) -> bool {
        matches!(self, DumpKind::Preimage)
    }

    pub fn is_final(&self) -> bool {
        matches!(self, DumpKind::Final)
    }
}

/// One archived class reference.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassRecord {
    pub name: String,
    pub tier: LoaderTier,
    pub fingerprint: u64,
    pub hidden_kind: Option<HiddenKind>,
    pub has_preinitialized_state: bool,
}

/// Ordered preload and initiated-only lists for one loader tier.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreloadTable {
    /// Classes to load, ancestors strictly before dependents.
    pub preloaded: Vec<ClassRecord>,
    /// Classes this tier references but does not define.
    pub initiated: Vec<ClassRecord>,
}

impl PreloadTable {
    pub fn is_empty(&self) -> bool {
        self.preloaded.is_empty() && self.initiated.is_empty()
    }
}

/// The per-tier tables of one archive kind.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TierTables {
    pub boot_core: PreloadTable,
    pub boot_other: PreloadTable,
    pub platform: PreloadTable,
    pub app: PreloadTable,
}

impl TierTables {
    pub fn table(&self, tier: LoaderTier) -> &PreloadTable {
        match tier {
            LoaderTier::BootCore => &self.boot_core,
            LoaderTier::BootOther => &self.boot_other,
            LoaderTier::Platform => &self.platform,
            LoaderTier::App | LoaderTier::Hidden => &self.app,
        }
    }

    pub fn table_mut(&mut self, tier: LoaderTier) -> &mut PreloadTable {
        match tier {
            LoaderTier::BootCore => &mut self.boot_core,
            LoaderTier::BootOther => &mut self.boot_other,
            LoaderTier::Platform => &mut self.platform,
            LoaderTier::App | LoaderTier::Hidden => &mut self.app,
        }
    }

    pub fn total_preloaded(&self) -> usize {
        [&self.boot_core, &self.boot_other, &self.platform, &self.app].iter().map(|t| t.preloaded.len()).sum()
    }
}

/// A dynamic call site deferred to the final dump stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingCallSiteRecord {
    pub class_name: String,
    pub tier: LoaderTier,
    pub indices: Vec<PoolIndex>,
}

/// The serializable aggregate.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Archive {
    pub static_tables: TierTables,
    pub dynamic_tables: TierTables,
    /// Worklist consumed after the application tier of a final-stage replay.
    pub pending_call_sites: Vec<PendingCallSiteRecord>,
    /// Classes defined by non-builtin loaders, carried from the preimage so
    /// the final dump can re-register them.
    pub unregistered: Vec<ClassRecord>,
}

impl Archive {
    /// Whether any boot-tier preload data was recorded. Replay treats an
    /// archive without preload data as "no acceleration".
    pub fn has_preload_data(&self) -> bool {
        !self.static_tables.boot_core.preloaded.is_empty() || !self.dynamic_tables.boot_core.preloaded.is_empty()
    }

    pub fn tables(&self, kind: DumpKind) -> &TierTables {
        if kind.writes_static_tables() { &self.static_tables } else { &self.dynamic_tables }
    }

    pub fn tables_mut(&mut self, kind: DumpKind) -> &mut TierTables {
        if kind.writes_static_tables() { &mut self.static_tables } else { &mut self.dynamic_tables }
    }
}

const ARCHIVE_MAGIC: [u8; 8] = *b"DOTLINK\0";
const ARCHIVE_VERSION: u16 = 1;

#[derive(Error, Debug)]
pub enum ArchiveError {
    #[error("archive I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("archive payload could not be encoded: {0}")]
    Encode(#[from] bincode::error::EncodeError),

    #[error("archive payload could not be decoded: {0}")]
    Decode(#[from] bincode::error::DecodeError),

    #[error("not an archive: bad magic")]
    BadMagic,

    #[error("unsupported archive version {found} (expected {expected})")]
    UnsupportedVersion { found: u16, expected: u16 },
}

impl Archive {
    /// Marshal the archive into its byte format: magic, version, then a
    /// bincode payload. No cross-version compatibility is attempted.
    pub fn to_bytes(&self) -> Result<Vec<u8>, ArchiveError> {
        let mut bytes = Vec::with_capacity(64);
        bytes.extend_from_slice(&ARCHIVE_MAGIC);
        bytes.extend_from_slice(&ARCHIVE_VERSION.to_le_bytes());
        let payload = bincode::serde::encode_to_vec(self, bincode::config::standard())?;
        bytes.extend_from_slice(&payload);
        Ok(bytes)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, ArchiveError> {
        if bytes.len() < ARCHIVE_MAGIC.len() + 2 || bytes[..ARCHIVE_MAGIC.len()] != ARCHIVE_MAGIC {
            return Err(ArchiveError::BadMagic);
        }
        let version = u16::from_le_bytes([bytes[8], bytes[9]]);
        if version != ARCHIVE_VERSION {
            return Err(ArchiveError::UnsupportedVersion {
                found: version,
                expected: ARCHIVE_VERSION,
            });
        }
        let (archive, _) = bincode::serde::decode_from_slice(&bytes[10..], bincode::config::standard())?;
        Ok(archive)
    }

    /// Write through an archive store.
    pub fn save(&self, store: &mut dyn ArchiveStore) -> Result<(), ArchiveError> {
        let bytes = self.to_bytes()?;
        tracing::debug!(bytes = bytes.len(), "archive serialized");
        store.write_bytes(&bytes)
    }

    /// Read through an archive store. A missing archive is `Ok(None)`: the
    /// caller falls back to ordinary from-scratch loading.
    pub fn load(store: &dyn ArchiveStore) -> Result<Option<Self>, ArchiveError> {
        match store.read_bytes()? {
            Some(bytes) => Ok(Some(Self::from_bytes(&bytes)?)),
            None => Ok(None),
        }
    }
}
