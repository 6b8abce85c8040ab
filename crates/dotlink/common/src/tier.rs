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

use serde::{Deserialize, Serialize};
use std::fmt;

/// Category of the classloader that defines a class.
///
/// The boot loader is split into two sub-tiers: the core module of the
/// runtime image and everything else it serves. Hidden classes (runtime
/// generated adapters, lambda proxies) carry their own tier because they are
/// never present in a loader dictionary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[repr(u8)]
pub enum LoaderTier {
    BootCore = 0,
    BootOther = 1,
    Platform = 2,
    App = 3,
    Hidden = 4,
}

impl LoaderTier {
    /// Replay order: each tier may reference classes of earlier tiers only.
    pub const REPLAY_ORDER: [LoaderTier; 4] = [LoaderTier::BootCore, LoaderTier::BootOther, LoaderTier::Platform, LoaderTier::App];

    /// Create a LoaderTier from a u8 value.
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(LoaderTier::BootCore),
            1 => Some(LoaderTier::BootOther),
            2 => Some(LoaderTier::Platform),
            3 => Some(LoaderTier::App),
            4 => Some(LoaderTier::Hidden),
            _ => None,
        }
    }

    /// Get the tier's numerical value.
    pub fn as_u8(&self) -> u8 {
        *self as u8
    }

    /// True for tiers backed by one of the well-known builtin loaders.
    pub fn is_builtin(&self) -> bool {
        !matches!(self, LoaderTier::Hidden)
    }

    /// True for both boot sub-tiers.
    pub fn is_boot(&self) -> bool {
        matches!(self, LoaderTier::BootCore | LoaderTier::BootOther)
    }

    /// The tier a failed lookup delegates to next, or None for the boot core.
    pub fn delegation_parent(&self) -> Option<LoaderTier> {
        match self {
            LoaderTier::App => Some(LoaderTier::Platform),
            LoaderTier::Platform => Some(LoaderTier::BootOther),
            LoaderTier::BootOther => Some(LoaderTier::BootCore),
            LoaderTier::BootCore | LoaderTier::Hidden => None,
        }
    }

    /// Loader name used in log lines.
    pub fn label(&self) -> &'static str {
        match self {
            LoaderTier::BootCore => "boot",
            LoaderTier::BootOther => "boot2",
            LoaderTier::Platform => "plat",
            LoaderTier::App => "app",
            LoaderTier::Hidden => "hidden",
        }
    }
}

impl fmt::Display for LoaderTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}
