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

use dotlink_common::LoaderTier;
use thiserror::Error;

/// Fatal replay failures. Everything else on the replay path is
/// recoverable-by-omission and never surfaces here.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ReplayError {
    /// The class actually loaded under an archived name does not match the
    /// archived identity, typically because an external agent transformed
    /// bytecode. Continuing would silently run different code.
    #[error("archived class {name} resolved to a different definition (expected fingerprint {expected:#018x}, actual {actual:#018x})")]
    IdentityMismatch { name: String, expected: u64, actual: u64 },

    /// An initiated-only record points at a class that no ancestor tier has
    /// loaded; the archive and the process disagree about bootstrap state.
    #[error("initiated class {name} for {tier} loader is not loaded by any ancestor tier")]
    InitiationPrecondition { name: String, tier: LoaderTier },

    /// Tiers must replay in the fixed order, each exactly once.
    #[error("replay invoked for {got} loader out of order (expected {expected:?})")]
    TierOrder { expected: Option<LoaderTier>, got: LoaderTier },
}

pub type ReplayResult<T> = Result<T, ReplayError>;
