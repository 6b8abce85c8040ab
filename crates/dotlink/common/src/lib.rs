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

//! Shared vocabulary for the dotlink prelinking engine
//!
//! Loader tiers, class/pool identities and the recoverable resolution fault
//! live here so that both the engine and runtime adapters can speak the same
//! types without depending on the engine crate.

pub mod fault;
pub mod ids;
pub mod tier;

pub use fault::{ResolveFault, ResolveResult};
pub use ids::{ClassId, MethodIndex, PoolIndex};
pub use tier::LoaderTier;
