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

//! Ahead-of-time class prelinking and archiving engine
//!
//! At dump time a [`engine::DumpSession`] walks the classes loaded during a
//! representative run, decides which classes and which resolved constant-pool
//! entries are safe to persist, and assembles an [`archive::Archive`]. At a
//! later startup a [`engine::ReplaySession`] consumes that archive per loader
//! tier to short-circuit class loading, linking and symbol resolution.
//!
//! The engine never talks to a concrete runtime: all class, pool and loading
//! facts flow through the traits in [`runtime`]. An in-memory reference
//! runtime ([`runtime::memory::MemoryRuntime`]) backs the test suite and the
//! CLI.

pub mod archive;
pub mod bytecode;
pub mod engine;
pub mod errors;
pub mod policy;
pub mod pool;
pub mod runtime;

pub use archive::{Archive, ArchiveError, DumpKind, PreloadTable, TierTables};
pub use engine::{DumpSession, ReplaySession};
pub use errors::ReplayError;
pub use policy::{EnginePolicy, ResolutionPolicy};
pub use pool::TrainingMask;
