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

//! Collaborator interfaces consumed by the engine
//!
//! The engine owns policy and bookkeeping; every fact about classes, pools
//! and loaders flows through these traits. [`memory::MemoryRuntime`] is the
//! in-repo implementation backing tests and the CLI; an embedding runtime
//! provides its own.

pub mod memory;

use crate::bytecode::AccessOpcode;
use crate::pool::{PoolEntry, PoolTag};
use dotlink_common::{ClassId, LoaderTier, MethodIndex, PoolIndex, ResolveResult};
use serde::{Deserialize, Serialize};

/// Recognized kinds of hidden classes. Anything else hidden is opaque to the
/// archive and never recorded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum HiddenKind {
    /// Runtime-generated invoker/adapter holder, regenerated per archive kind.
    AdapterHolder,
    /// Proxy class materialized for a lambda call site.
    LambdaProxy,
}

/// What the runtime knows about a field it looked up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldSummary {
    pub is_static: bool,
}

/// Descriptor facts about already-loaded classes. All queries are cheap and
/// infallible; the engine only asks about classes the runtime handed out.
pub trait ClassGraph {
    /// Every class known to the current dump, in definition order.
    fn all_classes(&self) -> Vec<ClassId>;

    fn class_name(&self, class: ClassId) -> &str;
    fn tier(&self, class: ClassId) -> LoaderTier;

    /// Tier of the loader the class actually lives under. Equal to
    /// [`Self::tier`] except for hidden classes, which are hosted by the
    /// loader of the class that spun them up.
    fn host_tier(&self, class: ClassId) -> LoaderTier;

    fn super_class(&self, class: ClassId) -> Option<ClassId>;
    fn interfaces(&self, class: ClassId) -> Vec<ClassId>;

    fn is_loaded(&self, class: ClassId) -> bool;
    fn is_linked(&self, class: ClassId) -> bool;
    fn is_initialized(&self, class: ClassId) -> bool;
    fn is_public(&self, class: ClassId) -> bool;
    fn is_interface(&self, class: ClassId) -> bool;
    fn is_hidden(&self, class: ClassId) -> bool;
    fn hidden_kind(&self, class: ClassId) -> Option<HiddenKind>;

    /// Whether the class itself declares a static initializer. Transitive
    /// closure over supertypes is the engine's business.
    fn declares_static_initializer(&self, class: ClassId) -> bool;

    /// Whether the class carries static state captured at dump time.
    fn has_preinitialized_state(&self, class: ClassId) -> bool;

    /// Whether the class originates from the platform's primary module image.
    fn from_module_image(&self, class: ClassId) -> bool;

    /// Whether an earlier archiving pass already recorded this class.
    fn from_earlier_layer(&self, class: ClassId) -> bool;

    /// Whether the class was defined outside the builtin loader hierarchy
    /// (programmatically registered); such classes are carried over from a
    /// trial archive rather than preloaded.
    fn is_unregistered(&self, class: ClassId) -> bool;

    /// Content identity that survives across processes; used by the replay
    /// identity check.
    fn fingerprint(&self, class: ClassId) -> u64;

    /// Look up a field by name and descriptor, searching supertypes the way
    /// ordinary field resolution would.
    fn find_field(&self, class: ClassId, name: &str, descriptor: &str) -> Option<FieldSummary>;
}

/// Class loading, linking and initialization operations, plus the narrow
/// hooks the replay engine drives.
pub trait ClassLoading {
    /// Find a class already visible to `initiating`, delegating up the
    /// loader chain. Never triggers a load.
    fn find_loaded(&self, name: &str, initiating: LoaderTier) -> Option<ClassId>;

    /// Find a class *definition* in the mapped archive region regardless of
    /// loaded state; used to restore hidden classes that have no dictionary
    /// presence.
    fn find_class_definition(&self, name: &str, tier: LoaderTier) -> Option<ClassId>;

    fn load_class(&mut self, name: &str, tier: LoaderTier) -> ResolveResult<ClassId>;
    fn link_class(&mut self, class: ClassId) -> ResolveResult<()>;
    fn initialize_class(&mut self, class: ClassId) -> ResolveResult<()>;

    /// Whether dump-time initialization of this class is approved by the
    /// runtime (no unmanaged side effects).
    fn can_preinitialize(&self, class: ClassId) -> bool;

    /// Record `tier` as a valid initiating loader for an already-loaded
    /// class defined by an ancestor tier.
    fn register_initiator(&mut self, tier: LoaderTier, class: ClassId);

    /// Re-attach pre-built metadata of an archived hidden class under the
    /// given loader tier, bypassing bytecode parsing.
    fn restore_hidden_class(&mut self, class: ClassId, tier: LoaderTier) -> ResolveResult<()>;

    /// Restore captured static state instead of running the initializer.
    fn restore_preinitialized_state(&mut self, class: ClassId) -> ResolveResult<()>;

    /// Prepare the native call stub of a native method.
    fn prepare_native_call(&mut self, class: ClassId, method: MethodIndex) -> ResolveResult<()>;

    /// Hand an initialized class to the external compilation policy for
    /// training-data replay.
    fn replay_training(&mut self, class: ClassId) -> ResolveResult<()>;

    /// Re-register a class defined by a non-builtin loader that was carried
    /// over from a trial archive.
    fn register_unregistered_class(&mut self, name: &str, fingerprint: u64) -> ResolveResult<()>;
}

/// Read/write access to constant pools and method code.
pub trait ConstantPools {
    fn pool_len(&self, class: ClassId) -> usize;
    fn entry(&self, class: ClassId, index: PoolIndex) -> PoolEntry;
    fn entry_tag(&self, class: ClassId, index: PoolIndex) -> PoolTag;

    fn method_count(&self, class: ClassId) -> usize;
    fn method_is_native(&self, class: ClassId, method: MethodIndex) -> bool;
    fn method_code(&self, class: ClassId, method: MethodIndex) -> &[u8];

    /// Intern a string entry. Always safe; may still fault on resource
    /// exhaustion.
    fn intern_string(&mut self, class: ClassId, index: PoolIndex) -> ResolveResult<()>;

    /// Resolve a class entry through the holder's loader.
    fn resolve_class_entry(&mut self, class: ClassId, index: PoolIndex) -> ResolveResult<ClassId>;

    /// Run the normal link-time resolution routine for a field or method
    /// entry, selected by the instruction kind that referenced it.
    fn resolve_member_entry(&mut self, class: ClassId, index: PoolIndex, opcode: AccessOpcode) -> ResolveResult<()>;

    /// Run the bootstrap method of a dynamic call site.
    fn resolve_call_site(&mut self, class: ClassId, index: PoolIndex) -> ResolveResult<()>;
}

/// Enumeration of a loader dictionary. The implementation holds the
/// dictionary lock for the duration of the callback sweep.
pub trait DictionaryScan {
    fn with_dictionary_entries(&self, tier: LoaderTier, visit: &mut dyn FnMut(ClassId));
}

/// The full collaborator bundle the engine sessions require.
pub trait RuntimeEnv: ClassGraph + ClassLoading + ConstantPools + DictionaryScan {}

impl<T: ClassGraph + ClassLoading + ConstantPools + DictionaryScan> RuntimeEnv for T {}
