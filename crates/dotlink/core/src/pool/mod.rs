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

//! Constant-pool entry model and training masks
//!
//! A class's constant pool is a table of symbolic references used by its
//! bytecode. The engine only ever observes and flips the resolution state of
//! entries; the pool itself is owned by the runtime adapter.

use dotlink_common::{ClassId, PoolIndex};
use serde::{Deserialize, Serialize};

/// How a method reference dispatches at its call sites. Carried on the
/// symbolic reference so resolution can pick the right linkage routine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DispatchKind {
    Virtual,
    Interface,
    Special,
    Static,
    Handle,
}

/// Bootstrap specifier of a dynamic call site, as read from the pool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallSiteSpec {
    /// Class declaring the bootstrap method.
    pub bootstrap_class: String,
    /// Name of the bootstrap method.
    pub bootstrap_method: String,
    /// Descriptor of the bootstrap method.
    pub bootstrap_descriptor: String,
    /// Descriptor of the call site itself; its return type is the functional
    /// interface materialized by the site.
    pub site_descriptor: String,
}

impl CallSiteSpec {
    /// Class name of the call site descriptor's return type, if it is a
    /// reference type (`(...)Lpkg/Name;` form).
    pub fn site_interface_name(&self) -> Option<&str> {
        let ret = self.site_descriptor.rsplit(')').next()?;
        let ret = ret.strip_prefix('L')?;
        ret.strip_suffix(';')
    }
}

/// An unresolved symbolic reference.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SymbolicRef {
    Class {
        name: String,
    },
    Field {
        /// Pool index of the class entry naming the field's holder.
        class_index: PoolIndex,
        name: String,
        descriptor: String,
    },
    Method {
        class_index: PoolIndex,
        name: String,
        descriptor: String,
        kind: DispatchKind,
    },
    CallSite(CallSiteSpec),
}

/// Resolution state of one constant-pool entry. Index 0 of every pool holds
/// `Unused`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PoolEntry {
    Unused,
    /// A string constant; `interned` flips when the runtime interns it.
    StringData {
        value: String,
        interned: bool,
    },
    Unresolved(SymbolicRef),
    /// A previous resolution attempt failed; re-resolution must not be
    /// retried silently.
    UnresolvedInError(SymbolicRef),
    ResolvedClass {
        name: String,
        class: ClassId,
    },
    ResolvedField {
        holder: ClassId,
        name: String,
        descriptor: String,
    },
    ResolvedMethod {
        holder: ClassId,
        name: String,
        descriptor: String,
        kind: DispatchKind,
    },
    ResolvedCallSite {
        spec: CallSiteSpec,
    },
}

impl PoolEntry {
    /// Coarse tag for dispatching without cloning entry payloads.
    pub fn tag(&self) -> PoolTag {
        match self {
            PoolEntry::Unused => PoolTag::Unused,
            PoolEntry::StringData { .. } => PoolTag::StringData,
            PoolEntry::Unresolved(r) => match r {
                SymbolicRef::Class { .. } => PoolTag::UnresolvedClass,
                SymbolicRef::Field { .. } => PoolTag::UnresolvedField,
                SymbolicRef::Method { .. } => PoolTag::UnresolvedMethod,
                SymbolicRef::CallSite(_) => PoolTag::UnresolvedCallSite,
            },
            PoolEntry::UnresolvedInError(_) => PoolTag::UnresolvedInError,
            PoolEntry::ResolvedClass { .. } => PoolTag::ResolvedClass,
            PoolEntry::ResolvedField { .. } => PoolTag::ResolvedField,
            PoolEntry::ResolvedMethod { .. } => PoolTag::ResolvedMethod,
            PoolEntry::ResolvedCallSite { .. } => PoolTag::ResolvedCallSite,
        }
    }

    pub fn is_resolved(&self) -> bool {
        matches!(
            self.tag(),
            PoolTag::ResolvedClass | PoolTag::ResolvedField | PoolTag::ResolvedMethod | PoolTag::ResolvedCallSite
        )
    }
}

/// Discriminant of [`PoolEntry`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PoolTag {
    Unused,
    StringData,
    UnresolvedClass,
    UnresolvedField,
    UnresolvedMethod,
    UnresolvedCallSite,
    UnresolvedInError,
    ResolvedClass,
    ResolvedField,
    ResolvedMethod,
    ResolvedCallSite,
}

impl PoolTag {
    pub fn name(&self) -> &'static str {
        match self {
            PoolTag::Unused => "unused",
            PoolTag::StringData => "string",
            PoolTag::UnresolvedClass => "unresolved-class",
            PoolTag::UnresolvedField => "unresolved-field",
            PoolTag::UnresolvedMethod => "unresolved-method",
            PoolTag::UnresolvedCallSite => "unresolved-callsite",
            PoolTag::UnresolvedInError => "unresolved-in-error",
            PoolTag::ResolvedClass => "resolved-class",
            PoolTag::ResolvedField => "resolved-field",
            PoolTag::ResolvedMethod => "resolved-method",
            PoolTag::ResolvedCallSite => "resolved-callsite",
        }
    }
}

/// Per-constant-pool-index record of which entries were exercised during a
/// prior trial run. Entries outside the recorded range count as unexercised;
/// a missing mask means everything is eligible.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrainingMask {
    bits: Vec<bool>,
}

impl TrainingMask {
    /// Mask with every index unexercised.
    pub fn empty(len: usize) -> Self {
        TrainingMask { bits: vec![false; len] }
    }

    /// Mask with every index eligible; used at replay, where the trial-run
    /// gating is already baked into what was recorded.
    pub fn all_eligible(len: usize) -> Self {
        TrainingMask { bits: vec![true; len] }
    }

    /// Build a mask of `len` entries from the indices exercised in training.
    pub fn from_exercised(len: usize, exercised: &[u16]) -> Self {
        let mut mask = Self::empty(len);
        for &index in exercised {
            if (index as usize) < mask.bits.len() {
                mask.bits[index as usize] = true;
            }
        }
        mask
    }

    pub fn mark(&mut self, index: PoolIndex) {
        if index.as_usize() < self.bits.len() {
            self.bits[index.as_usize()] = true;
        }
    }

    pub fn is_exercised(&self, index: PoolIndex) -> bool {
        self.bits.get(index.as_usize()).copied().unwrap_or(false)
    }

    pub fn len(&self) -> usize {
        self.bits.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bits.is_empty()
    }
}
