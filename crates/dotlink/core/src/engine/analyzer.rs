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

//! Reference archivability
//!
//! A resolved constant-pool entry may be persisted only when re-resolving it
//! in a future process is guaranteed to produce the same target. Classes are
//! loaded dynamically and may be replaced by external agents, so the
//! predicate is deliberately conservative: a supertype is always safe (it is
//! resolved in the same loader before the subtype is defined), two
//! runtime-essential classes are safe (both are fixed, loader-independent),
//! and a preloaded target is safe provided the initiating-loader fact is
//! recorded so replay can reconstruct the same delegation. Everything else
//! is refused.

use super::DumpSession;
use crate::pool::{PoolEntry, SymbolicRef};
use crate::runtime::{ClassGraph, RuntimeEnv};
use dotlink_common::{ClassId, LoaderTier, PoolIndex};

/// Transitive subtype walk over supertype and interface edges; `sub` counts
/// as its own subtype. Iterative, tolerant of malformed hierarchies.
pub(crate) fn is_subtype_of<G: ClassGraph + ?Sized>(graph: &G, sub: ClassId, ancestor: ClassId) -> bool {
    let mut worklist = vec![sub];
    let mut seen = Vec::new();
    while let Some(class) = worklist.pop() {
        if class == ancestor {
            return true;
        }
        if seen.contains(&class) {
            continue;
        }
        seen.push(class);
        if let Some(super_class) = graph.super_class(class) {
            worklist.push(super_class);
        }
        worklist.extend(graph.interfaces(class));
    }
    false
}

impl<'r, R: RuntimeEnv> DumpSession<'r, R> {
    /// Can a resolved class reference from `holder` to `target` be
    /// persisted? May record an initiated-class relationship as a side
    /// effect; the predicate is evaluated fresh on every call.
    pub fn can_archive_class_ref(&mut self, holder: ClassId, target: ClassId) -> bool {
        if is_subtype_of(&*self.env, holder, target) {
            // All supertypes of holder resolve in holder's loader before
            // holder is defined there; the binding cannot change.
            return true;
        }

        if self.registry.required.contains(holder) {
            return self.registry.required.contains(target);
        }

        if self.registry.preloaded.contains(target) {
            let holder_tier = self.env.tier(holder);
            match holder_tier {
                LoaderTier::Platform | LoaderTier::App => {
                    self.record_initiated(holder, target);
                    return true;
                }
                LoaderTier::BootCore | LoaderTier::BootOther => {
                    // A boot class can reference only boot classes.
                    return true;
                }
                LoaderTier::Hidden => {
                    return self.env.host_tier(holder).is_boot();
                }
            }
        }

        false
    }

    /// Can the field entry at `index` in `holder`'s pool be persisted as
    /// resolved? Requires the declaring class to pass the class-reference
    /// rules and the field to exist as an instance field with a matching
    /// descriptor. Static fields are excluded: resolving one can trigger
    /// class initialization, which must not be short-circuited silently.
    pub fn can_archive_field_ref(&mut self, holder: ClassId, index: PoolIndex) -> bool {
        let Some((target, name, descriptor)) = self.member_ref_target(holder, index, true) else {
            return false;
        };
        if !self.can_archive_class_ref(holder, target) {
            // The target class may have a different definition at replay.
            return false;
        }
        match self.env.find_field(target, &name, &descriptor) {
            Some(field) => !field.is_static,
            None => false,
        }
    }

    /// Can the method entry at `index` in `holder`'s pool be persisted as
    /// resolved?
    pub fn can_archive_method_ref(&mut self, holder: ClassId, index: PoolIndex) -> bool {
        let Some((target, _, _)) = self.member_ref_target(holder, index, false) else {
            return false;
        };
        self.can_archive_class_ref(holder, target)
    }

    /// Declaring class plus name/descriptor of a field or method entry, if
    /// its class reference has already been resolved. An unresolved or
    /// in-error class entry disqualifies the member outright.
    fn member_ref_target(&self, holder: ClassId, index: PoolIndex, want_field: bool) -> Option<(ClassId, String, String)> {
        match self.env.entry(holder, index) {
            PoolEntry::ResolvedField { holder: target, name, descriptor } if want_field => Some((target, name, descriptor)),
            PoolEntry::ResolvedMethod { holder: target, name, descriptor, .. } if !want_field => Some((target, name, descriptor)),
            PoolEntry::Unresolved(SymbolicRef::Field { class_index, name, descriptor }) if want_field => {
                self.resolved_class_at(holder, class_index).map(|target| (target, name, descriptor))
            }
            PoolEntry::Unresolved(SymbolicRef::Method { class_index, name, descriptor, .. }) if !want_field => {
                self.resolved_class_at(holder, class_index).map(|target| (target, name, descriptor))
            }
            _ => None,
        }
    }

    fn resolved_class_at(&self, holder: ClassId, class_index: PoolIndex) -> Option<ClassId> {
        match self.env.entry(holder, class_index) {
            PoolEntry::ResolvedClass { class, .. } => Some(class),
            _ => None,
        }
    }

    /// Side record for rule three: `holder`'s tier must be able to resolve
    /// the same name to the same class at replay.
    fn record_initiated(&mut self, holder: ClassId, target: ClassId) {
        let holder_tier = self.env.tier(holder);
        if holder_tier == self.env.tier(target) {
            return;
        }
        self.add_initiated_for(holder_tier, target);
    }
}
