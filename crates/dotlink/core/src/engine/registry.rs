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

//! Identity-keyed class sets and hierarchy closure
//!
//! Pure bookkeeping, no policy. Sets carry an optional per-member payload:
//! whether the member still needs to be written into the archive being
//! produced (members inherited from an earlier layer do not).

use crate::runtime::ClassGraph;
use dotlink_common::ClassId;
use std::collections::HashMap;

/// A set of class identities with O(1) membership and a per-member
/// "needs to be recorded" payload.
#[derive(Debug, Default, Clone)]
pub struct ClassSet {
    members: HashMap<ClassId, bool>,
}

impl ClassSet {
    pub fn new() -> Self {
        ClassSet::default()
    }

    /// Insert with the payload set; returns true if the class was new.
    /// Re-insertion never overwrites an existing payload.
    pub fn insert(&mut self, class: ClassId) -> bool {
        self.insert_marked(class, true)
    }

    pub fn insert_marked(&mut self, class: ClassId, needs_recording: bool) -> bool {
        use std::collections::hash_map::Entry;
        match self.members.entry(class) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                slot.insert(needs_recording);
                true
            }
        }
    }

    pub fn contains(&self, class: ClassId) -> bool {
        self.members.contains_key(&class)
    }

    pub fn needs_recording(&self, class: ClassId) -> bool {
        self.members.get(&class).copied().unwrap_or(false)
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Members in definition order; archives must not depend on hash order.
    pub fn entries_sorted(&self) -> Vec<(ClassId, bool)> {
        let mut entries: Vec<_> = self.members.iter().map(|(&c, &b)| (c, b)).collect();
        entries.sort_by_key(|(c, _)| *c);
        entries
    }

    pub fn ids_sorted(&self) -> Vec<ClassId> {
        let mut ids: Vec<_> = self.members.keys().copied().collect();
        ids.sort();
        ids
    }
}

/// Insert a class and close the set over its supertype and interface edges.
/// Iterative on an explicit worklist, so hierarchy depth never touches the
/// call stack; re-insertion of a present class is a no-op.
pub fn add_with_ancestors<G: ClassGraph + ?Sized>(set: &mut ClassSet, graph: &G, seed: ClassId) {
    let mut worklist = vec![seed];
    while let Some(class) = worklist.pop() {
        if !set.insert(class) {
            continue;
        }
        if let Some(super_class) = graph.super_class(class) {
            worklist.push(super_class);
        }
        worklist.extend(graph.interfaces(class));
    }
}

/// The named sets one dump session works with.
#[derive(Debug, Default)]
pub struct ClassSetRegistry {
    /// Classes the runtime resolves during its own bootstrap; closed under
    /// supertype and interface edges.
    pub required: ClassSet,
    /// Classes that will be auto-loaded at next startup; superset of
    /// `required`.
    pub preloaded: ClassSet,
    /// Classes already handled by the prelinker this dump.
    pub processed: ClassSet,
    /// Classes the platform loader references but does not define.
    pub platform_initiated: ClassSet,
    /// Classes the app loader references but does not define.
    pub app_initiated: ClassSet,
    num_essential: usize,
}

impl ClassSetRegistry {
    pub fn new() -> Self {
        ClassSetRegistry::default()
    }

    /// Seed one runtime-essential class, closing over its ancestors into
    /// both the required and the preloaded set.
    pub fn seed_essential<G: ClassGraph + ?Sized>(&mut self, graph: &G, class: ClassId) {
        let before = self.required.len();
        add_with_ancestors(&mut self.required, graph, class);
        add_with_ancestors(&mut self.preloaded, graph, class);
        self.num_essential += self.required.len() - before;
    }

    pub fn num_essential(&self) -> usize {
        self.num_essential
    }
}
