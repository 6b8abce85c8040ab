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

//! Preloaded-class recording
//!
//! One pass per loader tier over every class known to the dump. A class that
//! survives the gates is appended after its supertype and interfaces, so the
//! preload list replays front to back without forward references. Each
//! tier-crossing ancestor edge also produces an initiated-class record.

use super::DumpSession;
use crate::archive::{Archive, ClassRecord, DumpKind};
use crate::engine::registry::ClassSet;
use crate::runtime::RuntimeEnv;
use dotlink_common::{ClassId, LoaderTier};
use std::collections::HashSet;

/// Coarse loader identity: both boot sub-tiers are served by the one boot
/// loader, so edges between them are not tier crossings.
fn loader_of(tier: LoaderTier) -> LoaderTier {
    match tier {
        LoaderTier::BootOther => LoaderTier::BootCore,
        other => other,
    }
}

enum Visit {
    Enter(ClassId),
    Emit(ClassId),
}

impl<'r, R: RuntimeEnv> DumpSession<'r, R> {
    /// Run all four tier passes and the app-tier public-class post-pass,
    /// then snapshot the initiated sets and the unregistered carryover.
    pub fn record_tables(&mut self) {
        for tier in LoaderTier::REPLAY_ORDER {
            let records = self.record_tier(tier);
            tracing::debug!(tier = %tier, classes = records.len(), "preload list recorded");
            self.tables.table_mut(tier).preloaded = records;
        }
        self.add_extra_initiated_classes();
        self.record_initiated_classes();
        self.record_unregistered_classes();
    }

    fn record_tier(&mut self, pass: LoaderTier) -> Vec<ClassRecord> {
        let mut seen = HashSet::new();
        let mut list = Vec::new();
        for class in self.env.all_classes() {
            self.maybe_record(pass, class, &mut seen, &mut list);
        }
        list.into_iter().map(|class| self.class_record(class)).collect()
    }

    /// Iterative form of the record-ancestors-first walk: an Enter visit
    /// applies the gates and schedules ancestors, the matching Emit visit
    /// appends the class once every ancestor has been handled.
    fn maybe_record(&mut self, pass: LoaderTier, seed: ClassId, seen: &mut HashSet<ClassId>, list: &mut Vec<ClassId>) {
        let mut stack = vec![Visit::Enter(seed)];
        while let Some(visit) = stack.pop() {
            match visit {
                Visit::Enter(class) => {
                    if !seen.insert(class) {
                        continue;
                    }
                    if !self.passes_gates(pass, class) {
                        continue;
                    }
                    stack.push(Visit::Emit(class));
                    if let Some(super_class) = self.env.super_class(class) {
                        stack.push(Visit::Enter(super_class));
                    }
                    for interface in self.env.interfaces(class) {
                        stack.push(Visit::Enter(interface));
                    }
                }
                Visit::Emit(class) => {
                    if let Some(super_class) = self.env.super_class(class) {
                        self.add_initiated_cross(class, super_class);
                    }
                    for interface in self.env.interfaces(class) {
                        self.add_initiated_cross(class, interface);
                    }
                    list.push(class);
                    self.registry.preloaded.insert(class);
                    tracing::info!(tier = %pass, class = self.env.class_name(class), "preload");
                }
            }
        }
    }

    fn passes_gates(&self, pass: LoaderTier, class: ClassId) -> bool {
        let tier = self.env.tier(class);
        let effective = if tier == LoaderTier::Hidden { self.env.host_tier(class) } else { tier };
        if effective != pass {
            return false;
        }
        if !self.env.is_loaded(class) {
            return false;
        }
        if tier == LoaderTier::Hidden {
            if !self.policy.archive_call_sites {
                return false;
            }
            if self.env.hidden_kind(class).is_none() {
                return false;
            }
        }
        if self.registry.required.contains(class) {
            // Essential classes are resolved during runtime bootstrap,
            // before any preload pass runs.
            return false;
        }
        if self.env.is_unregistered(class) {
            return false;
        }
        if self.env.from_earlier_layer(class) && self.kind == DumpKind::Dynamic {
            return false;
        }
        if tier != LoaderTier::Hidden && !self.env.from_module_image(class) {
            // Such classes may not be loadable at the next startup.
            return false;
        }
        true
    }

    /// Initiated record for a hierarchy edge whose endpoints live under
    /// different loaders.
    fn add_initiated_cross(&mut self, class: ClassId, ancestor: ClassId) {
        let holder = loader_of(if self.env.is_hidden(class) { self.env.host_tier(class) } else { self.env.tier(class) });
        let target = loader_of(self.env.tier(ancestor));
        if holder == target {
            return;
        }
        if matches!(holder, LoaderTier::Platform | LoaderTier::App) {
            self.add_initiated_for(holder, ancestor);
        }
    }

    /// Seed the app tier with every public preloaded class of the earlier
    /// tiers; name-based reflective lookups then hit without delegation.
    fn add_extra_initiated_classes(&mut self) {
        if self.tables.app.preloaded.is_empty() {
            return;
        }
        for class in self.env.all_classes() {
            if !self.env.is_public(class) || self.env.is_hidden(class) {
                continue;
            }
            if !self.registry.preloaded.contains(class) {
                continue;
            }
            if matches!(self.env.tier(class), LoaderTier::BootCore | LoaderTier::BootOther | LoaderTier::Platform) {
                self.add_initiated_for(LoaderTier::App, class);
            }
        }
    }

    fn record_initiated_classes(&mut self) {
        let platform = self.initiated_records(|registry| &registry.platform_initiated);
        let app = self.initiated_records(|registry| &registry.app_initiated);
        tracing::debug!(platform = platform.len(), app = app.len(), "initiated lists recorded");
        self.tables.platform.initiated = platform;
        self.tables.app.initiated = app;
    }

    fn initiated_records(&self, select: impl Fn(&crate::engine::ClassSetRegistry) -> &ClassSet) -> Vec<ClassRecord> {
        select(&self.registry)
            .entries_sorted()
            .into_iter()
            .filter(|(_, needs_recording)| *needs_recording)
            .map(|(class, _)| self.class_record(class))
            .collect()
    }

    fn record_unregistered_classes(&mut self) {
        if !self.kind.is_preimage() {
            return;
        }
        let mut records = Vec::new();
        for class in self.env.all_classes() {
            if self.env.is_unregistered(class) && self.env.is_loaded(class) {
                records.push(self.class_record(class));
            }
        }
        self.unregistered = records;
    }

    fn class_record(&self, class: ClassId) -> ClassRecord {
        ClassRecord {
            name: self.env.class_name(class).to_string(),
            tier: self.env.tier(class),
            fingerprint: self.env.fingerprint(class),
            hidden_kind: self.env.hidden_kind(class),
            has_preinitialized_state: self.env.has_preinitialized_state(class),
        }
    }

    /// Hand the assembled tables over as the serializable aggregate. A
    /// layered dump keeps the base archive's tables on the static side so
    /// replay sees both.
    pub fn build_archive(self) -> Archive {
        let mut archive = Archive::default();
        if self.kind.writes_static_tables() {
            archive.static_tables = self.tables;
        } else {
            archive.static_tables = self.prior_static.clone().unwrap_or_default();
            archive.dynamic_tables = self.tables;
        }
        archive.pending_call_sites = self.pending_call_sites;
        archive.unregistered = self.unregistered;
        archive
    }

    /// Static-side tables carried in from the base archive, if any.
    pub fn prior_static_tables(&self) -> Option<&crate::archive::TierTables> {
        self.prior_static.as_ref()
    }
}
