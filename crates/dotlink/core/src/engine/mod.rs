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

//! Dump and replay sessions
//!
//! A [`DumpSession`] lives for exactly one dump: it owns the class sets, the
//! deferred call-site worklist and the tables being assembled, and borrows
//! the runtime for the duration. A [`ReplaySession`] is its startup-time
//! counterpart. Neither leaves anything behind in process-global state.

pub mod analyzer;
pub mod callsite;
pub mod prelinker;
pub mod recorder;
pub mod registry;
pub mod replay;

pub use registry::{ClassSet, ClassSetRegistry};
pub use replay::{PreloadingFlag, ReplayCounters, ReplaySession};

use crate::archive::{ClassRecord, DumpKind, PendingCallSiteRecord, TierTables};
use crate::policy::EnginePolicy;
use crate::pool::TrainingMask;
use crate::runtime::RuntimeEnv;
use dotlink_common::{ClassId, LoaderTier};
use std::collections::HashMap;

/// One dump's worth of archiving state.
pub struct DumpSession<'r, R: RuntimeEnv> {
    pub(crate) env: &'r mut R,
    pub(crate) policy: EnginePolicy,
    pub(crate) kind: DumpKind,
    pub(crate) registry: ClassSetRegistry,
    pub(crate) pending_call_sites: Vec<PendingCallSiteRecord>,
    pub(crate) tables: TierTables,
    pub(crate) unregistered: Vec<ClassRecord>,
    pub(crate) prior_static: Option<TierTables>,
}

impl<'r, R: RuntimeEnv> DumpSession<'r, R> {
    /// Start a dump session. `prior_static` carries the tables of an
    /// already-loaded base archive when producing a layered archive; classes
    /// it names count as preloaded but are not recorded again.
    pub fn new(env: &'r mut R, policy: EnginePolicy, kind: DumpKind, prior_static: Option<TierTables>) -> Self {
        let mut session = DumpSession {
            env,
            policy,
            kind,
            registry: ClassSetRegistry::new(),
            pending_call_sites: Vec::new(),
            tables: TierTables::default(),
            unregistered: Vec::new(),
            prior_static,
        };
        session.seed_essential_classes();
        if kind == DumpKind::Dynamic {
            if let Some(prior) = session.prior_static.clone() {
                session.adopt_prior_tables(&prior);
            }
        }
        session.record_dictionary_initiated(LoaderTier::Platform);
        session.record_dictionary_initiated(LoaderTier::App);
        session
    }

    fn seed_essential_classes(&mut self) {
        let names = self.policy.essential_classes.clone();
        for name in names {
            match self.env.find_loaded(&name, LoaderTier::BootCore) {
                Some(class) => self.registry.seed_essential(&*self.env, class),
                None => tracing::debug!(class = %name, "essential class not present in this run"),
            }
        }
        tracing::debug!(essential = self.registry.num_essential(), "required-by-runtime set seeded");
    }

    /// Mark every class of an earlier archive layer as preloaded, and its
    /// initiated records as already recorded. Nothing here is re-archived.
    fn adopt_prior_tables(&mut self, prior: &TierTables) {
        for tier in LoaderTier::REPLAY_ORDER {
            let table = prior.table(tier);
            for record in &table.preloaded {
                let found = if record.hidden_kind.is_some() {
                    self.env.find_class_definition(&record.name, record.tier)
                } else {
                    self.env.find_loaded(&record.name, record.tier)
                };
                if let Some(class) = found {
                    self.registry.preloaded.insert(class);
                }
            }
            for record in &table.initiated {
                if let Some(class) = self.env.find_loaded(&record.name, tier) {
                    if let Some(set) = self.initiated_set_mut(tier) {
                        set.insert_marked(class, false);
                    }
                }
            }
        }
    }

    /// Record every cross-tier entry of a loader dictionary as initiated.
    /// Covers verification and loader constraints observed during the run.
    fn record_dictionary_initiated(&mut self, tier: LoaderTier) {
        let mut entries = Vec::new();
        self.env.with_dictionary_entries(tier, &mut |class| entries.push(class));
        for class in entries {
            if self.env.tier(class) != tier {
                self.add_initiated_for(tier, class);
            }
        }
    }

    pub(crate) fn initiated_set_mut(&mut self, tier: LoaderTier) -> Option<&mut ClassSet> {
        match tier {
            LoaderTier::Platform => Some(&mut self.registry.platform_initiated),
            LoaderTier::App => Some(&mut self.registry.app_initiated),
            _ => None,
        }
    }

    /// Record that `tier` initiates loading of `target` (which it does not
    /// define).
    pub(crate) fn add_initiated_for(&mut self, tier: LoaderTier, target: ClassId) {
        let name = self.env.class_name(target).to_string();
        if let Some(set) = self.initiated_set_mut(tier) {
            if set.insert(target) {
                tracing::trace!(loader = %tier, class = %name, "loader initiated class");
            }
        }
    }

    /// Is this class resolved during the runtime's own bootstrap? Such
    /// classes are guaranteed present at startup and may be referenced
    /// directly.
    pub fn is_runtime_essential(&self, class: ClassId) -> bool {
        self.registry.required.contains(class)
    }

    /// Will this class be auto-loaded at next startup?
    pub fn is_preloaded(&self, class: ClassId) -> bool {
        self.registry.preloaded.contains(class)
    }

    pub fn num_essential(&self) -> usize {
        self.registry.num_essential()
    }

    pub fn kind(&self) -> DumpKind {
        self.kind
    }

    /// Prelink every class known to the dump, consulting per-class training
    /// masks where present.
    pub fn prelink_all(&mut self, masks: &HashMap<ClassId, TrainingMask>) {
        for class in self.env.all_classes() {
            self.prelink_class(class, masks.get(&class));
        }
    }
}
