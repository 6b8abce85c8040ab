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

//! Startup-time replay
//!
//! Invoked once per loader tier, strictly boot-core, boot-other, platform,
//! application. Each invocation registers initiated classes, loads the
//! tier's preload list, catches up preinitialized static state, and re-runs
//! constant-pool resolution for the tier's classes. Loading failures fall
//! back to ordinary on-demand loading for the affected class; an identity
//! mismatch is fatal. After the application tier the process-wide finished
//! flag is published with release semantics; until then no one may assume
//! cross-references among preloaded classes are valid.

use super::{callsite, prelinker};
use crate::archive::{Archive, PreloadTable};
use crate::errors::{ReplayError, ReplayResult};
use crate::policy::EnginePolicy;
use crate::pool::TrainingMask;
use crate::runtime::RuntimeEnv;
use dotlink_common::{ClassId, LoaderTier, MethodIndex};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Cloneable read handle on the process-wide "preloading finished" flag.
/// Transitions to finished exactly once; reads synchronize with everything
/// the replay engine did before publishing.
#[derive(Clone)]
pub struct PreloadingFlag(Arc<AtomicBool>);

impl PreloadingFlag {
    pub fn is_finished(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// Preload counters, mirrored to the `metrics` facade.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ReplayCounters {
    pub classes_preloaded: u64,
    pub preload_time: Duration,
}

/// Startup-time counterpart of the dump session. Owns the deserialized
/// archive for the lifetime of the replay; the tables are never mutated,
/// only consumed.
pub struct ReplaySession<'r, R: RuntimeEnv> {
    env: &'r mut R,
    policy: EnginePolicy,
    archive: Archive,
    final_stage: bool,
    finished: Arc<AtomicBool>,
    next: usize,
    counters: ReplayCounters,
}

impl<'r, R: RuntimeEnv> ReplaySession<'r, R> {
    /// `archive: None` means no archive was mapped: every tier pass becomes
    /// a no-op and the flag still publishes after the application tier.
    /// `final_stage` is set when this replay feeds a final dump from a
    /// preimage archive.
    pub fn new(env: &'r mut R, policy: EnginePolicy, archive: Option<Archive>, final_stage: bool) -> Self {
        ReplaySession {
            env,
            policy,
            archive: archive.unwrap_or_default(),
            final_stage,
            finished: Arc::new(AtomicBool::new(false)),
            next: 0,
            counters: ReplayCounters::default(),
        }
    }

    pub fn finished_flag(&self) -> PreloadingFlag {
        PreloadingFlag(Arc::clone(&self.finished))
    }

    pub fn preloading_finished(&self) -> bool {
        self.finished.load(Ordering::Acquire)
    }

    pub fn counters(&self) -> ReplayCounters {
        self.counters
    }

    /// Replay one tier. Must be called exactly once per builtin tier, in
    /// replay order.
    pub fn replay_tier(&mut self, tier: LoaderTier) -> ReplayResult<()> {
        let expected = LoaderTier::REPLAY_ORDER.get(self.next).copied();
        if expected != Some(tier) {
            return Err(ReplayError::TierOrder { expected, got: tier });
        }
        self.next += 1;

        let start = Instant::now();
        let static_table = self.archive.static_tables.table(tier).clone();
        let dynamic_table = self.archive.dynamic_tables.table(tier).clone();

        for table in [&static_table, &dynamic_table] {
            self.replay_initiation(table, tier)?;
            self.replay_preload(table, tier)?;
            if tier != LoaderTier::BootCore {
                // Boot-core classes wait for init_boot_core_classes().
                self.replay_init_catchup(table, tier);
            }
        }
        for table in [&static_table, &dynamic_table] {
            self.replay_deferred_resolution(table, tier);
        }

        let elapsed = start.elapsed();
        self.counters.preload_time += elapsed;
        metrics::histogram!("dotlink_class_preload_seconds", elapsed.as_secs_f64());

        if tier == LoaderTier::App {
            self.finish();
        }
        Ok(())
    }

    fn finish(&mut self) {
        self.finished.store(true, Ordering::Release);
        tracing::debug!("class preloading finished");
        if self.final_stage {
            self.resolve_pending_call_sites();
            self.register_unregistered_classes();
        }
    }

    /// Step one: register this tier as initiator for classes it references
    /// but does not define. The class must already be loaded by an ancestor
    /// tier; anything else means the archive and the process disagree.
    fn replay_initiation(&mut self, table: &PreloadTable, tier: LoaderTier) -> ReplayResult<()> {
        for record in &table.initiated {
            match self.env.find_loaded(&record.name, tier) {
                Some(class) => {
                    tracing::info!(loader = %tier, class = %record.name, defined_by = %record.tier, "initiated");
                    self.env.register_initiator(tier, class);
                }
                None => {
                    return Err(ReplayError::InitiationPrecondition {
                        name: record.name.clone(),
                        tier,
                    });
                }
            }
        }
        Ok(())
    }

    /// Step two: load the preload list front to back. Ancestors precede
    /// dependents by construction, so plain sequential loading never sees a
    /// forward reference.
    fn replay_preload(&mut self, table: &PreloadTable, tier: LoaderTier) -> ReplayResult<()> {
        for record in &table.preloaded {
            self.counters.classes_preloaded += 1;
            metrics::increment_counter!("dotlink_classes_preloaded");

            if let Some(existing) = self.env.find_loaded(&record.name, tier) {
                tracing::info!(loader = %tier, class = %record.name, "preload (already loaded)");
                self.check_identity(record, existing)?;
                continue;
            }

            if record.hidden_kind.is_some() {
                // Hidden classes have no dictionary presence; re-attach the
                // archived metadata instead of parsing bytecode.
                match self.env.find_class_definition(&record.name, record.tier) {
                    Some(class) => {
                        tracing::info!(loader = %tier, class = %record.name, "preload (hidden)");
                        if let Err(fault) = self.env.restore_hidden_class(class, tier) {
                            tracing::trace!(class = %record.name, %fault, "hidden class restore failed");
                        }
                    }
                    None => {
                        tracing::trace!(class = %record.name, "archived hidden class has no definition in this image");
                    }
                }
                continue;
            }

            match self.env.load_class(&record.name, tier) {
                Ok(actual) => {
                    tracing::info!(loader = %tier, class = %record.name, "preload");
                    self.check_identity(record, actual)?;
                }
                Err(fault) => {
                    tracing::trace!(class = %record.name, %fault, "preload failed; class will load on demand");
                }
            }
        }
        Ok(())
    }

    /// The loaded class must be the archived one. A small fixed set of
    /// regenerated adapters legitimately exists in two variants, one per
    /// archive kind; a mismatch between exactly those is tolerated.
    fn check_identity(&self, record: &crate::archive::ClassRecord, actual: ClassId) -> ReplayResult<()> {
        let actual_fingerprint = self.env.fingerprint(actual);
        if actual_fingerprint == record.fingerprint {
            return Ok(());
        }
        if self.policy.is_adapter_class(&record.name) && self.env.class_name(actual) == record.name {
            tracing::debug!(class = %record.name, "regenerated adapter variant accepted");
            return Ok(());
        }
        tracing::error!(
            class = %record.name,
            expected = format_args!("{:#018x}", record.fingerprint),
            actual = format_args!("{:#018x}", actual_fingerprint),
            "archived class does not match the loaded definition; external bytecode transformation is not supported with preloading"
        );
        Err(ReplayError::IdentityMismatch {
            name: record.name.clone(),
            expected: record.fingerprint,
            actual: actual_fingerprint,
        })
    }

    /// Step three: restore captured static state, or just pre-link classes
    /// that carry none.
    fn replay_init_catchup(&mut self, table: &PreloadTable, tier: LoaderTier) {
        for record in &table.preloaded {
            let Some(class) = self.lookup_record(record, tier) else {
                continue;
            };
            if record.has_preinitialized_state {
                if let Err(fault) = self.env.restore_preinitialized_state(class) {
                    tracing::trace!(class = %record.name, %fault, "preinitialized state restore failed");
                }
            } else if self.env.is_loaded(class) && !self.env.is_linked(class) {
                if let Err(fault) = self.env.link_class(class) {
                    tracing::trace!(class = %record.name, %fault, "prelink failed");
                }
            }
        }
    }

    /// Step four: re-run constant-pool prelinking and call-site resolution
    /// for the tier's classes, everything eligible, plus native call stubs.
    fn replay_deferred_resolution(&mut self, table: &PreloadTable, tier: LoaderTier) {
        for record in &table.preloaded {
            let Some(class) = self.lookup_record(record, tier) else {
                continue;
            };
            tracing::info!(loader = %tier, class = %record.name, "preresolve");
            let mask = TrainingMask::all_eligible(self.env.pool_len(class));
            prelinker::preresolve_class_entries(&mut *self.env, class, Some(&mask));
            prelinker::preresolve_member_entries(&mut *self.env, &self.policy, class, Some(&mask));
            if self.policy.archive_call_sites {
                callsite::preresolve_call_sites_replay(&mut *self.env, &self.policy, class);
            }
            for m in 0..self.env.method_count(class) {
                let method = MethodIndex::new(m as u16);
                if self.env.method_is_native(class, method) {
                    if let Err(fault) = self.env.prepare_native_call(class, method) {
                        tracing::trace!(class = %record.name, %fault, "native call preparation failed");
                    }
                }
            }
        }
    }

    fn lookup_record(&self, record: &crate::archive::ClassRecord, tier: LoaderTier) -> Option<ClassId> {
        if record.hidden_kind.is_some() {
            self.env.find_class_definition(&record.name, record.tier)
        } else {
            self.env.find_loaded(&record.name, tier)
        }
    }

    /// Boot-core initialization catch-up, deferred until the embedder says
    /// the boot loader is fully functional.
    pub fn init_boot_core_classes(&mut self) {
        let tables = [
            self.archive.static_tables.boot_core.clone(),
            self.archive.dynamic_tables.boot_core.clone(),
        ];
        for table in &tables {
            self.replay_init_catchup(table, LoaderTier::BootCore);
        }
    }

    /// Report initialized boot-core classes to the external compilation
    /// policy for training-data replay.
    pub fn replay_boot_training(&mut self) {
        let tables = [
            self.archive.static_tables.boot_core.clone(),
            self.archive.dynamic_tables.boot_core.clone(),
        ];
        for table in &tables {
            for record in &table.preloaded {
                let Some(class) = self.lookup_record(record, LoaderTier::BootCore) else {
                    continue;
                };
                if self.env.is_initialized(class) {
                    tracing::debug!(class = %record.name, "replay training");
                    if let Err(fault) = self.env.replay_training(class) {
                        tracing::trace!(class = %record.name, %fault, "training replay failed");
                    }
                }
            }
        }
    }

    /// Final stage only: retry the deferred call sites recorded by the
    /// preimage dump, then drop the worklist.
    fn resolve_pending_call_sites(&mut self) {
        let pending = std::mem::take(&mut self.archive.pending_call_sites);
        for record in &pending {
            let Some(class) = self.env.find_loaded(&record.class_name, record.tier) else {
                tracing::trace!(class = %record.class_name, "pending call-site holder not loaded");
                continue;
            };
            for &index in &record.indices {
                if self.env.entry_tag(class, index) != crate::pool::PoolTag::UnresolvedCallSite {
                    continue;
                }
                if !callsite::is_eligible(&*self.env, &self.policy, class, index) {
                    continue;
                }
                if let Err(fault) = self.env.resolve_call_site(class, index) {
                    tracing::trace!(class = %record.class_name, %index, %fault, "deferred call site resolution failed");
                }
            }
        }
    }

    fn register_unregistered_classes(&mut self) {
        let carryover = std::mem::take(&mut self.archive.unregistered);
        for record in &carryover {
            if let Err(fault) = self.env.register_unregistered_class(&record.name, record.fingerprint) {
                tracing::trace!(class = %record.name, %fault, "unregistered class carryover failed");
            }
        }
    }

    pub fn log_counters(&self) {
        tracing::info!(
            preloaded = self.counters.classes_preloaded,
            preload_ms = self.counters.preload_time.as_millis() as u64,
            "replay complete"
        );
    }
}
