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

//! Dynamic call-site eligibility
//!
//! Only two bootstrap shapes are archivable: string-concatenation factories
//! and lambda metafactories. A lambda site is additionally held to three
//! conditions: its functional interface is already loaded, it really is an
//! interface, and nothing in its superinterface closure declares a static
//! initializer. Materializing the proxy at startup initializes the
//! interface, so an initializer would run earlier than the un-archived
//! program would have run it. Sites that were exercised but cannot be
//! confirmed here go onto a deferred worklist for the final dump stage.

use super::DumpSession;
use crate::archive::PendingCallSiteRecord;
use crate::policy::{BootstrapKind, EnginePolicy};
use crate::pool::{PoolEntry, PoolTag, SymbolicRef, TrainingMask};
use crate::runtime::{ClassGraph, RuntimeEnv};
use dotlink_common::{ClassId, PoolIndex};

/// Transitive check for a static initializer anywhere in a class's
/// supertype/interface closure.
pub(crate) fn has_class_initializer<G: ClassGraph + ?Sized>(graph: &G, class: ClassId) -> bool {
    let mut worklist = vec![class];
    let mut seen = Vec::new();
    while let Some(current) = worklist.pop() {
        if seen.contains(&current) {
            continue;
        }
        seen.push(current);
        if graph.declares_static_initializer(current) {
            return true;
        }
        if let Some(super_class) = graph.super_class(current) {
            worklist.push(super_class);
        }
        worklist.extend(graph.interfaces(current));
    }
    false
}

/// Is the dynamic call site at `index` in `class`'s pool safe to resolve
/// and archive?
pub(crate) fn is_eligible<R: RuntimeEnv>(env: &R, policy: &EnginePolicy, class: ClassId, index: PoolIndex) -> bool {
    if !env.tier(class).is_builtin() {
        return false;
    }
    let spec = match env.entry(class, index) {
        PoolEntry::Unresolved(SymbolicRef::CallSite(spec)) => spec,
        PoolEntry::ResolvedCallSite { spec } => spec,
        _ => return false,
    };

    match policy.match_bootstrap(&spec) {
        None => false,
        Some(BootstrapKind::StringConcat) => true,
        Some(BootstrapKind::LambdaMetafactory) => {
            let Some(interface_name) = spec.site_interface_name() else {
                return false;
            };
            let Some(interface) = env.find_loaded(interface_name, env.host_tier(class)) else {
                return false;
            };
            if !env.is_interface(interface) {
                // Might not have come out of a compiler front end at all.
                return false;
            }
            if has_class_initializer(env, interface) {
                tracing::debug!(
                    class = env.class_name(class),
                    interface = interface_name,
                    "call site not archivable: interface closure declares a static initializer"
                );
                return false;
            }
            true
        }
    }
}

/// Replay-side call-site pass: the trial-run gating is already baked into
/// what was recorded, so every unresolved site is reconsidered, still
/// subject to the eligibility predicate.
pub(crate) fn preresolve_call_sites_replay<R: RuntimeEnv>(env: &mut R, policy: &EnginePolicy, class: ClassId) {
    for i in 1..env.pool_len(class) {
        let index = PoolIndex::new(i as u16);
        if env.entry_tag(class, index) != PoolTag::UnresolvedCallSite {
            continue;
        }
        if !is_eligible(&*env, policy, class, index) {
            continue;
        }
        if let Err(fault) = env.resolve_call_site(class, index) {
            tracing::trace!(class = env.class_name(class), %index, %fault, "call site resolution failed");
        }
    }
}

impl<'r, R: RuntimeEnv> DumpSession<'r, R> {
    /// Public form of the eligibility predicate.
    pub fn is_call_site_eligible(&self, class: ClassId, index: PoolIndex) -> bool {
        is_eligible(&*self.env, &self.policy, class, index)
    }

    /// Resolve the exercised dynamic call sites of one class. Eligible sites
    /// resolve now (faults dropped); exercised-but-unconfirmed sites are
    /// deferred to the final dump stage when this dump is a preimage.
    pub(crate) fn preresolve_call_sites(&mut self, class: ClassId, mask: Option<&TrainingMask>) {
        let mut deferred = Vec::new();
        for i in 1..self.env.pool_len(class) {
            let index = PoolIndex::new(i as u16);
            if self.env.entry_tag(class, index) != PoolTag::UnresolvedCallSite {
                continue;
            }
            if let Some(mask) = mask {
                if !mask.is_exercised(index) {
                    continue;
                }
            }
            if is_eligible(&*self.env, &self.policy, class, index) {
                match self.env.resolve_call_site(class, index) {
                    Ok(()) => {
                        tracing::trace!(class = self.env.class_name(class), %index, "resolved call site");
                    }
                    Err(fault) => {
                        tracing::trace!(class = self.env.class_name(class), %index, %fault, "call site resolution failed");
                    }
                }
            } else if self.kind.is_preimage() {
                deferred.push(index);
            }
        }
        if !deferred.is_empty() {
            self.pending_call_sites.push(PendingCallSiteRecord {
                class_name: self.env.class_name(class).to_string(),
                tier: self.env.tier(class),
                indices: deferred,
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::DumpKind;
    use crate::pool::CallSiteSpec;
    use crate::runtime::memory::{ClassSpec, MemoryRuntime, PoolSpec, UniverseBuilder};
    use crate::runtime::{ClassLoading, ConstantPools};
    use dotlink_common::LoaderTier;

    fn lambda_site(interface: &str) -> PoolSpec {
        PoolSpec::CallSite {
            bootstrap_class: "invoke/LambdaMetafactory".to_string(),
            bootstrap_method: "metafactory".to_string(),
            bootstrap_descriptor:
                "(Linvoke/Lookup;Lcore/String;Linvoke/MethodType;Linvoke/MethodType;Linvoke/MethodHandle;Linvoke/MethodType;)Linvoke/CallSite;"
                    .to_string(),
            site_descriptor: format!("()L{interface};"),
        }
    }

    fn concat_site() -> PoolSpec {
        PoolSpec::CallSite {
            bootstrap_class: "invoke/StringConcatFactory".to_string(),
            bootstrap_method: "makeConcatWithConstants".to_string(),
            bootstrap_descriptor: "(whatever)".to_string(),
            site_descriptor: "(Lcore/String;I)Lcore/String;".to_string(),
        }
    }

    fn universe(site: PoolSpec, clinit_on: Option<&str>) -> MemoryRuntime {
        let mut runnable = ClassSpec::new("app/Runnable", LoaderTier::App).interface_flag().interface("app/Task");
        let mut task = ClassSpec::new("app/Task", LoaderTier::App).interface_flag();
        if clinit_on == Some("app/Runnable") {
            runnable = runnable.declares_static_initializer();
        }
        if clinit_on == Some("app/Task") {
            task = task.declares_static_initializer();
        }
        UniverseBuilder::new()
            .class(ClassSpec::new("core/Object", LoaderTier::BootCore))
            .class(ClassSpec::new("invoke/LambdaMetafactory", LoaderTier::BootCore).super_class("core/Object"))
            .class(ClassSpec::new("invoke/StringConcatFactory", LoaderTier::BootCore).super_class("core/Object"))
            .class(task)
            .class(runnable)
            .class(ClassSpec::new("app/Main", LoaderTier::App).super_class("core/Object").pool(vec![site]))
            .build()
            .unwrap()
    }

    fn main_class(env: &MemoryRuntime) -> ClassId {
        env.find_loaded("app/Main", LoaderTier::App).unwrap()
    }

    #[test]
    fn test_concat_site_is_eligible() {
        let env = universe(concat_site(), None);
        let main = main_class(&env);
        assert!(is_eligible(&env, &EnginePolicy::default(), main, PoolIndex::new(1)));
    }

    #[test]
    fn test_lambda_site_with_clean_interface_is_eligible() {
        let env = universe(lambda_site("app/Runnable"), None);
        let main = main_class(&env);
        assert!(is_eligible(&env, &EnginePolicy::default(), main, PoolIndex::new(1)));
    }

    #[test]
    fn test_lambda_site_rejected_when_interface_declares_initializer() {
        let env = universe(lambda_site("app/Runnable"), Some("app/Runnable"));
        let main = main_class(&env);
        assert!(!is_eligible(&env, &EnginePolicy::default(), main, PoolIndex::new(1)));
    }

    #[test]
    fn test_lambda_site_rejected_when_superinterface_declares_initializer() {
        let env = universe(lambda_site("app/Runnable"), Some("app/Task"));
        let main = main_class(&env);
        assert!(!is_eligible(&env, &EnginePolicy::default(), main, PoolIndex::new(1)));
    }

    #[test]
    fn test_lambda_site_rejected_when_interface_not_loaded() {
        let env = universe(lambda_site("app/Ghost"), None);
        let main = main_class(&env);
        assert!(!is_eligible(&env, &EnginePolicy::default(), main, PoolIndex::new(1)));
    }

    #[test]
    fn test_lambda_site_rejected_when_target_is_not_interface() {
        let env = UniverseBuilder::new()
            .class(ClassSpec::new("core/Object", LoaderTier::BootCore))
            .class(ClassSpec::new("app/Concrete", LoaderTier::App).super_class("core/Object"))
            .class(
                ClassSpec::new("app/Main", LoaderTier::App)
                    .super_class("core/Object")
                    .pool(vec![lambda_site("app/Concrete")]),
            )
            .build()
            .unwrap();
        let main = main_class(&env);
        assert!(!is_eligible(&env, &EnginePolicy::default(), main, PoolIndex::new(1)));
    }

    #[test]
    fn test_unknown_bootstrap_is_ineligible() {
        let site = PoolSpec::CallSite {
            bootstrap_class: "app/HomegrownFactory".to_string(),
            bootstrap_method: "bootstrap".to_string(),
            bootstrap_descriptor: "(x)".to_string(),
            site_descriptor: "()Lapp/Runnable;".to_string(),
        };
        let env = universe(site, None);
        let main = main_class(&env);
        assert!(!is_eligible(&env, &EnginePolicy::default(), main, PoolIndex::new(1)));
    }

    #[test]
    fn test_exercised_unconfirmed_site_deferred_in_preimage_dump() {
        let mut env = universe(lambda_site("app/Ghost"), None);
        let main = main_class(&env);
        let mut mask = TrainingMask::empty(env.pool_len(main));
        mask.mark(PoolIndex::new(1));
        let mut session = DumpSession::new(&mut env, EnginePolicy::default(), DumpKind::Preimage, None);
        session.prelink_class(main, Some(&mask));
        assert_eq!(session.pending_call_sites.len(), 1);
        assert_eq!(session.pending_call_sites[0].class_name, "app/Main");
        assert_eq!(session.pending_call_sites[0].indices, vec![PoolIndex::new(1)]);
    }

    #[test]
    fn test_unexercised_site_not_deferred() {
        let mut env = universe(lambda_site("app/Ghost"), None);
        let main = main_class(&env);
        let mask = TrainingMask::empty(env.pool_len(main));
        let mut session = DumpSession::new(&mut env, EnginePolicy::default(), DumpKind::Preimage, None);
        session.prelink_class(main, Some(&mask));
        assert!(session.pending_call_sites.is_empty());
    }

    #[test]
    fn test_eligible_site_resolves_instead_of_deferring() {
        let mut env = universe(concat_site(), None);
        let main = main_class(&env);
        let mut mask = TrainingMask::empty(env.pool_len(main));
        mask.mark(PoolIndex::new(1));
        let mut session = DumpSession::new(&mut env, EnginePolicy::default(), DumpKind::Preimage, None);
        session.prelink_class(main, Some(&mask));
        assert!(session.pending_call_sites.is_empty());
        assert_eq!(env.entry_tag(main, PoolIndex::new(1)), PoolTag::ResolvedCallSite);
    }

    #[test]
    fn test_spec_parsing_handles_malformed_descriptor() {
        let spec = CallSiteSpec {
            bootstrap_class: "invoke/LambdaMetafactory".to_string(),
            bootstrap_method: "metafactory".to_string(),
            bootstrap_descriptor: "(x)".to_string(),
            site_descriptor: "no-parens".to_string(),
        };
        assert_eq!(spec.site_interface_name(), None);
    }
}
