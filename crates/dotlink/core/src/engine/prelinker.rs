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

//! Constant-pool prelinking
//!
//! Eager, best-effort resolution of pool entries at dump time, and the same
//! passes re-run per tier at replay. Resolution is gated three ways: by the
//! training mask (never resolve what the trial run did not exercise; the
//! optimizer would inline code that never ran), by load state (never trigger
//! a class load as a side effect), and by instruction kind (static fields
//! and virtual dispatch stay unresolved unless explicitly allowed). Every
//! fault is discarded where it occurs.

use super::DumpSession;
use crate::bytecode::{AccessOpcode, CodeScanner};
use crate::policy::EnginePolicy;
use crate::pool::{PoolEntry, PoolTag, SymbolicRef, TrainingMask};
use crate::runtime::RuntimeEnv;
use dotlink_common::{ClassId, MethodIndex, PoolIndex};

/// Intern every string entry of a class's pool. Always safe; faults (e.g.
/// intern-table exhaustion) are dropped like any other.
pub(crate) fn resolve_strings<R: RuntimeEnv>(env: &mut R, class: ClassId) {
    for i in 1..env.pool_len(class) {
        let index = PoolIndex::new(i as u16);
        if env.entry_tag(class, index) != PoolTag::StringData {
            continue;
        }
        if let Err(fault) = env.intern_string(class, index) {
            tracing::trace!(class = env.class_name(class), %index, %fault, "string interning failed");
        }
    }
}

/// Resolve unresolved class entries, skipping anything the training mask
/// marks unexercised and anything not already loaded by the holder's own
/// loader chain.
pub(crate) fn preresolve_class_entries<R: RuntimeEnv>(env: &mut R, class: ClassId, mask: Option<&TrainingMask>) {
    for i in 1..env.pool_len(class) {
        let index = PoolIndex::new(i as u16);
        if env.entry_tag(class, index) != PoolTag::UnresolvedClass {
            continue;
        }
        if let Some(mask) = mask {
            if !mask.is_exercised(index) {
                // Not resolved during the trial run; resolving it here would
                // skew later optimization decisions.
                continue;
            }
        }
        let PoolEntry::Unresolved(SymbolicRef::Class { name }) = env.entry(class, index) else {
            continue;
        };
        if env.find_loaded(&name, env.host_tier(class)).is_none() {
            // Never trigger a fresh class load as a side effect.
            continue;
        }
        match env.resolve_class_entry(class, index) {
            Ok(target) => {
                tracing::trace!(class = env.class_name(class), %index, target = env.class_name(target), "resolved class entry");
            }
            Err(fault) => {
                tracing::trace!(class = env.class_name(class), %index, %fault, "class entry resolution failed");
            }
        }
    }
}

/// Walk every method's bytecode and resolve the field and method entries its
/// instructions reference, subject to the opcode allow-list.
pub(crate) fn preresolve_member_entries<R: RuntimeEnv>(env: &mut R, policy: &EnginePolicy, class: ClassId, mask: Option<&TrainingMask>) {
    for m in 0..env.method_count(class) {
        let method = MethodIndex::new(m as u16);
        let code = env.method_code(class, method).to_vec();
        for site in CodeScanner::new(&code) {
            let site = match site {
                Ok(site) => site,
                Err(error) => {
                    tracing::trace!(class = env.class_name(class), %error, "stopping scan of malformed method");
                    break;
                }
            };
            if !should_resolve_kind(site.opcode, policy) {
                continue;
            }
            maybe_resolve_member(env, policy, class, site.opcode, site.pool_index, mask);
        }
    }
}

/// The stable allow-list, plus the explicit opt-in gates for the riskier
/// kinds.
fn should_resolve_kind(opcode: AccessOpcode, policy: &EnginePolicy) -> bool {
    match opcode {
        AccessOpcode::GetField | AccessOpcode::PutField => true,
        AccessOpcode::GetStatic | AccessOpcode::PutStatic => policy.resolution.resolve_static_fields,
        AccessOpcode::InvokeSpecial | AccessOpcode::InvokeStatic => true,
        AccessOpcode::InvokeHandle => policy.archive_call_sites,
        AccessOpcode::InvokeVirtual | AccessOpcode::InvokeInterface => policy.resolution.resolve_virtual_dispatch,
        AccessOpcode::InvokeDynamic => false,
    }
}

fn maybe_resolve_member<R: RuntimeEnv>(env: &mut R, policy: &EnginePolicy, class: ClassId, opcode: AccessOpcode, index: PoolIndex, mask: Option<&TrainingMask>) {
    let entry = env.entry(class, index);
    if entry.is_resolved() {
        return;
    }
    let class_index = match &entry {
        PoolEntry::Unresolved(SymbolicRef::Field { class_index, .. }) if opcode.is_field_access() => *class_index,
        PoolEntry::Unresolved(SymbolicRef::Method { class_index, .. }) if !opcode.is_field_access() => *class_index,
        _ => return,
    };

    if let Some(mask) = mask {
        if !mask.is_exercised(index) {
            tracing::trace!(class = env.class_name(class), op = opcode.to_mnemonic(), %index, "skipped: not exercised in trial run");
            return;
        }
    }

    let target_name = match env.entry(class, class_index) {
        PoolEntry::ResolvedClass { name, .. } => name,
        PoolEntry::UnresolvedInError(_) => {
            tracing::trace!(class = env.class_name(class), op = opcode.to_mnemonic(), %index, "skipped: target class unresolved-in-error");
            return;
        }
        PoolEntry::Unresolved(SymbolicRef::Class { name }) => {
            if env.find_loaded(&name, env.host_tier(class)).is_none() {
                tracing::trace!(class = env.class_name(class), op = opcode.to_mnemonic(), %index, target = %name, "skipped: target class not loaded");
                return;
            }
            name
        }
        _ => return,
    };

    if opcode == AccessOpcode::InvokeStatic && !policy.is_static_invoke_holder(&target_name) {
        // Static invocation is resolved only against the method-handle
        // intrinsic holders; anywhere else the initialization side effect is
        // not worth the risk.
        return;
    }

    match env.resolve_member_entry(class, index, opcode) {
        Ok(()) => {
            tracing::trace!(class = env.class_name(class), op = opcode.to_mnemonic(), %index, target = %target_name, "resolved member entry");
        }
        Err(fault) => {
            tracing::trace!(class = env.class_name(class), op = opcode.to_mnemonic(), %index, %fault, "member resolution failed");
        }
    }
}

impl<'r, R: RuntimeEnv> DumpSession<'r, R> {
    /// Prelink one class: strings first, then class entries, then the
    /// bytecode-driven member pass, then dynamic call sites. Idempotent per
    /// dump; the processed marker gates re-entry. Unlinked classes are left
    /// alone entirely.
    pub fn prelink_class(&mut self, class: ClassId, mask: Option<&TrainingMask>) {
        if !self.env.is_linked(class) {
            return;
        }
        if !self.registry.processed.insert(class) {
            return;
        }

        resolve_strings(&mut *self.env, class);

        // Adapter holders and archivable hidden classes exist to be inlined
        // through; resolve everything they reference, training data or not.
        let name = self.env.class_name(class).to_string();
        let eager = (self.env.tier(class).is_builtin() && self.policy.is_adapter_class(&name))
            || (self.env.is_hidden(class) && self.env.hidden_kind(class).is_some());
        let effective_mask = if eager { None } else { mask };

        preresolve_class_entries(&mut *self.env, class, effective_mask);
        preresolve_member_entries(&mut *self.env, &self.policy, class, effective_mask);

        if self.policy.archive_call_sites {
            self.preresolve_call_sites(class, effective_mask);
        }
    }

    /// Dump-time forced preinitialization sweep over every class the dump
    /// knows.
    pub fn preinit_forced_classes(&mut self) {
        for class in self.env.all_classes() {
            self.maybe_preinit_class(class);
        }
    }

    /// Initialize a class at dump time when policy lists it and the runtime
    /// approves; the captured state is restored at replay instead of running
    /// the initializer.
    pub fn maybe_preinit_class(&mut self, class: ClassId) {
        if self.env.is_initialized(class) {
            return;
        }
        let name = self.env.class_name(class).to_string();
        if !self.policy.is_forced_preinit(&name) || !self.env.can_preinitialize(class) {
            return;
        }
        tracing::info!(class = %name, "preinitializing at dump time");
        if let Err(fault) = self.env.initialize_class(class) {
            tracing::trace!(class = %name, %fault, "dump-time initialization failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::DumpKind;
    use crate::bytecode::scanner::emit;
    use crate::runtime::memory::{ClassSpec, MemoryRuntime, MethodSpec, PoolSpec, UniverseBuilder};
    use crate::runtime::{ClassLoading, ConstantPools};
    use dotlink_common::LoaderTier;

    fn field_pool(target: &str) -> Vec<PoolSpec> {
        vec![
            PoolSpec::Class { name: target.to_string() },
            PoolSpec::Field {
                class_index: 1,
                name: "value".to_string(),
                descriptor: "I".to_string(),
            },
        ]
    }

    fn getter_method() -> MethodSpec {
        let mut code = Vec::new();
        code.push(0x00);
        emit(&mut code, AccessOpcode::GetField, PoolIndex::new(2));
        MethodSpec::new("get", "()I").code_bytes(code)
    }

    fn universe() -> MemoryRuntime {
        UniverseBuilder::new()
            .class(ClassSpec::new("core/Object", LoaderTier::BootCore))
            .class(ClassSpec::new("app/Holder", LoaderTier::App).super_class("core/Object").field("value", "I", false))
            .class(
                ClassSpec::new("app/Main", LoaderTier::App)
                    .super_class("core/Object")
                    .pool(field_pool("app/Holder"))
                    .method(getter_method()),
            )
            .build()
            .unwrap()
    }

    fn session(env: &mut MemoryRuntime) -> DumpSession<'_, MemoryRuntime> {
        DumpSession::new(env, EnginePolicy::default(), DumpKind::Static, None)
    }

    #[test]
    fn test_member_entry_resolved_through_bytecode_scan() {
        let mut env = universe();
        let main = env.find_loaded("app/Main", LoaderTier::App).unwrap();
        let mut s = session(&mut env);
        s.prelink_class(main, None);
        assert_eq!(env.entry_tag(main, PoolIndex::new(2)), PoolTag::ResolvedField);
    }

    #[test]
    fn test_prelink_is_idempotent_per_dump() {
        let mut env = universe();
        let main = env.find_loaded("app/Main", LoaderTier::App).unwrap();
        let mut s = session(&mut env);
        s.prelink_class(main, None);
        let ops_after_first = env.op_log().len();
        let mut s = DumpSession::new(&mut env, EnginePolicy::default(), DumpKind::Static, None);
        s.registry.processed.insert(main);
        s.prelink_class(main, None);
        assert_eq!(env.op_log().len(), ops_after_first);
    }

    #[test]
    fn test_second_prelink_in_same_session_is_noop() {
        let mut env = universe();
        let main = env.find_loaded("app/Main", LoaderTier::App).unwrap();
        let mut s = session(&mut env);
        s.prelink_class(main, None);
        let ops = s.env.op_log().len();
        s.prelink_class(main, None);
        assert_eq!(s.env.op_log().len(), ops);
    }

    #[test]
    fn test_training_mask_blocks_unexercised_entry() {
        let mut env = universe();
        let main = env.find_loaded("app/Main", LoaderTier::App).unwrap();
        let mask = TrainingMask::empty(env.pool_len(main));
        let mut s = session(&mut env);
        s.prelink_class(main, Some(&mask));
        assert_eq!(env.entry_tag(main, PoolIndex::new(2)), PoolTag::UnresolvedField);
    }

    #[test]
    fn test_unloaded_target_never_resolved() {
        let mut env = UniverseBuilder::new()
            .class(ClassSpec::new("core/Object", LoaderTier::BootCore))
            .class(ClassSpec::new("app/Lazy", LoaderTier::App).super_class("core/Object").not_loaded())
            .class(
                ClassSpec::new("app/Main", LoaderTier::App)
                    .super_class("core/Object")
                    .pool(vec![PoolSpec::Class { name: "app/Lazy".to_string() }]),
            )
            .build()
            .unwrap();
        let main = env.find_loaded("app/Main", LoaderTier::App).unwrap();
        let mut s = session(&mut env);
        s.prelink_class(main, None);
        assert_eq!(env.entry_tag(main, PoolIndex::new(1)), PoolTag::UnresolvedClass);
    }

    #[test]
    fn test_unlinked_class_is_skipped() {
        let mut env = UniverseBuilder::new()
            .class(ClassSpec::new("core/Object", LoaderTier::BootCore))
            .class(
                ClassSpec::new("app/Raw", LoaderTier::App)
                    .super_class("core/Object")
                    .not_linked()
                    .pool(vec![PoolSpec::String { value: "hello".to_string() }]),
            )
            .build()
            .unwrap();
        let raw = env.find_loaded("app/Raw", LoaderTier::App).unwrap();
        let mut s = session(&mut env);
        s.prelink_class(raw, None);
        assert!(env.op_log().is_empty());
    }

    #[test]
    fn test_strings_interned_for_linked_classes() {
        let mut env = UniverseBuilder::new()
            .class(ClassSpec::new("core/Object", LoaderTier::BootCore))
            .class(
                ClassSpec::new("app/Main", LoaderTier::App)
                    .super_class("core/Object")
                    .pool(vec![PoolSpec::String { value: "hello".to_string() }]),
            )
            .build()
            .unwrap();
        let main = env.find_loaded("app/Main", LoaderTier::App).unwrap();
        let mut s = session(&mut env);
        s.prelink_class(main, None);
        match env.entry(main, PoolIndex::new(1)) {
            PoolEntry::StringData { interned, .. } => assert!(interned),
            other => panic!("unexpected entry: {other:?}"),
        }
    }

    #[test]
    fn test_static_field_access_needs_allow_flag() {
        let build = || {
            let mut code = Vec::new();
            emit(&mut code, AccessOpcode::GetStatic, PoolIndex::new(2));
            UniverseBuilder::new()
                .class(ClassSpec::new("core/Object", LoaderTier::BootCore))
                .class(ClassSpec::new("app/Holder", LoaderTier::App).super_class("core/Object").field("flag", "Z", true))
                .class(
                    ClassSpec::new("app/Main", LoaderTier::App)
                        .super_class("core/Object")
                        .pool(vec![
                            PoolSpec::Class { name: "app/Holder".to_string() },
                            PoolSpec::Field {
                                class_index: 1,
                                name: "flag".to_string(),
                                descriptor: "Z".to_string(),
                            },
                        ])
                        .method(MethodSpec::new("test", "()Z").code_bytes(code.clone())),
                )
                .build()
                .unwrap()
        };

        let mut env = build();
        let main = env.find_loaded("app/Main", LoaderTier::App).unwrap();
        let mut s = session(&mut env);
        s.prelink_class(main, None);
        assert_eq!(env.entry_tag(main, PoolIndex::new(2)), PoolTag::UnresolvedField);

        let mut env = build();
        let main = env.find_loaded("app/Main", LoaderTier::App).unwrap();
        let mut policy = EnginePolicy::default();
        policy.resolution.resolve_static_fields = true;
        let mut s = DumpSession::new(&mut env, policy, DumpKind::Static, None);
        s.prelink_class(main, None);
        assert_eq!(env.entry_tag(main, PoolIndex::new(2)), PoolTag::ResolvedField);
    }

    #[test]
    fn test_static_invoke_restricted_to_intrinsic_holders() {
        let build = |target: &str| {
            let mut code = Vec::new();
            emit(&mut code, AccessOpcode::InvokeStatic, PoolIndex::new(2));
            UniverseBuilder::new()
                .class(ClassSpec::new("core/Object", LoaderTier::BootCore))
                .class(
                    ClassSpec::new(target, LoaderTier::BootCore)
                        .super_class("core/Object")
                        .method(MethodSpec::new("probe", "()V")),
                )
                .class(
                    ClassSpec::new("app/Main", LoaderTier::App)
                        .super_class("core/Object")
                        .pool(vec![
                            PoolSpec::Class { name: target.to_string() },
                            PoolSpec::Method {
                                class_index: 1,
                                name: "probe".to_string(),
                                descriptor: "()V".to_string(),
                                dispatch: "static".to_string(),
                            },
                        ])
                        .method(MethodSpec::new("run", "()V").code_bytes(code.clone())),
                )
                .build()
                .unwrap()
        };

        let mut env = build("invoke/MethodHandle");
        let main = env.find_loaded("app/Main", LoaderTier::App).unwrap();
        let mut s = session(&mut env);
        s.prelink_class(main, None);
        assert_eq!(env.entry_tag(main, PoolIndex::new(2)), PoolTag::ResolvedMethod);

        let mut env = build("app/Util");
        let main = env.find_loaded("app/Main", LoaderTier::App).unwrap();
        let mut s = session(&mut env);
        s.prelink_class(main, None);
        assert_eq!(env.entry_tag(main, PoolIndex::new(2)), PoolTag::UnresolvedMethod);
    }

    #[test]
    fn test_adapter_class_resolved_eagerly_despite_empty_mask() {
        let mut env = UniverseBuilder::new()
            .class(ClassSpec::new("core/Object", LoaderTier::BootCore))
            .class(ClassSpec::new("invoke/MethodType", LoaderTier::BootCore).super_class("core/Object"))
            .class(
                ClassSpec::new("invoke/Invokers$Holder", LoaderTier::BootCore)
                    .super_class("core/Object")
                    .pool(vec![PoolSpec::Class { name: "invoke/MethodType".to_string() }]),
            )
            .build()
            .unwrap();
        let holder = env.find_loaded("invoke/Invokers$Holder", LoaderTier::BootCore).unwrap();
        let mask = TrainingMask::empty(env.pool_len(holder));
        let mut s = session(&mut env);
        s.prelink_class(holder, Some(&mask));
        assert_eq!(env.entry_tag(holder, PoolIndex::new(1)), PoolTag::ResolvedClass);
    }

    #[test]
    fn test_resolution_fault_is_discarded() {
        // The field exists in the pool but not on the target class: the
        // resolution attempt fails and the dump carries on.
        let mut code = Vec::new();
        emit(&mut code, AccessOpcode::GetField, PoolIndex::new(2));
        let mut env = UniverseBuilder::new()
            .class(ClassSpec::new("core/Object", LoaderTier::BootCore))
            .class(ClassSpec::new("app/Holder", LoaderTier::App).super_class("core/Object"))
            .class(
                ClassSpec::new("app/Main", LoaderTier::App)
                    .super_class("core/Object")
                    .pool(vec![
                        PoolSpec::Class { name: "app/Holder".to_string() },
                        PoolSpec::Field {
                            class_index: 1,
                            name: "ghost".to_string(),
                            descriptor: "I".to_string(),
                        },
                    ])
                    .method(MethodSpec::new("run", "()V").code_bytes(code)),
            )
            .build()
            .unwrap();
        let main = env.find_loaded("app/Main", LoaderTier::App).unwrap();
        let mut s = session(&mut env);
        s.prelink_class(main, None);
        assert_eq!(env.entry_tag(main, PoolIndex::new(2)), PoolTag::UnresolvedInError);
    }
}
