// Integration test: full dump -> serialize -> replay cycle over the
// in-memory reference runtime.

use dotlink_core::archive::{Archive, DumpKind, MemoryStore};
use dotlink_core::engine::{DumpSession, ReplaySession};
use dotlink_core::policy::EnginePolicy;
use dotlink_core::pool::PoolTag;
use dotlink_core::runtime::memory::{ClassSpec, MemoryRuntime, MethodSpec, PoolSpec, UniverseBuilder};
use dotlink_core::runtime::{ClassLoading, ConstantPools, HiddenKind};
use dotlink_common::{LoaderTier, PoolIndex};

fn policy() -> EnginePolicy {
    EnginePolicy {
        essential_classes: vec!["core/Object".to_string(), "core/String".to_string()],
        ..EnginePolicy::default()
    }
}

/// The world as a representative run left it: everything loaded, training
/// data attached where the trial run resolved entries.
fn dump_universe() -> MemoryRuntime {
    UniverseBuilder::new()
        .class(ClassSpec::new("core/Object", LoaderTier::BootCore))
        .class(ClassSpec::new("core/String", LoaderTier::BootCore).super_class("core/Object"))
        .class(ClassSpec::new("invoke/StringConcatFactory", LoaderTier::BootCore).super_class("core/Object"))
        .class(ClassSpec::new("plat/Api", LoaderTier::Platform).super_class("core/Object").initiated_by(LoaderTier::App))
        .class(
            ClassSpec::new("app/Service", LoaderTier::App)
                .super_class("plat/Api")
                .field("label", "Lcore/String;", false),
        )
        .class(
            ClassSpec::new("app/Main", LoaderTier::App)
                .super_class("app/Service")
                .pool(vec![
                    PoolSpec::Class { name: "app/Service".to_string() },
                    PoolSpec::Field {
                        class_index: 1,
                        name: "label".to_string(),
                        descriptor: "Lcore/String;".to_string(),
                    },
                    PoolSpec::Class { name: "plat/Api".to_string() },
                    PoolSpec::CallSite {
                        bootstrap_class: "invoke/StringConcatFactory".to_string(),
                        bootstrap_method: "makeConcatWithConstants".to_string(),
                        bootstrap_descriptor: "(concat)".to_string(),
                        site_descriptor: "(Lcore/String;)Lcore/String;".to_string(),
                    },
                    PoolSpec::String { value: "service: ".to_string() },
                ])
                .method(
                    MethodSpec::new("describe", "()Lcore/String;")
                        .instr("GET_FIELD", 2)
                        .instr("INVOKE_DYNAMIC", 4),
                )
                .exercised(vec![1, 2, 3, 4]),
        )
        .class(
            ClassSpec::new("app/Main$$Lambda/0x01", LoaderTier::Hidden)
                .super_class("core/Object")
                .hidden(HiddenKind::LambdaProxy, LoaderTier::App),
        )
        .build()
        .unwrap()
}

/// The same world as a fresh process sees it: only the boot tier is up.
fn replay_universe() -> MemoryRuntime {
    UniverseBuilder::new()
        .class(ClassSpec::new("core/Object", LoaderTier::BootCore))
        .class(ClassSpec::new("core/String", LoaderTier::BootCore).super_class("core/Object"))
        .class(ClassSpec::new("invoke/StringConcatFactory", LoaderTier::BootCore).super_class("core/Object"))
        .class(ClassSpec::new("plat/Api", LoaderTier::Platform).super_class("core/Object").not_loaded())
        .class(
            ClassSpec::new("app/Service", LoaderTier::App)
                .super_class("plat/Api")
                .not_loaded()
                .field("label", "Lcore/String;", false),
        )
        .class(
            ClassSpec::new("app/Main", LoaderTier::App)
                .super_class("app/Service")
                .not_loaded()
                .pool(vec![
                    PoolSpec::Class { name: "app/Service".to_string() },
                    PoolSpec::Field {
                        class_index: 1,
                        name: "label".to_string(),
                        descriptor: "Lcore/String;".to_string(),
                    },
                    PoolSpec::Class { name: "plat/Api".to_string() },
                    PoolSpec::CallSite {
                        bootstrap_class: "invoke/StringConcatFactory".to_string(),
                        bootstrap_method: "makeConcatWithConstants".to_string(),
                        bootstrap_descriptor: "(concat)".to_string(),
                        site_descriptor: "(Lcore/String;)Lcore/String;".to_string(),
                    },
                    PoolSpec::String { value: "service: ".to_string() },
                ])
                .method(
                    MethodSpec::new("describe", "()Lcore/String;")
                        .instr("GET_FIELD", 2)
                        .instr("INVOKE_DYNAMIC", 4),
                ),
        )
        .class(
            ClassSpec::new("app/Main$$Lambda/0x01", LoaderTier::Hidden)
                .super_class("core/Object")
                .hidden(HiddenKind::LambdaProxy, LoaderTier::App)
                .not_loaded(),
        )
        .build()
        .unwrap()
}

fn dump() -> Archive {
    let mut env = dump_universe();
    let masks = env.training_masks();
    let mut session = DumpSession::new(&mut env, policy(), DumpKind::Static, None);
    session.prelink_all(&masks);
    session.record_tables();
    session.build_archive()
}

#[test]
fn test_dump_produces_expected_tables() {
    let archive = dump();
    let app: Vec<_> = archive.static_tables.app.preloaded.iter().map(|r| r.name.as_str()).collect();
    // Ancestors strictly precede dependents within the tier list.
    let service = app.iter().position(|n| *n == "app/Service").unwrap();
    let main = app.iter().position(|n| *n == "app/Main").unwrap();
    assert!(service < main);
    // The hidden lambda proxy rides in the app table of its host tier.
    assert!(app.iter().any(|n| n.contains("Lambda")));
    // The cross-tier supertype edge produced an app-initiated record.
    assert!(archive.static_tables.app.initiated.iter().any(|r| r.name == "plat/Api"));
    assert!(archive.has_preload_data());
}

#[test]
fn test_archive_roundtrip_through_store() {
    let archive = dump();
    let mut store = MemoryStore::default();
    archive.save(&mut store).unwrap();
    let restored = Archive::load(&store).unwrap().unwrap();
    assert_eq!(restored, archive);
}

#[test]
fn test_replay_restores_world_and_publishes_flag() {
    let archive = dump();
    let mut env = replay_universe();
    let mut session = ReplaySession::new(&mut env, policy(), Some(archive), false);
    let flag = session.finished_flag();

    for tier in LoaderTier::REPLAY_ORDER {
        assert!(!flag.is_finished());
        session.replay_tier(tier).unwrap();
    }
    assert!(flag.is_finished());
    assert!(session.counters().classes_preloaded > 0);
    session.log_counters();

    assert!(env.find_loaded("plat/Api", LoaderTier::Platform).is_some());
    assert!(env.find_loaded("app/Service", LoaderTier::App).is_some());
    let main = env.find_loaded("app/Main", LoaderTier::App).unwrap();

    // Deferred resolution re-ran prelinking with everything eligible.
    assert_eq!(env.entry_tag(main, PoolIndex::new(1)), PoolTag::ResolvedClass);
    assert_eq!(env.entry_tag(main, PoolIndex::new(2)), PoolTag::ResolvedField);
    assert_eq!(env.entry_tag(main, PoolIndex::new(4)), PoolTag::ResolvedCallSite);

    // The hidden proxy came back through the light restore path.
    assert!(env.op_log().iter().any(|op| op.contains("restore-hidden")));
    // The app tier was registered as initiator for the platform class.
    assert!(env.op_log().iter().any(|op| op.contains("register-initiator app plat/Api")));
}

#[test]
fn test_partial_archive_app_tier_is_noop_but_finishes() {
    // Tables for boot and platform only.
    let mut archive = dump();
    archive.static_tables.app = Default::default();

    let mut env = replay_universe();
    let mut session = ReplaySession::new(&mut env, policy(), Some(archive), false);
    let flag = session.finished_flag();
    for tier in LoaderTier::REPLAY_ORDER {
        session.replay_tier(tier).unwrap();
    }
    assert!(flag.is_finished());
    assert!(env.find_loaded("plat/Api", LoaderTier::Platform).is_some());
    assert!(env.find_loaded("app/Main", LoaderTier::App).is_none());
}

#[test]
fn test_tier_direction_rule_end_to_end() {
    let mut env = dump_universe();
    let boot = env.find_loaded("core/String", LoaderTier::BootCore).unwrap();
    let app = env.find_loaded("app/Main", LoaderTier::App).unwrap();
    let mut session = DumpSession::new(&mut env, policy(), DumpKind::Static, None);

    // Boot-tier holder must never archive a reference to an app-only class.
    assert!(!session.can_archive_class_ref(boot, app));
    // The reverse direction is archivable (core/String is essential, hence
    // preloaded) and leaves an app-initiated record in the dumped tables.
    assert!(session.can_archive_class_ref(app, boot));
    session.record_tables();
    let archive = session.build_archive();
    assert!(archive.static_tables.app.initiated.iter().any(|r| r.name == "core/String"));
}

#[test]
fn test_training_mask_gates_dump_resolution() {
    let mut env = dump_universe();
    // Pretend the trial run exercised nothing in app/Main.
    let main = env.find_loaded("app/Main", LoaderTier::App).unwrap();
    let masks = std::collections::HashMap::from([(main, dotlink_core::TrainingMask::empty(env.pool_len(main)))]);
    let mut session = DumpSession::new(&mut env, policy(), DumpKind::Static, None);
    session.prelink_all(&masks);
    assert_eq!(env.entry_tag(main, PoolIndex::new(2)), PoolTag::UnresolvedField);
}

#[test]
fn test_forced_preinit_respects_runtime_approval() {
    let mut env = UniverseBuilder::new()
        .class(ClassSpec::new("core/Object", LoaderTier::BootCore))
        .class(
            ClassSpec::new("invoke/MethodHandleStatics", LoaderTier::BootCore)
                .super_class("core/Object")
                .preinit_approved(),
        )
        .class(ClassSpec::new("invoke/LambdaForm", LoaderTier::BootCore).super_class("core/Object"))
        .build()
        .unwrap();
    let statics = env.find_loaded("invoke/MethodHandleStatics", LoaderTier::BootCore).unwrap();
    let lambda_form = env.find_loaded("invoke/LambdaForm", LoaderTier::BootCore).unwrap();

    let mut session = DumpSession::new(&mut env, EnginePolicy::default(), DumpKind::Static, None);
    session.maybe_preinit_class(statics);
    // Listed by policy but not approved by the runtime: left alone.
    session.maybe_preinit_class(lambda_form);

    assert!(env.op_log().iter().any(|op| op.contains("initialize invoke/MethodHandleStatics")));
    assert!(!env.op_log().iter().any(|op| op.contains("initialize invoke/LambdaForm")));
}

#[test]
fn test_preimage_to_final_pipeline() {
    // Stage one: the trial dump defers an unconfirmable call site and
    // carries an unregistered class.
    let mut env = UniverseBuilder::new()
        .class(ClassSpec::new("core/Object", LoaderTier::BootCore))
        .class(ClassSpec::new("app/Task", LoaderTier::App).interface_flag().not_loaded())
        .class(
            ClassSpec::new("app/Main", LoaderTier::App)
                .super_class("core/Object")
                .pool(vec![PoolSpec::CallSite {
                    bootstrap_class: "invoke/LambdaMetafactory".to_string(),
                    bootstrap_method: "metafactory".to_string(),
                    bootstrap_descriptor:
                        "(Linvoke/Lookup;Lcore/String;Linvoke/MethodType;Linvoke/MethodType;Linvoke/MethodHandle;Linvoke/MethodType;)Linvoke/CallSite;"
                            .to_string(),
                    site_descriptor: "()Lapp/Task;".to_string(),
                }])
                .exercised(vec![1]),
        )
        .class(ClassSpec::new("custom/Plugin", LoaderTier::App).super_class("core/Object").unregistered())
        .build()
        .unwrap();
    // app/Task is defined but was never loaded during the trial run, so the
    // lambda site cannot be confirmed at preimage time.
    assert!(env.find_loaded("app/Task", LoaderTier::App).is_none());

    let masks = env.training_masks();
    let mut session = DumpSession::new(&mut env, policy(), DumpKind::Preimage, None);
    session.prelink_all(&masks);
    session.record_tables();
    let preimage = session.build_archive();
    assert_eq!(preimage.pending_call_sites.len(), 1);
    assert_eq!(preimage.unregistered.len(), 1);

    // Stage two: replaying the preimage as the final stage retries the
    // worklist and re-registers the carried classes.
    let mut env2 = UniverseBuilder::new()
        .class(ClassSpec::new("core/Object", LoaderTier::BootCore))
        .class(ClassSpec::new("invoke/LambdaMetafactory", LoaderTier::BootCore).super_class("core/Object"))
        .class(ClassSpec::new("app/Task", LoaderTier::App).interface_flag())
        .class(
            ClassSpec::new("app/Main", LoaderTier::App)
                .super_class("core/Object")
                .pool(vec![PoolSpec::CallSite {
                    bootstrap_class: "invoke/LambdaMetafactory".to_string(),
                    bootstrap_method: "metafactory".to_string(),
                    bootstrap_descriptor:
                        "(Linvoke/Lookup;Lcore/String;Linvoke/MethodType;Linvoke/MethodType;Linvoke/MethodHandle;Linvoke/MethodType;)Linvoke/CallSite;"
                            .to_string(),
                    site_descriptor: "()Lapp/Task;".to_string(),
                }]),
        )
        .class(ClassSpec::new("custom/Plugin", LoaderTier::App).super_class("core/Object").unregistered())
        .build()
        .unwrap();

    let mut replay = ReplaySession::new(&mut env2, policy(), Some(preimage), true);
    for tier in LoaderTier::REPLAY_ORDER {
        replay.replay_tier(tier).unwrap();
    }
    let main = env2.find_loaded("app/Main", LoaderTier::App).unwrap();
    assert_eq!(env2.entry_tag(main, PoolIndex::new(1)), PoolTag::ResolvedCallSite);
    assert!(env2.op_log().iter().any(|op| op.contains("register-unregistered custom/Plugin")));
}
