use crate::KindArg;
use anyhow::{Context, Result};
use dotlink_common::LoaderTier;
use dotlink_core::archive::{Archive, DumpKind, FileStore, TierTables};
use dotlink_core::engine::{DumpSession, ReplaySession};
use dotlink_core::policy::EnginePolicy;
use dotlink_core::runtime::memory::{MemoryRuntime, UniverseSnapshot};
use std::fs;
use std::path::Path;

fn kind_of(arg: KindArg) -> DumpKind {
    match arg {
        KindArg::Static => DumpKind::Static,
        KindArg::Dynamic => DumpKind::Dynamic,
        KindArg::Preimage => DumpKind::Preimage,
        KindArg::Final => DumpKind::Final,
    }
}

fn load_universe(path: &Path) -> Result<MemoryRuntime> {
    let text = fs::read_to_string(path).with_context(|| format!("reading universe snapshot {}", path.display()))?;
    let snapshot = UniverseSnapshot::from_json(&text)?;
    Ok(MemoryRuntime::from_snapshot(&snapshot)?)
}

fn load_base_tables(path: Option<&Path>) -> Result<Option<TierTables>> {
    let Some(path) = path else {
        return Ok(None);
    };
    let archive = Archive::load(&FileStore::new(path))?.with_context(|| format!("base archive {} not found", path.display()))?;
    Ok(Some(archive.static_tables))
}

pub fn run_dump(universe: &Path, out: &Path, kind: KindArg, base: Option<&Path>, policy: EnginePolicy) -> Result<()> {
    let mut env = load_universe(universe)?;
    let masks = env.training_masks();
    let prior = load_base_tables(base)?;

    let mut session = DumpSession::new(&mut env, policy, kind_of(kind), prior);
    session.preinit_forced_classes();
    session.prelink_all(&masks);
    session.record_tables();
    let archive = session.build_archive();

    let tables = archive.tables(kind_of(kind));
    println!(
        "dumped {} classes (boot {}, boot2 {}, platform {}, app {}), {} pending call sites, {} carried classes",
        tables.total_preloaded(),
        tables.boot_core.preloaded.len(),
        tables.boot_other.preloaded.len(),
        tables.platform.preloaded.len(),
        tables.app.preloaded.len(),
        archive.pending_call_sites.len(),
        archive.unregistered.len(),
    );

    let mut store = FileStore::new(out);
    archive.save(&mut store)?;
    println!("archive written to {}", out.display());
    Ok(())
}

pub fn run_replay(universe: &Path, archive_path: &Path, final_stage: bool, policy: EnginePolicy) -> Result<()> {
    let mut env = load_universe(universe)?;
    let archive = Archive::load(&FileStore::new(archive_path))?;
    if archive.is_none() {
        println!("no archive at {}; classes will load from scratch", archive_path.display());
    }

    let mut session = ReplaySession::new(&mut env, policy, archive, final_stage);
    for tier in LoaderTier::REPLAY_ORDER {
        session.replay_tier(tier).with_context(|| format!("replaying {tier} tier"))?;
    }
    session.init_boot_core_classes();
    session.replay_boot_training();
    session.log_counters();

    let counters = session.counters();
    println!(
        "replayed {} classes in {} ms; preloading finished: {}",
        counters.classes_preloaded,
        counters.preload_time.as_millis(),
        session.preloading_finished(),
    );
    Ok(())
}

pub fn run_inspect(path: &Path, json: bool) -> Result<()> {
    let archive = Archive::load(&FileStore::new(path))?.with_context(|| format!("no archive at {}", path.display()))?;

    if json {
        println!("{}", serde_json::to_string_pretty(&archive)?);
        return Ok(());
    }

    for (label, tables) in [("static", &archive.static_tables), ("dynamic", &archive.dynamic_tables)] {
        println!("{label} tables:");
        for tier in LoaderTier::REPLAY_ORDER {
            let table = tables.table(tier);
            println!("  {:<6} {:>5} preloaded, {:>5} initiated", tier.label(), table.preloaded.len(), table.initiated.len());
        }
    }
    println!("pending call sites: {}", archive.pending_call_sites.len());
    println!("carried unregistered classes: {}", archive.unregistered.len());
    println!("carries preload data: {}", archive.has_preload_data());
    Ok(())
}
