//! Subcommand implementations.

use std::path::PathBuf;

use anyhow::Context;

use stanza_core::{Compiler, CompilerConfig, NotificationHub, RunSummary};
use stanza_model::{OutdatednessReason, RepId, RuleSet};

use crate::cli::{CompileArgs, PruneArgs, SiteArgs};
use crate::progress::Progress;
use stanza_cli::site::{self, SiteLayout};

fn compiler_for(site: &SiteArgs) -> Compiler {
    let layout = SiteLayout::new(&site.site_dir, site.output_dir.clone());
    Compiler::new(CompilerConfig::new(
        layout.output_root.clone(),
        layout.store_path(),
    ))
}

pub fn run_compile(args: &CompileArgs) -> anyhow::Result<RunSummary> {
    let layout = SiteLayout::new(&args.site.site_dir, args.site.output_dir.clone());
    let items = site::load_items(&layout.content_dir())
        .with_context(|| format!("loading site at {}", layout.root.display()))?;
    let rules = RuleSet::from_path(&layout.rules_path())
        .with_context(|| format!("loading rules at {}", layout.rules_path().display()))?;

    let mut config = CompilerConfig::new(layout.output_root.clone(), layout.store_path());
    config.force = args.force;
    config.prune = !args.no_prune;
    config.prune_exclusions = args.keep.clone();

    let hub = NotificationHub::new();
    let progress = (!args.no_progress).then(|| Progress::attach(&hub));
    let summary = Compiler::new(config).compile(&items, &rules, &hub)?;
    if let Some(progress) = progress {
        progress.finish();
    }
    Ok(summary)
}

pub fn run_prune(args: &PruneArgs) -> anyhow::Result<Vec<PathBuf>> {
    let layout = SiteLayout::new(&args.site.site_dir, args.site.output_dir.clone());
    let mut config = CompilerConfig::new(layout.output_root.clone(), layout.store_path());
    config.prune_exclusions = args.keep.clone();

    let pruned = Compiler::new(config).prune_outputs(&NotificationHub::new(), args.dry_run)?;
    Ok(pruned)
}

pub fn run_status(
    args: &SiteArgs,
) -> anyhow::Result<Vec<(RepId, Option<OutdatednessReason>)>> {
    let layout = SiteLayout::new(&args.site_dir, args.output_dir.clone());
    let items = site::load_items(&layout.content_dir())
        .with_context(|| format!("loading site at {}", layout.root.display()))?;
    let rules = RuleSet::from_path(&layout.rules_path())
        .with_context(|| format!("loading rules at {}", layout.rules_path().display()))?;

    let report = compiler_for(args).outdatedness(&items, &rules)?;
    Ok(report)
}
