use crate::output::{print_json, print_table};
use anyhow::Context;
use clap::{Args, ValueEnum};
use specflow_core::{
    config::Config,
    git::GitCli,
    reconcile::{self, ApplyOutcome, Mode, Report, Scope},
};
use std::path::Path;

/// Exit code when trust-state finds differences and leaves them in place.
const EXIT_DIFFERENCES: i32 = 2;

#[derive(Clone, Copy, ValueEnum)]
pub enum ModeArg {
    /// Rewrite the snapshot cache from artifacts on disk
    TrustFiles,
    /// Report differences only
    TrustState,
}

#[derive(Clone, Copy, ValueEnum)]
pub enum ScopeArg {
    All,
    Counts,
    Step,
    Branch,
}

#[derive(Args)]
pub struct ReconcileArgs {
    #[arg(long, value_enum, default_value = "trust-state")]
    mode: ModeArg,
    /// Limit which cached values trust-files may overwrite
    #[arg(long, value_enum, default_value = "all")]
    scope: ScopeArg,
}

pub fn run(root: &Path, args: ReconcileArgs, json: bool) -> anyhow::Result<()> {
    let mode = match args.mode {
        ModeArg::TrustFiles => Mode::TrustFiles,
        ModeArg::TrustState => Mode::TrustState,
    };
    let scope = match args.scope {
        ScopeArg::All => Scope::All,
        ScopeArg::Counts => Scope::Counts,
        ScopeArg::Step => Scope::Step,
        ScopeArg::Branch => Scope::Branch,
    };

    let config = Config::load(root).context("failed to load config")?;
    let git = GitCli::new(root, config.git.remote.clone());
    let out = reconcile::apply(root, &git, mode, scope)?;

    if json {
        print_json(&out)?;
    } else {
        print_outcome(&out);
    }

    if mode == Mode::TrustState && out.unresolved() {
        std::process::exit(EXIT_DIFFERENCES);
    }
    Ok(())
}

pub fn print_mismatches(report: &Report) {
    if report.mismatches.is_empty() {
        println!("Cache agrees with the filesystem.");
        return;
    }
    let rows: Vec<Vec<String>> = report
        .mismatches
        .iter()
        .map(|m| vec![m.kind.as_str().to_string(), m.cached.clone(), m.actual.clone()])
        .collect();
    print_table(&["MISMATCH", "CACHED", "ACTUAL"], rows);
}

fn print_outcome(out: &ApplyOutcome) {
    print_mismatches(&out.report);
    if out.report.cache_stale {
        println!("\nThe snapshot cache is behind the filesystem; derived values win.");
    }
    if !out.fixed.is_empty() {
        let kinds: Vec<&str> = out.fixed.iter().map(|k| k.as_str()).collect();
        println!("\nFixed: {}", kinds.join(", "));
    }
    if let Some(path) = &out.written {
        println!("  wrote: {}", path.display());
    }
    for s in &out.skipped {
        println!("  {}: {}", s.kind.as_str(), s.reason);
    }
}
