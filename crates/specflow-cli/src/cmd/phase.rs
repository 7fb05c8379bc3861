use crate::cmd::parse_number;
use crate::output::{print_json, print_table};
use anyhow::Context;
use clap::Subcommand;
use specflow_core::{
    registry::{self, Registry, RestoreTarget},
    renumber,
    types::{DetailRef, PhaseNumber, PhaseRecord, PhaseStatus},
};
use std::path::Path;

#[derive(Subcommand)]
pub enum PhaseSubcommand {
    /// List active phases in roadmap order
    List,
    /// Show one phase with its detail block
    Show { number: String },
    /// Insert a phase after an existing one, using the next free number in its decade
    Insert {
        /// Phase the new one follows
        #[arg(long)]
        after: String,
        /// Phase name
        name: String,
        /// Gate the phase must pass
        #[arg(long, default_value = "")]
        gate: String,
    },
    /// Move a phase and its detail into the backlog
    Defer {
        number: String,
        #[arg(long, default_value = "")]
        reason: String,
        /// Defer even if the phase is in progress
        #[arg(long)]
        force: bool,
    },
    /// Bring a deferred phase back into the roadmap
    Restore {
        /// Original number of the deferred phase
        number: String,
        /// Allocate the next free number after this phase
        #[arg(long, conflicts_with = "as_number")]
        after: Option<String>,
        /// Restore under exactly this number
        #[arg(long = "as", value_name = "NUMBER")]
        as_number: Option<String>,
    },
    /// Renumber every active phase onto an even grid
    Renumber {
        #[arg(long, default_value = "0010")]
        start: String,
        #[arg(long, default_value_t = 10)]
        step: u16,
        /// Report the mapping and affected files without writing
        #[arg(long)]
        dry_run: bool,
    },
    /// Set a phase's status (not_started, in_progress, awaiting_user, complete)
    Status { number: String, status: String },
    /// Move a complete phase's detail into the archive
    Archive { number: String },
}

pub fn run(root: &Path, subcmd: PhaseSubcommand, json: bool) -> anyhow::Result<()> {
    match subcmd {
        PhaseSubcommand::List => list(root, json),
        PhaseSubcommand::Show { number } => show(root, parse_number(&number)?, json),
        PhaseSubcommand::Insert { after, name, gate } => {
            insert(root, parse_number(&after)?, &name, &gate, json)
        }
        PhaseSubcommand::Defer {
            number,
            reason,
            force,
        } => defer(root, parse_number(&number)?, &reason, force, json),
        PhaseSubcommand::Restore {
            number,
            after,
            as_number,
        } => {
            let target = match (after, as_number) {
                (_, Some(n)) => RestoreTarget::As(parse_number(&n)?),
                (Some(n), None) => RestoreTarget::After(parse_number(&n)?),
                (None, None) => RestoreTarget::Original,
            };
            restore(root, parse_number(&number)?, target, json)
        }
        PhaseSubcommand::Renumber {
            start,
            step,
            dry_run,
        } => renumber(root, parse_number(&start)?, step, dry_run, json),
        PhaseSubcommand::Status { number, status } => {
            let status: PhaseStatus = status.parse()?;
            set_status(root, parse_number(&number)?, status, json)
        }
        PhaseSubcommand::Archive { number } => archive(root, parse_number(&number)?, json),
    }
}

fn detail_label(record: &PhaseRecord, root: &Path) -> String {
    match &record.detail {
        DetailRef::Inline => "inline".to_string(),
        DetailRef::File { path } => path
            .strip_prefix(root)
            .unwrap_or(path)
            .display()
            .to_string(),
        DetailRef::None => "-".to_string(),
    }
}

/// Row and load warnings go to stderr so `--json` output stays parseable.
fn report_warnings(reg: &Registry) {
    for w in reg.parse_warnings() {
        eprintln!("warning: line {}: {} ({})", w.line, w.reason, w.content);
    }
    for notice in &reg.notices {
        eprintln!("warning: {notice}");
    }
}

fn list(root: &Path, json: bool) -> anyhow::Result<()> {
    let reg = Registry::load(root).context("failed to load roadmap")?;
    let records = reg.records()?;

    if json {
        print_json(&serde_json::json!({
            "phases": records,
            "warnings": reg.parse_warnings(),
            "notices": reg.notices,
        }))?;
        return Ok(());
    }

    report_warnings(&reg);
    if records.is_empty() {
        println!("No phases.");
        return Ok(());
    }
    let rows: Vec<Vec<String>> = records
        .iter()
        .map(|r| {
            vec![
                r.number.to_string(),
                r.name.clone(),
                format!("{} {}", r.status.glyph(), r.status.label()),
                r.gate.clone(),
                detail_label(r, root),
            ]
        })
        .collect();
    print_table(&["PHASE", "NAME", "STATUS", "GATE", "DETAIL"], rows);
    Ok(())
}

fn show(root: &Path, number: PhaseNumber, json: bool) -> anyhow::Result<()> {
    let reg = Registry::load(root).context("failed to load roadmap")?;
    let record = reg.record(number)?;
    let detail = reg.detail_text(number)?;

    if json {
        print_json(&serde_json::json!({
            "phase": record,
            "detail_text": detail,
        }))?;
        return Ok(());
    }

    println!("Phase:   {}", record.number);
    println!("Name:    {}", record.name);
    println!("Status:  {} {}", record.status.glyph(), record.status.label());
    if !record.gate.is_empty() {
        println!("Gate:    {}", record.gate);
    }
    println!("Detail:  {}", detail_label(&record, root));
    if let Some(text) = detail {
        println!("\n{}", text.trim_end());
    }
    Ok(())
}

fn insert(root: &Path, after: PhaseNumber, name: &str, gate: &str, json: bool) -> anyhow::Result<()> {
    let out = registry::insert(root, after, name, gate)
        .with_context(|| format!("failed to insert phase after {after}"))?;
    if json {
        print_json(&out)?;
    } else {
        println!("Inserted phase {} '{name}' after {after}.", out.number);
        if out.rolled_over {
            println!("  note: decade of {after} is full; rolled over to {}", out.number);
        }
    }
    Ok(())
}

fn defer(root: &Path, number: PhaseNumber, reason: &str, force: bool, json: bool) -> anyhow::Result<()> {
    let out = registry::defer(root, number, reason, force)?;
    if json {
        print_json(&out)?;
    } else {
        println!("Deferred phase {number} to the backlog ({}).", out.deferred_date);
        if let Some(path) = &out.moved_file {
            println!("  moved: {}", path.display());
        }
    }
    Ok(())
}

fn restore(root: &Path, number: PhaseNumber, target: RestoreTarget, json: bool) -> anyhow::Result<()> {
    let out = registry::restore(root, number, target)?;
    if json {
        print_json(&out)?;
    } else if out.number == out.original {
        println!("Restored phase {}.", out.number);
    } else {
        println!("Restored phase {} as {}.", out.original, out.number);
        if out.rolled_over {
            println!("  note: decade was full; rolled over to {}", out.number);
        }
    }
    Ok(())
}

fn renumber(root: &Path, start: PhaseNumber, step: u16, dry_run: bool, json: bool) -> anyhow::Result<()> {
    let out = renumber::renumber(root, start, step, dry_run)?;
    if json {
        print_json(&out)?;
        return Ok(());
    }

    let changed: Vec<_> = out.mapping.iter().filter(|m| m.from != m.to).collect();
    if changed.is_empty() {
        println!("Nothing to renumber.");
        return Ok(());
    }
    let rows: Vec<Vec<String>> = changed
        .iter()
        .map(|m| vec![m.from.to_string(), m.to.to_string()])
        .collect();
    print_table(&["FROM", "TO"], rows);
    println!();
    let verb = if out.dry_run { "would change" } else { "changed" };
    println!("{} file(s) {verb}:", out.files.len());
    for f in &out.files {
        println!("  {}", f.strip_prefix(root).unwrap_or(f).display());
    }
    if let Some(backup) = &out.backup {
        println!("Backup: {}", backup.display());
    }
    Ok(())
}

fn set_status(root: &Path, number: PhaseNumber, status: PhaseStatus, json: bool) -> anyhow::Result<()> {
    let out = registry::update_status(root, number, status)?;
    if json {
        print_json(&out)?;
    } else if out.changed {
        println!(
            "Phase {number}: {} → {}",
            out.previous.label(),
            out.status.label()
        );
    } else {
        println!("Phase {number} is already {}.", out.status.label());
    }
    Ok(())
}

fn archive(root: &Path, number: PhaseNumber, json: bool) -> anyhow::Result<()> {
    let out = registry::archive(root, number)?;
    if json {
        print_json(&out)?;
    } else if out.already_archived {
        println!("Phase {number} is already archived.");
    } else {
        match &out.path {
            Some(path) => println!("Archived phase {number} to {}.", path.display()),
            None => println!("Phase {number} has no detail to archive."),
        }
    }
    Ok(())
}
