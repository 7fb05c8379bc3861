use crate::output::{print_json, print_table};
use anyhow::Context;
use clap::Subcommand;
use specflow_core::{
    registry::{self, Registry},
    types::BacklogEntry,
};
use std::path::Path;

#[derive(Subcommand)]
pub enum BacklogSubcommand {
    /// List deferred phases and notes
    List,
    /// Append a note to the backlog
    Add {
        text: String,
        #[arg(long, default_value = "medium")]
        priority: String,
        #[arg(long, default_value = "")]
        notes: String,
    },
    /// Remove notes, and deferred phases unless --notes-only
    Clear {
        #[arg(long)]
        notes_only: bool,
    },
}

pub fn run(root: &Path, subcmd: BacklogSubcommand, json: bool) -> anyhow::Result<()> {
    match subcmd {
        BacklogSubcommand::List => list(root, json),
        BacklogSubcommand::Add {
            text,
            priority,
            notes,
        } => add(root, &text, &priority, &notes, json),
        BacklogSubcommand::Clear { notes_only } => clear(root, notes_only, json),
    }
}

fn list(root: &Path, json: bool) -> anyhow::Result<()> {
    let reg = Registry::load(root).context("failed to load roadmap")?;
    let entries = reg.backlog();

    if json {
        print_json(&entries)?;
        return Ok(());
    }
    if entries.is_empty() {
        println!("Backlog is empty.");
        return Ok(());
    }

    let rows: Vec<Vec<String>> = entries
        .iter()
        .map(|e| match e {
            BacklogEntry::DeferredPhase {
                original_number,
                name,
                deferred_date,
                reason,
                ..
            } => vec![
                original_number.to_string(),
                name.clone(),
                deferred_date.to_string(),
                reason.clone(),
            ],
            BacklogEntry::Note {
                text,
                priority,
                added_date,
                ..
            } => vec![
                "note".to_string(),
                text.clone(),
                added_date.to_string(),
                priority.clone(),
            ],
        })
        .collect();
    print_table(&["PHASE", "NAME", "DATE", "REASON/PRIORITY"], rows);
    Ok(())
}

fn add(root: &Path, text: &str, priority: &str, notes: &str, json: bool) -> anyhow::Result<()> {
    let entry = registry::add_note(root, text, priority, notes)?;
    if json {
        print_json(&entry)?;
    } else {
        println!("Added backlog note.");
    }
    Ok(())
}

fn clear(root: &Path, notes_only: bool, json: bool) -> anyhow::Result<()> {
    let out = registry::clear_backlog(root, notes_only)?;
    if json {
        print_json(&out)?;
    } else {
        println!(
            "Removed {} note(s) and {} deferred phase(s).",
            out.notes_removed,
            out.phases_removed.len()
        );
    }
    Ok(())
}
