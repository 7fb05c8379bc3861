//! Renumbering the active table onto an even grid.
//!
//! [`plan`] computes every change without touching disk; a dry run reports the
//! plan and a real run commits the very same transaction.

use crate::derive;
use crate::error::{Result, SpecflowError};
use crate::io::{Transaction, Validation};
use crate::lock::with_registry_lock;
use crate::paths;
use crate::registry::Registry;
use crate::roadmap::{BacklogBlock, Block};
use crate::section::CompanionFile;
use crate::state::Snapshot;
use crate::table::Row;
use crate::types::{match_key, PhaseNumber};
use regex::{Captures, Regex};
use serde::Serialize;
use std::borrow::Cow;
use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

static REF_RE: OnceLock<Regex> = OnceLock::new();

fn ref_re() -> &'static Regex {
    REF_RE.get_or_init(|| Regex::new(r"\b\d{4}\b").unwrap())
}

/// Replace every four-digit token found in `mapping`. All replacements
/// happen in one pass, so chains like 0020→0030, 0030→0040 never cascade.
pub fn rewrite_refs<'a>(text: &'a str, mapping: &HashMap<PhaseNumber, PhaseNumber>) -> Cow<'a, str> {
    if mapping.is_empty() {
        return Cow::Borrowed(text);
    }
    ref_re().replace_all(text, |caps: &Captures| {
        caps[0]
            .parse::<PhaseNumber>()
            .ok()
            .and_then(|n| mapping.get(&n))
            .map(|n| n.to_string())
            .unwrap_or_else(|| caps[0].to_string())
    })
}

// ---------------------------------------------------------------------------
// Plan
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Mapping {
    pub from: PhaseNumber,
    pub to: PhaseNumber,
}

#[derive(Debug)]
pub struct RenumberPlan {
    /// One entry per active row in table order; identity entries included.
    pub mapping: Vec<Mapping>,
    tx: Transaction,
}

impl RenumberPlan {
    pub fn changes(&self) -> HashMap<PhaseNumber, PhaseNumber> {
        self.mapping
            .iter()
            .filter(|m| m.from != m.to)
            .map(|m| (m.from, m.to))
            .collect()
    }

    /// Every path the plan would write, move, or remove, sorted.
    pub fn files(&self) -> Vec<PathBuf> {
        let set: BTreeSet<PathBuf> = self.tx.touched().into_iter().collect();
        set.into_iter().collect()
    }
}

/// `name` with its leading number token swapped for `new`.
fn renamed(name: &str, new: PhaseNumber) -> String {
    let token_len = name.find(['-', '.']).unwrap_or(name.len());
    format!("{new}{}", &name[token_len..])
}

fn number_of(name: &str) -> Option<PhaseNumber> {
    let token = name.split(['-', '.']).next()?;
    match_key(token).ok().map(|m| m.number())
}

fn sorted_entries(dir: &Path, dirs: bool) -> Result<Vec<PathBuf>> {
    let mut out = Vec::new();
    if !dir.is_dir() {
        return Ok(out);
    }
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        if entry.file_type()?.is_dir() == dirs {
            out.push(entry.path());
        }
    }
    out.sort();
    Ok(out)
}

fn markdown_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut out = Vec::new();
    for sub in sorted_entries(dir, true)? {
        out.extend(markdown_files(&sub)?);
    }
    out.extend(
        sorted_entries(dir, false)?
            .into_iter()
            .filter(|p| p.extension().map(|e| e == "md").unwrap_or(false)),
    );
    Ok(out)
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

pub fn plan(mut reg: Registry, start: PhaseNumber, step: u16) -> Result<RenumberPlan> {
    if step == 0 {
        return Err(SpecflowError::InvalidPhaseNumber("step 0".to_string()));
    }
    let root = reg.root.clone();
    let old = reg.roadmap.table().map(|t| t.numbers()).unwrap_or_default();

    let mut mapping = Vec::with_capacity(old.len());
    for (i, from) in old.iter().enumerate() {
        let value = u32::from(start.value()) + i as u32 * u32::from(step);
        let to = PhaseNumber::new(value).map_err(|_| SpecflowError::DecadeExhausted {
            after: start.to_string(),
            reason: format!(
                "renumbering {} phases by {step} would pass 9999",
                old.len()
            ),
        })?;
        mapping.push(Mapping { from: *from, to });
    }
    let changes: HashMap<PhaseNumber, PhaseNumber> = mapping
        .iter()
        .filter(|m| m.from != m.to)
        .map(|m| (m.from, m.to))
        .collect();

    let deferred: Vec<PhaseNumber> = reg
        .roadmap
        .backlog()
        .and_then(|b| b.deferred())
        .map(|t| t.records().map(|r| r.number).collect())
        .unwrap_or_default();
    if let Some(m) = mapping.iter().find(|m| deferred.contains(&m.to)) {
        return Err(SpecflowError::NumberInUse(m.to.to_string()));
    }

    let mut tx = Transaction::new(&root).with_backup(true);
    if changes.is_empty() {
        return Ok(RenumberPlan { mapping, tx });
    }

    // roadmap: rows by position, then section headers and bodies
    let rows = reg.roadmap.well_formed_rows();
    for block in &mut reg.roadmap.blocks {
        match block {
            Block::Table(table) => {
                for row in &mut table.rows {
                    if let Row::Record(t) = row {
                        if let Some(new) = changes.get(&t.get().number) {
                            t.get_mut().number = *new;
                        }
                    }
                }
            }
            Block::Section(s) => {
                if let Some(new) = changes.get(&s.number()) {
                    s.set_number(*new);
                }
                rewrite_body(&mut s.body, &changes);
            }
            Block::Backlog(backlog) => {
                for b in &mut backlog.blocks {
                    if let BacklogBlock::Section(s) = b {
                        rewrite_body(&mut s.body, &changes);
                    }
                }
            }
            Block::Text(_) => {}
        }
    }
    reg.stage_roadmap(&mut tx, rows);

    // companion and archived files: name, front matter, references
    let mut removals = Vec::new();
    for dir in [paths::phases_dir(&root), paths::archive_dir(&root)] {
        for path in sorted_entries(&dir, false)? {
            let name = file_name(&path);
            if !name.ends_with(".md") {
                continue;
            }
            let content = std::fs::read_to_string(&path)?;
            let new_number = number_of(&name).and_then(|n| changes.get(&n).copied());
            let rewritten = match CompanionFile::parse(&path, &content) {
                Ok(mut file) => {
                    if let Some(new) = changes.get(&file.meta.phase) {
                        file.meta.phase = *new;
                    }
                    file.body = rewrite_refs(&file.body, &changes).into_owned();
                    file.render()?
                }
                Err(_) => rewrite_refs(&content, &changes).into_owned(),
            };
            match new_number {
                Some(new) => {
                    tx.write(dir.join(renamed(&name, new)), rewritten, Validation::None);
                    removals.push(path);
                }
                None if rewritten != content => tx.write(&path, rewritten, Validation::None),
                None => {}
            }
        }
    }

    // artifact directories: references in place, then two-phase renames
    let specs = reg.config.specs_path(&root);
    let mut renames = Vec::new();
    for dir in sorted_entries(&specs, true)? {
        for file in markdown_files(&dir)? {
            let content = std::fs::read_to_string(&file)?;
            if let Cow::Owned(rewritten) = rewrite_refs(&content, &changes) {
                if rewritten != content {
                    tx.write(&file, rewritten, Validation::None);
                }
            }
        }
        let name = file_name(&dir);
        let Some(n) = number_of(&name) else { continue };
        let Some(new) = changes.get(&n) else { continue };
        // only the directory the phase actually resolves to moves
        if derive::find_artifact_dir(&specs, n)?.as_ref() != Some(&dir) {
            continue;
        }
        renames.push((dir.clone(), specs.join(renamed(&name, *new))));
    }
    let moving: Vec<&PathBuf> = renames.iter().map(|(from, _)| from).collect();
    for (_, to) in &renames {
        if to.exists() && !moving.contains(&to) {
            return Err(SpecflowError::NumberInUse(file_name(to)));
        }
    }
    for (from, _) in &renames {
        tx.rename(from, specs.join(format!(".renumber-{}", file_name(from))));
    }
    for (from, to) in &renames {
        tx.rename(specs.join(format!(".renumber-{}", file_name(from))), to);
    }

    // an old name may already be the new name of another file
    for path in removals {
        if tx.staged(&path).is_none() {
            tx.remove(path);
        }
    }

    // snapshot cache
    let state_path = reg.config.state_path(&root);
    if let Some(mut snapshot) = Snapshot::load(&state_path)? {
        if snapshot.apply_renumber(&changes) {
            snapshot.stage(&mut tx, &state_path)?;
        }
    }

    Ok(RenumberPlan { mapping, tx })
}

fn rewrite_body(body: &mut [String], changes: &HashMap<PhaseNumber, PhaseNumber>) {
    for line in body.iter_mut() {
        if let Cow::Owned(new) = rewrite_refs(line, changes) {
            *line = new;
        }
    }
}

// ---------------------------------------------------------------------------
// Operation
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct RenumberOutcome {
    pub mapping: Vec<Mapping>,
    pub files: Vec<PathBuf>,
    pub dry_run: bool,
    pub backup: Option<PathBuf>,
}

pub fn renumber(root: &Path, start: PhaseNumber, step: u16, dry_run: bool) -> Result<RenumberOutcome> {
    with_registry_lock(root, || {
        let reg = Registry::load(root)?;
        let plan = plan(reg, start, step)?;
        let files = plan.files();
        let mapping = plan.mapping.clone();
        if dry_run || plan.changes().is_empty() {
            return Ok(RenumberOutcome {
                mapping,
                files,
                dry_run,
                backup: None,
            });
        }
        let commit = plan.tx.commit()?;
        tracing::info!(phases = mapping.len(), "renumbered roadmap");
        Ok(RenumberOutcome {
            mapping,
            files,
            dry_run,
            backup: commit.backup,
        })
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
