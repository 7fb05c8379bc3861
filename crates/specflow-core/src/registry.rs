//! The phase registry: the roadmap plus its companion files, and every
//! mutation applied to them.
//!
//! Each mutating operation takes the registry lock, reloads the roadmap from
//! disk, stages every changed file in one [`Transaction`], and commits only
//! after the staged roadmap re-validates.

use crate::allocator::{self, Allocation};
use crate::config::{Config, DetailStorage};
use crate::derive;
use crate::error::{Result, SpecflowError};
use crate::io::{Transaction, Validation};
use crate::lock::with_registry_lock;
use crate::paths;
use crate::roadmap::{BacklogBlock, Block, Roadmap, Section};
use crate::section::{self, CompanionFile, CompanionMeta};
use crate::table::{DeferredRow, NoteRow, ParseWarning, PhaseRow, Row, RowCodec, Tracked};
use crate::types::{match_key, BacklogEntry, DetailRef, PhaseNumber, PhaseRecord, PhaseStatus};
use chrono::NaiveDate;
use regex::Regex;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct Registry {
    pub root: PathBuf,
    pub config: Config,
    pub path: PathBuf,
    pub roadmap: Roadmap,
    /// Load-time problems that are not row parse errors.
    pub notices: Vec<String>,
}

impl Registry {
    pub fn load(root: &Path) -> Result<Self> {
        let config = Config::load(root)?;
        let path = config.roadmap_path(root);
        if !path.exists() {
            return Err(SpecflowError::RoadmapNotFound(path));
        }
        let text = std::fs::read_to_string(&path)?;
        let roadmap = Roadmap::parse(&text);

        let mut notices = Vec::new();
        let phases_dir = paths::phases_dir(root);
        for section in roadmap.sections() {
            if let Some(file) = section::find_file(&phases_dir, section.number())? {
                notices.push(format!(
                    "phase {} has both an inline section and {}; using the inline section",
                    section.number(),
                    file.display()
                ));
            }
        }
        for w in &roadmap.warnings {
            tracing::warn!(line = w.line, reason = %w.reason, "skipping roadmap row");
        }

        Ok(Self {
            root: root.to_path_buf(),
            config,
            path,
            roadmap,
            notices,
        })
    }

    pub fn parse_warnings(&self) -> &[ParseWarning] {
        &self.roadmap.warnings
    }

    /// Active records in table order with their detail resolved.
    pub fn records(&self) -> Result<Vec<PhaseRecord>> {
        let mut records = self.roadmap.records();
        for record in &mut records {
            if record.detail == DetailRef::None {
                if let Some(path) = self.detail_file(record.number)? {
                    record.detail = DetailRef::File { path };
                }
            }
        }
        Ok(records)
    }

    pub fn record(&self, number: PhaseNumber) -> Result<PhaseRecord> {
        self.records()?
            .into_iter()
            .find(|r| r.number == number)
            .ok_or_else(|| SpecflowError::PhaseNotFound(number.to_string()))
    }

    /// Companion file for an active phase: `.specflow/phases/`, then the archive.
    fn detail_file(&self, number: PhaseNumber) -> Result<Option<PathBuf>> {
        if let Some(path) = section::find_file(&paths::phases_dir(&self.root), number)? {
            return Ok(Some(path));
        }
        section::find_file(&paths::archive_dir(&self.root), number)
    }

    /// The detail text for a phase, wherever it lives.
    pub fn detail_text(&self, number: PhaseNumber) -> Result<Option<String>> {
        if let Some(section) = self.roadmap.section(number) {
            return Ok(Some(section.lines().join("\n")));
        }
        match self.detail_file(number)? {
            Some(path) => Ok(Some(std::fs::read_to_string(path)?)),
            None => Ok(None),
        }
    }

    pub fn backlog(&self) -> Vec<BacklogEntry> {
        self.roadmap.backlog_entries()
    }

    fn require_row(&self, number: PhaseNumber) -> Result<PhaseRow> {
        self.roadmap
            .row(number)
            .cloned()
            .ok_or_else(|| SpecflowError::PhaseNotFound(number.to_string()))
    }

    /// Restore ordering, render, and stage the roadmap with its row-count
    /// expectation.
    pub(crate) fn stage_roadmap(&mut self, tx: &mut Transaction, expected_rows: usize) {
        self.roadmap.normalize_order();
        tx.write(
            &self.path,
            self.roadmap.render(),
            Validation::Roadmap { expected_rows },
        );
    }
}

fn today() -> NaiveDate {
    chrono::Local::now().date_naive()
}

fn detail_body(gate: &str) -> Vec<String> {
    let mut body = vec![String::new()];
    if !gate.trim().is_empty() {
        body.push(format!("**Gate**: {gate}"));
        body.push(String::new());
    }
    body
}

fn require_name(path: &Path, name: &str) -> Result<()> {
    if name.trim().is_empty() {
        return Err(SpecflowError::ValidationFailed {
            path: path.to_path_buf(),
            reason: "phase name is empty".to_string(),
        });
    }
    Ok(())
}

/// Companion file content with its front matter set to the given values.
fn restamp(path: &Path, number: PhaseNumber, name: &str, status: PhaseStatus) -> Result<String> {
    let mut file = CompanionFile::load(path)?;
    file.meta = CompanionMeta {
        phase: number,
        name: name.to_string(),
        status,
    };
    file.render()
}

// ---------------------------------------------------------------------------
// Insert
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct InsertOutcome {
    pub number: PhaseNumber,
    pub rolled_over: bool,
    pub detail: DetailRef,
}

pub fn insert(root: &Path, after: PhaseNumber, name: &str, gate: &str) -> Result<InsertOutcome> {
    with_registry_lock(root, || {
        let mut reg = Registry::load(root)?;
        require_name(&reg.path, name)?;
        if reg.roadmap.row(after).is_none() {
            return Err(SpecflowError::AnchorNotFound(after.to_string()));
        }

        let used = reg.roadmap.used_numbers();
        let Allocation {
            number,
            rolled_over,
        } = allocator::allocate(after, &used, reg.config.roadmap.allow_decade_rollover)?;

        let before = reg.roadmap.well_formed_rows();
        reg.roadmap.table_mut().insert_sorted(PhaseRow {
            number,
            name: name.to_string(),
            status: PhaseStatus::NotStarted,
            gate: gate.to_string(),
        });

        let mut tx = Transaction::new(root);
        let detail = match reg.config.roadmap.detail_storage {
            DetailStorage::Inline => {
                reg.roadmap
                    .insert_section(Section::new(number, name, detail_body(gate)));
                DetailRef::Inline
            }
            DetailStorage::File => {
                let path = paths::phases_dir(root).join(paths::companion_file_name(number, name));
                let mut body = detail_body(gate).join("\n");
                body.push('\n');
                let file = CompanionFile::new(
                    CompanionMeta {
                        phase: number,
                        name: name.to_string(),
                        status: PhaseStatus::NotStarted,
                    },
                    body,
                );
                tx.write(&path, file.render()?, Validation::None);
                DetailRef::File { path }
            }
        };
        reg.stage_roadmap(&mut tx, before + 1);
        tx.commit()?;

        if rolled_over {
            tracing::warn!(after = %after, number = %number, "inserted into the next decade");
        }
        tracing::info!(phase = %number, name, "inserted phase");
        Ok(InsertOutcome {
            number,
            rolled_over,
            detail,
        })
    })
}

// ---------------------------------------------------------------------------
// Defer
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct DeferOutcome {
    pub number: PhaseNumber,
    pub deferred_date: NaiveDate,
    pub moved_file: Option<PathBuf>,
}

pub fn defer(root: &Path, number: PhaseNumber, reason: &str, force: bool) -> Result<DeferOutcome> {
    with_registry_lock(root, || {
        let mut reg = Registry::load(root)?;
        let row = reg.require_row(number)?;
        if row.status.is_active() && !force {
            return Err(SpecflowError::PhaseInProgress(number.to_string()));
        }

        let before = reg.roadmap.well_formed_rows();
        reg.roadmap.table_mut().remove_where(|r| r.number == number);
        let deferred_date = today();
        let section = reg.roadmap.take_section(number);
        {
            let backlog = reg.roadmap.backlog_mut();
            backlog.deferred_mut().insert_after_last(
                DeferredRow {
                    number,
                    name: row.name.clone(),
                    gate: row.gate.clone(),
                    deferred: deferred_date,
                    reason: reason.to_string(),
                },
                |r| r.number < number,
            );
            if let Some(section) = section {
                backlog.insert_section(section);
            }
        }

        let mut tx = Transaction::new(root);
        let moved_file = match section::find_file(&paths::phases_dir(root), number)? {
            Some(path) => {
                let target = paths::backlog_dir(root).join(path.file_name().unwrap_or_default());
                tx.rename(&path, &target);
                Some(target)
            }
            None => None,
        };
        reg.stage_roadmap(&mut tx, before - 1);
        tx.commit()?;

        tracing::info!(phase = %number, force, "deferred phase");
        Ok(DeferOutcome {
            number,
            deferred_date,
            moved_file,
        })
    })
}

// ---------------------------------------------------------------------------
// Restore
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestoreTarget {
    /// The original number, else the next free slot after it.
    Original,
    /// The next free slot after this phase.
    After(PhaseNumber),
    /// Exactly this number.
    As(PhaseNumber),
}

#[derive(Debug, Clone, Serialize)]
pub struct RestoreOutcome {
    pub original: PhaseNumber,
    pub number: PhaseNumber,
    pub rolled_over: bool,
}

pub fn restore(root: &Path, number: PhaseNumber, target: RestoreTarget) -> Result<RestoreOutcome> {
    with_registry_lock(root, || {
        let mut reg = Registry::load(root)?;
        let entry = reg
            .roadmap
            .deferred_row(number)
            .cloned()
            .ok_or_else(|| SpecflowError::BacklogEntryNotFound(number.to_string()))?;

        // the entry's own number is released by the restore
        let mut used = reg.roadmap.used_numbers();
        if let Some(pos) = used.iter().position(|n| *n == number) {
            used.remove(pos);
        }
        let allow = reg.config.roadmap.allow_decade_rollover;
        let alloc = match target {
            RestoreTarget::As(n) => {
                if used.contains(&n) {
                    return Err(SpecflowError::NumberInUse(n.to_string()));
                }
                Allocation {
                    number: n,
                    rolled_over: false,
                }
            }
            RestoreTarget::After(after) => {
                if reg.roadmap.row(after).is_none() {
                    return Err(SpecflowError::AnchorNotFound(after.to_string()));
                }
                allocator::allocate(after, &used, allow)?
            }
            RestoreTarget::Original if !used.contains(&number) => Allocation {
                number,
                rolled_over: false,
            },
            RestoreTarget::Original => allocator::allocate(number, &used, allow)?,
        };
        let new = alloc.number;

        let before = reg.roadmap.well_formed_rows();
        let section = {
            let backlog = reg.roadmap.backlog_mut();
            backlog.deferred_mut().remove_where(|r| r.number == number);
            backlog.take_section(number)
        };
        reg.roadmap.table_mut().insert_sorted(PhaseRow {
            number: new,
            name: entry.name.clone(),
            status: PhaseStatus::NotStarted,
            gate: entry.gate.clone(),
        });
        if let Some(mut section) = section {
            section.set_number(new);
            reg.roadmap.insert_section(section);
        }

        let mut tx = Transaction::new(root);
        if let Some(path) = section::find_file(&paths::backlog_dir(root), number)? {
            let target = paths::phases_dir(root).join(paths::companion_file_name(new, &entry.name));
            tx.write(
                &target,
                restamp(&path, new, &entry.name, PhaseStatus::NotStarted)?,
                Validation::None,
            );
            if target != path {
                tx.remove(&path);
            }
        }
        reg.stage_roadmap(&mut tx, before + 1);
        tx.commit()?;

        tracing::info!(from = %number, to = %new, "restored phase");
        Ok(RestoreOutcome {
            original: number,
            number: new,
            rolled_over: alloc.rolled_over,
        })
    })
}

// ---------------------------------------------------------------------------
// Status
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct StatusOutcome {
    pub number: PhaseNumber,
    pub previous: PhaseStatus,
    pub status: PhaseStatus,
    pub changed: bool,
}

pub fn update_status(root: &Path, number: PhaseNumber, status: PhaseStatus) -> Result<StatusOutcome> {
    with_registry_lock(root, || {
        let mut reg = Registry::load(root)?;
        let row = reg.require_row(number)?;
        if row.status == status {
            return Ok(StatusOutcome {
                number,
                previous: status,
                status,
                changed: false,
            });
        }

        let rows = reg.roadmap.well_formed_rows();
        if let Some(r) = reg.roadmap.table_mut().get_mut(number) {
            r.status = status;
        }
        let mut tx = Transaction::new(root);
        if let Some(path) = section::find_file(&paths::phases_dir(root), number)? {
            tx.write(&path, restamp(&path, number, &row.name, status)?, Validation::None);
        }
        reg.stage_roadmap(&mut tx, rows);
        tx.commit()?;

        tracing::info!(phase = %number, from = %row.status, to = %status, "status updated");
        Ok(StatusOutcome {
            number,
            previous: row.status,
            status,
            changed: true,
        })
    })
}

// ---------------------------------------------------------------------------
// Archive
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct ArchiveOutcome {
    pub number: PhaseNumber,
    /// Where the detail now lives; `None` when the phase had no detail.
    pub path: Option<PathBuf>,
    pub already_archived: bool,
}

pub fn archive(root: &Path, number: PhaseNumber) -> Result<ArchiveOutcome> {
    with_registry_lock(root, || {
        let mut reg = Registry::load(root)?;
        let row = reg.require_row(number)?;
        if row.status != PhaseStatus::Complete {
            return Err(SpecflowError::PhaseNotComplete(number.to_string()));
        }

        let archive_dir = paths::archive_dir(root);
        let rows = reg.roadmap.well_formed_rows();
        let mut tx = Transaction::new(root);
        let path = if let Some(section) = reg.roadmap.take_section(number) {
            let target = archive_dir.join(paths::companion_file_name(number, section.name()));
            let file = CompanionFile::from_section(number, section.name(), row.status, &section.lines());
            tx.write(&target, file.render()?, Validation::None);
            Some(target)
        } else if let Some(path) = section::find_file(&paths::phases_dir(root), number)? {
            let target = archive_dir.join(path.file_name().unwrap_or_default());
            tx.rename(&path, &target);
            Some(target)
        } else if let Some(path) = section::find_file(&archive_dir, number)? {
            return Ok(ArchiveOutcome {
                number,
                path: Some(path),
                already_archived: true,
            });
        } else {
            None
        };

        if path.is_some() {
            reg.stage_roadmap(&mut tx, rows);
            tx.commit()?;
            tracing::info!(phase = %number, "archived phase detail");
        }
        Ok(ArchiveOutcome {
            number,
            path,
            already_archived: false,
        })
    })
}

// ---------------------------------------------------------------------------
// Backlog notes
// ---------------------------------------------------------------------------

pub fn add_note(root: &Path, text: &str, priority: &str, notes: &str) -> Result<BacklogEntry> {
    with_registry_lock(root, || {
        let mut reg = Registry::load(root)?;
        if text.trim().is_empty() {
            return Err(SpecflowError::ValidationFailed {
                path: reg.path.clone(),
                reason: "backlog note text is empty".to_string(),
            });
        }
        let row = NoteRow {
            text: text.to_string(),
            priority: priority.to_string(),
            notes: notes.to_string(),
            added: today(),
        };
        let rows = reg.roadmap.well_formed_rows();
        reg.roadmap.backlog_mut().notes_mut().push(row.clone());
        let mut tx = Transaction::new(root);
        reg.stage_roadmap(&mut tx, rows);
        tx.commit()?;
        Ok(BacklogEntry::Note {
            text: row.text,
            priority: row.priority,
            notes: row.notes,
            added_date: row.added,
        })
    })
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ClearOutcome {
    pub notes_removed: usize,
    pub phases_removed: Vec<PhaseNumber>,
}

/// Remove every note, and unless `notes_only` every deferred phase with its
/// detail.
pub fn clear_backlog(root: &Path, notes_only: bool) -> Result<ClearOutcome> {
    with_registry_lock(root, || {
        let mut reg = Registry::load(root)?;
        let rows = reg.roadmap.well_formed_rows();
        let mut outcome = ClearOutcome::default();
        let mut tx = Transaction::new(root);

        if reg.roadmap.backlog().is_none() {
            return Ok(outcome);
        }
        let backlog = reg.roadmap.backlog_mut();
        if backlog.notes().is_some() {
            outcome.notes_removed = backlog.notes_mut().retain(|_| false);
        }
        if !notes_only && backlog.deferred().is_some() {
            let numbers: Vec<PhaseNumber> =
                backlog.deferred_mut().records().map(|r| r.number).collect();
            backlog.deferred_mut().retain(|_| false);
            for n in &numbers {
                backlog.take_section(*n);
                if let Some(path) = section::find_file(&paths::backlog_dir(root), *n)? {
                    tx.remove(path);
                }
            }
            outcome.phases_removed = numbers;
        }

        reg.stage_roadmap(&mut tx, rows);
        tx.commit()?;
        tracing::info!(
            notes = outcome.notes_removed,
            phases = outcome.phases_removed.len(),
            "backlog cleared"
        );
        Ok(outcome)
    })
}

// ---------------------------------------------------------------------------
// Legacy width migration
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct Migration {
    /// What was migrated: `row`, `backlog row`, `section`, `file`, `directory`.
    pub kind: &'static str,
    pub from: String,
    pub to: PhaseNumber,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct MigrateOutcome {
    pub migrated: Vec<Migration>,
    pub backup: Option<PathBuf>,
}

static LEGACY_FRONT_MATTER_RE: OnceLock<Regex> = OnceLock::new();

fn legacy_front_matter_re() -> &'static Regex {
    LEGACY_FRONT_MATTER_RE
        .get_or_init(|| Regex::new(r#"(?m)^phase:\s*['"]?(\d{3})['"]?\s*$"#).unwrap())
}

/// Cells of a malformed row rewritten with its legacy key widened, or `None`
/// if the key is not a legacy-width token.
fn widen_row<T: RowCodec>(line: &str) -> Option<(String, T)> {
    let mut cells = crate::table::split_cells(line)?;
    let token = cells.first()?.clone();
    let m = match_key(&token).ok().filter(|m| !m.is_exact())?;
    cells[0] = m.number().to_string();
    T::decode(&cells).ok().map(|row| (token, row))
}

/// Entries of `dir` whose name starts with a legacy-width token.
fn legacy_entries(dir: &Path, dirs: bool) -> Result<Vec<(PathBuf, String, PhaseNumber)>> {
    let mut out = Vec::new();
    if !dir.is_dir() {
        return Ok(out);
    }
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        if entry.file_type()?.is_dir() != dirs {
            continue;
        }
        let name = entry.file_name().to_string_lossy().into_owned();
        let token = name.split(['-', '.']).next().unwrap_or_default().to_string();
        if let Ok(m) = match_key(&token) {
            if !m.is_exact() {
                let widened = format!("{}{}", m.number(), &name[token.len()..]);
                out.push((entry.path(), widened, m.number()));
            }
        }
    }
    out.sort();
    Ok(out)
}

/// Widen every legacy three-digit key once: table rows, backlog rows, section
/// headers, companion file names and front matter, and artifact directories.
pub fn migrate_legacy_widths(root: &Path) -> Result<MigrateOutcome> {
    with_registry_lock(root, || {
        let mut reg = Registry::load(root)?;
        let mut outcome = MigrateOutcome::default();
        let mut used = reg.roadmap.used_numbers();

        let claim = |n: PhaseNumber, used: &mut Vec<PhaseNumber>| -> Result<()> {
            if used.contains(&n) {
                return Err(SpecflowError::NumberInUse(n.to_string()));
            }
            used.push(n);
            Ok(())
        };

        for block in &mut reg.roadmap.blocks {
            match block {
                Block::Table(table) => {
                    for row in &mut table.rows {
                        if let Row::Malformed(line) = row {
                            if let Some((from, widened)) = widen_row::<PhaseRow>(line) {
                                claim(widened.number, &mut used)?;
                                outcome.migrated.push(Migration {
                                    kind: "row",
                                    from,
                                    to: widened.number,
                                });
                                *row = Row::Record(Tracked::new(widened));
                            }
                        }
                    }
                }
                Block::Section(s) if s.is_legacy_width() => {
                    outcome.migrated.push(Migration {
                        kind: "section",
                        from: s.number().to_string()[..3].to_string(),
                        to: s.number(),
                    });
                    s.canonicalize();
                }
                Block::Backlog(backlog) => {
                    for b in &mut backlog.blocks {
                        match b {
                            BacklogBlock::Deferred(table) => {
                                for row in &mut table.rows {
                                    if let Row::Malformed(line) = row {
                                        if let Some((from, widened)) =
                                            widen_row::<DeferredRow>(line)
                                        {
                                            claim(widened.number, &mut used)?;
                                            outcome.migrated.push(Migration {
                                                kind: "backlog row",
                                                from,
                                                to: widened.number,
                                            });
                                            *row = Row::Record(Tracked::new(widened));
                                        }
                                    }
                                }
                            }
                            BacklogBlock::Section(s) if s.is_legacy_width() => {
                                outcome.migrated.push(Migration {
                                    kind: "section",
                                    from: s.number().to_string()[..3].to_string(),
                                    to: s.number(),
                                });
                                s.canonicalize();
                            }
                            _ => {}
                        }
                    }
                }
                _ => {}
            }
        }

        let mut tx = Transaction::new(root).with_backup(true);
        for dir in [
            paths::phases_dir(root),
            paths::backlog_dir(root),
            paths::archive_dir(root),
        ] {
            for (path, widened, number) in legacy_entries(&dir, false)? {
                let target = dir.join(&widened);
                if target.exists() {
                    return Err(SpecflowError::NumberInUse(number.to_string()));
                }
                let content = std::fs::read_to_string(&path)?;
                let content = legacy_front_matter_re()
                    .replace(&content, format!("phase: '{number}'").as_str())
                    .into_owned();
                tx.write(&target, content, Validation::None);
                tx.remove(&path);
                outcome.migrated.push(Migration {
                    kind: "file",
                    from: path.file_name().unwrap_or_default().to_string_lossy().into_owned(),
                    to: number,
                });
            }
        }
        let specs = reg.config.specs_path(root);
        for (path, widened, number) in legacy_entries(&specs, true)? {
            let target = specs.join(&widened);
            if target.exists() || derive::find_artifact_dir(&specs, number)? != Some(path.clone()) {
                return Err(SpecflowError::NumberInUse(number.to_string()));
            }
            tx.rename(&path, &target);
            outcome.migrated.push(Migration {
                kind: "directory",
                from: path.file_name().unwrap_or_default().to_string_lossy().into_owned(),
                to: number,
            });
        }

        if outcome.migrated.is_empty() {
            return Ok(outcome);
        }
        let expected = reg.roadmap.well_formed_rows();
        reg.stage_roadmap(&mut tx, expected);
        let commit = tx.commit()?;
        outcome.backup = commit.backup;
        tracing::info!(count = outcome.migrated.len(), "migrated legacy-width keys");
        Ok(outcome)
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
