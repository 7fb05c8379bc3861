//! Workflow position derived purely from artifacts on disk.

use crate::error::Result;
use crate::paths;
use crate::types::{match_key, PhaseNumber, WorkflowStep};
use regex::Regex;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

// ---------------------------------------------------------------------------
// Checkbox counting
// ---------------------------------------------------------------------------

static CHECKBOX_RE: OnceLock<Regex> = OnceLock::new();

fn checkbox_re() -> &'static Regex {
    CHECKBOX_RE.get_or_init(|| Regex::new(r"^\s*(?:[-*+]|\d+\.)\s+\[([ xX])\]").unwrap())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct CheckboxCount {
    pub checked: u32,
    pub total: u32,
}

impl CheckboxCount {
    pub fn all_checked(self) -> bool {
        self.total > 0 && self.checked == self.total
    }

    fn add(&mut self, other: CheckboxCount) {
        self.checked += other.checked;
        self.total += other.total;
    }
}

/// Count `- [ ]` / `- [x]` list items.
pub fn count_checkboxes(text: &str) -> CheckboxCount {
    let mut count = CheckboxCount::default();
    for line in text.lines() {
        if let Some(caps) = checkbox_re().captures(line) {
            count.total += 1;
            if &caps[1] != " " {
                count.checked += 1;
            }
        }
    }
    count
}

// ---------------------------------------------------------------------------
// Artifact directory
// ---------------------------------------------------------------------------

/// The artifact directory for a phase: an existing `specs/<number>-*/`
/// (exact number first, then a legacy-width match), else the canonical
/// `specs/<number>-<slug>/` where one would be created.
pub fn artifact_dir(specs_root: &Path, number: PhaseNumber, name: &str) -> Result<PathBuf> {
    if let Some(dir) = find_artifact_dir(specs_root, number)? {
        return Ok(dir);
    }
    Ok(specs_root.join(paths::phase_key(number, name)))
}

pub fn find_artifact_dir(specs_root: &Path, number: PhaseNumber) -> Result<Option<PathBuf>> {
    if !specs_root.is_dir() {
        return Ok(None);
    }
    let mut names: Vec<String> = Vec::new();
    for entry in std::fs::read_dir(specs_root)? {
        let entry = entry?;
        if entry.file_type()?.is_dir() {
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
    }
    names.sort();

    let mut widened = None;
    for name in names {
        let token = name.split('-').next().unwrap_or_default();
        let Ok(m) = match_key(token) else { continue };
        if m.number() != number {
            continue;
        }
        if m.is_exact() {
            return Ok(Some(specs_root.join(name)));
        }
        widened.get_or_insert(name);
    }
    Ok(widened.map(|name| specs_root.join(name)))
}

// ---------------------------------------------------------------------------
// Derivation
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct Artifacts {
    pub spec: bool,
    pub plan: bool,
    pub tasks: bool,
    pub checklist: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Derivation {
    pub number: PhaseNumber,
    pub dir: PathBuf,
    pub artifacts: Artifacts,
    pub tasks: CheckboxCount,
    pub checklists: CheckboxCount,
    /// `None` when no artifact exists yet.
    pub step: Option<WorkflowStep>,
}

impl Derivation {
    pub fn index(&self) -> Option<u32> {
        self.step.map(WorkflowStep::index)
    }
}

/// Highest workflow level the artifacts prove.
pub fn derived_step(artifacts: Artifacts, tasks: CheckboxCount) -> Option<WorkflowStep> {
    if artifacts.tasks && tasks.all_checked() {
        Some(WorkflowStep::Verify)
    } else if artifacts.checklist {
        Some(WorkflowStep::Implement)
    } else if artifacts.tasks {
        Some(WorkflowStep::Tasks)
    } else if artifacts.plan {
        Some(WorkflowStep::Plan)
    } else if artifacts.spec {
        Some(WorkflowStep::Specify)
    } else {
        None
    }
}

pub fn derive(specs_root: &Path, number: PhaseNumber, name: &str) -> Result<Derivation> {
    let dir = artifact_dir(specs_root, number, name)?;
    let mut artifacts = Artifacts {
        spec: dir.join(paths::SPEC_MD).is_file(),
        plan: dir.join(paths::PLAN_MD).is_file(),
        tasks: dir.join(paths::TASKS_MD).is_file(),
        checklist: false,
    };

    let tasks = if artifacts.tasks {
        count_checkboxes(&std::fs::read_to_string(dir.join(paths::TASKS_MD))?)
    } else {
        CheckboxCount::default()
    };

    let mut checklists = CheckboxCount::default();
    let checklist_dir = dir.join(paths::CHECKLISTS_DIR);
    if checklist_dir.is_dir() {
        for entry in std::fs::read_dir(&checklist_dir)? {
            let path = entry?.path();
            if path.extension().map(|e| e == "md").unwrap_or(false) {
                artifacts.checklist = true;
                checklists.add(count_checkboxes(&std::fs::read_to_string(&path)?));
            }
        }
    }

    let step = derived_step(artifacts, tasks);
    tracing::debug!(phase = %number, dir = %dir.display(), step = ?step, "derived workflow step");
    Ok(Derivation {
        number,
        dir,
        artifacts,
        tasks,
        checklists,
        step,
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn num(s: &str) -> PhaseNumber {
        s.parse().unwrap()
    }

    #[test]
    fn counts_checkboxes() {
        let text = "# Tasks\n- [x] one\n- [ ] two\n  * [X] nested\n1. [ ] numbered\n- not a task\n- [y] nope\n";
        assert_eq!(
            count_checkboxes(text),
            CheckboxCount {
                checked: 2,
                total: 4
            }
        );
    }

    #[test]
    fn step_follows_artifacts() {
        let mut a = Artifacts::default();
        assert_eq!(derived_step(a, CheckboxCount::default()), None);
        a.spec = true;
        assert_eq!(derived_step(a, CheckboxCount::default()), Some(WorkflowStep::Specify));
        a.plan = true;
        a.tasks = true;
        let partial = CheckboxCount {
            checked: 1,
            total: 3,
        };
        assert_eq!(derived_step(a, partial), Some(WorkflowStep::Tasks));
        a.checklist = true;
        assert_eq!(derived_step(a, partial), Some(WorkflowStep::Implement));
        let done = CheckboxCount {
            checked: 3,
            total: 3,
        };
        assert_eq!(derived_step(a, done), Some(WorkflowStep::Verify));
    }

    #[test]
    fn derive_from_disk() {
        let dir = TempDir::new().unwrap();
        let phase = dir.path().join("0020-api");
        std::fs::create_dir_all(phase.join("checklists")).unwrap();
        std::fs::write(phase.join("spec.md"), "spec").unwrap();
        std::fs::write(phase.join("plan.md"), "plan").unwrap();
        std::fs::write(phase.join("tasks.md"), "- [x] a\n- [x] b\n").unwrap();
        std::fs::write(phase.join("checklists/review.md"), "- [ ] r\n").unwrap();

        let d = derive(dir.path(), num("0020"), "API").unwrap();
        assert_eq!(d.dir, phase);
        assert!(d.artifacts.checklist);
        assert_eq!(d.tasks.total, 2);
        assert_eq!(d.checklists.total, 1);
        assert_eq!(d.index(), Some(4));
    }

    #[test]
    fn missing_dir_derives_nothing() {
        let dir = TempDir::new().unwrap();
        let d = derive(dir.path(), num("0030"), "UI Work").unwrap();
        assert_eq!(d.dir, dir.path().join("0030-ui-work"));
        assert_eq!(d.step, None);
    }

    #[test]
    fn legacy_dir_matches_after_widening() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join("004-search")).unwrap();
        assert_eq!(
            find_artifact_dir(dir.path(), num("0040")).unwrap(),
            Some(dir.path().join("004-search"))
        );
        assert_eq!(find_artifact_dir(dir.path(), num("0004")).unwrap(), None);
    }
}
