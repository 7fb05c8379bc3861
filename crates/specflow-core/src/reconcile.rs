//! Reconciliation: turning the roadmap, the snapshot cache, artifacts on disk,
//! and git into one recommended action.
//!
//! [`evaluate`] is read-only. [`apply`] rewrites the snapshot from derived
//! values (`trust-files`) or only reports (`trust-state`); the roadmap itself
//! is never edited here.

use crate::derive::{self, CheckboxCount, Derivation};
use crate::error::Result;
use crate::git::{self, GitFacts, GitProbe};
use crate::io::Transaction;
use crate::lock::with_registry_lock;
use crate::paths;
use crate::registry::Registry;
use crate::state::Snapshot;
use crate::types::{PhaseNumber, PhaseRecord, PhaseStatus, WorkflowStep};
use serde::Serialize;
use std::fmt;
use std::path::{Path, PathBuf};

// ---------------------------------------------------------------------------
// Action
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    FixBranch,
    VerifyUserGate,
    StartNextPhase,
    ArchivePhase,
    SyncRoadmap,
    StartPhase,
    StartSpecify,
    ContinueSpecify,
    ContinuePlan,
    ContinueTasks,
    ContinueImplement,
    ContinueVerify,
}

impl Action {
    pub fn continue_from(step: WorkflowStep) -> Self {
        match step {
            WorkflowStep::Specify => Action::ContinueSpecify,
            WorkflowStep::Plan => Action::ContinuePlan,
            WorkflowStep::Tasks => Action::ContinueTasks,
            WorkflowStep::Implement => Action::ContinueImplement,
            WorkflowStep::Verify => Action::ContinueVerify,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Action::FixBranch => "fix_branch",
            Action::VerifyUserGate => "verify_user_gate",
            Action::StartNextPhase => "start_next_phase",
            Action::ArchivePhase => "archive_phase",
            Action::SyncRoadmap => "sync_roadmap",
            Action::StartPhase => "start_phase",
            Action::StartSpecify => "start_specify",
            Action::ContinueSpecify => "continue_specify",
            Action::ContinuePlan => "continue_plan",
            Action::ContinueTasks => "continue_tasks",
            Action::ContinueImplement => "continue_implement",
            Action::ContinueVerify => "continue_verify",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Context
// ---------------------------------------------------------------------------

/// Everything the rules look at, with the staleness pre-pass already applied.
#[derive(Debug, Clone, Default)]
pub struct Ctx {
    pub phase: Option<PhaseNumber>,
    pub name: Option<String>,
    /// Status according to the roadmap row.
    pub roadmap_status: Option<PhaseStatus>,
    /// Status according to the snapshot cache.
    pub cached_status: Option<PhaseStatus>,
    pub cached_branch: Option<String>,
    /// Effective workflow step after the pre-pass.
    pub step: Option<WorkflowStep>,
    pub git: GitFacts,
    /// First not-started row after the current phase.
    pub next_phase: Option<PhaseNumber>,
}

/// InProgress and AwaitingUser compare equal against the cache.
fn status_class(status: PhaseStatus) -> u8 {
    match status {
        PhaseStatus::NotStarted => 0,
        PhaseStatus::InProgress | PhaseStatus::AwaitingUser => 1,
        PhaseStatus::Complete => 2,
    }
}

impl Ctx {
    fn phase_str(&self) -> String {
        self.phase.map(|n| n.to_string()).unwrap_or_default()
    }

    fn branch_off(&self) -> bool {
        let wanted = self
            .cached_branch
            .as_deref()
            .unwrap_or(self.git.expected_branch.as_str());
        self.git.current_branch.as_deref() != Some(wanted)
    }

    fn statuses_disagree(&self) -> bool {
        match (self.roadmap_status, self.cached_status) {
            (Some(r), Some(s)) => status_class(r) != status_class(s),
            _ => false,
        }
    }

    fn next_phase_hint(&self) -> String {
        match self.next_phase {
            Some(n) => format!(" (next: {n})"),
            None => String::new(),
        }
    }
}

// ---------------------------------------------------------------------------
// Rules
// ---------------------------------------------------------------------------

pub struct Rule {
    pub id: &'static str,
    pub condition: fn(&Ctx) -> bool,
    pub action: fn(&Ctx) -> Action,
    pub message: fn(&Ctx) -> String,
    pub ready: bool,
}

/// Ordered rule table; the first rule whose condition holds decides.
pub fn default_rules() -> Vec<Rule> {
    vec![
        Rule {
            id: "branch_mismatch",
            condition: |c| {
                c.phase.is_some()
                    && c.git.available
                    && c.branch_off()
                    && c.git.expected_exists
                    && !c.git.merge_evidence
            },
            action: |_| Action::FixBranch,
            message: |c| {
                format!(
                    "on branch '{}' but phase {} works on '{}'",
                    c.git.current_branch.as_deref().unwrap_or("(detached)"),
                    c.phase_str(),
                    c.git.expected_branch
                )
            },
            ready: false,
        },
        Rule {
            id: "post_merge",
            condition: |c| {
                c.phase.is_some()
                    && c.git.available
                    && !c.git.expected_exists
                    && (c.git.merge_evidence || c.roadmap_status == Some(PhaseStatus::Complete))
            },
            action: |c| match c.roadmap_status {
                Some(PhaseStatus::AwaitingUser) => Action::VerifyUserGate,
                Some(PhaseStatus::Complete) => Action::StartNextPhase,
                _ => Action::ArchivePhase,
            },
            message: |c| match c.roadmap_status {
                Some(PhaseStatus::AwaitingUser) => format!(
                    "branch for phase {} is merged; its gate awaits user verification",
                    c.phase_str()
                ),
                Some(PhaseStatus::Complete) => format!(
                    "phase {} is merged and complete{}",
                    c.phase_str(),
                    c.next_phase_hint()
                ),
                _ => format!(
                    "branch for phase {} is merged; mark it complete and archive it",
                    c.phase_str()
                ),
            },
            ready: false,
        },
        Rule {
            id: "status_disagreement",
            condition: Ctx::statuses_disagree,
            action: |c| match c.roadmap_status {
                Some(PhaseStatus::Complete) => Action::ArchivePhase,
                Some(PhaseStatus::AwaitingUser) => Action::VerifyUserGate,
                _ => Action::SyncRoadmap,
            },
            message: |c| {
                format!(
                    "roadmap says phase {} is {} but the cache says {}",
                    c.phase_str(),
                    c.roadmap_status.map(PhaseStatus::label).unwrap_or("unknown"),
                    c.cached_status.map(PhaseStatus::label).unwrap_or("unknown"),
                )
            },
            ready: false,
        },
        Rule {
            id: "default",
            condition: |_| true,
            action: |c| match (c.phase, c.step) {
                (None, _) => Action::StartPhase,
                (Some(_), None) => Action::StartSpecify,
                (Some(_), Some(step)) => Action::continue_from(step),
            },
            message: |c| match (c.phase, c.step) {
                (None, _) => format!("no phase in flight{}", c.next_phase_hint()),
                (Some(n), None) => format!("phase {n} has no artifacts yet"),
                (Some(n), Some(step)) => format!("phase {n} is at step {}", step.as_str()),
            },
            ready: true,
        },
    ]
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Recommendation {
    pub rule: &'static str,
    pub action: Action,
    pub message: String,
    pub ready: bool,
}

pub fn classify(ctx: &Ctx, rules: &[Rule]) -> Recommendation {
    for rule in rules {
        if (rule.condition)(ctx) {
            return Recommendation {
                rule: rule.id,
                action: (rule.action)(ctx),
                message: (rule.message)(ctx),
                ready: rule.ready,
            };
        }
    }
    // rule tables end in a catch-all; an empty one falls back to starting fresh
    Recommendation {
        rule: "none",
        action: Action::StartPhase,
        message: "no rule matched".to_string(),
        ready: false,
    }
}

// ---------------------------------------------------------------------------
// Mismatches
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MismatchKind {
    StaleStep,
    TaskCounts,
    Branch,
    RoadmapStatus,
    PhaseMissing,
}

impl MismatchKind {
    /// Kinds `trust-files` can repair by rewriting the snapshot.
    pub fn auto_fixable(self) -> bool {
        matches!(
            self,
            MismatchKind::StaleStep | MismatchKind::TaskCounts | MismatchKind::Branch
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            MismatchKind::StaleStep => "stale_step",
            MismatchKind::TaskCounts => "task_counts",
            MismatchKind::Branch => "branch",
            MismatchKind::RoadmapStatus => "roadmap_status",
            MismatchKind::PhaseMissing => "phase_missing",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Mismatch {
    pub kind: MismatchKind,
    pub cached: String,
    pub actual: String,
}

// ---------------------------------------------------------------------------
// Report
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct Report {
    pub phase: Option<PhaseNumber>,
    pub name: Option<String>,
    pub roadmap_status: Option<PhaseStatus>,
    pub cached_status: Option<PhaseStatus>,
    pub cached_step: Option<WorkflowStep>,
    pub derived_step: Option<WorkflowStep>,
    pub effective_step: Option<WorkflowStep>,
    /// The filesystem is ahead of the cached step.
    pub cache_stale: bool,
    pub tasks: CheckboxCount,
    pub checklists: CheckboxCount,
    pub artifact_dir: Option<PathBuf>,
    pub git: GitFacts,
    pub mismatches: Vec<Mismatch>,
    pub recommendation: Recommendation,
}

impl Report {
    pub fn has_differences(&self) -> bool {
        !self.mismatches.is_empty()
    }
}

fn show<T: fmt::Display>(value: Option<T>) -> String {
    value.map(|v| v.to_string()).unwrap_or_else(|| "-".to_string())
}

fn show_step(step: Option<WorkflowStep>) -> String {
    step.map(|s| format!("{} ({})", s.as_str(), s.index()))
        .unwrap_or_else(|| "-".to_string())
}

/// Phase under reconciliation: the cached one, else the first row in flight.
fn target_phase(snapshot: Option<&Snapshot>, records: &[PhaseRecord]) -> Option<PhaseNumber> {
    snapshot.and_then(Snapshot::phase_number).or_else(|| {
        records
            .iter()
            .find(|r| r.status.is_active())
            .map(|r| r.number)
    })
}

fn next_not_started(records: &[PhaseRecord], after: Option<PhaseNumber>) -> Option<PhaseNumber> {
    records
        .iter()
        .filter(|r| after.map(|a| r.number > a).unwrap_or(true))
        .find(|r| r.status == PhaseStatus::NotStarted)
        .map(|r| r.number)
}

pub fn evaluate(reg: &Registry, probe: &dyn GitProbe) -> Result<Report> {
    let snapshot = Snapshot::load(&reg.config.state_path(&reg.root))?;
    let records = reg.records()?;
    let phase = target_phase(snapshot.as_ref(), &records);
    let record = phase.and_then(|n| records.iter().find(|r| r.number == n));

    let cached_name = snapshot
        .as_ref()
        .and_then(Snapshot::phase_name)
        .map(str::to_string);
    let name = record.map(|r| r.name.clone()).or(cached_name);
    let cached_branch = snapshot
        .as_ref()
        .and_then(Snapshot::branch)
        .map(str::to_string);
    let slug_branch = phase.map(|n| paths::phase_key(n, name.as_deref().unwrap_or_default()));

    let derivation: Option<Derivation> = match phase {
        Some(n) => Some(derive::derive(
            &reg.config.specs_path(&reg.root),
            n,
            name.as_deref().unwrap_or_default(),
        )?),
        None => None,
    };

    // the branch the driver recorded is the one that should still exist
    let tracked_branch = match (phase, snapshot.as_ref().and_then(Snapshot::phase_number)) {
        (Some(n), Some(cached)) if n == cached => cached_branch.clone().or(slug_branch.clone()),
        _ => slug_branch.clone(),
    };
    let git = match (phase, tracked_branch) {
        (Some(n), Some(branch)) => {
            git::collect(probe, n, &branch, reg.config.git.merge_scan_depth)
        }
        _ => GitFacts::default(),
    };

    let cached_step = snapshot.as_ref().and_then(Snapshot::current_step);
    let cached_index = snapshot.as_ref().and_then(Snapshot::step_index);
    let derived_step = derivation.as_ref().and_then(|d| d.step);

    // pre-pass: files ahead of the cache win
    let cache_stale = match (derived_step, cached_index) {
        (Some(d), Some(s)) => d.index() > s,
        (Some(_), None) => snapshot.is_some(),
        _ => false,
    };
    let effective_step = if cache_stale { derived_step } else { cached_step.or(derived_step) };
    if cache_stale {
        tracing::info!(
            phase = %show(phase),
            cached = ?cached_index,
            derived = ?derived_step.map(WorkflowStep::index),
            "snapshot cache is behind the filesystem"
        );
    }

    let cached_status = snapshot.as_ref().and_then(Snapshot::phase_status);
    let tasks = derivation.as_ref().map(|d| d.tasks).unwrap_or_default();

    let mut mismatches = Vec::new();
    if let Some(snap) = snapshot.as_ref() {
        if let Some(n) = snap.phase_number() {
            if record.is_none() {
                mismatches.push(Mismatch {
                    kind: MismatchKind::PhaseMissing,
                    cached: n.to_string(),
                    actual: "not in the roadmap".to_string(),
                });
            }
        }
        if derived_step.is_some() && derived_step != cached_step {
            mismatches.push(Mismatch {
                kind: MismatchKind::StaleStep,
                cached: show_step(cached_step),
                actual: show_step(derived_step),
            });
        }
        if derivation.as_ref().map(|d| d.artifacts.tasks).unwrap_or(false) {
            let progress = snap.progress().cloned().unwrap_or_default();
            if (progress.tasks_completed, progress.tasks_total) != (tasks.checked, tasks.total) {
                mismatches.push(Mismatch {
                    kind: MismatchKind::TaskCounts,
                    cached: format!("{}/{}", progress.tasks_completed, progress.tasks_total),
                    actual: format!("{}/{}", tasks.checked, tasks.total),
                });
            }
        }
        if let (Some(_), Some(expected)) = (record, slug_branch.as_deref()) {
            if cached_branch.as_deref() != Some(expected) {
                mismatches.push(Mismatch {
                    kind: MismatchKind::Branch,
                    cached: show(cached_branch.as_deref()),
                    actual: expected.to_string(),
                });
            }
        }
        if let (Some(r), Some(s)) = (record.map(|r| r.status), cached_status) {
            if status_class(r) != status_class(s) {
                mismatches.push(Mismatch {
                    kind: MismatchKind::RoadmapStatus,
                    cached: s.as_str().to_string(),
                    actual: r.as_str().to_string(),
                });
            }
        }
    }

    let ctx = Ctx {
        phase,
        name: name.clone(),
        roadmap_status: record.map(|r| r.status),
        cached_status,
        cached_branch,
        step: effective_step,
        git: git.clone(),
        next_phase: next_not_started(&records, phase),
    };
    let recommendation = classify(&ctx, &default_rules());
    tracing::debug!(rule = recommendation.rule, action = %recommendation.action, "reconciled");

    Ok(Report {
        phase,
        name,
        roadmap_status: ctx.roadmap_status,
        cached_status,
        cached_step,
        derived_step,
        effective_step,
        cache_stale,
        tasks,
        checklists: derivation.as_ref().map(|d| d.checklists).unwrap_or_default(),
        artifact_dir: derivation.map(|d| d.dir),
        git,
        mismatches,
        recommendation,
    })
}

// ---------------------------------------------------------------------------
// Apply
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Mode {
    /// Overwrite the cache with values derived from the filesystem.
    TrustFiles,
    /// Report only.
    TrustState,
}

/// Which derived values `trust-files` may write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Scope {
    #[default]
    All,
    Counts,
    Step,
    Branch,
}

impl Scope {
    fn covers(self, kind: MismatchKind) -> bool {
        match self {
            Scope::All => kind.auto_fixable(),
            Scope::Counts => kind == MismatchKind::TaskCounts,
            Scope::Step => kind == MismatchKind::StaleStep,
            Scope::Branch => kind == MismatchKind::Branch,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Skipped {
    pub kind: MismatchKind,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ApplyOutcome {
    pub report: Report,
    pub mode: Mode,
    pub fixed: Vec<MismatchKind>,
    pub skipped: Vec<Skipped>,
    /// The snapshot path when it was rewritten.
    pub written: Option<PathBuf>,
}

impl ApplyOutcome {
    /// Differences were found and left in place.
    pub fn unresolved(&self) -> bool {
        match self.mode {
            Mode::TrustState => self.report.has_differences(),
            Mode::TrustFiles => !self.skipped.is_empty(),
        }
    }
}

fn skip_reason(kind: MismatchKind) -> String {
    match kind {
        MismatchKind::RoadmapStatus => {
            "cannot auto-fix: update the roadmap with 'specflow phase status'".to_string()
        }
        MismatchKind::PhaseMissing => {
            "cannot auto-fix: the cached phase is not in the roadmap".to_string()
        }
        _ => "outside the requested scope".to_string(),
    }
}

pub fn apply(root: &Path, probe: &dyn GitProbe, mode: Mode, scope: Scope) -> Result<ApplyOutcome> {
    if mode == Mode::TrustState {
        let report = evaluate(&Registry::load(root)?, probe)?;
        let skipped = report
            .mismatches
            .iter()
            .map(|m| Skipped {
                kind: m.kind,
                reason: "trust-state: reported only".to_string(),
            })
            .collect();
        return Ok(ApplyOutcome {
            report,
            mode,
            fixed: Vec::new(),
            skipped,
            written: None,
        });
    }

    with_registry_lock(root, || {
        let reg = Registry::load(root)?;
        let report = evaluate(&reg, probe)?;
        let state_path = reg.config.state_path(root);

        let mut fixed = Vec::new();
        let mut skipped = Vec::new();
        let mut snapshot = Snapshot::load(&state_path)?.unwrap_or_default();
        for m in &report.mismatches {
            if !m.kind.auto_fixable() || !scope.covers(m.kind) {
                skipped.push(Skipped {
                    kind: m.kind,
                    reason: skip_reason(m.kind),
                });
                continue;
            }
            match m.kind {
                MismatchKind::StaleStep => {
                    if let Some(step) = report.derived_step {
                        snapshot.set_step(step);
                    }
                }
                MismatchKind::TaskCounts => snapshot
                    .progress_mut()
                    .set_counts(report.tasks.checked, report.tasks.total),
                MismatchKind::Branch => snapshot.phase_mut().branch = Some(m.actual.clone()),
                MismatchKind::RoadmapStatus | MismatchKind::PhaseMissing => {}
            }
            fixed.push(m.kind);
        }

        let mut written = None;
        if !fixed.is_empty() {
            let mut tx = Transaction::new(root);
            snapshot.stage(&mut tx, &state_path)?;
            tx.commit()?;
            tracing::info!(fixed = fixed.len(), path = %state_path.display(), "rewrote snapshot cache");
            written = Some(state_path);
        }
        Ok(ApplyOutcome {
            report,
            mode,
            fixed,
            skipped,
            written,
        })
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::git::tests::FakeGit;
    use crate::registry::tests::{num, setup, ROADMAP};

    fn write_state(root: &Path, json: &str) {
        std::fs::create_dir_all(root.join(".specflow")).unwrap();
        std::fs::write(root.join(".specflow/orchestration-state.json"), json).unwrap();
    }

    fn write_specs(root: &Path, tasks: &str) {
        let dir = root.join("specs/0020-api");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("spec.md"), "spec").unwrap();
        std::fs::write(dir.join("plan.md"), "plan").unwrap();
        std::fs::write(dir.join("tasks.md"), tasks).unwrap();
    }

    const CACHE: &str = r#"{
  "schema_version": 2,
  "orchestration": {
    "phase": {"number": "0020", "name": "API", "branch": "0020-api", "status": "in_progress"},
    "step": {"current": "tasks", "index": 2, "status": "in_progress"},
    "progress": {"tasks_completed": 1, "tasks_total": 2, "percentage": 50}
  },
  "driver": {"session": 7}
}"#;

    fn ctx() -> Ctx {
        Ctx {
            phase: Some(num("0020")),
            name: Some("API".to_string()),
            roadmap_status: Some(PhaseStatus::InProgress),
            cached_status: Some(PhaseStatus::InProgress),
            cached_branch: Some("0020-api".to_string()),
            step: Some(WorkflowStep::Tasks),
            git: GitFacts {
                available: true,
                current_branch: Some("0020-api".to_string()),
                expected_branch: "0020-api".to_string(),
                expected_exists: true,
                merge_evidence: false,
            },
            next_phase: Some(num("0030")),
        }
    }

    fn action(c: &Ctx) -> Action {
        classify(c, &default_rules()).action
    }

    #[test]
    fn stale_cache_uses_filesystem_value() {
        let dir = setup(ROADMAP);
        let root = dir.path();
        write_state(root, CACHE);
        write_specs(root, "- [x] a\n- [x] b\n");

        let reg = Registry::load(root).unwrap();
        let report = evaluate(&reg, &FakeGit::default()).unwrap();
        assert_eq!(report.cached_step, Some(WorkflowStep::Tasks));
        assert_eq!(report.derived_step, Some(WorkflowStep::Verify));
        assert_eq!(report.effective_step, Some(WorkflowStep::Verify));
        assert!(report.cache_stale);
        assert!(report
            .mismatches
            .iter()
            .any(|m| m.kind == MismatchKind::StaleStep));
        assert_eq!(report.recommendation.action, Action::ContinueVerify);
        assert!(report.recommendation.ready);
    }

    #[test]
    fn cache_ahead_is_not_stale() {
        let dir = setup(ROADMAP);
        let root = dir.path();
        write_state(
            root,
            &CACHE.replace(r#""current": "tasks", "index": 2"#, r#""current": "implement", "index": 3"#),
        );
        write_specs(root, "- [ ] a\n");
        let report = evaluate(&Registry::load(root).unwrap(), &FakeGit::default()).unwrap();
        assert!(!report.cache_stale);
        assert_eq!(report.effective_step, Some(WorkflowStep::Implement));
    }

    #[test]
    fn legacy_cache_values_do_not_fail_evaluate() {
        let dir = setup(ROADMAP);
        let root = dir.path();
        write_state(
            root,
            r#"{"orchestration": {
                "phase": {"number": "002", "status": "paused"},
                "step": {"current": "clarify", "status": "waiting"}
            }}"#,
        );
        write_specs(root, "- [ ] a\n");
        let report = evaluate(&Registry::load(root).unwrap(), &FakeGit::default()).unwrap();
        assert_eq!(report.phase, Some(num("0020")));
        assert_eq!(report.cached_status, None);
        assert_eq!(report.cached_step, None);
        assert!(report.cache_stale);
        assert_eq!(report.effective_step, Some(WorkflowStep::Tasks));
    }

    fn renamed_branch_git(subjects: &[&str]) -> FakeGit {
        FakeGit {
            available: true,
            current: Some("main".to_string()),
            local: vec!["0020-rest-api".to_string()],
            subjects: subjects.iter().map(|s| s.to_string()).collect(),
            ..FakeGit::default()
        }
    }

    #[test]
    fn cached_branch_is_the_one_checked_for_existence() {
        let dir = setup(ROADMAP);
        let root = dir.path();
        write_state(root, &CACHE.replace(r#""branch": "0020-api""#, r#""branch": "0020-rest-api""#));
        write_specs(root, "- [x] a\n- [ ] b\n");
        let reg = Registry::load(root).unwrap();

        // a commit mentions the phase, but the recorded branch is still alive
        let report = evaluate(&reg, &renamed_branch_git(&["refactor 0020 handlers"])).unwrap();
        assert_eq!(report.git.expected_branch, "0020-rest-api");
        assert!(report.git.expected_exists);
        assert_eq!(report.recommendation.action, Action::ContinueTasks);

        let branch = report
            .mismatches
            .iter()
            .find(|m| m.kind == MismatchKind::Branch)
            .unwrap();
        assert_eq!(branch.cached, "0020-rest-api");
        assert_eq!(branch.actual, "0020-api");

        let report = evaluate(&reg, &renamed_branch_git(&[])).unwrap();
        assert_eq!(report.recommendation.action, Action::FixBranch);
    }

    #[test]
    fn rule_order_first_match_wins() {
        let mut c = ctx();
        assert_eq!(action(&c), Action::ContinueTasks);

        c.git.current_branch = Some("main".to_string());
        assert_eq!(action(&c), Action::FixBranch);

        // merge evidence suppresses the branch fix
        c.git.merge_evidence = true;
        assert_eq!(action(&c), Action::ContinueTasks);

        c.git.expected_exists = false;
        assert_eq!(action(&c), Action::ArchivePhase);
        c.roadmap_status = Some(PhaseStatus::AwaitingUser);
        assert_eq!(action(&c), Action::VerifyUserGate);
        c.roadmap_status = Some(PhaseStatus::Complete);
        let rec = classify(&c, &default_rules());
        assert_eq!(rec.action, Action::StartNextPhase);
        assert!(rec.message.contains("0030"));
        assert!(!rec.ready);
    }

    #[test]
    fn status_disagreement_rules() {
        let mut c = ctx();
        c.git.available = false;

        c.cached_status = Some(PhaseStatus::AwaitingUser);
        assert_eq!(action(&c), Action::ContinueTasks);

        c.roadmap_status = Some(PhaseStatus::Complete);
        assert_eq!(action(&c), Action::ArchivePhase);

        c.roadmap_status = Some(PhaseStatus::NotStarted);
        assert_eq!(action(&c), Action::SyncRoadmap);

        c.roadmap_status = Some(PhaseStatus::AwaitingUser);
        c.cached_status = Some(PhaseStatus::Complete);
        assert_eq!(action(&c), Action::VerifyUserGate);
    }

    #[test]
    fn default_rule_variants() {
        let mut c = ctx();
        c.git.available = false;
        c.step = None;
        assert_eq!(action(&c), Action::StartSpecify);
        c.phase = None;
        let rec = classify(&c, &default_rules());
        assert_eq!(rec.action, Action::StartPhase);
        assert!(rec.ready);
    }

    #[test]
    fn no_snapshot_targets_phase_in_flight() {
        let dir = setup(ROADMAP);
        let report = evaluate(&Registry::load(dir.path()).unwrap(), &FakeGit::default()).unwrap();
        assert_eq!(report.phase, Some(num("0020")));
        assert!(report.mismatches.is_empty());
        assert_eq!(report.recommendation.action, Action::StartSpecify);
    }

    #[test]
    fn missing_phase_and_status_mismatch_reported() {
        let dir = setup(ROADMAP);
        let root = dir.path();
        write_state(
            root,
            r#"{"orchestration": {"phase": {"number": "0050", "branch": "0050-gone", "status": "complete"}}}"#,
        );
        let report = evaluate(&Registry::load(root).unwrap(), &FakeGit::default()).unwrap();
        assert_eq!(report.mismatches[0].kind, MismatchKind::PhaseMissing);

        write_state(root, &CACHE.replace(r#""status": "in_progress"}"#, r#""status": "complete"}"#));
        let report = evaluate(&Registry::load(root).unwrap(), &FakeGit::default()).unwrap();
        assert!(report
            .mismatches
            .iter()
            .any(|m| m.kind == MismatchKind::RoadmapStatus));
        assert_eq!(report.recommendation.action, Action::SyncRoadmap);
    }

    #[test]
    fn trust_files_rewrites_cache() {
        let dir = setup(ROADMAP);
        let root = dir.path();
        write_state(root, CACHE);
        write_specs(root, "- [x] a\n- [x] b\n- [ ] c\n");

        let out = apply(root, &FakeGit::default(), Mode::TrustFiles, Scope::All).unwrap();
        assert!(out.fixed.contains(&MismatchKind::TaskCounts));
        assert!(out.written.is_some());
        assert!(!out.unresolved());

        let snap = Snapshot::load(&root.join(".specflow/orchestration-state.json"))
            .unwrap()
            .unwrap();
        let progress = snap.progress().cloned().unwrap();
        assert_eq!((progress.tasks_completed, progress.tasks_total), (2, 3));
        assert_eq!(progress.percentage, 66);
        assert_eq!(snap.extra["driver"]["session"], 7);

        let again = evaluate(&Registry::load(root).unwrap(), &FakeGit::default()).unwrap();
        assert!(again.mismatches.is_empty());
    }

    #[test]
    fn narrowed_scope_leaves_other_fields() {
        let dir = setup(ROADMAP);
        let root = dir.path();
        write_state(root, CACHE);
        write_specs(root, "- [x] a\n- [x] b\n");

        let out = apply(root, &FakeGit::default(), Mode::TrustFiles, Scope::Counts).unwrap();
        assert_eq!(out.fixed, vec![MismatchKind::TaskCounts]);
        assert_eq!(out.skipped[0].kind, MismatchKind::StaleStep);
        assert!(out.unresolved());

        let snap = Snapshot::load(&root.join(".specflow/orchestration-state.json"))
            .unwrap()
            .unwrap();
        assert_eq!(snap.step_index(), Some(2));
    }

    #[test]
    fn trust_state_reports_only() {
        let dir = setup(ROADMAP);
        let root = dir.path();
        write_state(root, CACHE);
        write_specs(root, "- [x] a\n- [x] b\n");
        let out = apply(root, &FakeGit::default(), Mode::TrustState, Scope::All).unwrap();
        assert!(out.fixed.is_empty());
        assert!(out.unresolved());
        assert_eq!(
            std::fs::read_to_string(root.join(".specflow/orchestration-state.json")).unwrap(),
            CACHE
        );
    }
}
