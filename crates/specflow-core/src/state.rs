//! The cached orchestration snapshot (`.specflow/orchestration-state.json`).
//!
//! The snapshot is a hint written by the workflow driver. Nothing here is
//! authoritative: the reconciler compares it against the roadmap and the
//! filesystem and only ever rewrites it with derived values. Fields this crate
//! does not model are carried through rewrites untouched, and values it cannot
//! read are kept verbatim and treated as absent.
//!
//! ```json
//! {
//!   "schema_version": 2,
//!   "orchestration": {
//!     "phase": {"number": "0020", "name": "API", "branch": "0020-api", "status": "in_progress"},
//!     "step": {"current": "tasks", "index": 2, "status": "in_progress"},
//!     "progress": {"tasks_completed": 3, "tasks_total": 10, "percentage": 30}
//!   }
//! }
//! ```

use crate::error::Result;
use crate::io::{Transaction, Validation};
use crate::types::{resolve_key, PhaseNumber, PhaseStatus, WorkflowStep};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::path::Path;

pub const SCHEMA_VERSION: u32 = 2;

// ---------------------------------------------------------------------------
// Hint
// ---------------------------------------------------------------------------

/// A cached value that either parsed or is carried through as raw JSON.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Hint<T> {
    Known(T),
    Raw(Value),
}

impl<T> Hint<T> {
    pub fn known(&self) -> Option<&T> {
        match self {
            Hint::Known(v) => Some(v),
            Hint::Raw(_) => None,
        }
    }

    fn unreadable(value: Value, what: &str, reason: impl std::fmt::Display) -> Self {
        tracing::warn!(%value, %reason, "ignoring unreadable {what} in snapshot cache");
        Hint::Raw(value)
    }
}

impl<'de, T: DeserializeOwned> Deserialize<'de> for Hint<T> {
    fn deserialize<D: Deserializer<'de>>(d: D) -> std::result::Result<Self, D::Error> {
        let value = Value::deserialize(d)?;
        Ok(match T::deserialize(&value) {
            Ok(v) => Hint::Known(v),
            Err(e) => Hint::unreadable(value, std::any::type_name::<T>(), e),
        })
    }
}

fn known<T: Copy>(hint: &Option<Hint<T>>) -> Option<T> {
    hint.as_ref().and_then(Hint::known).copied()
}

/// Cached phase numbers go through the same single widening as user keys.
fn number_hint<'de, D: Deserializer<'de>>(
    d: D,
) -> std::result::Result<Option<Hint<PhaseNumber>>, D::Error> {
    let Some(value) = Option::<Value>::deserialize(d)? else {
        return Ok(None);
    };
    let token = if let Some(s) = value.as_str() {
        s.to_string()
    } else if value.is_number() {
        value.to_string()
    } else {
        return Ok(Some(Hint::unreadable(value, "phase number", "not a string")));
    };
    Ok(Some(match resolve_key(&token) {
        Ok(n) => Hint::Known(n),
        Err(e) => Hint::unreadable(value, "phase number", e),
    }))
}

/// Counts that do not parse read as zero.
fn lenient_count<'de, D: Deserializer<'de>>(d: D) -> std::result::Result<u32, D::Error> {
    let value = Value::deserialize(d)?;
    Ok(match u32::deserialize(&value) {
        Ok(n) => n,
        Err(e) => {
            tracing::warn!(%value, reason = %e, "ignoring unreadable count in snapshot cache");
            0
        }
    })
}

// ---------------------------------------------------------------------------
// Supporting types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct SnapshotPhase {
    #[serde(
        default,
        deserialize_with = "number_hint",
        skip_serializing_if = "Option::is_none"
    )]
    pub number: Option<Hint<PhaseNumber>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<Hint<PhaseStatus>>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    #[serde(alias = "not_started")]
    Pending,
    InProgress,
    #[serde(alias = "completed")]
    Complete,
    Blocked,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct SnapshotStep {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current: Option<Hint<WorkflowStep>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub index: Option<Hint<u32>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<Hint<StepStatus>>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Progress {
    #[serde(default, deserialize_with = "lenient_count")]
    pub tasks_completed: u32,
    #[serde(default, deserialize_with = "lenient_count")]
    pub tasks_total: u32,
    #[serde(default, deserialize_with = "lenient_count")]
    pub percentage: u32,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl Progress {
    pub fn set_counts(&mut self, completed: u32, total: u32) {
        self.tasks_completed = completed;
        self.tasks_total = total;
        self.percentage = percentage(completed, total);
    }
}

pub fn percentage(completed: u32, total: u32) -> u32 {
    if total == 0 {
        0
    } else {
        (completed.min(total) * 100) / total
    }
}

/// The `orchestration` object: what the driver believes it is working on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Orchestration {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase: Option<SnapshotPhase>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step: Option<SnapshotStep>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress: Option<Progress>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

// ---------------------------------------------------------------------------
// Snapshot
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    #[serde(default = "default_schema_version")]
    pub schema_version: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub orchestration: Option<Orchestration>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

fn default_schema_version() -> u32 {
    SCHEMA_VERSION
}

impl Default for Snapshot {
    fn default() -> Self {
        Self {
            schema_version: SCHEMA_VERSION,
            orchestration: None,
            extra: BTreeMap::new(),
        }
    }
}

impl Snapshot {
    // -----------------------------------------------------------------------
    // Persistence
    // -----------------------------------------------------------------------

    /// `None` when the cache file does not exist or is not a snapshot object.
    /// Text that is not JSON at all is an error.
    pub fn load(path: &Path) -> Result<Option<Self>> {
        if !path.exists() {
            tracing::debug!(path = %path.display(), "no snapshot cache");
            return Ok(None);
        }
        let data = std::fs::read_to_string(path)?;
        match serde_json::from_str::<Snapshot>(&data) {
            Ok(snapshot) => Ok(Some(snapshot)),
            Err(e) if e.is_data() => {
                tracing::warn!(path = %path.display(), error = %e, "snapshot cache has an unexpected shape; ignoring it");
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }

    pub fn to_json(&self) -> Result<String> {
        let mut json = serde_json::to_string_pretty(self)?;
        json.push('\n');
        Ok(json)
    }

    /// Add this snapshot to `tx` as a JSON-validated write.
    pub fn stage(&self, tx: &mut Transaction, path: &Path) -> Result<()> {
        tx.write(path, self.to_json()?, Validation::Json);
        Ok(())
    }

    pub fn save(&self, root: &Path, path: &Path) -> Result<()> {
        let mut tx = Transaction::new(root);
        self.stage(&mut tx, path)?;
        tx.commit()?;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Accessors
    // -----------------------------------------------------------------------

    fn phase(&self) -> Option<&SnapshotPhase> {
        self.orchestration.as_ref()?.phase.as_ref()
    }

    fn step(&self) -> Option<&SnapshotStep> {
        self.orchestration.as_ref()?.step.as_ref()
    }

    pub fn progress(&self) -> Option<&Progress> {
        self.orchestration.as_ref()?.progress.as_ref()
    }

    pub fn phase_number(&self) -> Option<PhaseNumber> {
        self.phase().and_then(|p| known(&p.number))
    }

    pub fn phase_name(&self) -> Option<&str> {
        self.phase().and_then(|p| p.name.as_deref())
    }

    pub fn branch(&self) -> Option<&str> {
        self.phase().and_then(|p| p.branch.as_deref())
    }

    pub fn phase_status(&self) -> Option<PhaseStatus> {
        self.phase().and_then(|p| known(&p.status))
    }

    pub fn step_index(&self) -> Option<u32> {
        let step = self.step()?;
        known(&step.index).or_else(|| known(&step.current).map(WorkflowStep::index))
    }

    pub fn current_step(&self) -> Option<WorkflowStep> {
        let step = self.step()?;
        known(&step.current).or_else(|| known(&step.index).and_then(WorkflowStep::from_index))
    }

    fn orchestration_mut(&mut self) -> &mut Orchestration {
        self.orchestration.get_or_insert_with(Orchestration::default)
    }

    pub fn phase_mut(&mut self) -> &mut SnapshotPhase {
        self.orchestration_mut()
            .phase
            .get_or_insert_with(SnapshotPhase::default)
    }

    pub fn step_mut(&mut self) -> &mut SnapshotStep {
        self.orchestration_mut()
            .step
            .get_or_insert_with(SnapshotStep::default)
    }

    pub fn progress_mut(&mut self) -> &mut Progress {
        self.orchestration_mut()
            .progress
            .get_or_insert_with(Progress::default)
    }

    pub fn set_step(&mut self, step: WorkflowStep) {
        let s = self.step_mut();
        s.current = Some(Hint::Known(step));
        s.index = Some(Hint::Known(step.index()));
    }

    /// Apply a renumber mapping to the cached phase number and the branch
    /// prefix. Returns true if anything changed.
    pub fn apply_renumber(&mut self, mapping: &HashMap<PhaseNumber, PhaseNumber>) -> bool {
        let Some(old) = self.phase_number() else {
            return false;
        };
        let Some(new) = mapping.get(&old).copied().filter(|n| *n != old) else {
            return false;
        };
        let phase = self.phase_mut();
        phase.number = Some(Hint::Known(new));
        if let Some(branch) = phase.branch.as_mut() {
            let old_prefix = old.to_string();
            if let Some(rest) = branch.strip_prefix(old_prefix.as_str()) {
                *branch = format!("{new}{rest}");
            }
        }
        true
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
