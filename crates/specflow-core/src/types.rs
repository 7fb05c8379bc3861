use crate::error::{Result, SpecflowError};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

// ---------------------------------------------------------------------------
// PhaseNumber
// ---------------------------------------------------------------------------

/// Digits in a rendered phase number.
pub const NUMBER_WIDTH: usize = 4;
/// Digits used by roadmaps written before the insert slot existed.
pub const LEGACY_WIDTH: usize = 3;

const MAX_NUMBER: u16 = 9999;

/// A phase key rendered as four digits `ABBC`: milestone, phase within the
/// milestone, insert slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PhaseNumber(u16);

impl PhaseNumber {
    pub fn new(value: u32) -> Result<Self> {
        if value > MAX_NUMBER as u32 {
            return Err(SpecflowError::InvalidPhaseNumber(value.to_string()));
        }
        Ok(Self(value as u16))
    }

    pub fn value(self) -> u16 {
        self.0
    }

    /// The first three digits.
    pub fn decade(self) -> u16 {
        self.0 / 10
    }

    /// The insert slot (last digit). `0` is the primary phase of a decade.
    pub fn slot(self) -> u16 {
        self.0 % 10
    }

    pub fn is_primary(self) -> bool {
        self.slot() == 0
    }
}

impl fmt::Display for PhaseNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:0width$}", self.0, width = NUMBER_WIDTH)
    }
}

impl std::str::FromStr for PhaseNumber {
    type Err = SpecflowError;

    /// Strict parse: exactly four ASCII digits.
    fn from_str(s: &str) -> Result<Self> {
        if s.len() != NUMBER_WIDTH || !s.bytes().all(|b| b.is_ascii_digit()) {
            return Err(SpecflowError::InvalidPhaseNumber(s.to_string()));
        }
        let value: u32 = s
            .parse()
            .map_err(|_| SpecflowError::InvalidPhaseNumber(s.to_string()))?;
        Self::new(value)
    }
}

impl TryFrom<String> for PhaseNumber {
    type Error = SpecflowError;

    fn try_from(s: String) -> Result<Self> {
        s.parse()
    }
}

impl From<PhaseNumber> for String {
    fn from(n: PhaseNumber) -> Self {
        n.to_string()
    }
}

// ---------------------------------------------------------------------------
// Key matching
// ---------------------------------------------------------------------------

/// How a textual key resolved to a phase number.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyMatch {
    /// The token already had the full width.
    Exact(PhaseNumber),
    /// A legacy three-digit token widened once by appending a zero.
    Widened(PhaseNumber),
}

impl KeyMatch {
    pub fn number(self) -> PhaseNumber {
        match self {
            KeyMatch::Exact(n) | KeyMatch::Widened(n) => n,
        }
    }

    pub fn is_exact(self) -> bool {
        matches!(self, KeyMatch::Exact(_))
    }
}

/// Resolve a key token (user input, section header, file name prefix).
///
/// Full-width tokens match exactly. Legacy-width tokens get exactly one
/// widening step. Anything narrower would need a second transform and is
/// rejected as ambiguous.
pub fn match_key(token: &str) -> Result<KeyMatch> {
    if token.is_empty() || !token.bytes().all(|b| b.is_ascii_digit()) {
        return Err(SpecflowError::InvalidPhaseNumber(token.to_string()));
    }
    match token.len() {
        NUMBER_WIDTH => Ok(KeyMatch::Exact(token.parse()?)),
        LEGACY_WIDTH => {
            let widened = format!("{token}0");
            Ok(KeyMatch::Widened(widened.parse()?))
        }
        n if n < LEGACY_WIDTH => Err(SpecflowError::AmbiguousMatch(token.to_string())),
        _ => Err(SpecflowError::InvalidPhaseNumber(token.to_string())),
    }
}

/// Resolve a user-supplied key to a phase number, applying at most one widening.
pub fn resolve_key(token: &str) -> Result<PhaseNumber> {
    match_key(token.trim()).map(KeyMatch::number)
}

// ---------------------------------------------------------------------------
// PhaseStatus
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PhaseStatus {
    NotStarted,
    InProgress,
    AwaitingUser,
    Complete,
}

impl PhaseStatus {
    pub fn all() -> &'static [PhaseStatus] {
        &[
            PhaseStatus::NotStarted,
            PhaseStatus::InProgress,
            PhaseStatus::AwaitingUser,
            PhaseStatus::Complete,
        ]
    }

    pub fn glyph(self) -> &'static str {
        match self {
            PhaseStatus::NotStarted => "⬜",
            PhaseStatus::InProgress => "🔄",
            PhaseStatus::AwaitingUser => "⏳",
            PhaseStatus::Complete => "✅",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            PhaseStatus::NotStarted => "Not Started",
            PhaseStatus::InProgress => "In Progress",
            PhaseStatus::AwaitingUser => "Awaiting User",
            PhaseStatus::Complete => "Complete",
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            PhaseStatus::NotStarted => "not_started",
            PhaseStatus::InProgress => "in_progress",
            PhaseStatus::AwaitingUser => "awaiting_user",
            PhaseStatus::Complete => "complete",
        }
    }

    pub fn from_glyph(glyph: &str) -> Option<PhaseStatus> {
        PhaseStatus::all()
            .iter()
            .copied()
            .find(|s| s.glyph() == glyph)
    }

    /// In-progress and awaiting-user both mean "work is in flight".
    pub fn is_active(self) -> bool {
        matches!(self, PhaseStatus::InProgress | PhaseStatus::AwaitingUser)
    }
}

impl fmt::Display for PhaseStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for PhaseStatus {
    type Err = SpecflowError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "not_started" | "pending" => Ok(PhaseStatus::NotStarted),
            "in_progress" => Ok(PhaseStatus::InProgress),
            "awaiting_user" => Ok(PhaseStatus::AwaitingUser),
            "complete" | "completed" => Ok(PhaseStatus::Complete),
            _ => PhaseStatus::from_glyph(s.trim())
                .ok_or_else(|| SpecflowError::InvalidStatus(s.to_string())),
        }
    }
}

// ---------------------------------------------------------------------------
// WorkflowStep
// ---------------------------------------------------------------------------

/// Steps inside one phase, in their fixed monotonic order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStep {
    Specify,
    Plan,
    Tasks,
    Implement,
    Verify,
}

impl WorkflowStep {
    pub fn all() -> &'static [WorkflowStep] {
        &[
            WorkflowStep::Specify,
            WorkflowStep::Plan,
            WorkflowStep::Tasks,
            WorkflowStep::Implement,
            WorkflowStep::Verify,
        ]
    }

    pub fn index(self) -> u32 {
        self as u32
    }

    pub fn from_index(index: u32) -> Option<WorkflowStep> {
        WorkflowStep::all().get(index as usize).copied()
    }

    pub fn as_str(self) -> &'static str {
        match self {
            WorkflowStep::Specify => "specify",
            WorkflowStep::Plan => "plan",
            WorkflowStep::Tasks => "tasks",
            WorkflowStep::Implement => "implement",
            WorkflowStep::Verify => "verify",
        }
    }
}

impl fmt::Display for WorkflowStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for WorkflowStep {
    type Err = SpecflowError;

    fn from_str(s: &str) -> Result<Self> {
        WorkflowStep::all()
            .iter()
            .copied()
            .find(|step| step.as_str() == s.trim())
            .ok_or_else(|| SpecflowError::InvalidStatus(s.to_string()))
    }
}

// ---------------------------------------------------------------------------
// Records
// ---------------------------------------------------------------------------

/// Where a phase's detail block lives.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DetailRef {
    Inline,
    File { path: PathBuf },
    None,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhaseRecord {
    pub number: PhaseNumber,
    pub name: String,
    pub status: PhaseStatus,
    pub gate: String,
    pub detail: DetailRef,
}

impl PhaseRecord {
    pub fn new(number: PhaseNumber, name: impl Into<String>, gate: impl Into<String>) -> Self {
        Self {
            number,
            name: name.into(),
            status: PhaseStatus::NotStarted,
            gate: gate.into(),
            detail: DetailRef::None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BacklogEntry {
    DeferredPhase {
        original_number: PhaseNumber,
        name: String,
        gate: String,
        deferred_date: NaiveDate,
        reason: String,
    },
    Note {
        text: String,
        priority: String,
        notes: String,
        added_date: NaiveDate,
    },
}

impl BacklogEntry {
    pub fn number(&self) -> Option<PhaseNumber> {
        match self {
            BacklogEntry::DeferredPhase {
                original_number, ..
            } => Some(*original_number),
            BacklogEntry::Note { .. } => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn phase_number_renders_four_digits() {
        let n = PhaseNumber::new(25).unwrap();
        assert_eq!(n.to_string(), "0025");
        assert_eq!(n.decade(), 2);
        assert_eq!(n.slot(), 5);
        assert!(!n.is_primary());
    }

    #[test]
    fn phase_number_strict_parse() {
        assert!("0040".parse::<PhaseNumber>().is_ok());
        assert!("040".parse::<PhaseNumber>().is_err());
        assert!("00400".parse::<PhaseNumber>().is_err());
        assert!("00a0".parse::<PhaseNumber>().is_err());
        assert!(PhaseNumber::new(10_000).is_err());
    }

    #[test]
    fn key_matching_widens_once() {
        assert_eq!(
            match_key("0040").unwrap(),
            KeyMatch::Exact("0040".parse().unwrap())
        );
        assert_eq!(
            match_key("004").unwrap(),
            KeyMatch::Widened("0040".parse().unwrap())
        );
        assert!(matches!(
            match_key("04"),
            Err(SpecflowError::AmbiguousMatch(_))
        ));
        assert!(matches!(
            match_key("40"),
            Err(SpecflowError::AmbiguousMatch(_))
        ));
    }

    #[test]
    fn status_glyphs_are_bijective() {
        for status in PhaseStatus::all() {
            assert_eq!(PhaseStatus::from_glyph(status.glyph()), Some(*status));
        }
        assert_eq!(PhaseStatus::from_glyph("❓"), None);
    }

    #[test]
    fn status_from_str_accepts_names_and_glyphs() {
        assert_eq!(
            "in-progress".parse::<PhaseStatus>().unwrap(),
            PhaseStatus::InProgress
        );
        assert_eq!("✅".parse::<PhaseStatus>().unwrap(), PhaseStatus::Complete);
        assert!("finished-ish".parse::<PhaseStatus>().is_err());
    }

    #[test]
    fn workflow_step_indices() {
        assert_eq!(WorkflowStep::Specify.index(), 0);
        assert_eq!(WorkflowStep::Verify.index(), 4);
        assert_eq!(WorkflowStep::from_index(2), Some(WorkflowStep::Tasks));
        assert_eq!(WorkflowStep::from_index(9), None);
    }

    #[test]
    fn phase_number_serde_as_string() {
        let n: PhaseNumber = "0120".parse().unwrap();
        let json = serde_json::to_string(&n).unwrap();
        assert_eq!(json, "\"0120\"");
        let back: PhaseNumber = serde_json::from_str(&json).unwrap();
        assert_eq!(back, n);
    }
}
