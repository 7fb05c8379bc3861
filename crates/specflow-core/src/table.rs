//! Markdown table codec for the roadmap's phase and backlog tables.
//!
//! Rows that decode cleanly keep the exact source line they came from; as long
//! as the decoded value is not modified, rendering emits that line unchanged.
//! Rows that fail to decode are kept verbatim as [`Row::Malformed`] and
//! reported as [`ParseWarning`]s.

use crate::types::{PhaseNumber, PhaseStatus};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

pub const DATE_FORMAT: &str = "%Y-%m-%d";

// ---------------------------------------------------------------------------
// ParseWarning
// ---------------------------------------------------------------------------

/// A row-level problem. Never fatal: the row is skipped for reads and kept
/// verbatim for writes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParseWarning {
    /// 1-based line number in the source document.
    pub line: usize,
    pub content: String,
    pub reason: String,
}

// ---------------------------------------------------------------------------
// Tracked
// ---------------------------------------------------------------------------

/// A decoded value plus the source line it was decoded from.
#[derive(Debug, Clone, PartialEq)]
pub struct Tracked<T> {
    value: T,
    origin: Option<(T, String)>,
}

impl<T: Clone + PartialEq> Tracked<T> {
    pub fn new(value: T) -> Self {
        Self {
            value,
            origin: None,
        }
    }

    pub fn parsed(value: T, line: impl Into<String>) -> Self {
        Self {
            origin: Some((value.clone(), line.into())),
            value,
        }
    }

    pub fn get(&self) -> &T {
        &self.value
    }

    pub fn get_mut(&mut self) -> &mut T {
        &mut self.value
    }

    pub fn into_inner(self) -> T {
        self.value
    }

    /// The original line if the value is unchanged, else `canonical(value)`.
    pub fn render_with(&self, canonical: impl FnOnce(&T) -> String) -> String {
        match &self.origin {
            Some((orig, line)) if *orig == self.value => line.clone(),
            _ => canonical(&self.value),
        }
    }
}

// ---------------------------------------------------------------------------
// Cell helpers
// ---------------------------------------------------------------------------

/// Split a `| a | b |` line into trimmed cells. `\|` is a literal pipe.
pub fn split_cells(line: &str) -> Option<Vec<String>> {
    let trimmed = line.trim();
    if !trimmed.starts_with('|') || !trimmed.ends_with('|') || trimmed.len() < 2 {
        return None;
    }
    let inner = &trimmed[1..trimmed.len() - 1];
    let mut cells = Vec::new();
    let mut current = String::new();
    let mut chars = inner.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '\\' if chars.peek() == Some(&'|') => {
                current.push('|');
                chars.next();
            }
            '|' => {
                cells.push(current.trim().to_string());
                current.clear();
            }
            _ => current.push(c),
        }
    }
    cells.push(current.trim().to_string());
    Some(cells)
}

fn escape_cell(cell: &str) -> String {
    cell.replace('|', "\\|")
}

fn join_cells(cells: &[String]) -> String {
    let escaped: Vec<String> = cells.iter().map(|c| escape_cell(c)).collect();
    format!("| {} |", escaped.join(" | "))
}

pub fn is_table_line(line: &str) -> bool {
    line.trim_start().starts_with('|')
}

fn is_separator(cells: &[String]) -> bool {
    !cells.is_empty()
        && cells.iter().all(|c| {
            let c = c.trim_matches(':');
            !c.is_empty() && c.chars().all(|ch| ch == '-')
        })
}

// ---------------------------------------------------------------------------
// RowCodec
// ---------------------------------------------------------------------------

/// One table flavor: its header cells and how a row maps to a value.
pub trait RowCodec: Sized + Clone + PartialEq {
    const HEADER: &'static [&'static str];

    fn decode(cells: &[String]) -> Result<Self, String>;
    fn encode(&self) -> Vec<String>;

    fn canonical_line(&self) -> String {
        join_cells(&self.encode())
    }
}

/// True if `line` is this table's header row.
pub fn is_header<T: RowCodec>(line: &str) -> bool {
    match split_cells(line) {
        Some(cells) => {
            cells.len() == T::HEADER.len()
                && cells
                    .iter()
                    .zip(T::HEADER)
                    .all(|(c, h)| c.eq_ignore_ascii_case(h))
        }
        None => false,
    }
}

// ---------------------------------------------------------------------------
// Table
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub enum Row<T> {
    Record(Tracked<T>),
    Malformed(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Table<T> {
    /// Header and separator lines, verbatim.
    pub header: Vec<String>,
    pub rows: Vec<Row<T>>,
}

impl<T: RowCodec> Table<T> {
    pub fn empty() -> Self {
        let cells: Vec<String> = T::HEADER.iter().map(|h| h.to_string()).collect();
        let sep: Vec<String> = T::HEADER.iter().map(|h| "-".repeat(h.len() + 2)).collect();
        Self {
            header: vec![join_cells(&cells), format!("|{}|", sep.join("|"))],
            rows: Vec::new(),
        }
    }

    /// Parse a table starting at its header line. Consumes the header, an
    /// optional separator, and every following `|` line. Returns the table and
    /// the number of lines consumed.
    pub fn parse(lines: &[String], first_line_no: usize) -> (Self, usize, Vec<ParseWarning>) {
        let mut header = Vec::new();
        let mut warnings = Vec::new();
        let mut rows = Vec::new();
        let mut i = 0;

        if let Some(first) = lines.first() {
            header.push(first.clone());
            i = 1;
        }
        if let Some(sep) = lines.get(1) {
            if split_cells(sep).map(|c| is_separator(&c)).unwrap_or(false) {
                header.push(sep.clone());
                i = 2;
            }
        }

        while i < lines.len() && is_table_line(&lines[i]) {
            let line = &lines[i];
            let decoded = split_cells(line)
                .ok_or_else(|| "row is not closed with '|'".to_string())
                .and_then(|cells| T::decode(&cells));
            match decoded {
                Ok(value) => rows.push(Row::Record(Tracked::parsed(value, line.clone()))),
                Err(reason) => {
                    warnings.push(ParseWarning {
                        line: first_line_no + i,
                        content: line.clone(),
                        reason,
                    });
                    rows.push(Row::Malformed(line.clone()));
                }
            }
            i += 1;
        }

        (Self { header, rows }, i, warnings)
    }

    pub fn render(&self) -> Vec<String> {
        let mut out = self.header.clone();
        for row in &self.rows {
            match row {
                Row::Record(t) => out.push(t.render_with(|v| v.canonical_line())),
                Row::Malformed(line) => out.push(line.clone()),
            }
        }
        out
    }

    pub fn records(&self) -> impl Iterator<Item = &T> {
        self.rows.iter().filter_map(|r| match r {
            Row::Record(t) => Some(t.get()),
            Row::Malformed(_) => None,
        })
    }

    pub fn record_count(&self) -> usize {
        self.records().count()
    }

    pub fn malformed_count(&self) -> usize {
        self.rows
            .iter()
            .filter(|r| matches!(r, Row::Malformed(_)))
            .count()
    }

    pub fn position(&self, pred: impl Fn(&T) -> bool) -> Option<usize> {
        self.rows.iter().position(|r| match r {
            Row::Record(t) => pred(t.get()),
            Row::Malformed(_) => false,
        })
    }

    pub fn find_mut(&mut self, pred: impl Fn(&T) -> bool) -> Option<&mut T> {
        self.rows.iter_mut().find_map(|r| match r {
            Row::Record(t) if pred(t.get()) => Some(t.get_mut()),
            _ => None,
        })
    }

    pub fn remove_where(&mut self, pred: impl Fn(&T) -> bool) -> Option<T> {
        let idx = self.position(pred)?;
        match self.rows.remove(idx) {
            Row::Record(t) => Some(t.into_inner()),
            Row::Malformed(_) => None,
        }
    }

    pub fn push(&mut self, value: T) {
        self.rows.push(Row::Record(Tracked::new(value)));
    }

    /// Insert after the last record for which `before(existing)` holds, or
    /// before every record if none does.
    pub fn insert_after_last(&mut self, value: T, before: impl Fn(&T) -> bool) {
        let idx = self
            .rows
            .iter()
            .rposition(|r| matches!(r, Row::Record(t) if before(t.get())))
            .map(|i| i + 1)
            .or_else(|| {
                self.rows
                    .iter()
                    .position(|r| matches!(r, Row::Record(_)))
            })
            .unwrap_or(self.rows.len());
        self.rows.insert(idx, Row::Record(Tracked::new(value)));
    }

    pub fn retain(&mut self, keep: impl Fn(&T) -> bool) -> usize {
        let before = self.rows.len();
        self.rows.retain(|r| match r {
            Row::Record(t) => keep(t.get()),
            Row::Malformed(_) => true,
        });
        before - self.rows.len()
    }
}

// ---------------------------------------------------------------------------
// Phase rows
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhaseRow {
    pub number: PhaseNumber,
    pub name: String,
    pub status: PhaseStatus,
    pub gate: String,
}

impl RowCodec for PhaseRow {
    const HEADER: &'static [&'static str] = &["Phase", "Name", "Status", "Gate"];

    fn decode(cells: &[String]) -> Result<Self, String> {
        let [number, name, status, gate] = cells else {
            return Err(format!("expected 4 cells, found {}", cells.len()));
        };
        let number: PhaseNumber = number
            .parse()
            .map_err(|_| format!("phase key '{number}' is not 4 digits"))?;
        if name.is_empty() {
            return Err(format!("phase {number} has an empty name"));
        }
        let glyph = status.split_whitespace().next().unwrap_or("");
        let status = PhaseStatus::from_glyph(glyph)
            .ok_or_else(|| format!("unknown status glyph '{glyph}' for phase {number}"))?;
        Ok(PhaseRow {
            number,
            name: name.clone(),
            status,
            gate: gate.clone(),
        })
    }

    fn encode(&self) -> Vec<String> {
        vec![
            self.number.to_string(),
            self.name.clone(),
            format!("{} {}", self.status.glyph(), self.status.label()),
            self.gate.clone(),
        ]
    }
}

pub type PhaseTable = Table<PhaseRow>;

impl Table<PhaseRow> {
    pub fn numbers(&self) -> Vec<PhaseNumber> {
        self.records().map(|r| r.number).collect()
    }

    pub fn get(&self, number: PhaseNumber) -> Option<&PhaseRow> {
        self.records().find(|r| r.number == number)
    }

    pub fn get_mut(&mut self, number: PhaseNumber) -> Option<&mut PhaseRow> {
        self.find_mut(|r| r.number == number)
    }

    /// Insert keeping the table sorted: after the last row numbered below.
    pub fn insert_sorted(&mut self, row: PhaseRow) {
        let n = row.number;
        self.insert_after_last(row, |r| r.number < n);
    }

    pub fn is_strictly_increasing(&self) -> bool {
        let numbers = self.numbers();
        numbers.windows(2).all(|w| w[0] < w[1])
    }
}

// ---------------------------------------------------------------------------
// Backlog rows
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeferredRow {
    pub number: PhaseNumber,
    pub name: String,
    pub gate: String,
    pub deferred: NaiveDate,
    pub reason: String,
}

impl RowCodec for DeferredRow {
    const HEADER: &'static [&'static str] = &["Phase", "Name", "Gate", "Deferred", "Reason"];

    fn decode(cells: &[String]) -> Result<Self, String> {
        let [number, name, gate, deferred, reason] = cells else {
            return Err(format!("expected 5 cells, found {}", cells.len()));
        };
        let number: PhaseNumber = number
            .parse()
            .map_err(|_| format!("backlog key '{number}' is not 4 digits"))?;
        let deferred = NaiveDate::parse_from_str(deferred, DATE_FORMAT)
            .map_err(|_| format!("invalid deferred date '{deferred}' for phase {number}"))?;
        Ok(DeferredRow {
            number,
            name: name.clone(),
            gate: gate.clone(),
            deferred,
            reason: reason.clone(),
        })
    }

    fn encode(&self) -> Vec<String> {
        vec![
            self.number.to_string(),
            self.name.clone(),
            self.gate.clone(),
            self.deferred.format(DATE_FORMAT).to_string(),
            self.reason.clone(),
        ]
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NoteRow {
    pub text: String,
    pub priority: String,
    pub notes: String,
    pub added: NaiveDate,
}

impl RowCodec for NoteRow {
    const HEADER: &'static [&'static str] = &["Item", "Priority", "Notes", "Added"];

    fn decode(cells: &[String]) -> Result<Self, String> {
        let [text, priority, notes, added] = cells else {
            return Err(format!("expected 4 cells, found {}", cells.len()));
        };
        if text.is_empty() {
            return Err("backlog note has no text".to_string());
        }
        let added = NaiveDate::parse_from_str(added, DATE_FORMAT)
            .map_err(|_| format!("invalid added date '{added}'"))?;
        Ok(NoteRow {
            text: text.clone(),
            priority: priority.clone(),
            notes: notes.clone(),
            added,
        })
    }

    fn encode(&self) -> Vec<String> {
        vec![
            self.text.clone(),
            self.priority.clone(),
            self.notes.clone(),
            self.added.format(DATE_FORMAT).to_string(),
        ]
    }
}

// ---------------------------------------------------------------------------
// Document-level convenience
// ---------------------------------------------------------------------------

/// Find the phase table in a document and decode it.
pub fn parse_phase_table(doc: &str) -> Option<(PhaseTable, Vec<ParseWarning>)> {
    let lines: Vec<String> = doc.lines().map(str::to_string).collect();
    let start = lines.iter().position(|l| is_header::<PhaseRow>(l))?;
    let (table, _, warnings) = PhaseTable::parse(&lines[start..], start + 1);
    Some((table, warnings))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn lines(s: &str) -> Vec<String> {
        s.lines().map(str::to_string).collect()
    }

    const TABLE: &str = "\
| Phase | Name | Status | Gate |
|-------|------|--------|------|
| 0010 | Core setup | ✅ Complete | Tests pass |
|  0020 |   API  | 🔄 In Progress | Endpoints documented |
| 0030 | UI \\| polish | ⬜ Not Started |  |";

    #[test]
    fn round_trip_is_byte_identical() {
        let src = lines(TABLE);
        let (table, consumed, warnings) = PhaseTable::parse(&src, 1);
        assert_eq!(consumed, 5);
        assert!(warnings.is_empty());
        assert_eq!(table.render(), src);
    }

    #[test]
    fn parses_records() {
        let (table, _, _) = PhaseTable::parse(&lines(TABLE), 1);
        let rows: Vec<&PhaseRow> = table.records().collect();
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[1].name, "API");
        assert_eq!(rows[1].status, PhaseStatus::InProgress);
        assert_eq!(rows[2].name, "UI | polish");
        assert_eq!(rows[2].gate, "");
    }

    #[test]
    fn malformed_rows_are_warnings_and_kept() {
        let src = lines(
            "| Phase | Name | Status | Gate |\n|---|---|---|---|\n| 0010 | A | ✅ | g |\n| 010 | Legacy | ⬜ | g |\n| 0030 | Odd | ❓ Unknown | g |",
        );
        let (table, _, warnings) = PhaseTable::parse(&src, 1);
        assert_eq!(table.record_count(), 1);
        assert_eq!(table.malformed_count(), 2);
        assert_eq!(warnings.len(), 2);
        assert_eq!(warnings[0].line, 4);
        assert!(warnings[1].reason.contains("unknown status glyph"));
        assert_eq!(table.render(), src);
    }

    #[test]
    fn modified_row_renders_canonically() {
        let (mut table, _, _) = PhaseTable::parse(&lines(TABLE), 1);
        let n: PhaseNumber = "0020".parse().unwrap();
        table.get_mut(n).unwrap().status = PhaseStatus::Complete;
        let out = table.render();
        assert_eq!(out[3], "| 0020 | API | ✅ Complete | Endpoints documented |");
        // untouched rows keep their bytes
        assert_eq!(out[2], lines(TABLE)[2]);
    }

    #[test]
    fn insert_sorted_keeps_order() {
        let (mut table, _, _) = PhaseTable::parse(&lines(TABLE), 1);
        table.insert_sorted(PhaseRow {
            number: "0021".parse().unwrap(),
            name: "Hotfix".to_string(),
            status: PhaseStatus::NotStarted,
            gate: String::new(),
        });
        table.insert_sorted(PhaseRow {
            number: "0005".parse().unwrap(),
            name: "Prelude".to_string(),
            status: PhaseStatus::NotStarted,
            gate: String::new(),
        });
        let numbers: Vec<String> = table.numbers().iter().map(|n| n.to_string()).collect();
        assert_eq!(numbers, ["0005", "0010", "0020", "0021", "0030"]);
        assert!(table.is_strictly_increasing());
    }

    #[test]
    fn empty_table_header_matches_codec() {
        let table = PhaseTable::empty();
        assert!(is_header::<PhaseRow>(&table.header[0]));
        assert_eq!(table.header[1], "|-------|------|--------|------|");
    }

    #[test]
    fn deferred_and_note_rows_decode() {
        let deferred = split_cells("| 0040 | Search | Index built | 2026-01-02 | later |").unwrap();
        let row = DeferredRow::decode(&deferred).unwrap();
        assert_eq!(row.number.to_string(), "0040");
        assert_eq!(row.deferred.to_string(), "2026-01-02");

        let note = split_cells("| Dark mode | low | ask design | 2026-03-04 |").unwrap();
        let row = NoteRow::decode(&note).unwrap();
        assert_eq!(row.priority, "low");
        assert!(NoteRow::decode(&split_cells("|  | low | x | 2026-03-04 |").unwrap()).is_err());
    }

    #[test]
    fn parse_phase_table_from_document() {
        let doc = format!("# Roadmap\n\nIntro text.\n\n{TABLE}\n\n### 0010 - Core setup\n");
        let (table, warnings) = parse_phase_table(&doc).unwrap();
        assert!(warnings.is_empty());
        assert_eq!(table.record_count(), 3);
    }
}
