//! The roadmap document as an ordered list of typed blocks.
//!
//! Everything the registry does not understand is kept as opaque text lines,
//! so `Roadmap::parse(doc).render() == doc` for any input.

use crate::section::{self, header_level, is_horizontal_rule, parse_section_header};
use crate::table::{
    is_header, DeferredRow, NoteRow, ParseWarning, PhaseRow, PhaseTable, Row, Table, Tracked,
};
use crate::types::{match_key, BacklogEntry, DetailRef, PhaseNumber, PhaseRecord};
use std::collections::HashSet;

// ---------------------------------------------------------------------------
// Sections
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SectionHeader {
    pub number: PhaseNumber,
    pub name: String,
}

/// A `### <number> - <name>` block: header plus every line up to the next
/// header of level ≤ 3 or a horizontal rule.
#[derive(Debug, Clone, PartialEq)]
pub struct Section {
    header: Tracked<SectionHeader>,
    /// False when the header used the legacy three-digit width.
    exact: bool,
    pub body: Vec<String>,
}

impl Section {
    pub fn new(number: PhaseNumber, name: impl Into<String>, body: Vec<String>) -> Self {
        Self {
            header: Tracked::new(SectionHeader {
                number,
                name: name.into(),
            }),
            exact: true,
            body,
        }
    }

    /// Build from extracted lines (header first). `None` if the first line is
    /// not a resolvable section header.
    pub fn from_lines(lines: &[String]) -> Option<Self> {
        let first = lines.first()?;
        let (token, name) = parse_section_header(first)?;
        let m = match_key(&token).ok()?;
        Some(Self {
            header: Tracked::parsed(
                SectionHeader {
                    number: m.number(),
                    name,
                },
                first.clone(),
            ),
            exact: m.is_exact(),
            body: lines[1..].to_vec(),
        })
    }

    pub fn number(&self) -> PhaseNumber {
        self.header.get().number
    }

    pub fn name(&self) -> &str {
        &self.header.get().name
    }

    pub fn is_legacy_width(&self) -> bool {
        !self.exact
    }

    pub fn set_number(&mut self, number: PhaseNumber) {
        self.header.get_mut().number = number;
        self.exact = true;
    }

    /// Force the canonical header rendering (drops the legacy spelling).
    pub fn canonicalize(&mut self) {
        let value = self.header.get().clone();
        self.header = Tracked::new(value);
        self.exact = true;
    }

    pub fn lines(&self) -> Vec<String> {
        let mut out = vec![self
            .header
            .render_with(|h| section::section_header_line(h.number, &h.name))];
        out.extend(self.body.iter().cloned());
        out
    }
}

// ---------------------------------------------------------------------------
// Backlog
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub enum BacklogBlock {
    Text(String),
    Deferred(Table<DeferredRow>),
    Notes(Table<NoteRow>),
    Section(Section),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Backlog {
    pub header: String,
    pub blocks: Vec<BacklogBlock>,
}

impl Backlog {
    fn empty() -> Self {
        Self {
            header: "## Backlog".to_string(),
            blocks: vec![BacklogBlock::Text(String::new())],
        }
    }

    pub fn deferred(&self) -> Option<&Table<DeferredRow>> {
        self.blocks.iter().find_map(|b| match b {
            BacklogBlock::Deferred(t) => Some(t),
            _ => None,
        })
    }

    pub fn notes(&self) -> Option<&Table<NoteRow>> {
        self.blocks.iter().find_map(|b| match b {
            BacklogBlock::Notes(t) => Some(t),
            _ => None,
        })
    }

    /// Insert a table block at `at`, padded with blank lines on either side
    /// where needed. Returns the table's index.
    fn insert_table(&mut self, at: usize, table: BacklogBlock) -> usize {
        let blank = |b: Option<&BacklogBlock>| matches!(b, Some(BacklogBlock::Text(t)) if t.trim().is_empty());
        let mut at = at;
        if at > 0 && !blank(self.blocks.get(at - 1)) {
            self.blocks.insert(at, BacklogBlock::Text(String::new()));
            at += 1;
        }
        self.blocks.insert(at, table);
        if at + 1 < self.blocks.len() && !blank(self.blocks.get(at + 1)) {
            self.blocks.insert(at + 1, BacklogBlock::Text(String::new()));
        }
        at
    }

    /// The deferred-phase table, created at the top of the backlog if missing.
    pub fn deferred_mut(&mut self) -> &mut Table<DeferredRow> {
        let idx = match self
            .blocks
            .iter()
            .position(|b| matches!(b, BacklogBlock::Deferred(_)))
        {
            Some(i) => i,
            None => {
                let at = usize::from(matches!(self.blocks.first(), Some(BacklogBlock::Text(t)) if t.trim().is_empty()));
                self.insert_table(at, BacklogBlock::Deferred(Table::empty()))
            }
        };
        match &mut self.blocks[idx] {
            BacklogBlock::Deferred(t) => t,
            _ => unreachable!("block {idx} is the deferred table"),
        }
    }

    /// The notes table, created before any backlog section if missing.
    pub fn notes_mut(&mut self) -> &mut Table<NoteRow> {
        let idx = match self
            .blocks
            .iter()
            .position(|b| matches!(b, BacklogBlock::Notes(_)))
        {
            Some(i) => i,
            None => {
                let at = self
                    .blocks
                    .iter()
                    .position(|b| matches!(b, BacklogBlock::Section(_)))
                    .unwrap_or(self.blocks.len());
                self.insert_table(at, BacklogBlock::Notes(Table::empty()))
            }
        };
        match &mut self.blocks[idx] {
            BacklogBlock::Notes(t) => t,
            _ => unreachable!("block {idx} is the notes table"),
        }
    }

    pub fn sections(&self) -> impl Iterator<Item = &Section> {
        self.blocks.iter().filter_map(|b| match b {
            BacklogBlock::Section(s) => Some(s),
            _ => None,
        })
    }

    pub fn take_section(&mut self, number: PhaseNumber) -> Option<Section> {
        let idx = pick_section(
            self.blocks.iter().enumerate().filter_map(|(i, b)| match b {
                BacklogBlock::Section(s) => Some((i, s)),
                _ => None,
            }),
            number,
        )?;
        match self.blocks.remove(idx) {
            BacklogBlock::Section(s) => Some(s),
            _ => None,
        }
    }

    /// Backlog sections are kept sorted by number at the end of the backlog.
    pub fn insert_section(&mut self, section: Section) {
        let n = section.number();
        let idx = self
            .blocks
            .iter()
            .position(|b| matches!(b, BacklogBlock::Section(s) if s.number() > n))
            .unwrap_or(self.blocks.len());
        let idx = ensure_blank_before(
            &mut self.blocks,
            idx,
            |b| match b {
                BacklogBlock::Text(t) => t.trim().is_empty(),
                BacklogBlock::Section(s) => ends_blank(s),
                BacklogBlock::Deferred(_) | BacklogBlock::Notes(_) => false,
            },
            || BacklogBlock::Text(String::new()),
        );
        self.blocks.insert(idx, BacklogBlock::Section(section));
    }

    pub fn entries(&self) -> Vec<BacklogEntry> {
        let mut out = Vec::new();
        if let Some(t) = self.deferred() {
            out.extend(t.records().map(|r| BacklogEntry::DeferredPhase {
                original_number: r.number,
                name: r.name.clone(),
                gate: r.gate.clone(),
                deferred_date: r.deferred,
                reason: r.reason.clone(),
            }));
        }
        if let Some(t) = self.notes() {
            out.extend(t.records().map(|r| BacklogEntry::Note {
                text: r.text.clone(),
                priority: r.priority.clone(),
                notes: r.notes.clone(),
                added_date: r.added,
            }));
        }
        out
    }

    fn lines(&self) -> Vec<String> {
        let mut out = vec![self.header.clone()];
        for block in &self.blocks {
            match block {
                BacklogBlock::Text(t) => out.push(t.clone()),
                BacklogBlock::Deferred(t) => out.extend(t.render()),
                BacklogBlock::Notes(t) => out.extend(t.render()),
                BacklogBlock::Section(s) => out.extend(s.lines()),
            }
        }
        out
    }
}

/// Make sure the element before `idx` satisfies `is_blank`, inserting a blank
/// element if not. Returns the index to insert at afterwards.
fn ensure_blank_before<T>(
    blocks: &mut Vec<T>,
    idx: usize,
    is_blank: impl Fn(&T) -> bool,
    blank: impl FnOnce() -> T,
) -> usize {
    if idx == 0 || is_blank(&blocks[idx - 1]) {
        return idx;
    }
    blocks.insert(idx, blank());
    idx + 1
}

fn ends_blank(section: &Section) -> bool {
    section
        .body
        .last()
        .map(|l| l.trim().is_empty())
        .unwrap_or(false)
}

fn pick_section<'a>(
    candidates: impl Iterator<Item = (usize, &'a Section)>,
    number: PhaseNumber,
) -> Option<usize> {
    let mut widened = None;
    for (i, s) in candidates {
        if s.number() != number {
            continue;
        }
        if s.exact {
            return Some(i);
        }
        widened.get_or_insert(i);
    }
    widened
}

// ---------------------------------------------------------------------------
// Roadmap
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub enum Block {
    Text(String),
    Table(PhaseTable),
    Section(Section),
    Backlog(Backlog),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Roadmap {
    pub blocks: Vec<Block>,
    trailing_newline: bool,
    pub warnings: Vec<ParseWarning>,
}

fn is_backlog_header(line: &str) -> bool {
    header_level(line) == Some(2) && line[2..].trim().eq_ignore_ascii_case("backlog")
}

impl Roadmap {
    pub fn parse(doc: &str) -> Self {
        let lines: Vec<String> = doc.lines().map(str::to_string).collect();
        let mut blocks = Vec::new();
        let mut warnings = Vec::new();
        let mut have_table = false;
        let mut i = 0;

        while i < lines.len() {
            let line = &lines[i];
            if is_backlog_header(line) {
                let (backlog, consumed, mut w) = parse_backlog(&lines, i);
                warnings.append(&mut w);
                blocks.push(Block::Backlog(backlog));
                i += consumed;
            } else if !have_table && is_header::<PhaseRow>(line) {
                let (table, consumed, mut w) = PhaseTable::parse(&lines[i..], i + 1);
                warnings.append(&mut w);
                blocks.push(Block::Table(table));
                have_table = true;
                i += consumed;
            } else if let Some(section) = Section::from_lines(&lines[i..=i]) {
                let end = section::section_end(&lines, i);
                let mut section = section;
                section.body = lines[i + 1..end].to_vec();
                blocks.push(Block::Section(section));
                i = end;
            } else {
                if let Some((token, _)) = parse_section_header(line) {
                    warnings.push(ParseWarning {
                        line: i + 1,
                        content: line.clone(),
                        reason: format!("section key '{token}' does not resolve to a phase number"),
                    });
                }
                blocks.push(Block::Text(line.clone()));
                i += 1;
            }
        }

        Self {
            blocks,
            trailing_newline: doc.ends_with('\n'),
            warnings,
        }
    }

    pub fn render(&self) -> String {
        let mut lines: Vec<String> = Vec::new();
        for block in &self.blocks {
            match block {
                Block::Text(t) => lines.push(t.clone()),
                Block::Table(t) => lines.extend(t.render()),
                Block::Section(s) => lines.extend(s.lines()),
                Block::Backlog(b) => lines.extend(b.lines()),
            }
        }
        let mut out = lines.join("\n");
        if self.trailing_newline && !out.is_empty() {
            out.push('\n');
        }
        out
    }

    /// Skeleton document for `specflow init`.
    pub fn skeleton(title: &str) -> Self {
        let mut doc = format!("# {title} Roadmap\n\n");
        for line in PhaseTable::empty().render() {
            doc.push_str(&line);
            doc.push('\n');
        }
        doc.push_str("\n---\n");
        Self::parse(&doc)
    }

    // -- Active table ---------------------------------------------------------

    pub fn table(&self) -> Option<&PhaseTable> {
        self.blocks.iter().find_map(|b| match b {
            Block::Table(t) => Some(t),
            _ => None,
        })
    }

    /// The active table, created after the first title line if missing.
    pub fn table_mut(&mut self) -> &mut PhaseTable {
        let idx = match self.blocks.iter().position(|b| matches!(b, Block::Table(_))) {
            Some(i) => i,
            None => {
                let at = self
                    .blocks
                    .iter()
                    .position(|b| matches!(b, Block::Text(t) if header_level(t) == Some(1)))
                    .map(|i| i + 1)
                    .unwrap_or(0);
                self.blocks.insert(at, Block::Text(String::new()));
                self.blocks.insert(at + 1, Block::Table(PhaseTable::empty()));
                self.blocks.insert(at + 2, Block::Text(String::new()));
                at + 1
            }
        };
        match &mut self.blocks[idx] {
            Block::Table(t) => t,
            _ => unreachable!("block {idx} is the phase table"),
        }
    }

    pub fn rows(&self) -> Vec<&PhaseRow> {
        self.table().map(|t| t.records().collect()).unwrap_or_default()
    }

    pub fn row(&self, number: PhaseNumber) -> Option<&PhaseRow> {
        self.table().and_then(|t| t.get(number))
    }

    /// Records in table order. Detail is `Inline` when an active section
    /// exists, else `None`; file-backed detail is resolved by the registry.
    pub fn records(&self) -> Vec<PhaseRecord> {
        self.rows()
            .into_iter()
            .map(|r| PhaseRecord {
                number: r.number,
                name: r.name.clone(),
                status: r.status,
                gate: r.gate.clone(),
                detail: if self.section(r.number).is_some() {
                    DetailRef::Inline
                } else {
                    DetailRef::None
                },
            })
            .collect()
    }

    // -- Active sections ------------------------------------------------------

    pub fn sections(&self) -> impl Iterator<Item = &Section> {
        self.blocks.iter().filter_map(|b| match b {
            Block::Section(s) => Some(s),
            _ => None,
        })
    }

    pub fn sections_mut(&mut self) -> impl Iterator<Item = &mut Section> {
        self.blocks.iter_mut().filter_map(|b| match b {
            Block::Section(s) => Some(s),
            _ => None,
        })
    }

    fn section_index(&self, number: PhaseNumber) -> Option<usize> {
        pick_section(
            self.blocks.iter().enumerate().filter_map(|(i, b)| match b {
                Block::Section(s) => Some((i, s)),
                _ => None,
            }),
            number,
        )
    }

    pub fn section(&self, number: PhaseNumber) -> Option<&Section> {
        match self.blocks.get(self.section_index(number)?) {
            Some(Block::Section(s)) => Some(s),
            _ => None,
        }
    }

    pub fn section_mut(&mut self, number: PhaseNumber) -> Option<&mut Section> {
        let idx = self.section_index(number)?;
        match self.blocks.get_mut(idx) {
            Some(Block::Section(s)) => Some(s),
            _ => None,
        }
    }

    pub fn take_section(&mut self, number: PhaseNumber) -> Option<Section> {
        let idx = self.section_index(number)?;
        match self.blocks.remove(idx) {
            Block::Section(s) => Some(s),
            _ => None,
        }
    }

    /// Place a section after the nearest active section numbered below it;
    /// failing that, before the nearest one numbered above; failing that, at
    /// the end of the active area (before the backlog).
    pub fn insert_section(&mut self, section: Section) {
        let n = section.number();
        let after_lower = self
            .blocks
            .iter()
            .rposition(|b| matches!(b, Block::Section(s) if s.number() < n))
            .map(|i| i + 1);
        let before_higher = || {
            self.blocks
                .iter()
                .position(|b| matches!(b, Block::Section(s) if s.number() > n))
        };
        let idx = match after_lower.or_else(before_higher) {
            Some(idx) => idx,
            None => self.end_of_active_area(),
        };
        let idx = ensure_blank_before(
            &mut self.blocks,
            idx,
            |b| match b {
                Block::Text(t) => t.trim().is_empty() || is_horizontal_rule(t),
                Block::Section(s) => ends_blank(s),
                Block::Table(_) | Block::Backlog(_) => false,
            },
            || Block::Text(String::new()),
        );
        self.blocks.insert(idx, Block::Section(section));
    }

    /// Index just past the active content: before the backlog and before the
    /// horizontal rule that precedes it, or the end of the document.
    fn end_of_active_area(&self) -> usize {
        let mut idx = self
            .blocks
            .iter()
            .position(|b| matches!(b, Block::Backlog(_)))
            .unwrap_or(self.blocks.len());
        while idx > 0 {
            match &self.blocks[idx - 1] {
                Block::Text(t) if t.trim().is_empty() || is_horizontal_rule(t) => idx -= 1,
                _ => break,
            }
        }
        idx
    }

    // -- Backlog --------------------------------------------------------------

    pub fn backlog(&self) -> Option<&Backlog> {
        self.blocks.iter().find_map(|b| match b {
            Block::Backlog(b) => Some(b),
            _ => None,
        })
    }

    /// The backlog, appended at the end of the document if missing.
    pub fn backlog_mut(&mut self) -> &mut Backlog {
        let idx = match self.blocks.iter().position(|b| matches!(b, Block::Backlog(_))) {
            Some(i) => i,
            None => {
                if !matches!(self.blocks.last(), Some(Block::Text(t)) if t.trim().is_empty()) {
                    self.blocks.push(Block::Text(String::new()));
                }
                self.blocks.push(Block::Backlog(Backlog::empty()));
                self.trailing_newline = true;
                self.blocks.len() - 1
            }
        };
        match &mut self.blocks[idx] {
            Block::Backlog(b) => b,
            _ => unreachable!("block {idx} is the backlog"),
        }
    }

    pub fn backlog_entries(&self) -> Vec<BacklogEntry> {
        self.backlog().map(Backlog::entries).unwrap_or_default()
    }

    pub fn deferred_row(&self, number: PhaseNumber) -> Option<&DeferredRow> {
        self.backlog()
            .and_then(|b| b.deferred())
            .and_then(|t| t.records().find(|r| r.number == number))
    }

    // -- Invariants -----------------------------------------------------------

    /// Every number held by the active table or the backlog.
    pub fn used_numbers(&self) -> Vec<PhaseNumber> {
        let mut used: Vec<PhaseNumber> = self.rows().iter().map(|r| r.number).collect();
        if let Some(t) = self.backlog().and_then(|b| b.deferred()) {
            used.extend(t.records().map(|r| r.number));
        }
        used.sort();
        used
    }

    pub fn well_formed_rows(&self) -> usize {
        self.table().map(|t| t.record_count()).unwrap_or(0)
    }

    /// Reorder table records and active sections into ascending number order
    /// without moving any other line.
    pub fn normalize_order(&mut self) {
        if let Some(Block::Table(table)) = self
            .blocks
            .iter_mut()
            .find(|b| matches!(b, Block::Table(_)))
        {
            let slots: Vec<usize> = table
                .rows
                .iter()
                .enumerate()
                .filter(|(_, r)| matches!(r, Row::Record(_)))
                .map(|(i, _)| i)
                .collect();
            let mut records: Vec<Row<PhaseRow>> = slots.iter().map(|&i| table.rows[i].clone()).collect();
            records.sort_by_key(|r| match r {
                Row::Record(t) => Some(t.get().number),
                Row::Malformed(_) => None,
            });
            for (slot, row) in slots.into_iter().zip(records) {
                table.rows[slot] = row;
            }
        }

        let slots: Vec<usize> = self
            .blocks
            .iter()
            .enumerate()
            .filter(|(_, b)| matches!(b, Block::Section(_)))
            .map(|(i, _)| i)
            .collect();
        let mut sections: Vec<Block> = slots.iter().map(|&i| self.blocks[i].clone()).collect();
        sections.sort_by_key(|b| match b {
            Block::Section(s) => Some(s.number()),
            _ => None,
        });
        for (slot, block) in slots.into_iter().zip(sections) {
            self.blocks[slot] = block;
        }
    }

    /// Ordering and uniqueness checks shared by every mutator.
    pub fn check_invariants(&self) -> std::result::Result<(), String> {
        if let Some(table) = self.table() {
            if let Some(w) = table.numbers().windows(2).find(|w| w[0] >= w[1]) {
                return Err(format!(
                    "phase table is not strictly increasing at {} → {}",
                    w[0], w[1]
                ));
            }
        }
        let section_numbers: Vec<PhaseNumber> = self.sections().map(Section::number).collect();
        if let Some(w) = section_numbers.windows(2).find(|w| w[0] >= w[1]) {
            return Err(format!(
                "detail sections out of order at {} → {}",
                w[0], w[1]
            ));
        }
        let mut seen = HashSet::new();
        for n in self.used_numbers() {
            if !seen.insert(n) {
                return Err(format!(
                    "phase number {n} appears more than once across table and backlog"
                ));
            }
        }
        Ok(())
    }

    /// Re-parse rendered output and confirm it still holds `expected_rows`
    /// well-formed rows and every ordering/uniqueness invariant.
    pub fn validate_rendered(text: &str, expected_rows: usize) -> std::result::Result<(), String> {
        let reparsed = Roadmap::parse(text);
        let rows = reparsed.well_formed_rows();
        if rows != expected_rows {
            return Err(format!(
                "expected {expected_rows} phase rows after the change, found {rows}"
            ));
        }
        reparsed.check_invariants()
    }
}

fn parse_backlog(lines: &[String], start: usize) -> (Backlog, usize, Vec<ParseWarning>) {
    let header = lines[start].clone();
    let mut blocks = Vec::new();
    let mut warnings = Vec::new();
    let mut i = start + 1;

    while i < lines.len() {
        let line = &lines[i];
        if is_horizontal_rule(line) || header_level(line).map(|h| h <= 2).unwrap_or(false) {
            break;
        }
        if is_header::<DeferredRow>(line) {
            let (table, consumed, mut w) = Table::<DeferredRow>::parse(&lines[i..], i + 1);
            warnings.append(&mut w);
            blocks.push(BacklogBlock::Deferred(table));
            i += consumed;
        } else if is_header::<NoteRow>(line) {
            let (table, consumed, mut w) = Table::<NoteRow>::parse(&lines[i..], i + 1);
            warnings.append(&mut w);
            blocks.push(BacklogBlock::Notes(table));
            i += consumed;
        } else if let Some(mut section) = Section::from_lines(&lines[i..=i]) {
            let end = section::section_end(lines, i);
            section.body = lines[i + 1..end].to_vec();
            blocks.push(BacklogBlock::Section(section));
            i = end;
        } else {
            blocks.push(BacklogBlock::Text(line.clone()));
            i += 1;
        }
    }

    (Backlog { header, blocks }, i - start, warnings)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
