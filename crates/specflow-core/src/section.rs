use crate::error::{Result, SpecflowError};
use crate::paths;
use crate::types::{match_key, KeyMatch, PhaseNumber, PhaseStatus};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::ops::Range;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

// ---------------------------------------------------------------------------
// Line classification
// ---------------------------------------------------------------------------

static SECTION_HEADER_RE: OnceLock<Regex> = OnceLock::new();
static RULE_RE: OnceLock<Regex> = OnceLock::new();

fn section_header_re() -> &'static Regex {
    SECTION_HEADER_RE.get_or_init(|| Regex::new(r"^###\s+(\d+)\s+-\s+(.*?)\s*$").unwrap())
}

fn rule_re() -> &'static Regex {
    RULE_RE.get_or_init(|| Regex::new(r"^\s*(?:-{3,}|\*{3,}|_{3,})\s*$").unwrap())
}

/// `### <token> - <name>` → `(token, name)`. The token is not resolved.
pub fn parse_section_header(line: &str) -> Option<(String, String)> {
    let caps = section_header_re().captures(line)?;
    Some((caps[1].to_string(), caps[2].to_string()))
}

/// Markdown ATX header level (1–6), if the line is a header.
pub fn header_level(line: &str) -> Option<usize> {
    let hashes = line.bytes().take_while(|b| *b == b'#').count();
    if (1..=6).contains(&hashes) && line[hashes..].starts_with(' ') {
        Some(hashes)
    } else {
        None
    }
}

pub fn is_horizontal_rule(line: &str) -> bool {
    rule_re().is_match(line)
}

pub fn section_header_line(number: PhaseNumber, name: &str) -> String {
    format!("### {number} - {name}")
}

// ---------------------------------------------------------------------------
// Inline sections
// ---------------------------------------------------------------------------

/// End (exclusive) of the section whose header is at `start`: the next header
/// of the same or higher level, a horizontal rule, or end of input.
pub fn section_end(lines: &[String], start: usize) -> usize {
    let level = lines
        .get(start)
        .and_then(|l| header_level(l))
        .unwrap_or(3);
    lines
        .iter()
        .enumerate()
        .skip(start + 1)
        .find(|(_, l)| {
            is_horizontal_rule(l) || header_level(l).map(|h| h <= level).unwrap_or(false)
        })
        .map(|(i, _)| i)
        .unwrap_or(lines.len())
}

/// Pick the candidate for `number`: an exact match wins, otherwise the first
/// candidate that matched after the single widening step.
fn pick<T>(candidates: impl IntoIterator<Item = (KeyMatch, T)>, number: PhaseNumber) -> Option<T> {
    let mut widened = None;
    for (m, item) in candidates {
        if m.number() != number {
            continue;
        }
        if m.is_exact() {
            return Some(item);
        }
        if widened.is_none() {
            widened = Some(item);
        }
    }
    widened
}

/// Line range of the inline section for `number`, header included.
pub fn locate_inline(lines: &[String], number: PhaseNumber) -> Option<Range<usize>> {
    let candidates = lines.iter().enumerate().filter_map(|(i, line)| {
        let (token, _) = parse_section_header(line)?;
        match_key(&token).ok().map(|m| (m, i))
    });
    let start = pick(candidates, number)?;
    Some(start..section_end(lines, start))
}

/// Copy of the inline section for `number`. The input is not modified.
pub fn extract_inline(lines: &[String], number: PhaseNumber) -> Option<Vec<String>> {
    locate_inline(lines, number).map(|r| lines[r].to_vec())
}

// ---------------------------------------------------------------------------
// Companion files
// ---------------------------------------------------------------------------

/// Find `<number>-*.md` in `dir`. Entries are scanned in name order so the
/// result is deterministic.
pub fn find_file(dir: &Path, number: PhaseNumber) -> Result<Option<PathBuf>> {
    if !dir.is_dir() {
        return Ok(None);
    }
    let mut names: Vec<(String, PathBuf)> = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().into_owned();
        if name.ends_with(".md") {
            names.push((name, entry.path()));
        }
    }
    names.sort();
    let candidates = names.into_iter().filter_map(|(name, path)| {
        let token = name.split(['-', '.']).next()?;
        match_key(token).ok().map(|m| (m, path))
    });
    Ok(pick(candidates, number))
}

/// Where a phase's detail block was found.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DetailLocation {
    Inline(Range<usize>),
    Companion(PathBuf),
    Archived(PathBuf),
}

/// Search order: inline section, `.specflow/phases/`, `.specflow/archive/`.
pub fn locate(root: &Path, lines: &[String], number: PhaseNumber) -> Result<Option<DetailLocation>> {
    if let Some(range) = locate_inline(lines, number) {
        return Ok(Some(DetailLocation::Inline(range)));
    }
    if let Some(path) = find_file(&paths::phases_dir(root), number)? {
        return Ok(Some(DetailLocation::Companion(path)));
    }
    if let Some(path) = find_file(&paths::archive_dir(root), number)? {
        return Ok(Some(DetailLocation::Archived(path)));
    }
    Ok(None)
}

/// Front-matter header of a companion file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompanionMeta {
    pub phase: PhaseNumber,
    pub name: String,
    pub status: PhaseStatus,
}

/// A companion file: YAML front matter followed by free-form detail text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompanionFile {
    pub meta: CompanionMeta,
    pub body: String,
}

impl CompanionFile {
    pub fn new(meta: CompanionMeta, body: impl Into<String>) -> Self {
        Self {
            meta,
            body: body.into(),
        }
    }

    pub fn parse(path: &Path, content: &str) -> Result<Self> {
        let invalid = |reason: &str| SpecflowError::ValidationFailed {
            path: path.to_path_buf(),
            reason: reason.to_string(),
        };
        let rest = content
            .strip_prefix("---\n")
            .ok_or_else(|| invalid("missing front matter"))?;
        let end = rest
            .find("\n---\n")
            .or_else(|| rest.strip_suffix("\n---").map(|s| s.len()))
            .ok_or_else(|| invalid("unterminated front matter"))?;
        let meta: CompanionMeta = serde_yaml::from_str(&rest[..end])?;
        let body = rest[end..]
            .strip_prefix("\n---\n")
            .or_else(|| rest[end..].strip_prefix("\n---"))
            .unwrap_or("")
            .to_string();
        Ok(Self { meta, body })
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::parse(path, &content)
    }

    pub fn render(&self) -> Result<String> {
        let meta = serde_yaml::to_string(&self.meta)?;
        Ok(format!("---\n{meta}---\n{}", self.body))
    }

    /// Convert an inline section (header line + body) into a companion file.
    pub fn from_section(
        number: PhaseNumber,
        name: &str,
        status: PhaseStatus,
        section: &[String],
    ) -> Self {
        let body: Vec<&str> = section.iter().skip(1).map(String::as_str).collect();
        let mut text = body.join("\n");
        if !text.is_empty() && !text.ends_with('\n') {
            text.push('\n');
        }
        Self::new(
            CompanionMeta {
                phase: number,
                name: name.to_string(),
                status,
            },
            text,
        )
    }

    /// Inline section lines (header + body) for this file's content.
    pub fn to_section(&self) -> Vec<String> {
        let mut lines = vec![section_header_line(self.meta.phase, &self.meta.name)];
        lines.extend(self.body.lines().map(str::to_string));
        lines
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
