use crate::error::{Result, SpecflowError};
use crate::paths;
use crate::roadmap::Roadmap;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

/// Atomically write `data` to `path` using a tempfile in the same directory.
/// Prevents partial writes from corrupting registry files.
pub fn atomic_write(path: &Path, data: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let dir = path.parent().unwrap_or(Path::new("."));
    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(data)?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

/// Create a directory and all parents, idempotent.
pub fn ensure_dir(path: &Path) -> Result<()> {
    std::fs::create_dir_all(path)?;
    Ok(())
}

/// Write a file only if it does not already exist. Returns true if written.
pub fn write_if_missing(path: &Path, data: &[u8]) -> Result<bool> {
    if path.exists() {
        return Ok(false);
    }
    atomic_write(path, data)?;
    Ok(true)
}

/// Add `entry` to `root/.gitignore` if it isn't already present.
pub fn ensure_gitignore_entry(root: &Path, entry: &str) -> Result<()> {
    let gitignore = root.join(".gitignore");
    let existing = if gitignore.exists() {
        std::fs::read_to_string(&gitignore)?
    } else {
        String::new()
    };
    if existing.lines().any(|l| l == entry) {
        return Ok(());
    }
    let sep = if existing.is_empty() || existing.ends_with('\n') {
        ""
    } else {
        "\n"
    };
    let mut f = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&gitignore)?;
    writeln!(f, "{sep}{entry}")?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Transaction
// ---------------------------------------------------------------------------

/// Post-write check run against staged content before anything touches disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Validation {
    None,
    /// Content must parse as JSON.
    Json,
    /// Content must re-parse as a roadmap with exactly this many phase rows
    /// and satisfy the ordering/uniqueness invariants.
    Roadmap { expected_rows: usize },
}

impl Validation {
    fn check(self, content: &str) -> std::result::Result<(), String> {
        match self {
            Validation::None => Ok(()),
            Validation::Json => serde_json::from_str::<serde_json::Value>(content)
                .map(|_| ())
                .map_err(|e| format!("not valid JSON: {e}")),
            Validation::Roadmap { expected_rows } => {
                Roadmap::validate_rendered(content, expected_rows)
            }
        }
    }
}

#[derive(Debug, Clone)]
struct StagedWrite {
    path: PathBuf,
    content: String,
    validation: Validation,
}

/// What a committed transaction did.
#[derive(Debug, Clone, Default)]
pub struct Commit {
    pub written: Vec<PathBuf>,
    pub moved: Vec<(PathBuf, PathBuf)>,
    pub removed: Vec<PathBuf>,
    pub backup: Option<PathBuf>,
}

impl Commit {
    /// Apply staged changes in order, recording each one. On failure returns
    /// the path that could not be changed.
    fn apply(
        &mut self,
        writes: Vec<StagedWrite>,
        moves: Vec<(PathBuf, PathBuf)>,
        removals: Vec<PathBuf>,
    ) -> std::result::Result<(), (PathBuf, SpecflowError)> {
        for w in writes {
            if let Err(e) = atomic_write(&w.path, w.content.as_bytes()) {
                return Err((w.path, e));
            }
            tracing::debug!(path = %w.path.display(), "wrote");
            self.written.push(w.path);
        }
        for (from, to) in moves {
            let moved = match to.parent() {
                Some(parent) => std::fs::create_dir_all(parent),
                None => Ok(()),
            }
            .and_then(|()| std::fs::rename(&from, &to));
            if let Err(e) = moved {
                return Err((from, e.into()));
            }
            tracing::debug!(from = %from.display(), to = %to.display(), "moved");
            self.moved.push((from, to));
        }
        for path in removals {
            let removed = if path.is_dir() {
                std::fs::remove_dir_all(&path)
            } else if path.exists() {
                std::fs::remove_file(&path)
            } else {
                Ok(())
            };
            if let Err(e) = removed {
                return Err((path, e.into()));
            }
            self.removed.push(path);
        }
        Ok(())
    }
}

/// A set of file changes applied together: every staged write is validated
/// first, and nothing is written unless all of them pass.
#[derive(Debug)]
pub struct Transaction {
    root: PathBuf,
    writes: Vec<StagedWrite>,
    moves: Vec<(PathBuf, PathBuf)>,
    removals: Vec<PathBuf>,
    backup: bool,
}

impl Transaction {
    pub fn new(root: &Path) -> Self {
        Self {
            root: root.to_path_buf(),
            writes: Vec::new(),
            moves: Vec::new(),
            removals: Vec::new(),
            backup: false,
        }
    }

    /// Copy every file the transaction touches into a timestamped backup
    /// directory before applying it.
    pub fn with_backup(mut self, backup: bool) -> Self {
        self.backup = backup;
        self
    }

    pub fn write(&mut self, path: impl Into<PathBuf>, content: impl Into<String>, validation: Validation) {
        let path = path.into();
        let content = content.into();
        // a later write to the same path replaces the earlier one
        self.writes.retain(|w| w.path != path);
        self.writes.push(StagedWrite {
            path,
            content,
            validation,
        });
    }

    pub fn rename(&mut self, from: impl Into<PathBuf>, to: impl Into<PathBuf>) {
        self.moves.push((from.into(), to.into()));
    }

    pub fn remove(&mut self, path: impl Into<PathBuf>) {
        self.removals.push(path.into());
    }

    pub fn is_empty(&self) -> bool {
        self.writes.is_empty() && self.moves.is_empty() && self.removals.is_empty()
    }

    /// Staged content for `path`, if any.
    pub fn staged(&self, path: &Path) -> Option<&str> {
        self.writes
            .iter()
            .find(|w| w.path == path)
            .map(|w| w.content.as_str())
    }

    /// Every path this transaction would write, move, or remove.
    pub fn touched(&self) -> Vec<PathBuf> {
        let mut out: Vec<PathBuf> = self.writes.iter().map(|w| w.path.clone()).collect();
        for (from, to) in &self.moves {
            out.push(from.clone());
            out.push(to.clone());
        }
        out.extend(self.removals.iter().cloned());
        out
    }

    pub fn validate(&self) -> Result<()> {
        for w in &self.writes {
            w.validation
                .check(&w.content)
                .map_err(|reason| SpecflowError::ValidationFailed {
                    path: w.path.clone(),
                    reason,
                })?;
        }
        Ok(())
    }

    /// Validate, back up, then apply: writes first, then moves, then removals.
    pub fn commit(self) -> Result<Commit> {
        self.validate()?;

        let backup = if self.backup {
            self.take_backup()?
        } else {
            None
        };

        let mut commit = Commit {
            backup,
            ..Commit::default()
        };
        if let Err((path, source)) = commit.apply(self.writes, self.moves, self.removals) {
            tracing::error!(path = %path.display(), backup = ?commit.backup, "commit stopped partway");
            return Err(SpecflowError::PartialCommit {
                path,
                backup: commit.backup,
                source: Box::new(source),
            });
        }
        Ok(commit)
    }

    fn take_backup(&self) -> Result<Option<PathBuf>> {
        let sources: Vec<&PathBuf> = self
            .writes
            .iter()
            .map(|w| &w.path)
            .chain(self.moves.iter().map(|(from, _)| from))
            .chain(self.removals.iter())
            .filter(|p| p.exists())
            .collect();
        if sources.is_empty() {
            return Ok(None);
        }
        let dir = backup_dir(&self.root)?;
        for src in sources {
            let rel = src
                .strip_prefix(&self.root)
                .map(Path::to_path_buf)
                .unwrap_or_else(|_| PathBuf::from(src.file_name().unwrap_or_default()));
            copy_recursive(src, &dir.join(rel))?;
        }
        tracing::info!(dir = %dir.display(), "backup written");
        Ok(Some(dir))
    }
}

/// A fresh `.specflow/backups/<YYYYMMDD-HHMMSS>` directory; a numeric suffix
/// is added when two backups land in the same second.
fn backup_dir(root: &Path) -> Result<PathBuf> {
    let base = paths::backups_dir(root);
    let stamp = chrono::Utc::now().format("%Y%m%d-%H%M%S").to_string();
    let mut dir = base.join(&stamp);
    let mut n = 1;
    while dir.exists() {
        dir = base.join(format!("{stamp}-{n}"));
        n += 1;
    }
    std::fs::create_dir_all(&dir)?;
    Ok(dir)
}

fn copy_recursive(src: &Path, dst: &Path) -> Result<()> {
    if src.is_dir() {
        std::fs::create_dir_all(dst)?;
        for entry in std::fs::read_dir(src)? {
            let entry = entry?;
            copy_recursive(&entry.path(), &dst.join(entry.file_name()))?;
        }
    } else {
        if let Some(parent) = dst.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::copy(src, dst)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const ROADMAP: &str = "\
| Phase | Name | Status | Gate |
|---|---|---|---|
| 0010 | A | ⬜ Not Started | g |
";

    #[test]
    fn atomic_write_creates_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("test.yaml");
        atomic_write(&path, b"hello: world").unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "hello: world");
    }

    #[test]
    fn atomic_write_creates_parents() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("a/b/c/test.yaml");
        atomic_write(&path, b"data").unwrap();
        assert!(path.exists());
    }

    #[test]
    fn ensure_gitignore_entry_idempotent() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join(".gitignore"), "target").unwrap();
        ensure_gitignore_entry(dir.path(), ".specflow/backups/").unwrap();
        ensure_gitignore_entry(dir.path(), ".specflow/backups/").unwrap();
        let content = std::fs::read_to_string(dir.path().join(".gitignore")).unwrap();
        assert_eq!(content, "target\n.specflow/backups/\n");
    }

    #[test]
    fn write_if_missing_skips_existing() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("existing.txt");
        std::fs::write(&path, b"original").unwrap();
        assert!(!write_if_missing(&path, b"new").unwrap());
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "original");
    }

    #[test]
    fn failed_validation_leaves_every_file_untouched() {
        let dir = TempDir::new().unwrap();
        let roadmap = dir.path().join("ROADMAP.md");
        let state = dir.path().join("state.json");
        std::fs::write(&roadmap, ROADMAP).unwrap();
        std::fs::write(&state, "{}").unwrap();

        let mut tx = Transaction::new(dir.path()).with_backup(true);
        tx.write(&state, "{\"ok\":true}", Validation::Json);
        // claims two rows but renders one
        tx.write(&roadmap, ROADMAP, Validation::Roadmap { expected_rows: 2 });
        let err = tx.commit().unwrap_err();
        assert!(matches!(err, SpecflowError::ValidationFailed { .. }));

        assert_eq!(std::fs::read_to_string(&state).unwrap(), "{}");
        assert_eq!(std::fs::read_to_string(&roadmap).unwrap(), ROADMAP);
        assert!(!paths::backups_dir(dir.path()).exists());
    }

    #[test]
    fn invalid_json_is_rejected() {
        let dir = TempDir::new().unwrap();
        let mut tx = Transaction::new(dir.path());
        tx.write(dir.path().join("s.json"), "{not json", Validation::Json);
        assert!(tx.validate().is_err());
    }

    #[test]
    fn commit_backs_up_then_applies() {
        let dir = TempDir::new().unwrap();
        let roadmap = dir.path().join("ROADMAP.md");
        let old = dir.path().join("specs/0010-a");
        std::fs::write(&roadmap, ROADMAP).unwrap();
        std::fs::create_dir_all(&old).unwrap();
        std::fs::write(old.join("spec.md"), "spec").unwrap();

        let updated = ROADMAP.replace("0010 | A", "0010 | Renamed");
        let mut tx = Transaction::new(dir.path()).with_backup(true);
        tx.write(&roadmap, updated.clone(), Validation::Roadmap { expected_rows: 1 });
        tx.rename(&old, dir.path().join("specs/0020-a"));
        let commit = tx.commit().unwrap();

        assert_eq!(std::fs::read_to_string(&roadmap).unwrap(), updated);
        assert!(dir.path().join("specs/0020-a/spec.md").exists());
        let backup = commit.backup.unwrap();
        assert_eq!(
            std::fs::read_to_string(backup.join("ROADMAP.md")).unwrap(),
            ROADMAP
        );
        assert!(backup.join("specs/0010-a/spec.md").exists());
    }

    #[test]
    fn failed_move_names_path_and_backup() {
        let dir = TempDir::new().unwrap();
        let roadmap = dir.path().join("ROADMAP.md");
        std::fs::write(&roadmap, ROADMAP).unwrap();
        let missing = dir.path().join("specs/0010-a");

        let updated = ROADMAP.replace("0010 | A", "0010 | Renamed");
        let mut tx = Transaction::new(dir.path()).with_backup(true);
        tx.write(&roadmap, updated.clone(), Validation::Roadmap { expected_rows: 1 });
        tx.rename(&missing, dir.path().join("specs/0020-a"));
        let err = tx.commit().unwrap_err();

        let SpecflowError::PartialCommit { path, backup, .. } = &err else {
            panic!("unexpected error: {err}");
        };
        assert_eq!(path, &missing);
        let backup = backup.as_ref().unwrap();
        assert!(err.to_string().contains(&backup.display().to_string()));
        assert_eq!(std::fs::read_to_string(backup.join("ROADMAP.md")).unwrap(), ROADMAP);
        // the write before the failing move stays applied
        assert_eq!(std::fs::read_to_string(&roadmap).unwrap(), updated);
    }

    #[test]
    fn later_write_to_same_path_wins() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("f.txt");
        let mut tx = Transaction::new(dir.path());
        tx.write(&path, "one", Validation::None);
        tx.write(&path, "two", Validation::None);
        assert_eq!(tx.staged(&path), Some("two"));
        tx.commit().unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "two");
    }
}
