use crate::error::{Result, SpecflowError};
use crate::types::PhaseNumber;
use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

// ---------------------------------------------------------------------------
// Directory constants
// ---------------------------------------------------------------------------

pub const SPECFLOW_DIR: &str = ".specflow";
pub const PHASES_DIR: &str = ".specflow/phases";
pub const BACKLOG_DIR: &str = ".specflow/backlog";
pub const ARCHIVE_DIR: &str = ".specflow/archive";
pub const BACKUPS_DIR: &str = ".specflow/backups";

pub const CONFIG_FILE: &str = ".specflow/config.yaml";
pub const LOCK_FILE: &str = ".specflow/registry.lock";

pub const DEFAULT_ROADMAP: &str = "ROADMAP.md";
pub const DEFAULT_STATE_FILE: &str = ".specflow/orchestration-state.json";
pub const DEFAULT_SPECS_DIR: &str = "specs";

pub const SPEC_MD: &str = "spec.md";
pub const PLAN_MD: &str = "plan.md";
pub const TASKS_MD: &str = "tasks.md";
pub const CHECKLISTS_DIR: &str = "checklists";

// ---------------------------------------------------------------------------
// Path helpers
// ---------------------------------------------------------------------------

pub fn specflow_dir(root: &Path) -> PathBuf {
    root.join(SPECFLOW_DIR)
}

pub fn config_path(root: &Path) -> PathBuf {
    root.join(CONFIG_FILE)
}

pub fn lock_path(root: &Path) -> PathBuf {
    root.join(LOCK_FILE)
}

pub fn phases_dir(root: &Path) -> PathBuf {
    root.join(PHASES_DIR)
}

pub fn backlog_dir(root: &Path) -> PathBuf {
    root.join(BACKLOG_DIR)
}

pub fn archive_dir(root: &Path) -> PathBuf {
    root.join(ARCHIVE_DIR)
}

pub fn backups_dir(root: &Path) -> PathBuf {
    root.join(BACKUPS_DIR)
}

/// `<number>-<slug>.md`, the companion file name for a phase.
pub fn companion_file_name(number: PhaseNumber, name: &str) -> String {
    format!("{number}-{}.md", slugify(name))
}

/// `<number>-<slug>`, shared by the git branch and the artifact directory.
pub fn phase_key(number: PhaseNumber, name: &str) -> String {
    format!("{number}-{}", slugify(name))
}

// ---------------------------------------------------------------------------
// Slugs
// ---------------------------------------------------------------------------

static SLUG_RE: OnceLock<Regex> = OnceLock::new();

fn slug_re() -> &'static Regex {
    SLUG_RE.get_or_init(|| Regex::new(r"^[a-z0-9][a-z0-9\-]*[a-z0-9]$|^[a-z0-9]$").unwrap())
}

pub fn validate_slug(slug: &str) -> Result<()> {
    if slug.is_empty() || slug.len() > 64 || !slug_re().is_match(slug) {
        return Err(SpecflowError::ValidationFailed {
            path: PathBuf::from(slug),
            reason: "slug must be lowercase alphanumeric with hyphens".to_string(),
        });
    }
    Ok(())
}

/// Lowercase, hyphen-separated form of a phase name, capped at 64 chars.
pub fn slugify(name: &str) -> String {
    let mut slug = String::with_capacity(name.len());
    let mut pending_dash = false;
    for c in name.chars() {
        if c.is_ascii_alphanumeric() {
            if pending_dash && !slug.is_empty() {
                slug.push('-');
            }
            pending_dash = false;
            slug.push(c.to_ascii_lowercase());
        } else {
            pending_dash = true;
        }
    }
    slug.truncate(64);
    let slug = slug.trim_end_matches('-').to_string();
    if slug.is_empty() {
        "phase".to_string()
    } else {
        slug
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slugify_names() {
        assert_eq!(slugify("Core Setup"), "core-setup");
        assert_eq!(slugify("  API / Auth  v2 "), "api-auth-v2");
        assert_eq!(slugify("***"), "phase");
        for name in ["Core Setup", "x", "Ünïcode name 9"] {
            validate_slug(&slugify(name)).unwrap();
        }
    }

    #[test]
    fn invalid_slugs() {
        for slug in ["", "-dash", "dash-", "has spaces", "UPPER"] {
            assert!(validate_slug(slug).is_err(), "expected invalid: {slug}");
        }
    }

    #[test]
    fn path_helpers() {
        let root = Path::new("/tmp/proj");
        assert_eq!(
            config_path(root),
            PathBuf::from("/tmp/proj/.specflow/config.yaml")
        );
        let n: PhaseNumber = "0020".parse().unwrap();
        assert_eq!(companion_file_name(n, "Search UI"), "0020-search-ui.md");
        assert_eq!(phase_key(n, "Search UI"), "0020-search-ui");
    }
}
