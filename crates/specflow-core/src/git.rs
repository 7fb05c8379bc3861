use crate::types::PhaseNumber;
use regex::Regex;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::process::Command;

/// Read-only questions the reconciler asks of version control.
pub trait GitProbe {
    fn available(&self) -> bool;
    fn current_branch(&self) -> Option<String>;
    fn local_branch_exists(&self, branch: &str) -> bool;
    fn remote_branch_exists(&self, branch: &str) -> bool;
    /// Subjects of the most recent `depth` commits, newest first.
    fn recent_subjects(&self, depth: u32) -> Vec<String>;
}

// ---------------------------------------------------------------------------
// GitCli
// ---------------------------------------------------------------------------

/// [`GitProbe`] backed by the `git` binary. Every failure reads as "no".
#[derive(Debug, Clone)]
pub struct GitCli {
    root: PathBuf,
    remote: String,
}

impl GitCli {
    pub fn new(root: &Path, remote: impl Into<String>) -> Self {
        Self {
            root: root.to_path_buf(),
            remote: remote.into(),
        }
    }

    fn run(&self, args: &[&str]) -> Option<String> {
        let output = Command::new("git")
            .args(args)
            .current_dir(&self.root)
            .output()
            .ok()?;
        if output.status.success() {
            Some(String::from_utf8_lossy(&output.stdout).trim().to_string())
        } else {
            None
        }
    }

    fn ref_exists(&self, reference: &str) -> bool {
        self.run(&["show-ref", "--verify", "--quiet", reference])
            .is_some()
    }
}

impl GitProbe for GitCli {
    fn available(&self) -> bool {
        which::which("git").is_ok()
            && self.run(&["rev-parse", "--is-inside-work-tree"]).as_deref() == Some("true")
    }

    fn current_branch(&self) -> Option<String> {
        let name = self.run(&["rev-parse", "--abbrev-ref", "HEAD"])?;
        // detached HEAD
        if name.is_empty() || name == "HEAD" {
            None
        } else {
            Some(name)
        }
    }

    fn local_branch_exists(&self, branch: &str) -> bool {
        self.ref_exists(&format!("refs/heads/{branch}"))
    }

    fn remote_branch_exists(&self, branch: &str) -> bool {
        !self.remote.is_empty()
            && self.ref_exists(&format!("refs/remotes/{}/{branch}", self.remote))
    }

    fn recent_subjects(&self, depth: u32) -> Vec<String> {
        if depth == 0 {
            return Vec::new();
        }
        let n = depth.to_string();
        self.run(&["log", "-n", &n, "--format=%s"])
            .map(|out| out.lines().map(str::to_string).collect())
            .unwrap_or_default()
    }
}

// ---------------------------------------------------------------------------
// GitFacts
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Default)]
pub struct GitFacts {
    pub available: bool,
    pub current_branch: Option<String>,
    pub expected_branch: String,
    pub expected_exists: bool,
    /// A recent commit subject mentions the phase number.
    pub merge_evidence: bool,
}

/// Matches `number` as a whole token in a commit subject.
pub fn phase_token(number: PhaseNumber) -> Option<Regex> {
    Regex::new(&format!(r"\b{number}\b")).ok()
}

pub fn collect(
    probe: &dyn GitProbe,
    number: PhaseNumber,
    expected_branch: &str,
    depth: u32,
) -> GitFacts {
    if !probe.available() {
        tracing::debug!("git unavailable, skipping branch checks");
        return GitFacts {
            expected_branch: expected_branch.to_string(),
            ..GitFacts::default()
        };
    }
    let expected_exists = probe.local_branch_exists(expected_branch)
        || probe.remote_branch_exists(expected_branch);
    let merge_evidence = match phase_token(number) {
        Some(token) => probe
            .recent_subjects(depth)
            .iter()
            .any(|s| token.is_match(s)),
        None => false,
    };
    GitFacts {
        available: true,
        current_branch: probe.current_branch(),
        expected_branch: expected_branch.to_string(),
        expected_exists,
        merge_evidence,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
