use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SpecflowError {
    #[error("roadmap not found at {0}: run 'specflow init'")]
    RoadmapNotFound(PathBuf),

    #[error("anchor phase {0} not found in the roadmap table: run 'specflow phase list'")]
    AnchorNotFound(String),

    #[error("phase {0} not found: run 'specflow phase list' to see active phases")]
    PhaseNotFound(String),

    #[error("backlog entry {0} not found: run 'specflow backlog list'")]
    BacklogEntryNotFound(String),

    #[error("phase number {0} is already in use: pick another with --as or use --after")]
    NumberInUse(String),

    #[error("phase {0} is in progress: rerun with 'specflow phase defer {0} --force'")]
    PhaseInProgress(String),

    #[error("phase {0} is not complete: run 'specflow phase status {0} complete' first")]
    PhaseNotComplete(String),

    #[error("no free phase number after {after}: {reason}")]
    DecadeExhausted { after: String, reason: String },

    #[error("phase key '{0}' is ambiguous: use the full 4-digit number")]
    AmbiguousMatch(String),

    #[error("invalid phase number '{0}': expected 4 digits (0000-9999)")]
    InvalidPhaseNumber(String),

    #[error("invalid phase status '{0}'")]
    InvalidStatus(String),

    #[error("validation failed for {path}: {reason} (file left untouched)")]
    ValidationFailed { path: PathBuf, reason: String },

    #[error(
        "changes stopped at {path}; files earlier in the operation were already changed{}",
        restore_hint(.backup)
    )]
    PartialCommit {
        path: PathBuf,
        backup: Option<PathBuf>,
        #[source]
        source: Box<SpecflowError>,
    },

    #[error("registry is locked by another specflow process ({0}): retry when it finishes")]
    RegistryLocked(PathBuf),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

fn restore_hint(backup: &Option<PathBuf>) -> String {
    match backup {
        Some(dir) => format!(": restore them from {}", dir.display()),
        None => String::new(),
    }
}

pub type Result<T> = std::result::Result<T, SpecflowError>;
