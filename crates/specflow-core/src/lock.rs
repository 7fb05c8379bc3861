use crate::error::{Result, SpecflowError};
use crate::paths;
use fd_lock::RwLock;
use std::fs::OpenOptions;
use std::io::{ErrorKind, Write};
use std::path::Path;

/// Run `f` while holding the exclusive registry lock at
/// `.specflow/registry.lock`. A second writer fails fast with
/// [`SpecflowError::RegistryLocked`] instead of waiting.
pub fn with_registry_lock<T>(root: &Path, f: impl FnOnce() -> Result<T>) -> Result<T> {
    let path = paths::lock_path(root);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let file = OpenOptions::new()
        .create(true)
        .read(true)
        .write(true)
        .truncate(false)
        .open(&path)?;

    let mut lock = RwLock::new(file);
    let mut guard = lock.try_write().map_err(|e| match e.kind() {
        ErrorKind::WouldBlock => SpecflowError::RegistryLocked(path.clone()),
        _ => SpecflowError::Io(e),
    })?;
    guard.set_len(0)?;
    writeln!(guard, "{}", std::process::id())?;
    tracing::debug!(path = %path.display(), "registry lock acquired");

    let out = f();
    drop(guard);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn lock_runs_closure() {
        let dir = TempDir::new().unwrap();
        let value = with_registry_lock(dir.path(), || Ok(42)).unwrap();
        assert_eq!(value, 42);
        assert!(paths::lock_path(dir.path()).exists());
    }

    #[test]
    fn nested_acquire_reports_locked() {
        let dir = TempDir::new().unwrap();
        let inner = with_registry_lock(dir.path(), || {
            Ok(with_registry_lock(dir.path(), || Ok(())))
        })
        .unwrap();
        assert!(matches!(inner, Err(SpecflowError::RegistryLocked(_))));
    }

    #[test]
    fn lock_is_released_after_error() {
        let dir = TempDir::new().unwrap();
        let failed: Result<()> = with_registry_lock(dir.path(), || {
            Err(SpecflowError::PhaseNotFound("0010".to_string()))
        });
        assert!(failed.is_err());
        with_registry_lock(dir.path(), || Ok(())).unwrap();
    }
}
