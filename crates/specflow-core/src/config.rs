use crate::error::Result;
use crate::paths;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

// ---------------------------------------------------------------------------
// ConfigWarning / WarnLevel
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigWarning {
    pub level: WarnLevel,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WarnLevel {
    Warning,
    Error,
}

// ---------------------------------------------------------------------------
// RoadmapConfig
// ---------------------------------------------------------------------------

/// Where newly inserted phases keep their detail block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum DetailStorage {
    #[default]
    Inline,
    File,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoadmapConfig {
    #[serde(default = "default_roadmap_path")]
    pub path: String,
    #[serde(default)]
    pub detail_storage: DetailStorage,
    /// When false, an exhausted decade fails the insert instead of
    /// spilling into the next decade's primary slot.
    #[serde(default = "default_allow_rollover")]
    pub allow_decade_rollover: bool,
}

fn default_roadmap_path() -> String {
    paths::DEFAULT_ROADMAP.to_string()
}

fn default_allow_rollover() -> bool {
    true
}

impl Default for RoadmapConfig {
    fn default() -> Self {
        Self {
            path: default_roadmap_path(),
            detail_storage: DetailStorage::default(),
            allow_decade_rollover: default_allow_rollover(),
        }
    }
}

// ---------------------------------------------------------------------------
// GitConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GitConfig {
    #[serde(default = "default_remote")]
    pub remote: String,
    /// How many recent commit subjects to scan for merge evidence.
    #[serde(default = "default_merge_scan_depth")]
    pub merge_scan_depth: u32,
}

fn default_remote() -> String {
    "origin".to_string()
}

fn default_merge_scan_depth() -> u32 {
    100
}

impl Default for GitConfig {
    fn default() -> Self {
        Self {
            remote: default_remote(),
            merge_scan_depth: default_merge_scan_depth(),
        }
    }
}

// ---------------------------------------------------------------------------
// ProjectConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectConfig {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
}

impl Default for ProjectConfig {
    fn default() -> Self {
        Self {
            name: "project".to_string(),
            description: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Config (top-level)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_version")]
    pub version: u32,
    #[serde(default)]
    pub project: ProjectConfig,
    #[serde(default)]
    pub roadmap: RoadmapConfig,
    #[serde(default = "default_specs_dir")]
    pub specs_dir: String,
    #[serde(default = "default_state_file")]
    pub state_file: String,
    #[serde(default)]
    pub git: GitConfig,
}

fn default_version() -> u32 {
    1
}

fn default_specs_dir() -> String {
    paths::DEFAULT_SPECS_DIR.to_string()
}

fn default_state_file() -> String {
    paths::DEFAULT_STATE_FILE.to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self::new(ProjectConfig::default().name)
    }
}

impl Config {
    pub fn new(project_name: impl Into<String>) -> Self {
        Self {
            version: 1,
            project: ProjectConfig {
                name: project_name.into(),
                description: None,
            },
            roadmap: RoadmapConfig::default(),
            specs_dir: default_specs_dir(),
            state_file: default_state_file(),
            git: GitConfig::default(),
        }
    }

    /// Load `.specflow/config.yaml`, falling back to defaults when absent so
    /// read-only commands work in projects that never ran `init`.
    pub fn load(root: &Path) -> Result<Self> {
        let path = paths::config_path(root);
        if !path.exists() {
            tracing::debug!(path = %path.display(), "no config file, using defaults");
            return Ok(Self::default());
        }
        let data = std::fs::read_to_string(&path)?;
        let cfg: Config = serde_yaml::from_str(&data)?;
        Ok(cfg)
    }

    pub fn save(&self, root: &Path) -> Result<()> {
        let path = paths::config_path(root);
        let data = serde_yaml::to_string(self)?;
        crate::io::atomic_write(&path, data.as_bytes())
    }

    pub fn roadmap_path(&self, root: &Path) -> PathBuf {
        root.join(&self.roadmap.path)
    }

    pub fn state_path(&self, root: &Path) -> PathBuf {
        root.join(&self.state_file)
    }

    pub fn specs_path(&self, root: &Path) -> PathBuf {
        root.join(&self.specs_dir)
    }

    // -----------------------------------------------------------------------
    // Validation
    // -----------------------------------------------------------------------

    pub fn validate(&self) -> Vec<ConfigWarning> {
        let mut warnings = Vec::new();

        if self.roadmap.path.trim().is_empty() {
            warnings.push(ConfigWarning {
                level: WarnLevel::Error,
                message: "roadmap.path is empty".to_string(),
            });
        } else if !self.roadmap.path.ends_with(".md") {
            warnings.push(ConfigWarning {
                level: WarnLevel::Warning,
                message: format!(
                    "roadmap.path '{}' is not a markdown file",
                    self.roadmap.path
                ),
            });
        }

        if !self.state_file.ends_with(".json") {
            warnings.push(ConfigWarning {
                level: WarnLevel::Warning,
                message: format!("state_file '{}' is not a .json file", self.state_file),
            });
        }

        if self.specs_dir.trim().is_empty() {
            warnings.push(ConfigWarning {
                level: WarnLevel::Error,
                message: "specs_dir is empty".to_string(),
            });
        }

        if self.git.merge_scan_depth == 0 {
            warnings.push(ConfigWarning {
                level: WarnLevel::Warning,
                message: "git.merge_scan_depth is 0: merge evidence will never be found"
                    .to_string(),
            });
        } else if self.git.merge_scan_depth > 5000 {
            warnings.push(ConfigWarning {
                level: WarnLevel::Warning,
                message: format!(
                    "git.merge_scan_depth={} (>5000 makes status slow)",
                    self.git.merge_scan_depth
                ),
            });
        }

        if self.git.remote.trim().is_empty() {
            warnings.push(ConfigWarning {
                level: WarnLevel::Warning,
                message: "git.remote is empty: remote branches will not be checked".to_string(),
            });
        }

        warnings
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn default_config_roundtrip() {
        let cfg = Config::new("test-project");
        let yaml = serde_yaml::to_string(&cfg).unwrap();
        let parsed: Config = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(parsed.project.name, "test-project");
        assert_eq!(parsed.version, 1);
        assert_eq!(parsed.roadmap.path, "ROADMAP.md");
        assert!(parsed.roadmap.allow_decade_rollover);
    }

    #[test]
    fn partial_yaml_fills_defaults() {
        let yaml = "roadmap:\n  detail_storage: file\n";
        let cfg: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(cfg.roadmap.detail_storage, DetailStorage::File);
        assert_eq!(cfg.roadmap.path, "ROADMAP.md");
        assert_eq!(cfg.git.remote, "origin");
        assert_eq!(cfg.state_file, ".specflow/orchestration-state.json");
    }

    #[test]
    fn missing_config_loads_defaults() {
        let dir = TempDir::new().unwrap();
        let cfg = Config::load(dir.path()).unwrap();
        assert_eq!(cfg.specs_dir, "specs");
    }

    #[test]
    fn save_then_load() {
        let dir = TempDir::new().unwrap();
        let mut cfg = Config::new("demo");
        cfg.roadmap.allow_decade_rollover = false;
        cfg.save(dir.path()).unwrap();
        let loaded = Config::load(dir.path()).unwrap();
        assert_eq!(loaded.project.name, "demo");
        assert!(!loaded.roadmap.allow_decade_rollover);
    }

    #[test]
    fn validate_flags_bad_values() {
        let mut cfg = Config::new("demo");
        assert!(cfg.validate().is_empty());
        cfg.roadmap.path = String::new();
        cfg.git.merge_scan_depth = 0;
        let warnings = cfg.validate();
        assert!(warnings.iter().any(|w| w.level == WarnLevel::Error));
        assert!(warnings
            .iter()
            .any(|w| w.message.contains("merge_scan_depth")));
    }
}
