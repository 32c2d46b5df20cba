//! Centralized path utilities
//!
//! All persisted state lives under one root (`~/.config/stick-ai` unless
//! `STICK_HOME` is set).

use std::path::{Path, PathBuf};

use crate::constants::storage;

/// Get the stick config directory
pub fn config_dir() -> PathBuf {
    if let Some(home) = std::env::var_os(storage::HOME_ENV).filter(|v| !v.is_empty()) {
        return PathBuf::from(home);
    }
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".config")
        .join(storage::CONFIG_DIR_NAME)
}

/// Registry file inside a persistence root
pub fn registry_path(root: &Path) -> PathBuf {
    root.join(storage::REGISTRY_FILE)
}

/// Per-agent metadata directory (`agents/<name>`)
pub fn agent_dir(root: &Path, name: &str) -> PathBuf {
    root.join(storage::AGENTS_DIR).join(name)
}

/// PID files and child definitions (`pids/`)
pub fn pids_dir(root: &Path) -> PathBuf {
    root.join(storage::PIDS_DIR)
}

/// Server logs (`logs/`)
pub fn logs_dir(root: &Path) -> PathBuf {
    root.join(storage::LOGS_DIR)
}

/// Agent definition file inside a project directory
pub fn project_definition_path(project_dir: &Path) -> PathBuf {
    project_dir.join(storage::PROJECT_DEFINITION_FILE)
}

/// Write `contents` to `path` through a sibling temp file and rename, so
/// readers never observe a half-written file.
pub fn write_atomic(path: &Path, contents: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let tmp = path.with_file_name(format!(".{}.{}.tmp", file_name, std::process::id()));
    std::fs::write(&tmp, contents)?;
    std::fs::rename(&tmp, path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout_is_rooted() {
        let root = Path::new("/tmp/stick-root");
        assert_eq!(
            registry_path(root),
            PathBuf::from("/tmp/stick-root/registry.json")
        );
        assert_eq!(
            agent_dir(root, "support"),
            PathBuf::from("/tmp/stick-root/agents/support")
        );
        assert_eq!(pids_dir(root), PathBuf::from("/tmp/stick-root/pids"));
    }

    #[test]
    fn write_atomic_creates_parents_and_replaces() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("file.json");

        write_atomic(&path, b"first").unwrap();
        write_atomic(&path, b"second").unwrap();

        assert_eq!(std::fs::read_to_string(&path).unwrap(), "second");
        let leftovers: Vec<_> = std::fs::read_dir(path.parent().unwrap())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
            .collect();
        assert!(leftovers.is_empty());
    }
}
