//! Persistent agent registry
//!
//! One JSON file (`registry.json`) maps agent names to [`AgentRecord`]s, and
//! each registered agent gets a metadata directory `agents/<name>/` holding
//! its definition and originating project path.
//!
//! Every mutation is a read-modify-write of the whole file. Writes go through
//! a temp file and rename, but two concurrent writers still race and the last
//! one wins.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::Utc;
use serde::{Deserialize, Serialize};

use super::definition::{AgentDefinition, AgentRecord, AgentStatus};
use super::validation::is_valid_agent_name;
use crate::constants::storage;
use crate::error::ConfigError;
use crate::paths;

/// On-disk shape of `registry.json`
#[derive(Debug, Default, Serialize, Deserialize)]
struct RegistryFile {
    #[serde(default)]
    agents: BTreeMap<String, AgentRecord>,
}

/// Per-agent metadata stored in `agents/<name>/config.json`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentMetadata {
    #[serde(flatten)]
    pub definition: AgentDefinition,
    pub project_path: PathBuf,
}

/// File-backed registry of known agents.
#[derive(Debug, Clone)]
pub struct AgentRegistry {
    root: PathBuf,
}

impl Default for AgentRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl AgentRegistry {
    /// Registry rooted at the user's config directory
    pub fn new() -> Self {
        Self::with_root(paths::config_dir())
    }

    /// Registry rooted at an explicit directory
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn registry_path(&self) -> PathBuf {
        paths::registry_path(&self.root)
    }

    /// Path of an agent's metadata file
    pub fn agent_config_path(&self, name: &str) -> PathBuf {
        paths::agent_dir(&self.root, name).join(storage::AGENT_CONFIG_FILE)
    }

    /// Create the root and an empty registry file if absent.
    pub fn ensure_registry(&self) -> Result<()> {
        fs::create_dir_all(&self.root)
            .with_context(|| format!("Failed to create {}", self.root.display()))?;
        let path = self.registry_path();
        if !path.exists() {
            self.save(&RegistryFile::default())?;
        }
        Ok(())
    }

    fn load(&self) -> Result<RegistryFile> {
        let path = self.registry_path();
        if !path.exists() {
            return Ok(RegistryFile::default());
        }
        let contents = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read registry {}", path.display()))?;
        if contents.trim().is_empty() {
            return Ok(RegistryFile::default());
        }
        serde_json::from_str(&contents)
            .with_context(|| format!("Failed to parse registry {}", path.display()))
    }

    fn save(&self, registry: &RegistryFile) -> Result<()> {
        let path = self.registry_path();
        let contents = serde_json::to_string_pretty(registry)?;
        paths::write_atomic(&path, contents.as_bytes())
            .with_context(|| format!("Failed to write registry {}", path.display()))
    }

    /// Register (or re-register) an agent. The record always starts stopped.
    pub fn register_agent(
        &self,
        definition: &AgentDefinition,
        project_path: &Path,
    ) -> Result<AgentRecord> {
        if !is_valid_agent_name(&definition.name) {
            return Err(ConfigError::InvalidAgentName(definition.name.clone()).into());
        }
        if definition.version.is_empty() {
            return Err(ConfigError::MissingVersion.into());
        }

        self.ensure_registry()?;

        let metadata = AgentMetadata {
            definition: definition.clone(),
            project_path: project_path.to_path_buf(),
        };
        let metadata_path = self.agent_config_path(&definition.name);
        let contents = serde_json::to_string_pretty(&metadata)?;
        paths::write_atomic(&metadata_path, contents.as_bytes())
            .with_context(|| format!("Failed to write {}", metadata_path.display()))?;

        let record = AgentRecord::stopped(definition.clone());
        let mut registry = self.load()?;
        registry
            .agents
            .insert(definition.name.clone(), record.clone());
        self.save(&registry)?;

        tracing::info!(agent = %definition.name, "Registered agent");
        Ok(record)
    }

    pub fn get_agent(&self, name: &str) -> Result<Option<AgentRecord>> {
        Ok(self.load()?.agents.remove(name))
    }

    /// All agents, ordered by name
    pub fn get_all_agents(&self) -> Result<Vec<AgentRecord>> {
        Ok(self.load()?.agents.into_values().collect())
    }

    /// Metadata written at registration time
    pub fn get_metadata(&self, name: &str) -> Result<Option<AgentMetadata>> {
        let path = self.agent_config_path(name);
        if !path.exists() {
            return Ok(None);
        }
        let contents = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        Ok(Some(serde_json::from_str(&contents)?))
    }

    /// Set status and pid. `Running` stamps `deployedAt`; `Stopped` clears
    /// the pid. Unknown names are ignored.
    pub fn update_agent_status(
        &self,
        name: &str,
        status: AgentStatus,
        pid: Option<u32>,
    ) -> Result<()> {
        self.update_record(name, |record| {
            record.status = status;
            match status {
                AgentStatus::Running => {
                    record.pid = pid;
                    record.deployed_at = Some(Utc::now());
                }
                AgentStatus::Stopped => record.pid = None,
            }
        })
    }

    /// Mark an agent running on `port` with process `pid`.
    pub fn record_deployment(&self, name: &str, pid: u32, port: u16) -> Result<()> {
        self.update_record(name, |record| {
            record.status = AgentStatus::Running;
            record.pid = Some(pid);
            record.port = Some(port);
            record.deployed_at = Some(Utc::now());
        })
    }

    fn update_record<F>(&self, name: &str, apply: F) -> Result<()>
    where
        F: FnOnce(&mut AgentRecord),
    {
        let mut registry = self.load()?;
        let Some(record) = registry.agents.get_mut(name) else {
            tracing::debug!(agent = name, "Status update for unregistered agent ignored");
            return Ok(());
        };
        apply(record);
        self.save(&registry)
    }

    /// Remove an agent's record and metadata directory. Returns whether a
    /// record existed.
    pub fn remove_agent(&self, name: &str) -> Result<bool> {
        if !is_valid_agent_name(name) {
            return Err(ConfigError::InvalidAgentName(name.to_string()).into());
        }

        let mut registry = self.load()?;
        let existed = registry.agents.remove(name).is_some();
        if existed {
            self.save(&registry)?;
        }

        let dir = paths::agent_dir(&self.root, name);
        if dir.exists() {
            fs::remove_dir_all(&dir)
                .with_context(|| format!("Failed to remove {}", dir.display()))?;
        }

        if existed {
            tracing::info!(agent = name, "Removed agent");
        }
        Ok(existed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn definition(name: &str) -> AgentDefinition {
        serde_json::from_value(json!({
            "name": name,
            "version": "1.0.0",
            "description": "test agent",
            "tools": ["json"]
        }))
        .unwrap()
    }

    #[test]
    fn register_then_get() {
        let dir = tempfile::tempdir().unwrap();
        let registry = AgentRegistry::with_root(dir.path());

        registry
            .register_agent(&definition("demo"), Path::new("/projects/demo"))
            .unwrap();

        let record = registry.get_agent("demo").unwrap().unwrap();
        assert_eq!(record.status, AgentStatus::Stopped);
        assert_eq!(record.definition.description, "test agent");
        assert!(record.pid.is_none());

        let metadata = registry.get_metadata("demo").unwrap().unwrap();
        assert_eq!(metadata.project_path, PathBuf::from("/projects/demo"));
        assert!(registry.agent_config_path("demo").exists());
    }

    #[test]
    fn reregistration_resets_status() {
        let dir = tempfile::tempdir().unwrap();
        let registry = AgentRegistry::with_root(dir.path());
        registry
            .register_agent(&definition("demo"), Path::new("/p"))
            .unwrap();
        registry.record_deployment("demo", 4242, 3001).unwrap();

        registry
            .register_agent(&definition("demo"), Path::new("/p"))
            .unwrap();

        let record = registry.get_agent("demo").unwrap().unwrap();
        assert_eq!(record.status, AgentStatus::Stopped);
        assert!(record.pid.is_none());
        assert!(record.port.is_none());
    }

    #[test]
    fn running_stamps_deployed_at_and_stopped_clears_pid() {
        let dir = tempfile::tempdir().unwrap();
        let registry = AgentRegistry::with_root(dir.path());
        registry
            .register_agent(&definition("demo"), Path::new("/p"))
            .unwrap();

        registry
            .update_agent_status("demo", AgentStatus::Running, Some(99))
            .unwrap();
        let running = registry.get_agent("demo").unwrap().unwrap();
        assert_eq!(running.pid, Some(99));
        assert!(running.deployed_at.is_some());

        registry
            .update_agent_status("demo", AgentStatus::Stopped, None)
            .unwrap();
        let stopped = registry.get_agent("demo").unwrap().unwrap();
        assert_eq!(stopped.status, AgentStatus::Stopped);
        assert!(stopped.pid.is_none());
        assert_eq!(stopped.deployed_at, running.deployed_at);
    }

    #[test]
    fn update_of_unknown_agent_is_a_no_op() {
        let dir = tempfile::tempdir().unwrap();
        let registry = AgentRegistry::with_root(dir.path());
        registry
            .update_agent_status("ghost", AgentStatus::Running, Some(1))
            .unwrap();
        assert!(registry.get_all_agents().unwrap().is_empty());
    }

    #[test]
    fn remove_deletes_record_and_directory() {
        let dir = tempfile::tempdir().unwrap();
        let registry = AgentRegistry::with_root(dir.path());
        registry
            .register_agent(&definition("demo"), Path::new("/p"))
            .unwrap();

        assert!(registry.remove_agent("demo").unwrap());
        assert!(registry.get_agent("demo").unwrap().is_none());
        assert!(!paths::agent_dir(dir.path(), "demo").exists());
        assert!(!registry.remove_agent("demo").unwrap());
    }

    #[test]
    fn rejects_names_that_escape_the_root() {
        let dir = tempfile::tempdir().unwrap();
        let registry = AgentRegistry::with_root(dir.path());
        let err = registry
            .register_agent(&definition("../evil"), Path::new("/p"))
            .unwrap_err();
        assert!(err.to_string().contains("Invalid agent name"));
        assert!(registry.remove_agent("../evil").is_err());
    }

    #[test]
    fn lists_agents_by_name() {
        let dir = tempfile::tempdir().unwrap();
        let registry = AgentRegistry::with_root(dir.path());
        for name in ["zeta", "alpha", "mid"] {
            registry
                .register_agent(&definition(name), Path::new("/p"))
                .unwrap();
        }
        let names: Vec<_> = registry
            .get_all_agents()
            .unwrap()
            .into_iter()
            .map(|r| r.definition.name)
            .collect();
        assert_eq!(names, ["alpha", "mid", "zeta"]);
    }

    #[test]
    fn registry_file_has_agents_envelope() {
        let dir = tempfile::tempdir().unwrap();
        let registry = AgentRegistry::with_root(dir.path());
        registry.ensure_registry().unwrap();
        let raw = fs::read_to_string(paths::registry_path(dir.path())).unwrap();
        let value: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(value, json!({"agents": {}}));
    }
}
