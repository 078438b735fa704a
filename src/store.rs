//! Ventilation assignment store
//!
//! The ventilator needs to know where each (host, appGroup) pair was
//! assigned on the previous run to keep assignments sticky. `ConfigStore`
//! is that contract plus the enabled-server bookkeeping; `FileStore` backs
//! it with a small JSON state file, staged in memory during the run and
//! rewritten atomically on `commit()`.

use crate::error::VentResult;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::io::Write;
use std::path::{Path, PathBuf};

/// Previous-assignment lookup and transactional commit boundary
pub trait ConfigStore {
    /// Servers this (host, appGroup) was ventilated to on the previous
    /// run, restricted to currently-enabled servers
    fn previous_assignment(&self, host: &str, app_group: &str) -> Vec<String>;

    /// Stage the assignment computed by the current run
    fn record_assignment(&mut self, host: &str, app_group: &str, servers: &[String]);

    fn is_enabled(&self, server: &str) -> bool;

    fn set_enabled(&mut self, server: &str, enabled: bool);

    /// Drop staged assignments that point exclusively at this server
    /// (used when disabling; the next ventilation reassigns them)
    fn drop_exclusive_assignments(&mut self, server: &str);

    /// Remove alternate records for (host, appGroup) pairs this server
    /// already holds, so only one record remains (used when enabling)
    fn prune_alternates(&mut self, server: &str);

    /// Persist the staged state
    fn commit(&mut self) -> VentResult<()>;

    /// Discard staged changes, reverting to the last committed state
    fn rollback(&mut self);
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
struct StoreState {
    /// host -> appGroup -> ordered server list
    #[serde(default)]
    assignments: BTreeMap<String, BTreeMap<String, Vec<String>>>,

    /// Servers disabled by an operator, overriding the static config
    #[serde(default)]
    disabled: BTreeSet<String>,
}

/// JSON-file-backed `ConfigStore`
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    saved: StoreState,
    staged: StoreState,
    /// Servers enabled in the static configuration
    configured: BTreeSet<String>,
}

impl FileStore {
    /// Load the state file, or start empty when it does not exist yet
    pub fn load(path: &Path, configured_enabled: BTreeSet<String>) -> VentResult<Self> {
        let saved = if path.exists() {
            let content = std::fs::read_to_string(path)?;
            serde_json::from_str(&content)?
        } else {
            StoreState::default()
        };
        Ok(Self {
            path: path.to_path_buf(),
            staged: saved.clone(),
            saved,
            configured: configured_enabled,
        })
    }

    #[cfg(test)]
    pub fn in_memory(configured_enabled: BTreeSet<String>) -> Self {
        Self {
            path: PathBuf::from("/nonexistent/vent-state.json"),
            saved: StoreState::default(),
            staged: StoreState::default(),
            configured: configured_enabled,
        }
    }

    /// Promote staged state to "previous run" without touching the disk
    #[cfg(test)]
    pub fn commit_staged_for_tests(&mut self) {
        self.saved = self.staged.clone();
    }

    pub fn enabled_servers(&self) -> BTreeSet<String> {
        self.configured
            .iter()
            .filter(|s| !self.staged.disabled.contains(*s))
            .cloned()
            .collect()
    }
}

impl ConfigStore for FileStore {
    fn previous_assignment(&self, host: &str, app_group: &str) -> Vec<String> {
        self.saved
            .assignments
            .get(host)
            .and_then(|groups| groups.get(app_group))
            .map(|servers| {
                servers
                    .iter()
                    .filter(|s| self.is_enabled(s))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    fn record_assignment(&mut self, host: &str, app_group: &str, servers: &[String]) {
        self.staged
            .assignments
            .entry(host.to_string())
            .or_default()
            .insert(app_group.to_string(), servers.to_vec());
    }

    fn is_enabled(&self, server: &str) -> bool {
        self.configured.contains(server) && !self.staged.disabled.contains(server)
    }

    fn set_enabled(&mut self, server: &str, enabled: bool) {
        if enabled {
            self.staged.disabled.remove(server);
            self.configured.insert(server.to_string());
        } else {
            self.staged.disabled.insert(server.to_string());
        }
    }

    fn drop_exclusive_assignments(&mut self, server: &str) {
        for groups in self.staged.assignments.values_mut() {
            groups.retain(|_, servers| {
                !(servers.len() == 1 && servers[0] == server)
            });
            for servers in groups.values_mut() {
                servers.retain(|s| s != server);
            }
        }
        self.staged
            .assignments
            .retain(|_, groups| !groups.is_empty());
    }

    fn prune_alternates(&mut self, server: &str) {
        for groups in self.staged.assignments.values_mut() {
            for servers in groups.values_mut() {
                if servers.iter().any(|s| s == server) {
                    servers.retain(|s| s == server);
                }
            }
        }
    }

    fn commit(&mut self) -> VentResult<()> {
        let content = serde_json::to_string_pretty(&self.staged)?;
        let dir = self.path.parent().unwrap_or_else(|| Path::new("."));
        std::fs::create_dir_all(dir)?;
        let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
        tmp.write_all(content.as_bytes())?;
        tmp.persist(&self.path).map_err(|e| e.error)?;
        self.saved = self.staged.clone();
        Ok(())
    }

    fn rollback(&mut self) {
        self.staged = self.saved.clone();
    }
}
