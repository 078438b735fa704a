//! Core data models for Vent
//!
//! Defines the fundamental data structures used throughout the pipeline:
//! - `Host`: a monitored machine with its group memberships
//! - `Application`: a managed monitoring application with restart priority
//! - `ServerState`: the revision triple tracked per deployment target
//! - `VentilationResult`: host -> application -> ordered server list
//! - `WorkingCopyStatus`: classified diff of the configuration checkout

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;

/// A monitored host loaded from configuration
///
/// Immutable for the duration of one pipeline run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Host {
    /// Unique host identifier (also the ventilation hash input)
    pub name: String,

    /// Network address
    #[serde(default)]
    pub address: String,

    /// Group memberships, as slash-separated hierarchy paths
    /// (e.g. `/Servers/Linux/Web`)
    #[serde(default)]
    pub groups: Vec<String>,

    /// Explicit ventilation-group override; when absent the group is
    /// inferred from the unique top-level ancestor of `groups`
    #[serde(default)]
    pub ventilation: Option<String>,
}

/// A managed application with its restart priority and commands
///
/// Higher priority stops and starts first. Commands are run through the
/// target's shell; an absent command makes the corresponding phase a no-op
/// for this application.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Application {
    pub name: String,

    /// Restart ordering: applications sharing a priority form one wave
    #[serde(default)]
    pub priority: i32,

    /// Ventilation bucket this application belongs to
    pub app_group: String,

    #[serde(default)]
    pub start: Option<String>,

    #[serde(default)]
    pub stop: Option<String>,

    #[serde(default)]
    pub validate: Option<String>,

    #[serde(default)]
    pub qualify: Option<String>,
}

/// Per-server revision numbers and eligibility flag
///
/// `conf` is the revision about to be deployed, `deployed` what was last
/// pushed to the `new/` slot, `installed` what is active in `prod/`, and
/// `previous` what sits in `old/`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ServerState {
    pub conf: u64,
    pub deployed: u64,
    pub installed: u64,
    pub previous: u64,
    pub enabled: bool,
}

impl ServerState {
    /// The configured revision differs from what was last pushed
    pub fn needs_deployment(&self) -> bool {
        self.conf != self.deployed
    }

    /// What was pushed differs from what is active
    pub fn needs_restart(&self) -> bool {
        self.deployed != self.installed
    }
}

/// Mapping from host to (application -> ordered server list)
///
/// The first element of a non-empty list is the nominal server; any
/// further element is a backup. An absent entry means the application is
/// not deployed for that host in this run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VentilationResult {
    assignments: BTreeMap<String, BTreeMap<String, Vec<String>>>,
}

impl VentilationResult {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, host: &str, application: &str, servers: Vec<String>) {
        self.assignments
            .entry(host.to_string())
            .or_default()
            .insert(application.to_string(), servers);
    }

    /// Ordered server list for one (host, application), if ventilated
    pub fn servers_for(&self, host: &str, application: &str) -> Option<&[String]> {
        self.assignments
            .get(host)?
            .get(application)
            .map(|v| v.as_slice())
    }

    /// Every server an application is ventilated to, across all hosts
    pub fn servers_for_app(&self, application: &str) -> BTreeSet<String> {
        let mut servers = BTreeSet::new();
        for apps in self.assignments.values() {
            if let Some(list) = apps.get(application) {
                servers.extend(list.iter().cloned());
            }
        }
        servers
    }

    /// Every server mentioned anywhere in the result
    pub fn all_servers(&self) -> BTreeSet<String> {
        let mut servers = BTreeSet::new();
        for apps in self.assignments.values() {
            for list in apps.values() {
                servers.extend(list.iter().cloned());
            }
        }
        servers
    }

    pub fn hosts(&self) -> impl Iterator<Item = &String> {
        self.assignments.keys()
    }

    pub fn entries(
        &self,
    ) -> impl Iterator<Item = (&String, &BTreeMap<String, Vec<String>>)> {
        self.assignments.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.assignments.is_empty()
    }
}

/// Classified diff of the working copy against the SCM backend
///
/// Recomputed on demand and cached by the revision manager until a
/// mutating operation invalidates it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WorkingCopyStatus {
    pub to_add: Vec<PathBuf>,
    pub added: Vec<PathBuf>,
    pub to_remove: Vec<PathBuf>,
    pub removed: Vec<PathBuf>,
    pub modified: Vec<PathBuf>,
}

impl WorkingCopyStatus {
    /// Nothing left to reconcile (`sync()` fixed point)
    pub fn is_synced(&self) -> bool {
        self.to_add.is_empty() && self.to_remove.is_empty()
    }

    /// Any local edit that would make checking out another revision unsafe
    pub fn has_local_changes(&self) -> bool {
        !self.to_add.is_empty()
            || !self.added.is_empty()
            || !self.to_remove.is_empty()
            || !self.modified.is_empty()
    }

    /// Paths counted as "changed" by `file_changed`/`dir_changed`:
    /// modified, added and removed entries
    pub fn changed_paths(&self) -> impl Iterator<Item = &PathBuf> {
        self.modified
            .iter()
            .chain(self.added.iter())
            .chain(self.removed.iter())
    }

    pub fn is_empty(&self) -> bool {
        self.to_add.is_empty()
            && self.added.is_empty()
            && self.to_remove.is_empty()
            && self.removed.is_empty()
            && self.modified.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn needs_deployment_when_conf_ahead() {
        let state = ServerState {
            conf: 42,
            deployed: 41,
            installed: 41,
            previous: 40,
            enabled: true,
        };
        assert!(state.needs_deployment());
        assert!(!state.needs_restart());
    }

    #[test]
    fn needs_restart_when_deployed_ahead() {
        let state = ServerState {
            conf: 42,
            deployed: 42,
            installed: 41,
            previous: 40,
            enabled: true,
        };
        assert!(!state.needs_deployment());
        assert!(state.needs_restart());
    }

    #[test]
    fn ventilation_result_lookup() {
        let mut result = VentilationResult::new();
        result.insert("db1", "nagios", vec!["s1".into(), "s2".into()]);
        result.insert("db2", "nagios", vec!["s2".into()]);

        assert_eq!(
            result.servers_for("db1", "nagios"),
            Some(&["s1".to_string(), "s2".to_string()][..])
        );
        assert_eq!(result.servers_for("db1", "nagvis"), None);
        assert_eq!(result.servers_for("db3", "nagios"), None);

        let servers = result.servers_for_app("nagios");
        assert!(servers.contains("s1"));
        assert!(servers.contains("s2"));
        assert_eq!(result.all_servers().len(), 2);
    }

    #[test]
    fn status_sync_and_local_change_predicates() {
        let mut status = WorkingCopyStatus::default();
        assert!(status.is_synced());
        assert!(!status.has_local_changes());

        status.modified.push(PathBuf::from("hosts/db1.xml"));
        assert!(status.is_synced());
        assert!(status.has_local_changes());

        status.to_add.push(PathBuf::from("hosts/db2.xml"));
        assert!(!status.is_synced());
    }

    #[test]
    fn changed_paths_covers_modified_added_removed() {
        let status = WorkingCopyStatus {
            to_add: vec![PathBuf::from("a")],
            added: vec![PathBuf::from("b")],
            to_remove: vec![PathBuf::from("c")],
            removed: vec![PathBuf::from("d")],
            modified: vec![PathBuf::from("e")],
        };
        let changed: Vec<_> = status.changed_paths().collect();
        assert_eq!(changed.len(), 3);
        assert!(changed.contains(&&PathBuf::from("b")));
        assert!(changed.contains(&&PathBuf::from("d")));
        assert!(changed.contains(&&PathBuf::from("e")));
        assert!(!changed.contains(&&PathBuf::from("a")));
    }
}
