//! Configuration loading for Vent
//!
//! One TOML file describes the whole topology: deployment servers,
//! monitored hosts, the application registry and the per-(appGroup,
//! hostGroup) nominal/backup server tables. `Config::load` parses and
//! cross-checks it; `Context` is the validated, run-scoped view handed to
//! the ventilator and dispatcher (no global registries).

use crate::error::{VentError, VentResult};
use crate::models::{Application, Host};
use serde::Deserialize;
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

/// Filesystem layout used by the pipeline
#[derive(Debug, Clone, Deserialize)]
pub struct Paths {
    /// Local checkout of the versioned configuration tree
    pub working_copy: PathBuf,

    /// Root of the generated per-server configuration tree
    pub deploy_base: PathBuf,

    /// Remote directory holding the `new/`, `prod/` and `old/` slots
    pub remote_root: PathBuf,

    /// JSON state file recording ventilation assignments
    pub state_file: PathBuf,

    /// Name of the reserved subtree where `*.py` files are tracked
    #[serde(default = "default_general_dir")]
    pub general_dir: String,
}

fn default_general_dir() -> String {
    "general".to_string()
}

/// Optional version-control section; absent means no backend is configured
#[derive(Debug, Clone, Deserialize)]
pub struct ScmConfig {
    /// SCM client binary
    #[serde(default = "default_scm_command")]
    pub command: String,
}

fn default_scm_command() -> String {
    "svn".to_string()
}

/// One deployment target
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub name: String,

    /// SSH destination; absent means the server is this machine
    #[serde(default)]
    pub address: Option<String>,

    #[serde(default = "default_true")]
    pub enabled: bool,
}

fn default_true() -> bool {
    true
}

/// Nominal and backup server tables, keyed appGroup -> hostGroup -> servers
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Topology {
    #[serde(default)]
    pub nominal: BTreeMap<String, BTreeMap<String, Vec<String>>>,

    #[serde(default)]
    pub backup: BTreeMap<String, BTreeMap<String, Vec<String>>>,
}

impl Topology {
    pub fn nominal_servers(&self, app_group: &str, host_group: &str) -> Option<&[String]> {
        self.nominal
            .get(app_group)?
            .get(host_group)
            .map(|v| v.as_slice())
    }

    pub fn backup_servers(&self, app_group: &str, host_group: &str) -> &[String] {
        self.backup
            .get(app_group)
            .and_then(|groups| groups.get(host_group))
            .map(|v| v.as_slice())
            .unwrap_or(&[])
    }

    /// Application groups known to the ventilation tables
    pub fn app_groups(&self) -> impl Iterator<Item = &String> {
        self.nominal.keys()
    }
}

/// Parsed configuration file
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub paths: Paths,

    #[serde(default)]
    pub scm: Option<ScmConfig>,

    #[serde(default)]
    pub servers: Vec<ServerConfig>,

    #[serde(default)]
    pub hosts: Vec<Host>,

    #[serde(default)]
    pub applications: Vec<Application>,

    #[serde(default)]
    pub topology: Topology,
}

impl Config {
    /// Load and validate a configuration file
    pub fn load(path: &Path) -> VentResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            VentError::Config(format!("cannot read {}: {}", path.display(), e))
        })?;
        let config: Config = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_str(content: &str) -> VentResult<Self> {
        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Cross-check internal references
    fn validate(&self) -> VentResult<()> {
        let server_names: BTreeSet<&str> =
            self.servers.iter().map(|s| s.name.as_str()).collect();
        if server_names.len() != self.servers.len() {
            return Err(VentError::Config("duplicate server name".to_string()));
        }

        for (app_group, groups) in self.topology.nominal.iter().chain(self.topology.backup.iter()) {
            for (host_group, servers) in groups {
                for server in servers {
                    if !server_names.contains(server.as_str()) {
                        return Err(VentError::Config(format!(
                            "topology entry ({}, {}) references unknown server '{}'",
                            app_group, host_group, server
                        )));
                    }
                }
            }
        }

        let mut host_names = BTreeSet::new();
        for host in &self.hosts {
            if !host_names.insert(host.name.as_str()) {
                return Err(VentError::Config(format!(
                    "duplicate host '{}'",
                    host.name
                )));
            }
        }

        let mut app_names = BTreeSet::new();
        for app in &self.applications {
            if !app_names.insert(app.name.as_str()) {
                return Err(VentError::Config(format!(
                    "duplicate application '{}'",
                    app.name
                )));
            }
        }

        Ok(())
    }

    pub fn server(&self, name: &str) -> Option<&ServerConfig> {
        self.servers.iter().find(|s| s.name == name)
    }
}

/// Run-scoped view of the loaded configuration
///
/// Owns the hosts, applications and topology for exactly one pipeline run;
/// the previous-assignment lookup lives in the `ConfigStore`.
#[derive(Debug, Clone)]
pub struct Context {
    pub hosts: Vec<Host>,
    pub applications: Vec<Application>,
    pub topology: Topology,
    pub paths: Paths,
}

impl Context {
    pub fn from_config(config: &Config) -> Self {
        Self {
            hosts: config.hosts.clone(),
            applications: config.applications.clone(),
            topology: config.topology.clone(),
            paths: config.paths.clone(),
        }
    }

    pub fn application(&self, name: &str) -> Option<&Application> {
        self.applications.iter().find(|a| a.name == name)
    }

    /// Applications belonging to one ventilation bucket
    pub fn applications_in_group(&self, app_group: &str) -> Vec<&Application> {
        self.applications
            .iter()
            .filter(|a| a.app_group == app_group)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
        [paths]
        working_copy = "/var/lib/vent/conf"
        deploy_base = "/var/lib/vent/deploy"
        remote_root = "/var/lib/vent/target"
        state_file = "/var/lib/vent/state.json"

        [[servers]]
        name = "s1"

        [[servers]]
        name = "s2"
        address = "vent@s2.example.net"
        enabled = false

        [[hosts]]
        name = "db1"
        groups = ["/Servers/Linux"]

        [[applications]]
        name = "nagios"
        priority = 3
        app_group = "collect"
        start = "service nagios start"
        stop = "service nagios stop"

        [topology.nominal.collect]
        "Servers" = ["s1", "s2"]
    "#;

    #[test]
    fn load_minimal_config() {
        let config = Config::from_str(MINIMAL).unwrap();
        assert_eq!(config.servers.len(), 2);
        assert!(config.server("s1").unwrap().enabled);
        assert!(!config.server("s2").unwrap().enabled);
        assert_eq!(config.server("s1").unwrap().address, None);
        assert_eq!(config.paths.general_dir, "general");
        assert!(config.scm.is_none());
        assert_eq!(
            config.topology.nominal_servers("collect", "Servers"),
            Some(&["s1".to_string(), "s2".to_string()][..])
        );
        assert!(config.topology.backup_servers("collect", "Servers").is_empty());
    }

    #[test]
    fn reject_unknown_topology_server() {
        let broken = MINIMAL.replace("[\"s1\", \"s2\"]", "[\"s1\", \"ghost\"]");
        let err = Config::from_str(&broken).unwrap_err();
        assert!(err.to_string().contains("unknown server 'ghost'"));
    }

    #[test]
    fn reject_duplicate_server() {
        let broken = format!(
            "{}\n[[servers]]\nname = \"s1\"\n",
            MINIMAL.trim_end()
        );
        let err = Config::from_str(&broken).unwrap_err();
        assert!(err.to_string().contains("duplicate server"));
    }

    #[test]
    fn context_groups_applications() {
        let config = Config::from_str(MINIMAL).unwrap();
        let ctx = Context::from_config(&config);
        assert_eq!(ctx.applications_in_group("collect").len(), 1);
        assert!(ctx.applications_in_group("metrology").is_empty());
        assert!(ctx.application("nagios").is_some());
    }
}
