//! Common test utilities for Vent pipeline tests.
//!
//! This module provides:
//! - `TestEnv`: isolated configuration tree and state file in a tempdir
//! - `ScriptedExecutor`: records commands, answers revision queries
//! - `MemoryBackend`: in-memory SCM with a call log

#![allow(dead_code)]

use std::collections::BTreeSet;
use std::path::Path;
use std::sync::{Arc, Mutex};

use tempfile::TempDir;

use vent::config::{Config, Context};
use vent::error::{VentError, VentResult};
use vent::remote::{CommandOutput, Executor};
use vent::revision::{RevisionManager, ScmBackend, ScmEntry, ScmEntryState};
use vent::server::{ServerHandle, ServerManager};
use vent::store::FileStore;

/// Records every command it is asked to run; fails when the command
/// contains one of the `fail_on` substrings, and answers revision-marker
/// queries from a scripted (new, prod, old) triple.
pub struct ScriptedExecutor {
    pub name: String,
    pub log: Arc<Mutex<Vec<String>>>,
    pub revisions: (u64, u64, u64),
    pub fail_on: Vec<String>,
}

impl Executor for ScriptedExecutor {
    fn execute(&self, command: &str) -> VentResult<CommandOutput> {
        self.log
            .lock()
            .unwrap()
            .push(format!("{}: {}", self.name, command));
        if self.fail_on.iter().any(|s| command.contains(s.as_str())) {
            return Err(VentError::Remote {
                server: self.name.clone(),
                code: 1,
                output: "scripted failure".to_string(),
            });
        }
        let stdout = if command.contains("revision.txt") {
            let (new, prod, old) = self.revisions;
            format!("Revision: {new}\nRevision: {prod}\nRevision: {old}\n")
        } else {
            String::new()
        };
        Ok(CommandOutput { stdout, code: 0 })
    }

    fn copy_to(&self, local: &Path, remote: &Path) -> VentResult<()> {
        self.log.lock().unwrap().push(format!(
            "{}: copy {} -> {}",
            self.name,
            local.display(),
            remote.display()
        ));
        Ok(())
    }

    fn describe(&self) -> String {
        format!("{} (scripted)", self.name)
    }
}

/// In-memory SCM backend with a clean working copy at a fixed head.
pub struct MemoryBackend {
    pub head: u64,
    pub entries: Vec<ScmEntry>,
    pub calls: Arc<Mutex<Vec<String>>>,
}

impl MemoryBackend {
    pub fn new(head: u64) -> Self {
        Self {
            head,
            entries: Vec::new(),
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }
}

impl ScmBackend for MemoryBackend {
    fn status(&self) -> VentResult<Vec<ScmEntry>> {
        Ok(self.entries.clone())
    }

    fn add(&self, path: &Path) -> VentResult<()> {
        self.calls
            .lock()
            .unwrap()
            .push(format!("add {}", path.display()));
        Ok(())
    }

    fn remove(&self, path: &Path) -> VentResult<()> {
        self.calls
            .lock()
            .unwrap()
            .push(format!("remove {}", path.display()));
        Ok(())
    }

    fn update(&self, revision: Option<u64>) -> VentResult<u64> {
        self.calls
            .lock()
            .unwrap()
            .push(format!("update {:?}", revision));
        Ok(revision.unwrap_or(self.head))
    }

    fn commit(&self, _message: &str) -> VentResult<u64> {
        self.calls.lock().unwrap().push("commit".to_string());
        // committing a clean tree is a no-op, like the real backend
        if self.entries.is_empty() {
            Ok(self.head)
        } else {
            Ok(self.head + 1)
        }
    }

    fn head_revision(&self) -> VentResult<u64> {
        Ok(self.head)
    }
}

/// Isolated pipeline fixture: two servers (s1, s2), two hosts whose
/// ventilation hashes land on different servers, and three applications
/// in two priority waves.
pub struct TestEnv {
    pub dir: TempDir,
    pub config: Config,
    pub ctx: Context,
    pub log: Arc<Mutex<Vec<String>>>,
}

impl TestEnv {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        std::fs::create_dir_all(root.join("conf")).unwrap();

        let toml = format!(
            r#"
[paths]
working_copy = "{root}/conf"
deploy_base = "{root}/deploy"
remote_root = "{root}/target"
state_file = "{root}/state.json"

[[servers]]
name = "s1"

[[servers]]
name = "s2"

[[hosts]]
name = "db1"
groups = ["/Servers/Linux"]

[[hosts]]
name = "db2"
groups = ["/Servers/Linux"]

[[applications]]
name = "corrsup"
priority = 3
app_group = "collect"
start = "corrsup start"
stop = "corrsup stop"

[[applications]]
name = "nagios"
priority = 3
app_group = "collect"
start = "nagios start"
stop = "nagios stop"
validate = "nagios validate"
qualify = "nagios qualify"

[[applications]]
name = "perfdata"
priority = 1
app_group = "collect"
start = "perfdata start"
stop = "perfdata stop"

[topology.nominal.collect]
"Servers" = ["s1", "s2"]
"#,
            root = root.display()
        );
        let config_path = root.join("vent.toml");
        std::fs::write(&config_path, toml).unwrap();

        let config = Config::load(&config_path).unwrap();
        let ctx = Context::from_config(&config);
        Self {
            dir,
            config,
            ctx,
            log: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn store(&self) -> FileStore {
        let configured: BTreeSet<String> = self
            .config
            .servers
            .iter()
            .map(|s| s.name.clone())
            .collect();
        FileStore::load(&self.config.paths.state_file, configured).unwrap()
    }

    /// Server collection backed by scripted executors; `specs` gives the
    /// revision triple and failing-command substrings per server.
    pub fn manager(&self, specs: &[(&str, (u64, u64, u64), &[&str])]) -> ServerManager {
        let mut manager = ServerManager::new();
        for (name, revisions, fail_on) in specs {
            let executor = ScriptedExecutor {
                name: name.to_string(),
                log: self.log.clone(),
                revisions: *revisions,
                fail_on: fail_on.iter().map(|s| s.to_string()).collect(),
            };
            manager.insert(ServerHandle::new(
                *name,
                Box::new(executor),
                &self.config.paths.remote_root,
                &self.config.paths.deploy_base,
                true,
            ));
        }
        manager
    }

    /// Revision manager over a clean in-memory working copy at `head`;
    /// also returns the backend's call log.
    pub fn revisions(&self, head: u64) -> (RevisionManager, Arc<Mutex<Vec<String>>>) {
        let backend = MemoryBackend::new(head);
        let calls = backend.calls.clone();
        let manager = RevisionManager::new(
            Some(Box::new(backend)),
            &self.config.paths.working_copy,
            self.config.paths.general_dir.as_str(),
        );
        (manager, calls)
    }

    /// Like `revisions`, but the working copy carries one modified file,
    /// so committing it yields `head + 1`.
    pub fn revisions_with_local_change(
        &self,
        head: u64,
    ) -> (RevisionManager, Arc<Mutex<Vec<String>>>) {
        let mut backend = MemoryBackend::new(head);
        backend.entries.push(ScmEntry {
            path: self.config.paths.working_copy.join("hosts/db1.xml"),
            state: ScmEntryState::Modified,
            is_dir: false,
        });
        let calls = backend.calls.clone();
        let manager = RevisionManager::new(
            Some(Box::new(backend)),
            &self.config.paths.working_copy,
            self.config.paths.general_dir.as_str(),
        );
        (manager, calls)
    }

    pub fn entries(&self) -> Vec<String> {
        self.log.lock().unwrap().clone()
    }
}
