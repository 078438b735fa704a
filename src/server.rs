//! Deployment targets and the concurrent fan-out primitive
//!
//! A `ServerHandle` wraps one execution target and owns its revision
//! state; only the single worker operating on a server within a phase
//! touches that state, so no locking is needed there. `ServerManager`
//! holds the collection and provides `run_in_threads`: spawn one worker
//! per target, collect failures on a channel, join, report.

use crate::error::{VentError, VentResult};
use crate::models::ServerState;
use crate::remote::{shell_quote, Executor};
use crate::store::ConfigStore;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::mpsc;
use std::thread;
use tracing::{error, info};

/// A failure of one unit of concurrent work, aggregated after the join
/// barrier instead of crossing it
#[derive(Debug, Clone)]
pub struct UnitError {
    pub unit: String,
    pub message: String,
}

/// Spawn one worker per unit, wait for all of them, collect every failure
///
/// Workers never abort their siblings; the caller decides after the join
/// whether a non-empty error list fails the phase. Every collected error
/// is logged here.
pub fn run_units<T, F>(units: Vec<(String, T)>, action: F) -> Vec<UnitError>
where
    T: Send,
    F: Fn(T) -> VentResult<()> + Sync,
{
    let (tx, rx) = mpsc::channel();
    thread::scope(|scope| {
        for (unit, payload) in units {
            let tx = tx.clone();
            let action = &action;
            scope.spawn(move || {
                if let Err(err) = action(payload) {
                    let _ = tx.send(UnitError {
                        unit,
                        message: err.to_string(),
                    });
                }
            });
        }
    });
    drop(tx);

    let errors: Vec<UnitError> = rx.try_iter().collect();
    for err in &errors {
        error!(unit = %err.unit, "{}", err.message);
    }
    errors
}

fn parse_marker(line: &str) -> u64 {
    line.trim()
        .strip_prefix("Revision:")
        .and_then(|rest| rest.trim().parse::<u64>().ok())
        .unwrap_or(0)
}

/// One execution target with its revision triple
pub struct ServerHandle {
    name: String,
    executor: Box<dyn Executor>,
    /// Remote directory holding the `new/`, `prod/` and `old/` slots
    remote_root: PathBuf,
    /// Local root of the generated configuration trees
    deploy_base: PathBuf,
    pub state: ServerState,
}

impl ServerHandle {
    pub fn new(
        name: impl Into<String>,
        executor: Box<dyn Executor>,
        remote_root: impl Into<PathBuf>,
        deploy_base: impl Into<PathBuf>,
        enabled: bool,
    ) -> Self {
        Self {
            name: name.into(),
            executor,
            remote_root: remote_root.into(),
            deploy_base: deploy_base.into(),
            state: ServerState {
                enabled,
                ..ServerState::default()
            },
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn executor(&self) -> &dyn Executor {
        self.executor.as_ref()
    }

    pub fn set_conf_revision(&mut self, revision: u64) {
        self.state.conf = revision;
    }

    pub fn needs_deployment(&self) -> bool {
        self.state.needs_deployment()
    }

    pub fn needs_restart(&self) -> bool {
        self.state.needs_restart()
    }

    fn slot(&self, name: &str) -> String {
        shell_quote(&self.remote_root.join(name).to_string_lossy())
    }

    /// Query the target's revision markers, one round-trip for all slots
    pub fn update_revisions(&mut self) -> VentResult<()> {
        let command = format!(
            "for d in {new} {prod} {old}; do \
               if [ -f \"$d/revision.txt\" ]; then cat \"$d/revision.txt\"; \
               else echo 'Revision: 0'; fi; \
             done",
            new = self.slot("new"),
            prod = self.slot("prod"),
            old = self.slot("old"),
        );
        let output = self.executor.execute(&command)?;
        let mut lines = output.stdout.lines();
        self.state.deployed = lines.next().map(parse_marker).unwrap_or(0);
        self.state.installed = lines.next().map(parse_marker).unwrap_or(0);
        self.state.previous = lines.next().map(parse_marker).unwrap_or(0);
        Ok(())
    }

    /// Tar the generated tree, ship it, unpack into the `new/` slot
    pub fn deploy(&mut self, revision: u64) -> VentResult<()> {
        let tree = self.deploy_base.join(&self.name);
        if !tree.is_dir() {
            return Err(VentError::Dispatch(format!(
                "no generated configuration for '{}' under {}",
                self.name,
                self.deploy_base.display()
            )));
        }
        std::fs::write(
            tree.join("revision.txt"),
            format!("Revision: {}\n", revision),
        )?;

        let staging = tempfile::tempdir()?;
        let bundle = staging.path().join("bundle.tar.gz");
        let status = Command::new("tar")
            .arg("-czf")
            .arg(&bundle)
            .arg("-C")
            .arg(&tree)
            .arg(".")
            .stdin(Stdio::null())
            .status()?;
        if !status.success() {
            return Err(VentError::Dispatch(format!(
                "tar failed for '{}' (exit {:?})",
                self.name,
                status.code()
            )));
        }

        let root = shell_quote(&self.remote_root.to_string_lossy());
        self.executor.execute(&format!(
            "rm -rf {root}/new && mkdir -p {root}/new"
        ))?;
        let remote_bundle = self.remote_root.join("bundle.tar.gz");
        self.executor.copy_to(&bundle, &remote_bundle)?;
        self.executor.execute(&format!(
            "tar -xzf {root}/bundle.tar.gz -C {root}/new && rm -f {root}/bundle.tar.gz"
        ))?;

        self.state.deployed = revision;
        info!(server = %self.name, revision, "deployed");
        Ok(())
    }

    /// Rotate `prod` to `old` and promote `new` to `prod`
    ///
    /// One remote shell invocation under `set -e`: either the whole
    /// rotation happens or the previous state stays intact. A failure is
    /// surfaced, never retried.
    pub fn switch_directories(&mut self) -> VentResult<()> {
        let root = shell_quote(&self.remote_root.to_string_lossy());
        self.executor.execute(&format!(
            "set -e; cd {root}; rm -rf old; \
             if [ -d prod ]; then mv prod old; fi; \
             mv new prod; mkdir -p new"
        ))?;
        self.state.previous = self.state.installed;
        self.state.installed = self.state.deployed;
        info!(server = %self.name, revision = self.state.installed, "switched directories");
        Ok(())
    }

    /// Reverse rotation: `prod` back to `new`, `old` back to `prod`
    pub fn undo_switch(&mut self) -> VentResult<()> {
        let root = shell_quote(&self.remote_root.to_string_lossy());
        self.executor.execute(&format!(
            "set -e; cd {root}; rm -rf new; mv prod new; mv old prod"
        ))?;
        self.state.deployed = self.state.installed;
        self.state.installed = self.state.previous;
        self.state.previous = 0;
        info!(server = %self.name, revision = self.state.installed, "undid last switch");
        Ok(())
    }

    /// Run an application command on this target
    pub fn run_command(&self, command: &str) -> VentResult<()> {
        self.executor.execute(command).map(|_| ())
    }
}

/// Owns the server collection and the concurrency helpers
#[derive(Default)]
pub struct ServerManager {
    servers: BTreeMap<String, ServerHandle>,
}

impl ServerManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, handle: ServerHandle) {
        self.servers.insert(handle.name().to_string(), handle);
    }

    pub fn names(&self) -> Vec<String> {
        self.servers.keys().cloned().collect()
    }

    /// Names of the servers currently eligible for deployment
    pub fn enabled_names(&self) -> Vec<String> {
        self.servers
            .values()
            .filter(|handle| handle.state.enabled)
            .map(|handle| handle.name().to_string())
            .collect()
    }

    pub fn get(&self, name: &str) -> Option<&ServerHandle> {
        self.servers.get(name)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut ServerHandle> {
        self.servers.get_mut(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.servers.contains_key(name)
    }

    /// Run an action on every named target concurrently, one worker per
    /// server; returns the collected per-server failures
    pub fn run_on_servers<F>(&mut self, targets: &[String], action: F) -> Vec<UnitError>
    where
        F: Fn(&mut ServerHandle) -> VentResult<()> + Sync,
    {
        let units: Vec<(String, &mut ServerHandle)> = self
            .servers
            .iter_mut()
            .filter(|(name, _)| targets.contains(name))
            .map(|(name, handle)| (name.clone(), handle))
            .collect();
        run_units(units, |handle| action(handle))
    }

    /// `run_on_servers`, reduced to "did everything succeed"
    pub fn run_in_threads<F>(&mut self, targets: &[String], action: F) -> bool
    where
        F: Fn(&mut ServerHandle) -> VentResult<()> + Sync,
    {
        self.run_on_servers(targets, action).is_empty()
    }

    /// Narrow the target set by a predicate, unless `force` keeps them all
    pub fn filter_servers<F>(&self, predicate: F, targets: &[String], force: bool) -> Vec<String>
    where
        F: Fn(&ServerHandle) -> bool,
    {
        if force {
            return targets.to_vec();
        }
        targets
            .iter()
            .filter(|name| self.servers.get(*name).map(&predicate).unwrap_or(false))
            .cloned()
            .collect()
    }

    /// Re-enable a server; stale alternate assignments for pairs it holds
    /// are pruned so only one ventilation record remains
    pub fn enable(&mut self, name: &str, store: &mut dyn ConfigStore) -> VentResult<()> {
        let handle = self
            .servers
            .get_mut(name)
            .ok_or_else(|| VentError::Config(format!("unknown server '{name}'")))?;
        handle.state.enabled = true;
        store.set_enabled(name, true);
        store.prune_alternates(name);
        Ok(())
    }

    /// Disable a server; assignments pointing exclusively at it are
    /// dropped and reassigned by the next ventilation
    pub fn disable(&mut self, name: &str, store: &mut dyn ConfigStore) -> VentResult<()> {
        let handle = self
            .servers
            .get_mut(name)
            .ok_or_else(|| VentError::Config(format!("unknown server '{name}'")))?;
        handle.state.enabled = false;
        store.set_enabled(name, false);
        store.drop_exclusive_assignments(name);
        Ok(())
    }
}
