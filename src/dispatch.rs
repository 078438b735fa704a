//! The deployment pipeline
//!
//! `Dispatcher` sequences one run: reconcile the working copy, ventilate,
//! generate, validate, commit the working copy, deploy to the servers
//! that need it, qualify, persist the assignments, restart. Failure
//! policy in one line: SCM, generation, commit and switch-directories
//! failures abort the run; validation, deploy, qualify and the restart
//! stop/start waves aggregate per-unit failures behind a join barrier,
//! and only the restart waves tolerate them.

use crate::config::Context;
use crate::error::{VentError, VentResult};
use crate::generate::Generator;
use crate::models::{Application, ServerState, VentilationResult};
use crate::revision::RevisionManager;
use crate::server::{run_units, ServerManager, UnitError};
use crate::store::ConfigStore;
use crate::ventilation::Ventilator;
use std::collections::BTreeMap;
use tracing::{info, warn};

/// Early-exit points of the pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopAfter {
    Generation,
    Deployment,
}

/// Per-run options, straight from the CLI
#[derive(Debug, Clone, Default)]
pub struct DispatchOptions {
    /// Deploy and restart everything, ignoring revision predicates
    pub force: bool,
    /// Report what would be deployed, change nothing
    pub dry_run: bool,
    /// Pin the deployed revision instead of HEAD
    pub revision: Option<u64>,
    pub stop_after: Option<StopAfter>,
}

/// Which application command a wave runs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AppPhase {
    Start,
    Stop,
}

impl AppPhase {
    fn command<'a>(&self, app: &'a Application) -> Option<&'a str> {
        match self {
            AppPhase::Start => app.start.as_deref(),
            AppPhase::Stop => app.stop.as_deref(),
        }
    }

    fn label(&self) -> &'static str {
        match self {
            AppPhase::Start => "start",
            AppPhase::Stop => "stop",
        }
    }
}

/// Standalone application action for the `apps` subcommand
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppsAction {
    Start,
    Stop,
    Restart,
}

fn summarize(errors: &[UnitError]) -> String {
    errors
        .iter()
        .map(|e| e.unit.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Drives one pipeline run over an explicit context (no globals)
pub struct Dispatcher<'a> {
    ctx: &'a Context,
    store: &'a mut dyn ConfigStore,
    revisions: &'a mut RevisionManager,
    manager: &'a mut ServerManager,
    generator: &'a dyn Generator,
    options: DispatchOptions,
}

impl<'a> Dispatcher<'a> {
    pub fn new(
        ctx: &'a Context,
        store: &'a mut dyn ConfigStore,
        revisions: &'a mut RevisionManager,
        manager: &'a mut ServerManager,
        generator: &'a dyn Generator,
        options: DispatchOptions,
    ) -> Self {
        revisions.set_force(options.force);
        revisions.set_target_revision(options.revision);
        Self {
            ctx,
            store,
            revisions,
            manager,
            generator,
            options,
        }
    }

    /// Expand and check the requested target servers
    ///
    /// An empty request means every enabled server; disabled servers are
    /// not eligible, so naming one explicitly is a configuration error.
    pub fn resolve_targets(&self, requested: &[String]) -> VentResult<Vec<String>> {
        if requested.is_empty() {
            return Ok(self.manager.enabled_names());
        }
        for name in requested {
            let Some(handle) = self.manager.get(name) else {
                return Err(VentError::Config(format!("unknown server '{name}'")));
            };
            if !handle.state.enabled {
                return Err(VentError::Config(format!("server '{name}' is disabled")));
            }
        }
        Ok(requested.to_vec())
    }

    /// The full pipeline
    pub fn run(&mut self, targets: &[String]) -> VentResult<()> {
        let targets = self.resolve_targets(targets)?;

        // PREPARE_SCM
        self.revisions.prepare()?;

        // GENERATE (ventilation feeds the generator; any error is fatal)
        let ventilation = Ventilator::new(self.ctx).ventilate(self.store)?;
        self.generator
            .generate(&ventilation)
            .map_err(|e| VentError::Dispatch(format!("generation failed: {e}")))?;
        if self.options.stop_after == Some(StopAfter::Generation) {
            info!("stopping after generation as requested");
            return Ok(());
        }

        // VALIDATE (skipped on dry runs, which only query revisions)
        if !self.options.dry_run {
            self.validate_apps(&ventilation, &targets)?;
        }

        // PREPARE_SERVERS
        // Commit the working copy before picking the revision to ship, so
        // the deployed markers record the revision that actually contains
        // this generation instead of lagging one commit behind.
        if !self.options.dry_run {
            self.revisions.commit()?;
        }
        let deploy_revision = self.effective_revision()?;
        if !self.options.force {
            let errors = self
                .manager
                .run_on_servers(&targets, |handle| handle.update_revisions());
            if !errors.is_empty() {
                return Err(VentError::Dispatch(format!(
                    "cannot query revisions on: {}",
                    summarize(&errors)
                )));
            }
        }
        for name in &targets {
            if let Some(handle) = self.manager.get_mut(name) {
                handle.set_conf_revision(deploy_revision);
            }
        }

        // DEPLOY
        let to_deploy = self.manager.filter_servers(
            |handle| handle.needs_deployment(),
            &targets,
            self.options.force,
        );
        if self.options.dry_run {
            if to_deploy.is_empty() {
                info!("dry run: all servers up to date");
            } else {
                info!(servers = %to_deploy.join(", "), revision = deploy_revision, "dry run: would deploy");
            }
            return Ok(());
        }
        if to_deploy.is_empty() {
            info!("all servers up to date");
        } else {
            let errors = self
                .manager
                .run_on_servers(&to_deploy, |handle| handle.deploy(deploy_revision));
            if !errors.is_empty() {
                return Err(VentError::Dispatch(format!(
                    "deployment failed on: {}",
                    summarize(&errors)
                )));
            }

            // QUALIFY, only on the servers that just received the new tree
            self.qualify_apps(&ventilation, &to_deploy)?;
        }

        if self.options.stop_after == Some(StopAfter::Deployment) {
            info!("stopping after deployment as requested");
            return Ok(());
        }

        // COMMIT
        if let Err(e) = self.store.commit() {
            self.store.rollback();
            return Err(VentError::Dispatch(format!("commit failed: {e}")));
        }

        // RESTART
        let to_restart = self.manager.filter_servers(
            |handle| handle.needs_restart(),
            &targets,
            self.options.force,
        );
        if to_restart.is_empty() {
            info!("no restart needed");
            return Ok(());
        }
        self.restart_sequence(&to_restart)
    }

    /// Run every application's validation command on every server it is
    /// ventilated to, one worker per (application, server)
    pub fn validate_apps(
        &self,
        ventilation: &VentilationResult,
        targets: &[String],
    ) -> VentResult<()> {
        let errors = self.run_app_checks(ventilation, targets, |app| app.validate.as_deref());
        if errors.is_empty() {
            Ok(())
        } else {
            Err(VentError::Dispatch(format!(
                "validation failed for: {}",
                summarize(&errors)
            )))
        }
    }

    /// Same aggregation pattern as validation, with the qualify command
    pub fn qualify_apps(
        &self,
        ventilation: &VentilationResult,
        targets: &[String],
    ) -> VentResult<()> {
        let errors = self.run_app_checks(ventilation, targets, |app| app.qualify.as_deref());
        if errors.is_empty() {
            Ok(())
        } else {
            Err(VentError::Dispatch(format!(
                "qualification failed for: {}",
                summarize(&errors)
            )))
        }
    }

    fn run_app_checks<F>(
        &self,
        ventilation: &VentilationResult,
        targets: &[String],
        command_of: F,
    ) -> Vec<UnitError>
    where
        F: Fn(&Application) -> Option<&str>,
    {
        let manager = &*self.manager;
        let mut units = Vec::new();
        for app in &self.ctx.applications {
            let Some(command) = command_of(app) else {
                continue;
            };
            for server in ventilation.servers_for_app(&app.name) {
                if !targets.contains(&server) {
                    continue;
                }
                if let Some(handle) = manager.get(&server) {
                    units.push((
                        format!("{}@{}", app.name, server),
                        (handle, command.to_string()),
                    ));
                }
            }
        }
        run_units(units, |(handle, command)| handle.run_command(&command))
    }

    fn effective_revision(&self) -> VentResult<u64> {
        if let Some(revision) = self.options.revision {
            return Ok(revision);
        }
        let synced = self.revisions.deploy_revision();
        if synced != 0 {
            return Ok(synced);
        }
        self.revisions.last_revision()
    }

    /// Stop everything in priority waves, rotate the directories, start
    /// everything again in the same priority order
    ///
    /// Stop/start failures are logged and tolerated; a failed rotation
    /// aborts immediately. Both waves run priority-descending: this
    /// mirrors the long-standing behaviour of the tool, where stop and
    /// start deliberately share one ordering (see the regression test).
    pub fn restart_sequence(&mut self, targets: &[String]) -> VentResult<()> {
        let stop_errors = self.run_app_waves(AppPhase::Stop, None, targets);
        if !stop_errors.is_empty() {
            warn!(units = %summarize(&stop_errors), "stop failures (continuing)");
        }

        let switch_errors = self
            .manager
            .run_on_servers(targets, |handle| handle.switch_directories());
        if !switch_errors.is_empty() {
            return Err(VentError::Dispatch(format!(
                "switch-directories failed on: {}",
                summarize(&switch_errors)
            )));
        }

        let start_errors = self.run_app_waves(AppPhase::Start, None, targets);
        if !start_errors.is_empty() {
            warn!(units = %summarize(&start_errors), "start failures (continuing)");
        }
        Ok(())
    }

    /// Run one application command per wave, priority-descending
    ///
    /// Applications sharing a priority execute concurrently as one wave;
    /// the next (strictly lower) wave starts only after the previous
    /// wave's join barrier. Within a worker the command is attempted on
    /// every target server even when one of them fails; the per-server
    /// failures are folded into the unit's error.
    fn run_app_waves(
        &self,
        phase: AppPhase,
        only: Option<&[String]>,
        targets: &[String],
    ) -> Vec<UnitError> {
        let manager = &*self.manager;
        let mut waves: BTreeMap<i32, Vec<&Application>> = BTreeMap::new();
        for app in &self.ctx.applications {
            if let Some(names) = only {
                if !names.contains(&app.name) {
                    continue;
                }
            }
            waves.entry(app.priority).or_default().push(app);
        }

        let mut errors = Vec::new();
        for (priority, wave) in waves.iter().rev() {
            info!(priority, phase = phase.label(), "running wave");
            let units: Vec<(String, &Application)> = wave
                .iter()
                .map(|app| (format!("{} [{}]", app.name, phase.label()), *app))
                .collect();
            let wave_errors = run_units(units, |app| {
                let Some(command) = phase.command(app) else {
                    return Ok(());
                };
                let mut failures = Vec::new();
                for server in targets {
                    if let Some(handle) = manager.get(server) {
                        if let Err(e) = handle.run_command(command) {
                            failures.push(format!("{server}: {e}"));
                        }
                    }
                }
                if failures.is_empty() {
                    Ok(())
                } else {
                    Err(VentError::Dispatch(failures.join("; ")))
                }
            });
            errors.extend(wave_errors);
        }
        errors
    }

    /// `apps` subcommand: start/stop/restart the named applications
    /// (all of them when `names` is empty) using the same wave machinery
    pub fn run_apps(
        &mut self,
        names: &[String],
        action: AppsAction,
        targets: &[String],
    ) -> VentResult<()> {
        let targets = self.resolve_targets(targets)?;
        for name in names {
            if self.ctx.application(name).is_none() {
                return Err(VentError::Config(format!("unknown application '{name}'")));
            }
        }
        let only = if names.is_empty() { None } else { Some(names) };

        let mut errors = Vec::new();
        if matches!(action, AppsAction::Stop | AppsAction::Restart) {
            errors.extend(self.run_app_waves(AppPhase::Stop, only, &targets));
        }
        if matches!(action, AppsAction::Start | AppsAction::Restart) {
            errors.extend(self.run_app_waves(AppPhase::Start, only, &targets));
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(VentError::Dispatch(format!(
                "application commands failed: {}",
                summarize(&errors)
            )))
        }
    }

    /// `undo` subcommand: reverse the last rotation, then restart unless
    /// asked not to
    pub fn undo(&mut self, targets: &[String], no_restart: bool) -> VentResult<()> {
        let targets = self.resolve_targets(targets)?;

        let errors = self
            .manager
            .run_on_servers(&targets, |handle| handle.undo_switch());
        if !errors.is_empty() {
            return Err(VentError::Dispatch(format!(
                "undo failed on: {}",
                summarize(&errors)
            )));
        }

        if !no_restart {
            let stop_errors = self.run_app_waves(AppPhase::Stop, None, &targets);
            if !stop_errors.is_empty() {
                warn!(units = %summarize(&stop_errors), "stop failures (continuing)");
            }
            let start_errors = self.run_app_waves(AppPhase::Start, None, &targets);
            if !start_errors.is_empty() {
                warn!(units = %summarize(&start_errors), "start failures (continuing)");
            }
        }
        Ok(())
    }

    /// `info` subcommand: fresh revision triples for the selected servers
    pub fn info(&mut self, targets: &[String]) -> VentResult<Vec<(String, ServerState)>> {
        let targets = self.resolve_targets(targets)?;
        let errors = self
            .manager
            .run_on_servers(&targets, |handle| handle.update_revisions());
        if !errors.is_empty() {
            return Err(VentError::Dispatch(format!(
                "cannot query revisions on: {}",
                summarize(&errors)
            )));
        }
        Ok(targets
            .iter()
            .filter_map(|name| self.manager.get(name).map(|h| (name.clone(), h.state)))
            .collect())
    }
}
