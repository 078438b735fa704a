//! Vent CLI - configuration deployment orchestrator
//!
//! Usage: vent <COMMAND>
//!
//! Commands:
//!   deploy  Run the full pipeline: sync, generate, validate, deploy, restart
//!   apps    Start, stop or restart managed applications
//!   undo    Revert the last deployment on the given servers
//!   info    Show the revision state of the deployment servers
//!   server  Enable or disable a deployment server

use std::collections::BTreeSet;

use anyhow::Result;
use clap::Parser;

use vent::cli::{Cli, Commands};
use vent::config::{Config, Context};
use vent::dispatch::{AppsAction, DispatchOptions, Dispatcher, StopAfter};
use vent::generate::FileTreeGenerator;
use vent::remote::{Executor, LocalExecutor, SshExecutor};
use vent::revision::{RevisionManager, ScmBackend, SvnBackend};
use vent::server::{ServerHandle, ServerManager};
use vent::store::{ConfigStore, FileStore};

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let config = Config::load(&cli.config)?;
    let ctx = Context::from_config(&config);

    match cli.command {
        Commands::Deploy {
            force,
            dry_run,
            revision,
            stop_after_generation,
            stop_after_push,
            servers,
        } => {
            let stop_after = if stop_after_generation {
                Some(StopAfter::Generation)
            } else if stop_after_push {
                Some(StopAfter::Deployment)
            } else {
                None
            };
            let options = DispatchOptions {
                force,
                dry_run,
                revision,
                stop_after,
            };
            cmd_deploy(&config, &ctx, options, &servers, cli.json)
        }
        Commands::Apps {
            start,
            stop,
            restart,
            apps,
        } => {
            let action = match (start, stop, restart) {
                (true, _, _) => AppsAction::Start,
                (_, true, _) => AppsAction::Stop,
                (_, _, true) => AppsAction::Restart,
                _ => anyhow::bail!("specify one of --start, --stop or --restart"),
            };
            cmd_apps(&config, &ctx, &apps, action, cli.json)
        }
        Commands::Undo {
            no_restart,
            servers,
        } => cmd_undo(&config, &ctx, &servers, no_restart, cli.json),
        Commands::Info { servers } => cmd_info(&config, &ctx, &servers, cli.json),
        Commands::Server {
            name,
            enable,
            disable,
        } => {
            if !enable && !disable {
                anyhow::bail!("specify --enable or --disable");
            }
            cmd_server(&config, &name, enable, cli.json)
        }
    }
}

fn init_tracing(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// Assemble the run-scoped store, server collection and revision manager
/// from the loaded configuration
fn build_runtime(config: &Config) -> Result<(FileStore, ServerManager, RevisionManager)> {
    let configured: BTreeSet<String> = config
        .servers
        .iter()
        .filter(|s| s.enabled)
        .map(|s| s.name.clone())
        .collect();
    let store = FileStore::load(&config.paths.state_file, configured)?;

    let mut manager = ServerManager::new();
    for server in &config.servers {
        let executor: Box<dyn Executor> = match &server.address {
            Some(address) => Box::new(SshExecutor::new(server.name.as_str(), address.as_str())),
            None => Box::new(LocalExecutor::new(server.name.as_str())),
        };
        manager.insert(ServerHandle::new(
            server.name.as_str(),
            executor,
            &config.paths.remote_root,
            &config.paths.deploy_base,
            store.is_enabled(&server.name),
        ));
    }

    let backend = config.scm.as_ref().map(|scm| {
        Box::new(SvnBackend::new(
            &config.paths.working_copy,
            scm.command.as_str(),
        )) as Box<dyn ScmBackend>
    });
    let revisions = RevisionManager::new(
        backend,
        &config.paths.working_copy,
        config.paths.general_dir.as_str(),
    );

    Ok((store, manager, revisions))
}

fn cmd_deploy(
    config: &Config,
    ctx: &Context,
    options: DispatchOptions,
    servers: &[String],
    json: bool,
) -> Result<()> {
    if !json {
        println!("🚀 Vent Deploy");
        if options.force {
            println!("Mode: Force");
        }
        if options.dry_run {
            println!("Mode: Dry run");
        }
        if let Some(revision) = options.revision {
            println!("Revision: {}", revision);
        }
    }

    let (mut store, mut manager, mut revisions) = build_runtime(config)?;
    let generator = FileTreeGenerator::new(&config.paths.deploy_base);
    let mut dispatcher = Dispatcher::new(
        ctx,
        &mut store,
        &mut revisions,
        &mut manager,
        &generator,
        options,
    );

    let result = dispatcher.run(servers);
    report("deploy", result, json)
}

fn cmd_apps(
    config: &Config,
    ctx: &Context,
    apps: &[String],
    action: AppsAction,
    json: bool,
) -> Result<()> {
    let (mut store, mut manager, mut revisions) = build_runtime(config)?;
    let generator = FileTreeGenerator::new(&config.paths.deploy_base);
    let mut dispatcher = Dispatcher::new(
        ctx,
        &mut store,
        &mut revisions,
        &mut manager,
        &generator,
        DispatchOptions::default(),
    );

    let result = dispatcher.run_apps(apps, action, &[]);
    report("apps", result, json)
}

fn cmd_undo(
    config: &Config,
    ctx: &Context,
    servers: &[String],
    no_restart: bool,
    json: bool,
) -> Result<()> {
    if !json {
        println!("↩️  Vent Undo");
    }

    let (mut store, mut manager, mut revisions) = build_runtime(config)?;
    let generator = FileTreeGenerator::new(&config.paths.deploy_base);
    let mut dispatcher = Dispatcher::new(
        ctx,
        &mut store,
        &mut revisions,
        &mut manager,
        &generator,
        DispatchOptions::default(),
    );

    let result = dispatcher.undo(servers, no_restart);
    report("undo", result, json)
}

fn cmd_info(config: &Config, ctx: &Context, servers: &[String], json: bool) -> Result<()> {
    let (mut store, mut manager, mut revisions) = build_runtime(config)?;
    let generator = FileTreeGenerator::new(&config.paths.deploy_base);
    let mut dispatcher = Dispatcher::new(
        ctx,
        &mut store,
        &mut revisions,
        &mut manager,
        &generator,
        DispatchOptions::default(),
    );

    let states = dispatcher.info(servers)?;

    if json {
        for (name, state) in &states {
            let output = serde_json::json!({
                "event": "info",
                "server": name,
                "enabled": state.enabled,
                "deployed": state.deployed,
                "installed": state.installed,
                "previous": state.previous,
                "needs_restart": state.needs_restart(),
            });
            println!("{}", serde_json::to_string(&output)?);
        }
    } else {
        println!("📊 Server state:\n");
        for (name, state) in &states {
            let flag = if state.enabled { "" } else { " (disabled)" };
            println!("┌─ {}{}", name, flag);
            println!("│  Deployed:  {}", state.deployed);
            println!("│  Installed: {}", state.installed);
            println!("│  Previous:  {}", state.previous);
            if state.needs_restart() {
                println!("│  ⚠ restart pending");
            }
            println!("└─");
        }
    }

    Ok(())
}

fn cmd_server(config: &Config, name: &str, enable: bool, json: bool) -> Result<()> {
    let (mut store, mut manager, _) = build_runtime(config)?;

    let result = if enable {
        manager.enable(name, &mut store)
    } else {
        manager.disable(name, &mut store)
    };
    let result = result.and_then(|_| store.commit());

    if !json && result.is_ok() {
        if enable {
            println!("✓ Server '{}' enabled", name);
        } else {
            println!("✓ Server '{}' disabled (assignments will be reventilated)", name);
        }
    }
    report("server", result, json)
}

/// Uniform command epilogue: JSON event or emoji line, error becomes the
/// process exit status
fn report(event: &str, result: vent::error::VentResult<()>, json: bool) -> Result<()> {
    match result {
        Ok(()) => {
            if json {
                let output = serde_json::json!({
                    "event": event,
                    "status": "success",
                });
                println!("{}", serde_json::to_string(&output)?);
            } else if event != "server" {
                println!("\n🟢 {} succeeded", event);
            }
            Ok(())
        }
        Err(err) => {
            if json {
                let output = serde_json::json!({
                    "event": event,
                    "status": "error",
                    "message": err.to_string(),
                });
                println!("{}", serde_json::to_string(&output)?);
                std::process::exit(1);
            }
            println!("\n🔴 {} FAILED", event);
            Err(err.into())
        }
    }
}
