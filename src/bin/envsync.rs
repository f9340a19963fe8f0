// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

use envsync::{
    backup::list_backups,
    config::SyncConfig,
    path::{default_config_path, tildify},
    store::{DopplerCli, ProgressStore},
    Action, EnvironmentBinding, MergeMode, Synchronizer,
};

use anyhow::{anyhow, bail, Result};
use clap::{Parser, Subcommand};
use inquire::Confirm;
use std::{ffi::OsString, fs::write, path::PathBuf, process::exit};
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Debug, Clone, Parser)]
#[command(
    about,
    override_usage = "envsync [options] <command>",
    subcommand_help_heading = "Commands",
    version
)]
struct Cli {
    /// Path to configuration file.
    #[arg(short, long, global = true, value_name = "path")]
    pub config: Option<PathBuf>,

    /// Only run against named binding, can be repeated.
    #[arg(short, long, global = true, value_name = "name")]
    pub only: Vec<String>,

    /// Doppler executable to use instead of `$ENVSYNC_DOPPLER_BIN` or `doppler`.
    #[arg(long, global = true, value_name = "path")]
    pub doppler_bin: Option<OsString>,

    #[command(subcommand)]
    pub command: Command,
}

impl Cli {
    fn run(self) -> Result<()> {
        let config_path = self.config.unwrap_or_else(default_config_path);
        let context = Context {
            config_path,
            only: self.only,
            doppler_bin: self.doppler_bin,
        };

        match self.command {
            Command::Push(opts) => run_push(&context, opts),
            Command::Pull(opts) => run_pull(&context, opts),
            Command::Diff => run_compare(&context, Action::Diff),
            Command::Status => run_compare(&context, Action::Status),
            Command::Backups => run_backups(&context),
            Command::Init(opts) => run_init(&context, opts),
        }
    }
}

#[derive(Debug, Clone, Subcommand)]
enum Command {
    /// Send local keys to the secret store.
    #[command(override_usage = "envsync push [options]")]
    Push(PushOptions),

    /// Bring secret store keys into the local env file.
    #[command(override_usage = "envsync pull [options]")]
    Pull(PullOptions),

    /// Show key differences between env file and secret store.
    Diff,

    /// Summarize how far env file and secret store are apart.
    Status,

    /// List backups taken before destructive pulls.
    Backups,

    /// Write starter configuration file.
    #[command(override_usage = "envsync init [options] --project <name> --config-name <name>")]
    Init(InitOptions),
}

#[derive(Parser, Clone, Debug)]
#[command(author, about, long_about)]
struct PushOptions {
    /// Replace secret store contents entirely with local keys.
    #[arg(short, long)]
    pub force: bool,

    /// Do not ask for confirmation before a forced push.
    #[arg(short, long)]
    pub yes: bool,
}

#[derive(Parser, Clone, Debug)]
#[command(author, about, long_about)]
struct PullOptions {
    /// Replace local env file entirely with secret store keys.
    #[arg(short, long)]
    pub force: bool,
}

#[derive(Parser, Clone, Debug)]
#[command(author, about, long_about)]
struct InitOptions {
    /// Secret store project.
    #[arg(short, long, value_name = "name")]
    pub project: Option<String>,

    /// Secret store config.
    #[arg(long, value_name = "name")]
    pub config_name: Option<String>,

    /// Local env file to synchronize.
    #[arg(short, long, value_name = "path")]
    pub env_file: Option<String>,

    /// Overwrite existing configuration file.
    #[arg(short, long)]
    pub force: bool,
}

struct Context {
    config_path: PathBuf,
    only: Vec<String>,
    doppler_bin: Option<OsString>,
}

impl Context {
    fn bindings(&self) -> Result<Vec<EnvironmentBinding>> {
        let config = SyncConfig::load(&self.config_path)?;
        Ok(config.select_bindings(&self.only)?)
    }

    fn synchronizer(&self) -> Result<Synchronizer<ProgressStore<DopplerCli>>> {
        let doppler = match &self.doppler_bin {
            Some(binary) => DopplerCli::new(binary.clone()),
            None => DopplerCli::from_env(),
        };

        Ok(Synchronizer::new(ProgressStore::new(doppler)?))
    }
}

fn main() {
    let layer = fmt::layer()
        .compact()
        .with_target(false)
        .with_timer(false)
        .without_time();
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info"))
        .unwrap();
    tracing_subscriber::registry()
        .with(layer)
        .with(filter)
        .init();

    if let Err(error) = run() {
        error!("{error:?}");
        exit(1);
    }

    exit(0)
}

fn run() -> Result<()> {
    Cli::parse().run()
}

fn run_push(context: &Context, opts: PushOptions) -> Result<()> {
    let bindings = context.bindings()?;
    let mode = MergeMode::push(opts.force);

    if opts.force && !opts.yes {
        let targets = bindings
            .iter()
            .map(EnvironmentBinding::remote_label)
            .collect::<Vec<_>>()
            .join(", ");
        let confirmed = Confirm::new(&format!(
            "fully replace {targets} with local keys? remote-only keys will be deleted"
        ))
        .with_default(false)
        .prompt()?;

        if !confirmed {
            bail!("forced push aborted");
        }
    }

    run_bindings(context, &bindings, Action::Sync(mode))
}

fn run_pull(context: &Context, opts: PullOptions) -> Result<()> {
    let bindings = context.bindings()?;
    run_bindings(context, &bindings, Action::Sync(MergeMode::pull(opts.force)))
}

fn run_compare(context: &Context, action: Action) -> Result<()> {
    let bindings = context.bindings()?;
    run_bindings(context, &bindings, action)
}

fn run_bindings(
    context: &Context,
    bindings: &[EnvironmentBinding],
    action: Action,
) -> Result<()> {
    let sync = context.synchronizer()?;
    let outcomes = sync.run_all(bindings, action);

    let mut failed = Vec::new();
    for (name, outcome) in outcomes {
        match outcome {
            Ok(report) => print!("{report}"),
            Err(error) => {
                error!("[{name}] {:?}", anyhow!(error));
                failed.push(name);
            }
        }
    }

    if !failed.is_empty() {
        bail!(
            "{} of {} binding(s) failed: {}",
            failed.len(),
            bindings.len(),
            failed.join(", ")
        );
    }

    Ok(())
}

fn run_backups(context: &Context) -> Result<()> {
    for binding in context.bindings()? {
        let backups = list_backups(&binding.local_file, &binding.backup_dir)?;
        if backups.is_empty() {
            println!("[{}] no backups of {}", binding.name, tildify(&binding.local_file));
            continue;
        }

        for backup in backups {
            println!("[{}] {}", binding.name, tildify(backup));
        }
    }

    Ok(())
}

fn run_init(context: &Context, opts: InitOptions) -> Result<()> {
    if context.config_path.exists() && !opts.force {
        bail!(
            "configuration file {:?} already exists, use --force to overwrite",
            context.config_path.display()
        );
    }

    let mut config = SyncConfig::default();
    if let Some(project) = opts.project {
        config.settings.project = project;
    }
    if let Some(config_name) = opts.config_name {
        config.settings.config = config_name;
    }
    if let Some(env_file) = opts.env_file {
        config.settings.env_file = env_file;
    }

    write(&context.config_path, config.to_string())?;
    info!("wrote starter configuration to {:?}", context.config_path.display());

    Ok(())
}
