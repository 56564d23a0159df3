use std::io::{self, BufRead, IsTerminal, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Duration;
use kitlock_installer::{
    default_user_home, file_writer, line_layer, resolve_path, ArchiveSource, BundleSource,
    InstallEnv, InstallOptions, Lifecycle, LogLevel, RepositorySource, RollbackOptions,
    UpdateOptions,
};
use semver::Version;
use tracing::{debug, info, warn, Dispatch};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;

use crate::completion::write_completions_script;
use crate::config::{
    default_config_path, load_file_config, resolve_settings, Overrides, Settings, CONFIG_ENV,
    LOG_ENV, NO_COLOR_ENV,
};
use crate::render::{
    format_backup_list_lines, format_check_lines, format_install_lines, format_rollback_lines,
    format_status_lines, format_update_check_line, format_update_lines, print_lines,
    console_layer, render_section_header, resolve_output_style, OutputStyle, TerminalProgress,
};
use crate::{Cli, Commands};

const DEFAULT_RETENTION_DAYS: u32 = 30;

pub struct CliContext {
    pub dispatch: Dispatch,
    pub settings: Settings,
    pub style: OutputStyle,
    pub env: InstallEnv,
    pub source_root: PathBuf,
    pub source_integrity: Option<String>,
    /// Flushes the log file when dropped.
    log_guard: Option<WorkerGuard>,
}

impl CliContext {
    pub fn from_cli(cli: &Cli) -> Result<Self> {
        let home_dir = default_user_home()?;
        let cwd = std::env::current_dir().context("failed to resolve current directory")?;
        let working_dir = match &cli.working_dir {
            Some(path) => resolve_path(path, &cwd, &home_dir),
            None => cwd.clone(),
        };
        let env = InstallEnv::new(working_dir, home_dir);

        let config_path = std::env::var_os(CONFIG_ENV)
            .filter(|value| !value.is_empty())
            .map(|value| env.resolve(Path::new(&value)))
            .unwrap_or_else(|| default_config_path(&env.home_dir));
        let file = load_file_config(&config_path)?;

        let overrides = Overrides {
            verbose: cli.verbose,
            quiet: cli.quiet,
            log_file: cli.log_file.clone(),
            env_log_level: std::env::var(LOG_ENV)
                .ok()
                .filter(|value| !value.trim().is_empty()),
            no_color: std::env::var_os(NO_COLOR_ENV).is_some_and(|value| !value.is_empty()),
        };
        let settings = resolve_settings(&overrides, &file)?;
        let style = resolve_output_style(settings.color, io::stderr().is_terminal());

        let (file_layer, log_guard) = match &settings.log_file {
            Some(log_file) => {
                let (writer, guard) = file_writer(&env.resolve(log_file))?;
                (Some(line_layer(writer)), Some(guard))
            }
            None => (None, None),
        };
        let dispatch = Dispatch::new(
            tracing_subscriber::registry()
                .with(settings.log_level.level_filter())
                .with(console_layer(style))
                .with(file_layer),
        );

        let source_root = cli
            .source
            .as_deref()
            .map(|path| env.resolve(path))
            .unwrap_or_else(|| env.working_dir.clone());

        Ok(Self {
            dispatch,
            settings,
            style,
            env,
            source_root,
            source_integrity: cli.source_integrity.clone(),
            log_guard,
        })
    }

    /// Drops the log file writer, waiting for queued records to be written.
    pub fn flush_logs(&mut self) {
        self.log_guard.take();
    }

    fn source(&self) -> Box<dyn BundleSource> {
        match &self.source_integrity {
            Some(token) => Box::new(ArchiveSource::new(&self.source_root).with_integrity(token)),
            None => Box::new(RepositorySource::new(&self.source_root)),
        }
    }

    fn lifecycle<'a>(&self, source: &'a dyn BundleSource) -> Result<Lifecycle<'a>> {
        Ok(
            Lifecycle::new(self.env.clone(), source, bundle_version()?, &self.dispatch)
                .with_observer(Arc::new(TerminalProgress::new(self.style))),
        )
    }

    /// Summary output for mutating commands, suppressed by `--quiet`.
    fn report(&self, title: &str, lines: &[String]) {
        if self.settings.log_level > LogLevel::Info {
            return;
        }
        if let Some(header) = render_section_header(self.style, title) {
            println!();
            println!("{header}");
        }
        print_lines(lines);
    }
}

pub fn bundle_version() -> Result<Version> {
    Version::parse(env!("CARGO_PKG_VERSION")).context("package version is not valid semver")
}

pub fn run_cli(command: Commands, ctx: &CliContext) -> Result<()> {
    match command {
        Commands::Install {
            prefix,
            global,
            force,
            dry_run,
        } => {
            let source = ctx.source();
            let report = ctx.lifecycle(source.as_ref())?.install(&InstallOptions {
                prefix,
                global,
                force,
                dry_run,
            })?;
            ctx.report("install", &format_install_lines(&report));
        }
        Commands::Status { prefix } => {
            let source = ctx.source();
            let lifecycle = ctx.lifecycle(source.as_ref())?;
            let status = lifecycle.status(prefix.as_deref())?;
            print_lines(&format_status_lines(&status));
            if status.installed {
                match lifecycle.check_for_updates(prefix.as_deref()) {
                    Ok(check) => println!("{}", format_update_check_line(&check)),
                    Err(err) => debug!(component = "cli", "Update check skipped: {err:#}"),
                }
            }
        }
        Commands::Check { prefix } => {
            let source = ctx.source();
            let result = ctx.lifecycle(source.as_ref())?.check(prefix.as_deref())?;
            print_lines(&format_check_lines(&result));
        }
        Commands::Update {
            prefix,
            skip_backup,
            force,
            skip_verify,
        } => {
            let source = ctx.source();
            let report = ctx.lifecycle(source.as_ref())?.update(&UpdateOptions {
                prefix,
                skip_backup,
                force,
                skip_verify,
                retention_days: ctx.settings.backup_retention_days,
            })?;
            ctx.report("update", &format_update_lines(&report));
        }
        Commands::Rollback {
            prefix,
            backup_id,
            list,
            force,
        } => {
            let source = ctx.source();
            let lifecycle = ctx.lifecycle(source.as_ref())?;
            if list {
                let backups = lifecycle.list_backups(prefix.as_deref())?;
                print_lines(&format_backup_list_lines(&backups));
                return Ok(());
            }

            if !force {
                let target = backup_id
                    .clone()
                    .unwrap_or_else(|| "the most recent backup".to_string());
                let prefix_path = lifecycle.resolve_prefix(prefix.as_deref());
                warn!(
                    component = "cli",
                    "This will replace {} with {target}",
                    prefix_path.display()
                );
                let stdin = io::stdin();
                let mut stdout = io::stdout();
                if !confirm("Continue with rollback?", &mut stdin.lock(), &mut stdout)? {
                    info!(component = "cli", "Rollback cancelled");
                    return Ok(());
                }
            }

            let report = lifecycle.rollback(&RollbackOptions { prefix, backup_id })?;
            ctx.report("rollback", &format_rollback_lines(&report));
        }
        Commands::Prune {
            prefix,
            older_than_days,
        } => {
            let days = older_than_days
                .or(ctx.settings.backup_retention_days)
                .unwrap_or(DEFAULT_RETENTION_DAYS);
            let source = ctx.source();
            let removed = ctx
                .lifecycle(source.as_ref())?
                .prune_backups(prefix.as_deref(), Duration::days(i64::from(days)))?;
            println!("removed {removed} backup(s) older than {days} days");
        }
        Commands::Version => {
            println!("{}", env!("CARGO_PKG_VERSION"));
        }
        Commands::Completions { shell } => {
            let mut stdout = io::stdout();
            write_completions_script(shell, &mut stdout)?;
        }
    }

    Ok(())
}

/// Asks a yes/no question; anything but `y` or `yes` declines.
pub fn confirm<R: BufRead, W: Write>(prompt: &str, input: &mut R, output: &mut W) -> Result<bool> {
    write!(output, "{prompt} [y/N]: ").context("failed to write prompt")?;
    output.flush().context("failed to flush prompt")?;

    let mut answer = String::new();
    input
        .read_line(&mut answer)
        .context("failed to read confirmation")?;
    Ok(matches!(
        answer.trim().to_ascii_lowercase().as_str(),
        "y" | "yes"
    ))
}
