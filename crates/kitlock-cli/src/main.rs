mod completion;
mod config;
mod dispatch;
mod render;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use kitlock_installer::root_error;
use tracing::error;

use crate::completion::CliCompletionShell;
use crate::dispatch::{run_cli, CliContext};

#[derive(Parser, Debug)]
#[command(name = "spec-kit-agents")]
#[command(
    about = "Install spec-kit-agents in lockstep with its pinned spec-kit",
    long_about = None
)]
struct Cli {
    /// Log debug output.
    #[arg(short, long, global = true, conflicts_with = "quiet")]
    verbose: bool,
    /// Only log errors.
    #[arg(short, long, global = true)]
    quiet: bool,
    /// Also append log records to this file.
    #[arg(long, global = true, value_name = "PATH")]
    log_file: Option<PathBuf>,
    /// Bundle checkout or extracted package to install from.
    #[arg(long, global = true, value_name = "PATH")]
    source: Option<PathBuf>,
    /// Require the extracted package to hash to this `sha256-<hex>` token.
    #[arg(long, global = true, value_name = "TOKEN", requires = "source")]
    source_integrity: Option<String>,
    #[arg(long, global = true, value_name = "PATH")]
    working_dir: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Install the bundle and its pinned spec-kit.
    Install {
        #[arg(long)]
        prefix: Option<PathBuf>,
        #[arg(long)]
        global: bool,
        #[arg(long)]
        force: bool,
        #[arg(long)]
        dry_run: bool,
    },
    /// Show the recorded installation.
    Status {
        #[arg(long)]
        prefix: Option<PathBuf>,
    },
    /// Verify the installed spec-kit against the manifest's compatibility window.
    Check {
        #[arg(long)]
        prefix: Option<PathBuf>,
    },
    /// Update to the source's versions, restoring a backup on failure.
    Update {
        #[arg(long)]
        prefix: Option<PathBuf>,
        #[arg(long)]
        skip_backup: bool,
        #[arg(long)]
        force: bool,
        #[arg(long)]
        skip_verify: bool,
    },
    /// Restore a backup taken before an update.
    Rollback {
        #[arg(long)]
        prefix: Option<PathBuf>,
        #[arg(long, value_name = "ID")]
        backup_id: Option<String>,
        /// List available backups instead of restoring.
        #[arg(long)]
        list: bool,
        /// Skip the confirmation prompt.
        #[arg(short = 'y', long)]
        force: bool,
    },
    /// Delete backups older than the retention period.
    Prune {
        #[arg(long)]
        prefix: Option<PathBuf>,
        #[arg(long, value_name = "N")]
        older_than_days: Option<u32>,
    },
    Version,
    Completions {
        #[arg(value_enum)]
        shell: CliCompletionShell,
    },
}

fn main() {
    let cli = Cli::parse();
    let mut context = match CliContext::from_cli(&cli) {
        Ok(context) => context,
        Err(err) => {
            eprintln!("error: {err:#}");
            std::process::exit(1);
        }
    };

    let result = tracing::dispatcher::with_default(&context.dispatch, || {
        run_cli(cli.command, &context)
    });
    if let Err(err) = result {
        fatal(&mut context, &err);
    }
    context.flush_logs();
}

/// Logs the error that ended the run, flushes the log file and exits 1.
fn fatal(context: &mut CliContext, err: &anyhow::Error) -> ! {
    tracing::dispatcher::with_default(&context.dispatch, || {
        if root_error(err).is_some_and(|root| root.requires_manual_intervention()) {
            error!(
                component = "cli",
                "The installation may be inconsistent; inspect 'rollback --list' and restore manually"
            );
        }
        error!(component = "cli", fatal = true, "{err:#}");
    });
    context.flush_logs();
    std::process::exit(1);
}
