//! `registry-prune`: remove orphaned objects from registry storage.

use std::io::Write as _;
use std::process::ExitCode;

use camino::Utf8PathBuf;
use clap::{ArgAction, Parser};
use eyre::WrapErr as _;
use registry_gc::{PruneError, PruneOptions, PruneOutcome, RegistryConfig};

#[derive(Debug, Parser)]
#[command(version, about = "Remove orphaned blobs, manifests, tags and repositories from registry storage")]
struct Args {
    /// Configuration file
    #[arg(env = registry_gc::config::CONFIGURATION_PATH_ENV)]
    config: Option<Utf8PathBuf>,

    /// Remove repositories without any manifests
    #[arg(short = 'e', long)]
    remove_empty: bool,

    /// Report only, never delete
    #[arg(short = 'n', long)]
    dry_run: bool,

    /// Ask before deleting
    #[arg(
        short = 'c',
        long,
        action = ArgAction::Set,
        default_value_t = true,
        num_args = 0..=1,
        require_equals = true,
        default_missing_value = "true"
    )]
    confirm: bool,

    /// List every object, not just counts
    #[arg(short = 'v', long)]
    verbose: bool,
}

impl Args {
    fn options(&self) -> PruneOptions {
        PruneOptions {
            remove_empty: self.remove_empty,
            dry_run: self.dry_run,
            confirm: self.confirm,
            verbose: self.verbose,
        }
    }
}

#[tokio::main]
async fn main() -> eyre::Result<ExitCode> {
    let args = Args::parse();

    let default_level = if args.verbose { "info" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    let path = args
        .config
        .clone()
        .ok_or(registry_gc::ConfigError::Missing)?;
    let config = RegistryConfig::load(&path).await?;
    let pruner = config
        .pruner(args.options())
        .await
        .wrap_err_with(|| format!("configuration {path}"))?;

    let cancel = pruner.cancellation();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupted, stopping after the current operation");
            cancel.cancel();
        }
    });

    let graph = pruner.load_registry_graph().await?;

    let mut stdout = std::io::stdout().lock();
    let dirty = pruner.report_orphans(&graph, &mut stdout)?;
    if !dirty {
        writeln!(stdout, "Nothing to prune.")?;
        return Ok(ExitCode::SUCCESS);
    }

    let mut stdin = std::io::stdin().lock();
    match pruner.prune(&graph, &mut stdin, &mut stdout).await {
        Ok(PruneOutcome::DryRun) => writeln!(stdout, "Dry run, nothing changed.")?,
        Ok(PruneOutcome::Declined) => writeln!(stdout, "Nothing changed.")?,
        Ok(PruneOutcome::Clean) => writeln!(stdout, "Nothing to prune.")?,
        Ok(PruneOutcome::Pruned(report)) => writeln!(stdout, "Pruned: {report}")?,
        Err(
            ref error @ (PruneError::Vacuum {
                ref report,
                ref failures,
            }
            | PruneError::VacuumCancelled {
                ref report,
                ref failures,
            }),
        ) => {
            writeln!(stdout, "Partially pruned: {report}")?;
            if matches!(error, PruneError::VacuumCancelled { .. }) {
                writeln!(stdout, "Cancelled before finishing.")?;
            }
            let mut stderr = std::io::stderr().lock();
            for failure in failures {
                writeln!(stderr, "error: {failure}: {}", failure.source)?;
            }
            writeln!(stderr, "error: {} deletions failed", failures.len())?;
            return Ok(ExitCode::FAILURE);
        }
        Err(error) => return Err(error.into()),
    }

    Ok(ExitCode::SUCCESS)
}
