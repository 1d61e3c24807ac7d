use std::ffi::OsString;
use std::process::ExitCode;

use clap::{ArgMatches, Command};
use replat::CancelToken;

use crate::commands;
use crate::error::{CliError, ExitStatus};

const NAME: &str = "replat";

pub fn run() -> ExitCode {
    init_tracing();
    match run_cli(std::env::args()) {
        Ok(code) => code,
        Err(err) => {
            err.print();
            err.exit_code()
        }
    }
}

/// Parses CLI arguments and dispatches to the appropriate command with a
/// cancellation token wired to Ctrl-C. Returns a POSIX `sysexits`-compatible
/// `ExitCode`; a cancelled run exits with 130.
pub fn run_cli<I, S>(args: I) -> Result<ExitCode, CliError>
where
    I: IntoIterator<Item = S>,
    S: Into<OsString> + Clone,
{
    let command = build_cli();
    let matches = command.try_get_matches_from(args)?;

    let cancel = CancelToken::new();
    watch_for_interrupt(cancel.clone());

    dispatch(&cancel, &matches)?;
    Ok(ExitCode::SUCCESS)
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .try_init();
}

/// Flips the cancellation token on the first Ctrl-C so the planner and
/// pipeline unwind at their next suspension point.
fn watch_for_interrupt(cancel: CancelToken) {
    let spawned = std::thread::Builder::new()
        .name("replat-signals".into())
        .spawn(move || {
            let Ok(runtime) = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
            else {
                return;
            };
            runtime.block_on(async {
                if tokio::signal::ctrl_c().await.is_ok() {
                    tracing::warn!("interrupt received, cancelling the run");
                    cancel.cancel();
                }
            });
        });
    if let Err(err) = spawned {
        tracing::warn!(error = %err, "could not install the interrupt watcher");
    }
}

fn build_cli() -> Command {
    Command::new(NAME)
        .about("Transform a source repository into Kubernetes deployment artifacts")
        .subcommand_required(true)
        .subcommand(commands::plan::command())
        .subcommand(commands::transform::command())
}

fn dispatch(cancel: &CancelToken, matches: &ArgMatches) -> Result<(), CliError> {
    match matches.subcommand() {
        Some(("plan", sub)) => commands::plan::run(cancel, sub),
        Some(("transform", sub)) => commands::transform::run(cancel, sub),
        _ => Err(CliError::new("missing command", ExitStatus::Usage)),
    }
}
