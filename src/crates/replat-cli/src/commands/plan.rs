use std::path::PathBuf;

use clap::{ArgMatches, Command};
use replat::{CancelToken, ClassRegistry, PlanOptions, QaEngine, create_plan};

use crate::commands::{common_args, selector_from, temp_root, transformer_dirs};
use crate::error::{CliError, ExitStatus};

pub fn command() -> Command {
    common_args(
        Command::new("plan").about("Discover services in the source directory and write a plan"),
    )
}

pub fn run(cancel: &CancelToken, matches: &ArgMatches) -> Result<(), CliError> {
    let source_dir = PathBuf::from(matches.get_one::<String>("source").expect("required arg"));
    if !source_dir.is_dir() {
        return Err(CliError::new(
            format!("the source path {} is not a directory", source_dir.display()),
            ExitStatus::Usage,
        ));
    }
    let plan_path = PathBuf::from(matches.get_one::<String>("plan").expect("defaulted arg"));
    let output_dir = PathBuf::from(matches.get_one::<String>("output").expect("defaulted arg"));
    let project_name = matches
        .get_one::<String>("name")
        .expect("defaulted arg")
        .clone();

    // Planning never prompts; unanswerable questions fall back to defaults.
    let qa = QaEngine::skipping().into_shared();
    let classes = ClassRegistry::with_builtins();

    let (plan, _registry) = create_plan(
        cancel,
        &classes,
        qa,
        PlanOptions {
            project_name,
            source_dir,
            output_dir,
            transformer_dirs: transformer_dirs(matches),
            customizations_dir: matches.get_one::<String>("customizations").map(PathBuf::from),
            selector: selector_from(matches)?,
            temp_root: temp_root()?,
        },
    )?;

    plan.save(&plan_path)?;
    tracing::info!(
        plan = %plan_path.display(),
        services = plan.named_service_count(),
        "plan written"
    );
    Ok(())
}
