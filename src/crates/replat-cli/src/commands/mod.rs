pub mod plan;
pub mod transform;

use std::path::PathBuf;

use clap::{Arg, ArgAction, ArgMatches, Command};
use replat::LabelSelector;

use crate::error::{CliError, ExitStatus};

/// Flags shared by the `plan` and `transform` commands.
pub fn common_args(command: Command) -> Command {
    command
        .arg(
            Arg::new("source")
                .long("source")
                .short('s')
                .value_name("DIR")
                .required(true)
                .help("Path of the source directory to plan against."),
        )
        .arg(
            Arg::new("name")
                .long("name")
                .short('n')
                .value_name("NAME")
                .default_value("myproject")
                .help("Name of the project."),
        )
        .arg(
            Arg::new("transformers")
                .long("transformers")
                .short('t')
                .value_name("DIR")
                .action(ArgAction::Append)
                .help("Directory containing transformer descriptors. Repeatable."),
        )
        .arg(
            Arg::new("customizations")
                .long("customizations")
                .short('c')
                .value_name("DIR")
                .help("Directory with additional transformer descriptors overriding built-ins."),
        )
        .arg(
            Arg::new("transformer-selector")
                .long("transformer-selector")
                .value_name("SELECTOR")
                .help("Label selector filtering the transformers to use, e.g. 'tier=default,!legacy'."),
        )
        .arg(
            Arg::new("plan")
                .long("plan")
                .short('p')
                .value_name("FILE")
                .default_value(replat::DEFAULT_PLAN_FILE)
                .help("Path of the plan file."),
        )
        .arg(
            Arg::new("output")
                .long("output")
                .short('o')
                .value_name("DIR")
                .default_value("deploy")
                .help("Path of the output directory."),
        )
}

pub fn selector_from(matches: &ArgMatches) -> Result<LabelSelector, CliError> {
    match matches.get_one::<String>("transformer-selector") {
        Some(selector) => LabelSelector::parse(selector)
            .map_err(|err| CliError::new(err.to_string(), ExitStatus::Usage)),
        None => Ok(LabelSelector::everything()),
    }
}

pub fn transformer_dirs(matches: &ArgMatches) -> Vec<PathBuf> {
    matches
        .get_many::<String>("transformers")
        .map(|values| values.map(PathBuf::from).collect())
        .unwrap_or_default()
}

/// Per-process scratch space for transformer temp directories.
pub fn temp_root() -> Result<PathBuf, CliError> {
    let root = std::env::temp_dir().join(format!("replat-{}", std::process::id()));
    std::fs::create_dir_all(&root)?;
    Ok(root)
}
