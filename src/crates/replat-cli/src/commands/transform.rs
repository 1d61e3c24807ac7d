use std::path::PathBuf;

use clap::{Arg, ArgAction, ArgMatches, Command};
use replat::{
    CancelToken, ClassRegistry, InitOptions, Plan, PlanOptions, QaEngine, QaOptions,
    TransformerRegistry, create_plan,
};

use crate::commands::{common_args, selector_from, temp_root, transformer_dirs};
use crate::error::{CliError, ExitStatus};

pub fn command() -> Command {
    common_args(
        Command::new("transform")
            .about("Run the transformation pipeline and materialise the output directory"),
    )
    .arg(
        Arg::new("overwrite")
            .long("overwrite")
            .action(ArgAction::SetTrue)
            .help("Overwrite the output directory if it exists."),
    )
    .arg(
        Arg::new("config")
            .long("config")
            .short('f')
            .value_name("FILE")
            .action(ArgAction::Append)
            .help("Config yaml file answering questions. Repeatable; merged in order."),
    )
    .arg(
        Arg::new("set")
            .long("set")
            .value_name("KEY=VALUE")
            .action(ArgAction::Append)
            .help("Answer a single question on the command line. Repeatable."),
    )
    .arg(
        Arg::new("preset")
            .long("preset")
            .value_name("NAME")
            .action(ArgAction::Append)
            .help("Preset bundle of answers to apply. Repeatable."),
    )
    .arg(
        Arg::new("preset-dir")
            .long("preset-dir")
            .value_name("DIR")
            .action(ArgAction::Append)
            .help("Directory searched for preset bundles. Repeatable."),
    )
    .arg(
        Arg::new("qa-skip")
            .long("qa-skip")
            .action(ArgAction::SetTrue)
            .help("Answer every question from its default instead of prompting."),
    )
    .arg(
        Arg::new("qa-disable-cli")
            .long("qa-disable-cli")
            .action(ArgAction::SetTrue)
            .help("Disable the console prompt."),
    )
    .arg(
        Arg::new("qa-port")
            .long("qa-port")
            .value_name("PORT")
            .value_parser(clap::value_parser!(u16))
            .help("Serve questions over HTTP on this port for out-of-process UIs."),
    )
    .arg(
        Arg::new("qa-cache-out")
            .long("qa-cache-out")
            .value_name("FILE")
            .help("Write every answer to this cache file as it is resolved."),
    )
    .arg(
        Arg::new("config-out")
            .long("config-out")
            .value_name("FILE")
            .help("Write the resolved config to this file."),
    )
    .arg(
        Arg::new("qa-persist-passwords")
            .long("qa-persist-passwords")
            .action(ArgAction::SetTrue)
            .help("Persist password answers to the cache and config outputs."),
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
    let output_dir = PathBuf::from(matches.get_one::<String>("output").expect("defaulted arg"));
    if output_dir.exists() && !matches.get_flag("overwrite") {
        return Err(CliError::new(
            format!(
                "the output directory {} already exists; pass --overwrite to replace it",
                output_dir.display()
            ),
            ExitStatus::Usage,
        ));
    }
    std::fs::create_dir_all(&output_dir)?;

    let plan_path = PathBuf::from(matches.get_one::<String>("plan").expect("defaulted arg"));
    let project_name = matches
        .get_one::<String>("name")
        .expect("defaulted arg")
        .clone();
    let customizations_dir = matches.get_one::<String>("customizations").map(PathBuf::from);

    let mut preset_dirs: Vec<PathBuf> = matches
        .get_many::<String>("preset-dir")
        .map(|values| values.map(PathBuf::from).collect())
        .unwrap_or_default();
    for dir in transformer_dirs(matches) {
        preset_dirs.push(dir.join("presets"));
    }

    let qa = QaEngine::new(QaOptions {
        config_files: matches
            .get_many::<String>("config")
            .map(|values| values.map(PathBuf::from).collect())
            .unwrap_or_default(),
        overrides: matches
            .get_many::<String>("set")
            .map(|values| values.cloned().collect())
            .unwrap_or_default(),
        presets: matches
            .get_many::<String>("preset")
            .map(|values| values.cloned().collect())
            .unwrap_or_default(),
        preset_dirs,
        skip: matches.get_flag("qa-skip"),
        persist_passwords: matches.get_flag("qa-persist-passwords"),
        disable_console: matches.get_flag("qa-disable-cli"),
        port: matches.get_one::<u16>("qa-port").copied(),
        cache_out: matches.get_one::<String>("qa-cache-out").map(PathBuf::from),
        config_out: matches.get_one::<String>("config-out").map(PathBuf::from),
    })?
    .into_shared();
    let classes = ClassRegistry::with_builtins();
    let temp_root = temp_root()?;

    // Reuse a previously written plan when present; plan from scratch
    // otherwise.
    let (mut plan, mut registry) = if plan_path.is_file() {
        let plan = Plan::load(&plan_path)?;
        tracing::info!(plan = %plan_path.display(), "using the existing plan");
        let mut descriptor_dirs = transformer_dirs(matches);
        if let Some(customizations) = customizations_dir
            .clone()
            .or_else(|| plan.spec.customizations_dir.clone())
        {
            descriptor_dirs.push(customizations);
        }
        let registry = TransformerRegistry::init(
            &classes,
            InitOptions {
                descriptor_dirs,
                selector: plan.spec.transformer_selector.clone(),
                project_name: plan.project_name().to_string(),
                source_dir: source_dir.clone(),
                output_dir: output_dir.clone(),
                temp_root,
            },
            qa.clone(),
        )?;
        (plan, registry)
    } else {
        create_plan(
            cancel,
            &classes,
            qa.clone(),
            PlanOptions {
                project_name,
                source_dir,
                output_dir: output_dir.clone(),
                transformer_dirs: transformer_dirs(matches),
                customizations_dir,
                selector: selector_from(matches)?,
                temp_root,
            },
        )?
    };

    plan.retain_transformers(|name| registry.contains(name));
    replat::transform(cancel, &plan, &mut registry, &output_dir)?;
    tracing::info!(output = %output_dir.display(), "transformation written");
    Ok(())
}
