use super::{print_report, with_progress, Context, Failure};
use jumppad_core::config::parse_variable;
use jumppad_core::ApplyOptions;
use std::path::{Path, PathBuf};

pub struct UpArgs<'a> {
    pub path: &'a Path,
    pub vars: &'a [String],
    pub vars_file: Option<PathBuf>,
    pub parallelism: Option<usize>,
    pub force_update: bool,
    pub no_destroy_orphans: bool,
}

pub fn options(args: &UpArgs<'_>) -> Result<ApplyOptions, Failure> {
    let mut variables = std::collections::BTreeMap::new();
    for pair in args.vars {
        let (key, value) = parse_variable(pair)?;
        variables.insert(key, value);
    }
    Ok(ApplyOptions {
        variables,
        variables_file: args.vars_file.clone(),
        parallelism: args.parallelism,
        force: args.force_update,
        destroy_orphans: args.no_destroy_orphans.then_some(false),
    })
}

pub fn run(ctx: &Context, args: &UpArgs<'_>) -> Result<u8, Failure> {
    let options = options(args)?;
    if std::env::var("JUMPPAD_SKIP_PREREQS").as_deref() != Ok("1") {
        let missing = jumppad_runtime::check_prereqs();
        if !missing.is_empty() {
            tracing::warn!("{}", jumppad_runtime::format_missing(&missing));
        }
    }
    let report = with_progress(ctx, "applying blueprint...", |engine| {
        engine.apply(args.path, &options)
    })?;
    print_report(&report, ctx.json)
}
