use super::{json_pretty, Context, Failure, EXIT_SUCCESS};
use jumppad_core::ApplyOptions;
use std::path::Path;

pub fn run(ctx: &Context, path: &Path, options: &ApplyOptions) -> Result<u8, Failure> {
    let report = ctx.engine(None)?.diff(path, options)?;
    if ctx.json {
        println!("{}", json_pretty(&report)?);
    } else if report.has_changes() {
        for id in &report.new {
            println!("  + {id}");
        }
        for id in &report.changed {
            println!("  ~ {id}");
        }
        for id in &report.removed {
            println!("  - {id}");
        }
        println!(
            "{} to add, {} to change, {} to remove",
            report.new.len(),
            report.changed.len(),
            report.removed.len()
        );
    } else {
        println!("no changes, {} resources up to date", report.unchanged.len());
    }
    Ok(EXIT_SUCCESS)
}
