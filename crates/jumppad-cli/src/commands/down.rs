use super::{print_report, with_progress, Context, Failure};
use jumppad_core::DestroyOptions;

pub fn run(ctx: &Context, options: DestroyOptions) -> Result<u8, Failure> {
    let report = with_progress(ctx, "destroying resources...", |engine| engine.destroy(&options))?;
    print_report(&report, ctx.json)
}
