use super::{print_report, with_progress, Context, Failure};

pub fn run(ctx: &Context) -> Result<u8, Failure> {
    let report = with_progress(ctx, "refreshing resources...", jumppad_core::Engine::refresh)?;
    print_report(&report, ctx.json)
}
