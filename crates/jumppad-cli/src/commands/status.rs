use super::{colorize_status, json_pretty, Context, Failure, EXIT_SUCCESS};

pub fn run(ctx: &Context) -> Result<u8, Failure> {
    let rows = ctx.engine(None)?.status()?;
    if ctx.json {
        println!("{}", json_pretty(&rows)?);
    } else if rows.is_empty() {
        println!("no resources in state");
    } else {
        println!("{:<22} {:<16} {:<20} ID", "STATUS", "TYPE", "NAME");
        for row in &rows {
            let status = if row.disabled {
                format!("{} (disabled)", colorize_status(row.status))
            } else {
                colorize_status(row.status)
            };
            println!("{status:<22} {:<16} {:<20} {}", row.kind, row.name, row.id);
        }
    }
    Ok(EXIT_SUCCESS)
}
