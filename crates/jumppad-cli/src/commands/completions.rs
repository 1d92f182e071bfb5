use super::{Failure, EXIT_SUCCESS};
use clap::CommandFactory;
use clap_complete::Shell;
use std::io::Write;

/// Completion script for `shell`, named after the binary `C` describes.
fn script<C: CommandFactory>(shell: Shell, out: &mut impl Write) {
    let mut cmd = C::command();
    let bin = cmd.get_name().to_owned();
    clap_complete::generate(shell, &mut cmd, bin, out);
}

pub fn run<C: CommandFactory>(shell: Shell) -> Result<u8, Failure> {
    let mut buf = Vec::new();
    script::<C>(shell, &mut buf);
    std::io::stdout()
        .write_all(&buf)
        .map_err(|e| format!("failed to write completions: {e}"))?;
    Ok(EXIT_SUCCESS)
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[derive(Parser)]
    #[command(name = "jumppad")]
    enum Demo {
        Up,
        Down,
    }

    #[test]
    fn script_mentions_subcommands() {
        let mut buf = Vec::new();
        script::<Demo>(Shell::Bash, &mut buf);
        let text = String::from_utf8(buf).unwrap();
        assert!(text.contains("jumppad"));
        assert!(text.contains("up"));
        assert!(text.contains("down"));
    }
}
