//! Shared plumbing for clients that shell out to a binary.

use crate::ClientError;
use std::io::{BufRead, BufReader, Write};
use std::process::{Command, Stdio};

/// Run `cmd` to completion and return its stdout, classifying failures by stderr.
pub(crate) fn output(program: &str, cmd: &mut Command) -> Result<String, ClientError> {
    tracing::trace!(program, args = ?cmd.get_args().collect::<Vec<_>>(), "exec");
    let out = cmd.output().map_err(|e| spawn_error(program, &e))?;
    if !out.status.success() {
        return Err(ClientError::from_stderr(
            program,
            &String::from_utf8_lossy(&out.stderr),
        ));
    }
    Ok(String::from_utf8_lossy(&out.stdout).into_owned())
}

/// Run `cmd`, feeding `input` to its stdin.
pub(crate) fn output_with_stdin(program: &str, cmd: &mut Command, input: &[u8]) -> Result<String, ClientError> {
    let mut child = cmd
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| spawn_error(program, &e))?;
    if let Some(mut stdin) = child.stdin.take() {
        stdin.write_all(input)?;
    }
    let out = child.wait_with_output()?;
    if !out.status.success() {
        return Err(ClientError::from_stderr(
            program,
            &String::from_utf8_lossy(&out.stderr),
        ));
    }
    Ok(String::from_utf8_lossy(&out.stdout).into_owned())
}

/// Run `cmd`, copying stdout and stderr line by line into `sink`.
/// Returns the exit code; a signal-terminated process reports -1.
pub(crate) fn stream(program: &str, cmd: &mut Command, sink: &mut dyn Write) -> Result<i32, ClientError> {
    let mut child = cmd
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| spawn_error(program, &e))?;

    let stderr = child.stderr.take();
    let err_reader = std::thread::spawn(move || {
        let mut lines = Vec::new();
        if let Some(stderr) = stderr {
            for line in BufReader::new(stderr).lines().map_while(Result::ok) {
                lines.push(line);
            }
        }
        lines
    });

    if let Some(stdout) = child.stdout.take() {
        for line in BufReader::new(stdout).lines().map_while(Result::ok) {
            writeln!(sink, "{line}")?;
        }
    }
    let status = child.wait()?;
    if let Ok(lines) = err_reader.join() {
        for line in lines {
            writeln!(sink, "{line}")?;
        }
    }
    Ok(status.code().unwrap_or(-1))
}

pub(crate) fn spawn_error(program: &str, e: &std::io::Error) -> ClientError {
    if e.kind() == std::io::ErrorKind::NotFound {
        ClientError::unavailable(program, format!("{program} not found in PATH"))
    } else {
        ClientError::unavailable(program, e.to_string())
    }
}
