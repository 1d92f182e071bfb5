//! Local process execution for `exec_local`.

use crate::cli::spawn_error;
use crate::ClientError;
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufRead, BufReader, Read, Write};
use std::path::PathBuf;
use std::process::{Child, Command, Stdio};
use std::sync::mpsc;
use std::time::{Duration, Instant};

const POLL_INTERVAL: Duration = Duration::from_millis(50);

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandSpec {
    /// Shell script passed to `sh -c`.
    pub script: String,
    pub working_directory: Option<PathBuf>,
    pub environment: BTreeMap<String, String>,
    pub timeout: Option<Duration>,
    /// Leave the process running in the background and return its pid.
    pub daemon: bool,
    /// Where a daemon's output goes; discarded when unset.
    pub log_file: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CommandOutcome {
    /// `None` for daemons and signal-terminated processes.
    pub exit_code: Option<i32>,
    pub pid: Option<u32>,
}

pub trait CommandRunner: Send + Sync {
    fn run(&self, spec: &CommandSpec, output: &mut dyn Write) -> Result<CommandOutcome, ClientError>;

    /// Terminate a daemon started by [`CommandRunner::run`]. An already
    /// exited process is not an error.
    fn kill(&self, pid: u32) -> Result<(), ClientError>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct LocalRunner;

impl LocalRunner {
    pub fn new() -> Self {
        Self
    }

    fn command(spec: &CommandSpec) -> Command {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(&spec.script).envs(&spec.environment);
        if let Some(dir) = &spec.working_directory {
            cmd.current_dir(dir);
        }
        cmd
    }

    fn spawn_daemon(spec: &CommandSpec) -> Result<CommandOutcome, ClientError> {
        let mut cmd = Self::command(spec);
        cmd.stdin(Stdio::null());
        match &spec.log_file {
            Some(path) => {
                let log = File::create(path)?;
                cmd.stdout(log.try_clone()?).stderr(log);
            }
            None => {
                cmd.stdout(Stdio::null()).stderr(Stdio::null());
            }
        }
        let child = cmd.spawn().map_err(|e| spawn_error("sh", &e))?;
        tracing::debug!(pid = child.id(), "started daemon");
        Ok(CommandOutcome {
            exit_code: None,
            pid: Some(child.id()),
        })
    }
}

fn forward<R: Read + Send + 'static>(reader: R, tx: mpsc::Sender<String>) -> std::thread::JoinHandle<()> {
    std::thread::spawn(move || {
        for line in BufReader::new(reader).lines().map_while(Result::ok) {
            if tx.send(line).is_err() {
                break;
            }
        }
    })
}

fn kill_child(child: &mut Child) {
    if let Err(e) = child.kill() {
        tracing::warn!(pid = child.id(), "failed to kill timed out process: {e}");
    }
    let _ = child.wait();
}

impl CommandRunner for LocalRunner {
    fn run(&self, spec: &CommandSpec, output: &mut dyn Write) -> Result<CommandOutcome, ClientError> {
        if spec.daemon {
            return Self::spawn_daemon(spec);
        }

        let mut child = Self::command(spec)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| spawn_error("sh", &e))?;

        let (tx, rx) = mpsc::channel();
        let mut readers = Vec::new();
        if let Some(stdout) = child.stdout.take() {
            readers.push(forward(stdout, tx.clone()));
        }
        if let Some(stderr) = child.stderr.take() {
            readers.push(forward(stderr, tx));
        } else {
            drop(tx);
        }

        let deadline = spec.timeout.map(|t| Instant::now() + t);
        let status = loop {
            match rx.recv_timeout(POLL_INTERVAL) {
                Ok(line) => writeln!(output, "{line}")?,
                Err(mpsc::RecvTimeoutError::Disconnected) => std::thread::sleep(POLL_INTERVAL),
                Err(mpsc::RecvTimeoutError::Timeout) => {}
            }
            if let Some(status) = child.try_wait()? {
                break status;
            }
            if deadline.is_some_and(|d| Instant::now() >= d) {
                kill_child(&mut child);
                return Err(ClientError::Timeout(format!(
                    "script did not finish within {}s",
                    spec.timeout.map_or(0, |t| t.as_secs())
                )));
            }
        };

        for reader in readers {
            let _ = reader.join();
        }
        for line in rx.try_iter() {
            writeln!(output, "{line}")?;
        }

        Ok(CommandOutcome {
            exit_code: status.code(),
            pid: None,
        })
    }

    fn kill(&self, pid: u32) -> Result<(), ClientError> {
        let out = Command::new("kill")
            .arg(pid.to_string())
            .output()
            .map_err(|e| spawn_error("kill", &e))?;
        if !out.status.success() {
            let stderr = String::from_utf8_lossy(&out.stderr);
            if stderr.to_lowercase().contains("no such process") {
                return Ok(());
            }
            return Err(ClientError::from_stderr("kill", &stderr));
        }
        Ok(())
    }
}
