use crate::cli;
use crate::ClientError;
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;

const PROGRAM: &str = "kubectl";

/// Every call names the kubeconfig to use, so one client serves any number
/// of clusters without shared mutable state.
pub trait KubernetesClient: Send + Sync {
    /// Apply manifests. With `wait`, block until applied pods are Ready or the
    /// duration elapses.
    fn apply(&self, kubeconfig: &Path, paths: &[PathBuf], wait: Option<Duration>) -> Result<(), ClientError>;

    /// Delete the objects declared in the manifests, ignoring ones already gone.
    fn delete(&self, kubeconfig: &Path, paths: &[PathBuf]) -> Result<(), ClientError>;

    /// True when at least one pod matches `selector` and every match is Ready.
    fn pods_ready(&self, kubeconfig: &Path, selector: &str) -> Result<bool, ClientError>;
}

#[derive(Debug, Default)]
pub struct Kubectl;

impl Kubectl {
    pub fn new() -> Self {
        Self
    }

    fn command(kubeconfig: &Path) -> Command {
        let mut cmd = Command::new(PROGRAM);
        cmd.arg("--kubeconfig").arg(kubeconfig);
        cmd
    }
}

fn all_pods_ready(raw: &str) -> Result<bool, ClientError> {
    let v: Value = serde_json::from_str(raw)?;
    let Some(items) = v["items"].as_array() else {
        return Ok(false);
    };
    if items.is_empty() {
        return Ok(false);
    }
    Ok(items.iter().all(|pod| {
        pod["status"]["conditions"]
            .as_array()
            .is_some_and(|conds| {
                conds
                    .iter()
                    .any(|c| c["type"] == "Ready" && c["status"] == "True")
            })
    }))
}

impl KubernetesClient for Kubectl {
    fn apply(&self, kubeconfig: &Path, paths: &[PathBuf], wait: Option<Duration>) -> Result<(), ClientError> {
        for path in paths {
            let mut cmd = Self::command(kubeconfig);
            cmd.arg("apply").arg("--filename").arg(path);
            cli::output(PROGRAM, &mut cmd)?;
        }
        if let Some(timeout) = wait {
            let mut cmd = Self::command(kubeconfig);
            cmd.args(["wait", "--for=condition=Ready", "pods", "--all", "--all-namespaces"])
                .arg(format!("--timeout={}s", timeout.as_secs()));
            cli::output(PROGRAM, &mut cmd).map_err(|e| match e {
                ClientError::CommandFailed(m) if m.contains("timed out") => ClientError::Timeout(m),
                other => other,
            })?;
        }
        Ok(())
    }

    fn delete(&self, kubeconfig: &Path, paths: &[PathBuf]) -> Result<(), ClientError> {
        for path in paths {
            let mut cmd = Self::command(kubeconfig);
            cmd.args(["delete", "--ignore-not-found", "--filename"]).arg(path);
            cli::output(PROGRAM, &mut cmd)?;
        }
        Ok(())
    }

    fn pods_ready(&self, kubeconfig: &Path, selector: &str) -> Result<bool, ClientError> {
        let mut cmd = Self::command(kubeconfig);
        cmd.args(["get", "pods", "--all-namespaces", "--output", "json", "--selector", selector]);
        all_pods_ready(&cli::output(PROGRAM, &mut cmd)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn readiness_requires_every_pod() {
        let ready = r#"{"items":[
            {"status":{"conditions":[{"type":"Ready","status":"True"}]}},
            {"status":{"conditions":[{"type":"Initialized","status":"True"},{"type":"Ready","status":"True"}]}}
        ]}"#;
        assert!(all_pods_ready(ready).unwrap());

        let one_pending = r#"{"items":[
            {"status":{"conditions":[{"type":"Ready","status":"True"}]}},
            {"status":{"conditions":[{"type":"Ready","status":"False"}]}}
        ]}"#;
        assert!(!all_pods_ready(one_pending).unwrap());
    }

    #[test]
    fn no_pods_is_not_ready() {
        assert!(!all_pods_ready(r#"{"items":[]}"#).unwrap());
        assert!(!all_pods_ready("{}").unwrap());
    }
}
