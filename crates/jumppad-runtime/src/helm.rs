use crate::cli;
use crate::ClientError;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;

const PROGRAM: &str = "helm";

/// One chart release.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HelmInstall {
    pub name: String,
    /// Local path, `repo/chart`, or an OCI reference.
    pub chart: String,
    pub version: String,
    pub namespace: String,
    pub create_namespace: bool,
    pub skip_crds: bool,
    pub values_files: Vec<PathBuf>,
    pub values: BTreeMap<String, String>,
    pub timeout: Option<Duration>,
}

pub trait HelmClient: Send + Sync {
    /// Install or upgrade a release.
    fn install(&self, kubeconfig: &Path, release: &HelmInstall) -> Result<(), ClientError>;

    fn uninstall(&self, kubeconfig: &Path, name: &str, namespace: &str) -> Result<(), ClientError>;

    /// Add the repository, replacing any existing one with the same name.
    fn upsert_repository(&self, name: &str, url: &str) -> Result<(), ClientError>;
}

#[derive(Debug, Default)]
pub struct HelmCli;

impl HelmCli {
    pub fn new() -> Self {
        Self
    }
}

pub(crate) fn install_args(kubeconfig: &Path, release: &HelmInstall) -> Vec<String> {
    let mut args = vec![
        "upgrade".to_owned(),
        "--install".to_owned(),
        release.name.clone(),
        release.chart.clone(),
        "--kubeconfig".to_owned(),
        kubeconfig.display().to_string(),
        "--namespace".to_owned(),
        release.namespace.clone(),
    ];
    if release.create_namespace {
        args.push("--create-namespace".to_owned());
    }
    if release.skip_crds {
        args.push("--skip-crds".to_owned());
    }
    if !release.version.is_empty() {
        args.push("--version".to_owned());
        args.push(release.version.clone());
    }
    for f in &release.values_files {
        args.push("--values".to_owned());
        args.push(f.display().to_string());
    }
    for (k, v) in &release.values {
        args.push("--set".to_owned());
        args.push(format!("{k}={v}"));
    }
    if let Some(t) = release.timeout {
        args.push("--timeout".to_owned());
        args.push(format!("{}s", t.as_secs()));
    }
    args
}

impl HelmClient for HelmCli {
    fn install(&self, kubeconfig: &Path, release: &HelmInstall) -> Result<(), ClientError> {
        tracing::info!(release = %release.name, chart = %release.chart, "installing chart");
        cli::output(PROGRAM, Command::new(PROGRAM).args(install_args(kubeconfig, release))).map(|_| ())
    }

    fn uninstall(&self, kubeconfig: &Path, name: &str, namespace: &str) -> Result<(), ClientError> {
        let mut cmd = Command::new(PROGRAM);
        cmd.args(["uninstall", name, "--namespace", namespace, "--kubeconfig"])
            .arg(kubeconfig);
        cli::output(PROGRAM, &mut cmd).map(|_| ())
    }

    fn upsert_repository(&self, name: &str, url: &str) -> Result<(), ClientError> {
        cli::output(
            PROGRAM,
            Command::new(PROGRAM).args(["repo", "add", "--force-update", name, url]),
        )?;
        cli::output(PROGRAM, Command::new(PROGRAM).args(["repo", "update", name])).map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn install_args_cover_options() {
        let mut release = HelmInstall {
            name: "consul".to_owned(),
            chart: "./charts/consul".to_owned(),
            version: "1.2.0".to_owned(),
            namespace: "default".to_owned(),
            create_namespace: true,
            values_files: vec![PathBuf::from("/v/values.yaml")],
            timeout: Some(Duration::from_secs(300)),
            ..HelmInstall::default()
        };
        release.values.insert("global.name".to_owned(), "consul".to_owned());
        let args = install_args(Path::new("/k/kubeconfig.yaml"), &release).join(" ");
        assert!(args.starts_with("upgrade --install consul ./charts/consul"));
        assert!(args.contains("--kubeconfig /k/kubeconfig.yaml"));
        assert!(args.contains("--create-namespace"));
        assert!(!args.contains("--skip-crds"));
        assert!(args.contains("--version 1.2.0"));
        assert!(args.contains("--values /v/values.yaml"));
        assert!(args.contains("--set global.name=consul"));
        assert!(args.contains("--timeout 300s"));
    }
}
