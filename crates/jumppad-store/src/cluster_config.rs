//! Per-cluster config files under `<home>/config/<cluster>/`.

use crate::layout::JumppadLayout;
use crate::{write_atomic, StoreError};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

const KUBECONFIG_HOST: &str = "kubeconfig.yaml";
const KUBECONFIG_DOCKER: &str = "kubeconfig-docker.yaml";
const NOMAD_CONFIG: &str = "config.json";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KubeConfigPaths {
    /// Reachable from the host.
    pub host: PathBuf,
    /// Reachable from containers on the cluster's networks.
    pub docker: PathBuf,
}

/// Replace the `server:` entry of every cluster in a kubeconfig.
pub fn rewrite_server(kubeconfig: &str, server: &str) -> String {
    let mut out = String::with_capacity(kubeconfig.len());
    for line in kubeconfig.lines() {
        let trimmed = line.trim_start();
        if trimmed.starts_with("server:") {
            let indent = &line[..line.len() - trimmed.len()];
            out.push_str(indent);
            out.push_str("server: ");
            out.push_str(server);
        } else {
            out.push_str(line);
        }
        out.push('\n');
    }
    out
}

/// Write the host and container flavours of a cluster's kubeconfig.
pub fn write_kubeconfigs(
    layout: &JumppadLayout,
    cluster: &str,
    kubeconfig: &str,
    host_server: &str,
    docker_server: &str,
) -> Result<KubeConfigPaths, StoreError> {
    let dir = layout.cluster_config_dir(cluster);
    let paths = KubeConfigPaths {
        host: dir.join(KUBECONFIG_HOST),
        docker: dir.join(KUBECONFIG_DOCKER),
    };
    write_atomic(&paths.host, rewrite_server(kubeconfig, host_server).as_bytes())?;
    write_atomic(&paths.docker, rewrite_server(kubeconfig, docker_server).as_bytes())?;
    tracing::debug!(cluster, path = %paths.host.display(), "wrote kubeconfig");
    Ok(paths)
}

/// Connection details for a Nomad cluster, written as `config.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NomadConfig {
    pub location: String,
    pub node_count: u32,
}

impl NomadConfig {
    pub fn new(host: &str, api_port: u16, node_count: u32) -> Self {
        Self {
            location: format!("http://{host}:{api_port}"),
            node_count,
        }
    }
}

pub fn write_nomad_config(
    layout: &JumppadLayout,
    cluster: &str,
    config: &NomadConfig,
) -> Result<PathBuf, StoreError> {
    let path = layout.cluster_config_dir(cluster).join(NOMAD_CONFIG);
    let content = serde_json::to_string_pretty(config)?;
    write_atomic(&path, content.as_bytes())?;
    Ok(path)
}

pub fn read_nomad_config(layout: &JumppadLayout, cluster: &str) -> Result<NomadConfig, StoreError> {
    let path = layout.cluster_config_dir(cluster).join(NOMAD_CONFIG);
    if !path.exists() {
        return Err(StoreError::NotFound(path));
    }
    let content = fs::read_to_string(&path)?;
    Ok(serde_json::from_str(&content)?)
}

/// Remove a cluster's config directory. A missing directory is not an error.
pub fn remove_cluster_config(layout: &JumppadLayout, cluster: &str) -> Result<(), StoreError> {
    let dir = layout.cluster_config_dir(cluster);
    match fs::remove_dir_all(&dir) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const KUBECONFIG: &str = "apiVersion: v1
clusters:
- cluster:
    certificate-authority-data: abc
    server: https://127.0.0.1:6443
  name: default
kind: Config
";

    #[test]
    fn rewrite_server_keeps_indent() {
        let out = rewrite_server(KUBECONFIG, "https://server.k.k8s-cluster.local.jumppad.dev:6443");
        assert!(out.contains("    server: https://server.k.k8s-cluster.local.jumppad.dev:6443\n"));
        assert!(!out.contains("127.0.0.1"));
        assert!(out.contains("certificate-authority-data: abc"));
    }

    #[test]
    fn kubeconfigs_written_to_cluster_dir() {
        let dir = tempfile::tempdir().unwrap();
        let layout = JumppadLayout::new(dir.path());
        let paths = write_kubeconfigs(
            &layout,
            "k",
            KUBECONFIG,
            "https://127.0.0.1:64123",
            "https://server.k:6443",
        )
        .unwrap();
        assert_eq!(paths.host, dir.path().join("config/k/kubeconfig.yaml"));
        assert_eq!(paths.docker, dir.path().join("config/k/kubeconfig-docker.yaml"));
        assert!(fs::read_to_string(&paths.host).unwrap().contains("127.0.0.1:64123"));
        assert!(fs::read_to_string(&paths.docker).unwrap().contains("server.k:6443"));

        remove_cluster_config(&layout, "k").unwrap();
        assert!(!paths.host.exists());
        remove_cluster_config(&layout, "k").unwrap();
    }

    #[test]
    fn nomad_config_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let layout = JumppadLayout::new(dir.path());
        let cfg = NomadConfig::new("localhost", 4646, 3);
        assert_eq!(cfg.location, "http://localhost:4646");
        let path = write_nomad_config(&layout, "dev", &cfg).unwrap();
        let raw: serde_json::Value = serde_json::from_str(&fs::read_to_string(path).unwrap()).unwrap();
        assert_eq!(raw["node_count"], 3);
        assert_eq!(read_nomad_config(&layout, "dev").unwrap(), cfg);
    }

    #[test]
    fn missing_nomad_config_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let layout = JumppadLayout::new(dir.path());
        assert!(matches!(
            read_nomad_config(&layout, "nope"),
            Err(StoreError::NotFound(_))
        ));
    }
}
