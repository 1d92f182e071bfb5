use super::container::{Image, NetworkAttachment, Port, Volume};
use super::Payload;
use crate::validate::parse_duration;
use crate::SchemaError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

const DEFAULT_START_TIMEOUT: Duration = Duration::from_secs(300);
const DEFAULT_READY_TIMEOUT: Duration = Duration::from_secs(300);

/// Paths of the kubeconfig files emitted for a cluster.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct KubeConfig {
    /// Host-reachable kubeconfig.
    pub path: String,
    /// Container-reachable kubeconfig with `server:` rewritten to the cluster FQDN.
    pub docker_path: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct K8sCluster {
    /// Only `k3s` is supported.
    pub driver: String,
    pub version: String,
    pub nodes: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image: Option<Image>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub networks: Vec<NetworkAttachment>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub volumes: Vec<Volume>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub copy_images: Vec<Image>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub ports: Vec<Port>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub environment: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub start_timeout: String,

    pub api_port: u16,
    pub connector_port: u16,
    pub container_name: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub external_ip: String,
    pub kubeconfig: KubeConfig,
}

impl K8sCluster {
    pub fn start_timeout(&self) -> Result<Duration, SchemaError> {
        parse_duration(&self.start_timeout, DEFAULT_START_TIMEOUT)
    }
}

impl Payload for K8sCluster {
    const KIND: &'static str = "k8s_cluster";
    const COMPUTED: &'static [&'static str] = &[
        "api_port",
        "connector_port",
        "container_name",
        "external_ip",
        "kubeconfig",
    ];

    fn references(&self) -> Vec<String> {
        self.networks.iter().map(|n| n.id.clone()).collect()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NomadCluster {
    pub version: String,
    pub client_nodes: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image: Option<Image>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub networks: Vec<NetworkAttachment>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub volumes: Vec<Volume>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub copy_images: Vec<Image>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub ports: Vec<Port>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub environment: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub datacenter: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub start_timeout: String,

    pub api_port: u16,
    pub connector_port: u16,
    pub server_container_name: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub client_container_names: Vec<String>,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub external_ip: String,
    pub config_dir: String,
}

impl NomadCluster {
    pub fn start_timeout(&self) -> Result<Duration, SchemaError> {
        parse_duration(&self.start_timeout, DEFAULT_START_TIMEOUT)
    }

    pub fn datacenter(&self) -> &str {
        if self.datacenter.is_empty() {
            "dc1"
        } else {
            &self.datacenter
        }
    }
}

impl Payload for NomadCluster {
    const KIND: &'static str = "nomad_cluster";
    const COMPUTED: &'static [&'static str] = &[
        "api_port",
        "connector_port",
        "server_container_name",
        "client_container_names",
        "external_ip",
        "config_dir",
    ];

    fn references(&self) -> Vec<String> {
        self.networks.iter().map(|n| n.id.clone()).collect()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct KubernetesHealthCheck {
    pub timeout: String,
    /// Label selectors whose pods must be Ready.
    pub pods: Vec<String>,
}

impl KubernetesHealthCheck {
    pub fn timeout(&self) -> Result<Duration, SchemaError> {
        parse_duration(&self.timeout, DEFAULT_READY_TIMEOUT)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NomadHealthCheck {
    pub timeout: String,
    /// Jobs that must report running.
    pub jobs: Vec<String>,
}

impl NomadHealthCheck {
    pub fn timeout(&self) -> Result<Duration, SchemaError> {
        parse_duration(&self.timeout, DEFAULT_READY_TIMEOUT)
    }
}

/// Kubernetes manifests applied against a cluster.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct K8sConfig {
    pub cluster: String,
    pub paths: Vec<String>,
    pub wait_until_ready: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub health_check: Option<KubernetesHealthCheck>,

    /// Manifest path → blake3 of its content at apply time.
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub checksums: BTreeMap<String, String>,
}

impl Payload for K8sConfig {
    const KIND: &'static str = "k8s_config";
    const COMPUTED: &'static [&'static str] = &["checksums"];

    fn references(&self) -> Vec<String> {
        vec![self.cluster.clone()]
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NomadJob {
    pub cluster: String,
    pub paths: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub health_check: Option<NomadHealthCheck>,

    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub checksums: BTreeMap<String, String>,
}

impl Payload for NomadJob {
    const KIND: &'static str = "nomad_job";
    const COMPUTED: &'static [&'static str] = &["checksums"];

    fn references(&self) -> Vec<String> {
        vec![self.cluster.clone()]
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HelmRepository {
    pub name: String,
    pub url: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Helm {
    pub cluster: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub repository: Option<HelmRepository>,
    pub chart: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub version: String,
    /// Path to a values file.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub values: String,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub values_string: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub namespace: String,
    pub create_namespace: bool,
    pub skip_crds: bool,
    pub retry: u32,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub timeout: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub health_check: Option<KubernetesHealthCheck>,
}

impl Helm {
    pub fn namespace(&self) -> &str {
        if self.namespace.is_empty() {
            "default"
        } else {
            &self.namespace
        }
    }

    pub fn timeout(&self) -> Result<Duration, SchemaError> {
        parse_duration(&self.timeout, DEFAULT_READY_TIMEOUT)
    }
}

impl Payload for Helm {
    const KIND: &'static str = "helm";

    fn references(&self) -> Vec<String> {
        vec![self.cluster.clone()]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn k3s_start_timeout_defaults_to_five_minutes() {
        let k = K8sCluster::default();
        assert_eq!(k.start_timeout().unwrap(), Duration::from_secs(300));
    }

    #[test]
    fn helm_defaults() {
        let h = Helm::default();
        assert_eq!(h.namespace(), "default");
        assert_eq!(h.timeout().unwrap(), Duration::from_secs(300));
    }

    #[test]
    fn nomad_datacenter_default() {
        assert_eq!(NomadCluster::default().datacenter(), "dc1");
    }
}
