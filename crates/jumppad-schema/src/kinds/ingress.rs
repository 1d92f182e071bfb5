use super::Payload;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Ports used by the connector; no ingress may claim them.
pub const RESERVED_PORTS: [u16; 2] = [60000, 60001];

/// Ingress names the connector claims for itself.
pub const RESERVED_NAMES: [&str; 1] = ["connector"];

/// The service an ingress routes traffic to.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrafficTarget {
    /// Reference to the target resource (cluster or container).
    pub resource: String,
    pub port: u16,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub named_port: String,
    /// Driver-specific settings, e.g. `service` and `namespace` for Kubernetes.
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub config: BTreeMap<String, String>,
}

/// Unified ingress: exposes a service running in a cluster or container on a local port.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Ingress {
    pub port: u16,
    pub expose_local: bool,
    pub target: TrafficTarget,

    pub ingress_id: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub local_address: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub remote_address: String,
}

impl Payload for Ingress {
    const KIND: &'static str = "ingress";
    const COMPUTED: &'static [&'static str] = &["ingress_id", "local_address", "remote_address"];

    fn references(&self) -> Vec<String> {
        vec![self.target.resource.clone()]
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IngressPort {
    pub local: u16,
    pub remote: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host: Option<u16>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct K8sIngress {
    pub cluster: String,
    pub service: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub namespace: String,
    pub ports: Vec<IngressPort>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub networks: Vec<String>,

    pub container_id: String,
}

impl Payload for K8sIngress {
    const KIND: &'static str = "k8s_ingress";
    const COMPUTED: &'static [&'static str] = &["container_id"];

    fn references(&self) -> Vec<String> {
        let mut refs = vec![self.cluster.clone()];
        refs.extend(self.networks.iter().cloned());
        refs
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NomadIngress {
    pub cluster: String,
    pub job: String,
    pub group: String,
    pub task: String,
    pub ports: Vec<IngressPort>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub networks: Vec<String>,

    pub container_id: String,
}

impl Payload for NomadIngress {
    const KIND: &'static str = "nomad_ingress";
    const COMPUTED: &'static [&'static str] = &["container_id"];

    fn references(&self) -> Vec<String> {
        let mut refs = vec![self.cluster.clone()];
        refs.extend(self.networks.iter().cloned());
        refs
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContainerIngress {
    pub target: String,
    pub ports: Vec<IngressPort>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub networks: Vec<String>,

    pub container_id: String,
}

impl Payload for ContainerIngress {
    const KIND: &'static str = "container_ingress";
    const COMPUTED: &'static [&'static str] = &["container_id"];

    fn references(&self) -> Vec<String> {
        let mut refs = vec![self.target.clone()];
        refs.extend(self.networks.iter().cloned());
        refs
    }
}

/// Exposes a service on the host into a cluster.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LocalIngress {
    pub cluster: String,
    /// Local address of the service, e.g. `localhost:8080`.
    pub address: String,
    pub port: u16,
    pub remote_port: u16,

    pub ingress_id: String,
}

impl Payload for LocalIngress {
    const KIND: &'static str = "local_ingress";
    const COMPUTED: &'static [&'static str] = &["ingress_id"];

    fn references(&self) -> Vec<String> {
        vec![self.cluster.clone()]
    }
}
