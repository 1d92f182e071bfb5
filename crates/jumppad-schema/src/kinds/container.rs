use super::Payload;
use crate::validate::parse_duration;
use crate::SchemaError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

const DEFAULT_HEALTH_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Image {
    pub name: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub username: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub password: String,
}

impl Image {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }
}

/// Attachment of a container to a network resource.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkAttachment {
    /// Reference to the network resource, e.g. `network.n1`.
    #[serde(alias = "name")]
    pub id: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub ip_address: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub aliases: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Volume {
    pub source: String,
    pub destination: String,
    /// `bind` (default), `volume`, or `tmpfs`.
    #[serde(rename = "type", skip_serializing_if = "String::is_empty")]
    pub volume_type: String,
    pub read_only: bool,
}

impl Volume {
    pub fn is_bind(&self) -> bool {
        self.volume_type.is_empty() || self.volume_type == "bind"
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Port {
    pub local: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host: Option<u16>,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub protocol: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResourceLimits {
    /// CPU in MHz-equivalent shares.
    pub cpu: u32,
    /// Memory in megabytes.
    pub memory: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct User {
    pub user: String,
    pub group: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpCheck {
    pub address: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub method: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub success_codes: Vec<u16>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TcpCheck {
    pub address: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScriptCheck {
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub command: Vec<String>,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub script: String,
    pub exit_code: i32,
}

/// Checks polled after a container starts; all must pass before `timeout`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthCheck {
    pub timeout: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub http: Vec<HttpCheck>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tcp: Vec<TcpCheck>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub exec: Vec<ScriptCheck>,
}

impl HealthCheck {
    pub fn timeout(&self) -> Result<Duration, SchemaError> {
        parse_duration(&self.timeout, DEFAULT_HEALTH_TIMEOUT)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Container {
    pub image: Image,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub networks: Vec<NetworkAttachment>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub entrypoint: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub command: Vec<String>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub environment: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub volumes: Vec<Volume>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub ports: Vec<Port>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub dns: Vec<String>,
    pub privileged: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resources: Option<ResourceLimits>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub health_check: Option<HealthCheck>,
    pub max_restart_count: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub run_as: Option<User>,

    pub container_name: String,
    pub container_id: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub image_id: String,
    /// Network id → assigned address.
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub assigned_addresses: BTreeMap<String, String>,
}

impl Payload for Container {
    const KIND: &'static str = "container";
    const COMPUTED: &'static [&'static str] = &[
        "container_name",
        "container_id",
        "image_id",
        "assigned_addresses",
    ];

    fn references(&self) -> Vec<String> {
        self.networks.iter().map(|n| n.id.clone()).collect()
    }
}

/// A container sharing the network namespace of a target container.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Sidecar {
    pub target: String,
    pub image: Image,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub entrypoint: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub command: Vec<String>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub environment: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub volumes: Vec<Volume>,
    pub privileged: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resources: Option<ResourceLimits>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub health_check: Option<HealthCheck>,
    pub max_restart_count: u32,

    pub container_name: String,
    pub container_id: String,
}

impl Payload for Sidecar {
    const KIND: &'static str = "sidecar";
    const COMPUTED: &'static [&'static str] = &["container_name", "container_id"];

    fn references(&self) -> Vec<String> {
        vec![self.target.clone()]
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryAuth {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Registry {
    pub hostname: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auth: Option<RegistryAuth>,
}

/// The registry-proxy singleton. The networks it serves are its `depends_on`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImageCache {
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub registries: Vec<Registry>,

    pub container_id: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub attached_networks: Vec<String>,
}

impl Payload for ImageCache {
    const KIND: &'static str = "image_cache";
    const COMPUTED: &'static [&'static str] = &["container_id", "attached_networks"];
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn network_attachment_accepts_name_alias() {
        let a: NetworkAttachment = serde_json::from_value(json!({"name": "network.n1"})).unwrap();
        assert_eq!(a.id, "network.n1");
    }

    #[test]
    fn container_references_its_networks() {
        let c = Container {
            networks: vec![
                NetworkAttachment {
                    id: "network.a".to_owned(),
                    ..NetworkAttachment::default()
                },
                NetworkAttachment {
                    id: "network.b".to_owned(),
                    ..NetworkAttachment::default()
                },
            ],
            ..Container::default()
        };
        assert_eq!(c.references(), vec!["network.a", "network.b"]);
    }

    #[test]
    fn health_check_default_timeout() {
        let hc = HealthCheck::default();
        assert_eq!(hc.timeout().unwrap(), Duration::from_secs(30));
        let hc = HealthCheck {
            timeout: "2m".to_owned(),
            ..HealthCheck::default()
        };
        assert_eq!(hc.timeout().unwrap(), Duration::from_secs(120));
    }

    #[test]
    fn bind_is_default_volume_type() {
        assert!(Volume::default().is_bind());
        let v = Volume {
            volume_type: "tmpfs".to_owned(),
            ..Volume::default()
        };
        assert!(!v.is_bind());
    }
}
