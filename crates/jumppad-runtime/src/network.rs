use crate::ClientError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkConfig {
    pub name: String,
    pub subnet: String,
    pub enable_ipv6: bool,
    pub labels: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkInfo {
    pub id: String,
    pub name: String,
    pub subnet: String,
    /// Ids of attached containers.
    pub containers: Vec<String>,
}

/// How a container joins a network.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkAttachment {
    pub ip_address: Option<String>,
    pub aliases: Vec<String>,
}

pub trait NetworkRuntime: Send + Sync {
    /// Create a bridge network and return its id.
    fn create_network(&self, config: &NetworkConfig) -> Result<String, ClientError>;

    /// `None` when no network has this name.
    fn find_network(&self, name: &str) -> Result<Option<NetworkInfo>, ClientError>;

    fn remove_network(&self, name: &str) -> Result<(), ClientError>;

    fn attach(&self, network: &str, container_id: &str, attachment: &NetworkAttachment) -> Result<(), ClientError>;

    fn detach(&self, network: &str, container_id: &str) -> Result<(), ClientError>;
}
