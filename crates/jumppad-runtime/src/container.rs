use crate::ClientError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::Write;
use std::path::Path;

/// An image reference with optional registry credentials.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageRef {
    pub name: String,
    pub username: Option<String>,
    pub password: Option<String>,
}

impl ImageRef {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Registry host of the image, `docker.io` when none is named.
    pub fn registry(&self) -> &str {
        match self.name.split_once('/') {
            Some((host, _)) if host.contains('.') || host.contains(':') || host == "localhost" => host,
            _ => "docker.io",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MountKind {
    #[default]
    Bind,
    Volume,
    Tmpfs,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeMount {
    pub source: String,
    pub destination: String,
    pub kind: MountKind,
    pub read_only: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortMapping {
    pub local: u16,
    pub host: Option<u16>,
    /// `tcp` when empty.
    pub protocol: String,
}

/// Everything needed to create one container. Networks are attached
/// separately through [`NetworkRuntime`](crate::NetworkRuntime).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerConfig {
    /// Container name, also used as its hostname.
    pub name: String,
    pub image: String,
    pub entrypoint: Vec<String>,
    pub command: Vec<String>,
    pub environment: BTreeMap<String, String>,
    pub labels: BTreeMap<String, String>,
    pub volumes: Vec<VolumeMount>,
    pub ports: Vec<PortMapping>,
    pub dns: Vec<String>,
    pub privileged: bool,
    /// CPU in MHz-equivalent shares, 1000 per core.
    pub cpu: Option<u32>,
    pub memory_mb: Option<u64>,
    pub max_restart_count: u32,
    /// `user[:group]`.
    pub run_as: Option<String>,
    /// Share another container's network namespace (`container:<id>`).
    pub network_mode: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerInfo {
    pub id: String,
    pub name: String,
    pub running: bool,
    /// Id of the image the container was created from.
    pub image_id: String,
    pub labels: BTreeMap<String, String>,
    /// Network name → assigned address.
    pub addresses: BTreeMap<String, String>,
}

pub trait ContainerRuntime: Send + Sync {
    /// Pull `image` unless it is already cached locally or `force` is set.
    /// Returns the local image id.
    fn pull_image(&self, image: &ImageRef, force: bool) -> Result<String, ClientError>;

    /// Id of the local copy of `image`, `None` when it has not been pulled.
    fn image_id(&self, image: &str) -> Result<Option<String>, ClientError>;

    /// Create a stopped container and return its id.
    fn create_container(&self, config: &ContainerConfig) -> Result<String, ClientError>;

    fn start_container(&self, id: &str) -> Result<(), ClientError>;

    /// Remove a container and its anonymous volumes.
    fn remove_container(&self, id: &str, force: bool) -> Result<(), ClientError>;

    /// Ids of every container, running or not, with exactly this name.
    fn find_containers(&self, name: &str) -> Result<Vec<String>, ClientError>;

    fn inspect_container(&self, id: &str) -> Result<ContainerInfo, ClientError>;

    /// Combined stdout and stderr produced so far.
    fn container_logs(&self, id: &str) -> Result<String, ClientError>;

    /// Run `command` inside a running container, streaming its output to
    /// `output`. Returns the exit code.
    fn exec(
        &self,
        id: &str,
        command: &[String],
        user: Option<&str>,
        output: &mut dyn Write,
    ) -> Result<i32, ClientError>;

    fn copy_to_container(&self, id: &str, source: &Path, destination: &str) -> Result<(), ClientError>;

    fn copy_from_container(&self, id: &str, source: &str, destination: &Path) -> Result<(), ClientError>;

    fn create_volume(&self, name: &str) -> Result<(), ClientError>;

    /// Remove a named volume. Missing volumes are not an error.
    fn remove_volume(&self, name: &str) -> Result<(), ClientError>;

    /// Export local images to a tar archive at `destination`.
    fn save_images(&self, images: &[String], destination: &Path) -> Result<(), ClientError>;
}
