//! Client capabilities consumed by the Jumppad engine.
//!
//! Every external system the engine touches is reached through a narrow trait:
//! `ContainerRuntime` and `NetworkRuntime` for the container engine,
//! `KubernetesClient`, `NomadClient` and `HelmClient` for clusters,
//! `HttpClient` for health checks, `FileGetter` for sources, `CommandRunner`
//! for local processes and `CertAuthority` for certificates. `Clients` bundles
//! one implementation of each. `Clients::system()` shells out to the docker,
//! kubectl, helm and git binaries and speaks HTTP to Nomad; `mock::MockClients`
//! keeps everything in memory for tests.

pub mod certs;
mod cli;
pub mod command;
pub mod container;
pub mod docker;
pub mod getter;
pub mod helm;
pub mod http;
pub mod kubernetes;
pub mod logwriter;
pub mod mock;
pub mod network;
pub mod nomad;
pub mod prereq;

pub use certs::{CertAuthority, KeyPairPem, RcgenAuthority};
pub use command::{CommandOutcome, CommandRunner, CommandSpec, LocalRunner};
pub use container::{
    ContainerConfig, ContainerInfo, ContainerRuntime, ImageRef, MountKind, PortMapping,
    VolumeMount,
};
pub use docker::DockerCli;
pub use getter::{copy_tree, FileGetter, SourceGetter};
pub use helm::{HelmCli, HelmClient, HelmInstall};
pub use http::{HttpClient, UreqHttp};
pub use kubernetes::{Kubectl, KubernetesClient};
pub use logwriter::LogWriter;
pub use mock::MockClients;
pub use network::{NetworkAttachment, NetworkConfig, NetworkInfo, NetworkRuntime};
pub use nomad::{NomadClient, NomadHttp};
pub use prereq::{check_prereqs, format_missing, MissingPrereq};

use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("already exists: {0}")]
    AlreadyExists(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("{service} is unavailable: {message}")]
    Unavailable { service: String, message: String },
    #[error("timed out: {0}")]
    Timeout(String),
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("permission denied: {0}")]
    PermissionDenied(String),
    #[error("command failed: {0}")]
    CommandFailed(String),
    #[error("client I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl ClientError {
    pub fn unavailable(service: &str, message: impl Into<String>) -> Self {
        Self::Unavailable {
            service: service.to_owned(),
            message: message.into(),
        }
    }

    /// Classify the stderr of a failed CLI invocation.
    pub(crate) fn from_stderr(program: &str, stderr: &str) -> Self {
        let msg = stderr.trim().to_owned();
        let lower = msg.to_lowercase();
        if lower.contains("no such") || lower.contains("not found") {
            Self::NotFound(msg)
        } else if lower.contains("already exists") || lower.contains("already in use") {
            Self::AlreadyExists(msg)
        } else if lower.contains("cannot connect")
            || lower.contains("connection refused")
            || lower.contains("is the docker daemon running")
        {
            Self::unavailable(program, msg)
        } else if lower.contains("permission denied") {
            Self::PermissionDenied(msg)
        } else {
            Self::CommandFailed(format!("{program}: {msg}"))
        }
    }
}

/// One implementation of every capability, shared by all providers of a run.
#[derive(Clone)]
pub struct Clients {
    pub containers: Arc<dyn ContainerRuntime>,
    pub networks: Arc<dyn NetworkRuntime>,
    pub kubernetes: Arc<dyn KubernetesClient>,
    pub nomad: Arc<dyn NomadClient>,
    pub helm: Arc<dyn HelmClient>,
    pub http: Arc<dyn HttpClient>,
    pub getter: Arc<dyn FileGetter>,
    pub commands: Arc<dyn CommandRunner>,
    pub certs: Arc<dyn CertAuthority>,
}

impl Clients {
    /// Clients backed by the host's docker, kubectl, helm and git binaries.
    pub fn system() -> Self {
        let docker = Arc::new(DockerCli::new());
        Self {
            containers: docker.clone(),
            networks: docker,
            kubernetes: Arc::new(Kubectl::new()),
            nomad: Arc::new(NomadHttp::new()),
            helm: Arc::new(HelmCli::new()),
            http: Arc::new(UreqHttp::new()),
            getter: Arc::new(SourceGetter::new()),
            commands: Arc::new(LocalRunner::new()),
            certs: Arc::new(RcgenAuthority),
        }
    }
}

impl std::fmt::Debug for Clients {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Clients").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stderr_classification() {
        assert!(matches!(
            ClientError::from_stderr("docker", "Error: No such container: abc"),
            ClientError::NotFound(_)
        ));
        assert!(matches!(
            ClientError::from_stderr("docker", "network with name n1 already exists"),
            ClientError::AlreadyExists(_)
        ));
        assert!(matches!(
            ClientError::from_stderr(
                "docker",
                "Cannot connect to the Docker daemon at unix:///var/run/docker.sock"
            ),
            ClientError::Unavailable { .. }
        ));
        assert!(matches!(
            ClientError::from_stderr("kubectl", "open /x: permission denied"),
            ClientError::PermissionDenied(_)
        ));
        assert!(matches!(
            ClientError::from_stderr("helm", "boom"),
            ClientError::CommandFailed(_)
        ));
    }

    #[test]
    fn unavailable_display_names_service() {
        let e = ClientError::unavailable("nomad", "connection refused");
        assert_eq!(e.to_string(), "nomad is unavailable: connection refused");
    }
}
