//! Ingress proxies. Each ingress runs one small proxy container, named
//! `ingress-<name>`, that forwards ports between the host and a service in
//! a cluster or container. The connector the proxies talk to is managed
//! outside the engine.

use super::cluster::docker_host;
use super::container::{labels, launch, Launch, Launched};
use super::{payload, payload_mut, remove_containers_named, Provider, ProviderContext};
use crate::error::ProviderError;
use jumppad_runtime::{ContainerConfig, ImageRef, MountKind, PortMapping, VolumeMount};
use jumppad_schema::kinds::ingress::{RESERVED_NAMES, RESERVED_PORTS};
use jumppad_schema::kinds::{
    Container, ContainerIngress, Ingress, IngressPort, K8sCluster, K8sIngress, LocalIngress,
    NetworkAttachment, NomadCluster, NomadIngress,
};
use jumppad_schema::Resource;
use std::collections::BTreeMap;
use std::path::PathBuf;
use tracing::info;

pub const PROXY_IMAGE: &str = "ghcr.io/jumppad-labs/ingress:v0.3.0";
const HOST_GATEWAY: &str = "host.docker.internal";

/// One forwarded port: the proxy listens on `local` and sends traffic to
/// `remote` on the service.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Forward {
    local: u16,
    remote: String,
    host: Option<u16>,
}

impl From<&IngressPort> for Forward {
    fn from(p: &IngressPort) -> Self {
        Self {
            local: p.local,
            remote: p.remote.to_string(),
            host: p.host.or(Some(p.local)),
        }
    }
}

#[derive(Debug)]
struct Proxy {
    proxy_type: &'static str,
    service: String,
    forwards: Vec<Forward>,
    networks: Vec<NetworkAttachment>,
    /// Cluster connection file mounted at `/config/config`.
    config_file: Option<PathBuf>,
}

pub(crate) fn proxy_name(resource: &Resource) -> String {
    format!("ingress-{}", resource.info().name)
}

/// Reject reserved names and connector ports before anything is created.
fn check_reserved(resource: &Resource, ports: impl IntoIterator<Item = u16>) -> Result<(), ProviderError> {
    let name = resource.info().name.as_str();
    if RESERVED_NAMES.contains(&name) {
        return Err(ProviderError::invalid(format!(
            "{}: the name '{name}' is reserved",
            resource.id()
        )));
    }
    for port in ports {
        if RESERVED_PORTS.contains(&port) {
            return Err(ProviderError::invalid(format!(
                "{}: port {port} is reserved for the connector",
                resource.id()
            )));
        }
    }
    Ok(())
}

fn legacy_ports(ports: &[IngressPort]) -> impl Iterator<Item = u16> + '_ {
    ports
        .iter()
        .flat_map(|p| [Some(p.local), Some(p.remote), p.host])
        .flatten()
}

fn attachments(networks: &[String]) -> Vec<NetworkAttachment> {
    networks
        .iter()
        .map(|id| NetworkAttachment {
            id: id.clone(),
            ..NetworkAttachment::default()
        })
        .collect()
}

fn kube_config(ctx: &ProviderContext<'_>, reference: &str, from: &Resource) -> Result<(PathBuf, Vec<NetworkAttachment>), ProviderError> {
    let cluster = ctx.find_payload::<K8sCluster>(reference, from)?;
    if cluster.kubeconfig.docker_path.is_empty() {
        return Err(ProviderError::precondition(format!(
            "cluster {reference} has no kubeconfig; has it been created?"
        )));
    }
    Ok((PathBuf::from(&cluster.kubeconfig.docker_path), cluster.networks.clone()))
}

fn nomad_config(ctx: &ProviderContext<'_>, reference: &str, from: &Resource) -> Result<(PathBuf, Vec<NetworkAttachment>), ProviderError> {
    let cluster = ctx.find_payload::<NomadCluster>(reference, from)?;
    if cluster.config_dir.is_empty() {
        return Err(ProviderError::precondition(format!(
            "nomad cluster {reference} has not been created"
        )));
    }
    Ok((PathBuf::from(&cluster.config_dir).join("config.json"), cluster.networks.clone()))
}

fn start_proxy(ctx: &ProviderContext<'_>, resource: &Resource, proxy: &Proxy) -> Result<Launched, ProviderError> {
    let name = proxy_name(resource);
    info!(id = %resource.id(), service = %proxy.service, "starting ingress proxy {name}");
    let ports: Vec<String> = proxy
        .forwards
        .iter()
        .map(|f| format!("{}:{}", f.local, f.remote))
        .collect();
    let mut volumes = Vec::new();
    if let Some(file) = &proxy.config_file {
        volumes.push(VolumeMount {
            source: file.display().to_string(),
            destination: "/config/config".to_owned(),
            kind: MountKind::Bind,
            read_only: true,
        });
    }
    let config = ContainerConfig {
        name,
        image: PROXY_IMAGE.to_owned(),
        command: vec![
            "--proxy-type".to_owned(),
            proxy.proxy_type.to_owned(),
            "--service-address".to_owned(),
            proxy.service.clone(),
            "--ports".to_owned(),
            ports.join(","),
        ],
        labels: labels(resource, &BTreeMap::new()),
        volumes,
        ports: proxy
            .forwards
            .iter()
            .filter(|f| f.host.is_some())
            .map(|f| PortMapping {
                local: f.local,
                host: f.host,
                protocol: "tcp".to_owned(),
            })
            .collect(),
        ..ContainerConfig::default()
    };
    launch(
        ctx,
        resource,
        Launch {
            config,
            image: ImageRef::new(PROXY_IMAGE),
            networks: &proxy.networks,
            health_check: None,
            existing: find_proxy(resource, ctx)?,
        },
    )
}

fn remove_proxy(resource: &Resource, ctx: &ProviderContext<'_>, force: bool) -> Result<(), ProviderError> {
    info!(id = %resource.id(), "removing ingress proxy");
    remove_containers_named(ctx, &proxy_name(resource), force)
}

fn find_proxy(resource: &Resource, ctx: &ProviderContext<'_>) -> Result<Vec<String>, ProviderError> {
    Ok(ctx.clients.containers.find_containers(&proxy_name(resource))?)
}

#[derive(Debug, Default)]
pub struct IngressProvider;

impl IngressProvider {
    fn proxy(&self, ctx: &ProviderContext<'_>, resource: &Resource, ingress: &Ingress) -> Result<Proxy, ProviderError> {
        let target = &ingress.target;
        let remote = if target.port != 0 {
            target.port.to_string()
        } else if !target.named_port.is_empty() {
            target.named_port.clone()
        } else {
            return Err(ProviderError::invalid(format!(
                "{}: target needs a port or named_port",
                resource.id()
            )));
        };
        let setting = |key: &str, default: &str| {
            target
                .config
                .get(key)
                .filter(|v| !v.is_empty())
                .cloned()
                .unwrap_or_else(|| default.to_owned())
        };
        let required = |key: &str| {
            target.config.get(key).filter(|v| !v.is_empty()).cloned().ok_or_else(|| {
                ProviderError::invalid(format!("{}: target config needs '{key}'", resource.id()))
            })
        };

        let found = ctx.find(&target.resource, resource)?;
        let (proxy_type, service, config_file, networks) = match found.kind() {
            "k8s_cluster" => {
                let (file, nets) = kube_config(ctx, &target.resource, resource)?;
                let service = format!("{}.{}.svc", required("service")?, setting("namespace", "default"));
                ("k8s", service, Some(file), nets)
            }
            "nomad_cluster" => {
                let (file, nets) = nomad_config(ctx, &target.resource, resource)?;
                let service = format!("{}.{}.{}", required("job")?, required("group")?, required("task")?);
                ("nomad", service, Some(file), nets)
            }
            "container" => {
                let c = ctx.find_payload::<Container>(&target.resource, resource)?;
                let service = if c.container_name.is_empty() {
                    found.fqdn()
                } else {
                    c.container_name.clone()
                };
                ("docker", service, None, c.networks.clone())
            }
            other => {
                return Err(ProviderError::invalid(format!(
                    "{}: cannot route traffic to a {other}",
                    resource.id()
                )))
            }
        };

        let forwards = if ingress.expose_local {
            vec![Forward {
                local: target.port,
                remote: ingress.port.to_string(),
                host: None,
            }]
        } else {
            vec![Forward {
                local: ingress.port,
                remote,
                host: Some(ingress.port),
            }]
        };
        let (proxy_type, service) = if ingress.expose_local {
            ("local", HOST_GATEWAY.to_owned())
        } else {
            (proxy_type, service)
        };
        Ok(Proxy {
            proxy_type,
            service,
            forwards,
            networks,
            config_file,
        })
    }
}

impl Provider for IngressProvider {
    fn kind(&self) -> &'static str {
        "ingress"
    }

    fn create(&self, resource: &mut Resource, ctx: &ProviderContext<'_>) -> Result<(), ProviderError> {
        let ingress: Ingress = payload(resource)?;
        check_reserved(resource, [ingress.port, ingress.target.port])?;
        let proxy = self.proxy(ctx, resource, &ingress)?;
        let launched = start_proxy(ctx, resource, &proxy)?;

        let remote = proxy.forwards.first().map(|f| f.remote.clone()).unwrap_or_default();
        let out = payload_mut::<Ingress>(resource)?;
        out.ingress_id = launched.id;
        out.local_address = format!("{}:{}", docker_host(), ingress.port);
        out.remote_address = format!("{}:{remote}", proxy.service);
        Ok(())
    }

    fn destroy(&self, resource: &mut Resource, ctx: &ProviderContext<'_>, force: bool) -> Result<(), ProviderError> {
        remove_proxy(resource, ctx, force)?;
        payload_mut::<Ingress>(resource)?.ingress_id.clear();
        Ok(())
    }

    fn lookup(&self, resource: &Resource, ctx: &ProviderContext<'_>) -> Result<Vec<String>, ProviderError> {
        find_proxy(resource, ctx)
    }
}

#[derive(Debug, Default)]
pub struct K8sIngressProvider;

impl Provider for K8sIngressProvider {
    fn kind(&self) -> &'static str {
        "k8s_ingress"
    }

    fn create(&self, resource: &mut Resource, ctx: &ProviderContext<'_>) -> Result<(), ProviderError> {
        let ingress: K8sIngress = payload(resource)?;
        check_reserved(resource, legacy_ports(&ingress.ports))?;
        let (file, cluster_networks) = kube_config(ctx, &ingress.cluster, resource)?;
        let namespace = if ingress.namespace.is_empty() {
            "default"
        } else {
            &ingress.namespace
        };
        let proxy = Proxy {
            proxy_type: "k8s",
            service: format!("{}.{namespace}.svc", ingress.service),
            forwards: ingress.ports.iter().map(Forward::from).collect(),
            networks: if ingress.networks.is_empty() {
                cluster_networks
            } else {
                attachments(&ingress.networks)
            },
            config_file: Some(file),
        };
        let launched = start_proxy(ctx, resource, &proxy)?;
        payload_mut::<K8sIngress>(resource)?.container_id = launched.id;
        Ok(())
    }

    fn destroy(&self, resource: &mut Resource, ctx: &ProviderContext<'_>, force: bool) -> Result<(), ProviderError> {
        remove_proxy(resource, ctx, force)?;
        payload_mut::<K8sIngress>(resource)?.container_id.clear();
        Ok(())
    }

    fn lookup(&self, resource: &Resource, ctx: &ProviderContext<'_>) -> Result<Vec<String>, ProviderError> {
        find_proxy(resource, ctx)
    }
}

#[derive(Debug, Default)]
pub struct NomadIngressProvider;

impl Provider for NomadIngressProvider {
    fn kind(&self) -> &'static str {
        "nomad_ingress"
    }

    fn create(&self, resource: &mut Resource, ctx: &ProviderContext<'_>) -> Result<(), ProviderError> {
        let ingress: NomadIngress = payload(resource)?;
        check_reserved(resource, legacy_ports(&ingress.ports))?;
        let (file, cluster_networks) = nomad_config(ctx, &ingress.cluster, resource)?;
        let proxy = Proxy {
            proxy_type: "nomad",
            service: format!("{}.{}.{}", ingress.job, ingress.group, ingress.task),
            forwards: ingress.ports.iter().map(Forward::from).collect(),
            networks: if ingress.networks.is_empty() {
                cluster_networks
            } else {
                attachments(&ingress.networks)
            },
            config_file: Some(file),
        };
        let launched = start_proxy(ctx, resource, &proxy)?;
        payload_mut::<NomadIngress>(resource)?.container_id = launched.id;
        Ok(())
    }

    fn destroy(&self, resource: &mut Resource, ctx: &ProviderContext<'_>, force: bool) -> Result<(), ProviderError> {
        remove_proxy(resource, ctx, force)?;
        payload_mut::<NomadIngress>(resource)?.container_id.clear();
        Ok(())
    }

    fn lookup(&self, resource: &Resource, ctx: &ProviderContext<'_>) -> Result<Vec<String>, ProviderError> {
        find_proxy(resource, ctx)
    }
}

#[derive(Debug, Default)]
pub struct ContainerIngressProvider;

impl Provider for ContainerIngressProvider {
    fn kind(&self) -> &'static str {
        "container_ingress"
    }

    fn create(&self, resource: &mut Resource, ctx: &ProviderContext<'_>) -> Result<(), ProviderError> {
        let ingress: ContainerIngress = payload(resource)?;
        check_reserved(resource, legacy_ports(&ingress.ports))?;
        let target = ctx.find(&ingress.target, resource)?;
        let container = ctx.find_payload::<Container>(&ingress.target, resource)?;
        let proxy = Proxy {
            proxy_type: "docker",
            service: target.fqdn(),
            forwards: ingress.ports.iter().map(Forward::from).collect(),
            networks: if ingress.networks.is_empty() {
                container.networks.clone()
            } else {
                attachments(&ingress.networks)
            },
            config_file: None,
        };
        let launched = start_proxy(ctx, resource, &proxy)?;
        payload_mut::<ContainerIngress>(resource)?.container_id = launched.id;
        Ok(())
    }

    fn destroy(&self, resource: &mut Resource, ctx: &ProviderContext<'_>, force: bool) -> Result<(), ProviderError> {
        remove_proxy(resource, ctx, force)?;
        payload_mut::<ContainerIngress>(resource)?.container_id.clear();
        Ok(())
    }

    fn lookup(&self, resource: &Resource, ctx: &ProviderContext<'_>) -> Result<Vec<String>, ProviderError> {
        find_proxy(resource, ctx)
    }
}

#[derive(Debug, Default)]
pub struct LocalIngressProvider;

/// Point loopback addresses at the host gateway so containers can reach them.
fn host_reachable(address: &str, port: u16) -> String {
    let (host, port) = match address.rsplit_once(':') {
        Some((h, p)) => (h, p.to_owned()),
        None => (address, port.to_string()),
    };
    let host = match host {
        "" | "localhost" | "127.0.0.1" => HOST_GATEWAY,
        other => other,
    };
    format!("{host}:{port}")
}

impl Provider for LocalIngressProvider {
    fn kind(&self) -> &'static str {
        "local_ingress"
    }

    fn create(&self, resource: &mut Resource, ctx: &ProviderContext<'_>) -> Result<(), ProviderError> {
        let ingress: LocalIngress = payload(resource)?;
        check_reserved(resource, [ingress.port, ingress.remote_port])?;
        let found = ctx.find(&ingress.cluster, resource)?;
        let networks = match found.kind() {
            "k8s_cluster" => kube_config(ctx, &ingress.cluster, resource)?.1,
            "nomad_cluster" => nomad_config(ctx, &ingress.cluster, resource)?.1,
            "container" => ctx.find_payload::<Container>(&ingress.cluster, resource)?.networks.clone(),
            other => {
                return Err(ProviderError::invalid(format!(
                    "{}: cannot expose a local service into a {other}",
                    resource.id()
                )))
            }
        };
        let service = host_reachable(&ingress.address, ingress.port);
        let remote = service.rsplit_once(':').map(|(_, p)| p.to_owned()).unwrap_or_default();
        let proxy = Proxy {
            proxy_type: "local",
            service,
            forwards: vec![Forward {
                local: ingress.remote_port,
                remote,
                host: None,
            }],
            networks,
            config_file: None,
        };
        let launched = start_proxy(ctx, resource, &proxy)?;
        payload_mut::<LocalIngress>(resource)?.ingress_id = launched.id;
        Ok(())
    }

    fn destroy(&self, resource: &mut Resource, ctx: &ProviderContext<'_>, force: bool) -> Result<(), ProviderError> {
        remove_proxy(resource, ctx, force)?;
        payload_mut::<LocalIngress>(resource)?.ingress_id.clear();
        Ok(())
    }

    fn lookup(&self, resource: &Resource, ctx: &ProviderContext<'_>) -> Result<Vec<String>, ProviderError> {
        find_proxy(resource, ctx)
    }
}
