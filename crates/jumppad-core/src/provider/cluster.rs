//! k3s clusters running in a single privileged server container.

use super::container::{container_config, image_ref};
use super::healthcheck::poll;
use super::image_cache::IMAGES_VOLUME;
use super::{
    attach_network, payload, payload_mut, remove_containers_named, scoped, Provider,
    ProviderContext, RollbackStep,
};
use crate::error::ProviderError;
use jumppad_runtime::LogWriter;
use jumppad_schema::kinds::{Container, Image, K8sCluster, KubeConfig, Port, Volume};
use jumppad_schema::{validate_cluster_name, Resource};
use jumppad_store::{remove_cluster_config, write_kubeconfigs};
use rand::Rng;
use std::path::PathBuf;
use tracing::{debug, info, warn};

pub const DEFAULT_K3S_VERSION: &str = "v1.27.4-k3s1";
const API_PORT_RANGE: std::ops::Range<u16> = 64000..65000;
const CONNECTOR_PORT_RANGE: std::ops::Range<u16> = 30000..31000;
const KUBELET_READY: &str = "Running kubelet";
const KUBECONFIG_IN_CONTAINER: &str = "/output/kubeconfig.yaml";
const SYSTEM_PODS: [&str; 2] = ["app=local-path-provisioner", "k8s-app=kube-dns"];

#[derive(Debug, Default)]
pub struct K8sClusterProvider;

/// Address the host uses to reach published container ports.
pub(crate) fn docker_host() -> String {
    std::env::var("DOCKER_HOST")
        .ok()
        .and_then(|h| {
            let rest = h.strip_prefix("tcp://")?;
            let host = rest.split(':').next()?;
            (!host.is_empty()).then(|| host.to_owned())
        })
        .unwrap_or_else(|| "127.0.0.1".to_owned())
}

/// Pick a random port in `range`, different from every port in `taken`.
pub(crate) fn random_port(range: std::ops::Range<u16>, taken: &[u16]) -> u16 {
    let mut rng = rand::thread_rng();
    loop {
        let port = rng.gen_range(range.clone());
        if !taken.contains(&port) {
            return port;
        }
    }
}

/// Name of the server container of a cluster.
pub(crate) fn server_name(resource: &Resource) -> String {
    format!("server.{}", resource.fqdn())
}

fn k3s_image(cluster: &K8sCluster) -> Image {
    cluster.image.clone().unwrap_or_else(|| {
        let version = if cluster.version.is_empty() {
            DEFAULT_K3S_VERSION
        } else {
            &cluster.version
        };
        Image::named(format!("rancher/k3s:{version}"))
    })
}

/// The server node as a container owned by the cluster.
fn server_node(
    resource: &Resource,
    cluster: &K8sCluster,
    image: Image,
    api_port: u16,
    connector_port: u16,
) -> Resource {
    let container_name = server_name(resource);
    let mut environment = cluster.environment.clone();
    environment.insert(
        "K3S_KUBECONFIG_OUTPUT".to_owned(),
        KUBECONFIG_IN_CONTAINER.to_owned(),
    );
    environment.insert("K3S_CLUSTER_SECRET".to_owned(), "mysupersecret".to_owned());

    let mut volumes = cluster.volumes.clone();
    volumes.push(Volume {
        source: IMAGES_VOLUME.to_owned(),
        destination: "/cache".to_owned(),
        volume_type: "volume".to_owned(),
        read_only: false,
    });

    let tcp = |local: u16, host: u16| Port {
        local,
        host: Some(host),
        protocol: "tcp".to_owned(),
    };
    let mut ports = vec![
        tcp(6443, api_port),
        tcp(connector_port, connector_port),
        tcp(connector_port + 1, connector_port + 1),
    ];
    ports.extend(cluster.ports.iter().cloned());

    resource.add_child(
        "server",
        Container {
            image,
            networks: cluster.networks.clone(),
            command: vec![
                "server".to_owned(),
                "--https-listen-port=6443".to_owned(),
                format!("--tls-san={container_name}"),
                "--disable=traefik".to_owned(),
                "--snapshotter=native".to_owned(),
            ],
            environment,
            volumes,
            ports,
            privileged: true,
            ..Container::default()
        },
    )
}

impl K8sClusterProvider {
    fn import_images(
        &self,
        ctx: &ProviderContext<'_>,
        cluster: &str,
        container: &str,
        images: &[Image],
    ) -> Result<(), ProviderError> {
        let names: Vec<String> = images.iter().map(|i| i.name.clone()).collect();
        for image in images {
            ctx.check_cancelled()?;
            ctx.clients.containers.pull_image(&image_ref(image), ctx.force_pull)?;
        }
        std::fs::create_dir_all(ctx.layout.cache_dir())?;
        let archive = ctx.layout.cache_dir().join(format!("images-{cluster}.tar"));
        ctx.clients.containers.save_images(&names, &archive)?;
        let result = (|| {
            ctx.clients
                .containers
                .copy_to_container(container, &archive, "/cache/images.tar")?;
            let command = ["ctr", "images", "import", "/cache/images.tar"].map(str::to_owned);
            let mut out = LogWriter::new(cluster);
            let code = ctx.clients.containers.exec(container, &command, None, &mut out)?;
            if code == 0 {
                Ok(())
            } else {
                Err(ProviderError::internal(format!(
                    "importing images into {cluster} exited with {code}"
                )))
            }
        })();
        if let Err(e) = std::fs::remove_file(&archive) {
            debug!("unable to remove {}: {e}", archive.display());
        }
        result
    }
}

impl Provider for K8sClusterProvider {
    fn kind(&self) -> &'static str {
        "k8s_cluster"
    }

    fn create(&self, resource: &mut Resource, ctx: &ProviderContext<'_>) -> Result<(), ProviderError> {
        let cluster: K8sCluster = payload(resource)?;
        let name = resource.info().name.clone();
        validate_cluster_name(&name)?;
        if !cluster.driver.is_empty() && cluster.driver != "k3s" {
            return Err(ProviderError::invalid(format!(
                "cluster {name}: unsupported driver '{}'",
                cluster.driver
            )));
        }
        if cluster.nodes > 1 {
            warn!("cluster {name}: only single node k3s clusters are supported");
        }
        let start_timeout = cluster.start_timeout()?;
        let container_name = server_name(resource);
        info!(id = %resource.id(), "creating k3s cluster {name}");

        let image = k3s_image(&cluster);
        ctx.clients.containers.pull_image(&image_ref(&image), ctx.force_pull)?;
        ctx.clients.containers.create_volume(IMAGES_VOLUME)?;
        remove_containers_named(ctx, &container_name, false)?;

        let api_port = random_port(API_PORT_RANGE, &[]);
        let connector_port = random_port(CONNECTOR_PORT_RANGE, &[]);

        let server = server_node(resource, &cluster, image, api_port, connector_port);
        debug!(node = %server.id(), module = ?server.info().module, "server node for {name}");
        let node: Container = payload(&server)?;
        let config = container_config(resource, &node, container_name.clone())?;

        let host = docker_host();
        let paths = scoped(ctx.clients, |undo| {
            let id = ctx.clients.containers.create_container(&config)?;
            undo.push(RollbackStep::RemoveContainer(id.clone()));
            for net in &node.networks {
                attach_network(ctx, resource, &net.id, &id, &net.ip_address, &net.aliases, undo)?;
            }
            ctx.clients.containers.start_container(&id)?;

            poll(&format!("cluster {name}"), start_timeout, ctx.cancel, || {
                let logs = ctx.clients.containers.container_logs(&id)?;
                Ok(logs.contains(KUBELET_READY))
            })?;

            let config_dir = ctx.layout.cluster_config_dir(&name);
            std::fs::create_dir_all(&config_dir)?;
            undo.push(RollbackStep::RemoveDir(config_dir.clone()));
            let raw = config_dir.join("kubeconfig-raw.yaml");
            ctx.clients
                .containers
                .copy_from_container(&id, KUBECONFIG_IN_CONTAINER, &raw)?;
            let content = std::fs::read_to_string(&raw)?;
            std::fs::remove_file(&raw)?;
            let paths = write_kubeconfigs(
                ctx.layout,
                &name,
                &content,
                &format!("https://{host}:{api_port}"),
                &format!("https://{container_name}:6443"),
            )?;

            poll(&format!("system pods of {name}"), start_timeout, ctx.cancel, || {
                for selector in SYSTEM_PODS {
                    if !ctx.clients.kubernetes.pods_ready(&paths.host, selector)? {
                        return Ok(false);
                    }
                }
                Ok(true)
            })?;

            if !cluster.copy_images.is_empty() {
                self.import_images(ctx, &name, &id, &cluster.copy_images)?;
            }
            Ok(paths)
        })?;

        let out = payload_mut::<K8sCluster>(resource)?;
        out.api_port = api_port;
        out.connector_port = connector_port;
        out.container_name = container_name;
        out.external_ip = host;
        out.kubeconfig = KubeConfig {
            path: paths.host.display().to_string(),
            docker_path: paths.docker.display().to_string(),
        };
        Ok(())
    }

    fn destroy(&self, resource: &mut Resource, ctx: &ProviderContext<'_>, force: bool) -> Result<(), ProviderError> {
        let name = resource.info().name.clone();
        info!(id = %resource.id(), "destroying k3s cluster {name}");
        remove_containers_named(ctx, &server_name(resource), force)?;
        remove_cluster_config(ctx.layout, &name)?;
        payload_mut::<K8sCluster>(resource)?.kubeconfig = KubeConfig::default();
        Ok(())
    }

    fn lookup(&self, resource: &Resource, ctx: &ProviderContext<'_>) -> Result<Vec<String>, ProviderError> {
        Ok(ctx.clients.containers.find_containers(&server_name(resource))?)
    }
}

/// Host kubeconfig of a created cluster referenced by `reference`.
pub(crate) fn kubeconfig_for(
    ctx: &ProviderContext<'_>,
    reference: &str,
    from: &Resource,
) -> Result<PathBuf, ProviderError> {
    let cluster = ctx.find_payload::<K8sCluster>(reference, from)?;
    if cluster.kubeconfig.path.is_empty() {
        return Err(ProviderError::precondition(format!(
            "cluster {reference} has no kubeconfig; has it been created?"
        )));
    }
    Ok(PathBuf::from(&cluster.kubeconfig.path))
}
