//! Nomad clusters (one server plus optional clients) and the jobs run on
//! them.

use super::cluster::{docker_host, random_port};
use super::container::{image_ref, labels, mounts, port_mappings};
use super::healthcheck::poll;
use super::k8s::{file_digest, manifest_files};
use super::{
    attach_network, payload, payload_mut, remove_containers_named, scoped, tolerate, Compensators,
    Provider, ProviderContext, RollbackStep,
};
use crate::error::ProviderError;
use jumppad_runtime::{ContainerConfig, MountKind, PortMapping, VolumeMount};
use jumppad_schema::kinds::{Image, NomadCluster, NomadJob};
use jumppad_schema::{validate_cluster_name, Resource};
use jumppad_store::{read_nomad_config, remove_cluster_config, write_nomad_config, NomadConfig, StoreError};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::Path;
use tracing::info;

pub const DEFAULT_NOMAD_VERSION: &str = "1.6.1";
const API_PORT_RANGE: std::ops::Range<u16> = 64000..65000;
const CONNECTOR_PORT_RANGE: std::ops::Range<u16> = 31000..32000;

#[derive(Debug, Default)]
pub struct NomadClusterProvider;

fn nomad_image(cluster: &NomadCluster) -> Image {
    cluster.image.clone().unwrap_or_else(|| {
        let version = if cluster.version.is_empty() {
            DEFAULT_NOMAD_VERSION
        } else {
            &cluster.version
        };
        Image::named(format!("shipyardrun/nomad:{version}"))
    })
}

pub(crate) fn server_name(resource: &Resource) -> String {
    format!("server.{}", resource.fqdn())
}

fn client_name(resource: &Resource, index: u32) -> String {
    format!("{index}.client.{}", resource.fqdn())
}

const CLIENT_OPTIONS: &str = "  options {
    \"driver.raw_exec.enable\" = \"1\"
    \"docker.privileged.enabled\" = \"true\"
  }
";

fn server_config(datacenter: &str, dev_client: bool) -> String {
    let mut hcl = format!(
        "data_dir = \"/var/lib/nomad\"\ndatacenter = \"{datacenter}\"\n\nserver {{\n  enabled = true\n  bootstrap_expect = 1\n}}\n"
    );
    if dev_client {
        hcl.push_str(&format!("\nclient {{\n  enabled = true\n{CLIENT_OPTIONS}}}\n"));
    }
    hcl
}

fn client_config(datacenter: &str, server: &str) -> String {
    format!(
        "data_dir = \"/var/lib/nomad\"\ndatacenter = \"{datacenter}\"\n\nclient {{\n  enabled = true\n  servers = [\"{server}\"]\n{CLIENT_OPTIONS}}}\n"
    )
}

impl NomadClusterProvider {
    #[allow(clippy::too_many_arguments)]
    fn start_node(
        &self,
        ctx: &ProviderContext<'_>,
        resource: &Resource,
        cluster: &NomadCluster,
        name: &str,
        config_file: &Path,
        ports: Vec<PortMapping>,
        undo: &mut Compensators,
    ) -> Result<String, ProviderError> {
        let mut volumes = mounts(&cluster.volumes)?;
        volumes.push(VolumeMount {
            source: config_file.display().to_string(),
            destination: "/etc/nomad.d/config.hcl".to_owned(),
            kind: MountKind::Bind,
            read_only: true,
        });
        let config = ContainerConfig {
            name: name.to_owned(),
            image: nomad_image(cluster).name,
            environment: cluster.environment.clone(),
            labels: labels(resource, &BTreeMap::new()),
            volumes,
            ports,
            privileged: true,
            ..ContainerConfig::default()
        };
        let id = ctx.clients.containers.create_container(&config)?;
        undo.push(RollbackStep::RemoveContainer(id.clone()));
        for net in &cluster.networks {
            attach_network(ctx, resource, &net.id, &id, &net.ip_address, &net.aliases, undo)?;
        }
        ctx.clients.containers.start_container(&id)?;
        Ok(id)
    }
}

impl Provider for NomadClusterProvider {
    fn kind(&self) -> &'static str {
        "nomad_cluster"
    }

    fn create(&self, resource: &mut Resource, ctx: &ProviderContext<'_>) -> Result<(), ProviderError> {
        let cluster: NomadCluster = payload(resource)?;
        let name = resource.info().name.clone();
        validate_cluster_name(&name)?;
        let start_timeout = cluster.start_timeout()?;
        info!(id = %resource.id(), clients = cluster.client_nodes, "creating nomad cluster {name}");

        ctx.clients
            .containers
            .pull_image(&image_ref(&nomad_image(&cluster)), ctx.force_pull)?;
        for image in &cluster.copy_images {
            ctx.clients.containers.pull_image(&image_ref(image), ctx.force_pull)?;
        }

        let server = server_name(resource);
        let clients: Vec<String> = (1..=cluster.client_nodes).map(|i| client_name(resource, i)).collect();
        remove_containers_named(ctx, &server, false)?;
        for c in &clients {
            remove_containers_named(ctx, c, false)?;
        }

        let api_port = random_port(API_PORT_RANGE, &[]);
        let connector_port = random_port(CONNECTOR_PORT_RANGE, &[]);
        let host = docker_host();
        let config_dir = ctx.layout.cluster_config_dir(&name);
        let expected_nodes = (cluster.client_nodes as usize).max(1);

        scoped(ctx.clients, |undo| {
            fs::create_dir_all(&config_dir)?;
            undo.push(RollbackStep::RemoveDir(config_dir.clone()));

            let server_file = config_dir.join("server_config.hcl");
            fs::write(&server_file, server_config(cluster.datacenter(), clients.is_empty()))?;
            let mut ports = vec![
                PortMapping {
                    local: 4646,
                    host: Some(api_port),
                    protocol: "tcp".to_owned(),
                },
                PortMapping {
                    local: connector_port,
                    host: Some(connector_port),
                    protocol: "tcp".to_owned(),
                },
            ];
            ports.extend(port_mappings(&cluster.ports));
            self.start_node(ctx, resource, &cluster, &server, &server_file, ports, undo)?;

            if !clients.is_empty() {
                let client_file = config_dir.join("client_config.hcl");
                fs::write(&client_file, client_config(cluster.datacenter(), &server))?;
                for c in &clients {
                    ctx.check_cancelled()?;
                    self.start_node(ctx, resource, &cluster, c, &client_file, Vec::new(), undo)?;
                }
            }

            let address = format!("http://{host}:{api_port}");
            poll(&format!("nomad cluster {name}"), start_timeout, ctx.cancel, || {
                Ok(ctx.clients.nomad.ready_nodes(&address)? >= expected_nodes)
            })?;
            write_nomad_config(ctx.layout, &name, &NomadConfig::new(&host, api_port, expected_nodes as u32))?;
            Ok(())
        })?;

        let out = payload_mut::<NomadCluster>(resource)?;
        out.api_port = api_port;
        out.connector_port = connector_port;
        out.server_container_name = server;
        out.client_container_names = clients;
        out.external_ip = host;
        out.config_dir = config_dir.display().to_string();
        Ok(())
    }

    fn destroy(&self, resource: &mut Resource, ctx: &ProviderContext<'_>, force: bool) -> Result<(), ProviderError> {
        let cluster: NomadCluster = payload(resource)?;
        let name = resource.info().name.clone();
        info!(id = %resource.id(), "destroying nomad cluster {name}");
        for c in &cluster.client_container_names {
            remove_containers_named(ctx, c, force)?;
        }
        remove_containers_named(ctx, &server_name(resource), force)?;
        remove_cluster_config(ctx.layout, &name)?;
        let out = payload_mut::<NomadCluster>(resource)?;
        out.client_container_names.clear();
        out.config_dir.clear();
        Ok(())
    }

    fn lookup(&self, resource: &Resource, ctx: &ProviderContext<'_>) -> Result<Vec<String>, ProviderError> {
        let cluster: NomadCluster = payload(resource)?;
        let mut ids = ctx.clients.containers.find_containers(&server_name(resource))?;
        for c in &cluster.client_container_names {
            ids.extend(ctx.clients.containers.find_containers(c)?);
        }
        Ok(ids)
    }
}

#[derive(Debug, Default)]
pub struct NomadJobProvider;

/// API address of the cluster a job runs on, from its written config.
fn cluster_address(ctx: &ProviderContext<'_>, job: &NomadJob, from: &Resource) -> Result<String, ProviderError> {
    let cluster = ctx.find(&job.cluster, from)?;
    if cluster.kind() != "nomad_cluster" {
        return Err(ProviderError::invalid(format!(
            "{} runs on {}, which is not a nomad cluster",
            from.id(),
            cluster.id()
        )));
    }
    match read_nomad_config(ctx.layout, &cluster.info().name) {
        Ok(config) => Ok(config.location),
        Err(StoreError::NotFound(_)) => Err(ProviderError::precondition(format!(
            "nomad cluster {} has not been created",
            cluster.id()
        ))),
        Err(e) => Err(e.into()),
    }
}

impl NomadJobProvider {
    fn apply(&self, resource: &mut Resource, ctx: &ProviderContext<'_>) -> Result<(), ProviderError> {
        let job: NomadJob = payload(resource)?;
        let address = cluster_address(ctx, &job, resource)?;
        let files = manifest_files(&job.paths)?;
        let mut checksums = BTreeMap::new();
        for file in &files {
            ctx.check_cancelled()?;
            let id = ctx.clients.nomad.apply_job(&address, file)?;
            info!(id = %resource.id(), job = %id, "registered nomad job");
            checksums.insert(id, file_digest(file)?);
        }

        if let Some(check) = &job.health_check {
            let timeout = check.timeout()?;
            poll(&format!("jobs of {}", resource.id()), timeout, ctx.cancel, || {
                for j in &check.jobs {
                    if !ctx.clients.nomad.job_running(&address, j)? {
                        return Ok(false);
                    }
                }
                Ok(true)
            })?;
        }
        payload_mut::<NomadJob>(resource)?.checksums = checksums;
        Ok(())
    }
}

impl Provider for NomadJobProvider {
    fn kind(&self) -> &'static str {
        "nomad_job"
    }

    fn create(&self, resource: &mut Resource, ctx: &ProviderContext<'_>) -> Result<(), ProviderError> {
        self.apply(resource, ctx)
    }

    fn destroy(&self, resource: &mut Resource, ctx: &ProviderContext<'_>, force: bool) -> Result<(), ProviderError> {
        let job: NomadJob = payload(resource)?;
        let Ok(address) = cluster_address(ctx, &job, resource) else {
            tracing::warn!(id = %resource.id(), "cluster unavailable, skipping job stop");
            return Ok(());
        };
        for id in job.checksums.keys() {
            tolerate(
                ctx.clients.nomad.stop_job(&address, id).map_err(Into::into),
                &format!("stop job {id}"),
                force,
            )?;
        }
        payload_mut::<NomadJob>(resource)?.checksums.clear();
        Ok(())
    }

    fn lookup(&self, resource: &Resource, _ctx: &ProviderContext<'_>) -> Result<Vec<String>, ProviderError> {
        let job: NomadJob = payload(resource)?;
        Ok(job.checksums.into_keys().collect())
    }

    fn refresh(&self, resource: &mut Resource, ctx: &ProviderContext<'_>) -> Result<(), ProviderError> {
        if self.changed(resource, ctx)? {
            info!(id = %resource.id(), "job files changed, re-registering");
            self.apply(resource, ctx)?;
        }
        Ok(())
    }

    fn changed(&self, resource: &Resource, _ctx: &ProviderContext<'_>) -> Result<bool, ProviderError> {
        let job: NomadJob = payload(resource)?;
        let current = manifest_files(&job.paths)?
            .iter()
            .map(|f| file_digest(f))
            .collect::<Result<BTreeSet<_>, _>>()?;
        let recorded: BTreeSet<String> = job.checksums.into_values().collect();
        Ok(current != recorded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::testing::Harness;
    use crate::ProviderErrorKind;
    use jumppad_schema::kinds::NomadHealthCheck;

    fn cluster(clients: u32) -> Resource {
        Resource::new(
            "dev",
            NomadCluster {
                client_nodes: clients,
                start_timeout: "1s".to_owned(),
                ..NomadCluster::default()
            },
        )
    }

    #[test]
    fn config_files_are_hcl() {
        let s = server_config("dc1", true);
        assert!(s.contains("datacenter = \"dc1\""));
        assert!(s.contains("server {"));
        assert!(s.contains("client {"));
        let c = client_config("dc2", "server.dev");
        assert!(c.contains("servers = [\"server.dev\"]"));
        assert!(!c.contains("server {"));
        assert_eq!(c.matches('{').count(), c.matches('}').count());
    }

    #[test]
    fn create_starts_server_and_clients() {
        let h = Harness::new();
        let mut r = cluster(2);
        NomadClusterProvider.create(&mut r, &h.ctx()).unwrap();
        let n = r.payload::<NomadCluster>().unwrap();
        assert_eq!(n.server_container_name, "server.dev.nomad-cluster.local.jumppad.dev");
        assert_eq!(
            n.client_container_names,
            vec![
                "1.client.dev.nomad-cluster.local.jumppad.dev".to_owned(),
                "2.client.dev.nomad-cluster.local.jumppad.dev".to_owned(),
            ]
        );
        assert_eq!(h.mock.container_count(), 3);
        let cfg = read_nomad_config(&h.layout, "dev").unwrap();
        assert_eq!(cfg.node_count, 2);
        assert!(cfg.location.ends_with(&format!(":{}", n.api_port)));

        NomadClusterProvider.destroy(&mut r, &h.ctx(), false).unwrap();
        assert_eq!(h.mock.container_count(), 0);
        assert!(read_nomad_config(&h.layout, "dev").is_err());
    }

    #[test]
    fn unready_cluster_rolls_back() {
        let h = Harness::new();
        h.mock.fail("nomad_nodes", "");
        let mut r = cluster(0);
        let err = NomadClusterProvider.create(&mut r, &h.ctx()).unwrap_err();
        assert_eq!(err.kind, ProviderErrorKind::Internal);
        assert_eq!(h.mock.container_count(), 0);
        assert!(!h.layout.cluster_config_dir("dev").exists());
    }

    fn job(h: &Harness) -> (Resource, std::path::PathBuf) {
        let file = h.dir.path().join("web.hcl");
        fs::write(&file, "job \"web\" {}\n").unwrap();
        let r = Resource::new(
            "web",
            NomadJob {
                cluster: "resource.nomad_cluster.dev".to_owned(),
                paths: vec![file.display().to_string()],
                health_check: Some(NomadHealthCheck {
                    timeout: "1s".to_owned(),
                    jobs: vec!["web".to_owned()],
                }),
                ..NomadJob::default()
            },
        );
        (r, file)
    }

    #[test]
    fn job_requires_created_cluster() {
        let h = Harness::new().with(cluster(0));
        let (mut r, _) = job(&h);
        let err = NomadJobProvider.create(&mut r, &h.ctx()).unwrap_err();
        assert_eq!(err.kind, ProviderErrorKind::PreconditionFailed);
    }

    #[test]
    fn job_lifecycle_tracks_file_digests() {
        let h0 = Harness::new();
        let mut c = cluster(0);
        NomadClusterProvider.create(&mut c, &h0.ctx()).unwrap();
        let h = h0.with(c);
        let (mut r, file) = job(&h);

        NomadJobProvider.create(&mut r, &h.ctx()).unwrap();
        assert_eq!(h.mock.job_ids(), vec!["web".to_owned()]);
        assert!(!NomadJobProvider.changed(&r, &h.ctx()).unwrap());

        fs::write(&file, "job \"web\" { group \"g\" {} }\n").unwrap();
        assert!(NomadJobProvider.changed(&r, &h.ctx()).unwrap());
        NomadJobProvider.refresh(&mut r, &h.ctx()).unwrap();
        assert!(!NomadJobProvider.changed(&r, &h.ctx()).unwrap());

        NomadJobProvider.destroy(&mut r, &h.ctx(), false).unwrap();
        assert!(h.mock.job_ids().is_empty());
    }
}
