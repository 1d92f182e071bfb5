use super::healthcheck::wait_for_container;
use super::{
    attach_network, payload, payload_mut, remove_containers_named, scoped, Provider,
    ProviderContext, RollbackStep,
};
use crate::error::ProviderError;
use jumppad_runtime::{ContainerConfig, ContainerInfo, ImageRef, MountKind, PortMapping, VolumeMount};
use jumppad_schema::kinds::{
    Container, HealthCheck, Image, NetworkAttachment, Port, ResourceLimits, Sidecar, User, Volume,
};
use jumppad_schema::Resource;
use std::collections::BTreeMap;
use std::path::Path;
use tracing::{debug, info};

/// Label carrying the digest of everything a container was launched with.
pub(crate) const CONFIG_LABEL: &str = "jumppad.config";

#[derive(Debug, Default)]
pub struct ContainerProvider;

#[derive(Debug, Default)]
pub struct SidecarProvider;

/// What to start: the runtime config plus the steps around it.
pub(crate) struct Launch<'a> {
    pub config: ContainerConfig,
    pub image: ImageRef,
    pub networks: &'a [NetworkAttachment],
    pub health_check: Option<&'a HealthCheck>,
    /// Containers currently carrying the name, as the provider's lookup
    /// reports them.
    pub existing: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct Launched {
    pub id: String,
    pub image_id: String,
    pub addresses: BTreeMap<String, String>,
}

pub(crate) fn image_ref(image: &Image) -> ImageRef {
    ImageRef {
        name: image.name.clone(),
        username: (!image.username.is_empty()).then(|| image.username.clone()),
        password: (!image.password.is_empty()).then(|| image.password.clone()),
    }
}

pub(crate) fn mounts(volumes: &[Volume]) -> Result<Vec<VolumeMount>, ProviderError> {
    volumes
        .iter()
        .map(|v| {
            let kind = match v.volume_type.as_str() {
                "" | "bind" => MountKind::Bind,
                "volume" => MountKind::Volume,
                "tmpfs" => MountKind::Tmpfs,
                other => {
                    return Err(ProviderError::invalid(format!(
                        "unknown volume type '{other}' for {}",
                        v.destination
                    )))
                }
            };
            if kind == MountKind::Bind && !Path::new(&v.source).is_absolute() {
                return Err(ProviderError::invalid(format!(
                    "bind mount source '{}' must be an absolute path",
                    v.source
                )));
            }
            Ok(VolumeMount {
                source: v.source.clone(),
                destination: v.destination.clone(),
                kind,
                read_only: v.read_only,
            })
        })
        .collect()
}

pub(crate) fn port_mappings(ports: &[Port]) -> Vec<PortMapping> {
    ports
        .iter()
        .map(|p| PortMapping {
            local: p.local,
            host: p.host,
            protocol: p.protocol.clone(),
        })
        .collect()
}

pub(crate) fn run_as(user: Option<&User>) -> Option<String> {
    user.map(|u| {
        if u.group.is_empty() {
            u.user.clone()
        } else {
            format!("{}:{}", u.user, u.group)
        }
    })
}

fn limits(config: &mut ContainerConfig, resources: Option<&ResourceLimits>) {
    if let Some(r) = resources {
        config.cpu = (r.cpu > 0).then_some(r.cpu);
        config.memory_mb = (r.memory > 0).then_some(r.memory);
    }
}

pub(crate) fn labels(resource: &Resource, extra: &BTreeMap<String, String>) -> BTreeMap<String, String> {
    let mut labels = extra.clone();
    labels.insert("created_by".to_owned(), "jumppad".to_owned());
    labels.insert("id".to_owned(), resource.id().to_string());
    labels
}

/// Digest of the container config, its network attachments and the image it
/// runs.
fn config_checksum(
    config: &ContainerConfig,
    networks: &[NetworkAttachment],
    image_id: &str,
) -> Result<String, ProviderError> {
    let raw = serde_json::to_vec(&(config, networks, image_id))?;
    Ok(blake3::hash(&raw).to_hex().to_string())
}

/// Runtime config for the container payload `c`, named `name` and labelled
/// as belonging to `owner`.
pub(crate) fn container_config(
    owner: &Resource,
    c: &Container,
    name: String,
) -> Result<ContainerConfig, ProviderError> {
    let mut config = ContainerConfig {
        name,
        image: c.image.name.clone(),
        entrypoint: c.entrypoint.clone(),
        command: c.command.clone(),
        environment: c.environment.clone(),
        labels: labels(owner, &c.labels),
        volumes: mounts(&c.volumes)?,
        ports: port_mappings(&c.ports),
        dns: c.dns.clone(),
        privileged: c.privileged,
        max_restart_count: c.max_restart_count,
        run_as: run_as(c.run_as.as_ref()),
        ..ContainerConfig::default()
    };
    limits(&mut config, c.resources.as_ref());
    Ok(config)
}

/// The single running container in `existing` launched with `checksum`.
fn adoptable(
    ctx: &ProviderContext<'_>,
    existing: &[String],
    checksum: &str,
) -> Result<Option<ContainerInfo>, ProviderError> {
    let [id] = existing else {
        return Ok(None);
    };
    let info = ctx.clients.containers.inspect_container(id)?;
    let same = info.labels.get(CONFIG_LABEL).map(String::as_str) == Some(checksum);
    Ok((info.running && same).then_some(info))
}

/// Pull, create, attach, start and health check one container. Every step
/// after creation is undone when a later step fails.
///
/// A running container with the same name that was launched with the same
/// configuration and image is adopted instead. Any other container holding
/// the name is removed first.
pub(crate) fn launch(
    ctx: &ProviderContext<'_>,
    from: &Resource,
    spec: Launch<'_>,
) -> Result<Launched, ProviderError> {
    ctx.check_cancelled()?;
    let image_id = ctx.clients.containers.pull_image(&spec.image, ctx.force_pull)?;
    let mut config = spec.config;
    let checksum = config_checksum(&config, spec.networks, &image_id)?;
    config.labels.insert(CONFIG_LABEL.to_owned(), checksum.clone());
    let name = config.name.clone();

    if let Some(info) = adoptable(ctx, &spec.existing, &checksum)? {
        debug!(container = %info.id, "adopting running container {name}");
        if let Some(check) = spec.health_check {
            wait_for_container(ctx, &info.id, check)?;
        }
        return Ok(Launched {
            id: info.id,
            image_id,
            addresses: info.addresses,
        });
    }
    if !spec.existing.is_empty() {
        debug!("replacing container {name}, its configuration changed");
        remove_containers_named(ctx, &name, false)?;
    }

    scoped(ctx.clients, |undo| {
        let id = ctx.clients.containers.create_container(&config)?;
        undo.push(RollbackStep::RemoveContainer(id.clone()));
        debug!(container = %id, "created container {name}");

        for net in spec.networks {
            ctx.check_cancelled()?;
            attach_network(ctx, from, &net.id, &id, &net.ip_address, &net.aliases, undo)?;
        }

        ctx.clients.containers.start_container(&id)?;
        if let Some(check) = spec.health_check {
            wait_for_container(ctx, &id, check)?;
        }

        let info = ctx.clients.containers.inspect_container(&id)?;
        Ok(Launched {
            id,
            image_id: image_id.clone(),
            addresses: info.addresses,
        })
    })
}

impl Provider for ContainerProvider {
    fn kind(&self) -> &'static str {
        "container"
    }

    fn create(&self, resource: &mut Resource, ctx: &ProviderContext<'_>) -> Result<(), ProviderError> {
        let c: Container = payload(resource)?;
        let name = resource.fqdn();
        info!(id = %resource.id(), image = %c.image.name, "creating container {name}");

        let config = container_config(resource, &c, name.clone())?;
        let launched = launch(
            ctx,
            resource,
            Launch {
                config,
                image: image_ref(&c.image),
                networks: &c.networks,
                health_check: c.health_check.as_ref(),
                existing: self.lookup(resource, ctx)?,
            },
        )?;

        let out = payload_mut::<Container>(resource)?;
        out.container_name = name;
        out.container_id = launched.id;
        out.image_id = launched.image_id;
        out.assigned_addresses = launched.addresses;
        Ok(())
    }

    fn destroy(&self, resource: &mut Resource, ctx: &ProviderContext<'_>, force: bool) -> Result<(), ProviderError> {
        let name = resource.fqdn();
        info!(id = %resource.id(), "destroying container {name}");
        remove_containers_named(ctx, &name, force)
    }

    fn lookup(&self, resource: &Resource, ctx: &ProviderContext<'_>) -> Result<Vec<String>, ProviderError> {
        Ok(ctx.clients.containers.find_containers(&resource.fqdn())?)
    }

    /// True when the local copy of the image is no longer the one the
    /// container was created from.
    fn changed(&self, resource: &Resource, ctx: &ProviderContext<'_>) -> Result<bool, ProviderError> {
        let c: Container = payload(resource)?;
        if c.image_id.is_empty() {
            return Ok(false);
        }
        let current = ctx.clients.containers.image_id(&c.image.name)?;
        Ok(current.is_some_and(|id| id != c.image_id))
    }

    fn refresh(&self, resource: &mut Resource, ctx: &ProviderContext<'_>) -> Result<(), ProviderError> {
        info!(id = %resource.id(), "image changed, recreating container");
        self.create(resource, ctx)
    }
}

impl Provider for SidecarProvider {
    fn kind(&self) -> &'static str {
        "sidecar"
    }

    fn create(&self, resource: &mut Resource, ctx: &ProviderContext<'_>) -> Result<(), ProviderError> {
        let s: Sidecar = payload(resource)?;
        let name = resource.fqdn();
        info!(id = %resource.id(), target = %s.target, "creating sidecar {name}");

        let target = ctx.find_payload::<Container>(&s.target, resource)?;
        if target.container_id.is_empty() {
            return Err(ProviderError::precondition(format!(
                "sidecar target {} has no running container",
                s.target
            )));
        }

        let mut config = ContainerConfig {
            name: name.clone(),
            image: s.image.name.clone(),
            entrypoint: s.entrypoint.clone(),
            command: s.command.clone(),
            environment: s.environment.clone(),
            labels: labels(resource, &s.labels),
            volumes: mounts(&s.volumes)?,
            privileged: s.privileged,
            max_restart_count: s.max_restart_count,
            network_mode: Some(format!("container:{}", target.container_id)),
            ..ContainerConfig::default()
        };
        limits(&mut config, s.resources.as_ref());

        let launched = launch(
            ctx,
            resource,
            Launch {
                config,
                image: image_ref(&s.image),
                networks: &[],
                health_check: s.health_check.as_ref(),
                existing: self.lookup(resource, ctx)?,
            },
        )?;

        let out = payload_mut::<Sidecar>(resource)?;
        out.container_name = name;
        out.container_id = launched.id;
        Ok(())
    }

    fn destroy(&self, resource: &mut Resource, ctx: &ProviderContext<'_>, force: bool) -> Result<(), ProviderError> {
        let name = resource.fqdn();
        info!(id = %resource.id(), "destroying sidecar {name}");
        remove_containers_named(ctx, &name, force)
    }

    fn lookup(&self, resource: &Resource, ctx: &ProviderContext<'_>) -> Result<Vec<String>, ProviderError> {
        Ok(ctx.clients.containers.find_containers(&resource.fqdn())?)
    }
}
