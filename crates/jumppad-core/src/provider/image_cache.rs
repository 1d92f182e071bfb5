use super::container::labels;
use super::{payload, payload_mut, remove_containers_named, scoped, Provider, ProviderContext, RollbackStep};
use crate::error::ProviderError;
use jumppad_runtime::{ContainerConfig, ImageRef, MountKind, NetworkAttachment, VolumeMount};
use jumppad_schema::kinds::ImageCache;
use jumppad_schema::Resource;
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

pub const CACHE_IMAGE: &str = "ghcr.io/rpardini/docker-registry-proxy:0.6.4";
pub const IMAGES_VOLUME: &str = "images.volume.jumppad.dev";
const DEFAULT_REGISTRIES: &str =
    "k8s.gcr.io gcr.io asia.gcr.io eu.gcr.io us.gcr.io quay.io ghcr.io docker.pkg.github.com";

/// The registry proxy shared by every cluster. It depends on every network so
/// that it can be attached to all of them.
#[derive(Debug, Default)]
pub struct ImageCacheProvider;

fn environment(cache: &ImageCache) -> BTreeMap<String, String> {
    let mut registries = vec![DEFAULT_REGISTRIES.to_owned()];
    let mut auth = Vec::new();
    for reg in &cache.registries {
        registries.push(reg.hostname.clone());
        if let Some(a) = &reg.auth {
            auth.push(format!("{}:::{}:::{}", reg.hostname, a.username, a.password));
        }
    }
    BTreeMap::from([
        ("REGISTRIES".to_owned(), registries.join(" ")),
        ("AUTH_REGISTRY_DELIMITER".to_owned(), ":::".to_owned()),
        ("AUTH_REGISTRIES".to_owned(), auth.join(" ")),
        ("ALLOW_PUSH".to_owned(), "true".to_owned()),
        ("ENABLE_MANIFEST_CACHE".to_owned(), "true".to_owned()),
        ("VERIFY_SSL".to_owned(), "false".to_owned()),
    ])
}

/// Names of the networks the cache should be attached to: every network it
/// depends on that is part of the run.
fn desired_networks(resource: &Resource, ctx: &ProviderContext<'_>) -> Vec<String> {
    resource
        .info()
        .depends_on
        .iter()
        .filter_map(|dep| match ctx.find(dep, resource) {
            Ok(net) if net.kind() == "network" => Some(net.info().name.clone()),
            Ok(_) => None,
            Err(e) => {
                warn!("image cache skips network {dep}: {e}");
                None
            }
        })
        .collect()
}

impl ImageCacheProvider {
    /// Detach from networks no longer declared, then attach to new ones.
    fn reconcile_networks(&self, resource: &mut Resource, ctx: &ProviderContext<'_>) -> Result<(), ProviderError> {
        let cache: ImageCache = payload(resource)?;
        if cache.container_id.is_empty() {
            return Ok(());
        }
        let desired = desired_networks(resource, ctx);
        let current: Vec<String> = ctx
            .clients
            .containers
            .inspect_container(&cache.container_id)?
            .addresses
            .into_keys()
            .collect();

        for net in current.iter().filter(|n| !desired.contains(n)) {
            debug!("detaching image cache from {net}");
            if let Err(e) = ctx.clients.networks.detach(net, &cache.container_id) {
                warn!("unable to detach image cache from {net}: {e}");
            }
        }
        for net in desired.iter().filter(|n| !current.contains(n)) {
            debug!("attaching image cache to {net}");
            ctx.clients
                .networks
                .attach(net, &cache.container_id, &NetworkAttachment::default())?;
        }
        payload_mut::<ImageCache>(resource)?.attached_networks = desired;
        Ok(())
    }
}

impl Provider for ImageCacheProvider {
    fn kind(&self) -> &'static str {
        "image_cache"
    }

    fn create(&self, resource: &mut Resource, ctx: &ProviderContext<'_>) -> Result<(), ProviderError> {
        let cache: ImageCache = payload(resource)?;
        let name = resource.fqdn();
        info!(id = %resource.id(), "creating image cache {name}");

        if let Some(id) = ctx.clients.containers.find_containers(&name)?.into_iter().next() {
            debug!("adopting running image cache {id}");
            payload_mut::<ImageCache>(resource)?.container_id = id;
            return self.reconcile_networks(resource, ctx);
        }

        ctx.clients
            .containers
            .pull_image(&ImageRef::new(CACHE_IMAGE), ctx.force_pull)?;
        ctx.clients.containers.create_volume(IMAGES_VOLUME)?;

        let networks = desired_networks(resource, ctx);
        let config = ContainerConfig {
            name: name.clone(),
            image: CACHE_IMAGE.to_owned(),
            environment: environment(&cache),
            labels: labels(resource, &BTreeMap::new()),
            volumes: vec![VolumeMount {
                source: IMAGES_VOLUME.to_owned(),
                destination: "/docker_mirror_cache".to_owned(),
                kind: MountKind::Volume,
                read_only: false,
            }],
            ..ContainerConfig::default()
        };

        let id = scoped(ctx.clients, |undo| {
            let id = ctx.clients.containers.create_container(&config)?;
            undo.push(RollbackStep::RemoveContainer(id.clone()));
            for net in &networks {
                ctx.clients.networks.attach(net, &id, &NetworkAttachment::default())?;
                undo.push(RollbackStep::Detach {
                    network: net.clone(),
                    container: id.clone(),
                });
            }
            ctx.clients.containers.start_container(&id)?;
            Ok(id)
        })?;

        let out = payload_mut::<ImageCache>(resource)?;
        out.container_id = id;
        out.attached_networks = networks;
        Ok(())
    }

    fn destroy(&self, resource: &mut Resource, ctx: &ProviderContext<'_>, force: bool) -> Result<(), ProviderError> {
        let name = resource.fqdn();
        info!(id = %resource.id(), "destroying image cache {name}");
        remove_containers_named(ctx, &name, force)?;
        let out = payload_mut::<ImageCache>(resource)?;
        out.container_id.clear();
        out.attached_networks.clear();
        Ok(())
    }

    fn lookup(&self, resource: &Resource, ctx: &ProviderContext<'_>) -> Result<Vec<String>, ProviderError> {
        Ok(ctx.clients.containers.find_containers(&resource.fqdn())?)
    }

    fn refresh(&self, resource: &mut Resource, ctx: &ProviderContext<'_>) -> Result<(), ProviderError> {
        debug!(id = %resource.id(), "refreshing image cache networks");
        self.reconcile_networks(resource, ctx)
    }

    fn changed(&self, resource: &Resource, ctx: &ProviderContext<'_>) -> Result<bool, ProviderError> {
        let cache: ImageCache = payload(resource)?;
        let mut desired = desired_networks(resource, ctx);
        let mut attached = cache.attached_networks;
        desired.sort();
        attached.sort();
        Ok(desired != attached)
    }
}
