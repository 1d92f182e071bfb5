//! The provider contract and one implementation per resource kind.
//!
//! Providers are stateless: every call receives the resource it operates on
//! and a [`ProviderContext`] carrying the shared clients, the Jumppad home
//! layout, a read-only snapshot of the other resources in the run, and the
//! run's cancellation token.

pub mod cert;
pub mod cluster;
pub mod container;
pub mod docs;
pub mod exec;
pub mod files;
pub mod healthcheck;
pub mod image_cache;
pub mod ingress;
pub mod k8s;
pub mod meta;
pub mod network;
pub mod nomad;
pub mod random;

use crate::concurrency::CancellationToken;
use crate::error::ProviderError;
use jumppad_runtime::{Clients, NetworkAttachment as RuntimeAttachment};
use jumppad_schema::{Resource, ResourceSet, SpecVariant};
use jumppad_store::JumppadLayout;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, warn};

pub use cert::{CertificateCaProvider, CertificateLeafProvider};
pub use cluster::K8sClusterProvider;
pub use container::{ContainerProvider, SidecarProvider};
pub use docs::{BookProvider, ChapterProvider, DocsProvider, TaskProvider};
pub use exec::{ExecLocalProvider, ExecRemoteProvider};
pub use files::{CopyProvider, TemplateProvider};
pub use image_cache::ImageCacheProvider;
pub use ingress::{
    ContainerIngressProvider, IngressProvider, K8sIngressProvider, LocalIngressProvider,
    NomadIngressProvider,
};
pub use k8s::{HelmProvider, K8sConfigProvider};
pub use meta::NullProvider;
pub use network::NetworkProvider;
pub use nomad::{NomadClusterProvider, NomadJobProvider};
pub use random::{
    RandomCreatureProvider, RandomIdProvider, RandomNumberProvider, RandomPasswordProvider,
    RandomUuidProvider,
};

/// Uniform lifecycle contract implemented for every resource kind.
pub trait Provider: Send + Sync {
    /// The `type` tag this provider handles.
    fn kind(&self) -> &'static str;

    /// Realise the resource and record its computed fields. An existing
    /// entity that matches the resource is adopted.
    fn create(&self, resource: &mut Resource, ctx: &ProviderContext<'_>) -> Result<(), ProviderError>;

    /// Remove the resource. Entities that are already gone are not an error.
    fn destroy(
        &self,
        resource: &mut Resource,
        ctx: &ProviderContext<'_>,
        force: bool,
    ) -> Result<(), ProviderError>;

    /// Implementation ids (container ids, file paths, ...) currently backing
    /// the resource.
    fn lookup(&self, resource: &Resource, ctx: &ProviderContext<'_>) -> Result<Vec<String>, ProviderError>;

    /// Bring computed fields up to date without recreating the resource.
    fn refresh(&self, _resource: &mut Resource, _ctx: &ProviderContext<'_>) -> Result<(), ProviderError> {
        Ok(())
    }

    /// True when [`refresh`](Self::refresh) would change observable state.
    fn changed(&self, _resource: &Resource, _ctx: &ProviderContext<'_>) -> Result<bool, ProviderError> {
        Ok(false)
    }
}

/// Everything a provider call may use besides its own resource.
#[derive(Debug)]
pub struct ProviderContext<'a> {
    pub clients: &'a Clients,
    pub layout: &'a JumppadLayout,
    /// The other resources of the run as of dispatch. Disabled resources
    /// are not visible.
    pub resources: &'a ResourceSet,
    pub cancel: &'a CancellationToken,
    /// Re-pull images even when cached.
    pub force_pull: bool,
    /// Bound for waits that declare no timeout of their own.
    pub default_timeout: Duration,
}

impl ProviderContext<'_> {
    /// Resolve a reference made by `from` to another resource of the run.
    pub fn find(&self, reference: &str, from: &Resource) -> Result<&Resource, ProviderError> {
        self.resources.resolve(reference, from).map_err(|_| {
            ProviderError::precondition(format!(
                "{} references {reference}, which is not available",
                from.id()
            ))
        })
    }

    /// Resolve a reference and view its payload as `P`.
    pub fn find_payload<P: SpecVariant>(&self, reference: &str, from: &Resource) -> Result<&P, ProviderError> {
        let target = self.find(reference, from)?;
        target.payload::<P>().ok_or_else(|| {
            ProviderError::invalid(format!(
                "{} references {}, which is a {} not a {}",
                from.id(),
                target.id(),
                target.kind(),
                P::KIND
            ))
        })
    }

    /// Fail with `Cancelled` once the run has been cancelled.
    pub fn check_cancelled(&self) -> Result<(), ProviderError> {
        if self.cancel.is_cancelled() {
            Err(ProviderError::cancelled())
        } else {
            Ok(())
        }
    }
}

/// Typed view of the resource's payload, or an internal error when the
/// registry bound the wrong provider.
pub(crate) fn payload<P: SpecVariant>(resource: &Resource) -> Result<P, ProviderError> {
    resource.payload::<P>().cloned().ok_or_else(|| wrong_kind::<P>(resource))
}

pub(crate) fn payload_mut<P: SpecVariant>(resource: &mut Resource) -> Result<&mut P, ProviderError> {
    if resource.payload::<P>().is_none() {
        return Err(wrong_kind::<P>(resource));
    }
    resource.payload_mut::<P>().ok_or_else(|| ProviderError::internal("payload vanished"))
}

fn wrong_kind<P: SpecVariant>(resource: &Resource) -> ProviderError {
    ProviderError::internal(format!(
        "{} has type {}, expected {}",
        resource.id(),
        resource.kind(),
        P::KIND
    ))
}

/// Swallow `NotFound` during destroy; with `force`, swallow everything.
pub(crate) fn tolerate(result: Result<(), ProviderError>, what: &str, force: bool) -> Result<(), ProviderError> {
    match result {
        Ok(()) => Ok(()),
        Err(e) if e.is_not_found() => {
            debug!("{what} already gone");
            Ok(())
        }
        Err(e) if force => {
            warn!("ignoring failure to {what}: {e}");
            Ok(())
        }
        Err(e) => Err(e),
    }
}

/// A side effect to undo when a later step of the same operation fails.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RollbackStep {
    RemoveContainer(String),
    RemoveVolume(String),
    Detach { network: String, container: String },
    RemoveFile(PathBuf),
    RemoveDir(PathBuf),
}

/// Compensating actions registered while a provider builds something up.
#[derive(Debug, Default)]
pub struct Compensators {
    steps: Vec<RollbackStep>,
}

impl Compensators {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, step: RollbackStep) {
        self.steps.push(step);
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Undo every registered step, newest first. Failures are logged.
    pub fn rollback(self, clients: &Clients) {
        for step in self.steps.into_iter().rev() {
            let result = match &step {
                RollbackStep::RemoveContainer(id) => clients.containers.remove_container(id, true),
                RollbackStep::RemoveVolume(name) => clients.containers.remove_volume(name),
                RollbackStep::Detach { network, container } => {
                    clients.networks.detach(network, container)
                }
                RollbackStep::RemoveFile(path) => std::fs::remove_file(path).map_err(Into::into),
                RollbackStep::RemoveDir(path) => std::fs::remove_dir_all(path).map_err(Into::into),
            };
            match result {
                Ok(()) => debug!("rollback: {step:?}"),
                Err(e) => warn!("rollback step {step:?} failed: {e}"),
            }
        }
    }
}

/// Run `f` with a fresh set of compensators; on error roll them back before
/// returning the error.
pub(crate) fn scoped<T>(
    clients: &Clients,
    f: impl FnOnce(&mut Compensators) -> Result<T, ProviderError>,
) -> Result<T, ProviderError> {
    let mut undo = Compensators::new();
    match f(&mut undo) {
        Ok(v) => Ok(v),
        Err(e) => {
            if !undo.is_empty() {
                warn!("rolling back {} step(s) after error: {e}", undo.len());
            }
            undo.rollback(clients);
            Err(e)
        }
    }
}

/// Attach `container` to a network resolved from `reference`, using the
/// network resource's name as the runtime network name.
pub(crate) fn attach_network(
    ctx: &ProviderContext<'_>,
    from: &Resource,
    reference: &str,
    container: &str,
    ip_address: &str,
    aliases: &[String],
    undo: &mut Compensators,
) -> Result<String, ProviderError> {
    let network = ctx.find(reference, from)?;
    if network.kind() != "network" {
        return Err(ProviderError::invalid(format!(
            "{} attaches to {}, which is not a network",
            from.id(),
            network.id()
        )));
    }
    let name = network.info().name.clone();
    let attachment = RuntimeAttachment {
        ip_address: (!ip_address.is_empty()).then(|| ip_address.to_owned()),
        aliases: aliases.to_vec(),
    };
    ctx.clients.networks.attach(&name, container, &attachment)?;
    undo.push(RollbackStep::Detach {
        network: name.clone(),
        container: container.to_owned(),
    });
    Ok(name)
}

/// Remove every container with this exact name.
pub(crate) fn remove_containers_named(ctx: &ProviderContext<'_>, name: &str, force: bool) -> Result<(), ProviderError> {
    for id in ctx.clients.containers.find_containers(name)? {
        debug!(container = %id, "removing container {name}");
        tolerate(
            ctx.clients.containers.remove_container(&id, true).map_err(Into::into),
            &format!("remove container {name}"),
            force,
        )?;
    }
    Ok(())
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use jumppad_runtime::MockClients;
    use std::sync::Arc;

    /// Owns everything a [`ProviderContext`] borrows.
    pub struct Harness {
        pub mock: Arc<MockClients>,
        pub clients: Clients,
        pub layout: JumppadLayout,
        pub resources: ResourceSet,
        pub cancel: CancellationToken,
        pub dir: tempfile::TempDir,
    }

    impl Harness {
        pub fn new() -> Self {
            let dir = tempfile::tempdir().unwrap();
            let mock = MockClients::new();
            Self {
                clients: mock.clients(),
                mock,
                layout: JumppadLayout::new(dir.path().join("home")),
                resources: ResourceSet::new(),
                cancel: CancellationToken::new(),
                dir,
            }
        }

        pub fn with(mut self, resource: Resource) -> Self {
            self.resources.upsert(resource);
            self
        }

        pub fn ctx(&self) -> ProviderContext<'_> {
            ProviderContext {
                clients: &self.clients,
                layout: &self.layout,
                resources: &self.resources,
                cancel: &self.cancel,
                force_pull: false,
                default_timeout: Duration::from_secs(5),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::Harness;
    use super::*;
    use jumppad_runtime::ContainerConfig;
    use jumppad_schema::kinds::{Container, Network};

    #[test]
    fn rollback_runs_newest_first() {
        let h = Harness::new();
        let result: Result<(), ProviderError> = scoped(&h.clients, |undo| {
            let id = h
                .clients
                .containers
                .create_container(&ContainerConfig {
                    name: "web".to_owned(),
                    image: "alpine:3".to_owned(),
                    ..ContainerConfig::default()
                })
                .map_err(ProviderError::from)?;
            undo.push(RollbackStep::RemoveContainer(id));
            Err(ProviderError::internal("later step failed"))
        });
        assert!(result.is_err());
        assert_eq!(h.mock.container_count(), 0);
        assert_eq!(h.mock.count("remove_container"), 1);
    }

    #[test]
    fn rollback_failures_do_not_stop_other_steps() {
        let h = Harness::new();
        let file = h.dir.path().join("out.txt");
        std::fs::write(&file, "x").unwrap();
        let mut undo = Compensators::new();
        undo.push(RollbackStep::RemoveFile(file.clone()));
        undo.push(RollbackStep::RemoveContainer("missing".to_owned()));
        undo.rollback(&h.clients);
        assert!(!file.exists());
    }

    #[test]
    fn find_payload_checks_kind() {
        let net = Resource::new("n1", Network::default());
        let c = Resource::new("c1", Container::default());
        let h = Harness::new().with(net);
        let ctx = h.ctx();
        assert!(ctx.find_payload::<Network>("network.n1", &c).is_ok());
        let err = ctx.find_payload::<Container>("network.n1", &c).unwrap_err();
        assert_eq!(err.kind, crate::ProviderErrorKind::InvalidArgument);
        let err = ctx.find("network.nope", &c).unwrap_err();
        assert_eq!(err.kind, crate::ProviderErrorKind::PreconditionFailed);
    }

    #[test]
    fn tolerate_swallows_not_found() {
        let gone = Err(ProviderError::new(crate::ProviderErrorKind::NotFound, "x"));
        assert!(tolerate(gone, "remove x", false).is_ok());
        let other = Err(ProviderError::internal("boom"));
        assert!(tolerate(other.clone(), "remove x", false).is_err());
        assert!(tolerate(other, "remove x", true).is_ok());
    }

    #[test]
    fn cancelled_context() {
        let h = Harness::new();
        assert!(h.ctx().check_cancelled().is_ok());
        h.cancel.cancel();
        assert_eq!(
            h.ctx().check_cancelled().unwrap_err().kind,
            crate::ProviderErrorKind::Cancelled
        );
    }
}
