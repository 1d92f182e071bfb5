//! Type tag → (decoder, provider factory) table.
//!
//! Registration happens once through [`RegistryBuilder`]; the built
//! [`Registry`] is immutable and shared read-only by every worker of a run.
//! Registering a tag twice replaces the earlier entry.

use crate::provider::{
    BookProvider, CertificateCaProvider, CertificateLeafProvider, ChapterProvider,
    ContainerIngressProvider, ContainerProvider, CopyProvider, DocsProvider, ExecLocalProvider,
    ExecRemoteProvider, HelmProvider, ImageCacheProvider, IngressProvider, K8sClusterProvider,
    K8sConfigProvider, K8sIngressProvider, LocalIngressProvider, NetworkProvider,
    NomadClusterProvider, NomadIngressProvider, NomadJobProvider, NullProvider, Provider,
    RandomCreatureProvider, RandomIdProvider, RandomNumberProvider, RandomPasswordProvider,
    RandomUuidProvider, SidecarProvider, TaskProvider, TemplateProvider,
};
use jumppad_schema::{DecodeFn, KindDecoder, BUILTIN_KINDS};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// Builds a fresh provider for one call.
pub type ProviderFactory = Arc<dyn Fn() -> Box<dyn Provider> + Send + Sync>;

#[derive(Clone)]
struct Entry {
    decode: DecodeFn,
    factory: ProviderFactory,
}

fn factory<P: Provider + Default + 'static>() -> ProviderFactory {
    Arc::new(|| -> Box<dyn Provider> { Box::new(P::default()) })
}

fn builtin_factory(tag: &'static str) -> Option<ProviderFactory> {
    let f: ProviderFactory = match tag {
        "network" => factory::<NetworkProvider>(),
        "container" => factory::<ContainerProvider>(),
        "sidecar" => factory::<SidecarProvider>(),
        "image_cache" => factory::<ImageCacheProvider>(),
        "k8s_cluster" => factory::<K8sClusterProvider>(),
        "nomad_cluster" => factory::<NomadClusterProvider>(),
        "k8s_config" => factory::<K8sConfigProvider>(),
        "nomad_job" => factory::<NomadJobProvider>(),
        "helm" => factory::<HelmProvider>(),
        "ingress" => factory::<IngressProvider>(),
        "k8s_ingress" => factory::<K8sIngressProvider>(),
        "nomad_ingress" => factory::<NomadIngressProvider>(),
        "container_ingress" => factory::<ContainerIngressProvider>(),
        "local_ingress" => factory::<LocalIngressProvider>(),
        "certificate_ca" => factory::<CertificateCaProvider>(),
        "certificate_leaf" => factory::<CertificateLeafProvider>(),
        "template" => factory::<TemplateProvider>(),
        "copy" => factory::<CopyProvider>(),
        "exec_local" => factory::<ExecLocalProvider>(),
        "exec_remote" => factory::<ExecRemoteProvider>(),
        "docs" => factory::<DocsProvider>(),
        "book" => factory::<BookProvider>(),
        "chapter" => factory::<ChapterProvider>(),
        "task" => factory::<TaskProvider>(),
        "random_number" => factory::<RandomNumberProvider>(),
        "random_id" => factory::<RandomIdProvider>(),
        "random_password" => factory::<RandomPasswordProvider>(),
        "random_uuid" => factory::<RandomUuidProvider>(),
        "random_creature" => factory::<RandomCreatureProvider>(),
        "module" | "output" | "variable" => {
            Arc::new(move || -> Box<dyn Provider> { Box::new(NullProvider::new(tag)) })
        }
        _ => return None,
    };
    Some(f)
}

/// Collects registrations before the engine starts.
#[derive(Default)]
pub struct RegistryBuilder {
    entries: BTreeMap<String, Entry>,
}

impl RegistryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// A builder pre-loaded with every builtin kind.
    pub fn with_builtins() -> Self {
        let mut builder = Self::new();
        for kind in BUILTIN_KINDS {
            if let Some(f) = builtin_factory(kind.tag) {
                builder.entries.insert(
                    kind.tag.to_owned(),
                    Entry {
                        decode: kind.decode,
                        factory: f,
                    },
                );
            }
        }
        builder
    }

    /// Register `tag`. A previous registration of the same tag is replaced.
    pub fn register<F>(&mut self, tag: &str, decode: DecodeFn, factory: F) -> &mut Self
    where
        F: Fn() -> Box<dyn Provider> + Send + Sync + 'static,
    {
        let replaced = self
            .entries
            .insert(
                tag.to_owned(),
                Entry {
                    decode,
                    factory: Arc::new(factory),
                },
            )
            .is_some();
        if replaced {
            debug!(tag, "replacing registered provider");
        }
        self
    }

    pub fn build(self) -> Registry {
        Registry {
            entries: self.entries,
        }
    }
}

/// The immutable provider registry consumed by the engine.
#[derive(Clone)]
pub struct Registry {
    entries: BTreeMap<String, Entry>,
}

impl Registry {
    /// The registry with every builtin kind and nothing else.
    pub fn builtin() -> Self {
        RegistryBuilder::with_builtins().build()
    }

    /// A fresh provider for `tag`, or `None` when the tag is not registered.
    pub fn provider(&self, tag: &str) -> Option<Box<dyn Provider>> {
        self.entries.get(tag).map(|e| (e.factory)())
    }

    pub fn contains(&self, tag: &str) -> bool {
        self.entries.contains_key(tag)
    }

    /// Registered tags in sorted order.
    pub fn tags(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl KindDecoder for Registry {
    fn decoder(&self, tag: &str) -> Option<DecodeFn> {
        self.entries.get(tag).map(|e| e.decode)
    }
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry")
            .field("tags", &self.entries.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl fmt::Debug for RegistryBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegistryBuilder")
            .field("tags", &self.entries.keys().collect::<Vec<_>>())
            .finish()
    }
}
