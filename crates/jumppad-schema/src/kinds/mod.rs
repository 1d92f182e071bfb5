//! Kind-specific payloads and the tagged [`Spec`] variant that holds them.
//!
//! Every kind implements [`Payload`], which declares its type tag, the fields a
//! provider computes, the other resources it references, and whether it
//! supports content drift detection. The `kinds!` table below generates the
//! `Spec` enum, the variant accessors, and the builtin decoder table from one list.

pub mod cert;
pub mod cluster;
pub mod container;
pub mod docs;
pub mod exec;
pub mod files;
pub mod ingress;
pub mod meta;
pub mod network;
pub mod random;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};
use std::path::PathBuf;

pub use cert::{CertificateCa, CertificateLeaf, CertFile};
pub use cluster::{
    HelmRepository, K8sCluster, K8sConfig, KubeConfig, KubernetesHealthCheck, Helm, NomadCluster,
    NomadHealthCheck, NomadJob,
};
pub use container::{
    Container, HealthCheck, HttpCheck, Image, ImageCache, NetworkAttachment, Port, Registry,
    RegistryAuth, ResourceLimits, ScriptCheck, Sidecar, TcpCheck, User, Volume,
};
pub use docs::{Book, BookIndex, Chapter, ChapterIndex, Condition, Docs, Page, PageIndex, Task};
pub use exec::{ExecLocal, ExecRemote};
pub use files::{FileCopy, Template};
pub use ingress::{
    ContainerIngress, Ingress, IngressPort, K8sIngress, LocalIngress, NomadIngress, TrafficTarget,
};
pub use meta::{Module, Output, Variable};
pub use network::Network;
pub use random::{RandomCreature, RandomId, RandomNumber, RandomPassword, RandomUuid};

/// Where the reconciler reads content for checksum-based drift detection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DriftSource {
    /// Inline content, hashed directly.
    Content(String),
    /// A local file or directory, hashed recursively.
    Path(PathBuf),
}

/// A kind-specific payload.
pub trait Payload:
    Serialize + DeserializeOwned + Default + Clone + std::fmt::Debug + Send + Sync + 'static
{
    /// The `type` tag stored in configuration and state.
    const KIND: &'static str;

    /// Top-level fields written by the provider and carried over between runs.
    const COMPUTED: &'static [&'static str] = &[];

    /// Raw references to other resources; normalized against the module by the caller.
    fn references(&self) -> Vec<String> {
        Vec::new()
    }

    fn drift_source(&self) -> Option<DriftSource> {
        None
    }
}

/// Typed access to the payload held inside a [`Spec`].
pub trait SpecVariant: Payload {
    fn from_spec(spec: &Spec) -> Option<&Self>;
    fn from_spec_mut(spec: &mut Spec) -> Option<&mut Self>;
}

/// Decodes a JSON object into the matching [`Spec`] variant.
pub type DecodeFn = fn(Value) -> Result<Spec, serde_json::Error>;

/// One row of a tag → decoder table.
#[derive(Debug, Clone, Copy)]
pub struct KindEntry {
    pub tag: &'static str,
    pub decode: DecodeFn,
}

/// Resolves a type tag to its decoder. Implemented by [`BuiltinKinds`] and by
/// the engine's provider registry.
pub trait KindDecoder: Send + Sync {
    fn decoder(&self, tag: &str) -> Option<DecodeFn>;
}

fn decode_as<P>(value: Value) -> Result<Spec, serde_json::Error>
where
    P: Payload + Into<Spec>,
{
    serde_json::from_value::<P>(value).map(Into::into)
}

/// Decoder for kinds with no typed payload; keeps every field as opaque JSON.
pub fn decode_opaque(value: Value) -> Result<Spec, serde_json::Error> {
    match value {
        Value::Object(map) => Ok(Spec::Opaque(map)),
        other => Err(serde::de::Error::custom(format!(
            "expected an object, found {other}"
        ))),
    }
}

macro_rules! kinds {
    ($($variant:ident($ty:ty)),* $(,)?) => {
        /// The kind-specific half of a resource.
        #[derive(Debug, Clone, PartialEq, Serialize)]
        #[serde(untagged)]
        pub enum Spec {
            $($variant($ty),)*
            /// A kind registered without a typed payload, or one kept opaque by a lenient load.
            Opaque(Map<String, Value>),
        }

        impl Spec {
            /// The builtin type tag, or `None` for opaque payloads.
            pub fn kind(&self) -> Option<&'static str> {
                match self {
                    $(Spec::$variant(_) => Some(<$ty as Payload>::KIND),)*
                    Spec::Opaque(_) => None,
                }
            }

            pub fn computed_fields(&self) -> &'static [&'static str] {
                match self {
                    $(Spec::$variant(_) => <$ty as Payload>::COMPUTED,)*
                    Spec::Opaque(_) => &[],
                }
            }

            pub fn references(&self) -> Vec<String> {
                match self {
                    $(Spec::$variant(p) => p.references(),)*
                    Spec::Opaque(_) => Vec::new(),
                }
            }

            pub fn drift_source(&self) -> Option<DriftSource> {
                match self {
                    $(Spec::$variant(p) => p.drift_source(),)*
                    Spec::Opaque(_) => None,
                }
            }
        }

        $(
            impl From<$ty> for Spec {
                fn from(p: $ty) -> Self {
                    Spec::$variant(p)
                }
            }

            impl SpecVariant for $ty {
                fn from_spec(spec: &Spec) -> Option<&Self> {
                    match spec {
                        Spec::$variant(p) => Some(p),
                        _ => None,
                    }
                }

                fn from_spec_mut(spec: &mut Spec) -> Option<&mut Self> {
                    match spec {
                        Spec::$variant(p) => Some(p),
                        _ => None,
                    }
                }
            }
        )*

        /// Decoders for every builtin kind.
        pub const BUILTIN_KINDS: &[KindEntry] = &[
            $(KindEntry { tag: <$ty as Payload>::KIND, decode: decode_as::<$ty> },)*
        ];
    };
}

kinds! {
    Network(Network),
    Container(Container),
    Sidecar(Sidecar),
    ImageCache(ImageCache),
    K8sCluster(K8sCluster),
    NomadCluster(NomadCluster),
    K8sConfig(K8sConfig),
    NomadJob(NomadJob),
    Helm(Helm),
    Ingress(Ingress),
    K8sIngress(K8sIngress),
    NomadIngress(NomadIngress),
    ContainerIngress(ContainerIngress),
    LocalIngress(LocalIngress),
    CertificateCa(CertificateCa),
    CertificateLeaf(CertificateLeaf),
    Template(Template),
    Copy(FileCopy),
    ExecLocal(ExecLocal),
    ExecRemote(ExecRemote),
    Docs(Docs),
    Book(Book),
    Chapter(Chapter),
    Task(Task),
    Module(Module),
    Output(Output),
    Variable(Variable),
    RandomNumber(RandomNumber),
    RandomId(RandomId),
    RandomPassword(RandomPassword),
    RandomUuid(RandomUuid),
    RandomCreature(RandomCreature),
}

impl Spec {
    /// Serialize to a JSON object map.
    pub fn to_map(&self) -> Result<Map<String, Value>, serde_json::Error> {
        match serde_json::to_value(self)? {
            Value::Object(map) => Ok(map),
            _ => Ok(Map::new()),
        }
    }

    /// The payload with every computed field removed; two specs with equal
    /// config maps describe the same desired resource.
    pub fn config_map(&self) -> Result<Map<String, Value>, serde_json::Error> {
        let mut map = self.to_map()?;
        for field in self.computed_fields() {
            map.remove(*field);
        }
        Ok(map)
    }
}

/// The decoder table for the kinds this crate defines.
#[derive(Debug, Clone, Copy, Default)]
pub struct BuiltinKinds;

impl KindDecoder for BuiltinKinds {
    fn decoder(&self, tag: &str) -> Option<DecodeFn> {
        BUILTIN_KINDS
            .iter()
            .find(|entry| entry.tag == tag)
            .map(|entry| entry.decode)
    }
}

pub(crate) fn is_remote_source(source: &str) -> bool {
    source.contains("://") || source.starts_with("git::") || source.starts_with("github.com/")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn builtin_table_has_every_kind_once() {
        assert_eq!(BUILTIN_KINDS.len(), 32);
        let mut tags: Vec<_> = BUILTIN_KINDS.iter().map(|e| e.tag).collect();
        tags.sort_unstable();
        tags.dedup();
        assert_eq!(tags.len(), 32);
    }

    #[test]
    fn decode_dispatches_on_tag() {
        let decode = BuiltinKinds.decoder("network").unwrap();
        let spec = decode(json!({"subnet": "10.5.0.0/16"})).unwrap();
        assert_eq!(spec.kind(), Some("network"));
        let net = Network::from_spec(&spec).unwrap();
        assert_eq!(net.subnet, "10.5.0.0/16");
    }

    #[test]
    fn unknown_tag_has_no_decoder() {
        assert!(BuiltinKinds.decoder("terraform").is_none());
    }

    #[test]
    fn absent_fields_are_zero_values() {
        let decode = BuiltinKinds.decoder("container").unwrap();
        let spec = decode(json!({"image": {"name": "alpine:3"}})).unwrap();
        let c = Container::from_spec(&spec).unwrap();
        assert!(c.networks.is_empty());
        assert!(!c.privileged);
        assert!(c.container_id.is_empty());
    }

    #[test]
    fn config_map_drops_computed_fields() {
        let spec = Spec::from(RandomNumber {
            minimum: 1,
            maximum: 10,
            value: Some(4),
        });
        let map = spec.config_map().unwrap();
        assert!(map.contains_key("minimum"));
        assert!(!map.contains_key("value"));
    }

    #[test]
    fn opaque_decoder_keeps_fields() {
        let spec = decode_opaque(json!({"anything": 1})).unwrap();
        assert_eq!(spec.kind(), None);
        assert_eq!(spec.to_map().unwrap()["anything"], 1);
        assert!(decode_opaque(json!([1, 2])).is_err());
    }
}
