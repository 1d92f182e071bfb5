use crate::kinds::{BuiltinKinds, DecodeFn, KindDecoder, Payload, Spec, SpecVariant};
use crate::status::Status;
use crate::types::{normalize_reference, ResourceId};
use crate::validate::fqdn;
use crate::SchemaError;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};

fn is_false(b: &bool) -> bool {
    !*b
}

/// The metadata envelope shared by every kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Meta {
    pub id: ResourceId,
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub module: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub depends_on: Vec<String>,
    #[serde(default, skip_serializing_if = "is_false")]
    pub disabled: bool,
    #[serde(default)]
    pub status: Status,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checksum: Option<String>,
}

impl Meta {
    pub fn new(kind: &str, module: Option<&str>, name: &str) -> Self {
        Self {
            id: ResourceId::for_resource(kind, module, name),
            name: name.to_owned(),
            kind: kind.to_owned(),
            module: module.map(str::to_owned),
            depends_on: Vec::new(),
            disabled: false,
            status: Status::PendingCreation,
            checksum: None,
        }
    }
}

/// One declared resource: the shared envelope plus its kind payload.
///
/// Serializes as a single flat JSON object, envelope fields first.
#[derive(Debug, Clone, PartialEq)]
pub struct Resource {
    meta: Meta,
    spec: Spec,
}

impl Resource {
    /// Create a resource of a builtin kind.
    pub fn new<P: Payload + Into<Spec>>(name: &str, payload: P) -> Self {
        Self::with_module(None, name, payload)
    }

    pub fn with_module<P: Payload + Into<Spec>>(module: Option<&str>, name: &str, payload: P) -> Self {
        Self {
            meta: Meta::new(P::KIND, module, name),
            spec: payload.into(),
        }
    }

    /// Assemble a resource from an envelope and an already decoded payload.
    pub fn from_parts(meta: Meta, spec: Spec) -> Self {
        Self { meta, spec }
    }

    /// Decode one resource object: read the `type` tag, then hand the object to
    /// the decoder registered for it.
    pub fn decode(value: Value, decoder: &dyn KindDecoder) -> Result<Self, SchemaError> {
        let kind = value
            .get("type")
            .and_then(Value::as_str)
            .ok_or(SchemaError::MissingType)?
            .to_owned();
        let decode = decoder
            .decoder(&kind)
            .ok_or_else(|| SchemaError::UnknownType(kind.clone()))?;
        Self::decode_as(value, &kind, decode)
    }

    /// Decode with an explicit decoder, bypassing the tag lookup.
    pub fn decode_as(value: Value, kind: &str, decode: DecodeFn) -> Result<Self, SchemaError> {
        let meta: Meta = serde_json::from_value(value.clone()).map_err(|e| SchemaError::Decode {
            kind: kind.to_owned(),
            source: e,
        })?;
        let spec = decode(value).map_err(|e| SchemaError::Decode {
            kind: kind.to_owned(),
            source: e,
        })?;
        Ok(Self { meta, spec })
    }

    /// The metadata envelope.
    #[inline]
    pub fn info(&self) -> &Meta {
        &self.meta
    }

    /// Mutable access to the envelope, for status and checksum updates.
    #[inline]
    pub fn info_mut(&mut self) -> &mut Meta {
        &mut self.meta
    }

    #[inline]
    pub fn id(&self) -> &ResourceId {
        &self.meta.id
    }

    #[inline]
    pub fn kind(&self) -> &str {
        &self.meta.kind
    }

    #[inline]
    pub fn status(&self) -> Status {
        self.meta.status
    }

    pub fn set_status(&mut self, status: Status) {
        self.meta.status = status;
    }

    #[inline]
    pub fn spec(&self) -> &Spec {
        &self.spec
    }

    #[inline]
    pub fn spec_mut(&mut self) -> &mut Spec {
        &mut self.spec
    }

    /// Typed view of the payload; `None` when the kind does not match.
    pub fn payload<P: SpecVariant>(&self) -> Option<&P> {
        P::from_spec(&self.spec)
    }

    pub fn payload_mut<P: SpecVariant>(&mut self) -> Option<&mut P> {
        P::from_spec_mut(&mut self.spec)
    }

    /// Container hostname for kinds that run a container.
    pub fn fqdn(&self) -> String {
        fqdn(&self.meta.name, self.meta.module.as_deref(), &self.meta.kind)
    }

    /// Build a helper resource owned by this one: same module, its own type tag.
    pub fn add_child<P: Payload + Into<Spec>>(&self, name: &str, payload: P) -> Resource {
        let mut child = Resource::with_module(self.meta.module.as_deref(), name, payload);
        child.meta.depends_on = self.meta.depends_on.clone();
        child
    }

    /// Every resource this one must wait for: explicit `depends_on` plus the
    /// references its payload makes, normalized and deduplicated in first-seen order.
    pub fn dependencies(&self) -> Vec<ResourceId> {
        let module = self.meta.module.as_deref();
        let mut deps: Vec<ResourceId> = Vec::new();
        let raw = self
            .meta
            .depends_on
            .iter()
            .cloned()
            .chain(self.spec.references());
        for r in raw {
            if r.is_empty() {
                continue;
            }
            let id = normalize_reference(&r, module);
            if !deps.contains(&id) {
                deps.push(id);
            }
        }
        deps
    }

    /// Deduplicate `depends_on` in place, keeping first occurrences.
    pub fn dedup_dependencies(&mut self) {
        let mut seen = Vec::with_capacity(self.meta.depends_on.len());
        self.meta.depends_on.retain(|d| {
            if seen.contains(d) {
                false
            } else {
                seen.push(d.clone());
                true
            }
        });
    }

    /// Blake3 digest of the desired configuration: envelope inputs plus the
    /// payload without computed fields.
    pub fn config_digest(&self) -> Result<String, SchemaError> {
        let mut map = self.spec.config_map()?;
        let mut deps = self.meta.depends_on.clone();
        deps.sort();
        deps.dedup();
        map.insert("depends_on".to_owned(), serde_json::to_value(deps)?);
        map.insert("disabled".to_owned(), Value::Bool(self.meta.disabled));
        let bytes = serde_json::to_vec(&Value::Object(map))?;
        Ok(blake3::hash(&bytes).to_hex().to_string())
    }

    /// True when both resources describe the same desired configuration.
    pub fn config_equal(&self, other: &Resource) -> Result<bool, SchemaError> {
        Ok(self.meta.kind == other.meta.kind && self.config_digest()? == other.config_digest()?)
    }

    /// Copy computed fields from `prior` into this resource's payload.
    pub fn carry_computed(&mut self, prior: &Resource, decoder: &dyn KindDecoder) -> Result<(), SchemaError> {
        let fields = self.spec.computed_fields();
        if fields.is_empty() || self.meta.kind != prior.meta.kind {
            return Ok(());
        }
        let mut map = self.spec.to_map()?;
        let prior_map = prior.spec.to_map()?;
        for field in fields {
            if let Some(v) = prior_map.get(*field) {
                map.insert((*field).to_owned(), v.clone());
            }
        }
        let decode = decoder
            .decoder(&self.meta.kind)
            .ok_or_else(|| SchemaError::UnknownType(self.meta.kind.clone()))?;
        self.spec = decode(Value::Object(map)).map_err(|e| SchemaError::Decode {
            kind: self.meta.kind.clone(),
            source: e,
        })?;
        Ok(())
    }

    fn to_object(&self) -> Result<Map<String, Value>, serde_json::Error> {
        let mut map = match serde_json::to_value(&self.meta)? {
            Value::Object(m) => m,
            _ => Map::new(),
        };
        for (k, v) in self.spec.to_map()? {
            map.entry(k).or_insert(v);
        }
        Ok(map)
    }
}

impl Serialize for Resource {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_object()
            .map_err(serde::ser::Error::custom)?
            .serialize(serializer)
    }
}

/// Deserializes through the builtin kind table; unknown kinds are an error.
impl<'de> Deserialize<'de> for Resource {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        Resource::decode(value, &BuiltinKinds).map_err(serde::de::Error::custom)
    }
}

/// An ordered set of resources with unique ids.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResourceSet {
    resources: Vec<Resource>,
}

impl ResourceSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a set, rejecting duplicate ids.
    pub fn from_resources(resources: Vec<Resource>) -> Result<Self, SchemaError> {
        let mut set = Self::new();
        for r in resources {
            set.insert(r)?;
        }
        Ok(set)
    }

    pub fn insert(&mut self, resource: Resource) -> Result<(), SchemaError> {
        if self.contains(resource.id()) {
            return Err(SchemaError::DuplicateId(resource.id().to_string()));
        }
        self.resources.push(resource);
        Ok(())
    }

    /// Insert or replace in place, keeping the original position.
    pub fn upsert(&mut self, resource: Resource) {
        match self.position(resource.id()) {
            Some(i) => self.resources[i] = resource,
            None => self.resources.push(resource),
        }
    }

    pub fn remove(&mut self, id: &str) -> Option<Resource> {
        self.position(id).map(|i| self.resources.remove(i))
    }

    pub fn contains(&self, id: &str) -> bool {
        self.position(id).is_some()
    }

    fn position(&self, id: &str) -> Option<usize> {
        self.resources.iter().position(|r| r.id() == id)
    }

    pub fn get(&self, id: &str) -> Option<&Resource> {
        self.resources.iter().find(|r| r.id() == id)
    }

    pub fn get_mut(&mut self, id: &str) -> Option<&mut Resource> {
        self.resources.iter_mut().find(|r| r.id() == id)
    }

    /// Look up another resource in this set, e.g. a dependency referenced by id.
    pub fn find_dependent(&self, id: &str) -> Result<&Resource, SchemaError> {
        self.get(id)
            .ok_or_else(|| SchemaError::NotFound(id.to_owned()))
    }

    /// Resolve a reference written inside `from` (short or fully qualified).
    pub fn resolve(&self, reference: &str, from: &Resource) -> Result<&Resource, SchemaError> {
        let id = normalize_reference(reference, from.info().module.as_deref());
        self.find_dependent(&id)
    }

    /// Every resource whose module is `module` or nested below it.
    pub fn in_module<'a>(&'a self, module: &'a str) -> impl Iterator<Item = &'a Resource> + 'a {
        self.resources.iter().filter(move |r| match r.info().module.as_deref() {
            Some(m) => m == module || m.starts_with(&format!("{module}.")),
            None => false,
        })
    }

    pub fn of_kind<'a>(&'a self, kind: &'a str) -> impl Iterator<Item = &'a Resource> + 'a {
        self.resources.iter().filter(move |r| r.kind() == kind)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Resource> {
        self.resources.iter()
    }

    pub fn iter_mut(&mut self) -> std::slice::IterMut<'_, Resource> {
        self.resources.iter_mut()
    }

    pub fn ids(&self) -> Vec<ResourceId> {
        self.resources.iter().map(|r| r.id().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.resources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }

    pub fn into_vec(self) -> Vec<Resource> {
        self.resources
    }
}

impl<'a> IntoIterator for &'a ResourceSet {
    type Item = &'a Resource;
    type IntoIter = std::slice::Iter<'a, Resource>;

    fn into_iter(self) -> Self::IntoIter {
        self.resources.iter()
    }
}

impl IntoIterator for ResourceSet {
    type Item = Resource;
    type IntoIter = std::vec::IntoIter<Resource>;

    fn into_iter(self) -> Self::IntoIter {
        self.resources.into_iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kinds::{Container, Image, NetworkAttachment, Network, RandomNumber};
    use serde_json::json;

    fn network(name: &str) -> Resource {
        Resource::new(
            name,
            Network {
                subnet: "10.5.0.0/16".to_owned(),
                ..Network::default()
            },
        )
    }

    fn container_on(name: &str, net: &str) -> Resource {
        Resource::new(
            name,
            Container {
                image: Image::named("alpine:3"),
                networks: vec![NetworkAttachment {
                    id: net.to_owned(),
                    ..NetworkAttachment::default()
                }],
                ..Container::default()
            },
        )
    }

    #[test]
    fn new_resource_has_canonical_id_and_pending_status() {
        let r = network("n1");
        assert_eq!(r.id(), "resource.network.n1");
        assert_eq!(r.kind(), "network");
        assert_eq!(r.status(), Status::PendingCreation);
    }

    #[test]
    fn info_mut_updates_in_place() {
        let mut r = network("n1");
        r.info_mut().status = Status::Applied;
        r.info_mut().checksum = Some("abc".to_owned());
        assert_eq!(r.info().status, Status::Applied);
        assert_eq!(r.info().checksum.as_deref(), Some("abc"));
    }

    #[test]
    fn serializes_flat_with_type_tag() {
        let r = network("n1");
        let v = serde_json::to_value(&r).unwrap();
        assert_eq!(v["id"], "resource.network.n1");
        assert_eq!(v["type"], "network");
        assert_eq!(v["status"], "pending_creation");
        assert_eq!(v["subnet"], "10.5.0.0/16");
    }

    #[test]
    fn decode_roundtrip_preserves_payload() {
        let r = container_on("c1", "network.n1");
        let v = serde_json::to_value(&r).unwrap();
        let back = Resource::decode(v, &BuiltinKinds).unwrap();
        assert_eq!(back, r);
    }

    #[test]
    fn decode_unknown_type_fails() {
        let err = Resource::decode(
            json!({"id": "resource.vm.x", "name": "x", "type": "vm"}),
            &BuiltinKinds,
        )
        .unwrap_err();
        assert!(matches!(err, SchemaError::UnknownType(ref t) if t == "vm"));
    }

    #[test]
    fn decode_missing_type_fails() {
        let err = Resource::decode(json!({"id": "x", "name": "x"}), &BuiltinKinds).unwrap_err();
        assert!(matches!(err, SchemaError::MissingType));
    }

    #[test]
    fn dependencies_merge_references_and_dedup() {
        let mut r = container_on("c1", "network.n1");
        r.info_mut().depends_on = vec![
            "resource.network.n1".to_owned(),
            "resource.template.t".to_owned(),
            "resource.template.t".to_owned(),
        ];
        let deps = r.dependencies();
        assert_eq!(deps, vec![
            ResourceId::new("resource.network.n1"),
            ResourceId::new("resource.template.t"),
        ]);
    }

    #[test]
    fn dedup_dependencies_keeps_order() {
        let mut r = network("n1");
        r.info_mut().depends_on = vec!["b".to_owned(), "a".to_owned(), "b".to_owned()];
        r.dedup_dependencies();
        assert_eq!(r.info().depends_on, vec!["b", "a"]);
    }

    #[test]
    fn add_child_inherits_module_and_sets_own_type() {
        let parent = Resource::with_module(Some("m"), "k", crate::kinds::K8sCluster::default());
        let child = parent.add_child("server", Container::default());
        assert_eq!(child.kind(), "container");
        assert_eq!(child.info().module.as_deref(), Some("m"));
        assert_eq!(child.id(), "resource.container.m.server");
    }

    #[test]
    fn config_digest_ignores_computed_fields_and_status() {
        let a = Resource::new("r", RandomNumber { minimum: 1, maximum: 9, value: None });
        let mut b = a.clone();
        b.payload_mut::<RandomNumber>().unwrap().value = Some(3);
        b.set_status(Status::Applied);
        assert!(a.config_equal(&b).unwrap());

        b.payload_mut::<RandomNumber>().unwrap().maximum = 10;
        assert!(!a.config_equal(&b).unwrap());
    }

    #[test]
    fn carry_computed_copies_outputs() {
        let mut prior = Resource::new("r", RandomNumber { minimum: 1, maximum: 9, value: None });
        prior.payload_mut::<RandomNumber>().unwrap().value = Some(7);
        let mut desired = Resource::new("r", RandomNumber { minimum: 1, maximum: 9, value: None });
        desired.carry_computed(&prior, &BuiltinKinds).unwrap();
        assert_eq!(desired.payload::<RandomNumber>().unwrap().value, Some(7));
    }

    #[test]
    fn set_rejects_duplicate_ids() {
        let err = ResourceSet::from_resources(vec![network("n1"), network("n1")]).unwrap_err();
        assert!(matches!(err, SchemaError::DuplicateId(_)));
    }

    #[test]
    fn find_dependent_and_resolve() {
        let set = ResourceSet::from_resources(vec![network("n1"), container_on("c1", "network.n1")])
            .unwrap();
        assert!(set.find_dependent("resource.network.n1").is_ok());
        assert!(matches!(
            set.find_dependent("resource.network.nope"),
            Err(SchemaError::NotFound(_))
        ));
        let c = set.get("resource.container.c1").unwrap();
        assert_eq!(set.resolve("network.n1", c).unwrap().id(), "resource.network.n1");
    }

    #[test]
    fn module_membership_includes_nested_modules() {
        let set = ResourceSet::from_resources(vec![
            Resource::with_module(Some("a"), "x", Network::default()),
            Resource::with_module(Some("a.b"), "y", Network::default()),
            Resource::with_module(Some("ab"), "z", Network::default()),
            network("top"),
        ])
        .unwrap();
        let names: Vec<_> = set.in_module("a").map(|r| r.info().name.clone()).collect();
        assert_eq!(names, vec!["x", "y"]);
    }

    #[test]
    fn upsert_keeps_position() {
        let mut set = ResourceSet::from_resources(vec![network("a"), network("b")]).unwrap();
        let mut b = network("b");
        b.set_status(Status::Applied);
        set.upsert(b);
        assert_eq!(set.ids(), vec![
            ResourceId::new("resource.network.a"),
            ResourceId::new("resource.network.b"),
        ]);
        assert_eq!(set.get("resource.network.b").unwrap().status(), Status::Applied);
    }
}
