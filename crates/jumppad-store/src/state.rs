use crate::{write_atomic, StoreError};
use jumppad_schema::{decode_opaque, KindDecoder, Resource, ResourceSet, Spec};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Header describing the blueprint the state was last applied from.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Blueprint {
    #[serde(skip_serializing_if = "String::is_empty")]
    pub title: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub author: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub slug: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub description: String,
    /// Path the blueprint was loaded from.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub source: String,
}

/// How to treat resource types the decoder does not know.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LoadMode {
    /// Unknown types fail the whole load.
    #[default]
    Strict,
    /// Unknown types are kept as opaque resources. Only destroy uses this.
    Lenient,
}

/// The persisted state: a blueprint header and the ordered resource list.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StateDocument {
    pub blueprint: Option<Blueprint>,
    pub resources: ResourceSet,
}

impl StateDocument {
    pub fn new(blueprint: Option<Blueprint>, resources: ResourceSet) -> Self {
        Self {
            blueprint,
            resources,
        }
    }

    /// Ids of resources kept opaque by a lenient load.
    pub fn opaque_ids(&self) -> Vec<String> {
        self.resources
            .iter()
            .filter(|r| matches!(r.spec(), Spec::Opaque(_)))
            .map(|r| r.id().to_string())
            .collect()
    }
}

/// First decode pass: the envelope list as raw JSON objects.
#[derive(Deserialize)]
struct RawDocument {
    #[serde(default)]
    blueprint: Option<Blueprint>,
    #[serde(default)]
    resources: Vec<Value>,
}

#[derive(Serialize)]
struct DocumentRef<'a> {
    blueprint: Option<&'a Blueprint>,
    resources: Vec<&'a Resource>,
}

/// Reads and writes the state file. Writes are serialized by a process-local
/// mutex; exclusion between processes is the caller's job.
#[derive(Debug)]
pub struct StateStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl StateStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    #[inline]
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// Load the state document, dispatching each resource on its `type` tag.
    ///
    /// Returns [`StoreError::NotFound`] when no state file exists and
    /// [`StoreError::Corrupt`] when it cannot be parsed. A corrupt file is
    /// never repaired.
    pub fn load(&self, decoder: &dyn KindDecoder, mode: LoadMode) -> Result<StateDocument, StoreError> {
        if !self.path.exists() {
            return Err(StoreError::NotFound(self.path.clone()));
        }
        let content = fs::read_to_string(&self.path)?;
        let raw: RawDocument = serde_json::from_str(&content).map_err(|e| self.corrupt(e))?;

        let mut resources = ResourceSet::new();
        for (index, value) in raw.resources.into_iter().enumerate() {
            let resource = self.decode_one(index, value, decoder, mode)?;
            resources.insert(resource).map_err(|e| self.corrupt(e))?;
        }

        tracing::debug!(
            path = %self.path.display(),
            resources = resources.len(),
            "loaded state"
        );
        Ok(StateDocument {
            blueprint: raw.blueprint,
            resources,
        })
    }

    /// Like [`load`](Self::load), but a missing file yields an empty document.
    pub fn load_or_default(&self, decoder: &dyn KindDecoder, mode: LoadMode) -> Result<StateDocument, StoreError> {
        match self.load(decoder, mode) {
            Err(StoreError::NotFound(_)) => Ok(StateDocument::default()),
            other => other,
        }
    }

    fn decode_one(
        &self,
        index: usize,
        value: Value,
        decoder: &dyn KindDecoder,
        mode: LoadMode,
    ) -> Result<Resource, StoreError> {
        let kind = value
            .get("type")
            .and_then(Value::as_str)
            .map(str::to_owned)
            .ok_or_else(|| StoreError::Corrupt {
                path: self.path.clone(),
                reason: format!("resource #{index} has no type"),
            })?;

        match (decoder.decoder(&kind), mode) {
            (Some(decode), _) => Resource::decode_as(value, &kind, decode).map_err(|e| self.corrupt(e)),
            (None, LoadMode::Strict) => Err(StoreError::UnknownKind { kind }),
            (None, LoadMode::Lenient) => {
                let resource =
                    Resource::decode_as(value, &kind, decode_opaque).map_err(|e| self.corrupt(e))?;
                tracing::warn!(
                    id = %resource.id(),
                    kind = %kind,
                    "resource type is no longer registered, keeping it opaque"
                );
                Ok(resource)
            }
        }
    }

    fn corrupt(&self, e: impl std::fmt::Display) -> StoreError {
        StoreError::Corrupt {
            path: self.path.clone(),
            reason: e.to_string(),
        }
    }

    /// Atomically replace the state file with `doc`.
    pub fn save(&self, doc: &StateDocument) -> Result<(), StoreError> {
        self.save_parts(doc.blueprint.as_ref(), &doc.resources)
    }

    /// Atomically replace the state file without assembling a document first.
    pub fn save_parts(&self, blueprint: Option<&Blueprint>, resources: &ResourceSet) -> Result<(), StoreError> {
        let content = serde_json::to_string_pretty(&DocumentRef {
            blueprint,
            resources: resources.iter().collect(),
        })?;

        let _guard = self
            .write_lock
            .lock()
            .map_err(|e| StoreError::LockFailed(format!("state mutex poisoned: {e}")))?;
        write_atomic(&self.path, content.as_bytes())?;
        tracing::trace!(path = %self.path.display(), "state saved");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jumppad_schema::kinds::{Container, Image, Network};
    use jumppad_schema::{BuiltinKinds, Status};
    use serde_json::json;

    fn sample() -> StateDocument {
        let mut net = Resource::new(
            "n1",
            Network {
                subnet: "10.5.0.0/16".to_owned(),
                ..Network::default()
            },
        );
        net.set_status(Status::Applied);
        let mut c = Resource::new(
            "c1",
            Container {
                image: Image::named("alpine:3"),
                container_id: "abc".to_owned(),
                ..Container::default()
            },
        );
        c.info_mut().depends_on.push("resource.network.n1".to_owned());
        StateDocument::new(
            Some(Blueprint {
                title: "demo".to_owned(),
                ..Blueprint::default()
            }),
            ResourceSet::from_resources(vec![net, c]).unwrap(),
        )
    }

    #[test]
    fn load_missing_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::new(dir.path().join("state.json"));
        assert!(matches!(
            store.load(&BuiltinKinds, LoadMode::Strict),
            Err(StoreError::NotFound(_))
        ));
        let doc = store.load_or_default(&BuiltinKinds, LoadMode::Strict).unwrap();
        assert!(doc.resources.is_empty());
        assert!(doc.blueprint.is_none());
    }

    #[test]
    fn save_then_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::new(dir.path().join("state").join("state.json"));
        let doc = sample();
        store.save(&doc).unwrap();
        let loaded = store.load(&BuiltinKinds, LoadMode::Strict).unwrap();
        assert_eq!(loaded, doc);
    }

    #[test]
    fn saved_document_is_flat_json() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::new(dir.path().join("state.json"));
        store.save(&sample()).unwrap();
        let v: Value = serde_json::from_str(&fs::read_to_string(store.path()).unwrap()).unwrap();
        assert_eq!(v["blueprint"]["title"], "demo");
        assert_eq!(v["resources"][0]["type"], "network");
        assert_eq!(v["resources"][0]["subnet"], "10.5.0.0/16");
        assert_eq!(v["resources"][0]["status"], "applied");
        assert_eq!(v["resources"][1]["id"], "resource.container.c1");
        assert_eq!(v["resources"][1]["container_id"], "abc");
    }

    #[test]
    fn strict_load_rejects_unknown_kind() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        fs::write(
            &path,
            json!({
                "blueprint": null,
                "resources": [
                    {"id": "resource.terraform.t", "name": "t", "type": "terraform"}
                ]
            })
            .to_string(),
        )
        .unwrap();
        let store = StateStore::new(&path);
        match store.load(&BuiltinKinds, LoadMode::Strict) {
            Err(StoreError::UnknownKind { kind }) => assert_eq!(kind, "terraform"),
            other => panic!("expected UnknownKind, got {other:?}"),
        }
    }

    #[test]
    fn lenient_load_keeps_unknown_kind_opaque_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        fs::write(
            &path,
            json!({
                "resources": [
                    {"id": "resource.network.n1", "name": "n1", "type": "network", "status": "applied"},
                    {"id": "resource.terraform.t", "name": "t", "type": "terraform", "status": "applied", "source": "./tf"}
                ]
            })
            .to_string(),
        )
        .unwrap();
        let store = StateStore::new(&path);
        let doc = store.load(&BuiltinKinds, LoadMode::Lenient).unwrap();
        assert_eq!(doc.resources.len(), 2);
        assert_eq!(doc.resources.ids()[1], "resource.terraform.t");
        assert_eq!(doc.opaque_ids(), vec!["resource.terraform.t".to_owned()]);
        assert_eq!(doc.resources.ids()[0], "resource.network.n1");
    }

    #[test]
    fn garbage_is_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        fs::write(&path, "{ not json").unwrap();
        let store = StateStore::new(&path);
        assert!(matches!(
            store.load(&BuiltinKinds, LoadMode::Strict),
            Err(StoreError::Corrupt { .. })
        ));
        // never repaired
        assert_eq!(fs::read_to_string(&path).unwrap(), "{ not json");
    }

    #[test]
    fn missing_type_is_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        fs::write(&path, r#"{"resources":[{"id":"resource.x.y","name":"y"}]}"#).unwrap();
        let store = StateStore::new(&path);
        assert!(matches!(
            store.load(&BuiltinKinds, LoadMode::Lenient),
            Err(StoreError::Corrupt { .. })
        ));
    }

    #[test]
    fn duplicate_ids_are_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        let r = json!({"id": "resource.network.n1", "name": "n1", "type": "network"});
        fs::write(&path, json!({ "resources": [r.clone(), r] }).to_string()).unwrap();
        let store = StateStore::new(&path);
        assert!(matches!(
            store.load(&BuiltinKinds, LoadMode::Strict),
            Err(StoreError::Corrupt { .. })
        ));
    }
}
