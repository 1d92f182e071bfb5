use crate::blueprint::load_blueprint;
use crate::concurrency::{CancellationToken, StoreLock};
use crate::config::{ApplyOptions, DestroyOptions, EngineConfig};
use crate::events::{emit, Event, EventSink};
use crate::graph::Graph;
use crate::reconcile::reconcile;
use crate::registry::Registry;
use crate::scheduler::{Direction, Report, Scheduler, WalkOptions};
use crate::CoreError;
use jumppad_runtime::Clients;
use jumppad_schema::{ResourceId, ResourceSet, Status};
use jumppad_store::{
    mark_for_destroy, Blueprint, JumppadLayout, LoadMode, MergeOptions, StateStore, StoreError,
};
use serde::Serialize;
use std::collections::HashSet;
use std::path::Path;
use tracing::{debug, info, warn};

/// Central entry point for applying, destroying, refreshing and inspecting
/// a blueprint.
///
/// Coordinates the blueprint loader, the state store, the reconciler and the
/// scheduler. Every mutating operation holds the store lock for its whole
/// duration.
pub struct Engine {
    config: EngineConfig,
    layout: JumppadLayout,
    store: StateStore,
    registry: Registry,
    clients: Clients,
    cancel: CancellationToken,
    events: Option<EventSink>,
}

/// One row of `status`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResourceStatus {
    pub id: ResourceId,
    #[serde(rename = "type")]
    pub kind: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub module: Option<String>,
    pub status: Status,
    pub disabled: bool,
}

/// What an apply of a blueprint would do, computed without provider calls.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DiffReport {
    pub new: Vec<ResourceId>,
    pub changed: Vec<ResourceId>,
    pub removed: Vec<ResourceId>,
    pub unchanged: Vec<ResourceId>,
}

impl DiffReport {
    pub fn has_changes(&self) -> bool {
        !(self.new.is_empty() && self.changed.is_empty() && self.removed.is_empty())
    }
}

impl Engine {
    pub fn new(config: EngineConfig, registry: Registry, clients: Clients) -> Self {
        let layout = config.layout();
        let store = StateStore::new(config.state_path());
        Self {
            config,
            layout,
            store,
            registry,
            clients,
            cancel: CancellationToken::new(),
            events: None,
        }
    }

    /// Receive lifecycle events while operations run.
    #[must_use]
    pub fn with_events(mut self, sink: EventSink) -> Self {
        self.events = Some(sink);
        self
    }

    /// Use `token` instead of the engine's own cancellation token, e.g. the
    /// one tripped by the interrupt handler.
    #[must_use]
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// The token that stops dispatching when cancelled.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    #[inline]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    #[inline]
    pub fn layout(&self) -> &JumppadLayout {
        &self.layout
    }

    #[inline]
    pub fn state_store(&self) -> &StateStore {
        &self.store
    }

    #[inline]
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    fn scheduler<'a>(&'a self, blueprint: Option<&'a Blueprint>) -> Scheduler<'a> {
        Scheduler::new(&self.registry, &self.clients, &self.layout, &self.cancel)
            .with_events(self.events.as_ref())
            .persist_to(&self.store, blueprint)
    }

    fn walk_options(&self, direction: Direction, parallelism: Option<usize>) -> WalkOptions {
        WalkOptions {
            parallelism: parallelism
                .filter(|n| *n > 0)
                .unwrap_or_else(|| self.config.parallelism()),
            default_timeout: self.config.default_timeout(),
            ..WalkOptions::new(direction)
        }
    }

    /// Fails instead of waiting when another command holds the lock.
    fn lock(&self) -> Result<StoreLock, CoreError> {
        self.layout.initialize()?;
        let path = self.layout.lock_file();
        StoreLock::try_acquire(&path)?.ok_or_else(|| {
            StoreError::LockFailed(format!(
                "{} is held by another jumppad command",
                path.display()
            ))
            .into()
        })
    }

    /// Create or update every resource of the blueprint at `path`.
    ///
    /// Orphans (resources in state that the blueprint no longer declares) are
    /// destroyed first unless orphan destruction is turned off. Provider
    /// failures are reported in the returned [`Report`]; configuration and
    /// state problems are errors raised before any provider is called.
    pub fn apply(&self, path: &Path, options: &ApplyOptions) -> Result<Report, CoreError> {
        info!("applying blueprint from {}", path.display());
        let _lock = self.lock()?;

        let loaded = load_blueprint(path, options, &self.registry)?;
        let prior = self.store.load_or_default(&self.registry, LoadMode::Strict)?;
        let destroy_orphans = options.destroy_orphans.unwrap_or(self.config.destroy_orphans);
        let outcome = reconcile(
            loaded.resources,
            &prior.resources,
            &self.registry,
            MergeOptions { destroy_orphans },
        )?;
        let graph = Graph::build(&outcome.working)?;
        emit(
            self.events.as_ref(),
            &Event::Parsed {
                resources: outcome.working.len(),
            },
        );

        let blueprint = loaded.blueprint;
        let desired: HashSet<ResourceId> = outcome
            .working
            .iter()
            .map(|r| r.id().clone())
            .filter(|id| outcome.is_desired(id))
            .collect();
        let orphans: HashSet<ResourceId> = outcome.orphans.iter().cloned().collect();
        if !outcome.retained.is_empty() {
            info!(count = outcome.retained.len(), "keeping resources no longer declared");
        }

        let mut working = outcome.working;
        self.store.save_parts(blueprint.as_ref(), &working)?;
        let scheduler = self.scheduler(blueprint.as_ref());
        let mut report = Report::default();

        if !orphans.is_empty() {
            info!(count = orphans.len(), "destroying resources no longer declared");
            let teardown = WalkOptions {
                only: Some(orphans),
                ..self.walk_options(Direction::Destroy, options.parallelism)
            };
            report.absorb(scheduler.walk(&graph, &mut working, &teardown)?);
        }

        if report.cancelled {
            warn!("apply cancelled before creating resources");
            return Ok(report);
        }

        let walk = WalkOptions {
            force: options.force,
            only: Some(desired),
            ..self.walk_options(Direction::Apply, options.parallelism)
        };
        report.absorb(scheduler.walk(&graph, &mut working, &walk)?);
        info!("apply finished: {report}");
        Ok(report)
    }

    /// Destroy every resource in state, dependents first.
    ///
    /// State is loaded leniently: resources of types no longer registered are
    /// marked destroyed without a provider call and dropped from the saved
    /// state. When the recorded dependencies no longer resolve, resources are
    /// destroyed in reverse creation order.
    pub fn destroy(&self, options: &DestroyOptions) -> Result<Report, CoreError> {
        info!("destroying resources");
        let _lock = self.lock()?;

        let doc = match self.store.load(&self.registry, LoadMode::Lenient) {
            Err(StoreError::NotFound(_)) => {
                info!("no state, nothing to destroy");
                return Ok(Report::default());
            }
            other => other?,
        };
        let opaque = doc.opaque_ids();
        for id in &opaque {
            warn!(id = %id, "type is not registered, removing from state without calling a provider");
        }

        let blueprint = doc.blueprint;
        let mut working = doc.resources;
        mark_for_destroy(&mut working);
        let graph = match Graph::build(&working) {
            Ok(graph) => graph,
            Err(e) => {
                warn!("unable to rebuild the dependency graph ({e}), destroying in reverse creation order");
                Graph::chain(&working)?
            }
        };
        emit(
            self.events.as_ref(),
            &Event::Parsed {
                resources: working.len(),
            },
        );

        let walk = WalkOptions {
            force: options.force,
            strict: options.strict,
            ..self.walk_options(Direction::Destroy, options.parallelism)
        };
        let report = self.scheduler(blueprint.as_ref()).walk(&graph, &mut working, &walk)?;

        if !opaque.is_empty() {
            for id in &opaque {
                working.remove(id);
            }
            self.store.save_parts(blueprint.as_ref(), &working)?;
        }
        info!("destroy finished: {report}");
        Ok(report)
    }

    /// Bring applied resources whose external state drifted back in line.
    pub fn refresh(&self) -> Result<Report, CoreError> {
        info!("refreshing resources");
        let _lock = self.lock()?;

        let doc = match self.store.load(&self.registry, LoadMode::Strict) {
            Err(StoreError::NotFound(_)) => {
                info!("no state, nothing to refresh");
                return Ok(Report::default());
            }
            other => other?,
        };
        let blueprint = doc.blueprint;
        let mut working = doc.resources;
        let graph = Graph::build(&working)?;
        let walk = self.walk_options(Direction::Refresh, None);
        let report = self.scheduler(blueprint.as_ref()).walk(&graph, &mut working, &walk)?;
        info!("refresh finished: {report}");
        Ok(report)
    }

    /// Every resource in state with its status, in state order.
    pub fn status(&self) -> Result<Vec<ResourceStatus>, CoreError> {
        let doc = self.store.load_or_default(&self.registry, LoadMode::Strict)?;
        Ok(doc
            .resources
            .iter()
            .map(|r| ResourceStatus {
                id: r.id().clone(),
                kind: r.kind().to_owned(),
                name: r.info().name.clone(),
                module: r.info().module.clone(),
                status: r.status(),
                disabled: r.info().disabled,
            })
            .collect())
    }

    /// Compare the blueprint at `path` with state. No provider is called and
    /// nothing is written.
    pub fn diff(&self, path: &Path, options: &ApplyOptions) -> Result<DiffReport, CoreError> {
        let loaded = load_blueprint(path, options, &self.registry)?;
        let prior = self.store.load_or_default(&self.registry, LoadMode::Strict)?;
        let outcome = reconcile(
            loaded.resources,
            &prior.resources,
            &self.registry,
            MergeOptions {
                destroy_orphans: true,
            },
        )?;
        Graph::build(&outcome.working)?;
        Ok(classify(&outcome.working, &prior.resources, &outcome.orphans))
    }
}

fn classify(working: &ResourceSet, prior: &ResourceSet, orphans: &[ResourceId]) -> DiffReport {
    let mut diff = DiffReport::default();
    for r in working {
        let id = r.id().clone();
        if orphans.contains(&id) {
            diff.removed.push(id);
            continue;
        }
        let before = prior.get(&id).map(|p| p.status());
        match (before, r.status()) {
            (None | Some(Status::Destroyed), Status::Disabled) => diff.unchanged.push(id),
            (None | Some(Status::Destroyed), _) => diff.new.push(id),
            (Some(Status::Applied), Status::Applied) | (Some(Status::Disabled), Status::Disabled) => {
                diff.unchanged.push(id);
            }
            _ => diff.changed.push(id),
        }
    }
    debug!(
        new = diff.new.len(),
        changed = diff.changed.len(),
        removed = diff.removed.len(),
        "computed diff"
    );
    diff
}

#[cfg(test)]
mod tests {
    use super::*;
    use jumppad_runtime::MockClients;
    use serde_json::json;
    use std::sync::Arc;

    fn test_engine() -> (tempfile::TempDir, Engine, Arc<MockClients>, tempfile::TempDir) {
        let home = tempfile::tempdir().unwrap();
        let project = tempfile::tempdir().unwrap();
        let mock = MockClients::new();
        let engine = Engine::new(
            EngineConfig::with_home(home.path()),
            Registry::builtin(),
            mock.clients(),
        );
        (home, engine, mock, project)
    }

    fn write_blueprint(dir: &Path, resources: serde_json::Value) {
        std::fs::write(
            dir.join("main.json"),
            serde_json::to_string(&json!({ "resources": resources })).unwrap(),
        )
        .unwrap();
    }

    fn statuses(engine: &Engine) -> Vec<(String, Status)> {
        engine
            .status()
            .unwrap()
            .into_iter()
            .map(|s| (s.id.to_string(), s.status))
            .collect()
    }

    #[test]
    fn concurrent_command_is_refused() {
        let (_home, engine, mock, project) = test_engine();
        write_blueprint(project.path(), json!([{"type": "random_uuid", "name": "u"}]));
        engine.layout().initialize().unwrap();
        let _held = StoreLock::acquire(&engine.layout().lock_file()).unwrap();

        let err = engine.apply(project.path(), &ApplyOptions::default()).unwrap_err();
        assert!(err.is_state_error(), "{err}");
        assert!(mock.calls().is_empty());
        assert!(engine.destroy(&DestroyOptions::default()).unwrap_err().is_state_error());
    }

    #[test]
    fn status_without_state_is_empty() {
        let (_home, engine, _mock, _project) = test_engine();
        assert!(engine.status().unwrap().is_empty());
    }

    #[test]
    fn apply_records_state_and_status() {
        let (_home, engine, _mock, project) = test_engine();
        write_blueprint(
            project.path(),
            json!([{"type": "random_uuid", "name": "u"}]),
        );
        let report = engine.apply(project.path(), &ApplyOptions::default()).unwrap();
        assert!(report.is_success());
        assert!(engine.state_store().exists());
        assert!(statuses(&engine).contains(&("resource.random_uuid.u".to_owned(), Status::Applied)));
    }

    #[test]
    fn diff_classifies_without_touching_providers() {
        let (_home, engine, mock, project) = test_engine();
        write_blueprint(
            project.path(),
            json!([
                {"type": "random_uuid", "name": "keep"},
                {"type": "random_number", "name": "n", "minimum": 1, "maximum": 10},
                {"type": "random_id", "name": "gone", "byte_length": 4}
            ]),
        );
        engine.apply(project.path(), &ApplyOptions::default()).unwrap();
        let calls = mock.calls().len();

        write_blueprint(
            project.path(),
            json!([
                {"type": "random_uuid", "name": "keep"},
                {"type": "random_number", "name": "n", "minimum": 1, "maximum": 20},
                {"type": "random_uuid", "name": "fresh"}
            ]),
        );
        let diff = engine.diff(project.path(), &ApplyOptions::default()).unwrap();
        assert_eq!(diff.new, vec![ResourceId::new("resource.random_uuid.fresh")]);
        assert_eq!(diff.changed, vec![ResourceId::new("resource.random_number.n")]);
        assert_eq!(diff.removed, vec![ResourceId::new("resource.random_id.gone")]);
        assert!(diff.unchanged.contains(&ResourceId::new("resource.random_uuid.keep")));
        assert!(diff.has_changes());
        assert_eq!(mock.calls().len(), calls);
    }

    #[test]
    fn destroy_without_state_is_a_no_op() {
        let (_home, engine, _mock, _project) = test_engine();
        let report = engine.destroy(&DestroyOptions::default()).unwrap();
        assert_eq!(report, Report::default());
    }

    #[test]
    fn destroy_drops_unregistered_types() {
        let (_home, engine, _mock, _project) = test_engine();
        let state = engine.layout().state_path();
        std::fs::create_dir_all(state.parent().unwrap()).unwrap();
        std::fs::write(
            &state,
            serde_json::to_string(&json!({"resources": [
                {"id": "resource.terraform.t", "name": "t", "type": "terraform", "status": "applied"},
                {"id": "resource.random_uuid.u", "name": "u", "type": "random_uuid", "status": "applied", "value": "x"}
            ]}))
            .unwrap(),
        )
        .unwrap();

        assert!(engine.status().is_err());
        let report = engine.destroy(&DestroyOptions::default()).unwrap();
        assert!(report.is_success());
        assert_eq!(
            statuses(&engine),
            vec![("resource.random_uuid.u".to_owned(), Status::Destroyed)]
        );
    }

    #[test]
    fn cycle_fails_before_any_provider_call() {
        let (_home, engine, mock, project) = test_engine();
        write_blueprint(
            project.path(),
            json!([
                {"type": "random_uuid", "name": "a", "depends_on": ["random_uuid.b"]},
                {"type": "random_uuid", "name": "b", "depends_on": ["random_uuid.a"]}
            ]),
        );
        let err = engine.apply(project.path(), &ApplyOptions::default()).unwrap_err();
        assert_eq!(
            err.to_string(),
            "configuration error: cycle: resource.random_uuid.a, resource.random_uuid.b"
        );
        assert!(mock.calls().is_empty());
        assert!(!engine.state_store().exists());
    }
}
