//! Parallel, topologically gated walk of the resource graph.
//!
//! A vertex is dispatched once every vertex upstream of it (its dependencies
//! for apply and refresh, its dependents for destroy) has finished
//! successfully. Provider calls run on a bounded rayon pool; the calling
//! thread owns the working set, applies each completion to it and flushes the
//! state file before releasing the next wave.

use crate::concurrency::CancellationToken;
use crate::config::default_parallelism;
use crate::error::{ProviderError, ProviderErrorKind};
use crate::events::{emit, Event, EventSink};
use crate::graph::Graph;
use crate::lifecycle::validate_transition;
use crate::provider::{Provider, ProviderContext};
use crate::registry::Registry;
use crate::CoreError;
use jumppad_runtime::Clients;
use jumppad_schema::{Resource, ResourceId, ResourceSet, Status};
use jumppad_store::{Blueprint, JumppadLayout, StateStore};
use std::collections::{HashSet, VecDeque};
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{mpsc, Arc};
use std::time::Duration;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Apply,
    Destroy,
    Refresh,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Apply => f.write_str("apply"),
            Self::Destroy => f.write_str("destroy"),
            Self::Refresh => f.write_str("refresh"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeFailure {
    pub id: ResourceId,
    pub error: ProviderError,
}

/// Outcome of one walk.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Report {
    /// Resources a provider created, refreshed or destroyed.
    pub succeeded: Vec<ResourceId>,
    /// Resources that needed no provider call.
    pub unchanged: Vec<ResourceId>,
    pub failed: Vec<NodeFailure>,
    /// Resources never dispatched: pruned below a failure, or left over after
    /// cancellation or a strict abort.
    pub skipped: Vec<ResourceId>,
    pub cancelled: bool,
}

impl Report {
    pub fn is_success(&self) -> bool {
        self.failed.is_empty() && !self.cancelled
    }

    pub fn failed_ids(&self) -> Vec<&ResourceId> {
        self.failed.iter().map(|f| &f.id).collect()
    }

    /// Append another walk's results to this one.
    pub fn absorb(&mut self, other: Report) {
        self.succeeded.extend(other.succeeded);
        self.unchanged.extend(other.unchanged);
        self.failed.extend(other.failed);
        self.skipped.extend(other.skipped);
        self.cancelled |= other.cancelled;
    }

    /// `Err(CoreError::Aggregate)` unless every resource succeeded.
    pub fn into_result(self) -> Result<Self, CoreError> {
        if self.is_success() {
            Ok(self)
        } else {
            Err(CoreError::Aggregate(self))
        }
    }
}

impl fmt::Display for Report {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} succeeded, {} unchanged, {} failed, {} skipped",
            self.succeeded.len(),
            self.unchanged.len(),
            self.failed.len(),
            self.skipped.len()
        )?;
        if self.cancelled {
            f.write_str(" (cancelled)")?;
        }
        for failure in &self.failed {
            write!(f, "\n  {}: {}", failure.id, failure.error)?;
        }
        Ok(())
    }
}

/// Knobs for one walk.
#[derive(Debug, Clone)]
pub struct WalkOptions {
    pub direction: Direction,
    /// Upper bound on concurrent provider calls.
    pub parallelism: usize,
    /// Apply: re-pull images and re-create applied resources.
    /// Destroy: providers log and swallow their errors.
    pub force: bool,
    /// Stop dispatching after the first failure.
    pub strict: bool,
    pub default_timeout: Duration,
    /// Restrict provider calls to these ids. Every other vertex is passed
    /// through untouched so that ordering is still respected.
    pub only: Option<HashSet<ResourceId>>,
}

impl WalkOptions {
    pub fn new(direction: Direction) -> Self {
        Self {
            direction,
            parallelism: default_parallelism(),
            force: false,
            strict: false,
            default_timeout: Duration::from_secs(300),
            only: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Action {
    /// No provider call; the vertex completes with this status.
    Settle(Status),
    Create,
    /// Destroy, then create: the configuration changed.
    Recreate,
    /// `changed`, then `refresh` when it reports drift.
    Refresh,
    Destroy,
}

fn plan(direction: Direction, resource: &Resource, has_provider: bool, force: bool) -> Action {
    let status = resource.status();
    let disabled = resource.info().disabled || status == Status::Disabled;
    match direction {
        Direction::Apply if disabled => Action::Settle(Status::Disabled),
        Direction::Apply => match status {
            Status::PendingCreation => Action::Create,
            Status::PendingUpdate => Action::Recreate,
            Status::Applied if force => Action::Recreate,
            Status::Applied => Action::Refresh,
            other => Action::Settle(other),
        },
        Direction::Destroy if status == Status::Destroyed => Action::Settle(Status::Destroyed),
        Direction::Destroy if disabled || !has_provider => Action::Settle(Status::Destroyed),
        Direction::Destroy => Action::Destroy,
        Direction::Refresh if !disabled && status == Status::Applied => Action::Refresh,
        Direction::Refresh => Action::Settle(status),
    }
}

/// Whether a successful call changed anything.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Done {
    Changed,
    Unchanged,
}

struct Completion {
    index: usize,
    action: Action,
    resource: Resource,
    result: Result<Done, ProviderError>,
}

fn run_action(
    provider: &dyn Provider,
    action: Action,
    resource: &mut Resource,
    ctx: &ProviderContext<'_>,
    force: bool,
) -> Result<Done, ProviderError> {
    match action {
        Action::Create => provider.create(resource, ctx).map(|()| Done::Changed),
        Action::Recreate => {
            provider.destroy(resource, ctx, true)?;
            ctx.check_cancelled()?;
            provider.create(resource, ctx).map(|()| Done::Changed)
        }
        Action::Refresh => {
            if provider.changed(resource, ctx)? {
                provider.refresh(resource, ctx)?;
                Ok(Done::Changed)
            } else {
                Ok(Done::Unchanged)
            }
        }
        Action::Destroy => provider.destroy(resource, ctx, force).map(|()| Done::Changed),
        Action::Settle(_) => Ok(Done::Unchanged),
    }
}

/// Mutable bookkeeping of one walk, owned by the calling thread.
struct Walk<'g, 'w> {
    graph: &'g Graph,
    direction: Direction,
    strict: bool,
    waiting: Vec<usize>,
    finished: Vec<bool>,
    ready: VecDeque<usize>,
    working: &'w mut ResourceSet,
    report: Report,
    halted: bool,
    fatal: Option<CoreError>,
    snapshot: Option<Arc<ResourceSet>>,
}

impl Walk<'_, '_> {
    fn downstream(&self, i: usize) -> &[usize] {
        match self.direction {
            Direction::Destroy => self.graph.parent_indices(i),
            _ => self.graph.child_indices(i),
        }
    }

    /// Mark `i` done and queue every vertex whose upstream is now complete.
    fn release(&mut self, i: usize) {
        self.finished[i] = true;
        let next = self.downstream(i).to_vec();
        for d in next {
            self.waiting[d] -= 1;
            if self.waiting[d] == 0 {
                self.ready.push_back(d);
            }
        }
    }

    /// The resources providers may see: disabled and destroyed ones are
    /// hidden.
    fn visible(&mut self) -> Arc<ResourceSet> {
        if let Some(snapshot) = &self.snapshot {
            return Arc::clone(snapshot);
        }
        let mut set = ResourceSet::new();
        for r in self.working.iter() {
            if r.info().disabled || matches!(r.status(), Status::Disabled | Status::Destroyed) {
                continue;
            }
            set.upsert(r.clone());
        }
        let snapshot = Arc::new(set);
        self.snapshot = Some(Arc::clone(&snapshot));
        snapshot
    }

    fn store(&mut self, resource: Resource) {
        self.working.upsert(resource);
        self.snapshot = None;
    }

    fn fail(&mut self, id: ResourceId, error: ProviderError) {
        self.report.failed.push(NodeFailure { id, error });
        if self.strict {
            self.halted = true;
        }
    }
}

/// Walks a [`Graph`] with bounded parallelism, dispatching each vertex to
/// the provider registered for its kind.
pub struct Scheduler<'a> {
    registry: &'a Registry,
    clients: &'a Clients,
    layout: &'a JumppadLayout,
    cancel: &'a CancellationToken,
    events: Option<&'a EventSink>,
    state: Option<(&'a StateStore, Option<&'a Blueprint>)>,
}

impl<'a> Scheduler<'a> {
    pub fn new(
        registry: &'a Registry,
        clients: &'a Clients,
        layout: &'a JumppadLayout,
        cancel: &'a CancellationToken,
    ) -> Self {
        Self {
            registry,
            clients,
            layout,
            cancel,
            events: None,
            state: None,
        }
    }

    #[must_use]
    pub fn with_events(mut self, events: Option<&'a EventSink>) -> Self {
        self.events = events;
        self
    }

    /// Save the working set to `store` after every vertex completes.
    #[must_use]
    pub fn persist_to(mut self, store: &'a StateStore, blueprint: Option<&'a Blueprint>) -> Self {
        self.state = Some((store, blueprint));
        self
    }

    fn persist(&self, walk: &mut Walk<'_, '_>) {
        let Some((store, blueprint)) = self.state else {
            return;
        };
        if let Err(e) = store.save_parts(blueprint, walk.working) {
            error!("unable to save state, stopping: {e}");
            walk.fatal = Some(e.into());
            walk.halted = true;
        }
    }

    /// Walk `graph` over `working` in `options.direction`.
    ///
    /// Provider failures are collected in the returned [`Report`]; only a
    /// failure to write the state file or to start the worker pool is an
    /// `Err`.
    pub fn walk(
        &self,
        graph: &Graph,
        working: &mut ResourceSet,
        options: &WalkOptions,
    ) -> Result<Report, CoreError> {
        let n = graph.len();
        let parallelism = options.parallelism.max(1);
        let reverse = options.direction == Direction::Destroy;

        let waiting: Vec<usize> = (0..n)
            .map(|i| {
                if reverse {
                    graph.child_indices(i).len()
                } else {
                    graph.parent_indices(i).len()
                }
            })
            .collect();
        let mut order = graph.order_indices().to_vec();
        if reverse {
            order.reverse();
        }
        let ready = order.iter().copied().filter(|&i| waiting[i] == 0).collect();

        let mut walk = Walk {
            graph,
            direction: options.direction,
            strict: options.strict,
            waiting,
            finished: vec![false; n],
            ready,
            working,
            report: Report::default(),
            halted: false,
            fatal: None,
            snapshot: None,
        };

        info!(
            direction = %options.direction,
            resources = n,
            parallelism,
            "walking resource graph"
        );

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(parallelism)
            .thread_name(|i| format!("jumppad-worker-{i}"))
            .build()
            .map_err(|e| CoreError::Io(std::io::Error::other(e)))?;
        let (tx, rx) = mpsc::channel::<Completion>();
        let mut in_flight = 0usize;

        pool.in_place_scope(|scope| loop {
            while !walk.halted && in_flight < parallelism {
                let Some(i) = walk.ready.pop_front() else {
                    break;
                };
                if self.cancel.is_cancelled() {
                    warn!("run cancelled, not dispatching further resources");
                    walk.report.cancelled = true;
                    walk.halted = true;
                    break;
                }

                let id = graph.id_at(i).clone();
                let selected = options.only.as_ref().map_or(true, |only| only.contains(&id));
                let Some(resource) = walk.working.get(&id) else {
                    walk.release(i);
                    continue;
                };
                if !selected {
                    walk.release(i);
                    continue;
                }

                let provider = self.registry.provider(resource.kind());
                match plan(options.direction, resource, provider.is_some(), options.force) {
                    Action::Settle(to) => {
                        self.settle(&mut walk, i, to);
                        continue;
                    }
                    action => {
                        let Some(provider) = provider else {
                            let kind = resource.kind().to_owned();
                            walk.fail(
                                id,
                                ProviderError::invalid(format!("no provider registered for type '{kind}'")),
                            );
                            walk.finished[i] = true;
                            continue;
                        };
                        let resource = resource.clone();
                        match action {
                            Action::Destroy => emit(self.events, &Event::Destroying(id.clone())),
                            Action::Refresh if options.direction == Direction::Refresh => {
                                emit(self.events, &Event::Refreshing(id.clone()));
                            }
                            Action::Refresh => {}
                            _ => emit(self.events, &Event::Creating(id.clone())),
                        }
                        debug!(id = %id, ?action, "dispatching");

                        let snapshot = walk.visible();
                        let tx = tx.clone();
                        let clients = self.clients;
                        let layout = self.layout;
                        let cancel = self.cancel;
                        let force = options.force;
                        let force_pull = options.force && options.direction == Direction::Apply;
                        let default_timeout = options.default_timeout;
                        in_flight += 1;
                        scope.spawn(move |_| {
                            let mut resource = resource;
                            let ctx = ProviderContext {
                                clients,
                                layout,
                                resources: &snapshot,
                                cancel,
                                force_pull,
                                default_timeout,
                            };
                            let result = catch_unwind(AssertUnwindSafe(|| {
                                run_action(provider.as_ref(), action, &mut resource, &ctx, force)
                            }))
                            .unwrap_or_else(|_| Err(ProviderError::internal("provider panicked")));
                            let _ = tx.send(Completion {
                                index: i,
                                action,
                                resource,
                                result,
                            });
                        });
                    }
                }
            }

            if in_flight == 0 {
                break;
            }
            let Ok(completion) = rx.recv() else {
                break;
            };
            in_flight -= 1;
            self.complete(&mut walk, completion);
        });

        for &i in &order {
            let id = graph.id_at(i);
            let selected = options.only.as_ref().map_or(true, |only| only.contains(id));
            if selected && !walk.finished[i] {
                walk.report.skipped.push(id.clone());
            }
        }

        if let Some(fatal) = walk.fatal {
            return Err(fatal);
        }
        info!(direction = %options.direction, "{}", walk.report);
        Ok(walk.report)
    }

    /// Complete a vertex that needs no provider call.
    fn settle(&self, walk: &mut Walk<'_, '_>, i: usize, to: Status) {
        let id = walk.graph.id_at(i).clone();
        let Some(resource) = walk.working.get_mut(&id) else {
            walk.release(i);
            return;
        };
        let from = resource.status();
        if from != to && validate_transition(from, to).is_ok() {
            resource.set_status(to);
            walk.snapshot = None;
            if to == Status::Destroyed {
                debug!(id = %id, "nothing to call, marking destroyed");
                walk.report.succeeded.push(id.clone());
                emit(self.events, &Event::Destroyed(id));
            } else {
                walk.report.unchanged.push(id);
            }
            self.persist(walk);
        } else {
            walk.report.unchanged.push(id);
        }
        walk.release(i);
    }

    fn complete(&self, walk: &mut Walk<'_, '_>, completion: Completion) {
        let Completion {
            index,
            action,
            mut resource,
            result,
        } = completion;
        let id = resource.id().clone();
        let from = walk.working.get(&id).map_or(resource.status(), Resource::status);
        let destroying = action == Action::Destroy;

        match result {
            Ok(done) => {
                let to = if destroying {
                    Status::Destroyed
                } else {
                    Status::Applied
                };
                match validate_transition(from, to) {
                    Ok(()) => {
                        resource.set_status(to);
                        match (done, destroying) {
                            (Done::Unchanged, _) => walk.report.unchanged.push(id.clone()),
                            (Done::Changed, true) => {
                                info!(id = %id, "destroyed");
                                walk.report.succeeded.push(id.clone());
                                emit(self.events, &Event::Destroyed(id.clone()));
                            }
                            (Done::Changed, false) => {
                                let verb = if action == Action::Refresh {
                                    "refreshed"
                                } else {
                                    "created"
                                };
                                info!(id = %id, "{verb}");
                                walk.report.succeeded.push(id.clone());
                                let event = if action == Action::Refresh {
                                    Event::Refreshing(id.clone())
                                } else {
                                    Event::Created(id.clone())
                                };
                                if action != Action::Refresh || walk.direction == Direction::Apply {
                                    emit(self.events, &event);
                                }
                            }
                        }
                        walk.store(resource);
                        walk.release(index);
                    }
                    Err(e) => {
                        resource.set_status(Status::Failed);
                        walk.store(resource);
                        walk.finished[index] = true;
                        walk.fail(id, ProviderError::internal(e.to_string()));
                    }
                }
            }
            Err(e) if e.kind == ProviderErrorKind::Cancelled => {
                debug!(id = %id, "cancelled before completion");
                walk.store(resource);
            }
            Err(e) => {
                warn!(id = %id, "{} failed: {e}", walk.direction);
                resource.set_status(Status::Failed);
                let event = if destroying {
                    Event::DestroyFailed {
                        id: id.clone(),
                        error: e.to_string(),
                    }
                } else {
                    Event::CreateFailed {
                        id: id.clone(),
                        error: e.to_string(),
                    }
                };
                emit(self.events, &event);
                walk.store(resource);
                walk.finished[index] = true;
                walk.fail(id, e);
            }
        }
        self.persist(walk);
    }
}
