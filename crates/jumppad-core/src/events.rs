//! Lifecycle events emitted while a run progresses.

use jumppad_schema::ResourceId;
use std::fmt;
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// The blueprint was read and merged with state.
    Parsed { resources: usize },
    Creating(ResourceId),
    Created(ResourceId),
    CreateFailed { id: ResourceId, error: String },
    Destroying(ResourceId),
    Destroyed(ResourceId),
    DestroyFailed { id: ResourceId, error: String },
    Refreshing(ResourceId),
}

impl Event {
    pub fn resource(&self) -> Option<&ResourceId> {
        match self {
            Self::Parsed { .. } => None,
            Self::Creating(id)
            | Self::Created(id)
            | Self::Destroying(id)
            | Self::Destroyed(id)
            | Self::Refreshing(id)
            | Self::CreateFailed { id, .. }
            | Self::DestroyFailed { id, .. } => Some(id),
        }
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Parsed { resources } => write!(f, "parsed {resources} resources"),
            Self::Creating(id) => write!(f, "creating {id}"),
            Self::Created(id) => write!(f, "created {id}"),
            Self::CreateFailed { id, error } => write!(f, "failed to create {id}: {error}"),
            Self::Destroying(id) => write!(f, "destroying {id}"),
            Self::Destroyed(id) => write!(f, "destroyed {id}"),
            Self::DestroyFailed { id, error } => write!(f, "failed to destroy {id}: {error}"),
            Self::Refreshing(id) => write!(f, "refreshing {id}"),
        }
    }
}

/// Receives events from the scheduler thread. Callbacks must not block.
pub type EventSink = Arc<dyn Fn(&Event) + Send + Sync>;

pub(crate) fn emit(sink: Option<&EventSink>, event: &Event) {
    tracing::debug!("{event}");
    if let Some(sink) = sink {
        sink(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn sink_receives_events() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let captured = Arc::clone(&seen);
        let sink: EventSink = Arc::new(move |e: &Event| captured.lock().unwrap().push(e.to_string()));
        let id = ResourceId::new("resource.network.n1");
        emit(Some(&sink), &Event::Creating(id.clone()));
        emit(
            Some(&sink),
            &Event::CreateFailed {
                id,
                error: "boom".to_owned(),
            },
        );
        emit(None, &Event::Parsed { resources: 1 });
        let seen = seen.lock().unwrap();
        assert_eq!(
            *seen,
            vec![
                "creating resource.network.n1",
                "failed to create resource.network.n1: boom"
            ]
        );
    }

    #[test]
    fn event_resource() {
        assert!(Event::Parsed { resources: 0 }.resource().is_none());
        let id = ResourceId::new("resource.container.c");
        assert_eq!(Event::Destroyed(id.clone()).resource(), Some(&id));
    }
}
