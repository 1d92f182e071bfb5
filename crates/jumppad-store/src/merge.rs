//! Combine the desired resources of a run with the prior state.

use crate::StoreError;
use jumppad_schema::{KindDecoder, ResourceId, ResourceSet, Status};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MergeOptions {
    /// Mark resources that are in state but no longer desired for destruction.
    pub destroy_orphans: bool,
}

impl Default for MergeOptions {
    fn default() -> Self {
        Self {
            destroy_orphans: true,
        }
    }
}

/// The working set for one run.
#[derive(Debug, Clone, Default)]
pub struct MergeOutcome {
    /// Desired resources with statuses set, followed by every prior orphan.
    pub working: ResourceSet,
    /// Orphans marked `pending_modification`, in state order.
    pub orphans: Vec<ResourceId>,
    /// Orphans kept untouched because orphan destruction was disabled.
    pub retained: Vec<ResourceId>,
}

impl MergeOutcome {
    /// True when `id` belongs to the desired half of the working set.
    pub fn is_desired(&self, id: &str) -> bool {
        !self.orphans.iter().any(|o| o == id) && !self.retained.iter().any(|o| o == id)
    }
}

/// Merge `desired` with `prior` by id.
///
/// Matched resources inherit the computed fields of their prior copy unless
/// that copy was destroyed or disabled. A match in `applied` stays `applied`
/// when the configuration is unchanged and becomes `pending_update` otherwise.
/// A match that never reached `applied` is retried from its pending status.
/// Disabled resources are forced to `disabled`.
pub fn merge(
    desired: ResourceSet,
    prior: &ResourceSet,
    decoder: &dyn KindDecoder,
    options: MergeOptions,
) -> Result<MergeOutcome, StoreError> {
    let mut outcome = MergeOutcome::default();

    for mut resource in desired {
        resource.dedup_dependencies();
        let status = match prior.get(resource.id()) {
            None => Status::PendingCreation,
            Some(old) => {
                let carry = !matches!(old.status(), Status::Destroyed | Status::Disabled);
                if carry {
                    resource.carry_computed(old, decoder)?;
                    resource.info_mut().checksum.clone_from(&old.info().checksum);
                }
                match old.status() {
                    Status::Applied if resource.config_equal(old)? => Status::Applied,
                    Status::Applied | Status::PendingUpdate => Status::PendingUpdate,
                    _ => Status::PendingCreation,
                }
            }
        };
        let status = if resource.info().disabled {
            Status::Disabled
        } else {
            status
        };
        resource.set_status(status);
        outcome.working.insert(resource)?;
    }

    for old in prior {
        if outcome.working.contains(old.id()) || old.status() == Status::Destroyed {
            continue;
        }
        let mut orphan = old.clone();
        if options.destroy_orphans {
            orphan.set_status(Status::PendingModification);
            outcome.orphans.push(orphan.id().clone());
        } else {
            outcome.retained.push(orphan.id().clone());
        }
        outcome.working.insert(orphan)?;
    }

    tracing::debug!(
        working = outcome.working.len(),
        orphans = outcome.orphans.len(),
        retained = outcome.retained.len(),
        "merged desired resources with state"
    );
    Ok(outcome)
}

/// Mark every resource for destruction, skipping ones already destroyed.
pub fn mark_for_destroy(resources: &mut ResourceSet) {
    for r in resources.iter_mut() {
        if r.status() != Status::Destroyed {
            r.set_status(Status::PendingModification);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jumppad_schema::kinds::{Container, Image, Network, RandomPassword};
    use jumppad_schema::{BuiltinKinds, Resource};

    fn network(name: &str, subnet: &str) -> Resource {
        Resource::new(
            name,
            Network {
                subnet: subnet.to_owned(),
                ..Network::default()
            },
        )
    }

    fn container(name: &str, image: &str) -> Resource {
        Resource::new(
            name,
            Container {
                image: Image::named(image),
                ..Container::default()
            },
        )
    }

    fn applied(mut r: Resource) -> Resource {
        r.set_status(Status::Applied);
        r
    }

    fn set(resources: Vec<Resource>) -> ResourceSet {
        ResourceSet::from_resources(resources).unwrap()
    }

    fn status_of(outcome: &MergeOutcome, id: &str) -> Status {
        outcome.working.get(id).unwrap().status()
    }

    #[test]
    fn new_resource_is_pending_creation() {
        let out = merge(
            set(vec![network("n1", "10.0.0.0/16")]),
            &ResourceSet::new(),
            &BuiltinKinds,
            MergeOptions::default(),
        )
        .unwrap();
        assert_eq!(status_of(&out, "resource.network.n1"), Status::PendingCreation);
        assert!(out.orphans.is_empty());
    }

    #[test]
    fn unchanged_applied_stays_applied_and_keeps_outputs() {
        let mut old = container("c1", "alpine:3");
        old.payload_mut::<Container>().unwrap().container_id = "abc".to_owned();
        let prior = set(vec![applied(old)]);

        let out = merge(
            set(vec![container("c1", "alpine:3")]),
            &prior,
            &BuiltinKinds,
            MergeOptions::default(),
        )
        .unwrap();
        let r = out.working.get("resource.container.c1").unwrap();
        assert_eq!(r.status(), Status::Applied);
        assert_eq!(r.payload::<Container>().unwrap().container_id, "abc");
    }

    #[test]
    fn changed_applied_becomes_pending_update() {
        let mut old = container("c1", "alpine:3");
        old.payload_mut::<Container>().unwrap().container_id = "abc".to_owned();
        let prior = set(vec![applied(old)]);

        let out = merge(
            set(vec![container("c1", "alpine:4")]),
            &prior,
            &BuiltinKinds,
            MergeOptions::default(),
        )
        .unwrap();
        let r = out.working.get("resource.container.c1").unwrap();
        assert_eq!(r.status(), Status::PendingUpdate);
        assert_eq!(r.payload::<Container>().unwrap().container_id, "abc");
    }

    #[test]
    fn failed_resource_is_retried() {
        let mut old = network("n1", "10.0.0.0/16");
        old.set_status(Status::Failed);
        let out = merge(
            set(vec![network("n1", "10.0.0.0/16")]),
            &set(vec![old]),
            &BuiltinKinds,
            MergeOptions::default(),
        )
        .unwrap();
        assert_eq!(status_of(&out, "resource.network.n1"), Status::PendingCreation);
    }

    #[test]
    fn destroyed_resource_does_not_carry_outputs() {
        let mut old = Resource::new(
            "p",
            RandomPassword {
                length: 16,
                value: "old-value".to_owned(),
                ..RandomPassword::default()
            },
        );
        old.set_status(Status::Destroyed);
        let desired = Resource::new(
            "p",
            RandomPassword {
                length: 16,
                ..RandomPassword::default()
            },
        );
        let out = merge(set(vec![desired]), &set(vec![old]), &BuiltinKinds, MergeOptions::default()).unwrap();
        let r = out.working.get("resource.random_password.p").unwrap();
        assert_eq!(r.status(), Status::PendingCreation);
        assert!(r.payload::<RandomPassword>().unwrap().value.is_empty());
    }

    #[test]
    fn disabled_is_forced() {
        let mut desired = network("n1", "10.0.0.0/16");
        desired.info_mut().disabled = true;
        let prior = set(vec![applied(network("n1", "10.0.0.0/16"))]);
        let out = merge(set(vec![desired]), &prior, &BuiltinKinds, MergeOptions::default()).unwrap();
        assert_eq!(status_of(&out, "resource.network.n1"), Status::Disabled);
    }

    #[test]
    fn orphans_marked_for_destruction() {
        let prior = set(vec![
            applied(network("n1", "10.0.0.0/16")),
            applied(container("old", "alpine:3")),
        ]);
        let out = merge(
            set(vec![network("n1", "10.0.0.0/16")]),
            &prior,
            &BuiltinKinds,
            MergeOptions::default(),
        )
        .unwrap();
        assert_eq!(out.orphans, vec![ResourceId::new("resource.container.old")]);
        assert_eq!(
            status_of(&out, "resource.container.old"),
            Status::PendingModification
        );
        assert!(!out.is_desired("resource.container.old"));
        assert!(out.is_desired("resource.network.n1"));
        // desired first, orphans appended
        assert_eq!(out.working.ids()[1], "resource.container.old");
    }

    #[test]
    fn orphans_retained_when_not_destroying() {
        let prior = set(vec![applied(container("old", "alpine:3"))]);
        let out = merge(
            ResourceSet::new(),
            &prior,
            &BuiltinKinds,
            MergeOptions {
                destroy_orphans: false,
            },
        )
        .unwrap();
        assert!(out.orphans.is_empty());
        assert_eq!(out.retained.len(), 1);
        assert_eq!(status_of(&out, "resource.container.old"), Status::Applied);
    }

    #[test]
    fn destroyed_orphans_are_dropped() {
        let mut old = container("old", "alpine:3");
        old.set_status(Status::Destroyed);
        let out = merge(ResourceSet::new(), &set(vec![old]), &BuiltinKinds, MergeOptions::default()).unwrap();
        assert!(out.working.is_empty());
    }

    #[test]
    fn mark_for_destroy_skips_destroyed() {
        let mut gone = network("gone", "10.1.0.0/16");
        gone.set_status(Status::Destroyed);
        let mut resources = set(vec![applied(network("n1", "10.0.0.0/16")), gone]);
        mark_for_destroy(&mut resources);
        assert_eq!(
            resources.get("resource.network.n1").unwrap().status(),
            Status::PendingModification
        );
        assert_eq!(
            resources.get("resource.network.gone").unwrap().status(),
            Status::Destroyed
        );
    }
}
