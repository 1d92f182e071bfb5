//! Desired resources + prior state → the working set of one run.
//!
//! On top of [`jumppad_store::merge`] this injects the image cache singleton
//! into runs that declare networks, points it at every declared network of
//! the run, and upgrades resources whose content checksum moved since the
//! last apply to `pending_update`.

use crate::graph::Graph;
use crate::provider::files::tree_digest;
use crate::registry::Registry;
use crate::CoreError;
use jumppad_schema::kinds::ImageCache;
use jumppad_schema::{DriftSource, Payload, Resource, ResourceId, ResourceSet, Status};
use jumppad_store::{merge, MergeOptions, MergeOutcome};
use std::collections::HashSet;
use tracing::{debug, warn};

/// Id of the registry proxy every run carries.
pub const IMAGE_CACHE_ID: &str = "resource.image_cache.default";

/// Merge `desired` with `prior` and prepare the result for scheduling.
///
/// Dependencies are resolved against the declared resources alone; a
/// resource that leans on something only the prior state still holds fails
/// here, before any provider runs.
pub fn reconcile(
    mut desired: ResourceSet,
    prior: &ResourceSet,
    registry: &Registry,
    options: MergeOptions,
) -> Result<MergeOutcome, CoreError> {
    Graph::build(&desired)?;
    let networks: Vec<String> = desired.of_kind("network").map(|n| n.id().to_string()).collect();
    let injected = inject_image_cache(&mut desired, prior);
    if !injected {
        extend_cache_dependencies(&mut desired, &networks);
    }
    let mut outcome = merge(desired, prior, registry, options)?;
    if injected {
        if let Some(cache) = outcome.working.get_mut(IMAGE_CACHE_ID) {
            cache.info_mut().depends_on = networks;
        }
    }
    apply_checksums(&mut outcome, prior);
    Ok(outcome)
}

/// Add the image cache unless the configuration declares one or has no
/// network to attach it to. It starts with the dependencies it had last time
/// so that an unchanged cache stays `applied` through the merge. A cache left
/// in state by an earlier run becomes an orphan once the networks are gone.
fn inject_image_cache(desired: &mut ResourceSet, prior: &ResourceSet) -> bool {
    let declared = desired.of_kind(ImageCache::KIND).next().is_some();
    if declared || desired.of_kind("network").next().is_none() {
        return false;
    }
    let mut cache = Resource::new("default", ImageCache::default());
    if let Some(old) = prior.get(IMAGE_CACHE_ID) {
        cache.info_mut().depends_on.clone_from(&old.info().depends_on);
    }
    debug!("injecting image cache");
    desired.upsert(cache);
    true
}

/// A declared cache keeps its own dependencies and gains every declared
/// network it does not already list. Runs before the merge so the stored
/// copy compares equal on the next run.
fn extend_cache_dependencies(desired: &mut ResourceSet, networks: &[String]) {
    for cache in desired.iter_mut().filter(|r| r.kind() == ImageCache::KIND) {
        let deps = &mut cache.info_mut().depends_on;
        for network in networks {
            if !deps.contains(network) {
                deps.push(network.clone());
            }
        }
    }
}

/// Digest of a drift source; `None` when a local path does not exist.
pub(crate) fn drift_checksum(source: &DriftSource) -> Option<String> {
    match source {
        DriftSource::Content(text) => Some(blake3::hash(text.as_bytes()).to_hex().to_string()),
        DriftSource::Path(path) if path.exists() => match tree_digest(path) {
            Ok(digest) => Some(digest),
            Err(e) => {
                warn!("unable to hash {}: {e}", path.display());
                None
            }
        },
        DriftSource::Path(path) => {
            debug!("drift source {} does not exist", path.display());
            None
        }
    }
}

fn apply_checksums(outcome: &mut MergeOutcome, prior: &ResourceSet) {
    let undesired: HashSet<&ResourceId> = outcome.orphans.iter().chain(&outcome.retained).collect();
    for resource in outcome.working.iter_mut() {
        if undesired.contains(resource.id()) {
            continue;
        }
        let Some(digest) = resource.spec().drift_source().as_ref().and_then(drift_checksum) else {
            continue;
        };
        let previous = prior.get(resource.id()).and_then(|p| p.info().checksum.as_deref());
        if resource.status() == Status::Applied {
            if let Some(previous) = previous {
                if previous != digest {
                    debug!(id = %resource.id(), "content changed since last apply");
                    resource.set_status(Status::PendingUpdate);
                }
            }
        }
        resource.info_mut().checksum = Some(digest);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jumppad_schema::kinds::{FileCopy, Network, Template};
    use std::fs;

    fn network(name: &str) -> Resource {
        Resource::new(
            name,
            Network {
                subnet: "10.5.0.0/16".to_owned(),
                ..Network::default()
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

    fn template(source: &str) -> Resource {
        Resource::new(
            "t",
            Template {
                source: source.to_owned(),
                destination: "/tmp/out".to_owned(),
                ..Template::default()
            },
        )
    }

    fn run(desired: Vec<Resource>, prior: &ResourceSet) -> MergeOutcome {
        reconcile(set(desired), prior, &Registry::builtin(), MergeOptions::default()).unwrap()
    }

    #[test]
    fn image_cache_depends_on_every_network() {
        let outcome = run(vec![network("a"), network("b")], &ResourceSet::new());
        let cache = outcome.working.get(IMAGE_CACHE_ID).unwrap();
        assert_eq!(
            cache.info().depends_on,
            vec!["resource.network.a", "resource.network.b"]
        );
        assert_eq!(cache.status(), Status::PendingCreation);
    }

    #[test]
    fn image_cache_stays_applied_when_networks_change() {
        let first = run(vec![network("a")], &ResourceSet::new());
        let mut prior = first.working.clone();
        for r in prior.iter_mut() {
            r.set_status(Status::Applied);
        }
        let outcome = run(vec![network("a"), network("b")], &prior);
        let cache = outcome.working.get(IMAGE_CACHE_ID).unwrap();
        assert_eq!(cache.status(), Status::Applied);
        assert_eq!(cache.info().depends_on.len(), 2);
    }

    #[test]
    fn no_image_cache_without_networks() {
        let outcome = run(vec![template("hello")], &ResourceSet::new());
        assert!(outcome.working.get(IMAGE_CACHE_ID).is_none());

        let first = run(vec![network("a")], &ResourceSet::new());
        let mut prior = first.working;
        for r in prior.iter_mut() {
            r.set_status(Status::Applied);
        }
        let outcome = run(vec![template("hello")], &prior);
        assert!(outcome.orphans.contains(&ResourceId::new(IMAGE_CACHE_ID)));
    }

    #[test]
    fn declared_image_cache_is_not_duplicated() {
        let outcome = run(vec![Resource::new("default", ImageCache::default())], &ResourceSet::new());
        assert_eq!(outcome.working.of_kind("image_cache").count(), 1);
    }

    #[test]
    fn orphan_networks_are_not_dependencies_of_the_cache() {
        let prior = set(vec![applied(network("old"))]);
        let outcome = run(vec![network("new")], &prior);
        assert_eq!(outcome.orphans, vec![ResourceId::new("resource.network.old")]);
        let deps = &outcome.working.get(IMAGE_CACHE_ID).unwrap().info().depends_on;
        assert_eq!(deps, &vec!["resource.network.new"]);
    }

    #[test]
    fn declared_cache_keeps_its_dependencies() {
        let mut cache = Resource::new("default", ImageCache::default());
        cache.info_mut().depends_on = vec!["resource.template.t".to_owned()];
        let desired = || vec![template("hello"), network("a"), cache.clone()];
        let prior = set(vec![applied(network("gone"))]);

        let first = run(desired(), &prior);
        let deps = &first.working.get(IMAGE_CACHE_ID).unwrap().info().depends_on;
        assert_eq!(deps, &vec!["resource.template.t", "resource.network.a"]);

        let mut stored = first.working.clone();
        for r in stored.iter_mut() {
            r.set_status(Status::Applied);
        }
        let second = run(desired(), &stored);
        assert_eq!(second.working.get(IMAGE_CACHE_ID).unwrap().status(), Status::Applied);
    }

    #[test]
    fn dependency_on_a_resource_only_in_state_is_rejected() {
        let mut web = Resource::new("web", Template::default());
        web.info_mut().depends_on = vec!["resource.network.old".to_owned()];
        let prior = set(vec![applied(network("old"))]);
        let registry = Registry::builtin();
        let err = reconcile(set(vec![web]), &prior, &registry, MergeOptions::default()).unwrap_err();
        assert!(matches!(
            err,
            CoreError::Config(crate::ConfigError::UnresolvedDependency { .. })
        ));
    }

    #[test]
    fn content_change_upgrades_to_pending_update() {
        let first = run(vec![template("hello")], &ResourceSet::new());
        let t = first.working.get("resource.template.t").unwrap();
        assert!(t.info().checksum.is_some());

        let prior = set(vec![applied(t.clone())]);
        let same = run(vec![template("hello")], &prior);
        assert_eq!(same.working.get("resource.template.t").unwrap().status(), Status::Applied);

        let mut stale = applied(template("hello"));
        stale.info_mut().checksum = Some("stale".to_owned());
        let outcome = run(vec![template("hello")], &set(vec![stale]));
        let t = outcome.working.get("resource.template.t").unwrap();
        assert_eq!(t.status(), Status::PendingUpdate);
        assert_ne!(t.info().checksum.as_deref(), Some("stale"));
    }

    #[test]
    fn local_copy_tracks_directory_content() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.txt"), "1").unwrap();
        let copy = || {
            Resource::new(
                "files",
                FileCopy {
                    source: dir.path().display().to_string(),
                    destination: "/tmp/dest".to_owned(),
                    ..FileCopy::default()
                },
            )
        };
        let first = run(vec![copy()], &ResourceSet::new());
        let prior = set(vec![applied(first.working.get("resource.copy.files").unwrap().clone())]);
        assert_eq!(
            run(vec![copy()], &prior).working.get("resource.copy.files").unwrap().status(),
            Status::Applied
        );

        fs::write(dir.path().join("a.txt"), "2").unwrap();
        assert_eq!(
            run(vec![copy()], &prior).working.get("resource.copy.files").unwrap().status(),
            Status::PendingUpdate
        );
    }

    #[test]
    fn missing_local_source_has_no_checksum() {
        let copy = Resource::new(
            "files",
            FileCopy {
                source: "/definitely/not/here".to_owned(),
                ..FileCopy::default()
            },
        );
        let outcome = run(vec![copy], &ResourceSet::new());
        assert!(outcome.working.get("resource.copy.files").unwrap().info().checksum.is_none());
    }

    #[test]
    fn orphans_keep_their_checksum() {
        let mut old = applied(template("old"));
        old.info_mut().checksum = Some("kept".to_owned());
        let outcome = run(vec![], &set(vec![old]));
        let t = outcome.working.get("resource.template.t").unwrap();
        assert_eq!(t.status(), Status::PendingModification);
        assert_eq!(t.info().checksum.as_deref(), Some("kept"));
    }
}
