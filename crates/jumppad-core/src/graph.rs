//! Dependency DAG over one run's resources.
//!
//! Every resource is a vertex. An edge `dep -> resource` means `dep` must
//! exist before `resource` is created (and must outlive it on destroy).
//! Resources without dependencies hang off the synthetic [`ROOT`].

use crate::error::ConfigError;
use jumppad_schema::{ResourceId, ResourceSet};
use std::collections::{HashMap, VecDeque};

/// Id of the synthetic root vertex.
pub const ROOT: &str = "root";

/// An acyclic dependency graph. Vertices are indexed in resource-set order.
#[derive(Debug, Clone, Default)]
pub struct Graph {
    ids: Vec<ResourceId>,
    index: HashMap<ResourceId, usize>,
    parents: Vec<Vec<usize>>,
    children: Vec<Vec<usize>>,
    /// Topological order, ties broken by set order.
    order: Vec<usize>,
}

impl Graph {
    /// Build the graph from each resource's explicit and implicit
    /// dependencies.
    ///
    /// A `module.<name>` dependency expands to every resource in that module.
    /// Dependencies that resolve to nothing fail with
    /// [`ConfigError::UnresolvedDependency`]; cycles (self-loops included)
    /// fail with [`ConfigError::Cycle`] naming the ids involved.
    pub fn build(resources: &ResourceSet) -> Result<Self, ConfigError> {
        let mut graph = Self::with_vertices(resources)?;

        for (i, resource) in resources.iter().enumerate() {
            let module = resource.info().module.as_deref();
            for dep in resource.dependencies() {
                let targets = if dep.is_module_ref() {
                    graph.module_members(resources, module, &dep, i)
                } else {
                    graph.index.get(&dep).map(|&p| vec![p]).unwrap_or_default()
                };
                if targets.is_empty() && !graph.module_exists(resources, module, &dep) {
                    return Err(ConfigError::UnresolvedDependency {
                        id: resource.id().to_string(),
                        dependency: dep.to_string(),
                    });
                }
                for p in targets {
                    graph.add_edge(p, i);
                }
            }
        }

        graph.sort()?;
        Ok(graph)
    }

    /// A graph that orders resources exactly as they appear in the set, each
    /// depending on the one before. Used to destroy state whose dependencies
    /// can no longer be resolved.
    pub fn chain(resources: &ResourceSet) -> Result<Self, ConfigError> {
        let mut graph = Self::with_vertices(resources)?;
        for i in 1..graph.ids.len() {
            graph.add_edge(i - 1, i);
        }
        graph.sort()?;
        Ok(graph)
    }

    fn with_vertices(resources: &ResourceSet) -> Result<Self, ConfigError> {
        let n = resources.len();
        let mut graph = Self {
            ids: Vec::with_capacity(n),
            index: HashMap::with_capacity(n),
            parents: vec![Vec::new(); n],
            children: vec![Vec::new(); n],
            order: Vec::with_capacity(n),
        };
        for (i, resource) in resources.iter().enumerate() {
            if graph.index.insert(resource.id().clone(), i).is_some() {
                return Err(ConfigError::DuplicateId(resource.id().to_string()));
            }
            graph.ids.push(resource.id().clone());
        }
        Ok(graph)
    }

    /// Members of the module addressed by `dep`, looked up relative to the
    /// referencing resource's module first.
    fn module_members(
        &self,
        resources: &ResourceSet,
        from: Option<&str>,
        dep: &ResourceId,
        own: usize,
    ) -> Vec<usize> {
        let Some(name) = dep.module_name() else {
            return Vec::new();
        };
        for module in module_candidates(from, name) {
            let members: Vec<usize> = resources
                .in_module(&module)
                .filter_map(|r| self.index.get(r.id()).copied())
                .filter(|&m| m != own)
                .collect();
            if !members.is_empty() {
                return members;
            }
        }
        Vec::new()
    }

    /// An empty module is still a valid dependency as long as it is declared.
    fn module_exists(&self, resources: &ResourceSet, from: Option<&str>, dep: &ResourceId) -> bool {
        let Some(name) = dep.module_name() else {
            return false;
        };
        resources.of_kind("module").any(|m| {
            let declared = match m.info().module.as_deref() {
                Some(parent) => format!("{parent}.{}", m.info().name),
                None => m.info().name.clone(),
            };
            module_candidates(from, name).contains(&declared)
        })
    }

    fn add_edge(&mut self, parent: usize, child: usize) {
        if !self.children[parent].contains(&child) {
            self.children[parent].push(child);
            self.parents[child].push(parent);
        }
    }

    /// Kahn's algorithm. Whatever cannot be ordered sits on or between cycles;
    /// trimming the vertices that only lead out of that remainder leaves the
    /// cycle members.
    fn sort(&mut self) -> Result<(), ConfigError> {
        let n = self.ids.len();
        let mut indegree: Vec<usize> = self.parents.iter().map(Vec::len).collect();
        let mut queue: VecDeque<usize> = (0..n).filter(|&i| indegree[i] == 0).collect();
        let mut order = Vec::with_capacity(n);

        while let Some(i) = queue.pop_front() {
            order.push(i);
            for &c in &self.children[i] {
                indegree[c] -= 1;
                if indegree[c] == 0 {
                    queue.push_back(c);
                }
            }
        }

        if order.len() == n {
            self.order = order;
            return Ok(());
        }

        let mut remaining: Vec<bool> = vec![true; n];
        for &i in &order {
            remaining[i] = false;
        }
        loop {
            let sinks: Vec<usize> = (0..n)
                .filter(|&i| remaining[i] && !self.children[i].iter().any(|&c| remaining[c]))
                .collect();
            if sinks.is_empty() {
                break;
            }
            for i in sinks {
                remaining[i] = false;
            }
        }
        let mut members: Vec<String> = (0..n)
            .filter(|&i| remaining[i])
            .map(|i| self.ids[i].to_string())
            .collect();
        members.sort();
        Err(ConfigError::Cycle(members))
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.index.contains_key(id)
    }

    pub(crate) fn position(&self, id: &str) -> Option<usize> {
        self.index.get(id).copied()
    }

    pub(crate) fn id_at(&self, i: usize) -> &ResourceId {
        &self.ids[i]
    }

    pub(crate) fn parent_indices(&self, i: usize) -> &[usize] {
        &self.parents[i]
    }

    pub(crate) fn child_indices(&self, i: usize) -> &[usize] {
        &self.children[i]
    }

    pub(crate) fn order_indices(&self) -> &[usize] {
        &self.order
    }

    /// Resources that directly follow the synthetic root.
    pub fn roots(&self) -> Vec<&ResourceId> {
        self.order
            .iter()
            .filter(|&&i| self.parents[i].is_empty())
            .map(|&i| &self.ids[i])
            .collect()
    }

    /// Direct dependencies of `id`.
    pub fn parents(&self, id: &str) -> Vec<&ResourceId> {
        self.position(id)
            .map(|i| self.parents[i].iter().map(|&p| &self.ids[p]).collect())
            .unwrap_or_default()
    }

    /// Direct dependents of `id`.
    pub fn children(&self, id: &str) -> Vec<&ResourceId> {
        self.position(id)
            .map(|i| self.children[i].iter().map(|&c| &self.ids[c]).collect())
            .unwrap_or_default()
    }

    /// Every resource that transitively depends on `id`.
    pub fn descendants(&self, id: &str) -> Vec<&ResourceId> {
        let Some(start) = self.position(id) else {
            return Vec::new();
        };
        let mut seen = vec![false; self.ids.len()];
        let mut stack = self.children[start].clone();
        let mut out = Vec::new();
        while let Some(i) = stack.pop() {
            if seen[i] {
                continue;
            }
            seen[i] = true;
            out.push(&self.ids[i]);
            stack.extend(self.children[i].iter().copied());
        }
        out
    }

    /// Ids in dependency order: every resource after all of its dependencies.
    pub fn topological_order(&self) -> Vec<&ResourceId> {
        self.order.iter().map(|&i| &self.ids[i]).collect()
    }

    /// Every edge as `(from, to)`, including the synthetic root's.
    pub fn edges(&self) -> Vec<(&str, &str)> {
        let mut out = Vec::new();
        for &i in &self.order {
            if self.parents[i].is_empty() {
                out.push((ROOT, self.ids[i].as_str()));
            }
            for &p in &self.parents[i] {
                out.push((self.ids[p].as_str(), self.ids[i].as_str()));
            }
        }
        out
    }
}

fn module_candidates(from: Option<&str>, name: &str) -> Vec<String> {
    match from {
        Some(parent) => vec![format!("{parent}.{name}"), name.to_owned()],
        None => vec![name.to_owned()],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jumppad_schema::kinds::{Container, Image, Module, Network, NetworkAttachment};
    use jumppad_schema::Resource;

    fn network(name: &str) -> Resource {
        Resource::new(name, Network::default())
    }

    fn container(name: &str, deps: &[&str]) -> Resource {
        let mut r = Resource::new(
            name,
            Container {
                image: Image::named("alpine:3"),
                ..Container::default()
            },
        );
        r.info_mut().depends_on = deps.iter().map(|d| (*d).to_owned()).collect();
        r
    }

    fn set(resources: Vec<Resource>) -> ResourceSet {
        ResourceSet::from_resources(resources).unwrap()
    }

    #[test]
    fn independent_resources_hang_off_root() {
        let g = Graph::build(&set(vec![network("a"), network("b")])).unwrap();
        assert_eq!(g.roots().len(), 2);
        assert_eq!(
            g.edges(),
            vec![(ROOT, "resource.network.a"), (ROOT, "resource.network.b")]
        );
    }

    #[test]
    fn implicit_network_reference_becomes_an_edge() {
        let mut c = container("c1", &[]);
        c.payload_mut::<Container>().unwrap().networks = vec![NetworkAttachment {
            id: "network.n1".to_owned(),
            ..NetworkAttachment::default()
        }];
        let g = Graph::build(&set(vec![c, network("n1")])).unwrap();
        assert_eq!(g.parents("resource.container.c1"), vec!["resource.network.n1"]);
        assert_eq!(
            g.topological_order(),
            vec!["resource.network.n1", "resource.container.c1"]
        );
    }

    #[test]
    fn duplicate_dependencies_make_one_edge() {
        let c = container("c1", &["network.n1", "resource.network.n1"]);
        let g = Graph::build(&set(vec![network("n1"), c])).unwrap();
        assert_eq!(g.children("resource.network.n1").len(), 1);
    }

    #[test]
    fn two_node_cycle_names_both() {
        let a = container("a", &["container.b"]);
        let b = container("b", &["container.a"]);
        let err = Graph::build(&set(vec![a, b])).unwrap_err();
        assert_eq!(
            err.to_string(),
            "cycle: resource.container.a, resource.container.b"
        );
    }

    #[test]
    fn self_loop_is_a_cycle() {
        let a = container("a", &["container.a"]);
        assert_eq!(
            Graph::build(&set(vec![a])).unwrap_err(),
            ConfigError::Cycle(vec!["resource.container.a".to_owned()])
        );
    }

    #[test]
    fn cycle_report_excludes_downstream_vertices() {
        let a = container("a", &["container.b"]);
        let b = container("b", &["container.a"]);
        let c = container("c", &["container.b"]);
        let err = Graph::build(&set(vec![a, b, c])).unwrap_err();
        assert_eq!(
            err,
            ConfigError::Cycle(vec![
                "resource.container.a".to_owned(),
                "resource.container.b".to_owned()
            ])
        );
    }

    #[test]
    fn missing_dependency_is_unresolved() {
        let c = container("c1", &["network.nope"]);
        assert_eq!(
            Graph::build(&set(vec![c])).unwrap_err(),
            ConfigError::UnresolvedDependency {
                id: "resource.container.c1".to_owned(),
                dependency: "resource.network.nope".to_owned(),
            }
        );
    }

    #[test]
    fn module_reference_expands_to_members() {
        let m1 = Resource::with_module(Some("db"), "n", Network::default());
        let m2 = Resource::with_module(
            Some("db"),
            "c",
            Container {
                image: Image::named("postgres"),
                ..Container::default()
            },
        );
        let module = Resource::new("db", Module::default());
        let app = container("app", &["module.db"]);
        let g = Graph::build(&set(vec![module, m1, m2, app])).unwrap();
        let mut parents = g.parents("resource.container.app");
        parents.sort();
        assert_eq!(
            parents,
            vec!["resource.container.db.c", "resource.network.db.n"]
        );
    }

    #[test]
    fn empty_declared_module_is_not_an_error() {
        let module = Resource::new("empty", Module::default());
        let app = container("app", &["module.empty"]);
        let g = Graph::build(&set(vec![module, app])).unwrap();
        assert!(g.parents("resource.container.app").is_empty());
        assert!(Graph::build(&set(vec![container("x", &["module.ghost"])])).is_err());
    }

    #[test]
    fn descendants_are_transitive() {
        let g = Graph::build(&set(vec![
            network("n"),
            container("a", &["network.n"]),
            container("b", &["container.a"]),
            container("other", &[]),
        ]))
        .unwrap();
        let mut d = g.descendants("resource.network.n");
        d.sort();
        assert_eq!(d, vec!["resource.container.a", "resource.container.b"]);
        assert!(g.descendants("resource.container.other").is_empty());
    }

    #[test]
    fn chain_follows_set_order() {
        let g = Graph::chain(&set(vec![container("b", &["container.gone"]), network("a")])).unwrap();
        assert_eq!(g.parents("resource.network.a"), vec!["resource.container.b"]);
        assert_eq!(g.roots(), vec!["resource.container.b"]);
    }
}
