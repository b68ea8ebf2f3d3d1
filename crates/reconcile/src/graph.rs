//! Dependency graph over manifest ids
//!
//! An edge `a -> b` means `a` references `b`, so `b` must exist first.

use std::collections::{BTreeSet, HashSet};

use indexmap::{IndexMap, IndexSet};

use crate::error::{Error, Result};
use crate::manifest::ManifestSet;
use crate::types::{EntitySpec, ManifestId, RemoteEntity};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DependencyGraph {
    /// Node -> the nodes it depends on, both in insertion order
    nodes: IndexMap<ManifestId, IndexSet<ManifestId>>,
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// One node per manifest, one edge per reference to another manifest.
    pub fn from_manifests(manifests: &ManifestSet) -> Self {
        let mut graph = Self::new();
        for manifest in manifests.iter() {
            graph.add_node(manifest.id.clone());
        }
        for manifest in manifests.iter() {
            graph.add_links(&manifest.id, &manifest.spec);
        }
        graph
    }

    /// Graph over managed remote entities; references leaving the set are
    /// ignored.
    pub fn from_remote(entities: &[&RemoteEntity]) -> Self {
        let mut graph = Self::new();
        for entity in entities {
            if let Some(id) = entity.manifest_id() {
                graph.add_node(id.clone());
            }
        }
        for entity in entities {
            if let Some(id) = entity.manifest_id() {
                graph.add_links(id, &entity.spec);
            }
        }
        graph
    }

    fn add_links(&mut self, from: &ManifestId, spec: &EntitySpec) {
        let targets: Vec<ManifestId> = spec
            .links()
            .filter_map(|(_, target)| target.manifest_id())
            .filter(|target| self.contains(target.as_str()))
            .cloned()
            .collect();
        for target in targets {
            self.add_edge(from, target);
        }
    }

    pub fn add_node(&mut self, id: ManifestId) {
        self.nodes.entry(id).or_default();
    }

    /// Record that `from` depends on `to`, adding either node if missing.
    pub fn add_edge(&mut self, from: &ManifestId, to: ManifestId) {
        self.add_node(to.clone());
        self.nodes.entry(from.clone()).or_default().insert(to);
    }

    pub fn contains(&self, id: &str) -> bool {
        self.nodes.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn nodes(&self) -> impl Iterator<Item = &ManifestId> {
        self.nodes.keys()
    }

    /// Direct dependencies of `id`
    pub fn dependencies(&self, id: &str) -> impl Iterator<Item = &ManifestId> {
        self.nodes.get(id).into_iter().flatten()
    }

    /// Nodes depending directly on `id`, in insertion order
    pub fn dependents(&self, id: &str) -> Vec<&ManifestId> {
        self.nodes
            .iter()
            .filter(|(_, deps)| deps.contains(id))
            .map(|(node, _)| node)
            .collect()
    }

    /// Every node that depends on `id`, directly or not
    pub fn transitive_dependents(&self, id: &str) -> IndexSet<&ManifestId> {
        let mut found = IndexSet::new();
        let mut stack: Vec<&str> = vec![id];
        while let Some(current) = stack.pop() {
            for dependent in self.dependents(current) {
                if dependent.as_str() != id && found.insert(dependent) {
                    stack.push(dependent.as_str());
                }
            }
        }
        found
    }

    /// Kahn's algorithm; among ready nodes the earliest inserted goes first.
    pub fn topological_order(&self) -> Result<Vec<ManifestId>> {
        let count = self.nodes.len();
        let mut remaining: Vec<usize> = self.nodes.values().map(IndexSet::len).collect();
        let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); count];
        for (index, deps) in self.nodes.values().enumerate() {
            for dep in deps {
                if let Some(dep_index) = self.nodes.get_index_of(dep) {
                    dependents[dep_index].push(index);
                }
            }
        }

        let mut ready: BTreeSet<usize> = (0..count).filter(|&i| remaining[i] == 0).collect();
        let mut order = Vec::with_capacity(count);
        while let Some(index) = ready.pop_first() {
            order.push(index);
            for &dependent in &dependents[index] {
                remaining[dependent] -= 1;
                if remaining[dependent] == 0 {
                    ready.insert(dependent);
                }
            }
        }

        if order.len() < count {
            let emitted: HashSet<usize> = order.iter().copied().collect();
            return Err(Error::CyclicDependency {
                cycle: self.find_cycle(&emitted),
            });
        }

        Ok(order
            .into_iter()
            .filter_map(|i| self.nodes.get_index(i).map(|(id, _)| id.clone()))
            .collect())
    }

    /// Walk unemitted nodes until one repeats. Every unemitted node still
    /// has an unemitted dependency, so the walk always closes a cycle.
    fn find_cycle(&self, emitted: &HashSet<usize>) -> Vec<ManifestId> {
        let Some(start) = (0..self.nodes.len()).find(|i| !emitted.contains(i)) else {
            return Vec::new();
        };

        let mut path: Vec<usize> = Vec::new();
        let mut current = start;
        loop {
            if let Some(pos) = path.iter().position(|&i| i == current) {
                let mut cycle: Vec<ManifestId> = path[pos..]
                    .iter()
                    .filter_map(|&i| self.nodes.get_index(i).map(|(id, _)| id.clone()))
                    .collect();
                if let Some(first) = cycle.first().cloned() {
                    cycle.push(first);
                }
                return cycle;
            }
            path.push(current);

            let next = self.nodes[current]
                .iter()
                .filter_map(|dep| self.nodes.get_index_of(dep))
                .find(|i| !emitted.contains(i));
            match next {
                Some(next) => current = next,
                None => return Vec::new(),
            }
        }
    }

    /// Dependency depth of every node: 0 without dependencies, otherwise one
    /// more than the deepest dependency.
    pub fn levels(&self) -> Result<IndexMap<ManifestId, usize>> {
        let order = self.topological_order()?;
        let mut levels: IndexMap<ManifestId, usize> = IndexMap::with_capacity(order.len());
        for id in order {
            let level = self
                .dependencies(id.as_str())
                .filter_map(|dep| levels.get(dep))
                .max()
                .map_or(0, |deepest| deepest + 1);
            levels.insert(id, level);
        }
        Ok(levels)
    }
}
