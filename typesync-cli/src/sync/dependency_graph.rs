//! Dependency graph logic for ordering module builds
//!
//! This module provides functions to:
//! - Build a dependency graph from the lookups recorded during analysis
//! - Detect cycles and report the full cycle path
//! - Produce a build plan where every dependency precedes its dependents

use log::debug;
use std::collections::{BTreeSet, HashMap};

use crate::definition::ModuleId;

/// Dependency graph over discovered modules
///
/// Nodes keep discovery order. Lookups of names with no discovered module
/// are external references: they are kept for reporting but create no edge.
#[derive(Debug, Clone, Default)]
pub struct DependencyGraph {
    nodes: Vec<ModuleId>,
    /// Adjacency list: node -> nodes it depends on, ascending by discovery index
    dependencies: Vec<Vec<usize>>,
    /// Lookups that target no discovered module
    external: Vec<(ModuleId, ModuleId)>,
}

impl DependencyGraph {
    /// Build the graph from modules in discovery order and their recorded lookups
    pub fn build(modules: &[ModuleId], lookups: &HashMap<ModuleId, BTreeSet<ModuleId>>) -> Self {
        let index: HashMap<ModuleId, usize> = modules
            .iter()
            .enumerate()
            .map(|(i, id)| (id.clone(), i))
            .collect();

        let mut dependencies = vec![Vec::new(); modules.len()];
        let mut external = Vec::new();

        for (from_index, from) in modules.iter().enumerate() {
            let Some(targets) = lookups.get(from) else {
                continue;
            };

            let mut deps: Vec<usize> = Vec::new();
            for target in targets {
                match index.get(target) {
                    Some(&to_index) => deps.push(to_index),
                    None => {
                        debug!("{} references unmanaged {}", from, target);
                        external.push((from.clone(), target.clone()));
                    }
                }
            }
            deps.sort_unstable();
            deps.dedup();
            dependencies[from_index] = deps;
        }

        Self {
            nodes: modules.to_vec(),
            dependencies,
            external,
        }
    }

    /// Lookups of names with no discovered module, as (from, target)
    pub fn external_references(&self) -> &[(ModuleId, ModuleId)] {
        &self.external
    }

    /// Topological sort by depth-first search with three-colour marking
    ///
    /// Roots are visited in discovery order and each node's dependencies in
    /// discovery order, so modules without an ordering constraint between
    /// them keep their relative discovery order.
    pub fn topo_sort(&self) -> Result<BuildPlan, CycleError> {
        let mut marks = vec![Mark::Unvisited; self.nodes.len()];
        let mut stack: Vec<usize> = Vec::new();
        let mut order: Vec<usize> = Vec::with_capacity(self.nodes.len());

        for root in 0..self.nodes.len() {
            if marks[root] == Mark::Unvisited {
                self.visit(root, &mut marks, &mut stack, &mut order)?;
            }
        }

        let dependencies = order
            .iter()
            .map(|&i| {
                let deps = self.dependencies[i]
                    .iter()
                    .map(|&d| self.nodes[d].clone())
                    .collect();
                (self.nodes[i].clone(), deps)
            })
            .collect();

        Ok(BuildPlan {
            order: order.into_iter().map(|i| self.nodes[i].clone()).collect(),
            dependencies,
        })
    }

    fn visit(
        &self,
        node: usize,
        marks: &mut [Mark],
        stack: &mut Vec<usize>,
        order: &mut Vec<usize>,
    ) -> Result<(), CycleError> {
        marks[node] = Mark::InProgress;
        stack.push(node);

        for &dep in &self.dependencies[node] {
            match marks[dep] {
                Mark::Done => {}
                Mark::InProgress => {
                    // Back edge: the cycle runs from `dep` down the stack to `node`
                    let start = stack.iter().position(|&n| n == dep).unwrap_or(0);
                    let mut path: Vec<ModuleId> =
                        stack[start..].iter().map(|&n| self.nodes[n].clone()).collect();
                    path.push(self.nodes[dep].clone());
                    return Err(CycleError { path });
                }
                Mark::Unvisited => self.visit(dep, marks, stack, order)?,
            }
        }

        stack.pop();
        marks[node] = Mark::Done;
        order.push(node);
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mark {
    Unvisited,
    InProgress,
    Done,
}

/// Linear build order consistent with the dependency graph
#[derive(Debug, Clone, Default)]
pub struct BuildPlan {
    order: Vec<ModuleId>,
    dependencies: HashMap<ModuleId, Vec<ModuleId>>,
}

impl BuildPlan {
    pub fn order(&self) -> &[ModuleId] {
        &self.order
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Direct, in-plan dependencies of a module
    pub fn dependencies_of(&self, id: &ModuleId) -> &[ModuleId] {
        self.dependencies.get(id).map(Vec::as_slice).unwrap_or(&[])
    }
}

/// Error when a cycle is detected in the dependency graph
///
/// `path` starts and ends with the same module, e.g. `[A, B, A]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CycleError {
    pub path: Vec<ModuleId>,
}

impl std::fmt::Display for CycleError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let path: Vec<String> = self.path.iter().map(|id| id.to_string()).collect();
        write!(f, "Circular dependency detected: {}", path.join(" -> "))
    }
}

impl std::error::Error for CycleError {}
