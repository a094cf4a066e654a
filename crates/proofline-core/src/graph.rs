//! Dependency graph over tables and APIs.
//!
//! Edges point from a unit to the units it depends on. Dependency inference
//! is heuristic, so the builder never fails: dangling names are dropped and
//! cycles are broken, each with a [`GraphWarning`].
//!
//! Ranks are computed with Kahn's algorithm: a unit with no dependencies is
//! rank 0, otherwise `1 + max(rank of its dependencies)`. Units sharing a
//! rank are independent.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::domain::project::Project;
use crate::domain::unit::{UnitKind, UnitRef};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GraphWarning {
    /// `unit` named a dependency that is not a known unit.
    DanglingDependency { unit: UnitRef, missing: UnitRef },
    /// The edge `from -> to` closed a cycle and was removed.
    CycleBroken { from: UnitRef, to: UnitRef },
}

impl fmt::Display for GraphWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GraphWarning::DanglingDependency { unit, missing } => {
                write!(f, "{unit} depends on unknown {missing}; dropped")
            }
            GraphWarning::CycleBroken { from, to } => {
                write!(f, "dependency cycle broken by removing {from} -> {to}")
            }
        }
    }
}

/// An acyclic dependency graph.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DependencyGraph {
    deps: BTreeMap<UnitRef, BTreeSet<UnitRef>>,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mark {
    Unvisited,
    Active,
    Done,
}

impl DependencyGraph {
    /// Build from `(unit, declared dependencies)` pairs.
    ///
    /// Cycles are broken by a depth-first walk that visits units, and each
    /// unit's dependencies, in `(kind, name)` order; every edge back into
    /// the active path is removed. The result depends only on the input
    /// set, not on its iteration order.
    pub fn build<I>(declared: I) -> (Self, Vec<GraphWarning>)
    where
        I: IntoIterator<Item = (UnitRef, Vec<UnitRef>)>,
    {
        let declared: BTreeMap<UnitRef, Vec<UnitRef>> = declared.into_iter().collect();
        let mut warnings = Vec::new();

        let mut deps: BTreeMap<UnitRef, BTreeSet<UnitRef>> = BTreeMap::new();
        for (unit, wanted) in &declared {
            let mut kept = BTreeSet::new();
            for dep in wanted {
                if !declared.contains_key(dep) {
                    warnings.push(GraphWarning::DanglingDependency {
                        unit: unit.clone(),
                        missing: dep.clone(),
                    });
                } else {
                    kept.insert(dep.clone());
                }
            }
            deps.insert(unit.clone(), kept);
        }

        for (from, to) in find_back_edges(&deps) {
            if let Some(set) = deps.get_mut(&from) {
                set.remove(&to);
            }
            warnings.push(GraphWarning::CycleBroken { from, to });
        }

        (Self { deps }, warnings)
    }

    /// Graph over every unit of `project` and its recorded dependencies.
    pub fn from_project(project: &Project) -> (Self, Vec<GraphWarning>) {
        Self::build(
            project
                .all_units()
                .map(|u| (u.unit_ref(), u.dependencies.clone())),
        )
    }

    pub fn len(&self) -> usize {
        self.deps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.deps.is_empty()
    }

    pub fn contains(&self, unit: &UnitRef) -> bool {
        self.deps.contains_key(unit)
    }

    /// Direct dependencies of `unit` after cleanup.
    pub fn dependencies(&self, unit: &UnitRef) -> impl Iterator<Item = &UnitRef> {
        self.deps.get(unit).into_iter().flatten()
    }

    /// Rank of every unit.
    pub fn ranks(&self) -> BTreeMap<UnitRef, usize> {
        let mut dependents: BTreeMap<&UnitRef, Vec<&UnitRef>> = BTreeMap::new();
        let mut pending: BTreeMap<&UnitRef, usize> = BTreeMap::new();
        for (unit, deps) in &self.deps {
            pending.insert(unit, deps.len());
            for dep in deps {
                dependents.entry(dep).or_default().push(unit);
            }
        }

        let mut ranks: BTreeMap<UnitRef, usize> = BTreeMap::new();
        let mut queue: VecDeque<&UnitRef> = pending
            .iter()
            .filter(|(_, n)| **n == 0)
            .map(|(u, _)| *u)
            .collect();

        while let Some(unit) = queue.pop_front() {
            let rank = self
                .dependencies(unit)
                .filter_map(|d| ranks.get(d))
                .map(|r| r + 1)
                .max()
                .unwrap_or(0);
            ranks.insert(unit.clone(), rank);

            for dependent in dependents.get(unit).into_iter().flatten() {
                if let Some(n) = pending.get_mut(dependent) {
                    *n -= 1;
                    if *n == 0 {
                        queue.push_back(dependent);
                    }
                }
            }
        }
        ranks
    }

    /// Units grouped by rank, rank 0 first, each level sorted.
    pub fn levels(&self) -> Vec<Vec<UnitRef>> {
        let mut levels: Vec<Vec<UnitRef>> = Vec::new();
        for (unit, rank) in self.ranks() {
            if levels.len() <= rank {
                levels.resize_with(rank + 1, Vec::new);
            }
            levels[rank].push(unit);
        }
        levels
    }

    /// [`Self::levels`] restricted to `kinds`, dropping empty levels.
    pub fn levels_for(&self, kinds: &[UnitKind]) -> Vec<Vec<UnitRef>> {
        self.levels()
            .into_iter()
            .map(|level| {
                level
                    .into_iter()
                    .filter(|u| kinds.contains(&u.kind))
                    .collect::<Vec<_>>()
            })
            .filter(|level| !level.is_empty())
            .collect()
    }
}

/// Back edges of a depth-first walk in key order.
fn find_back_edges(deps: &BTreeMap<UnitRef, BTreeSet<UnitRef>>) -> Vec<(UnitRef, UnitRef)> {
    let mut marks: BTreeMap<&UnitRef, Mark> = deps.keys().map(|k| (k, Mark::Unvisited)).collect();
    let mut back_edges = Vec::new();

    for root in deps.keys() {
        if marks.get(root) != Some(&Mark::Unvisited) {
            continue;
        }
        // (node, its sorted dependencies, next index to visit)
        let mut stack: Vec<(&UnitRef, Vec<&UnitRef>, usize)> = Vec::new();
        marks.insert(root, Mark::Active);
        stack.push((root, deps[root].iter().collect(), 0));

        while let Some(top) = stack.last_mut() {
            let node: &UnitRef = top.0;
            let next = top.1.get(top.2).copied();
            top.2 += 1;

            let Some(child) = next else {
                marks.insert(node, Mark::Done);
                stack.pop();
                continue;
            };
            match marks.get(child).copied().unwrap_or(Mark::Done) {
                Mark::Unvisited => {
                    marks.insert(child, Mark::Active);
                    let grandchildren = deps.get(child).into_iter().flatten().collect();
                    stack.push((child, grandchildren, 0));
                }
                Mark::Active => back_edges.push((node.clone(), child.clone())),
                Mark::Done => {}
            }
        }
    }
    back_edges
}
