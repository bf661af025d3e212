//! Dependency graph over named steps

use crate::error::PipelineError;
use indexmap::{IndexMap, IndexSet};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap, HashSet};

/// Which declared steps a pipeline materializes
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(from = "SelectionRepr", into = "Vec<String>")]
pub enum Selection {
    /// Every declared step (`*`)
    #[default]
    All,
    /// An explicit list of step names
    Steps(Vec<String>),
}

#[derive(Deserialize)]
#[serde(untagged)]
enum SelectionRepr {
    One(String),
    Many(Vec<String>),
}

impl From<SelectionRepr> for Selection {
    fn from(repr: SelectionRepr) -> Self {
        match repr {
            SelectionRepr::One(name) => Selection::parse([name]),
            SelectionRepr::Many(names) => Selection::parse(names),
        }
    }
}

impl From<Selection> for Vec<String> {
    fn from(selection: Selection) -> Self {
        match selection {
            Selection::All => vec!["*".to_string()],
            Selection::Steps(names) => names,
        }
    }
}

impl Selection {
    /// Build a selection from names; a `*` anywhere selects every step
    pub fn parse<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let names: Vec<String> = names
            .into_iter()
            .map(|name| {
                let name: String = name.into();
                name.trim().to_string()
            })
            .filter(|n| !n.is_empty())
            .collect();

        if names.iter().any(|n| n == "*") {
            Selection::All
        } else {
            Selection::Steps(names)
        }
    }

    pub fn is_all(&self) -> bool {
        matches!(self, Selection::All)
    }
}

/// Mapping from step name to the names it depends on
///
/// Steps keep their declaration order, which is the tie-break for every
/// ordering this graph produces.
#[derive(Debug, Clone, Default)]
pub struct DependencyGraph {
    dependencies: IndexMap<String, IndexSet<String>>,
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a step and its direct prerequisites
    pub fn add_step<I, S>(&mut self, name: impl Into<String>, depends_on: I) -> Result<(), PipelineError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let name = name.into();
        if self.dependencies.contains_key(&name) {
            return Err(PipelineError::DuplicateStep(name));
        }
        let deps = depends_on.into_iter().map(Into::into).collect();
        self.dependencies.insert(name, deps);
        Ok(())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.dependencies.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.dependencies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dependencies.is_empty()
    }

    /// Step names in declaration order
    pub fn steps(&self) -> impl Iterator<Item = &str> {
        self.dependencies.keys().map(String::as_str)
    }

    pub fn dependencies_of(&self, name: &str) -> Option<&IndexSet<String>> {
        self.dependencies.get(name)
    }

    /// Check referential integrity and acyclicity of the whole graph
    pub fn validate(&self) -> Result<(), PipelineError> {
        for (step, deps) in &self.dependencies {
            for dep in deps {
                if !self.dependencies.contains_key(dep) {
                    return Err(PipelineError::UnknownDependency {
                        step: step.clone(),
                        dependency: dep.clone(),
                    });
                }
            }
        }

        match self.find_cycle() {
            Some(cycle) => Err(PipelineError::Cycle { cycle }),
            None => Ok(()),
        }
    }

    /// Find a cycle, returning its path with the first node repeated at the end
    pub fn find_cycle(&self) -> Option<Vec<String>> {
        #[derive(Clone, Copy, PartialEq)]
        enum Mark {
            Visiting,
            Done,
        }

        fn visit<'a>(
            node: &'a str,
            graph: &'a DependencyGraph,
            marks: &mut HashMap<&'a str, Mark>,
            path: &mut Vec<&'a str>,
        ) -> Option<Vec<String>> {
            marks.insert(node, Mark::Visiting);
            path.push(node);

            if let Some(deps) = graph.dependencies.get(node) {
                for dep in deps {
                    match marks.get(dep.as_str()) {
                        Some(Mark::Visiting) => {
                            let start = path.iter().position(|n| *n == dep.as_str())?;
                            let mut cycle: Vec<String> =
                                path[start..].iter().map(|n| n.to_string()).collect();
                            cycle.push(dep.clone());
                            return Some(cycle);
                        }
                        Some(Mark::Done) => {}
                        None => {
                            if let Some(cycle) = visit(dep, graph, marks, path) {
                                return Some(cycle);
                            }
                        }
                    }
                }
            }

            path.pop();
            marks.insert(node, Mark::Done);
            None
        }

        let mut marks = HashMap::new();
        let mut path = Vec::new();
        for name in self.dependencies.keys() {
            if !marks.contains_key(name.as_str()) {
                if let Some(cycle) = visit(name, self, &mut marks, &mut path) {
                    return Some(cycle);
                }
            }
        }
        None
    }

    /// Resolve a selection to concrete step names in declaration order
    pub fn resolve_selection(&self, selection: &Selection) -> Result<Vec<String>, PipelineError> {
        match selection {
            Selection::All => Ok(self.dependencies.keys().cloned().collect()),
            Selection::Steps(names) => {
                let mut indices = BTreeSet::new();
                for name in names {
                    let index = self
                        .dependencies
                        .get_index_of(name)
                        .ok_or_else(|| PipelineError::UnknownStep(name.clone()))?;
                    indices.insert(index);
                }
                Ok(indices
                    .into_iter()
                    .filter_map(|i| self.dependencies.get_index(i).map(|(name, _)| name.clone()))
                    .collect())
            }
        }
    }

    /// Ordering constraints between the selected steps
    ///
    /// A selected step depends on every selected step reachable through its
    /// declared dependencies, looking through unselected steps in between.
    /// Unselected steps are treated as already materialized.
    pub fn induced_dependencies(
        &self,
        selected: &[String],
    ) -> Result<IndexMap<String, Vec<String>>, PipelineError> {
        self.validate()?;

        let members: HashSet<&str> = selected.iter().map(String::as_str).collect();
        let mut induced = IndexMap::new();

        for name in selected {
            let mut found = IndexSet::new();
            let mut seen = HashSet::new();
            let mut stack: Vec<&str> = self
                .dependencies
                .get(name)
                .map(|deps| deps.iter().rev().map(String::as_str).collect())
                .unwrap_or_default();

            while let Some(dep) = stack.pop() {
                if !seen.insert(dep) {
                    continue;
                }
                if members.contains(dep) {
                    found.insert(dep.to_string());
                } else if let Some(next) = self.dependencies.get(dep) {
                    stack.extend(next.iter().rev().map(String::as_str));
                }
            }

            induced.insert(name.clone(), found.into_iter().collect());
        }

        Ok(induced)
    }

    /// Execution order for a selection
    ///
    /// Every selected step appears exactly once and after all of its
    /// dependencies. Steps with no ordering constraint between them keep
    /// declaration order.
    pub fn topological_order(&self, selection: &Selection) -> Result<Vec<String>, PipelineError> {
        let selected = self.resolve_selection(selection)?;
        let induced = self.induced_dependencies(&selected)?;
        Self::order_induced(&induced)
    }

    /// Stable Kahn sort over an already-induced dependency map
    pub(crate) fn order_induced(
        induced: &IndexMap<String, Vec<String>>,
    ) -> Result<Vec<String>, PipelineError> {
        let mut in_degree: Vec<usize> = induced.values().map(Vec::len).collect();
        let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); induced.len()];
        for (index, deps) in induced.values().enumerate() {
            for dep in deps {
                if let Some(dep_index) = induced.get_index_of(dep) {
                    dependents[dep_index].push(index);
                }
            }
        }

        let mut ready: BTreeSet<usize> = in_degree
            .iter()
            .enumerate()
            .filter(|(_, degree)| **degree == 0)
            .map(|(index, _)| index)
            .collect();

        let mut order = Vec::with_capacity(induced.len());
        while let Some(index) = ready.pop_first() {
            if let Some((name, _)) = induced.get_index(index) {
                order.push(name.clone());
            }
            for &dependent in &dependents[index] {
                in_degree[dependent] -= 1;
                if in_degree[dependent] == 0 {
                    ready.insert(dependent);
                }
            }
        }

        if order.len() != induced.len() {
            let remaining: Vec<String> = induced
                .keys()
                .filter(|name| !order.contains(name))
                .cloned()
                .collect();
            return Err(PipelineError::Cycle { cycle: remaining });
        }

        Ok(order)
    }

    /// All steps that transitively depend on `name`, in declaration order
    pub fn downstream_of(&self, name: &str) -> Vec<String> {
        let mut affected: HashSet<&str> = HashSet::new();
        affected.insert(name);

        // Declaration order is not guaranteed to be topological, so sweep
        // until no new dependents are found.
        loop {
            let before = affected.len();
            for (step, deps) in &self.dependencies {
                if !affected.contains(step.as_str()) && deps.iter().any(|d| affected.contains(d.as_str())) {
                    affected.insert(step.as_str());
                }
            }
            if affected.len() == before {
                break;
            }
        }

        self.dependencies
            .keys()
            .filter(|step| step.as_str() != name && affected.contains(step.as_str()))
            .cloned()
            .collect()
    }
}
