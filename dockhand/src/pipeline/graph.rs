//! Validated, topologically ordered pipeline.

use super::StageSpec;
use std::collections::{HashMap, HashSet};

/// A directed acyclic graph of stages.
///
/// Only [`PipelineBuilder`](super::PipelineBuilder) constructs pipelines, so
/// every instance has unique stage names, resolved dependencies and no
/// cycles.
#[derive(Debug, Clone)]
pub struct Pipeline {
    /// The pipeline name.
    name: String,
    /// Stage specifications.
    stages: HashMap<String, StageSpec>,
    /// Execution order (topologically sorted).
    execution_order: Vec<String>,
}

impl Pipeline {
    pub(super) fn new(
        name: String,
        stages: HashMap<String, StageSpec>,
        stage_order: &[String],
    ) -> Self {
        let execution_order = topological_sort(&stages, stage_order);

        Self {
            name,
            stages,
            execution_order,
        }
    }

    /// Returns the pipeline name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the number of stages.
    #[must_use]
    pub fn stage_count(&self) -> usize {
        self.stages.len()
    }

    /// Looks up a stage by name.
    #[must_use]
    pub fn stage(&self, name: &str) -> Option<&StageSpec> {
        self.stages.get(name)
    }

    /// Iterates over stages in execution order.
    pub fn stages(&self) -> impl Iterator<Item = &StageSpec> {
        self.execution_order
            .iter()
            .filter_map(|name| self.stages.get(name))
    }

    /// Returns the execution order.
    ///
    /// Every stage appears after all of its dependencies. Ties are broken by
    /// the order in which stages were added, so the order is stable across
    /// runs.
    #[must_use]
    pub fn execution_order(&self) -> &[String] {
        &self.execution_order
    }

    /// Stages that directly depend on `name`, in execution order.
    #[must_use]
    pub fn dependents(&self, name: &str) -> Vec<&str> {
        self.execution_order
            .iter()
            .filter(|candidate| {
                self.stages
                    .get(*candidate)
                    .is_some_and(|spec| spec.dependencies.contains(name))
            })
            .map(String::as_str)
            .collect()
    }

    /// Groups stages into levels: every stage's dependencies live in earlier
    /// levels, so stages within one level may run concurrently.
    #[must_use]
    pub fn levels(&self) -> Vec<Vec<String>> {
        let mut depth: HashMap<&str, usize> = HashMap::new();
        let mut levels: Vec<Vec<String>> = Vec::new();

        for name in &self.execution_order {
            let level = self.stages[name]
                .dependencies
                .iter()
                .filter_map(|dep| depth.get(dep.as_str()))
                .map(|d| d + 1)
                .max()
                .unwrap_or(0);
            depth.insert(name, level);

            if levels.len() <= level {
                levels.resize_with(level + 1, Vec::new);
            }
            levels[level].push(name.clone());
        }

        levels
    }
}

/// Depth-first topological sort, visiting roots in insertion order.
fn topological_sort(stages: &HashMap<String, StageSpec>, stage_order: &[String]) -> Vec<String> {
    fn visit(
        node: &str,
        stages: &HashMap<String, StageSpec>,
        visited: &mut HashSet<String>,
        result: &mut Vec<String>,
    ) {
        if !visited.insert(node.to_string()) {
            return;
        }

        if let Some(spec) = stages.get(node) {
            for dep in &spec.dependencies {
                visit(dep, stages, visited, result);
            }
        }

        result.push(node.to_string());
    }

    let mut result = Vec::with_capacity(stages.len());
    let mut visited = HashSet::new();

    for name in stage_order {
        visit(name, stages, &mut visited, &mut result);
    }

    result
}
