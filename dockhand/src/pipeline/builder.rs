//! Pipeline builder with validation.

use super::{Pipeline, StageSpec};
use crate::errors::{ContractErrorInfo, CyclicDependencyError, DockhandError, PipelineValidationError};
use std::collections::{HashMap, HashSet};

/// Builder for creating validated pipelines.
///
/// Stages may reference dependencies that are added later; unresolved
/// names and cycles are reported by [`PipelineBuilder::build`].
#[derive(Debug, Clone)]
pub struct PipelineBuilder {
    /// The pipeline name.
    name: String,
    /// The stage specifications.
    stages: HashMap<String, StageSpec>,
    /// Insertion order for stages.
    stage_order: Vec<String>,
}

impl PipelineBuilder {
    /// Creates a new pipeline builder.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            stages: HashMap::new(),
            stage_order: Vec::new(),
        }
    }

    /// Adds a stage to the pipeline.
    ///
    /// # Errors
    ///
    /// Returns an error if the stage is invalid or its name is taken.
    pub fn stage(mut self, spec: StageSpec) -> Result<Self, PipelineValidationError> {
        self.add_stage(spec)?;
        Ok(self)
    }

    /// Adds a stage in place.
    ///
    /// # Errors
    ///
    /// Returns an error if the stage is invalid or its name is taken.
    pub fn add_stage(&mut self, spec: StageSpec) -> Result<(), PipelineValidationError> {
        spec.validate()?;

        if self.stages.contains_key(&spec.name) {
            return Err(PipelineValidationError::new(format!(
                "Stage '{}' is defined more than once",
                spec.name
            ))
            .with_stages(vec![spec.name.clone()])
            .with_error_info(
                ContractErrorInfo::new(
                    "CONTRACT-004-DUPLICATE",
                    format!("Duplicate stage name '{}'", spec.name),
                )
                .with_fix_hint("Stage names must be unique within a pipeline."),
            ));
        }

        self.stage_order.push(spec.name.clone());
        self.stages.insert(spec.name.clone(), spec);
        Ok(())
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

    /// Builds the pipeline.
    ///
    /// # Errors
    ///
    /// Returns [`DockhandError::Validation`] for an empty pipeline or an
    /// unknown dependency, and [`DockhandError::CyclicDependency`] when the
    /// dependency graph has a cycle.
    pub fn build(self) -> Result<Pipeline, DockhandError> {
        if self.stages.is_empty() {
            return Err(PipelineValidationError::new("Pipeline has no stages")
                .with_error_info(
                    ContractErrorInfo::new("CONTRACT-004-EMPTY", "Cannot build an empty pipeline")
                        .with_fix_hint("Add at least one stage to the pipeline before building."),
                )
                .into());
        }

        self.check_dependencies()?;
        self.detect_cycles()?;

        Ok(Pipeline::new(self.name, self.stages, &self.stage_order))
    }

    fn check_dependencies(&self) -> Result<(), PipelineValidationError> {
        for name in &self.stage_order {
            let spec = &self.stages[name];
            for dep in &spec.dependencies {
                if !self.stages.contains_key(dep) {
                    return Err(PipelineValidationError::new(format!(
                        "Stage '{}' depends on unknown stage '{}'",
                        spec.name, dep
                    ))
                    .with_stages(vec![spec.name.clone(), dep.clone()])
                    .with_error_info(
                        ContractErrorInfo::new(
                            "CONTRACT-004-MISSING_DEP",
                            format!("Dependency '{dep}' not found"),
                        )
                        .with_fix_hint("Add the missing stage or fix the dependency name."),
                    ));
                }
            }
        }
        Ok(())
    }

    /// Detects cycles in the dependency graph.
    fn detect_cycles(&self) -> Result<(), CyclicDependencyError> {
        let mut visited = HashSet::new();
        let mut rec_stack = HashSet::new();
        let mut path = Vec::new();

        for name in &self.stage_order {
            if !visited.contains(name) {
                if let Some(cycle) = self.dfs_cycle(name, &mut visited, &mut rec_stack, &mut path) {
                    return Err(CyclicDependencyError::new(cycle));
                }
            }
        }

        Ok(())
    }

    fn dfs_cycle(
        &self,
        node: &str,
        visited: &mut HashSet<String>,
        rec_stack: &mut HashSet<String>,
        path: &mut Vec<String>,
    ) -> Option<Vec<String>> {
        visited.insert(node.to_string());
        rec_stack.insert(node.to_string());
        path.push(node.to_string());

        if let Some(spec) = self.stages.get(node) {
            for dep in &spec.dependencies {
                if !visited.contains(dep) {
                    if let Some(cycle) = self.dfs_cycle(dep, visited, rec_stack, path) {
                        return Some(cycle);
                    }
                } else if rec_stack.contains(dep) {
                    let cycle_start = path.iter().position(|n| n == dep).unwrap_or(0);
                    let mut cycle: Vec<String> = path[cycle_start..].to_vec();
                    cycle.push(dep.clone());
                    return Some(cycle);
                }
            }
        }

        path.pop();
        rec_stack.remove(node);
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stage(name: &str, deps: &[&str]) -> StageSpec {
        StageSpec::new(name, "alpine:3.20").with_dependencies(deps.iter().copied())
    }

    #[test]
    fn test_builder_creation() {
        let builder = PipelineBuilder::new("test");
        assert_eq!(builder.name(), "test");
        assert_eq!(builder.stage_count(), 0);
    }

    #[test]
    fn test_builder_allows_forward_references() {
        let pipeline = PipelineBuilder::new("test")
            .stage(stage("publish", &["build"]))
            .unwrap()
            .stage(stage("build", &[]))
            .unwrap()
            .build()
            .unwrap();

        assert_eq!(pipeline.execution_order(), &["build".to_string(), "publish".to_string()]);
    }

    #[test]
    fn test_builder_missing_dependency() {
        let err = PipelineBuilder::new("test")
            .stage(stage("build", &["missing"]))
            .unwrap()
            .build()
            .unwrap_err();

        match err {
            DockhandError::Validation(e) => assert_eq!(e.code(), Some("CONTRACT-004-MISSING_DEP")),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_builder_duplicate_stage() {
        let err = PipelineBuilder::new("test")
            .stage(stage("build", &[]))
            .unwrap()
            .stage(stage("build", &[]))
            .unwrap_err();

        assert_eq!(err.code(), Some("CONTRACT-004-DUPLICATE"));
    }

    #[test]
    fn test_builder_cycle_detection() {
        let err = PipelineBuilder::new("test")
            .stage(stage("a", &["c"]))
            .unwrap()
            .stage(stage("b", &["a"]))
            .unwrap()
            .stage(stage("c", &["b"]))
            .unwrap()
            .build()
            .unwrap_err();

        match err {
            DockhandError::CyclicDependency(e) => {
                assert_eq!(e.cycle_path.first(), e.cycle_path.last());
                assert_eq!(e.cycle_path.len(), 4);
                assert_eq!(e.error_info.code, "CONTRACT-004-CYCLE");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_builder_two_node_cycle() {
        let err = PipelineBuilder::new("test")
            .stage(stage("build", &["publish"]))
            .unwrap()
            .stage(stage("publish", &["build"]))
            .unwrap()
            .build()
            .unwrap_err();

        assert!(err.to_string().contains("build -> publish -> build"));
    }

    #[test]
    fn test_builder_empty_build() {
        let err = PipelineBuilder::new("test").build().unwrap_err();

        match err {
            DockhandError::Validation(e) => assert_eq!(e.code(), Some("CONTRACT-004-EMPTY")),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_add_stage_in_place() {
        let mut builder = PipelineBuilder::new("test");
        builder.add_stage(stage("lint", &[])).unwrap();
        builder.add_stage(stage("test", &[])).unwrap();

        assert_eq!(builder.stage_count(), 2);
        assert_eq!(builder.build().unwrap().stage_count(), 2);
    }
}
