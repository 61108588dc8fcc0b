//! Dependency-ordered, bounded-parallel pipeline execution.

use super::retry::with_retry;
use super::{Pipeline, StageSpec};
use crate::cancellation::CancellationToken;
use crate::config::RunnerConfig;
use crate::context::RunContext;
use crate::core::{ExecutionResult, PipelineReport, PipelineStatus, StageStatus};
use crate::errors::{DockhandError, StageFailedError};
use crate::events::{types, EventSink, NoOpEventSink};
use crate::executor::StageExecutor;
use crate::secrets::{SecretInjector, SecretStore};
use futures::stream::{FuturesUnordered, StreamExt};
use serde_json::json;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, info_span, warn, Instrument};

/// Runs pipelines on a [`StageExecutor`].
///
/// A stage is dispatched once every dependency has succeeded, with at most
/// `max_parallel` stages in flight. Ready stages are dispatched in
/// execution order, so `max_parallel == 1` runs the pipeline strictly in
/// [`Pipeline::execution_order`]. The first failure halts the run: no new
/// stage starts, in-flight stages are cancelled and their environments torn
/// down.
pub struct PipelineRunner {
    executor: Arc<StageExecutor>,
    config: RunnerConfig,
    event_sink: Arc<dyn EventSink>,
}

impl PipelineRunner {
    /// Creates a runner.
    #[must_use]
    pub fn new(executor: Arc<StageExecutor>, config: RunnerConfig) -> Self {
        Self {
            executor,
            config,
            event_sink: Arc::new(NoOpEventSink),
        }
    }

    /// Sets the sink that receives lifecycle events.
    #[must_use]
    pub fn with_event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.event_sink = sink;
        self
    }

    /// The runner configuration.
    #[must_use]
    pub fn config(&self) -> &RunnerConfig {
        &self.config
    }

    /// Runs every stage of `pipeline` and reports the outcome.
    ///
    /// Failures never escape as errors; they are recorded in the report.
    /// Cancelling `cancel` stops stages that have not started and aborts
    /// the ones in flight.
    pub async fn run(&self, pipeline: &Pipeline, secrets: &SecretStore, cancel: &CancellationToken) -> PipelineReport {
        let ctx = RunContext::new(pipeline.name()).with_event_sink(Arc::clone(&self.event_sink));
        let start = Instant::now();
        let halt = cancel.child_token();
        let max_parallel = self.config.max_parallel.max(1);

        info!(
            pipeline = %pipeline.name(),
            run_id = %ctx.run_id(),
            stages = pipeline.stage_count(),
            max_parallel,
            "Starting pipeline"
        );
        ctx.emit(
            types::PIPELINE_STARTED,
            Some(json!({
                "stages": pipeline.execution_order(),
                "max_parallel": max_parallel,
            })),
        );

        let position: HashMap<&str, usize> = pipeline
            .execution_order()
            .iter()
            .enumerate()
            .map(|(i, name)| (name.as_str(), i))
            .collect();
        let mut waiting_on: HashMap<&str, usize> = pipeline
            .stages()
            .map(|spec| (spec.name.as_str(), spec.dependencies.len()))
            .collect();
        let mut statuses: BTreeMap<String, StageStatus> = pipeline
            .execution_order()
            .iter()
            .map(|name| (name.clone(), StageStatus::Pending))
            .collect();
        let mut ready: BTreeMap<usize, &StageSpec> = pipeline
            .stages()
            .filter(|spec| spec.dependencies.is_empty())
            .map(|spec| (position[spec.name.as_str()], spec))
            .collect();

        let mut in_flight = FuturesUnordered::new();
        let mut results: Vec<ExecutionResult> = Vec::new();
        let mut failure: Option<DockhandError> = None;
        let mut last_completed: Option<String> = None;

        loop {
            while !halt.is_cancelled() && in_flight.len() < max_parallel {
                let Some((_, stage)) = ready.pop_first() else {
                    break;
                };
                statuses.insert(stage.name.clone(), StageStatus::Running);
                let span = info_span!("stage", stage = %stage.name, image = %stage.image);
                in_flight.push(self.run_stage(&ctx, stage, secrets, &halt).instrument(span));
            }

            let Some((name, outcome)) = in_flight.next().await else {
                break;
            };

            match outcome {
                Ok(result) => {
                    statuses.insert(name.to_string(), StageStatus::Succeeded);
                    last_completed = Some(name.to_string());
                    results.push(result);

                    for dependent in pipeline.dependents(name) {
                        if let Some(count) = waiting_on.get_mut(dependent) {
                            *count = count.saturating_sub(1);
                            if *count == 0 {
                                if let Some(spec) = pipeline.stage(dependent) {
                                    ready.insert(position[dependent], spec);
                                }
                            }
                        }
                    }
                }
                Err(DockhandError::Cancelled(_)) => {
                    statuses.insert(name.to_string(), StageStatus::Cancelled);
                }
                Err(e) => {
                    statuses.insert(name.to_string(), StageStatus::Failed);
                    if failure.is_none() {
                        halt.cancel(format!("stage '{name}' failed"));
                        failure = Some(e);
                    }
                }
            }
        }

        for status in statuses.values_mut() {
            if *status == StageStatus::Pending {
                *status = StageStatus::NotRun;
            }
        }

        let duration = start.elapsed();
        let duration_ms = duration.as_secs_f64() * 1000.0;

        let (status, failure) = match failure {
            Some(e) => (PipelineStatus::Failed, Some(e)),
            None if statuses.values().all(|s| *s == StageStatus::Succeeded) => (PipelineStatus::Succeeded, None),
            None => {
                let reason = cancel.reason().unwrap_or_else(|| "cancelled".to_string());
                (PipelineStatus::Cancelled, Some(DockhandError::Cancelled(reason)))
            }
        };

        match (&status, &failure) {
            (PipelineStatus::Succeeded, _) => {
                info!(pipeline = %pipeline.name(), duration_ms, "Pipeline completed");
                ctx.emit(types::PIPELINE_COMPLETED, Some(json!({ "duration_ms": duration_ms })));
            }
            (PipelineStatus::Failed, Some(e)) => {
                warn!(
                    pipeline = %pipeline.name(),
                    failed_stage = e.stage().unwrap_or(""),
                    error = %e,
                    duration_ms,
                    "Pipeline failed"
                );
                ctx.emit(
                    types::PIPELINE_FAILED,
                    Some(json!({
                        "failed_stage": e.stage(),
                        "exit_code": e.exit_code(),
                        "error": e.to_string(),
                        "last_completed_stage": last_completed,
                        "duration_ms": duration_ms,
                    })),
                );
            }
            (_, e) => {
                let reason = e.as_ref().map(ToString::to_string);
                warn!(pipeline = %pipeline.name(), reason = reason.as_deref().unwrap_or(""), "Pipeline cancelled");
                ctx.emit(
                    types::PIPELINE_CANCELLED,
                    Some(json!({ "reason": cancel.reason(), "duration_ms": duration_ms })),
                );
            }
        }

        PipelineReport {
            pipeline: pipeline.name().to_string(),
            run_id: ctx.run_id(),
            status,
            results,
            stages: statuses,
            failed_stage: failure.as_ref().and_then(|e| e.stage().map(str::to_string)),
            exit_code: failure.as_ref().and_then(DockhandError::exit_code),
            last_completed_stage: last_completed,
            error: failure.as_ref().map(ToString::to_string),
            duration,
            failure,
        }
    }

    /// Runs the pipeline and converts a failed or cancelled report into its
    /// error.
    ///
    /// # Errors
    ///
    /// Returns the first stage failure, or [`DockhandError::Cancelled`].
    pub async fn run_to_completion(
        &self,
        pipeline: &Pipeline,
        secrets: &SecretStore,
        cancel: &CancellationToken,
    ) -> Result<PipelineReport, DockhandError> {
        self.run(pipeline, secrets, cancel).await.into_result()
    }

    async fn run_stage<'a>(
        &'a self,
        ctx: &'a RunContext,
        stage: &'a StageSpec,
        secrets: &'a SecretStore,
        halt: &'a CancellationToken,
    ) -> (&'a str, Result<ExecutionResult, DockhandError>) {
        let timeout = stage.timeout.unwrap_or(self.config.stage_timeout);
        info!(timeout_secs = timeout.as_secs(), "Starting stage");
        ctx.emit_stage(types::STAGE_STARTED, &stage.name, json!({ "image": stage.image }));

        let outcome = match SecretInjector::bind(stage, secrets) {
            Err(e) => Err(DockhandError::from(e)),
            Ok(bindings) => {
                with_retry(
                    &self.config.retry,
                    DockhandError::is_transient,
                    |attempt, delay, error| {
                        let delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
                        warn!(attempt, delay_ms, error = %error, "Environment setup failed, retrying");
                        ctx.emit_stage(
                            types::STAGE_RETRYING,
                            &stage.name,
                            json!({ "attempt": attempt, "delay_ms": delay_ms, "error": error.to_string() }),
                        );
                    },
                    || self.executor.execute(stage, &bindings, halt, timeout),
                )
                .await
            }
        };

        let outcome = outcome.map_err(|e| match e {
            DockhandError::CommandExecution(e) => StageFailedError::from(e).into(),
            other => other,
        });

        match &outcome {
            Ok(result) => {
                info!(duration_ms = result.duration().as_secs_f64() * 1000.0, "Stage completed");
                ctx.emit_stage(
                    types::STAGE_COMPLETED,
                    &stage.name,
                    json!({
                        "exit_code": result.exit_code(),
                        "duration_ms": result.duration().as_secs_f64() * 1000.0,
                        "artifacts": result.artifacts().len(),
                    }),
                );
            }
            Err(DockhandError::Cancelled(reason)) => {
                info!(%reason, "Stage cancelled");
                ctx.emit_stage(types::STAGE_CANCELLED, &stage.name, json!({ "reason": reason }));
            }
            Err(e) => {
                if let DockhandError::StageFailed(failed) = e {
                    warn!(exit_code = failed.exit_code, output_tail = %failed.output_tail, "Stage failed");
                } else {
                    warn!(error = %e, "Stage failed");
                }
                ctx.emit_stage(
                    types::STAGE_FAILED,
                    &stage.name,
                    json!({ "kind": e.kind(), "exit_code": e.exit_code(), "error": e.to_string() }),
                );
            }
        }

        (stage.name.as_str(), outcome)
    }
}

impl std::fmt::Debug for PipelineRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineRunner")
            .field("executor", &self.executor)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifacts::ArtifactStore;
    use crate::events::CollectingEventSink;
    use crate::pipeline::{OutputSpec, PipelineBuilder, RetryConfig};
    use crate::testing::{assert_failed_at, assert_stage_status, MockRuntime};
    use pretty_assertions::assert_eq;
    use std::time::Duration;

    struct Harness {
        runtime: Arc<MockRuntime>,
        events: Arc<CollectingEventSink>,
        runner: PipelineRunner,
        _root: tempfile::TempDir,
    }

    fn harness(runtime: MockRuntime, max_parallel: usize) -> Harness {
        let runtime = Arc::new(runtime);
        let root = tempfile::tempdir().unwrap();
        let store = Arc::new(ArtifactStore::new(root.path()));
        let executor = Arc::new(StageExecutor::new(runtime.clone(), store));
        let events = Arc::new(CollectingEventSink::new());
        let config = RunnerConfig::default()
            .with_max_parallel(max_parallel)
            .with_retry(RetryConfig::new().with_base_delay_ms(1).with_max_delay_ms(5));
        let runner = PipelineRunner::new(executor, config).with_event_sink(events.clone());
        Harness {
            runtime,
            events,
            runner,
            _root: root,
        }
    }

    fn stage(name: &str, deps: &[&str]) -> StageSpec {
        StageSpec::new(name, "alpine:3.20")
            .with_dependencies(deps.iter().copied())
            .with_command(format!("run-{name}"))
    }

    fn build(stages: Vec<StageSpec>) -> Pipeline {
        let mut builder = PipelineBuilder::new("ci");
        for spec in stages {
            builder.add_stage(spec).unwrap();
        }
        builder.build().unwrap()
    }

    #[tokio::test]
    async fn test_sequential_runs_in_execution_order() {
        let h = harness(MockRuntime::new(), 1);
        let pipeline = build(vec![
            stage("publish", &["build", "test"]),
            stage("build", &["fetch"]),
            stage("test", &["fetch"]),
            stage("fetch", &[]),
        ]);

        let report = h.runner.run(&pipeline, &SecretStore::new(), &CancellationToken::new()).await;

        assert!(report.is_success());
        assert_eq!(h.runtime.prepared_stages(), pipeline.execution_order().to_vec());
        assert_eq!(h.runtime.max_concurrency(), 1);
        assert_eq!(report.results.len(), 4);
        assert_eq!(report.last_completed_stage.as_deref(), Some("publish"));
    }

    #[tokio::test]
    async fn test_failure_halts_dependents() {
        let h = harness(MockRuntime::new().on_command("run-build", 1, "compile error"), 4);
        let pipeline = build(vec![stage("build", &[]), stage("publish", &["build"])]);

        let report = h.runner.run(&pipeline, &SecretStore::new(), &CancellationToken::new()).await;

        assert_eq!(report.status, PipelineStatus::Failed);
        assert_failed_at(&report, "build");
        assert_eq!(report.exit_code, Some(1));
        assert_stage_status(&report, "publish", StageStatus::NotRun);
        assert!(h.runtime.commands_for("publish").is_empty());
        assert!(matches!(report.failure(), Some(DockhandError::StageFailed(e)) if e.output_tail.contains("compile error")));
        assert_eq!(h.events.stages_for(types::STAGE_FAILED), vec!["build".to_string()]);
        assert_eq!(h.events.events_of_type(types::PIPELINE_FAILED).len(), 1);
    }

    #[tokio::test]
    async fn test_independent_stages_run_concurrently() {
        let runtime = MockRuntime::new()
            .with_delay("run-lint", Duration::from_millis(100))
            .with_delay("run-test", Duration::from_millis(100));
        let h = harness(runtime, 4);
        let pipeline = build(vec![stage("lint", &[]), stage("test", &[])]);

        let report = h.runner.run(&pipeline, &SecretStore::new(), &CancellationToken::new()).await;

        assert!(report.is_success());
        assert_eq!(h.runtime.max_concurrency(), 2);
    }

    #[tokio::test]
    async fn test_parallelism_is_bounded() {
        let mut runtime = MockRuntime::new();
        let mut stages = Vec::new();
        for i in 0..6 {
            let name = format!("s{i}");
            runtime = runtime.with_delay(format!("run-{name}"), Duration::from_millis(30));
            stages.push(stage(&name, &[]));
        }
        let h = harness(runtime, 2);

        let report = h.runner.run(&build(stages), &SecretStore::new(), &CancellationToken::new()).await;

        assert!(report.is_success());
        assert_eq!(h.runtime.max_concurrency(), 2);
    }

    #[tokio::test]
    async fn test_failure_cancels_in_flight_stages() {
        let runtime = MockRuntime::new()
            .on_command("run-lint", 3, "")
            .with_delay("run-test", Duration::from_secs(10));
        let h = harness(runtime, 4);
        let pipeline = build(vec![stage("lint", &[]), stage("test", &[])]);

        let started = Instant::now();
        let report = h.runner.run(&pipeline, &SecretStore::new(), &CancellationToken::new()).await;

        assert!(started.elapsed() < Duration::from_secs(5));
        assert_failed_at(&report, "lint");
        assert_stage_status(&report, "test", StageStatus::Cancelled);
        assert_eq!(h.runtime.live_environments(), 0);
    }

    #[tokio::test]
    async fn test_missing_secret_fails_stage_before_setup() {
        let h = harness(MockRuntime::new(), 1);
        let pipeline = build(vec![stage("publish", &[]).with_secret("registry_token", "TOKEN")]);

        let report = h.runner.run(&pipeline, &SecretStore::new(), &CancellationToken::new()).await;

        assert_failed_at(&report, "publish");
        assert_eq!(report.failure().map(DockhandError::kind), Some("missing_secret"));
        assert!(h.runtime.prepared_stages().is_empty());
    }

    #[tokio::test]
    async fn test_transient_setup_failure_is_retried() {
        let h = harness(MockRuntime::new().fail_setup("build", true, 2), 1);
        let pipeline = build(vec![stage("build", &[])]);

        let report = h.runner.run(&pipeline, &SecretStore::new(), &CancellationToken::new()).await;

        assert!(report.is_success());
        assert_eq!(h.events.stages_for(types::STAGE_RETRYING).len(), 2);
    }

    #[tokio::test]
    async fn test_permanent_setup_failure_is_not_retried() {
        let h = harness(MockRuntime::new().fail_setup("build", false, 1), 1);
        let pipeline = build(vec![stage("build", &[])]);

        let report = h.runner.run(&pipeline, &SecretStore::new(), &CancellationToken::new()).await;

        assert_failed_at(&report, "build");
        assert!(h.events.stages_for(types::STAGE_RETRYING).is_empty());
        assert_eq!(report.exit_code, None);
    }

    #[tokio::test]
    async fn test_stage_timeout_overrides_default() {
        let runtime = MockRuntime::new().with_delay("run-slow", Duration::from_secs(10));
        let h = harness(runtime, 1);
        let pipeline = build(vec![stage("slow", &[]).with_timeout(Duration::from_millis(50))]);

        let report = h.runner.run(&pipeline, &SecretStore::new(), &CancellationToken::new()).await;

        assert_failed_at(&report, "slow");
        assert_eq!(report.failure().map(DockhandError::kind), Some("stage_timeout"));
    }

    #[tokio::test]
    async fn test_external_cancellation() {
        let runtime = MockRuntime::new().with_delay("run-build", Duration::from_secs(10));
        let h = harness(runtime, 1);
        let pipeline = build(vec![stage("build", &[]), stage("publish", &["build"])]);
        let cancel = CancellationToken::new();

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(30)).await;
            trigger.cancel("interrupted");
        });

        let report = h.runner.run(&pipeline, &SecretStore::new(), &cancel).await;

        assert_eq!(report.status, PipelineStatus::Cancelled);
        assert_stage_status(&report, "build", StageStatus::Cancelled);
        assert_stage_status(&report, "publish", StageStatus::NotRun);
        assert_eq!(report.error.as_deref(), Some("Pipeline cancelled: interrupted"));
        assert_eq!(h.events.events_of_type(types::PIPELINE_CANCELLED).len(), 1);
        assert!(h.runner.run_to_completion(&pipeline, &SecretStore::new(), &cancel).await.is_err());
    }

    #[tokio::test]
    async fn test_event_sequence_for_single_stage() {
        let h = harness(MockRuntime::new().produces("build", "/workspace/dist"), 1);
        let pipeline = build(vec![stage("build", &[]).with_output(OutputSpec::new("/workspace/dist"))]);

        let report = h
            .runner
            .run_to_completion(&pipeline, &SecretStore::new(), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(
            h.events.event_types(),
            vec![
                types::PIPELINE_STARTED.to_string(),
                types::STAGE_STARTED.to_string(),
                types::STAGE_COMPLETED.to_string(),
                types::PIPELINE_COMPLETED.to_string(),
            ]
        );
        assert!(report.result("build").unwrap().output_location().is_some());
        let run_id = report.run_id.to_string();
        assert!(h
            .events
            .events()
            .iter()
            .all(|(_, data)| data.as_ref().unwrap()["run_id"] == run_id.as_str()));
    }
}
