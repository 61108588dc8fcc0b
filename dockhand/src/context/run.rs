//! Per-run context shared by the runner and its stage tasks.

use crate::events::{EventSink, NoOpEventSink};
use crate::utils::iso_timestamp;
use serde_json::{json, Value};
use std::sync::Arc;
use uuid::Uuid;

/// Identity and event plumbing for a single pipeline run.
#[derive(Clone)]
pub struct RunContext {
    run_id: Uuid,
    pipeline: String,
    event_sink: Arc<dyn EventSink>,
}

impl RunContext {
    /// Creates a context with a fresh run ID.
    #[must_use]
    pub fn new(pipeline: impl Into<String>) -> Self {
        Self {
            run_id: Uuid::now_v7(),
            pipeline: pipeline.into(),
            event_sink: Arc::new(NoOpEventSink),
        }
    }

    /// Sets the event sink.
    #[must_use]
    pub fn with_event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.event_sink = sink;
        self
    }

    /// The run ID.
    #[must_use]
    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    /// The pipeline name.
    #[must_use]
    pub fn pipeline(&self) -> &str {
        &self.pipeline
    }

    /// Emits an event enriched with run identity and a timestamp.
    pub fn emit(&self, event_type: &str, data: Option<Value>) {
        let mut enriched = data.unwrap_or_else(|| json!({}));

        if let Value::Object(ref mut map) = enriched {
            map.insert("run_id".to_string(), json!(self.run_id.to_string()));
            map.insert("pipeline".to_string(), json!(&self.pipeline));
            map.insert("timestamp".to_string(), json!(iso_timestamp()));
        }

        self.event_sink.try_emit(event_type, Some(enriched));
    }

    /// Emits a stage event; `extra` fields are merged into the payload.
    pub fn emit_stage(&self, event_type: &str, stage: &str, extra: Value) {
        let mut data = json!({ "stage": stage });
        if let (Value::Object(map), Value::Object(extra)) = (&mut data, extra) {
            map.extend(extra);
        }
        self.emit(event_type, Some(data));
    }
}

impl std::fmt::Debug for RunContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunContext")
            .field("run_id", &self.run_id)
            .field("pipeline", &self.pipeline)
            .finish_non_exhaustive()
    }
}
