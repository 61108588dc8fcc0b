//! Assertions over pipeline reports.

use crate::core::{PipelineReport, StageStatus};
use crate::errors::DockhandError;

/// Asserts that every stage of the run succeeded.
pub fn assert_pipeline_succeeded(report: &PipelineReport) {
    assert!(
        report.is_success(),
        "Expected pipeline '{}' to succeed, got {:?}: {}",
        report.pipeline,
        report.status,
        report.error.as_deref().unwrap_or("no error")
    );
}

/// Asserts that the run halted because of `stage`.
pub fn assert_failed_at(report: &PipelineReport, stage: &str) {
    assert_eq!(
        report.failed_stage.as_deref(),
        Some(stage),
        "Expected failure at '{stage}', got {:?} (status {:?})",
        report.failed_stage,
        report.status
    );
}

/// Asserts the final status of a stage.
pub fn assert_stage_status(report: &PipelineReport, stage: &str, expected: StageStatus) {
    assert_eq!(
        report.stage_status(stage),
        Some(expected),
        "Expected stage '{stage}' to be {expected}, got {:?}",
        report.stage_status(stage)
    );
}

/// Asserts that `secret` appears in no stage output or error message.
pub fn assert_no_secret_leak(report: &PipelineReport, secret: &str) {
    for result in &report.results {
        assert!(
            !result.output().contains(secret),
            "Secret leaked into output of stage '{}'",
            result.stage()
        );
    }
    if let Some(error) = &report.error {
        assert!(!error.contains(secret), "Secret leaked into error message");
    }
    if let Some(DockhandError::StageFailed(failed)) = report.failure() {
        assert!(
            !failed.output_tail.contains(secret),
            "Secret leaked into output tail of stage '{}'",
            failed.stage
        );
    }
}
