//! Collapses every query outcome into one [`AnalysisResult`]

use crate::agent::LoopOutcome;
use crate::models::AnalysisResult;
use crate::Result;
use std::fmt::Display;
use tracing::{info, warn};

/// Result for a finished loop run, successful or not.
pub fn normalize(outcome: Result<LoopOutcome>) -> AnalysisResult {
    match outcome {
        Ok(LoopOutcome::Final(report)) => {
            info!(ok = true, "Analysis complete");
            AnalysisResult::success(report)
        }
        Ok(LoopOutcome::IterationExceeded(report)) => {
            info!(ok = true, degraded = true, "Analysis ended before a final answer");
            AnalysisResult::success(report)
        }
        Err(e) => failure(e),
    }
}

/// Result for an engine left without a working orchestration.
pub fn unavailable(reason: &str) -> AnalysisResult {
    warn!(reason = %reason, "Query rejected: orchestration unavailable");
    AnalysisResult::failure(format!(
        "Orchestration unavailable: the analysis agent could not be initialized ({})",
        reason
    ))
}

/// Result for any failure that escaped the loop.
pub fn failure(cause: impl Display) -> AnalysisResult {
    warn!(error = %cause, "Analysis failed");
    AnalysisResult::failure(format!("Analysis failed: {}", cause))
}
