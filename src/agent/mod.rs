//! Reasoning loop driver
//!
//! AWAIT BACKEND → DISPATCH CAPABILITY → AWAIT BACKEND ... → FINAL | ITERATION EXCEEDED
//!
//! One query owns one loop run from start to finish. Everything mutable lives
//! on the stack of [`ReasoningLoop::run`]; the backend and registry are shared
//! read-only.

use crate::backend::{BackendRequest, CallingConvention, ReasoningBackend};
use crate::capabilities::CapabilityRegistry;
use crate::config::AgentSettings;
use crate::error::EngineError;
use crate::models::{
    CapabilitySpec, ConversationTurn, ObservationStatus, ReasoningStep, TranscriptEntry,
};
use crate::Result;
use serde_json::Value;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

pub mod prompt;

/// Failures of the same kind in a row that end a query early.
pub const MAX_CONSECUTIVE_FAILURES: usize = 3;

/// How a query run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoopOutcome {
    Final(String),
    /// Degraded but valid answer: best partial content or a fixed notice.
    IterationExceeded(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum FailureKind {
    BackendProtocol,
    BackendTimeout,
    Capability(ObservationStatus),
}

/// Consecutive failure tracking.
#[derive(Debug, Default)]
struct FailureStreak {
    kind: Option<FailureKind>,
    count: usize,
}

impl FailureStreak {
    fn record(&mut self, kind: FailureKind) -> usize {
        if self.kind.as_ref() == Some(&kind) {
            self.count += 1;
        } else {
            self.kind = Some(kind);
            self.count = 1;
        }
        self.count
    }

    fn reset(&mut self) {
        self.kind = None;
        self.count = 0;
    }
}

/// A backend bound to a capability set under one calling convention.
#[derive(Clone)]
pub struct ReasoningLoop {
    backend: Arc<dyn ReasoningBackend>,
    registry: Arc<CapabilityRegistry>,
    catalog: Arc<Vec<CapabilitySpec>>,
    convention: CallingConvention,
    strategy: &'static str,
    max_iterations: usize,
    step_timeout: Duration,
}

impl ReasoningLoop {
    pub fn new(
        strategy: &'static str,
        backend: Arc<dyn ReasoningBackend>,
        registry: Arc<CapabilityRegistry>,
        convention: CallingConvention,
        settings: &AgentSettings,
    ) -> Self {
        let catalog = Arc::new(registry.catalog());
        Self {
            backend,
            registry,
            catalog,
            convention,
            strategy,
            max_iterations: settings.max_iterations,
            step_timeout: settings.step_timeout,
        }
    }

    /// Name of the strategy that built this loop.
    pub fn strategy(&self) -> &'static str {
        self.strategy
    }

    pub fn convention(&self) -> CallingConvention {
        self.convention
    }

    pub fn max_iterations(&self) -> usize {
        self.max_iterations
    }

    /// Run one query to a terminal state.
    ///
    /// Malformed backend output and backend timeouts are fed back to the
    /// backend as corrections. Any other backend error ends the run with `Err`.
    pub async fn run(
        &self,
        query: &str,
        context: Option<&Value>,
        history: &[ConversationTurn],
    ) -> Result<LoopOutcome> {
        let start_time = Instant::now();
        let system_prompt = prompt::system_prompt(context);
        let mut transcript: Vec<TranscriptEntry> = Vec::new();
        let mut streak = FailureStreak::default();
        let mut last_output: Option<String> = None;
        let mut iterations = 0;

        info!(
            strategy = self.strategy,
            backend = self.backend.name(),
            history_len = history.len(),
            "Reasoning loop: starting query"
        );

        while iterations < self.max_iterations {
            let request = BackendRequest {
                system_prompt: &system_prompt,
                query,
                history,
                transcript: &transcript,
                catalog: &self.catalog,
                convention: self.convention,
            };

            let step = match tokio::time::timeout(self.step_timeout, self.backend.invoke(request)).await {
                Ok(result) => result,
                Err(_) => Err(EngineError::Timeout(self.step_timeout)),
            };

            iterations += 1;

            let call = match step {
                Ok(ReasoningStep::FinalAnswer(answer)) => {
                    info!(
                        iterations,
                        elapsed_ms = start_time.elapsed().as_millis() as u64,
                        "Reasoning loop: final answer"
                    );
                    return Ok(LoopOutcome::Final(answer));
                }
                Ok(ReasoningStep::CapabilityCall(call)) => call,
                Err(e) if e.is_recoverable() => {
                    let kind = if matches!(e, EngineError::Timeout(_)) {
                        FailureKind::BackendTimeout
                    } else {
                        FailureKind::BackendProtocol
                    };
                    warn!(iteration = iterations, error = %e, "Backend step failed, asking for a correction");

                    transcript.push(TranscriptEntry::Correction {
                        raw_error: e.to_string(),
                    });

                    if streak.record(kind) >= MAX_CONSECUTIVE_FAILURES {
                        return Ok(self.incomplete(
                            &format!("{} consecutive backend failures ({})", MAX_CONSECUTIVE_FAILURES, e),
                            last_output.as_deref(),
                        ));
                    }
                    continue;
                }
                Err(e) => return Err(e),
            };

            debug!(
                iteration = iterations,
                capability = %call.capability_name,
                input = %call.capability_input,
                "Dispatching capability"
            );

            if let Some(thought) = call.thought.as_ref().filter(|t| !t.trim().is_empty()) {
                last_output = Some(thought.clone());
            }

            let observation = self
                .registry
                .invoke(&call.capability_name, &call.capability_input)
                .await;

            let failure = match observation.status {
                ObservationStatus::Success => None,
                status => Some(FailureKind::Capability(status)),
            };

            if failure.is_none() {
                last_output = Some(format!(
                    "Last result from {}:\n{}",
                    observation.capability_name, observation.content
                ));
            }

            transcript.push(TranscriptEntry::Exchange { call, observation });

            match failure {
                None => streak.reset(),
                Some(kind) => {
                    if streak.record(kind) >= MAX_CONSECUTIVE_FAILURES {
                        return Ok(self.incomplete(
                            &format!("{} consecutive capability failures", MAX_CONSECUTIVE_FAILURES),
                            last_output.as_deref(),
                        ));
                    }
                }
            }
        }

        warn!(
            max_iterations = self.max_iterations,
            elapsed_ms = start_time.elapsed().as_millis() as u64,
            "Reasoning loop: iteration ceiling reached"
        );

        Ok(self.incomplete(
            &format!(
                "iteration limit of {} reached before a final answer",
                self.max_iterations
            ),
            last_output.as_deref(),
        ))
    }

    fn incomplete(&self, reason: &str, last_output: Option<&str>) -> LoopOutcome {
        let mut report = format!("Analysis incomplete: {}.", reason);
        if let Some(partial) = last_output {
            report.push_str("\n\nPartial findings:\n");
            report.push_str(partial);
        }
        LoopOutcome::IterationExceeded(report)
    }
}
