//! Deterministic backend that replays a fixed script, so tests can drive the
//! reasoning loop step by step without a provider.

use super::{protocol, BackendRequest, CallingConvention, ReasoningBackend};
use crate::error::EngineError;
use crate::models::{CapabilityCall, ReasoningStep};
use crate::Result;
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

enum ScriptItem {
    Step(ReasoningStep),
    Error(fn(String) -> EngineError, String),
    Delay(Duration, ReasoningStep),
    Panic(String),
}

/// What the backend saw on one invocation.
#[derive(Debug, Clone)]
pub struct RecordedInvocation {
    pub query: String,
    pub history_len: usize,
    pub convention: CallingConvention,
    /// Transcript entries rendered the way the text protocol feeds them back.
    pub feedback: Vec<String>,
}

pub struct ScriptedBackend {
    script: Mutex<VecDeque<ScriptItem>>,
    repeat: Option<ReasoningStep>,
    step_delay: Option<Duration>,
    conventions: Vec<CallingConvention>,
    invocations: AtomicUsize,
    recorded: Mutex<Vec<RecordedInvocation>>,
}

impl ScriptedBackend {
    pub fn new() -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            repeat: None,
            step_delay: None,
            conventions: vec![CallingConvention::NativeTools, CallingConvention::TextProtocol],
            invocations: AtomicUsize::new(0),
            recorded: Mutex::new(Vec::new()),
        }
    }

    pub fn then_call(self, capability: &str, input: &str) -> Self {
        self.push(ScriptItem::Step(ReasoningStep::CapabilityCall(CapabilityCall::new(
            capability, input,
        ))))
    }

    pub fn then_answer(self, answer: &str) -> Self {
        self.push(ScriptItem::Step(ReasoningStep::FinalAnswer(answer.to_string())))
    }

    /// Malformed provider output.
    pub fn then_protocol_error(self, message: &str) -> Self {
        self.push(ScriptItem::Error(EngineError::BackendProtocol, message.to_string()))
    }

    /// Transport-level provider failure.
    pub fn then_backend_error(self, message: &str) -> Self {
        self.push(ScriptItem::Error(EngineError::Backend, message.to_string()))
    }

    pub fn then_delay(self, delay: Duration, step: ReasoningStep) -> Self {
        self.push(ScriptItem::Delay(delay, step))
    }

    pub fn then_panic(self, message: &str) -> Self {
        self.push(ScriptItem::Panic(message.to_string()))
    }

    /// Step returned forever once the script is exhausted.
    pub fn repeating(mut self, step: ReasoningStep) -> Self {
        self.repeat = Some(step);
        self
    }

    /// Latency added to every invocation.
    pub fn with_step_delay(mut self, delay: Duration) -> Self {
        self.step_delay = Some(delay);
        self
    }

    pub fn with_conventions(mut self, conventions: &[CallingConvention]) -> Self {
        self.conventions = conventions.to_vec();
        self
    }

    pub fn invocations(&self) -> usize {
        self.invocations.load(Ordering::SeqCst)
    }

    pub fn recorded(&self) -> Vec<RecordedInvocation> {
        self.recorded.lock().map(|r| r.clone()).unwrap_or_default()
    }

    fn push(self, item: ScriptItem) -> Self {
        if let Ok(mut script) = self.script.lock() {
            script.push_back(item);
        }
        self
    }

    fn next_item(&self) -> Option<ScriptItem> {
        self.script.lock().ok().and_then(|mut s| s.pop_front())
    }
}

impl Default for ScriptedBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ReasoningBackend for ScriptedBackend {
    fn name(&self) -> &str {
        "scripted"
    }

    fn supports(&self, convention: CallingConvention) -> bool {
        self.conventions.contains(&convention)
    }

    async fn invoke(&self, request: BackendRequest<'_>) -> Result<ReasoningStep> {
        self.invocations.fetch_add(1, Ordering::SeqCst);

        if let Ok(mut recorded) = self.recorded.lock() {
            recorded.push(RecordedInvocation {
                query: request.query.to_string(),
                history_len: request.history.len(),
                convention: request.convention,
                feedback: request.transcript.iter().map(protocol::render_feedback).collect(),
            });
        }

        if let Some(delay) = self.step_delay {
            tokio::time::sleep(delay).await;
        }

        match self.next_item() {
            Some(ScriptItem::Step(step)) => Ok(step),
            Some(ScriptItem::Error(make, message)) => Err(make(message)),
            Some(ScriptItem::Delay(delay, step)) => {
                tokio::time::sleep(delay).await;
                Ok(step)
            }
            Some(ScriptItem::Panic(message)) => panic!("{}", message),
            None => self
                .repeat
                .clone()
                .ok_or_else(|| EngineError::Backend("script exhausted".to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request<'a>() -> BackendRequest<'a> {
        BackendRequest {
            system_prompt: "",
            query: "q",
            history: &[],
            transcript: &[],
            catalog: &[],
            convention: CallingConvention::TextProtocol,
        }
    }

    #[tokio::test]
    async fn test_replays_in_order_then_repeats() {
        let backend = ScriptedBackend::new()
            .then_call("news", "bitcoin")
            .then_protocol_error("bad json")
            .repeating(ReasoningStep::FinalAnswer("again".to_string()));

        assert!(matches!(
            backend.invoke(request()).await,
            Ok(ReasoningStep::CapabilityCall(_))
        ));
        assert!(matches!(
            backend.invoke(request()).await,
            Err(EngineError::BackendProtocol(_))
        ));
        for _ in 0..3 {
            assert_eq!(
                backend.invoke(request()).await.unwrap(),
                ReasoningStep::FinalAnswer("again".to_string())
            );
        }
        assert_eq!(backend.invocations(), 5);
        let recorded = backend.recorded();
        assert_eq!(recorded.len(), 5);
        assert_eq!(recorded[0].query, "q");
        assert_eq!(recorded[0].convention, CallingConvention::TextProtocol);
    }

    #[tokio::test]
    async fn test_step_delay_applies_to_every_invocation() {
        let backend = ScriptedBackend::new()
            .with_step_delay(Duration::from_millis(20))
            .repeating(ReasoningStep::FinalAnswer("slow".to_string()));

        let start = std::time::Instant::now();
        backend.invoke(request()).await.unwrap();
        backend.invoke(request()).await.unwrap();

        assert!(start.elapsed() >= Duration::from_millis(40));
    }

    #[test]
    fn test_exhausted_script_is_backend_error() {
        let backend = ScriptedBackend::new().with_conventions(&[CallingConvention::TextProtocol]);

        assert!(!backend.supports(CallingConvention::NativeTools));
        let result = tokio_test::block_on(backend.invoke(request()));
        assert!(matches!(result, Err(EngineError::Backend(_))));
    }
}
