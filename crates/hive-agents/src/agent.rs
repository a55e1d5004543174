use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use hive_models::agent_message::{AgentKind, AgentRequest, AgentResponse, ChatMessage};
use hive_store::Store;
use tracing::{info, warn};

use crate::error::AgentError;
use crate::registry::AgentRegistry;

/// One analyst role. Mockable for testing.
#[async_trait]
pub trait Agent: Send + Sync {
    fn kind(&self) -> AgentKind;

    async fn analyze(
        &self,
        request: &AgentRequest,
        ctx: &AgentContext,
    ) -> Result<AgentResponse, AgentError>;

    /// Answer a question from another agent. Consulted agents get no
    /// [`AgentContext`], so they cannot consult further.
    async fn handle_consultation(
        &self,
        question: &str,
        from: AgentKind,
        request: &AgentRequest,
    ) -> Result<AgentResponse, AgentError> {
        let _ = (question, from);
        self.analyze(request, &AgentContext::isolated()).await
    }
}

/// Per-call context handed to an agent.
#[derive(Clone, Default)]
pub struct AgentContext {
    desk: Option<Arc<ConsultationDesk>>,
}

impl AgentContext {
    /// No consultation available.
    pub fn isolated() -> Self {
        Self::default()
    }

    pub fn with_desk(desk: Arc<ConsultationDesk>) -> Self {
        Self { desk: Some(desk) }
    }

    pub fn can_consult(&self) -> bool {
        self.desk.is_some()
    }

    /// Ask `to` a question. `None` when consultation is unavailable or the
    /// consulted agent failed; the failure is already on the transcript.
    pub async fn consult(
        &self,
        from: AgentKind,
        to: AgentKind,
        question: &str,
        request: &AgentRequest,
    ) -> Option<AgentResponse> {
        match &self.desk {
            Some(desk) => desk.consult(from, to, question, request).await,
            None => None,
        }
    }
}

/// Writes agent metrics. Store errors are logged, never propagated.
#[derive(Clone, Default)]
pub struct MetricsRecorder {
    store: Option<Arc<Store>>,
}

impl MetricsRecorder {
    pub fn new(store: Arc<Store>) -> Self {
        Self { store: Some(store) }
    }

    pub fn disabled() -> Self {
        Self::default()
    }

    pub fn success(&self, agent: AgentKind, elapsed: Duration) {
        if let Some(store) = &self.store {
            if let Err(e) = store.record_agent_success(agent.name(), elapsed.as_millis() as u64) {
                warn!(agent = %agent, error = %e, "Failed to record agent metric");
            }
        }
    }

    pub fn failure(&self, agent: AgentKind) {
        if let Some(store) = &self.store {
            if let Err(e) = store.record_agent_error(agent.name()) {
                warn!(agent = %agent, error = %e, "Failed to record agent metric");
            }
        }
    }
}

/// Run one agent call under `timeout` and record its metric exactly once.
pub async fn timed_call<F>(
    agent: AgentKind,
    timeout: Duration,
    metrics: &MetricsRecorder,
    call: F,
) -> (Result<AgentResponse, AgentError>, Duration)
where
    F: std::future::Future<Output = Result<AgentResponse, AgentError>>,
{
    let start = Instant::now();
    let result = match tokio::time::timeout(timeout, call).await {
        Ok(result) => result,
        Err(_) => Err(AgentError::Timeout(timeout.as_secs())),
    };
    let elapsed = start.elapsed();
    match &result {
        Ok(_) => metrics.success(agent, elapsed),
        Err(_) => metrics.failure(agent),
    }
    (result, elapsed)
}

/// Routes consultations between agents of one run and keeps the transcript.
pub struct ConsultationDesk {
    registry: Arc<AgentRegistry>,
    metrics: MetricsRecorder,
    timeout: Duration,
    transcript: Mutex<Vec<ChatMessage>>,
}

impl ConsultationDesk {
    pub fn new(registry: Arc<AgentRegistry>, metrics: MetricsRecorder, timeout: Duration) -> Self {
        Self {
            registry,
            metrics,
            timeout,
            transcript: Mutex::new(Vec::new()),
        }
    }

    fn record(&self, message: ChatMessage) {
        self.transcript
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(message);
    }

    pub async fn consult(
        &self,
        from: AgentKind,
        to: AgentKind,
        question: &str,
        request: &AgentRequest,
    ) -> Option<AgentResponse> {
        let Some(target) = self.registry.get(to) else {
            self.record(ChatMessage::Failure {
                agent: to,
                error: AgentError::UnknownAgent(to.name().to_string()).to_string(),
            });
            return None;
        };

        info!(from = %from, to = %to, question, "Consultation requested");
        let (result, elapsed) = timed_call(
            to,
            self.timeout,
            &self.metrics,
            target.handle_consultation(question, from, request),
        )
        .await;

        match result {
            Ok(response) => {
                info!(from = %from, to = %to, elapsed_ms = elapsed.as_millis(), "Consultation answered");
                self.record(ChatMessage::Consultation {
                    from_agent: from,
                    to_agent: to,
                    question: question.to_string(),
                    answer: response.summary.clone(),
                });
                Some(response)
            }
            Err(e) => {
                warn!(from = %from, to = %to, error = %e, elapsed_ms = elapsed.as_millis(), "Consultation failed");
                self.record(ChatMessage::Failure {
                    agent: to,
                    error: e.to_string(),
                });
                None
            }
        }
    }

    /// Drain the messages recorded so far.
    pub fn take_transcript(&self) -> Vec<ChatMessage> {
        std::mem::take(&mut *self.transcript.lock().unwrap_or_else(PoisonError::into_inner))
    }
}
