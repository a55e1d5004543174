use async_trait::async_trait;
use hive_models::agent_message::{AgentKind, AgentRequest, AgentResponse};
use tracing::debug;

use crate::agent::{Agent, AgentContext};
use crate::command::{invoke, CommandConfig};
use crate::error::AgentError;
use crate::parser::parse_agent_response;
use crate::prompts::{consultation_prompt, system_prompt};

/// An agent backed by an external model command: role system prompt plus the
/// JSON request in, one JSON reply out.
pub struct PromptedAgent {
    kind: AgentKind,
    command: CommandConfig,
}

impl PromptedAgent {
    pub fn new(kind: AgentKind, command: CommandConfig) -> Self {
        Self { kind, command }
    }

    async fn ask(&self, system: &str, request: &AgentRequest) -> Result<AgentResponse, AgentError> {
        let user_prompt = serde_json::to_string_pretty(request)?;
        let raw = invoke(system, &user_prompt, &self.command).await?;
        debug!(agent = %self.kind, bytes = raw.len(), "Agent command replied");

        let mut response = parse_agent_response(&raw, request.request_id, self.kind)?;
        if self.kind == AgentKind::Risk && response.verdict.is_none() {
            return Err(AgentError::Parse("RiskManager reply has no verdict".to_string()));
        }
        response.prompt = Some(user_prompt);
        Ok(response)
    }
}

#[async_trait]
impl Agent for PromptedAgent {
    fn kind(&self) -> AgentKind {
        self.kind
    }

    async fn analyze(
        &self,
        request: &AgentRequest,
        _ctx: &AgentContext,
    ) -> Result<AgentResponse, AgentError> {
        self.ask(&system_prompt(self.kind), request).await
    }

    async fn handle_consultation(
        &self,
        question: &str,
        from: AgentKind,
        request: &AgentRequest,
    ) -> Result<AgentResponse, AgentError> {
        self.ask(&consultation_prompt(self.kind, from, question), request)
            .await
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use hive_models::context::{ContextSnapshot, Sentiment};

    fn replying(kind: AgentKind, reply: &str) -> PromptedAgent {
        PromptedAgent::new(
            kind,
            CommandConfig {
                program: "sh".to_string(),
                args: vec!["-c".to_string(), format!("cat >/dev/null; echo '{reply}'")],
                model: None,
                timeout: Duration::from_secs(5),
            },
        )
    }

    #[tokio::test]
    async fn parses_reply_and_keeps_prompt() {
        let agent = replying(
            AgentKind::Sentiment,
            r#"{"confidence": 0.6, "summary": "Bullish on ETF flows", "analysis": {"sentiment_score": 0.5}, "context_update": {"sentiment": "Bullish", "sentiment_score": 0.5}}"#,
        );
        let mut request = AgentRequest::new("alice", ContextSnapshot::default());
        request.signals.headlines = vec!["ETF inflows surge".to_string()];

        let response = agent.analyze(&request, &AgentContext::isolated()).await.unwrap();
        assert_eq!(response.agent, AgentKind::Sentiment);
        assert_eq!(response.request_id, request.request_id);
        assert_eq!(
            response.context_update.unwrap().sentiment,
            Some(Sentiment::Bullish)
        );
        assert!(response.prompt.unwrap().contains("ETF inflows surge"));
    }

    #[tokio::test]
    async fn risk_reply_without_verdict_fails() {
        let agent = replying(AgentKind::Risk, r#"{"confidence": 0.6, "summary": "maybe"}"#);
        let request = AgentRequest::new("alice", ContextSnapshot::default());
        let result = agent.analyze(&request, &AgentContext::isolated()).await;
        assert!(matches!(result, Err(AgentError::Parse(_))));
    }

    #[tokio::test]
    async fn garbage_output_is_parse_error() {
        let agent = replying(AgentKind::Technical, "I cannot help with that");
        let request = AgentRequest::new("alice", ContextSnapshot::default());
        let result = agent.analyze(&request, &AgentContext::isolated()).await;
        assert!(matches!(result, Err(AgentError::Parse(_))));
    }
}
