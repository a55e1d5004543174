use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use hive_models::agent_message::AgentKind;
use hive_models::config::{AgentBackend, AgentSettings, AgentsConfig};
use tracing::info;

use crate::agent::Agent;
use crate::command::CommandConfig;
use crate::error::AgentError;
use crate::macro_analyst::MacroAnalyst;
use crate::prompted::PromptedAgent;
use crate::risk_manager::RiskManager;
use crate::sentiment_analyst::SentimentAnalyst;
use crate::technical_analyst::TechnicalAnalyst;

/// The agents available to one engine, keyed by role.
#[derive(Clone, Default)]
pub struct AgentRegistry {
    agents: HashMap<AgentKind, Arc<dyn Agent>>,
}

impl AgentRegistry {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Rule-based analysts for every role.
    pub fn rule_based(config: &AgentsConfig) -> Self {
        Self::empty()
            .with_agent(Arc::new(MacroAnalyst::new()))
            .with_agent(Arc::new(SentimentAnalyst::new()))
            .with_agent(Arc::new(TechnicalAnalyst::new()))
            .with_agent(Arc::new(RiskManager::new(
                config.consultation_confidence_threshold,
                config.consultation_enabled,
            )))
    }

    /// Rule-based defaults with the per-agent overrides from `config` applied.
    pub fn from_config(config: &AgentsConfig) -> Result<Self, AgentError> {
        let mut registry = Self::rule_based(config);
        for settings in &config.agents {
            let kind = AgentKind::from_key(&settings.agent)
                .ok_or_else(|| AgentError::UnknownAgent(settings.agent.clone()))?;
            if settings.backend == AgentBackend::Command {
                let command = command_config(settings, config.agent_timeout_seconds)?;
                info!(agent = %kind, program = %command.program, "Using command backend");
                registry = registry.with_agent(Arc::new(PromptedAgent::new(kind, command)));
            }
        }
        Ok(registry)
    }

    /// Add or replace the agent for its role.
    pub fn with_agent(mut self, agent: Arc<dyn Agent>) -> Self {
        self.agents.insert(agent.kind(), agent);
        self
    }

    pub fn get(&self, kind: AgentKind) -> Option<Arc<dyn Agent>> {
        self.agents.get(&kind).cloned()
    }

    pub fn len(&self) -> usize {
        self.agents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }
}

fn command_config(settings: &AgentSettings, timeout_seconds: u64) -> Result<CommandConfig, AgentError> {
    let program = settings.program.clone().ok_or_else(|| {
        AgentError::Backend(format!("agent {} uses the command backend without a program", settings.agent))
    })?;
    Ok(CommandConfig {
        program,
        args: settings.args.clone(),
        model: settings.model.clone(),
        timeout: Duration::from_secs(timeout_seconds),
    })
}
