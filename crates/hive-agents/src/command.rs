use std::process::Stdio;
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, warn};

use crate::error::AgentError;

/// An external model CLI. The prompt is written to its stdin.
#[derive(Debug, Clone, PartialEq)]
pub struct CommandConfig {
    pub program: String,
    pub args: Vec<String>,
    /// Passed as `--model <model>` when set.
    pub model: Option<String>,
    pub timeout: Duration,
}

impl CommandConfig {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            model: None,
            timeout: Duration::from_secs(45),
        }
    }
}

/// Run the command with the system and user prompts on stdin and return stdout.
pub async fn invoke(
    system_prompt: &str,
    user_prompt: &str,
    config: &CommandConfig,
) -> Result<String, AgentError> {
    debug!(program = %config.program, model = ?config.model, "Invoking agent command");

    let mut command = Command::new(&config.program);
    command
        .args(&config.args)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    if let Some(model) = &config.model {
        command.args(["--model", model]);
    }

    let input = format!("{system_prompt}\n\n{user_prompt}\n");
    let run = async {
        let mut child = command.spawn()?;
        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(input.as_bytes()).await?;
        }
        child.wait_with_output().await
    };

    let output = tokio::time::timeout(config.timeout, run)
        .await
        .map_err(|_| AgentError::Timeout(config.timeout.as_secs()))?
        .map_err(|e| AgentError::Backend(format!("Failed to run {}: {e}", config.program)))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        warn!(program = %config.program, status = %output.status, stderr = %stderr, "Agent command failed");
        return Err(AgentError::Backend(format!(
            "{} exited {}: {}",
            config.program, output.status, stderr
        )));
    }

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    if stdout.trim().is_empty() {
        return Err(AgentError::Backend(format!(
            "{} returned an empty response",
            config.program
        )));
    }
    Ok(stdout)
}

/// Whether `program --version` runs successfully.
pub async fn is_available(program: &str) -> bool {
    match Command::new(program).arg("--version").output().await {
        Ok(output) => output.status.success(),
        Err(_) => false,
    }
}
