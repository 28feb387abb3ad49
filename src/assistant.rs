//! Assistant collaborator interface
//!
//! `execute` talks to the underlying coding assistant through this seam.
//! The real binding shells out to a configured command; tests use the
//! scripted implementation to get deterministic outcomes.

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, warn};

use crate::config::AssistantConfig;
use crate::ledger::Outcome;

/// What came back from one assistant invocation
#[derive(Debug, Clone)]
pub struct AssistantResult {
    pub outcome: Outcome,
    pub raw_output: String,
}

/// The external coding assistant, seen only at its interface
#[async_trait]
pub trait Assistant: Send + Sync {
    /// Run one task under the given prompt text
    async fn run(&self, prompt_text: &str, task: &str) -> Result<AssistantResult>;
}

/// Subprocess-backed assistant
///
/// Invokes the configured command with the prompt in `SELDON_PROMPT` and the
/// task as the final argument. Exit 0 is Success, non-zero is Failure with
/// the first stderr line as the error signature, timeout is Partial.
pub struct CommandAssistant {
    config: AssistantConfig,
}

impl CommandAssistant {
    pub fn new(config: AssistantConfig) -> Self {
        Self { config }
    }

    fn classify(status_success: bool, stdout: &str, stderr: &str) -> Outcome {
        if status_success {
            return Outcome::Success;
        }
        let signature = stderr
            .lines()
            .chain(stdout.lines())
            .map(str::trim)
            .find(|l| !l.is_empty())
            .unwrap_or("assistant exited non-zero")
            .to_string();
        Outcome::Failure {
            error_signature: signature,
        }
    }
}

#[async_trait]
impl Assistant for CommandAssistant {
    async fn run(&self, prompt_text: &str, task: &str) -> Result<AssistantResult> {
        let mut command = Command::new(&self.config.command);
        command
            .args(&self.config.args)
            .arg(task)
            .env("SELDON_PROMPT", prompt_text)
            .kill_on_drop(true);

        debug!("Invoking assistant: {} ({} args)", self.config.command, self.config.args.len());

        let timeout = Duration::from_secs(self.config.timeout_secs);
        let output = match tokio::time::timeout(timeout, command.output()).await {
            Ok(output) => output
                .with_context(|| format!("Failed to spawn '{}'", self.config.command))?,
            Err(_) => {
                warn!(
                    "Assistant timed out after {}s, recording partial outcome",
                    self.config.timeout_secs
                );
                return Ok(AssistantResult {
                    outcome: Outcome::Partial,
                    raw_output: format!("timed out after {}s", self.config.timeout_secs),
                });
            }
        };

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
        let outcome = Self::classify(output.status.success(), &stdout, &stderr);

        let raw_output = if stderr.trim().is_empty() {
            stdout
        } else {
            format!("{stdout}\n{stderr}")
        };

        Ok(AssistantResult { outcome, raw_output })
    }
}

/// Deterministic assistant for tests: replays a fixed outcome per call
pub struct ScriptedAssistant {
    outcomes: std::sync::Mutex<std::collections::VecDeque<AssistantResult>>,
}

impl ScriptedAssistant {
    pub fn new(outcomes: Vec<AssistantResult>) -> Self {
        Self {
            outcomes: std::sync::Mutex::new(outcomes.into()),
        }
    }

    /// Convenience constructor from bare outcomes
    pub fn from_outcomes(outcomes: Vec<Outcome>) -> Self {
        Self::new(
            outcomes
                .into_iter()
                .map(|outcome| AssistantResult {
                    outcome,
                    raw_output: String::new(),
                })
                .collect(),
        )
    }
}

#[async_trait]
impl Assistant for ScriptedAssistant {
    async fn run(&self, _prompt_text: &str, _task: &str) -> Result<AssistantResult> {
        self.outcomes
            .lock()
            .expect("scripted assistant lock poisoned")
            .pop_front()
            .context("Scripted assistant ran out of outcomes")
    }
}

/// Truncate to a char boundary with ellipsis, for ledger excerpts
pub fn excerpt(raw: &str, max_len: usize) -> String {
    let trimmed = raw.trim();
    if trimmed.chars().count() <= max_len {
        return trimmed.to_string();
    }
    let cut: String = trimmed.chars().take(max_len.saturating_sub(3)).collect();
    format!("{cut}...")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_success() {
        assert_eq!(
            CommandAssistant::classify(true, "done", ""),
            Outcome::Success
        );
    }

    #[test]
    fn test_classify_failure_takes_first_stderr_line() {
        let outcome = CommandAssistant::classify(false, "partial work", "timeout\ndetails");
        assert_eq!(
            outcome,
            Outcome::Failure {
                error_signature: "timeout".to_string()
            }
        );
    }

    #[test]
    fn test_classify_failure_falls_back_to_stdout() {
        let outcome = CommandAssistant::classify(false, "error: missing await", "");
        assert_eq!(
            outcome,
            Outcome::Failure {
                error_signature: "error: missing await".to_string()
            }
        );
    }

    #[test]
    fn test_excerpt_truncates_on_char_boundary() {
        assert_eq!(excerpt("short", 10), "short");
        assert_eq!(excerpt("0123456789abcdef", 10), "0123456...");
    }

    #[tokio::test]
    async fn test_scripted_assistant_replays_in_order() {
        let assistant = ScriptedAssistant::from_outcomes(vec![
            Outcome::Failure {
                error_signature: "timeout".to_string(),
            },
            Outcome::Success,
        ]);
        let first = assistant.run("prompt", "task").await.unwrap();
        assert!(first.outcome.is_failure());
        let second = assistant.run("prompt", "task").await.unwrap();
        assert!(second.outcome.is_success());
        assert!(assistant.run("prompt", "task").await.is_err());
    }
}
