//! Execution backends
//!
//! A backend turns agent and task specs into something executable and runs
//! batches of tasks. The workflow manager only talks to the [`Backend`]
//! trait; concrete engines are chosen by [`BackendFactory`] from a
//! [`BackendKind`].

use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::{ConclaveError, Result};
use crate::types::{AgentHandle, AgentSpec, ExecutionMode, TaskHandle, TaskSpec, WorkflowResult};

pub mod command;
pub mod factory;
pub mod planner;

#[cfg(test)]
pub(crate) mod recording;

pub use command::CommandBackend;
pub use factory::BackendFactory;
pub use planner::PlannerBackend;

/// The execution engines this crate knows how to build
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BackendKind {
    Planner,
    Command,
}

impl BackendKind {
    pub const ALL: [BackendKind; 2] = [BackendKind::Planner, BackendKind::Command];

    pub fn as_str(&self) -> &'static str {
        match self {
            BackendKind::Planner => "planner",
            BackendKind::Command => "command",
        }
    }

    /// Every valid identifier, in declaration order
    pub fn identifiers() -> Vec<&'static str> {
        Self::ALL.iter().map(|k| k.as_str()).collect()
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BackendKind {
    type Err = ConclaveError;

    fn from_str(s: &str) -> Result<Self> {
        let normalized = s.trim().to_ascii_lowercase();
        Self::ALL
            .iter()
            .copied()
            .find(|k| k.as_str() == normalized)
            .ok_or_else(|| {
                ConclaveError::Configuration(format!(
                    "unknown backend '{}'. Valid options are: {}",
                    s,
                    Self::identifiers().join(", ")
                ))
            })
    }
}

/// Capability contract every execution engine satisfies
///
/// Per-task failures inside a batch are reported through the returned
/// [`WorkflowResult`]; only whole-batch faults are returned as errors.
#[async_trait]
pub trait Backend: Send + Sync {
    /// Apply the backend's own config section
    async fn initialize(&mut self, settings: &Value) -> Result<()>;

    async fn create_agent(&mut self, spec: &AgentSpec) -> Result<AgentHandle>;

    /// Fails with [`ConclaveError::AgentNotFound`] if the role has no agent yet
    async fn create_task(&mut self, spec: &TaskSpec) -> Result<TaskHandle>;

    /// Run a batch. The mode actually used is reported as `metadata.mode`.
    async fn execute_workflow(
        &mut self,
        agents: &[AgentHandle],
        tasks: &[TaskHandle],
        mode: ExecutionMode,
    ) -> Result<WorkflowResult>;

    fn supports_parallel(&self) -> bool;

    fn kind(&self) -> BackendKind;

    /// Forget the agents and tasks of a finished run. Handles issued before
    /// a reset are no longer valid.
    async fn reset(&mut self) {}

    async fn cleanup(&mut self) {}
}

/// Deserialize a backend's config section; an absent section means defaults
pub(crate) fn parse_settings<T>(backend: BackendKind, section: &Value) -> Result<T>
where
    T: serde::de::DeserializeOwned + Default,
{
    if section.is_null() {
        return Ok(T::default());
    }

    serde_json::from_value(section.clone()).map_err(|e| {
        ConclaveError::Configuration(format!("invalid '{}' backend section: {}", backend, e))
    })
}

/// Render the text a task is executed with
pub(crate) fn render_prompt(agent: Option<&AgentSpec>, task: &TaskSpec) -> String {
    let mut prompt = String::new();

    if let Some(agent) = agent {
        prompt.push_str(&format!("# {}\n\n{}\n\nGoal: {}\n\n", agent.title, agent.backstory, agent.goal));
    }

    prompt.push_str(&format!("Task: {}\n", task.description));
    prompt.push_str(&format!("Expected Output: {}\n", task.expected_output));

    if !task.context.is_empty() {
        prompt.push_str("\nContext:\n");
        for (key, value) in &task.context {
            match value {
                Value::String(s) => prompt.push_str(&format!("- {}: {}\n", key, s)),
                other => prompt.push_str(&format!("- {}: {}\n", key, other)),
            }
        }
    }

    prompt
}
