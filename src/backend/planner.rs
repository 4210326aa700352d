//! In-process backend that renders an execution instruction per task

use std::collections::HashMap;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, info};
use uuid::Uuid;

use crate::backend::{parse_settings, render_prompt, Backend, BackendKind};
use crate::catalog::RoleId;
use crate::error::{ConclaveError, Result};
use crate::types::{AgentHandle, AgentSpec, ExecutionMode, TaskHandle, TaskSpec, WorkflowResult};

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PlannerSettings {
    pub parallel_execution: bool,
}

impl Default for PlannerSettings {
    fn default() -> Self {
        Self {
            parallel_execution: true,
        }
    }
}

/// Deterministic backend: every task "runs" by producing its instruction text
#[derive(Debug, Default)]
pub struct PlannerBackend {
    settings: PlannerSettings,
    agents: HashMap<RoleId, (AgentHandle, AgentSpec)>,
    tasks: HashMap<Uuid, TaskSpec>,
}

impl PlannerBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn agent_count(&self) -> usize {
        self.agents.len()
    }

    /// Tasks created but not yet executed
    pub fn task_count(&self) -> usize {
        self.tasks.len()
    }

    fn instruction(&self, task: &TaskSpec) -> String {
        let agent = self.agents.get(&task.role).map(|(_, spec)| spec);
        format!(
            "[Workflow Instruction]\nAgent: @{}\n{}",
            task.role,
            render_prompt(agent, task)
        )
    }
}

#[async_trait]
impl Backend for PlannerBackend {
    async fn initialize(&mut self, settings: &Value) -> Result<()> {
        self.settings = parse_settings(BackendKind::Planner, settings)?;
        self.agents.clear();
        self.tasks.clear();
        debug!(parallel = self.settings.parallel_execution, "Planner backend initialized");
        Ok(())
    }

    async fn create_agent(&mut self, spec: &AgentSpec) -> Result<AgentHandle> {
        let handle = AgentHandle::new(spec.role.clone());
        self.agents.insert(spec.role.clone(), (handle.clone(), spec.clone()));
        debug!(role = %spec.role, "Planner agent registered");
        Ok(handle)
    }

    async fn create_task(&mut self, spec: &TaskSpec) -> Result<TaskHandle> {
        if !self.agents.contains_key(&spec.role) {
            return Err(ConclaveError::AgentNotFound(spec.role.clone()));
        }

        let handle = TaskHandle::new();
        self.tasks.insert(handle.id(), spec.clone());
        Ok(handle)
    }

    async fn execute_workflow(
        &mut self,
        agents: &[AgentHandle],
        tasks: &[TaskHandle],
        mode: ExecutionMode,
    ) -> Result<WorkflowResult> {
        let mode = if mode == ExecutionMode::Parallel && !self.supports_parallel() {
            ExecutionMode::Sequential
        } else {
            mode
        };

        let mut batch = Vec::with_capacity(tasks.len());
        for handle in tasks {
            let task = self
                .tasks
                .remove(&handle.id())
                .ok_or(ConclaveError::UnknownHandle(handle.id()))?;
            batch.push(task);
        }

        let mut result = WorkflowResult::new();
        for task in &batch {
            result
                .outputs
                .insert(task.role.to_string(), Value::String(self.instruction(task)));
        }

        info!(tasks = tasks.len(), mode = %mode, "Planner batch rendered");

        Ok(result
            .with_metadata("backend", json!(BackendKind::Planner.as_str()))
            .with_metadata("agents_count", json!(agents.len()))
            .with_metadata("tasks_count", json!(tasks.len()))
            .with_metadata("mode", json!(mode.as_str())))
    }

    fn supports_parallel(&self) -> bool {
        self.settings.parallel_execution
    }

    fn kind(&self) -> BackendKind {
        BackendKind::Planner
    }

    async fn reset(&mut self) {
        self.agents.clear();
        self.tasks.clear();
    }

    async fn cleanup(&mut self) {
        self.reset().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::Catalog;

    async fn initialized(settings: Value) -> PlannerBackend {
        let mut backend = PlannerBackend::new();
        backend.initialize(&settings).await.unwrap();
        backend
    }

    fn ceo_spec() -> AgentSpec {
        let catalog = Catalog::company();
        AgentSpec::from_role(catalog.get(&RoleId::from("ceo")).unwrap())
    }

    #[tokio::test]
    async fn test_task_requires_agent() {
        let mut backend = initialized(Value::Null).await;
        let task = TaskSpec::new(RoleId::from("ceo"), "Decide", "Decision");

        let err = backend.create_task(&task).await.unwrap_err();
        assert!(matches!(err, ConclaveError::AgentNotFound(ref r) if r.as_str() == "ceo"));
    }

    #[tokio::test]
    async fn test_execute_renders_instructions() {
        let mut backend = initialized(Value::Null).await;
        let agent = backend.create_agent(&ceo_spec()).await.unwrap();
        let task = backend
            .create_task(&TaskSpec::new(RoleId::from("ceo"), "Decide on expansion", "Decision"))
            .await
            .unwrap();

        let result = backend
            .execute_workflow(&[agent], &[task], ExecutionMode::Parallel)
            .await
            .unwrap();

        assert!(result.success);
        assert_eq!(result.mode(), Some("parallel"));
        let text = result.outputs["ceo"].as_str().unwrap();
        assert!(text.contains("Agent: @ceo"));
        assert!(text.contains("Task: Decide on expansion"));
    }

    #[tokio::test]
    async fn test_parallel_downgraded_when_disabled() {
        let mut backend = initialized(json!({ "parallel_execution": false })).await;
        assert!(!backend.supports_parallel());

        let agent = backend.create_agent(&ceo_spec()).await.unwrap();
        let result = backend
            .execute_workflow(&[agent], &[], ExecutionMode::Parallel)
            .await
            .unwrap();
        assert_eq!(result.mode(), Some("sequential"));
    }

    #[tokio::test]
    async fn test_unknown_task_handle() {
        let mut backend = initialized(Value::Null).await;
        let stray = TaskHandle::new();
        let err = backend
            .execute_workflow(&[], &[stray], ExecutionMode::Sequential)
            .await
            .unwrap_err();
        assert!(matches!(err, ConclaveError::UnknownHandle(id) if id == stray.id()));
    }

    #[tokio::test]
    async fn test_malformed_settings() {
        let mut backend = PlannerBackend::new();
        let err = backend
            .initialize(&json!({ "parallel_execution": "sometimes" }))
            .await
            .unwrap_err();
        assert!(matches!(err, ConclaveError::Configuration(_)));
    }

    #[tokio::test]
    async fn test_executed_tasks_are_released() {
        let mut backend = initialized(Value::Null).await;
        let agent = backend.create_agent(&ceo_spec()).await.unwrap();

        for round in 0..3 {
            let task = backend
                .create_task(&TaskSpec::new(RoleId::from("ceo"), format!("Decide {}", round), "Decision"))
                .await
                .unwrap();
            backend
                .execute_workflow(&[agent.clone()], &[task], ExecutionMode::Sequential)
                .await
                .unwrap();
            assert_eq!(backend.task_count(), 0);

            let err = backend
                .execute_workflow(&[agent.clone()], &[task], ExecutionMode::Sequential)
                .await
                .unwrap_err();
            assert!(matches!(err, ConclaveError::UnknownHandle(_)));
        }
    }

    #[tokio::test]
    async fn test_reset_invalidates_previous_agents() {
        let mut backend = initialized(Value::Null).await;
        backend.create_agent(&ceo_spec()).await.unwrap();
        backend.reset().await;

        let err = backend
            .create_task(&TaskSpec::new(RoleId::from("ceo"), "Decide", "Decision"))
            .await
            .unwrap_err();
        assert!(matches!(err, ConclaveError::AgentNotFound(_)));
        assert_eq!(backend.agent_count(), 0);
    }

    #[tokio::test]
    async fn test_cleanup_forgets_agents() {
        let mut backend = initialized(Value::Null).await;
        backend.create_agent(&ceo_spec()).await.unwrap();
        assert_eq!(backend.agent_count(), 1);

        backend.cleanup().await;
        assert_eq!(backend.agent_count(), 0);
    }
}
