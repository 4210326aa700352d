//! Scriptable backend that records every call, for tests

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};
use uuid::Uuid;

use crate::backend::{Backend, BackendKind};
use crate::catalog::RoleId;
use crate::error::{ConclaveError, Result};
use crate::types::{AgentHandle, AgentSpec, ExecutionMode, TaskHandle, TaskSpec, WorkflowResult};

#[derive(Debug, Default)]
pub(crate) struct Calls {
    pub agents: Vec<AgentSpec>,
    pub tasks: Vec<TaskSpec>,
    /// Task ids per executed batch, with the requested mode
    pub batches: Vec<(Vec<String>, ExecutionMode)>,
    pub resets: usize,
    pub cleanups: usize,
}

impl Calls {
    pub fn backend_calls(&self) -> usize {
        self.agents.len() + self.tasks.len() + self.batches.len()
    }

    pub fn task(&self, id: &str) -> Option<&TaskSpec> {
        self.tasks.iter().find(|t| t.id.as_deref() == Some(id))
    }
}

#[derive(Default)]
pub(crate) struct RecordingBackend {
    calls: Arc<Mutex<Calls>>,
    parallel: bool,
    fail_agent: Option<RoleId>,
    fail_task: Option<RoleId>,
    soft_fail: Option<RoleId>,
    fail_batch: bool,
    agents: HashSet<RoleId>,
    tasks: HashMap<Uuid, TaskSpec>,
}

impl RecordingBackend {
    pub fn new(parallel: bool) -> (Self, Arc<Mutex<Calls>>) {
        let backend = Self {
            parallel,
            ..Default::default()
        };
        let calls = Arc::clone(&backend.calls);
        (backend, calls)
    }

    pub fn failing_agent(mut self, role: &str) -> Self {
        self.fail_agent = Some(RoleId::from(role));
        self
    }

    pub fn failing_task(mut self, role: &str) -> Self {
        self.fail_task = Some(RoleId::from(role));
        self
    }

    pub fn soft_failure(mut self, role: &str) -> Self {
        self.soft_fail = Some(RoleId::from(role));
        self
    }

    pub fn failing_batches(mut self) -> Self {
        self.fail_batch = true;
        self
    }
}

#[async_trait]
impl Backend for RecordingBackend {
    async fn initialize(&mut self, _settings: &Value) -> Result<()> {
        Ok(())
    }

    async fn create_agent(&mut self, spec: &AgentSpec) -> Result<AgentHandle> {
        if self.fail_agent.as_ref() == Some(&spec.role) {
            return Err(ConclaveError::AgentCreation(format!("refused {}", spec.role)));
        }
        self.calls.lock().agents.push(spec.clone());
        self.agents.insert(spec.role.clone());
        Ok(AgentHandle::new(spec.role.clone()))
    }

    async fn create_task(&mut self, spec: &TaskSpec) -> Result<TaskHandle> {
        if !self.agents.contains(&spec.role) {
            return Err(ConclaveError::AgentNotFound(spec.role.clone()));
        }
        if self.fail_task.as_ref() == Some(&spec.role) {
            return Err(ConclaveError::TaskCreation(format!("refused task for {}", spec.role)));
        }
        self.calls.lock().tasks.push(spec.clone());
        let handle = TaskHandle::new();
        self.tasks.insert(handle.id(), spec.clone());
        Ok(handle)
    }

    async fn execute_workflow(
        &mut self,
        _agents: &[AgentHandle],
        tasks: &[TaskHandle],
        mode: ExecutionMode,
    ) -> Result<WorkflowResult> {
        if self.fail_batch {
            return Err(ConclaveError::WorkflowExecution("credentials rejected".into()));
        }

        let mut ids = Vec::new();
        let mut result = WorkflowResult::new();
        for handle in tasks {
            let task = self
                .tasks
                .remove(&handle.id())
                .ok_or(ConclaveError::UnknownHandle(handle.id()))?;
            let id = task.id.clone().unwrap_or_default();
            if self.soft_fail.as_ref() == Some(&task.role) {
                result.record_failure(task.role.as_str(), "scripted", "scripted failure");
            } else {
                result
                    .outputs
                    .insert(task.role.to_string(), json!(format!("result of {}", id)));
            }
            ids.push(id);
        }
        self.calls.lock().batches.push((ids, mode));

        let used = if self.parallel { mode } else { ExecutionMode::Sequential };
        Ok(result.with_metadata("mode", json!(used.as_str())))
    }

    fn supports_parallel(&self) -> bool {
        self.parallel
    }

    fn kind(&self) -> BackendKind {
        BackendKind::Planner
    }

    async fn reset(&mut self) {
        self.agents.clear();
        self.tasks.clear();
        self.calls.lock().resets += 1;
    }

    async fn cleanup(&mut self) {
        self.calls.lock().cleanups += 1;
    }
}
