//! Backend that runs an external program once per task
//!
//! The task prompt is written to the program's stdin and whatever it prints
//! on stdout becomes the task output. A non-zero exit is a soft failure of
//! that task only.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use futures::future::{BoxFuture, FutureExt};
use futures::stream::{self, StreamExt};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::backend::{parse_settings, render_prompt, Backend, BackendKind};
use crate::catalog::RoleId;
use crate::error::{ConclaveError, Result};
use crate::types::{AgentHandle, AgentSpec, ExecutionMode, TaskHandle, TaskSpec, WorkflowResult};

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CommandSettings {
    /// Program name (looked up on `PATH`) or path
    pub program: Option<String>,
    pub args: Vec<String>,
    /// Environment variable that must hold a credential before a batch runs
    pub api_key_env: Option<String>,
    pub parallel_execution: bool,
    pub max_parallel_tasks: usize,
}

impl Default for CommandSettings {
    fn default() -> Self {
        Self {
            program: None,
            args: Vec::new(),
            api_key_env: None,
            parallel_execution: true,
            max_parallel_tasks: 5,
        }
    }
}

impl CommandSettings {
    pub fn from_section(section: &Value) -> Result<Self> {
        parse_settings(BackendKind::Command, section)
    }

    /// Locate the configured program
    pub fn probe(&self) -> Result<PathBuf> {
        let program = self.program.as_deref().ok_or_else(|| {
            ConclaveError::Configuration("the 'command' backend requires 'command.program'".into())
        })?;

        resolve_program(program).ok_or_else(|| ConclaveError::BackendNotAvailable {
            backend: BackendKind::Command.to_string(),
            reason: format!("program '{}' was not found", program),
            hint: "Install it or point 'command.program' at an executable path.".into(),
        })
    }
}

fn resolve_program(program: &str) -> Option<PathBuf> {
    let candidate = Path::new(program);
    if candidate.components().count() > 1 {
        return candidate.is_file().then(|| candidate.to_path_buf());
    }

    let paths = std::env::var_os("PATH")?;
    std::env::split_paths(&paths)
        .map(|dir| dir.join(program))
        .find(|path| path.is_file())
}

struct Job {
    producer: String,
    role: RoleId,
    prompt: String,
}

#[derive(Debug, Default)]
pub struct CommandBackend {
    settings: CommandSettings,
    program: Option<PathBuf>,
    agents: HashMap<RoleId, (AgentHandle, AgentSpec)>,
    tasks: HashMap<Uuid, TaskSpec>,
}

impl CommandBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Tasks created but not yet executed
    pub fn task_count(&self) -> usize {
        self.tasks.len()
    }

    fn check_credentials(&self) -> Result<()> {
        if let Some(var) = &self.settings.api_key_env {
            let present = std::env::var(var).map(|v| !v.is_empty()).unwrap_or(false);
            if !present {
                return Err(ConclaveError::WorkflowExecution(format!(
                    "credential variable '{}' is not set",
                    var
                )));
            }
        }
        Ok(())
    }
}

type JobOutcome = std::result::Result<String, (&'static str, String)>;

async fn run_job(program: &Path, args: &[String], job: &Job) -> JobOutcome {
    let mut child = Command::new(program)
        .args(args)
        .env("CONCLAVE_ROLE", job.role.as_str())
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| ("spawn", e.to_string()))?;

    // stdin is fed while stdout is drained, or a large prompt fills both pipes
    let stdin = child.stdin.take();
    let feed = async move {
        if let Some(mut stdin) = stdin {
            stdin.write_all(job.prompt.as_bytes()).await?;
            stdin.shutdown().await?;
        }
        Ok::<(), std::io::Error>(())
    };

    let (fed, output) = tokio::join!(feed, child.wait_with_output());

    match fed {
        Ok(()) => {}
        // program exited without reading its input; its status decides
        Err(e) if e.kind() == std::io::ErrorKind::BrokenPipe => {
            debug!(role = %job.role, "Program closed stdin early");
        }
        Err(e) => return Err(("stdin", e.to_string())),
    }

    let output = output.map_err(|e| ("wait", e.to_string()))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(("exit_status", format!("{}: {}", output.status, stderr.trim())));
    }

    Ok(String::from_utf8_lossy(&output.stdout).trim_end().to_string())
}

#[async_trait]
impl Backend for CommandBackend {
    async fn initialize(&mut self, settings: &Value) -> Result<()> {
        self.settings = CommandSettings::from_section(settings)?;
        self.program = Some(self.settings.probe()?);
        self.agents.clear();
        self.tasks.clear();
        debug!(program = ?self.program, "Command backend initialized");
        Ok(())
    }

    async fn create_agent(&mut self, spec: &AgentSpec) -> Result<AgentHandle> {
        let handle = AgentHandle::new(spec.role.clone());
        self.agents.insert(spec.role.clone(), (handle.clone(), spec.clone()));
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
        let program = self
            .program
            .clone()
            .ok_or_else(|| ConclaveError::WorkflowExecution("command backend is not initialized".into()))?;
        self.check_credentials()?;

        let mut jobs = Vec::with_capacity(tasks.len());
        for handle in tasks {
            let task = self
                .tasks
                .remove(&handle.id())
                .ok_or(ConclaveError::UnknownHandle(handle.id()))?;
            let agent = self.agents.get(&task.role).map(|(_, spec)| spec);
            jobs.push(Job {
                producer: task.role.to_string(),
                prompt: render_prompt(agent, &task),
                role: task.role,
            });
        }

        let mode = if mode == ExecutionMode::Parallel && self.supports_parallel() {
            ExecutionMode::Parallel
        } else {
            ExecutionMode::Sequential
        };

        let args = &self.settings.args;
        let outcomes = match mode {
            ExecutionMode::Parallel => {
                let width = self.settings.max_parallel_tasks.max(1);
                let pending: Vec<BoxFuture<'_, JobOutcome>> = jobs
                    .iter()
                    .map(|job| run_job(&program, args, job).boxed())
                    .collect();
                stream::iter(pending).buffered(width).collect::<Vec<_>>().await
            }
            ExecutionMode::Sequential => {
                let mut outcomes = Vec::with_capacity(jobs.len());
                for job in &jobs {
                    outcomes.push(run_job(&program, args, job).await);
                }
                outcomes
            }
        };

        let mut result = WorkflowResult::new();
        for (job, outcome) in jobs.iter().zip(outcomes) {
            match outcome {
                Ok(stdout) => {
                    result.outputs.insert(job.producer.clone(), Value::String(stdout));
                }
                Err((kind, message)) => {
                    warn!(role = %job.role, kind, error = %message, "Task failed");
                    result.record_failure(&job.producer, kind, message);
                }
            }
        }

        info!(tasks = jobs.len(), mode = %mode, success = result.success, "Command batch finished");

        Ok(result
            .with_metadata("backend", json!(BackendKind::Command.as_str()))
            .with_metadata("agents_count", json!(agents.len()))
            .with_metadata("tasks_count", json!(tasks.len()))
            .with_metadata("mode", json!(mode.as_str())))
    }

    fn supports_parallel(&self) -> bool {
        self.settings.parallel_execution
    }

    fn kind(&self) -> BackendKind {
        BackendKind::Command
    }

    async fn reset(&mut self) {
        self.agents.clear();
        self.tasks.clear();
    }

    async fn cleanup(&mut self) {
        self.reset().await;
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::catalog::Catalog;

    async fn backend_for(program: &str, extra: Value) -> CommandBackend {
        let mut section = json!({ "program": program });
        if let (Value::Object(base), Value::Object(extra)) = (&mut section, extra) {
            base.extend(extra);
        }
        let mut backend = CommandBackend::new();
        backend.initialize(&section).await.unwrap();
        backend
    }

    fn agent(id: &str) -> AgentSpec {
        AgentSpec::from_role(Catalog::company().get(&RoleId::from(id)).unwrap())
    }

    #[test]
    fn test_probe_requires_program() {
        let err = CommandSettings::default().probe().unwrap_err();
        assert!(matches!(err, ConclaveError::Configuration(_)));
    }

    #[test]
    fn test_probe_missing_program() {
        let settings = CommandSettings {
            program: Some("conclave-no-such-program-4b1d".into()),
            ..Default::default()
        };
        let err = settings.probe().unwrap_err();
        assert!(matches!(err, ConclaveError::BackendNotAvailable { .. }));
        assert!(err.to_string().contains("command.program"));
    }

    #[tokio::test]
    async fn test_cat_echoes_prompt() {
        let mut backend = backend_for("cat", json!({})).await;
        let a = backend.create_agent(&agent("sales_analyst")).await.unwrap();
        let t = backend
            .create_task(&TaskSpec::new(RoleId::from("sales_analyst"), "Forecast sales", "Forecast"))
            .await
            .unwrap();

        let result = backend
            .execute_workflow(&[a], &[t], ExecutionMode::Parallel)
            .await
            .unwrap();

        assert!(result.success);
        assert_eq!(result.mode(), Some("parallel"));
        let out = result.outputs["sales_analyst"].as_str().unwrap();
        assert!(out.contains("# Sales Analyst"));
        assert!(out.contains("Task: Forecast sales"));
    }

    #[tokio::test]
    async fn test_failing_task_is_soft() {
        let mut backend = backend_for("false", json!({ "parallel_execution": false })).await;
        let a = backend.create_agent(&agent("sales_analyst")).await.unwrap();
        let t = backend
            .create_task(&TaskSpec::new(RoleId::from("sales_analyst"), "Forecast", "Forecast"))
            .await
            .unwrap();

        let result = backend
            .execute_workflow(&[a], &[t], ExecutionMode::Parallel)
            .await
            .unwrap();

        assert!(!result.success);
        assert_eq!(result.mode(), Some("sequential"));
        assert!(result.outputs.is_empty());
        assert_eq!(result.errors().unwrap()["sales_analyst"]["kind"], "exit_status");
    }

    #[tokio::test]
    async fn test_large_prompt_round_trips() {
        let mut backend = backend_for("cat", json!({})).await;
        let a = backend.create_agent(&agent("ceo")).await.unwrap();

        let bulk = "x".repeat(1024 * 1024);
        let mut context = crate::types::Context::new();
        context.insert("output_from_assessment".into(), json!(bulk));
        let t = backend
            .create_task(&TaskSpec::new(RoleId::from("ceo"), "Decide", "Decision").with_context(context))
            .await
            .unwrap();

        let result = tokio::time::timeout(
            std::time::Duration::from_secs(30),
            backend.execute_workflow(&[a], &[t], ExecutionMode::Sequential),
        )
        .await
        .expect("batch should finish")
        .unwrap();

        assert!(result.success);
        let out = result.outputs["ceo"].as_str().unwrap();
        assert!(out.len() > 1024 * 1024);
        assert!(out.contains("- output_from_assessment: xxxx"));
    }

    #[tokio::test]
    async fn test_tasks_released_after_execution() {
        let mut backend = backend_for("cat", json!({})).await;
        let a = backend.create_agent(&agent("ceo")).await.unwrap();

        for _ in 0..3 {
            let t = backend
                .create_task(&TaskSpec::new(RoleId::from("ceo"), "Decide", "Decision"))
                .await
                .unwrap();
            backend
                .execute_workflow(&[a.clone()], &[t], ExecutionMode::Parallel)
                .await
                .unwrap();
        }
        assert_eq!(backend.task_count(), 0);

        backend.reset().await;
        let err = backend
            .create_task(&TaskSpec::new(RoleId::from("ceo"), "Decide", "Decision"))
            .await
            .unwrap_err();
        assert!(matches!(err, ConclaveError::AgentNotFound(_)));
    }

    #[tokio::test]
    async fn test_missing_credential_is_batch_fault() {
        let mut backend = backend_for("cat", json!({ "api_key_env": "CONCLAVE_TEST_UNSET_KEY_7F3A" })).await;
        let a = backend.create_agent(&agent("ceo")).await.unwrap();

        let err = backend
            .execute_workflow(&[a], &[], ExecutionMode::Sequential)
            .await
            .unwrap_err();
        assert!(matches!(err, ConclaveError::WorkflowExecution(_)));
    }
}
