//! Workflow manager - turns a scope into agents, tasks and backend batches
//!
//! ```text
//!   run_scope("marketing")
//!        │
//!        ├── cache hit? ──────────────► stored WorkflowResult
//!        │
//!        ├── participants ─► create_agent × N
//!        ├── template ─────► TaskSpec × M
//!        │
//!        └── batches:  [independent…] ─► execute (run mode)
//!                      [dependent]    ─► context injected, execute (sequential)
//! ```

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use serde_json::{json, Map, Value};
use tracing::{debug, info, instrument, warn};

use crate::backend::Backend;
use crate::cache::ResultCache;
use crate::catalog::{Catalog, RoleDescriptor, RoleId};
use crate::context::ContextManager;
use crate::error::{ConclaveError, Result};
use crate::templates::TemplateBook;
use crate::types::{AgentHandle, AgentSpec, Context, ExecutionMode, TaskHandle, TaskSpec, WorkflowResult};

/// Drives one backend through scope and cross-scope runs
///
/// Every run takes `&mut self`, so a manager and its context store serve one
/// run at a time. Concurrent runs need separate managers; they may share the
/// catalog and the result cache.
pub struct WorkflowManager {
    backend: Box<dyn Backend>,
    catalog: Arc<Catalog>,
    templates: TemplateBook,
    context: ContextManager,
    cache: Option<Arc<ResultCache>>,
}

/// Batch results gathered over one run
#[derive(Default)]
struct Collected {
    failed: bool,
    outputs: BTreeMap<String, Value>,
    errors: Map<String, Value>,
    batches: Vec<Value>,
}

impl Collected {
    fn absorb(&mut self, result: WorkflowResult) {
        self.failed |= !result.success;
        if let Some(errors) = result.errors() {
            self.errors.extend(errors.clone());
        }
        self.outputs.extend(result.outputs);

        let mut batch: Map<String, Value> = result.metadata.into_iter().collect();
        batch.remove("errors");
        self.batches.push(Value::Object(batch));
    }

    fn into_result(self, metadata: Context) -> WorkflowResult {
        let mut result = WorkflowResult::new();
        result.success = !self.failed;
        result.outputs = self.outputs;
        result.metadata = metadata.into_iter().collect();
        result.metadata.insert("batches".into(), Value::Array(self.batches));
        if !self.errors.is_empty() {
            result.metadata.insert("errors".into(), Value::Object(self.errors));
        }
        result
    }
}

impl WorkflowManager {
    pub fn new(backend: Box<dyn Backend>, catalog: Arc<Catalog>, templates: TemplateBook) -> Self {
        Self {
            backend,
            catalog,
            templates,
            context: ContextManager::new(),
            cache: None,
        }
    }

    pub fn with_cache(mut self, cache: Arc<ResultCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub fn backend(&self) -> &dyn Backend {
        self.backend.as_ref()
    }

    /// Run every role of one group through the group's template
    #[instrument(skip(self, params), fields(backend = %self.backend.kind()))]
    pub async fn run_scope(&mut self, scope: &str, params: &HashMap<String, String>) -> Result<WorkflowResult> {
        if let Some(hit) = self.cached(scope, params).await {
            return Ok(hit);
        }

        let participants: Vec<RoleDescriptor> = self
            .catalog
            .roles_in_group(scope)
            .into_iter()
            .cloned()
            .collect();
        if participants.is_empty() {
            return Err(ConclaveError::UnknownScope(scope.to_string()));
        }

        let template = self
            .templates
            .scope(scope)
            .ok_or_else(|| ConclaveError::UnknownScope(scope.to_string()))?;
        let present: HashSet<RoleId> = participants.iter().map(|r| r.id.clone()).collect();
        let tasks = template.instantiate(scope, &present, params)?;

        let mode = if self.backend.supports_parallel() {
            ExecutionMode::Parallel
        } else {
            ExecutionMode::Sequential
        };

        let mut metadata = Context::new();
        metadata.insert("scope".into(), json!(scope));
        metadata.insert("backend".into(), json!(self.backend.kind().as_str()));
        metadata.insert("requested_mode".into(), json!(mode.as_str()));
        metadata.insert("scenario".into(), json!(params));

        info!(
            scope,
            participants = participants.len(),
            tasks = tasks.len(),
            mode = %mode,
            "Starting scope run"
        );
        self.run_unit(scope, &participants, tasks, mode, metadata, params).await
    }

    /// Run one representative per group through the shared cross-scope template
    ///
    /// Groups without a head-level role are skipped. Always sequential.
    #[instrument(skip(self, params), fields(backend = %self.backend.kind()))]
    pub async fn run_cross_scope(&mut self, scopes: &[String], params: &HashMap<String, String>) -> Result<WorkflowResult> {
        let mut unique: Vec<&str> = Vec::new();
        for scope in scopes {
            if !unique.contains(&scope.as_str()) {
                unique.push(scope.as_str());
            }
        }
        let unit = format!("cross:{}", unique.join("+"));

        if let Some(hit) = self.cached(&unit, params).await {
            return Ok(hit);
        }

        let mut representatives = Vec::new();
        for scope in &unique {
            match self.catalog.representative(scope) {
                Some(role) => representatives.push(role.clone()),
                None => debug!(scope, "No representative, scope skipped"),
            }
        }

        let refs: Vec<&RoleDescriptor> = representatives.iter().collect();
        let tasks = self.templates.cross().instantiate(&refs, params);

        let mode = ExecutionMode::Sequential;
        let mut metadata = Context::new();
        metadata.insert("scopes".into(), json!(unique));
        metadata.insert("backend".into(), json!(self.backend.kind().as_str()));
        metadata.insert("requested_mode".into(), json!(mode.as_str()));
        metadata.insert("scenario".into(), json!(params));

        info!(
            scopes = ?unique,
            representatives = representatives.len(),
            "Starting cross-scope run"
        );
        self.run_unit(&unit, &representatives, tasks, mode, metadata, params).await
    }

    /// Release backend resources
    pub async fn shutdown(mut self) {
        self.backend.cleanup().await;
        info!("Workflow manager shut down");
    }

    async fn run_unit(
        &mut self,
        unit: &str,
        participants: &[RoleDescriptor],
        tasks: Vec<TaskSpec>,
        mode: ExecutionMode,
        metadata: Context,
        params: &HashMap<String, String>,
    ) -> Result<WorkflowResult> {
        let outcome = self.execute(participants, tasks, mode, metadata).await;
        self.context.clear();
        self.backend.reset().await;

        let result = match outcome {
            Ok(result) => result,
            Err(e) => {
                warn!(unit, error = %e, "Run failed");
                return Err(e);
            }
        };

        if result.success {
            self.remember(unit, params, &result).await;
        } else {
            warn!(unit, errors = ?result.errors().map(|e| e.len()), "Run finished with task failures");
        }

        info!(unit, outputs = result.outputs.len(), success = result.success, "Run complete");
        Ok(result)
    }

    async fn execute(
        &mut self,
        participants: &[RoleDescriptor],
        tasks: Vec<TaskSpec>,
        mode: ExecutionMode,
        metadata: Context,
    ) -> Result<WorkflowResult> {
        self.context.set_workflow_metadata(metadata.clone());

        let mut agents: Vec<AgentHandle> = Vec::with_capacity(participants.len());
        for role in participants {
            let spec = AgentSpec::from_role(role);
            let handle = self.backend.create_agent(&spec).await?;
            debug!(role = %role.id, agent_id = %handle.id(), "Agent created");
            agents.push(handle);
        }

        for task in &tasks {
            if let Some(id) = &task.id {
                self.context.add_context(id.clone(), task.context.clone());
            }
        }

        let mut collected = Collected::default();
        let mut pending: Vec<(TaskHandle, TaskSpec)> = Vec::new();

        for task in tasks {
            if task.is_independent() {
                // outputs are keyed by role, so a batch holds one task per role
                if pending.iter().any(|(_, queued)| queued.role == task.role) {
                    self.flush(&agents, &mut pending, mode, &mut collected).await?;
                }
                let handle = self.backend.create_task(&task).await?;
                pending.push((handle, task));
                continue;
            }

            // dependencies must have finished before the context is built
            self.flush(&agents, &mut pending, mode, &mut collected).await?;

            let id = task.id.clone().unwrap_or_default();
            let context = self.context.build_context_for_task(&id, &task.depends_on, None);
            let task = task.with_context(context);
            let handle = self.backend.create_task(&task).await?;

            let mut single = vec![(handle, task)];
            self.flush(&agents, &mut single, ExecutionMode::Sequential, &mut collected)
                .await?;
        }
        self.flush(&agents, &mut pending, mode, &mut collected).await?;

        Ok(collected.into_result(metadata))
    }

    async fn flush(
        &mut self,
        agents: &[AgentHandle],
        batch: &mut Vec<(TaskHandle, TaskSpec)>,
        mode: ExecutionMode,
        collected: &mut Collected,
    ) -> Result<()> {
        if batch.is_empty() {
            return Ok(());
        }

        let handles: Vec<TaskHandle> = batch.iter().map(|(handle, _)| *handle).collect();
        debug!(tasks = handles.len(), mode = %mode, "Submitting batch");
        let result = self.backend.execute_workflow(agents, &handles, mode).await?;

        for (_, spec) in batch.drain(..) {
            let output = result.outputs.get(spec.role.as_str());
            if let (Some(id), Some(output)) = (spec.id, output) {
                self.context.store_result(id, output.clone());
            }
        }

        collected.absorb(result);
        Ok(())
    }

    async fn cached(&self, unit: &str, params: &HashMap<String, String>) -> Option<WorkflowResult> {
        let cache = self.cache.as_ref()?;
        let stored = cache.get(unit, self.backend.kind().as_str(), params).await?;

        match serde_json::from_value(stored) {
            Ok(result) => {
                info!(unit, "Returning cached result");
                Some(result)
            }
            Err(e) => {
                warn!(unit, error = %e, "Cached result has unexpected shape, ignoring");
                None
            }
        }
    }

    async fn remember(&self, unit: &str, params: &HashMap<String, String>, result: &WorkflowResult) {
        let Some(cache) = &self.cache else {
            return;
        };

        match serde_json::to_value(result) {
            Ok(value) => cache.set(unit, self.backend.kind().as_str(), params, &value).await,
            Err(e) => warn!(unit, error = %e, "Cannot serialize result for caching"),
        }
    }
}
