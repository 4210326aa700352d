//! Per-run store of task context and results

use std::collections::HashMap;

use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::types::Context;

/// Context shared between the tasks of a single run
///
/// Holds each task's declared context, the results of completed tasks and
/// the workflow metadata. One instance serves one run at a time and is
/// cleared when that run ends.
#[derive(Debug, Default)]
pub struct ContextManager {
    contexts: HashMap<String, Context>,
    results: HashMap<String, Value>,
    metadata: Option<Map<String, Value>>,
}

impl ContextManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_context(&mut self, task_id: impl Into<String>, context: Context) {
        self.contexts.insert(task_id.into(), context);
    }

    pub fn context_for(&self, task_id: &str) -> Option<&Context> {
        self.contexts.get(task_id)
    }

    pub fn store_result(&mut self, task_id: impl Into<String>, result: Value) {
        self.results.insert(task_id.into(), result);
    }

    pub fn result_for(&self, task_id: &str) -> Option<&Value> {
        self.results.get(task_id)
    }

    pub fn has_result(&self, task_id: &str) -> bool {
        self.results.contains_key(task_id)
    }

    pub fn all_results(&self) -> &HashMap<String, Value> {
        &self.results
    }

    /// Set the run's metadata. Only the first write sticks.
    pub fn set_workflow_metadata(&mut self, metadata: Map<String, Value>) -> bool {
        if self.metadata.is_some() {
            warn!("Workflow metadata already set for this run, ignoring");
            return false;
        }
        self.metadata = Some(metadata);
        true
    }

    pub fn workflow_metadata(&self) -> Option<&Map<String, Value>> {
        self.metadata.as_ref()
    }

    /// Merge a task's own context with the results of its dependencies
    ///
    /// Dependencies without a stored result are left out rather than waited
    /// on. `extra` overrides anything already present, and the workflow
    /// metadata is added under `workflow_metadata`.
    pub fn build_context_for_task(
        &self,
        task_id: &str,
        dependencies: &[String],
        extra: Option<&Context>,
    ) -> Context {
        let mut context = self.contexts.get(task_id).cloned().unwrap_or_default();

        for dep in dependencies {
            match self.results.get(dep) {
                Some(result) => {
                    context.insert(format!("output_from_{}", dep), result.clone());
                }
                None => debug!(task_id, dependency = %dep, "Dependency has no result yet, omitted"),
            }
        }

        if let Some(extra) = extra {
            for (key, value) in extra {
                context.insert(key.clone(), value.clone());
            }
        }

        if let Some(metadata) = &self.metadata {
            context.insert("workflow_metadata".to_string(), Value::Object(metadata.clone()));
        }

        context
    }

    /// Drop everything stored for the current run
    pub fn clear(&mut self) {
        self.contexts.clear();
        self.results.clear();
        self.metadata = None;
    }

    pub fn is_empty(&self) -> bool {
        self.contexts.is_empty() && self.results.is_empty() && self.metadata.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ctx(value: Value) -> Context {
        match value {
            Value::Object(map) => map,
            _ => panic!("expected an object"),
        }
    }

    #[test]
    fn test_dependency_output_injected_once_complete() {
        let mut manager = ContextManager::new();
        let deps = vec!["a".to_string()];

        let before = manager.build_context_for_task("b", &deps, None);
        assert!(!before.contains_key("output_from_a"));

        manager.store_result("a", json!("analysis"));
        let after = manager.build_context_for_task("b", &deps, None);
        assert_eq!(after["output_from_a"], json!("analysis"));
    }

    #[test]
    fn test_unresolved_dependencies_are_omitted() {
        let mut manager = ContextManager::new();
        manager.store_result("a", json!(1));

        let deps = vec!["a".to_string(), "late".to_string()];
        let context = manager.build_context_for_task("c", &deps, None);
        assert_eq!(context.len(), 1);
        assert!(context.contains_key("output_from_a"));
    }

    #[test]
    fn test_layering_order() {
        let mut manager = ContextManager::new();
        manager.add_context("b", ctx(json!({ "tone": "formal", "output_from_a": "stale" })));
        manager.store_result("a", json!("fresh"));
        manager.set_workflow_metadata(ctx(json!({ "scope": "marketing" })));

        let extra = ctx(json!({ "tone": "casual" }));
        let context = manager.build_context_for_task("b", &["a".to_string()], Some(&extra));

        assert_eq!(context["output_from_a"], json!("fresh"));
        assert_eq!(context["tone"], json!("casual"));
        assert_eq!(context["workflow_metadata"]["scope"], json!("marketing"));
    }

    #[test]
    fn test_metadata_is_write_once() {
        let mut manager = ContextManager::new();
        assert!(manager.set_workflow_metadata(ctx(json!({ "scope": "first" }))));
        assert!(!manager.set_workflow_metadata(ctx(json!({ "scope": "second" }))));
        assert_eq!(manager.workflow_metadata().unwrap()["scope"], json!("first"));
    }

    #[test]
    fn test_clear_resets_everything() {
        let mut manager = ContextManager::new();
        manager.add_context("a", Context::new());
        manager.store_result("a", json!("x"));
        manager.set_workflow_metadata(Map::new());
        assert!(!manager.is_empty());

        manager.clear();
        assert!(manager.is_empty());
        assert!(!manager.has_result("a"));
        assert!(manager.set_workflow_metadata(Map::new()));
    }
}
